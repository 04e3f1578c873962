use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

pub type SessionId = Ulid;
pub type CourseId = Ulid;
pub type TeacherId = Ulid;
pub type ClassGroupId = Ulid;
pub type UserId = Ulid;

/// Error returned when a weekday or time of day cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError(String);

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseError {}

/// Day of the weekly template. The grid runs Monday to Saturday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl Weekday {
    pub const ALL: [Weekday; 6] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Monday => "MONDAY",
            Weekday::Tuesday => "TUESDAY",
            Weekday::Wednesday => "WEDNESDAY",
            Weekday::Thursday => "THURSDAY",
            Weekday::Friday => "FRIDAY",
            Weekday::Saturday => "SATURDAY",
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weekday {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Weekday::ALL
            .into_iter()
            .find(|day| day.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ParseError(format!("invalid weekday: {s:?}")))
    }
}

/// Wall-clock time in `[00:00, 24:00)`, stored as minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub const MINUTES_PER_DAY: u16 = 24 * 60;

    pub fn new(hour: u8, minute: u8) -> Result<Self, ParseError> {
        if hour >= 24 || minute >= 60 {
            return Err(ParseError(format!("time out of range: {hour}:{minute:02}")));
        }
        Ok(Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    pub fn from_minutes(minutes: u16) -> Result<Self, ParseError> {
        if minutes >= Self::MINUTES_PER_DAY {
            return Err(ParseError(format!("time out of range: {minutes} minutes")));
        }
        Ok(Self(minutes))
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }

    pub fn hour(&self) -> u8 {
        (self.0 / 60) as u8
    }

    pub fn minute(&self) -> u8 {
        (self.0 % 60) as u8
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl FromStr for TimeOfDay {
    type Err = ParseError;

    /// Accepts `HH:MM` and `H:MM`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError(format!("invalid time of day: {s:?}"));
        let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
        let digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if h.is_empty() || h.len() > 2 || m.len() != 2 || !digits(h) || !digits(m) {
            return Err(invalid());
        }
        let hour: u8 = h.parse().map_err(|_| invalid())?;
        let minute: u8 = m.parse().map_err(|_| invalid())?;
        Self::new(hour, minute)
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(value: TimeOfDay) -> Self {
        value.to_string()
    }
}

/// Half-open interval `[start, end)` within one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl TimeRange {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self { start, end }
    }

    /// False for `start >= end`; such a range never overlaps anything.
    pub fn is_valid(&self) -> bool {
        self.start < self.end
    }

    pub fn duration_minutes(&self) -> u16 {
        self.end.minutes().saturating_sub(self.start.minutes())
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.is_valid() && other.is_valid() && self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: TimeOfDay) -> bool {
        self.start <= t && t < self.end
    }
}

/// Teaching format. Informational only, never part of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionFormat {
    Lecture,
    Tutorial,
    Lab,
}

impl fmt::Display for SessionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SessionFormat::Lecture => "LECTURE",
            SessionFormat::Tutorial => "TUTORIAL",
            SessionFormat::Lab => "LAB",
        })
    }
}

/// A (subject, teacher, class group, term) assignment, owned by the course registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub id: CourseId,
    pub subject: String,
    pub teacher_id: TeacherId,
    pub class_group_id: ClassGroupId,
    pub term: String,
}

impl Course {
    pub fn reference(&self) -> CourseRef {
        CourseRef {
            course_id: self.id,
            teacher_id: self.teacher_id,
            class_group_id: self.class_group_id,
        }
    }
}

/// The parts of a course a session needs for conflict checks, resolved once from the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseRef {
    pub course_id: CourseId,
    pub teacher_id: TeacherId,
    pub class_group_id: ClassGroupId,
}

/// One weekly occurrence of a course.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub course: CourseRef,
    pub weekday: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub format: SessionFormat,
    pub room: String,
}

impl Session {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start, self.end)
    }

    pub fn teacher_id(&self) -> TeacherId {
        self.course.teacher_id
    }

    pub fn class_group_id(&self) -> ClassGroupId {
        self.course.class_group_id
    }

    /// True when both sessions sit on the same weekday with overlapping intervals.
    pub fn collides_in_time(&self, other: &Session) -> bool {
        self.weekday == other.weekday && self.range().overlaps(&other.range())
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}-{} {} ({})",
            self.weekday, self.start, self.end, self.room, self.format
        )
    }
}

/// A session as proposed by a caller, before it has a course snapshot or an id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSession {
    pub course_id: CourseId,
    pub weekday: Weekday,
    pub start: TimeOfDay,
    pub end: TimeOfDay,
    pub format: SessionFormat,
    pub room: String,
}

/// Partial update; `None` keeps the current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionChanges {
    pub course_id: Option<CourseId>,
    pub weekday: Option<Weekday>,
    pub start: Option<TimeOfDay>,
    pub end: Option<TimeOfDay>,
    pub format: Option<SessionFormat>,
    pub room: Option<String>,
}

impl SessionChanges {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Shift both ends to a new interval.
    pub fn reschedule(start: TimeOfDay, end: TimeOfDay) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            ..Self::default()
        }
    }
}

/// Log records for the session grid. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SessionCreated { session: Session },
    SessionUpdated { session: Session },
    SessionDeleted { id: SessionId },
    /// Cascade removal of every session owned by a deleted course, teacher or class group.
    SessionsReleased { ids: Vec<SessionId> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u8, m: u8) -> TimeOfDay {
        TimeOfDay::new(h, m).unwrap()
    }

    #[test]
    fn time_of_day_parse_and_display() {
        assert_eq!("08:00".parse::<TimeOfDay>().unwrap(), t(8, 0));
        assert_eq!("8:05".parse::<TimeOfDay>().unwrap(), t(8, 5));
        assert_eq!(" 23:59 ".parse::<TimeOfDay>().unwrap(), t(23, 59));
        assert_eq!(t(9, 5).to_string(), "09:05");
        assert_eq!(t(13, 30).minutes(), 810);
    }

    #[test]
    fn time_of_day_rejects_out_of_range() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("noon".parse::<TimeOfDay>().is_err());
        assert!("12:5".parse::<TimeOfDay>().is_err());
        assert!("+8:00".parse::<TimeOfDay>().is_err());
        assert!("8:+5".parse::<TimeOfDay>().is_err());
        assert!("-0:00".parse::<TimeOfDay>().is_err());
        assert!(TimeOfDay::from_minutes(TimeOfDay::MINUTES_PER_DAY).is_err());
        assert!(TimeOfDay::from_minutes(TimeOfDay::MINUTES_PER_DAY - 1).is_ok());
    }

    #[test]
    fn time_of_day_ordering() {
        assert!(t(8, 0) < t(8, 1));
        assert!(t(9, 59) < t(10, 0));
        assert_eq!(t(10, 0), t(10, 0));
    }

    #[test]
    fn range_overlap() {
        let a = TimeRange::new(t(8, 0), t(10, 0));
        let b = TimeRange::new(t(9, 0), t(11, 0));
        let c = TimeRange::new(t(10, 0), t(12, 0));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c)); // touching, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn range_one_minute_overlap() {
        let a = TimeRange::new(t(8, 0), t(10, 1));
        let b = TimeRange::new(t(10, 0), t(11, 0));
        assert!(a.overlaps(&b));
    }

    #[test]
    fn range_contains_is_half_open() {
        let r = TimeRange::new(t(8, 0), t(10, 0));
        assert!(r.contains(t(8, 0)));
        assert!(r.contains(t(9, 59)));
        assert!(!r.contains(t(10, 0)));
        assert_eq!(r.duration_minutes(), 120);
    }

    #[test]
    fn invalid_range_never_overlaps() {
        let backwards = TimeRange::new(t(10, 0), t(8, 0));
        let day = TimeRange::new(t(0, 0), t(23, 59));
        assert!(!backwards.is_valid());
        assert!(!backwards.overlaps(&day));
        assert_eq!(backwards.duration_minutes(), 0);
    }

    #[test]
    fn weekday_parse_and_order() {
        assert_eq!("monday".parse::<Weekday>().unwrap(), Weekday::Monday);
        assert_eq!("SATURDAY".parse::<Weekday>().unwrap(), Weekday::Saturday);
        assert!("SUNDAY".parse::<Weekday>().is_err());
        assert!(Weekday::Monday < Weekday::Tuesday);
        assert!(Weekday::Friday < Weekday::Saturday);
        let mut days = vec![Weekday::Friday, Weekday::Monday, Weekday::Wednesday];
        days.sort();
        assert_eq!(days, vec![Weekday::Monday, Weekday::Wednesday, Weekday::Friday]);
    }

    #[test]
    fn time_of_day_serializes_as_string() {
        let json = serde_json::to_string(&t(8, 30)).unwrap();
        assert_eq!(json, "\"08:30\"");
        let back: TimeOfDay = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t(8, 30));
        assert!(serde_json::from_str::<TimeOfDay>("\"25:00\"").is_err());
    }

    #[test]
    fn enums_serialize_like_display() {
        assert_eq!(serde_json::to_string(&Weekday::Monday).unwrap(), "\"MONDAY\"");
        assert_eq!(serde_json::to_string(&SessionFormat::Lab).unwrap(), "\"LAB\"");
        let day: Weekday = serde_json::from_str("\"SATURDAY\"").unwrap();
        assert_eq!(day, Weekday::Saturday);
        for day in Weekday::ALL {
            assert_eq!(serde_json::to_value(day).unwrap(), day.as_str());
        }
    }

    #[test]
    fn session_display() {
        let session = Session {
            id: Ulid::new(),
            course: CourseRef {
                course_id: Ulid::new(),
                teacher_id: Ulid::new(),
                class_group_id: Ulid::new(),
            },
            weekday: Weekday::Monday,
            start: t(8, 0),
            end: t(10, 0),
            format: SessionFormat::Lecture,
            room: "Amphi A".into(),
        };
        assert_eq!(session.to_string(), "MONDAY 08:00-10:00 Amphi A (LECTURE)");
    }

    #[test]
    fn changes_helpers() {
        assert!(SessionChanges::default().is_empty());
        let c = SessionChanges::reschedule(t(8, 10), t(10, 10));
        assert!(!c.is_empty());
        assert_eq!(c.start, Some(t(8, 10)));
        assert_eq!(c.room, None);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::SessionCreated {
            session: Session {
                id: Ulid::new(),
                course: CourseRef {
                    course_id: Ulid::new(),
                    teacher_id: Ulid::new(),
                    class_group_id: Ulid::new(),
                },
                weekday: Weekday::Thursday,
                start: t(14, 0),
                end: t(16, 0),
                format: SessionFormat::Lab,
                room: "B-204".into(),
            },
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
