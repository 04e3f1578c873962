use std::fmt;

use serde::{Deserialize, Serialize};

use crate::limits::MAX_ROOM_LEN;
use crate::model::*;

use super::SchedulingError;

/// The resource axis two overlapping sessions share.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConflictReason {
    Room,
    Teacher,
    ClassGroup,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::Room => "room",
            ConflictReason::Teacher => "teacher",
            ConflictReason::ClassGroup => "class_group",
        }
    }
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One committed session the candidate collides with, and on which axis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub session: Session,
    pub reason: ConflictReason,
}

/// Axes shared by two sessions, ignoring time. At most three.
pub fn shared_resources(a: &Session, b: &Session) -> impl Iterator<Item = ConflictReason> {
    [
        (a.room == b.room, ConflictReason::Room),
        (a.teacher_id() == b.teacher_id(), ConflictReason::Teacher),
        (a.class_group_id() == b.class_group_id(), ConflictReason::ClassGroup),
    ]
    .into_iter()
    .filter_map(|(hit, reason)| hit.then_some(reason))
}

/// Every (existing session, reason) pair that `candidate` collides with.
///
/// Only sessions on the candidate's weekday whose `[start, end)` overlaps the
/// candidate's are considered; `exclude_id` removes the candidate's own committed
/// version during an update. A session sharing several axes yields one entry per
/// axis. The result is sorted by (start, room, id, reason) so it does not depend
/// on the order of `existing`.
pub fn find_conflicts<'a>(
    candidate: &Session,
    existing: impl IntoIterator<Item = &'a Session>,
    exclude_id: Option<SessionId>,
) -> Vec<Conflict> {
    let mut conflicts: Vec<Conflict> = existing
        .into_iter()
        .filter(|s| Some(s.id) != exclude_id)
        .filter(|s| s.collides_in_time(candidate))
        .flat_map(|s| {
            shared_resources(candidate, s).map(move |reason| Conflict {
                session: s.clone(),
                reason,
            })
        })
        .collect();
    conflicts.sort_by(|a, b| {
        a.session
            .start
            .cmp(&b.session.start)
            .then_with(|| a.session.room.cmp(&b.session.room))
            .then_with(|| a.session.id.cmp(&b.session.id))
            .then_with(|| a.reason.cmp(&b.reason))
    });
    conflicts.dedup_by(|a, b| a.session.id == b.session.id && a.reason == b.reason);
    conflicts
}

/// Rooms are compared exactly after trimming surrounding whitespace.
pub(crate) fn normalize_room(room: &str) -> String {
    room.trim().to_string()
}

pub(crate) fn validate_session(session: &Session) -> Result<(), SchedulingError> {
    if session.start >= session.end {
        return Err(SchedulingError::invalid(
            "end",
            format!("end {} must be after start {}", session.end, session.start),
        ));
    }
    if session.room.is_empty() {
        return Err(SchedulingError::invalid("room", "room must not be empty"));
    }
    if session.room.chars().count() > MAX_ROOM_LEN {
        return Err(SchedulingError::invalid(
            "room",
            format!("room name longer than {MAX_ROOM_LEN} characters"),
        ));
    }
    Ok(())
}

/// An invariant broken by a committed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    InvalidInterval(SessionId),
    Overlap {
        first: SessionId,
        second: SessionId,
        reason: ConflictReason,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::InvalidInterval(id) => write!(f, "session {id}: start is not before end"),
            Violation::Overlap { first, second, reason } => {
                write!(f, "sessions {first} and {second} overlap on {reason}")
            }
        }
    }
}

/// Re-check every invariant over a whole set of sessions.
/// Each conflicting pair is reported once per axis, lower id first.
pub fn audit(sessions: &[Session]) -> Vec<Violation> {
    let mut violations: Vec<Violation> = sessions
        .iter()
        .filter(|s| !s.range().is_valid())
        .map(|s| Violation::InvalidInterval(s.id))
        .collect();

    for day in Weekday::ALL {
        let mut today: Vec<&Session> = sessions
            .iter()
            .filter(|s| s.weekday == day && s.range().is_valid())
            .collect();
        today.sort_by_key(|s| s.start);

        // Sweep: once a later session starts at or after `a.end`, nothing further can overlap `a`.
        for (i, a) in today.iter().enumerate() {
            for b in today[i + 1..].iter().take_while(|b| b.start < a.end) {
                let (first, second) = if a.id <= b.id { (a.id, b.id) } else { (b.id, a.id) };
                for reason in shared_resources(a, b) {
                    violations.push(Violation::Overlap { first, second, reason });
                }
            }
        }
    }
    violations
}
