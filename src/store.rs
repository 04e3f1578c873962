use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::model::*;
use crate::wal::Wal;

/// Selection over committed sessions. Every `Some` field must match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionFilter {
    pub weekday: Option<Weekday>,
    pub room: Option<String>,
    pub teacher_id: Option<TeacherId>,
    pub class_group_id: Option<ClassGroupId>,
    pub course_id: Option<CourseId>,
    /// Keep only sessions whose interval overlaps this range.
    pub overlapping: Option<TimeRange>,
}

impl SessionFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn on(weekday: Weekday) -> Self {
        Self {
            weekday: Some(weekday),
            ..Self::default()
        }
    }

    pub fn room(mut self, room: impl Into<String>) -> Self {
        self.room = Some(room.into());
        self
    }

    pub fn teacher(mut self, id: TeacherId) -> Self {
        self.teacher_id = Some(id);
        self
    }

    pub fn class_group(mut self, id: ClassGroupId) -> Self {
        self.class_group_id = Some(id);
        self
    }

    pub fn course(mut self, id: CourseId) -> Self {
        self.course_id = Some(id);
        self
    }

    pub fn overlapping(mut self, range: TimeRange) -> Self {
        self.overlapping = Some(range);
        self
    }

    pub fn matches(&self, s: &Session) -> bool {
        self.weekday.is_none_or(|d| d == s.weekday)
            && self.room.as_deref().is_none_or(|r| r == s.room)
            && self.teacher_id.is_none_or(|t| t == s.teacher_id())
            && self.class_group_id.is_none_or(|c| c == s.class_group_id())
            && self.course_id.is_none_or(|c| c == s.course.course_id)
            && self.overlapping.is_none_or(|r| r.overlaps(&s.range()))
    }
}

#[derive(Debug)]
pub enum RepositoryError {
    AlreadyExists(SessionId),
    NotFound(SessionId),
    WalError(String),
}

impl fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepositoryError::AlreadyExists(id) => write!(f, "session already exists: {id}"),
            RepositoryError::NotFound(id) => write!(f, "session not found: {id}"),
            RepositoryError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for RepositoryError {}

impl From<io::Error> for RepositoryError {
    fn from(e: io::Error) -> Self {
        RepositoryError::WalError(e.to_string())
    }
}

/// Durable store of sessions. Each write is atomic on its own; serialising
/// check-then-write sequences is the scheduler's job.
///
/// `query` returns sessions in grid order: weekday, start, room, id.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn get(&self, id: SessionId) -> Result<Option<Session>, RepositoryError>;

    async fn query(&self, filter: &SessionFilter) -> Result<Vec<Session>, RepositoryError>;

    /// Persist a new session under its id.
    async fn insert(&self, session: Session) -> Result<SessionId, RepositoryError>;

    /// Replace the session with the same id. Returns the previous version.
    async fn update(&self, session: Session) -> Result<Session, RepositoryError>;

    /// Remove a session. Returns what was removed.
    async fn delete(&self, id: SessionId) -> Result<Session, RepositoryError>;

    /// Remove every matching session in one atomic step (cascades).
    async fn delete_matching(&self, filter: &SessionFilter) -> Result<Vec<Session>, RepositoryError>;
}

/// Sessions of one weekday, sorted by `start`.
#[derive(Debug, Default)]
struct DayGrid {
    sessions: Vec<Session>,
}

impl DayGrid {
    /// Insert maintaining sort order by start.
    fn insert(&mut self, session: Session) {
        let pos = self.sessions.partition_point(|s| s.start <= session.start);
        self.sessions.insert(pos, session);
    }

    fn remove(&mut self, id: SessionId) -> Option<Session> {
        let pos = self.sessions.iter().position(|s| s.id == id)?;
        Some(self.sessions.remove(pos))
    }

    /// Sessions whose interval overlaps `range`.
    /// Binary search skips everything starting at or after `range.end`.
    fn overlapping(&self, range: TimeRange) -> impl Iterator<Item = &Session> {
        let right_bound = self.sessions.partition_point(|s| s.start < range.end);
        self.sessions[..right_bound]
            .iter()
            .filter(move |s| s.end > range.start)
    }
}

#[derive(Debug, Default)]
struct Grid {
    days: BTreeMap<Weekday, DayGrid>,
    /// Reverse lookup: session id → weekday.
    index: HashMap<SessionId, Weekday>,
}

impl Grid {
    fn get(&self, id: &SessionId) -> Option<&Session> {
        let day = self.index.get(id)?;
        self.days.get(day)?.sessions.iter().find(|s| s.id == *id)
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn remove(&mut self, id: SessionId) -> Option<Session> {
        let day = self.index.remove(&id)?;
        self.days.get_mut(&day)?.remove(id)
    }

    fn put(&mut self, session: Session) {
        self.index.insert(session.id, session.weekday);
        self.days.entry(session.weekday).or_default().insert(session);
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::SessionCreated { session } => self.put(session),
            Event::SessionUpdated { session } => {
                self.remove(session.id);
                self.put(session);
            }
            Event::SessionDeleted { id } => {
                self.remove(id);
            }
            Event::SessionsReleased { ids } => {
                for id in ids {
                    self.remove(id);
                }
            }
        }
    }

    /// Matching sessions in grid order.
    fn select(&self, filter: &SessionFilter) -> Vec<Session> {
        let mut out = Vec::new();
        for (day, grid) in &self.days {
            if filter.weekday.is_some_and(|d| d != *day) {
                continue;
            }
            let hits: Box<dyn Iterator<Item = &Session>> = match filter.overlapping {
                Some(range) => Box::new(grid.overlapping(range)),
                None => Box::new(grid.sessions.iter()),
            };
            let start = out.len();
            out.extend(hits.filter(|s| filter.matches(s)).cloned());
            out[start..].sort_by(|a, b| {
                a.start
                    .cmp(&b.start)
                    .then_with(|| a.room.cmp(&b.room))
                    .then_with(|| a.id.cmp(&b.id))
            });
        }
        out
    }
}

/// Session repository holding the weekly grid in memory, optionally backed by a WAL.
///
/// Writers queue on `writer`, append and fsync the log record, then take the
/// grid lock only to apply it. Readers take the grid lock alone and never
/// wait on disk. Nothing awaits between the append and the apply, so a
/// dropped caller never leaves a logged-but-unapplied write.
pub struct MemoryRepository {
    grid: RwLock<Grid>,
    writer: Mutex<Option<Wal>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    /// Volatile repository, nothing survives the process.
    pub fn new() -> Self {
        Self::with_state(Grid::default(), None)
    }

    /// Durable repository: replays the WAL at `path` and appends to it from then on.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (wal, events) = Wal::recover(path)?;
        let mut grid = Grid::default();
        let replayed = events.len();
        for event in events {
            grid.apply(event);
        }
        tracing::debug!(
            "replayed {replayed} WAL records from {}, {} sessions live",
            path.display(),
            grid.len()
        );
        Ok(Self::with_state(grid, Some(wal)))
    }

    fn with_state(grid: Grid, wal: Option<Wal>) -> Self {
        Self {
            grid: RwLock::new(grid),
            writer: Mutex::new(wal),
        }
    }

    pub async fn len(&self) -> usize {
        self.grid.read().len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn appends_since_compact(&self) -> u64 {
        match self.writer.lock().await.as_ref() {
            Some(wal) => wal.appends_since_compact(),
            None => 0,
        }
    }

    /// Rewrite the WAL with one `SessionCreated` per live session.
    /// Writers wait for the rewrite; readers do not.
    pub async fn compact(&self) -> Result<(), RepositoryError> {
        let mut writer = self.writer.lock().await;
        let Some(wal) = writer.as_mut() else { return Ok(()) };
        let events: Vec<Event> = self
            .grid
            .read()
            .days
            .values()
            .flat_map(|d| d.sessions.iter())
            .map(|s| Event::SessionCreated { session: s.clone() })
            .collect();
        Wal::write_compact_file(wal.path(), &events)?;
        wal.swap_compact_file()?;
        Ok(())
    }
}

/// Append to the WAL if there is one. Caller holds the writer lock.
fn persist(wal: Option<&mut Wal>, event: &Event) -> Result<(), RepositoryError> {
    let Some(wal) = wal else { return Ok(()) };
    let started = std::time::Instant::now();
    wal.append(event)?;
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    Ok(())
}

#[async_trait]
impl SessionRepository for MemoryRepository {
    async fn get(&self, id: SessionId) -> Result<Option<Session>, RepositoryError> {
        Ok(self.grid.read().get(&id).cloned())
    }

    async fn query(&self, filter: &SessionFilter) -> Result<Vec<Session>, RepositoryError> {
        Ok(self.grid.read().select(filter))
    }

    async fn insert(&self, session: Session) -> Result<SessionId, RepositoryError> {
        let mut wal = self.writer.lock().await;
        if self.grid.read().index.contains_key(&session.id) {
            return Err(RepositoryError::AlreadyExists(session.id));
        }
        let id = session.id;
        let event = Event::SessionCreated { session };
        persist(wal.as_mut(), &event)?;
        self.grid.write().apply(event);
        Ok(id)
    }

    async fn update(&self, session: Session) -> Result<Session, RepositoryError> {
        let mut wal = self.writer.lock().await;
        let previous = self
            .grid
            .read()
            .get(&session.id)
            .cloned()
            .ok_or(RepositoryError::NotFound(session.id))?;
        let event = Event::SessionUpdated { session };
        persist(wal.as_mut(), &event)?;
        self.grid.write().apply(event);
        Ok(previous)
    }

    async fn delete(&self, id: SessionId) -> Result<Session, RepositoryError> {
        let mut wal = self.writer.lock().await;
        if !self.grid.read().index.contains_key(&id) {
            return Err(RepositoryError::NotFound(id));
        }
        persist(wal.as_mut(), &Event::SessionDeleted { id })?;
        self.grid.write().remove(id).ok_or(RepositoryError::NotFound(id))
    }

    async fn delete_matching(&self, filter: &SessionFilter) -> Result<Vec<Session>, RepositoryError> {
        let mut wal = self.writer.lock().await;
        let doomed = self.grid.read().select(filter);
        if doomed.is_empty() {
            return Ok(doomed);
        }
        let ids = doomed.iter().map(|s| s.id).collect();
        let event = Event::SessionsReleased { ids };
        persist(wal.as_mut(), &event)?;
        self.grid.write().apply(event);
        Ok(doomed)
    }
}
