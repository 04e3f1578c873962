use std::cmp::Ordering;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::model::*;
use crate::policy::{Actor, Role};
use crate::store::{RepositoryError, SessionFilter, SessionRepository};

/// What a calendar reader wants to see. Every `Some` field narrows the view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarFilter {
    pub weekday: Option<Weekday>,
    pub room: Option<String>,
    pub teacher_id: Option<TeacherId>,
    pub class_group_id: Option<ClassGroupId>,
}

impl From<&CalendarFilter> for SessionFilter {
    fn from(f: &CalendarFilter) -> Self {
        SessionFilter {
            weekday: f.weekday,
            room: f.room.as_deref().map(|r| r.trim().to_string()),
            teacher_id: f.teacher_id,
            class_group_id: f.class_group_id,
            ..SessionFilter::default()
        }
    }
}

/// Display order of the weekly grid: weekday, start, room, then id.
pub fn grid_order(a: &Session, b: &Session) -> Ordering {
    a.weekday
        .cmp(&b.weekday)
        .then_with(|| a.start.cmp(&b.start))
        .then_with(|| a.room.cmp(&b.room))
        .then_with(|| a.id.cmp(&b.id))
}

/// Read-only weekly grid. Takes no scheduler locks and sees committed state only.
pub struct Calendar {
    repo: Arc<dyn SessionRepository>,
}

impl Calendar {
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self { repo }
    }

    /// Fresh snapshot of the sessions matching `filter`.
    pub async fn view(&self, filter: &CalendarFilter) -> Result<CalendarView, RepositoryError> {
        let sessions = self.repo.query(&SessionFilter::from(filter)).await?;
        Ok(CalendarView::from_sessions(sessions))
    }

    /// The timetable an actor would normally look at.
    pub async fn for_actor(&self, actor: &Actor) -> Result<CalendarView, RepositoryError> {
        let filter = match actor.role {
            Role::Admin => CalendarFilter::default(),
            Role::Teacher => CalendarFilter {
                teacher_id: Some(actor.id),
                ..CalendarFilter::default()
            },
            Role::Student { class_group_id } => CalendarFilter {
                class_group_id: Some(class_group_id),
                ..CalendarFilter::default()
            },
            Role::Other => return Ok(CalendarView::default()),
        };
        self.view(&filter).await
    }
}

/// One weekday column of a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayColumn<'a> {
    pub weekday: Weekday,
    pub sessions: &'a [Session],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CalendarView {
    sessions: Vec<Session>,
}

impl CalendarView {
    /// Build a view from any session set, sorting it into grid order.
    pub fn from_sessions(mut sessions: Vec<Session>) -> Self {
        sessions.sort_by(grid_order);
        Self { sessions }
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.iter()
    }

    /// Non-empty weekday columns, Monday first.
    pub fn days(&self) -> impl Iterator<Item = DayColumn<'_>> {
        self.sessions
            .chunk_by(|a, b| a.weekday == b.weekday)
            .map(|chunk| DayColumn {
                weekday: chunk[0].weekday,
                sessions: chunk,
            })
    }

    pub fn day(&self, weekday: Weekday) -> &[Session] {
        let from = self.sessions.partition_point(|s| s.weekday < weekday);
        let to = self.sessions.partition_point(|s| s.weekday <= weekday);
        &self.sessions[from..to]
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn as_slice(&self) -> &[Session] {
        &self.sessions
    }

    pub fn into_sessions(self) -> Vec<Session> {
        self.sessions
    }
}

impl<'a> IntoIterator for &'a CalendarView {
    type Item = &'a Session;
    type IntoIter = std::slice::Iter<'a, Session>;

    fn into_iter(self) -> Self::IntoIter {
        self.sessions.iter()
    }
}
