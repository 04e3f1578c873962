use std::fmt;

use crate::model::{CourseId, SessionId};
use crate::policy::Action;
use crate::store::RepositoryError;

use super::cascade::Owner;
use super::conflict::Conflict;

/// What a `NotFound` refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Missing {
    Session(SessionId),
    Course(CourseId),
}

#[derive(Debug)]
pub enum SchedulingError {
    /// Malformed input. Caller-fixable, never retried.
    Validation { field: &'static str, reason: String },
    PermissionDenied { action: Action },
    NotFound(Missing),
    /// Every (session, reason) pair the proposal collides with.
    Conflict(Vec<Conflict>),
    /// Lock wait timed out or the session kept moving. Safe to retry.
    Busy,
    /// A `Restrict` cascade policy refused to release an owner that still has sessions.
    Restricted { owner: Owner, dependents: usize },
    /// Infrastructure failure, passed through untouched.
    Storage(RepositoryError),
}

impl SchedulingError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulingError::Busy)
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        SchedulingError::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for SchedulingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulingError::Validation { field, reason } => write!(f, "invalid {field}: {reason}"),
            SchedulingError::PermissionDenied { action } => write!(f, "not allowed to {action} this session"),
            SchedulingError::NotFound(Missing::Session(id)) => write!(f, "session not found: {id}"),
            SchedulingError::NotFound(Missing::Course(id)) => write!(f, "course not found: {id}"),
            SchedulingError::Conflict(conflicts) => {
                write!(f, "schedule conflict")?;
                for (i, c) in conflicts.iter().enumerate() {
                    let sep = if i == 0 { ": " } else { "; " };
                    write!(f, "{sep}{} with {} [{}]", c.reason, c.session, c.session.id)?;
                }
                Ok(())
            }
            SchedulingError::Busy => write!(f, "schedule busy, retry"),
            SchedulingError::Restricted { owner, dependents } => {
                write!(f, "cannot release {owner}: {dependents} sessions depend on it")
            }
            SchedulingError::Storage(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for SchedulingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulingError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RepositoryError> for SchedulingError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(id) => SchedulingError::NotFound(Missing::Session(id)),
            other => SchedulingError::Storage(other),
        }
    }
}
