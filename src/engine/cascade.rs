use std::fmt;
use std::time::Instant;

use tracing::info;

use crate::model::*;
use crate::notify::{ChangeKind, ScheduleChange};
use crate::observability;
use crate::policy::{authorize_release, Action, Actor};
use crate::store::SessionFilter;

use super::{Scheduler, SchedulingError};

/// An entity that owns sessions. Deleting it elsewhere must be mirrored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    Course(CourseId),
    Teacher(TeacherId),
    ClassGroup(ClassGroupId),
}

impl Owner {
    fn filter(&self) -> SessionFilter {
        match *self {
            Owner::Course(id) => SessionFilter::all().course(id),
            Owner::Teacher(id) => SessionFilter::all().teacher(id),
            Owner::ClassGroup(id) => SessionFilter::all().class_group(id),
        }
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Owner::Course(id) => write!(f, "course {id}"),
            Owner::Teacher(id) => write!(f, "teacher {id}"),
            Owner::ClassGroup(id) => write!(f, "class group {id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadePolicy {
    /// Delete dependent sessions together with the owner.
    Cascade,
    /// Refuse while dependent sessions exist.
    Restrict,
}

/// Policy per owning relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeRules {
    pub course: CascadePolicy,
    pub teacher: CascadePolicy,
    pub class_group: CascadePolicy,
}

impl Default for CascadeRules {
    fn default() -> Self {
        Self {
            course: CascadePolicy::Cascade,
            teacher: CascadePolicy::Cascade,
            class_group: CascadePolicy::Cascade,
        }
    }
}

impl CascadeRules {
    pub fn policy_for(&self, owner: &Owner) -> CascadePolicy {
        match owner {
            Owner::Course(_) => self.course,
            Owner::Teacher(_) => self.teacher,
            Owner::ClassGroup(_) => self.class_group,
        }
    }
}

impl Scheduler {
    /// Apply the cascade policy for an owner that is being deleted upstream.
    /// Returns the sessions removed (empty under `Restrict` with no dependents).
    pub async fn release_owner(&self, actor: &Actor, owner: Owner) -> Result<Vec<Session>, SchedulingError> {
        let started = Instant::now();
        let result = self.release_sessions(actor, owner).await;
        observability::record_mutation("release", &result, started);
        result
    }

    async fn release_sessions(&self, actor: &Actor, owner: Owner) -> Result<Vec<Session>, SchedulingError> {
        if !authorize_release(actor) {
            return Err(SchedulingError::PermissionDenied { action: Action::Release });
        }
        let filter = owner.filter();
        match self.cascade.policy_for(&owner) {
            CascadePolicy::Restrict => {
                let dependents = self.repo.query(&filter).await?.len();
                if dependents > 0 {
                    return Err(SchedulingError::Restricted { owner, dependents });
                }
                Ok(Vec::new())
            }
            CascadePolicy::Cascade => {
                let removed = self.repo.delete_matching(&filter).await?;
                if !removed.is_empty() {
                    info!("released {} sessions of {owner}", removed.len());
                }
                for session in &removed {
                    self.announce(ScheduleChange::new(ChangeKind::Deleted, session, None));
                }
                Ok(removed)
            }
        }
    }
}
