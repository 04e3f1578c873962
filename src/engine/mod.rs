mod cascade;
mod conflict;
mod error;
mod locks;
mod mutations;

pub use cascade::{CascadePolicy, CascadeRules, Owner};
pub use conflict::{audit, find_conflicts, shared_resources, Conflict, ConflictReason, Violation};
pub use error::{Missing, SchedulingError};
pub use locks::{LockKey, LockSet, LockTable, LockTimeout};

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::limits::*;
use crate::model::*;
use crate::notify::{ChangeNotifier, ScheduleChange};
use crate::registry::CourseRegistry;
use crate::store::SessionRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Upper bound on waiting for resource locks before failing with `Busy`.
    pub lock_timeout: Duration,
    pub cascade: CascadeRules,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            cascade: CascadeRules::default(),
        }
    }
}

/// The scheduling service. Holds no session state: every call re-reads the repository.
pub struct Scheduler {
    pub(super) repo: Arc<dyn SessionRepository>,
    pub(super) courses: Arc<dyn CourseRegistry>,
    pub(super) notifier: Option<Arc<dyn ChangeNotifier>>,
    pub(super) locks: LockTable,
    pub(super) cascade: CascadeRules,
}

impl Scheduler {
    pub fn new(repo: Arc<dyn SessionRepository>, courses: Arc<dyn CourseRegistry>) -> Self {
        Self::with_config(repo, courses, SchedulerConfig::default())
    }

    pub fn with_config(
        repo: Arc<dyn SessionRepository>,
        courses: Arc<dyn CourseRegistry>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            repo,
            courses,
            notifier: None,
            locks: LockTable::new(config.lock_timeout),
            cascade: config.cascade,
        }
    }

    /// Attach a change notifier, informed after every successful commit.
    pub fn with_notifier(mut self, notifier: Arc<dyn ChangeNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn repository(&self) -> &Arc<dyn SessionRepository> {
        &self.repo
    }

    pub(super) fn resolve_course(&self, id: CourseId) -> Result<CourseRef, SchedulingError> {
        self.courses
            .course(id)
            .map(|c| c.reference())
            .ok_or(SchedulingError::NotFound(Missing::Course(id)))
    }

    /// Take the locks for one mutation, mapping a timeout to `Busy`.
    pub(super) async fn lock(&self, keys: impl IntoIterator<Item = LockKey>) -> Result<LockSet, SchedulingError> {
        if self.locks.len() > LOCK_TABLE_PRUNE_THRESHOLD {
            self.locks.prune();
        }
        self.locks.acquire(keys).await.map_err(|LockTimeout(key)| {
            warn!("lock wait timed out on {key:?}");
            metrics::counter!(crate::observability::LOCK_TIMEOUTS_TOTAL).increment(1);
            SchedulingError::Busy
        })
    }

    /// Fire-and-forget delivery. Never awaited by the caller, failures are only logged.
    pub(super) fn announce(&self, change: ScheduleChange) {
        let Some(notifier) = self.notifier.clone() else { return };
        tokio::spawn(async move {
            let session_id = change.session_id;
            if let Err(e) = notifier.notify(change).await {
                warn!("change notification for session {session_id} dropped: {e}");
                metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL).increment(1);
            }
        });
    }
}
