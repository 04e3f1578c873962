use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{ChangeKind, ScheduleChange};
use crate::observability::{self, CONFLICTS_TOTAL};
use crate::policy::{authorize, Action, Actor, Role};
use crate::store::SessionFilter;

use super::conflict::{find_conflicts, normalize_room, validate_session};
use super::{LockKey, Missing, Scheduler, SchedulingError};

impl Scheduler {
    /// Place a new session on the grid. The returned session carries its new id.
    pub async fn create(&self, actor: &Actor, request: NewSession) -> Result<Session, SchedulingError> {
        let started = Instant::now();
        let result = self.create_session(actor, request).await;
        observability::record_mutation("create", &result, started);
        result
    }

    /// Change an existing session. Conflicts are checked against every other session.
    pub async fn update(
        &self,
        actor: &Actor,
        id: SessionId,
        changes: SessionChanges,
    ) -> Result<Session, SchedulingError> {
        let started = Instant::now();
        let result = self.update_session(actor, id, changes).await;
        observability::record_mutation("update", &result, started);
        result
    }

    pub async fn delete(&self, actor: &Actor, id: SessionId) -> Result<(), SchedulingError> {
        let started = Instant::now();
        let result = self.delete_session(actor, id).await;
        observability::record_mutation("delete", &result, started);
        result
    }

    async fn create_session(&self, actor: &Actor, request: NewSession) -> Result<Session, SchedulingError> {
        // Roles that can never create are refused before the course lookup.
        if !matches!(actor.role, Role::Admin | Role::Teacher) {
            return Err(SchedulingError::PermissionDenied { action: Action::Create });
        }
        let course = self.resolve_course(request.course_id)?;
        let candidate = Session {
            id: Ulid::new(),
            course,
            weekday: request.weekday,
            start: request.start,
            end: request.end,
            format: request.format,
            room: normalize_room(&request.room),
        };
        if !authorize(actor, Action::Create, &candidate) {
            return Err(SchedulingError::PermissionDenied { action: Action::Create });
        }
        validate_session(&candidate)?;

        let locks = self.lock(LockKey::claims(&candidate)).await?;
        self.check_conflicts(&candidate, None).await?;
        self.repo.insert(candidate.clone()).await?;
        drop(locks);

        info!("created session {}: {candidate}", candidate.id);
        self.announce(ScheduleChange::new(ChangeKind::Created, &candidate, None));
        Ok(candidate)
    }

    async fn update_session(
        &self,
        actor: &Actor,
        id: SessionId,
        changes: SessionChanges,
    ) -> Result<Session, SchedulingError> {
        let mut current = self.load(id).await?;
        let mut attempt = 1;
        loop {
            if !authorize(actor, Action::Update, &current) {
                return Err(SchedulingError::PermissionDenied { action: Action::Update });
            }
            if changes.is_empty() {
                return Ok(current);
            }
            let candidate = self.apply_changes(&current, &changes)?;
            validate_session(&candidate)?;

            let mut keys = LockKey::claims(&candidate).to_vec();
            keys.push(LockKey::Session(id));
            let locks = self.lock(keys).await?;

            // Another writer may have moved the session between the read and the lock.
            let latest = self.load(id).await?;
            if latest != current {
                drop(locks);
                if attempt >= MAX_UPDATE_ATTEMPTS {
                    debug!("update of {id} gave up after {attempt} attempts");
                    return Err(SchedulingError::Busy);
                }
                attempt += 1;
                current = latest;
                continue;
            }

            self.check_conflicts(&candidate, Some(id)).await?;
            let previous = self.repo.update(candidate.clone()).await?;
            drop(locks);

            info!("updated session {id}: {previous} -> {candidate}");
            self.announce(ScheduleChange::new(ChangeKind::Updated, &candidate, Some(&previous)));
            return Ok(candidate);
        }
    }

    async fn delete_session(&self, actor: &Actor, id: SessionId) -> Result<(), SchedulingError> {
        let locks = self.lock([LockKey::Session(id)]).await?;
        let current = self.load(id).await?;
        if !authorize(actor, Action::Delete, &current) {
            return Err(SchedulingError::PermissionDenied { action: Action::Delete });
        }
        let removed = self.repo.delete(id).await?;
        drop(locks);

        info!("deleted session {id}: {removed}");
        self.announce(ScheduleChange::new(ChangeKind::Deleted, &removed, None));
        Ok(())
    }

    async fn load(&self, id: SessionId) -> Result<Session, SchedulingError> {
        self.repo
            .get(id)
            .await?
            .ok_or(SchedulingError::NotFound(Missing::Session(id)))
    }

    /// Merge `changes` over `current`. A course change re-resolves teacher and class group.
    fn apply_changes(&self, current: &Session, changes: &SessionChanges) -> Result<Session, SchedulingError> {
        let course = match changes.course_id {
            Some(course_id) if course_id != current.course.course_id => self.resolve_course(course_id)?,
            _ => current.course,
        };
        Ok(Session {
            id: current.id,
            course,
            weekday: changes.weekday.unwrap_or(current.weekday),
            start: changes.start.unwrap_or(current.start),
            end: changes.end.unwrap_or(current.end),
            format: changes.format.unwrap_or(current.format),
            room: match &changes.room {
                Some(room) => normalize_room(room),
                None => current.room.clone(),
            },
        })
    }

    /// Caller must hold the candidate's resource locks.
    async fn check_conflicts(&self, candidate: &Session, exclude: Option<SessionId>) -> Result<(), SchedulingError> {
        let filter = SessionFilter::on(candidate.weekday).overlapping(candidate.range());
        let nearby = self.repo.query(&filter).await?;
        let conflicts = find_conflicts(candidate, &nearby, exclude);
        if conflicts.is_empty() {
            return Ok(());
        }
        for c in &conflicts {
            metrics::counter!(CONFLICTS_TOTAL, "reason" => c.reason.as_str()).increment(1);
        }
        debug!(
            "rejected {candidate}: {} conflicts, first with {}",
            conflicts.len(),
            conflicts[0].session.id
        );
        Err(SchedulingError::Conflict(conflicts))
    }
}
