use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::model::*;

/// A resource a mutation must own exclusively while it checks and commits.
///
/// The derived `Ord` (variant order, then value) is the global acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    Session(SessionId),
    Room(Weekday, String),
    Teacher(Weekday, TeacherId),
    ClassGroup(Weekday, ClassGroupId),
}

impl LockKey {
    /// The three resource claims a placed session makes on its weekday.
    pub fn claims(session: &Session) -> [LockKey; 3] {
        [
            LockKey::Room(session.weekday, session.room.clone()),
            LockKey::Teacher(session.weekday, session.teacher_id()),
            LockKey::ClassGroup(session.weekday, session.class_group_id()),
        ]
    }
}

/// Timed out waiting for a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTimeout(pub LockKey);

/// Held locks. Dropping it releases every key.
pub struct LockSet {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl LockSet {
    pub fn covers(&self, key: &LockKey) -> bool {
        self.keys.binary_search(key).is_ok()
    }

    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }
}

/// In-process lock table keyed by resource.
pub struct LockTable {
    locks: DashMap<LockKey, Arc<Mutex<()>>>,
    timeout: Duration,
}

impl LockTable {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout,
        }
    }

    /// Acquire every key, sorted and deduplicated so two callers can never
    /// wait on each other in opposite orders. The whole acquisition shares one
    /// deadline; on timeout all keys taken so far are released.
    pub async fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> Result<LockSet, LockTimeout> {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let deadline = Instant::now() + self.timeout;
        let mut guards = Vec::with_capacity(keys.len());
        for key in &keys {
            let mutex = self.locks.entry(key.clone()).or_default().value().clone();
            match tokio::time::timeout_at(deadline, mutex.lock_owned()).await {
                Ok(guard) => guards.push(guard),
                Err(_) => return Err(LockTimeout(key.clone())),
            }
        }
        Ok(LockSet {
            keys,
            _guards: guards,
        })
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// Drop entries nobody holds or waits on. Cloning happens under the shard
    /// lock, so an entry with a strong count of one is unreachable.
    pub fn prune(&self) {
        self.locks.retain(|_, mutex| Arc::strong_count(mutex) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn room(name: &str) -> LockKey {
        LockKey::Room(Weekday::Monday, name.into())
    }

    #[test]
    fn key_order_is_variant_then_value() {
        let s = LockKey::Session(Ulid::new());
        let r = room("A");
        let t = LockKey::Teacher(Weekday::Monday, Ulid::new());
        let c = LockKey::ClassGroup(Weekday::Monday, Ulid::new());
        let mut keys = vec![c.clone(), t.clone(), r.clone(), s.clone()];
        keys.sort();
        assert_eq!(keys, vec![s, r, t, c]);
        assert!(room("A") < room("B"));
        assert!(LockKey::Room(Weekday::Monday, "Z".into()) < LockKey::Room(Weekday::Tuesday, "A".into()));
    }

    #[tokio::test]
    async fn acquire_dedups_and_covers() {
        let table = LockTable::new(Duration::from_millis(50));
        let set = table.acquire([room("B"), room("A"), room("B")]).await.unwrap();
        assert_eq!(set.keys(), &[room("A"), room("B")]);
        assert!(set.covers(&room("A")));
        assert!(!set.covers(&room("C")));
    }

    #[tokio::test]
    async fn held_key_times_out() {
        let table = LockTable::new(Duration::from_millis(50));
        let held = table.acquire([room("B")]).await.unwrap();
        let err = table.acquire([room("B"), room("A")]).await.err().unwrap();
        assert_eq!(err, LockTimeout(room("B")));

        // A was taken first and released again on timeout.
        let a = table.acquire([room("A")]).await;
        assert!(a.is_ok());
        drop(held);
        assert!(table.acquire([room("B")]).await.is_ok());
    }

    #[tokio::test]
    async fn waiter_proceeds_after_release() {
        let table = Arc::new(LockTable::new(Duration::from_secs(5)));
        let held = table.acquire([room("A")]).await.unwrap();

        let t2 = table.clone();
        let waiter = tokio::spawn(async move { t2.acquire([room("A")]).await.is_ok() });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn prune_keeps_held_entries() {
        let table = LockTable::new(Duration::from_millis(50));
        let held = table.acquire([room("A")]).await.unwrap();
        drop(table.acquire([room("B")]).await.unwrap());
        assert_eq!(table.len(), 2);

        table.prune();
        assert_eq!(table.len(), 1);
        drop(held);
        table.prune();
        assert!(table.is_empty());
    }

    #[test]
    fn claims_cover_three_axes() {
        let session = Session {
            id: Ulid::new(),
            course: CourseRef {
                course_id: Ulid::new(),
                teacher_id: Ulid::new(),
                class_group_id: Ulid::new(),
            },
            weekday: Weekday::Thursday,
            start: TimeOfDay::new(8, 0).unwrap(),
            end: TimeOfDay::new(9, 0).unwrap(),
            format: SessionFormat::Lab,
            room: "Lab 2".into(),
        };
        let [r, t, c] = LockKey::claims(&session);
        assert_eq!(r, LockKey::Room(Weekday::Thursday, "Lab 2".into()));
        assert_eq!(t, LockKey::Teacher(Weekday::Thursday, session.teacher_id()));
        assert_eq!(c, LockKey::ClassGroup(Weekday::Thursday, session.class_group_id()));
    }
}
