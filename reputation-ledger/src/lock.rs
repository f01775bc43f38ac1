//! Row-level lock manager
//!
//! Every mutating ledger operation holds the locks of the rows it reads and
//! writes for the whole read-compute-commit sequence, so two requests can never
//! derive deltas from the same stale read. Requests touching unrelated rows run
//! in parallel.
//!
//! # Ordering
//!
//! Keys are totally ordered (`Question < Answer < User`, then by ID). A
//! [`LockSet`] always acquires in ascending order and may only be extended with
//! keys greater than the ones it already holds. With every caller obeying the
//! same order no wait cycle can form.
//!
//! # Timeout
//!
//! A [`LockSet`] gets one deadline when it is created. Every key it waits on,
//! including keys added later through [`LockSet::extend`], must be acquired
//! before that deadline.

use crate::types::{AnswerId, QuestionId, UserId};
use crate::{Error, Result};
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{Duration, Instant};

/// Lockable row
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockKey {
    /// Question row (also guards its answer list and closed flag)
    Question(QuestionId),
    /// Answer row (vote aggregate)
    Answer(AnswerId),
    /// User row (points and credits)
    User(UserId),
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockKey::Question(id) => write!(f, "question {}", id),
            LockKey::Answer(id) => write!(f, "answer {}", id),
            LockKey::User(id) => write!(f, "user {}", id),
        }
    }
}

type Slot = Arc<Mutex<()>>;

/// Table of per-row mutexes, shared by clones
#[derive(Clone)]
pub struct LockManager {
    slots: Arc<DashMap<LockKey, Slot>>,
    timeout: Duration,
}

impl LockManager {
    /// Create a lock manager with a per-operation acquisition timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            timeout,
        }
    }

    /// Acquire all `keys` in ascending order
    pub async fn acquire(&self, keys: impl IntoIterator<Item = LockKey>) -> Result<LockSet> {
        let mut set = LockSet {
            manager: self.clone(),
            deadline: Instant::now() + self.timeout,
            held: Vec::new(),
        };
        set.extend(keys).await?;
        Ok(set)
    }

    /// Number of rows with a live slot (held or awaited)
    pub fn active_slots(&self) -> usize {
        self.slots.len()
    }

    fn slot(&self, key: LockKey) -> Slot {
        self.slots
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drop the slot once nobody holds or waits on it
    fn reclaim(&self, key: &LockKey) {
        self.slots.remove_if(key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl fmt::Debug for LockManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockManager")
            .field("active_slots", &self.slots.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Locks held by one operation; released on drop
pub struct LockSet {
    manager: LockManager,
    deadline: Instant,
    held: Vec<(LockKey, OwnedMutexGuard<()>)>,
}

impl LockSet {
    /// Acquire additional keys, all greater than the keys already held
    ///
    /// Waiting is bounded by the deadline set when the lock set was created.
    pub async fn extend(&mut self, keys: impl IntoIterator<Item = LockKey>) -> Result<()> {
        let mut keys: Vec<LockKey> = keys.into_iter().filter(|key| !self.holds(key)).collect();
        keys.sort();
        keys.dedup();

        if let (Some(first), Some((last, _))) = (keys.first(), self.held.last()) {
            debug_assert!(first > last, "lock order violated: {} after {}", first, last);
        }

        for key in keys {
            let slot = self.manager.slot(key);
            let acquired = tokio::time::timeout_at(self.deadline, slot.lock_owned()).await;
            match acquired {
                Ok(guard) => self.held.push((key, guard)),
                Err(_) => {
                    self.manager.reclaim(&key);
                    tracing::warn!(%key, timeout = ?self.manager.timeout, "Lock acquisition timed out");
                    return Err(Error::LockTimeout(format!(
                        "{} not acquired within {:?}",
                        key, self.manager.timeout
                    )));
                }
            }
        }

        Ok(())
    }

    /// True if `key` is held by this set
    pub fn holds(&self, key: &LockKey) -> bool {
        self.held.iter().any(|(held, _)| held == key)
    }

    /// Number of keys held
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// True if nothing is held
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        while let Some((key, guard)) = self.held.pop() {
            drop(guard);
            self.manager.reclaim(&key);
        }
    }
}

impl fmt::Debug for LockSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.held.iter().map(|(key, _)| key))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> LockManager {
        LockManager::new(Duration::from_millis(50))
    }

    #[test]
    fn test_key_order() {
        let q = LockKey::Question(QuestionId::new());
        let a = LockKey::Answer(AnswerId::new());
        let u = LockKey::User(UserId::new());
        let mut keys = vec![u, a, q];
        keys.sort();
        assert_eq!(keys, vec![q, a, u]);
    }

    #[tokio::test]
    async fn test_acquire_and_reclaim() {
        let locks = manager();
        let q = LockKey::Question(QuestionId::new());
        let u = LockKey::User(UserId::new());

        let set = locks.acquire([u, q, u]).await.unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(locks.active_slots(), 2);

        drop(set);
        assert_eq!(locks.active_slots(), 0);
    }

    #[tokio::test]
    async fn test_held_key_times_out() {
        let locks = manager();
        let key = LockKey::Answer(AnswerId::new());

        let _held = locks.acquire([key]).await.unwrap();
        let err = locks.acquire([key]).await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
        assert_eq!(locks.active_slots(), 1);
    }

    #[tokio::test]
    async fn test_disjoint_keys_do_not_block() {
        let locks = manager();
        let first = LockKey::User(UserId::new());
        let second = LockKey::User(UserId::new());

        let _a = locks.acquire([first]).await.unwrap();
        let b = locks.acquire([second]).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let locks = LockManager::new(Duration::from_secs(5));
        let key = LockKey::Question(QuestionId::new());

        let held = locks.acquire([key]).await.unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire([key]).await.map(|set| set.len()) })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        assert_eq!(locks.active_slots(), 0);
    }

    #[tokio::test]
    async fn test_deadline_covers_every_key() {
        let locks = manager();
        let q = LockKey::Question(QuestionId::new());
        let a = LockKey::Answer(AnswerId::new());
        let u = LockKey::User(UserId::new());

        // Each holder releases before the per-operation timeout on its own,
        // but together they outlast it
        for (key, release_ms) in [(q, 40), (a, 80), (u, 120)] {
            let held = locks.acquire([key]).await.unwrap();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(release_ms)).await;
                drop(held);
            });
        }

        let started = Instant::now();
        let err = locks.acquire([q, a, u]).await.unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(err, Error::LockTimeout(_)));
        assert!(waited >= Duration::from_millis(50));
        assert!(waited < Duration::from_millis(100), "waited {:?}", waited);
    }

    #[tokio::test]
    async fn test_extend_shares_the_acquire_deadline() {
        let locks = manager();
        let q = LockKey::Question(QuestionId::new());
        let u = LockKey::User(UserId::new());

        let held = locks.acquire([u]).await.unwrap();
        let mut set = locks.acquire([q]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let started = Instant::now();
        let err = set.extend([u]).await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout(_)));
        assert!(started.elapsed() < Duration::from_millis(40));
        drop(held);
    }

    #[tokio::test]
    async fn test_extend_skips_held_keys() {
        let locks = manager();
        let q = LockKey::Question(QuestionId::new());
        let u = LockKey::User(UserId::new());

        let mut set = locks.acquire([q]).await.unwrap();
        set.extend([q, u]).await.unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.holds(&u));
    }
}
