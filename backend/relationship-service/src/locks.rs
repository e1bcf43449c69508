//! Per-key advisory locks.
//!
//! Optimistic versions catch lost updates on a single aggregate; these locks
//! serialize multi-aggregate operations on the same follow pair or user so
//! they never interleave partial state.
//!
//! Ordering: user keys first, in ascending id order, then at most one pair
//! key. Account deletion holds one user key and takes pair keys under it;
//! edge writers take both endpoints' user keys before the pair key.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    User(Uuid),
    /// Unordered pair, stored as (min, max)
    Pair(Uuid, Uuid),
}

impl LockKey {
    pub fn user(id: Uuid) -> Self {
        LockKey::User(id)
    }

    pub fn pair(a: Uuid, b: Uuid) -> Self {
        if a <= b {
            LockKey::Pair(a, b)
        } else {
            LockKey::Pair(b, a)
        }
    }
}

type LockTable = DashMap<LockKey, Arc<Mutex<()>>>;

#[derive(Clone, Default)]
pub struct KeyedLocks {
    table: Arc<LockTable>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`.
    pub async fn acquire(&self, key: LockKey) -> KeyedGuard {
        let mutex = self
            .table
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;

        KeyedGuard {
            guard: Some(guard),
            key,
            table: self.table.clone(),
        }
    }

    /// Exclusive access to both users, taken in ascending id order.
    ///
    /// Equal ids yield a single guard.
    pub async fn acquire_users(&self, a: Uuid, b: Uuid) -> Vec<KeyedGuard> {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut guards = vec![self.acquire(LockKey::user(first)).await];
        if second != first {
            guards.push(self.acquire(LockKey::user(second)).await);
        }
        guards
    }

    /// Number of keys currently held or awaited
    pub fn active_keys(&self) -> usize {
        self.table.len()
    }
}

pub struct KeyedGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: LockKey,
    table: Arc<LockTable>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table's own handle left: nobody holds or waits on this key.
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_pair_key_is_unordered() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_eq!(LockKey::pair(a, b), LockKey::pair(b, a));
        assert_ne!(LockKey::pair(a, b), LockKey::user(a));
    }

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = KeyedLocks::new();
        let key = LockKey::user(Uuid::new_v4());

        let guard = locks.acquire(key).await;
        let contender = tokio::time::timeout(Duration::from_millis(20), locks.acquire(key)).await;
        assert!(contender.is_err());

        drop(guard);
        let reacquired = tokio::time::timeout(Duration::from_millis(20), locks.acquire(key)).await;
        assert!(reacquired.is_ok());
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire(LockKey::user(Uuid::new_v4())).await;
        let b = tokio::time::timeout(
            Duration::from_millis(20),
            locks.acquire(LockKey::user(Uuid::new_v4())),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_user_pair_blocks_either_user() {
        let locks = KeyedLocks::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        let guards = locks.acquire_users(b, a).await;
        assert_eq!(guards.len(), 2);
        for id in [a, b] {
            let contender =
                tokio::time::timeout(Duration::from_millis(20), locks.acquire(LockKey::user(id))).await;
            assert!(contender.is_err());
        }

        drop(guards);
        assert_eq!(locks.acquire_users(a, a).await.len(), 1);
    }

    #[tokio::test]
    async fn test_released_keys_are_evicted() {
        let locks = KeyedLocks::new();
        let guard = locks.acquire(LockKey::user(Uuid::new_v4())).await;
        assert_eq!(locks.active_keys(), 1);

        drop(guard);
        assert_eq!(locks.active_keys(), 0);
    }
}
