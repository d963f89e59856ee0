//! Striped per-entity locks
//!
//! Serializes writers touching the same item (or clipboard) without a global
//! lock. Keys hash onto a fixed set of stripes, so unrelated entities only
//! contend on a stripe collision.
//!
//! Lock order: clipboard stripe, then item stripes, then a database connection.
//! Multi-key acquisition takes stripes in ascending index order.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const DEFAULT_STRIPES: usize = 64;

pub struct StripedLocks {
    stripes: Box<[RwLock<()>]>,
}

impl Default for StripedLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}

impl StripedLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| RwLock::new(())).collect(),
        }
    }

    fn stripe(&self, key: i64) -> usize {
        (key as u64 % self.stripes.len() as u64) as usize
    }

    /// Shared hold: many readers of a key may proceed together
    pub fn read(&self, key: i64) -> RwLockReadGuard<'_, ()> {
        self.stripes[self.stripe(key)].read()
    }

    /// Exclusive hold on one key
    pub fn write(&self, key: i64) -> RwLockWriteGuard<'_, ()> {
        self.stripes[self.stripe(key)].write()
    }

    /// Exclusive hold on several keys, deadlock-free against other callers
    pub fn write_many<I>(&self, keys: I) -> Vec<RwLockWriteGuard<'_, ()>>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut indices: Vec<usize> = keys.into_iter().map(|k| self.stripe(k)).collect();
        indices.sort_unstable();
        indices.dedup();
        indices.into_iter().map(|i| self.stripes[i].write()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_colliding_keys_share_a_stripe() {
        let locks = StripedLocks::new(4);
        let guards = locks.write_many([1, 5, 9]);
        assert_eq!(guards.len(), 1, "1, 5 and 9 all map to stripe 1");
    }

    #[test]
    fn test_write_many_handles_duplicates_and_order() {
        let locks = StripedLocks::new(8);
        let guards = locks.write_many([7, 3, 3, 1]);
        assert_eq!(guards.len(), 3);
    }

    #[test]
    fn test_write_excludes_concurrent_writers() {
        let locks = Arc::new(StripedLocks::default());
        let inside = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let _guard = locks.write(42);
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_distinct_stripes_do_not_block() {
        let locks = StripedLocks::new(4);
        let _a = locks.write(0);
        let _b = locks.write(1);
        let _c = locks.read(2);
        assert!(locks.stripes[3].try_write().is_some());
        assert!(locks.stripes[2].try_write().is_none());
        assert!(locks.stripes[2].try_read().is_some());
    }
}
