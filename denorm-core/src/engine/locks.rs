//! Per-instance write locks.
//!
//! Independent batches may run on different threads. Computed-field
//! writes to the same instance are serialized through one mutex per
//! instance; writes to different instances never contend.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::model::EntityRef;

#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<EntityRef, Arc<Mutex<()>>>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock of `entity`. Only one instance lock
    /// is held at a time, so callers cannot deadlock each other.
    ///
    /// The entry is dropped again once no other caller holds or waits on
    /// it, so the map only ever tracks instances in use.
    pub fn with_lock<R>(&self, entity: &EntityRef, f: impl FnOnce() -> R) -> R {
        let lock = self
            .locks
            .entry(entity.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        // Clones are only taken under the shard lock, so a count of one
        // means nobody else can be waiting.
        self.locks
            .remove_if(entity, |_, lock| Arc::strong_count(lock) == 1);
        result
    }

    /// Number of instances currently locked or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn writes_to_one_instance_are_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let post = EntityRef::new("Post", 1);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let post = post.clone();
                thread::spawn(move || {
                    for _ in 0..100 {
                        locks.with_lock(&post, || {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(locks.is_empty());
    }

    /// Test that an entry lives only while its lock is in use.
    #[test]
    fn entries_are_dropped_after_use() {
        let locks = InstanceLocks::new();
        let posts: Vec<_> = (1..=50).map(|id| EntityRef::new("Post", id)).collect();
        for post in &posts {
            let held = locks.with_lock(post, || locks.len());
            assert_eq!(held, 1);
        }
        assert!(locks.is_empty());
    }
}
