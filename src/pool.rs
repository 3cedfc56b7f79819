//! Free-list pools for per-request allocations.
//!
//! The engine keeps one pool each for [`Context`](crate::Context),
//! [`Request`](crate::Request) and byte buffers. Ownership moves out on
//! [`Pool::acquire`] and back in on [`Pool::release`], so an instance can be
//! checked out by exactly one request at a time and cannot be touched after
//! it has been returned.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Returns a value to its zero state before it is reused.
pub trait Reset {
    fn reset(&mut self);
}

impl Reset for Vec<u8> {
    fn reset(&mut self) {
        self.clear();
    }
}

/// A thread-safe free list of reusable `T`s.
pub struct Pool<T> {
    free: Mutex<Vec<T>>,
    make: fn() -> T,
    max_idle: usize,
    acquired: AtomicUsize,
    released: AtomicUsize,
    allocated: AtomicUsize,
}

/// Counters for one pool, for diagnostics and balance checks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PoolStats {
    pub acquired: usize,
    pub released: usize,
    pub allocated: usize,
    pub idle: usize,
}

impl PoolStats {
    /// Instances currently checked out.
    pub fn outstanding(&self) -> usize {
        self.acquired - self.released
    }
}

impl<T: Reset> Pool<T> {
    pub fn new(make: fn() -> T, max_idle: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            make,
            max_idle,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Takes a clean instance, allocating one if the free list is empty.
    pub fn acquire(&self) -> T {
        self.acquired.fetch_add(1, Ordering::Relaxed);
        // Pop under the lock, allocate outside it.
        let reused = self.free.lock().pop();
        reused.unwrap_or_else(|| {
            self.allocated.fetch_add(1, Ordering::Relaxed);
            (self.make)()
        })
    }

    /// Resets `item` and hands it back for reuse.
    pub fn release(&self, mut item: T) {
        self.released.fetch_add(1, Ordering::Relaxed);
        item.reset();
        let mut free = self.free.lock();
        if free.len() < self.max_idle {
            free.push(item);
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            released: self.released.load(Ordering::Relaxed),
            allocated: self.allocated.load(Ordering::Relaxed),
            idle: self.free.lock().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn released_instances_are_reset_and_reused() {
        let pool: Pool<Vec<u8>> = Pool::new(Vec::new, 4);
        let mut buf = pool.acquire();
        buf.extend_from_slice(b"hello");
        let cap = buf.capacity();
        pool.release(buf);

        let buf = pool.acquire();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), cap);

        let stats = pool.stats();
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.released, 1);
        assert_eq!(stats.allocated, 1);
        assert_eq!(stats.outstanding(), 1);
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool: Pool<Vec<u8>> = Pool::new(Vec::new, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        pool.release(a);
        pool.release(b);
        assert_eq!(pool.stats().idle, 1);
    }

    #[test]
    fn concurrent_acquire_release_balances() {
        let pool: Arc<Pool<Vec<u8>>> = Arc::new(Pool::new(Vec::new, 64));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    for i in 0..500_u32 {
                        let mut buf = pool.acquire();
                        buf.extend_from_slice(&i.to_le_bytes());
                        pool.release(buf);
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.acquired, 4000);
        assert_eq!(stats.outstanding(), 0);
        assert!(stats.allocated <= 8);
    }
}
