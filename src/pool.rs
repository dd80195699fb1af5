//! C2 — bounded LIFO free-list of [`Event`]s.
//!
//! Reset cost is paid by the *consumer* (on `acquire`), not the producer
//! (on `release`), which is what keeps tail latency flat under sustained
//! load — see the module doc on [`Event::reset_event`].

use crate::event::Event;

/// Point-in-time snapshot of pool activity, for telemetry only — not
/// consulted on the hot path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub pool_size: usize,
    pub max_size: usize,
    pub created_count: u64,
    pub reuse_count: u64,
}

impl PoolStats {
    /// `reuse_count / (reuse_count + created_count)`, or `0.0` if the pool
    /// has never been touched. Target ≥ 0.95 under steady load.
    #[inline]
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.reuse_count + self.created_count;
        if total == 0 {
            0.0
        } else {
            self.reuse_count as f64 / total as f64
        }
    }
}

/// C2: a bounded LIFO stack of reusable [`Event`]s.
///
/// One per worker (see the spec's single-threaded-per-worker concurrency
/// model) — no internal locking. A process-wide singleton is offered
/// separately by [`crate::memory::global_pool`] for single-worker
/// deployments that want one without wiring it through by hand.
#[derive(Debug)]
pub struct EventPool {
    free: Vec<Box<Event>>,
    max_size: usize,
    created_count: u64,
    reuse_count: u64,
}

impl EventPool {
    /// Builds an empty pool with the given capacity. No Events are
    /// allocated until the first [`EventPool::acquire`] or an explicit
    /// [`EventPool::warm_up`].
    pub fn new(max_size: usize) -> Self {
        Self {
            free: Vec::with_capacity(max_size),
            max_size,
            created_count: 0,
            reuse_count: 0,
        }
    }

    /// Pops a reset Event off the free list, or allocates a fresh one on
    /// miss. Every Event returned from here is in the same observable state
    /// regardless of which path was taken — `P2`.
    pub fn acquire(&mut self) -> Box<Event> {
        match self.free.pop() {
            Some(mut event) => {
                event.reset_event();
                self.reuse_count += 1;
                event
            }
            None => {
                self.created_count += 1;
                Box::new(Event::new())
            }
        }
    }

    /// Returns `event` to the free list if there's room, otherwise drops
    /// it. Reset is deferred to the next `acquire` of this slot, not run
    /// here — that's the point of the pool.
    pub fn release(&mut self, event: Box<Event>) {
        if self.free.len() < self.max_size {
            self.free.push(event);
        }
        // else: `event` drops here, fully freeing its owned bytes.
    }

    /// Pre-allocates `min(n, max_size)` Events and pushes them onto the
    /// free list, counted as `created_count` (they were never reused).
    pub fn warm_up(&mut self, n: usize) {
        let target = n.min(self.max_size);
        for _ in 0..target {
            if self.free.len() >= self.max_size {
                break;
            }
            self.created_count += 1;
            self.free.push(Box::new(Event::new()));
        }
    }

    /// Pops and drops Events until the free list's size is at most
    /// `target`.
    pub fn shrink(&mut self, target: usize) {
        while self.free.len() > target {
            self.free.pop();
        }
    }

    /// If the free list has grown past `2 * max(max_size / 4, 10)`, shrinks
    /// it back down to `max(max_size / 4, 10)`. Intended to be called
    /// periodically from [`crate::memory::MemoryManager::perform_gc`].
    pub fn maintenance(&mut self) {
        let baseline = (self.max_size / 4).max(10);
        if self.free.len() > 2 * baseline {
            self.shrink(baseline);
        }
    }

    #[inline]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            pool_size: self.free.len(),
            max_size: self.max_size,
            created_count: self.created_count,
            reuse_count: self.reuse_count,
        }
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // S1 (leak regression): 100 acquire/release cycles through a capacity-10
    // pool must end with exactly one allocation and ninety-nine reuses.
    #[test]
    fn s1_leak_regression() {
        let mut pool = EventPool::new(10);

        for _ in 0..100 {
            let mut event = pool.acquire();
            event.set_context("request_id", "12345");
            event.set_context("user_id", "user123");
            event.set_param("p1", "v1");
            event.set_param("p2", "v2");
            pool.release(event);
        }

        let stats = pool.stats();
        assert_eq!(stats.created_count, 1);
        assert_eq!(stats.reuse_count, 99);
        assert!(stats.pool_size <= stats.max_size);
    }

    // P1: pool size never exceeds max_size regardless of release pressure.
    #[test]
    fn p1_release_past_capacity_is_dropped_not_grown() {
        let mut pool = EventPool::new(2);

        let a = pool.acquire();
        let b = pool.acquire();
        let c = pool.acquire();

        pool.release(a);
        pool.release(b);
        pool.release(c); // pool already at capacity 2; c is simply dropped

        assert_eq!(pool.len(), 2);
        assert!(pool.len() <= pool.max_size());
    }

    #[test]
    fn warm_up_counts_as_created_not_reused() {
        let mut pool = EventPool::new(5);
        pool.warm_up(3);

        let stats = pool.stats();
        assert_eq!(stats.pool_size, 3);
        assert_eq!(stats.created_count, 3);
        assert_eq!(stats.reuse_count, 0);

        // warm_up never exceeds max_size even if asked to.
        pool.warm_up(10);
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn shrink_drops_down_to_target() {
        let mut pool = EventPool::new(20);
        pool.warm_up(20);
        assert_eq!(pool.len(), 20);

        pool.shrink(5);
        assert_eq!(pool.len(), 5);
    }

    #[test]
    fn maintenance_shrinks_only_past_double_baseline() {
        let mut pool = EventPool::new(40); // baseline = max(40/4, 10) = 10
        pool.warm_up(20); // 20 <= 2*10, no-op
        pool.maintenance();
        assert_eq!(pool.len(), 20);

        pool.warm_up(5); // 25 > 20, still fine since max_size allows more
        pool.shrink(0);
        pool.warm_up(21); // 21 > 2*10
        pool.maintenance();
        assert_eq!(pool.len(), 10);
    }

    #[test]
    fn acquire_after_release_observes_reset_event() {
        let mut pool = EventPool::new(4);

        let mut event = pool.acquire();
        event.set_header("x-id", "abc");
        event.send_text("hello").unwrap();
        pool.release(event);

        let reused = pool.acquire();
        assert_eq!(reused.get_header(b"x-id"), None);
        assert!(!reused.is_finished());
    }
}
