//! C4 — the scoped memory manager: two bump arenas, an [`EventPool`]
//! handle, and the usage telemetry/GC trigger that keeps both in check.

use crate::{
    errors::EngineError,
    event::Event,
    limits::MemoryConfig,
    pool::EventPool,
};
use std::sync::{Mutex, OnceLock};

/// A single allocation handed out by an [`Arena`]. Opaque on purpose —
/// callers get their bytes back through [`Arena::get`]/[`Arena::get_mut`],
/// never a raw pointer, so there is nothing here that can outlive a
/// `reset`/`free_all` undetected.
#[derive(Debug, Clone, Copy)]
pub struct ArenaSlice {
    start: usize,
    len: usize,
}

/// A monotonic bump allocator. `alloc` and `reset` are its only operations,
/// per the spec's data model — there is no per-allocation free.
#[derive(Debug)]
pub struct Arena {
    buffer: Vec<u8>,
    capacity: usize,
    offset: usize,
}

impl Arena {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            capacity,
            offset: 0,
        }
    }

    /// Bumps the offset by `size` bytes and returns a handle to them, or
    /// `None` if that would exceed `capacity`. Grows the backing buffer
    /// lazily so an idle arena costs nothing.
    pub fn alloc(&mut self, size: usize) -> Option<ArenaSlice> {
        if self.offset.checked_add(size)? > self.capacity {
            return None;
        }

        if self.buffer.len() < self.offset + size {
            self.buffer.resize(self.offset + size, 0);
        }

        let slice = ArenaSlice {
            start: self.offset,
            len: size,
        };
        self.offset += size;
        Some(slice)
    }

    #[inline]
    pub fn get(&self, slice: ArenaSlice) -> &[u8] {
        &self.buffer[slice.start..slice.start + slice.len]
    }

    #[inline]
    pub fn get_mut(&mut self, slice: ArenaSlice) -> &mut [u8] {
        &mut self.buffer[slice.start..slice.start + slice.len]
    }

    /// Rewinds the bump pointer, retaining the backing buffer's capacity —
    /// the cheap, frequent reset (`reset_request_arena`/`reset_temp_arena`).
    #[inline]
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    /// Drops the backing buffer entirely, returning its memory to the
    /// allocator (and, for a large enough buffer, the OS) — the expensive,
    /// rare reset (`perform_gc`).
    #[inline]
    pub fn free_all(&mut self) {
        self.buffer = Vec::new();
        self.offset = 0;
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.offset
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Selects which allocator a caller wants. Handlers SHOULD prefer
/// `Request` scope for anything tied to a single response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationScope {
    Request,
    Temporary,
    /// Not arena-backed — callers use the base allocator (`Box`/`Vec`)
    /// directly for anything that must outlive a single request.
    Persistent,
}

/// Running counters. Monotone counters (`total_allocated`, `pool_hits`,
/// `pool_misses`, `arena_resets`, `gc_runs`) never decrement;
/// `current_usage`/`peak_usage` track live bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub total_allocated: u64,
    pub current_usage: u64,
    pub peak_usage: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub arena_resets: u64,
    pub gc_runs: u64,
}

/// C4: owns the base allocator's accounting, the two arenas, and an
/// optional [`EventPool`].
pub struct MemoryManager {
    request_arena: Arena,
    temp_arena: Arena,
    pool: Option<EventPool>,
    config: MemoryConfig,
    stats: MemoryStats,
}

impl MemoryManager {
    pub fn new(config: MemoryConfig) -> Self {
        let pool = config
            .enable_event_pool
            .then(|| EventPool::new(config.event_pool_size));

        Self {
            request_arena: Arena::new(config.arena_size),
            temp_arena: Arena::new(config.arena_size),
            pool,
            config,
            stats: MemoryStats::default(),
        }
    }

    /// Delegates to the `EventPool` if enabled, else allocates directly.
    /// Updates `pool_hits`/`pool_misses` either way.
    pub fn acquire_event(&mut self) -> Box<Event> {
        match &mut self.pool {
            Some(pool) => {
                let created_before = pool.stats().created_count;
                let event = pool.acquire();
                if pool.stats().created_count > created_before {
                    self.stats.pool_misses += 1;
                } else {
                    self.stats.pool_hits += 1;
                }
                event
            }
            None => {
                self.stats.pool_misses += 1;
                Box::new(Event::new())
            }
        }
    }

    pub fn release_event(&mut self, event: Box<Event>) {
        match &mut self.pool {
            Some(pool) => pool.release(event),
            None => drop(event),
        }
    }

    pub fn alloc(&mut self, scope: AllocationScope, size: usize) -> Option<ArenaSlice> {
        let arena = match scope {
            AllocationScope::Request => &mut self.request_arena,
            AllocationScope::Temporary => &mut self.temp_arena,
            AllocationScope::Persistent => return None,
        };

        let slice = arena.alloc(size)?;

        if self.config.enable_memory_tracking {
            self.stats.total_allocated += size as u64;
            self.stats.current_usage += size as u64;
            self.stats.peak_usage = self.stats.peak_usage.max(self.stats.current_usage);
        }

        Some(slice)
    }

    #[inline]
    pub fn get_request_allocator(&mut self) -> &mut Arena {
        &mut self.request_arena
    }

    #[inline]
    pub fn get_temp_allocator(&mut self) -> &mut Arena {
        &mut self.temp_arena
    }

    /// Resets the request arena, retaining its capacity, and triggers a GC
    /// if `current_usage` has crept past `gc_threshold`.
    pub fn reset_request_arena(&mut self) {
        self.reclaim(self.request_arena.used());
        self.request_arena.reset();
        self.stats.arena_resets += 1;

        if self.stats.current_usage > self.config.gc_threshold as u64 {
            self.perform_gc();
        }
    }

    /// Resets the temp arena, retaining its capacity. No GC trigger — temp
    /// scope is reset far more often than request scope by design.
    pub fn reset_temp_arena(&mut self) {
        self.reclaim(self.temp_arena.used());
        self.temp_arena.reset();
    }

    fn reclaim(&mut self, bytes: usize) {
        if self.config.enable_memory_tracking {
            self.stats.current_usage = self.stats.current_usage.saturating_sub(bytes as u64);
        }
    }

    /// Frees both arenas back to the allocator, runs `EventPool`
    /// maintenance, and zeroes `current_usage`.
    pub fn perform_gc(&mut self) {
        self.request_arena.free_all();
        self.temp_arena.free_all();

        if let Some(pool) = &mut self.pool {
            pool.maintenance();
        }

        self.stats.current_usage = 0;
        self.stats.gc_runs += 1;
    }

    /// Adjusts the event pool's size based on observed reuse ratio: shrinks
    /// by half if reuse is poor, warms up by up to 10 if reuse is near
    /// saturation. Forces a GC if usage has ballooned past `2 *
    /// gc_threshold`.
    pub fn optimize(&mut self) {
        if let Some(pool) = &mut self.pool {
            let ratio = pool.stats().reuse_ratio();
            if ratio < 0.5 && pool.len() > 10 {
                pool.shrink(pool.len() / 2);
            } else if ratio > 0.95 && pool.len() < pool.max_size() {
                pool.warm_up(10);
            }
        }

        if self.stats.current_usage > 2 * self.config.gc_threshold as u64 {
            self.perform_gc();
        }
    }

    /// `true` iff pool efficiency and live-usage ratio are within the
    /// configured healthy bounds and the process hasn't GC'd excessively.
    /// Thresholds (0.8 / 0.9 / 100 by default) are unexplained constants
    /// carried over verbatim from the source; see `MemoryConfig`.
    pub fn is_memory_healthy(&self) -> bool {
        let pool_efficiency = self
            .pool
            .as_ref()
            .map(|p| p.stats().reuse_ratio())
            .unwrap_or(1.0);

        let usage_ratio = if self.stats.peak_usage == 0 {
            0.0
        } else {
            self.stats.current_usage as f64 / self.stats.peak_usage as f64
        };

        pool_efficiency > self.config.healthy_pool_efficiency
            && usage_ratio < self.config.healthy_usage_ratio
            && self.stats.gc_runs < self.config.healthy_max_gc_runs
    }

    #[inline]
    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    #[inline]
    pub fn pool(&self) -> Option<&EventPool> {
        self.pool.as_ref()
    }
}

static GLOBAL_POOL: OnceLock<Mutex<EventPool>> = OnceLock::new();

/// Constructs the process-wide singleton `EventPool`. MUST be called
/// before [`global_pool`] — single-worker deployments that want a
/// convenience global pool call this once at startup. Calling it more than
/// once is a no-op (the first call wins).
pub fn init_global_pool(max_size: usize) {
    let _ = GLOBAL_POOL.set(Mutex::new(EventPool::new(max_size)));
}

/// Returns the mutex-guarded global pool, or `GlobalPoolNotInitialized` if
/// [`init_global_pool`] was never called — fail-closed, per the spec's
/// concurrency model. Multi-worker deployments should prefer a per-worker
/// `MemoryManager` over this.
pub fn global_pool() -> Result<&'static Mutex<EventPool>, EngineError> {
    GLOBAL_POOL.get().ok_or(EngineError::GlobalPoolNotInitialized)
}
