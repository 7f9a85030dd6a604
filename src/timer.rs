//! Timer / Scheduled-Work core
//!
//! Grounded on `original_source/exec/timer.c`/`schedwrk.c`: duration
//! and absolute one-shot timers, plus "do this piece of work at the
//! next token rotation" scheduled work items. Handles are stable
//! integers into a `DashMap`-backed arena (spec §9's arena-with-indices
//! guidance), never raw pointers or closures captured by reference.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Opaque handle to a registered timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

/// Opaque handle to a registered scheduled-work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SchedwrkHandle(u64);

struct TimerEntry {
    expire_at_ns: u64,
    data: u64,
    callback: Box<dyn FnMut(u64) + Send>,
}

struct SchedwrkEntry {
    callback: Box<dyn FnMut(u64) -> i32 + Send>,
    ctx: u64,
}

/// Acquired while the body of a "locked" scheduled-work callback runs.
///
/// Mirrors the `serialize_lock` primitive: it coordinates with a
/// sibling worker that may run concurrently (e.g. a log writer), not
/// with other in-process callbacks — the event loop is single
/// threaded, so within one process this is a no-op guard that exists
/// to document the locking contract at the call site.
pub struct SerializeLock<'a>(parking_lot::MutexGuard<'a, ()>);

/// Duration/absolute timers and token-rotation scheduled work.
///
/// `now_ns` is supplied by the caller on every tick rather than read
/// from the wall clock internally, so the engine stays deterministic
/// and testable (see spec §9: "Timers and scheduled-work are closures
/// over integer handles").
pub struct TimerCore {
    next_timer_id: AtomicU64,
    next_schedwrk_id: AtomicU64,
    timers: DashMap<TimerHandle, TimerEntry>,
    schedwrk: DashMap<SchedwrkHandle, SchedwrkEntry>,
    serialize: Mutex<()>,
}

impl Default for TimerCore {
    fn default() -> Self {
        Self::new()
    }
}

impl TimerCore {
    /// Construct an empty timer/schedwrk core.
    pub fn new() -> Self {
        TimerCore {
            next_timer_id: AtomicU64::new(1),
            next_schedwrk_id: AtomicU64::new(1),
            timers: DashMap::new(),
            schedwrk: DashMap::new(),
            serialize: Mutex::new(()),
        }
    }

    /// Schedule `callback(data)` to fire `duration` from `now_ns`.
    pub fn timer_add_duration(
        &self,
        now_ns: u64,
        duration: Duration,
        data: u64,
        callback: impl FnMut(u64) + Send + 'static,
    ) -> TimerHandle {
        let expire_at_ns = now_ns.saturating_add(duration.as_nanos() as u64);
        self.timer_add_absolute(expire_at_ns, data, callback)
    }

    /// Schedule `callback(data)` to fire at an absolute nanosecond timestamp.
    pub fn timer_add_absolute(
        &self,
        expire_at_ns: u64,
        data: u64,
        callback: impl FnMut(u64) + Send + 'static,
    ) -> TimerHandle {
        let handle = TimerHandle(self.next_timer_id.fetch_add(1, Ordering::Relaxed));
        self.timers.insert(
            handle,
            TimerEntry {
                expire_at_ns,
                data,
                callback: Box::new(callback),
            },
        );
        trace!(handle = handle.0, expire_at_ns, "timer_add");
        handle
    }

    /// Cancel a pending timer. No-op if it already fired or never existed.
    pub fn timer_delete(&self, handle: TimerHandle) {
        self.timers.remove(&handle);
    }

    /// The absolute expiry timestamp of a still-pending timer.
    pub fn timer_expire_time_get(&self, handle: TimerHandle) -> Option<u64> {
        self.timers.get(&handle).map(|e| e.expire_at_ns)
    }

    /// Fire every timer whose expiry is `<= now_ns`, removing them.
    pub fn expire_timers(&self, now_ns: u64) {
        let due: Vec<TimerHandle> = self
            .timers
            .iter()
            .filter(|e| e.expire_at_ns <= now_ns)
            .map(|e| *e.key())
            .collect();
        for handle in due {
            if let Some((_, mut entry)) = self.timers.remove(&handle) {
                debug!(handle = handle.0, "timer expired");
                (entry.callback)(entry.data);
            }
        }
    }

    /// Register `callback(ctx)` to run at the next multicast-token
    /// rotation. Returning `0` de-registers the item; non-zero
    /// reschedules it for the following rotation.
    pub fn schedwrk_create(
        &self,
        ctx: u64,
        callback: impl FnMut(u64) -> i32 + Send + 'static,
    ) -> SchedwrkHandle {
        let handle = SchedwrkHandle(self.next_schedwrk_id.fetch_add(1, Ordering::Relaxed));
        self.schedwrk.insert(
            handle,
            SchedwrkEntry {
                callback: Box::new(callback),
                ctx,
            },
        );
        handle
    }

    /// Cancel a scheduled-work item.
    pub fn schedwrk_destroy(&self, handle: SchedwrkHandle) {
        self.schedwrk.remove(&handle);
    }

    /// Run every outstanding "nolock" scheduled-work item once, called
    /// from a context already holding the process-wide dispatch lock.
    pub fn run_schedwrk_nolock(&self) {
        let handles: Vec<SchedwrkHandle> = self.schedwrk.iter().map(|e| *e.key()).collect();
        for handle in handles {
            let done = if let Some(mut entry) = self.schedwrk.get_mut(&handle) {
                (entry.callback)(entry.ctx) == 0
            } else {
                continue;
            };
            if done {
                self.schedwrk.remove(&handle);
            }
        }
    }

    /// Run every outstanding "locked" scheduled-work item once,
    /// acquiring the serialize lock for the duration of each callback.
    pub fn run_schedwrk_locked(&self) {
        let _guard = SerializeLock(self.serialize.lock());
        self.run_schedwrk_nolock();
    }

    /// Number of timers still pending.
    pub fn pending_timer_count(&self) -> usize {
        self.timers.len()
    }

    /// Number of scheduled-work items still pending.
    pub fn pending_schedwrk_count(&self) -> usize {
        self.schedwrk.len()
    }
}
