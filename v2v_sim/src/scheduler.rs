//! Deterministic timer wheel driven by the virtual clock.
//!
//! Timers fire only inside `run_due`, in `(due time, handle)` order. A
//! callback runs with the wheel unlocked, so it may schedule or cancel
//! timers (including its own) without deadlocking.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::trace;
use v2v_env::{check_interval, Clock, EnvError, Scheduler, TimerCallback, TimerHandle};

struct TimerEntry {
    interval: Duration,
    next_due: Duration,
    /// `None` while the callback is executing
    callback: Option<TimerCallback>,
}

/// Scheduler whose timers fire when the harness says so.
pub struct SimScheduler {
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    fired: AtomicU64,
    timers: Mutex<BTreeMap<TimerHandle, TimerEntry>>,
}

impl SimScheduler {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(0),
            fired: AtomicU64::new(0),
            timers: Mutex::new(BTreeMap::new()),
        }
    }

    fn timers(&self) -> MutexGuard<'_, BTreeMap<TimerHandle, TimerEntry>> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of timers currently armed.
    pub fn armed(&self) -> usize {
        self.timers().len()
    }

    /// Total callbacks fired since creation.
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Fires every timer due at the current virtual time.
    ///
    /// A timer that fell several intervals behind fires once per missed
    /// interval. Returns the number of callbacks run.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now();
        let mut count = 0;

        loop {
            let (handle, mut callback) = {
                let mut timers = self.timers();
                let due = timers
                    .iter_mut()
                    .filter(|(_, entry)| entry.callback.is_some() && entry.next_due <= now)
                    .min_by_key(|(handle, entry)| (entry.next_due, **handle));
                let Some((handle, entry)) = due else {
                    break;
                };
                let Some(callback) = entry.callback.take() else {
                    break;
                };
                entry.next_due += entry.interval;
                (*handle, callback)
            };

            callback();
            count += 1;
            self.fired.fetch_add(1, Ordering::Relaxed);
            trace!(%handle, "timer fired");

            // Cancelled during the callback: drop it
            if let Some(entry) = self.timers().get_mut(&handle) {
                entry.callback = Some(callback);
            }
        }
        count
    }
}

impl Scheduler for SimScheduler {
    fn schedule(&self, interval: Duration, callback: TimerCallback) -> Result<TimerHandle, EnvError> {
        check_interval(interval)?;
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let next_due = self.clock.now() + interval;
        self.timers().insert(
            handle,
            TimerEntry {
                interval,
                next_due,
                callback: Some(callback),
            },
        );
        Ok(handle)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        self.timers().remove(&handle).is_some()
    }
}
