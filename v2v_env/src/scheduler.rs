//! Periodic callback scheduling abstraction.

use crate::error::EnvError;
use crate::types::TimerHandle;
use std::time::Duration;

/// Callback invoked on every timer period.
pub type TimerCallback = Box<dyn FnMut() + Send + 'static>;

/// Periodic-callback scheduler.
///
/// # Contract
///
/// Once `cancel` returns, the callback registered under that handle never
/// starts again. A callback that is already running when `cancel` is called
/// is allowed to finish; callers that need stronger guarantees pair the
/// timer with their own liveness check (see `DetectionStore::is_active`).
pub trait Scheduler: Send + Sync {
    /// Arms a repeating timer that fires every `interval`.
    ///
    /// The first invocation happens one `interval` after arming.
    fn schedule(&self, interval: Duration, callback: TimerCallback) -> Result<TimerHandle, EnvError>;

    /// Disarms a timer.
    ///
    /// # Returns
    /// * `true` - The timer was armed and is now cancelled
    /// * `false` - The handle was unknown or already cancelled
    fn cancel(&self, handle: TimerHandle) -> bool;
}

/// Validates a timer interval.
pub fn check_interval(interval: Duration) -> Result<(), EnvError> {
    if interval.is_zero() {
        return Err(EnvError::InvalidInterval(interval.as_secs_f64()));
    }
    Ok(())
}
