//! Core environment context traits for V2V sensors.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

/// Monotonic simulation clock.
///
/// Object-safe so that stores can hold it as `Arc<dyn Clock>`.
pub trait Clock: Send + Sync {
    /// Returns the current monotonic time since context creation.
    ///
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the current time in seconds, the unit observation timestamps use.
    fn now_secs(&self) -> f64 {
        self.now().as_secs_f64()
    }
}

/// Async task surface over a clock.
///
/// Timer-driven schedulers run their periodic loops through this trait, so
/// the loop body never names a runtime directly.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and a runtime handle
///
/// The simulation harness only needs [`Clock`]; its timers are fired by the
/// frame loop rather than by spawned tasks.
#[async_trait]
pub trait V2vContext: Clock + 'static {
    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    fn seed(&self) -> u64;
}
