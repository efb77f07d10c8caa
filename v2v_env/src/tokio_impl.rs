//! Production implementations backed by Tokio.

use crate::context::{Clock, V2vContext};
use crate::error::EnvError;
use crate::scheduler::{check_interval, Scheduler, TimerCallback};
use crate::types::TimerHandle;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::debug;

/// Production context backed by Tokio.
///
/// Time comes from the system monotonic clock; tasks run on the runtime
/// captured at construction.
pub struct TokioContext {
    /// Start time for monotonic duration calculations
    start: Instant,

    /// Runtime that background tasks are spawned onto
    runtime: Handle,
}

impl TokioContext {
    /// Creates a context bound to the runtime of the calling thread.
    pub fn new() -> Result<Self, EnvError> {
        let runtime = Handle::try_current().map_err(|e| EnvError::no_runtime(e.to_string()))?;
        Ok(Self::with_handle(runtime))
    }

    /// Creates a context bound to an explicit runtime handle.
    pub fn with_handle(runtime: Handle) -> Self {
        Self {
            start: Instant::now(),
            runtime,
        }
    }

    /// Creates an Arc-wrapped context for sharing across tasks.
    pub fn shared() -> Result<Arc<Self>, EnvError> {
        Self::new().map(Arc::new)
    }
}

impl Clock for TokioContext {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }
}

#[async_trait]
impl V2vContext for TokioContext {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        debug!(task = name, "spawning task");
        self.runtime.spawn(future);
    }

    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

/// Periodic scheduler running each timer as a context task.
///
/// Each task sleeps one interval, checks its cancel flag, then fires. The
/// next period starts after the callback returns, so a slow callback
/// delays later ticks instead of bunching them.
pub struct TokioScheduler {
    context: Arc<TokioContext>,
    next_id: AtomicU64,
    timers: Mutex<HashMap<TimerHandle, Arc<AtomicBool>>>,
}

impl TokioScheduler {
    /// Creates a scheduler bound to the runtime of the calling thread.
    pub fn new() -> Result<Self, EnvError> {
        Ok(Self::with_context(TokioContext::shared()?))
    }

    /// Creates a scheduler that spawns its timers through `context`.
    pub fn with_context(context: Arc<TokioContext>) -> Self {
        debug!(seed = context.seed(), "tokio scheduler ready");
        Self {
            context,
            next_id: AtomicU64::new(1),
            timers: Mutex::new(HashMap::new()),
        }
    }

    /// The context timers run on; doubles as the runtimes' clock.
    pub fn context(&self) -> &Arc<TokioContext> {
        &self.context
    }

    /// Returns the number of armed timers.
    pub fn armed(&self) -> usize {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, interval: Duration, mut callback: TimerCallback) -> Result<TimerHandle, EnvError> {
        check_interval(interval)?;

        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let context = Arc::clone(&self.context);

        self.context.spawn("v2v-timer", async move {
            loop {
                context.sleep(interval).await;
                if flag.load(Ordering::Acquire) {
                    break;
                }
                callback();
            }
        });

        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle, cancelled);

        debug!(%handle, interval_ms = interval.as_millis() as u64, "timer armed");
        Ok(handle)
    }

    fn cancel(&self, handle: TimerHandle) -> bool {
        let flag = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&handle);

        match flag {
            Some(flag) => {
                flag.store(true, Ordering::Release);
                debug!(%handle, "timer cancelled");
                true
            }
            None => false,
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        let timers = self.timers.get_mut().unwrap_or_else(PoisonError::into_inner);
        for (_, flag) in timers.drain() {
            flag.store(true, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn test_tokio_context_time() {
        let ctx = TokioContext::new().unwrap();
        let t1 = ctx.now();
        ctx.sleep(Duration::from_millis(10)).await;
        let t2 = ctx.now();

        assert!(t2 > t1);
        assert!(t2 - t1 >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_tokio_context_seed() {
        let ctx = TokioContext::new().unwrap();
        assert_eq!(ctx.seed(), 0);
    }

    #[test]
    fn test_context_and_scheduler_require_runtime() {
        assert!(matches!(TokioContext::new(), Err(EnvError::NoRuntime(_))));
        assert!(matches!(TokioScheduler::new(), Err(EnvError::NoRuntime(_))));
    }

    #[tokio::test]
    async fn test_spawned_task_runs_on_context() {
        let ctx = TokioContext::new().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        ctx.spawn("send", async move {
            let _ = tx.send(7u32);
        });
        assert_eq!(rx.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_scheduler_rejects_zero_interval() {
        let scheduler = TokioScheduler::new().unwrap();
        let result = scheduler.schedule(Duration::ZERO, Box::new(|| {}));
        assert!(matches!(result, Err(EnvError::InvalidInterval(_))));
    }

    #[tokio::test]
    async fn test_scheduler_fires_and_cancels() {
        let scheduler = TokioScheduler::new().unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let handle = scheduler
            .schedule(
                Duration::from_millis(10),
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(scheduler.armed(), 1);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(count.load(Ordering::SeqCst) >= 2);

        assert!(scheduler.cancel(handle));
        assert!(!scheduler.cancel(handle));
        assert_eq!(scheduler.armed(), 0);

        tokio::time::sleep(Duration::from_millis(20)).await;
        let after_cancel = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
    }
}
