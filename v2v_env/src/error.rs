//! Error types for the V2V environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
///
/// These only surface from lifecycle plumbing (arming and disarming timers).
/// World queries never fail; a miss is an empty result.
#[derive(Debug, Error)]
pub enum EnvError {
    /// No async runtime is available to drive periodic callbacks
    #[error("No runtime available: {0}")]
    NoRuntime(String),

    /// Interval must be strictly positive and finite
    #[error("Invalid timer interval: {0}s")]
    InvalidInterval(f64),

    /// Context operation failed
    #[error("Context error: {0}")]
    ContextError(String),
}

impl EnvError {
    /// Creates a no-runtime error.
    pub fn no_runtime(msg: impl Into<String>) -> Self {
        Self::NoRuntime(msg.into())
    }

    /// Creates a context error.
    pub fn context(msg: impl Into<String>) -> Self {
        Self::ContextError(msg.into())
    }
}
