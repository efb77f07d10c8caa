//! Error and outcome types for the V2V core.
//!
//! Steady-state operations (scan, merge, broadcast) never fail. What the
//! host would call "failures" are defined outcomes, reported through
//! [`MergeOutcome`] and [`ScanOutcome`]. Only configuration parsing and
//! timer lifecycle can return a [`V2vError`].

use thiserror::Error;
use v2v_env::{ActorId, EnvError};

/// Errors raised by configuration and lifecycle plumbing.
#[derive(Debug, Error)]
pub enum V2vError {
    /// A tunable was negative, NaN or infinite
    #[error("Invalid value for '{name}': {value}")]
    InvalidParameter { name: &'static str, value: f64 },

    /// A registration attribute could not be parsed as a float
    #[error("Cannot parse attribute '{name}' = {raw:?}")]
    UnparsableAttribute { name: &'static str, raw: String },

    /// Config document was not valid JSON for `SensorConfig`
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    /// Scheduler refused to arm or disarm a timer
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] EnvError),
}

/// Outcome of a single `merge` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// No entry existed; the observation was inserted
    Inserted,

    /// Incoming timestamp was strictly newer; location and timestamp replaced
    Updated,

    /// Incoming timestamp was not newer; nothing changed
    Stale,

    /// Store has no owner (never attached or torn down); nothing changed
    Inert,
}

impl MergeOutcome {
    /// Returns true if the store changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, MergeOutcome::Inserted | MergeOutcome::Updated)
    }
}

/// Outcome of a single `scan_tick` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Ray resolved to a walker, which was merged as a direct observation
    Detected(ActorId),

    /// Ray missed, or hit something that is not (and is not owned by) a walker
    NoDetection,

    /// Store has no owner; no ray was cast
    Inert,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_outcome_applied() {
        assert!(MergeOutcome::Inserted.is_applied());
        assert!(MergeOutcome::Updated.is_applied());
        assert!(!MergeOutcome::Stale.is_applied());
        assert!(!MergeOutcome::Inert.is_applied());
    }

    #[test]
    fn test_error_messages() {
        let err = V2vError::InvalidParameter {
            name: "trace_range",
            value: -1.0,
        };
        assert_eq!(err.to_string(), "Invalid value for 'trace_range': -1");
    }
}
