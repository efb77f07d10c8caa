//! V2V Core - per-vehicle walker knowledge with proximity gossip
//!
//! This library models two cooperating components per vehicle:
//! 1. **DetectionStore**: a rotating ranged scan feeding a mutex-guarded,
//!    time-decaying walker table with last-writer-wins merge
//! 2. **BroadcastAgent**: a 1 Hz push of that table into every peer store
//!    within radio range, found by sphere overlap and attachment walk
//!
//! Merge is idempotent, and location and timestamp are order-insensitive
//! for distinct timestamps, so duplicate, reordered or repeated broadcasts
//! all converge on the newest position. The direct flag is not: it is the
//! OR of direct writes that were applied, which depends on arrival order.

pub mod agent_runtime;
pub mod broadcast;
pub mod config;
pub mod detection;
pub mod discovery;
pub mod error;
pub mod metrics;
pub mod observation;

#[cfg(test)]
mod test_support;

// Re-export key types for convenience
pub use agent_runtime::{RuntimeConfig, RuntimeServices, VehicleRuntime};
pub use broadcast::{AgentState, BroadcastAgent, BroadcastReport, BroadcastStats};
pub use config::{SensorConfig, SensorDefinition};
pub use detection::{DetectionStore, MergeStats, TrackedWalkers};
pub use discovery::{AgentRegistry, AttachmentDiscovery, PeerDiscovery, PeerLink};
pub use error::{MergeOutcome, ScanOutcome, V2vError};
pub use metrics::{propagation_metrics, PropagationMetrics, StoreSummary};
pub use observation::{DetectionTable, ScanCursor, WalkerObservation};
