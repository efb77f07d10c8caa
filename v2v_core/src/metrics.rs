//! Propagation metrics across a fleet of detection stores.
//!
//! - **Coverage**: fraction of ground-truth walkers each vehicle knows about
//! - **Relay share**: how much of that knowledge came from peers
//! - **Staleness error**: RMS distance between believed and true positions

use crate::detection::DetectionStore;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use v2v_env::ActorId;

/// Per-vehicle view of one store at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreSummary {
    pub vehicle: ActorId,
    pub known: usize,
    pub direct: usize,
    pub relayed: usize,
    /// Age of the oldest live entry (0 when empty)
    pub oldest_age: f64,
}

impl StoreSummary {
    /// Summarizes an attached store; `None` if it has no owner.
    pub fn from_store(store: &DetectionStore, now: f64) -> Option<Self> {
        let vehicle = store.owner()?;
        let entries = store.snapshot_at(now);
        let direct = entries.iter().filter(|obs| obs.directly_observed).count();
        let oldest_age = entries.iter().map(|obs| obs.age(now)).fold(0.0, f64::max);

        Some(Self {
            vehicle,
            known: entries.len(),
            direct,
            relayed: entries.len() - direct,
            oldest_age,
        })
    }
}

/// Fleet-wide aggregate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropagationMetrics {
    /// Attached stores considered
    pub vehicles: usize,

    /// Walkers known to at least one vehicle
    pub distinct_walkers: usize,

    /// Mean fraction of ground-truth walkers known per vehicle [0, 1]
    pub coverage: f64,

    pub direct_total: usize,
    pub relayed_total: usize,

    /// RMS error of believed vs true walker positions (0 when nothing known)
    pub rms_position_error: f64,
}

impl PropagationMetrics {
    /// Share of all known entries that arrived by broadcast.
    pub fn relay_share(&self) -> f64 {
        let total = self.direct_total + self.relayed_total;
        if total == 0 {
            0.0
        } else {
            self.relayed_total as f64 / total as f64
        }
    }
}

/// Computes fleet metrics against ground-truth walker positions.
pub fn propagation_metrics<'a, I>(
    stores: I,
    ground_truth: &HashMap<ActorId, Vector3<f64>>,
    now: f64,
) -> PropagationMetrics
where
    I: IntoIterator<Item = &'a DetectionStore>,
{
    let mut metrics = PropagationMetrics::default();
    let mut distinct = BTreeSet::new();
    let mut coverage_sum = 0.0;
    let mut sq_error_sum = 0.0;
    let mut error_samples = 0usize;

    for store in stores {
        if !store.is_active() {
            continue;
        }
        let entries = store.snapshot_at(now);
        metrics.vehicles += 1;

        let mut known_truth = 0usize;
        for obs in &entries {
            distinct.insert(obs.walker_id);
            if obs.directly_observed {
                metrics.direct_total += 1;
            } else {
                metrics.relayed_total += 1;
            }
            if let Some(truth) = ground_truth.get(&obs.walker_id) {
                known_truth += 1;
                sq_error_sum += (obs.location - truth).norm_squared();
                error_samples += 1;
            }
        }

        if !ground_truth.is_empty() {
            coverage_sum += known_truth as f64 / ground_truth.len() as f64;
        }
    }

    metrics.distinct_walkers = distinct.len();
    if metrics.vehicles > 0 {
        metrics.coverage = coverage_sum / metrics.vehicles as f64;
    }
    if error_samples > 0 {
        metrics.rms_position_error = (sq_error_sum / error_samples as f64).sqrt();
    }
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SensorConfig;
    use crate::test_support::{ManualClock, StubWorld};
    use approx::assert_relative_eq;
    use std::sync::Arc;

    fn store(owner: u64) -> DetectionStore {
        let store = DetectionStore::new(
            SensorConfig::default(),
            Arc::new(StubWorld::new()),
            Arc::new(ManualClock::new(0.0)),
        );
        store.attach(ActorId(owner));
        store
    }

    #[test]
    fn test_metrics_coverage_and_error() {
        let a = store(1);
        let b = store(2);
        let detached = store(3);
        detached.detach();

        a.merge(ActorId(100), Vector3::new(3.0, 4.0, 0.0), 1.0, true);
        a.merge(ActorId(101), Vector3::new(10.0, 0.0, 0.0), 1.0, false);
        b.merge(ActorId(100), Vector3::new(0.0, 0.0, 0.0), 2.0, false);

        let mut truth = HashMap::new();
        truth.insert(ActorId(100), Vector3::zeros());
        truth.insert(ActorId(101), Vector3::new(10.0, 0.0, 0.0));

        let metrics = propagation_metrics([&a, &b, &detached], &truth, 5.0);

        assert_eq!(metrics.vehicles, 2);
        assert_eq!(metrics.distinct_walkers, 2);
        assert_relative_eq!(metrics.coverage, 0.75);
        assert_eq!(metrics.direct_total, 1);
        assert_eq!(metrics.relayed_total, 2);
        assert_relative_eq!(metrics.relay_share(), 2.0 / 3.0);
        // errors: 5, 0, 0
        assert_relative_eq!(metrics.rms_position_error, (25.0f64 / 3.0).sqrt());
    }

    #[test]
    fn test_store_summary() {
        let a = store(1);
        a.merge(ActorId(100), Vector3::zeros(), 1.0, true);
        a.merge(ActorId(101), Vector3::zeros(), 3.0, false);

        let summary = StoreSummary::from_store(&a, 10.0).unwrap();
        assert_eq!(summary.known, 2);
        assert_eq!(summary.direct, 1);
        assert_eq!(summary.relayed, 1);
        assert_relative_eq!(summary.oldest_age, 9.0);

        a.detach();
        assert!(StoreSummary::from_store(&a, 10.0).is_none());
    }

    #[test]
    fn test_empty_fleet() {
        let metrics = propagation_metrics(std::iter::empty(), &HashMap::new(), 0.0);
        assert_eq!(metrics, PropagationMetrics::default());
        assert_eq!(metrics.relay_share(), 0.0);
    }
}
