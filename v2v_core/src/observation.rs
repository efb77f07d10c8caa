//! Data model: walker observations and the rotating scan cursor.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use v2v_env::ActorId;

/// What one vehicle knows about one walker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WalkerObservation {
    /// Identity of the observed pedestrian
    pub walker_id: ActorId,

    /// Last known world-space position
    pub location: Vector3<f64>,

    /// Simulation time (seconds) at which `location` was last judged valid
    pub timestamp: f64,

    /// True once this vehicle's own scan has seen the walker. Never reset.
    pub directly_observed: bool,
}

impl WalkerObservation {
    /// Creates a new observation.
    pub fn new(walker_id: ActorId, location: Vector3<f64>, timestamp: f64, directly_observed: bool) -> Self {
        Self {
            walker_id,
            location,
            timestamp,
            directly_observed,
        }
    }

    /// Returns the age of this observation at time `now`.
    pub fn age(&self, now: f64) -> f64 {
        now - self.timestamp
    }

    /// Returns true if the observation has outlived `retention_secs` at `now`.
    ///
    /// An entry exactly `retention_secs` old is still live.
    pub fn is_expired(&self, now: f64, retention_secs: f64) -> bool {
        self.age(now) > retention_secs
    }
}

/// Ordered walker-id → observation map owned by one store.
///
/// Ordered so that snapshots, and the parallel sequences derived from them,
/// come out in a stable order.
pub type DetectionTable = BTreeMap<ActorId, WalkerObservation>;

/// Horizontal heading of the rotating scan, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScanCursor {
    current_angle: f64,
}

impl ScanCursor {
    /// Creates a cursor at the given heading, normalized into [0, 360).
    pub fn at(angle_deg: f64) -> Self {
        let mut cursor = Self::default();
        cursor.set(angle_deg);
        cursor
    }

    /// Current heading in degrees, always in [0, 360).
    pub fn angle(&self) -> f64 {
        self.current_angle
    }

    /// Unit direction of the current heading (yaw about +Z).
    pub fn direction(&self) -> Vector3<f64> {
        let yaw = self.current_angle.to_radians();
        Vector3::new(yaw.cos(), yaw.sin(), 0.0)
    }

    /// Rotates by `delta_secs * angular_speed_deg`, wrapping at 360.
    ///
    /// Non-finite steps are ignored.
    pub fn advance(&mut self, delta_secs: f64, angular_speed_deg: f64) {
        let step = delta_secs * angular_speed_deg;
        if step.is_finite() {
            self.set(self.current_angle + step);
        }
    }

    fn set(&mut self, angle_deg: f64) {
        let wrapped = angle_deg.rem_euclid(360.0);
        // rem_euclid can round up to exactly 360 for tiny negative inputs
        self.current_angle = if wrapped >= 360.0 || !wrapped.is_finite() {
            0.0
        } else {
            wrapped
        };
    }
}
