//! Common types for the V2V environment abstraction.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Stable identifier of an actor in the simulated world.
///
/// Vehicles, walkers, sensors and hit proxies all share one id space,
/// the same way the host engine hands out unique object ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ActorId(pub u64);

impl ActorId {
    /// Returns the raw id.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ActorId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor#{}", self.0)
    }
}

/// Coarse actor classification used for overlap filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActorKind {
    /// A wheeled vehicle that can carry sensors
    Vehicle,

    /// A simulated pedestrian
    Walker,

    /// A sensor attached to some other actor
    Sensor,

    /// Anything else (hit proxies, static props)
    Prop,
}

/// Result of a successful ray cast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// The actor whose collision volume was hit first
    pub actor: ActorId,

    /// World-space impact point on that volume
    pub impact_point: Vector3<f64>,

    /// Distance from the ray origin to the impact point
    pub distance: f64,
}

impl RayHit {
    /// Creates a new hit record.
    pub fn new(actor: ActorId, impact_point: Vector3<f64>, distance: f64) -> Self {
        Self {
            actor,
            impact_point,
            distance,
        }
    }
}

/// Opaque handle returned by a [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimerHandle(pub u64);

impl std::fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}
