//! JSON export of simulation frames for offline inspection.

use crate::error::SimError;
use crate::world::SimWorld;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use v2v_core::{PropagationMetrics, StoreSummary, WalkerObservation};
use v2v_env::WorldQuery;

/// A single frame of simulation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Ground truth walker positions
    pub walkers: Vec<EntityPosition>,

    /// Per-vehicle knowledge
    pub vehicles: Vec<VehicleFrame>,

    /// Events that occurred this frame
    pub events: Vec<SimEvent>,
}

impl SimFrame {
    /// Captures the current state of every active vehicle.
    pub fn capture(world: &SimWorld) -> Self {
        let now = world.time_secs();
        let mut walkers: Vec<EntityPosition> = world
            .ground_truth()
            .into_iter()
            .map(|(id, pos)| EntityPosition::new(id.raw(), pos))
            .collect();
        walkers.sort_by_key(|w| w.id);

        let vehicles = world
            .vehicles()
            .iter()
            .filter(|runtime| runtime.is_active())
            .filter_map(|runtime| {
                let position = world.physics.location_of(runtime.vehicle())?;
                let store = runtime.store();
                Some(VehicleFrame {
                    vehicle_id: runtime.vehicle().raw(),
                    name: runtime.name().to_string(),
                    position: EntityPosition::new(runtime.vehicle().raw(), position),
                    scan_angle: store.scan_angle(),
                    summary: StoreSummary::from_store(store, now)?,
                    entries: store.snapshot_at(now),
                })
            })
            .collect();

        Self {
            time_sec: now,
            walkers,
            vehicles,
            events: Vec::new(),
        }
    }

    pub fn with_event(mut self, message: impl Into<String>) -> Self {
        self.events.push(SimEvent {
            message: message.into(),
            level: None,
        });
        self
    }
}

/// Position of a ground-truth actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityPosition {
    pub id: u64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl EntityPosition {
    pub fn new(id: u64, pos: Vector3<f64>) -> Self {
        Self {
            id,
            x: pos.x,
            y: pos.y,
            z: pos.z,
        }
    }
}

/// One vehicle's table at frame time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleFrame {
    pub vehicle_id: u64,
    pub name: String,
    pub position: EntityPosition,
    /// Current scan heading in degrees
    pub scan_angle: f64,
    /// Known, direct and relayed counts
    pub summary: StoreSummary,
    pub entries: Vec<WalkerObservation>,
}

/// Event marker for the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Random seed
    pub seed: u64,

    /// Total duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Whether the scenario passed
    pub passed: bool,

    /// Fleet metrics at the end of the run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_metrics: Option<PropagationMetrics>,
}

impl SimExport {
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            passed: false,
            final_metrics: None,
        }
    }

    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = self.duration_sec.max(frame.time_sec);
        self.frames.push(frame);
    }

    pub fn finalize(&mut self, passed: bool, metrics: Option<PropagationMetrics>) {
        self.passed = passed;
        self.final_metrics = metrics;
    }

    /// Writes the export as pretty JSON.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::SimConfig;

    #[test]
    fn test_capture_and_serialize() {
        let mut world = SimWorld::new(SimConfig::default());
        world.spawn_vehicle("a", Vector3::zeros(), Vector3::zeros()).unwrap();
        world.spawn_walker(Vector3::new(10.0, 0.0, 0.0), Vector3::zeros());
        world.tick();

        let frame = SimFrame::capture(&world).with_event("first scan");
        assert_eq!(frame.walkers.len(), 1);
        assert_eq!(frame.vehicles.len(), 1);
        assert_eq!(frame.vehicles[0].entries.len(), 1);
        assert!(frame.vehicles[0].entries[0].directly_observed);
        assert_eq!(frame.vehicles[0].summary.known, 1);
        assert_eq!(frame.vehicles[0].summary.direct, 1);
        assert_eq!(frame.vehicles[0].summary.relayed, 0);

        let mut export = SimExport::new("handoff", 42);
        export.add_frame(frame);
        export.finalize(true, Some(world.metrics()));

        let json = serde_json::to_string(&export).unwrap();
        let parsed: SimExport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.frames.len(), 1);
        assert!(parsed.passed);
        assert!(parsed.duration_sec > 0.0);
        assert_eq!(parsed.frames[0].events[0].message, "first scan");
        assert_eq!(parsed.frames[0].vehicles[0].summary.known, 1);
    }
}
