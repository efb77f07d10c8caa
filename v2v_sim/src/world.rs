//! SimWorld - The simulation harness container.
//!
//! One frame of the simulation is:
//!
//! ```text
//! advance virtual clock ──► move actors ──► wander walkers ──► fire due timers
//!                                                               (scans, broadcasts)
//! ```

use crate::context::SimContext;
use crate::oracle::Oracle;
use crate::physics::PhysicsWorld;
use crate::scheduler::SimScheduler;

use nalgebra::Vector3;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;
use v2v_core::{propagation_metrics, PropagationMetrics, RuntimeConfig, RuntimeServices, SensorConfig, V2vError, VehicleRuntime};
use v2v_env::{ActorId, Clock};

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Scan frame rate in Hz
    pub tick_rate_hz: u32,

    /// Sensor ranges shared by every vehicle
    pub sensor: SensorConfig,

    /// Hit proxy radius around each walker (0 = none)
    pub walker_proxy_radius: f64,

    /// Half side length of the arena used for random placement
    pub arena_half_extent: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 30,
            sensor: SensorConfig::default(),
            walker_proxy_radius: 1.0,
            arena_half_extent: 1000.0,
        }
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Kinematic world the sensors query
    pub physics: Arc<PhysicsWorld>,

    /// Timer wheel the runtimes arm
    pub scheduler: Arc<SimScheduler>,

    /// Seeded placement and walker motion
    pub oracle: Oracle,

    services: RuntimeServices,
    vehicles: Vec<VehicleRuntime>,
    ticks: u64,
}

impl SimWorld {
    /// Creates an empty simulation.
    pub fn new(config: SimConfig) -> Self {
        let context = SimContext::shared(config.seed);
        let physics = Arc::new(PhysicsWorld::new());
        let scheduler = Arc::new(SimScheduler::new(context.clone()));
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);
        let oracle = Oracle::new(physics_seed, config.arena_half_extent);
        let services = RuntimeServices::new(physics.clone(), context.clone());
        debug!(seed = context.seed(), tick_rate_hz = config.tick_rate_hz, "simulation world created");

        Self {
            config,
            context,
            physics,
            scheduler,
            oracle,
            services,
            vehicles: Vec::new(),
            ticks: 0,
        }
    }

    /// Duration of one frame.
    pub fn frame(&self) -> Duration {
        self.runtime_config("frame").frame_interval()
    }

    fn runtime_config(&self, name: &str) -> RuntimeConfig {
        RuntimeConfig {
            name: name.to_string(),
            tick_rate_hz: self.config.tick_rate_hz,
            sensor: self.config.sensor,
        }
    }

    /// Spawns a vehicle with both sensors attached and activates them.
    ///
    /// Returns the vehicle's index in this world.
    pub fn spawn_vehicle(&mut self, name: &str, position: Vector3<f64>, velocity: Vector3<f64>) -> Result<usize, V2vError> {
        let vehicle = self.physics.spawn_vehicle(position, velocity);
        let agent = self
            .physics
            .attach_sensor(vehicle)
            .ok_or(V2vError::InvalidParameter {
                name: "vehicle",
                value: vehicle.raw() as f64,
            })?;

        let runtime = VehicleRuntime::new(vehicle, agent, self.runtime_config(name), &self.services);
        runtime.activate(self.scheduler.as_ref())?;
        debug!(name, %vehicle, %agent, "spawned vehicle");

        self.vehicles.push(runtime);
        Ok(self.vehicles.len() - 1)
    }

    /// Spawns a walker (with hit proxy) at a fixed position.
    pub fn spawn_walker(&mut self, position: Vector3<f64>, velocity: Vector3<f64>) -> ActorId {
        self.oracle
            .spawn_walker(&self.physics, position, velocity, self.config.walker_proxy_radius)
    }

    /// Spawns `count` randomly placed, wandering walkers.
    pub fn spawn_crowd(&mut self, count: usize, speed: f64) -> Vec<ActorId> {
        self.oracle
            .spawn_crowd(&self.physics, count, speed, self.config.walker_proxy_radius)
    }

    /// Spawns `count` randomly placed vehicles at `speed`.
    pub fn spawn_fleet(&mut self, count: usize, speed: f64) -> Result<Vec<usize>, V2vError> {
        (0..count)
            .map(|i| {
                let position = self.oracle.random_position();
                let velocity = self.oracle.random_velocity(speed);
                self.spawn_vehicle(&format!("vehicle-{i}"), position, velocity)
            })
            .collect()
    }

    pub fn vehicles(&self) -> &[VehicleRuntime] {
        &self.vehicles
    }

    pub fn vehicle(&self, index: usize) -> Option<&VehicleRuntime> {
        self.vehicles.get(index)
    }

    /// Tears down one vehicle's sensors; the body stays in the world.
    pub fn teardown_vehicle(&self, index: usize) -> bool {
        match self.vehicles.get(index) {
            Some(runtime) if runtime.is_active() => {
                runtime.teardown(self.scheduler.as_ref());
                true
            }
            _ => false,
        }
    }

    /// Advances the simulation by one frame.
    ///
    /// Returns the number of timer callbacks fired.
    pub fn tick(&mut self) -> usize {
        let frame = self.frame();
        let dt = frame.as_secs_f64();

        self.context.advance_time(frame);
        self.physics.step(dt);
        self.oracle.wander(&self.physics, dt);
        self.ticks += 1;
        self.scheduler.run_due()
    }

    /// Runs whole frames until `secs` of virtual time have elapsed.
    pub fn run_for(&mut self, secs: f64) -> u64 {
        let target = self.context.now_secs() + secs;
        let start = self.ticks;
        while self.context.now_secs() < target {
            self.tick();
        }
        self.ticks - start
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn time_secs(&self) -> f64 {
        self.context.now_secs()
    }

    /// Ground-truth walker positions.
    pub fn ground_truth(&self) -> HashMap<ActorId, Vector3<f64>> {
        self.oracle.ground_truth(&self.physics)
    }

    /// Propagation metrics over every active vehicle.
    pub fn metrics(&self) -> PropagationMetrics {
        propagation_metrics(
            self.vehicles.iter().map(|v| v.store().as_ref()),
            &self.ground_truth(),
            self.time_secs(),
        )
    }
}

impl Drop for SimWorld {
    fn drop(&mut self) {
        for runtime in &self.vehicles {
            if runtime.is_active() {
                runtime.teardown(self.scheduler.as_ref());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use v2v_env::WorldQuery;

    #[test]
    fn test_frame_and_run_for() {
        let mut world = SimWorld::new(SimConfig::default());
        assert_eq!(world.frame(), Duration::from_nanos(33_333_333));

        let ticks = world.run_for(1.0);
        assert_eq!(ticks, 31);
        assert!(world.time_secs() >= 1.0);
    }

    #[test]
    fn test_spawn_vehicle_arms_timers() {
        let mut world = SimWorld::new(SimConfig::default());
        let a = world.spawn_vehicle("a", Vector3::zeros(), Vector3::zeros()).unwrap();
        assert_eq!(a, 0);
        assert_eq!(world.scheduler.armed(), 2);
        assert!(world.vehicle(a).unwrap().is_active());

        // One scan per frame
        assert_eq!(world.tick(), 1);

        assert!(world.teardown_vehicle(a));
        assert!(!world.teardown_vehicle(a));
        assert_eq!(world.scheduler.armed(), 0);
    }

    #[test]
    fn test_vehicles_move() {
        let mut world = SimWorld::new(SimConfig::default());
        let a = world
            .spawn_vehicle("a", Vector3::zeros(), Vector3::new(30.0, 0.0, 0.0))
            .unwrap();
        world.run_for(1.0);
        let vehicle = world.vehicle(a).unwrap().vehicle();
        let x = world.physics.location_of(vehicle).unwrap().x;
        assert!(x > 29.0 && x < 32.0);
    }
}
