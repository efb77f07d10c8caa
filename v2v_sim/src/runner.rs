//! Scenario runner - executes walker-sharing scenarios.

use crate::exporter::{SimExport, SimFrame};
use crate::scenarios::ScenarioId;
use crate::world::{SimConfig, SimWorld};

use nalgebra::Vector3;
use serde::Serialize;
use tracing::{debug, info, warn};
use v2v_core::{PropagationMetrics, SensorConfig, V2vError};

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    /// Vehicles still active at the end
    pub final_vehicle_count: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,

    /// Metrics collected during run
    pub metrics: ScenarioMetrics,
}

/// Metrics collected during scenario execution.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScenarioMetrics {
    /// Broadcast cycles that ran (including empty ones)
    pub broadcast_cycles: u64,

    /// Peer stores reached, summed over cycles
    pub peers_reached: u64,

    /// Observations offered to peers
    pub entries_pushed: u64,

    /// Offered observations that changed a peer
    pub merges_applied: u64,

    /// Scan hits merged as direct observations
    pub direct_detections: u64,

    /// Merges rejected as not newer
    pub stale_rejections: u64,

    /// Entries dropped by the retention window
    pub evictions: u64,

    /// Timer callbacks fired by the scheduler
    pub timer_callbacks: u64,

    /// Fleet knowledge at the end of the run
    pub propagation: PropagationMetrics,
}

impl ScenarioMetrics {
    fn collect(world: &SimWorld) -> Self {
        let mut metrics = Self {
            timer_callbacks: world.scheduler.fired(),
            propagation: world.metrics(),
            ..Default::default()
        };
        for runtime in world.vehicles() {
            let broadcast = runtime.agent().stats();
            metrics.broadcast_cycles += broadcast.cycles;
            metrics.peers_reached += broadcast.peers_reached;
            metrics.entries_pushed += broadcast.entries_pushed;
            metrics.merges_applied += broadcast.merges_applied;

            let merges = runtime.store().stats();
            metrics.direct_detections += merges.direct_detections;
            metrics.stale_rejections += merges.stale;
            metrics.evictions += merges.evicted;
        }
        metrics
    }
}

/// Failed checks accumulated by one scenario.
#[derive(Debug, Default)]
struct Checks {
    failures: Vec<String>,
}

impl Checks {
    fn require(&mut self, ok: bool, what: impl FnOnce() -> String) {
        if !ok {
            let message = what();
            warn!("  ✗ {}", message);
            self.failures.push(message);
        }
    }
}

/// Runs walker-sharing scenarios.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Vehicles in the crowd scenario
    num_vehicles: usize,

    /// Walkers in the crowd scenario
    num_walkers: usize,

    /// Tick rate in Hz
    tick_rate_hz: u32,

    /// Maximum duration in seconds
    max_duration_secs: f64,

    /// Ranges every vehicle uses
    sensor: SensorConfig,

    /// Ticks between exported frames
    export_interval: u64,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64, num_vehicles: usize) -> Self {
        Self {
            seed,
            num_vehicles,
            num_walkers: 40,
            tick_rate_hz: 30,
            max_duration_secs: 10.0,
            sensor: SensorConfig::default(),
            export_interval: 10,
        }
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.tick_rate_hz = hz.max(1);
        self
    }

    /// Sets the maximum duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.max_duration_secs = secs;
        self
    }

    /// Sets the crowd size.
    pub fn with_walkers(mut self, walkers: usize) -> Self {
        self.num_walkers = walkers;
        self
    }

    /// Sets trace range and broadcast radius.
    pub fn with_sensor(mut self, sensor: SensorConfig) -> Self {
        self.sensor = sensor;
        self
    }

    /// Sets how many ticks pass between exported frames.
    pub fn with_export_interval(mut self, ticks: u64) -> Self {
        self.export_interval = ticks.max(1);
        self
    }

    fn sim_config(&self) -> SimConfig {
        SimConfig {
            seed: self.seed,
            tick_rate_hz: self.tick_rate_hz,
            sensor: self.sensor,
            ..Default::default()
        }
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.run_with(scenario, &mut None)
    }

    /// Runs a scenario and records frames along the way.
    pub fn run_recorded(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = Some(SimExport::new(scenario.name(), self.seed));
        let result = self.run_with(scenario, &mut export);

        let mut export = export.unwrap_or_else(|| SimExport::new(scenario.name(), self.seed));
        export.finalize(result.passed, Some(result.metrics.propagation.clone()));
        (result, export)
    }

    fn run_with(&self, scenario: ScenarioId, export: &mut Option<SimExport>) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.seed);

        let mut world = SimWorld::new(self.sim_config());
        let outcome = match scenario {
            ScenarioId::Handoff => self.run_handoff(&mut world, export),
            ScenarioId::OutOfRange => self.run_out_of_range(&mut world, export),
            ScenarioId::Convoy => self.run_convoy(&mut world, export),
            ScenarioId::Crowd => self.run_crowd(&mut world, export),
            ScenarioId::Teardown => self.run_teardown(&mut world, export),
        };

        let failure_reason = match outcome {
            Ok(checks) if checks.failures.is_empty() => None,
            Ok(checks) => Some(checks.failures.join("; ")),
            Err(e) => Some(format!("setup failed: {e}")),
        };

        ScenarioResult {
            scenario,
            seed: self.seed,
            passed: failure_reason.is_none(),
            total_ticks: world.ticks(),
            final_time_secs: world.time_secs(),
            final_vehicle_count: world.vehicles().iter().filter(|v| v.is_active()).count(),
            failure_reason,
            metrics: ScenarioMetrics::collect(&world),
        }
    }

    /// Ticks `world` for `secs` of virtual time, exporting periodically.
    fn drive(&self, world: &mut SimWorld, secs: f64, export: &mut Option<SimExport>) {
        let target = world.time_secs() + secs;
        while world.time_secs() < target {
            world.tick();
            let tick = world.ticks();

            if let Some(export) = export.as_mut() {
                if tick % self.export_interval == 0 {
                    export.add_frame(SimFrame::capture(world));
                }
            }

            if tick % self.tick_rate_hz as u64 == 0 {
                let m = world.metrics();
                debug!(
                    "  t={:.1}s | known={} | direct={} | relayed={}",
                    world.time_secs(),
                    m.distinct_walkers,
                    m.direct_total,
                    m.relayed_total
                );
            }
        }
    }

    /// V2V-001: Handoff - relay across one hop.
    ///
    /// B sits 500 units from A and has a walker 10 units ahead on its first
    /// scan heading. A's own sight line is blocked by B's body.
    ///
    /// **Assertion**: A holds the walker with the relayed flag, B holds it
    /// as a direct observation.
    fn run_handoff(&self, world: &mut SimWorld, export: &mut Option<SimExport>) -> Result<Checks, V2vError> {
        info!("V2V-001: Handoff - one-hop relay");

        let a = world.spawn_vehicle("a", Vector3::zeros(), Vector3::zeros())?;
        let b = world.spawn_vehicle("b", Vector3::new(500.0, 0.0, 0.0), Vector3::zeros())?;
        let walker = world.spawn_walker(Vector3::new(510.0, 0.0, 0.0), Vector3::zeros());

        self.drive(world, self.max_duration_secs.max(2.5), export);

        let mut checks = Checks::default();
        let (Some(a), Some(b)) = (world.vehicle(a), world.vehicle(b)) else {
            checks.require(false, || "vehicles missing".to_string());
            return Ok(checks);
        };

        let seen_by_b = b.store().get(walker);
        let heard_by_a = a.store().get(walker);
        checks.require(seen_by_b.is_some_and(|o| o.directly_observed), || {
            format!("B never observed {walker} directly")
        });
        checks.require(heard_by_a.is_some_and(|o| !o.directly_observed), || {
            format!("A did not receive {walker} as relayed: {heard_by_a:?}")
        });
        if let (Some(seen), Some(heard)) = (seen_by_b, heard_by_a) {
            checks.require(heard.timestamp <= seen.timestamp, || {
                "A holds a newer observation than its only source".to_string()
            });
        }

        info!("  ✓ A knows {} walker(s) via B", a.store().len());
        Ok(checks)
    }

    /// V2V-002: OutOfRange - nothing crosses a gap wider than the radius.
    ///
    /// **Assertion**: A's table stays empty while B keeps broadcasting to
    /// nobody.
    fn run_out_of_range(&self, world: &mut SimWorld, export: &mut Option<SimExport>) -> Result<Checks, V2vError> {
        info!("V2V-002: OutOfRange - isolated vehicles");

        let a = world.spawn_vehicle("a", Vector3::zeros(), Vector3::zeros())?;
        let b = world.spawn_vehicle("b", Vector3::new(1500.0, 0.0, 0.0), Vector3::zeros())?;
        let walker = world.spawn_walker(Vector3::new(1510.0, 0.0, 0.0), Vector3::zeros());

        self.drive(world, self.max_duration_secs.max(2.5), export);

        let mut checks = Checks::default();
        let (Some(a), Some(b)) = (world.vehicle(a), world.vehicle(b)) else {
            checks.require(false, || "vehicles missing".to_string());
            return Ok(checks);
        };

        checks.require(b.store().get(walker).is_some(), || format!("B never observed {walker}"));
        checks.require(a.store().is_empty(), || {
            format!("A learned {} walker(s) across the gap", a.store().len())
        });
        let stats = b.agent().stats();
        checks.require(stats.cycles > 0 && stats.peers_reached == 0, || {
            format!("B broadcast stats unexpected: {stats:?}")
        });
        Ok(checks)
    }

    /// V2V-003: Convoy - two-hop relay through a moving vehicle.
    ///
    /// A drives from B's neighbourhood to C's. B and C are 3000 units
    /// apart and never exchange directly.
    ///
    /// **Assertion**: C ends up with B's exact observation, flagged relayed.
    fn run_convoy(&self, world: &mut SimWorld, export: &mut Option<SimExport>) -> Result<Checks, V2vError> {
        info!("V2V-003: Convoy - knowledge carried by a moving relay");

        let b = world.spawn_vehicle("b", Vector3::zeros(), Vector3::zeros())?;
        let a = world.spawn_vehicle("a", Vector3::new(300.0, 50.0, 0.0), Vector3::new(250.0, 0.0, 0.0))?;
        let c = world.spawn_vehicle("c", Vector3::new(3000.0, 0.0, 0.0), Vector3::zeros())?;
        let walker = world.spawn_walker(Vector3::new(10.0, 0.0, 0.0), Vector3::zeros());

        self.drive(world, self.max_duration_secs.max(9.0), export);

        let mut checks = Checks::default();
        let (Some(a), Some(b), Some(c)) = (world.vehicle(a), world.vehicle(b), world.vehicle(c)) else {
            checks.require(false, || "vehicles missing".to_string());
            return Ok(checks);
        };

        let source = b.store().get(walker);
        let relay = a.store().get(walker);
        let sink = c.store().get(walker);
        checks.require(source.is_some_and(|o| o.directly_observed), || {
            format!("B never observed {walker} directly")
        });
        checks.require(relay.is_some_and(|o| !o.directly_observed), || {
            format!("relay A did not carry {walker}: {relay:?}")
        });
        checks.require(sink.is_some_and(|o| !o.directly_observed), || {
            format!("C did not receive {walker} as relayed: {sink:?}")
        });
        if let (Some(source), Some(sink)) = (source, sink) {
            checks.require((source.location - sink.location).norm() < 1e-3, || {
                "C's location differs from B's observation".to_string()
            });
        }

        info!("  ✓ C learned {} walker(s) it could not see", c.store().len());
        Ok(checks)
    }

    /// V2V-004: Crowd - seeded fleet among wandering walkers.
    ///
    /// **Assertion**: at least one detection happens, every entry names a
    /// real walker, and no entry outlives the retention window.
    fn run_crowd(&self, world: &mut SimWorld, export: &mut Option<SimExport>) -> Result<Checks, V2vError> {
        info!(
            "V2V-004: Crowd - {} vehicles, {} walkers",
            self.num_vehicles, self.num_walkers
        );

        world.spawn_crowd(self.num_walkers, 1.4);
        world.spawn_fleet(self.num_vehicles, 10.0)?;

        self.drive(world, self.max_duration_secs, export);

        let mut checks = Checks::default();
        let now = world.time_secs();
        let truth = world.ground_truth();
        let mut direct = 0u64;

        for runtime in world.vehicles() {
            direct += runtime.store().stats().direct_detections;
            for obs in runtime.store().snapshot() {
                checks.require(truth.contains_key(&obs.walker_id), || {
                    format!("{} tracks non-walker {}", runtime.name(), obs.walker_id)
                });
                checks.require(obs.timestamp <= now, || {
                    format!("{} holds a future timestamp {}", runtime.name(), obs.timestamp)
                });
                checks.require(!obs.is_expired(now, SensorConfig::RETENTION_SECS), || {
                    format!("{} holds an expired entry for {}", runtime.name(), obs.walker_id)
                });
            }
        }
        checks.require(direct > 0, || "no walker was ever detected".to_string());

        let m = world.metrics();
        info!(
            "  coverage={:.1}% relay_share={:.1}% rms_error={:.2}",
            m.coverage * 100.0,
            m.relay_share() * 100.0,
            m.rms_position_error
        );
        Ok(checks)
    }

    /// V2V-005: Teardown - a vehicle leaves mid-run.
    ///
    /// **Assertion**: its timers are gone, its table is empty and inert, and
    /// the remaining vehicle stops reaching it.
    fn run_teardown(&self, world: &mut SimWorld, export: &mut Option<SimExport>) -> Result<Checks, V2vError> {
        info!("V2V-005: Teardown - vehicle removed mid-run");

        let a = world.spawn_vehicle("a", Vector3::zeros(), Vector3::zeros())?;
        let b = world.spawn_vehicle("b", Vector3::new(500.0, 0.0, 0.0), Vector3::zeros())?;
        let walker = world.spawn_walker(Vector3::new(510.0, 0.0, 0.0), Vector3::zeros());

        let half = (self.max_duration_secs / 2.0).max(1.5);
        self.drive(world, half, export);

        let mut checks = Checks::default();
        let armed_before = world.scheduler.armed();
        let learned = world.vehicle(a).and_then(|v| v.store().get(walker)).is_some();
        checks.require(learned, || format!("A never learned {walker} before teardown"));

        world.teardown_vehicle(a);
        info!("  ⚡ Tore down vehicle A at t={:.2}s", world.time_secs());
        if let Some(export) = export.as_mut() {
            export.add_frame(SimFrame::capture(world).with_event("vehicle a torn down"));
        }

        let armed_after = world.scheduler.armed();
        checks.require(armed_before == armed_after + 2, || {
            format!("expected 2 timers cancelled, armed {armed_before} -> {armed_after}")
        });

        let (Some(a_rt), Some(b_rt)) = (world.vehicle(a), world.vehicle(b)) else {
            checks.require(false, || "vehicles missing".to_string());
            return Ok(checks);
        };
        let a_stats_before = a_rt.store().stats();
        let b_before = b_rt.agent().stats();

        self.drive(world, half, export);

        let (Some(a_rt), Some(b_rt)) = (world.vehicle(a), world.vehicle(b)) else {
            checks.require(false, || "vehicles missing".to_string());
            return Ok(checks);
        };
        let b_after = b_rt.agent().stats();

        checks.require(!a_rt.is_active() && a_rt.store().is_empty(), || {
            "torn-down store still holds entries".to_string()
        });
        checks.require(a_rt.store().stats() == a_stats_before, || {
            "torn-down store was written after teardown".to_string()
        });
        checks.require(b_after.cycles > b_before.cycles, || "B stopped broadcasting".to_string());
        checks.require(b_after.peers_reached == b_before.peers_reached, || {
            format!(
                "B reached {} peer(s) after A was torn down",
                b_after.peers_reached - b_before.peers_reached
            )
        });
        Ok(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runner_builder() {
        let runner = ScenarioRunner::new(7, 4)
            .with_duration(3.0)
            .with_tick_rate(0)
            .with_walkers(5)
            .with_export_interval(0);
        assert_eq!(runner.tick_rate_hz, 1);
        assert_eq!(runner.export_interval, 1);
        assert_eq!(runner.num_walkers, 5);
        assert_eq!(runner.sim_config().seed, 7);
    }

    #[test]
    fn test_handoff_passes() {
        let result = ScenarioRunner::new(42, 2).with_duration(3.0).run(ScenarioId::Handoff);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(result.final_vehicle_count, 2);
        assert!(result.metrics.peers_reached > 0);
        assert!(result.metrics.direct_detections > 0);
    }

    #[test]
    fn test_recorded_run_collects_frames() {
        let (result, export) = ScenarioRunner::new(42, 2)
            .with_duration(3.0)
            .with_export_interval(15)
            .run_recorded(ScenarioId::OutOfRange);
        assert!(result.passed, "{:?}", result.failure_reason);
        assert_eq!(export.scenario, "out_of_range");
        assert!(export.passed);
        assert!(export.frames.len() >= 6);
        assert!(export.final_metrics.is_some());
    }
}
