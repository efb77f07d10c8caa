//! The periodic V2V broadcast agent.
//!
//! Once per second an active agent pushes its vehicle's whole detection
//! table into every peer store within radio range. There is no
//! acknowledgment, retry or relay: an observation travels further only
//! because vehicles move and every cycle re-broadcasts what is already known.
//!
//! # State machine
//!
//! ```text
//!            activate (timer armed)
//! Inactive ─────────────────────────► Active ──┐ on_periodic_tick
//!    ▲                                   │ ◄───┘
//!    └───────────────────────────────────┘
//!            deactivate (timer disarmed)
//! ```

use crate::config::SensorConfig;
use crate::detection::DetectionStore;
use crate::discovery::PeerDiscovery;
use crate::error::V2vError;
use crate::observation::WalkerObservation;

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, info};
use v2v_env::{ActorId, Scheduler, TimerHandle};

/// Lifecycle state of a broadcast agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AgentState {
    Inactive,
    Active,
}

/// What one broadcast cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Peer agents the table was pushed to
    pub peers_reached: usize,

    /// Total observations offered (entries × peers)
    pub entries_pushed: usize,

    /// Observations that changed a peer's store
    pub merges_applied: usize,
}

/// Cumulative counters over the agent's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    pub cycles: u64,
    pub skipped_empty: u64,
    pub peers_reached: u64,
    pub entries_pushed: u64,
    pub merges_applied: u64,
}

#[derive(Debug, Default)]
struct Lifecycle {
    owner: Option<ActorId>,
    timer: Option<TimerHandle>,
    stats: BroadcastStats,
}

/// Pushes one vehicle's table to nearby vehicles' stores on a fixed period.
pub struct BroadcastAgent {
    /// This agent's own actor id (what peers find attached to our vehicle)
    agent_id: ActorId,
    config: SensorConfig,
    store: Arc<DetectionStore>,
    discovery: Arc<dyn PeerDiscovery>,
    lifecycle: Mutex<Lifecycle>,
}

impl BroadcastAgent {
    /// Creates an inactive agent reading from `store`.
    pub fn new(
        agent_id: ActorId,
        config: SensorConfig,
        store: Arc<DetectionStore>,
        discovery: Arc<dyn PeerDiscovery>,
    ) -> Self {
        Self {
            agent_id,
            config,
            store,
            discovery,
            lifecycle: Mutex::new(Lifecycle::default()),
        }
    }

    fn lifecycle(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn agent_id(&self) -> ActorId {
        self.agent_id
    }

    /// The local store this agent broadcasts from.
    pub fn store(&self) -> &Arc<DetectionStore> {
        &self.store
    }

    /// Sets (or clears) the vehicle this agent rides on.
    pub fn set_owner(&self, owner: Option<ActorId>) {
        self.lifecycle().owner = owner;
    }

    pub fn owner(&self) -> Option<ActorId> {
        self.lifecycle().owner
    }

    pub fn state(&self) -> AgentState {
        if self.lifecycle().timer.is_some() {
            AgentState::Active
        } else {
            AgentState::Inactive
        }
    }

    pub fn stats(&self) -> BroadcastStats {
        self.lifecycle().stats
    }

    /// Arms the periodic broadcast timer.
    ///
    /// # Returns
    /// * `Ok(AgentState::Active)` - Timer armed (or already armed)
    /// * `Ok(AgentState::Inactive)` - No owner yet; nothing was armed
    /// * `Err(V2vError::Scheduler)` - The scheduler refused the timer
    pub fn activate(self: &Arc<Self>, scheduler: &dyn Scheduler) -> Result<AgentState, V2vError> {
        let mut lifecycle = self.lifecycle();
        if lifecycle.timer.is_some() {
            return Ok(AgentState::Active);
        }
        let Some(owner) = lifecycle.owner else {
            debug!(agent = %self.agent_id, "activation skipped: no owner");
            return Ok(AgentState::Inactive);
        };

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = scheduler.schedule(
            SensorConfig::BROADCAST_PERIOD,
            Box::new(move || {
                if let Some(agent) = weak.upgrade() {
                    if agent.state() == AgentState::Active {
                        agent.on_periodic_tick();
                    }
                }
            }),
        )?;
        lifecycle.timer = Some(handle);

        info!(
            agent = %self.agent_id,
            %owner,
            radius = self.config.broadcast_radius,
            "broadcast agent active"
        );
        Ok(AgentState::Active)
    }

    /// Disarms the timer. Returns true if the agent was active.
    pub fn deactivate(&self, scheduler: &dyn Scheduler) -> bool {
        let timer = self.lifecycle().timer.take();
        match timer {
            Some(handle) => {
                scheduler.cancel(handle);
                info!(agent = %self.agent_id, "broadcast agent inactive");
                true
            }
            None => false,
        }
    }

    /// Runs one broadcast cycle.
    ///
    /// 1. Empty local table: nothing is sent.
    /// 2. Peers within `broadcast_radius` of the owner are discovered afresh.
    /// 3. Every local entry is merged into every peer store with
    ///    `directly_observed = false`, since the receiver did not sense it.
    pub fn on_periodic_tick(&self) -> BroadcastReport {
        let Some(owner) = self.owner() else {
            return BroadcastReport::default();
        };

        // Copy out first so no two store locks are ever held together.
        let snapshot = self.store.snapshot();
        if snapshot.is_empty() {
            let mut lifecycle = self.lifecycle();
            lifecycle.stats.cycles += 1;
            lifecycle.stats.skipped_empty += 1;
            return BroadcastReport::default();
        }

        let relayed: Vec<WalkerObservation> = snapshot
            .into_iter()
            .map(|obs| WalkerObservation {
                directly_observed: false,
                ..obs
            })
            .collect();

        let mut report = BroadcastReport::default();
        for peer in self.discovery.peers_near(owner, self.config.broadcast_radius) {
            if Arc::ptr_eq(&peer.store, &self.store) {
                continue;
            }
            report.merges_applied += peer.store.merge_batch(relayed.iter().copied());
            report.entries_pushed += relayed.len();
            report.peers_reached += 1;
        }

        {
            let mut lifecycle = self.lifecycle();
            lifecycle.stats.cycles += 1;
            lifecycle.stats.peers_reached += report.peers_reached as u64;
            lifecycle.stats.entries_pushed += report.entries_pushed as u64;
            lifecycle.stats.merges_applied += report.merges_applied as u64;
        }

        debug!(
            agent = %self.agent_id,
            %owner,
            entries = relayed.len(),
            peers = report.peers_reached,
            applied = report.merges_applied,
            "broadcast cycle"
        );
        report
    }
}

impl std::fmt::Debug for BroadcastAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastAgent")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{AgentRegistry, AttachmentDiscovery};
    use crate::test_support::{ManualClock, StubWorld};
    use nalgebra::Vector3;
    use std::collections::HashMap;
    use std::time::Duration;
    use v2v_env::{ActorKind, EnvError, TimerCallback, WorldQuery};

    /// Scheduler that stores callbacks and fires them on demand.
    #[derive(Default)]
    struct ManualScheduler {
        next: Mutex<u64>,
        timers: Mutex<HashMap<TimerHandle, TimerCallback>>,
    }

    impl ManualScheduler {
        fn fire_all(&self) {
            let mut timers = self.timers.lock().unwrap();
            for callback in timers.values_mut() {
                callback();
            }
        }

        fn armed(&self) -> usize {
            self.timers.lock().unwrap().len()
        }
    }

    impl Scheduler for ManualScheduler {
        fn schedule(&self, _interval: Duration, callback: TimerCallback) -> Result<TimerHandle, EnvError> {
            let mut next = self.next.lock().unwrap();
            *next += 1;
            let handle = TimerHandle(*next);
            self.timers.lock().unwrap().insert(handle, callback);
            Ok(handle)
        }

        fn cancel(&self, handle: TimerHandle) -> bool {
            self.timers.lock().unwrap().remove(&handle).is_some()
        }
    }

    struct Fixture {
        world: Arc<StubWorld>,
        clock: Arc<ManualClock>,
        registry: Arc<AgentRegistry>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                world: Arc::new(StubWorld::new()),
                clock: Arc::new(ManualClock::new(10.0)),
                registry: AgentRegistry::shared(),
            }
        }

        /// Spawns a vehicle with an attached, registered agent.
        fn vehicle(&self, id: u64, x: f64) -> Arc<BroadcastAgent> {
            let vehicle = ActorId(id);
            let agent_id = ActorId(id + 1000);
            self.world.add(vehicle, ActorKind::Vehicle, Vector3::new(x, 0.0, 0.0));
            self.world.add(agent_id, ActorKind::Sensor, Vector3::new(x, 0.0, 0.0));
            self.world.set_owner(agent_id, vehicle);

            let world: Arc<dyn WorldQuery> = self.world.clone();
            let store = DetectionStore::shared(SensorConfig::default(), world.clone(), self.clock.clone());
            store.attach(vehicle);
            self.registry.register(agent_id, &store);

            let discovery = Arc::new(AttachmentDiscovery::new(world, Arc::clone(&self.registry)));
            let agent = Arc::new(BroadcastAgent::new(agent_id, SensorConfig::default(), store, discovery));
            agent.set_owner(Some(vehicle));
            agent
        }
    }

    #[test]
    fn test_scenario_e_push_within_radius() {
        let fx = Fixture::new();
        let a = fx.vehicle(1, 0.0);
        let b = fx.vehicle(2, 500.0);

        b.store().merge(ActorId(100), Vector3::new(510.0, 0.0, 0.0), 9.0, true);
        b.store().merge(ActorId(101), Vector3::new(520.0, 0.0, 0.0), 9.5, false);

        let report = b.on_periodic_tick();
        assert_eq!(
            report,
            BroadcastReport {
                peers_reached: 1,
                entries_pushed: 2,
                merges_applied: 2,
            }
        );

        let received = a.store().snapshot();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].walker_id, ActorId(100));
        assert_eq!(received[0].timestamp, 9.0);
        assert!(received.iter().all(|obs| !obs.directly_observed));

        // Re-broadcast of known entries changes nothing
        assert_eq!(b.on_periodic_tick().merges_applied, 0);
    }

    #[test]
    fn test_scenario_e_out_of_range() {
        let fx = Fixture::new();
        let a = fx.vehicle(1, 0.0);
        let b = fx.vehicle(2, 1000.5);
        b.store().merge(ActorId(100), Vector3::zeros(), 9.0, true);

        assert_eq!(b.on_periodic_tick().peers_reached, 0);
        assert!(a.store().is_empty());

        // Range is re-evaluated every cycle
        fx.world.move_to(ActorId(2), Vector3::new(800.0, 0.0, 0.0));
        assert_eq!(b.on_periodic_tick().peers_reached, 1);
        assert_eq!(a.store().len(), 1);
    }

    #[test]
    fn test_receiver_keeps_own_direct_flag() {
        let fx = Fixture::new();
        let a = fx.vehicle(1, 0.0);
        let b = fx.vehicle(2, 100.0);

        a.store().merge(ActorId(100), Vector3::zeros(), 5.0, true);
        b.store().merge(ActorId(100), Vector3::new(1.0, 0.0, 0.0), 7.0, true);
        b.on_periodic_tick();

        let obs = a.store().get(ActorId(100)).unwrap();
        assert_eq!(obs.timestamp, 7.0);
        assert_eq!(obs.location, Vector3::new(1.0, 0.0, 0.0));
        assert!(obs.directly_observed);
    }

    #[test]
    fn test_empty_table_sends_nothing() {
        let fx = Fixture::new();
        let _a = fx.vehicle(1, 0.0);
        let b = fx.vehicle(2, 100.0);

        assert_eq!(b.on_periodic_tick(), BroadcastReport::default());
        let stats = b.stats();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.skipped_empty, 1);
    }

    #[test]
    fn test_lifecycle_arms_and_disarms_timer() {
        let fx = Fixture::new();
        let a = fx.vehicle(1, 0.0);
        let b = fx.vehicle(2, 100.0);
        let scheduler = ManualScheduler::default();
        b.store().merge(ActorId(100), Vector3::zeros(), 9.0, true);

        assert_eq!(b.state(), AgentState::Inactive);
        assert_eq!(b.activate(&scheduler).unwrap(), AgentState::Active);
        assert_eq!(b.activate(&scheduler).unwrap(), AgentState::Active);
        assert_eq!(scheduler.armed(), 1);

        scheduler.fire_all();
        assert_eq!(a.store().len(), 1);
        assert_eq!(b.stats().cycles, 1);

        assert!(b.deactivate(&scheduler));
        assert!(!b.deactivate(&scheduler));
        assert_eq!(b.state(), AgentState::Inactive);
        assert_eq!(scheduler.armed(), 0);
    }

    #[test]
    fn test_activation_without_owner_is_noop() {
        let fx = Fixture::new();
        let agent = fx.vehicle(1, 0.0);
        agent.set_owner(None);
        let scheduler = ManualScheduler::default();

        assert_eq!(agent.activate(&scheduler).unwrap(), AgentState::Inactive);
        assert_eq!(scheduler.armed(), 0);
        assert_eq!(agent.on_periodic_tick(), BroadcastReport::default());
    }

    #[test]
    fn test_dropped_agent_callback_is_harmless() {
        let fx = Fixture::new();
        let _a = fx.vehicle(1, 0.0);
        let b = fx.vehicle(2, 100.0);
        let scheduler = ManualScheduler::default();
        b.activate(&scheduler).unwrap();

        drop(b);
        scheduler.fire_all();
    }
}
