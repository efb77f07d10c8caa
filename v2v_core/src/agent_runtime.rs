//! Vehicle Runtime - wires one vehicle's store and broadcast agent together.
//!
//! This module provides the lifecycle layer between the two components and
//! the environment services (world, clock, scheduler).
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     VehicleRuntime                        │
//! │                                                           │
//! │   scan timer (every frame)      broadcast timer (1 s)     │
//! │          │                              │                 │
//! │   ┌──────▼─────────┐  snapshot  ┌───────▼────────┐        │
//! │   │ DetectionStore │◄───────────│ BroadcastAgent │──► peers
//! │   └──────▲─────────┘            └────────────────┘        │
//! │          │ merge                                          │
//! └──────────┼────────────────────────────────────────────────┘
//!            └── other vehicles' broadcast agents
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let runtime = VehicleRuntime::new(vehicle, agent_id, RuntimeConfig::default(), services);
//! runtime.activate(&scheduler)?;
//! // ... simulation runs ...
//! runtime.teardown(&scheduler);
//! ```

use crate::broadcast::{AgentState, BroadcastAgent};
use crate::config::SensorConfig;
use crate::detection::DetectionStore;
use crate::discovery::{AgentRegistry, AttachmentDiscovery, PeerDiscovery};
use crate::error::V2vError;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;
use v2v_env::{ActorId, Clock, Scheduler, TimerHandle, WorldQuery};

/// Configuration for one vehicle's sensor pair.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Logical name (for logging)
    pub name: String,

    /// Scan frame rate in Hz (default: 30)
    pub tick_rate_hz: u32,

    /// Ranges shared by store and agent
    pub sensor: SensorConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            name: "v2v-vehicle".to_string(),
            tick_rate_hz: 30,
            sensor: SensorConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Duration of one scan frame.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

/// Shared services every runtime in one world uses.
#[derive(Clone)]
pub struct RuntimeServices {
    pub world: Arc<dyn WorldQuery>,
    pub clock: Arc<dyn Clock>,
    pub registry: Arc<AgentRegistry>,
    pub discovery: Arc<dyn PeerDiscovery>,
}

impl RuntimeServices {
    /// Services with attachment-based discovery over `world`.
    pub fn new(world: Arc<dyn WorldQuery>, clock: Arc<dyn Clock>) -> Self {
        let registry = AgentRegistry::shared();
        let discovery = Arc::new(AttachmentDiscovery::new(Arc::clone(&world), Arc::clone(&registry)));
        Self {
            world,
            clock,
            registry,
            discovery,
        }
    }
}

/// One vehicle's detection store and broadcast agent, armed together.
pub struct VehicleRuntime {
    vehicle: ActorId,
    config: RuntimeConfig,
    store: Arc<DetectionStore>,
    agent: Arc<BroadcastAgent>,
    registry: Arc<AgentRegistry>,
    scan_timer: Mutex<Option<TimerHandle>>,
}

impl VehicleRuntime {
    /// Creates an inactive runtime for `vehicle`.
    ///
    /// `agent_id` is the actor the host attached to the vehicle for the
    /// broadcast agent; peers find us through it.
    pub fn new(vehicle: ActorId, agent_id: ActorId, config: RuntimeConfig, services: &RuntimeServices) -> Self {
        let store = DetectionStore::shared(config.sensor, Arc::clone(&services.world), Arc::clone(&services.clock));
        let agent = Arc::new(BroadcastAgent::new(
            agent_id,
            config.sensor,
            Arc::clone(&store),
            Arc::clone(&services.discovery),
        ));

        Self {
            vehicle,
            config,
            store,
            agent,
            registry: Arc::clone(&services.registry),
            scan_timer: Mutex::new(None),
        }
    }

    pub fn vehicle(&self) -> ActorId {
        self.vehicle
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn store(&self) -> &Arc<DetectionStore> {
        &self.store
    }

    pub fn agent(&self) -> &Arc<BroadcastAgent> {
        &self.agent
    }

    pub fn is_active(&self) -> bool {
        self.store.is_active()
    }

    /// Attaches both components and arms the scan and broadcast timers.
    ///
    /// The scan timer slot stays locked for the whole activation, so a
    /// concurrent second call returns without arming a duplicate.
    /// On scheduler failure everything armed so far is torn down again.
    pub fn activate(&self, scheduler: &dyn Scheduler) -> Result<(), V2vError> {
        let mut scan_timer = self.scan_timer.lock().unwrap_or_else(PoisonError::into_inner);
        if scan_timer.is_some() {
            return Ok(());
        }

        self.store.attach(self.vehicle);
        self.agent.set_owner(Some(self.vehicle));
        self.registry.register(self.agent.agent_id(), &self.store);

        let frame = self.config.frame_interval();
        let frame_secs = frame.as_secs_f64();
        let store = Arc::downgrade(&self.store);
        let scan = scheduler.schedule(
            frame,
            Box::new(move || {
                if let Some(store) = store.upgrade() {
                    store.scan_tick(frame_secs);
                }
            }),
        );

        let result = scan.map_err(V2vError::from).and_then(|handle| {
            *scan_timer = Some(handle);
            self.agent.activate(scheduler)
        });
        drop(scan_timer);

        match result {
            Ok(AgentState::Active) => {
                info!(name = %self.config.name, vehicle = %self.vehicle, "vehicle runtime active");
                Ok(())
            }
            Ok(AgentState::Inactive) => Ok(()),
            Err(e) => {
                self.teardown(scheduler);
                Err(e)
            }
        }
    }

    /// Stops both timers, unregisters the agent and releases the table.
    ///
    /// Any callback already in flight finds an inert store.
    pub fn teardown(&self, scheduler: &dyn Scheduler) {
        if let Some(handle) = self.scan_timer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            scheduler.cancel(handle);
        }
        self.agent.deactivate(scheduler);
        self.registry.unregister(self.agent.agent_id());
        self.agent.set_owner(None);
        let released = self.store.detach();

        info!(name = %self.config.name, vehicle = %self.vehicle, released, "vehicle runtime torn down");
    }
}
