//! Peer discovery for the broadcast cycle.
//!
//! Peers are found the physical way: overlap a sphere around the owning
//! vehicle, walk each nearby vehicle's attached actors, and keep the ones
//! that are registered broadcast agents. The lookup sits behind
//! [`PeerDiscovery`] so the agent is not coupled to any attachment model.

use crate::detection::DetectionStore;

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use tracing::trace;
use v2v_env::{ActorId, ActorKind, WorldQuery};

/// A reachable peer: the vehicle, its agent, and the store to push into.
#[derive(Clone)]
pub struct PeerLink {
    pub vehicle: ActorId,
    pub agent: ActorId,
    pub store: Arc<DetectionStore>,
}

impl std::fmt::Debug for PeerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerLink")
            .field("vehicle", &self.vehicle)
            .field("agent", &self.agent)
            .finish()
    }
}

/// Capability lookup: which agents can `vehicle` reach right now?
pub trait PeerDiscovery: Send + Sync {
    /// Returns peers on other vehicles within `radius` of `vehicle`.
    ///
    /// Must never include `vehicle` itself.
    fn peers_near(&self, vehicle: ActorId, radius: f64) -> Vec<PeerLink>;
}

/// Broadcast agents currently alive, keyed by the agent's actor id.
///
/// Holds weak references so a torn-down store is never kept alive here.
#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<HashMap<ActorId, Weak<DetectionStore>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Registers the store an agent pushes into.
    pub fn register(&self, agent: ActorId, store: &Arc<DetectionStore>) {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(agent, Arc::downgrade(store));
    }

    /// Removes an agent. Returns true if it was registered.
    pub fn unregister(&self, agent: ActorId) -> bool {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&agent)
            .is_some()
    }

    /// Returns the agent's store if it is still alive and attached.
    pub fn lookup(&self, agent: ActorId) -> Option<Arc<DetectionStore>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&agent)
            .and_then(Weak::upgrade)
            .filter(|store| store.is_active())
    }

    pub fn len(&self) -> usize {
        self.agents.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Discovery by sphere overlap plus attachment walk.
pub struct AttachmentDiscovery {
    world: Arc<dyn WorldQuery>,
    registry: Arc<AgentRegistry>,
}

impl AttachmentDiscovery {
    pub fn new(world: Arc<dyn WorldQuery>, registry: Arc<AgentRegistry>) -> Self {
        Self { world, registry }
    }
}

impl PeerDiscovery for AttachmentDiscovery {
    fn peers_near(&self, vehicle: ActorId, radius: f64) -> Vec<PeerLink> {
        let Some(center) = self.world.location_of(vehicle) else {
            return Vec::new();
        };

        let mut nearby = self
            .world
            .actors_in_sphere(center, radius, Some(ActorKind::Vehicle));
        nearby.retain(|v| *v != vehicle);
        nearby.sort_unstable();
        nearby.dedup();

        let mut peers = Vec::new();
        for other in nearby {
            for attached in self.world.attached_actors(other) {
                if let Some(store) = self.registry.lookup(attached) {
                    peers.push(PeerLink {
                        vehicle: other,
                        agent: attached,
                        store,
                    });
                }
            }
        }

        trace!(%vehicle, radius, peers = peers.len(), "peer discovery");
        peers
    }
}
