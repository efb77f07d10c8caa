//! The per-vehicle walker detection store.
//!
//! One `DetectionStore` holds everything a vehicle knows about nearby
//! pedestrians. It is written from two directions:
//! - its own rotating scan (`scan_tick`, once per frame)
//! - peer broadcast agents pushing their tables (`merge`, any thread)
//!
//! Every read and write goes through a single mutex, so a snapshot is always
//! a point-in-time view and never a half-applied merge.
//!
//! # Merge rule
//!
//! Last-writer-wins by timestamp with a sticky direct flag:
//!
//! ```text
//! stored = None                 -> insert incoming
//! incoming.ts >  stored.ts      -> location, ts := incoming; direct := stored.direct || incoming.direct
//! incoming.ts <= stored.ts      -> no-op (stale)
//! ```
//!
//! Equal timestamps never update, even when the location differs.
//!
//! Location and timestamp converge to the newest write regardless of
//! delivery order. The direct flag does not: a direct observation that
//! arrives after a newer relayed one is stale and leaves the flag clear.

use crate::config::SensorConfig;
use crate::error::{MergeOutcome, ScanOutcome};
use crate::observation::{DetectionTable, ScanCursor, WalkerObservation};

use nalgebra::Vector3;
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, trace};
use v2v_env::{ActorId, Clock, WorldQuery};

/// Running counters of merge outcomes, for metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub inserted: u64,
    pub updated: u64,
    pub stale: u64,
    pub evicted: u64,
    /// Own-scan hits that changed the table
    pub direct_detections: u64,
}

/// The read-only query surface for external consumers.
///
/// All three sequences come from one snapshot and are index-aligned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrackedWalkers {
    /// Locations relative to the owning vehicle
    pub relative_locations: Vec<Vector3<f64>>,

    /// Locations in world space
    pub world_locations: Vec<Vector3<f64>>,

    /// Whether each walker was seen by this vehicle's own scan
    pub directly_observed: Vec<bool>,
}

impl TrackedWalkers {
    pub fn len(&self) -> usize {
        self.world_locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world_locations.is_empty()
    }
}

/// Everything behind the store's lock.
#[derive(Debug, Default)]
struct StoreState {
    owner: Option<ActorId>,
    table: DetectionTable,
    cursor: ScanCursor,
    stats: MergeStats,
}

impl StoreState {
    fn merge(&mut self, incoming: WalkerObservation) -> MergeOutcome {
        if self.owner.is_none() {
            return MergeOutcome::Inert;
        }
        // A non-finite timestamp could never age out.
        if !incoming.timestamp.is_finite() {
            self.stats.stale += 1;
            return MergeOutcome::Stale;
        }

        match self.table.get_mut(&incoming.walker_id) {
            None => {
                self.table.insert(incoming.walker_id, incoming);
                self.stats.inserted += 1;
                MergeOutcome::Inserted
            }
            Some(stored) if incoming.timestamp > stored.timestamp => {
                stored.location = incoming.location;
                stored.timestamp = incoming.timestamp;
                stored.directly_observed |= incoming.directly_observed;
                self.stats.updated += 1;
                MergeOutcome::Updated
            }
            Some(stored) => {
                trace!(
                    walker = %incoming.walker_id,
                    stored_ts = stored.timestamp,
                    incoming_ts = incoming.timestamp,
                    "stale write rejected"
                );
                self.stats.stale += 1;
                MergeOutcome::Stale
            }
        }
    }

    fn evict_stale(&mut self, now: f64) -> usize {
        let before = self.table.len();
        self.table
            .retain(|_, obs| !obs.is_expired(now, SensorConfig::RETENTION_SECS));
        let evicted = before - self.table.len();
        self.stats.evicted += evicted as u64;
        evicted
    }

    fn live_entries(&self, now: f64) -> Vec<WalkerObservation> {
        self.table
            .values()
            .filter(|obs| !obs.is_expired(now, SensorConfig::RETENTION_SECS))
            .copied()
            .collect()
    }
}

/// One vehicle's authoritative knowledge of nearby walkers.
pub struct DetectionStore {
    config: SensorConfig,
    world: Arc<dyn WorldQuery>,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

impl DetectionStore {
    /// Creates an unattached (inert) store.
    pub fn new(config: SensorConfig, world: Arc<dyn WorldQuery>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            world,
            clock,
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Creates an Arc-wrapped store for sharing with broadcast agents.
    pub fn shared(config: SensorConfig, world: Arc<dyn WorldQuery>, clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self::new(config, world, clock))
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the store's configuration.
    pub fn config(&self) -> &SensorConfig {
        &self.config
    }

    /// Attaches the store to its owning vehicle, activating it.
    ///
    /// The table starts empty.
    pub fn attach(&self, owner: ActorId) {
        let mut state = self.state();
        *state = StoreState {
            owner: Some(owner),
            ..StoreState::default()
        };
        info!(%owner, trace_range = self.config.trace_range, "detection store attached");
    }

    /// Detaches from the owner and releases the table.
    ///
    /// Afterwards every operation is a no-op until the next `attach`.
    /// Returns the number of entries released.
    pub fn detach(&self) -> usize {
        let mut state = self.state();
        let released = state.table.len();
        if let Some(owner) = state.owner.take() {
            info!(%owner, released, "detection store detached");
        }
        state.table.clear();
        state.cursor = ScanCursor::default();
        released
    }

    /// Returns the owning vehicle, if attached.
    pub fn owner(&self) -> Option<ActorId> {
        self.state().owner
    }

    /// Returns true while the store is attached to an owner.
    pub fn is_active(&self) -> bool {
        self.state().owner.is_some()
    }

    /// Current scan heading in degrees.
    pub fn scan_angle(&self) -> f64 {
        self.state().cursor.angle()
    }

    /// Advances the rotating scan by one frame.
    ///
    /// Casts one ray at the current heading, merges a resolved walker as a
    /// direct observation, then rotates the cursor by
    /// `delta_secs * 360°` and evicts entries older than the retention window.
    pub fn scan_tick(&self, delta_secs: f64) -> ScanOutcome {
        let now = self.clock.now_secs();

        let (owner, cursor) = {
            let state = self.state();
            match state.owner {
                Some(owner) => (owner, state.cursor),
                None => return ScanOutcome::Inert,
            }
        };

        // World queries run outside the lock.
        let Some(origin) = self.world.location_of(owner) else {
            return ScanOutcome::Inert;
        };
        let mut ignore = self.world.attached_actors(owner);
        ignore.push(owner);

        let detection = self
            .world
            .cast_ray(origin, cursor.direction(), self.config.trace_range, &ignore)
            .and_then(|hit| self.resolve_walker(hit.actor).map(|walker| (walker, hit.impact_point)));

        let mut state = self.state();
        if state.owner != Some(owner) {
            // Detached or re-attached while the ray was in flight.
            return ScanOutcome::Inert;
        }

        let outcome = match detection {
            Some((walker, impact_point)) => {
                let merged = state.merge(WalkerObservation::new(walker, impact_point, now, true));
                if merged.is_applied() {
                    state.stats.direct_detections += 1;
                }
                debug!(
                    %owner,
                    %walker,
                    angle = cursor.angle(),
                    ?merged,
                    "walker detected"
                );
                ScanOutcome::Detected(walker)
            }
            None => ScanOutcome::NoDetection,
        };

        state.cursor.advance(delta_secs, SensorConfig::ANGULAR_SPEED_DEG);
        let evicted = state.evict_stale(now);
        if evicted > 0 {
            debug!(%owner, evicted, now, "evicted stale walkers");
        }

        outcome
    }

    /// Resolves a hit actor to a walker: the actor itself, or its owner.
    fn resolve_walker(&self, hit: ActorId) -> Option<ActorId> {
        if self.world.is_walker(hit) {
            return Some(hit);
        }
        self.world
            .owner_of(hit)
            .filter(|owner| self.world.is_walker(*owner))
    }

    /// Reconciles one incoming observation with the stored one.
    pub fn merge(
        &self,
        walker_id: ActorId,
        location: Vector3<f64>,
        timestamp: f64,
        directly_observed: bool,
    ) -> MergeOutcome {
        self.merge_observation(WalkerObservation::new(walker_id, location, timestamp, directly_observed))
    }

    /// Same as [`merge`](Self::merge), taking a whole observation.
    pub fn merge_observation(&self, observation: WalkerObservation) -> MergeOutcome {
        self.state().merge(observation)
    }

    /// Merges a batch under a single lock acquisition.
    ///
    /// Returns how many observations changed the store.
    pub fn merge_batch<I>(&self, observations: I) -> usize
    where
        I: IntoIterator<Item = WalkerObservation>,
    {
        let mut state = self.state();
        observations
            .into_iter()
            .map(|obs| state.merge(obs))
            .filter(MergeOutcome::is_applied)
            .count()
    }

    /// Evicts entries older than the retention window at time `now`.
    pub fn evict_stale(&self, now: f64) -> usize {
        self.state().evict_stale(now)
    }

    /// Returns a copy of all live entries, ordered by walker id.
    ///
    /// Entries past the retention window are excluded even if the sweep
    /// has not run yet this frame.
    pub fn snapshot(&self) -> Vec<WalkerObservation> {
        self.snapshot_at(self.clock.now_secs())
    }

    /// Snapshot as seen at an explicit time.
    pub fn snapshot_at(&self, now: f64) -> Vec<WalkerObservation> {
        self.state().live_entries(now)
    }

    /// Returns the live entry for one walker.
    pub fn get(&self, walker_id: ActorId) -> Option<WalkerObservation> {
        let now = self.clock.now_secs();
        self.state()
            .table
            .get(&walker_id)
            .filter(|obs| !obs.is_expired(now, SensorConfig::RETENTION_SECS))
            .copied()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge outcome counters since the last attach.
    pub fn stats(&self) -> MergeStats {
        self.state().stats
    }

    /// Relative locations, world locations and direct flags from one snapshot.
    ///
    /// Empty when the store is unattached.
    pub fn tracked_walkers(&self) -> TrackedWalkers {
        let now = self.clock.now_secs();
        let (owner, entries) = {
            let state = self.state();
            (state.owner, state.live_entries(now))
        };
        let Some(owner) = owner else {
            return TrackedWalkers::default();
        };
        let origin = self.world.location_of(owner).unwrap_or_else(Vector3::zeros);

        TrackedWalkers {
            relative_locations: entries.iter().map(|obs| obs.location - origin).collect(),
            world_locations: entries.iter().map(|obs| obs.location).collect(),
            directly_observed: entries.iter().map(|obs| obs.directly_observed).collect(),
        }
    }

    /// Walker locations relative to the owning vehicle.
    pub fn relative_locations(&self) -> Vec<Vector3<f64>> {
        self.tracked_walkers().relative_locations
    }

    /// Walker locations in world space.
    pub fn world_locations(&self) -> Vec<Vector3<f64>> {
        self.tracked_walkers().world_locations
    }

    /// Direct-observation flags, parallel to the location accessors.
    pub fn direct_observation_flags(&self) -> Vec<bool> {
        self.tracked_walkers().directly_observed
    }
}

impl std::fmt::Debug for DetectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("DetectionStore")
            .field("owner", &state.owner)
            .field("entries", &state.table.len())
            .field("scan_angle", &state.cursor.angle())
            .finish()
    }
}
