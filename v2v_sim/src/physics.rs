//! Kinematic physics world implementing `WorldQuery`.
//!
//! Every actor is a point with an optional collision sphere. Actors with a
//! parent ride along with it at a fixed offset; the parent doubles as the
//! owner, which is how hit proxies resolve to their walker and how
//! broadcast agents are found on their vehicle.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use v2v_env::{ActorId, ActorKind, RayHit, WorldQuery};

/// Collision radius of a vehicle body.
pub const VEHICLE_RADIUS: f64 = 2.0;

/// Collision radius of a walker body.
pub const WALKER_RADIUS: f64 = 0.5;

/// Attachment chains longer than this are treated as broken.
const MAX_ATTACH_DEPTH: usize = 8;

/// One simulated actor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimActor {
    pub id: ActorId,
    pub kind: ActorKind,

    /// World position for root actors; offset from the parent otherwise
    pub position: Vector3<f64>,

    /// Velocity in units/s (root actors only)
    pub velocity: Vector3<f64>,

    /// Collision sphere radius; 0 means rays pass through
    pub radius: f64,

    /// Attachment parent, also reported as owner
    pub parent: Option<ActorId>,
}

impl SimActor {
    fn root(id: ActorId, kind: ActorKind, position: Vector3<f64>, velocity: Vector3<f64>, radius: f64) -> Self {
        Self {
            id,
            kind,
            position,
            velocity,
            radius,
            parent: None,
        }
    }
}

#[derive(Debug, Default)]
struct Actors {
    next_id: u64,
    by_id: BTreeMap<ActorId, SimActor>,
}

impl Actors {
    fn allocate(&mut self) -> ActorId {
        self.next_id += 1;
        ActorId(self.next_id)
    }

    fn world_position(&self, id: ActorId) -> Option<Vector3<f64>> {
        let mut actor = self.by_id.get(&id)?;
        let mut position = actor.position;
        for _ in 0..MAX_ATTACH_DEPTH {
            match actor.parent {
                None => return Some(position),
                Some(parent) => {
                    actor = self.by_id.get(&parent)?;
                    position += actor.position;
                }
            }
        }
        None
    }
}

/// The physics world shared by every sensor in one simulation.
#[derive(Debug, Default)]
pub struct PhysicsWorld {
    actors: RwLock<Actors>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Actors> {
        self.actors.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Actors> {
        self.actors.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn_root(&self, kind: ActorKind, position: Vector3<f64>, velocity: Vector3<f64>, radius: f64) -> ActorId {
        let mut actors = self.write();
        let id = actors.allocate();
        actors
            .by_id
            .insert(id, SimActor::root(id, kind, position, velocity, radius));
        id
    }

    /// Spawns a vehicle body.
    pub fn spawn_vehicle(&self, position: Vector3<f64>, velocity: Vector3<f64>) -> ActorId {
        self.spawn_root(ActorKind::Vehicle, position, velocity, VEHICLE_RADIUS)
    }

    /// Spawns a walker body.
    pub fn spawn_walker(&self, position: Vector3<f64>, velocity: Vector3<f64>) -> ActorId {
        self.spawn_root(ActorKind::Walker, position, velocity, WALKER_RADIUS)
    }

    /// Attaches a new actor to `parent` at `offset`.
    ///
    /// Returns `None` if the parent does not exist.
    pub fn attach(&self, parent: ActorId, kind: ActorKind, offset: Vector3<f64>, radius: f64) -> Option<ActorId> {
        let mut actors = self.write();
        if !actors.by_id.contains_key(&parent) {
            return None;
        }
        let id = actors.allocate();
        actors.by_id.insert(
            id,
            SimActor {
                id,
                kind,
                position: offset,
                velocity: Vector3::zeros(),
                radius,
                parent: Some(parent),
            },
        );
        Some(id)
    }

    /// Attaches a sensor actor (no collision) to a vehicle.
    pub fn attach_sensor(&self, vehicle: ActorId) -> Option<ActorId> {
        self.attach(vehicle, ActorKind::Sensor, Vector3::zeros(), 0.0)
    }

    /// Wraps a walker in a larger collision proxy it owns.
    pub fn attach_hit_proxy(&self, walker: ActorId, radius: f64) -> Option<ActorId> {
        self.attach(walker, ActorKind::Prop, Vector3::zeros(), radius)
    }

    /// Removes an actor and everything attached to it.
    pub fn despawn(&self, id: ActorId) -> usize {
        let mut actors = self.write();
        let mut doomed = vec![id];
        let mut removed = 0;
        while let Some(next) = doomed.pop() {
            if actors.by_id.remove(&next).is_some() {
                removed += 1;
            }
            doomed.extend(
                actors
                    .by_id
                    .values()
                    .filter(|a| a.parent == Some(next))
                    .map(|a| a.id),
            );
        }
        removed
    }

    pub fn set_velocity(&self, id: ActorId, velocity: Vector3<f64>) {
        if let Some(actor) = self.write().by_id.get_mut(&id) {
            actor.velocity = velocity;
        }
    }

    pub fn set_position(&self, id: ActorId, position: Vector3<f64>) {
        if let Some(actor) = self.write().by_id.get_mut(&id) {
            actor.position = position;
        }
    }

    pub fn velocity_of(&self, id: ActorId) -> Option<Vector3<f64>> {
        self.read().by_id.get(&id).map(|a| a.velocity)
    }

    /// Advances every root actor by `dt` seconds at constant velocity.
    pub fn step(&self, dt: f64) {
        let mut actors = self.write();
        for actor in actors.by_id.values_mut() {
            if actor.parent.is_none() {
                actor.position += actor.velocity * dt;
            }
        }
    }

    /// World positions of all actors of one kind.
    pub fn positions_of(&self, kind: ActorKind) -> HashMap<ActorId, Vector3<f64>> {
        let actors = self.read();
        actors
            .by_id
            .values()
            .filter(|a| a.kind == kind)
            .filter_map(|a| actors.world_position(a.id).map(|p| (a.id, p)))
            .collect()
    }

    pub fn actor_count(&self) -> usize {
        self.read().by_id.len()
    }
}

/// Distance along a unit ray to the first intersection with a sphere.
///
/// A ray starting inside the sphere reports the exit point.
fn ray_sphere(origin: &Vector3<f64>, dir: &Vector3<f64>, center: &Vector3<f64>, radius: f64) -> Option<f64> {
    let oc = origin - center;
    let b = oc.dot(dir);
    let c = oc.norm_squared() - radius * radius;
    let disc = b * b - c;
    if disc < 0.0 {
        return None;
    }
    let sqrt_disc = disc.sqrt();
    let near = -b - sqrt_disc;
    let t = if near >= 0.0 { near } else { -b + sqrt_disc };
    (t >= 0.0).then_some(t)
}

impl WorldQuery for PhysicsWorld {
    fn cast_ray(
        &self,
        origin: Vector3<f64>,
        direction: Vector3<f64>,
        max_range: f64,
        ignore: &[ActorId],
    ) -> Option<RayHit> {
        let dir = direction.try_normalize(1e-12)?;
        let actors = self.read();

        let mut best: Option<RayHit> = None;
        for actor in actors.by_id.values() {
            if actor.radius <= 0.0 || ignore.contains(&actor.id) {
                continue;
            }
            let Some(center) = actors.world_position(actor.id) else {
                continue;
            };
            let Some(t) = ray_sphere(&origin, &dir, &center, actor.radius) else {
                continue;
            };
            if t <= max_range && best.map_or(true, |b| t < b.distance) {
                best = Some(RayHit::new(actor.id, origin + dir * t, t));
            }
        }
        best
    }

    fn actors_in_sphere(&self, center: Vector3<f64>, radius: f64, kind: Option<ActorKind>) -> Vec<ActorId> {
        let actors = self.read();
        actors
            .by_id
            .values()
            .filter(|a| kind.map_or(true, |k| a.kind == k))
            .filter(|a| {
                actors
                    .world_position(a.id)
                    .is_some_and(|p| (p - center).norm() <= radius)
            })
            .map(|a| a.id)
            .collect()
    }

    fn attached_actors(&self, actor: ActorId) -> Vec<ActorId> {
        self.read()
            .by_id
            .values()
            .filter(|a| a.parent == Some(actor))
            .map(|a| a.id)
            .collect()
    }

    fn owner_of(&self, actor: ActorId) -> Option<ActorId> {
        self.read().by_id.get(&actor).and_then(|a| a.parent)
    }

    fn kind_of(&self, actor: ActorId) -> Option<ActorKind> {
        self.read().by_id.get(&actor).map(|a| a.kind)
    }

    fn location_of(&self, actor: ActorId) -> Option<Vector3<f64>> {
        self.read().world_position(actor)
    }
}
