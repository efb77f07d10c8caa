//! World query abstraction consumed by the V2V sensors.

use crate::types::{ActorId, ActorKind, RayHit};
use nalgebra::Vector3;

/// Read-only view of the physics world.
///
/// # Implementations
///
/// - **Production**: a bridge into the host engine's collision queries
/// - **Simulation**: `SimWorld`, kinematic spheres with exact intersection
///
/// # Query Flow
///
/// ```text
/// DetectionStore              WorldQuery
///   |                             |
///   |-- cast_ray(origin, dir) --->|
///   |<-- Some(RayHit) ------------|
///   |-- is_walker(hit.actor) ---->|
///   |-- owner_of(hit.actor) ----->|   (hit proxy attached to a walker)
/// ```
///
/// All methods must be non-blocking; they are called from inside
/// per-frame callbacks.
pub trait WorldQuery: Send + Sync {
    /// Casts a ray and returns the nearest hit within `max_range`.
    ///
    /// # Arguments
    /// * `origin` - World-space ray origin
    /// * `direction` - Direction of travel (need not be normalized)
    /// * `max_range` - Maximum trace distance
    /// * `ignore` - Actors whose volumes the ray passes through
    fn cast_ray(
        &self,
        origin: Vector3<f64>,
        direction: Vector3<f64>,
        max_range: f64,
        ignore: &[ActorId],
    ) -> Option<RayHit>;

    /// Returns all actors of the given kind inside a sphere.
    ///
    /// `None` disables kind filtering.
    fn actors_in_sphere(
        &self,
        center: Vector3<f64>,
        radius: f64,
        kind: Option<ActorKind>,
    ) -> Vec<ActorId>;

    /// Returns the actors physically attached to `actor`.
    fn attached_actors(&self, actor: ActorId) -> Vec<ActorId>;

    /// Returns the owner of `actor`, if it has one.
    fn owner_of(&self, actor: ActorId) -> Option<ActorId>;

    /// Returns the kind of `actor`, or `None` if it no longer exists.
    fn kind_of(&self, actor: ActorId) -> Option<ActorKind>;

    /// Returns the current world-space location of `actor`.
    fn location_of(&self, actor: ActorId) -> Option<Vector3<f64>>;

    /// Capability check: is this actor a pedestrian?
    fn is_walker(&self, actor: ActorId) -> bool {
        self.kind_of(actor) == Some(ActorKind::Walker)
    }
}
