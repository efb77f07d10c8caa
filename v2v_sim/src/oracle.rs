//! Ground truth oracle for simulation.
//!
//! The Oracle owns the seeded RNG that decides where actors appear and how
//! walkers wander:
//! - Random placement of vehicles and walkers inside a square arena
//! - Random-walk heading changes for walkers (Gaussian turn rate)
//! - Reflection at the arena boundary
//! - Ground-truth walker positions for error metrics

use crate::physics::PhysicsWorld;

use nalgebra::Vector3;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use std::collections::HashMap;
use v2v_env::{ActorId, ActorKind, WorldQuery};

/// Turn-rate standard deviation for wandering walkers (rad/√s).
const WALKER_TURN_STD: f64 = 0.6;

/// The Oracle - seeded placement and walker motion.
pub struct Oracle {
    /// Physics seed (separate from the context seed)
    physics_seed: u64,

    rng: ChaCha8Rng,

    /// Half side length of the square arena centred on the origin
    half_extent: f64,

    /// Walkers the oracle moves around
    walkers: Vec<ActorId>,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed and arena size.
    pub fn new(physics_seed: u64, half_extent: f64) -> Self {
        Self {
            physics_seed,
            rng: ChaCha8Rng::seed_from_u64(physics_seed),
            half_extent: half_extent.abs().max(1.0),
            walkers: Vec::new(),
        }
    }

    pub fn physics_seed(&self) -> u64 {
        self.physics_seed
    }

    pub fn half_extent(&self) -> f64 {
        self.half_extent
    }

    /// Walkers under oracle control.
    pub fn walkers(&self) -> &[ActorId] {
        &self.walkers
    }

    /// A uniformly random point in the arena (z = 0).
    pub fn random_position(&mut self) -> Vector3<f64> {
        let h = self.half_extent;
        Vector3::new(self.rng.gen_range(-h..=h), self.rng.gen_range(-h..=h), 0.0)
    }

    /// A planar velocity with random heading and the given speed.
    pub fn random_velocity(&mut self, speed: f64) -> Vector3<f64> {
        let heading = self.rng.gen_range(0.0..std::f64::consts::TAU);
        Vector3::new(heading.cos(), heading.sin(), 0.0) * speed
    }

    /// Spawns a walker and puts it under oracle control.
    ///
    /// A positive `proxy_radius` wraps the walker in a hit proxy it owns.
    pub fn spawn_walker(
        &mut self,
        world: &PhysicsWorld,
        position: Vector3<f64>,
        velocity: Vector3<f64>,
        proxy_radius: f64,
    ) -> ActorId {
        let walker = world.spawn_walker(position, velocity);
        if proxy_radius > 0.0 {
            world.attach_hit_proxy(walker, proxy_radius);
        }
        self.walkers.push(walker);
        walker
    }

    /// Spawns `count` walkers at random positions with random headings.
    pub fn spawn_crowd(&mut self, world: &PhysicsWorld, count: usize, speed: f64, proxy_radius: f64) -> Vec<ActorId> {
        (0..count)
            .map(|_| {
                let position = self.random_position();
                let velocity = self.random_velocity(speed);
                self.spawn_walker(world, position, velocity, proxy_radius)
            })
            .collect()
    }

    /// Perturbs walker headings and reflects walkers at the arena edge.
    pub fn wander(&mut self, world: &PhysicsWorld, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        let Ok(turn) = Normal::new(0.0, WALKER_TURN_STD * dt.sqrt()) else {
            return;
        };

        for &walker in &self.walkers {
            let (Some(velocity), Some(position)) = (world.velocity_of(walker), world.location_of(walker)) else {
                continue;
            };

            let angle: f64 = turn.sample(&mut self.rng);
            let (sin, cos) = angle.sin_cos();
            let mut v = Vector3::new(velocity.x * cos - velocity.y * sin, velocity.x * sin + velocity.y * cos, 0.0);

            if position.x.abs() > self.half_extent && position.x * v.x > 0.0 {
                v.x = -v.x;
            }
            if position.y.abs() > self.half_extent && position.y * v.y > 0.0 {
                v.y = -v.y;
            }
            world.set_velocity(walker, v);
        }
    }

    /// True positions of every live walker.
    pub fn ground_truth(&self, world: &PhysicsWorld) -> HashMap<ActorId, Vector3<f64>> {
        world.positions_of(ActorKind::Walker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oracle_deterministic_placement() {
        let world1 = PhysicsWorld::new();
        let world2 = PhysicsWorld::new();
        let mut oracle1 = Oracle::new(42, 500.0);
        let mut oracle2 = Oracle::new(42, 500.0);

        oracle1.spawn_crowd(&world1, 5, 1.5, 1.0);
        oracle2.spawn_crowd(&world2, 5, 1.5, 1.0);

        // Same seed = same positions
        let mut a: Vec<_> = oracle1.ground_truth(&world1).into_iter().collect();
        let mut b: Vec<_> = oracle2.ground_truth(&world2).into_iter().collect();
        a.sort_by_key(|(id, _)| *id);
        b.sort_by_key(|(id, _)| *id);
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
        // Each walker also carries a proxy
        assert_eq!(world1.actor_count(), 10);
    }

    #[test]
    fn test_positions_inside_arena() {
        let mut oracle = Oracle::new(7, 100.0);
        for _ in 0..100 {
            let p = oracle.random_position();
            assert!(p.x.abs() <= 100.0 && p.y.abs() <= 100.0);
            assert_eq!(p.z, 0.0);
        }
        let v = oracle.random_velocity(2.0);
        assert!((v.norm() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_wander_keeps_speed_and_reflects() {
        let world = PhysicsWorld::new();
        let mut oracle = Oracle::new(1, 10.0);
        let walker = oracle.spawn_walker(&world, Vector3::new(11.0, 0.0, 0.0), Vector3::new(1.5, 0.0, 0.0), 0.0);

        oracle.wander(&world, 0.1);
        let v = world.velocity_of(walker).unwrap();
        assert!((v.norm() - 1.5).abs() < 1e-9);
        assert!(v.x < 0.0, "walker outside the arena must head back in");
    }
}
