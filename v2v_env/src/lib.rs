//! V2V Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the V2V walker
//! sharing components to run against either a host engine or the
//! deterministic simulation harness.
//!
//! # Core Concept: Opaque Services
//!
//! The sensors never touch a physics engine or timer wheel directly.
//! Everything they consume from the outside is intercepted here:
//! - World (`cast_ray()`, `actors_in_sphere()`, `attached_actors()`)
//! - Time (`now()`, `sleep()`)
//! - Scheduling (`schedule()`, `cancel()`)
//!
//! # Example
//!
//! ```ignore
//! use v2v_env::{Clock, Scheduler, WorldQuery};
//!
//! fn arm<S: Scheduler>(scheduler: &S, world: Arc<dyn WorldQuery>) {
//!     scheduler.schedule(Duration::from_secs(1), Box::new(move || {
//!         let nearby = world.actors_in_sphere(center, 1000.0, Some(ActorKind::Vehicle));
//!         // ...
//!     }))?;
//! }
//! ```

mod context;
mod error;
mod scheduler;
mod tokio_impl;
mod types;
mod world;

pub use context::{Clock, V2vContext};
pub use error::EnvError;
pub use scheduler::{check_interval, Scheduler, TimerCallback};
pub use tokio_impl::{TokioContext, TokioScheduler};
pub use types::{ActorId, ActorKind, RayHit, TimerHandle};
pub use world::WorldQuery;
