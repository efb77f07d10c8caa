//! V2V Deterministic Simulation Harness
//!
//! This crate runs the whole walker-sharing system against a virtual clock
//! and a kinematic world, so every scan, broadcast and merge is a pure
//! function of the seed.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────┐   ┌──────────────┐   ┌────────────────┐   │
//! │  │  SimContext  │   │ SimScheduler │   │  PhysicsWorld  │   │
//! │  │ (virtual     │──►│ (timer wheel)│   │ (rays, spheres,│   │
//! │  │  clock)      │   └──────┬───────┘   │  attachments)  │   │
//! │  └──────────────┘          │           └───────▲────────┘   │
//! │                 ┌──────────▼─────────┐         │            │
//! │                 │  VehicleRuntime ×N │─────────┘            │
//! │                 │ (store + agent)    │                      │
//! │                 └──────────▲─────────┘                      │
//! │                 ┌──────────┴─────────┐                      │
//! │                 │       Oracle       │                      │
//! │                 │ (seeded placement) │                      │
//! │                 └────────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use v2v_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42, 8).run(ScenarioId::Handoff);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod exporter;
mod oracle;
mod physics;
mod runner;
mod scheduler;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use error::SimError;
pub use exporter::{EntityPosition, SimEvent, SimExport, SimFrame, VehicleFrame};
pub use oracle::Oracle;
pub use physics::{PhysicsWorld, SimActor, VEHICLE_RADIUS, WALKER_RADIUS};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scheduler::SimScheduler;
pub use world::{SimConfig, SimWorld};
