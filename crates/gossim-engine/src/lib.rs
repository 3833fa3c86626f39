//! gossim Engine - Discrete-event communication engine
//!
//! This crate drives simulated nodes running gossip/aggregation algorithms:
//! - Message envelopes, topologies and the lossy, delaying channel model
//! - The deterministic event queue and the [`ComEngine`] scheduler with its
//!   synchronous (two-phase round) and asynchronous (per-event) models
//! - The [`Application`] contract every algorithm implements
//! - Churn, network statistics and the per-repetition [`Simulation`]

pub mod app;
pub mod channel;
pub mod churn;
pub mod engine;
pub mod error;
pub mod message;
pub mod node;
pub mod queue;
pub mod simulation;
pub mod stats;
pub mod topology;

pub use app::*;
pub use channel::*;
pub use churn::*;
pub use engine::{ComEngine, EngineConfig, ExecutionModel, PhaseOrder, RunState};
pub use error::*;
pub use message::*;
pub use node::*;
pub use queue::*;
pub use simulation::*;
pub use stats::*;
pub use topology::*;
