//! gossim Core - Fundamental types for the gossip aggregation simulator
//!
//! This crate defines the leaf types every other layer builds on:
//! - Identifiers (NodeId, TimerKey) and simulated time (Tick)
//! - The shared decimal arithmetic context
//! - Seeded randomness and numeric generators
//! - Configuration lookup, the text wire codec and the reporting sink

pub mod config;
pub mod decimal;
pub mod error;
pub mod id;
pub mod random;
pub mod report;
pub mod time;
pub mod wire;

pub use config::*;
pub use decimal::*;
pub use error::*;
pub use id::*;
pub use random::*;
pub use report::*;
pub use time::*;
pub use wire::*;

pub use rust_decimal::Decimal;
