//! gossim Apps - Distributed aggregation algorithms
//!
//! Four [`Application`](gossim_engine::Application) implementations:
//! - [`Drg`]: leader election in random groups
//! - [`FlowUpdating`]: flow-based averaging, tolerant to message loss
//! - [`PushPull`]: pairwise averaging with a random neighbor
//! - [`PushSum`]: mass-conserving (sum, weight) gossip
//!
//! [`default_registry`] maps their configuration names to constructors.

pub mod aggregate;
pub mod drg;
pub mod flow_updating;
pub mod push_pull;
pub mod push_sum;

pub use aggregate::*;
pub use drg::*;
pub use flow_updating::*;
pub use push_pull::*;
pub use push_sum::*;

use gossim_engine::{AppRegistry, Application};

pub const DRG: &str = "drg";
pub const FLOW_UPDATING: &str = "flow-updating";
pub const PUSH_PULL: &str = "push-pull";
pub const PUSH_SUM: &str = "push-sum";

fn drg() -> Box<dyn Application> {
    Box::new(Drg::new())
}

fn flow_updating() -> Box<dyn Application> {
    Box::new(FlowUpdating::new())
}

fn push_pull() -> Box<dyn Application> {
    Box::new(PushPull::new())
}

fn push_sum() -> Box<dyn Application> {
    Box::new(PushSum::new())
}

/// Registry with every algorithm of this crate
pub fn default_registry() -> AppRegistry {
    AppRegistry::new()
        .with(DRG, drg)
        .with(FLOW_UPDATING, flow_updating)
        .with(PUSH_PULL, push_pull)
        .with(PUSH_SUM, push_sum)
}
