//! Application contract
//!
//! Every gossip or aggregation algorithm is an [`Application`]: a state
//! machine driven by the engine through message deliveries, one-shot
//! timers and, in the synchronous model, the two-phase round split of
//! [`Application::state_transition`] and [`Application::message_generation`].
//!
//! Applications talk back to the engine only through [`AppContext`]. The
//! engine stays algorithm-agnostic; algorithms are picked by name from an
//! [`AppRegistry`].

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gossim_core::{ConfigSource, Decimal, MathContext, NodeId, Params, ReportSink, SimRng, Tick, TimerKey};

use crate::churn::ChurnDelta;
use crate::engine::{EngineCore, ExecutionModel};
use crate::error::{AppResult, EngineError, SimError};
use crate::message::{Destination, Message, SendOutcome, TO_ANY};

/// Arguments of first-phase initialization
pub struct InitArgs<'a> {
    /// Parameters of the algorithm's configuration section
    pub params: Params<'a>,
    pub node_index: usize,
    pub repetition: usize,
    /// Size of the node table when the node was created
    pub node_count: usize,
}

/// A fired one-shot timer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timer {
    pub key: TimerKey,
    /// Application-defined data passed to `set_timeout`
    pub tag: u64,
    pub set_at: Tick,
}

/// Everything addressed to one node in one synchronous round
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoundInput {
    /// Sorted by `(from, seq)`
    pub messages: Vec<Message>,
    /// Sorted by key
    pub timeouts: Vec<Timer>,
}

/// Reporting snapshot of an application
#[derive(Clone, Debug, PartialEq)]
pub struct AppState {
    /// The raw converging quantity
    pub estimate: Decimal,
    /// The reportable aggregate derived from the estimate
    pub aggregate: Decimal,
    /// This node's contribution to the true aggregate
    pub input: Decimal,
    /// Algorithm-specific text, stable within a run
    pub summary: String,
}

/// A distributed algorithm running on one node
pub trait Application {
    /// Read parameters and set the initial state. Neighbor state is sized
    /// from `ctx.links()`.
    fn init(&mut self, args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult;

    /// Second-phase init, run once every node has finished [`init`](Self::init)
    fn init2(&mut self, _ctx: &mut AppContext<'_>) -> AppResult {
        Ok(())
    }

    /// One delivered message
    fn on_receive(&mut self, msg: &Message, ctx: &mut AppContext<'_>) -> AppResult;

    /// One fired timer. Periodic behaviour re-arms a new timer here.
    fn on_tick(&mut self, timer: &Timer, ctx: &mut AppContext<'_>) -> AppResult;

    /// First phase of a synchronous round. Sends made here are held back
    /// until every node has run both phases.
    fn state_transition(&mut self, input: RoundInput, ctx: &mut AppContext<'_>) -> AppResult {
        for msg in &input.messages {
            self.on_receive(msg, ctx)?;
        }
        for timer in &input.timeouts {
            self.on_tick(timer, ctx)?;
        }
        Ok(())
    }

    /// Second phase of a synchronous round
    fn message_generation(&mut self, _ctx: &mut AppContext<'_>) -> AppResult {
        Ok(())
    }

    fn state(&self) -> AppState;

    fn debug_on_receive_status(&self) -> String {
        String::new()
    }

    fn debug_tick_status(&self) -> String {
        String::new()
    }

    /// Concrete type access for inspection in tests and tooling
    fn as_any(&self) -> &dyn Any;
}

/// Creates a fresh application instance
pub type AppConstructor = fn() -> Box<dyn Application>;

/// Algorithm name to constructor
#[derive(Clone, Default)]
pub struct AppRegistry {
    constructors: BTreeMap<String, AppConstructor>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: &str, constructor: AppConstructor) -> &mut Self {
        self.constructors.insert(name.to_string(), constructor);
        self
    }

    pub fn with(mut self, name: &str, constructor: AppConstructor) -> Self {
        self.register(name, constructor);
        self
    }

    pub fn get(&self, name: &str) -> Result<AppConstructor, SimError> {
        self.constructors
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownAlgorithm(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.constructors.keys().map(String::as_str)
    }
}

/// How the engine creates applications, at install time and on arrival
#[derive(Clone)]
pub struct AppSpawner {
    pub constructor: AppConstructor,
    /// Configuration section holding the algorithm's parameters
    pub section: String,
    pub config: Arc<dyn ConfigSource>,
}

impl AppSpawner {
    pub fn new(constructor: AppConstructor, section: &str, config: Arc<dyn ConfigSource>) -> Self {
        AppSpawner {
            constructor,
            section: section.to_string(),
            config,
        }
    }
}

/// An application's view of the engine during one callback
pub struct AppContext<'a> {
    pub(crate) core: &'a mut EngineCore,
    pub(crate) node: NodeId,
    pub(crate) report: &'a mut dyn ReportSink,
}

impl<'a> AppContext<'a> {
    pub fn now(&self) -> Tick {
        self.core.now
    }

    pub fn node_id(&self) -> NodeId {
        self.node
    }

    pub fn repetition(&self) -> usize {
        self.core.repetition
    }

    pub fn model(&self) -> ExecutionModel {
        self.core.config.model
    }

    pub fn math(&self) -> MathContext {
        self.core.config.math
    }

    /// This node's random stream, derived from the repetition's source
    pub fn rng(&mut self) -> &mut SimRng {
        self.core.node_rng(self.node)
    }

    /// Current physical neighbors
    pub fn links(&self) -> &BTreeSet<NodeId> {
        self.core.node_ref(self.node).links()
    }

    pub fn overlay_links(&self) -> Option<&BTreeSet<NodeId>> {
        self.core.node_ref(self.node).overlay_links()
    }

    /// Whether `peer` exists and has not departed
    pub fn is_active(&self, peer: NodeId) -> bool {
        self.core
            .nodes
            .get(peer.index())
            .map_or(false, |node| node.is_active())
    }

    pub fn node_count(&self) -> usize {
        self.core.nodes.len()
    }

    /// Unicast (or broadcast, with [`TO_ANY`]). A target that has left
    /// yields [`SendOutcome::Departed`]; an id that never existed is an
    /// error.
    pub fn send(
        &mut self,
        to: impl Into<Destination>,
        payload: String,
    ) -> Result<SendOutcome, EngineError> {
        self.core.send(self.node, to.into(), payload)
    }

    /// One message per current neighbor, sharing a sequence number, which
    /// is returned
    pub fn broadcast(&mut self, payload: String) -> Result<u64, EngineError> {
        self.core.send(self.node, TO_ANY, payload).map(SendOutcome::seq)
    }

    /// One-shot timer `delay` ticks from now
    pub fn set_timeout(&mut self, delay: u64, tag: u64) -> Result<TimerKey, EngineError> {
        self.core.set_timeout(self.node, delay, tag)
    }

    /// Cancel a pending timer. False if it already fired or is unknown.
    pub fn reset_timeout(&mut self, key: TimerKey) -> bool {
        self.core.reset_timeout(self.node, key)
    }

    /// Apply pending neighbor arrivals/departures to the link set and
    /// return them
    pub fn drain_churn(&mut self) -> ChurnDelta {
        self.core.node_mut(self.node).drain_churn()
    }

    /// Record a metric sample at the current tick
    pub fn record(&mut self, metric: &str, value: f64) {
        self.report
            .record(self.core.repetition, self.core.now, metric, value);
    }

    /// Estimate of `peer` right after first-phase init
    pub fn initial_estimate(&self, peer: NodeId) -> Option<Decimal> {
        self.core.init_estimates.get(&peer).copied()
    }
}
