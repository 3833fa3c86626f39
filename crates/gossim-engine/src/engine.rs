//! ComEngine - the discrete-event scheduler
//!
//! The engine owns simulated time, the event queue, every node and the
//! repetition's random source. Applications draw from per-node streams
//! split off that source, so a node's draws do not depend on when other
//! nodes run. Each call to [`ComEngine::advance`] moves the clock to the
//! next tick and dispatches what is due there:
//!
//! - **Asynchronous model**: events are handled one at a time in
//!   `(tick, insertion)` order. Deliveries go to `on_receive`, timers to
//!   `on_tick`, and sends are put on the channel immediately.
//! - **Synchronous model**: every tick is a round. Deliveries and timers
//!   are buffered per node, then every active node runs
//!   `state_transition`, then every active node runs `message_generation`.
//!   Sends of the round are held back and put on the channel afterwards in
//!   ascending sender id order, so no node observes another node's output
//!   of the same round.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use gossim_core::{
    ConfigError, Decimal, MathContext, NodeId, Params, ReportSink, SimRng, Tick, TimerKey,
};
use rand::RngCore;
use tracing::{debug, trace};

use crate::app::{AppContext, AppSpawner, AppState, Application, InitArgs, RoundInput, Timer};
use crate::channel::{ChannelConfig, ChannelModel, ChannelStats};
use crate::churn::{Churn, ChurnPlan};
use crate::error::{AppResult, EngineError, SimError};
use crate::message::{Destination, Message, MessageTrace, Outgoing, SendOutcome};
use crate::node::Node;
use crate::queue::{EventKind, EventQueue};
use crate::topology::Topology;

/// How callbacks are driven
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionModel {
    /// Round based, with the two-phase transition/generation split
    #[default]
    Synchronous,
    /// Event based, one callback per event
    Asynchronous,
}

impl FromStr for ExecutionModel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sync" | "synchronous" => Ok(ExecutionModel::Synchronous),
            "async" | "asynchronous" => Ok(ExecutionModel::Asynchronous),
            other => Err(format!("unknown execution model {other:?}")),
        }
    }
}

impl fmt::Display for ExecutionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionModel::Synchronous => write!(f, "sync"),
            ExecutionModel::Asynchronous => write!(f, "async"),
        }
    }
}

/// Node order within a synchronous phase
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PhaseOrder {
    #[default]
    Ascending,
    /// A fresh permutation every phase, drawn from its own generator so the
    /// repetition's random source is untouched
    Shuffled { seed: u64 },
}

/// Engine configuration
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub model: ExecutionModel,
    /// Decimal context shared by every node
    pub math: MathContext,
    /// Default link behaviour
    pub channel: ChannelConfig,
    /// Broadcast over the overlay instead of the physical links
    pub overlay_broadcast: bool,
    pub phase_order: PhaseOrder,
    /// Last tick that is simulated
    pub max_ticks: u64,
    /// Record every delivery
    pub trace: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            model: ExecutionModel::Synchronous,
            math: MathContext::default(),
            channel: ChannelConfig::reliable(),
            overlay_broadcast: false,
            phase_order: PhaseOrder::Ascending,
            max_ticks: 1000,
            trace: false,
        }
    }
}

impl EngineConfig {
    /// Round based engine over reliable one-tick links
    pub fn synchronous() -> Self {
        Self::default()
    }

    /// Event based engine over reliable one-tick links
    pub fn asynchronous() -> Self {
        EngineConfig {
            model: ExecutionModel::Asynchronous,
            ..Self::default()
        }
    }

    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks;
        self
    }

    pub fn with_math(mut self, math: MathContext) -> Self {
        self.math = math;
        self
    }

    pub fn with_phase_order(mut self, phase_order: PhaseOrder) -> Self {
        self.phase_order = phase_order;
        self
    }

    pub fn with_trace(mut self, trace: bool) -> Self {
        self.trace = trace;
        self
    }

    pub fn with_overlay_broadcast(mut self, overlay_broadcast: bool) -> Self {
        self.overlay_broadcast = overlay_broadcast;
        self
    }

    /// Read the engine keys of a `simulation`-style section
    pub fn from_params(params: &Params<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let model = match params.raw("model") {
            Some(raw) => raw
                .parse()
                .map_err(|reason| ConfigError::malformed(params.section(), "model", &raw, reason))?,
            None => defaults.model,
        };
        let precision = params.get_or("precision", defaults.math.precision())?;
        let rounding = params.get_or("rounding", defaults.math.rounding())?;
        let loss_rate: f64 = params.get_or("lossRate", 0.0)?;
        if !(0.0..=1.0).contains(&loss_rate) {
            return Err(ConfigError::malformed(
                params.section(),
                "lossRate",
                &loss_rate.to_string(),
                "must be within [0, 1]",
            ));
        }
        let delay = params.get_or("delay", defaults.channel.delay.clone())?;
        Ok(EngineConfig {
            model,
            math: MathContext::new(precision, rounding),
            channel: ChannelConfig { loss_rate, delay },
            overlay_broadcast: params.flag("overlayBroadcast", false)?,
            phase_order: PhaseOrder::Ascending,
            max_ticks: params.get_or("maxTicks", defaults.max_ticks)?,
            trace: params.flag("trace", false)?,
        })
    }
}

/// Lifecycle of one engine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Initialized,
    Running(ExecutionModel),
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Initialized => write!(f, "initialized"),
            RunState::Running(model) => write!(f, "running ({model})"),
            RunState::Completed => write!(f, "completed"),
        }
    }
}

/// Everything an application may reach through its context
pub(crate) struct EngineCore {
    pub(crate) repetition: usize,
    pub(crate) now: Tick,
    pub(crate) config: EngineConfig,
    /// Channel draws: loss and delay
    pub(crate) rng: SimRng,
    /// Seed of the per-node streams handed to applications
    node_seed: u64,
    node_rngs: Vec<SimRng>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) init_estimates: BTreeMap<NodeId, Decimal>,
    queue: EventQueue,
    channel: ChannelModel,
    channel_stats: BTreeMap<(NodeId, NodeId), ChannelStats>,
    pending_timers: HashMap<TimerKey, NodeId>,
    next_timer: u64,
    /// Sends held back until the end of a synchronous round
    outbox: Vec<(NodeId, Outgoing)>,
    deferred: bool,
    trace: Option<MessageTrace>,
    spawner: Option<AppSpawner>,
}

impl EngineCore {
    pub(crate) fn node_ref(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// The node's own random stream. Within a synchronous phase each node
    /// draws only from its own stream, so processing order cannot change
    /// what any node draws.
    pub(crate) fn node_rng(&mut self, id: NodeId) -> &mut SimRng {
        let index = id.index();
        while self.node_rngs.len() <= index {
            let stream = self.node_rngs.len() as u64;
            self.node_rngs.push(SimRng::stream(self.node_seed, stream));
        }
        &mut self.node_rngs[index]
    }

    fn check_node(&self, id: NodeId) -> Result<(), EngineError> {
        if id.index() < self.nodes.len() {
            Ok(())
        } else {
            Err(EngineError::UnknownNode(id))
        }
    }

    /// Unknown ids are an error. A departed target is not: the send is
    /// accounted as lost and reported as [`SendOutcome::Departed`].
    pub(crate) fn send(
        &mut self,
        from: NodeId,
        to: Destination,
        payload: String,
    ) -> Result<SendOutcome, EngineError> {
        self.check_node(from)?;
        let departed = match to {
            Destination::Node(target) => {
                self.check_node(target)?;
                !self.node_ref(target).is_active()
            }
            Destination::Any => false,
        };
        let seq = self.node_mut(from).next_seq();
        if self.deferred {
            self.outbox.push((from, Outgoing { to, seq, payload }));
        } else {
            self.dispatch(from, to, seq, payload);
        }
        Ok(if departed {
            SendOutcome::Departed(seq)
        } else {
            SendOutcome::Sent(seq)
        })
    }

    /// Put a send on the channel, expanding broadcasts against the
    /// sender's current neighbors
    fn dispatch(&mut self, from: NodeId, to: Destination, seq: u64, payload: String) {
        match to {
            Destination::Node(target) => self.transmit(from, target, seq, payload),
            Destination::Any => {
                let node = self.node_ref(from);
                let targets: Vec<NodeId> = match node.overlay_links() {
                    Some(overlay) if self.config.overlay_broadcast => {
                        overlay.iter().copied().collect()
                    }
                    _ => node.links().iter().copied().collect(),
                };
                for target in targets {
                    self.transmit(from, target, seq, payload.clone());
                }
            }
        }
    }

    fn transmit(&mut self, from: NodeId, to: NodeId, seq: u64, payload: String) {
        self.node_mut(from).record_sent();
        self.channel_stats.entry((from, to)).or_default().sent += 1;

        let target_active = self.node_ref(to).is_active();
        if !target_active || self.channel.should_drop(from, to, &mut self.rng) {
            trace!(%from, %to, seq, "message lost");
            self.record_loss(from, to);
            return;
        }

        let delay = self.channel.sample_delay(from, to, &mut self.rng);
        let msg = Message {
            from,
            to,
            seq,
            sent_at: self.now,
            payload,
        };
        self.queue
            .push(self.now.saturating_add(delay), EventKind::Deliver(msg));
    }

    fn record_loss(&mut self, from: NodeId, to: NodeId) {
        self.node_mut(from).record_lost();
        self.channel_stats.entry((from, to)).or_default().lost += 1;
    }

    fn flush_outbox(&mut self) {
        let mut outbox = std::mem::take(&mut self.outbox);
        // stable: a sender's messages keep their send order
        outbox.sort_by_key(|(from, _)| *from);
        for (from, out) in outbox {
            self.dispatch(from, out.to, out.seq, out.payload);
        }
    }

    pub(crate) fn set_timeout(
        &mut self,
        node: NodeId,
        delay: u64,
        tag: u64,
    ) -> Result<TimerKey, EngineError> {
        if delay == 0 {
            return Err(EngineError::InvalidDelay(delay));
        }
        self.check_node(node)?;
        let key = TimerKey(self.next_timer);
        self.next_timer += 1;
        self.pending_timers.insert(key, node);
        self.queue.push(
            self.now.saturating_add(delay),
            EventKind::Timeout {
                node,
                key,
                tag,
                set_at: self.now,
            },
        );
        Ok(key)
    }

    pub(crate) fn reset_timeout(&mut self, node: NodeId, key: TimerKey) -> bool {
        match self.pending_timers.get(&key) {
            Some(owner) if *owner == node => {
                self.pending_timers.remove(&key);
                true
            }
            _ => false,
        }
    }

    /// Run one callback with the node's application taken out of its slot
    fn with_app<F>(&mut self, id: NodeId, report: &mut dyn ReportSink, f: F) -> Result<(), SimError>
    where
        F: FnOnce(&mut dyn Application, &mut AppContext<'_>) -> AppResult,
    {
        let index = id.index();
        let Some(mut app) = self.nodes.get_mut(index).and_then(|node| node.app.take()) else {
            return Err(EngineError::NotInstalled(id).into());
        };
        let result = {
            let mut ctx = AppContext {
                core: self,
                node: id,
                report,
            };
            f(app.as_mut(), &mut ctx)
        };
        if let Some(node) = self.nodes.get_mut(index) {
            if node.is_active() {
                node.app = Some(app);
            }
        }
        result.map_err(|source| SimError::Application {
            node: id,
            tick: self.now,
            source,
        })
    }

    /// Create the node's application and run first-phase init
    fn spawn(&mut self, id: NodeId, report: &mut dyn ReportSink) -> Result<(), SimError> {
        let Some(spawner) = self.spawner.as_ref() else {
            return Err(EngineError::NotInstalled(id).into());
        };
        let app = (spawner.constructor)();
        let config = Arc::clone(&spawner.config);
        let section = spawner.section.clone();
        self.node_mut(id).app = Some(app);

        let repetition = self.repetition;
        let node_count = self.nodes.len();
        self.with_app(id, report, |app, ctx| {
            let args = InitArgs {
                params: Params::new(config.as_ref(), repetition, &section),
                node_index: id.index(),
                repetition,
                node_count,
            };
            app.init(&args, ctx)
        })
    }

    fn snapshot_estimates(&mut self) {
        self.init_estimates = self
            .nodes
            .iter()
            .filter(|node| node.is_active())
            .filter_map(|node| node.app().map(|app| (node.id(), app.state().estimate)))
            .collect();
    }

    fn apply_churn(&mut self, change: Churn, report: &mut dyn ReportSink) -> Result<(), SimError> {
        match change {
            Churn::Depart(id) => {
                self.check_node(id)?;
                if !self.node_ref(id).is_active() {
                    return Ok(());
                }
                debug!(node = %id, tick = %self.now, "node departs");
                self.node_mut(id).depart();
                self.pending_timers.retain(|_, owner| *owner != id);
                let mut peers: Vec<NodeId> = self.node_ref(id).links().iter().copied().collect();
                if let Some(overlay) = self.node_ref(id).overlay_links() {
                    peers.extend(overlay.iter().copied());
                }
                for peer in peers {
                    let node = self.node_mut(peer);
                    if node.is_active() {
                        node.note_departure(id);
                    }
                }
                Ok(())
            }
            Churn::Arrive { node: id, links } => {
                while self.nodes.len() <= id.index() {
                    let slot = NodeId::from_index(self.nodes.len());
                    self.nodes.push(Node::absent(slot));
                }
                if self.node_ref(id).is_active() {
                    return Ok(());
                }
                let links: BTreeSet<NodeId> = links
                    .into_iter()
                    .filter(|peer| *peer != id)
                    .filter(|peer| self.nodes.get(peer.index()).map_or(false, Node::is_active))
                    .collect();
                debug!(node = %id, tick = %self.now, ?links, "node arrives");
                self.node_mut(id).arrive(links);
                let peers: Vec<NodeId> = self.node_ref(id).links().iter().copied().collect();
                for peer in peers {
                    self.node_mut(peer).note_arrival(id);
                }
                self.spawn(id, report)?;
                self.snapshot_estimates();
                self.with_app(id, report, |app, ctx| app.init2(ctx))
            }
        }
    }

    /// Count a delivery. False when the target departed while in flight.
    fn accept(&mut self, msg: &Message) -> bool {
        if !self.node_ref(msg.to).is_active() {
            trace!(from = %msg.from, to = %msg.to, seq = msg.seq, "target departed in flight");
            self.record_loss(msg.from, msg.to);
            return false;
        }
        self.node_mut(msg.to).record_received();
        self.channel_stats
            .entry((msg.from, msg.to))
            .or_default()
            .delivered += 1;
        if let Some(trace) = self.trace.as_mut() {
            trace.record(msg, self.now);
        }
        true
    }

    /// A fired timer if it is still pending and its owner is active
    fn fire(&mut self, node: NodeId, key: TimerKey, tag: u64, set_at: Tick) -> Option<Timer> {
        if self.pending_timers.remove(&key).is_none() {
            return None;
        }
        if !self.node_ref(node).is_active() {
            return None;
        }
        Some(Timer { key, tag, set_at })
    }
}

/// The communication engine of one repetition
pub struct ComEngine {
    core: EngineCore,
    state: RunState,
    phase_rng: Option<SimRng>,
}

impl ComEngine {
    /// Build the node table from `topology`, with optional overlay
    /// neighbor sets. `rng` is the repetition's random source; the per-node
    /// streams are split off it.
    pub fn new(
        topology: &Topology,
        overlay: Option<&Topology>,
        config: EngineConfig,
        repetition: usize,
        mut rng: SimRng,
    ) -> Self {
        let mut nodes: Vec<Node> = topology
            .nodes()
            .map(|id| Node::new(id, topology.neighbors(id).cloned().unwrap_or_default()))
            .collect();
        if let Some(overlay) = overlay {
            for node in nodes.iter_mut() {
                let links = overlay.neighbors(node.id()).cloned().unwrap_or_default();
                node.set_overlay(links);
            }
        }

        let phase_rng = match config.phase_order {
            PhaseOrder::Ascending => None,
            PhaseOrder::Shuffled { seed } => Some(SimRng::new(seed)),
        };
        let deferred = config.model == ExecutionModel::Synchronous;
        let trace = config.trace.then(MessageTrace::new);
        let node_seed = rng.next_u64();

        ComEngine {
            core: EngineCore {
                repetition,
                now: Tick::ZERO,
                channel: ChannelModel::new(config.channel.clone()),
                config,
                rng,
                node_seed,
                node_rngs: Vec::new(),
                nodes,
                init_estimates: BTreeMap::new(),
                queue: EventQueue::new(),
                channel_stats: BTreeMap::new(),
                pending_timers: HashMap::new(),
                next_timer: 0,
                outbox: Vec::new(),
                deferred,
                trace,
                spawner: None,
            },
            state: RunState::Initialized,
            phase_rng,
        }
    }

    /// Create and initialize an application on every node: first-phase
    /// init on all nodes, then `init2` on all nodes.
    pub fn install(
        &mut self,
        spawner: AppSpawner,
        report: &mut dyn ReportSink,
    ) -> Result<(), SimError> {
        if self.state != RunState::Initialized || self.core.spawner.is_some() {
            return Err(EngineError::InvalidState {
                expected: "initialized",
                actual: self.state.to_string(),
            }
            .into());
        }
        self.core.spawner = Some(spawner);

        let ids = self.active_ids();
        for id in &ids {
            self.core.spawn(*id, report)?;
        }
        self.core.snapshot_estimates();
        for id in &ids {
            self.core.with_app(*id, report, |app, ctx| app.init2(ctx))?;
        }
        self.core.flush_outbox();
        Ok(())
    }

    /// Queue every event of `plan`
    pub fn schedule_churn(&mut self, plan: &ChurnPlan) {
        for event in plan.events() {
            self.core
                .queue
                .push(event.at, EventKind::Churn(event.change.clone()));
        }
    }

    /// Move to the next tick and process it. Returns the tick processed, or
    /// `None` once the run has completed.
    pub fn advance(&mut self, report: &mut dyn ReportSink) -> Result<Option<Tick>, SimError> {
        let model = match self.state {
            RunState::Completed => return Ok(None),
            RunState::Initialized if self.core.spawner.is_none() => {
                return Err(EngineError::InvalidState {
                    expected: "installed",
                    actual: self.state.to_string(),
                }
                .into());
            }
            RunState::Initialized => {
                let model = self.core.config.model;
                self.state = RunState::Running(model);
                model
            }
            RunState::Running(model) => model,
        };

        let next = match model {
            ExecutionModel::Synchronous => Some(self.core.now.next()),
            ExecutionModel::Asynchronous => self.core.queue.peek_time(),
        };
        let next = match next {
            Some(tick) if tick.as_u64() <= self.core.config.max_ticks => tick,
            _ => {
                self.state = RunState::Completed;
                return Ok(None);
            }
        };
        self.core.now = next;

        match model {
            ExecutionModel::Synchronous => self.run_round(report)?,
            ExecutionModel::Asynchronous => self.run_events(report)?,
        }
        Ok(Some(next))
    }

    /// Advance until completion. Returns the last tick processed.
    pub fn run(&mut self, report: &mut dyn ReportSink) -> Result<Tick, SimError> {
        while self.advance(report)?.is_some() {}
        Ok(self.core.now)
    }

    /// Asynchronous dispatch of everything due now, one event at a time
    fn run_events(&mut self, report: &mut dyn ReportSink) -> Result<(), SimError> {
        let now = self.core.now;
        // handlers may schedule more events for this same tick only through
        // churn; timers and messages always land in the future
        for event in self.core.queue.pop_due(now) {
            match event.kind {
                EventKind::Deliver(msg) => {
                    if !self.core.accept(&msg) {
                        continue;
                    }
                    trace!(tick = %now, %msg, "deliver");
                    let to = msg.to;
                    self.core.with_app(to, report, |app, ctx| {
                        app.on_receive(&msg, ctx)?;
                        trace!(node = %to, status = %app.debug_on_receive_status(), "received");
                        Ok(())
                    })?;
                }
                EventKind::Timeout {
                    node,
                    key,
                    tag,
                    set_at,
                } => {
                    let Some(timer) = self.core.fire(node, key, tag, set_at) else {
                        continue;
                    };
                    trace!(tick = %now, %node, %key, tag, "timeout");
                    self.core.with_app(node, report, |app, ctx| {
                        app.on_tick(&timer, ctx)?;
                        trace!(%node, status = %app.debug_tick_status(), "ticked");
                        Ok(())
                    })?;
                }
                EventKind::Churn(change) => self.core.apply_churn(change, report)?,
            }
        }
        Ok(())
    }

    /// One synchronous round
    fn run_round(&mut self, report: &mut dyn ReportSink) -> Result<(), SimError> {
        let now = self.core.now;
        let mut inboxes: BTreeMap<NodeId, RoundInput> = BTreeMap::new();
        for event in self.core.queue.pop_due(now) {
            match event.kind {
                EventKind::Deliver(msg) => {
                    if self.core.accept(&msg) {
                        inboxes.entry(msg.to).or_default().messages.push(msg);
                    }
                }
                EventKind::Timeout {
                    node,
                    key,
                    tag,
                    set_at,
                } => {
                    if let Some(timer) = self.core.fire(node, key, tag, set_at) {
                        inboxes.entry(node).or_default().timeouts.push(timer);
                    }
                }
                EventKind::Churn(change) => self.core.apply_churn(change, report)?,
            }
        }

        let order = self.phase_order();
        for id in &order {
            let mut input = inboxes.remove(id).unwrap_or_default();
            input.messages.sort_by_key(|m| (m.from, m.seq));
            input.timeouts.sort_by_key(|t| t.key);
            trace!(
                tick = %now,
                node = %id,
                messages = input.messages.len(),
                timeouts = input.timeouts.len(),
                "state transition"
            );
            self.core
                .with_app(*id, report, |app, ctx| app.state_transition(input, ctx))?;
        }
        let order = self.phase_order();
        for id in &order {
            if self.core.node_ref(*id).has_app() {
                self.core
                    .with_app(*id, report, |app, ctx| app.message_generation(ctx))?;
            }
        }
        self.core.flush_outbox();
        Ok(())
    }

    fn phase_order(&mut self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .core
            .nodes
            .iter()
            .filter(|node| node.is_active() && node.has_app())
            .map(Node::id)
            .collect();
        if let Some(rng) = self.phase_rng.as_mut() {
            rng.shuffle(&mut ids);
        }
        ids
    }

    fn active_ids(&self) -> Vec<NodeId> {
        self.core
            .nodes
            .iter()
            .filter(|node| node.is_active())
            .map(Node::id)
            .collect()
    }

    pub fn now(&self) -> Tick {
        self.core.now
    }

    pub fn repetition(&self) -> usize {
        self.core.repetition
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.core.nodes.get(id.index())
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.core.nodes.iter()
    }

    pub fn active_nodes(&self) -> impl Iterator<Item = &Node> {
        self.core.nodes.iter().filter(|node| node.is_active())
    }

    /// Concrete application of `id`, if it runs an `A`
    pub fn app<A: Application + 'static>(&self, id: NodeId) -> Option<&A> {
        self.node(id)?.app()?.as_any().downcast_ref::<A>()
    }

    /// Snapshot of every active node's application
    pub fn app_states(&self) -> Vec<(NodeId, AppState)> {
        self.active_nodes()
            .filter_map(|node| node.app().map(|app| (node.id(), app.state())))
            .collect()
    }

    /// Per-link loss and delay overrides
    pub fn channel_mut(&mut self) -> &mut ChannelModel {
        &mut self.core.channel
    }

    pub fn channel_stats(&self, from: NodeId, to: NodeId) -> ChannelStats {
        self.core
            .channel_stats
            .get(&(from, to))
            .copied()
            .unwrap_or_default()
    }

    /// Every directed channel that carried traffic
    pub fn all_channel_stats(&self) -> impl Iterator<Item = (&(NodeId, NodeId), &ChannelStats)> {
        self.core.channel_stats.iter()
    }

    /// Sum over every channel
    pub fn channel_totals(&self) -> ChannelStats {
        self.core
            .channel_stats
            .values()
            .fold(ChannelStats::default(), |acc, s| ChannelStats {
                sent: acc.sent + s.sent,
                delivered: acc.delivered + s.delivered,
                lost: acc.lost + s.lost,
            })
    }

    pub fn pending_events(&self) -> usize {
        self.core.queue.len()
    }

    pub fn trace(&self) -> Option<&MessageTrace> {
        self.core.trace.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;

    use gossim_core::{MapConfig, MemoryReport, NullReport, NumericGenerator, WireReader, WireWriter};

    use super::*;
    use crate::message::TO_ANY;

    /// Floods its value once, then keeps the minimum it has seen
    #[derive(Default)]
    struct MinApp {
        value: u64,
        received: Vec<(NodeId, u64)>,
        ticks: u64,
        period: u64,
    }

    impl Application for MinApp {
        fn init(&mut self, args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult {
            self.value = 100 - args.node_index as u64;
            self.period = args.params.get_or("period", 0)?;
            if self.period > 0 {
                ctx.set_timeout(self.period, 7)?;
            }
            ctx.broadcast(WireWriter::new("M").field(self.value).finish())?;
            Ok(())
        }

        fn on_receive(&mut self, msg: &Message, _ctx: &mut AppContext<'_>) -> AppResult {
            let mut reader = WireReader::expect(&msg.payload, "M")?;
            let value: u64 = reader.read()?;
            self.received.push((msg.from, value));
            self.value = self.value.min(value);
            Ok(())
        }

        fn on_tick(&mut self, timer: &Timer, ctx: &mut AppContext<'_>) -> AppResult {
            assert_eq!(timer.tag, 7);
            self.ticks += 1;
            ctx.set_timeout(self.period, 7)?;
            Ok(())
        }

        fn state(&self) -> AppState {
            AppState {
                estimate: Decimal::from(self.value),
                aggregate: Decimal::from(self.value),
                input: Decimal::from(self.value),
                summary: format!("min={}", self.value),
            }
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn min_app() -> Box<dyn Application> {
        Box::<MinApp>::default()
    }

    fn spawner(config: MapConfig) -> AppSpawner {
        AppSpawner::new(min_app, "min", Arc::new(config))
    }

    fn engine(topology: &Topology, config: EngineConfig) -> ComEngine {
        ComEngine::new(topology, None, config, 0, SimRng::new(42))
    }

    #[test]
    fn test_requires_install() {
        let mut engine = engine(&Topology::line(2), EngineConfig::synchronous());
        let err = engine.advance(&mut NullReport).unwrap_err();
        assert!(matches!(err, SimError::Engine(EngineError::InvalidState { .. })));
    }

    #[test]
    fn test_install_twice_fails() {
        let mut engine = engine(&Topology::line(2), EngineConfig::synchronous());
        engine.install(spawner(MapConfig::new()), &mut NullReport).unwrap();
        assert!(engine
            .install(spawner(MapConfig::new()), &mut NullReport)
            .is_err());
    }

    #[test]
    fn test_sync_broadcast_delivered_next_round() {
        let mut engine = engine(&Topology::line(3), EngineConfig::synchronous());
        engine.install(spawner(MapConfig::new()), &mut NullReport).unwrap();

        // init sends are flushed at tick 0 and land at tick 1
        assert_eq!(engine.pending_events(), 4);
        assert_eq!(engine.advance(&mut NullReport).unwrap(), Some(Tick(1)));
        assert_eq!(engine.pending_events(), 0);

        let middle = engine.app::<MinApp>(NodeId(1)).unwrap();
        assert_eq!(middle.received, vec![(NodeId(0), 100), (NodeId(2), 98)]);
        assert_eq!(middle.value, 98);
        assert_eq!(engine.node(NodeId(1)).unwrap().counters().sent, 2);
        assert_eq!(engine.node(NodeId(1)).unwrap().counters().received, 2);
    }

    #[test]
    fn test_async_dispatch_in_time_order() {
        let mut engine = engine(&Topology::complete(3), EngineConfig::asynchronous());
        engine.install(spawner(MapConfig::new()), &mut NullReport).unwrap();
        let last = engine.run(&mut NullReport).unwrap();
        assert_eq!(last, Tick(1));
        assert_eq!(engine.state(), RunState::Completed);

        for id in 0..3 {
            assert_eq!(engine.app::<MinApp>(NodeId(id)).unwrap().value, 98);
        }
        // FIFO within the tick follows send order: node 0 sent first
        let first = engine.app::<MinApp>(NodeId(2)).unwrap();
        assert_eq!(first.received[0].0, NodeId(0));
    }

    #[test]
    fn test_max_ticks_bounds_sync_run() {
        let config = EngineConfig::synchronous().with_max_ticks(10);
        let mut engine = engine(&Topology::ring(4), config);
        engine
            .install(spawner(MapConfig::new().with("min", "period", 3)), &mut NullReport)
            .unwrap();
        assert_eq!(engine.run(&mut NullReport).unwrap(), Tick(10));
        // ticks at 3, 6 and 9
        assert_eq!(engine.app::<MinApp>(NodeId(0)).unwrap().ticks, 3);
        assert_eq!(engine.advance(&mut NullReport).unwrap(), None);
    }

    #[test]
    fn test_timer_rejects_zero_delay() {
        let mut engine = engine(&Topology::line(2), EngineConfig::synchronous());
        assert_eq!(
            engine.core.set_timeout(NodeId(0), 0, 0),
            Err(EngineError::InvalidDelay(0))
        );
    }

    #[test]
    fn test_reset_timeout_is_idempotent_and_owned() {
        let mut engine = engine(&Topology::line(2), EngineConfig::asynchronous());
        let key = engine.core.set_timeout(NodeId(0), 5, 0).unwrap();
        assert!(!engine.core.reset_timeout(NodeId(1), key));
        assert!(engine.core.reset_timeout(NodeId(0), key));
        assert!(!engine.core.reset_timeout(NodeId(0), key));
        assert!(!engine.core.reset_timeout(NodeId(0), TimerKey(999)));
    }

    #[test]
    fn test_send_to_unknown_node() {
        let mut engine = engine(&Topology::line(2), EngineConfig::asynchronous());
        assert_eq!(
            engine.core.send(NodeId(0), NodeId(9).into(), "x".into()),
            Err(EngineError::UnknownNode(NodeId(9)))
        );
        assert!(engine.core.send(NodeId(0), TO_ANY, "x".into()).is_ok());
    }

    #[test]
    fn test_send_to_departed_node_is_reported() {
        let mut engine = engine(&Topology::line(3), EngineConfig::asynchronous());
        engine
            .core
            .apply_churn(Churn::Depart(NodeId(2)), &mut NullReport)
            .unwrap();

        let outcome = engine.core.send(NodeId(1), NodeId(2).into(), "x".into()).unwrap();
        assert_eq!(outcome, SendOutcome::Departed(0));
        assert!(outcome.is_departed());
        let stats = engine.channel_stats(NodeId(1), NodeId(2));
        assert_eq!((stats.sent, stats.lost), (1, 1));

        let outcome = engine.core.send(NodeId(1), NodeId(0).into(), "x".into()).unwrap();
        assert_eq!(outcome, SendOutcome::Sent(1));
        assert_eq!(engine.channel_stats(NodeId(1), NodeId(0)).lost, 0);
    }

    #[test]
    fn test_huge_delay_saturates_delivery_time() {
        let channel = ChannelConfig::reliable().with_delay(NumericGenerator::Constant(1e25));
        let mut engine = engine(&Topology::line(2), EngineConfig::asynchronous().with_channel(channel));
        engine.core.now = Tick(5);
        engine.core.send(NodeId(0), NodeId(1).into(), "x".into()).unwrap();
        assert_eq!(engine.core.queue.peek_time(), Some(Tick::MAX));
    }

    #[test]
    fn test_huge_delay_run_completes() {
        let channel = ChannelConfig::reliable().with_delay(NumericGenerator::Constant(1e25));
        let config = EngineConfig::asynchronous()
            .with_channel(channel)
            .with_max_ticks(50);
        let mut engine = engine(&Topology::line(2), config);
        engine.install(spawner(MapConfig::new()), &mut NullReport).unwrap();
        engine.run(&mut NullReport).unwrap();
        assert_eq!(engine.channel_totals().in_flight(), 2);
        assert_eq!(engine.app::<MinApp>(NodeId(1)).unwrap().value, 99);
    }

    #[test]
    fn test_node_streams_differ() {
        let mut engine = engine(&Topology::line(2), EngineConfig::synchronous());
        let a = engine.core.node_rng(NodeId(0)).next_u64();
        let b = engine.core.node_rng(NodeId(1)).next_u64();
        assert_ne!(a, b);

        // a node's stream does not depend on whether others drew first
        let mut other = self::engine(&Topology::line(2), EngineConfig::synchronous());
        assert_eq!(other.core.node_rng(NodeId(1)).next_u64(), b);
    }

    #[test]
    fn test_lossy_accounting() {
        let config = EngineConfig::asynchronous().with_channel(ChannelConfig::lossy(0.5));
        let mut engine = engine(&Topology::complete(6), config);
        engine.install(spawner(MapConfig::new()), &mut NullReport).unwrap();
        engine.run(&mut NullReport).unwrap();

        let totals = engine.channel_totals();
        assert_eq!(totals.sent, 30);
        assert_eq!(totals.in_flight(), 0);
        assert!(totals.lost > 0 && totals.delivered > 0);
        for node in engine.nodes() {
            let c = node.counters();
            assert_eq!(c.sent, 5);
        }
    }

    #[test]
    fn test_departure_drops_in_flight_and_notifies_neighbors() {
        let mut engine = engine(&Topology::line(3), EngineConfig::asynchronous());
        engine.schedule_churn(&ChurnPlan::new().depart(0, 2));
        engine.install(spawner(MapConfig::new()), &mut NullReport).unwrap();
        engine.run(&mut NullReport).unwrap();

        assert!(!engine.node(NodeId(2)).unwrap().is_active());
        assert_eq!(engine.channel_stats(NodeId(1), NodeId(2)).lost, 1);
        let (_, leaving) = engine.node(NodeId(1)).unwrap().pending_churn();
        assert!(leaving.contains(&NodeId(2)));
        assert_eq!(engine.app_states().len(), 2);
    }

    #[test]
    fn test_arrival_spawns_application() {
        let mut engine = engine(&Topology::line(2), EngineConfig::synchronous().with_max_ticks(5));
        engine.schedule_churn(&ChurnPlan::new().arrive(2, 2, &[1]));
        engine.install(spawner(MapConfig::new()), &mut NullReport).unwrap();
        engine.run(&mut NullReport).unwrap();

        let newcomer = engine.node(NodeId(2)).unwrap();
        assert!(newcomer.is_active());
        assert_eq!(newcomer.links().len(), 1);
        // node 1 only links to 2 once it drains churn
        let (arriving, _) = engine.node(NodeId(1)).unwrap().pending_churn();
        assert!(arriving.contains(&NodeId(2)));
        assert_eq!(engine.app::<MinApp>(NodeId(1)).unwrap().value, 98);
    }

    #[test]
    fn test_trace_records_deliveries() {
        let config = EngineConfig::synchronous().with_trace(true);
        let mut engine = engine(&Topology::line(2), config);
        engine.install(spawner(MapConfig::new()), &mut MemoryReport::new()).unwrap();
        engine.advance(&mut NullReport).unwrap();
        let trace = engine.trace().unwrap();
        assert_eq!(trace.records(), ["0|1|0|0|1|M|100", "1|0|0|0|1|M|99"]);
    }

    #[test]
    fn test_model_parse() {
        assert_eq!("sync".parse(), Ok(ExecutionModel::Synchronous));
        assert_eq!("Asynchronous".parse(), Ok(ExecutionModel::Asynchronous));
        assert!("batch".parse::<ExecutionModel>().is_err());
    }

    #[test]
    fn test_config_from_params() {
        let source = MapConfig::new()
            .with("simulation", "model", "async")
            .with("simulation", "lossRate", 0.1)
            .with("simulation", "delay", "uniform;1;3")
            .with("simulation", "precision", 12)
            .with("simulation", "maxTicks", 50);
        let params = Params::new(&source, 0, "simulation");
        let config = EngineConfig::from_params(&params).unwrap();
        assert_eq!(config.model, ExecutionModel::Asynchronous);
        assert_eq!(config.math.precision(), 12);
        assert_eq!(config.max_ticks, 50);
        assert!((config.channel.loss_rate - 0.1).abs() < 1e-12);

        let bad = MapConfig::new().with("simulation", "lossRate", 2);
        let params = Params::new(&bad, 0, "simulation");
        assert!(EngineConfig::from_params(&params).is_err());
    }
}
