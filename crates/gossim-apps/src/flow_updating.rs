//! Flow updating
//!
//! Every edge carries a flow. A node's estimate is its input minus the sum
//! of its outgoing flows, so the network-wide sum of estimates equals the
//! sum of inputs whatever messages are lost. Each step a node averages its
//! estimate with what it believes its neighbors' estimates are, moves the
//! difference onto the corresponding flows and tells every neighbor the
//! negated flow together with its new estimate.
//!
//! Wire format: `F|flow|estimate|degree`, where `flow` is the receiver's
//! flow towards the sender and `degree` the sender's neighbor count.
//!
//! Optional parts:
//! - select-one: move towards the most divergent neighbor only, by the
//!   Metropolis weight `1 / (1 + max(own degree, neighbor degree))`, so
//!   that several nodes picking the same neighbor in one round cannot push
//!   it past the mean
//! - failure detector: neighbors silent for `fdTimeout` ticks are purged
//! - quiescence: stop sending once the estimate settles, with hysteresis

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};

use gossim_core::{to_f64, ConfigError, Decimal, MathContext, NodeId, Tick, WireReader, WireWriter};
use gossim_engine::{
    AppContext, AppError, AppResult, AppState, Application, ExecutionModel, InitArgs, Message,
    RoundInput, Timer,
};
use tracing::{debug, warn};

use crate::aggregate::Aggregation;

const FLOW: &str = "F";
const TICK: u64 = 0;

/// What a node keeps about one neighbor
#[derive(Clone, Debug, PartialEq)]
pub struct Neighbor {
    /// Flow from this node towards the neighbor
    pub flow: Decimal,
    /// Last known estimate of the neighbor
    pub estimate: Option<Decimal>,
    /// Highest sequence number applied
    pub last_seq: Option<u64>,
    pub last_heard: Tick,
    /// Neighbor count the neighbor last reported
    pub degree: Option<usize>,
}

impl Neighbor {
    fn new(now: Tick) -> Self {
        Neighbor {
            flow: Decimal::ZERO,
            estimate: None,
            last_seq: None,
            last_heard: now,
            degree: None,
        }
    }
}

#[derive(Clone, Debug, Default)]
struct Settings {
    select_one: bool,
    know_init_values: bool,
    fd_timeout: Option<u64>,
    quiescence: Option<Quiescence>,
}

/// Quiescence band: go quiet below `low`, wake above `high`
#[derive(Clone, Copy, Debug, PartialEq)]
struct Quiescence {
    low: f64,
    high: f64,
    grace: u64,
}

#[derive(Default)]
pub struct FlowUpdating {
    agg: Option<Aggregation>,
    math: MathContext,
    settings: Settings,
    estimate: Decimal,
    neighbors: BTreeMap<NodeId, Neighbor>,
    suspected: BTreeSet<NodeId>,
    fd_mistakes: u64,
    quiescent: bool,
    quiet_steps: u64,
    /// Set by a synchronous transition, consumed by message generation
    step_due: bool,
}

impl FlowUpdating {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate(&self) -> Decimal {
        self.estimate
    }

    /// Flow towards `peer`
    pub fn flow(&self, peer: NodeId) -> Option<Decimal> {
        self.neighbors.get(&peer).map(|n| n.flow)
    }

    pub fn neighbors(&self) -> &BTreeMap<NodeId, Neighbor> {
        &self.neighbors
    }

    pub fn suspected(&self) -> &BTreeSet<NodeId> {
        &self.suspected
    }

    pub fn fd_mistakes(&self) -> u64 {
        self.fd_mistakes
    }

    pub fn is_quiescent(&self) -> bool {
        self.quiescent
    }

    fn agg(&self) -> AppResult<&Aggregation> {
        self.agg
            .as_ref()
            .ok_or_else(|| AppError::Protocol("flow updating used before init".to_string()))
    }

    /// Input minus every outgoing flow
    fn local_estimate(&self) -> AppResult<Decimal> {
        let input = self.agg()?.input;
        let flows = self.math.sum(self.neighbors.values().map(|n| &n.flow))?;
        Ok(self.math.sub(input, flows)?)
    }

    /// Apply one flow message. Older messages from the same sender are
    /// discarded by sequence number.
    fn absorb(&mut self, msg: &Message, now: Tick) -> AppResult {
        let mut reader = WireReader::expect(&msg.payload, FLOW)?;
        let flow: Decimal = reader.read()?;
        let estimate: Decimal = reader.read()?;
        let degree: Option<usize> = reader.read_opt()?;

        if self.suspected.remove(&msg.from) {
            debug!(peer = %msg.from, "suspected neighbor heard again");
        }
        let neighbor = self
            .neighbors
            .entry(msg.from)
            .or_insert_with(|| Neighbor::new(now));
        if neighbor.last_seq.is_some_and(|seq| msg.seq <= seq) {
            return Ok(());
        }
        neighbor.last_seq = Some(msg.seq);
        neighbor.flow = flow;
        neighbor.estimate = Some(estimate);
        if degree.is_some() {
            neighbor.degree = degree;
        }
        Ok(())
    }

    fn register_reception(&mut self, from: NodeId, now: Tick) {
        if let Some(neighbor) = self.neighbors.get_mut(&from) {
            neighbor.last_heard = now;
        }
    }

    fn apply_churn(&mut self, ctx: &mut AppContext<'_>) {
        let delta = ctx.drain_churn();
        let now = ctx.now();
        for peer in delta.departed {
            self.neighbors.remove(&peer);
            self.suspected.remove(&peer);
        }
        for peer in delta.arrived {
            self.neighbors.entry(peer).or_insert_with(|| Neighbor::new(now));
        }
    }

    /// Purge neighbors silent for longer than the detector timeout
    fn detect_failures(&mut self, ctx: &mut AppContext<'_>) {
        let Some(timeout) = self.settings.fd_timeout else {
            return;
        };
        let now = ctx.now();
        let silent: Vec<NodeId> = self
            .neighbors
            .iter()
            .filter(|(_, n)| now.since(n.last_heard) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for peer in silent {
            self.neighbors.remove(&peer);
            self.suspected.insert(peer);
            if ctx.is_active(peer) {
                self.fd_mistakes += 1;
                ctx.record("fd_mistakes", 1.0);
                warn!(node = %ctx.node_id(), %peer, tick = %now, "live neighbor suspected");
            } else {
                debug!(node = %ctx.node_id(), %peer, tick = %now, "departed neighbor suspected");
            }
        }
    }

    /// Average with the known neighbors and move the differences onto the
    /// flows
    fn average(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        let own = self.local_estimate()?;
        let known: Vec<(NodeId, Decimal)> = self
            .neighbors
            .iter()
            .filter_map(|(id, n)| n.estimate.map(|e| (*id, e)))
            .collect();

        if self.settings.select_one {
            self.average_with_one(own, &known, ctx)?;
        } else if !known.is_empty() {
            let math = self.math;
            let total = math.add(own, math.sum(known.iter().map(|(_, e)| e))?)?;
            let average = math.div(total, Decimal::from(known.len() as u64 + 1))?;
            for (peer, estimate) in &known {
                if let Some(neighbor) = self.neighbors.get_mut(peer) {
                    neighbor.flow = math.add(neighbor.flow, math.sub(average, *estimate)?)?;
                    neighbor.estimate = Some(average);
                }
            }
        }
        self.estimate = self.local_estimate()?;
        Ok(())
    }

    /// Select-one step. Ties on divergence are broken at random.
    fn average_with_one(
        &mut self,
        own: Decimal,
        known: &[(NodeId, Decimal)],
        ctx: &mut AppContext<'_>,
    ) -> AppResult {
        let math = self.math;
        let mut widest = Decimal::ZERO;
        let mut tied: Vec<(NodeId, Decimal)> = Vec::new();
        for (peer, estimate) in known {
            let divergence = math.sub(own, *estimate)?.abs();
            if tied.is_empty() || divergence > widest {
                widest = divergence;
                tied.clear();
                tied.push((*peer, *estimate));
            } else if divergence == widest {
                tied.push((*peer, *estimate));
            }
        }
        let Some((peer, estimate)) = ctx.rng().choose(&tied).copied() else {
            return Ok(());
        };

        // a neighbor not heard from yet is assumed to know every node
        let own_degree = self.neighbors.len();
        let peer_degree = self
            .neighbors
            .get(&peer)
            .and_then(|n| n.degree)
            .unwrap_or_else(|| ctx.node_count().saturating_sub(1));
        let weight = Decimal::from(own_degree.max(peer_degree) as u64 + 1);
        let delta = math.div(math.sub(own, estimate)?, weight)?;
        if let Some(neighbor) = self.neighbors.get_mut(&peer) {
            neighbor.flow = math.add(neighbor.flow, delta)?;
            neighbor.estimate = Some(math.add(estimate, delta)?);
        }
        Ok(())
    }

    /// Update the quiescence state from the change of this step
    fn settle(&mut self, previous: Decimal) {
        let Some(band) = self.settings.quiescence else {
            return;
        };
        let before = to_f64(previous);
        let change = (to_f64(self.estimate) - before).abs();
        let relative = if before == 0.0 { change } else { change / before.abs() };
        if self.quiescent {
            if relative > band.high {
                self.quiescent = false;
                self.quiet_steps = 0;
            } else {
                self.quiet_steps += 1;
            }
        } else if relative < band.low {
            self.quiescent = true;
            self.quiet_steps = 0;
        }
    }

    /// Transition part of one step: churn, detector, averaging
    fn step(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        self.apply_churn(ctx);
        self.detect_failures(ctx);
        let previous = self.estimate;
        self.average(ctx)?;
        self.settle(previous);
        Ok(())
    }

    /// Generation part of one step: one flow message per neighbor
    fn emit(&self, ctx: &mut AppContext<'_>) -> AppResult {
        if let Some(band) = self.settings.quiescence {
            if self.quiescent && self.quiet_steps >= band.grace {
                return Ok(());
            }
        }
        for (peer, neighbor) in &self.neighbors {
            let payload = WireWriter::new(FLOW)
                .field(-neighbor.flow)
                .field(self.estimate)
                .field(self.neighbors.len())
                .finish();
            ctx.send(*peer, payload)?;
        }
        Ok(())
    }

    fn rearm(&self, ctx: &mut AppContext<'_>) -> AppResult {
        ctx.set_timeout(self.agg()?.tick_timeout, TICK)?;
        Ok(())
    }
}

impl Application for FlowUpdating {
    fn init(&mut self, args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult {
        let agg = Aggregation::read(args, ctx)?;
        let params = &args.params;
        self.math = ctx.math();

        let fd_timeout = if params.flag("fdEnabled", false)? {
            let timeout: u64 = params.get_or("fdTimeout", 3 * agg.tick_timeout)?;
            if timeout == 0 {
                return Err(
                    ConfigError::malformed(params.section(), "fdTimeout", "0", "must be positive")
                        .into(),
                );
            }
            Some(timeout)
        } else {
            None
        };
        let quiescence = if params.flag("quiescenceEnabled", false)? {
            let low: f64 = params.get_or("quiescenceError", 1e-6)?;
            let high: f64 = params.get_or("awakeError", 1e-4)?;
            if !(0.0 <= low && low <= high) {
                return Err(ConfigError::Invalid(format!(
                    "[{}] quiescenceError {low} must not exceed awakeError {high}",
                    params.section()
                ))
                .into());
            }
            Some(Quiescence {
                low,
                high,
                grace: params.get_or("quiescenceGrace", 3)?,
            })
        } else {
            None
        };
        self.settings = Settings {
            select_one: params.flag("selectOne", false)?,
            know_init_values: params.flag("knowNeighborsInitValues", false)?,
            fd_timeout,
            quiescence,
        };

        let now = ctx.now();
        self.neighbors = ctx
            .links()
            .iter()
            .map(|peer| (*peer, Neighbor::new(now)))
            .collect();
        self.estimate = agg.input;
        ctx.set_timeout(agg.tick_timeout, TICK)?;
        self.agg = Some(agg);
        Ok(())
    }

    fn init2(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        if !self.settings.know_init_values {
            return Ok(());
        }
        for (peer, neighbor) in self.neighbors.iter_mut() {
            neighbor.estimate = ctx.initial_estimate(*peer);
        }
        Ok(())
    }

    fn on_receive(&mut self, msg: &Message, ctx: &mut AppContext<'_>) -> AppResult {
        // late messages from a departed neighbor would resurrect its flow
        if !ctx.is_active(msg.from) {
            return Ok(());
        }
        let now = ctx.now();
        self.absorb(msg, now)?;
        self.register_reception(msg.from, now);
        Ok(())
    }

    fn on_tick(&mut self, timer: &Timer, ctx: &mut AppContext<'_>) -> AppResult {
        if timer.tag != TICK {
            return Err(AppError::Protocol(format!(
                "unexpected flow updating timer tag {}",
                timer.tag
            )));
        }
        self.rearm(ctx)?;
        self.step(ctx)?;
        if ctx.model() == ExecutionModel::Synchronous {
            self.step_due = true;
            Ok(())
        } else {
            self.emit(ctx)
        }
    }

    fn state_transition(&mut self, input: RoundInput, ctx: &mut AppContext<'_>) -> AppResult {
        let now = ctx.now();
        let live: Vec<&Message> = input
            .messages
            .iter()
            .filter(|msg| ctx.is_active(msg.from))
            .collect();
        for msg in &live {
            self.absorb(msg, now)?;
        }
        // the detector sees this round's senders only after every message
        // of the round has been applied
        for msg in &live {
            self.register_reception(msg.from, now);
        }
        for timer in &input.timeouts {
            self.on_tick(timer, ctx)?;
        }
        Ok(())
    }

    fn message_generation(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        if std::mem::take(&mut self.step_due) {
            self.emit(ctx)?;
        }
        Ok(())
    }

    fn state(&self) -> AppState {
        let (aggregate, input) = match &self.agg {
            Some(agg) => (
                agg.report(self.estimate, &self.math),
                agg.input,
            ),
            None => (self.estimate, self.estimate),
        };
        AppState {
            estimate: self.estimate,
            aggregate,
            input,
            summary: format!(
                "neighbors={} suspected={} quiescent={} fd_mistakes={}",
                self.neighbors.len(),
                self.suspected.len(),
                self.quiescent,
                self.fd_mistakes
            ),
        }
    }

    fn debug_on_receive_status(&self) -> String {
        self.neighbors
            .iter()
            .map(|(id, n)| format!("{id}:{}", n.flow))
            .collect::<Vec<_>>()
            .join(",")
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
