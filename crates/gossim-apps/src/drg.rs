//! DRG - distributed random grouping
//!
//! Aggregation by repeated leader election. Every tick an idle node becomes
//! a leader with probability `pg` and broadcasts a group call (GCM). Idle
//! neighbors join as members and reply with their estimate (JACK). When its
//! collection timer fires the leader averages what it collected with its own
//! estimate and sends the group average (GAM) back to the members.
//!
//! Wire format:
//! - GCM  `G|round`
//! - JACK `J|round|estimate`
//! - GAM  `A|round|average`
//!
//! With `d = msgTimeout` bounding the one-way delay, the leader collects for
//! `2d + 1` ticks and a member waits `3d + 1` ticks for the average.

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;

use gossim_core::{
    ConfigError, Decimal, MathContext, NodeId, Tick, TimerKey, WireReader, WireWriter,
};
use gossim_engine::{
    AppContext, AppError, AppResult, AppState, Application, InitArgs, Message, Timer,
};
use tracing::debug;

use crate::aggregate::Aggregation;

const GCM: &str = "G";
const JACK: &str = "J";
const GAM: &str = "A";

const TICK: u64 = 0;
const COLLECT: u64 = 1;
const WAIT: u64 = 2;

/// Role of a node in the current round
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrgMode {
    Idle,
    Member,
    Leader,
}

impl fmt::Display for DrgMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DrgMode::Idle => write!(f, "IDLE"),
            DrgMode::Member => write!(f, "MEMBER"),
            DrgMode::Leader => write!(f, "LEADER"),
        }
    }
}

#[derive(Clone, Debug, Default)]
enum Role {
    #[default]
    Idle,
    Member {
        leader: NodeId,
        round: u64,
        wait: TimerKey,
        since: Tick,
    },
    Leader {
        round: u64,
        collect: TimerKey,
        replies: BTreeMap<NodeId, Decimal>,
    },
}

/// Per-node round accounting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrgCounters {
    pub rounds_led: u64,
    /// Led rounds that ended with a group average
    pub rounds_completed: u64,
    /// Led rounds that collected no reply
    pub rounds_abandoned: u64,
    /// Groups joined as a member
    pub joins: u64,
    /// Memberships ended by a group average
    pub joins_completed: u64,
    /// Memberships ended by the wait timer
    pub joins_abandoned: u64,
}

#[derive(Default)]
pub struct Drg {
    agg: Option<Aggregation>,
    math: MathContext,
    pg: f64,
    msg_timeout: u64,
    estimate: Decimal,
    role: Role,
    next_round: u64,
    /// Skip the next election draw after yielding to a lower id
    backoff: bool,
    counters: DrgCounters,
}

impl Drg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> DrgMode {
        match self.role {
            Role::Idle => DrgMode::Idle,
            Role::Member { .. } => DrgMode::Member,
            Role::Leader { .. } => DrgMode::Leader,
        }
    }

    pub fn estimate(&self) -> Decimal {
        self.estimate
    }

    /// Tick at which the current membership began
    pub fn member_since(&self) -> Option<Tick> {
        match self.role {
            Role::Member { since, .. } => Some(since),
            Role::Idle | Role::Leader { .. } => None,
        }
    }

    pub fn counters(&self) -> DrgCounters {
        self.counters
    }

    fn agg(&self) -> AppResult<&Aggregation> {
        self.agg
            .as_ref()
            .ok_or_else(|| AppError::Protocol("DRG used before init".to_string()))
    }

    fn try_lead(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        if self.backoff {
            self.backoff = false;
            return Ok(());
        }
        if !ctx.rng().bernoulli(self.pg) {
            return Ok(());
        }
        self.next_round += 1;
        let round = self.next_round;
        ctx.broadcast(WireWriter::new(GCM).field(round).finish())?;
        let collect = ctx.set_timeout(2 * self.msg_timeout + 1, COLLECT)?;
        self.counters.rounds_led += 1;
        debug!(node = %ctx.node_id(), round, tick = %ctx.now(), "DRG leader");
        self.role = Role::Leader {
            round,
            collect,
            replies: BTreeMap::new(),
        };
        Ok(())
    }

    fn close_group(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        let Role::Leader { round, replies, .. } = std::mem::take(&mut self.role) else {
            return Ok(());
        };
        if replies.is_empty() {
            self.counters.rounds_abandoned += 1;
            debug!(node = %ctx.node_id(), round, "DRG round abandoned");
            return Ok(());
        }

        let math = self.math;
        let total = math.add(self.estimate, math.sum(replies.values())?)?;
        let average = math.div(total, Decimal::from(replies.len() as u64 + 1))?;
        self.estimate = average;
        let gam = WireWriter::new(GAM).field(round).field(average).finish();
        for member in replies.keys() {
            ctx.send(*member, gam.clone())?;
        }
        self.counters.rounds_completed += 1;
        debug!(node = %ctx.node_id(), round, members = replies.len(), %average, "DRG group average");
        Ok(())
    }

    fn on_gcm(&mut self, msg: &Message, ctx: &mut AppContext<'_>) -> AppResult {
        let round: u64 = WireReader::expect(&msg.payload, GCM)?.read()?;
        match self.role {
            Role::Idle => {
                let jack = WireWriter::new(JACK).field(round).field(self.estimate).finish();
                ctx.send(msg.from, jack)?;
                let wait = ctx.set_timeout(3 * self.msg_timeout + 1, WAIT)?;
                self.role = Role::Member {
                    leader: msg.from,
                    round,
                    wait,
                    since: ctx.now(),
                };
                self.counters.joins += 1;
            }
            // leadership is exclusive while active
            Role::Leader { .. } if msg.from < ctx.node_id() => self.backoff = true,
            Role::Leader { .. } | Role::Member { .. } => {}
        }
        Ok(())
    }

    fn on_jack(&mut self, msg: &Message) -> AppResult {
        let mut reader = WireReader::expect(&msg.payload, JACK)?;
        let round: u64 = reader.read()?;
        let estimate: Decimal = reader.read()?;
        if let Role::Leader {
            round: current,
            replies,
            ..
        } = &mut self.role
        {
            if *current == round {
                replies.insert(msg.from, estimate);
            }
        }
        Ok(())
    }

    fn on_gam(&mut self, msg: &Message, ctx: &mut AppContext<'_>) -> AppResult {
        let mut reader = WireReader::expect(&msg.payload, GAM)?;
        let round: u64 = reader.read()?;
        let average: Decimal = reader.read()?;
        if let Role::Member {
            leader,
            round: current,
            wait,
            ..
        } = self.role
        {
            if leader == msg.from && current == round {
                self.estimate = average;
                ctx.reset_timeout(wait);
                self.role = Role::Idle;
                self.counters.joins_completed += 1;
            }
        }
        Ok(())
    }
}

impl Application for Drg {
    fn init(&mut self, args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult {
        let agg = Aggregation::read(args, ctx)?;
        let params = &args.params;
        self.math = ctx.math();
        self.pg = params.require("pg")?;
        if !(0.0..=1.0).contains(&self.pg) {
            return Err(ConfigError::malformed(
                params.section(),
                "pg",
                &self.pg.to_string(),
                "must be within [0, 1]",
            )
            .into());
        }
        self.msg_timeout = params.require("msgTimeout")?;
        if self.msg_timeout == 0 {
            return Err(
                ConfigError::malformed(params.section(), "msgTimeout", "0", "must be positive").into(),
            );
        }
        self.estimate = agg.input;
        ctx.set_timeout(agg.tick_timeout, TICK)?;
        self.agg = Some(agg);
        Ok(())
    }

    fn on_receive(&mut self, msg: &Message, ctx: &mut AppContext<'_>) -> AppResult {
        match msg.tag() {
            GCM => self.on_gcm(msg, ctx),
            JACK => self.on_jack(msg),
            GAM => self.on_gam(msg, ctx),
            other => Err(AppError::Protocol(format!("unexpected DRG message {other:?}"))),
        }
    }

    fn on_tick(&mut self, timer: &Timer, ctx: &mut AppContext<'_>) -> AppResult {
        match timer.tag {
            TICK => {
                ctx.drain_churn();
                let tick_timeout = self.agg()?.tick_timeout;
                ctx.set_timeout(tick_timeout, TICK)?;
                if matches!(self.role, Role::Idle) {
                    self.try_lead(ctx)?;
                }
            }
            COLLECT => {
                if matches!(self.role, Role::Leader { collect, .. } if collect == timer.key) {
                    self.close_group(ctx)?;
                }
            }
            WAIT => {
                if matches!(self.role, Role::Member { wait, .. } if wait == timer.key) {
                    self.role = Role::Idle;
                    self.counters.joins_abandoned += 1;
                    debug!(node = %ctx.node_id(), "DRG membership timed out");
                }
            }
            other => {
                return Err(AppError::Protocol(format!("unexpected DRG timer tag {other}")));
            }
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
                "mode={} led={} completed={} abandoned={}",
                self.mode(),
                self.counters.rounds_led,
                self.counters.rounds_completed,
                self.counters.rounds_abandoned
            ),
        }
    }

    fn debug_tick_status(&self) -> String {
        format!("{} round={} backoff={}", self.mode(), self.next_round, self.backoff)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_display() {
        assert_eq!(DrgMode::Leader.to_string(), "LEADER");
        assert_eq!(Drg::new().mode(), DrgMode::Idle);
    }

    #[test]
    fn test_state_before_init() {
        let state = Drg::new().state();
        assert_eq!(state.estimate, Decimal::ZERO);
        assert!(state.summary.starts_with("mode=IDLE"));
    }
}
