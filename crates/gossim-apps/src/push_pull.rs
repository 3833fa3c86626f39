//! Push-pull averaging
//!
//! Each step a node pushes its estimate to one random neighbor (`P|value`).
//! The receiver replies with its estimate from before the merge
//! (`R|value`) and both sides adopt the pairwise average.

use std::any::Any;

use gossim_core::{Decimal, MathContext, NodeId, WireReader, WireWriter};
use gossim_engine::{AppContext, AppError, AppResult, AppState, Application, InitArgs, Message, Timer};

use crate::aggregate::Aggregation;

const PUSH: &str = "P";
const REPLY: &str = "R";
const TICK: u64 = 0;

#[derive(Default)]
pub struct PushPull {
    agg: Option<Aggregation>,
    math: MathContext,
    pull: bool,
    estimate: Decimal,
    exchanges: u64,
}

impl PushPull {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn estimate(&self) -> Decimal {
        self.estimate
    }

    /// Merges performed, pushes and replies alike
    pub fn exchanges(&self) -> u64 {
        self.exchanges
    }

    fn merge(&mut self, value: Decimal) -> AppResult {
        let total = self.math.add(self.estimate, value)?;
        self.estimate = self.math.div(total, Decimal::TWO)?;
        self.exchanges += 1;
        Ok(())
    }
}

impl Application for PushPull {
    fn init(&mut self, args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult {
        let agg = Aggregation::read(args, ctx)?;
        self.math = ctx.math();
        self.pull = args.params.flag("pull", true)?;
        self.estimate = agg.input;
        ctx.set_timeout(agg.tick_timeout, TICK)?;
        self.agg = Some(agg);
        Ok(())
    }

    fn on_receive(&mut self, msg: &Message, ctx: &mut AppContext<'_>) -> AppResult {
        let mut reader = WireReader::open(&msg.payload)?;
        let value: Decimal = reader.read()?;
        match reader.tag() {
            PUSH => {
                if self.pull {
                    let reply = WireWriter::new(REPLY).field(self.estimate).finish();
                    ctx.send(msg.from, reply)?;
                }
                self.merge(value)
            }
            REPLY => self.merge(value),
            other => Err(AppError::Protocol(format!("unexpected push-pull message {other:?}"))),
        }
    }

    fn on_tick(&mut self, _timer: &Timer, ctx: &mut AppContext<'_>) -> AppResult {
        ctx.drain_churn();
        let tick_timeout = self
            .agg
            .as_ref()
            .map(|agg| agg.tick_timeout)
            .ok_or_else(|| AppError::Protocol("push-pull used before init".to_string()))?;
        ctx.set_timeout(tick_timeout, TICK)?;

        let links: Vec<NodeId> = ctx.links().iter().copied().collect();
        if let Some(peer) = ctx.rng().choose(&links).copied() {
            let push = WireWriter::new(PUSH).field(self.estimate).finish();
            ctx.send(peer, push)?;
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
            summary: format!("exchanges={}", self.exchanges),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
