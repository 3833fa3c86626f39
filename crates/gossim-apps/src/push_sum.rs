//! Push-sum
//!
//! A node holds a (sum, weight) pair starting at (input, 1). Each step it
//! splits the pair into `k + 1` equal parts, where `k = ceil(share * n)` of
//! its `n` neighbors are picked at random, keeps one part and sends one to
//! each target (`S|sum|weight`). Received parts are added to the pair. The
//! estimate is `sum / weight`.
//!
//! The kept part is whatever remains after the sent parts, so no rounding
//! creates or destroys mass, and nothing is ever sent to self.

use std::any::Any;

use gossim_core::{ConfigError, Decimal, MathContext, NodeId, WireReader, WireWriter};
use gossim_engine::{
    AppContext, AppError, AppResult, AppState, Application, ExecutionModel, InitArgs, Message,
    RoundInput, Timer,
};

use crate::aggregate::Aggregation;

const SUM: &str = "S";
const TICK: u64 = 0;

/// A (sum, weight) pair
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Mass {
    pub sum: Decimal,
    pub weight: Decimal,
}

#[derive(Default)]
pub struct PushSum {
    agg: Option<Aggregation>,
    math: MathContext,
    share: f64,
    mass: Mass,
    estimate: Decimal,
    /// Everything ever sent and received, for conservation checks
    sent: Mass,
    received: Mass,
    step_due: bool,
}

impl PushSum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mass(&self) -> Mass {
        self.mass
    }

    pub fn sent(&self) -> Mass {
        self.sent
    }

    pub fn received(&self) -> Mass {
        self.received
    }

    pub fn estimate(&self) -> Decimal {
        self.estimate
    }

    fn refresh_estimate(&mut self) -> AppResult {
        if !self.mass.weight.is_zero() {
            self.estimate = self.math.div(self.mass.sum, self.mass.weight)?;
        }
        Ok(())
    }

    fn absorb(&mut self, msg: &Message) -> AppResult {
        let mut reader = WireReader::expect(&msg.payload, SUM)?;
        let sum: Decimal = reader.read()?;
        let weight: Decimal = reader.read()?;
        let math = self.math;
        self.mass.sum = math.add(self.mass.sum, sum)?;
        self.mass.weight = math.add(self.mass.weight, weight)?;
        self.received.sum = math.add(self.received.sum, sum)?;
        self.received.weight = math.add(self.received.weight, weight)?;
        Ok(())
    }

    /// Split the pair over randomly chosen neighbors
    fn push(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        let links: Vec<NodeId> = ctx.links().iter().copied().collect();
        if links.is_empty() {
            return Ok(());
        }
        let k = ((self.share * links.len() as f64).ceil() as usize).clamp(1, links.len());
        let targets = ctx.rng().sample(&links, k);

        let math = self.math;
        let parts = Decimal::from(k as u64 + 1);
        let part = Mass {
            sum: math.div(self.mass.sum, parts)?,
            weight: math.div(self.mass.weight, parts)?,
        };
        let payload = WireWriter::new(SUM)
            .field(part.sum)
            .field(part.weight)
            .finish();
        for target in targets {
            ctx.send(target, payload.clone())?;
            self.mass.sum = math.sub(self.mass.sum, part.sum)?;
            self.mass.weight = math.sub(self.mass.weight, part.weight)?;
            self.sent.sum = math.add(self.sent.sum, part.sum)?;
            self.sent.weight = math.add(self.sent.weight, part.weight)?;
        }
        Ok(())
    }

    fn tick_timeout(&self) -> AppResult<u64> {
        self.agg
            .as_ref()
            .map(|agg| agg.tick_timeout)
            .ok_or_else(|| AppError::Protocol("push-sum used before init".to_string()))
    }
}

impl Application for PushSum {
    fn init(&mut self, args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult {
        let agg = Aggregation::read(args, ctx)?;
        let params = &args.params;
        self.math = ctx.math();
        self.share = params.get_or("share", 1.0)?;
        if !(self.share > 0.0 && self.share <= 1.0) {
            return Err(ConfigError::malformed(
                params.section(),
                "share",
                &self.share.to_string(),
                "must be within (0, 1]",
            )
            .into());
        }
        self.mass = Mass {
            sum: agg.input,
            weight: Decimal::ONE,
        };
        self.estimate = agg.input;
        ctx.set_timeout(agg.tick_timeout, TICK)?;
        self.agg = Some(agg);
        Ok(())
    }

    fn on_receive(&mut self, msg: &Message, _ctx: &mut AppContext<'_>) -> AppResult {
        self.absorb(msg)?;
        self.refresh_estimate()
    }

    fn on_tick(&mut self, _timer: &Timer, ctx: &mut AppContext<'_>) -> AppResult {
        ctx.drain_churn();
        ctx.set_timeout(self.tick_timeout()?, TICK)?;
        if ctx.model() == ExecutionModel::Synchronous {
            self.step_due = true;
            return Ok(());
        }
        self.push(ctx)
    }

    fn state_transition(&mut self, input: RoundInput, ctx: &mut AppContext<'_>) -> AppResult {
        for msg in &input.messages {
            self.absorb(msg)?;
        }
        self.refresh_estimate()?;
        for timer in &input.timeouts {
            self.on_tick(timer, ctx)?;
        }
        Ok(())
    }

    fn message_generation(&mut self, ctx: &mut AppContext<'_>) -> AppResult {
        if std::mem::take(&mut self.step_due) {
            self.push(ctx)?;
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
            summary: format!("sum={} weight={}", self.mass.sum, self.mass.weight),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
