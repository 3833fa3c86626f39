//! Aggregate helpers shared by every algorithm
//!
//! - [`agg_estimate`] turns the converging quantity into the reported
//!   aggregate
//! - [`Clouds`] assigns the seeds of a COUNT computation
//! - [`Aggregation`] reads the common parameters and draws a node's input

use gossim_core::{ArithResult, ConfigError, Decimal, MathContext, NumericGenerator, Params};
use gossim_engine::{AggregateFunction, AppContext, AppResult, InitArgs};
use tracing::warn;

/// Reported aggregate for a raw estimate.
///
/// Identity for AVG. For COUNT the estimate converges to `clouds / N`, so
/// the count is `clouds / estimate`; an estimate of zero reports zero.
pub fn agg_estimate(
    function: AggregateFunction,
    estimate: Decimal,
    clouds: u64,
    math: &MathContext,
) -> ArithResult<Decimal> {
    match function {
        AggregateFunction::Avg => Ok(estimate),
        AggregateFunction::Count if estimate.is_zero() => Ok(Decimal::ZERO),
        AggregateFunction::Count => math.div(Decimal::from(clouds), estimate),
    }
}

/// Disjoint contiguous ranges of node ids, wrapping at the node count.
///
/// The first range starts at `repetition * count * size`, so successive
/// repetitions seed different nodes without drawing randomness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Clouds {
    node_count: usize,
    start: usize,
    count: usize,
    size: usize,
}

impl Clouds {
    pub fn assign(
        node_count: usize,
        count: usize,
        size: usize,
        repetition: usize,
    ) -> Result<Self, ConfigError> {
        if node_count == 0 || count == 0 || size == 0 {
            return Err(ConfigError::Invalid(format!(
                "clouds need nodes, a count and a size (nodes={node_count}, count={count}, size={size})"
            )));
        }
        let covered = count.saturating_mul(size);
        if covered > node_count {
            return Err(ConfigError::Invalid(format!(
                "{count} clouds of {size} nodes do not fit in {node_count} nodes"
            )));
        }
        let start = repetition.wrapping_mul(covered) % node_count;
        Ok(Clouds {
            node_count,
            start,
            count,
            size,
        })
    }

    /// Cloud containing `node_index`, if any
    pub fn cloud_of(&self, node_index: usize) -> Option<usize> {
        let offset = (node_index % self.node_count + self.node_count - self.start) % self.node_count;
        (offset < self.count * self.size).then(|| offset / self.size)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// Common parameters of an aggregation and this node's input
#[derive(Clone, Debug, PartialEq)]
pub struct Aggregation {
    pub function: AggregateFunction,
    /// Number of clouds (COUNT only, 1 otherwise)
    pub clouds: u64,
    /// Ticks between two algorithm steps
    pub tick_timeout: u64,
    /// This node's contribution
    pub input: Decimal,
}

impl Aggregation {
    /// Read `function`, `tickTimeout` and the input parameters.
    ///
    /// AVG inputs come from `initValues` (indexed by node) or else from the
    /// `initValue` generator. COUNT inputs are `1 / cloudSize` on cloud
    /// members and zero elsewhere, so every cloud contributes one unit.
    pub fn read(args: &InitArgs<'_>, ctx: &mut AppContext<'_>) -> AppResult<Self> {
        let params = &args.params;
        let function = params.get_or("function", AggregateFunction::Avg)?;
        let tick_timeout: u64 = params.get_or("tickTimeout", 1)?;
        if tick_timeout == 0 {
            return Err(ConfigError::malformed(params.section(), "tickTimeout", "0", "must be positive").into());
        }
        let math = ctx.math();

        match function {
            AggregateFunction::Avg => {
                let input = initial_value(params, args.node_index, ctx)?;
                Ok(Aggregation {
                    function,
                    clouds: 1,
                    tick_timeout,
                    input,
                })
            }
            AggregateFunction::Count => {
                let count: usize = params.get_or("cloudsNum", 1)?;
                let size: usize = params.get_or("cloudSize", 1)?;
                let clouds = Clouds::assign(args.node_count, count, size, args.repetition)?;
                let input = match clouds.cloud_of(args.node_index) {
                    Some(_) => math.div(Decimal::ONE, Decimal::from(size as u64))?,
                    None => Decimal::ZERO,
                };
                Ok(Aggregation {
                    function,
                    clouds: count as u64,
                    tick_timeout,
                    input,
                })
            }
        }
    }

    pub fn aggregate(&self, estimate: Decimal, math: &MathContext) -> ArithResult<Decimal> {
        agg_estimate(self.function, estimate, self.clouds, math)
    }

    /// Aggregate for reporting. A transform that does not fit the decimal
    /// range reports zero, like a zero estimate does.
    pub fn report(&self, estimate: Decimal, math: &MathContext) -> Decimal {
        self.aggregate(estimate, math).unwrap_or_else(|err| {
            warn!(%estimate, function = ?self.function, %err, "aggregate out of range, reporting zero");
            Decimal::ZERO
        })
    }
}

fn initial_value(
    params: &Params<'_>,
    node_index: usize,
    ctx: &mut AppContext<'_>,
) -> AppResult<Decimal> {
    let values: Vec<Decimal> = params.list("initValues")?;
    if !values.is_empty() {
        return values.get(node_index).copied().ok_or_else(|| {
            ConfigError::Invalid(format!(
                "[{}] initValues has {} entries, node {node_index} has none",
                params.section(),
                values.len()
            ))
            .into()
        });
    }
    let generator: NumericGenerator = params.require("initValue")?;
    let sample = generator.sample(ctx.rng());
    ctx.math().from_f64(sample).map_err(|_| {
        ConfigError::malformed(
            params.section(),
            "initValue",
            &generator.to_string(),
            "generator produced a non-finite value",
        )
        .into()
    })
}
