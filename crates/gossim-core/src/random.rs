//! Seeded randomness
//!
//! A repetition owns one [`SimRng`], derived from the run seed and the
//! repetition index, so every repetition can be replayed on its own and two
//! repetitions never share a generator. The engine splits further streams
//! off it with [`SimRng::stream`], one per node.

use std::fmt;
use std::str::FromStr;

use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use rand_distr::{Exp, Normal, Poisson, Weibull};

/// Deterministic random source for one repetition
#[derive(Clone, Debug)]
pub struct SimRng {
    inner: StdRng,
}

impl SimRng {
    pub fn new(seed: u64) -> Self {
        SimRng {
            inner: StdRng::seed_from_u64(seed),
        }
    }

    /// Generator for repetition `repetition` of a run seeded with `seed`
    pub fn for_repetition(seed: u64, repetition: usize) -> Self {
        Self::stream(seed, repetition as u64)
    }

    /// Independent generator number `stream` under `seed`
    pub fn stream(seed: u64, stream: u64) -> Self {
        // splitmix64 finalizer keeps neighbouring streams far apart
        let mut z = seed ^ stream.wrapping_mul(0x9E37_79B9_7F4A_7C15);
        z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        Self::new(z ^ (z >> 31))
    }

    /// Bernoulli draw. Probabilities outside `[0, 1]` are clamped.
    pub fn bernoulli(&mut self, p: f64) -> bool {
        if p <= 0.0 {
            return false;
        }
        if p >= 1.0 {
            return true;
        }
        self.inner.gen::<f64>() < p
    }

    /// Uniform index in `0..len`. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        self.inner.gen_range(0..len)
    }

    /// Uniformly chosen element
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.inner)
    }

    /// Up to `amount` distinct elements, uniformly chosen
    pub fn sample<T: Clone>(&mut self, items: &[T], amount: usize) -> Vec<T> {
        items
            .choose_multiple(&mut self.inner, amount)
            .cloned()
            .collect()
    }

    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        items.shuffle(&mut self.inner);
    }

    pub fn next_f64(&mut self) -> f64 {
        self.inner.gen()
    }
}

impl RngCore for SimRng {
    fn next_u32(&mut self) -> u32 {
        self.inner.next_u32()
    }

    fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest)
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand::Error> {
        self.inner.try_fill_bytes(dest)
    }
}

/// Source of random (or constant) numeric values for node attributes,
/// link delays and topologies.
///
/// The textual form is `kind;param;param`, e.g. `gaussian;10;2`.
#[derive(Clone, Debug, PartialEq)]
pub enum NumericGenerator {
    Constant(f64),
    Gaussian { mean: f64, std_dev: f64 },
    Poisson { lambda: f64 },
    Uniform { low: f64, high: f64 },
    Exponential { lambda: f64 },
    Weibull { scale: f64, shape: f64 },
}

impl Default for NumericGenerator {
    fn default() -> Self {
        NumericGenerator::Constant(1.0)
    }
}

impl NumericGenerator {
    /// Check parameters so that [`sample`](Self::sample) cannot fail later
    pub fn validate(&self) -> Result<(), String> {
        let ok = match *self {
            NumericGenerator::Constant(v) => v.is_finite(),
            NumericGenerator::Gaussian { mean, std_dev } => {
                mean.is_finite() && std_dev.is_finite() && std_dev >= 0.0
            }
            NumericGenerator::Poisson { lambda } => lambda.is_finite() && lambda > 0.0,
            NumericGenerator::Uniform { low, high } => {
                low.is_finite() && high.is_finite() && low <= high
            }
            NumericGenerator::Exponential { lambda } => lambda.is_finite() && lambda > 0.0,
            NumericGenerator::Weibull { scale, shape } => {
                scale.is_finite() && shape.is_finite() && scale > 0.0 && shape > 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(format!("invalid generator parameters: {self}"))
        }
    }

    /// Draw one value. Invalid parameters yield `NaN`.
    pub fn sample(&self, rng: &mut SimRng) -> f64 {
        match *self {
            NumericGenerator::Constant(v) => v,
            NumericGenerator::Gaussian { mean, std_dev } => Normal::new(mean, std_dev)
                .map(|d| d.sample(rng))
                .unwrap_or(f64::NAN),
            NumericGenerator::Poisson { lambda } => Poisson::new(lambda)
                .map(|d| d.sample(rng))
                .unwrap_or(f64::NAN),
            NumericGenerator::Uniform { low, high } => {
                if low < high {
                    Uniform::new(low, high).sample(rng)
                } else if low == high {
                    low
                } else {
                    f64::NAN
                }
            }
            NumericGenerator::Exponential { lambda } => Exp::new(lambda)
                .map(|d| d.sample(rng))
                .unwrap_or(f64::NAN),
            NumericGenerator::Weibull { scale, shape } => Weibull::new(scale, shape)
                .map(|d| d.sample(rng))
                .unwrap_or(f64::NAN),
        }
    }
}

impl FromStr for NumericGenerator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(';').map(str::trim);
        let kind = parts.next().unwrap_or_default().to_ascii_lowercase();
        let params = parts
            .map(|p| p.parse::<f64>().map_err(|e| format!("{p:?}: {e}")))
            .collect::<Result<Vec<_>, _>>()?;

        let arity = |n: usize| -> Result<(), String> {
            if params.len() == n {
                Ok(())
            } else {
                Err(format!("{kind} takes {n} parameter(s), got {}", params.len()))
            }
        };

        let generator = match kind.as_str() {
            "constant" => {
                arity(1)?;
                NumericGenerator::Constant(params[0])
            }
            "gaussian" | "normal" => {
                arity(2)?;
                NumericGenerator::Gaussian {
                    mean: params[0],
                    std_dev: params[1],
                }
            }
            "poisson" => {
                arity(1)?;
                NumericGenerator::Poisson { lambda: params[0] }
            }
            "uniform" => {
                arity(2)?;
                NumericGenerator::Uniform {
                    low: params[0],
                    high: params[1],
                }
            }
            "exponential" => {
                arity(1)?;
                NumericGenerator::Exponential { lambda: params[0] }
            }
            "weibull" => {
                arity(2)?;
                NumericGenerator::Weibull {
                    scale: params[0],
                    shape: params[1],
                }
            }
            // A bare number is a constant
            _ => match kind.parse::<f64>() {
                Ok(v) if params.is_empty() => NumericGenerator::Constant(v),
                _ => return Err(format!("unknown generator {kind:?}")),
            },
        };
        generator.validate()?;
        Ok(generator)
    }
}

impl fmt::Display for NumericGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericGenerator::Constant(v) => write!(f, "constant;{v}"),
            NumericGenerator::Gaussian { mean, std_dev } => write!(f, "gaussian;{mean};{std_dev}"),
            NumericGenerator::Poisson { lambda } => write!(f, "poisson;{lambda}"),
            NumericGenerator::Uniform { low, high } => write!(f, "uniform;{low};{high}"),
            NumericGenerator::Exponential { lambda } => write!(f, "exponential;{lambda}"),
            NumericGenerator::Weibull { scale, shape } => write!(f, "weibull;{scale};{shape}"),
        }
    }
}
