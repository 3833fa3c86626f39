//! Network statistics
//!
//! Convergence is judged from the outside: the reported aggregates of all
//! active nodes are compared against the true aggregate of their inputs.

use std::fmt;
use std::str::FromStr;

/// The aggregate the network computes
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AggregateFunction {
    /// Average of node inputs
    #[default]
    Avg,
    /// Number of nodes, computed as an average over cloud seeds
    Count,
}

impl AggregateFunction {
    /// True aggregate over the inputs of the active nodes
    pub fn truth(self, inputs: &[f64]) -> f64 {
        match self {
            AggregateFunction::Avg => {
                if inputs.is_empty() {
                    0.0
                } else {
                    inputs.iter().sum::<f64>() / inputs.len() as f64
                }
            }
            AggregateFunction::Count => inputs.len() as f64,
        }
    }
}

impl FromStr for AggregateFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AVG" | "AVERAGE" => Ok(AggregateFunction::Avg),
            "COUNT" => Ok(AggregateFunction::Count),
            other => Err(format!("unknown aggregate function {other:?}")),
        }
    }
}

impl fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateFunction::Avg => write!(f, "AVG"),
            AggregateFunction::Count => write!(f, "COUNT"),
        }
    }
}

/// Spread of reported values around the true aggregate
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NetworkStats {
    pub count: usize,
    pub truth: f64,
    pub mean: f64,
    pub variance: f64,
    /// Root mean square error against `truth`
    pub rmse: f64,
    /// Largest absolute error against `truth`
    pub max_error: f64,
}

impl NetworkStats {
    pub fn compute(values: &[f64], truth: f64) -> Self {
        if values.is_empty() {
            return NetworkStats {
                truth,
                ..Self::default()
            };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let rmse = (values.iter().map(|v| (v - truth).powi(2)).sum::<f64>() / n).sqrt();
        let max_error = values
            .iter()
            .map(|v| (v - truth).abs())
            .fold(0.0, f64::max);
        NetworkStats {
            count: values.len(),
            truth,
            mean,
            variance,
            rmse,
            max_error,
        }
    }

    /// Every node within `epsilon` in the RMSE sense
    pub fn converged(&self, epsilon: f64) -> bool {
        self.count > 0 && self.rmse <= epsilon
    }
}
