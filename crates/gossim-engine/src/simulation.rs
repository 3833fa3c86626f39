//! Simulation - runs the repetitions of one experiment
//!
//! Each repetition gets a fresh engine, a fresh random source forked from
//! the run seed, and fresh application instances. Repetitions share
//! nothing but the configuration, the topology and the reporting sink.

use std::sync::Arc;

use gossim_core::{to_f64, ConfigError, ConfigSource, Params, ReportSink, SimRng, Tick};
use tracing::{error, info};

use crate::app::{AppRegistry, AppSpawner};
use crate::channel::ChannelStats;
use crate::churn::ChurnPlan;
use crate::engine::{ComEngine, EngineConfig};
use crate::error::SimError;
use crate::stats::{AggregateFunction, NetworkStats};
use crate::topology::Topology;

/// Section holding the run-level keys
pub const SIMULATION_SECTION: &str = "simulation";

/// Run configuration
#[derive(Clone, Debug)]
pub struct SimConfig {
    pub seed: u64,
    pub repetitions: usize,
    /// Record statistics every this many ticks
    pub report_interval: u64,
    /// Stop a repetition early once the RMSE drops to this value
    pub convergence_epsilon: Option<f64>,
    /// Registry name, also the parameter section of the algorithm
    pub algorithm: String,
    /// Aggregate used to compute the true value for statistics
    pub function: AggregateFunction,
    pub engine: EngineConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            seed: 0,
            repetitions: 1,
            report_interval: 1,
            convergence_epsilon: None,
            algorithm: "flow-updating".to_string(),
            function: AggregateFunction::Avg,
            engine: EngineConfig::default(),
        }
    }
}

impl SimConfig {
    pub fn new(algorithm: &str, engine: EngineConfig) -> Self {
        SimConfig {
            algorithm: algorithm.to_string(),
            engine,
            ..Self::default()
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_repetitions(mut self, repetitions: usize) -> Self {
        self.repetitions = repetitions;
        self
    }

    pub fn with_report_interval(mut self, interval: u64) -> Self {
        self.report_interval = interval;
        self
    }

    pub fn with_convergence_epsilon(mut self, epsilon: f64) -> Self {
        self.convergence_epsilon = Some(epsilon);
        self
    }

    pub fn with_function(mut self, function: AggregateFunction) -> Self {
        self.function = function;
        self
    }

    /// Read the `simulation` section (and `function` from the algorithm's
    /// section)
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let params = Params::new(source, 0, SIMULATION_SECTION);
        let algorithm: String = params.get_or("algorithm", defaults.algorithm)?;
        let repetitions = params.get_or("repetitions", defaults.repetitions)?;
        if repetitions == 0 {
            return Err(ConfigError::malformed(
                SIMULATION_SECTION,
                "repetitions",
                "0",
                "at least one repetition is required",
            ));
        }
        let report_interval = params.get_or("reportInterval", defaults.report_interval)?;
        if report_interval == 0 {
            return Err(ConfigError::malformed(
                SIMULATION_SECTION,
                "reportInterval",
                "0",
                "must be at least one tick",
            ));
        }
        let function = Params::new(source, 0, &algorithm).get_or("function", defaults.function)?;

        Ok(SimConfig {
            seed: params.get_or("seed", defaults.seed)?,
            repetitions,
            report_interval,
            convergence_epsilon: params.optional("convergenceEpsilon")?,
            function,
            engine: EngineConfig::from_params(&params)?,
            algorithm,
        })
    }
}

/// Outcome of one repetition
#[derive(Clone, Debug, PartialEq)]
pub struct RepetitionSummary {
    pub repetition: usize,
    /// Last tick simulated
    pub ticks: Tick,
    pub stats: NetworkStats,
    pub messages: ChannelStats,
    /// Stopped early on the convergence threshold
    pub converged: bool,
}

/// One experiment: algorithm, topology, churn and configuration
pub struct Simulation {
    config: SimConfig,
    registry: AppRegistry,
    source: Arc<dyn ConfigSource>,
    topology: Topology,
    overlay: Option<Topology>,
    churn: ChurnPlan,
}

impl Simulation {
    pub fn new(
        config: SimConfig,
        registry: AppRegistry,
        source: Arc<dyn ConfigSource>,
        topology: Topology,
    ) -> Self {
        Simulation {
            config,
            registry,
            source,
            topology,
            overlay: None,
            churn: ChurnPlan::new(),
        }
    }

    pub fn with_overlay(mut self, overlay: Topology) -> Self {
        self.overlay = Some(overlay);
        self
    }

    pub fn with_churn(mut self, churn: ChurnPlan) -> Self {
        self.churn = churn;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// A ready-to-run engine for `repetition`, with applications installed
    pub fn build_repetition(
        &self,
        repetition: usize,
        report: &mut dyn ReportSink,
    ) -> Result<ComEngine, SimError> {
        let constructor = self.registry.get(&self.config.algorithm)?;
        let rng = SimRng::for_repetition(self.config.seed, repetition);
        let mut engine = ComEngine::new(
            &self.topology,
            self.overlay.as_ref(),
            self.config.engine.clone(),
            repetition,
            rng,
        );
        engine.schedule_churn(&self.churn);
        let spawner = AppSpawner::new(constructor, &self.config.algorithm, Arc::clone(&self.source));
        engine.install(spawner, report)?;
        Ok(engine)
    }

    /// Run one repetition to completion. The sink is flushed whether or not
    /// the repetition succeeds.
    pub fn run_repetition(
        &self,
        repetition: usize,
        report: &mut dyn ReportSink,
    ) -> Result<RepetitionSummary, SimError> {
        info!(
            repetition,
            algorithm = %self.config.algorithm,
            model = %self.config.engine.model,
            nodes = self.topology.node_count(),
            "repetition start"
        );
        let result = self.drive(repetition, report);
        report.flush(repetition);
        match &result {
            Ok(summary) => info!(
                repetition,
                ticks = %summary.ticks,
                rmse = summary.stats.rmse,
                sent = summary.messages.sent,
                lost = summary.messages.lost,
                converged = summary.converged,
                "repetition finished"
            ),
            Err(err) => error!(repetition, %err, "repetition aborted"),
        }
        result
    }

    fn drive(
        &self,
        repetition: usize,
        report: &mut dyn ReportSink,
    ) -> Result<RepetitionSummary, SimError> {
        let mut engine = self.build_repetition(repetition, report)?;
        let interval = self.config.report_interval.max(1);
        let mut next_report = 0;
        let mut stats = self.record_stats(&engine, report);
        let mut converged = false;

        while let Some(now) = engine.advance(report)? {
            if now.as_u64() < next_report {
                continue;
            }
            next_report = (now.as_u64() / interval + 1) * interval;
            stats = self.record_stats(&engine, report);
            if let Some(epsilon) = self.config.convergence_epsilon {
                if stats.converged(epsilon) {
                    converged = true;
                    break;
                }
            }
        }
        if !converged {
            stats = self.record_stats(&engine, report);
        }

        Ok(RepetitionSummary {
            repetition,
            ticks: engine.now(),
            stats,
            messages: engine.channel_totals(),
            converged,
        })
    }

    /// Compute and record the network statistics at the engine's tick
    pub fn record_stats(&self, engine: &ComEngine, report: &mut dyn ReportSink) -> NetworkStats {
        let states = engine.app_states();
        let values: Vec<f64> = states.iter().map(|(_, s)| to_f64(s.aggregate)).collect();
        let inputs: Vec<f64> = states.iter().map(|(_, s)| to_f64(s.input)).collect();
        let stats = NetworkStats::compute(&values, self.config.function.truth(&inputs));

        let repetition = engine.repetition();
        let now = engine.now();
        let totals = engine.channel_totals();
        report.record(repetition, now, "mean", stats.mean);
        report.record(repetition, now, "rmse", stats.rmse);
        report.record(repetition, now, "max_error", stats.max_error);
        report.record(repetition, now, "msgs_sent", totals.sent as f64);
        report.record(repetition, now, "msgs_lost", totals.lost as f64);
        stats
    }

    /// Run every repetition in order. The first error aborts the run.
    pub fn run(&self, report: &mut dyn ReportSink) -> Result<Vec<RepetitionSummary>, SimError> {
        info!(
            algorithm = %self.config.algorithm,
            repetitions = self.config.repetitions,
            seed = self.config.seed,
            "simulation start"
        );
        let summaries = (0..self.config.repetitions)
            .map(|repetition| self.run_repetition(repetition, report))
            .collect::<Result<Vec<_>, _>>()?;
        info!(repetitions = summaries.len(), "simulation finished");
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use gossim_core::MapConfig;

    use super::*;
    use crate::engine::ExecutionModel;

    #[test]
    fn test_config_defaults() {
        let config = SimConfig::from_source(&MapConfig::new()).unwrap();
        assert_eq!(config.repetitions, 1);
        assert_eq!(config.algorithm, "flow-updating");
        assert_eq!(config.engine.model, ExecutionModel::Synchronous);
        assert!(config.convergence_epsilon.is_none());
    }

    #[test]
    fn test_config_from_source() {
        let source = MapConfig::new()
            .with("simulation", "seed", 7)
            .with("simulation", "repetitions", 3)
            .with("simulation", "algorithm", "push-sum")
            .with("simulation", "reportInterval", 5)
            .with("simulation", "convergenceEpsilon", 0.001)
            .with("push-sum", "function", "COUNT");
        let config = SimConfig::from_source(&source).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.repetitions, 3);
        assert_eq!(config.algorithm, "push-sum");
        assert_eq!(config.report_interval, 5);
        assert_eq!(config.convergence_epsilon, Some(0.001));
        assert_eq!(config.function, AggregateFunction::Count);
    }

    #[test]
    fn test_config_rejects_zero_repetitions() {
        let source = MapConfig::new().with("simulation", "repetitions", 0);
        assert!(matches!(
            SimConfig::from_source(&source),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_unknown_algorithm() {
        let sim = Simulation::new(
            SimConfig::new("nope", EngineConfig::default()),
            AppRegistry::new(),
            Arc::new(MapConfig::new()),
            Topology::line(2),
        );
        let err = sim.run(&mut gossim_core::NullReport).unwrap_err();
        assert!(matches!(err, SimError::UnknownAlgorithm(name) if name == "nope"));
    }
}
