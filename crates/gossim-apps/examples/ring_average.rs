//! Average over a lossy ring
//!
//! ```bash
//! RUST_LOG=info cargo run --example ring_average -- push-sum
//! ```
//!
//! The optional argument picks the algorithm (default `flow-updating`).

use std::sync::Arc;

use gossim_apps::{default_registry, DRG, FLOW_UPDATING};
use gossim_core::{MapConfig, MemoryReport, NumericGenerator};
use gossim_engine::{ChannelConfig, EngineConfig, SimConfig, Simulation, Topology};
use tracing::info;
use tracing_subscriber::EnvFilter;

const NODES: usize = 32;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,gossim_engine=info")),
        )
        .init();

    let algorithm = std::env::args().nth(1).unwrap_or_else(|| FLOW_UPDATING.to_string());
    let source = MapConfig::new()
        .with(&algorithm, "initValue", "uniform;0;100")
        .with(DRG, "pg", 0.3)
        .with(DRG, "msgTimeout", 3);

    let channel = ChannelConfig::lossy(0.05).with_delay(NumericGenerator::Uniform {
        low: 1.0,
        high: 3.0,
    });
    let engine = EngineConfig::asynchronous()
        .with_channel(channel)
        .with_max_ticks(2_000);
    let config = SimConfig::new(&algorithm, engine)
        .with_seed(2024)
        .with_repetitions(3)
        .with_report_interval(50)
        .with_convergence_epsilon(1e-4);

    let simulation = Simulation::new(config, default_registry(), Arc::new(source), Topology::ring(NODES));
    let mut report = MemoryReport::new();
    for summary in simulation.run(&mut report)? {
        info!(
            repetition = summary.repetition,
            ticks = %summary.ticks,
            truth = summary.stats.truth,
            rmse = summary.stats.rmse,
            sent = summary.messages.sent,
            converged = summary.converged,
            "summary"
        );
        println!(
            "rep {}: {} ticks, truth {:.4}, rmse {:.2e}, {} messages ({} lost){}",
            summary.repetition,
            summary.ticks,
            summary.stats.truth,
            summary.stats.rmse,
            summary.messages.sent,
            summary.messages.lost,
            if summary.converged { "" } else { ", not converged" }
        );
    }
    Ok(())
}
