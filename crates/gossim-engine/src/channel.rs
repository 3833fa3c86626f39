//! Channel model
//!
//! Simulates the links between nodes:
//! - Propagation delay, drawn per message and never below one tick
//! - Independent (Bernoulli) message loss
//! - Per directed channel accounting

use std::collections::BTreeMap;

use gossim_core::{NodeId, NumericGenerator, SimRng};

/// Link behaviour
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelConfig {
    /// Probability that a message is dropped (0.0 - 1.0)
    pub loss_rate: f64,
    /// Delay in ticks; samples are rounded and clamped to at least 1
    pub delay: NumericGenerator,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        ChannelConfig {
            loss_rate: 0.0,
            delay: NumericGenerator::Constant(1.0),
        }
    }
}

impl ChannelConfig {
    /// No loss, every message takes exactly one tick
    pub fn reliable() -> Self {
        Self::default()
    }

    /// One-tick links dropping a fraction `loss_rate` of messages
    pub fn lossy(loss_rate: f64) -> Self {
        ChannelConfig {
            loss_rate,
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay: NumericGenerator) -> Self {
        self.delay = delay;
        self
    }
}

/// Default link behaviour plus per-link overrides
#[derive(Clone, Debug, Default)]
pub struct ChannelModel {
    default: ChannelConfig,
    links: BTreeMap<(NodeId, NodeId), ChannelConfig>,
}

impl ChannelModel {
    pub fn new(default: ChannelConfig) -> Self {
        ChannelModel {
            default,
            links: BTreeMap::new(),
        }
    }

    /// Override the directed link `from -> to`
    pub fn set_link(&mut self, from: NodeId, to: NodeId, config: ChannelConfig) {
        self.links.insert((from, to), config);
    }

    pub fn config_for(&self, from: NodeId, to: NodeId) -> &ChannelConfig {
        self.links.get(&(from, to)).unwrap_or(&self.default)
    }

    /// Loss draw for one message. Lossless links do not consume randomness.
    pub fn should_drop(&self, from: NodeId, to: NodeId, rng: &mut SimRng) -> bool {
        let loss_rate = self.config_for(from, to).loss_rate;
        loss_rate > 0.0 && rng.bernoulli(loss_rate)
    }

    /// Delay for one message, in ticks
    pub fn sample_delay(&self, from: NodeId, to: NodeId, rng: &mut SimRng) -> u64 {
        let sample = self.config_for(from, to).delay.sample(rng);
        if sample.is_finite() && sample > 1.0 {
            sample.round() as u64
        } else {
            1
        }
    }
}

/// Counters of one directed channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub delivered: u64,
    pub lost: u64,
}

impl ChannelStats {
    /// Messages sent but neither delivered nor lost yet
    pub fn in_flight(&self) -> u64 {
        self.sent - self.delivered - self.lost
    }

    pub fn loss_rate(&self) -> f64 {
        if self.sent == 0 {
            0.0
        } else {
            self.lost as f64 / self.sent as f64
        }
    }
}
