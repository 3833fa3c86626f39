//! Error types for the engine and the application boundary
//!
//! The simulator is fail-fast: none of these are retried. Message loss and
//! node departure are protocol states, not errors.

use gossim_core::{ArithmeticError, ConfigError, NodeId, Tick, WireError};
use thiserror::Error;

/// Misuse of the engine by an application. Indicates a simulation bug.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Invalid timeout delay {0}: must be at least one tick")]
    InvalidDelay(u64),

    #[error("Engine is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    #[error("No application installed, cannot spawn node {0}")]
    NotInstalled(NodeId),
}

/// Error raised inside an application callback
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("arithmetic: {0}")]
    Arithmetic(#[from] ArithmeticError),

    #[error("wire: {0}")]
    Wire(#[from] WireError),

    #[error("protocol: {0}")]
    Protocol(String),
}

/// Fatal error of a simulation run
#[derive(Error, Debug)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Unknown algorithm {0:?}")]
    UnknownAlgorithm(String),

    #[error("Node {node} failed at tick {tick}: {source}")]
    Application {
        node: NodeId,
        tick: Tick,
        #[source]
        source: AppError,
    },

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

/// Result type for application callbacks
pub type AppResult<T = ()> = Result<T, AppError>;
