//! Error types shared by every layer of the simulator

use thiserror::Error;

/// Missing or malformed configuration. Fatal to the repetition being set up.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing parameter [{section}] {key}")]
    Missing { section: String, key: String },

    #[error("Malformed parameter [{section}] {key} = {value:?}: {reason}")]
    Malformed {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn missing(section: &str, key: &str) -> Self {
        ConfigError::Missing {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    pub fn malformed(section: &str, key: &str, value: &str, reason: impl ToString) -> Self {
        ConfigError::Malformed {
            section: section.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Decimal arithmetic failures
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Decimal overflow")]
    Overflow,

    #[error("Value is not a finite number")]
    NotFinite,
}

/// Text wire format errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("Empty message")]
    Empty,

    #[error("Unexpected message tag: expected {expected:?}, found {found:?}")]
    UnexpectedTag { expected: String, found: String },

    #[error("Missing field {0}")]
    MissingField(usize),

    #[error("Bad field {index}: {value:?}")]
    BadField { index: usize, value: String },
}

/// Result type for decimal operations
pub type ArithResult<T> = Result<T, ArithmeticError>;
