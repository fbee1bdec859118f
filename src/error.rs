//! Error types for the control pipeline.

use thiserror::Error;

/// Errors raised synchronously by the operation that received bad input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ArenaError {
    /// A matrix argument does not have the expected number of rows or columns
    #[error("shape mismatch for {what}: expected {expected}, got {actual}")]
    ShapeMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Invalid construction parameters
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A command addressed an agent that does not exist
    #[error("agent index {index} out of range for {agents} agents")]
    IndexOutOfRange { index: usize, agents: usize },
}

impl ArenaError {
    /// Creates a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Fails with `ShapeMismatch` unless `actual == expected`.
    pub fn check_columns(what: &'static str, expected: usize, actual: usize) -> Result<(), Self> {
        if expected == actual {
            Ok(())
        } else {
            Err(Self::ShapeMismatch {
                what,
                expected,
                actual,
            })
        }
    }
}
