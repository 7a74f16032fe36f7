//! Core statistical components for the blm-solver library
//!
//! This module contains the building blocks that turn a forward signal model
//! into a least-squares problem:
//! - The forward model contract and acquisition descriptors
//! - The Gaussian cost function (conditional and marginal regimes)

pub mod cost;
pub mod model;

use thiserror::Error;
use tracing::error;

/// Core module error types for cost function evaluation
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Predicted signal vector collapsed to near zero; the forward model
    /// parameters are in a degenerate region
    #[error("Degenerate predicted signal: squared norm {squared_norm:.6e} below 1e-4")]
    DegenerateSignal { squared_norm: f64 },

    /// Noise variance estimate dropped below the usable threshold
    #[error("Degenerate noise variance estimate: {variance:.6e} below 1e-4")]
    DegenerateVariance { variance: f64 },

    /// Derivatives requested in a regime that has no trust-region Jacobian
    #[error("The marginal estimation regime does not support Jacobian computation")]
    UnsupportedRegime,

    /// Mismatch between measurement, acquisition, or parameter lengths
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// This method allows for a consistent error logging pattern throughout
    /// the core module, ensuring all errors are properly recorded.
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| CoreError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;
