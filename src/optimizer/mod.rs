//! Bound-constrained trust-region optimization.
//!
//! This module hosts the bounded Levenberg-Marquardt solver together with
//! its two injectable sub-solvers:
//! - a bounded one-dimensional scalar minimizer for the damping search
//! - a bounded linear least-squares solver for the trust-region subproblem

use crate::linalg;
use nalgebra::DVector;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;
use web_time as time;

pub mod bounded_lm;
pub mod damping;
pub mod scalar;
pub mod subproblem;

pub use bounded_lm::BoundedLevenbergMarquardt;
pub use scalar::{GoldenSectionMinimizer, ScalarMinimizer};
pub use subproblem::{ActiveSetBvls, BoundedSubproblem};

/// Optimizer-specific error types for blm-solver
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// The bounded subproblem solve failed during the damping search
    #[error("Bounded subproblem solve failed: {0}")]
    SubproblemFailed(String),

    /// Invalid optimization parameters provided
    #[error("Invalid optimization parameters: {0}")]
    InvalidParameters(String),

    /// Numerical instability detected (NaN, Inf in cost, step, or parameters)
    #[error("Numerical instability detected: {0}")]
    NumericalInstability(String),

    /// Linear algebra operation failed
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// This method allows for a consistent error logging pattern throughout
    /// the optimizer module, ensuring all errors are properly recorded.
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| OptimizerError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// # Arguments
    /// * `source_error` - The original error (must implement Debug)
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Status of an optimization process.
///
/// The loop never reports failure to converge as an error; it either
/// converges or runs out of iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// Optimization converged (step-size or objective-stagnation criterion,
    /// or a degenerate zero Jacobian at the start)
    Converged,
    /// Maximum number of iterations reached
    MaxIterationsReached,
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
        }
    }
}

/// Detailed convergence information.
#[derive(Debug, Clone)]
pub struct ConvergenceInfo {
    /// Final parameter update norm
    pub final_step_norm: f64,
    /// Final damping parameter value
    pub final_damping: f64,
    /// Final trust-region radius
    pub final_trust_region_radius: f64,
    /// Cost function evaluation count
    pub cost_evaluations: usize,
    /// Jacobian evaluation count
    pub jacobian_evaluations: usize,
}

impl Display for ConvergenceInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Final step norm: {:.2e}, Final damping: {:.2e}, Final radius: {:.2e}, Cost evaluations: {}, Jacobian evaluations: {}",
            self.final_step_norm,
            self.final_damping,
            self.final_trust_region_radius,
            self.cost_evaluations,
            self.jacobian_evaluations
        )
    }
}

/// Result of a solver execution.
#[derive(Debug, Clone)]
pub struct SolverResult {
    /// Final parameters (last accepted point)
    pub parameters: DVector<f64>,
    /// Final optimization status
    pub status: OptimizationStatus,
    /// Initial cost value (squared residual norm)
    pub initial_cost: f64,
    /// Final cost value (squared residual norm)
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Total time elapsed
    pub elapsed_time: time::Duration,
    /// Convergence statistics
    pub convergence_info: Option<ConvergenceInfo>,
}
