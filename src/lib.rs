//! # BLM Solver
//!
//! A Rust library for bound-constrained nonlinear least squares optimization,
//! built around a trust-region Levenberg-Marquardt algorithm and a Gaussian
//! statistical cost function for diffusion signal model fitting.
//!
//! ## Features
//!
//! - **Bounded trust-region Levenberg-Marquardt**: per-parameter box bounds
//!   honored at every iteration through a bounded linear least-squares
//!   subproblem
//! - **Rank-revealing pivoted QR**: the Jacobian is factorized with column
//!   pivoting, and only the numerically well-determined directions drive the
//!   step computation
//! - **Nested damping search**: the Levenberg-Marquardt damping parameter is
//!   found by a bounded one-dimensional search that keeps the scaled step on
//!   the trust-region boundary
//! - **Two estimation regimes**: profiled-variance (conditional) and marginal
//!   Gaussian likelihoods over a pluggable forward signal model
//! - **Injectable sub-solvers**: the scalar minimizer and the bounded
//!   subproblem solver are strategy traits with shipped defaults
//!
//! ## Typical usage
//!
//! ```no_run
//! use blm_solver::core::cost::GaussianCost;
//! use blm_solver::core::model::{Acquisition, MonoExponential};
//! use blm_solver::optimizer::bounded_lm::{
//!     BoundedLevenbergMarquardt, BoundedLevenbergMarquardtConfig,
//! };
//! use nalgebra::{DVector, Vector3};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let acquisitions: Vec<Acquisition> = (0..8)
//!     .map(|i| Acquisition::new(250.0 * i as f64, Vector3::new(0.0, 0.0, 1.0)))
//!     .collect();
//! let observed = DVector::from_fn(8, |i, _| (-250.0 * i as f64 * 1.1e-3).exp());
//!
//! let mut cost = GaussianCost::new(MonoExponential::new(), observed, acquisitions)?;
//!
//! let config = BoundedLevenbergMarquardtConfig::new()
//!     .with_bounds(DVector::from_element(1, 0.0), DVector::from_element(1, 4.0e-3))
//!     .with_max_iterations(100);
//!
//! let mut solver = BoundedLevenbergMarquardt::with_config(config);
//! let result = solver.optimize(&mut cost, &DVector::from_element(1, 2.0e-3))?;
//! println!("fitted diffusivity: {}", result.parameters[0]);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod optimizer;

// Re-export core types
pub use crate::core::cost::{EstimationRegime, GaussianCost, ResidualCost};
pub use crate::core::model::{Acquisition, MonoExponential, SignalModel};
pub use crate::error::{BlmSolverError, BlmSolverResult};

pub use crate::linalg::{Permutation, PivotedQr};
#[cfg(feature = "logging")]
pub use crate::logger::{init_logger, init_logger_with_level};
pub use crate::optimizer::{
    ConvergenceInfo, OptimizationStatus, SolverResult,
    bounded_lm::{BoundedLevenbergMarquardt, BoundedLevenbergMarquardtConfig},
    scalar::{GoldenSectionMinimizer, ScalarMinimizer},
    subproblem::{ActiveSetBvls, BoundedSubproblem},
};
