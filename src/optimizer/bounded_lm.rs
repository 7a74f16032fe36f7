//! Bounded trust-region Levenberg-Marquardt algorithm.
//!
//! Solves one local, bound-constrained nonlinear least squares problem
//!
//! ```text
//! min ‖r(x)‖²   subject to   l ≤ x ≤ u
//! ```
//!
//! by the trust-region variant of Levenberg-Marquardt: at each iteration the
//! Jacobian is factorized with a rank-revealing pivoted QR, a nested
//! one-dimensional search picks the damping parameter whose bounded step has
//! a scaled norm matching the trust-region radius, and the radius adapts to
//! the classical gain ratio between the actual and the linear-model cost
//! reduction.
//!
//! # Algorithm Overview
//!
//! At each iteration k:
//! 1. Express the box bounds as offsets from the current point and permute
//!    them into pivot order
//! 2. Run the damping search to obtain a bounded candidate step `h`
//! 3. Evaluate the candidate cost `‖r(xₖ + h)‖²`; the step is rejected when
//!    the cost increases
//! 4. Compute the gain ratio
//!    `ρ = (1 − newCost/cost) / (1 − ‖r + J·h‖²/cost)`
//! 5. Adapt the radius: `ρ ≥ 0.75` doubles Δ, `ρ ≤ 0.25` shrinks Δ by a
//!    factor μ ∈ [0.1, 0.5] derived from a quadratic model of the reduction
//! 6. On acceptance commit the point, refresh the Jacobian, grow the
//!    per-parameter scaling as the running max of column norms, refactorize
//! 7. Check termination: iteration cap, Moré's scaled step-size criterion
//!    `Δ < valueTolerance·‖D∘x‖`, or objective stagnation
//!    `0 ≤ relative decrease < costTolerance`
//!
//! A numerically zero Jacobian at the start is a successful no-op: with no
//! usable gradient information the initial point is returned unchanged.
//!
//! # Scale invariance
//!
//! The trust region is measured through the scaling vector `D`, the running
//! maximum of Jacobian column norms per parameter (floored at a tolerance
//! tied to machine epsilon and the problem dimensions). This keeps the
//! radius meaningful when parameters live on very different scales.
//!
//! # References
//!
//! - Moré, J. J. (1978). "The Levenberg-Marquardt Algorithm: Implementation
//!   and Theory". *Numerical Analysis*, Lecture Notes in Mathematics 630.
//! - Nocedal, J. & Wright, S. (2006). *Numerical Optimization* (2nd ed.).
//!   Springer. Chapter 10.

use crate::core::cost::ResidualCost;
use crate::error::BlmSolverResult;
use crate::linalg::PivotedQr;
use crate::optimizer::damping::{self, DampingOutcome};
use crate::optimizer::scalar::{GoldenSectionMinimizer, ScalarMinimizer};
use crate::optimizer::subproblem::{ActiveSetBvls, BoundedSubproblem, SubproblemContext};
use crate::optimizer::{ConvergenceInfo, OptimizationStatus, OptimizerError, SolverResult};
use nalgebra::DVector;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use tracing::debug;
use web_time::{Duration, Instant};

/// Summary statistics for one bounded Levenberg-Marquardt run.
#[derive(Debug, Clone)]
pub struct BoundedLevenbergMarquardtSummary {
    /// Initial cost value (squared residual norm)
    pub initial_cost: f64,
    /// Final cost value (squared residual norm)
    pub final_cost: f64,
    /// Total number of iterations performed
    pub iterations: usize,
    /// Number of accepted steps
    pub successful_steps: usize,
    /// Number of rejected steps
    pub unsuccessful_steps: usize,
    /// Final damping parameter value
    pub final_damping: f64,
    /// Final trust-region radius
    pub final_trust_region_radius: f64,
    /// Total time elapsed
    pub total_time: Duration,
    /// Detailed per-iteration statistics history
    pub iteration_history: Vec<IterationStats>,
    /// Convergence status
    pub convergence_status: OptimizationStatus,
}

impl Display for BoundedLevenbergMarquardtSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Bounded Levenberg-Marquardt Final Result")?;
        writeln!(f, "{}", self.convergence_status)?;
        writeln!(f)?;
        writeln!(f, "Cost:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_cost)?;
        writeln!(f, "  Final:     {:.6e}", self.final_cost)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_cost - self.final_cost,
            100.0 * (self.initial_cost - self.final_cost) / self.initial_cost.max(1e-12)
        )?;
        writeln!(f)?;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Total:              {}", self.iterations)?;
        writeln!(
            f,
            "  Accepted steps:     {} ({:.1}%)",
            self.successful_steps,
            100.0 * self.successful_steps as f64 / self.iterations.max(1) as f64
        )?;
        writeln!(
            f,
            "  Rejected steps:     {} ({:.1}%)",
            self.unsuccessful_steps,
            100.0 * self.unsuccessful_steps as f64 / self.iterations.max(1) as f64
        )?;
        writeln!(f)?;
        writeln!(f, "Trust Region:")?;
        writeln!(f, "  Final damping: {:.2e}", self.final_damping)?;
        writeln!(f, "  Final radius:  {:.2e}", self.final_trust_region_radius)?;
        writeln!(f)?;
        writeln!(
            f,
            "Total time: {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;

        Ok(())
    }
}

/// Per-iteration statistics for detailed logging (Ceres-style output).
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Iteration number (1-indexed)
    pub iteration: usize,
    /// Candidate cost value at this iteration
    pub cost: f64,
    /// Change in cost relative to the current baseline
    pub cost_change: f64,
    /// L2 norm of the candidate step
    pub step_norm: f64,
    /// Damping parameter chosen by the nested search
    pub lambda: f64,
    /// Trust-region radius after adaptation
    pub trust_radius: f64,
    /// Numerical rank of the Jacobian factorization
    pub rank: usize,
    /// Whether the step was accepted
    pub accepted: bool,
    /// Time taken for this iteration in milliseconds
    pub iter_time_ms: f64,
    /// Total elapsed time since optimization started in milliseconds
    pub total_time_ms: f64,
}

impl IterationStats {
    /// Print table header in Ceres-style format
    pub fn print_header() {
        debug!(
            "{:>4}  {:>13}  {:>13}  {:>13}  {:>11}  {:>11}  {:>4}  {:>11}  {:>13}  {:>6}",
            "iter",
            "cost",
            "cost_change",
            "|step|",
            "lambda",
            "tr_radius",
            "rank",
            "iter_time",
            "total_time",
            "status"
        );
    }

    /// Print single iteration line in Ceres-style format with scientific notation
    pub fn print_line(&self) {
        let status = if self.accepted { "✓" } else { "✗" };

        debug!(
            "{:>4}  {:>13.6e}  {:>13.2e}  {:>13.2e}  {:>11.2e}  {:>11.2e}  {:>4}  {:>9.2}ms  {:>11.2}ms  {:>6}",
            self.iteration,
            self.cost,
            self.cost_change,
            self.step_norm,
            self.lambda,
            self.trust_radius,
            self.rank,
            self.iter_time_ms,
            self.total_time_ms,
            status
        );
    }
}

/// Configuration parameters for the bounded Levenberg-Marquardt optimizer.
///
/// # Builder Pattern
///
/// All configuration options can be set using the builder pattern:
///
/// ```
/// use blm_solver::optimizer::bounded_lm::BoundedLevenbergMarquardtConfig;
/// use nalgebra::DVector;
///
/// let config = BoundedLevenbergMarquardtConfig::new()
///     .with_bounds(DVector::from_element(2, 0.0), DVector::from_element(2, 1.0))
///     .with_max_iterations(200)
///     .with_value_tolerance(1e-8)
///     .with_cost_tolerance(1e-6);
/// ```
///
/// # Convergence Criteria
///
/// The optimizer terminates when ANY of the following conditions is met
/// (never on the very first iteration):
///
/// - **Maximum iterations**: `iteration >= max_iterations`
/// - **Step-size criterion**: `Δ < value_tolerance · ‖D∘x‖` (Moré 8.3)
/// - **Objective stagnation**: `0 ≤ relative cost decrease < cost_tolerance`
#[derive(Debug, Clone)]
pub struct BoundedLevenbergMarquardtConfig {
    /// Per-parameter lower bounds; unbounded below when absent
    pub lower_bounds: Option<DVector<f64>>,
    /// Per-parameter upper bounds; unbounded above when absent
    pub upper_bounds: Option<DVector<f64>>,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Step-size stopping threshold on the scaled parameter norm
    pub value_tolerance: f64,
    /// Relative objective-decrease stopping threshold
    pub cost_tolerance: f64,
}

impl Default for BoundedLevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            lower_bounds: None,
            upper_bounds: None,
            max_iterations: 100,
            value_tolerance: 1.0e-8,
            cost_tolerance: 1.0e-6,
        }
    }
}

impl BoundedLevenbergMarquardtConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set both bound vectors at once.
    pub fn with_bounds(mut self, lower: DVector<f64>, upper: DVector<f64>) -> Self {
        self.lower_bounds = Some(lower);
        self.upper_bounds = Some(upper);
        self
    }

    /// Set the per-parameter lower bounds.
    pub fn with_lower_bounds(mut self, lower: DVector<f64>) -> Self {
        self.lower_bounds = Some(lower);
        self
    }

    /// Set the per-parameter upper bounds.
    pub fn with_upper_bounds(mut self, upper: DVector<f64>) -> Self {
        self.upper_bounds = Some(upper);
        self
    }

    /// Set the maximum number of iterations.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the step-size stopping threshold.
    pub fn with_value_tolerance(mut self, value_tolerance: f64) -> Self {
        self.value_tolerance = value_tolerance;
        self
    }

    /// Set the relative objective-decrease stopping threshold.
    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    /// Print configuration parameters (debug level only)
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:          Bounded Levenberg-Marquardt\n  Max iterations:  {}\n  Value tolerance: {:.2e}\n  Cost tolerance:  {:.2e}\n  Lower bounds:    {}\n  Upper bounds:    {}",
            self.max_iterations,
            self.value_tolerance,
            self.cost_tolerance,
            if self.lower_bounds.is_some() {
                "set"
            } else {
                "unbounded"
            },
            if self.upper_bounds.is_some() {
                "set"
            } else {
                "unbounded"
            }
        );
    }
}

/// Bounded trust-region Levenberg-Marquardt solver.
///
/// Owns its configuration and the two injected sub-solvers: the bounded
/// subproblem solver and the scalar minimizer used by the damping search.
/// All mutable iteration state (current point, residuals, radius, scaling)
/// lives inside a single `optimize` call; one solver instance serves one
/// run at a time.
///
/// # Examples
///
/// ```no_run
/// use blm_solver::optimizer::bounded_lm::{
///     BoundedLevenbergMarquardt, BoundedLevenbergMarquardtConfig,
/// };
/// use nalgebra::DVector;
///
/// let config = BoundedLevenbergMarquardtConfig::new()
///     .with_max_iterations(200)
///     .with_cost_tolerance(1e-8);
///
/// let mut solver = BoundedLevenbergMarquardt::with_config(config);
/// # let _ = solver;
/// ```
pub struct BoundedLevenbergMarquardt {
    config: BoundedLevenbergMarquardtConfig,
    subproblem: Box<dyn BoundedSubproblem>,
    scalar_minimizer: Box<dyn ScalarMinimizer>,
}

impl Default for BoundedLevenbergMarquardt {
    fn default() -> Self {
        Self::new()
    }
}

impl BoundedLevenbergMarquardt {
    /// Create a new solver with default configuration.
    pub fn new() -> Self {
        Self::with_config(BoundedLevenbergMarquardtConfig::default())
    }

    /// Create a new solver with the given configuration.
    pub fn with_config(config: BoundedLevenbergMarquardtConfig) -> Self {
        Self {
            config,
            subproblem: Box::new(ActiveSetBvls::new()),
            scalar_minimizer: Box::new(GoldenSectionMinimizer::new()),
        }
    }

    /// Substitute the bounded subproblem solver.
    pub fn with_subproblem_solver(mut self, subproblem: Box<dyn BoundedSubproblem>) -> Self {
        self.subproblem = subproblem;
        self
    }

    /// Substitute the scalar minimizer used by the damping search.
    pub fn with_scalar_minimizer(mut self, minimizer: Box<dyn ScalarMinimizer>) -> Self {
        self.scalar_minimizer = minimizer;
        self
    }

    /// Minimize the squared residual norm of `cost` starting from
    /// `initial_parameters`, honoring the configured box bounds.
    ///
    /// Returns the last accepted point. Fatal cost-function conditions
    /// (degenerate signal or variance, unsupported regime) abort the call
    /// with no partial result.
    pub fn optimize<C: ResidualCost>(
        &mut self,
        cost: &mut C,
        initial_parameters: &DVector<f64>,
    ) -> BlmSolverResult<SolverResult> {
        let start_time = Instant::now();
        let n_params = initial_parameters.len();
        if n_params == 0 {
            return Err(OptimizerError::InvalidParameters(
                "empty initial parameter vector".to_string(),
            )
            .log()
            .into());
        }

        let lower_bounds = self.resolve_bounds(&self.config.lower_bounds, n_params, f64::NEG_INFINITY)?;
        let upper_bounds = self.resolve_bounds(&self.config.upper_bounds, n_params, f64::INFINITY)?;

        // Initial evaluation pair: residuals and Jacobian at the same point.
        let mut old_parameters = initial_parameters.clone();
        let mut residuals = cost.evaluate(&old_parameters)?;
        let n_values = residuals.len();
        let mut current_value = residuals.norm_squared();
        let initial_cost = current_value;
        let mut cost_evaluations = 1usize;

        let mut jacobian = cost.jacobian(&old_parameters)?;
        let mut jacobian_evaluations = 1usize;
        if jacobian.nrows() != n_values || jacobian.ncols() != n_params {
            return Err(OptimizerError::InvalidParameters(format!(
                "Jacobian shape {}x{} does not match {} residuals and {} parameters",
                jacobian.nrows(),
                jacobian.ncols(),
                n_values,
                n_params
            ))
            .log()
            .into());
        }

        // Degenerate short-circuit: without any usable derivative there is
        // nothing to iterate on; report the initial point as converged.
        let derivative_floor = f64::EPSILON.sqrt();
        if jacobian.iter().all(|value| value.abs() <= derivative_floor) {
            debug!("initial Jacobian is numerically zero, returning the initial point");
            return Ok(SolverResult {
                parameters: old_parameters,
                status: OptimizationStatus::Converged,
                initial_cost,
                final_cost: current_value,
                iterations: 0,
                elapsed_time: start_time.elapsed(),
                convergence_info: Some(ConvergenceInfo {
                    final_step_norm: 0.0,
                    final_damping: 0.0,
                    final_trust_region_radius: 0.0,
                    cost_evaluations,
                    jacobian_evaluations,
                }),
            });
        }

        // Scaling vector: Jacobian column norms, floored at the same
        // epsilon scale the rank test uses.
        let mut d_values = DVector::from_fn(n_params, |j, _| {
            let mut sum = 0.0;
            for i in 0..n_values {
                sum += jacobian[(i, j)] * jacobian[(i, j)];
            }
            sum.sqrt()
        });
        let max_d = d_values.iter().cloned().fold(0.0_f64, f64::max);
        let epsilon_floor =
            20.0 * f64::EPSILON * (n_values + n_params) as f64 * 2.0_f64.powi(max_d.log2().floor() as i32);
        for j in 0..n_params {
            if d_values[j] < epsilon_floor {
                d_values[j] = epsilon_floor;
            }
        }

        let mut delta = 0.0;
        for j in 0..n_params {
            delta += d_values[j] * old_parameters[j] * old_parameters[j];
        }
        let mut delta = delta.sqrt();
        if delta == 0.0 {
            // An all-zero start still needs a usable radius.
            delta = 1.0;
        }

        let mut factorization = PivotedQr::new(jacobian.clone());
        let mut qt_residuals = factorization.q_transpose_product(&residuals);

        let mut iterations = 0usize;
        let mut successful_steps = 0usize;
        let mut unsuccessful_steps = 0usize;
        let mut lambda = 0.0;
        let mut step_norm = 0.0;
        let mut iteration_stats: Vec<IterationStats> = Vec::new();

        if tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration();
            IterationStats::print_header();
        }

        let status;
        loop {
            let iter_start = Instant::now();
            iterations += 1;

            // Bounds relative to the current point, in pivot order.
            let permutation = factorization.permutation();
            let mut lower_permuted = DVector::zeros(n_params);
            let mut upper_permuted = DVector::zeros(n_params);
            for slot in 0..n_params {
                let source = permutation.source_of(slot);
                lower_permuted[slot] = lower_bounds[source] - old_parameters[source];
                upper_permuted[slot] = upper_bounds[source] - old_parameters[source];
            }

            let rank = factorization.rank();
            let context = SubproblemContext {
                factorization: &factorization,
                qt_residuals: &qt_residuals,
                scaling: &d_values,
                lower_bounds_permuted: &lower_permuted,
                upper_bounds_permuted: &upper_permuted,
                delta,
            };
            let DampingOutcome { lambda: new_lambda, step, .. } = damping::search_damping(
                &context,
                self.subproblem.as_ref(),
                self.scalar_minimizer.as_ref(),
            )?;
            lambda = new_lambda;
            step_norm = step.norm();

            let candidate_parameters = &old_parameters + &step;
            let candidate_residuals = cost.evaluate(&candidate_parameters)?;
            cost_evaluations += 1;
            let tentative_value = candidate_residuals.norm_squared();
            let rejected = tentative_value > current_value;

            // Linear-model prediction ‖r + J·h‖² for the gain ratio.
            let predicted_residuals = &residuals + &jacobian * &step;
            let predicted_norm = predicted_residuals.norm_squared();

            let mut gain_ratio = 0.0;
            if !rejected {
                let numerator = 1.0 - tentative_value / current_value;
                let denominator = 1.0 - predicted_norm / current_value;
                if denominator > 0.0 {
                    gain_ratio = numerator / denominator;
                }
            }

            if gain_ratio >= 0.75 {
                delta *= 2.0;
            } else if gain_ratio <= 0.25 {
                delta *= self.shrink_factor(&jacobian, &residuals, &step, current_value, tentative_value);
            }

            if !rejected {
                residuals = candidate_residuals;
                jacobian = cost.jacobian(&candidate_parameters)?;
                jacobian_evaluations += 1;

                for j in 0..n_params {
                    let mut sum = 0.0;
                    for i in 0..n_values {
                        sum += jacobian[(i, j)] * jacobian[(i, j)];
                    }
                    d_values[j] = d_values[j].max(sum.sqrt());
                }

                factorization = PivotedQr::new(jacobian.clone());
                qt_residuals = factorization.q_transpose_product(&residuals);
            }

            if tracing::enabled!(tracing::Level::DEBUG) {
                let stats = IterationStats {
                    iteration: iterations,
                    cost: tentative_value,
                    cost_change: current_value - tentative_value,
                    step_norm,
                    lambda,
                    trust_radius: delta,
                    rank,
                    accepted: !rejected,
                    iter_time_ms: iter_start.elapsed().as_secs_f64() * 1000.0,
                    total_time_ms: start_time.elapsed().as_secs_f64() * 1000.0,
                };
                stats.print_line();
                iteration_stats.push(stats);
            }

            // Termination, skipped on the very first iteration.
            let stop_status = if iterations != 1 {
                self.check_termination(
                    iterations,
                    &candidate_parameters,
                    &d_values,
                    delta,
                    current_value,
                    tentative_value,
                )
            } else if self.config.max_iterations <= 1 {
                Some(OptimizationStatus::MaxIterationsReached)
            } else {
                None
            };

            // Commit the accepted point as the new baseline regardless of
            // whether termination fired this round.
            if !rejected {
                old_parameters = candidate_parameters;
                current_value = tentative_value;
                successful_steps += 1;
            } else {
                unsuccessful_steps += 1;
            }

            if let Some(stop) = stop_status {
                status = stop;
                break;
            }
        }

        let elapsed = start_time.elapsed();

        if tracing::enabled!(tracing::Level::DEBUG) {
            let summary = BoundedLevenbergMarquardtSummary {
                initial_cost,
                final_cost: current_value,
                iterations,
                successful_steps,
                unsuccessful_steps,
                final_damping: lambda,
                final_trust_region_radius: delta,
                total_time: elapsed,
                iteration_history: iteration_stats,
                convergence_status: status,
            };
            debug!("{}", summary);
        }

        Ok(SolverResult {
            parameters: old_parameters,
            status,
            initial_cost,
            final_cost: current_value,
            iterations,
            elapsed_time: elapsed,
            convergence_info: Some(ConvergenceInfo {
                final_step_norm: step_norm,
                final_damping: lambda,
                final_trust_region_radius: delta,
                cost_evaluations,
                jacobian_evaluations,
            }),
        })
    }

    fn resolve_bounds(
        &self,
        bounds: &Option<DVector<f64>>,
        n_params: usize,
        unbounded: f64,
    ) -> Result<DVector<f64>, OptimizerError> {
        match bounds {
            Some(values) => {
                if values.len() != n_params {
                    return Err(OptimizerError::InvalidParameters(format!(
                        "bound vector length {} does not match {} parameters",
                        values.len(),
                        n_params
                    ))
                    .log());
                }
                Ok(values.clone())
            }
            None => Ok(DVector::from_element(n_params, unbounded)),
        }
    }

    /// Trust-region shrink factor μ ∈ [0.1, 0.5] for a poor step, from a
    /// quadratic model of the cost reduction along the step.
    fn shrink_factor(
        &self,
        jacobian: &nalgebra::DMatrix<f64>,
        residuals: &DVector<f64>,
        step: &DVector<f64>,
        current_value: f64,
        tentative_value: f64,
    ) -> f64 {
        if tentative_value > 100.0 * current_value {
            return 0.1;
        }
        if tentative_value <= current_value {
            return 0.5;
        }

        // Directional derivative stepᵀ·Jᵀ·r normalized by the current cost.
        let gradient = jacobian.transpose() * residuals;
        let directional = (step.dot(&gradient) / current_value).clamp(-1.0, 0.0);
        let denominator = directional + 0.5 * (1.0 - tentative_value / current_value);
        if denominator == 0.0 {
            return 0.5;
        }
        (0.5 * directional / denominator).clamp(0.1, 0.5)
    }

    fn check_termination(
        &self,
        iterations: usize,
        candidate_parameters: &DVector<f64>,
        d_values: &DVector<f64>,
        delta: f64,
        current_value: f64,
        tentative_value: f64,
    ) -> Option<OptimizationStatus> {
        if iterations >= self.config.max_iterations {
            return Some(OptimizationStatus::MaxIterationsReached);
        }

        // Moré's step-size criterion on the scaled parameter norm.
        let mut scaled_norm = 0.0;
        for j in 0..candidate_parameters.len() {
            let scaled = d_values[j] * candidate_parameters[j];
            scaled_norm += scaled * scaled;
        }
        if delta < self.config.value_tolerance * scaled_norm.sqrt() {
            return Some(OptimizationStatus::Converged);
        }

        // Objective stagnation; a negative relative decrease (rejected step)
        // never converges by itself.
        let relative_decrease = if current_value > 0.0 {
            (current_value - tentative_value) / current_value
        } else {
            0.0
        };
        if (0.0..self.config.cost_tolerance).contains(&relative_decrease) {
            return Some(OptimizationStatus::Converged);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CoreResult;
    use nalgebra::{DMatrix, dmatrix, dvector};

    /// Plain linear least-squares cost `r(x) = A·x − b` with exact Jacobian.
    struct LinearResidualCost {
        matrix: DMatrix<f64>,
        offset: DVector<f64>,
    }

    impl ResidualCost for LinearResidualCost {
        fn evaluate(&mut self, parameters: &DVector<f64>) -> CoreResult<DVector<f64>> {
            Ok(&self.matrix * parameters - &self.offset)
        }

        fn jacobian(&mut self, _parameters: &DVector<f64>) -> CoreResult<DMatrix<f64>> {
            Ok(self.matrix.clone())
        }
    }

    /// Constant residuals with an identically zero Jacobian.
    struct FlatCost;

    impl ResidualCost for FlatCost {
        fn evaluate(&mut self, _parameters: &DVector<f64>) -> CoreResult<DVector<f64>> {
            Ok(dvector![1.0, 2.0])
        }

        fn jacobian(&mut self, parameters: &DVector<f64>) -> CoreResult<DMatrix<f64>> {
            Ok(DMatrix::zeros(2, parameters.len()))
        }
    }

    fn test_system() -> LinearResidualCost {
        LinearResidualCost {
            matrix: dmatrix![1.0, 0.0; 1.0, 1.0; 1.0, 2.0],
            offset: dvector![2.0, 3.0, 4.0],
        }
    }

    #[test]
    fn test_config_builder() {
        let config = BoundedLevenbergMarquardtConfig::new()
            .with_max_iterations(42)
            .with_value_tolerance(1e-10)
            .with_cost_tolerance(1e-9)
            .with_bounds(DVector::zeros(3), DVector::from_element(3, 1.0));

        assert_eq!(config.max_iterations, 42);
        assert_eq!(config.value_tolerance, 1e-10);
        assert_eq!(config.cost_tolerance, 1e-9);
        assert_eq!(config.lower_bounds.as_ref().map(|b| b.len()), Some(3));
        assert_eq!(config.upper_bounds.as_ref().map(|b| b.len()), Some(3));
    }

    #[test]
    fn test_zero_jacobian_short_circuits() -> Result<(), Box<dyn std::error::Error>> {
        let initial = dvector![0.3, -0.7];
        let mut solver = BoundedLevenbergMarquardt::new();
        let result = solver.optimize(&mut FlatCost, &initial)?;

        assert_eq!(result.status, OptimizationStatus::Converged);
        assert_eq!(result.iterations, 0);
        assert_eq!(result.parameters, initial);
        assert_eq!(result.initial_cost, result.final_cost);
        Ok(())
    }

    #[test]
    fn test_unconstrained_linear_fit_converges() -> Result<(), Box<dyn std::error::Error>> {
        // A·(2, 1) = b exactly, so the optimum is (2, 1) with zero cost.
        let mut cost = test_system();
        let mut solver = BoundedLevenbergMarquardt::new();
        let result = solver.optimize(&mut cost, &dvector![0.0, 0.0])?;

        assert_eq!(result.status, OptimizationStatus::Converged);
        assert!(
            (result.parameters[0] - 2.0).abs() < 1e-3,
            "x0 = {}",
            result.parameters[0]
        );
        assert!(
            (result.parameters[1] - 1.0).abs() < 1e-3,
            "x1 = {}",
            result.parameters[1]
        );
        assert!(result.final_cost < 1e-5, "final cost {}", result.final_cost);
        assert!(result.final_cost <= result.initial_cost);
        Ok(())
    }

    #[test]
    fn test_bounded_linear_fit_stops_at_the_bound() -> Result<(), Box<dyn std::error::Error>> {
        // With x0 ≤ 1 the optimum moves to (1, 1.6) with cost 1.2.
        let mut cost = test_system();
        let config = BoundedLevenbergMarquardtConfig::new()
            .with_bounds(DVector::from_element(2, -10.0), dvector![1.0, 10.0]);
        let mut solver = BoundedLevenbergMarquardt::with_config(config);
        let result = solver.optimize(&mut cost, &dvector![0.0, 0.0])?;

        assert!(result.parameters[0] <= 1.0 + 1e-10);
        assert!(
            (result.parameters[0] - 1.0).abs() < 1e-3,
            "x0 = {}",
            result.parameters[0]
        );
        assert!(
            (result.parameters[1] - 1.6).abs() < 1e-3,
            "x1 = {}",
            result.parameters[1]
        );
        assert!(
            (result.final_cost - 1.2).abs() < 1e-3,
            "final cost {}",
            result.final_cost
        );
        Ok(())
    }

    #[test]
    fn test_mismatched_bounds_rejected() {
        let mut cost = test_system();
        let config = BoundedLevenbergMarquardtConfig::new()
            .with_lower_bounds(DVector::zeros(5));
        let mut solver = BoundedLevenbergMarquardt::with_config(config);

        let result = solver.optimize(&mut cost, &dvector![0.0, 0.0]);
        assert!(result.is_err());
    }

    #[test]
    fn test_single_iteration_cap_terminates() -> Result<(), Box<dyn std::error::Error>> {
        let mut cost = test_system();
        let config = BoundedLevenbergMarquardtConfig::new().with_max_iterations(1);
        let mut solver = BoundedLevenbergMarquardt::with_config(config);
        let result = solver.optimize(&mut cost, &dvector![0.0, 0.0])?;

        assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
        assert_eq!(result.iterations, 1);
        Ok(())
    }
}
