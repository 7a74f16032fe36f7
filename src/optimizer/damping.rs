//! Damping parameter search.
//!
//! For one outer iteration the damping search picks the non-negative
//! Levenberg-Marquardt parameter λ whose bounded step has a scaled norm
//! matching the trust-region radius. When the undamped bounded solution is
//! already inside the trust region, λ = 0 is returned directly; otherwise a
//! bounded one-dimensional search minimizes the squared boundary defect
//! `(‖D·step(λ)‖ − Δ)²` over an analytically bracketed interval.

use crate::optimizer::scalar::ScalarMinimizer;
use crate::optimizer::subproblem::{BoundedSubproblem, SubproblemContext};
use crate::optimizer::OptimizerResult;
use nalgebra::DVector;

/// Relative tolerance on the damping argument during the 1-D search.
const LAMBDA_X_REL_TOL: f64 = 1.0e-3;
/// Relative tolerance on the squared boundary defect during the 1-D search.
const LAMBDA_F_REL_TOL: f64 = 1.0e-3;
/// Evaluation cap for the 1-D search.
const LAMBDA_MAX_EVALUATIONS: usize = 500;

/// Result of one damping search.
pub struct DampingOutcome {
    /// The damping parameter at the optimum; zero when the undamped bounded
    /// solution already satisfies the trust region
    pub lambda: f64,
    /// The bounded step, original parameter order
    pub step: DVector<f64>,
    /// Signed boundary defect `‖D·step‖ − Δ` of the returned step
    pub boundary_defect: f64,
}

/// Find the damping parameter and its bounded step for one iteration.
pub fn search_damping(
    context: &SubproblemContext<'_>,
    subproblem: &dyn BoundedSubproblem,
    minimizer: &dyn ScalarMinimizer,
) -> OptimizerResult<DampingOutcome> {
    // Undamped probe first: a non-positive defect means the bounded
    // Gauss-Newton step is already inside the trust region.
    let undamped = subproblem.solve(context, 0.0)?;
    if undamped.cost <= 0.0 {
        return Ok(DampingOutcome {
            lambda: 0.0,
            step: undamped.step,
            boundary_defect: undamped.cost,
        });
    }

    let upper_bound = lambda_upper_bound(context);
    if !upper_bound.is_finite() || upper_bound <= 0.0 {
        // No usable bracket; the undamped step is the best available.
        return Ok(DampingOutcome {
            lambda: 0.0,
            step: undamped.step,
            boundary_defect: undamped.cost,
        });
    }

    let mut objective = |lambda: f64| match subproblem.solve(context, lambda) {
        Ok(solution) => solution.cost * solution.cost,
        Err(_) => f64::INFINITY,
    };

    let lambda = minimizer.minimize(
        &mut objective,
        0.0,
        upper_bound,
        0.5 * upper_bound,
        LAMBDA_X_REL_TOL,
        LAMBDA_F_REL_TOL,
        LAMBDA_MAX_EVALUATIONS,
    );

    let solution = subproblem.solve(context, lambda)?;
    Ok(DampingOutcome {
        lambda,
        step: solution.step,
        boundary_defect: solution.cost,
    })
}

/// Analytic upper bound for λ: the norm of the permuted gradient `Rᵀ·Qᵀr`,
/// scaled entrywise by `D`, divided by the trust-region radius.
fn lambda_upper_bound(context: &SubproblemContext<'_>) -> f64 {
    let factorization = context.factorization;
    let rank = factorization.rank();
    let permutation = factorization.permutation();
    let n_params = permutation.len();
    let r = factorization.r();

    let mut gradient_permuted: DVector<f64> = DVector::zeros(n_params);
    for column in 0..n_params {
        let live_rows = rank.min(column + 1);
        for row in 0..live_rows {
            gradient_permuted[column] += r[(row, column)] * context.qt_residuals[row];
        }
    }

    let mut sum: f64 = 0.0;
    for source in 0..n_params {
        let scaled = gradient_permuted[permutation.slot_of(source)] / context.scaling[source];
        sum += scaled * scaled;
    }

    sum.sqrt() / context.delta
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::PivotedQr;
    use crate::optimizer::scalar::GoldenSectionMinimizer;
    use crate::optimizer::subproblem::ActiveSetBvls;
    use nalgebra::{dmatrix, dvector};

    struct Fixture {
        factorization: PivotedQr,
        qt_residuals: DVector<f64>,
        scaling: DVector<f64>,
        lower: DVector<f64>,
        upper: DVector<f64>,
    }

    impl Fixture {
        fn diagonal() -> Self {
            let jacobian = dmatrix![2.0, 0.0; 0.0, 1.0];
            let residuals = dvector![-4.0, -1.0];
            let factorization = PivotedQr::new(jacobian);
            let qt_residuals = factorization.q_transpose_product(&residuals);
            Self {
                factorization,
                qt_residuals,
                scaling: dvector![1.0, 1.0],
                lower: DVector::from_element(2, f64::NEG_INFINITY),
                upper: DVector::from_element(2, f64::INFINITY),
            }
        }

        fn context(&self, delta: f64) -> SubproblemContext<'_> {
            SubproblemContext {
                factorization: &self.factorization,
                qt_residuals: &self.qt_residuals,
                scaling: &self.scaling,
                lower_bounds_permuted: &self.lower,
                upper_bounds_permuted: &self.upper,
                delta,
            }
        }
    }

    #[test]
    fn test_zero_damping_inside_trust_region() -> Result<(), crate::optimizer::OptimizerError> {
        let fixture = Fixture::diagonal();
        // Gauss-Newton step norm is √5; a radius of 10 contains it.
        let outcome = search_damping(
            &fixture.context(10.0),
            &ActiveSetBvls::new(),
            &GoldenSectionMinimizer::new(),
        )?;

        assert_eq!(outcome.lambda, 0.0);
        assert!((outcome.step[0] - 2.0).abs() < 1e-10);
        assert!((outcome.step[1] - 1.0).abs() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_damped_step_lands_on_trust_region_boundary()
    -> Result<(), crate::optimizer::OptimizerError> {
        let fixture = Fixture::diagonal();
        let delta = 1.0;
        let outcome = search_damping(
            &fixture.context(delta),
            &ActiveSetBvls::new(),
            &GoldenSectionMinimizer::new(),
        )?;

        assert!(outcome.lambda > 0.0);
        let mut scaled_norm = 0.0;
        for i in 0..2 {
            let scaled = fixture.scaling[i] * outcome.step[i];
            scaled_norm += scaled * scaled;
        }
        let scaled_norm = scaled_norm.sqrt();
        assert!(
            (scaled_norm - delta).abs() < 0.25 * delta,
            "scaled step norm {} should sit near the radius {}",
            scaled_norm,
            delta
        );
        Ok(())
    }

    #[test]
    fn test_lambda_upper_bound_brackets_the_root() {
        let fixture = Fixture::diagonal();
        let delta = 1.0;
        let upper = lambda_upper_bound(&fixture.context(delta));

        // Closed form: ‖Jᵀr‖/Δ = ‖(8, 1)‖ = √65
        assert!((upper - 65.0_f64.sqrt()).abs() < 1e-10);

        // At the bracket end the damped step is strictly inside the radius.
        let solution = ActiveSetBvls::new()
            .solve(&fixture.context(delta), upper)
            .unwrap();
        assert!(solution.cost <= 0.0);
    }
}
