//! Gaussian statistical cost over a forward signal model.
//!
//! The cost wraps a [`SignalModel`] and produces, for a fixed measurement
//! set, the residual vector, the scalar `-2 log L`, the residual Jacobian,
//! and the aggregated gradient of the scalar cost. Two estimation regimes
//! are supported: the conditional (profiled-variance) likelihood and the
//! marginal likelihood that integrates the amplitude and variance nuisance
//! parameters out under a noninformative prior.
//!
//! The closed-form amplitude `b0` and the noise variance estimate `σ²` are
//! state of the cost instance, tied to the last evaluated parameter point.
//! One instance therefore serves exactly one optimization run at a time.

use crate::core::model::{Acquisition, SignalModel};
use crate::core::{CoreError, CoreResult};
use nalgebra::{DMatrix, DVector};
use statrs::function::gamma::ln_gamma;
use std::f64::consts::PI;
use tracing::warn;

/// Threshold below which the predicted signal norm or the variance estimate
/// is considered degenerate.
const DEGENERACY_THRESHOLD: f64 = 1.0e-4;

/// Estimation regime for the Gaussian likelihood.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EstimationRegime {
    /// Profiled-variance likelihood: the amplitude and noise variance are
    /// replaced by their maximum-likelihood point estimates.
    #[default]
    Conditional,
    /// Marginal likelihood: amplitude and variance are integrated out under
    /// a noninformative prior. Has no trust-region Jacobian.
    Marginal,
}

/// Seam between the optimizer and any least-squares cost.
///
/// The optimizer only needs residuals and the residual Jacobian; everything
/// statistical stays behind this trait. [`GaussianCost`] is the shipped
/// implementation.
pub trait ResidualCost {
    /// Residual vector at the given parameters. The squared norm of this
    /// vector is the quantity the optimizer minimizes.
    fn evaluate(&mut self, parameters: &DVector<f64>) -> CoreResult<DVector<f64>>;

    /// Jacobian of the residual vector at the given parameters, one row per
    /// measurement and one column per parameter.
    fn jacobian(&mut self, parameters: &DVector<f64>) -> CoreResult<DMatrix<f64>>;
}

/// Gaussian cost function over a forward signal model.
///
/// For each measurement `i` the residual is `b0 * predicted[i] - observed[i]`
/// where `b0` is the closed-form maximum-likelihood amplitude
/// `Σ observed·predicted / Σ predicted²`. Evaluation also refreshes the
/// noise variance estimate `σ² = (Σ observed² - b0²·Σ predicted²) / N` used
/// by the next cost and derivative computation.
pub struct GaussianCost<M: SignalModel> {
    model: M,
    observed: DVector<f64>,
    acquisitions: Vec<Acquisition>,
    regime: EstimationRegime,

    // State tied to the last evaluated parameter point
    b0: f64,
    sigma_square: f64,
    predicted: DVector<f64>,
    predicted_squared_norm: f64,
    residuals: DVector<f64>,
    predicted_jacobian_products: DVector<f64>,
    evaluated_parameters: Option<DVector<f64>>,
}

impl<M: SignalModel> GaussianCost<M> {
    /// Create a cost function over a measurement set.
    ///
    /// # Errors
    /// Returns `CoreError::InvalidInput` for an empty measurement set and
    /// `CoreError::DimensionMismatch` when observed values and acquisitions
    /// are not paired 1:1.
    pub fn new(
        model: M,
        observed: DVector<f64>,
        acquisitions: Vec<Acquisition>,
    ) -> CoreResult<Self> {
        if observed.is_empty() {
            return Err(CoreError::InvalidInput("empty measurement set".to_string()).log());
        }
        if observed.len() != acquisitions.len() {
            return Err(CoreError::DimensionMismatch {
                expected: observed.len(),
                actual: acquisitions.len(),
            }
            .log());
        }

        let n = observed.len();
        Ok(Self {
            model,
            observed,
            acquisitions,
            regime: EstimationRegime::default(),
            b0: 0.0,
            sigma_square: 1.0,
            predicted: DVector::zeros(n),
            predicted_squared_norm: 0.0,
            residuals: DVector::zeros(n),
            predicted_jacobian_products: DVector::zeros(0),
            evaluated_parameters: None,
        })
    }

    /// Select the estimation regime (conditional by default).
    pub fn with_regime(mut self, regime: EstimationRegime) -> Self {
        self.regime = regime;
        self
    }

    /// Current estimation regime.
    pub fn regime(&self) -> EstimationRegime {
        self.regime
    }

    /// Closed-form amplitude from the last evaluation.
    pub fn b0(&self) -> f64 {
        self.b0
    }

    /// Noise variance estimate carried from the last evaluation.
    pub fn noise_variance(&self) -> f64 {
        self.sigma_square
    }

    /// Override the carried noise variance estimate.
    ///
    /// The estimate seeds the degeneracy check of the next evaluation; it
    /// starts at 1.0 for a fresh instance.
    pub fn set_noise_variance(&mut self, sigma_square: f64) {
        self.sigma_square = sigma_square;
    }

    /// Squared norm of the predicted signal vector from the last evaluation.
    pub fn predicted_squared_norm(&self) -> f64 {
        self.predicted_squared_norm
    }

    /// Residual vector from the last evaluation.
    pub fn residuals(&self) -> &DVector<f64> {
        &self.residuals
    }

    /// Number of measurements.
    pub fn measurement_count(&self) -> usize {
        self.observed.len()
    }

    /// `-2 log L` at the last evaluated point, per the active regime.
    ///
    /// Conditional: `N·(1 + log(2π·σ²))`.
    /// Marginal: `-2·log 2 + (N-1)·log π - 2·log Γ((N+1)/2) + (N+1)·log N
    /// + log(Σ predicted²) + (N+1)·log σ²`.
    pub fn current_cost_value(&self) -> f64 {
        let n = self.observed.len() as f64;

        match self.regime {
            EstimationRegime::Conditional => n * (1.0 + (2.0 * PI * self.sigma_square).ln()),
            EstimationRegime::Marginal => {
                -2.0 * 2.0_f64.ln() + (n - 1.0) * PI.ln() - 2.0 * ln_gamma((n + 1.0) / 2.0)
                    + (n + 1.0) * n.ln()
                    + self.predicted_squared_norm.ln()
                    + (n + 1.0) * self.sigma_square.ln()
            }
        }
    }

    /// Aggregated gradient of the scalar cost, collapsing the Jacobian's
    /// column sums per parameter.
    pub fn current_gradient(&self, jacobian: &DMatrix<f64>) -> CoreResult<DVector<f64>> {
        let n_values = jacobian.nrows();
        let n_params = jacobian.ncols();
        let n = n_values as f64;

        let mut gradient = DVector::zeros(n_params);
        for j in 0..n_params {
            let mut jacobian_sum = 0.0;
            for i in 0..n_values {
                jacobian_sum += jacobian[(i, j)];
            }

            gradient[j] = match self.regime {
                EstimationRegime::Conditional => 2.0 * self.b0 * jacobian_sum / self.sigma_square,
                EstimationRegime::Marginal => {
                    2.0 * (self.predicted_jacobian_products[j] / self.predicted_squared_norm
                        + (n + 1.0) * self.b0 * jacobian_sum / (n * self.sigma_square))
                }
            };
        }

        Ok(gradient)
    }

    fn is_stale(&self, parameters: &DVector<f64>) -> bool {
        match &self.evaluated_parameters {
            Some(cached) => cached != parameters,
            None => true,
        }
    }
}

impl<M: SignalModel> ResidualCost for GaussianCost<M> {
    fn evaluate(&mut self, parameters: &DVector<f64>) -> CoreResult<DVector<f64>> {
        let n_values = self.observed.len();
        self.model.set_parameters(parameters);

        let mut observed_squared_norm = 0.0;
        let mut observed_predicted_product = 0.0;
        self.predicted_squared_norm = 0.0;

        for i in 0..n_values {
            let predicted = self.model.predicted_signal(&self.acquisitions[i]);
            observed_squared_norm += self.observed[i] * self.observed[i];
            self.predicted_squared_norm += predicted * predicted;
            observed_predicted_product += self.observed[i] * predicted;
            self.predicted[i] = predicted;
        }

        if self.predicted_squared_norm < DEGENERACY_THRESHOLD {
            return Err(CoreError::DegenerateSignal {
                squared_norm: self.predicted_squared_norm,
            }
            .log());
        }

        if self.sigma_square < DEGENERACY_THRESHOLD {
            return Err(CoreError::DegenerateVariance {
                variance: self.sigma_square,
            }
            .log());
        }

        self.b0 = observed_predicted_product / self.predicted_squared_norm;

        for i in 0..n_values {
            self.residuals[i] = self.b0 * self.predicted[i] - self.observed[i];
        }

        self.sigma_square = (observed_squared_norm
            - self.b0 * self.b0 * self.predicted_squared_norm)
            / n_values as f64;

        self.evaluated_parameters = Some(parameters.clone());

        Ok(self.residuals.clone())
    }

    fn jacobian(&mut self, parameters: &DVector<f64>) -> CoreResult<DMatrix<f64>> {
        if self.regime == EstimationRegime::Marginal {
            return Err(CoreError::UnsupportedRegime.log());
        }

        // Safety net, not an error: derivatives must match the last
        // evaluated point, so recover by re-evaluating when they do not.
        if self.is_stale(parameters) {
            warn!(
                "Jacobian requested at a different point than the last evaluation, re-evaluating"
            );
            self.evaluate(parameters)?;
        }

        let n_values = self.observed.len();
        let n_params = parameters.len();

        let mut jacobian = DMatrix::zeros(n_values, n_params);
        self.predicted_jacobian_products = DVector::zeros(n_params);

        for i in 0..n_values {
            let signal_gradient = self.model.signal_gradient(&self.acquisitions[i]);
            if signal_gradient.len() != n_params {
                return Err(CoreError::DimensionMismatch {
                    expected: n_params,
                    actual: signal_gradient.len(),
                }
                .log());
            }

            // b0 is held fixed during differentiation even though it depends
            // on every residual; first-order approximation.
            for j in 0..n_params {
                jacobian[(i, j)] = self.b0 * self.predicted[i] * signal_gradient[j]
                    - self.observed[i] * signal_gradient[j];
                self.predicted_jacobian_products[j] += self.predicted[i] * signal_gradient[j];
            }
        }

        Ok(jacobian)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{Vector3, dvector};

    /// Predicts `x[0]` for every acquisition; gradient `[1, 0, ...]`.
    struct ScaledConstant {
        value: f64,
        n_params: usize,
    }

    impl ScaledConstant {
        fn new(n_params: usize) -> Self {
            Self {
                value: 0.0,
                n_params,
            }
        }
    }

    impl SignalModel for ScaledConstant {
        fn set_parameters(&mut self, parameters: &DVector<f64>) {
            self.value = parameters[0];
        }

        fn predicted_signal(&self, _acquisition: &Acquisition) -> f64 {
            self.value
        }

        fn signal_gradient(&self, _acquisition: &Acquisition) -> DVector<f64> {
            let mut gradient = DVector::zeros(self.n_params);
            gradient[0] = 1.0;
            gradient
        }
    }

    /// Predicts zero everywhere.
    struct NullModel;

    impl SignalModel for NullModel {
        fn set_parameters(&mut self, _parameters: &DVector<f64>) {}

        fn predicted_signal(&self, _acquisition: &Acquisition) -> f64 {
            0.0
        }

        fn signal_gradient(&self, _acquisition: &Acquisition) -> DVector<f64> {
            DVector::zeros(1)
        }
    }

    fn acquisitions(n: usize) -> Vec<Acquisition> {
        (0..n)
            .map(|i| Acquisition::new(100.0 * i as f64, Vector3::new(0.0, 0.0, 1.0)))
            .collect()
    }

    #[test]
    fn test_evaluate_profiles_amplitude() -> Result<(), CoreError> {
        let observed = DVector::from_element(5, 2.0);
        let mut cost = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(5))?;

        let residuals = cost.evaluate(&dvector![0.1])?;

        // b0 = Σo·p / Σp² = (5·2·0.1) / (5·0.01) = 20, a perfect fit
        assert!((cost.b0() - 20.0).abs() < 1e-12);
        assert!(residuals.norm() < 1e-12);
        assert!(cost.noise_variance() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_evaluate_is_idempotent() -> Result<(), CoreError> {
        let observed = dvector![2.0, 1.0];
        let mut cost = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(2))?;

        let first = cost.evaluate(&dvector![1.0])?;
        let b0_first = cost.b0();
        let sigma_first = cost.noise_variance();

        let second = cost.evaluate(&dvector![1.0])?;

        assert_eq!(first, second);
        assert_eq!(b0_first, cost.b0());
        assert_eq!(sigma_first, cost.noise_variance());
        // b0 = 3/2, residuals [-0.5, 0.5], σ² = (5 - 2.25·2)/2 = 0.25
        assert!((cost.b0() - 1.5).abs() < 1e-12);
        assert!((cost.noise_variance() - 0.25).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_degenerate_signal_is_rejected() -> Result<(), CoreError> {
        let observed = dvector![1.0, 2.0, 3.0];
        let mut cost = GaussianCost::new(NullModel, observed, acquisitions(3))?;

        match cost.evaluate(&dvector![0.0]) {
            Err(CoreError::DegenerateSignal { .. }) => Ok(()),
            other => panic!("expected DegenerateSignal, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_degenerate_variance_after_perfect_fit() -> Result<(), CoreError> {
        // A perfect fit drives σ² to zero; the evaluation after that must fail.
        let observed = DVector::from_element(4, 3.0);
        let mut cost = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(4))?;

        cost.evaluate(&dvector![1.0])?;
        assert!(cost.noise_variance() < 1e-12);

        match cost.evaluate(&dvector![1.0]) {
            Err(CoreError::DegenerateVariance { .. }) => Ok(()),
            other => panic!("expected DegenerateVariance, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_conditional_cost_closed_form() -> Result<(), CoreError> {
        // For N = 1 and σ² = 1 the conditional cost is 1 + log(2π).
        let observed = dvector![2.0];
        let mut cost = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(1))?;
        cost.evaluate(&dvector![1.0])?;

        cost.set_noise_variance(1.0);
        let value = cost.current_cost_value();
        assert!((value - (1.0 + (2.0 * PI).ln())).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_marginal_cost_closed_form() -> Result<(), CoreError> {
        // N = 2, observed [1, 3], predicted [1, 1]: b0 = 2, σ² = 1, Σp² = 2.
        // The marginal cost collapses to 4·log 2.
        let observed = dvector![1.0, 3.0];
        let mut cost = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(2))?
            .with_regime(EstimationRegime::Marginal);
        cost.evaluate(&dvector![1.0])?;

        assert!((cost.noise_variance() - 1.0).abs() < 1e-12);
        assert!((cost.predicted_squared_norm() - 2.0).abs() < 1e-12);

        let value = cost.current_cost_value();
        assert!(
            (value - 4.0 * 2.0_f64.ln()).abs() < 1e-10,
            "marginal cost {} vs closed form {}",
            value,
            4.0 * 2.0_f64.ln()
        );
        Ok(())
    }

    #[test]
    fn test_marginal_regime_rejects_jacobian() -> Result<(), CoreError> {
        let observed = dvector![1.0, 3.0];
        let mut cost = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(2))?
            .with_regime(EstimationRegime::Marginal);
        cost.evaluate(&dvector![1.0])?;

        match cost.jacobian(&dvector![1.0]) {
            Err(CoreError::UnsupportedRegime) => Ok(()),
            other => panic!("expected UnsupportedRegime, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_stale_jacobian_self_heals() -> Result<(), CoreError> {
        let observed = dvector![2.0, 1.0, 3.0];

        // Reference: evaluate then differentiate at the same point.
        let mut reference = GaussianCost::new(ScaledConstant::new(1), observed.clone(), acquisitions(3))?;
        reference.evaluate(&dvector![0.7])?;
        let expected = reference.jacobian(&dvector![0.7])?;

        // Stale call: evaluated at a different point, the Jacobian call must
        // recover by re-evaluating at the requested point first.
        let mut stale = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(3))?;
        stale.evaluate(&dvector![0.2])?;
        let healed = stale.jacobian(&dvector![0.7])?;

        assert_eq!(expected, healed);
        assert!((stale.b0() - reference.b0()).abs() < 1e-15);
        Ok(())
    }

    #[test]
    fn test_conditional_gradient_formula() -> Result<(), CoreError> {
        let observed = dvector![2.0, 1.0];
        let mut cost = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(2))?;
        cost.evaluate(&dvector![1.0])?;
        let jacobian = cost.jacobian(&dvector![1.0])?;

        // J[(i,0)] = b0·p_i·1 − o_i·1 = residual_i = [-0.5, 0.5]; column sum 0
        assert!((jacobian[(0, 0)] + 0.5).abs() < 1e-12);
        assert!((jacobian[(1, 0)] - 0.5).abs() < 1e-12);

        let gradient = cost.current_gradient(&jacobian)?;
        assert!(gradient[0].abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_mismatched_acquisitions_rejected() {
        let observed = dvector![1.0, 2.0];
        let result = GaussianCost::new(ScaledConstant::new(1), observed, acquisitions(3));
        assert!(matches!(result, Err(CoreError::DimensionMismatch { .. })));
    }
}
