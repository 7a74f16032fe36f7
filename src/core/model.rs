//! Forward signal model contract.
//!
//! The cost function never computes a predicted signal itself; it delegates
//! to an implementation of [`SignalModel`]. A model receives the current
//! parameter vector once per evaluation point and is then queried per
//! acquisition for a predicted scalar value and, when derivatives are
//! needed, for the gradient of that value with respect to every parameter.

use nalgebra::{DVector, Vector3};

/// Descriptor of a single measurement's acquisition settings.
///
/// For diffusion-weighted imaging this is a b-value and an encoding
/// direction; any forward model that can map such a pair to a scalar signal
/// fits the [`SignalModel`] contract.
#[derive(Debug, Clone, PartialEq)]
pub struct Acquisition {
    /// Diffusion weighting strength (b-value, s/mm²)
    pub strength: f64,
    /// Unit encoding direction
    pub direction: Vector3<f64>,
}

impl Acquisition {
    /// Create a new acquisition descriptor.
    pub fn new(strength: f64, direction: Vector3<f64>) -> Self {
        Self {
            strength,
            direction,
        }
    }
}

/// Contract for forward signal models consumed by the cost function.
///
/// Implementations hold their own parameter state: `set_parameters` is
/// called once per evaluation point, after which `predicted_signal` and
/// `signal_gradient` must be consistent with that point. No other side
/// channel exists between the cost function and the model.
pub trait SignalModel {
    /// Push the current parameter vector into the model.
    fn set_parameters(&mut self, parameters: &DVector<f64>);

    /// Predicted scalar signal for one acquisition at the current parameters.
    fn predicted_signal(&self, acquisition: &Acquisition) -> f64;

    /// Gradient of the predicted signal with respect to every parameter,
    /// at the current parameters. Length equals the parameter count.
    fn signal_gradient(&self, acquisition: &Acquisition) -> DVector<f64>;
}

/// Isotropic mono-exponential decay model: `s(b) = exp(-b * d)`.
///
/// The single parameter is the apparent diffusivity `d`. Useful as a
/// minimal real model for tests and examples; direction is ignored.
#[derive(Debug, Clone, Default)]
pub struct MonoExponential {
    diffusivity: f64,
}

impl MonoExponential {
    /// Create a model with zero diffusivity; call `set_parameters` before use.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalModel for MonoExponential {
    fn set_parameters(&mut self, parameters: &DVector<f64>) {
        self.diffusivity = parameters[0];
    }

    fn predicted_signal(&self, acquisition: &Acquisition) -> f64 {
        (-acquisition.strength * self.diffusivity).exp()
    }

    fn signal_gradient(&self, acquisition: &Acquisition) -> DVector<f64> {
        let signal = (-acquisition.strength * self.diffusivity).exp();
        DVector::from_element(1, -acquisition.strength * signal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axial() -> Vector3<f64> {
        Vector3::new(0.0, 0.0, 1.0)
    }

    #[test]
    fn test_mono_exponential_prediction() {
        let mut model = MonoExponential::new();
        model.set_parameters(&DVector::from_element(1, 1.0e-3));

        let acq = Acquisition::new(1000.0, axial());
        let signal = model.predicted_signal(&acq);
        assert!((signal - (-1.0_f64).exp()).abs() < 1e-12);

        // b = 0 always predicts unit signal
        let b0 = Acquisition::new(0.0, axial());
        assert!((model.predicted_signal(&b0) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn test_mono_exponential_gradient_matches_finite_difference() {
        let mut model = MonoExponential::new();
        let d = 1.5e-3;
        model.set_parameters(&DVector::from_element(1, d));

        let acq = Acquisition::new(800.0, axial());
        let gradient = model.signal_gradient(&acq);
        assert_eq!(gradient.len(), 1);

        let h = 1e-9;
        let mut perturbed = MonoExponential::new();
        perturbed.set_parameters(&DVector::from_element(1, d + h));
        let fd = (perturbed.predicted_signal(&acq) - model.predicted_signal(&acq)) / h;

        assert!(
            (gradient[0] - fd).abs() < 1e-3,
            "analytic {} vs finite difference {}",
            gradient[0],
            fd
        );
    }
}
