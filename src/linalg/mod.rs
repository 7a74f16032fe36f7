pub mod qr;

use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;

use nalgebra::DVector;

/// Linear algebra specific error types for blm-solver
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular or near-singular matrix detected
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// Least-squares subsystem solve failed
    #[error("Least-squares solve failed: {0}")]
    LeastSquaresFailed(String),
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// This method allows for a consistent error logging pattern throughout
    /// the linalg module, ensuring all errors are properly recorded.
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| LinAlgError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the original source error from a third-party library
    ///
    /// # Arguments
    /// * `source_error` - The original error from the third-party library (must implement Debug)
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

pub use qr::PivotedQr;

/// Explicit bijective permutation between original indices and pivot order.
///
/// Slot `k` of the pivoted ordering holds original index `source_of(k)`;
/// original index `i` sits in slot `slot_of(i)`. Keeping both directions in
/// one type replaces the parallel pivot/inverse-pivot index arrays that
/// column-pivoted factorizations otherwise drag along.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    forward: Vec<usize>,
    inverse: Vec<usize>,
}

impl Permutation {
    /// Identity permutation over `n` indices.
    pub fn identity(n: usize) -> Self {
        Self {
            forward: (0..n).collect(),
            inverse: (0..n).collect(),
        }
    }

    /// Number of indices.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the permutation is empty.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Exchange the contents of two slots, keeping both directions in sync.
    pub fn swap(&mut self, slot_a: usize, slot_b: usize) {
        self.forward.swap(slot_a, slot_b);
        self.inverse[self.forward[slot_a]] = slot_a;
        self.inverse[self.forward[slot_b]] = slot_b;
    }

    /// Original index held by a slot of the pivoted ordering.
    pub fn source_of(&self, slot: usize) -> usize {
        self.forward[slot]
    }

    /// Slot of the pivoted ordering holding an original index.
    pub fn slot_of(&self, source: usize) -> usize {
        self.inverse[source]
    }

    /// Reorder a vector into pivot order: `out[slot] = v[source_of(slot)]`.
    pub fn permute(&self, vector: &DVector<f64>) -> DVector<f64> {
        DVector::from_fn(self.len(), |slot, _| vector[self.forward[slot]])
    }

    /// Undo the pivot ordering: `out[source_of(slot)] = v[slot]`.
    pub fn unpermute(&self, vector: &DVector<f64>) -> DVector<f64> {
        let mut out = DVector::zeros(self.len());
        for slot in 0..self.len() {
            out[self.forward[slot]] = vector[slot];
        }
        out
    }
}

impl Display for Permutation {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Permutation({:?})", self.forward)
    }
}
