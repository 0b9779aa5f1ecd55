//! Operator collaborator interface.

use crate::error::LatticeError;
use num_complex::Complex;
use num_traits::Float;

/// The normal operator `H = M†M` of an externally configured linear map on
/// complex vectors.
///
/// Contract: `apply_normal` is deterministic at fixed precision, Hermitian
/// positive-semidefinite, and never aliases `out` with `input` (enforced by
/// the borrow signature).
pub trait NormalOperator<T: Float> {
    /// Vector length the operator acts on (`local_volume * n_spin * n_color`
    /// for a spinor field).
    fn dim(&self) -> usize;

    /// `out <- M†M input`.
    fn apply_normal(
        &self,
        out: &mut [Complex<T>],
        input: &[Complex<T>],
    ) -> Result<(), LatticeError>;
}

/// Host-side verification operator: `H = diag(d_0, .., d_{n-1})`.
///
/// Hermitian by construction and positive-semidefinite whenever the entries
/// are non-negative; its spectrum is known exactly, which makes it the
/// reference operator for driver and accelerator tests.
#[derive(Clone, Debug)]
pub struct DiagonalOperator<T> {
    diag: Vec<T>,
}

impl<T: Float> DiagonalOperator<T> {
    pub fn new(diag: Vec<T>) -> Self {
        Self { diag }
    }

    /// `diag(1, 2, .., n)`.
    pub fn counting(n: usize) -> Self {
        Self {
            diag: (1..=n).map(|i| T::from(i).unwrap_or_else(T::zero)).collect(),
        }
    }
}

impl<T: Float> NormalOperator<T> for DiagonalOperator<T> {
    fn dim(&self) -> usize {
        self.diag.len()
    }

    fn apply_normal(
        &self,
        out: &mut [Complex<T>],
        input: &[Complex<T>],
    ) -> Result<(), LatticeError> {
        if input.len() != self.diag.len() || out.len() != self.diag.len() {
            return Err(LatticeError::DimensionMismatch {
                expected: self.diag.len(),
                found: input.len(),
            });
        }
        for ((o, i), d) in out.iter_mut().zip(input).zip(&self.diag) {
            *o = i.scale(*d);
        }
        Ok(())
    }
}
