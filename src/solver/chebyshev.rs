//! Chebyshev polynomial acceleration of the normal operator.
//!
//! [`poly_op`] computes `out = P_d(H) x` for the shifted and rescaled
//! Chebyshev polynomial of degree `d` on the window `[amin, amax]`, mapped
//! to `[-1, 1]`. Eigenvalues of `H` outside the window are amplified while
//! the window itself is damped, so an Arnoldi iteration run on `P_d(H)`
//! resolves the wanted end of the spectrum in far fewer matrix-vector
//! products.

use crate::error::LatticeError;
use crate::solver::blas;
use crate::solver::operator::NormalOperator;
use num_complex::Complex;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Acceleration window and degree. Requires `amax > amin > 0` and
/// `degree >= 1`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChebyshevParams {
    pub amin: f64,
    pub amax: f64,
    pub degree: usize,
}

impl ChebyshevParams {
    pub fn validate(&self) -> Result<(), LatticeError> {
        if !(self.amax > self.amin && self.amin > 0.0) || self.degree < 1 {
            return Err(LatticeError::InvalidChebyshevConfig {
                amin: self.amin,
                amax: self.amax,
                degree: self.degree,
            });
        }
        Ok(())
    }
}

/// `out <- P_d(H) x`.
///
/// The three-term recurrence, with `delta = (amax - amin)/2`,
/// `theta = (amax + amin)/2` and `sigma_1 = -delta/theta`:
///
/// ```text
/// y_1 = (sigma_1/delta) H x + x
/// sigma_k = 1 / (2/sigma_1 - sigma_{k-1})
/// y_k = d1 H y_{k-1} + d2 y_{k-1} + d3 y_{k-2}
///       with d1 = 2 sigma_k/delta, d2 = -d1 theta, d3 = -sigma_k sigma_{k-1}
/// ```
///
/// Two scratch vectors are allocated on entry and dropped on exit; the
/// accelerator holds no state across calls.
pub fn poly_op<T, O>(
    op: &O,
    out: &mut [Complex<T>],
    input: &[Complex<T>],
    params: &ChebyshevParams,
) -> Result<(), LatticeError>
where
    T: Float,
    O: NormalOperator<T> + ?Sized,
{
    params.validate()?;
    let a = T::from(params.amin).unwrap_or_else(T::zero);
    let b = T::from(params.amax).unwrap_or_else(T::zero);
    let two = T::one() + T::one();

    let delta = (b - a) / two;
    let theta = (b + a) / two;
    let sigma1 = -delta / theta;

    let d1 = sigma1 / delta;
    let d2 = T::one();

    op.apply_normal(out, input)?;
    blas::axpby(d2, input, d1, out);

    if params.degree == 1 {
        return Ok(());
    }

    let mut tm1 = input.to_vec();
    let mut tm2 = out.to_vec();
    let mut sigma_old = sigma1;

    for _ in 2..=params.degree {
        let sigma = T::one() / (two / sigma1 - sigma_old);
        let d1 = two * sigma / delta;
        let d2 = -d1 * theta;
        let d3 = -sigma * sigma_old;

        op.apply_normal(out, &tm2)?;
        blas::ax(d3, &mut tm1);
        blas::cxpaypbz(&tm1, d2, &tm2, d1, out);
        tm1.copy_from_slice(&tm2);
        tm2.copy_from_slice(out);
        sigma_old = sigma;
    }
    Ok(())
}
