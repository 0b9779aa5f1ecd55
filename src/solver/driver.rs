//! Driver gluing the reverse-communication engine to an operator.
//!
//! [`eigensolve`] owns the protocol loop: it requests the search under the
//! Chebyshev-mapped spectrum when acceleration is on, services every
//! [`RcStep::Apply`] against the caller's operator, and post-processes the
//! extracted pairs (Rayleigh quotients under the bare operator, magnitude
//! ordering) into an [`EigenSolution`].

use crate::error::LatticeError;
use crate::solver::blas;
use crate::solver::chebyshev::{self, ChebyshevParams};
use crate::solver::engine::{RcStep, RestartedLanczos, Spectrum};
use crate::solver::operator::NormalOperator;
use log::{debug, warn};
use num_complex::Complex;
use num_traits::Float;
use serde::{Deserialize, Serialize};

/// Full eigensolver request.
#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct EigenParams {
    /// Number of eigenpairs wanted.
    pub nev: usize,
    /// Krylov search-space size, `nev < nkv <= n`.
    pub nkv: usize,
    /// Relative residual tolerance on each accepted pair.
    pub tol: f64,
    /// Restart budget.
    pub max_iter: usize,
    /// Problem mode; only `1` (standard eigenproblem) is supported.
    pub mode: i32,
    pub spectrum: Spectrum,
    /// Run the iteration on the Chebyshev polynomial of the operator.
    pub use_poly_acc: bool,
    pub poly: ChebyshevParams,
    /// Seed for the deterministic start vector.
    pub seed: u64,
}

impl EigenParams {
    pub fn validate(&self, n: usize) -> Result<(), LatticeError> {
        if self.mode != 1 {
            return Err(LatticeError::InvalidEigenConfig(format!(
                "only the standard eigenproblem (mode 1) is supported, got mode {}",
                self.mode
            )));
        }
        if self.nev < 1 || self.nkv <= self.nev || self.nkv > n {
            return Err(LatticeError::InvalidEigenConfig(format!(
                "need 1 <= nev < nkv <= n, got nev={} nkv={} n={}",
                self.nev, self.nkv, n
            )));
        }
        if !(self.tol > 0.0) {
            return Err(LatticeError::InvalidEigenConfig(format!(
                "tolerance must be positive, got {}",
                self.tol
            )));
        }
        if self.use_poly_acc {
            self.poly.validate()?;
        }
        Ok(())
    }
}

/// How the iteration ended.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EigenOutcome {
    Converged,
    /// Restart budget exhausted; `nconv` pairs still met the tolerance.
    MaxIterReached,
    /// A restart cycle found nothing to purge. Carried for protocol parity
    /// with shift-based engines; the built-in thick-restart engine never
    /// reports it.
    NoShiftsApplied,
}

/// Converged eigenpairs plus iteration statistics.
pub struct EigenSolution<T> {
    /// Eigenvalues of the bare operator, one per converged pair.
    pub evals: Vec<Complex<T>>,
    /// Ritz vectors, column-major, `n` entries per pair.
    pub evecs: Vec<Complex<T>>,
    pub n: usize,
    pub nconv: usize,
    /// Pair indices ordered by ascending eigenvalue magnitude.
    pub sorted_idx: Vec<usize>,
    pub outcome: EigenOutcome,
    pub iterations: usize,
    /// Reverse-communication operator applications (each counts a full
    /// polynomial application when acceleration is on).
    pub mat_applies: usize,
}

impl<T> EigenSolution<T> {
    pub fn eigenvector(&self, i: usize) -> &[Complex<T>] {
        &self.evecs[i * self.n..(i + 1) * self.n]
    }
}

/// Solve for `params.nev` eigenpairs of `op`.
///
/// With `use_poly_acc` the engine iterates on `P(H)` and its Ritz values
/// belong to the polynomial; the returned `evals` are always eigenvalues of
/// the bare operator, recomputed as Rayleigh quotients over the converged
/// Ritz vectors.
pub fn eigensolve<T, O>(op: &O, params: &EigenParams) -> Result<EigenSolution<T>, LatticeError>
where
    T: faer::traits::RealField + Float,
    O: NormalOperator<T> + ?Sized,
{
    let n = op.dim();
    params.validate(n)?;

    let request = if params.use_poly_acc {
        params.spectrum.poly_mapped()
    } else {
        params.spectrum
    };
    debug!(
        "eigensolve: n={} nev={} nkv={} tol={:e} spectrum={:?} poly_acc={}",
        n, params.nev, params.nkv, params.tol, request, params.use_poly_acc
    );

    let mut engine = RestartedLanczos::new(
        n,
        params.nev,
        params.nkv,
        params.tol,
        params.max_iter,
        request,
        params.seed,
    )?;

    let zero = Complex::new(T::zero(), T::zero());
    let mut scratch = vec![zero; n];
    let outcome = loop {
        match engine.step()? {
            RcStep::Apply { src, dst } => {
                let x = engine.workd()[src..src + n].to_vec();
                if params.use_poly_acc {
                    chebyshev::poly_op(op, &mut scratch, &x, &params.poly)?;
                } else {
                    op.apply_normal(&mut scratch, &x)?;
                }
                engine.workd_mut()[dst..dst + n].copy_from_slice(&scratch);
            }
            RcStep::Converged => break EigenOutcome::Converged,
            RcStep::MaxIterReached => {
                warn!(
                    "eigensolve: restart budget {} exhausted with {} of {} pairs converged",
                    params.max_iter,
                    engine.nconv(),
                    params.nev
                );
                break EigenOutcome::MaxIterReached;
            }
            RcStep::NoShifts => {
                warn!("eigensolve: restart cycle could not apply shifts");
                break EigenOutcome::NoShiftsApplied;
            }
        }
    };

    let (mut evals, evecs, nconv) = engine.extract()?;

    if params.use_poly_acc {
        // The engine converged Ritz pairs of P(H); the vectors are shared
        // with H, the values are not. Recover them from the bare operator.
        for i in 0..nconv {
            let x = &evecs[i * n..(i + 1) * n];
            op.apply_normal(&mut scratch, x)?;
            let num = blas::dotc(x, &scratch);
            let den = blas::dotc(x, x).re;
            evals[i] = num.scale(T::one() / den);
        }
    }

    let mut sorted_idx: Vec<usize> = (0..nconv).collect();
    sorted_idx.sort_by(|&a, &b| {
        evals[a]
            .norm_sqr()
            .partial_cmp(&evals[b].norm_sqr())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    debug!(
        "eigensolve: {:?} after {} restarts, {} operator applications, nconv={}",
        outcome,
        engine.iterations(),
        engine.matvecs(),
        nconv
    );

    Ok(EigenSolution {
        evals,
        evecs,
        n,
        nconv,
        sorted_idx,
        outcome,
        iterations: engine.iterations(),
        mat_applies: engine.matvecs(),
    })
}
