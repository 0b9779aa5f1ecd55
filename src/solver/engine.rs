//! Thick-restart Lanczos engine behind a reverse-communication surface.
//!
//! The engine never calls the operator. Each [`RestartedLanczos::step`]
//! either asks the caller to apply the operator to a segment of the shared
//! work array ([`RcStep::Apply`]) or reports a terminal state. The caller
//! owns the operator, performs the product, writes the result back into the
//! work array and calls `step` again. This keeps the engine usable with any
//! operator realization, including ones that live on an accelerator and are
//! only reachable through a foreign interface.
//!
//! Internally the engine runs a Lanczos iteration with full two-pass
//! reorthogonalization on a basis of `nkv` vectors, and thick-restarts by
//! compressing the basis onto the `keep` most wanted Ritz vectors plus the
//! residual direction. The projected matrix is dense symmetric and solved
//! with `faer`'s self-adjoint eigendecomposition.

use crate::error::LatticeError;
use crate::solver::blas;
use faer::{Mat, Side};
use num_complex::Complex;
use num_traits::Float;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Which end of the spectrum the iteration targets.
///
/// The operator is Hermitian, so the spectrum is real; the imaginary
/// variants exist for interface parity with general non-symmetric drivers
/// and degenerate to magnitude ordering here.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Spectrum {
    #[serde(rename = "SR")]
    SmallestReal,
    #[serde(rename = "LR")]
    LargestReal,
    #[serde(rename = "SM")]
    SmallestMagnitude,
    #[serde(rename = "LM")]
    LargestMagnitude,
    #[serde(rename = "SI")]
    SmallestImaginary,
    #[serde(rename = "LI")]
    LargestImaginary,
}

impl Spectrum {
    /// The request to hand the engine when the operator is wrapped in a
    /// Chebyshev polynomial. The polynomial maps the wanted end of the
    /// spectrum to the dominant end, so small and large swap pairwise.
    pub fn poly_mapped(self) -> Self {
        match self {
            Spectrum::SmallestReal => Spectrum::LargestReal,
            Spectrum::LargestReal => Spectrum::SmallestReal,
            Spectrum::SmallestMagnitude => Spectrum::LargestMagnitude,
            Spectrum::LargestMagnitude => Spectrum::SmallestMagnitude,
            Spectrum::SmallestImaginary => Spectrum::LargestImaginary,
            Spectrum::LargestImaginary => Spectrum::SmallestImaginary,
        }
    }

    /// Indices of `vals` sorted wanted-first.
    fn order_indices<T: Float>(self, vals: &[T]) -> Vec<usize> {
        let mut idx: Vec<usize> = (0..vals.len()).collect();
        let key = |i: &usize| vals[*i];
        match self {
            Spectrum::SmallestReal => {
                idx.sort_by(|a, b| key(a).partial_cmp(&key(b)).unwrap_or(std::cmp::Ordering::Equal))
            }
            Spectrum::LargestReal => {
                idx.sort_by(|a, b| key(b).partial_cmp(&key(a)).unwrap_or(std::cmp::Ordering::Equal))
            }
            Spectrum::SmallestMagnitude | Spectrum::SmallestImaginary => idx.sort_by(|a, b| {
                key(a)
                    .abs()
                    .partial_cmp(&key(b).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            Spectrum::LargestMagnitude | Spectrum::LargestImaginary => idx.sort_by(|a, b| {
                key(b)
                    .abs()
                    .partial_cmp(&key(a).abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
        }
        idx
    }
}

/// One turn of the reverse-communication protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum RcStep {
    /// Apply the operator to `workd[src..src + n]` and write the result to
    /// `workd[dst..dst + n]`, then call `step` again.
    Apply { src: usize, dst: usize },
    /// The requested number of eigenpairs met the tolerance.
    Converged,
    /// The restart budget ran out; a partial set of pairs may be available.
    MaxIterReached,
    /// A restart cycle had no unwanted Ritz values to purge. Kept for
    /// protocol parity with shift-based drivers; the thick-restart scheme
    /// always purges at least one Ritz value and never produces it.
    NoShifts,
}

enum Phase {
    Fresh,
    AwaitingApply,
    Finished(RcStep),
}

/// Reverse-communication eigenvalue engine for Hermitian operators.
pub struct RestartedLanczos<T: faer::traits::RealField + Float> {
    n: usize,
    nev: usize,
    nkv: usize,
    tol: T,
    max_iter: usize,
    spectrum: Spectrum,

    phase: Phase,
    j: usize,
    iter: usize,
    n_apply: usize,

    basis: Vec<Vec<Complex<T>>>,
    tmat: Mat<T>,
    /// Unit residual vector carried across a restart.
    resid: Vec<Complex<T>>,
    beta_last: T,
    hnorm: T,
    workd: Vec<Complex<T>>,
    ipntr: [usize; 14],
    iparam: [i32; 11],
    rng: SmallRng,

    /// Converged wanted pairs, filled at a terminal state.
    ritz: Vec<T>,
    qcols: Vec<Vec<T>>,
    nconv: usize,
}

impl<T: faer::traits::RealField + Float> RestartedLanczos<T> {
    /// `n` is the operator dimension; the iteration searches for `nev`
    /// eigenpairs of the wanted `spectrum` end in a Krylov space of `nkv`
    /// vectors, restarting at most `max_iter` times.
    pub fn new(
        n: usize,
        nev: usize,
        nkv: usize,
        tol: f64,
        max_iter: usize,
        spectrum: Spectrum,
        seed: u64,
    ) -> Result<Self, LatticeError> {
        if nev < 1 {
            return Err(LatticeError::InvalidEigenConfig(
                "at least one eigenpair must be requested".into(),
            ));
        }
        if nkv <= nev || nkv > n {
            return Err(LatticeError::InvalidEigenConfig(format!(
                "search space nkv={nkv} must satisfy nev < nkv <= n (nev={nev}, n={n})"
            )));
        }
        if !(tol > 0.0) {
            return Err(LatticeError::InvalidEigenConfig(format!(
                "tolerance must be positive, got {tol}"
            )));
        }
        if max_iter < 1 {
            return Err(LatticeError::InvalidEigenConfig(
                "at least one restart cycle is required".into(),
            ));
        }
        let mut iparam = [0i32; 11];
        iparam[0] = 1; // exact shifts
        iparam[2] = max_iter as i32;
        iparam[3] = 1; // block size
        iparam[6] = 1; // standard eigenproblem
        Ok(Self {
            n,
            nev,
            nkv,
            tol: T::from(tol).unwrap_or_else(T::epsilon),
            max_iter,
            spectrum,
            phase: Phase::Fresh,
            j: 0,
            iter: 1,
            n_apply: 0,
            basis: Vec::with_capacity(nkv),
            tmat: Mat::zeros(nkv, nkv),
            resid: vec![Complex::new(T::zero(), T::zero()); n],
            beta_last: T::zero(),
            hnorm: T::one(),
            workd: vec![Complex::new(T::zero(), T::zero()); 3 * n],
            ipntr: [0; 14],
            iparam,
            rng: SmallRng::seed_from_u64(seed),
            ritz: Vec::new(),
            qcols: Vec::new(),
            nconv: 0,
        })
    }

    pub fn workd(&self) -> &[Complex<T>] {
        &self.workd
    }

    pub fn workd_mut(&mut self) -> &mut [Complex<T>] {
        &mut self.workd
    }

    /// Operator applications requested so far.
    pub fn matvecs(&self) -> usize {
        self.n_apply
    }

    /// Restart cycles started so far.
    pub fn iterations(&self) -> usize {
        self.iter
    }

    pub fn nconv(&self) -> usize {
        self.nconv
    }

    /// Advance the iteration. Returns the next protocol action; terminal
    /// actions are sticky and repeat on further calls.
    pub fn step(&mut self) -> Result<RcStep, LatticeError> {
        match self.phase {
            Phase::Fresh => {
                let v0 = self.random_unit_vector();
                self.basis.push(v0);
                self.j = 0;
                self.phase = Phase::AwaitingApply;
                Ok(self.stage_apply())
            }
            Phase::AwaitingApply => {
                self.absorb_applied();
                if self.j < self.nkv {
                    return Ok(self.stage_apply());
                }
                match self.finish_cycle()? {
                    Some(terminal) => {
                        self.iparam[2] = self.iter as i32;
                        self.iparam[4] = self.nconv as i32;
                        self.iparam[8] = self.n_apply as i32;
                        self.phase = Phase::Finished(terminal);
                        Ok(terminal)
                    }
                    None => Ok(self.stage_apply()),
                }
            }
            Phase::Finished(terminal) => Ok(terminal),
        }
    }

    /// Converged eigenvalues (as complex numbers with zero imaginary part)
    /// and the matching Ritz vectors, flattened column-major into a single
    /// buffer of `n * nconv` entries.
    pub fn extract(&self) -> Result<(Vec<Complex<T>>, Vec<Complex<T>>, usize), LatticeError> {
        if !matches!(self.phase, Phase::Finished(_)) {
            return Err(LatticeError::SolverFatal {
                info: -9,
                message: "eigenpair extraction requested before the iteration finished".into(),
            });
        }
        let nconv = self.iparam[4] as usize;
        let zero = Complex::new(T::zero(), T::zero());
        let mut evals = Vec::with_capacity(nconv);
        let mut evecs = vec![zero; self.n * nconv];
        for (i, (&theta, q)) in self.ritz.iter().zip(&self.qcols).enumerate() {
            evals.push(Complex::new(theta, T::zero()));
            let col = &mut evecs[i * self.n..(i + 1) * self.n];
            for (k, v) in self.basis.iter().enumerate() {
                blas::caxpy(Complex::new(q[k], T::zero()), v, col);
            }
        }
        Ok((evals, evecs, nconv))
    }

    fn stage_apply(&mut self) -> RcStep {
        let n = self.n;
        self.workd[..n].copy_from_slice(&self.basis[self.j]);
        self.ipntr[0] = 0;
        self.ipntr[1] = n;
        RcStep::Apply {
            src: self.ipntr[0],
            dst: self.ipntr[1],
        }
    }

    /// Consume `workd[n..2n] = H v_j`: record the projected entries,
    /// orthogonalize, and append the next basis vector.
    fn absorb_applied(&mut self) {
        let n = self.n;
        self.n_apply += 1;
        let mut w = self.workd[n..2 * n].to_vec();

        // Two classical Gram-Schmidt passes against the whole basis. The
        // first-pass coefficient on v_j is the diagonal projection alpha_j.
        let mut alpha = T::zero();
        for pass in 0..2 {
            for (k, v) in self.basis.iter().enumerate() {
                let h = blas::dotc(v, &w);
                if pass == 0 && k == self.j {
                    alpha = h.re;
                }
                blas::caxpy(-h, v, &mut w);
            }
        }
        self.tmat.as_mut()[(self.j, self.j)] = alpha;
        self.hnorm = Float::max(self.hnorm, Float::abs(alpha));

        let beta = blas::norm2(&w);
        let breakdown = beta <= T::epsilon() * self.hnorm;
        if breakdown {
            // Invariant subspace: continue in a fresh random direction with
            // zero coupling to the converged part.
            w = self.random_unit_vector();
            for _ in 0..2 {
                for k in 0..self.basis.len() {
                    let h = blas::dotc(&self.basis[k], &w);
                    blas::caxpy(-h, &self.basis[k], &mut w);
                }
            }
            let nrm = blas::norm2(&w);
            blas::ax(T::one() / nrm, &mut w);
            self.beta_last = T::zero();
        } else {
            self.beta_last = beta;
            blas::ax(T::one() / beta, &mut w);
        }

        if self.j + 1 < self.nkv {
            self.tmat.as_mut()[(self.j, self.j + 1)] = self.beta_last;
            self.tmat.as_mut()[(self.j + 1, self.j)] = self.beta_last;
            self.basis.push(w);
        } else {
            self.resid.copy_from_slice(&w);
        }
        self.j += 1;
    }

    /// Full search space: check convergence, then either stop or compress
    /// onto the wanted Ritz directions and continue.
    fn finish_cycle(&mut self) -> Result<Option<RcStep>, LatticeError> {
        let m = self.nkv;
        let evd = self
            .tmat
            .as_ref()
            .self_adjoint_eigen(Side::Upper)
            .map_err(LatticeError::ProjectedEvdFailure)?;
        let q = evd.U();
        let d = evd.S();
        let theta: Vec<T> = (0..m).map(|i| d[i]).collect();
        let order = self.spectrum.order_indices(&theta);

        // ARPACK-style bound: the pair is accepted once the residual
        // estimate drops below tol * |theta|, floored at machine precision.
        // Only the nev wanted Ritz values are judged; a pair converging at
        // the unwanted end of the window never counts toward nconv.
        let eps23 = Float::powf(T::epsilon(), T::from(2.0 / 3.0).unwrap_or_else(T::one));
        let converged: Vec<usize> = order[..self.nev]
            .iter()
            .copied()
            .filter(|&i| {
                let bound = self.beta_last * Float::abs(q[(m - 1, i)]);
                bound <= self.tol * Float::max(Float::abs(theta[i]), eps23)
            })
            .collect();
        self.nconv = converged.len();

        if self.nconv >= self.nev || self.iter >= self.max_iter {
            self.ritz = converged.iter().map(|&i| theta[i]).collect();
            self.ritz.truncate(self.nconv);
            self.qcols = converged
                .iter()
                .take(self.nconv)
                .map(|&i| (0..m).map(|k| q[(k, i)]).collect())
                .collect();
            let terminal = if self.nconv >= self.nev {
                RcStep::Converged
            } else {
                RcStep::MaxIterReached
            };
            return Ok(Some(terminal));
        }

        // Thick restart: keep the wanted half of the window. keep < nkv by
        // construction, so at least one Ritz value is purged every restart.
        let keep = usize::min(self.nkv - 1, self.nev + (self.nkv - self.nev) / 2);
        let sel = &order[..keep];

        let zero = Complex::new(T::zero(), T::zero());
        let mut compressed: Vec<Vec<Complex<T>>> = Vec::with_capacity(keep + 1);
        for &i in sel {
            let mut u = vec![zero; self.n];
            for (k, v) in self.basis.iter().enumerate() {
                blas::caxpy(Complex::new(q[(k, i)], T::zero()), v, &mut u);
            }
            compressed.push(u);
        }
        compressed.push(self.resid.clone());

        self.tmat = Mat::zeros(self.nkv, self.nkv);
        for (row, &i) in sel.iter().enumerate() {
            self.tmat.as_mut()[(row, row)] = theta[i];
            let border = self.beta_last * q[(m - 1, i)];
            self.tmat.as_mut()[(row, keep)] = border;
            self.tmat.as_mut()[(keep, row)] = border;
        }

        self.basis = compressed;
        self.j = keep;
        self.iter += 1;
        Ok(None)
    }

    fn random_unit_vector(&mut self) -> Vec<Complex<T>> {
        let mut v: Vec<Complex<T>> = (0..self.n)
            .map(|_| {
                let re = T::from(2.0 * self.rng.r#gen::<f64>() - 1.0).unwrap_or_else(T::zero);
                let im = T::from(2.0 * self.rng.r#gen::<f64>() - 1.0).unwrap_or_else(T::zero);
                Complex::new(re, im)
            })
            .collect();
        let nrm = blas::norm2(&v);
        blas::ax(T::one() / nrm, &mut v);
        v
    }
}
