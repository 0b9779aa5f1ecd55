//! Deflation-grade eigensolver for Hermitian normal operators.
//!
//! The subsystem splits into an operator-agnostic reverse-communication
//! engine ([`engine::RestartedLanczos`]), a Chebyshev accelerator
//! ([`chebyshev::poly_op`]) and a driver ([`driver::eigensolve`]) that
//! services the protocol against a concrete [`operator::NormalOperator`].

pub mod blas;
pub mod chebyshev;
pub mod driver;
pub mod engine;
pub mod operator;

pub use chebyshev::ChebyshevParams;
pub use driver::{EigenOutcome, EigenParams, EigenSolution, eigensolve};
pub use engine::{RcStep, RestartedLanczos, Spectrum};
pub use operator::{DiagonalOperator, NormalOperator};
