#![cfg_attr(docsrs, feature(doc_cfg))]
//! # sublattice
//!
//! sublattice is a Rust library of host-side utilities for distributed
//! lattice field theory codes. It provides process-grid bookkeeping, field
//! reshaping between a full communicator and split sub-grids, pluggable
//! communication backends, and a deflation-grade eigensolver with Chebyshev
//! polynomial acceleration.
//!
//! ## Features
//! - 4-D process-grid arithmetic ([`comm::GridKey`]) with lexicographic
//!   rank/coordinate maps shared by every backend
//! - Split/join reshaping of lattice fields across sub-grid partitions
//!   ([`reshape::split_field`], [`reshape::join_field`])
//! - Pluggable communication backends (serial, threaded, MPI) behind the
//!   [`comm::Communicator`] trait
//! - Reverse-communication thick-restart eigensolver for Hermitian normal
//!   operators ([`solver::eigensolve`]) with optional Chebyshev acceleration
//! - SU(3) gauge-field construction helpers for host-side verification
//!   ([`field::su3`])
//!
//! ## Determinism
//!
//! All randomized decisions use `SmallRng` seeds drawn from configuration so
//! runs are reproducible. Unit tests fix seeds explicitly to ensure
//! deterministic behavior.
//!
//! ## Usage
//! Add `sublattice` as a dependency in your `Cargo.toml` and enable features
//! as needed:
//!
//! ```toml
//! [dependencies]
//! sublattice = "0.3"
//! # Optional features:
//! # features = ["mpi-support"]
//! ```

pub mod comm;
pub mod error;
pub mod field;
pub mod reshape;
pub mod solver;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::comm::{Communicator, GridKey, NoComm, ThreadComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::MpiComm;
    pub use crate::error::LatticeError;
    pub use crate::field::{LatticeField, LatticeGeometry, SiteField, SiteOrder, Su3Matrix};
    pub use crate::reshape::{join_field, split_field};
    pub use crate::solver::{
        ChebyshevParams, EigenOutcome, EigenParams, EigenSolution, NormalOperator, Spectrum,
        eigensolve,
    };
}
