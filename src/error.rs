//! LatticeError: unified error type for sublattice public APIs.
//!
//! Used throughout the crate to provide robust, non-panicking error handling
//! for all public APIs. Solver *warnings* (partial results) are not errors;
//! they travel in [`crate::solver::driver::EigenOutcome`].

use thiserror::Error;

/// Unified error type for sublattice operations.
#[derive(Debug, Error)]
pub enum LatticeError {
    /// A `GridKey` component does not divide the corresponding process-grid
    /// dimension.
    #[error("grid key {key:?} does not divide process grid {grid:?} along axis {axis}")]
    NonDivisibleGridKey {
        key: [usize; 4],
        grid: [usize; 4],
        axis: usize,
    },
    /// A reshape was invoked with an empty base-field list.
    #[error("reshape requires at least one base field")]
    EmptyFieldList,
    /// Base fields passed to a reshape do not share the same local geometry.
    #[error("base field {index} has extents {found:?}, expected {expected:?}")]
    GeometryMismatch {
        index: usize,
        expected: [usize; 4],
        found: [usize; 4],
    },
    /// The collect field's extents are not `block_dim * X_base`.
    #[error("collect field has extents {found:?}, expected {expected:?}")]
    CollectExtentMismatch {
        expected: [usize; 4],
        found: [usize; 4],
    },
    /// An offset copy between fields with incompatible extents.
    #[error("cannot copy at offset {offset:?}: source extents {src:?}, destination extents {dst:?}")]
    OffsetCopyMismatch {
        src: [usize; 4],
        dst: [usize; 4],
        offset: [usize; 4],
    },
    /// A serialization buffer of the wrong size was handed to a field.
    #[error("field buffer size mismatch: expected {expected} bytes, got {found}")]
    BufferSizeMismatch { expected: usize, found: usize },
    /// Point-to-point communication with a neighbor failed.
    #[error("communication error with rank {neighbor}: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Invalid eigensolver parameter combination.
    #[error("invalid eigensolver configuration: {0}")]
    InvalidEigenConfig(String),
    /// Invalid Chebyshev acceleration window or degree.
    #[error("invalid Chebyshev configuration: amin={amin}, amax={amax}, degree={degree}")]
    InvalidChebyshevConfig {
        amin: f64,
        amax: f64,
        degree: usize,
    },
    /// The operator collaborator reported a failure; the driver aborts.
    #[error("operator application failed: {0}")]
    OperatorFailure(String),
    /// Dimension mismatch between the operator and a vector handed to it.
    #[error("dimension mismatch: operator expects length {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
    /// The dense eigendecomposition of the projected matrix failed.
    #[error("eigendecomposition of the projected matrix failed: {0:?}")]
    ProjectedEvdFailure(faer::linalg::evd::EvdError),
    /// Fatal reverse-communication failure, analogous to ARPACK `info < 0`.
    #[error("eigensolver engine failed with code {info}: {message}")]
    SolverFatal { info: i32, message: String },
}
