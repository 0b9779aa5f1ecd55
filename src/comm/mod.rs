//! Process-grid topology and point-to-point transport.

pub mod communicator;
pub mod grid;

pub use communicator::{Communicator, NoComm, ThreadComm, Wait};
#[cfg(feature = "mpi-support")]
pub use communicator::MpiComm;
pub use grid::{GridKey, N_DIM, coordinate_from_index, index_from_coordinate};
