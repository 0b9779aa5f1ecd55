//! Thin façade over intra-process (threaded) or inter-process (MPI) message
//! passing for a 4-D process grid.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees). All
//! handles are **waitable** but non-blocking — the reshape engine calls
//! `.wait()` before it trusts that a buffer is ready.
//!
//! Tags are `u64` because the reshape tag rule `src * total_ranks + dst`
//! exceeds `u16` on any non-trivial grid.

use crate::comm::grid::{GridKey, N_DIM, coordinate_from_index, index_from_coordinate};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::{Arc, Barrier};
use std::thread::JoinHandle;

/// Non-blocking communication interface over a 4-D process grid.
pub trait Communicator: Send + Sync {
    /// Handle returned by `isend`.
    type SendHandle: Wait + Send;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait + Send;

    /// Rank id of the local process, in `0..self.size()`.
    fn rank(&self) -> usize;

    /// Process counts along each lattice axis.
    fn dims(&self) -> [usize; N_DIM];

    /// Grid coordinates of the local rank, axis 0 fastest.
    fn coords(&self) -> [usize; N_DIM] {
        coordinate_from_index(self.rank(), GridKey(self.dims())).as_array()
    }

    /// Total number of ranks in the grid.
    fn size(&self) -> usize {
        GridKey(self.dims()).product()
    }

    /// The fixed bijection from grid coordinates to rank ids.
    fn rank_from_coords(&self, coords: [usize; N_DIM]) -> usize {
        index_from_coordinate(GridKey(coords), GridKey(self.dims()))
    }

    fn isend(&self, peer: usize, tag: u64, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u64, buf: &mut [u8]) -> Self::RecvHandle;

    /// Globally synchronizing barrier across all ranks of the grid.
    fn barrier(&self);

    /// Staging buffer for an outgoing or incoming message. Backends that
    /// benefit from pinned host memory override this.
    fn alloc_staging(&self, bytes: usize) -> Vec<u8> {
        vec![0u8; bytes]
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial unit tests. Does not support
/// loopback delivery; use [`ThreadComm::grid`] with a `[1, 1, 1, 1]` grid
/// when self-to-self messages matter.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn dims(&self) -> [usize; N_DIM] {
        [1; N_DIM]
    }
    fn isend(&self, _peer: usize, _tag: u64, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u64, _buf: &mut [u8]) {}
    fn barrier(&self) {}
}

// --- ThreadComm: intra-process / multi-thread ---

type Key = (usize, usize, u64); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// Receive handle backed by a polling thread.
pub struct ThreadHandle {
    buf: Arc<Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for ThreadHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.buf.lock();
        guard.take()
    }
}

/// One rank of an in-process grid. All ranks of a grid share a mailbox and a
/// barrier; messages between them (including self-to-self loopback) are
/// matched on `(src, dst, tag)` in FIFO order.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    dims: [usize; N_DIM],
    mailbox: Arc<Mailbox>,
    fence: Arc<Barrier>,
}

impl ThreadComm {
    /// Creates one communicator per rank of a `dims` grid. The returned
    /// endpoints are meant to be moved into one thread each.
    pub fn grid(dims: [usize; N_DIM]) -> Vec<ThreadComm> {
        let size = GridKey(dims).product();
        let mailbox: Arc<Mailbox> = Arc::new(DashMap::new());
        let fence = Arc::new(Barrier::new(size));
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                dims,
                mailbox: Arc::clone(&mailbox),
                fence: Arc::clone(&fence),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = ThreadHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn dims(&self) -> [usize; N_DIM] {
        self.dims
    }

    fn isend(&self, peer: usize, tag: u64, buf: &[u8]) -> Self::SendHandle {
        // The payload is copied up front, so the send completes immediately.
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::from(buf.to_vec()));
    }

    fn irecv(&self, peer: usize, tag: u64, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (peer, self.rank, tag);
        let mailbox = Arc::clone(&self.mailbox);
        let slot = Arc::new(Mutex::new(None));
        let slot_clone = Arc::clone(&slot);
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                let msg = mailbox
                    .get_mut(&key)
                    .and_then(|mut queue| queue.pop_front());
                if let Some(bytes) = msg {
                    let n = bytes.len().min(buf_len);
                    *slot_clone.lock() = Some(bytes[..n].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        ThreadHandle {
            buf: slot,
            handle: Some(handle),
        }
    }

    fn barrier(&self) {
        self.fence.wait();
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// One MPI rank of the process grid. Construction initializes MPI; the
    /// universe is held alive for the lifetime of the communicator.
    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        world: SimpleCommunicator,
        rank: usize,
        dims: [usize; N_DIM],
    }

    impl MpiComm {
        /// `dims` must multiply to the MPI world size.
        pub fn new(dims: [usize; N_DIM]) -> Self {
            let universe = mpi::initialize().expect("MPI already initialized");
            let world = universe.world();
            let rank = world.rank() as usize;
            assert_eq!(GridKey(dims).product(), world.size() as usize);
            Self {
                _universe: universe,
                world,
                rank,
                dims,
            }
        }
    }

    pub struct MpiHandle {
        req: mpi::request::Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
        deliver: bool,
    }

    // The raw buffer pointer is only touched from `wait`.
    unsafe impl Send for MpiHandle {}

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            let boxed = unsafe { Box::from_raw(self.buf) };
            self.deliver.then(|| boxed.into_vec())
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn rank(&self) -> usize {
            self.rank
        }

        fn dims(&self) -> [usize; N_DIM] {
            self.dims
        }

        fn isend(&self, peer: usize, tag: u64, buf: &[u8]) -> MpiHandle {
            // Reshape tags fit in the MPI tag range for any realistic grid.
            let staged: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let ptr = staged as *mut [u8];
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, &*staged, tag as i32);
            MpiHandle {
                req,
                buf: ptr,
                deliver: false,
            }
        }

        fn irecv(&self, peer: usize, tag: u64, buf: &mut [u8]) -> MpiHandle {
            let staged: &'static mut [u8] = Box::leak(vec![0u8; buf.len()].into_boxed_slice());
            let ptr = staged as *mut [u8];
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, staged, tag as i32);
            MpiHandle {
                req,
                buf: ptr,
                deliver: true,
            }
        }

        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_round_trip_two_ranks() {
        let comms = ThreadComm::grid([2, 1, 1, 1]);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comms[1].irecv(0, 7, &mut recv_buf);
        let send_handle = comms[0].isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle.wait().expect("expected data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn loopback_delivery() {
        let comms = ThreadComm::grid([1, 1, 1, 1]);
        let mut buf = [0u8; 3];
        let h = comms[0].irecv(0, 42, &mut buf);
        comms[0].isend(0, 42, &[9, 8, 7]);
        assert_eq!(h.wait().unwrap(), vec![9, 8, 7]);
    }

    #[test]
    fn fifo_order_per_tag() {
        let comms = ThreadComm::grid([2, 1, 1, 1]);
        for i in 0..10u8 {
            comms[0].isend(1, 3, &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            let mut b = [0u8; 1];
            let h = comms[1].irecv(0, 3, &mut b);
            out.push(h.wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn coords_and_rank_bijection() {
        let comms = ThreadComm::grid([2, 2, 1, 2]);
        for comm in &comms {
            assert_eq!(comm.rank_from_coords(comm.coords()), comm.rank());
        }
        assert_eq!(comms[3].coords(), [1, 1, 0, 0]);
    }

    #[test]
    fn barrier_synchronizes_all_ranks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let comms = ThreadComm::grid([2, 2, 1, 1]);
        let arrived = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let arrived = Arc::clone(&arrived);
                std::thread::spawn(move || {
                    arrived.fetch_add(1, Ordering::SeqCst);
                    comm.barrier();
                    // After the barrier every rank must have arrived.
                    assert_eq!(arrived.load(Ordering::SeqCst), 4);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
