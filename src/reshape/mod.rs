//! Distributed split/join reshaping of lattice fields.
//!
//! Splitting over a [`GridKey`] `K` views the process topology as
//! `grid_dim x block_dim` with `grid_dim = P / K` and `block_dim = K`. After
//! [`split_field`] a rank in the `K`-fold replicated group holds a collect
//! field that is `block_dim` times bigger per axis, stitched together from
//! `product(K)` source ranks; [`join_field`] is the exact inverse. Site
//! payloads are moved bit-for-bit.
//!
//! Both operations are collective: all ranks must invoke them in the same
//! program order. Every posted send is drained before returning, and a
//! terminal barrier precedes return on the success path.

use crate::comm::communicator::{Communicator, Wait};
use crate::comm::grid::{GridKey, coordinate_from_index};
use crate::error::LatticeError;
use crate::field::site_field::{LatticeField, copy_field_offset};
use log::{debug, warn};

/// Derived quantities shared by split and join.
struct ReshapePlan {
    full_idx: GridKey,
    rank: usize,
    total_rank: usize,
    grid_dim: GridKey,
    block_dim: GridKey,
    n_replicates: usize,
}

fn plan<C: Communicator>(comm: &C, key: GridKey) -> Result<ReshapePlan, LatticeError> {
    let full_dim = GridKey(comm.dims());
    if let Some(axis) = (0..crate::comm::grid::N_DIM)
        .find(|&d| key[d] == 0 || full_dim[d] % key[d] != 0)
    {
        return Err(LatticeError::NonDivisibleGridKey {
            key: key.as_array(),
            grid: full_dim.as_array(),
            axis,
        });
    }
    let grid_dim = full_dim / key; // Communicator grid.
    let block_dim = full_dim / grid_dim; // Partitioning of the collect field.
    Ok(ReshapePlan {
        full_idx: GridKey(comm.coords()),
        rank: comm.rank(),
        total_rank: full_dim.product(),
        grid_dim,
        block_dim,
        n_replicates: key.product(),
    })
}

fn check_fields<F: LatticeField>(
    base: &[F],
    collect: &F,
    plan: &ReshapePlan,
) -> Result<(), LatticeError> {
    if base.is_empty() {
        return Err(LatticeError::EmptyFieldList);
    }
    let expected = base[0].extents();
    if let Some((index, found)) = base
        .iter()
        .map(|f| f.extents())
        .enumerate()
        .find(|&(_, x)| x != expected)
    {
        return Err(LatticeError::GeometryMismatch {
            index,
            expected,
            found,
        });
    }
    let collect_expected = (GridKey(expected) * plan.block_dim).as_array();
    if collect.extents() != collect_expected {
        return Err(LatticeError::CollectExtentMismatch {
            expected: collect_expected,
            found: collect.extents(),
        });
    }
    if base.len() > plan.n_replicates {
        warn!(
            "reshape given {} base fields but only {} replicas; extras are unused",
            base.len(),
            plan.n_replicates
        );
    }
    Ok(())
}

/// Gathers `product(K)` base fields (cycling modulo `base.len()`) into the
/// collect field of each `K`-fold replicated rank group.
///
/// Base fields are read-only inputs; `collect` must have extents
/// `K * X_base` and is fully populated on success.
pub fn split_field<F, C>(
    collect: &mut F,
    base: &[F],
    key: GridKey,
    comm: &C,
) -> Result<(), LatticeError>
where
    F: LatticeField,
    C: Communicator,
{
    let plan = plan(comm, key)?;
    check_fields(base, collect, &plan)?;

    let meta = &base[0];
    let bytes = meta.total_bytes();
    let thread_dim = GridKey(meta.extents());

    // Send cycles: post everything before awaiting any receive. A staging
    // failure stops posting; the sends already in flight are still drained
    // below before the error propagates.
    let mut pending_sends = Vec::with_capacity(plan.n_replicates);
    let mut send_bufs = Vec::with_capacity(plan.n_replicates);
    let mut maybe_err = None;
    for i in 0..plan.n_replicates {
        let grid_idx = coordinate_from_index(i, key);
        let block_idx = plan.full_idx / plan.block_dim;
        let dst_idx = grid_idx * plan.grid_dim + block_idx;

        let dst_rank = comm.rank_from_coords(dst_idx.as_array());
        let tag = (plan.rank * plan.total_rank + dst_rank) as u64;
        debug!("split: rank {:4} -> rank {:4}, tag {}", plan.rank, dst_rank, tag);

        let mut buffer = comm.alloc_staging(bytes);
        if let Err(err) = base[i % base.len()].copy_to_buffer(&mut buffer) {
            maybe_err = Some(err);
            break;
        }
        pending_sends.push(comm.isend(dst_rank, tag, &buffer));
        send_bufs.push(buffer);
    }

    // Receive cycles: each slab is awaited, deserialized into a scratch
    // field, and stitched into the collect field at its 4-D offset. Errors
    // are recorded, never returned, until every receive has been serviced.
    let mut buffer_field = meta.make_like();
    if maybe_err.is_none() {
        for i in 0..plan.n_replicates {
            let thread_idx = coordinate_from_index(i, key);
            let src_idx = (plan.full_idx % plan.grid_dim) * plan.block_dim + thread_idx;

            let src_rank = comm.rank_from_coords(src_idx.as_array());
            let tag = (src_rank * plan.total_rank + plan.rank) as u64;
            debug!("split: rank {:4} <- rank {:4}, tag {}", plan.rank, src_rank, tag);

            let mut recv_buffer = comm.alloc_staging(bytes);
            let handle = comm.irecv(src_rank, tag, &mut recv_buffer);
            match handle.wait() {
                Some(data) if data.len() == bytes => {
                    if maybe_err.is_none() {
                        let offset = thread_idx * thread_dim;
                        let mut stitched = buffer_field.copy_from_buffer(&data);
                        if stitched.is_ok() {
                            stitched =
                                copy_field_offset(collect, &buffer_field, offset.as_array());
                        }
                        if let Err(err) = stitched {
                            maybe_err = Some(err);
                        }
                    }
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(LatticeError::CommError {
                        neighbor: src_rank,
                        source: format!("expected {bytes} bytes, got {}", data.len()).into(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(LatticeError::CommError {
                        neighbor: src_rank,
                        source: format!("failed to receive subvolume from rank {src_rank}").into(),
                    });
                }
                _ => {} // already failing; just drain
            }
        }
    }

    // Always drain send handles before returning, even on failure.
    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    if let Some(err) = maybe_err {
        return Err(err);
    }
    comm.barrier();
    Ok(())
}

/// Exact inverse of [`split_field`]: carves each rank's collect field into
/// `product(K)` slabs and scatters them back onto the base-field grid.
///
/// Base fields are overwritten (slot `i % base.len()` receives replica `i`).
pub fn join_field<F, C>(
    base: &mut [F],
    collect: &F,
    key: GridKey,
    comm: &C,
) -> Result<(), LatticeError>
where
    F: LatticeField,
    C: Communicator,
{
    let plan = plan(comm, key)?;
    check_fields(base, collect, &plan)?;

    let bytes = base[0].total_bytes();
    let thread_dim = GridKey(base[0].extents());
    let mut buffer_field = base[0].make_like();

    // Send cycles: carve each slab out of the collect field and post it.
    // Same contract as the split path: a carve or staging failure stops
    // posting but never skips the drain of sends already in flight.
    let mut pending_sends = Vec::with_capacity(plan.n_replicates);
    let mut send_bufs = Vec::with_capacity(plan.n_replicates);
    let mut maybe_err = None;
    for i in 0..plan.n_replicates {
        let thread_idx = coordinate_from_index(i, key);
        let dst_idx = (plan.full_idx % plan.grid_dim) * plan.block_dim + thread_idx;

        let dst_rank = comm.rank_from_coords(dst_idx.as_array());
        let tag = (plan.rank * plan.total_rank + dst_rank) as u64;
        debug!("join: rank {:4} -> rank {:4}, tag {}", plan.rank, dst_rank, tag);

        let offset = thread_idx * thread_dim;
        let carved = copy_field_offset(&mut buffer_field, collect, offset.as_array());

        let mut buffer = comm.alloc_staging(bytes);
        if let Err(err) = carved.and_then(|()| buffer_field.copy_to_buffer(&mut buffer)) {
            maybe_err = Some(err);
            break;
        }
        pending_sends.push(comm.isend(dst_rank, tag, &buffer));
        send_bufs.push(buffer);
    }

    // Receive cycles.
    if maybe_err.is_none() {
        for i in 0..plan.n_replicates {
            let grid_idx = coordinate_from_index(i, key);
            let block_idx = plan.full_idx / plan.block_dim;
            let src_idx = grid_idx * plan.grid_dim + block_idx;

            let src_rank = comm.rank_from_coords(src_idx.as_array());
            let tag = (src_rank * plan.total_rank + plan.rank) as u64;
            debug!("join: rank {:4} <- rank {:4}, tag {}", plan.rank, src_rank, tag);

            let mut recv_buffer = comm.alloc_staging(bytes);
            let handle = comm.irecv(src_rank, tag, &mut recv_buffer);
            match handle.wait() {
                Some(data) if data.len() == bytes => {
                    if maybe_err.is_none() {
                        let n_fields = base.len();
                        if let Err(err) = base[i % n_fields].copy_from_buffer(&data) {
                            maybe_err = Some(err);
                        }
                    }
                }
                Some(data) if maybe_err.is_none() => {
                    maybe_err = Some(LatticeError::CommError {
                        neighbor: src_rank,
                        source: format!("expected {bytes} bytes, got {}", data.len()).into(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(LatticeError::CommError {
                        neighbor: src_rank,
                        source: format!("failed to receive subvolume from rank {src_rank}").into(),
                    });
                }
                _ => {}
            }
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }
    drop(send_bufs);

    if let Some(err) = maybe_err {
        return Err(err);
    }
    comm.barrier();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::ThreadComm;
    use crate::comm::grid::N_DIM;
    use crate::field::geometry::{LatticeGeometry, SiteOrder};
    use crate::field::site_field::SiteField;

    fn coordinate_tagged(x: [usize; 4]) -> SiteField<u64> {
        let geom = LatticeGeometry::new(x, SiteOrder::Lexicographic);
        SiteField::from_fn(geom, |c, _| {
            (c[3] * 8 + c[2] * 4 + c[1] * 2 + c[0]) as u64
        })
    }

    /// Field whose buffer hooks can be made to fail, for exercising the
    /// exchange error paths.
    #[derive(Clone)]
    struct FlakyField {
        inner: SiteField<u64>,
        fail_store: bool,
        fail_load: bool,
    }

    impl FlakyField {
        fn new(inner: SiteField<u64>, fail_store: bool, fail_load: bool) -> Self {
            Self {
                inner,
                fail_store,
                fail_load,
            }
        }

        fn trip(&self) -> LatticeError {
            LatticeError::BufferSizeMismatch {
                expected: self.inner.total_bytes(),
                found: 0,
            }
        }
    }

    impl LatticeField for FlakyField {
        fn geometry(&self) -> &LatticeGeometry {
            self.inner.geometry()
        }

        fn total_bytes(&self) -> usize {
            self.inner.total_bytes()
        }

        fn copy_to_buffer(&self, buf: &mut [u8]) -> Result<(), LatticeError> {
            if self.fail_store {
                return Err(self.trip());
            }
            self.inner.copy_to_buffer(buf)
        }

        fn copy_from_buffer(&mut self, buf: &[u8]) -> Result<(), LatticeError> {
            if self.fail_load {
                return Err(self.trip());
            }
            self.inner.copy_from_buffer(buf)
        }

        fn make_like(&self) -> Self {
            Self::new(self.inner.make_like(), self.fail_store, self.fail_load)
        }

        fn copy_field_offset(
            dst: &mut Self,
            src: &Self,
            offset: [usize; N_DIM],
        ) -> Result<(), LatticeError> {
            SiteField::copy_field_offset(&mut dst.inner, &src.inner, offset)
        }
    }

    #[test]
    fn identity_reshape_on_single_rank() {
        // 2x2x2x2 lattice, one rank, K = (1,1,1,1): split then join must be
        // the identity, exercising the self-to-self exchange path.
        let comm = ThreadComm::grid([1, 1, 1, 1]).pop().unwrap();
        let key = GridKey([1, 1, 1, 1]);

        let original = coordinate_tagged([2, 2, 2, 2]);
        let base = vec![original.clone()];
        let mut collect = original.make_like();

        split_field(&mut collect, &base, key, &comm).unwrap();
        assert_eq!(collect, original);

        let mut recovered = vec![original.make_like()];
        join_field(&mut recovered, &collect, key, &comm).unwrap();
        assert_eq!(recovered[0], original);
    }

    #[test]
    fn empty_base_list_is_fatal() {
        let comm = ThreadComm::grid([1, 1, 1, 1]).pop().unwrap();
        let geom = LatticeGeometry::new([2, 2, 2, 2], SiteOrder::Lexicographic);
        let mut collect = SiteField::<u64>::zeros(geom);
        let base: Vec<SiteField<u64>> = vec![];
        assert!(matches!(
            split_field(&mut collect, &base, GridKey([1, 1, 1, 1]), &comm),
            Err(LatticeError::EmptyFieldList)
        ));
    }

    #[test]
    fn non_divisible_key_is_rejected() {
        let comm = ThreadComm::grid([1, 1, 1, 1]).pop().unwrap();
        let field = coordinate_tagged([2, 2, 2, 2]);
        let mut collect = field.make_like();
        let err = split_field(&mut collect, &[field], GridKey([2, 1, 1, 1]), &comm);
        assert!(matches!(
            err,
            Err(LatticeError::NonDivisibleGridKey { axis: 0, .. })
        ));
    }

    #[test]
    fn send_staging_failure_surfaces_without_posting() {
        let comm = ThreadComm::grid([1, 1, 1, 1]).pop().unwrap();
        let base = vec![FlakyField::new(coordinate_tagged([2, 2, 2, 2]), true, false)];
        let mut collect = base[0].make_like();
        assert!(matches!(
            split_field(&mut collect, &base, GridKey([1, 1, 1, 1]), &comm),
            Err(LatticeError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn receive_stitch_failure_drains_before_returning() {
        // The posted send must be waited on and the error surfaced as a
        // return value rather than cutting the exchange short.
        let comm = ThreadComm::grid([1, 1, 1, 1]).pop().unwrap();
        let base = vec![FlakyField::new(coordinate_tagged([2, 2, 2, 2]), false, true)];
        let mut collect = base[0].make_like();
        assert!(matches!(
            split_field(&mut collect, &base, GridKey([1, 1, 1, 1]), &comm),
            Err(LatticeError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn join_load_failure_is_reported_after_the_exchange() {
        let comm = ThreadComm::grid([1, 1, 1, 1]).pop().unwrap();
        let collect = FlakyField::new(coordinate_tagged([2, 2, 2, 2]), false, false);
        let geom = LatticeGeometry::new([2, 2, 2, 2], SiteOrder::Lexicographic);
        let mut base = vec![FlakyField::new(SiteField::zeros(geom), false, true)];
        assert!(matches!(
            join_field(&mut base, &collect, GridKey([1, 1, 1, 1]), &comm),
            Err(LatticeError::BufferSizeMismatch { .. })
        ));
    }

    #[test]
    fn wrong_collect_extent_is_rejected() {
        let comm = ThreadComm::grid([1, 1, 1, 1]).pop().unwrap();
        let field = coordinate_tagged([2, 2, 2, 2]);
        let mut collect = coordinate_tagged([4, 2, 2, 2]);
        assert!(matches!(
            split_field(&mut collect, &[field], GridKey([1, 1, 1, 1]), &comm),
            Err(LatticeError::CollectExtentMismatch { .. })
        ));
    }
}
