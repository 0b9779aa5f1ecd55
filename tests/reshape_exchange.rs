//! Multi-rank split/join exchange driven over in-process communicators,
//! one thread per rank.

use sublattice::comm::{Communicator, GridKey, ThreadComm};
use sublattice::field::{LatticeField, LatticeGeometry, SiteField, SiteOrder};
use sublattice::reshape::{join_field, split_field};

/// Payload that names its producer: rank, base-field slot, site coordinate.
fn tagged(rank: usize, slot: usize, x: [usize; 4]) -> SiteField<u64> {
    let geom = LatticeGeometry::new(x, SiteOrder::Lexicographic);
    SiteField::from_fn(geom, |c, _| {
        ((rank as u64) << 48)
            | ((slot as u64) << 40)
            | (((c[3] * x[2] + c[2]) * x[1] + c[1]) * x[0] + c[0]) as u64
    })
}

/// Runs `body` on every rank of `dims` concurrently and propagates panics.
fn run_ranks<F>(dims: [usize; 4], body: F)
where
    F: Fn(ThreadComm) + Send + Sync,
{
    let comms = ThreadComm::grid(dims);
    std::thread::scope(|s| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| s.spawn(|| body(comm)))
            .collect();
        for h in handles {
            h.join().expect("rank thread panicked");
        }
    });
}

#[test]
fn two_rank_split_gathers_one_field_per_subgrid() {
    // Two ranks along axis 0, split key K = (2,1,1,1): sub-grid g collects
    // base field g from both ranks, stitched along axis 0.
    let dims = [2, 1, 1, 1];
    let key = GridKey([2, 1, 1, 1]);
    let x = [4, 4, 4, 4];

    run_ranks(dims, |comm| {
        let rank = comm.rank();
        let base = vec![tagged(rank, 0, x), tagged(rank, 1, x)];
        let collect_geom = LatticeGeometry::new([8, 4, 4, 4], SiteOrder::Lexicographic);
        let mut collect = SiteField::<u64>::zeros(collect_geom);

        split_field(&mut collect, &base, key, &comm).unwrap();

        // Sub-grid id equals this rank's position in the block; slab r
        // along axis 0 originated at rank r's copy of field `rank`.
        for src_rank in 0..2 {
            let reference = tagged(src_rank, rank, x);
            for t in 0..4 {
                for z in 0..4 {
                    for y in 0..4 {
                        for xx in 0..4 {
                            assert_eq!(
                                collect.get([xx + src_rank * 4, y, z, t], 0),
                                reference.get([xx, y, z, t], 0),
                                "rank {rank}, slab {src_rank}"
                            );
                        }
                    }
                }
            }
        }

        // Join must restore both original base fields on every rank.
        let mut recovered = vec![base[0].make_like(), base[1].make_like()];
        join_field(&mut recovered, &collect, key, &comm).unwrap();
        assert_eq!(recovered[0], base[0]);
        assert_eq!(recovered[1], base[1]);
    });
}

#[test]
fn single_field_is_replicated_to_every_subgrid() {
    // Four ranks, K = (2,2,1,1), one base field: every sub-grid receives
    // the same gathered field, and the join recovers the original.
    let dims = [2, 2, 1, 1];
    let key = GridKey([2, 2, 1, 1]);
    let x = [2, 2, 2, 2];

    run_ranks(dims, |comm| {
        let rank = comm.rank();
        let base = vec![tagged(rank, 0, x)];
        let collect_geom = LatticeGeometry::new([4, 4, 2, 2], SiteOrder::Lexicographic);
        let mut collect = SiteField::<u64>::zeros(collect_geom);

        split_field(&mut collect, &base, key, &comm).unwrap();

        // Slab (i, j) of the collect field came from the rank at grid
        // coordinate (i, j, 0, 0), always from its only field.
        for j in 0..2 {
            for i in 0..2 {
                let src_rank = j * 2 + i;
                let reference = tagged(src_rank, 0, x);
                for t in 0..2 {
                    for z in 0..2 {
                        for y in 0..2 {
                            for xx in 0..2 {
                                assert_eq!(
                                    collect.get([xx + i * 2, y + j * 2, z, t], 0),
                                    reference.get([xx, y, z, t], 0),
                                    "rank {rank}, slab ({i},{j})"
                                );
                            }
                        }
                    }
                }
            }
        }

        let mut recovered = vec![base[0].make_like()];
        join_field(&mut recovered, &collect, key, &comm).unwrap();
        assert_eq!(recovered[0], base[0]);
    });
}

#[test]
fn split_join_round_trip_on_mixed_grid() {
    // Four ranks laid out (2,1,2,1), split along axis 0 only: two sub-grids
    // of two ranks each. The round trip must be the identity on every rank.
    let dims = [2, 1, 2, 1];
    let key = GridKey([2, 1, 1, 1]);
    let x = [2, 4, 2, 4];

    run_ranks(dims, |comm| {
        let rank = comm.rank();
        let base = vec![tagged(rank, 0, x), tagged(rank, 1, x)];
        let collect_geom = LatticeGeometry::new([4, 4, 2, 4], SiteOrder::Lexicographic);
        let mut collect = SiteField::<u64>::zeros(collect_geom);

        split_field(&mut collect, &base, key, &comm).unwrap();

        let mut recovered = vec![base[0].make_like(), base[1].make_like()];
        join_field(&mut recovered, &collect, key, &comm).unwrap();
        assert_eq!(recovered[0], base[0]);
        assert_eq!(recovered[1], base[1]);
    });
}

#[test]
fn five_dimensional_payloads_survive_the_round_trip() {
    // Domain-wall style fields carry an extra fifth dimension; the reshape
    // only blocks the four space-time axes.
    let dims = [2, 1, 1, 1];
    let key = GridKey([2, 1, 1, 1]);

    run_ranks(dims, |comm| {
        let rank = comm.rank();
        let geom = LatticeGeometry::with_ls([2, 2, 2, 2], 4, SiteOrder::Lexicographic);
        let base = vec![
            SiteField::from_fn(geom, |c, s5| {
                ((rank as u64) << 32) | ((s5 as u64) << 16) | (c[0] + 2 * c[3]) as u64
            }),
            SiteField::from_fn(geom, |c, s5| {
                ((rank as u64) << 32) | 0x8000 | ((s5 as u64) << 16) | (c[1] + 2 * c[2]) as u64
            }),
        ];
        let collect_geom = LatticeGeometry::with_ls([4, 2, 2, 2], 4, SiteOrder::Lexicographic);
        let mut collect = SiteField::<u64>::zeros(collect_geom);

        split_field(&mut collect, &base, key, &comm).unwrap();

        let mut recovered = vec![base[0].make_like(), base[1].make_like()];
        join_field(&mut recovered, &collect, key, &comm).unwrap();
        assert_eq!(recovered[0], base[0]);
        assert_eq!(recovered[1], base[1]);
    });
}
