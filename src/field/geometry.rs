//! Local lattice geometry descriptor.
//!
//! The original utilities read lattice extents from module-level globals
//! (`Z[4]`, `V`, `Vh`). Here the geometry is an explicit value threaded
//! through the call stack; nothing in the crate holds process-wide mutable
//! state.

use crate::comm::grid::N_DIM;
use serde::{Deserialize, Serialize};

/// Order in which local sites are flattened into a serialized buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteOrder {
    /// Plain lexicographic order, axis 0 fastest.
    Lexicographic,
    /// Checkerboard order: all even-parity sites first, then all odd-parity
    /// sites, each half in lexicographic order. Requires an even extent
    /// along axis 0.
    EvenOdd,
}

/// Geometry of the rank-local portion of a field: 4-D extents, an optional
/// 5th dimension (domain-wall `Ls`; 1 otherwise), and the site layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatticeGeometry {
    pub x: [usize; N_DIM],
    pub ls: usize,
    pub order: SiteOrder,
}

impl LatticeGeometry {
    pub fn new(x: [usize; N_DIM], order: SiteOrder) -> Self {
        Self { x, ls: 1, order }
    }

    pub fn with_ls(x: [usize; N_DIM], ls: usize, order: SiteOrder) -> Self {
        Self { x, ls, order }
    }

    /// 4-D local volume.
    pub fn volume(&self) -> usize {
        self.x.iter().product()
    }

    /// Total number of stored sites, including the 5th dimension.
    pub fn total_sites(&self) -> usize {
        self.volume() * self.ls
    }

    /// Lexicographic site index, axis 0 fastest.
    fn lex_index(&self, c: [usize; N_DIM]) -> usize {
        ((c[3] * self.x[2] + c[2]) * self.x[1] + c[1]) * self.x[0] + c[0]
    }

    /// Parity of a site: sum of coordinates mod 2.
    pub fn parity(c: [usize; N_DIM]) -> usize {
        (c[0] + c[1] + c[2] + c[3]) & 1
    }

    /// Flattened index of the site at 4-D coordinates `c` under the
    /// configured layout.
    pub fn site_index(&self, c: [usize; N_DIM]) -> usize {
        match self.order {
            SiteOrder::Lexicographic => self.lex_index(c),
            SiteOrder::EvenOdd => {
                debug_assert!(self.x[0] % 2 == 0, "even-odd layout needs even X[0]");
                Self::parity(c) * (self.volume() / 2) + self.lex_index(c) / 2
            }
        }
    }

    /// Inverse of [`site_index`](Self::site_index).
    pub fn site_coord(&self, index: usize) -> [usize; N_DIM] {
        let lex = match self.order {
            SiteOrder::Lexicographic => index,
            SiteOrder::EvenOdd => {
                let vh = self.volume() / 2;
                let odd_bit = index / vh;
                let half = index % vh;
                // Reconstruct the slow coordinates from the half index to
                // recover which sublattice site this is.
                let za = half / (self.x[0] / 2);
                let zb = za / self.x[1];
                let x2 = za - zb * self.x[1];
                let x4 = zb / self.x[2];
                let x3 = zb - x4 * self.x[2];
                2 * half + ((x2 + x3 + x4 + odd_bit) & 1)
            }
        };
        [
            lex % self.x[0],
            (lex / self.x[0]) % self.x[1],
            (lex / (self.x[0] * self.x[1])) % self.x[2],
            lex / (self.x[0] * self.x[1] * self.x[2]),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::iproduct;

    #[test]
    fn lexicographic_round_trip() {
        let geom = LatticeGeometry::new([3, 4, 2, 5], SiteOrder::Lexicographic);
        for (t, z, y, x) in iproduct!(0..5, 0..2, 0..4, 0..3) {
            let c = [x, y, z, t];
            assert_eq!(geom.site_coord(geom.site_index(c)), c);
        }
    }

    #[test]
    fn even_odd_round_trip_and_halves() {
        let geom = LatticeGeometry::new([4, 2, 2, 2], SiteOrder::EvenOdd);
        let vh = geom.volume() / 2;
        let mut seen = vec![false; geom.volume()];
        for (t, z, y, x) in iproduct!(0..2, 0..2, 0..2, 0..4) {
            let c = [x, y, z, t];
            let idx = geom.site_index(c);
            assert!(!seen[idx], "site index collision at {c:?}");
            seen[idx] = true;
            // Even sites land in the first half, odd sites in the second.
            assert_eq!(idx >= vh, LatticeGeometry::parity(c) == 1);
            assert_eq!(geom.site_coord(idx), c);
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn fifth_dimension_scales_site_count() {
        let geom = LatticeGeometry::with_ls([2, 2, 2, 2], 8, SiteOrder::Lexicographic);
        assert_eq!(geom.total_sites(), 16 * 8);
    }
}
