//! 4-D process-grid coordinate arithmetic.
//!
//! A [`GridKey`] names a componentwise factorization of the process grid:
//! splitting over key `K` views the topology as `grid_dim x block_dim` with
//! `grid_dim = P / K` and `block_dim = K`. All coordinate<->index conversions
//! fix axis 0 as the fastest-varying axis; [`index_from_coordinate`] is the
//! rank bijection used by every communicator backend.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Index, IndexMut, Mul, Rem};

/// Number of partitioned lattice dimensions.
pub const N_DIM: usize = 4;

/// A 4-tuple of positive integers naming a sub-grid factorization of the
/// process topology (or any 4-D extent that enters the same arithmetic).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridKey(pub [usize; N_DIM]);

impl GridKey {
    /// The number of replicated subvolumes this key describes.
    pub fn product(&self) -> usize {
        self.0.iter().product()
    }

    /// True when every component of `self` divides the matching component of
    /// `grid`.
    pub fn divides(&self, grid: &GridKey) -> bool {
        (0..N_DIM).all(|d| self.0[d] != 0 && grid.0[d] % self.0[d] == 0)
    }

    pub fn as_array(&self) -> [usize; N_DIM] {
        self.0
    }
}

impl From<[usize; N_DIM]> for GridKey {
    fn from(v: [usize; N_DIM]) -> Self {
        GridKey(v)
    }
}

impl Index<usize> for GridKey {
    type Output = usize;
    fn index(&self, d: usize) -> &usize {
        &self.0[d]
    }
}

impl IndexMut<usize> for GridKey {
    fn index_mut(&mut self, d: usize) -> &mut usize {
        &mut self.0[d]
    }
}

macro_rules! componentwise {
    ($trait_:ident, $method:ident, $op:tt) => {
        impl $trait_ for GridKey {
            type Output = GridKey;
            fn $method(self, rhs: GridKey) -> GridKey {
                let mut out = GridKey([0; N_DIM]);
                for d in 0..N_DIM {
                    out.0[d] = self.0[d] $op rhs.0[d];
                }
                out
            }
        }
    };
}

componentwise!(Add, add, +);
componentwise!(Mul, mul, *);
componentwise!(Div, div, /);
componentwise!(Rem, rem, %);

/// Unravels a flat replica index into 4-D coordinates, axis 0 fastest.
pub fn coordinate_from_index(mut index: usize, dim: GridKey) -> GridKey {
    let mut coord = GridKey([0; N_DIM]);
    for d in 0..N_DIM {
        coord.0[d] = index % dim.0[d];
        index /= dim.0[d];
    }
    coord
}

/// Ravels 4-D coordinates back into a flat index, axis 0 fastest. This is
/// the fixed bijection from grid coordinates to rank ids.
pub fn index_from_coordinate(coord: GridKey, dim: GridKey) -> usize {
    ((coord[3] * dim[2] + coord[2]) * dim[1] + coord[1]) * dim[0] + coord[0]
}
