//! Per-site field container and its serialization contract.

use crate::comm::grid::N_DIM;
use crate::error::LatticeError;
use crate::field::geometry::LatticeGeometry;
use bytemuck::Pod;
use itertools::iproduct;

/// A field: one value per lattice site, with a byte-level serialization
/// contract used by the reshape engine.
///
/// A field is *complete* when every site owned by the local rank holds a
/// defined value; `copy_from_buffer` after a successful receive establishes
/// completeness for the received subvolume.
pub trait LatticeField: Sized {
    fn geometry(&self) -> &LatticeGeometry;

    /// Local 4-D extents, shorthand for `geometry().x`.
    fn extents(&self) -> [usize; N_DIM] {
        self.geometry().x
    }

    /// Serialized size of the local volume in bytes.
    fn total_bytes(&self) -> usize;

    /// Flattens the local volume into `buf` in site-index order.
    fn copy_to_buffer(&self, buf: &mut [u8]) -> Result<(), LatticeError>;

    /// Inverse of [`copy_to_buffer`](Self::copy_to_buffer).
    fn copy_from_buffer(&mut self, buf: &[u8]) -> Result<(), LatticeError>;

    /// A new, zero-filled field with the same geometry and payload type
    /// (the `Field::Create(param)` of the GPU library).
    fn make_like(&self) -> Self;

    /// Copies between fields of different extents at a 4-D offset. When
    /// `dst` is the larger field the contents of `src` are scattered to
    /// `offset`; when `src` is larger, the slab at `offset` is gathered
    /// into `dst`.
    fn copy_field_offset(
        dst: &mut Self,
        src: &Self,
        offset: [usize; N_DIM],
    ) -> Result<(), LatticeError>;
}

/// Writes `src` into `dst` at a 4-D offset (or carves `dst` out of `src`,
/// depending on which field is larger). Free-function spelling of
/// [`LatticeField::copy_field_offset`].
pub fn copy_field_offset<F: LatticeField>(
    dst: &mut F,
    src: &F,
    offset: [usize; N_DIM],
) -> Result<(), LatticeError> {
    F::copy_field_offset(dst, src, offset)
}

/// Concrete field storing one `Pod` payload per site.
///
/// The payload type carries the whole per-site content (a spinor, a gauge
/// link, a test tag), so serialization is a single cast of the backing
/// vector and is bit-preserving by construction.
#[derive(Clone, Debug, PartialEq)]
pub struct SiteField<V> {
    geom: LatticeGeometry,
    data: Vec<V>,
}

impl<V: Pod> SiteField<V> {
    pub fn zeros(geom: LatticeGeometry) -> Self {
        Self {
            geom,
            data: vec![V::zeroed(); geom.total_sites()],
        }
    }

    /// Fills the field from a function of `(coords, s5)`.
    pub fn from_fn(geom: LatticeGeometry, mut f: impl FnMut([usize; N_DIM], usize) -> V) -> Self {
        let mut field = Self::zeros(geom);
        let [x0, x1, x2, x3] = geom.x;
        for s5 in 0..geom.ls {
            for (t, z, y, x) in iproduct!(0..x3, 0..x2, 0..x1, 0..x0) {
                let c = [x, y, z, t];
                field.data[s5 * geom.volume() + geom.site_index(c)] = f(c, s5);
            }
        }
        field
    }

    pub fn get(&self, c: [usize; N_DIM], s5: usize) -> V {
        self.data[s5 * self.geom.volume() + self.geom.site_index(c)]
    }

    pub fn set(&mut self, c: [usize; N_DIM], s5: usize, v: V) {
        self.data[s5 * self.geom.volume() + self.geom.site_index(c)] = v;
    }

    pub fn as_slice(&self) -> &[V] {
        &self.data
    }
}

impl<V: Pod> LatticeField for SiteField<V> {
    fn geometry(&self) -> &LatticeGeometry {
        &self.geom
    }

    fn total_bytes(&self) -> usize {
        std::mem::size_of_val(self.data.as_slice())
    }

    fn copy_to_buffer(&self, buf: &mut [u8]) -> Result<(), LatticeError> {
        let bytes = bytemuck::cast_slice(&self.data);
        if buf.len() != bytes.len() {
            return Err(LatticeError::BufferSizeMismatch {
                expected: bytes.len(),
                found: buf.len(),
            });
        }
        buf.copy_from_slice(bytes);
        Ok(())
    }

    fn copy_from_buffer(&mut self, buf: &[u8]) -> Result<(), LatticeError> {
        let bytes = bytemuck::cast_slice_mut(&mut self.data);
        if buf.len() != bytes.len() {
            return Err(LatticeError::BufferSizeMismatch {
                expected: bytes.len(),
                found: buf.len(),
            });
        }
        bytes.copy_from_slice(buf);
        Ok(())
    }

    fn make_like(&self) -> Self {
        Self::zeros(self.geom)
    }

    fn copy_field_offset(
        dst: &mut Self,
        src: &Self,
        offset: [usize; N_DIM],
    ) -> Result<(), LatticeError> {
        let (dx, sx) = (dst.geom.x, src.geom.x);
        let mismatch = LatticeError::OffsetCopyMismatch {
            src: sx,
            dst: dx,
            offset,
        };
        if dst.geom.ls != src.geom.ls {
            return Err(mismatch);
        }
        let scatter = (0..N_DIM).all(|d| offset[d] + sx[d] <= dx[d]);
        let gather = (0..N_DIM).all(|d| offset[d] + dx[d] <= sx[d]);
        if !scatter && !gather {
            return Err(mismatch);
        }
        // The smaller field fixes the iteration range.
        let small = if scatter { sx } else { dx };
        let (src_vol, dst_vol) = (src.geom.volume(), dst.geom.volume());
        for s5 in 0..src.geom.ls {
            for (t, z, y, x) in iproduct!(0..small[3], 0..small[2], 0..small[1], 0..small[0]) {
                let c = [x, y, z, t];
                let shifted = [
                    c[0] + offset[0],
                    c[1] + offset[1],
                    c[2] + offset[2],
                    c[3] + offset[3],
                ];
                let (src_c, dst_c) = if scatter { (c, shifted) } else { (shifted, c) };
                dst.data[s5 * dst_vol + dst.geom.site_index(dst_c)] =
                    src.data[s5 * src_vol + src.geom.site_index(src_c)];
            }
        }
        Ok(())
    }
}
