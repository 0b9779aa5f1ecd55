//! Host-side SU(3) link construction and verification.
//!
//! Deterministic generation of special-unitary gauge links used to seed and
//! validate fields pushed through the reshape engine. Randomized links draw
//! from a caller-seeded `SmallRng`, so runs are reproducible.

use crate::field::geometry::LatticeGeometry;
use crate::field::site_field::SiteField;
use bytemuck::{Pod, Zeroable};
use num_complex::Complex64;
use rand::Rng;
use static_assertions::const_assert_eq;

// The wire layer casts links directly; the layout must be the plain
// 18-double matrix the GPU side expects.
const_assert_eq!(std::mem::size_of::<Su3Matrix>(), 18 * 8);

/// A complex 3x3 matrix attached to a lattice edge. Constructors uphold
/// unitarity and unit determinant; raw element access does not.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct Su3Matrix {
    pub m: [[Complex64; 3]; 3],
}

impl Su3Matrix {
    /// The identity link.
    pub fn unit() -> Self {
        let mut m = [[Complex64::ZERO; 3]; 3];
        for d in 0..3 {
            m[d][d] = Complex64::ONE;
        }
        Self { m }
    }

    /// A random SU(3) element: rows 1 and 2 are drawn uniformly and
    /// Gram-Schmidt orthonormalized, row 0 is the conjugate cross product
    /// that completes the special-unitary triad.
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        let mut m = [[Complex64::ZERO; 3]; 3];
        for row in 1..3 {
            for col in 0..3 {
                m[row][col] = Complex64::new(rng.r#gen::<f64>(), rng.r#gen::<f64>());
            }
        }
        normalize(&mut m[1]);
        let (r1, r2) = {
            let dot: Complex64 = m[1]
                .iter()
                .zip(&m[2])
                .map(|(a, b)| a.conj() * b)
                .sum();
            (m[1], dot)
        };
        for col in 0..3 {
            m[2][col] -= r2 * r1[col];
        }
        normalize(&mut m[2]);
        let (u, v) = (m[1], m[2]);
        for col in 0..3 {
            m[0][col] = (u[(col + 1) % 3] * v[(col + 2) % 3]
                - u[(col + 2) % 3] * v[(col + 1) % 3])
                .conj();
        }
        Self { m }
    }

    /// Hermitian conjugate.
    pub fn dagger(&self) -> Self {
        let mut out = [[Complex64::ZERO; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, e) in row.iter_mut().enumerate() {
                *e = self.m[j][i].conj();
            }
        }
        Self { m: out }
    }

    pub fn mul(&self, rhs: &Self) -> Self {
        let mut out = [[Complex64::ZERO; 3]; 3];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, e) in row.iter_mut().enumerate() {
                *e = (0..3).map(|k| self.m[i][k] * rhs.m[k][j]).sum();
            }
        }
        Self { m: out }
    }

    pub fn determinant(&self) -> Complex64 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Checks `U U† = I` and `det U = 1` within `eps`.
    pub fn is_special_unitary(&self, eps: f64) -> bool {
        let prod = self.mul(&self.dagger());
        let unit = Self::unit();
        let unitary = prod
            .m
            .iter()
            .flatten()
            .zip(unit.m.iter().flatten())
            .all(|(a, b)| (a - b).norm() <= eps);
        unitary && (self.determinant() - Complex64::ONE).norm() <= eps
    }
}

fn normalize(row: &mut [Complex64; 3]) {
    let norm = row.iter().map(|z| z.norm_sqr()).sum::<f64>().sqrt();
    for z in row.iter_mut() {
        *z /= norm;
    }
}

/// Four identity link fields, one per lattice direction.
pub fn unit_gauge_field(geom: LatticeGeometry) -> [SiteField<Su3Matrix>; 4] {
    std::array::from_fn(|_| SiteField::from_fn(geom, |_, _| Su3Matrix::unit()))
}

/// Four seeded random SU(3) link fields, one per lattice direction.
pub fn random_gauge_field<R: Rng>(geom: LatticeGeometry, rng: &mut R) -> [SiteField<Su3Matrix>; 4] {
    std::array::from_fn(|_| SiteField::from_fn(geom, |_, _| Su3Matrix::random(rng)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::geometry::SiteOrder;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn unit_link_is_special_unitary() {
        assert!(Su3Matrix::unit().is_special_unitary(1e-15));
    }

    #[test]
    fn random_links_are_special_unitary() {
        let mut rng = SmallRng::seed_from_u64(137);
        for _ in 0..32 {
            let u = Su3Matrix::random(&mut rng);
            assert!(u.is_special_unitary(1e-12));
        }
    }

    #[test]
    fn random_links_are_reproducible() {
        let mut a = SmallRng::seed_from_u64(7);
        let mut b = SmallRng::seed_from_u64(7);
        assert_eq!(Su3Matrix::random(&mut a), Su3Matrix::random(&mut b));
    }

    #[test]
    fn gauge_field_covers_every_site() {
        let geom = LatticeGeometry::new([2, 2, 2, 2], SiteOrder::EvenOdd);
        let mut rng = SmallRng::seed_from_u64(137);
        let links = random_gauge_field(geom, &mut rng);
        for dir in &links {
            for u in dir.as_slice() {
                assert!(u.is_special_unitary(1e-12));
            }
        }
    }
}
