//! Lattice field containers: geometry, per-site storage, SU(3) payloads.

pub mod geometry;
pub mod site_field;
pub mod su3;

pub use geometry::{LatticeGeometry, SiteOrder};
pub use site_field::{LatticeField, SiteField, copy_field_offset};
pub use su3::Su3Matrix;
