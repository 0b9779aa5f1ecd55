//! Level-1 kernels on complex vectors.
//!
//! The driver and the Chebyshev accelerator are written against these
//! helpers the way the GPU library writes against its blas namespace; all
//! of them are alias-free by signature.

use num_complex::Complex;
use num_traits::Float;

/// `x <- a * x`.
pub fn ax<T: Float>(a: T, x: &mut [Complex<T>]) {
    for e in x.iter_mut() {
        *e = e.scale(a);
    }
}

/// `y <- a * x + b * y`.
pub fn axpby<T: Float>(a: T, x: &[Complex<T>], b: T, y: &mut [Complex<T>]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = xi.scale(a) + yi.scale(b);
    }
}

/// `y <- y + a * x` with complex `a`.
pub fn caxpy<T: Float>(a: Complex<T>, x: &[Complex<T>], y: &mut [Complex<T>]) {
    debug_assert_eq!(x.len(), y.len());
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = *yi + a * xi;
    }
}

/// `z <- x + a * y + b * z`.
pub fn cxpaypbz<T: Float>(x: &[Complex<T>], a: T, y: &[Complex<T>], b: T, z: &mut [Complex<T>]) {
    debug_assert_eq!(x.len(), z.len());
    debug_assert_eq!(y.len(), z.len());
    for ((zi, xi), yi) in z.iter_mut().zip(x).zip(y) {
        *zi = xi + yi.scale(a) + zi.scale(b);
    }
}

/// Conjugated inner product `<x, y> = sum conj(x_i) * y_i`.
pub fn dotc<T: Float>(x: &[Complex<T>], y: &[Complex<T>]) -> Complex<T> {
    debug_assert_eq!(x.len(), y.len());
    x.iter()
        .zip(y)
        .fold(Complex::new(T::zero(), T::zero()), |acc, (xi, yi)| {
            acc + xi.conj() * yi
        })
}

/// Euclidean norm.
pub fn norm2<T: Float>(x: &[Complex<T>]) -> T {
    x.iter()
        .fold(T::zero(), |acc, e| acc + e.norm_sqr())
        .sqrt()
}
