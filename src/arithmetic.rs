//! Elementwise kernels and reductions over flat volume buffers.
//!
//! Every map in this module runs over a flat index space of size n (real
//! buffers) or m (spectral buffers): inputs are read-only, outputs are
//! disjoint, no element depends on any other. Rayon may therefore split the
//! range arbitrarily without synchronization, and results are identical
//! regardless of scheduling. Reductions are sequential folds so that every
//! call is bit-for-bit deterministic.

use rayon::prelude::*;
use rustfft::num_complex::Complex;

use crate::float_trait::VsnrFloat;

/// Minimum elements per rayon task for elementwise kernels.
/// Keeps task overhead negligible next to the per-element work.
pub(crate) const RAYON_MIN_CHUNK_LEN: usize = 4096;

/// Complex pointwise product, in place: `b[i] = a[i] * b[i]`.
///
/// In the spectral domain this is one convolution (or operator
/// application) step.
pub fn mul_inplace<F: VsnrFloat>(a: &[Complex<F>], b: &mut [Complex<F>]) {
    debug_assert_eq!(a.len(), b.len());
    b.par_iter_mut()
        .zip(a.par_iter())
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|(b, &a)| *b = a * *b);
}

/// Conjugate pointwise product, in place: `b[i] = conj(a[i]) * b[i]`.
///
/// Applies the adjoint of the operator whose spectrum is `a`.
pub fn conj_mul_inplace<F: VsnrFloat>(a: &[Complex<F>], b: &mut [Complex<F>]) {
    debug_assert_eq!(a.len(), b.len());
    b.par_iter_mut()
        .zip(a.par_iter())
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|(b, &a)| *b = a.conj() * *b);
}

/// `out[i] = a[i] + b[i]`.
pub fn add<F: VsnrFloat>(a: &[F], b: &[F], out: &mut [F]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());
    (out, a, b)
        .into_par_iter()
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|(out, &a, &b)| *out = a + b);
}

/// `out[i] = a[i] - b[i]`.
pub fn sub<F: VsnrFloat>(a: &[F], b: &[F], out: &mut [F]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());
    (out, a, b)
        .into_par_iter()
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|(out, &a, &b)| *out = a - b);
}

/// `out[i] = scale * a[i] - b[i]`.
pub fn scaled_diff<F: VsnrFloat>(scale: F, a: &[F], b: &[F], out: &mut [F]) {
    debug_assert_eq!(a.len(), b.len());
    debug_assert_eq!(a.len(), out.len());
    (out, a, b)
        .into_par_iter()
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|(out, &a, &b)| *out = scale * a - b);
}

/// `y[i] += scale * x[i]`.
pub fn axpy<F: VsnrFloat>(scale: F, x: &[F], y: &mut [F]) {
    debug_assert_eq!(x.len(), y.len());
    y.par_iter_mut()
        .zip(x.par_iter())
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|(y, &x)| *y += scale * x);
}

/// `u[i] *= val`.
pub fn scale_inplace<F: VsnrFloat>(u: &mut [F], val: F) {
    u.par_iter_mut()
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|u| *u *= val);
}

/// `u[i] /= val`.
pub fn div_inplace<F: VsnrFloat>(u: &mut [F], val: F) {
    u.par_iter_mut()
        .with_min_len(RAYON_MIN_CHUNK_LEN)
        .for_each(|u| *u /= val);
}

/// Divide every element by the sample count, undoing the scaling of an
/// unnormalized forward/inverse transform pair.
pub fn normalize_inplace<F: VsnrFloat>(u: &mut [F]) {
    let inv = F::one() / F::usize_as(u.len());
    scale_inplace(u, inv);
}

/// L2 norm, accumulated in f64 for stability across precisions.
pub fn norm_l2<F: VsnrFloat>(u: &[F]) -> F {
    let sum: f64 = u
        .iter()
        .map(|&x| {
            let x = x.to_f64().unwrap();
            x * x
        })
        .sum();
    F::from_f64_c(sum.sqrt())
}

/// Largest absolute value; zero for an empty slice.
pub fn max_abs<F: VsnrFloat>(u: &[F]) -> F {
    u.iter()
        .fold(F::zero(), |acc, &x| if x.abs() > acc { x.abs() } else { acc })
}

/// Largest pointwise product `a[i] * b[i]` over nonnegative inputs.
pub fn max_product<F: VsnrFloat>(a: &[F], b: &[F]) -> F {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .fold(F::zero(), |acc, (&a, &b)| {
            let p = a * b;
            if p > acc {
                p
            } else {
                acc
            }
        })
}
