//! 3D Fourier transform engine with reusable plans.
//!
//! Volumes are real `(depth, rows, cols)` arrays, cols fastest. Spectra
//! exploit Hermitian symmetry of real input and store only half the
//! fastest axis: `(depth, rows, cols/2 + 1)`.
//!
//! The forward/inverse pair is unnormalized: `inverse(forward(v))` returns
//! `n * v` with `n = depth * rows * cols`. Callers apply
//! [`crate::arithmetic::normalize_inplace`] after every inverse transform
//! to recover true amplitudes.

use ndarray::{Array3, ArrayView3, Axis};
use rayon::prelude::*;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

use crate::error::{Result, VsnrError};
use crate::float_trait::VsnrFloat;

/// Volume dimensions, slowest to fastest axis: `(depth, rows, cols)`.
///
/// The flat index of voxel `(k, j, i)` is `k * rows * cols + j * cols + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeShape {
    pub depth: usize,
    pub rows: usize,
    pub cols: usize,
}

impl VolumeShape {
    pub fn new(depth: usize, rows: usize, cols: usize) -> Self {
        Self { depth, rows, cols }
    }

    /// Shape of an existing `(depth, rows, cols)` array.
    pub fn from_dim(dim: (usize, usize, usize)) -> Self {
        Self::new(dim.0, dim.1, dim.2)
    }

    /// Number of real samples n.
    pub fn len(&self) -> usize {
        self.depth * self.rows * self.cols
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Length of the stored half of the fastest axis.
    pub fn half_cols(&self) -> usize {
        self.cols / 2 + 1
    }

    /// Number of spectral samples m.
    pub fn spectral_len(&self) -> usize {
        self.depth * self.rows * self.half_cols()
    }

    pub fn dim(&self) -> (usize, usize, usize) {
        (self.depth, self.rows, self.cols)
    }

    pub fn spectral_dim(&self) -> (usize, usize, usize) {
        (self.depth, self.rows, self.half_cols())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(VsnrError::Validation(format!(
                "volume dimensions must be nonzero, got {:?}",
                self.dim()
            )));
        }
        Ok(())
    }
}

/// Pre-computed 3D transform plans for one volume shape.
///
/// Reusing plans across the synthesizer and every solver iteration avoids
/// re-initialization overhead. The bundle holds a real<->complex plan pair
/// for the contiguous cols axis and complex plan pairs for rows and depth.
pub struct FftPlans3d<F: VsnrFloat> {
    shape: VolumeShape,
    r2c: Arc<dyn RealToComplex<F>>,
    c2r: Arc<dyn ComplexToReal<F>>,
    fft_rows: Arc<dyn Fft<F>>,
    ifft_rows: Arc<dyn Fft<F>>,
    fft_depth: Arc<dyn Fft<F>>,
    ifft_depth: Arc<dyn Fft<F>>,
}

impl<F: VsnrFloat> FftPlans3d<F> {
    /// Create plans keyed by `shape`.
    pub fn new(shape: VolumeShape) -> Result<Self> {
        shape.validate()?;

        let mut real_planner = RealFftPlanner::<F>::new();
        let r2c = real_planner.plan_fft_forward(shape.cols);
        let c2r = real_planner.plan_fft_inverse(shape.cols);

        let mut planner = FftPlanner::<F>::new();
        let fft_rows = planner.plan_fft_forward(shape.rows);
        let ifft_rows = planner.plan_fft_inverse(shape.rows);
        let fft_depth = planner.plan_fft_forward(shape.depth);
        let ifft_depth = planner.plan_fft_inverse(shape.depth);

        Ok(Self {
            shape,
            r2c,
            c2r,
            fft_rows,
            ifft_rows,
            fft_depth,
            ifft_depth,
        })
    }

    pub fn shape(&self) -> VolumeShape {
        self.shape
    }

    /// Forward transform: real volume -> half spectrum.
    pub fn forward(&self, vol: ArrayView3<F>) -> Result<Array3<Complex<F>>> {
        let mut spec = Array3::zeros(self.shape.spectral_dim());
        self.forward_into(vol, &mut spec)?;
        Ok(spec)
    }

    /// Forward transform into a caller-owned spectral buffer.
    pub fn forward_into(&self, vol: ArrayView3<F>, spec: &mut Array3<Complex<F>>) -> Result<()> {
        if vol.dim() != self.shape.dim() {
            return Err(VsnrError::Validation(format!(
                "volume shape {:?} does not match plan shape {:?}",
                vol.dim(),
                self.shape.dim()
            )));
        }
        if spec.dim() != self.shape.spectral_dim() {
            return Err(VsnrError::Validation(format!(
                "spectral shape {:?} does not match plan shape {:?}",
                spec.dim(),
                self.shape.spectral_dim()
            )));
        }

        let (_, rows, cols) = self.shape.dim();

        // Real -> complex along the contiguous cols axis, lane per row.
        // Slabs are disjoint, so they transform in parallel with per-task
        // scratch.
        {
            let vol_slabs: Vec<_> = vol.outer_iter().collect();
            let spec_slabs: Vec<_> = spec.outer_iter_mut().collect();
            spec_slabs
                .into_par_iter()
                .zip(vol_slabs)
                .try_for_each(|(mut sp, vo)| {
                    let mut line = vec![F::zero(); cols];
                    let mut out = self.r2c.make_output_vec();
                    let mut scratch = self.r2c.make_scratch_vec();
                    for j in 0..rows {
                        for (dst, &src) in line.iter_mut().zip(vo.row(j)) {
                            *dst = src;
                        }
                        self.r2c
                            .process_with_scratch(&mut line, &mut out, &mut scratch)
                            .map_err(|e| VsnrError::Transform(e.to_string()))?;
                        for (dst, &src) in sp.row_mut(j).iter_mut().zip(out.iter()) {
                            *dst = src;
                        }
                    }
                    Ok(())
                })?;
        }

        // Complex passes along the remaining two axes.
        process_lanes(spec, Axis(1), &self.fft_rows);
        process_lanes(spec, Axis(0), &self.fft_depth);
        Ok(())
    }

    /// Inverse transform: half spectrum -> real volume, unnormalized.
    ///
    /// Clones the spectrum; use [`FftPlans3d::inverse_inplace`] when the
    /// spectral buffer is disposable.
    pub fn inverse(&self, spec: &Array3<Complex<F>>) -> Result<Array3<F>> {
        let mut work = spec.clone();
        let mut out = Array3::zeros(self.shape.dim());
        self.inverse_inplace(&mut work, &mut out)?;
        Ok(out)
    }

    /// Inverse transform consuming `spec` as scratch (its contents are
    /// destroyed). Output is unnormalized.
    pub fn inverse_inplace(&self, spec: &mut Array3<Complex<F>>, out: &mut Array3<F>) -> Result<()> {
        if spec.dim() != self.shape.spectral_dim() {
            return Err(VsnrError::Validation(format!(
                "spectral shape {:?} does not match plan shape {:?}",
                spec.dim(),
                self.shape.spectral_dim()
            )));
        }
        if out.dim() != self.shape.dim() {
            return Err(VsnrError::Validation(format!(
                "volume shape {:?} does not match plan shape {:?}",
                out.dim(),
                self.shape.dim()
            )));
        }

        let (_, rows, cols) = self.shape.dim();
        let half = self.shape.half_cols();

        process_lanes(spec, Axis(0), &self.ifft_depth);
        process_lanes(spec, Axis(1), &self.ifft_rows);

        // The complex->real pass requires exactly-real DC and Nyquist bins;
        // Hermitian-symmetric data only ever carries roundoff there.
        spec.index_axis_mut(Axis(2), 0)
            .mapv_inplace(|z| Complex::new(z.re, F::zero()));
        if cols % 2 == 0 && half > 1 {
            spec.index_axis_mut(Axis(2), half - 1)
                .mapv_inplace(|z| Complex::new(z.re, F::zero()));
        }

        let spec_slabs: Vec<_> = spec.outer_iter().collect();
        let out_slabs: Vec<_> = out.outer_iter_mut().collect();
        out_slabs
            .into_par_iter()
            .zip(spec_slabs)
            .try_for_each(|(mut oo, sp)| {
                let mut line = self.c2r.make_input_vec();
                let mut real = vec![F::zero(); cols];
                let mut scratch = self.c2r.make_scratch_vec();
                for j in 0..rows {
                    for (dst, &src) in line.iter_mut().zip(sp.row(j)) {
                        *dst = src;
                    }
                    self.c2r
                        .process_with_scratch(&mut line, &mut real, &mut scratch)
                        .map_err(|e| VsnrError::Transform(e.to_string()))?;
                    for (dst, &src) in oo.row_mut(j).iter_mut().zip(real.iter()) {
                        *dst = src;
                    }
                }
                Ok(())
            })
    }
}

/// Apply a 1D complex plan along `axis`, gathering each lane through a
/// contiguous buffer. Lanes are disjoint and run in parallel.
fn process_lanes<F: VsnrFloat>(spec: &mut Array3<Complex<F>>, axis: Axis, plan: &Arc<dyn Fft<F>>) {
    let len = spec.len_of(axis);
    let lanes: Vec<_> = spec.lanes_mut(axis).into_iter().collect();
    lanes.into_par_iter().for_each(|mut lane| {
        let mut buf = vec![Complex::new(F::zero(), F::zero()); len];
        for (dst, &src) in buf.iter_mut().zip(lane.iter()) {
            *dst = src;
        }
        plan.process(&mut buf);
        for (dst, &src) in lane.iter_mut().zip(buf.iter()) {
            *dst = src;
        }
    });
}
