//! Periodic first-difference operators in the spectral domain.
//!
//! A circular 2-tap difference along an axis is a convolution kernel, so
//! its action (and its adjoint) reduces to elementwise spectral
//! multiplication. The three spectra are built once per call and shared
//! read-only by the filter calibration and by every solver iteration.

use ndarray::Array3;
use rustfft::num_complex::Complex;

use crate::error::{Result, VsnrError};
use crate::float_trait::VsnrFloat;
use crate::transforms::FftPlans3d;

/// Voxel pitch per axis: `dx` along cols, `dy` along rows, `dz` along
/// depth.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpacing<F> {
    pub dx: F,
    pub dy: F,
    pub dz: F,
}

impl<F: VsnrFloat> GridSpacing<F> {
    pub fn new(dx: F, dy: F, dz: F) -> Self {
        Self { dx, dy, dz }
    }

    /// Isotropic spacing.
    pub fn uniform(d: F) -> Self {
        Self::new(d, d, d)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        for (name, d) in [("dx", self.dx), ("dy", self.dy), ("dz", self.dz)] {
            if d <= F::zero() || !d.is_finite() {
                return Err(VsnrError::Validation(format!(
                    "{} must be finite and > 0, got {:?}",
                    name, d
                )));
            }
        }
        Ok(())
    }
}

impl<F: VsnrFloat> Default for GridSpacing<F> {
    fn default() -> Self {
        Self::uniform(F::one())
    }
}

/// Build the spectral representations of the three directional periodic
/// difference operators, ordered (cols, rows, depth).
///
/// Each spatial stencil carries `+1/d` at the origin and `-1/d` at the
/// axis wrap index; the origin tap wins when a length-1 axis folds the
/// wrap index onto 0. Stencils are transient; only the spectra survive.
pub fn derivative_spectra<F: VsnrFloat>(
    plans: &FftPlans3d<F>,
    spacing: &GridSpacing<F>,
) -> Result<[Array3<Complex<F>>; 3]> {
    spacing.validate()?;
    let shape = plans.shape();
    let (depth, rows, cols) = shape.dim();

    let build = |wrap: (usize, usize, usize), d: F| -> Result<Array3<Complex<F>>> {
        let mut stencil = Array3::zeros(shape.dim());
        let inv = F::one() / d;
        stencil[wrap] = -inv;
        stencil[(0, 0, 0)] = inv;
        plans.forward(stencil.view())
    };

    Ok([
        build((0, 0, cols - 1), spacing.dx)?,
        build((0, rows - 1, 0), spacing.dy)?,
        build((depth - 1, 0, 0), spacing.dz)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arithmetic;
    use crate::transforms::VolumeShape;
    use ndarray::Array3;

    /// Direct circular convolution of a 2-tap difference stencil along one
    /// axis, the oracle for the spectral application.
    fn circular_difference(
        vol: &Array3<f32>,
        axis: usize,
        d: f32,
    ) -> Array3<f32> {
        let dim = vol.dim();
        let mut out = Array3::zeros(dim);
        for ((k, j, i), val) in out.indexed_iter_mut() {
            let next = match axis {
                0 => vol[[k, j, (i + 1) % dim.2]],
                1 => vol[[k, (j + 1) % dim.1, i]],
                _ => vol[[(k + 1) % dim.0, j, i]],
            };
            *val = (vol[[k, j, i]] - next) / d;
        }
        out
    }

    fn spectral_derivative(
        vol: &Array3<f32>,
        axis: usize,
        spacing: &GridSpacing<f32>,
    ) -> Array3<f32> {
        let plans = FftPlans3d::<f32>::new(VolumeShape::from_dim(vol.dim())).unwrap();
        let derivs = derivative_spectra(&plans, spacing).unwrap();

        let mut spec = plans.forward(vol.view()).unwrap();
        arithmetic::mul_inplace(
            derivs[axis].as_slice().unwrap(),
            spec.as_slice_mut().unwrap(),
        );
        let mut out = Array3::zeros(vol.dim());
        plans.inverse_inplace(&mut spec, &mut out).unwrap();
        arithmetic::normalize_inplace(out.as_slice_mut().unwrap());
        out
    }

    #[test]
    fn test_derivative_matches_explicit_difference_along_cols() {
        let dim = (2, 3, 8);
        let vol = Array3::from_shape_fn(dim, |(k, j, i)| (i + 2 * j + 5 * k) as f32);
        let spacing = GridSpacing::new(0.5, 1.0, 1.0);

        let got = spectral_derivative(&vol, 0, &spacing);
        let want = circular_difference(&vol, 0, 0.5);

        for (g, w) in got.iter().zip(want.iter()) {
            assert!((g - w).abs() < 1e-3, "got {}, want {}", g, w);
        }
    }

    #[test]
    fn test_derivative_matches_explicit_difference_along_rows_and_depth() {
        let dim = (4, 4, 4);
        let vol = Array3::from_shape_fn(dim, |(k, j, i)| ((i * 7 + j * 3 + k * 11) % 13) as f32);

        for (axis, d) in [(1usize, 2.0f32), (2, 0.25)] {
            let spacing = match axis {
                1 => GridSpacing::new(1.0, d, 1.0),
                _ => GridSpacing::new(1.0, 1.0, d),
            };
            let got = spectral_derivative(&vol, axis, &spacing);
            let want = circular_difference(&vol, axis, d);
            for (g, w) in got.iter().zip(want.iter()) {
                assert!((g - w).abs() < 1e-3, "axis {}: got {}, want {}", axis, g, w);
            }
        }
    }

    #[test]
    fn test_ramp_interior_and_wrap_values() {
        // Ramp along cols: interior bins carry -(v[i+1]-v[i])/dx = -1,
        // the wrap bin carries (cols-1)/dx.
        let dim = (1, 1, 8);
        let vol = Array3::from_shape_fn(dim, |(_, _, i)| i as f32);
        let got = spectral_derivative(&vol, 0, &GridSpacing::uniform(1.0));

        for i in 0..7 {
            assert!((got[[0, 0, i]] + 1.0).abs() < 1e-3, "interior {}", i);
        }
        assert!((got[[0, 0, 7]] - 7.0).abs() < 1e-3, "wrap value");
    }

    #[test]
    fn test_degenerate_axis_keeps_origin_tap() {
        // rows == 1 folds the wrap index onto the origin; the +1/d tap wins
        // and the operator magnitude is flat 1/d.
        let plans = FftPlans3d::<f32>::new(VolumeShape::new(1, 1, 8)).unwrap();
        let derivs = derivative_spectra(&plans, &GridSpacing::uniform(2.0)).unwrap();

        for val in derivs[1].iter() {
            assert!(
                (val.norm() - 0.5).abs() < 1e-5,
                "degenerate-axis operator should be flat 1/d, got {}",
                val.norm()
            );
        }
    }

    #[test]
    fn test_constant_volume_has_zero_derivative() {
        let vol = Array3::from_elem((3, 3, 4), 2.5f32);
        for axis in 0..3 {
            let got = spectral_derivative(&vol, axis, &GridSpacing::uniform(1.0));
            for g in got.iter() {
                assert!(g.abs() < 1e-4, "axis {} derivative should vanish", axis);
            }
        }
    }

    #[test]
    fn test_nonpositive_spacing_rejected() {
        let plans = FftPlans3d::<f32>::new(VolumeShape::new(2, 2, 2)).unwrap();
        assert!(derivative_spectra(&plans, &GridSpacing::new(1.0, 0.0, 1.0)).is_err());
        assert!(derivative_spectra(&plans, &GridSpacing::new(-1.0, 1.0, 1.0)).is_err());
    }
}
