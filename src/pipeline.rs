//! Top-level entry point: intensity normalization around synthesis and
//! solve.
//!
//! The solver's shrinkage threshold is expressed in normalized intensity
//! units, so the volume is scaled to unit peak before the kernel is
//! calibrated, and the result is scaled back afterwards. One set of
//! transform plans is shared by both stages.

use ndarray::{Array3, ArrayView3};

use crate::arithmetic;
use crate::error::Result;
use crate::filter_bank::{synthesize_noise_kernel_with_plans, FilterDescriptor};
use crate::float_trait::VsnrFloat;
use crate::operators::GridSpacing;
use crate::solver::denoise_with_plans;
use crate::transforms::{FftPlans3d, VolumeShape};

/// Synthesize the noise kernel for `filters` and remove the reconstructed
/// noise from `image` in one call.
pub fn remove_stationary_noise<F: VsnrFloat>(
    image: ArrayView3<F>,
    filters: &[FilterDescriptor<F>],
    nit: usize,
    beta: F,
    spacing: &GridSpacing<F>,
) -> Result<Array3<F>> {
    let plans = FftPlans3d::new(VolumeShape::from_dim(image.dim()))?;

    let image = image.as_standard_layout();
    let peak = arithmetic::max_abs(image.as_slice().unwrap());
    if peak <= F::zero() {
        // Nothing to scale and nothing to remove.
        log::debug!("input volume is identically zero; returning it unchanged");
        return Ok(image.to_owned());
    }

    let mut scaled = image.to_owned();
    arithmetic::div_inplace(scaled.as_slice_mut().unwrap(), peak);

    let kernel = synthesize_noise_kernel_with_plans(scaled.view(), filters, spacing, &plans)?;
    let mut out = denoise_with_plans(scaled.view(), kernel.view(), nit, beta, spacing, &plans)?;

    arithmetic::scale_inplace(out.as_slice_mut().unwrap(), peak);
    Ok(out)
}
