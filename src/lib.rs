//! Variational stationary noise removal for 3D volumes.
//!
//! Fixed-pattern noise (stripes, fringes, repeating acquisition
//! artifacts) is modeled as the circular convolution of an unknown
//! excitation field with a known noise kernel. A filter bank synthesizes
//! that kernel from parametric descriptors calibrated against the image,
//! and an ADMM optimizer working in the Fourier domain estimates the
//! excitation and subtracts the reconstructed noise.

pub mod arithmetic;
pub mod error;
pub mod filter_bank;
pub mod float_trait;
pub mod operators;
pub mod pipeline;
pub mod solver;
pub mod transforms;

// Re-export commonly used types at the crate root
pub use error::{Result, VsnrError};
pub use filter_bank::{
    decode_filter_list, synthesize_noise_kernel, synthesize_noise_kernel_with_plans,
    FilterDescriptor,
};
pub use float_trait::VsnrFloat;
pub use operators::{derivative_spectra, GridSpacing};
pub use pipeline::remove_stationary_noise;
pub use solver::{denoise, denoise_with_plans};
pub use transforms::{FftPlans3d, VolumeShape};
