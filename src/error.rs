//! Error taxonomy for kernel synthesis and the ADMM solver.

use thiserror::Error;

/// Errors surfaced by the noise-removal entry points.
///
/// Every variant is fatal for the call that produced it: there are no
/// retries and no partial results. All intermediate buffers are dropped
/// before the error propagates.
#[derive(Debug, Error)]
pub enum VsnrError {
    /// The filter list is malformed (unrecognized tag, truncated record).
    #[error("invalid filter list: {0}")]
    Configuration(String),

    /// A numeric input is degenerate and would poison the computation
    /// (zero eta, nonpositive sigma, zero-norm reference image, ...).
    /// Rejected before any transform work is scheduled.
    #[error("invalid input: {0}")]
    Validation(String),

    /// A Fourier transform plan failed to execute.
    #[error("fourier transform failed: {0}")]
    Transform(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, VsnrError>;
