//! Error types for pipeline construction.
//!
//! Runtime per-request failures are not errors in this sense: they travel
//! through each request's boolean completion callback.

use thiserror::Error;

/// Failure to construct a scaling or readback pipeline.
#[derive(Debug, Error)]
pub enum ScalerError {
    /// The requested readback format cannot be produced on this device.
    #[error("unsupported readback format {0:?}")]
    UnsupportedFormat(wgpu::TextureFormat),

    /// 4:2:0 output requires an even destination size.
    #[error("destination size {width}x{height} must be even for 4:2:0 output")]
    OddDestinationSize { width: u32, height: u32 },

    /// The source subrectangle extends outside the source texture.
    #[error("source subrectangle out of bounds")]
    SubrectOutOfBounds,

    /// Scaling to or from an empty size.
    #[error("empty source or destination size")]
    EmptySize,
}
