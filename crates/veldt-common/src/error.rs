//! Error types for the Veldt terrain renderer.
//!
//! Configuration problems are fatal at bind time; everything that can go
//! wrong during a frame is either clamped (out-of-range edit rectangles) or
//! degrades to rendering less (missing texture layers, empty region lists)
//! rather than producing an error.

use thiserror::Error;

/// Top-level error type for ground-rendering operations.
#[derive(Debug, Error)]
pub enum GroundError {
    /// An operation that requires a bound terrain was called without one.
    #[error("no terrain is bound to the renderer")]
    NoTerrain,

    /// The terrain reports a different number of texture layers than the
    /// geometry cache was built for.
    #[error("texture layer count mismatch: cache has {cached}, terrain has {terrain}")]
    LayerCountMismatch {
        /// Layer count the cache was allocated with.
        cached: u32,
        /// Layer count the terrain reports.
        terrain: u32,
    },

    /// A terrain dimension is zero or otherwise unusable.
    #[error("invalid terrain size: {width}x{height}")]
    InvalidSize {
        /// Map width in cells.
        width: u32,
        /// Map height in cells.
        height: u32,
    },

    /// GPU resource creation or upload failure.
    #[error("GPU error: {0}")]
    Gpu(String),
}

/// Result type alias for ground-rendering operations.
pub type GroundResult<T> = Result<T, GroundError>;
