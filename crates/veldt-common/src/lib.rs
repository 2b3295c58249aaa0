//! # Veldt Common
//!
//! Common types and shared abstractions for the Veldt terrain renderer.
//!
//! This crate provides the foundational types used across the rendering
//! subsystems:
//! - Grid and rectangle coordinate types (cells vs. corners)
//! - Common error types
//! - Prelude for convenient imports

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod error;
pub mod grid;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::*;
    pub use crate::grid::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_rect_clamping() {
        let size = GridSize::new(64, 32);
        let rect = CellRect::new(-3, -3, 70, 40).clamped_to(size);
        assert_eq!(rect, CellRect::new(0, 0, 63, 31));
    }

    #[test]
    fn test_corner_indexing_round_trip() {
        let size = GridSize::new(8, 4);
        let idx = size.corner_index(8, 4);
        assert_eq!(idx, 4 * 9 + 8);
    }
}
