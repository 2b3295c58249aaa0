//! Grid coordinate types for cell and corner addressing.
//!
//! A map of `W x H` cells has `(W+1) x (H+1)` corners. Heights, normals and
//! texture weights live on corners; visibility, fog and render regions are
//! expressed in cells. Rectangles are inclusive on all four sides.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Size of a terrain grid in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct GridSize {
    /// Map width in cells.
    pub width: u32,
    /// Map height in cells.
    pub height: u32,
}

impl GridSize {
    /// Creates a new grid size.
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width of the corner grid (`width + 1`).
    #[must_use]
    pub const fn corner_width(self) -> u32 {
        self.width + 1
    }

    /// Height of the corner grid (`height + 1`).
    #[must_use]
    pub const fn corner_height(self) -> u32 {
        self.height + 1
    }

    /// Total number of corners.
    #[must_use]
    pub const fn corner_count(self) -> usize {
        (self.corner_width() as usize) * (self.corner_height() as usize)
    }

    /// Total number of cells.
    #[must_use]
    pub const fn cell_count(self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    /// Linear index of the corner at `(x, y)`, with `x <= width`, `y <= height`.
    #[must_use]
    pub const fn corner_index(self, x: u32, y: u32) -> usize {
        (y as usize) * (self.corner_width() as usize) + (x as usize)
    }

    /// Whether `(x, y)` is a valid corner coordinate.
    #[must_use]
    pub const fn contains_corner(self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x <= self.width as i32 && y <= self.height as i32
    }

    /// Whether `(x, y)` is a valid cell coordinate.
    #[must_use]
    pub const fn contains_cell(self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x < self.width as i32 && y < self.height as i32
    }

    /// Whether the grid has no cells at all.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// An inclusive rectangle of cells: `[left, right] x [top, bottom]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Pod, Zeroable)]
#[repr(C)]
pub struct CellRect {
    /// X coordinate of the left-most column of cells.
    pub left: i32,
    /// Y coordinate of the top-most row of cells.
    pub top: i32,
    /// X coordinate of the right-most column of cells (inclusive).
    pub right: i32,
    /// Y coordinate of the bottom-most row of cells (inclusive).
    pub bottom: i32,
}

impl CellRect {
    /// Creates a new inclusive cell rectangle.
    #[must_use]
    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// A single-cell rectangle.
    #[must_use]
    pub const fn cell(x: i32, y: i32) -> Self {
        Self::new(x, y, x, y)
    }

    /// The rectangle covering an entire map.
    #[must_use]
    pub const fn full(size: GridSize) -> Self {
        Self::new(0, 0, size.width as i32 - 1, size.height as i32 - 1)
    }

    /// Width in cells.
    #[must_use]
    pub const fn width(&self) -> i32 {
        self.right - self.left + 1
    }

    /// Height in cells.
    #[must_use]
    pub const fn height(&self) -> i32 {
        self.bottom - self.top + 1
    }

    /// Number of cells covered.
    #[must_use]
    pub const fn cell_count(&self) -> i64 {
        (self.width() as i64) * (self.height() as i64)
    }

    /// Whether the rectangle covers no cells.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.right < self.left || self.bottom < self.top
    }

    /// Whether the rectangle contains the given cell.
    #[must_use]
    pub const fn contains_cell(&self, x: i32, y: i32) -> bool {
        x >= self.left && x <= self.right && y >= self.top && y <= self.bottom
    }

    /// Whether this rectangle and `other` share at least one cell.
    #[must_use]
    pub const fn intersects(&self, other: &CellRect) -> bool {
        self.left <= other.right
            && self.right >= other.left
            && self.top <= other.bottom
            && self.bottom >= other.top
    }

    /// Rectangle grown by `n` cells on every side.
    #[must_use]
    pub const fn expanded(&self, n: i32) -> Self {
        Self::new(self.left - n, self.top - n, self.right + n, self.bottom + n)
    }

    /// Rectangle clamped to the valid cell range of `size`.
    ///
    /// An empty grid yields an empty rectangle.
    #[must_use]
    pub fn clamped_to(&self, size: GridSize) -> Self {
        let max_x = size.width as i32 - 1;
        let max_y = size.height as i32 - 1;
        Self::new(
            self.left.clamp(0, max_x.max(0)),
            self.top.clamp(0, max_y.max(0)),
            self.right.clamp(0, max_x.max(0)),
            self.bottom.clamp(0, max_y.max(0)),
        )
    }

    /// Smallest rectangle covering both `self` and `other`.
    #[must_use]
    pub fn union(&self, other: &CellRect) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Self::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Iterates over all cells `(x, y)` in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let rect = *self;
        (rect.top..=rect.bottom).flat_map(move |y| (rect.left..=rect.right).map(move |x| (x, y)))
    }

    /// Iterates over all corners touched by the covered cells, i.e.
    /// `[left, right+1] x [top, bottom+1]`, in row-major order.
    pub fn corners(&self) -> impl Iterator<Item = (i32, i32)> + '_ {
        let rect = *self;
        (rect.top..=rect.bottom + 1)
            .flat_map(move |y| (rect.left..=rect.right + 1).map(move |x| (x, y)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_grid_size_corner_counts() {
        let size = GridSize::new(128, 64);
        assert_eq!(size.corner_width(), 129);
        assert_eq!(size.corner_height(), 65);
        assert_eq!(size.corner_count(), 129 * 65);
    }

    #[test]
    fn test_cell_rect_dimensions() {
        let rect = CellRect::new(2, 3, 5, 3);
        assert_eq!(rect.width(), 4);
        assert_eq!(rect.height(), 1);
        assert_eq!(rect.cell_count(), 4);
        assert!(!rect.is_empty());
    }

    #[test]
    fn test_cell_rect_expand_then_clamp() {
        let size = GridSize::new(16, 16);
        let rect = CellRect::cell(0, 15).expanded(1).clamped_to(size);
        assert_eq!(rect, CellRect::new(0, 14, 1, 15));
    }

    #[test]
    fn test_cell_rect_union_with_empty() {
        let a = CellRect::new(4, 4, 2, 2); // empty
        let b = CellRect::new(1, 1, 3, 3);
        assert_eq!(a.union(&b), b);
        assert_eq!(b.union(&a), b);
    }

    #[test]
    fn test_cell_iteration_order() {
        let rect = CellRect::new(1, 1, 2, 2);
        let cells: Vec<_> = rect.cells().collect();
        assert_eq!(cells, vec![(1, 1), (2, 1), (1, 2), (2, 2)]);
    }

    #[test]
    fn test_corner_iteration_covers_extra_row_and_column() {
        let rect = CellRect::cell(0, 0);
        let corners: Vec<_> = rect.corners().collect();
        assert_eq!(corners, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
    }

    proptest! {
        #[test]
        fn prop_clamped_rect_is_inside_grid(
            l in -10i32..70, t in -10i32..70, r in -10i32..70, b in -10i32..70
        ) {
            let size = GridSize::new(48, 48);
            let rect = CellRect::new(l, t, r, b).clamped_to(size);
            prop_assert!(rect.left >= 0 && rect.top >= 0);
            prop_assert!(rect.right < 48 && rect.bottom < 48);
        }

        #[test]
        fn prop_union_contains_both(
            ax in 0i32..32, ay in 0i32..32, bx in 0i32..32, by in 0i32..32
        ) {
            let a = CellRect::cell(ax, ay);
            let b = CellRect::cell(bx, by);
            let u = a.union(&b);
            prop_assert!(u.contains_cell(ax, ay));
            prop_assert!(u.contains_cell(bx, by));
        }
    }
}
