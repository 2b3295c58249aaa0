//! Narrow interfaces to the terrain data model.
//!
//! The rendering core does not own terrain data. It reads heights, normals
//! and per-layer texture weights through [`TerrainSource`], and the
//! fog-of-war state through [`SightSource`]. [`HeightmapSurface`] is an
//! owned implementation of both, used by editors and by the tests.

use glam::Vec3;
use veldt_common::{CellRect, GridSize};

/// Read-only view of a height-mapped terrain grid.
///
/// All coordinates are corner coordinates in `0..=width`, `0..=height`.
/// Implementations are expected to keep normals consistent with heights;
/// the renderer re-reads both after a height-edit notification.
pub trait TerrainSource {
    /// Map size in cells.
    fn size(&self) -> GridSize;

    /// Number of ground texture layers.
    fn texture_count(&self) -> u32;

    /// Height at the given corner.
    fn height_at(&self, x: u32, y: u32) -> f32;

    /// Surface normal at the given corner.
    fn normal_at(&self, x: u32, y: u32) -> Vec3;

    /// Blend weight of `layer` at the given corner, `0..=255`.
    fn texture_weight(&self, layer: u32, x: u32, y: u32) -> u8;

    /// World-space position of the given corner.
    fn corner_position(&self, x: u32, y: u32) -> Vec3 {
        Vec3::new(x as f32, -(y as f32), self.height_at(x, y))
    }
}

/// Per-cell fog-of-war state, read from the visibility collaborator.
pub trait SightSource {
    /// Whether the cell has ever been explored.
    fn is_explored(&self, x: u32, y: u32) -> bool;

    /// Whether the cell is currently fogged (explored but not in sight).
    fn is_fogged(&self, x: u32, y: u32) -> bool;
}

/// Sight source for a terrain with no fog of war: everything is visible.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullSight;

impl SightSource for FullSight {
    fn is_explored(&self, _x: u32, _y: u32) -> bool {
        true
    }

    fn is_fogged(&self, _x: u32, _y: u32) -> bool {
        false
    }
}

/// An owned height/weight grid with derived normals.
///
/// Heights and weights are stored per corner; normals are recomputed for the
/// edited rectangle plus a one-corner ring whenever heights change, since a
/// corner's normal depends on its neighbors.
#[derive(Debug, Clone)]
pub struct HeightmapSurface {
    size: GridSize,
    heights: Vec<f32>,
    normals: Vec<Vec3>,
    /// Layer-major weight planes, one byte per corner per layer.
    weights: Vec<Vec<u8>>,
}

impl HeightmapSurface {
    /// Creates a flat surface with the given texture layer count.
    ///
    /// Layer 0 starts fully opaque, all other layers at zero weight.
    #[must_use]
    pub fn flat(size: GridSize, layers: u32) -> Self {
        let corners = size.corner_count();
        let mut weights = Vec::with_capacity(layers as usize);
        for layer in 0..layers {
            weights.push(vec![if layer == 0 { 255 } else { 0 }; corners]);
        }
        Self {
            size,
            heights: vec![0.0; corners],
            normals: vec![Vec3::Z; corners],
            weights,
        }
    }

    /// Sets the height at a corner and rederives the affected normals.
    pub fn set_height(&mut self, x: u32, y: u32, height: f32) {
        let idx = self.size.corner_index(x, y);
        self.heights[idx] = height;
        let touched = CellRect::cell(x as i32, y as i32);
        self.rederive_normals(&touched.expanded(1));
    }

    /// Sets the weight of `layer` at a corner.
    pub fn set_weight(&mut self, layer: u32, x: u32, y: u32, weight: u8) {
        let idx = self.size.corner_index(x, y);
        self.weights[layer as usize][idx] = weight;
    }

    /// Recomputes normals for all corners touched by `rect` (cell rectangle,
    /// corners `[left, right+1] x [top, bottom+1]`), clamped to the grid.
    pub fn rederive_normals(&mut self, rect: &CellRect) {
        let size = self.size;
        for (x, y) in rect.corners() {
            if size.contains_corner(x, y) {
                let idx = size.corner_index(x as u32, y as u32);
                self.normals[idx] = self.derive_normal(x as u32, y as u32);
            }
        }
    }

    /// Central-difference normal from the neighboring corner heights.
    fn derive_normal(&self, x: u32, y: u32) -> Vec3 {
        let size = self.size;
        let h = |cx: i32, cy: i32| -> f32 {
            let cx = cx.clamp(0, size.width as i32) as u32;
            let cy = cy.clamp(0, size.height as i32) as u32;
            self.heights[size.corner_index(cx, cy)]
        };
        let x = x as i32;
        let y = y as i32;
        // World y is -grid y, so the slope along world y flips sign.
        let dx = (h(x - 1, y) - h(x + 1, y)) / 2.0;
        let dy = (h(x, y + 1) - h(x, y - 1)) / 2.0;
        Vec3::new(dx, dy, 1.0).normalize()
    }
}

impl TerrainSource for HeightmapSurface {
    fn size(&self) -> GridSize {
        self.size
    }

    fn texture_count(&self) -> u32 {
        self.weights.len() as u32
    }

    fn height_at(&self, x: u32, y: u32) -> f32 {
        self.heights[self.size.corner_index(x, y)]
    }

    fn normal_at(&self, x: u32, y: u32) -> Vec3 {
        self.normals[self.size.corner_index(x, y)]
    }

    fn texture_weight(&self, layer: u32, x: u32, y: u32) -> u8 {
        self.weights[layer as usize][self.size.corner_index(x, y)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_surface_heights_and_normals() {
        let surface = HeightmapSurface::flat(GridSize::new(8, 8), 2);
        assert_eq!(surface.height_at(0, 0), 0.0);
        assert_eq!(surface.height_at(8, 8), 0.0);
        assert_eq!(surface.normal_at(4, 4), Vec3::Z);
    }

    #[test]
    fn test_layer_zero_is_opaque() {
        let surface = HeightmapSurface::flat(GridSize::new(4, 4), 3);
        assert_eq!(surface.texture_weight(0, 2, 2), 255);
        assert_eq!(surface.texture_weight(1, 2, 2), 0);
        assert_eq!(surface.texture_weight(2, 2, 2), 0);
    }

    #[test]
    fn test_set_height_tilts_neighbor_normals() {
        let mut surface = HeightmapSurface::flat(GridSize::new(8, 8), 1);
        surface.set_height(4, 4, 2.0);

        // The raised corner itself still has a symmetric neighborhood.
        assert_eq!(surface.normal_at(4, 4), Vec3::Z);
        // Corners to the left and right lean away from the peak.
        let left = surface.normal_at(3, 4);
        let right = surface.normal_at(5, 4);
        assert!(left.x < 0.0);
        assert!(right.x > 0.0);
        // Corners two cells away are unaffected.
        assert_eq!(surface.normal_at(2, 4), Vec3::Z);
    }

    #[test]
    fn test_corner_position_flips_y() {
        let surface = HeightmapSurface::flat(GridSize::new(4, 4), 1);
        assert_eq!(surface.corner_position(3, 2), Vec3::new(3.0, -2.0, 0.0));
    }
}
