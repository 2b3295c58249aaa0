//! Fixed-size chunk tiling of the terrain.
//!
//! The chunk grid is the cheaper alternative to the quadtree: the map is cut
//! into fixed-size chunks, each carrying precomputed bounds, roughness and
//! per-layer texture flags. Bounds and roughness are rebuilt when a terrain
//! is bound; edits refresh only the touched chunks.

use glam::Vec3;
use tracing::debug;
use veldt_common::{CellRect, GridSize, GroundError, GroundResult};

use crate::lod::TEX_ROUGHNESS_MULTIPLIER;
use crate::surface::{SightSource, TerrainSource};

/// Default chunk edge length in cells.
pub const DEFAULT_CHUNK_SIZE: u32 = 32;

/// Neighbor slots of a chunk: left, top, right, bottom.
pub const NEIGHBOR_LEFT: usize = 0;
/// See [`NEIGHBOR_LEFT`].
pub const NEIGHBOR_TOP: usize = 1;
/// See [`NEIGHBOR_LEFT`].
pub const NEIGHBOR_RIGHT: usize = 2;
/// See [`NEIGHBOR_LEFT`].
pub const NEIGHBOR_BOTTOM: usize = 3;

/// One fixed-size region of the terrain with precomputed bounds.
#[derive(Debug, Clone)]
pub struct TerrainChunk {
    /// Cells covered, inclusive. Edge chunks may be smaller than the
    /// nominal chunk size.
    pub rect: CellRect,
    /// Lowest corner height in the chunk.
    pub min_height: f32,
    /// Highest corner height in the chunk.
    pub max_height: f32,
    /// Bounding-sphere center in world space.
    pub center: Vec3,
    /// Bounding-sphere radius.
    pub radius: f32,
    /// Per layer: whether any corner has a nonzero blend weight.
    pub has_texture: Vec<bool>,
    /// Height-variance proxy from normal deviation.
    pub roughness: f32,
    /// Texture-transition-density roughness term.
    pub texture_roughness: f32,
    /// Whether every cell of the chunk is still unexplored.
    pub unexplored: bool,
    /// Neighbor chunk indices, `[left, top, right, bottom]`, `None` at the
    /// terrain border.
    pub neighbors: [Option<u32>; 4],
}

impl TerrainChunk {
    /// Corner-line span of the chunk: `(x0, y0, x1, y1)` where `x1`/`y1`
    /// are the corner coordinates of the right/bottom edge.
    #[must_use]
    pub fn corner_span(&self) -> (u32, u32, u32, u32) {
        (
            self.rect.left as u32,
            self.rect.top as u32,
            (self.rect.right + 1) as u32,
            (self.rect.bottom + 1) as u32,
        )
    }
}

/// The terrain partitioned into fixed-size chunks with adjacency.
#[derive(Debug, Clone)]
pub struct ChunkGrid {
    size: GridSize,
    chunk_size: u32,
    cols: u32,
    rows: u32,
    chunks: Vec<TerrainChunk>,
}

impl ChunkGrid {
    /// Partitions a terrain into `ceil(W/chunk_size) x ceil(H/chunk_size)`
    /// chunks and precomputes their static data.
    pub fn build<S, V>(surface: &S, sight: &V, chunk_size: u32) -> GroundResult<Self>
    where
        S: TerrainSource + ?Sized,
        V: SightSource + ?Sized,
    {
        let size = surface.size();
        if size.is_empty() || chunk_size == 0 {
            return Err(GroundError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }

        let cols = size.width.div_ceil(chunk_size);
        let rows = size.height.div_ceil(chunk_size);
        let mut chunks = Vec::with_capacity((cols * rows) as usize);

        for cy in 0..rows {
            for cx in 0..cols {
                let left = (cx * chunk_size) as i32;
                let top = (cy * chunk_size) as i32;
                let rect = CellRect::new(
                    left,
                    top,
                    (left + chunk_size as i32 - 1).min(size.width as i32 - 1),
                    (top + chunk_size as i32 - 1).min(size.height as i32 - 1),
                );
                let neighbors = [
                    (cx > 0).then(|| cy * cols + cx - 1),
                    (cy > 0).then(|| (cy - 1) * cols + cx),
                    (cx + 1 < cols).then(|| cy * cols + cx + 1),
                    (cy + 1 < rows).then(|| (cy + 1) * cols + cx),
                ];
                chunks.push(TerrainChunk {
                    rect,
                    min_height: 0.0,
                    max_height: 0.0,
                    center: Vec3::ZERO,
                    radius: 0.0,
                    has_texture: vec![false; surface.texture_count() as usize],
                    roughness: 0.0,
                    texture_roughness: 0.0,
                    unexplored: true,
                    neighbors,
                });
            }
        }

        let mut grid = Self {
            size,
            chunk_size,
            cols,
            rows,
            chunks,
        };
        for index in 0..grid.chunks.len() {
            grid.refresh_geometry(surface, index);
            grid.refresh_textures(surface, index);
            grid.refresh_sight(sight, index);
        }
        debug!(
            cols,
            rows,
            chunk_size,
            "built terrain chunk grid"
        );
        Ok(grid)
    }

    /// The map size the grid was built for.
    #[must_use]
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Chunk edge length in cells.
    #[must_use]
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// All chunks in row-major order.
    #[must_use]
    pub fn chunks(&self) -> &[TerrainChunk] {
        &self.chunks
    }

    /// The chunk at `index`.
    #[must_use]
    pub fn chunk(&self, index: usize) -> &TerrainChunk {
        &self.chunks[index]
    }

    /// Number of chunks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// Whether the grid has no chunks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Index of the chunk containing the given cell.
    #[must_use]
    pub fn chunk_index_at(&self, x: u32, y: u32) -> Option<usize> {
        if !self.size.contains_cell(x as i32, y as i32) {
            return None;
        }
        let cx = x / self.chunk_size;
        let cy = y / self.chunk_size;
        Some((cy * self.cols + cx) as usize)
    }

    /// Indices of all chunks intersecting the given cell rectangle.
    fn touched_by(&self, rect: &CellRect) -> Vec<usize> {
        let rect = rect.clamped_to(self.size);
        if rect.is_empty() || self.size.is_empty() {
            return Vec::new();
        }
        let cx0 = rect.left as u32 / self.chunk_size;
        let cy0 = rect.top as u32 / self.chunk_size;
        let cx1 = rect.right as u32 / self.chunk_size;
        let cy1 = rect.bottom as u32 / self.chunk_size;
        let mut touched = Vec::new();
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                touched.push((cy * self.cols + cx) as usize);
            }
        }
        touched
    }

    /// Refreshes chunk bounds and roughness after a height edit.
    ///
    /// The rectangle is expanded by one cell because normals of the ring
    /// around the edit change too. Idempotent: re-applying the same
    /// rectangle recomputes the same values.
    pub fn height_changed<S>(&mut self, surface: &S, rect: &CellRect)
    where
        S: TerrainSource + ?Sized,
    {
        for index in self.touched_by(&rect.expanded(1)) {
            self.refresh_geometry(surface, index);
        }
    }

    /// Refreshes per-layer texture flags and texture roughness after a
    /// texture edit.
    pub fn texture_changed<S>(&mut self, surface: &S, rect: &CellRect)
    where
        S: TerrainSource + ?Sized,
    {
        for index in self.touched_by(rect) {
            self.refresh_textures(surface, index);
        }
    }

    /// Refreshes the unexplored flag after a fog-of-war change.
    pub fn sight_changed<V>(&mut self, sight: &V, rect: &CellRect)
    where
        V: SightSource + ?Sized,
    {
        for index in self.touched_by(rect) {
            self.refresh_sight(sight, index);
        }
    }

    fn refresh_geometry<S>(&mut self, surface: &S, index: usize)
    where
        S: TerrainSource + ?Sized,
    {
        let (x0, y0, x1, y1) = self.chunks[index].corner_span();

        // Height bounds and the average normal in one pass.
        let mut min_h = surface.height_at(x0, y0);
        let mut max_h = min_h;
        let mut normal_sum = Vec3::ZERO;
        for y in y0..=y1 {
            for x in x0..=x1 {
                let h = surface.height_at(x, y);
                min_h = min_h.min(h);
                max_h = max_h.max(h);
                normal_sum += surface.normal_at(x, y);
            }
        }
        let avg_normal = normal_sum.normalize_or_zero();

        // Roughness: summed deviation of every normal from the average.
        let mut roughness = 0.0;
        for y in y0..=y1 {
            for x in x0..=x1 {
                roughness += 1.0 - avg_normal.dot(surface.normal_at(x, y));
            }
        }

        let half_dx = (x1 - x0) as f32 / 2.0;
        let half_dy = (y1 - y0) as f32 / 2.0;
        let half_dz = (max_h - min_h) / 2.0;

        let chunk = &mut self.chunks[index];
        chunk.min_height = min_h;
        chunk.max_height = max_h;
        chunk.roughness = (1.0 + roughness).sqrt() - 1.05;
        chunk.center = Vec3::new(
            x0 as f32 + half_dx,
            -(y0 as f32 + half_dy),
            min_h + half_dz,
        );
        chunk.radius = (half_dx * half_dx + half_dy * half_dy + half_dz * half_dz).sqrt();
    }

    fn refresh_textures<S>(&mut self, surface: &S, index: usize)
    where
        S: TerrainSource + ?Sized,
    {
        let (x0, y0, x1, y1) = self.chunks[index].corner_span();
        let layers = surface.texture_count() as usize;
        let corner_count = ((x1 - x0 + 1) * (y1 - y0 + 1)) as f32;

        let mut has_texture = vec![false; layers];
        let mut avg_weight = vec![0.0f32; layers];
        for y in y0..=y1 {
            for x in x0..=x1 {
                for (layer, avg) in avg_weight.iter_mut().enumerate() {
                    let w = surface.texture_weight(layer as u32, x, y);
                    if w > 0 {
                        has_texture[layer] = true;
                        *avg += f32::from(w);
                    }
                }
            }
        }
        for avg in &mut avg_weight {
            *avg /= corner_count * 255.0;
        }

        // Transition density: how much the weights deviate from the chunk
        // average. Uniformly textured chunks score zero.
        let mut total = 0.0;
        for y in y0..=y1 {
            for x in x0..=x1 {
                for (layer, avg) in avg_weight.iter().enumerate() {
                    let w = f32::from(surface.texture_weight(layer as u32, x, y)) / 255.0;
                    total += (w - avg).abs();
                }
            }
        }

        let chunk = &mut self.chunks[index];
        chunk.has_texture = has_texture;
        chunk.texture_roughness = ((1.0 + total).sqrt() - 1.05) * TEX_ROUGHNESS_MULTIPLIER;
    }

    fn refresh_sight<V>(&mut self, sight: &V, index: usize)
    where
        V: SightSource + ?Sized,
    {
        let rect = self.chunks[index].rect;
        let mut unexplored = true;
        'scan: for y in rect.top..=rect.bottom {
            for x in rect.left..=rect.right {
                if sight.is_explored(x as u32, y as u32) {
                    unexplored = false;
                    break 'scan;
                }
            }
        }
        self.chunks[index].unexplored = unexplored;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::{FullSight, HeightmapSurface};

    struct NoSight;
    impl SightSource for NoSight {
        fn is_explored(&self, _x: u32, _y: u32) -> bool {
            false
        }
        fn is_fogged(&self, _x: u32, _y: u32) -> bool {
            true
        }
    }

    fn grid_64(chunk_size: u32) -> (HeightmapSurface, ChunkGrid) {
        let surface = HeightmapSurface::flat(GridSize::new(64, 64), 2);
        let grid = ChunkGrid::build(&surface, &FullSight, chunk_size).expect("build");
        (surface, grid)
    }

    #[test]
    fn test_partition_counts_round_up() {
        let surface = HeightmapSurface::flat(GridSize::new(70, 33), 1);
        let grid = ChunkGrid::build(&surface, &FullSight, 32).expect("build");
        assert_eq!(grid.len(), 3 * 2);
        // The last column/row chunks are clipped to the map.
        let last = grid.chunk(grid.len() - 1);
        assert_eq!(last.rect, CellRect::new(64, 32, 69, 32));
    }

    #[test]
    fn test_neighbor_adjacency() {
        let (_, grid) = grid_64(32);
        assert_eq!(grid.len(), 4);
        let first = grid.chunk(0);
        assert_eq!(first.neighbors, [None, None, Some(1), Some(2)]);
        let last = grid.chunk(3);
        assert_eq!(last.neighbors, [Some(2), Some(1), None, None]);
    }

    #[test]
    fn test_flat_chunk_bounds_and_roughness() {
        let (_, grid) = grid_64(32);
        let chunk = grid.chunk(0);
        assert_eq!(chunk.min_height, 0.0);
        assert_eq!(chunk.max_height, 0.0);
        assert_eq!(chunk.center, Vec3::new(16.0, -16.0, 0.0));
        // Flat terrain: all normals equal the average, roughness shapes to
        // sqrt(1) - 1.05.
        assert!((chunk.roughness - (1.0f32.sqrt() - 1.05)).abs() < 1e-6);
        assert!(chunk.texture_roughness < 0.0);
    }

    #[test]
    fn test_height_edit_refreshes_only_touched_chunks() {
        let (mut surface, mut grid) = grid_64(32);
        surface.set_height(5, 5, 10.0);
        grid.height_changed(&surface, &CellRect::cell(5, 5));

        assert_eq!(grid.chunk(0).max_height, 10.0);
        assert!(grid.chunk(0).roughness > grid.chunk(1).roughness);
        assert_eq!(grid.chunk(3).max_height, 0.0);
    }

    #[test]
    fn test_height_edit_is_idempotent() {
        let (mut surface, mut grid) = grid_64(32);
        surface.set_height(10, 10, 4.0);
        grid.height_changed(&surface, &CellRect::cell(10, 10));
        let once = grid.chunk(0).clone();
        grid.height_changed(&surface, &CellRect::cell(10, 10));
        assert_eq!(grid.chunk(0).roughness, once.roughness);
        assert_eq!(grid.chunk(0).radius, once.radius);
    }

    #[test]
    fn test_texture_edit_sets_layer_flags() {
        let (mut surface, mut grid) = grid_64(32);
        assert!(!grid.chunk(0).has_texture[1]);
        surface.set_weight(1, 8, 8, 200);
        grid.texture_changed(&surface, &CellRect::cell(8, 8));
        assert!(grid.chunk(0).has_texture[1]);
        assert!(!grid.chunk(1).has_texture[1]);
        // A lone splat of another texture is a transition: roughness rises.
        assert!(grid.chunk(0).texture_roughness > grid.chunk(1).texture_roughness);
    }

    #[test]
    fn test_sight_changes_clear_unexplored() {
        let surface = HeightmapSurface::flat(GridSize::new(64, 64), 1);
        let mut grid = ChunkGrid::build(&surface, &NoSight, 32).expect("build");
        assert!(grid.chunks().iter().all(|c| c.unexplored));

        grid.sight_changed(&FullSight, &CellRect::new(0, 0, 5, 5));
        assert!(!grid.chunk(0).unexplored);
        assert!(grid.chunk(3).unexplored);
    }

    #[test]
    fn test_out_of_bounds_edit_rect_is_clamped() {
        let (surface, mut grid) = grid_64(32);
        // Far outside the map: clamps to the border chunks, no panic.
        grid.height_changed(&surface, &CellRect::new(-100, -100, 200, 200));
        grid.texture_changed(&surface, &CellRect::new(900, 900, 901, 901));
    }

    #[test]
    fn test_zero_sized_terrain_is_rejected() {
        let surface = HeightmapSurface::flat(GridSize::new(0, 0), 1);
        assert!(ChunkGrid::build(&surface, &FullSight, 32).is_err());
    }
}
