//! CPU and GPU mirrors of the terrain corner grid.
//!
//! The cache keeps a full copy of the corner positions, normals, and
//! per-layer blend weights, plus optional device buffers mirroring them.
//! Edits update the CPU copy synchronously and accumulate dirty
//! rectangles; [`GeometryCache::upload`] then pushes only the dirty row
//! spans to the GPU, so editor painting stays interactive on large maps.
//!
//! Weights are stored layer-major, four bytes per corner: an opaque white
//! color with the blend weight in the alpha channel, ready for use as a
//! per-vertex blend mask.

use std::ops::Range;

use tracing::debug;
use veldt_common::{CellRect, GridSize, GroundError, GroundResult};

use crate::renderer::GraphicsContext;
use crate::surface::TerrainSource;

/// Bytes per corner in the weight buffer (RGBA8).
pub const WEIGHT_STRIDE: usize = 4;
/// Bytes per corner in the vertex and normal buffers.
pub const VERTEX_STRIDE: usize = std::mem::size_of::<[f32; 3]>();

#[derive(Debug, Default)]
struct DirtyState {
    vertices: Option<CellRect>,
    normals: Option<CellRect>,
    weights: Option<CellRect>,
}

impl DirtyState {
    fn mark(slot: &mut Option<CellRect>, rect: CellRect) {
        *slot = Some(match slot {
            Some(prev) => prev.union(&rect),
            None => rect,
        });
    }
}

/// Device-side buffers, present only while a [`GraphicsContext`] has seen
/// the cache.
#[derive(Debug)]
struct GpuBuffers {
    vertices: wgpu::Buffer,
    normals: wgpu::Buffer,
    weights: wgpu::Buffer,
}

/// Mirror of a bound terrain's geometry, consistent with the surface
/// within the frame of an edit notification.
#[derive(Debug)]
pub struct GeometryCache {
    size: GridSize,
    layers: usize,
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    weights: Vec<u8>,
    /// Corners with a nonzero blend weight, per layer.
    nonzero_weights: Vec<usize>,
    dirty: DirtyState,
    gpu: Option<GpuBuffers>,
}

impl GeometryCache {
    /// Builds a fully populated cache for the given surface.
    ///
    /// # Errors
    ///
    /// Returns [`GroundError::InvalidSize`] for an empty terrain.
    pub fn bind<S>(surface: &S) -> GroundResult<Self>
    where
        S: TerrainSource + ?Sized,
    {
        let size = surface.size();
        if size.is_empty() {
            return Err(GroundError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }
        let layers = surface.texture_count() as usize;
        let corners = size.corner_count();

        let mut cache = Self {
            size,
            layers,
            positions: vec![[0.0; 3]; corners],
            normals: vec![[0.0; 3]; corners],
            weights: vec![0; corners * WEIGHT_STRIDE * layers],
            nonzero_weights: vec![0; layers],
            dirty: DirtyState::default(),
            gpu: None,
        };
        let full = CellRect::full(size);
        cache.refresh_geometry(surface, full);
        cache.refresh_weights(surface, full);
        debug!(
            width = size.width,
            height = size.height,
            layers, "bound terrain geometry cache"
        );
        Ok(cache)
    }

    /// The terrain size the cache was built for.
    #[must_use]
    pub fn size(&self) -> GridSize {
        self.size
    }

    /// Number of texture layers mirrored.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers
    }

    /// Checks that the surface still matches the cache shape.
    ///
    /// # Errors
    ///
    /// Returns [`GroundError::LayerCountMismatch`] when the surface's layer
    /// count no longer matches what the cache was built with.
    pub fn check_compatible<S>(&self, surface: &S) -> GroundResult<()>
    where
        S: TerrainSource + ?Sized,
    {
        if surface.texture_count() as usize != self.layers {
            return Err(GroundError::LayerCountMismatch {
                cached: self.layers as u32,
                terrain: surface.texture_count(),
            });
        }
        Ok(())
    }

    /// Applies a height edit: positions and normals in the rectangle
    /// expanded by one cell are refreshed from the surface, since normals
    /// depend on neighboring heights.
    ///
    /// Idempotent: reapplying the same rectangle costs work but cannot
    /// change the result.
    pub fn height_changed<S>(&mut self, surface: &S, rect: CellRect)
    where
        S: TerrainSource + ?Sized,
    {
        let rect = rect.expanded(1).clamped_to(self.size);
        self.refresh_geometry(surface, rect);
    }

    /// Applies a texture edit: the weight bytes of every layer in the
    /// rectangle are refreshed from the surface.
    pub fn texture_changed<S>(&mut self, surface: &S, rect: CellRect)
    where
        S: TerrainSource + ?Sized,
    {
        let rect = rect.clamped_to(self.size);
        self.refresh_weights(surface, rect);
    }

    /// Overrides the cached corner heights inside `rect` from a
    /// corner-indexed height slice, leaving normals alone.
    ///
    /// Used for edge-flattened height copies: only the z coordinate moves,
    /// and only the vertex buffer is re-uploaded.
    pub fn apply_height_overlay(&mut self, heights: &[f32], rect: CellRect) {
        let rect = rect.clamped_to(self.size);
        for (x, y) in rect.corners() {
            let index = self.size.corner_index(x as u32, y as u32);
            self.positions[index][2] = heights[index];
        }
        DirtyState::mark(&mut self.dirty.vertices, rect);
    }

    fn refresh_geometry<S>(&mut self, surface: &S, rect: CellRect)
    where
        S: TerrainSource + ?Sized,
    {
        for (x, y) in rect.corners() {
            let index = self.size.corner_index(x as u32, y as u32);
            self.positions[index] = surface.corner_position(x as u32, y as u32).to_array();
            self.normals[index] = surface.normal_at(x as u32, y as u32).to_array();
        }
        DirtyState::mark(&mut self.dirty.vertices, rect);
        DirtyState::mark(&mut self.dirty.normals, rect);
    }

    fn refresh_weights<S>(&mut self, surface: &S, rect: CellRect)
    where
        S: TerrainSource + ?Sized,
    {
        let corners = self.size.corner_count();
        for layer in 0..self.layers {
            let base = layer * corners * WEIGHT_STRIDE;
            for (x, y) in rect.corners() {
                let offset = base + self.size.corner_index(x as u32, y as u32) * WEIGHT_STRIDE;
                let weight = surface.texture_weight(layer as u32, x as u32, y as u32);
                let old = self.weights[offset + 3];
                if old != 0 && weight == 0 {
                    self.nonzero_weights[layer] -= 1;
                } else if old == 0 && weight != 0 {
                    self.nonzero_weights[layer] += 1;
                }
                self.weights[offset..offset + WEIGHT_STRIDE]
                    .copy_from_slice(&[255, 255, 255, weight]);
            }
        }
        DirtyState::mark(&mut self.dirty.weights, rect);
    }

    /// Whether any corner carries a nonzero blend weight for a layer.
    ///
    /// Layers that are nowhere painted contribute no visible pixels and
    /// can be skipped when batching draws.
    #[must_use]
    pub fn layer_in_use(&self, layer: usize) -> bool {
        self.nonzero_weights[layer] > 0
    }

    /// Byte offset of a layer's weight block in the weight buffer.
    #[must_use]
    pub fn weight_layer_offset(&self, layer: usize) -> u64 {
        (layer * self.size.corner_count() * WEIGHT_STRIDE) as u64
    }

    /// Cached position of a corner.
    #[must_use]
    pub fn position(&self, x: u32, y: u32) -> [f32; 3] {
        self.positions[self.size.corner_index(x, y)]
    }

    /// Cached normal of a corner.
    #[must_use]
    pub fn normal(&self, x: u32, y: u32) -> [f32; 3] {
        self.normals[self.size.corner_index(x, y)]
    }

    /// Cached RGBA weight bytes of a corner for one layer.
    #[must_use]
    pub fn weight(&self, layer: usize, x: u32, y: u32) -> [u8; 4] {
        let offset =
            self.weight_layer_offset(layer) as usize + self.size.corner_index(x, y) * WEIGHT_STRIDE;
        [
            self.weights[offset],
            self.weights[offset + 1],
            self.weights[offset + 2],
            self.weights[offset + 3],
        ]
    }

    /// Raw vertex bytes, for tests and debugging.
    #[must_use]
    pub fn vertex_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.positions)
    }

    /// The device-side vertex buffer, present after [`Self::upload`].
    #[must_use]
    pub fn vertex_buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu.as_ref().map(|g| &g.vertices)
    }

    /// The device-side normal buffer.
    #[must_use]
    pub fn normal_buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu.as_ref().map(|g| &g.normals)
    }

    /// The device-side weight buffer, all layers back to back.
    #[must_use]
    pub fn weight_buffer(&self) -> Option<&wgpu::Buffer> {
        self.gpu.as_ref().map(|g| &g.weights)
    }

    /// Pushes pending dirty spans to the GPU, allocating the device
    /// buffers on first use. After this returns, a draw in the same frame
    /// sees the edited data.
    pub fn upload(&mut self, ctx: &GraphicsContext) {
        if self.gpu.is_none() {
            let make = |label: &str, bytes: &[u8]| {
                let buffer = ctx.device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(label),
                    size: bytes.len() as u64,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                });
                ctx.queue.write_buffer(&buffer, 0, bytes);
                buffer
            };
            self.gpu = Some(GpuBuffers {
                vertices: make("terrain-vertices", bytemuck::cast_slice(&self.positions)),
                normals: make("terrain-normals", bytemuck::cast_slice(&self.normals)),
                weights: make("terrain-weights", &self.weights),
            });
            self.dirty = DirtyState::default();
            return;
        }

        let Some(gpu) = &self.gpu else { return };
        if let Some(rect) = self.dirty.vertices.take() {
            write_rows(
                ctx,
                &gpu.vertices,
                0,
                self.size,
                rect,
                VERTEX_STRIDE,
                bytemuck::cast_slice(&self.positions),
            );
        }
        if let Some(rect) = self.dirty.normals.take() {
            write_rows(
                ctx,
                &gpu.normals,
                0,
                self.size,
                rect,
                VERTEX_STRIDE,
                bytemuck::cast_slice(&self.normals),
            );
        }
        if let Some(rect) = self.dirty.weights.take() {
            for layer in 0..self.layers {
                write_rows(
                    ctx,
                    &gpu.weights,
                    self.weight_layer_offset(layer),
                    self.size,
                    rect,
                    WEIGHT_STRIDE,
                    &self.weights,
                );
            }
        }
    }

    /// Releases the device buffers; the CPU mirror stays valid and a later
    /// [`Self::upload`] re-creates the GPU state in full.
    pub fn release_gpu(&mut self) {
        self.gpu = None;
    }
}

/// Byte ranges of the contiguous row spans of a corner rectangle, offset
/// by `base`. The CPU mirror and the device buffer share one layout, so
/// each range doubles as the source slice and the destination offset.
fn rect_row_ranges(base: u64, size: GridSize, rect: CellRect, stride: usize) -> Vec<Range<usize>> {
    let x0 = rect.left as usize;
    let span = (rect.right - rect.left + 2) as usize * stride;
    (rect.top..=(rect.bottom + 1))
        .map(|y| {
            let start =
                base as usize + (y as usize * size.corner_width() as usize + x0) * stride;
            start..start + span
        })
        .collect()
}

/// Writes the contiguous row spans of a corner rectangle into a device
/// buffer, starting at `base` with `stride` bytes per corner. `bytes` is
/// the whole backing store, not a single layer's block.
fn write_rows(
    ctx: &GraphicsContext,
    buffer: &wgpu::Buffer,
    base: u64,
    size: GridSize,
    rect: CellRect,
    stride: usize,
    bytes: &[u8],
) {
    for range in rect_row_ranges(base, size, rect, stride) {
        ctx.queue
            .write_buffer(buffer, range.start as u64, &bytes[range]);
    }
}
