//! Per-frame orchestration of the ground pass.
//!
//! [`GroundRenderer`] owns the spatial index, the geometry cache and the
//! fog overlay for one bound terrain, and walks the frame state machine
//! `Idle -> CacheRefresh -> Cull -> Stitch -> Draw -> Idle`:
//! queued edit rectangles are applied first, then the visible region list
//! is generated for the camera frustum, then interior and bridge indices
//! are assembled and uploaded, and finally [`GroundRenderer::draw`] replays
//! the prepared batches into a render pass, one per texture layer.
//!
//! Terrain edits arrive between frames and only queue dirty rectangles;
//! nothing touches the caches until the next `CacheRefresh`. A renderer
//! without a bound terrain culls to an empty list and draws nothing, which
//! is a valid frame rather than an error.

use std::ops::Range;

use bitflags::bitflags;
use glam::{Mat4, Vec3};
use tracing::{debug, trace};
use veldt_common::{CellRect, GridSize, GroundResult};
use wgpu::util::DeviceExt;

use crate::chunks::{ChunkGrid, DEFAULT_CHUNK_SIZE};
use crate::cull::{chunk_regions, cull_chunks, QuadtreeCuller, RenderRegion};
use crate::fog::FogOverlay;
use crate::frustum::Frustum;
use crate::geometry::GeometryCache;
use crate::pipeline::GroundPipelines;
use crate::stitch::{chunk_mesh_indices, flatten_region_edges, flattened_bounds, span_indices};
use crate::surface::{SightSource, TerrainSource};

/// The GPU handles the renderer draws with. Explicit rather than ambient:
/// all device and queue access flows through this object, passed by
/// reference.
#[derive(Debug)]
pub struct GraphicsContext {
    /// Device used for resource creation.
    pub device: wgpu::Device,
    /// Queue used for uploads.
    pub queue: wgpu::Queue,
    /// Format of the color target the ground pass renders into.
    pub surface_format: wgpu::TextureFormat,
}

/// Which culling and LOD strategy the renderer uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererKind {
    /// Quadtree walk merging far regions into single quads.
    QuadtreeAdaptive,
    /// Fixed chunk tiling with a discrete per-chunk LOD ladder.
    FixedChunkGrid,
    /// Chunk tiling drawn with the position-only pipeline, for shadow and
    /// early-depth passes.
    DepthOnlyFast,
}

bitflags! {
    /// Per-draw options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RenderFlags: u32 {
        /// Render depth only: no normals, weights, textures or fog.
        const DEPTH_ONLY = 1;
        /// Skip fog compositing for this frame.
        const NO_FOG = 1 << 1;
    }
}

/// Camera state for one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameCamera {
    /// The culling frustum.
    pub frustum: Frustum,
    /// Combined view-projection matrix, also the source of the frustum.
    pub view_proj: Mat4,
    /// Viewport rectangle `(x, y, width, height)` in pixels.
    pub viewport: [u32; 4],
}

impl FrameCamera {
    /// Builds the camera state from a view-projection matrix.
    #[must_use]
    pub fn from_view_proj(view_proj: Mat4, viewport: [u32; 4]) -> Self {
        Self {
            frustum: Frustum::from_view_proj(view_proj),
            view_proj,
            viewport,
        }
    }
}

/// Counters from the most recent prepared frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    /// Interior quads emitted across all texture layer passes.
    pub rendered_quads: u32,
    /// Texture layers that produced at least one draw.
    pub used_texture_layers: u32,
    /// Smallest distance metric among visible regions.
    pub min_distance: f32,
    /// Largest distance metric among visible regions.
    pub max_distance: f32,
}

/// Frame state machine position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePhase {
    Idle,
    CacheRefresh,
    Cull,
    Stitch,
    Draw,
}

/// Edit rectangles queued since the last frame.
#[derive(Debug, Default)]
struct PendingEdits {
    height: Option<CellRect>,
    texture: Option<CellRect>,
    fog: Option<CellRect>,
    explored: Option<CellRect>,
}

impl PendingEdits {
    fn queue(slot: &mut Option<CellRect>, rect: CellRect) {
        *slot = Some(match slot {
            Some(prev) => prev.union(&rect),
            None => rect,
        });
    }
}

/// Per-terrain state, rebuilt whenever a terrain is bound.
#[derive(Debug)]
struct Binding {
    size: GridSize,
    cache: GeometryCache,
    fog: FogOverlay,
    tree: Option<QuadtreeCuller>,
    chunks: Option<ChunkGrid>,
    /// Corner heights for edge flattening (quadtree variant only).
    heights: Vec<f32>,
    /// Borders flattened by the previous frame, to restore before
    /// re-flattening for the new region list.
    prev_flattened: Option<CellRect>,
}

/// One layer's draw batch within a prepared frame.
struct LayerBatch {
    layer: usize,
    range: Range<u32>,
    bind_group: wgpu::BindGroup,
}

/// Index data and bind groups assembled by
/// [`GroundRenderer::prepare_frame`], consumed by
/// [`GroundRenderer::draw`].
pub struct FrameDraw {
    index_buffer: Option<wgpu::Buffer>,
    /// Segment covering all visible geometry, for depth-only draws.
    depth_range: Range<u32>,
    depth_bind_group: Option<wgpu::BindGroup>,
    batches: Vec<LayerBatch>,
    viewport: [u32; 4],
}

impl FrameDraw {
    fn empty() -> Self {
        Self {
            index_buffer: None,
            depth_range: 0..0,
            depth_bind_group: None,
            batches: Vec::new(),
            viewport: [0; 4],
        }
    }

    /// Whether the frame draws nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index_buffer.is_none()
    }
}

/// The ground rendering orchestrator.
#[derive(Debug)]
pub struct GroundRenderer {
    kind: RendererKind,
    chunk_size: u32,
    bound: Option<Binding>,
    pipelines: Option<GroundPipelines>,
    layer_views: Vec<Option<wgpu::TextureView>>,
    pending: PendingEdits,
    phase: FramePhase,
    stats: Statistics,
}

impl GroundRenderer {
    /// Creates a renderer of the given kind with the default chunk size.
    #[must_use]
    pub fn new(kind: RendererKind) -> Self {
        Self::with_chunk_size(kind, DEFAULT_CHUNK_SIZE)
    }

    /// Creates a renderer with a custom chunk size (chunk variants only).
    #[must_use]
    pub fn with_chunk_size(kind: RendererKind, chunk_size: u32) -> Self {
        Self {
            kind,
            chunk_size,
            bound: None,
            pipelines: None,
            layer_views: Vec::new(),
            pending: PendingEdits::default(),
            phase: FramePhase::Idle,
            stats: Statistics::default(),
        }
    }

    /// The strategy this renderer was built with.
    #[must_use]
    pub fn kind(&self) -> RendererKind {
        self.kind
    }

    /// Whether a terrain is currently bound.
    #[must_use]
    pub fn has_terrain(&self) -> bool {
        self.bound.is_some()
    }

    /// Counters from the most recently prepared frame.
    #[must_use]
    pub fn statistics(&self) -> Statistics {
        self.stats
    }

    /// The geometry cache of the bound terrain, for tests and debugging.
    #[must_use]
    pub fn geometry_cache(&self) -> Option<&GeometryCache> {
        self.bound.as_ref().map(|b| &b.cache)
    }

    /// Binds a terrain: builds the spatial index, the geometry cache and
    /// the fog overlay. Any previously bound terrain is dropped first.
    ///
    /// # Errors
    ///
    /// Fails on an empty terrain; nothing is left half-bound.
    pub fn bind_terrain<S, V>(&mut self, surface: &S, sight: &V) -> GroundResult<()>
    where
        S: TerrainSource + ?Sized,
        V: SightSource + ?Sized,
    {
        let size = surface.size();
        let cache = GeometryCache::bind(surface)?;
        let mut fog = FogOverlay::new(size)?;
        fog.explored_changed(sight, &CellRect::full(size));

        let (tree, chunks, heights) = match self.kind {
            RendererKind::QuadtreeAdaptive => {
                let heights = (0..size.corner_count())
                    .map(|i| {
                        let x = (i % size.corner_width() as usize) as u32;
                        let y = (i / size.corner_width() as usize) as u32;
                        surface.height_at(x, y)
                    })
                    .collect();
                (Some(QuadtreeCuller::new(surface)), None, heights)
            }
            RendererKind::FixedChunkGrid | RendererKind::DepthOnlyFast => {
                let grid = ChunkGrid::build(surface, sight, self.chunk_size)?;
                (None, Some(grid), Vec::new())
            }
        };

        debug!(
            width = size.width,
            height = size.height,
            kind = ?self.kind,
            "bound terrain"
        );
        self.bound = Some(Binding {
            size,
            cache,
            fog,
            tree,
            chunks,
            heights,
            prev_flattened: None,
        });
        self.pending = PendingEdits::default();
        self.phase = FramePhase::Idle;
        Ok(())
    }

    /// Releases the bound terrain and all its GPU resources.
    pub fn unbind_terrain(&mut self) {
        self.bound = None;
        self.pending = PendingEdits::default();
        self.phase = FramePhase::Idle;
    }

    /// Sets or clears the texture view drawn for a layer. A missing view
    /// falls back to a solid color, never to a frame abort.
    pub fn set_layer_texture(&mut self, layer: usize, view: Option<wgpu::TextureView>) {
        if self.layer_views.len() <= layer {
            self.layer_views.resize_with(layer + 1, || None);
        }
        self.layer_views[layer] = view;
    }

    /// Queues a height edit; applied at the next frame's cache refresh.
    pub fn cell_height_changed(&mut self, rect: CellRect) {
        PendingEdits::queue(&mut self.pending.height, rect);
    }

    /// Queues a texture weight edit.
    pub fn cell_texture_changed(&mut self, rect: CellRect) {
        PendingEdits::queue(&mut self.pending.texture, rect);
    }

    /// Queues an in-sight fog change.
    pub fn cell_fog_changed(&mut self, rect: CellRect) {
        PendingEdits::queue(&mut self.pending.fog, rect);
    }

    /// Queues an exploration change.
    pub fn cell_explored_changed(&mut self, rect: CellRect) {
        PendingEdits::queue(&mut self.pending.explored, rect);
    }

    /// Applies all queued edit rectangles to the caches. Runs as the
    /// `CacheRefresh` phase of [`Self::prepare_frame`].
    pub fn apply_pending_edits<S, V>(&mut self, surface: &S, sight: &V)
    where
        S: TerrainSource + ?Sized,
        V: SightSource + ?Sized,
    {
        let Some(binding) = self.bound.as_mut() else {
            self.pending = PendingEdits::default();
            return;
        };
        if let Some(rect) = self.pending.height.take() {
            binding.cache.height_changed(surface, rect);
            if let Some(chunks) = binding.chunks.as_mut() {
                chunks.height_changed(surface, &rect);
            }
            if binding.tree.is_some() {
                let clamped = rect.expanded(1).clamped_to(binding.size);
                for (x, y) in clamped.corners() {
                    let index = binding.size.corner_index(x as u32, y as u32);
                    binding.heights[index] = surface.height_at(x as u32, y as u32);
                }
            }
        }
        if let Some(rect) = self.pending.texture.take() {
            binding.cache.texture_changed(surface, rect);
            if let Some(chunks) = binding.chunks.as_mut() {
                chunks.texture_changed(surface, &rect);
            }
        }
        if let Some(rect) = self.pending.fog.take() {
            binding.fog.explored_changed(sight, &rect);
        }
        if let Some(rect) = self.pending.explored.take() {
            binding.fog.explored_changed(sight, &rect);
            if let Some(chunks) = binding.chunks.as_mut() {
                chunks.sight_changed(sight, &rect);
            }
        }
    }

    /// Generates the ordered visible region list for a frustum, without
    /// touching GPU state. Exposed for statistics and debugging; an
    /// unbound terrain yields an empty list.
    #[must_use]
    pub fn generate_visible_regions<S>(&self, surface: &S, frustum: &Frustum) -> Vec<RenderRegion>
    where
        S: TerrainSource + ?Sized,
    {
        let Some(binding) = self.bound.as_ref() else {
            return Vec::new();
        };
        if let Some(tree) = binding.tree.as_ref() {
            return tree.generate_regions(surface, frustum);
        }
        if let Some(chunks) = binding.chunks.as_ref() {
            let vis = cull_chunks(chunks, frustum);
            return chunk_regions(chunks, &vis);
        }
        Vec::new()
    }

    /// Runs `CacheRefresh`, `Cull` and `Stitch` for one frame and uploads
    /// everything the draw needs.
    ///
    /// # Errors
    ///
    /// Fails when the surface's texture layer count no longer matches the
    /// bound cache. An unbound terrain is not an error: the returned frame
    /// is empty and [`Self::draw`] becomes a no-op.
    pub fn prepare_frame<S, V>(
        &mut self,
        ctx: &GraphicsContext,
        surface: &S,
        sight: &V,
        camera: &FrameCamera,
        flags: RenderFlags,
    ) -> GroundResult<FrameDraw>
    where
        S: TerrainSource + ?Sized,
        V: SightSource + ?Sized,
    {
        if self.bound.is_none() {
            self.stats = Statistics::default();
            return Ok(FrameDraw::empty());
        }
        if let Some(binding) = self.bound.as_ref() {
            binding.cache.check_compatible(surface)?;
        }

        self.phase = FramePhase::CacheRefresh;
        self.apply_pending_edits(surface, sight);

        self.phase = FramePhase::Cull;
        let mut stats = Statistics::default();
        let mut indices: Vec<u32> = Vec::new();
        let mut layer_ranges: Vec<(usize, Range<u32>)> = Vec::new();
        let depth_range;

        let binding = self
            .bound
            .as_mut()
            .ok_or(veldt_common::GroundError::NoTerrain)?;
        let layers = binding.cache.layer_count();

        if let Some(chunks) = binding.chunks.as_ref() {
            let vis = cull_chunks(chunks, &camera.frustum);
            if vis.visible_count() > 0 {
                stats.min_distance = vis.min_distance;
                stats.max_distance = vis.max_distance;
            }

            self.phase = FramePhase::Stitch;
            // Coverage segment for depth-only draws.
            for index in 0..chunks.len() {
                if vis.visible[index] {
                    chunk_mesh_indices(chunks, &vis, index, &mut indices);
                }
            }
            depth_range = 0..indices.len() as u32;

            // One segment per texture layer over the chunks that use it.
            for layer in 0..layers {
                let start = indices.len() as u32;
                for index in 0..chunks.len() {
                    if vis.visible[index] && chunks.chunk(index).has_texture[layer] {
                        stats.rendered_quads +=
                            chunk_mesh_indices(chunks, &vis, index, &mut indices);
                    }
                }
                let end = indices.len() as u32;
                if end > start {
                    stats.used_texture_layers += 1;
                    layer_ranges.push((layer, start..end));
                }
            }
        } else {
            let regions = match binding.tree.as_ref() {
                Some(tree) => tree.generate_regions(surface, &camera.frustum),
                None => Vec::new(),
            };
            let mut min_d = f32::MAX;
            let mut max_d = f32::MIN;
            for region in &regions {
                let d = region_distance(surface, &camera.frustum, region);
                min_d = min_d.min(d);
                max_d = max_d.max(d);
            }
            if !regions.is_empty() {
                stats.min_distance = min_d;
                stats.max_distance = max_d;
            }

            self.phase = FramePhase::Stitch;
            let corner_width = binding.size.corner_width();
            for region in &regions {
                let rect = region.rect;
                let span = [
                    rect.left as u32,
                    rect.top as u32,
                    (rect.right + 1) as u32,
                    (rect.bottom + 1) as u32,
                ];
                stats.rendered_quads += span_indices(corner_width, span, region.step, &mut indices);
            }
            depth_range = 0..indices.len() as u32;
            if !indices.is_empty() {
                // Unpainted layers draw nothing and are skipped outright.
                for layer in 0..layers {
                    if binding.cache.layer_in_use(layer) {
                        stats.used_texture_layers += 1;
                        layer_ranges.push((layer, depth_range.clone()));
                    }
                }
            }

            // Coarse region edges render as straight lines; snap the
            // heights of finer neighbors on those borders so they line up.
            let bounds = flattened_bounds(binding.size, &regions);
            let restore = match (binding.prev_flattened, bounds) {
                (Some(a), Some(b)) => Some(a.union(&b)),
                (a, b) => a.or(b),
            };
            if let Some(rect) = restore {
                for (x, y) in rect.corners() {
                    let index = binding.size.corner_index(x as u32, y as u32);
                    binding.heights[index] = surface.height_at(x as u32, y as u32);
                }
                flatten_region_edges(surface, &regions, &mut binding.heights);
                binding.cache.apply_height_overlay(&binding.heights, rect);
            }
            binding.prev_flattened = bounds;
        }

        trace!(
            quads = stats.rendered_quads,
            layers = stats.used_texture_layers,
            "prepared frame"
        );

        // Uploads and bind groups.
        binding.cache.upload(ctx);
        let depth_only = flags.contains(RenderFlags::DEPTH_ONLY);
        if !depth_only {
            binding.fog.update(ctx);
        }

        let pipelines = self
            .pipelines
            .get_or_insert_with(|| GroundPipelines::new(&ctx.device, ctx.surface_format));
        pipelines.set_camera(&ctx.queue, camera.view_proj);
        pipelines.set_fog(
            &ctx.queue,
            binding.fog.texture_size(),
            !depth_only && !flags.contains(RenderFlags::NO_FOG),
        );

        let frame = if indices.is_empty() {
            FrameDraw::empty()
        } else {
            let index_buffer = ctx
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("ground-indices"),
                    contents: bytemuck::cast_slice(&indices),
                    usage: wgpu::BufferUsages::INDEX,
                });
            let fog_view = binding.fog.view();
            let batches = layer_ranges
                .into_iter()
                .map(|(layer, range)| LayerBatch {
                    layer,
                    range,
                    bind_group: pipelines.layer_bind_group(
                        &ctx.device,
                        self.layer_views.get(layer).and_then(Option::as_ref),
                        fog_view,
                    ),
                })
                .collect();
            FrameDraw {
                index_buffer: Some(index_buffer),
                depth_range,
                depth_bind_group: Some(pipelines.layer_bind_group(&ctx.device, None, fog_view)),
                batches,
                viewport: camera.viewport,
            }
        };

        self.stats = stats;
        self.phase = FramePhase::Draw;
        Ok(frame)
    }

    /// Replays a prepared frame into a render pass. A no-op for an empty
    /// frame; the pass is left untouched in that case.
    pub fn draw<'a>(
        &'a self,
        frame: &'a FrameDraw,
        pass: &mut wgpu::RenderPass<'a>,
        flags: RenderFlags,
    ) {
        let (Some(binding), Some(pipelines)) = (self.bound.as_ref(), self.pipelines.as_ref())
        else {
            return;
        };
        let Some(index_buffer) = frame.index_buffer.as_ref() else {
            return;
        };
        let (Some(vertices), Some(normals), Some(weights)) = (
            binding.cache.vertex_buffer(),
            binding.cache.normal_buffer(),
            binding.cache.weight_buffer(),
        ) else {
            return;
        };

        if frame.viewport[2] > 0 && frame.viewport[3] > 0 {
            pass.set_viewport(
                frame.viewport[0] as f32,
                frame.viewport[1] as f32,
                frame.viewport[2] as f32,
                frame.viewport[3] as f32,
                0.0,
                1.0,
            );
        }
        pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.set_vertex_buffer(0, vertices.slice(..));

        if flags.contains(RenderFlags::DEPTH_ONLY) || self.kind == RendererKind::DepthOnlyFast {
            let Some(bind_group) = frame.depth_bind_group.as_ref() else {
                return;
            };
            pass.set_pipeline(pipelines.depth_only());
            pass.set_bind_group(0, bind_group, &[]);
            pass.draw_indexed(frame.depth_range.clone(), 0, 0..1);
            return;
        }

        pass.set_vertex_buffer(1, normals.slice(..));
        let layer_len =
            (binding.size.corner_count() * crate::geometry::WEIGHT_STRIDE) as wgpu::BufferAddress;
        for batch in &frame.batches {
            let offset = binding.cache.weight_layer_offset(batch.layer);
            pass.set_vertex_buffer(2, weights.slice(offset..offset + layer_len));
            pass.set_pipeline(if batch.layer == 0 {
                pipelines.opaque()
            } else {
                pipelines.blend()
            });
            pass.set_bind_group(0, &batch.bind_group, &[]);
            pass.draw_indexed(batch.range.clone(), 0, 0..1);
        }
    }

    /// Marks the frame finished and returns the state machine to idle.
    pub fn end_frame(&mut self) {
        self.phase = FramePhase::Idle;
    }
}

/// Distance metric of a quadtree region: the largest near-plane distance
/// of its four corners.
fn region_distance<S>(surface: &S, frustum: &Frustum, region: &RenderRegion) -> f32
where
    S: TerrainSource + ?Sized,
{
    let rect = region.rect;
    let (x0, y0) = (rect.left as u32, rect.top as u32);
    let (x1, y1) = ((rect.right + 1) as u32, (rect.bottom + 1) as u32);
    [
        surface.corner_position(x0, y0),
        surface.corner_position(x1, y0),
        surface.corner_position(x0, y1),
        surface.corner_position(x1, y1),
    ]
    .into_iter()
    .map(|corner: Vec3| frustum.near_distance(corner))
    .fold(f32::MIN, f32::max)
}
