//! Per-frame visible-region generation.
//!
//! Both spatial index variants produce the same thing: an ordered list of
//! [`RenderRegion`]s whose union exactly tiles the visible terrain, each
//! with the step size it should be rendered at. The quadtree variant walks
//! the tree depth-first and merges far-away nodes into single quads; the
//! chunk variant tests every chunk and picks a discrete LOD step from its
//! roughness and distance.

use glam::Vec3;
use veldt_common::CellRect;

use crate::chunks::{ChunkGrid, NEIGHBOR_BOTTOM, NEIGHBOR_LEFT, NEIGHBOR_RIGHT, NEIGHBOR_TOP};
use crate::frustum::{Containment, Frustum};
use crate::lod::{choose_chunk_lod, chunk_error, lod_step, render_as_single_quad};
use crate::quadtree::{CellTree, NO_NODE};
use crate::surface::TerrainSource;

/// A rectangle of cells scheduled for drawing at a chosen resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRegion {
    /// The cells covered, inclusive.
    pub rect: CellRect,
    /// Step size in cells: how many base cells one rendered quad spans.
    pub step: u32,
}

/// Visibility culler over an arena quadtree.
///
/// The recursive walk is pre-order and depth-first; each call returns a
/// freshly built region list which the caller concatenates, so the walk
/// holds no scratch state and the culler stays reentrant.
#[derive(Debug, Clone)]
pub struct QuadtreeCuller {
    tree: CellTree,
}

impl QuadtreeCuller {
    /// Builds the culler (and its tree) for the given terrain.
    #[must_use]
    pub fn new<S>(surface: &S) -> Self
    where
        S: TerrainSource + ?Sized,
    {
        Self {
            tree: CellTree::build(surface.size()),
        }
    }

    /// The underlying tree.
    #[must_use]
    pub fn tree(&self) -> &CellTree {
        &self.tree
    }

    /// Generates the ordered list of visible regions for one frame.
    ///
    /// A frustum entirely outside the terrain yields an empty list; that is
    /// a valid frame, not an error.
    #[must_use]
    pub fn generate_regions<S>(&self, surface: &S, frustum: &Frustum) -> Vec<RenderRegion>
    where
        S: TerrainSource + ?Sized,
    {
        match self.tree.root() {
            Some(root) => self.visit(surface, frustum, root),
            None => Vec::new(),
        }
    }

    /// Recursive visibility walk: prune invisible nodes, emit fully visible
    /// ones through the LOD policy, recurse into partially visible ones.
    fn visit<S>(&self, surface: &S, frustum: &Frustum, index: u32) -> Vec<RenderRegion>
    where
        S: TerrainSource + ?Sized,
    {
        let node = self.tree.node(index);
        match self.classify(surface, frustum, index) {
            Containment::Outside => Vec::new(),
            Containment::Inside => {
                let mut out = Vec::new();
                self.emit(surface, frustum, index, &mut out);
                out
            }
            Containment::Partial => {
                if self.stop_split(surface, frustum, index) {
                    let mut out = Vec::new();
                    self.emit(surface, frustum, index, &mut out);
                    out
                } else {
                    let mut out = Vec::new();
                    for &child in &node.children {
                        if child != NO_NODE {
                            out.extend(self.visit(surface, frustum, child));
                        }
                    }
                    out
                }
            }
        }
    }

    /// Emits a visible node: as one region if the LOD policy allows, else
    /// split into its children.
    fn emit<S>(&self, surface: &S, frustum: &Frustum, index: u32, out: &mut Vec<RenderRegion>)
    where
        S: TerrainSource + ?Sized,
    {
        let node = self.tree.node(index);
        if node.is_leaf() || self.stop_split(surface, frustum, index) {
            let rect = node.rect;
            out.push(RenderRegion {
                rect,
                step: rect.width().max(rect.height()) as u32,
            });
            return;
        }
        for &child in &node.children {
            if child != NO_NODE {
                self.emit(surface, frustum, child, out);
            }
        }
    }

    /// Classifies a node's bounding sphere against the frustum.
    ///
    /// Regions of four cells or fewer are always treated as fully visible:
    /// there is no further splitting benefit below that.
    fn classify<S>(&self, surface: &S, frustum: &Frustum, index: u32) -> Containment
    where
        S: TerrainSource + ?Sized,
    {
        let node = self.tree.node(index);
        if node.cell_count() <= 4 {
            return Containment::Inside;
        }
        let (center, radius) = self.bounding_sphere(surface, index);
        frustum.classify_sphere(center, radius)
    }

    /// Bounding sphere from the four corner heights: center at the average
    /// height, radius the largest corner-to-center distance.
    fn bounding_sphere<S>(&self, surface: &S, index: u32) -> (Vec3, f32)
    where
        S: TerrainSource + ?Sized,
    {
        let rect = self.tree.node(index).rect;
        let (x0, y0) = (rect.left as u32, rect.top as u32);
        let (x1, y1) = ((rect.right + 1) as u32, (rect.bottom + 1) as u32);

        let corners = [
            surface.corner_position(x0, y0),
            surface.corner_position(x1, y0),
            surface.corner_position(x0, y1),
            surface.corner_position(x1, y1),
        ];
        let z = corners.iter().map(|c| c.z).sum::<f32>() / 4.0;
        let center = Vec3::new(
            (x0 as f32 + x1 as f32) / 2.0,
            -((y0 as f32 + y1 as f32) / 2.0),
            z,
        );
        let radius = corners
            .iter()
            .map(|c| center.distance_squared(*c))
            .fold(0.0f32, f32::max)
            .sqrt();
        (center, radius)
    }

    /// LOD policy: whether this node should render as a single quad.
    ///
    /// The distance is the largest near-plane distance of the four region
    /// corners.
    fn stop_split<S>(&self, surface: &S, frustum: &Frustum, index: u32) -> bool
    where
        S: TerrainSource + ?Sized,
    {
        let node = self.tree.node(index);
        if node.cell_count() == 1 {
            return true;
        }
        let rect = node.rect;
        let (x0, y0) = (rect.left as u32, rect.top as u32);
        let (x1, y1) = ((rect.right + 1) as u32, (rect.bottom + 1) as u32);
        let distance = [
            surface.corner_position(x0, y0),
            surface.corner_position(x1, y0),
            surface.corner_position(x0, y1),
            surface.corner_position(x1, y1),
        ]
        .into_iter()
        .map(|corner| frustum.near_distance(corner))
        .fold(f32::MIN, f32::max);
        render_as_single_quad(node.cell_count(), distance)
    }
}

/// Per-frame visibility result for a [`ChunkGrid`].
///
/// Kept separate from the grid so a frame never mutates shared chunk state.
#[derive(Debug, Clone)]
pub struct ChunkVisibility {
    /// Whether each chunk is rendered this frame.
    pub visible: Vec<bool>,
    /// Chosen LOD level per chunk (valid only where visible).
    pub lod: Vec<u32>,
    /// Clipped render span per chunk in corner-line coordinates
    /// `[x0, y0, x1, y1]`; sides facing a strictly coarser visible
    /// neighbor are inset by one step and later covered by glue strips.
    pub render_span: Vec<[u32; 4]>,
    /// Smallest distance metric among visible chunks.
    pub min_distance: f32,
    /// Largest distance metric among visible chunks.
    pub max_distance: f32,
}

impl ChunkVisibility {
    /// Number of visible chunks.
    #[must_use]
    pub fn visible_count(&self) -> usize {
        self.visible.iter().filter(|v| **v).count()
    }
}

/// Runs the chunk-grid visibility and LOD pass for one frame.
#[must_use]
pub fn cull_chunks(grid: &ChunkGrid, frustum: &Frustum) -> ChunkVisibility {
    let count = grid.len();
    let mut vis = ChunkVisibility {
        visible: vec![false; count],
        lod: vec![0; count],
        render_span: vec![[0; 4]; count],
        min_distance: f32::MAX,
        max_distance: f32::MIN,
    };

    // First pass: frustum tests and LOD choice.
    for (index, chunk) in grid.chunks().iter().enumerate() {
        if chunk.unexplored {
            continue;
        }
        let Some(distance) = frustum.sphere_distance(chunk.center, chunk.radius) else {
            continue;
        };
        let (x0, y0, x1, y1) = chunk.corner_span();
        let aabb_min = Vec3::new(x0 as f32, -(y1 as f32), chunk.min_height);
        let aabb_max = Vec3::new(x1 as f32, -(y0 as f32), chunk.max_height);
        if !frustum.intersects_aabb(aabb_min, aabb_max) {
            continue;
        }

        vis.visible[index] = true;
        let error = chunk_error(
            chunk.roughness,
            chunk.texture_roughness,
            distance,
            chunk.radius,
        );
        vis.lod[index] = choose_chunk_lod(error);
        vis.min_distance = vis.min_distance.min(distance);
        vis.max_distance = vis.max_distance.max(distance);
    }

    // Second pass: clip the render span of every side that faces a
    // strictly coarser visible neighbor; the gap is bridged by the
    // stitcher.
    for (index, chunk) in grid.chunks().iter().enumerate() {
        if !vis.visible[index] {
            continue;
        }
        let step = lod_step(vis.lod[index]);
        let (x0, y0, x1, y1) = chunk.corner_span();
        let mut span = [x0, y0, x1, y1];

        let coarser = |slot: usize| -> bool {
            chunk.neighbors[slot].is_some_and(|n| {
                let n = n as usize;
                vis.visible[n] && vis.lod[n] > vis.lod[index]
            })
        };
        // Edge chunks of a non-multiple map can be narrower than a step;
        // the inset clamps so the span never inverts. A collapsed span
        // leaves the chunk covered by its glue strips alone.
        if coarser(NEIGHBOR_LEFT) {
            span[0] = (span[0] + step).min(span[2]);
        }
        if coarser(NEIGHBOR_TOP) {
            span[1] = (span[1] + step).min(span[3]);
        }
        if coarser(NEIGHBOR_RIGHT) {
            span[2] = span[2].saturating_sub(step).max(span[0]);
        }
        if coarser(NEIGHBOR_BOTTOM) {
            span[3] = span[3].saturating_sub(step).max(span[1]);
        }
        vis.render_span[index] = span;
    }

    vis
}

/// Ordered region list for the chunk variant, for statistics and debugging.
#[must_use]
pub fn chunk_regions(grid: &ChunkGrid, vis: &ChunkVisibility) -> Vec<RenderRegion> {
    grid.chunks()
        .iter()
        .enumerate()
        .filter(|(index, _)| vis.visible[*index])
        .map(|(index, chunk)| RenderRegion {
            rect: chunk.rect,
            step: lod_step(vis.lod[index]),
        })
        .collect()
}
