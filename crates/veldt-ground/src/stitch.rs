//! Mesh assembly and crack-free stitching between LOD levels.
//!
//! All functions here emit triangle-list indices into the shared corner
//! grid, where corner `(x, y)` lives at index `y * (W + 1) + x`. Interior
//! geometry is a regular quad grid at the region's step; wherever a finer
//! region meets a strictly coarser visible neighbor, the fine side has
//! already pulled its border in by one step (see
//! [`crate::cull::ChunkVisibility::render_span`]) and a strip of bridging
//! triangles fans from each coarse edge vertex to the run of fine vertices
//! between two coarse vertices. The coarse edge vertices are authoritative,
//! so the strip is watertight from both sides.

use veldt_common::{CellRect, GridSize};

use crate::chunks::{ChunkGrid, NEIGHBOR_BOTTOM, NEIGHBOR_LEFT, NEIGHBOR_RIGHT, NEIGHBOR_TOP};
use crate::cull::{ChunkVisibility, RenderRegion};
use crate::lod::lod_step;
use crate::surface::TerrainSource;

/// Emits the interior quad grid of a render span at the given step.
///
/// `span` is `[x0, y0, x1, y1]` in corner-line coordinates (so a span one
/// cell wide has `x1 == x0 + 1`). Quads at the right and bottom span edges
/// shrink to whatever remains when the step does not divide the span.
/// Returns the number of quads emitted.
pub fn span_indices(corner_width: u32, span: [u32; 4], step: u32, out: &mut Vec<u32>) -> u32 {
    let [x0, y0, x1, y1] = span;
    if x0 >= x1 || y0 >= y1 {
        return 0;
    }
    let mut quads = 0;
    let mut y = y0;
    while y < y1 {
        let ystep = step.min(y1 - y);
        let mut x = x0;
        while x < x1 {
            let xstep = step.min(x1 - x);
            let tl = y * corner_width + x;
            let tr = y * corner_width + (x + xstep);
            let bl = (y + ystep) * corner_width + x;
            let br = (y + ystep) * corner_width + (x + xstep);
            out.extend_from_slice(&[tl, bl, tr, tr, bl, br]);
            quads += 1;
            x += xstep;
        }
        y += ystep;
    }
    quads
}

/// Bridges the left border of a finer region to its coarser left neighbor.
///
/// `full` is the region's unclipped corner span `[x0, y0, x1, y1]` and
/// `render` its clipped span; the fine vertex column is `render[0]`, the
/// coarse column the shared border `full[0]`. Where the top or bottom side
/// is also clipped, the fan starts and ends on the clipped rows and the
/// closing triangles reach the full-span corners, keeping shared corners
/// owned by the horizontal strips.
pub fn glue_left(
    corner_width: u32,
    full: [u32; 4],
    render: [u32; 4],
    fine_step: u32,
    coarse_step: u32,
    out: &mut Vec<u32>,
) {
    let fine_x = render[0];
    let coarse_x = full[0];
    let mut j0 = render[1];
    let mut j1 = render[1] + fine_step;

    let mut i = full[1];
    while i < full[3] {
        let next = (i + coarse_step).min(full[3]);
        let coarse = i * corner_width + coarse_x;
        while j0 < next && j0 < render[3] {
            j1 = j1.min(render[3]);
            out.extend_from_slice(&[
                coarse,
                j0 * corner_width + fine_x,
                j1 * corner_width + fine_x,
            ]);
            j0 = j1;
            j1 += fine_step;
        }
        out.extend_from_slice(&[
            coarse,
            j0 * corner_width + fine_x,
            next * corner_width + coarse_x,
        ]);
        i = next;
    }
}

/// Bridges the top border of a finer region to its coarser top neighbor.
pub fn glue_top(
    corner_width: u32,
    full: [u32; 4],
    render: [u32; 4],
    fine_step: u32,
    coarse_step: u32,
    out: &mut Vec<u32>,
) {
    let fine_y = render[1];
    let coarse_y = full[1];
    let mut j0 = render[0];
    let mut j1 = render[0] + fine_step;

    let mut i = full[0];
    while i < full[2] {
        let next = (i + coarse_step).min(full[2]);
        let coarse = coarse_y * corner_width + i;
        while j0 < next && j0 < render[2] {
            j1 = j1.min(render[2]);
            out.extend_from_slice(&[
                coarse,
                fine_y * corner_width + j0,
                fine_y * corner_width + j1,
            ]);
            j0 = j1;
            j1 += fine_step;
        }
        out.extend_from_slice(&[
            coarse,
            fine_y * corner_width + j0,
            coarse_y * corner_width + next,
        ]);
        i = next;
    }
}

/// Bridges the right border of a finer region to its coarser right neighbor.
pub fn glue_right(
    corner_width: u32,
    full: [u32; 4],
    render: [u32; 4],
    fine_step: u32,
    coarse_step: u32,
    out: &mut Vec<u32>,
) {
    let fine_x = render[2];
    let coarse_x = full[2];
    let mut j0 = render[1];
    let mut j1 = render[1] + fine_step;

    let mut i = full[1];
    while i < full[3] {
        let next = (i + coarse_step).min(full[3]);
        let coarse = i * corner_width + coarse_x;
        while j0 < next && j0 < render[3] {
            j1 = j1.min(render[3]);
            out.extend_from_slice(&[
                coarse,
                j0 * corner_width + fine_x,
                j1 * corner_width + fine_x,
            ]);
            j0 = j1;
            j1 += fine_step;
        }
        out.extend_from_slice(&[
            coarse,
            j0 * corner_width + fine_x,
            next * corner_width + coarse_x,
        ]);
        i = next;
    }
}

/// Bridges the bottom border of a finer region to its coarser bottom
/// neighbor.
pub fn glue_bottom(
    corner_width: u32,
    full: [u32; 4],
    render: [u32; 4],
    fine_step: u32,
    coarse_step: u32,
    out: &mut Vec<u32>,
) {
    let fine_y = render[3];
    let coarse_y = full[3];
    let mut j0 = render[0];
    let mut j1 = render[0] + fine_step;

    let mut i = full[0];
    while i < full[2] {
        let next = (i + coarse_step).min(full[2]);
        let coarse = coarse_y * corner_width + i;
        while j0 < next && j0 < render[2] {
            j1 = j1.min(render[2]);
            out.extend_from_slice(&[
                fine_y * corner_width + j1,
                fine_y * corner_width + j0,
                coarse,
            ]);
            j0 = j1;
            j1 += fine_step;
        }
        out.extend_from_slice(&[
            coarse,
            coarse_y * corner_width + next,
            fine_y * corner_width + j0,
        ]);
        i = next;
    }
}

/// Emits the complete index list for one visible chunk: the clipped
/// interior grid plus a bridge strip for every side facing a strictly
/// coarser visible neighbor. Returns the number of interior quads.
///
/// Sides facing equal or finer neighbors get no bridge: equal steps tile
/// already, and a finer neighbor emits the bridge from its own side.
pub fn chunk_mesh_indices(
    grid: &ChunkGrid,
    vis: &ChunkVisibility,
    index: usize,
    out: &mut Vec<u32>,
) -> u32 {
    let corner_width = grid.size().corner_width();
    let chunk = grid.chunk(index);
    let step = lod_step(vis.lod[index]);
    let (x0, y0, x1, y1) = chunk.corner_span();
    let full = [x0, y0, x1, y1];
    let render = vis.render_span[index];

    let quads = span_indices(corner_width, render, step, out);

    let mut side = |slot: usize, glue: fn(u32, [u32; 4], [u32; 4], u32, u32, &mut Vec<u32>)| {
        if let Some(n) = chunk.neighbors[slot] {
            let n = n as usize;
            if vis.visible[n] && vis.lod[n] > vis.lod[index] {
                glue(corner_width, full, render, step, lod_step(vis.lod[n]), out);
            }
        }
    };
    side(NEIGHBOR_LEFT, glue_left);
    side(NEIGHBOR_TOP, glue_top);
    side(NEIGHBOR_RIGHT, glue_right);
    side(NEIGHBOR_BOTTOM, glue_bottom);

    quads
}

/// Snaps the border corner heights of every multi-cell region to the
/// straight line between the region's corner heights, writing into a
/// corner-indexed height copy.
///
/// Regions rendered as single large quads have straight edges; a finer
/// neighbor whose corner lies on such an edge would otherwise use the true
/// terrain height there and open a crack. Regions are processed finest
/// first so that where borders touch, the coarsest region's edge wins.
/// Heights are read from the surface, never from the copy, so the result
/// does not depend on how borders overlap within one pass.
pub fn flatten_region_edges<S>(surface: &S, regions: &[RenderRegion], heights: &mut [f32])
where
    S: TerrainSource + ?Sized,
{
    let size = surface.size();
    let mut by_coarseness: Vec<&RenderRegion> =
        regions.iter().filter(|r| r.rect.cell_count() > 1).collect();
    by_coarseness.sort_by_key(|r| r.rect.cell_count());

    for region in by_coarseness {
        let rect = region.rect;
        let (x0, y0) = (rect.left as u32, rect.top as u32);
        let (x1, y1) = ((rect.right + 1) as u32, (rect.bottom + 1) as u32);
        let w = (x1 - x0) as f32;
        let h = (y1 - y0) as f32;

        let tl = surface.height_at(x0, y0);
        let tr = surface.height_at(x1, y0);
        let bl = surface.height_at(x0, y1);
        let br = surface.height_at(x1, y1);

        for x in 0..=(x1 - x0) {
            let t = x as f32 / w;
            heights[size.corner_index(x0 + x, y0)] = tl + (tr - tl) * t;
            heights[size.corner_index(x0 + x, y1)] = bl + (br - bl) * t;
        }
        // Corner rows are covered above, so skip them here.
        for y in 1..(y1 - y0) {
            let t = y as f32 / h;
            heights[size.corner_index(x0, y0 + y)] = tl + (bl - tl) * t;
            heights[size.corner_index(x1, y0 + y)] = tr + (br - tr) * t;
        }
    }
}

/// Dirty rectangle covering the borders touched by
/// [`flatten_region_edges`] for the given regions, clamped to the grid.
#[must_use]
pub fn flattened_bounds(size: GridSize, regions: &[RenderRegion]) -> Option<CellRect> {
    regions
        .iter()
        .filter(|r| r.rect.cell_count() > 1)
        .map(|r| r.rect)
        .reduce(|a, b| a.union(&b))
        .map(|r| r.clamped_to(size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cull::{cull_chunks, ChunkVisibility};
    use crate::frustum::Frustum;
    use crate::surface::{FullSight, HeightmapSurface};
    use glam::{Mat4, Vec3};
    use veldt_common::GridSize;

    const CW: u32 = 33;

    fn decode(corner_width: u32, index: u32) -> (u32, u32) {
        (index % corner_width, index / corner_width)
    }

    #[test]
    fn test_span_grid_quad_count_and_bounds() {
        let mut out = Vec::new();
        let quads = span_indices(CW, [0, 0, 8, 8], 2, &mut out);
        assert_eq!(quads, 16);
        assert_eq!(out.len(), 16 * 6);
        for &i in &out {
            let (x, y) = decode(CW, i);
            assert!(x <= 8 && y <= 8);
            assert_eq!(x % 2, 0);
            assert_eq!(y % 2, 0);
        }
    }

    #[test]
    fn test_span_grid_clamps_partial_steps() {
        // 5 columns at step 2: columns of width 2, 2, 1.
        let mut out = Vec::new();
        let quads = span_indices(CW, [0, 0, 5, 2], 2, &mut out);
        assert_eq!(quads, 3);
        assert!(out.iter().any(|&i| decode(CW, i).0 == 5));
    }

    #[test]
    fn test_empty_span_emits_nothing() {
        let mut out = Vec::new();
        assert_eq!(span_indices(CW, [4, 4, 4, 8], 2, &mut out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_seam_triangle_count_matches_step_sum() {
        // Border 32 cells long, fine step 2 against coarse step 8: one fan
        // triangle per fine segment plus one closing triangle per coarse
        // segment.
        let full = [0, 0, 32, 32];
        let render = [2, 0, 32, 32];
        let mut out = Vec::new();
        glue_left(CW, full, render, 2, 8, &mut out);
        assert_eq!(out.len() as u32 / 3, 32 / 2 + 32 / 8);
    }

    #[test]
    fn test_glue_vertices_stay_on_border_columns() {
        let full = [0, 0, 32, 32];
        let render = [2, 0, 32, 32];
        let mut out = Vec::new();
        glue_left(CW, full, render, 2, 8, &mut out);
        for &i in &out {
            let (x, _) = decode(CW, i);
            assert!(x == 0 || x == 2, "glue vertex off the border at x={x}");
        }
        // Both edges fully sampled: every fine vertex and every coarse
        // vertex appears, so neither side has an unmatched edge.
        let fine: Vec<u32> = (0..=32).step_by(2).collect();
        let coarse: Vec<u32> = (0..=32).step_by(8).collect();
        for y in fine {
            assert!(out.contains(&(y * CW + 2)), "fine vertex y={y} missing");
        }
        for y in coarse {
            assert!(out.contains(&(y * CW)), "coarse vertex y={y} missing");
        }
    }

    #[test]
    fn test_glue_respects_perpendicular_insets() {
        // Top and bottom also clipped: the fan covers the shorter fine run
        // and the closing triangles still reach the full-span corners.
        let full = [0, 0, 32, 32];
        let render = [2, 2, 32, 30];
        let mut out = Vec::new();
        glue_left(CW, full, render, 2, 8, &mut out);
        let ys: Vec<u32> = out.iter().map(|&i| decode(CW, i).1).collect();
        assert_eq!(*ys.iter().min().unwrap(), 0);
        assert_eq!(*ys.iter().max().unwrap(), 32);
        // No fine vertex outside the inset run.
        for &i in &out {
            let (x, y) = decode(CW, i);
            if x == 2 {
                assert!((2..=30).contains(&y));
            }
        }
    }

    #[test]
    fn test_uniform_lod_chunks_emit_no_glue() {
        let size = GridSize::new(64, 64);
        let surface = HeightmapSurface::flat(size, 1);
        let grid = ChunkGrid::build(&surface, &FullSight, 32).expect("build");
        let eye = Vec3::new(32.0, -32.0, 400.0);
        let view = Mat4::look_at_rh(eye, eye - Vec3::Z, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, 1.0, 2000.0);
        let frustum = Frustum::from_view_proj(proj * view);

        let vis = cull_chunks(&grid, &frustum);
        for index in 0..grid.len() {
            let mut out = Vec::new();
            let quads = chunk_mesh_indices(&grid, &vis, index, &mut out);
            assert_eq!(quads, 1, "flat chunk at step 32 is one quad");
            assert_eq!(out.len(), 6, "no bridge triangles between equal LODs");
        }
    }

    #[test]
    fn test_collapsed_span_glue_stays_in_bounds() {
        let size = GridSize::new(70, 32);
        let surface = HeightmapSurface::flat(size, 1);
        let grid = ChunkGrid::build(&surface, &FullSight, 32).expect("build");
        assert_eq!(grid.len(), 3);

        // The 6-cell edge chunk at step 8 next to a step-16 neighbor: the
        // inset swallows the whole chunk and its span collapses onto the
        // right corner line.
        let vis = ChunkVisibility {
            visible: vec![true; 3],
            lod: vec![4, 4, 3],
            render_span: vec![[0, 0, 32, 32], [32, 0, 64, 32], [70, 0, 70, 32]],
            min_distance: 1.0,
            max_distance: 2.0,
        };

        let corner_count = size.corner_count() as u32;
        for index in 0..grid.len() {
            let mut out = Vec::new();
            chunk_mesh_indices(&grid, &vis, index, &mut out);
            for &i in &out {
                assert!(i < corner_count, "chunk {index} emitted index {i}");
            }
        }
        // The collapsed chunk still draws: its glue fan spans the full
        // chunk width from the coarse border to the right corner line.
        let mut out = Vec::new();
        let quads = chunk_mesh_indices(&grid, &vis, 2, &mut out);
        assert_eq!(quads, 0);
        assert!(!out.is_empty());
    }

    #[test]
    fn test_flatten_snaps_border_to_line() {
        let size = GridSize::new(8, 8);
        let mut surface = HeightmapSurface::flat(size, 1);
        surface.set_height(4, 0, 7.0);
        surface.set_height(4, 4, 9.0);

        let mut heights: Vec<f32> = (0..size.corner_count())
            .map(|i| {
                let x = (i % size.corner_width() as usize) as u32;
                let y = (i / size.corner_width() as usize) as u32;
                surface.height_at(x, y)
            })
            .collect();

        let regions = [RenderRegion {
            rect: CellRect::new(0, 0, 7, 7),
            step: 8,
        }];
        flatten_region_edges(&surface, &regions, &mut heights);

        // The bump on the top border is flattened onto the corner line.
        assert_eq!(heights[size.corner_index(4, 0)], 0.0);
        // Interior corners keep their true height.
        assert_eq!(heights[size.corner_index(4, 4)], 9.0);
    }

    #[test]
    fn test_flatten_coarser_region_wins_shared_border() {
        let size = GridSize::new(8, 4);
        let mut surface = HeightmapSurface::flat(size, 1);
        surface.set_height(4, 2, 5.0);

        let mut heights = vec![0.0; size.corner_count()];
        heights[size.corner_index(4, 2)] = 5.0;

        // A fine 2x2 region whose right border is the left border of a
        // coarse 4x4 region: the coarse edge interpolation must win on the
        // shared corner line x=4.
        let regions = [
            RenderRegion {
                rect: CellRect::new(2, 0, 3, 1),
                step: 2,
            },
            RenderRegion {
                rect: CellRect::new(4, 0, 7, 3),
                step: 4,
            },
        ];
        flatten_region_edges(&surface, &regions, &mut heights);
        // The coarse left edge runs straight from (4,0)=0 to (4,4)=0.
        assert_eq!(heights[size.corner_index(4, 2)], 0.0);
        assert_eq!(heights[size.corner_index(4, 1)], 0.0);

        let bounds = flattened_bounds(size, &regions).expect("regions present");
        assert_eq!(bounds, CellRect::new(2, 0, 7, 3));
    }
}
