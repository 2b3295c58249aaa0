//! Level-of-detail policies.
//!
//! Two policies share one idea: geometric and texture detail that would be
//! imperceptible at distance is skipped to bound vertex throughput, and a
//! region strictly closer to the camera never gets a coarser step than a
//! region behind it.
//!
//! The quadtree policy answers "may this node be rendered as a single
//! quad?" from its cell count and its distance from the near plane. The
//! chunk policy maps a roughness-over-distance error term to a discrete
//! step ladder.

/// Number of discrete chunk LOD levels; level `n` renders quads of
/// `1 << n` cells, so the coarsest step is 32 cells.
pub const CHUNK_LOD_LEVELS: u32 = 6;

/// Scales the combined roughness term of a chunk into the error metric.
pub const ROUGHNESS_MULTIPLIER: f32 = 100.0;

/// Scales texture-transition roughness relative to height roughness.
pub const TEX_ROUGHNESS_MULTIPLIER: f32 = 0.125;

/// Quadtree policy: whether a node of `cell_count` cells at `distance` from
/// the near plane should stop splitting and render as one quad.
///
/// The thresholds encode "the farther away, the coarser a single quad may
/// be without visible error". A single cell always renders as one quad.
#[must_use]
pub fn render_as_single_quad(cell_count: i64, distance: f32) -> bool {
    if cell_count <= 1 {
        return true;
    }
    (distance > 240.0 && cell_count <= 64)
        || (distance > 120.0 && cell_count <= 16)
        || (distance > 40.0 && cell_count <= 8)
        || (distance > 20.0 && cell_count <= 2)
}

/// Chunk policy: error term for a chunk of the given combined roughness at
/// `distance` (near-plane distance of the bounding-sphere center plus
/// radius, see [`crate::frustum::Frustum::sphere_distance`]).
///
/// The distance is reduced by twice the bounding radius so the error is
/// computed from the nearest part of the chunk, and clamped to at least 1.
#[must_use]
pub fn chunk_error(roughness: f32, texture_roughness: f32, distance: f32, radius: f32) -> f32 {
    let dist = (distance - 2.0 * radius).max(1.0);
    (roughness + texture_roughness) * ROUGHNESS_MULTIPLIER / dist
}

/// Chunk policy: maps an error term to a LOD level in
/// `0..CHUNK_LOD_LEVELS`; level 0 is the finest (1-cell quads), level 5 the
/// coarsest (32-cell quads). Rough-and-close chunks always get finer steps.
#[must_use]
pub fn choose_chunk_lod(error: f32) -> u32 {
    if error < 0.5 {
        5
    } else if error < 1.25 {
        4
    } else if error < 3.0 {
        3
    } else if error < 7.0 {
        2
    } else if error < 16.0 {
        1
    } else {
        0
    }
}

/// Step size in cells for a chunk LOD level.
#[must_use]
pub const fn lod_step(lod: u32) -> u32 {
    1 << lod
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_cell_always_renders_as_quad() {
        assert!(render_as_single_quad(1, 0.0));
        assert!(render_as_single_quad(1, 1000.0));
    }

    #[test]
    fn test_large_nodes_need_distance() {
        assert!(!render_as_single_quad(64, 100.0));
        assert!(render_as_single_quad(64, 250.0));
        assert!(!render_as_single_quad(16, 100.0));
        assert!(render_as_single_quad(16, 130.0));
    }

    #[test]
    fn test_nearby_nodes_never_merge() {
        for count in [2, 4, 8, 16, 64] {
            assert!(!render_as_single_quad(count, 10.0));
        }
    }

    #[test]
    fn test_quad_policy_is_monotonic_in_distance() {
        // Once a node may render as one quad, it still may further away.
        for count in [2, 8, 16, 64] {
            let mut allowed = false;
            for d in 0..400 {
                let now = render_as_single_quad(count, d as f32);
                assert!(now || !allowed, "policy flipped back at d={d} count={count}");
                allowed = now;
            }
        }
    }

    #[test]
    fn test_chunk_lod_ladder() {
        assert_eq!(choose_chunk_lod(0.1), 5);
        assert_eq!(choose_chunk_lod(1.0), 4);
        assert_eq!(choose_chunk_lod(2.0), 3);
        assert_eq!(choose_chunk_lod(5.0), 2);
        assert_eq!(choose_chunk_lod(10.0), 1);
        assert_eq!(choose_chunk_lod(100.0), 0);
    }

    #[test]
    fn test_chunk_error_shrinks_with_distance() {
        let near = chunk_error(2.0, 1.0, 50.0, 5.0);
        let far = chunk_error(2.0, 1.0, 500.0, 5.0);
        assert!(near > far);
        // Closer chunks therefore never get a coarser LOD.
        assert!(choose_chunk_lod(near) <= choose_chunk_lod(far));
    }

    #[test]
    fn test_chunk_error_clamps_distance() {
        // Inside the 2*radius margin the distance clamps to 1.
        let e = chunk_error(1.0, 0.0, 3.0, 5.0);
        assert_eq!(e, ROUGHNESS_MULTIPLIER);
    }

    #[test]
    fn test_lod_step_values() {
        assert_eq!(lod_step(0), 1);
        assert_eq!(lod_step(5), 32);
    }
}
