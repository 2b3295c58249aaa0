//! View-frustum classification primitives.
//!
//! A frustum is six planes `(nx, ny, nz, d)` with inward-pointing normals:
//! a point `p` is on the visible side of a plane when `n . p + d >= 0`.
//! Planes are extracted from a view-projection matrix using the wgpu depth
//! convention (clip z in `0..1`).

use glam::{Mat4, Vec3, Vec4, Vec4Swizzles};

/// Index of the near plane in [`Frustum::planes`].
pub const NEAR_PLANE: usize = 5;

/// Result of classifying a bounding volume against the frustum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Containment {
    /// Entirely outside at least one plane.
    Outside,
    /// Straddles at least one plane.
    Partial,
    /// Entirely on the visible side of all six planes.
    Inside,
}

/// A view frustum as six inward-facing planes.
///
/// Plane order: left, right, bottom, top, far, near (the near plane last, at
/// [`NEAR_PLANE`]).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frustum {
    /// The six planes, `xyz` normal and `w` distance.
    pub planes: [Vec4; 6],
}

impl Frustum {
    /// Extracts the six planes from a combined view-projection matrix.
    #[must_use]
    pub fn from_view_proj(view_proj: Mat4) -> Self {
        let r0 = view_proj.row(0);
        let r1 = view_proj.row(1);
        let r2 = view_proj.row(2);
        let r3 = view_proj.row(3);

        let planes = [
            normalize_plane(r3 + r0), // left
            normalize_plane(r3 - r0), // right
            normalize_plane(r3 + r1), // bottom
            normalize_plane(r3 - r1), // top
            normalize_plane(r3 - r2), // far
            normalize_plane(r2),      // near (wgpu: clip z >= 0)
        ];
        Self { planes }
    }

    /// Builds a frustum directly from six `(normal, d)` planes.
    ///
    /// Useful for tests and for callers that already track planes.
    #[must_use]
    pub fn from_planes(planes: [Vec4; 6]) -> Self {
        Self {
            planes: planes.map(normalize_plane),
        }
    }

    /// Signed distance of a point from the given plane.
    #[must_use]
    pub fn plane_distance(&self, plane: usize, point: Vec3) -> f32 {
        self.planes[plane].xyz().dot(point) + self.planes[plane].w
    }

    /// Signed distance of a point from the near plane.
    #[must_use]
    pub fn near_distance(&self, point: Vec3) -> f32 {
        self.plane_distance(NEAR_PLANE, point)
    }

    /// Classifies a bounding sphere against all six planes.
    #[must_use]
    pub fn classify_sphere(&self, center: Vec3, radius: f32) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let d = plane.xyz().dot(center) + plane.w;
            if d < -radius {
                return Containment::Outside;
            }
            if d < radius {
                result = Containment::Partial;
            }
        }
        result
    }

    /// Sphere visibility test returning a distance metric.
    ///
    /// Returns `None` when the sphere is entirely outside; otherwise the
    /// distance of the sphere center from the near plane plus the radius,
    /// which is always positive for a visible sphere.
    #[must_use]
    pub fn sphere_distance(&self, center: Vec3, radius: f32) -> Option<f32> {
        if self.classify_sphere(center, radius) == Containment::Outside {
            return None;
        }
        Some(self.near_distance(center) + radius)
    }

    /// Whether an axis-aligned box intersects the frustum.
    ///
    /// Conservative: tests the positive vertex of the box against each
    /// plane, so it can report a box as visible that is not, never the
    /// reverse.
    #[must_use]
    pub fn intersects_aabb(&self, min: Vec3, max: Vec3) -> bool {
        for plane in &self.planes {
            let n = plane.xyz();
            // Corner of the box furthest along the plane normal.
            let p = Vec3::new(
                if n.x >= 0.0 { max.x } else { min.x },
                if n.y >= 0.0 { max.y } else { min.y },
                if n.z >= 0.0 { max.z } else { min.z },
            );
            if n.dot(p) + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let len = plane.xyz().length();
    if len > f32::EPSILON {
        plane / len
    } else {
        plane
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Frustum of a camera at `eye` looking straight down the -z axis
    /// (terrain below), with symmetric 90 degree field of view.
    fn top_down_frustum(eye: Vec3, near: f32, far: f32) -> Frustum {
        let view = Mat4::look_at_rh(eye, eye - Vec3::Z, Vec3::Y);
        let proj = Mat4::perspective_rh(std::f32::consts::FRAC_PI_2, 1.0, near, far);
        Frustum::from_view_proj(proj * view)
    }

    #[test]
    fn test_point_under_camera_is_inside() {
        let frustum = top_down_frustum(Vec3::new(0.0, 0.0, 100.0), 1.0, 500.0);
        assert_eq!(
            frustum.classify_sphere(Vec3::ZERO, 0.1),
            Containment::Inside
        );
    }

    #[test]
    fn test_point_far_to_the_side_is_outside() {
        let frustum = top_down_frustum(Vec3::new(0.0, 0.0, 100.0), 1.0, 500.0);
        let center = Vec3::new(5000.0, 0.0, 0.0);
        assert_eq!(frustum.classify_sphere(center, 1.0), Containment::Outside);
        assert_eq!(frustum.sphere_distance(center, 1.0), None);
    }

    #[test]
    fn test_sphere_straddling_edge_is_partial() {
        let frustum = top_down_frustum(Vec3::new(0.0, 0.0, 100.0), 1.0, 500.0);
        // 90 degree fov: the frustum boundary at z=0 passes through x=100.
        let center = Vec3::new(100.0, 0.0, 0.0);
        assert_eq!(frustum.classify_sphere(center, 5.0), Containment::Partial);
    }

    #[test]
    fn test_near_distance_grows_away_from_camera() {
        let frustum = top_down_frustum(Vec3::new(0.0, 0.0, 100.0), 1.0, 500.0);
        let near = frustum.near_distance(Vec3::new(0.0, 0.0, 50.0));
        let far = frustum.near_distance(Vec3::new(0.0, 0.0, 0.0));
        assert!(far > near);
        assert!(near > 0.0);
    }

    #[test]
    fn test_aabb_test_agrees_with_sphere_test() {
        let frustum = top_down_frustum(Vec3::new(0.0, 0.0, 100.0), 1.0, 500.0);
        assert!(frustum.intersects_aabb(Vec3::new(-1.0, -1.0, 0.0), Vec3::new(1.0, 1.0, 1.0)));
        assert!(!frustum.intersects_aabb(
            Vec3::new(4000.0, 4000.0, 0.0),
            Vec3::new(4001.0, 4001.0, 1.0)
        ));
    }
}
