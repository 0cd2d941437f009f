//! Ray-triangle intersection.
//!
//! Uses the Möller-Trumbore algorithm. Both faces are hit: rays travelling
//! inside the gem meet the back of its faces.

use gem_math::{Interval, Ray, Vec3};

/// Raw result of a ray-triangle test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    /// Ray parameter of the hit
    pub t: f32,
    /// Barycentric weight of v1
    pub u: f32,
    /// Barycentric weight of v2
    pub v: f32,
}

impl TriangleHit {
    /// Barycentric weights of (v0, v1, v2).
    #[inline]
    pub fn barycentric(&self) -> Vec3 {
        Vec3::new(1.0 - self.u - self.v, self.u, self.v)
    }
}

/// Möller-Trumbore ray-triangle intersection algorithm.
///
/// Returns the hit when its parameter lies inside `ray_t`.
#[inline]
pub fn intersect_triangle(ray: &Ray, [v0, v1, v2]: [Vec3; 3], ray_t: Interval) -> Option<TriangleHit> {
    let edge1 = v1 - v0;
    let edge2 = v2 - v0;

    let h = ray.direction().cross(edge2);
    let a = edge1.dot(h);

    // Ray is parallel to triangle
    if a.abs() < 1e-8 {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin() - v0;
    let u = f * s.dot(h);

    // Check if intersection is outside triangle (u parameter)
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray.direction().dot(q);

    // Check if intersection is outside triangle (v parameter)
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if !ray_t.contains(t) {
        return None;
    }

    Some(TriangleHit { t, u, v })
}
