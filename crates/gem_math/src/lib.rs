//! Gem math - vector types, rays, bounds and optics helpers.
//!
//! Re-exports glam so downstream crates share one set of vector types.

// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod interval;
mod optics;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use interval::Interval;
pub use optics::{is_degenerate, mix, reflect, refract, step};
pub use ray::Ray;
pub use transform::Mat4Ext;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec3_creation() {
        let v = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(v.x, 1.0);
        assert_eq!(v.y, 2.0);
        assert_eq!(v.z, 3.0);
    }

    #[test]
    fn test_reexports_compose() {
        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        let bounds = Aabb::from_points(Vec3::new(-1.0, -1.0, 1.0), Vec3::new(1.0, 1.0, 2.0));
        assert!(bounds.hit(&ray, Interval::new(0.0, 10.0)).is_some());
    }
}
