// Transform utilities for Mat4
//
// Extends glam::Mat4 with the conversions the shading stages share.
// Note: glam::Mat4 already provides transform_point3(), transform_vector3() and inverse()

use crate::Aabb;
use glam::{Mat3, Mat4, Vec3};

/// Extension trait for Mat4 to provide additional transform utilities
pub trait Mat4Ext {
    /// Transform a direction (w=0) and normalize it.
    ///
    /// Returns zero for a zero input instead of NaN.
    fn transform_direction(&self, direction: Vec3) -> Vec3;

    /// Inverse-transpose of the upper 3x3, for transforming normals.
    fn normal_matrix(&self) -> Mat3;

    /// Transform an axis-aligned bounding box.
    /// Computes the bounding box of all 8 transformed corners.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;
}

impl Mat4Ext for Mat4 {
    fn transform_direction(&self, direction: Vec3) -> Vec3 {
        self.transform_vector3(direction).normalize_or_zero()
    }

    fn normal_matrix(&self) -> Mat3 {
        Mat3::from_mat4(*self).inverse().transpose()
    }

    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        let min_point = aabb.min();
        let max_point = aabb.max();

        let mut result = Aabb::EMPTY;
        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { min_point.x } else { max_point.x },
                if i & 2 == 0 { min_point.y } else { max_point.y },
                if i & 4 == 0 { min_point.z } else { max_point.z },
            );
            result.grow_point(self.transform_point3(corner));
        }

        Aabb::from_points(result.min(), result.max())
    }
}
