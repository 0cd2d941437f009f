//! Per-frame camera inputs.

use gem_core::Camera;
use gem_math::{Mat4, UVec2, Vec2, Vec3};

/// Camera matrices and viewport for one frame.
///
/// Rebuilt every frame from the camera; nothing here outlives the frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameInputs {
    pub projection: Mat4,
    pub projection_inverse: Mat4,
    /// Camera-to-world
    pub camera_world: Mat4,
    /// World-to-camera (inverse of `camera_world`)
    pub view: Mat4,
    pub camera_position: Vec3,
    /// Viewport size in pixels
    pub resolution: UVec2,
}

impl FrameInputs {
    pub fn new(projection: Mat4, camera_world: Mat4, resolution: UVec2) -> Self {
        Self {
            projection,
            projection_inverse: projection.inverse(),
            camera_world,
            view: camera_world.inverse(),
            camera_position: camera_world.w_axis.truncate(),
            resolution,
        }
    }

    /// Inputs for `camera` rendering a `width` x `height` viewport.
    pub fn from_camera(camera: &Camera, width: u32, height: u32) -> Self {
        let mut camera = *camera;
        camera.set_aspect(width.max(1) as f32 / height.max(1) as f32);
        Self::new(
            camera.projection_matrix(),
            camera.world_matrix(),
            UVec2::new(width, height),
        )
    }

    /// Normalized device coordinates of an image-space pixel position.
    ///
    /// Image space has its origin at the top-left corner with Y down, so
    /// pixel centers sit at `(x + 0.5, y + 0.5)`.
    #[inline]
    pub fn ndc(&self, pixel: Vec2) -> Vec2 {
        let uv = pixel / self.resolution.as_vec2();
        Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0)
    }
}
