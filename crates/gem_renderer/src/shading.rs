//! Diamond shading pipeline.
//!
//! Two stages, the way a rasterizer would run them:
//! - the vertex stage transforms every prepared vertex once per frame;
//! - the pixel stage refracts the view ray into the gem, bounces it off the
//!   inside of the faces through the BVH until it escapes, and samples the
//!   environment along the exit direction.
//!
//! Rays inside the gem are traced in the mesh's local space; `ObjectTransform`
//! moves directions between world and local space.

use gem_core::{CubeMap, PreparedMesh};
use gem_math::{is_degenerate, mix, reflect, refract, step, Mat4, Mat4Ext, Ray, Vec2, Vec3, Vec4};
use rayon::prelude::*;

use crate::bvh::MeshBvh;
use crate::frame::FrameInputs;
use crate::material::DiamondMaterial;

/// Distance the refracted entry point is pushed inside the surface.
const ENTRY_OFFSET: f32 = 0.001;
/// Distance a hit point is pulled back along the ray.
const HIT_BACKOFF: f32 = 0.001;
/// Distance a reflected ray starts away from the face it reflected off.
const BOUNCE_OFFSET: f32 = 0.01;

/// Object-to-world transform of the gem and its inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectTransform {
    pub model: Mat4,
    pub model_inverse: Mat4,
}

impl ObjectTransform {
    pub fn new(model: Mat4) -> Self {
        Self {
            model,
            model_inverse: model.inverse(),
        }
    }
}

impl Default for ObjectTransform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

/// Per-vertex varyings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VertexOutput {
    pub clip_position: Vec4,
    pub world_position: Vec3,
    pub world_normal: Vec3,
}

/// Run the vertex stage over every vertex of `mesh`.
pub fn vertex_stage(mesh: &PreparedMesh, object: &ObjectTransform, frame: &FrameInputs) -> Vec<VertexOutput> {
    let model_view = frame.view * object.model;
    let clip_from_object = frame.projection * model_view;
    let normal_matrix = model_view.normal_matrix();

    mesh.positions()
        .par_iter()
        .zip(mesh.normals().par_iter())
        .map(|(&position, &normal)| VertexOutput {
            clip_position: clip_from_object * position.extend(1.0),
            world_position: object.model.transform_point3(position),
            world_normal: frame.camera_world.transform_direction(normal_matrix * normal),
        })
        .collect()
}

/// Interpolated inputs of one covered pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fragment {
    /// Image-space position (top-left origin, centers at +0.5)
    pub pixel: Vec2,
    pub world_position: Vec3,
    pub world_normal: Vec3,
}

/// Screen-space derivatives of the direction that drives mip selection.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Gradients {
    pub ddx: Vec3,
    pub ddy: Vec3,
}

impl Gradients {
    pub const ZERO: Gradients = Gradients {
        ddx: Vec3::ZERO,
        ddy: Vec3::ZERO,
    };
}

/// Exit directions of one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TracedDirections {
    /// One trace shared by all channels
    Single(Vec3),
    /// One trace per channel (R, G, B)
    PerChannel([Vec3; 3]),
}

impl TracedDirections {
    /// The trace at the material's own IOR.
    pub fn primary(&self) -> Vec3 {
        match *self {
            TracedDirections::Single(dir) => dir,
            TracedDirections::PerChannel([_, g, _]) => g,
        }
    }
}

/// Everything about a pixel that does not depend on its neighbours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelTrace {
    /// Camera ray direction through the pixel center
    pub reference: Vec3,
    pub directions: TracedDirections,
    /// dot(view direction, surface normal)
    pub view_dot: f32,
}

/// Fresnel weight: `strength` at grazing view, falling off toward head-on.
///
/// The base is clamped at zero: a head-on dot may land just below -1.
#[inline]
pub fn fresnel(view_dot: f32, material: &DiamondMaterial) -> f32 {
    (1.0 + view_dot).max(0.0).powf(material.fresnel_exponent) * material.fresnel_strength
}

/// Mirror reflection weight: either `strength` or zero.
#[inline]
pub fn reflection_mask(view_dot: f32, material: &DiamondMaterial) -> f32 {
    step(1.0 + view_dot, material.reflection_threshold) * material.reflection_strength
}

/// Read-only inputs of the pixel stage for one frame.
#[derive(Clone, Copy)]
pub struct PixelStage<'a> {
    pub bvh: &'a MeshBvh,
    pub material: &'a DiamondMaterial,
    pub object: &'a ObjectTransform,
    pub frame: &'a FrameInputs,
    pub environment: &'a CubeMap,
}

impl<'a> PixelStage<'a> {
    pub fn new(
        bvh: &'a MeshBvh,
        material: &'a DiamondMaterial,
        object: &'a ObjectTransform,
        frame: &'a FrameInputs,
        environment: &'a CubeMap,
    ) -> Self {
        Self {
            bvh,
            material,
            object,
            frame,
            environment,
        }
    }

    /// World-space camera ray direction through `pixel`.
    pub fn reference_direction(&self, pixel: Vec2) -> Vec3 {
        let ndc = self.frame.ndc(pixel);
        let view_point = self
            .frame
            .projection_inverse
            .project_point3(Vec3::new(ndc.x, ndc.y, 0.0));
        self.frame.camera_world.transform_direction(view_point)
    }

    /// Resolve the fragment a pixel would be rasterized to, if the gem
    /// covers it.
    ///
    /// The camera ray is cast into the BVH and the nearest face's
    /// varyings are interpolated with the hit's barycentrics.
    pub fn cover(&self, pixel: Vec2, vertices: &[VertexOutput]) -> Option<Fragment> {
        let direction = self.reference_direction(pixel);
        let ray = Ray::new(
            self.object.model_inverse.transform_point3(self.frame.camera_position),
            self.object.model_inverse.transform_direction(direction),
        );
        let hit = self.bvh.first_hit(&ray)?;

        let [i0, i1, i2] = hit.face_vertices;
        let (a, b, c) = (vertices.get(i0)?, vertices.get(i1)?, vertices.get(i2)?);
        let w = hit.barycentric;

        Some(Fragment {
            pixel,
            world_position: a.world_position * w.x + b.world_position * w.y + c.world_position * w.z,
            world_normal: (a.world_normal * w.x + b.world_normal * w.y + c.world_normal * w.z).normalize_or_zero(),
        })
    }

    /// Follow a world-space view ray through the gem.
    ///
    /// Refracts into the surface at `origin`, then bounces inside the mesh
    /// at most `bounces` times, refracting out at the first face that
    /// allows it. Returns the normalized world-space exit direction.
    pub fn total_internal_reflection(&self, origin: Vec3, direction: Vec3, normal: Vec3, ior: f32) -> Vec3 {
        let entry = refract(direction, normal, 1.0 / ior);
        if is_degenerate(entry) {
            return reflect(direction, normal).normalize_or_zero();
        }

        let mut ray_origin = self.object.model_inverse.transform_point3(origin + entry * ENTRY_OFFSET);
        let mut ray_direction = self.object.model_inverse.transform_direction(entry);

        for _ in 0..self.material.bounces {
            let Some(hit) = self.bvh.first_hit(&Ray::new(ray_origin, ray_direction)) else {
                break;
            };

            let hit_position = ray_origin + ray_direction * (hit.distance - HIT_BACKOFF).max(0.0);
            let face_normal = hit.oriented_normal();

            let exit = refract(ray_direction, face_normal, ior);
            if !is_degenerate(exit) {
                ray_direction = exit;
                break;
            }

            ray_direction = reflect(ray_direction, face_normal);
            ray_origin = hit_position + ray_direction * BOUNCE_OFFSET;
        }

        self.object.model.transform_direction(ray_direction)
    }

    /// Trace the exit direction(s) of a fragment.
    pub fn trace(&self, fragment: &Fragment) -> PixelTrace {
        let normal = fragment.world_normal.normalize_or_zero();
        let view = (fragment.world_position - self.frame.camera_position).normalize_or_zero();

        // The view ray from the camera enters the gem at the fragment
        let trace_at = |ior: f32| self.total_internal_reflection(fragment.world_position, view, normal, ior);

        let directions = if self.material.chromatic_aberration {
            let [r, g, b] = self.material.channel_iors();
            TracedDirections::PerChannel([trace_at(r), trace_at(g), trace_at(b)])
        } else {
            TracedDirections::Single(trace_at(self.material.effective_ior()))
        };

        PixelTrace {
            reference: self.reference_direction(fragment.pixel),
            directions,
            view_dot: view.dot(normal),
        }
    }

    /// The direction whose screen-space derivatives select the mip level.
    #[inline]
    pub fn gradient_source(&self, trace: &PixelTrace) -> Vec3 {
        if self.material.correct_mips {
            trace.reference
        } else {
            trace.directions.primary()
        }
    }

    /// Sample the environment for a traced pixel and blend in the
    /// fresnel and mirror terms.
    pub fn resolve(&self, trace: &PixelTrace, gradients: &Gradients) -> Vec3 {
        let sample = |dir: Vec3| self.environment.sample_grad(dir, gradients.ddx, gradients.ddy);

        let color = match trace.directions {
            TracedDirections::Single(dir) => sample(dir),
            TracedDirections::PerChannel([r, g, b]) => Vec3::new(sample(r).x, sample(g).y, sample(b).z),
        };
        let color = color * self.material.base_color;

        let reflection = reflection_mask(trace.view_dot, self.material);
        let fresnel = fresnel(trace.view_dot, self.material);
        mix(mix(color, Vec3::ONE, reflection), Vec3::ONE, fresnel)
    }

    /// Shade one fragment with caller-supplied gradients.
    pub fn shade(&self, fragment: &Fragment, gradients: &Gradients) -> Vec3 {
        self.resolve(&self.trace(fragment), gradients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::BuildStrategy;
    use gem_core::{Camera, Mesh};
    use gem_math::UVec2;

    struct Fixture {
        mesh: PreparedMesh,
        bvh: MeshBvh,
        material: DiamondMaterial,
        object: ObjectTransform,
        frame: FrameInputs,
        environment: CubeMap,
    }

    impl Fixture {
        fn new(mesh: PreparedMesh, camera_position: Vec3) -> Self {
            let camera = Camera::new(camera_position, Vec3::ZERO, 1.0);
            Self {
                bvh: MeshBvh::build(&mesh, BuildStrategy::Sah),
                mesh,
                material: DiamondMaterial::default(),
                object: ObjectTransform::default(),
                frame: FrameInputs::from_camera(&camera, 64, 64),
                // Direction-dependent so different traces sample different colors
                environment: CubeMap::from_fn(16, |d| d * 0.5 + Vec3::splat(0.5)).unwrap(),
            }
        }

        fn cube() -> Self {
            Self::new(Mesh::unit_cube().to_non_indexed(), Vec3::new(0.0, 0.0, 3.0))
        }

        fn stage(&self) -> PixelStage<'_> {
            PixelStage::new(&self.bvh, &self.material, &self.object, &self.frame, &self.environment)
        }
    }

    fn approx(a: Vec3, b: Vec3, eps: f32) -> bool {
        (a - b).abs().max_element() < eps
    }

    #[test]
    fn test_cube_straight_through() {
        let mut fx = Fixture::cube();
        fx.material.ior = 1.5;
        fx.material.bounces = 1;

        let exit = fx
            .stage()
            .total_internal_reflection(Vec3::new(0.1, 0.1, 0.5), Vec3::NEG_Z, Vec3::Z, 1.5);
        assert!(approx(exit, Vec3::NEG_Z, 1e-5), "exit {exit}");
    }

    #[test]
    fn test_empty_mesh_keeps_entry_refraction() {
        let mut fx = Fixture::new(PreparedMesh::empty(), Vec3::new(0.0, 0.0, 3.0));
        fx.material.bounces = 3;

        let dir = Vec3::new(0.3, -0.2, -1.0).normalize();
        let expected = refract(dir, Vec3::Z, 1.0 / 2.4).normalize();
        let exit = fx.stage().total_internal_reflection(Vec3::ZERO, dir, Vec3::Z, 2.4);
        assert!(approx(exit, expected, 1e-6));
    }

    #[test]
    fn test_zero_bounces_is_entry_refraction() {
        let mut fx = Fixture::cube();
        fx.material.bounces = 0;

        let dir = Vec3::new(0.4, 0.1, -1.0).normalize();
        let expected = refract(dir, Vec3::Z, 1.0 / 2.4).normalize();
        let exit = fx
            .stage()
            .total_internal_reflection(Vec3::new(0.0, 0.0, 0.5), dir, Vec3::Z, 2.4);
        assert!(approx(exit, expected, 1e-6));
    }

    #[test]
    fn test_oblique_exit_through_parallel_face() {
        let mut fx = Fixture::cube();
        let dir = Vec3::new(0.9, 0.0, -0.4).normalize();
        let origin = Vec3::new(-0.4, 0.0, 0.5);

        // Without bounces the ray stays bent toward the entry normal
        fx.material.bounces = 0;
        let entry_only = fx.stage().total_internal_reflection(origin, dir, Vec3::Z, 2.4);
        assert!(!approx(entry_only, dir, 1e-3));

        // Leaving through the opposite face undoes the bend
        fx.material.bounces = 4;
        let exit = fx.stage().total_internal_reflection(origin, dir, Vec3::Z, 2.4);
        assert!(approx(exit, dir, 1e-4), "exit {exit}");
    }

    #[test]
    fn test_internal_reflection_off_side_face() {
        let mut fx = Fixture::cube();
        let dir = Vec3::new(0.9, 0.0, -0.4).normalize();
        let origin = Vec3::new(0.45, 0.0, 0.5);
        let inside = refract(dir, Vec3::Z, 1.0 / 2.4);

        // The +X wall is past the critical angle: one bounce keeps the reflection
        fx.material.bounces = 1;
        let reflected = fx.stage().total_internal_reflection(origin, dir, Vec3::Z, 2.4);
        assert!(approx(reflected, Vec3::new(-inside.x, inside.y, inside.z), 1e-4));

        // The second bounce escapes through the bottom, mirrored in X
        fx.material.bounces = 2;
        let exit = fx.stage().total_internal_reflection(origin, dir, Vec3::Z, 2.4);
        assert!(approx(exit, Vec3::new(-dir.x, dir.y, dir.z), 1e-4), "exit {exit}");
    }

    #[test]
    fn test_object_transform_applied() {
        // Cube rotated a quarter turn about Y is still a cube: straight through
        let mut fx = Fixture::cube();
        fx.object = ObjectTransform::new(Mat4::from_rotation_y(std::f32::consts::FRAC_PI_2));
        fx.material.bounces = 1;

        let exit = fx
            .stage()
            .total_internal_reflection(Vec3::new(0.1, 0.1, 0.5), Vec3::NEG_Z, Vec3::Z, 1.5);
        assert!(approx(exit, Vec3::NEG_Z, 1e-4), "exit {exit}");
    }

    #[test]
    fn test_fresnel_grazing_and_monotonic() {
        let material = DiamondMaterial {
            fresnel_strength: 0.7,
            ..Default::default()
        };
        assert_eq!(fresnel(0.0, &material), 0.7);
        assert_eq!(fresnel(-1.0, &material), 0.0);

        let mut previous = fresnel(0.0, &material);
        for i in 1..=20 {
            let value = fresnel(-(i as f32) / 20.0, &material);
            assert!(value <= previous);
            previous = value;
        }
    }

    #[test]
    fn test_fresnel_head_on_below_minus_one() {
        let material = DiamondMaterial {
            fresnel_exponent: 2.5,
            ..Default::default()
        };
        // One ulp past -1, as a unit vector dotted with its negation can give
        let value = fresnel(-1.0000001, &material);
        assert_eq!(value, 0.0);
        assert!(fresnel(-0.5, &material) > 0.0);
    }

    #[test]
    fn test_reflection_mask_binary() {
        let material = DiamondMaterial::default();
        for i in 0..=200 {
            let view_dot = -(i as f32) / 200.0;
            let mask = reflection_mask(view_dot, &material);
            assert!(mask == 0.0 || mask == material.reflection_strength, "mask {mask}");
        }
        assert_eq!(reflection_mask(-1.0, &material), material.reflection_strength);
        assert_eq!(reflection_mask(-0.5, &material), 0.0);
    }

    fn front_fragment() -> Fragment {
        Fragment {
            pixel: Vec2::new(33.5, 30.5),
            world_position: Vec3::new(0.1, 0.05, 0.5),
            world_normal: Vec3::Z,
        }
    }

    #[test]
    fn test_aberration_off_single_trace() {
        let fx = Fixture::cube();
        let trace = fx.stage().trace(&front_fragment());
        assert!(matches!(trace.directions, TracedDirections::Single(_)));
    }

    #[test]
    fn test_aberration_zero_strength_matches_off() {
        let mut fx = Fixture::new(Mesh::brilliant_cut(16).to_non_indexed(), Vec3::new(0.5, 2.0, 2.0));
        let fragment = Fragment {
            pixel: Vec2::new(32.5, 32.5),
            world_position: Vec3::new(0.1, 0.16, 0.05),
            world_normal: Vec3::Y,
        };

        let off = fx.stage().shade(&fragment, &Gradients::ZERO);

        fx.material.chromatic_aberration = true;
        fx.material.aberration_strength = 0.0;
        let trace = fx.stage().trace(&fragment);
        let TracedDirections::PerChannel([r, g, b]) = trace.directions else {
            panic!("expected per-channel trace");
        };
        assert_eq!(r, g);
        assert_eq!(g, b);

        let on = fx.stage().shade(&fragment, &Gradients::ZERO);
        assert!(approx(off, on, 1e-6));
    }

    #[test]
    fn test_aberration_splits_channels() {
        let mut fx = Fixture::new(Mesh::brilliant_cut(16).to_non_indexed(), Vec3::new(0.5, 2.0, 2.0));
        fx.material.chromatic_aberration = true;
        fx.material.aberration_strength = 0.2;
        let fragment = Fragment {
            pixel: Vec2::new(32.5, 32.5),
            world_position: Vec3::new(0.2, 0.16, 0.1),
            world_normal: Vec3::Y,
        };

        let TracedDirections::PerChannel([r, _, b]) = fx.stage().trace(&fragment).directions else {
            panic!("expected per-channel trace");
        };
        assert!(!approx(r, b, 1e-4));
    }

    #[test]
    fn test_resolve_blend() {
        let mut fx = Fixture::cube();
        fx.environment = CubeMap::uniform(Vec3::new(0.2, 0.4, 0.6));
        fx.material.base_color = Vec3::new(1.0, 0.5, 1.0);
        fx.material.reflection_strength = 0.0;
        fx.material.fresnel_strength = 0.0;

        let trace = PixelTrace {
            reference: Vec3::NEG_Z,
            directions: TracedDirections::Single(Vec3::NEG_Z),
            view_dot: -1.0,
        };
        let color = fx.stage().resolve(&trace, &Gradients::ZERO);
        assert!(approx(color, Vec3::new(0.2, 0.2, 0.6), 1e-5));

        // Full fresnel washes out to white
        fx.material.fresnel_strength = 1.0;
        let grazing = PixelTrace { view_dot: 0.0, ..trace };
        assert!(approx(fx.stage().resolve(&grazing, &Gradients::ZERO), Vec3::ONE, 1e-5));
    }

    #[test]
    fn test_gradient_source() {
        let mut fx = Fixture::cube();
        let trace = PixelTrace {
            reference: Vec3::NEG_Z,
            directions: TracedDirections::PerChannel([Vec3::X, Vec3::Y, Vec3::Z]),
            view_dot: -1.0,
        };
        assert_eq!(fx.stage().gradient_source(&trace), Vec3::NEG_Z);
        fx.material.correct_mips = false;
        assert_eq!(fx.stage().gradient_source(&trace), Vec3::Y);
    }

    #[test]
    fn test_vertex_stage_matches_reference_direction() {
        let fx = Fixture::new(Mesh::unit_cube().to_non_indexed(), Vec3::new(1.0, 1.5, 3.0));
        let stage = fx.stage();
        let outputs = vertex_stage(&fx.mesh, &fx.object, &fx.frame);
        assert_eq!(outputs.len(), fx.mesh.vertex_count());

        for (out, &normal) in outputs.iter().zip(fx.mesh.normals()) {
            // Identity model: world normal is the object normal
            assert!(approx(out.world_normal, normal, 1e-5));

            // The clip position lands on the pixel whose camera ray points at the vertex
            let ndc = out.clip_position.truncate() / out.clip_position.w;
            let pixel = Vec2::new((ndc.x + 1.0) * 0.5 * 64.0, (1.0 - ndc.y) * 0.5 * 64.0);
            let expected = (out.world_position - fx.frame.camera_position).normalize();
            assert!(approx(stage.reference_direction(pixel), expected, 1e-4));
        }
    }

    #[test]
    fn test_cover_center_and_corner() {
        let fx = Fixture::cube();
        let outputs = vertex_stage(&fx.mesh, &fx.object, &fx.frame);
        let stage = fx.stage();

        let fragment = stage.cover(Vec2::new(32.5, 32.5), &outputs).unwrap();
        assert!((fragment.world_position.z - 0.5).abs() < 1e-4);
        assert!(approx(fragment.world_normal, Vec3::Z, 1e-5));

        assert!(stage.cover(Vec2::new(0.5, 0.5), &outputs).is_none());
        assert_eq!(fx.frame.resolution, UVec2::new(64, 64));
    }
}
