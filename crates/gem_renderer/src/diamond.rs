//! The renderable gem.
//!
//! `Diamond` owns everything the pixel stage reads across frames: the
//! prepared mesh, its BVH, the object transform and the material. All
//! mutation takes `&mut self`, so it can never overlap a frame in flight.

use gem_core::{CubeMap, Mesh, Model, ModelError, PreparedMesh};
use gem_math::{Aabb, Mat4, Mat4Ext};

use crate::bvh::{BuildStrategy, MeshBvh};
use crate::frame::FrameInputs;
use crate::material::{DiamondMaterial, MaterialQueue, MaterialSender};
use crate::renderer::{render_frame, ImageBuffer, RenderConfig};
use crate::shading::{vertex_stage, ObjectTransform, PixelStage};

pub struct Diamond {
    mesh: PreparedMesh,
    bvh: MeshBvh,
    strategy: BuildStrategy,
    object: ObjectTransform,
    material: DiamondMaterial,
    commands: MaterialQueue,
    config: RenderConfig,
}

impl Diamond {
    /// Prepare `mesh` and build its BVH.
    pub fn new(mesh: &Mesh, model: Mat4) -> Self {
        Self::from_prepared(mesh.to_non_indexed(), model)
    }

    /// Use an already prepared mesh.
    pub fn from_prepared(mesh: PreparedMesh, model: Mat4) -> Self {
        let strategy = BuildStrategy::default();
        Self {
            bvh: MeshBvh::build(&mesh, strategy),
            mesh,
            strategy,
            object: ObjectTransform::new(model),
            material: DiamondMaterial::default(),
            commands: MaterialQueue::new(),
            config: RenderConfig::default(),
        }
    }

    /// Build from the gem node of a loaded model.
    pub fn from_model(model: &Model) -> Result<Self, ModelError> {
        let (mesh, transform) = model.prepare_gem()?;
        log::info!(
            "Diamond from model '{}': {} triangles",
            model.name,
            mesh.triangle_count()
        );
        Ok(Self::from_prepared(mesh, transform))
    }

    pub fn with_material(mut self, material: DiamondMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn with_config(mut self, config: RenderConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the strategy used by this and later rebuilds.
    pub fn with_build_strategy(mut self, strategy: BuildStrategy) -> Self {
        if strategy != self.strategy {
            self.strategy = strategy;
            self.bvh = MeshBvh::build(&self.mesh, strategy);
        }
        self
    }

    /// Swap in a new mesh, rebuilding the BVH from scratch.
    pub fn rebuild(&mut self, mesh: &Mesh) {
        self.rebuild_prepared(mesh.to_non_indexed());
    }

    pub fn rebuild_prepared(&mut self, mesh: PreparedMesh) {
        self.bvh = MeshBvh::build(&mesh, self.strategy);
        self.mesh = mesh;
        log::debug!("Diamond rebuilt: {} triangles", self.mesh.triangle_count());
    }

    /// Swap in the gem of another model, taking its transform as well.
    ///
    /// Leaves the current gem untouched if the model has no single gem node.
    pub fn rebuild_from_model(&mut self, model: &Model) -> Result<(), ModelError> {
        let (mesh, transform) = model.prepare_gem()?;
        self.rebuild_prepared(mesh);
        self.object = ObjectTransform::new(transform);
        Ok(())
    }

    pub fn set_transform(&mut self, model: Mat4) {
        self.object = ObjectTransform::new(model);
    }

    /// Handle for queueing material changes, applied at the next frame.
    pub fn material_sender(&self) -> MaterialSender {
        self.commands.sender()
    }

    /// Frame boundary: apply every queued material command.
    ///
    /// Returns how many commands were applied.
    pub fn begin_frame(&mut self) -> usize {
        let applied = self.commands.drain_into(&mut self.material);
        if applied > 0 {
            log::debug!("Applied {} material commands", applied);
        }
        applied
    }

    /// Apply queued material changes, then render one frame.
    pub fn render_frame(&mut self, frame: &FrameInputs, environment: &CubeMap) -> ImageBuffer {
        self.begin_frame();

        let stage = self.pixel_stage(frame, environment);
        let vertices = vertex_stage(&self.mesh, &self.object, frame);
        render_frame(&stage, &vertices, &self.config)
    }

    /// Pixel stage over the current state, for callers running their own loop.
    pub fn pixel_stage<'a>(&'a self, frame: &'a FrameInputs, environment: &'a CubeMap) -> PixelStage<'a> {
        PixelStage::new(&self.bvh, &self.material, &self.object, frame, environment)
    }

    pub fn material(&self) -> &DiamondMaterial {
        &self.material
    }

    pub fn mesh(&self) -> &PreparedMesh {
        &self.mesh
    }

    pub fn bvh(&self) -> &MeshBvh {
        &self.bvh
    }

    /// Bounds of the gem in world space, empty for an empty mesh.
    pub fn world_bounds(&self) -> Aabb {
        if self.bvh.is_empty() {
            return Aabb::EMPTY;
        }
        self.object.model.transform_aabb(&self.bvh.bounds())
    }

    pub fn transform(&self) -> &ObjectTransform {
        &self.object
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }
}
