//! Loaded model representation with typed node roles.
//!
//! A loader assigns each mesh node a `MeshRole` when it builds the model.
//! The renderable gem is then found by role, once, during mesh preparation.

use std::sync::Arc;

use gem_math::{Mat4, Quat, Vec3};
use thiserror::Error;

use crate::mesh::{Mesh, PreparedMesh};

/// Errors resolving the gem inside a model.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModelError {
    #[error("Model '{0}' has no node tagged as the gem")]
    MissingGem(String),

    #[error("Model '{model}' has {count} nodes tagged as the gem, expected one")]
    MultipleGems { model: String, count: usize },
}

/// What a mesh node is for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MeshRole {
    /// The refractive gem rendered by the diamond pipeline.
    Gem,
    /// Metal setting or other opaque geometry around the gem.
    Setting,
    /// Anything else the loader found.
    Other,
}

/// Transform components that can be composed into a matrix.
#[derive(Clone, Debug, PartialEq)]
pub struct Transform {
    /// Translation
    pub translation: Vec3,

    /// Rotation (as quaternion)
    pub rotation: Quat,

    /// Scale
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    /// Create a new transform with only translation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Default::default()
        }
    }

    /// Convert to a 4x4 transformation matrix.
    ///
    /// Order: Scale -> Rotate -> Translate (SRT)
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }
}

/// A mesh node of a loaded model.
#[derive(Clone, Debug)]
pub struct ModelNode {
    /// Node name, kept for logging only
    pub name: String,

    /// Role assigned at load time
    pub role: MeshRole,

    /// Shared mesh geometry
    pub mesh: Arc<Mesh>,

    /// Local-to-world transform
    pub transform: Transform,
}

/// A loaded model: a flat list of tagged mesh nodes.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub name: String,
    pub nodes: Vec<ModelNode>,
}

impl Model {
    /// Create an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: Vec::new(),
        }
    }

    /// Add a node and return its index.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        role: MeshRole,
        mesh: Mesh,
        transform: Transform,
    ) -> usize {
        self.nodes.push(ModelNode {
            name: name.into(),
            role,
            mesh: Arc::new(mesh),
            transform,
        });
        self.nodes.len() - 1
    }

    /// Nodes carrying a given role.
    pub fn nodes_with_role(&self, role: MeshRole) -> impl Iterator<Item = &ModelNode> {
        self.nodes.iter().filter(move |node| node.role == role)
    }

    /// The single gem node.
    pub fn gem_node(&self) -> Result<&ModelNode, ModelError> {
        let mut gems = self.nodes_with_role(MeshRole::Gem);
        let first = gems
            .next()
            .ok_or_else(|| ModelError::MissingGem(self.name.clone()))?;

        let extra = gems.count();
        if extra > 0 {
            return Err(ModelError::MultipleGems {
                model: self.name.clone(),
                count: extra + 1,
            });
        }
        Ok(first)
    }

    /// Resolve the gem and flatten it for BVH construction.
    ///
    /// Returns the prepared mesh and the gem's object-to-world matrix.
    pub fn prepare_gem(&self) -> Result<(PreparedMesh, Mat4), ModelError> {
        let node = self.gem_node()?;
        log::debug!(
            "Preparing gem node '{}' from model '{}' ({} triangles)",
            node.name,
            self.name,
            node.mesh.triangle_count()
        );
        Ok((node.mesh.to_non_indexed(), node.transform.to_matrix()))
    }

    /// Total triangle count across all nodes.
    pub fn total_triangle_count(&self) -> usize {
        self.nodes.iter().map(|n| n.mesh.triangle_count()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_gem_by_role() {
        let mut model = Model::new("ring");
        // The setting's name mentions the gem; only the role matters
        model.add_node("diamond_prongs", MeshRole::Setting, Mesh::unit_cube(), Transform::default());
        model.add_node(
            "stone",
            MeshRole::Gem,
            Mesh::octahedron(),
            Transform::from_translation(Vec3::new(0.0, 2.0, 0.0)),
        );

        let (prepared, matrix) = model.prepare_gem().unwrap();
        assert_eq!(prepared.triangle_count(), 8);
        assert_eq!(matrix.transform_point3(Vec3::ZERO), Vec3::new(0.0, 2.0, 0.0));
        assert_eq!(model.total_triangle_count(), 20);
    }

    #[test]
    fn test_missing_gem() {
        let mut model = Model::new("empty_setting");
        model.add_node("prongs", MeshRole::Setting, Mesh::unit_cube(), Transform::default());

        assert_eq!(
            model.prepare_gem().unwrap_err(),
            ModelError::MissingGem("empty_setting".to_string())
        );
    }

    #[test]
    fn test_multiple_gems() {
        let mut model = Model::new("pair");
        model.add_node("a", MeshRole::Gem, Mesh::octahedron(), Transform::default());
        model.add_node("b", MeshRole::Gem, Mesh::octahedron(), Transform::default());

        assert!(matches!(
            model.gem_node(),
            Err(ModelError::MultipleGems { count: 2, .. })
        ));
    }

    #[test]
    fn test_transform_to_matrix_srt_order() {
        let transform = Transform {
            translation: Vec3::new(1.0, 2.0, 3.0),
            rotation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
            scale: Vec3::splat(2.0),
        };

        // Scaled, then rotated +X onto -Z, then translated
        let p = transform.to_matrix().transform_point3(Vec3::X);
        assert!((p - Vec3::new(1.0, 2.0, 1.0)).length() < 0.001);
    }
}
