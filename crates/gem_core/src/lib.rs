//! Gem Core - geometry, model and environment inputs for the gem renderer.
//!
//! This crate provides:
//!
//! - **Mesh preparation**: `Mesh` (indexed or not) flattened into a
//!   non-indexed `PreparedMesh` ready for BVH leaf storage
//! - **Tagged models**: `Model` nodes carry a typed `MeshRole`, so the gem
//!   is resolved once by role instead of by name
//! - **Environment**: `CubeMap` with a mip chain and gradient sampling
//! - **Camera**: perspective camera producing the per-frame matrices
//!
//! # Example
//!
//! ```ignore
//! use gem_core::{Mesh, MeshRole, Model, Transform};
//!
//! let mut model = Model::new("diamond");
//! model.add_node("gem", MeshRole::Gem, Mesh::brilliant_cut(16), Transform::default());
//! let (prepared, model_matrix) = model.prepare_gem()?;
//! ```

pub mod camera;
pub mod cubemap;
pub mod mesh;
pub mod model;
mod primitives;

// Re-export commonly used types
pub use camera::Camera;
pub use cubemap::{srgb_to_linear, CubeFace, CubeMap, CubeMapError, CubeMapResult};
pub use mesh::{Mesh, PreparedMesh};
pub use model::{MeshRole, Model, ModelError, ModelNode, Transform};
