//! Gem renderer - refractive diamond shading
//!
//! Traces view rays through a faceted gem: refraction at the entry face,
//! total internal reflection against a mesh BVH, and environment lookups
//! along the exit direction with fresnel and mirror blending.
//!
//! The pipeline runs on the CPU, bucket by bucket on the rayon pool.

mod bucket;
mod bvh;
mod diamond;
mod frame;
mod material;
mod renderer;
mod shading;
mod triangle;

pub use bucket::{generate_buckets, shade_bucket, trace_bucket, Bucket, BucketResult, DEFAULT_BUCKET_SIZE};
pub use bvh::{BuildStrategy, GpuBvhNode, Intersection, MeshBvh};
pub use diamond::Diamond;
pub use frame::FrameInputs;
pub use material::{DiamondMaterial, MaterialCommand, MaterialError, MaterialQueue, MaterialSender, MAX_BOUNCES};
pub use renderer::{
    aces_filmic, color_to_rgba, linear_to_srgb, render_frame, Color, ImageBuffer, RenderConfig, TraceBuffer,
};

pub use gem_core::srgb_to_linear;
pub use shading::{
    fresnel, reflection_mask, vertex_stage, Fragment, Gradients, ObjectTransform, PixelStage, PixelTrace,
    TracedDirections, VertexOutput,
};
pub use triangle::{intersect_triangle, TriangleHit};

/// Re-export Vec3 and common math types from gem_math
pub use gem_math::{Aabb, Interval, Ray, Vec3};
