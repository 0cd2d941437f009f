//! Bucket-based tile rendering.
//!
//! Divides the image into tiles (buckets) that can be rendered
//! independently and in parallel using rayon.

use gem_math::Vec2;

use crate::renderer::{Color, TraceBuffer};
use crate::shading::{PixelStage, PixelTrace, VertexOutput};

/// A rectangular region of the image to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucket {
    /// X coordinate of bucket's top-left corner
    pub x: u32,
    /// Y coordinate of bucket's top-left corner
    pub y: u32,
    /// Width of the bucket in pixels
    pub width: u32,
    /// Height of the bucket in pixels
    pub height: u32,
    /// Index of this bucket in the render order
    pub index: usize,
}

impl Bucket {
    /// Create a new bucket.
    pub fn new(x: u32, y: u32, width: u32, height: u32, index: usize) -> Self {
        Self { x, y, width, height, index }
    }

    /// Get the total number of pixels in this bucket.
    pub fn pixel_count(&self) -> u32 {
        self.width * self.height
    }

    /// Global pixel coordinates in row-major order.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        (0..self.height).flat_map(move |ly| (0..self.width).map(move |lx| (self.x + lx, self.y + ly)))
    }
}

/// Default bucket size in pixels.
pub const DEFAULT_BUCKET_SIZE: u32 = 64;

/// Generate buckets for an image, sorted in spiral order from center.
///
/// Buckets are rendered from the center outward so the gem, usually
/// framed in the middle, finishes first.
pub fn generate_buckets(width: u32, height: u32, bucket_size: u32) -> Vec<Bucket> {
    let bucket_size = bucket_size.max(1);
    let mut buckets = Vec::new();
    let mut index = 0;

    // Generate grid of buckets
    let mut y = 0;
    while y < height {
        let mut x = 0;
        while x < width {
            let bw = bucket_size.min(width - x);
            let bh = bucket_size.min(height - y);
            buckets.push(Bucket::new(x, y, bw, bh, index));
            index += 1;
            x += bucket_size;
        }
        y += bucket_size;
    }

    // Sort by distance from center (spiral order)
    sort_spiral(&mut buckets, width, height);

    // Update indices after sorting
    for (i, bucket) in buckets.iter_mut().enumerate() {
        bucket.index = i;
    }

    buckets
}

/// Sort buckets by distance from image center (spiral order).
fn sort_spiral(buckets: &mut [Bucket], width: u32, height: u32) {
    let center_x = width as f32 / 2.0;
    let center_y = height as f32 / 2.0;

    buckets.sort_by(|a, b| {
        let a_center_x = a.x as f32 + a.width as f32 / 2.0;
        let a_center_y = a.y as f32 + a.height as f32 / 2.0;
        let b_center_x = b.x as f32 + b.width as f32 / 2.0;
        let b_center_y = b.y as f32 + b.height as f32 / 2.0;

        let a_dist = (a_center_x - center_x).powi(2) + (a_center_y - center_y).powi(2);
        let b_dist = (b_center_x - center_x).powi(2) + (b_center_y - center_y).powi(2);

        a_dist.partial_cmp(&b_dist).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// First pass over a bucket: resolve coverage and trace exit directions.
///
/// Returns one entry per pixel in row-major order, `None` where the gem
/// does not cover the pixel.
pub fn trace_bucket(bucket: &Bucket, stage: &PixelStage, vertices: &[VertexOutput]) -> Vec<Option<PixelTrace>> {
    bucket
        .pixels()
        .map(|(x, y)| {
            let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            stage
                .cover(center, vertices)
                .map(|fragment| stage.trace(&fragment))
        })
        .collect()
}

/// Second pass over a bucket: sample the environment with gradients taken
/// from the neighbouring traces.
pub fn shade_bucket(bucket: &Bucket, stage: &PixelStage, traces: &TraceBuffer, clear_color: Color) -> Vec<Color> {
    bucket
        .pixels()
        .map(|(x, y)| match traces.get(x, y) {
            Some(trace) => {
                let gradients = traces.gradients(x, y, |t| stage.gradient_source(t));
                stage.resolve(trace, &gradients)
            }
            None => clear_color,
        })
        .collect()
}

/// Result of rendering a bucket.
#[derive(Debug, Clone)]
pub struct BucketResult<T> {
    /// The bucket that was rendered
    pub bucket: Bucket,
    /// Per-pixel values in row-major order
    pub pixels: Vec<T>,
}

impl<T> BucketResult<T> {
    /// Create a new bucket result.
    pub fn new(bucket: Bucket, pixels: Vec<T>) -> Self {
        Self { bucket, pixels }
    }
}
