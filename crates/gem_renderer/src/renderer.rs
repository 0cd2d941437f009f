//! CPU frame renderer.
//!
//! Runs the pixel stage for every covered pixel in two passes:
//! - trace: coverage plus exit directions, per bucket in parallel;
//! - shade: environment lookups with gradients from neighbouring traces.
//!
//! Output is linear RGB; `ImageBuffer::to_rgba8` applies ACES filmic tone
//! mapping and sRGB encoding.

use std::path::Path;
use std::time::Instant;

use gem_core::srgb_to_linear;
use gem_math::{Mat3, Vec3};
use rayon::prelude::*;

use crate::bucket::{generate_buckets, shade_bucket, trace_bucket, Bucket, BucketResult, DEFAULT_BUCKET_SIZE};
use crate::shading::{Gradients, PixelStage, PixelTrace, VertexOutput};

/// Linear RGB color.
pub type Color = Vec3;

/// Render configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderConfig {
    /// Bucket edge length in pixels
    pub bucket_size: u32,
    /// Linear color of pixels the gem does not cover
    pub clear_color: Color,
    /// Tone mapping exposure
    pub exposure: f32,
    /// Render buckets on the rayon pool instead of the calling thread
    pub parallel: bool,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            bucket_size: DEFAULT_BUCKET_SIZE,
            clear_color: Color::splat(srgb_to_linear(0xf0 as f32 / 255.0)),
            exposure: 1.0,
            parallel: true,
        }
    }
}

impl RenderConfig {
    pub fn with_bucket_size(mut self, bucket_size: u32) -> Self {
        self.bucket_size = bucket_size;
        self
    }

    pub fn with_clear_color(mut self, clear_color: Color) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Per-pixel traces of a frame, shared read-only by the shading pass.
#[derive(Debug, Clone)]
pub struct TraceBuffer {
    width: u32,
    height: u32,
    traces: Vec<Option<PixelTrace>>,
}

impl TraceBuffer {
    /// An empty buffer (nothing covered).
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            traces: vec![None; (width * height) as usize],
        }
    }

    /// Trace of the pixel at (x, y), `None` when uncovered or outside.
    pub fn get(&self, x: u32, y: u32) -> Option<&PixelTrace> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.traces[(y * self.width + x) as usize].as_ref()
    }

    pub fn set(&mut self, x: u32, y: u32, trace: Option<PixelTrace>) {
        self.traces[(y * self.width + x) as usize] = trace;
    }

    /// Number of covered pixels.
    pub fn covered(&self) -> usize {
        self.traces.iter().filter(|t| t.is_some()).count()
    }

    /// Screen-space derivatives of `source` at (x, y).
    ///
    /// Forward differences against the right and lower neighbours, backward
    /// on the last column or row. An axis whose neighbour is uncovered
    /// gets a zero derivative.
    pub fn gradients<F>(&self, x: u32, y: u32, source: F) -> Gradients
    where
        F: Fn(&PixelTrace) -> Vec3,
    {
        let Some(center) = self.get(x, y) else {
            return Gradients::ZERO;
        };
        let c = source(center);

        let difference = |forward: Option<(u32, u32)>, backward: Option<(u32, u32)>| -> Vec3 {
            let delta = match (forward, backward) {
                (Some((nx, ny)), _) => self.get(nx, ny).map(|n| source(n) - c),
                (None, Some((nx, ny))) => self.get(nx, ny).map(|n| c - source(n)),
                (None, None) => None,
            };
            delta.unwrap_or(Vec3::ZERO)
        };

        let ddx = difference(
            (x + 1 < self.width).then(|| (x + 1, y)),
            (x > 0).then(|| (x - 1, y)),
        );
        let ddy = difference(
            (y + 1 < self.height).then(|| (x, y + 1)),
            (y > 0).then(|| (x, y - 1)),
        );

        Gradients { ddx, ddy }
    }

    fn scatter(&mut self, result: BucketResult<Option<PixelTrace>>) {
        for ((x, y), trace) in result.bucket.pixels().zip(result.pixels) {
            self.set(x, y, trace);
        }
    }
}

/// Simple image buffer for storing render output.
#[derive(Debug, Clone)]
pub struct ImageBuffer {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<Color>,
}

impl ImageBuffer {
    /// Create a new image buffer filled with black.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Color::ZERO)
    }

    /// Create a new image buffer filled with `color`.
    pub fn filled(width: u32, height: u32, color: Color) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; (width * height) as usize],
        }
    }

    /// Get the pixel at (x, y).
    pub fn get(&self, x: u32, y: u32) -> Color {
        self.pixels[(y * self.width + x) as usize]
    }

    /// Set the pixel at (x, y).
    pub fn set(&mut self, x: u32, y: u32, color: Color) {
        self.pixels[(y * self.width + x) as usize] = color;
    }

    /// Tone map and encode to 8-bit sRGB RGBA bytes.
    pub fn to_rgba8(&self, exposure: f32) -> Vec<u8> {
        let rgba: Vec<[u8; 4]> = self
            .pixels
            .par_iter()
            .map(|&color| color_to_rgba(aces_filmic(color, exposure)))
            .collect();
        bytemuck::cast_slice(&rgba).to_vec()
    }

    /// Write a PNG.
    pub fn save_png(&self, path: impl AsRef<Path>, exposure: f32) -> image::ImageResult<()> {
        image::save_buffer(
            path,
            &self.to_rgba8(exposure),
            self.width,
            self.height,
            image::ColorType::Rgba8,
        )
    }

    fn scatter(&mut self, result: BucketResult<Color>) {
        for ((x, y), color) in result.bucket.pixels().zip(result.pixels) {
            self.set(x, y, color);
        }
    }
}

/// ACES filmic tone mapping (RRT + ODT fit), linear in, display-linear out.
pub fn aces_filmic(color: Color, exposure: f32) -> Color {
    // sRGB => XYZ => D65_2_D60 => AP1 => RRT_SAT
    const INPUT: Mat3 = Mat3::from_cols_array(&[
        0.59719, 0.07600, 0.02840, 0.35458, 0.90834, 0.13383, 0.04823, 0.01566, 0.83777,
    ]);
    // ODT_SAT => XYZ => D60_2_D65 => sRGB
    const OUTPUT: Mat3 = Mat3::from_cols_array(&[
        1.60475, -0.10208, -0.00327, -0.53108, 1.10813, -0.07276, -0.07367, -0.00605, 1.07602,
    ]);

    let v = INPUT * (color * exposure / 0.6);
    let a = v * (v + 0.0245786) - 0.000090537;
    let b = v * (0.983729 * v + 0.4329510) + 0.238081;
    (OUTPUT * (a / b)).clamp(Color::ZERO, Color::ONE)
}

/// Encode a linear channel value with the sRGB transfer curve.
#[inline]
pub fn linear_to_srgb(linear: f32) -> f32 {
    if linear <= 0.0031308 {
        linear.max(0.0) * 12.92
    } else {
        1.055 * linear.powf(1.0 / 2.4) - 0.055
    }
}

/// Clamp a value to [0, 1] range.
#[inline]
pub fn clamp_01(x: f32) -> f32 {
    x.clamp(0.0, 1.0)
}

/// Convert a display-linear color to 8-bit sRGB RGBA.
pub fn color_to_rgba(color: Color) -> [u8; 4] {
    let encode = |c: f32| (255.0 * clamp_01(linear_to_srgb(c)) + 0.5) as u8;
    [encode(color.x), encode(color.y), encode(color.z), 255]
}

/// Render one frame of the gem.
///
/// `vertices` are the vertex stage outputs for the mesh the stage's BVH
/// was built from.
pub fn render_frame(stage: &PixelStage, vertices: &[VertexOutput], config: &RenderConfig) -> ImageBuffer {
    let start = Instant::now();
    let width = stage.frame.resolution.x;
    let height = stage.frame.resolution.y;
    let buckets = generate_buckets(width, height, config.bucket_size);

    let trace = |bucket: &Bucket| BucketResult::new(*bucket, trace_bucket(bucket, stage, vertices));
    let traced: Vec<_> = if config.parallel {
        buckets.par_iter().map(trace).collect()
    } else {
        buckets.iter().map(trace).collect()
    };

    let mut traces = TraceBuffer::new(width, height);
    for result in traced {
        traces.scatter(result);
    }

    let shade = |bucket: &Bucket| BucketResult::new(*bucket, shade_bucket(bucket, stage, &traces, config.clear_color));
    let shaded: Vec<_> = if config.parallel {
        buckets.par_iter().map(shade).collect()
    } else {
        buckets.iter().map(shade).collect()
    };

    let mut image = ImageBuffer::filled(width, height, config.clear_color);
    for result in shaded {
        image.scatter(result);
    }

    log::info!(
        "Rendered {}x{} frame: {} buckets, {} covered pixels in {:.2?}",
        width,
        height,
        buckets.len(),
        traces.covered(),
        start.elapsed()
    );

    image
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::{BuildStrategy, MeshBvh};
    use crate::frame::FrameInputs;
    use crate::material::DiamondMaterial;
    use crate::shading::{vertex_stage, ObjectTransform, TracedDirections};
    use gem_core::{Camera, CubeMap, Mesh};

    fn trace_with(dir: Vec3) -> Option<PixelTrace> {
        Some(PixelTrace {
            reference: dir,
            directions: TracedDirections::Single(dir),
            view_dot: -1.0,
        })
    }

    #[test]
    fn test_gradients_forward_backward() {
        let mut buffer = TraceBuffer::new(3, 2);
        for y in 0..2 {
            for x in 0..3 {
                buffer.set(x, y, trace_with(Vec3::new(x as f32, 10.0 * y as f32, 0.0)));
            }
        }
        let source = |t: &PixelTrace| t.reference;

        // Interior: forward differences
        let g = buffer.gradients(0, 0, source);
        assert_eq!(g.ddx, Vec3::X);
        assert_eq!(g.ddy, Vec3::new(0.0, 10.0, 0.0));

        // Last column and row: backward differences
        let g = buffer.gradients(2, 1, source);
        assert_eq!(g.ddx, Vec3::X);
        assert_eq!(g.ddy, Vec3::new(0.0, 10.0, 0.0));
    }

    #[test]
    fn test_gradients_uncovered_neighbour() {
        let mut buffer = TraceBuffer::new(2, 2);
        buffer.set(0, 0, trace_with(Vec3::X));
        buffer.set(0, 1, trace_with(Vec3::Y));

        let g = buffer.gradients(0, 0, |t| t.reference);
        assert_eq!(g.ddx, Vec3::ZERO);
        assert_eq!(g.ddy, Vec3::Y - Vec3::X);
        assert_eq!(buffer.gradients(1, 1, |t| t.reference), Gradients::ZERO);
        assert_eq!(buffer.covered(), 2);
    }

    #[test]
    fn test_aces_range() {
        assert_eq!(aces_filmic(Color::ZERO, 1.0).max_element(), 0.0);
        let bright = aces_filmic(Color::splat(100.0), 1.0);
        assert!(bright.min_element() > 0.95 && bright.max_element() <= 1.0);

        // Monotonic in exposure
        let low = aces_filmic(Color::splat(0.5), 0.5);
        let high = aces_filmic(Color::splat(0.5), 2.0);
        assert!(high.x > low.x);
    }

    #[test]
    fn test_srgb_roundtrip_and_bytes() {
        for v in [0.0, 0.002, 0.2, 0.5, 1.0] {
            assert!((srgb_to_linear(linear_to_srgb(v)) - v).abs() < 1e-5);
        }
        assert_eq!(color_to_rgba(Color::ZERO), [0, 0, 0, 255]);
        assert_eq!(color_to_rgba(Color::ONE), [255, 255, 255, 255]);
    }

    #[test]
    fn test_to_rgba8_layout() {
        let mut image = ImageBuffer::new(2, 1);
        image.set(1, 0, Color::splat(100.0));
        let bytes = image.to_rgba8(1.0);
        assert_eq!(bytes.len(), 8);
        assert_eq!(&bytes[0..4], &[0, 0, 0, 255]);
        assert!(bytes[4] > 240 && bytes[7] == 255);
    }

    #[test]
    fn test_clear_color_default() {
        let config = RenderConfig::default();
        let [r, g, b, _] = color_to_rgba(config.clear_color);
        assert_eq!((r, g, b), (0xf0, 0xf0, 0xf0));
    }

    #[test]
    fn test_render_frame_cube() {
        let _ = env_logger::builder().is_test(true).try_init();

        let mesh = Mesh::unit_cube().to_non_indexed();
        let bvh = MeshBvh::build(&mesh, BuildStrategy::Sah);
        let material = DiamondMaterial::default();
        let object = ObjectTransform::default();
        let camera = Camera::new(Vec3::new(0.0, 0.5, 3.0), Vec3::ZERO, 1.0);
        let frame = FrameInputs::from_camera(&camera, 48, 32);
        let environment = CubeMap::procedural_studio(32).unwrap();
        let stage = PixelStage::new(&bvh, &material, &object, &frame, &environment);

        let vertices = vertex_stage(&mesh, &object, &frame);
        let config = RenderConfig::default().with_bucket_size(16);
        let image = render_frame(&stage, &vertices, &config);

        assert_eq!((image.width, image.height), (48, 32));
        // Corner is background, center is the gem
        assert_eq!(image.get(0, 0), config.clear_color);
        assert_ne!(image.get(24, 16), config.clear_color);

        // Serial and parallel renders agree
        let serial = render_frame(&stage, &vertices, &config.clone().with_parallel(false));
        assert_eq!(serial.pixels, image.pixels);
    }
}
