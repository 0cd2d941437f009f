//! Environment cube map with a mip chain and explicit-gradient sampling.
//!
//! Faces are stored in linear RGB float. Sampling mirrors `textureGrad` on a
//! `samplerCube`: the caller supplies screen-space derivatives of the lookup
//! direction and the level of detail is derived from them, so a chaotic
//! lookup direction can be sampled with the footprint of a well-behaved one.

use std::path::Path;

use gem_math::Vec3;
use rayon::prelude::*;
use thiserror::Error;

/// Errors that can occur while building a cube map.
#[derive(Error, Debug)]
pub enum CubeMapError {
    #[error("Failed to load cube face: {0}")]
    LoadError(String),

    #[error("Image decoding error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("Cube face {face:?} is {width}x{height}, faces must be square")]
    NonSquareFace {
        face: CubeFace,
        width: u32,
        height: u32,
    },

    #[error("Cube face {face:?} has {actual} texels, expected {expected}")]
    FaceSizeMismatch {
        face: CubeFace,
        actual: usize,
        expected: usize,
    },

    #[error("Cube map faces must be at least 1x1")]
    ZeroSize,
}

pub type CubeMapResult<T> = Result<T, CubeMapError>;

/// Cube face, in the conventional +X, -X, +Y, -Y, +Z, -Z storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CubeFace {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::PosX,
        CubeFace::NegX,
        CubeFace::PosY,
        CubeFace::NegY,
        CubeFace::PosZ,
        CubeFace::NegZ,
    ];

    /// Storage index of this face.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Face hit by a direction, chosen by its major axis.
    pub fn from_direction(dir: Vec3) -> Self {
        let a = dir.abs();
        if a.x >= a.y && a.x >= a.z {
            if dir.x >= 0.0 {
                CubeFace::PosX
            } else {
                CubeFace::NegX
            }
        } else if a.y >= a.z {
            if dir.y >= 0.0 {
                CubeFace::PosY
            } else {
                CubeFace::NegY
            }
        } else if dir.z >= 0.0 {
            CubeFace::PosZ
        } else {
            CubeFace::NegZ
        }
    }

    /// Face-local (s, t, major) coordinates of a direction.
    #[inline]
    fn project(self, d: Vec3) -> (f32, f32, f32) {
        match self {
            CubeFace::PosX => (-d.z, -d.y, d.x),
            CubeFace::NegX => (d.z, -d.y, -d.x),
            CubeFace::PosY => (d.x, d.z, d.y),
            CubeFace::NegY => (d.x, -d.z, -d.y),
            CubeFace::PosZ => (d.x, -d.y, d.z),
            CubeFace::NegZ => (-d.x, -d.y, -d.z),
        }
    }

    /// Normalized [0, 1] texture coordinates of `d` on this face.
    #[inline]
    fn uv(self, d: Vec3) -> (f32, f32) {
        let (s, t, major) = self.project(d);
        let major = major.abs().max(1e-8);
        ((s / major + 1.0) * 0.5, (t / major + 1.0) * 0.5)
    }

    /// Direction through the given face coordinates, inverse of `uv`.
    fn direction(self, u: f32, v: f32) -> Vec3 {
        let s = u * 2.0 - 1.0;
        let t = v * 2.0 - 1.0;
        let d = match self {
            CubeFace::PosX => Vec3::new(1.0, -t, -s),
            CubeFace::NegX => Vec3::new(-1.0, -t, s),
            CubeFace::PosY => Vec3::new(s, 1.0, t),
            CubeFace::NegY => Vec3::new(s, -1.0, -t),
            CubeFace::PosZ => Vec3::new(s, -t, 1.0),
            CubeFace::NegZ => Vec3::new(-s, -t, -1.0),
        };
        d.normalize()
    }
}

/// One level of the mip chain: six square faces of `size` x `size` texels.
#[derive(Clone, Debug)]
struct MipLevel {
    size: u32,
    faces: [Vec<Vec3>; 6],
}

impl MipLevel {
    #[inline]
    fn texel(&self, face: usize, x: u32, y: u32) -> Vec3 {
        self.faces[face][(y * self.size + x) as usize]
    }

    /// Bilinear lookup, clamped to the face edges.
    fn sample(&self, face: CubeFace, u: f32, v: f32) -> Vec3 {
        let size = self.size as f32;
        let x = (u * size - 0.5).clamp(0.0, size - 1.0);
        let y = (v * size - 0.5).clamp(0.0, size - 1.0);

        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.size - 1);
        let y1 = (y0 + 1).min(self.size - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;

        let f = face.index();
        let top = self.texel(f, x0, y0) * (1.0 - fx) + self.texel(f, x1, y0) * fx;
        let bottom = self.texel(f, x0, y1) * (1.0 - fx) + self.texel(f, x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }

    /// 2x2 box-filtered next level.
    fn downsample(&self) -> MipLevel {
        let size = (self.size / 2).max(1);
        let src = self.size;
        let faces: Vec<Vec<Vec3>> = (0..6)
            .into_par_iter()
            .map(|f| {
                let mut out = Vec::with_capacity((size * size) as usize);
                for y in 0..size {
                    for x in 0..size {
                        let sx = (x * 2).min(src - 1);
                        let sy = (y * 2).min(src - 1);
                        let sx1 = (sx + 1).min(src - 1);
                        let sy1 = (sy + 1).min(src - 1);
                        let sum = self.texel(f, sx, sy)
                            + self.texel(f, sx1, sy)
                            + self.texel(f, sx, sy1)
                            + self.texel(f, sx1, sy1);
                        out.push(sum * 0.25);
                    }
                }
                out
            })
            .collect();

        MipLevel {
            size,
            faces: faces_array(faces),
        }
    }
}

fn faces_array(faces: Vec<Vec<Vec3>>) -> [Vec<Vec3>; 6] {
    let mut iter = faces.into_iter();
    std::array::from_fn(|_| iter.next().unwrap_or_default())
}

/// A six-faced environment map with a full mip chain.
#[derive(Clone, Debug)]
pub struct CubeMap {
    levels: Vec<MipLevel>,
}

impl CubeMap {
    /// Build from six square faces of `size` x `size` linear RGB texels,
    /// ordered +X, -X, +Y, -Y, +Z, -Z, rows top to bottom.
    pub fn from_faces(size: u32, faces: [Vec<Vec3>; 6]) -> CubeMapResult<Self> {
        if size == 0 {
            return Err(CubeMapError::ZeroSize);
        }
        let expected = (size * size) as usize;
        for (face, texels) in CubeFace::ALL.iter().zip(faces.iter()) {
            if texels.len() != expected {
                return Err(CubeMapError::FaceSizeMismatch {
                    face: *face,
                    actual: texels.len(),
                    expected,
                });
            }
        }

        let mut levels = vec![MipLevel { size, faces }];
        while let Some(last) = levels.last() {
            if last.size == 1 {
                break;
            }
            let next = last.downsample();
            levels.push(next);
        }

        log::debug!("Built cube map: {}px faces, {} mip levels", size, levels.len());
        Ok(Self { levels })
    }

    /// Build by evaluating a radiance function at every texel center.
    pub fn from_fn<F>(size: u32, radiance: F) -> CubeMapResult<Self>
    where
        F: Fn(Vec3) -> Vec3 + Sync,
    {
        if size == 0 {
            return Err(CubeMapError::ZeroSize);
        }
        let faces: Vec<Vec<Vec3>> = CubeFace::ALL
            .par_iter()
            .map(|face| {
                let mut texels = Vec::with_capacity((size * size) as usize);
                for y in 0..size {
                    for x in 0..size {
                        let u = (x as f32 + 0.5) / size as f32;
                        let v = (y as f32 + 0.5) / size as f32;
                        texels.push(radiance(face.direction(u, v)));
                    }
                }
                texels
            })
            .collect();

        Self::from_faces(size, faces_array(faces))
    }

    /// Single-color environment.
    pub fn uniform(color: Vec3) -> Self {
        Self {
            levels: vec![MipLevel {
                size: 1,
                faces: std::array::from_fn(|_| vec![color]),
            }],
        }
    }

    /// Synthetic photo-studio environment: dim floor, soft sky gradient and
    /// a handful of bright HDR softboxes for the gem to sparkle against.
    pub fn procedural_studio(size: u32) -> CubeMapResult<Self> {
        let softboxes = [
            (Vec3::new(0.3, 1.0, 0.2).normalize(), 6.0),
            (Vec3::new(-1.0, 0.4, 0.3).normalize(), 4.0),
            (Vec3::new(0.8, 0.2, -0.9).normalize(), 3.5),
            (Vec3::new(-0.2, 0.5, -1.0).normalize(), 5.0),
        ];
        let cos_radius = 14.0_f32.to_radians().cos();

        Self::from_fn(size, |dir| {
            let t = (dir.y * 0.5 + 0.5).clamp(0.0, 1.0);
            let floor = Vec3::splat(0.08);
            let sky = Vec3::new(0.55, 0.6, 0.7);
            let mut color = floor * (1.0 - t) + sky * t;
            for (axis, intensity) in softboxes {
                if dir.dot(axis) > cos_radius {
                    color += Vec3::splat(intensity);
                }
            }
            color
        })
    }

    /// Decode six image files (+X, -X, +Y, -Y, +Z, -Z) into a cube map.
    ///
    /// 8-bit images are treated as sRGB and converted to linear.
    pub fn load_faces<P: AsRef<Path>>(paths: [P; 6]) -> CubeMapResult<Self> {
        let mut faces = Vec::with_capacity(6);
        let mut size = None;

        for (face, path) in CubeFace::ALL.iter().zip(paths.iter()) {
            let path = path.as_ref();
            let img = image::open(path).map_err(|e| {
                CubeMapError::LoadError(format!("Failed to open {}: {}", path.display(), e))
            })?;

            let rgba = img.to_rgba8();
            let (width, height) = rgba.dimensions();
            if width != height {
                return Err(CubeMapError::NonSquareFace {
                    face: *face,
                    width,
                    height,
                });
            }
            let expected = *size.get_or_insert(width);
            if width != expected {
                return Err(CubeMapError::FaceSizeMismatch {
                    face: *face,
                    actual: (width * height) as usize,
                    expected: (expected * expected) as usize,
                });
            }

            faces.push(
                rgba.pixels()
                    .map(|p| {
                        Vec3::new(
                            srgb_byte_to_linear(p[0]),
                            srgb_byte_to_linear(p[1]),
                            srgb_byte_to_linear(p[2]),
                        )
                    })
                    .collect(),
            );
            log::debug!("Loaded cube face {:?} from {} ({}px)", face, path.display(), width);
        }

        Self::from_faces(size.unwrap_or(0), faces_array(faces))
    }

    /// Edge length of the base level in texels.
    pub fn face_size(&self) -> u32 {
        self.levels[0].size
    }

    /// Number of mip levels, including the base level.
    pub fn mip_count(&self) -> usize {
        self.levels.len()
    }

    /// Get total size in bytes (approximate).
    pub fn size_bytes(&self) -> usize {
        self.levels
            .iter()
            .map(|l| 6 * l.faces[0].len() * std::mem::size_of::<Vec3>())
            .sum()
    }

    /// Bilinear lookup on the base level.
    pub fn sample(&self, dir: Vec3) -> Vec3 {
        self.sample_level(dir, 0.0)
    }

    /// Trilinear lookup at an explicit level of detail.
    pub fn sample_level(&self, dir: Vec3, lod: f32) -> Vec3 {
        let face = CubeFace::from_direction(dir);
        let (u, v) = face.uv(dir);

        let max_level = (self.levels.len() - 1) as f32;
        let lod = if lod.is_finite() { lod.clamp(0.0, max_level) } else { 0.0 };
        let lower = lod.floor() as usize;
        let upper = lod.ceil() as usize;
        let frac = lod - lower as f32;

        let a = self.levels[lower].sample(face, u, v);
        if upper == lower {
            return a;
        }
        let b = self.levels[upper].sample(face, u, v);
        a * (1.0 - frac) + b * frac
    }

    /// Level of detail for a lookup direction with the given screen-space
    /// derivatives of the direction that drives filtering.
    pub fn lod_for_gradients(&self, dir: Vec3, ddx: Vec3, ddy: Vec3) -> f32 {
        let face = CubeFace::from_direction(dir);
        let (u, v) = face.uv(dir);
        let size = self.face_size() as f32;

        let footprint = |delta: Vec3| -> f32 {
            let (du, dv) = face.uv(dir + delta);
            ((du - u) * size).hypot((dv - v) * size)
        };

        let rho = footprint(ddx).max(footprint(ddy));
        if rho <= 0.0 || !rho.is_finite() {
            0.0
        } else {
            rho.log2().max(0.0)
        }
    }

    /// Sample along `dir` with the level of detail derived from the
    /// screen-space derivatives `ddx`/`ddy` (the `textureGrad` contract).
    ///
    /// The derivatives may belong to a different direction than `dir`; the
    /// footprint is measured at `dir` on the face it selects.
    pub fn sample_grad(&self, dir: Vec3, ddx: Vec3, ddy: Vec3) -> Vec3 {
        let lod = self.lod_for_gradients(dir, ddx, ddy);
        self.sample_level(dir, lod)
    }
}

/// Decode an sRGB-encoded channel value in [0, 1] to linear.
#[inline]
pub fn srgb_to_linear(encoded: f32) -> f32 {
    if encoded <= 0.04045 {
        encoded / 12.92
    } else {
        ((encoded + 0.055) / 1.055).powf(2.4)
    }
}

#[inline]
fn srgb_byte_to_linear(value: u8) -> f32 {
    srgb_to_linear(value as f32 / 255.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Each face filled with a distinct solid color.
    fn face_colored(size: u32) -> CubeMap {
        let colors = [
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, 1.0, 0.0),
            Vec3::new(0.0, 0.0, 1.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(0.0, 1.0, 1.0),
            Vec3::new(1.0, 0.0, 1.0),
        ];
        let faces = std::array::from_fn(|i| vec![colors[i]; (size * size) as usize]);
        CubeMap::from_faces(size, faces).unwrap()
    }

    #[test]
    fn test_face_selection() {
        assert_eq!(CubeFace::from_direction(Vec3::new(2.0, 1.0, -1.0)), CubeFace::PosX);
        assert_eq!(CubeFace::from_direction(Vec3::new(0.0, -3.0, 1.0)), CubeFace::NegY);
        assert_eq!(CubeFace::from_direction(Vec3::new(0.1, 0.2, -0.9)), CubeFace::NegZ);
    }

    #[test]
    fn test_face_uv_roundtrip() {
        for face in CubeFace::ALL {
            let d = face.direction(0.25, 0.8);
            assert_eq!(CubeFace::from_direction(d), face);
            let (u, v) = face.uv(d);
            assert!((u - 0.25).abs() < 1e-5, "{:?} u={}", face, u);
            assert!((v - 0.8).abs() < 1e-5, "{:?} v={}", face, v);
        }
    }

    #[test]
    fn test_sample_solid_faces() {
        let map = face_colored(4);
        assert_eq!(map.sample(Vec3::X), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(map.sample(Vec3::NEG_Y), Vec3::new(1.0, 1.0, 0.0));
        assert_eq!(map.sample(Vec3::NEG_Z), Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_mip_chain() {
        let map = face_colored(16);
        assert_eq!(map.mip_count(), 5); // 16, 8, 4, 2, 1
        // Box filtering a solid face keeps the color at every level
        assert!((map.sample_level(Vec3::Z, 4.0) - Vec3::new(0.0, 1.0, 1.0)).length() < 1e-6);
    }

    #[test]
    fn test_mip_chain_odd_size() {
        let map = face_colored(5);
        assert_eq!(map.face_size(), 5);
        assert_eq!(map.mip_count(), 3); // 5, 2, 1
    }

    #[test]
    fn test_lod_from_gradients() {
        let map = face_colored(256);
        let dir = Vec3::Z;

        // Zero derivatives select the base level
        assert_eq!(map.lod_for_gradients(dir, Vec3::ZERO, Vec3::ZERO), 0.0);

        // One texel per pixel is still the base level, wider footprints climb
        let texel = 2.0 / 256.0;
        let one = map.lod_for_gradients(dir, Vec3::new(texel, 0.0, 0.0), Vec3::ZERO);
        let eight = map.lod_for_gradients(dir, Vec3::new(8.0 * texel, 0.0, 0.0), Vec3::ZERO);
        assert!(one.abs() < 0.01);
        assert!((eight - 3.0).abs() < 0.05);
    }

    #[test]
    fn test_sample_grad_blurs_with_footprint() {
        // Half the +Z face bright, half dark
        let size = 64;
        let map = CubeMap::from_fn(size, |d| {
            if d.z > 0.5 && d.x > 0.0 {
                Vec3::ONE
            } else {
                Vec3::ZERO
            }
        })
        .unwrap();

        let dir = Vec3::new(0.05, 0.0, 1.0).normalize();
        let sharp = map.sample_grad(dir, Vec3::ZERO, Vec3::ZERO);
        let blurred = map.sample_grad(dir, Vec3::new(0.5, 0.0, 0.0), Vec3::ZERO);

        assert!((sharp.x - 1.0).abs() < 1e-3);
        assert!(blurred.x < sharp.x);
    }

    #[test]
    fn test_from_faces_validates_size() {
        let faces = std::array::from_fn(|_| vec![Vec3::ONE; 3]);
        let err = CubeMap::from_faces(2, faces).unwrap_err();
        assert!(matches!(
            err,
            CubeMapError::FaceSizeMismatch { face: CubeFace::PosX, actual: 3, expected: 4 }
        ));

        let empty: [Vec<Vec3>; 6] = Default::default();
        assert!(matches!(CubeMap::from_faces(0, empty), Err(CubeMapError::ZeroSize)));
    }

    #[test]
    fn test_uniform() {
        let map = CubeMap::uniform(Vec3::splat(0.5));
        assert_eq!(map.mip_count(), 1);
        assert_eq!(
            map.sample_grad(Vec3::new(0.3, -0.2, 0.9), Vec3::ONE, Vec3::ONE),
            Vec3::splat(0.5)
        );
    }

    #[test]
    fn test_procedural_studio_has_highlights() {
        let map = CubeMap::procedural_studio(32).unwrap();
        let up = map.sample(Vec3::new(0.3, 1.0, 0.2).normalize());
        let down = map.sample(Vec3::NEG_Y);
        assert!(up.x > 1.0, "softbox should be HDR");
        assert!(down.x < 0.2);
    }

    #[test]
    fn test_srgb_to_linear() {
        assert!((srgb_byte_to_linear(0) - 0.0).abs() < 0.001);
        assert!((srgb_byte_to_linear(255) - 1.0).abs() < 0.001);

        // Mid-gray is darker in linear
        let mid = srgb_byte_to_linear(128);
        assert!(mid < 0.5);
        assert!(mid > 0.1);
    }
}
