//! Optics helpers with shading-language semantics.
//!
//! `refract` and `reflect` follow the GLSL built-ins exactly, including the
//! zero-vector result of `refract` under total internal reflection, so the
//! CPU pipeline makes the same decisions a fragment shader would.

use crate::Vec3;

/// Refract incident direction `i` through a surface with normal `n`.
///
/// `eta` is the ratio of indices (incident / transmitted). Both `i` and `n`
/// are expected to be unit length. Returns `Vec3::ZERO` when the angle is
/// past the critical angle.
#[inline]
pub fn refract(i: Vec3, n: Vec3, eta: f32) -> Vec3 {
    let cos_i = n.dot(i);
    let k = 1.0 - eta * eta * (1.0 - cos_i * cos_i);
    if k < 0.0 {
        Vec3::ZERO
    } else {
        eta * i - (eta * cos_i + k.sqrt()) * n
    }
}

/// Reflect incident direction `i` about normal `n`.
#[inline]
pub fn reflect(i: Vec3, n: Vec3) -> Vec3 {
    i - 2.0 * n.dot(i) * n
}

/// True when a refraction result is the zero vector (total internal reflection).
#[inline]
pub fn is_degenerate(v: Vec3) -> bool {
    v.length_squared() == 0.0
}

/// Step function: `0.0` when `x < edge`, otherwise `1.0`.
#[inline]
pub fn step(edge: f32, x: f32) -> f32 {
    if x < edge {
        0.0
    } else {
        1.0
    }
}

/// Linear blend from `a` to `b` by `t`.
#[inline]
pub fn mix(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    a * (1.0 - t) + b * t
}
