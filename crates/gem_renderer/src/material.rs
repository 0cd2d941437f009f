//! Diamond material parameters and the queue that mutates them.
//!
//! Parameters are plain data read by every pixel of a frame. Changes are
//! sent as `MaterialCommand`s and only applied between frames, when the
//! owning `Diamond` drains its queue.

use std::sync::mpsc::{channel, Receiver, Sender};

use gem_math::Vec3;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hard cap on internal bounces per trace.
pub const MAX_BOUNCES: u32 = 16;

/// Errors reading or writing material presets.
#[derive(Error, Debug)]
pub enum MaterialError {
    #[error("Invalid material preset: {0}")]
    Json(#[from] serde_json::Error),
}

/// Shading parameters of the gem.
///
/// Serialized with camelCase keys, so a preset reads like
/// `{"indexOfRefraction": 2.42, "bounces": 4}`. Missing keys take defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DiamondMaterial {
    /// Index of refraction, clamped to >= 1.0 when used
    #[serde(rename = "indexOfRefraction")]
    pub ior: f32,
    /// Maximum internal bounces before the last reflection is kept
    pub bounces: u32,
    /// Multiplies the environment sample (linear RGB)
    pub base_color: Vec3,
    pub fresnel_strength: f32,
    pub fresnel_exponent: f32,
    pub reflection_strength: f32,
    pub reflection_threshold: f32,
    /// Use view-direction gradients for mip selection instead of the
    /// traced direction's own
    pub correct_mips: bool,
    /// Trace R, G and B with separate indices of refraction
    pub chromatic_aberration: bool,
    /// Relative IOR offset of the R and B traces
    pub aberration_strength: f32,
}

impl Default for DiamondMaterial {
    fn default() -> Self {
        Self {
            ior: 2.4,
            bounces: 3,
            base_color: Vec3::ONE,
            fresnel_strength: 1.0,
            fresnel_exponent: 20.0,
            reflection_strength: 0.2,
            reflection_threshold: 0.001,
            correct_mips: true,
            chromatic_aberration: false,
            aberration_strength: 0.01,
        }
    }
}

impl DiamondMaterial {
    /// Parse a JSON preset.
    pub fn from_json_str(json: &str) -> Result<Self, MaterialError> {
        let mut material: Self = serde_json::from_str(json)?;
        material.bounces = material.bounces.min(MAX_BOUNCES);
        Ok(material)
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json_string(&self) -> Result<String, MaterialError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Index of refraction as used by the shader: never below 1.0.
    #[inline]
    pub fn effective_ior(&self) -> f32 {
        self.ior.max(1.0)
    }

    /// Per-channel indices of refraction (R, G, B).
    ///
    /// All three are the effective IOR unless chromatic aberration is on.
    pub fn channel_iors(&self) -> [f32; 3] {
        let ior = self.effective_ior();
        if !self.chromatic_aberration {
            return [ior; 3];
        }
        let k = self.aberration_strength;
        [
            (self.ior * (1.0 - k)).max(1.0),
            ior,
            (self.ior * (1.0 + k)).max(1.0),
        ]
    }

    /// Apply one command.
    pub fn apply(&mut self, command: MaterialCommand) {
        match command {
            MaterialCommand::SetIor(ior) => self.ior = ior,
            MaterialCommand::SetBounces(bounces) => self.bounces = bounces.min(MAX_BOUNCES),
            MaterialCommand::SetBaseColor(color) => self.base_color = color,
            MaterialCommand::SetFresnelStrength(v) => self.fresnel_strength = v,
            MaterialCommand::SetFresnelExponent(v) => self.fresnel_exponent = v,
            MaterialCommand::SetReflectionStrength(v) => self.reflection_strength = v,
            MaterialCommand::SetReflectionThreshold(v) => self.reflection_threshold = v,
            MaterialCommand::SetCorrectMips(on) => self.correct_mips = on,
            MaterialCommand::SetChromaticAberration(on) => self.chromatic_aberration = on,
            MaterialCommand::SetAberrationStrength(v) => self.aberration_strength = v,
            MaterialCommand::Replace(material) => {
                *self = material;
                self.bounces = self.bounces.min(MAX_BOUNCES);
            }
        }
    }
}

/// A queued change to the material.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaterialCommand {
    SetIor(f32),
    SetBounces(u32),
    SetBaseColor(Vec3),
    SetFresnelStrength(f32),
    SetFresnelExponent(f32),
    SetReflectionStrength(f32),
    SetReflectionThreshold(f32),
    SetCorrectMips(bool),
    SetChromaticAberration(bool),
    SetAberrationStrength(f32),
    /// Swap in a whole preset
    Replace(DiamondMaterial),
}

/// Cloneable handle for queueing material changes from any thread.
#[derive(Debug, Clone)]
pub struct MaterialSender {
    tx: Sender<MaterialCommand>,
}

impl MaterialSender {
    /// Queue a command. Returns false if the receiving side is gone.
    pub fn send(&self, command: MaterialCommand) -> bool {
        self.tx.send(command).is_ok()
    }
}

/// Receiving end of the material command channel.
#[derive(Debug)]
pub struct MaterialQueue {
    tx: Sender<MaterialCommand>,
    rx: Receiver<MaterialCommand>,
}

impl MaterialQueue {
    pub fn new() -> Self {
        let (tx, rx) = channel();
        Self { tx, rx }
    }

    /// A new sender feeding this queue.
    pub fn sender(&self) -> MaterialSender {
        MaterialSender { tx: self.tx.clone() }
    }

    /// Apply every pending command in send order (non-blocking).
    ///
    /// Returns how many commands were applied.
    pub fn drain_into(&self, material: &mut DiamondMaterial) -> usize {
        let mut applied = 0;
        while let Ok(command) = self.rx.try_recv() {
            material.apply(command);
            applied += 1;
        }
        applied
    }
}

impl Default for MaterialQueue {
    fn default() -> Self {
        Self::new()
    }
}
