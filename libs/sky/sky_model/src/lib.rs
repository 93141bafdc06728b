// This file is part of Horizon.
//
// Horizon is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Horizon is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Horizon.  If not, see <http://www.gnu.org/licenses/>.
mod program;

pub use crate::program::{RecordingProgram, ShaderProgram, UniformValue};

use anyhow::Result;
use nalgebra::Vector3;
use std::{fmt, str::FromStr};
use thiserror::Error;

/// State every sky model carries regardless of how it evaluates radiance.
#[derive(Clone, Debug, PartialEq)]
pub struct SkyState {
    /// Unit vector toward the sun, in the model's convention.
    pub direction: Vector3<f32>,
    pub normalized_sun_y: f32,
    pub albedo: f32,
    pub turbidity: f32,
}

impl Default for SkyState {
    fn default() -> Self {
        Self {
            direction: Vector3::y(),
            normalized_sun_y: 1.15,
            albedo: 0.1,
            turbidity: 4.0,
        }
    }
}

impl SkyState {
    pub fn with_turbidity(turbidity: f32) -> Self {
        Self {
            turbidity,
            ..Default::default()
        }
    }
}

/// The interface a host drives: initialize once, update per frame, then
/// publish whatever the shading stage needs.
pub trait SkyModel {
    fn name(&self) -> &'static str;

    /// Allocate tables and build kernels. Not meant to be called twice.
    fn initialize(&mut self) -> Result<()>;

    /// Recompute anything that depends on direction or turbidity.
    fn update(&mut self) -> Result<()>;

    /// Binds textures to shared units as a side effect.
    fn set_render_uniforms(&self, program: &mut dyn ShaderProgram);

    fn state(&self) -> &SkyState;

    fn state_mut(&mut self) -> &mut SkyState;

    fn direction(&self) -> Vector3<f32> {
        self.state().direction
    }

    /// Callers hand in the opposite of what the model stores.
    fn set_direction(&mut self, dir: Vector3<f32>) {
        self.state_mut().direction = -dir;
    }

    fn turbidity(&self) -> f32 {
        self.state().turbidity
    }

    fn set_turbidity(&mut self, turbidity: f32) {
        self.state_mut().turbidity = turbidity;
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown sky model: {0}")]
pub struct UnknownSkyModel(String);

/// The host's integer mode selection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum SkyModelKind {
    Bruneton = 0,
    Preetham = 1,
    HosekWilkie = 2,
}

impl SkyModelKind {
    pub const ALL: [SkyModelKind; 3] = [Self::Bruneton, Self::Preetham, Self::HosekWilkie];

    pub fn index(self) -> i32 {
        self as i32
    }

    pub fn from_index(index: i32) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.index() == index)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bruneton => "bruneton",
            Self::Preetham => "preetham",
            Self::HosekWilkie => "hosek-wilkie",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "bruneton" | "precomputed" => Some(Self::Bruneton),
            "preetham" => Some(Self::Preetham),
            "hosek-wilkie" | "hosek_wilkie" | "hosekwilkie" => Some(Self::HosekWilkie),
            _ => None,
        }
    }
}

impl fmt::Display for SkyModelKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SkyModelKind {
    type Err = UnknownSkyModel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(index) = s.parse::<i32>() {
            return Self::from_index(index).ok_or_else(|| UnknownSkyModel(s.to_owned()));
        }
        Self::from_name(s).ok_or_else(|| UnknownSkyModel(s.to_owned()))
    }
}
