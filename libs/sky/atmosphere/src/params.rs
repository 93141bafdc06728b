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
use lut::Extent;
use static_assertions::{assert_eq_align, assert_eq_size};
use std::mem;
use zerocopy::{AsBytes, FromBytes};

// Published to the shading stage; not what the tables are built from.
pub const RENDER_BETA_R: [f32; 3] = [0.0058 / 1000.0, 0.0135 / 1000.0, 0.0331 / 1000.0];
pub const RENDER_MIE_G: f32 = 0.75;
pub const SUN_INTENSITY: f32 = 100.0;
pub const EARTH_POS: [f32; 3] = [0.0, 6_360_010.0, 0.0];

/// Physical description of the atmosphere. Lengths in km.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AtmosphereParameters {
    // Planet radius.
    pub rg: f32,

    // Top of the atmosphere.
    pub rt: f32,

    // Artificial top used when marching rays out of the atmosphere.
    pub rl: f32,

    // Rayleigh scattering per channel, at sea level.
    pub beta_r: [f32; 3],

    pub beta_m_sca: f32,
    pub beta_m_ex: f32,

    // Cornette-Shanks asymmetry for aerosols.
    pub mie_g: f32,

    // Density scale heights.
    pub hr: f32,
    pub hm: f32,

    pub average_ground_reflectance: f32,
}

impl Default for AtmosphereParameters {
    fn default() -> Self {
        Self {
            rg: 6360.0,
            rt: 6420.0,
            rl: 6421.0,
            beta_r: [5.8e-3, 1.35e-2, 3.31e-2],
            beta_m_sca: 4e-3,
            beta_m_ex: 4.44e-3,
            mie_g: 0.8,
            hr: 8.0,
            hm: 1.2,
            average_ground_reflectance: 0.1,
        }
    }
}

impl AtmosphereParameters {
    pub fn clamped_mie_g(&self) -> f32 {
        self.mie_g.clamp(0.0, 0.99)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TableDimensions {
    pub transmittance_w: u32,
    pub transmittance_h: u32,
    pub irradiance_w: u32,
    pub irradiance_h: u32,
    pub res_r: u32,
    pub res_mu: u32,
    pub res_mu_s: u32,
    pub res_nu: u32,
}

impl Default for TableDimensions {
    fn default() -> Self {
        Self {
            transmittance_w: 256,
            transmittance_h: 64,
            irradiance_w: 64,
            irradiance_h: 16,
            res_r: 32,
            res_mu: 128,
            res_mu_s: 32,
            res_nu: 8,
        }
    }
}

impl TableDimensions {
    /// Small enough to precompute on the host in a test.
    pub fn tiny() -> Self {
        Self {
            transmittance_w: 32,
            transmittance_h: 8,
            irradiance_w: 16,
            irradiance_h: 4,
            res_r: 4,
            res_mu: 8,
            res_mu_s: 4,
            res_nu: 4,
        }
    }

    pub fn transmittance(&self) -> Extent {
        Extent::new_2d(self.transmittance_w, self.transmittance_h)
    }

    pub fn irradiance(&self) -> Extent {
        Extent::new_2d(self.irradiance_w, self.irradiance_h)
    }

    /// The 4D (r, mu, mu_s, nu) table packed as nu-major slices of mu_s
    /// across x, mu down y and r through the layers.
    pub fn inscatter(&self) -> Extent {
        Extent::new_3d(self.res_mu_s * self.res_nu, self.res_mu, self.res_r)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct IntegrationSamples {
    pub transmittance: u32,
    pub inscatter: u32,
    pub irradiance: u32,
    pub inscatter_spherical: u32,
}

impl Default for IntegrationSamples {
    fn default() -> Self {
        Self {
            transmittance: 500,
            inscatter: 50,
            irradiance: 32,
            inscatter_spherical: 16,
        }
    }
}

impl IntegrationSamples {
    pub fn coarse() -> Self {
        Self {
            transmittance: 64,
            inscatter: 12,
            irradiance: 8,
            inscatter_spherical: 4,
        }
    }
}

/// Everything that determines the contents of the precomputed tables.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PrecomputeConfig {
    pub atmosphere: AtmosphereParameters,
    pub dimensions: TableDimensions,
    pub samples: IntegrationSamples,
}

impl PrecomputeConfig {
    pub fn tiny() -> Self {
        Self {
            atmosphere: AtmosphereParameters::default(),
            dimensions: TableDimensions::tiny(),
            samples: IntegrationSamples::coarse(),
        }
    }

    /// Short content hash naming the cache files for this configuration.
    pub fn fingerprint(&self) -> String {
        let uniforms = ScatteringUniforms::new(self);
        let digest = md5::compute(uniforms.as_bytes());
        format!("{:x}", digest)[..16].to_owned()
    }
}

/// The kernels' parameter block. Layout must match `Scattering` in
/// common.wgsl.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default)]
pub struct ScatteringUniforms {
    pub beta_r: [f32; 4],
    pub beta_m_sca: [f32; 4],
    pub beta_m_ex: [f32; 4],

    pub rg: f32,
    pub rt: f32,
    pub rl: f32,
    pub hr: f32,

    pub hm: f32,
    pub mie_g: f32,
    pub ground_reflectance: f32,
    // Scale applied to DeltaE when accumulating irradiance.
    pub k: f32,

    pub transmittance_w: u32,
    pub transmittance_h: u32,
    pub sky_w: u32,
    pub sky_h: u32,

    pub res_r: u32,
    pub res_mu: u32,
    pub res_mu_s: u32,
    pub res_nu: u32,

    pub transmittance_samples: u32,
    pub inscatter_samples: u32,
    pub irradiance_samples: u32,
    pub spherical_samples: u32,

    // Non-zero while gathering from single scattering, which is stored
    // without its phase functions.
    pub first: u32,
    _pad: [u32; 3],
}
assert_eq_size!(ScatteringUniforms, [f32; 36]);
assert_eq_align!(ScatteringUniforms, f32);

pub const SCATTERING_UNIFORMS_SIZE: usize = mem::size_of::<ScatteringUniforms>();

impl ScatteringUniforms {
    pub fn new(config: &PrecomputeConfig) -> Self {
        let a = &config.atmosphere;
        let d = &config.dimensions;
        let s = &config.samples;
        Self {
            beta_r: [a.beta_r[0], a.beta_r[1], a.beta_r[2], 0.0],
            beta_m_sca: [a.beta_m_sca; 4],
            beta_m_ex: [a.beta_m_ex; 4],
            rg: a.rg,
            rt: a.rt,
            rl: a.rl,
            hr: a.hr,
            hm: a.hm,
            mie_g: a.clamped_mie_g(),
            ground_reflectance: a.average_ground_reflectance,
            k: 0.0,
            transmittance_w: d.transmittance_w,
            transmittance_h: d.transmittance_h,
            sky_w: d.irradiance_w,
            sky_h: d.irradiance_h,
            res_r: d.res_r,
            res_mu: d.res_mu,
            res_mu_s: d.res_mu_s,
            res_nu: d.res_nu,
            transmittance_samples: s.transmittance,
            inscatter_samples: s.inscatter,
            irradiance_samples: s.irradiance,
            spherical_samples: s.inscatter_spherical,
            first: 0,
            _pad: [0; 3],
        }
    }

    pub fn with_k(mut self, k: f32) -> Self {
        self.k = k;
        self
    }

    pub fn with_first(mut self, first: bool) -> Self {
        self.first = first as u32;
        self
    }
}
