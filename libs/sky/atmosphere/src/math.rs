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

//! Table parameterizations and lookups shared by the host kernels. Every
//! function here has a twin of the same name in shaders/common.wgsl.
use crate::params::ScatteringUniforms;
use lut::{lerp, LookupTable, Texel};
use nalgebra::Vector3;
use std::f32::consts::PI;

pub type Rgb = Vector3<f32>;

#[inline]
pub fn rgb(t: Texel) -> Rgb {
    Rgb::new(t[0], t[1], t[2])
}

#[inline]
pub fn texel(c: Rgb, a: f32) -> Texel {
    [c.x, c.y, c.z, a]
}

pub fn beta_r(u: &ScatteringUniforms) -> Rgb {
    Rgb::new(u.beta_r[0], u.beta_r[1], u.beta_r[2])
}

// a^2 - b^2 without cancelling away the difference.
#[inline]
fn sq_diff(a: f32, b: f32) -> f32 {
    (a - b) * (a + b)
}

/// Distance along (r, mu) to the ground, or to the artificial top RL if the
/// ray misses the planet.
pub fn limit(u: &ScatteringUniforms, r: f32, mu: f32) -> f32 {
    let mut dout = -r * mu + (r * r * (mu * mu - 1.0) + u.rl * u.rl).max(0.0).sqrt();
    let delta2 = r * r * (mu * mu - 1.0) + u.rg * u.rg;
    if delta2 >= 0.0 {
        let din = -r * mu - delta2.sqrt();
        if din >= 0.0 {
            dout = dout.min(din);
        }
    }
    dout
}

pub fn horizon_mu(u: &ScatteringUniforms, r: f32) -> f32 {
    let ratio = u.rg / r;
    -(1.0 - ratio * ratio).max(0.0).sqrt()
}

/// Integrated density with scale height `h` along (r, mu) to the top.
pub fn optical_depth(u: &ScatteringUniforms, h: f32, r: f32, mu: f32) -> f32 {
    if mu < horizon_mu(u, r) {
        return 1e9;
    }
    let n = u.transmittance_samples.max(1);
    let dx = limit(u, r, mu) / n as f32;
    let mut yi = (-(r - u.rg) / h).exp();
    let mut result = 0.0;
    for i in 1..=n {
        let xj = i as f32 * dx;
        let rj = (r * r + xj * xj + 2.0 * xj * r * mu).sqrt();
        let yj = (-(rj - u.rg) / h).exp();
        result += (yi + yj) / 2.0 * dx;
        yi = yj;
    }
    result
}

pub fn transmittance_uv(u: &ScatteringUniforms, r: f32, mu: f32) -> (f32, f32) {
    let ur = ((r - u.rg) / (u.rt - u.rg)).max(0.0).sqrt();
    let umu = ((mu + 0.15) / (1.0 + 0.15) * 1.5f32.tan()).atan() / 1.5;
    (umu, ur)
}

/// Inverse of `transmittance_uv` at the center of texel (x, y).
pub fn transmittance_r_mu(u: &ScatteringUniforms, x: u32, y: u32) -> (f32, f32) {
    let fr = (y as f32 + 0.5) / u.transmittance_h as f32;
    let fmu = (x as f32 + 0.5) / u.transmittance_w as f32;
    let r = u.rg + fr * fr * (u.rt - u.rg);
    let mu = -0.15 + (1.5 * fmu).tan() / 1.5f32.tan() * (1.0 + 0.15);
    (r, mu)
}

/// Transmittance of the infinite ray (r, mu), ignoring the ground.
pub fn transmittance(u: &ScatteringUniforms, table: &LookupTable, r: f32, mu: f32) -> Rgb {
    let (uv_mu, uv_r) = transmittance_uv(u, r, mu);
    rgb(table.sample_2d(uv_mu, uv_r))
}

/// As `transmittance`, but zero if the ray hits the ground.
pub fn transmittance_with_shadow(
    u: &ScatteringUniforms,
    table: &LookupTable,
    r: f32,
    mu: f32,
) -> Rgb {
    if mu < horizon_mu(u, r) {
        Rgb::zeros()
    } else {
        transmittance(u, table, r, mu)
    }
}

/// Transmittance over the first `d` km of (r, mu). The segment must not
/// cross the ground.
pub fn transmittance_segment(
    u: &ScatteringUniforms,
    table: &LookupTable,
    r: f32,
    mu: f32,
    d: f32,
) -> Rgb {
    let r1 = (r * r + d * d + 2.0 * r * mu * d).sqrt();
    let mu1 = (r * mu + d) / r1;
    let ratio = if mu > 0.0 {
        transmittance(u, table, r, mu).component_div(&transmittance(u, table, r1, mu1))
    } else {
        transmittance(u, table, r1, -mu1).component_div(&transmittance(u, table, r, -mu))
    };
    ratio.map(|c| c.min(1.0))
}

pub fn irradiance_uv(u: &ScatteringUniforms, r: f32, mu_s: f32) -> (f32, f32) {
    let ur = (r - u.rg) / (u.rt - u.rg);
    let umu_s = (mu_s + 0.2) / (1.0 + 0.2);
    (umu_s, ur)
}

pub fn irradiance_r_mu_s(u: &ScatteringUniforms, x: u32, y: u32) -> (f32, f32) {
    let r = u.rg + y as f32 / (u.sky_h as f32 - 1.0) * (u.rt - u.rg);
    let mu_s = -0.2 + x as f32 / (u.sky_w as f32 - 1.0) * (1.0 + 0.2);
    (r, mu_s)
}

pub fn irradiance(u: &ScatteringUniforms, table: &LookupTable, r: f32, mu_s: f32) -> Rgb {
    let (uv_mu_s, uv_r) = irradiance_uv(u, r, mu_s);
    rgb(table.sample_2d(uv_mu_s, uv_r))
}

/// Radius of an in-scatter layer and the distances bounding its rays:
/// (to top, to top through the horizon, to ground, to ground horizon).
pub fn layer_geometry(u: &ScatteringUniforms, layer: u32) -> (f32, [f32; 4]) {
    let f = layer as f32 / (u.res_r as f32 - 1.0);
    let mut r = (u.rg * u.rg + f * f * sq_diff(u.rt, u.rg)).sqrt();
    if layer == 0 {
        r += 0.01;
    } else if layer == u.res_r - 1 {
        r -= 0.001;
    }
    let rho = sq_diff(r, u.rg).max(0.0).sqrt();
    let h = sq_diff(u.rt, u.rg).sqrt();
    (r, [u.rt - r, rho + h, r - u.rg, rho])
}

/// View, sun and view-sun cosines for the in-scatter texel (x, y).
pub fn mu_mu_s_nu(
    u: &ScatteringUniforms,
    x: u32,
    y: u32,
    r: f32,
    dhdh: [f32; 4],
) -> (f32, f32, f32) {
    let x = x as f32;
    let y = y as f32;
    let half = u.res_mu as f32 / 2.0;
    let mu = if y < half {
        let d = 1.0 - y / (half - 1.0);
        let d = dhdh[2].max(d * dhdh[3]).min(dhdh[3] * 0.999);
        let mu = (sq_diff(u.rg, r) - d * d) / (2.0 * r * d);
        mu.min(horizon_mu(u, r) - 0.001)
    } else {
        let d = (y - half) / (half - 1.0);
        let d = dhdh[0].max(d * dhdh[1]).min(dhdh[1] * 0.999);
        (sq_diff(u.rt, r) - d * d) / (2.0 * r * d)
    };
    let res_mu_s = u.res_mu_s as f32;
    let mu_s = (x % res_mu_s) / (res_mu_s - 1.0);
    let mu_s = ((2.0 * mu_s - 1.0 + 0.26) * 1.1).tan() / (1.26f32 * 1.1).tan();
    let nu = -1.0 + (x / res_mu_s).floor() / (u.res_nu as f32 - 1.0) * 2.0;
    (mu, mu_s, nu)
}

/// Look up the packed 4D in-scatter table, blending the two nearest nu slices.
pub fn texture_4d(
    u: &ScatteringUniforms,
    table: &LookupTable,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
) -> Texel {
    let res_r = u.res_r as f32;
    let res_mu = u.res_mu as f32;
    let res_mu_s = u.res_mu_s as f32;
    let res_nu = u.res_nu as f32;

    let h = sq_diff(u.rt, u.rg).sqrt();
    let rho = sq_diff(r, u.rg).max(0.0).sqrt();
    let rmu = r * mu;
    let delta = rmu * rmu - sq_diff(r, u.rg);
    let cst = if rmu < 0.0 && delta > 0.0 {
        [1.0, 0.0, 0.0, 0.5 - 0.5 / res_mu]
    } else {
        [-1.0, h * h, h, 0.5 + 0.5 / res_mu]
    };
    let ur = 0.5 / res_r + rho / h * (1.0 - 1.0 / res_r);
    let umu = cst[3]
        + (rmu * cst[0] + (delta + cst[1]).max(0.0).sqrt()) / (rho + cst[2]).max(1e-6)
            * (0.5 - 1.0 / res_mu);
    let umu_s = 0.5 / res_mu_s
        + ((mu_s.max(-0.1975) * (1.26f32 * 1.1).tan()).atan() / 1.1 + (1.0 - 0.26))
            * 0.5
            * (1.0 - 1.0 / res_mu_s);

    let t = (nu + 1.0) / 2.0 * (res_nu - 1.0);
    let unu = t.floor();
    let t = t - unu;
    lerp(
        table.sample_3d((unu + umu_s) / res_nu, umu, ur),
        table.sample_3d((unu + umu_s + 1.0) / res_nu, umu, ur),
        t,
    )
}

pub fn phase_rayleigh(nu: f32) -> f32 {
    (3.0 / (16.0 * PI)) * (1.0 + nu * nu)
}

/// Cornette-Shanks.
pub fn phase_mie(g: f32, nu: f32) -> f32 {
    let g2 = g * g;
    1.5 / (4.0 * PI) * (1.0 - g2) * (1.0 + g2 - 2.0 * g * nu).powf(-1.5) * (1.0 + nu * nu)
        / (2.0 + g2)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::params::PrecomputeConfig;
    use approx::assert_relative_eq;

    fn uniforms() -> ScatteringUniforms {
        ScatteringUniforms::new(&PrecomputeConfig::default())
    }

    #[test]
    fn test_transmittance_parameterization_round_trips() {
        let u = uniforms();
        for &(x, y) in &[(0, 0), (17, 5), (255, 63), (128, 32)] {
            let (r, mu) = transmittance_r_mu(&u, x, y);
            let (umu, ur) = transmittance_uv(&u, r, mu);
            assert_relative_eq!(umu, (x as f32 + 0.5) / 256.0, epsilon = 1e-3);
            assert_relative_eq!(ur, (y as f32 + 0.5) / 64.0, epsilon = 1e-3);
        }
    }

    #[test]
    fn test_limit_hits_ground_or_top() {
        let u = uniforms();
        // Straight down from 10km up.
        assert_relative_eq!(limit(&u, u.rg + 10.0, -1.0), 10.0, epsilon = 1e-2);
        // Straight up to the artificial top.
        assert_relative_eq!(limit(&u, u.rg + 10.0, 1.0), u.rl - u.rg - 10.0, epsilon = 1e-2);
    }

    #[test]
    fn test_optical_depth_below_horizon() {
        let u = uniforms();
        assert_eq!(optical_depth(&u, u.hr, u.rg + 1.0, -1.0), 1e9);
        let zenith = optical_depth(&u, u.hr, u.rg, 1.0);
        // Exponential atmosphere integrates to roughly the scale height.
        assert_relative_eq!(zenith, u.hr, max_relative = 0.02);
    }

    #[test]
    fn test_layer_geometry_nudges_ends() {
        let u = uniforms();
        let (r0, d0) = layer_geometry(&u, 0);
        assert_relative_eq!(r0, u.rg + 0.01, epsilon = 1e-3);
        assert_relative_eq!(d0[2], 0.01, epsilon = 1e-3);
        let (top, dt) = layer_geometry(&u, u.res_r - 1);
        assert_relative_eq!(top, u.rt - 0.001, epsilon = 1e-3);
        assert_relative_eq!(dt[0], 0.001, epsilon = 1e-3);
    }

    #[test]
    fn test_mu_split_at_half() {
        let u = uniforms();
        let (r, dhdh) = layer_geometry(&u, 4);
        let (below, _, _) = mu_mu_s_nu(&u, 0, u.res_mu / 2 - 1, r, dhdh);
        let (above, _, _) = mu_mu_s_nu(&u, 0, u.res_mu / 2, r, dhdh);
        assert!(below < horizon_mu(&u, r));
        assert!(above >= horizon_mu(&u, r));
    }

    #[test]
    fn test_nu_and_mu_s_ranges() {
        let u = uniforms();
        let (r, dhdh) = layer_geometry(&u, 1);
        let (_, mu_s, nu) = mu_mu_s_nu(&u, 0, 64, r, dhdh);
        assert_relative_eq!(mu_s, -0.2, epsilon = 1e-2);
        assert_relative_eq!(nu, -1.0);
        let last = u.res_mu_s * u.res_nu - 1;
        let (_, mu_s, nu) = mu_mu_s_nu(&u, last, 64, r, dhdh);
        assert_relative_eq!(mu_s, 1.0, epsilon = 1e-4);
        assert_relative_eq!(nu, 1.0);
    }

    #[test]
    fn test_phase_functions_integrate_to_one() {
        let n = 2000;
        let mut ray = 0.0;
        let mut mie = 0.0;
        for i in 0..n {
            let theta = (i as f32 + 0.5) / n as f32 * PI;
            let dw = 2.0 * PI * theta.sin() * PI / n as f32;
            ray += phase_rayleigh(theta.cos()) * dw;
            mie += phase_mie(0.8, theta.cos()) * dw;
        }
        assert_relative_eq!(ray, 1.0, max_relative = 1e-3);
        assert_relative_eq!(mie, 1.0, max_relative = 2e-2);
    }
}
