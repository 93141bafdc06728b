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

//! The nine precompute kernels. Each has a host body here and a WGSL body
//! in shaders/, with the same inputs in the same binding order.
use crate::{
    math::{
        self, beta_r, horizon_mu, irradiance, irradiance_r_mu_s, layer_geometry, limit,
        mu_mu_s_nu, optical_depth, phase_mie, phase_rayleigh, rgb, texel, texture_4d,
        transmittance_r_mu, transmittance_segment, Rgb,
    },
    params::ScatteringUniforms,
};
use compute::{Dimension, Invocation, KernelDescriptor, KernelOutput};
use lut::LookupTable;
use std::f32::consts::PI;

const COMMON: &str = include_str!("shaders/common.wgsl");

const NOTHING: lut::Texel = [0.0; 4];

fn single(t: lut::Texel) -> KernelOutput {
    [t, NOTHING]
}

// Stage 1.
pub fn transmittance_kernel(
    u: &ScatteringUniforms,
    _inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let (r, mu) = transmittance_r_mu(u, at.x, at.y);
    let depth = beta_r(u) * optical_depth(u, u.hr, r, mu)
        + Rgb::repeat(u.beta_m_ex[0] * optical_depth(u, u.hm, r, mu));
    single(texel(depth.map(|d| (-d).exp()), 0.0))
}

// Stage 2: direct sun at the ground.
pub fn irradiance_1_kernel(
    u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let (r, mu_s) = irradiance_r_mu_s(u, at.x, at.y);
    let t = math::transmittance(u, inputs[0], r, mu_s);
    single(texel(t * mu_s.max(0.0), 0.0))
}

fn inscatter_1_integrand(
    u: &ScatteringUniforms,
    table: &LookupTable,
    r: f32,
    mu: f32,
    mu_s: f32,
    nu: f32,
    t: f32,
) -> (Rgb, Rgb) {
    let ri = (r * r + t * t + 2.0 * r * mu * t).sqrt();
    let mu_si = (nu * t + mu_s * r) / ri;
    let ri = ri.max(u.rg);
    if mu_si >= horizon_mu(u, ri) {
        let ti = transmittance_segment(u, table, r, mu, t)
            .component_mul(&math::transmittance(u, table, ri, mu_si));
        (
            ti * (-(ri - u.rg) / u.hr).exp(),
            ti * (-(ri - u.rg) / u.hm).exp(),
        )
    } else {
        (Rgb::zeros(), Rgb::zeros())
    }
}

// Stage 3: single Rayleigh and Mie, stored without phase functions.
pub fn inscatter_1_kernel(
    u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let transmittance_t = inputs[0];
    let (r, dhdh) = layer_geometry(u, at.layer);
    let (mu, mu_s, nu) = mu_mu_s_nu(u, at.x, at.y, r, dhdh);

    let n = u.inscatter_samples.max(1);
    let dx = limit(u, r, mu) / n as f32;
    let (mut rayi, mut miei) = inscatter_1_integrand(u, transmittance_t, r, mu, mu_s, nu, 0.0);
    let mut ray = Rgb::zeros();
    let mut mie = Rgb::zeros();
    for i in 1..=n {
        let xj = i as f32 * dx;
        let (rayj, miej) = inscatter_1_integrand(u, transmittance_t, r, mu, mu_s, nu, xj);
        ray += (rayi + rayj) / 2.0 * dx;
        mie += (miei + miej) / 2.0 * dx;
        rayi = rayj;
        miei = miej;
    }
    [
        texel(ray.component_mul(&beta_r(u)), 0.0),
        texel(mie * u.beta_m_sca[0], 0.0),
    ]
}

// Stages 4 and 5e: WRITE = READ + k * DeltaE.
pub fn copy_irradiance_kernel(
    u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let delta_e = inputs[0].texel(at.x, at.y, 0);
    let prior = inputs[1].texel(at.x, at.y, 0);
    single([
        prior[0] + u.k * delta_e[0],
        prior[1] + u.k * delta_e[1],
        prior[2] + u.k * delta_e[2],
        prior[3] + u.k * delta_e[3],
    ])
}

// Stage 5a: Rayleigh in rgb, Mie red in alpha.
pub fn copy_inscatter_1_kernel(
    _u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let ray = inputs[0].texel(at.x, at.y, at.layer);
    let mie = inputs[1].texel(at.x, at.y, at.layer);
    single([ray[0], ray[1], ray[2], mie[0]])
}

// Light arriving at a point from every direction, scattered toward the
// viewer: J[deltaE + deltaS].
pub fn inscatter_s_kernel(
    u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let (transmittance_t, delta_e, delta_sr, delta_sm) =
        (inputs[0], inputs[1], inputs[2], inputs[3]);
    let (r, dhdh) = layer_geometry(u, at.layer);
    let (mu, mu_s, nu) = mu_mu_s_nu(u, at.x, at.y, r, dhdh);

    let r = r.clamp(u.rg, u.rt);
    let mu = mu.clamp(-1.0, 1.0);
    let mu_s = mu_s.clamp(-1.0, 1.0);
    let var = (1.0 - mu * mu).sqrt() * (1.0 - mu_s * mu_s).sqrt();
    let nu = nu.max(mu_s * mu - var).min(mu_s * mu + var);

    let ctheta_min = horizon_mu(u, r);
    let v = Rgb::new((1.0 - mu * mu).sqrt(), 0.0, mu);
    let sx = if v.x == 0.0 { 0.0 } else { (nu - mu_s * mu) / v.x };
    let s = Rgb::new(sx, (1.0 - sx * sx - mu_s * mu_s).max(0.0).sqrt(), mu_s);

    let n = u.spherical_samples.max(1);
    let dphi = PI / n as f32;
    let dtheta = PI / n as f32;
    let mie_g = u.mie_g;
    let density_r = beta_r(u) * (-(r - u.rg) / u.hr).exp();
    let density_m = u.beta_m_sca[0] * (-(r - u.rg) / u.hm).exp();

    let mut raymie = Rgb::zeros();
    for itheta in 0..n {
        let theta = (itheta as f32 + 0.5) * dtheta;
        let ctheta = theta.cos();

        let mut ground_reflectance = 0.0;
        let mut dground = 0.0;
        let mut ground_transp = Rgb::zeros();
        if ctheta < ctheta_min {
            ground_reflectance = u.ground_reflectance / PI;
            dground =
                -r * ctheta - (r * r * (ctheta * ctheta - 1.0) + u.rg * u.rg).max(0.0).sqrt();
            ground_transp = transmittance_segment(
                u,
                transmittance_t,
                u.rg,
                -(r * ctheta + dground) / u.rg,
                dground,
            );
        }

        for iphi in 0..2 * n {
            let phi = (iphi as f32 + 0.5) * dphi;
            let dw = dtheta * dphi * theta.sin();
            let w = Rgb::new(phi.cos() * theta.sin(), phi.sin() * theta.sin(), ctheta);

            let nu1 = s.dot(&w);
            let nu2 = v.dot(&w);
            let pr2 = phase_rayleigh(nu2);
            let pm2 = phase_mie(mie_g, nu2);

            let ground_normal = (Rgb::new(0.0, 0.0, r) + w * dground) / u.rg;
            let ground_irradiance = irradiance(u, delta_e, u.rg, ground_normal.dot(&s));

            // Reflected off the ground and attenuated on the way here.
            let mut incoming =
                ground_irradiance.component_mul(&ground_transp) * ground_reflectance;

            incoming += if u.first != 0 {
                let ray1 = rgb(texture_4d(u, delta_sr, r, w.z, mu_s, nu1));
                let mie1 = rgb(texture_4d(u, delta_sm, r, w.z, mu_s, nu1));
                ray1 * phase_rayleigh(nu1) + mie1 * phase_mie(mie_g, nu1)
            } else {
                rgb(texture_4d(u, delta_sr, r, w.z, mu_s, nu1))
            };

            let scattering = density_r * pr2 + Rgb::repeat(density_m * pm2);
            raymie += incoming.component_mul(&scattering) * dw;
        }
    }
    single(texel(raymie, 0.0))
}

// Stage 5c: ground irradiance from the previous order's sky.
pub fn irradiance_n_kernel(
    u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let (delta_sr, delta_sm) = (inputs[0], inputs[1]);
    let (r, mu_s) = irradiance_r_mu_s(u, at.x, at.y);
    let s = Rgb::new((1.0 - mu_s * mu_s).max(0.0).sqrt(), 0.0, mu_s);

    let n = u.irradiance_samples.max(2);
    let dphi = PI / n as f32;
    let dtheta = PI / n as f32;

    let mut result = Rgb::zeros();
    for iphi in 0..2 * n {
        let phi = (iphi as f32 + 0.5) * dphi;
        for itheta in 0..n / 2 {
            let theta = (itheta as f32 + 0.5) * dtheta;
            let dw = dtheta * dphi * theta.sin();
            let w = Rgb::new(phi.cos() * theta.sin(), phi.sin() * theta.sin(), theta.cos());
            let nu = s.dot(&w);
            let sky = if u.first != 0 {
                let ray1 = rgb(texture_4d(u, delta_sr, r, w.z, mu_s, nu));
                let mie1 = rgb(texture_4d(u, delta_sm, r, w.z, mu_s, nu));
                ray1 * phase_rayleigh(nu) + mie1 * phase_mie(u.mie_g, nu)
            } else {
                rgb(texture_4d(u, delta_sr, r, w.z, mu_s, nu))
            };
            result += sky * w.z * dw;
        }
    }
    single(texel(result, 0.0))
}

// Stage 5d: march the source term J along the view ray.
pub fn inscatter_n_kernel(
    u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let (transmittance_t, delta_j) = (inputs[0], inputs[1]);
    let (r, dhdh) = layer_geometry(u, at.layer);
    let (mu, mu_s, nu) = mu_mu_s_nu(u, at.x, at.y, r, dhdh);

    let integrand = |t: f32| -> Rgb {
        let ri = (r * r + t * t + 2.0 * r * mu * t).sqrt();
        let mui = (r * mu + t) / ri;
        let mu_si = (nu * t + mu_s * r) / ri;
        rgb(texture_4d(u, delta_j, ri, mui, mu_si, nu))
            .component_mul(&transmittance_segment(u, transmittance_t, r, mu, t))
    };

    let n = u.inscatter_samples.max(1);
    let dx = limit(u, r, mu) / n as f32;
    let mut raymiei = integrand(0.0);
    let mut raymie = Rgb::zeros();
    for i in 1..=n {
        let raymiej = integrand(i as f32 * dx);
        raymie += (raymiei + raymiej) / 2.0 * dx;
        raymiei = raymiej;
    }
    single(texel(raymie, 0.0))
}

// Stage 5f: WRITE = READ + deltaS / phaseR(nu).
pub fn copy_inscatter_n_kernel(
    u: &ScatteringUniforms,
    inputs: &[&LookupTable],
    at: Invocation,
) -> KernelOutput {
    let (r, dhdh) = layer_geometry(u, at.layer);
    let (_, _, nu) = mu_mu_s_nu(u, at.x, at.y, r, dhdh);
    let prior = inputs[0].texel(at.x, at.y, at.layer);
    let delta = rgb(inputs[1].texel(at.x, at.y, at.layer)) / phase_rayleigh(nu);
    single([
        prior[0] + delta.x,
        prior[1] + delta.y,
        prior[2] + delta.z,
        prior[3],
    ])
}

pub fn transmittance() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("transmittance")
        .output(Dimension::D2)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/transmittance.wgsl"))
        .cpu(transmittance_kernel)
}

pub fn irradiance_1() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("irradiance_1")
        .input(Dimension::D2)
        .output(Dimension::D2)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/irradiance_1.wgsl"))
        .cpu(irradiance_1_kernel)
}

pub fn inscatter_1() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("inscatter_1")
        .input(Dimension::D2)
        .output(Dimension::D3)
        .output(Dimension::D3)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/inscatter_1.wgsl"))
        .cpu(inscatter_1_kernel)
}

pub fn copy_irradiance() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("copy_irradiance")
        .input(Dimension::D2)
        .input(Dimension::D2)
        .output(Dimension::D2)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/copy_irradiance.wgsl"))
        .cpu(copy_irradiance_kernel)
}

pub fn copy_inscatter_1() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("copy_inscatter_1")
        .input(Dimension::D3)
        .input(Dimension::D3)
        .output(Dimension::D3)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/copy_inscatter_1.wgsl"))
        .cpu(copy_inscatter_1_kernel)
}

pub fn inscatter_s() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("inscatter_s")
        .input(Dimension::D2)
        .input(Dimension::D2)
        .input(Dimension::D3)
        .input(Dimension::D3)
        .output(Dimension::D3)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/inscatter_s.wgsl"))
        .cpu(inscatter_s_kernel)
}

pub fn irradiance_n() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("irradiance_n")
        .input(Dimension::D3)
        .input(Dimension::D3)
        .output(Dimension::D2)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/irradiance_n.wgsl"))
        .cpu(irradiance_n_kernel)
}

pub fn inscatter_n() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("inscatter_n")
        .input(Dimension::D2)
        .input(Dimension::D3)
        .output(Dimension::D3)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/inscatter_n.wgsl"))
        .cpu(inscatter_n_kernel)
}

pub fn copy_inscatter_n() -> KernelDescriptor<ScatteringUniforms> {
    KernelDescriptor::new("copy_inscatter_n")
        .input(Dimension::D3)
        .input(Dimension::D3)
        .output(Dimension::D3)
        .wgsl(COMMON)
        .wgsl(include_str!("shaders/copy_inscatter_n.wgsl"))
        .cpu(copy_inscatter_n_kernel)
}
