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

//! A Practical Analytic Model for Daylight, Preetham, Shirley and Smits 1999.
//!
//! The Perez distribution, normalized against its value at the zenith:
//!
//!   F(t, g) = (1 + A e^(B / cos t)) (1 + C e^(D g) + E cos^2 g)
//!
//! A and B shape the sky gradient, C and D the glow around the sun, and E
//! the haze ring around it.
use crate::table::{
    column_cos_gamma, column_cos_theta, zenith_luminance, AnalyticTable, TableSkyModel,
    TableState, TableUniforms, DEFAULT_TABLE_TURBIDITY, TABLE_SIZE, TABLE_UNIT, TABLE_WGSL,
};
use anyhow::Result;
use compute::{ComputeBackend, Dimension, Invocation, KernelDescriptor, KernelOutput, TableId};
use lut::LookupTable;
use nalgebra::Vector3;
use sky_model::{ShaderProgram, SkyModel, SkyState};

pub const PREETHAM_ROWS: u32 = 2;

pub type Lambdas = [f32; 5];

/// Perez coefficients for each channel of xyY.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct PerezCoefficients {
    pub x: Lambdas,
    pub y: Lambdas,
    pub luminance: Lambdas,
}

impl PerezCoefficients {
    pub fn for_turbidity(t: f32) -> Self {
        Self {
            x: [
                -0.01925 * t - 0.25922,
                -0.06651 * t + 0.00081,
                -0.00041 * t + 0.21247,
                -0.06409 * t - 0.89887,
                -0.00325 * t + 0.04517,
            ],
            y: [
                -0.01669 * t - 0.26078,
                -0.09495 * t + 0.00921,
                -0.00792 * t + 0.21023,
                -0.04405 * t - 1.65369,
                -0.01092 * t + 0.05291,
            ],
            luminance: [
                0.17872 * t - 1.46303,
                -0.35540 * t + 0.42749,
                -0.02266 * t + 5.32505,
                0.12064 * t - 2.57705,
                -0.06696 * t + 0.37027,
            ],
        }
    }

    fn channels_mut(&mut self) -> [&mut Lambdas; 3] {
        [&mut self.x, &mut self.y, &mut self.luminance]
    }

    /// Coefficient `i` of every channel, as (x, y, Y).
    pub fn column(&self, i: usize) -> Vector3<f32> {
        Vector3::new(self.x[i], self.y[i], self.luminance[i])
    }

    fn scale(&mut self, i: usize, s: f32) {
        for channel in self.channels_mut() {
            channel[i] *= s;
        }
    }
}

/// Zenith chromaticity for sun zenith angle `theta`.
pub fn zenith_chromaticity(theta: f32, t: f32) -> (f32, f32) {
    let theta2 = theta * theta;
    let theta3 = theta2 * theta;
    let t2 = t * t;
    let x = (0.00165 * theta3 - 0.00374 * theta2 + 0.00208 * theta) * t2
        + (-0.02902 * theta3 + 0.06377 * theta2 - 0.03202 * theta + 0.00394) * t
        + (0.11693 * theta3 - 0.21196 * theta2 + 0.06052 * theta + 0.25885);
    let y = (0.00275 * theta3 - 0.00610 * theta2 + 0.00316 * theta) * t2
        + (-0.04214 * theta3 + 0.08970 * theta2 - 0.04153 * theta + 0.00515) * t
        + (0.15346 * theta3 - 0.26756 * theta2 + 0.06669 * theta + 0.26688);
    (x, y)
}

pub fn perez_upper(l: &Lambdas, cos_theta: f32, gamma: f32, cos_gamma: f32) -> f32 {
    (1.0 + l[0] * (l[1] / (cos_theta + 1e-6)).exp())
        * (1.0 + l[2] * (l[3] * gamma).exp() + l[4] * cos_gamma * cos_gamma)
}

/// The normalizing denominator; depends only on the sun.
pub fn perez_lower(l: &Lambdas, cos_theta_s: f32, theta_s: f32) -> f32 {
    (1.0 + l[0] * l[1].exp())
        * (1.0 + l[2] * (l[3] * theta_s).exp() + l[4] * cos_theta_s * cos_theta_s)
}

fn preetham_table_kernel(u: &TableUniforms, _: &[&LookupTable], at: Invocation) -> KernelOutput {
    let value = if at.y == 0 {
        let cos_theta = column_cos_theta(u, at.x);
        u.coefficient(0)
            .component_mul(&(u.coefficient(1) / (cos_theta + 1e-6)).map(f32::exp))
    } else {
        let cos_gamma = column_cos_gamma(u, at.x);
        let gamma = cos_gamma.clamp(-1.0, 1.0).acos();
        u.coefficient(2)
            .component_mul(&(u.coefficient(3) * gamma).map(f32::exp))
            + u.coefficient(4) * cos_gamma * cos_gamma
    };
    [[value.x, value.y, value.z, 0.0], [0.0; 4]]
}

pub fn preetham_table() -> KernelDescriptor<TableUniforms> {
    KernelDescriptor::new("preetham_table")
        .output(Dimension::D2)
        .wgsl(TABLE_WGSL)
        .wgsl(include_str!("shaders/preetham_table.wgsl"))
        .cpu(preetham_table_kernel)
}

pub struct PreethamSkyModel<B> {
    state: SkyState,
    table: TableState<B>,
    perez: PerezCoefficients,
    // xyY
    zenith: Vector3<f32>,
    perez_inv_den: Vector3<f32>,
}

impl<B> PreethamSkyModel<B>
where
    B: ComputeBackend<TableUniforms>,
{
    pub fn new(backend: B) -> Self {
        Self {
            state: SkyState::with_turbidity(DEFAULT_TABLE_TURBIDITY),
            table: TableState::new(AnalyticTable::new(
                backend,
                "preetham-table",
                PREETHAM_ROWS,
                preetham_table,
            )),
            perez: PerezCoefficients::default(),
            zenith: Vector3::zeros(),
            perez_inv_den: Vector3::zeros(),
        }
    }

    pub fn coefficients(&self) -> &PerezCoefficients {
        &self.perez
    }

    pub fn zenith(&self) -> Vector3<f32> {
        self.zenith
    }

    pub fn perez_inv_den(&self) -> Vector3<f32> {
        self.perez_inv_den
    }

    pub fn table(&self) -> Option<TableId> {
        self.table.table.table()
    }

    pub fn read_table(&mut self) -> Result<LookupTable> {
        self.table.table.read()
    }

    fn fit(&mut self) {
        let t = self.state.turbidity;
        let cos_theta = self.state.direction.y;
        // Angle from the zenith.
        let theta = cos_theta.clamp(-1.0, 1.0).acos();

        let mut perez = PerezCoefficients::for_turbidity(t);
        let (zx, zy) = zenith_chromaticity(theta, t);
        let mut zenith = Vector3::new(zx, zy, zenith_luminance(theta, t));

        // Fade the sun terms out over the first degree or so of sunset.
        if cos_theta < 0.0 {
            let s = (1.0 + 50.0 * cos_theta).clamp(0.0, 1.0);
            perez.scale(2, s);
            perez.scale(4, s);
        }

        let overcast = self.table.overcast;
        if overcast != 0.0 {
            let clear = 1.0 - overcast;
            perez.x[0] *= clear;
            perez.y[0] *= clear;
            perez.scale(2, clear);
            perez.scale(4, clear);

            // Toward a fit of the CIE overcast sky.
            perez.luminance[0] = perez.luminance[0] * clear + 4.0 * overcast;
            perez.luminance[1] = perez.luminance[1] * clear - 0.7 * overcast;

            zenith.x = zenith.x * clear + 0.333 * overcast;
            zenith.y = zenith.y * clear + 0.333 * overcast;
        }

        if self.table.horiz_crush != 0.0 {
            perez.scale(1, self.table.horiz_crush);
        }

        let lower = Vector3::new(
            perez_lower(&perez.x, cos_theta, theta),
            perez_lower(&perez.y, cos_theta, theta),
            perez_lower(&perez.luminance, cos_theta, theta),
        );
        self.perez_inv_den = zenith.component_div(&lower);
        self.zenith = zenith;
        self.perez = perez;
    }

    fn table_uniforms(&self) -> TableUniforms {
        let columns = (0..5).map(|i| self.perez.column(i)).collect::<Vec<_>>();
        TableUniforms::new(PREETHAM_ROWS, &columns)
    }
}

impl<B> SkyModel for PreethamSkyModel<B>
where
    B: ComputeBackend<TableUniforms>,
{
    fn name(&self) -> &'static str {
        "preetham"
    }

    fn initialize(&mut self) -> Result<()> {
        self.table.table.initialize()
    }

    fn update(&mut self) -> Result<()> {
        self.fit();
        let uniforms = self.table_uniforms();
        self.table.table.fill(&uniforms)
    }

    fn set_render_uniforms(&self, program: &mut dyn ShaderProgram) {
        if let Some(table) = self.table() {
            program.bind_table("s_Table", TABLE_UNIT, table);
        }
        program.set_uniform("TABLE_SIZE", (TABLE_SIZE as i32).into());
        program.set_uniform("u_Direction", self.direction().into());
        program.set_uniform("u_PerezInvDen", self.perez_inv_den.into());
    }

    fn state(&self) -> &SkyState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SkyState {
        &mut self.state
    }
}

impl<B> TableSkyModel for PreethamSkyModel<B>
where
    B: ComputeBackend<TableUniforms>,
{
    fn overcast(&self) -> f32 {
        self.table.overcast
    }

    fn set_overcast(&mut self, overcast: f32) {
        self.table.overcast = overcast;
    }

    fn horiz_crush(&self) -> f32 {
        self.table.horiz_crush
    }

    fn set_horiz_crush(&mut self, horiz_crush: f32) {
        self.table.horiz_crush = horiz_crush;
    }
}
