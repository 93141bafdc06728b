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
use anyhow::{anyhow, bail, Result};
use compute::{ComputeBackend, Dispatch, KernelDescriptor, KernelId, TableId};
use log::trace;
use lut::{Extent, LookupTable};
use nalgebra::{Matrix3, Vector3};
use sky_model::SkyModel;
use static_assertions::assert_eq_size;
use std::f32::consts::PI;
use zerocopy::{AsBytes, FromBytes};

/// Texels per row of an analytic model's table.
pub const TABLE_SIZE: u32 = 64;

pub const TABLE_UNIT: u32 = 3;

/// Turbidity the table-backed models start from.
pub const DEFAULT_TABLE_TURBIDITY: f32 = 2.5;

pub(crate) const TABLE_WGSL: &str = include_str!("shaders/table.wgsl");

/// Parameter block for the table kernels. Each coefficient is a per channel
/// vector in xyz. Layout must match `Table` in table.wgsl.
#[repr(C)]
#[derive(AsBytes, FromBytes, Copy, Clone, Debug, Default, PartialEq)]
pub struct TableUniforms {
    pub coefficients: [[f32; 4]; 9],
    pub table_size: u32,
    pub rows: u32,
    _pad: [u32; 2],
}
assert_eq_size!(TableUniforms, [f32; 40]);

impl TableUniforms {
    pub fn new(rows: u32, coefficients: &[Vector3<f32>]) -> Self {
        let mut uniforms = Self {
            table_size: TABLE_SIZE,
            rows,
            ..Default::default()
        };
        for (slot, c) in uniforms.coefficients.iter_mut().zip(coefficients) {
            *slot = [c.x, c.y, c.z, 0.0];
        }
        uniforms
    }

    pub fn coefficient(&self, i: usize) -> Vector3<f32> {
        let c = self.coefficients[i];
        Vector3::new(c[0], c[1], c[2])
    }
}

/// cos(theta) sampled by column `x` of a zenith-angle row.
pub fn column_cos_theta(u: &TableUniforms, x: u32) -> f32 {
    x as f32 / (u.table_size as f32 - 1.0)
}

/// cos(gamma) sampled by column `x` of a sun-angle row.
pub fn column_cos_gamma(u: &TableUniforms, x: u32) -> f32 {
    2.0 * x as f32 / (u.table_size as f32 - 1.0) - 1.0
}

/// A small 2D table filled by one kernel whenever the model updates.
pub struct AnalyticTable<B> {
    backend: B,
    label: &'static str,
    rows: u32,
    kernel: fn() -> KernelDescriptor<TableUniforms>,
    resources: Option<(KernelId, TableId)>,
}

impl<B> AnalyticTable<B>
where
    B: ComputeBackend<TableUniforms>,
{
    pub fn new(
        backend: B,
        label: &'static str,
        rows: u32,
        kernel: fn() -> KernelDescriptor<TableUniforms>,
    ) -> Self {
        Self {
            backend,
            label,
            rows,
            kernel,
            resources: None,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent::new_2d(TABLE_SIZE, self.rows)
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn initialize(&mut self) -> Result<()> {
        if self.resources.is_some() {
            bail!("{} table is already initialized", self.label);
        }
        let kernel = self.backend.compile((self.kernel)())?;
        let table = self.backend.create_table(self.label, self.extent())?;
        self.resources = Some((kernel, table));
        Ok(())
    }

    pub fn fill(&mut self, uniforms: &TableUniforms) -> Result<()> {
        let (kernel, table) = self
            .resources
            .ok_or_else(|| anyhow!("{} table used before initialize", self.label))?;
        trace!("filling {} table", self.label);
        self.backend.dispatch(&Dispatch {
            kernel,
            inputs: &[],
            outputs: &[table],
            layer: 0,
            uniforms,
        })?;
        self.backend.synchronize()
    }

    pub fn table(&self) -> Option<TableId> {
        self.resources.map(|(_, table)| table)
    }

    pub fn read(&mut self) -> Result<LookupTable> {
        match self.table() {
            Some(table) => self.backend.read_table(table),
            None => bail!("{} table used before initialize", self.label),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// The table plus the knobs shared by the table-backed models.
pub struct TableState<B> {
    pub table: AnalyticTable<B>,
    pub overcast: f32,
    pub horiz_crush: f32,
}

impl<B> TableState<B> {
    pub fn new(table: AnalyticTable<B>) -> Self {
        Self {
            table,
            overcast: 0.0,
            horiz_crush: 0.0,
        }
    }
}

/// Models whose shape can be pushed around by hand after the fit.
pub trait TableSkyModel: SkyModel {
    fn overcast(&self) -> f32;
    fn set_overcast(&mut self, overcast: f32);

    fn horiz_crush(&self) -> f32;
    fn set_horiz_crush(&mut self, horiz_crush: f32);
}

/// In cd/m^2, for sun zenith angle `theta_s`.
pub fn zenith_luminance(theta_s: f32, turbidity: f32) -> f32 {
    let chi = (4.0 / 9.0 - turbidity / 120.0) * (PI - 2.0 * theta_s);
    let lz = (4.0453 * turbidity - 4.9710) * chi.tan() - 0.2155 * turbidity + 2.4192;
    lz * 1000.0
}

/// Linear sRGB to CIE XYZ under D65.
pub fn rgb_to_xyz(rgb: &Vector3<f32>) -> Vector3<f32> {
    #[rustfmt::skip]
    let m = Matrix3::new(
        0.4124564, 0.3575761, 0.1804375,
        0.2126729, 0.7151522, 0.0721750,
        0.0193339, 0.1191920, 0.9503041,
    );
    m * rgb
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_white_has_unit_luminance() {
        let xyz = rgb_to_xyz(&Vector3::new(1.0, 1.0, 1.0));
        assert_relative_eq!(xyz.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(xyz.x, 0.9504700, epsilon = 1e-6);
        assert_relative_eq!(xyz.z, 1.0888300, epsilon = 1e-6);
    }

    #[test]
    fn test_zenith_luminance_overhead() {
        // chi = (4/9 - T/120) * pi with the sun overhead.
        let t = 2.5f32;
        let chi = (4.0 / 9.0 - t / 120.0) * PI;
        let expect = ((4.0453 * t - 4.9710) * chi.tan() - 0.2155 * t + 2.4192) * 1000.0;
        assert_relative_eq!(zenith_luminance(0.0, t), expect);
        assert!(zenith_luminance(0.0, t) > 0.0);
    }

    #[test]
    fn test_columns_span_range() {
        let u = TableUniforms::new(2, &[]);
        assert_eq!(column_cos_theta(&u, 0), 0.0);
        assert_eq!(column_cos_theta(&u, TABLE_SIZE - 1), 1.0);
        assert_eq!(column_cos_gamma(&u, 0), -1.0);
        assert_eq!(column_cos_gamma(&u, TABLE_SIZE - 1), 1.0);
    }

    #[test]
    fn test_uniforms_pack_coefficients() {
        let u = TableUniforms::new(3, &[Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0)]);
        assert_eq!(u.coefficients[0], [1.0, 2.0, 3.0, 0.0]);
        assert_eq!(u.coefficient(1), Vector3::new(4.0, 5.0, 6.0));
        assert_eq!(u.coefficients[2], [0.0; 4]);
        assert_eq!(u.rows, 3);
        assert_eq!(u.table_size, TABLE_SIZE);
    }
}
