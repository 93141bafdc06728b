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

//! An Analytic Model for Full Spectral Sky-Dome Radiance, Hosek and Wilkie
//! 2012, using the RGB fit.
use crate::table::{
    column_cos_gamma, column_cos_theta, AnalyticTable, TableUniforms, TABLE_SIZE, TABLE_UNIT,
    TABLE_WGSL,
};
use anyhow::{bail, Result};
use byteorder::{ByteOrder, LittleEndian};
use compute::{ComputeBackend, Dimension, Invocation, KernelDescriptor, KernelOutput, TableId};
use log::{debug, info};
use lut::LookupTable;
use nalgebra::Vector3;
use sky_model::{ShaderProgram, SkyModel, SkyState};
use std::{
    f64::consts::FRAC_PI_2,
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;

pub const HOSEK_ROWS: u32 = 3;

/// Coefficients A through I.
pub const PARAMETER_COUNT: usize = 9;

const ALBEDOS: usize = 2;
const TURBIDITIES: usize = 10;
const SPLINE_POINTS: usize = 6;

/// Per channel.
pub const PARAMETER_VALUES: usize = ALBEDOS * TURBIDITIES * SPLINE_POINTS * PARAMETER_COUNT;
pub const RADIANCE_VALUES: usize = ALBEDOS * TURBIDITIES * SPLINE_POINTS;

/// Every channel's parameters, then every channel's radiances.
pub const DATASET_VALUES: usize = 3 * (PARAMETER_VALUES + RADIANCE_VALUES);
pub const DATASET_BYTES: usize = DATASET_VALUES * 8;

const LUMINANCE: [f32; 3] = [0.2126, 0.7152, 0.0722];

/// The published RGB fit in the `from_bytes` layout. See
/// data/LICENSE-hosek-wilkie.txt.
pub const RGB_DATASET: &[u8] = include_bytes!("../data/hosek_rgb.bin");

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read hosek-wilkie dataset {path:?}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("hosek-wilkie dataset is {actual} bytes, expected {expected}")]
    WrongLength { expected: usize, actual: usize },
}

/// The fitted RGB dataset: per channel, spline control points over sun
/// elevation for each albedo and turbidity.
#[derive(Clone, Debug, PartialEq)]
pub struct HosekDataset {
    parameters: [Vec<f64>; 3],
    radiances: [Vec<f64>; 3],
}

impl HosekDataset {
    pub fn from_bytes(data: &[u8]) -> Result<Self, DatasetError> {
        if data.len() != DATASET_BYTES {
            return Err(DatasetError::WrongLength {
                expected: DATASET_BYTES,
                actual: data.len(),
            });
        }
        let mut values = vec![0f64; DATASET_VALUES];
        LittleEndian::read_f64_into(data, &mut values);
        let (parameters, radiances) = values.split_at(3 * PARAMETER_VALUES);
        let channel = |values: &[f64], n: usize, i: usize| values[i * n..(i + 1) * n].to_vec();
        Ok(Self {
            parameters: [0, 1, 2].map(|i| channel(parameters, PARAMETER_VALUES, i)),
            radiances: [0, 1, 2].map(|i| channel(radiances, RADIANCE_VALUES, i)),
        })
    }

    /// The dataset compiled into the crate.
    pub fn rgb() -> Result<Self, DatasetError> {
        Self::from_bytes(RGB_DATASET)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| DatasetError::Io {
            path: path.to_owned(),
            source,
        })?;
        let dataset = Self::from_bytes(&data)?;
        debug!("loaded hosek-wilkie dataset from {:?}", path);
        Ok(dataset)
    }

    pub fn parameters(&self, channel: usize) -> &[f64] {
        &self.parameters[channel]
    }

    pub fn radiances(&self, channel: usize) -> &[f64] {
        &self.radiances[channel]
    }
}

/// Quintic Bézier over every `stride`th value of `spline`.
pub fn evaluate_spline(spline: &[f64], stride: usize, value: f64) -> f64 {
    let v = value;
    let w = 1.0 - value;
    w.powi(5) * spline[0]
        + 5.0 * w.powi(4) * v * spline[stride]
        + 10.0 * w.powi(3) * v.powi(2) * spline[2 * stride]
        + 10.0 * w.powi(2) * v.powi(3) * spline[3 * stride]
        + 5.0 * w * v.powi(4) * spline[4 * stride]
        + v.powi(5) * spline[5 * stride]
}

/// Blend the splines bracketing `turbidity` at both albedos. `dataset` starts
/// at the wanted parameter; consecutive spline points are `stride` apart.
pub fn evaluate(
    dataset: &[f64],
    stride: usize,
    turbidity: f32,
    albedo: f32,
    sun_theta: f32,
) -> f64 {
    // Splines are in elevation^(1/3).
    let elevation_k = (1.0 - sun_theta as f64 / FRAC_PI_2).max(0.0).powf(1.0 / 3.0);

    // Fits exist for turbidity 1 through 10.
    let t0 = (turbidity as i32).clamp(1, 10) as usize;
    let t1 = (t0 + 1).min(10);
    let tk = (turbidity - t0 as f32).clamp(0.0, 1.0) as f64;
    let albedo = albedo as f64;

    let block = stride * SPLINE_POINTS;
    let a1 = block * TURBIDITIES;
    let spline = |offset: usize| evaluate_spline(&dataset[offset..], stride, elevation_k);
    let a0t0 = spline(block * (t0 - 1));
    let a1t0 = spline(a1 + block * (t0 - 1));
    let a0t1 = spline(block * (t1 - 1));
    let a1t1 = spline(a1 + block * (t1 - 1));

    a0t0 * (1.0 - albedo) * (1.0 - tk)
        + a1t0 * albedo * (1.0 - tk)
        + a0t1 * (1.0 - albedo) * tk
        + a1t1 * albedo * tk
}

/// Coefficients A through I, each per RGB channel.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HosekCoefficients {
    pub params: [Vector3<f32>; PARAMETER_COUNT],
}

impl HosekCoefficients {
    pub fn a(&self) -> Vector3<f32> {
        self.params[0]
    }
    pub fn b(&self) -> Vector3<f32> {
        self.params[1]
    }
    pub fn c(&self) -> Vector3<f32> {
        self.params[2]
    }
    pub fn d(&self) -> Vector3<f32> {
        self.params[3]
    }
    pub fn e(&self) -> Vector3<f32> {
        self.params[4]
    }
    pub fn f(&self) -> Vector3<f32> {
        self.params[5]
    }
    pub fn g(&self) -> Vector3<f32> {
        self.params[6]
    }
    pub fn h(&self) -> Vector3<f32> {
        self.params[7]
    }
    pub fn i(&self) -> Vector3<f32> {
        self.params[8]
    }

    /// Relative radiance toward a view at `cos_theta` from the zenith and
    /// `gamma` from the sun.
    pub fn radiance(&self, cos_theta: f32, gamma: f32, cos_gamma: f32) -> Vector3<f32> {
        let one = Vector3::repeat(1.0);
        let h = self.h();
        let chi = (one + h.component_mul(&h) - h * 2.0 * cos_gamma)
            .map(|v| (1.0 + cos_gamma * cos_gamma) / v.powf(1.5));
        let zenith = one + self.a().component_mul(&(self.b() / (cos_theta + 0.01)).map(f32::exp));
        let sun = self.c()
            + self.d().component_mul(&(self.e() * gamma).map(f32::exp))
            + self.f() * cos_gamma * cos_gamma
            + self.g().component_mul(&chi)
            + self.i() * cos_theta.max(0.0).sqrt();
        zenith.component_mul(&sun)
    }
}

fn hosek_table_kernel(u: &TableUniforms, _: &[&LookupTable], at: Invocation) -> KernelOutput {
    let one = Vector3::repeat(1.0);
    let value = match at.y {
        0 => {
            let cos_theta = column_cos_theta(u, at.x);
            one + u
                .coefficient(0)
                .component_mul(&(u.coefficient(1) / (cos_theta + 0.01)).map(f32::exp))
        }
        1 => {
            let cos_gamma = column_cos_gamma(u, at.x);
            let gamma = cos_gamma.clamp(-1.0, 1.0).acos();
            let h = u.coefficient(7);
            let chi = (one + h.component_mul(&h) - h * 2.0 * cos_gamma)
                .map(|v| (1.0 + cos_gamma * cos_gamma) / v.powf(1.5));
            u.coefficient(2)
                + u.coefficient(3)
                    .component_mul(&(u.coefficient(4) * gamma).map(f32::exp))
                + u.coefficient(5) * cos_gamma * cos_gamma
                + u.coefficient(6).component_mul(&chi)
        }
        _ => {
            let cos_theta = column_cos_theta(u, at.x);
            u.coefficient(8) * cos_theta.max(0.0).sqrt()
        }
    };
    [[value.x, value.y, value.z, 0.0], [0.0; 4]]
}

pub fn hosek_table() -> KernelDescriptor<TableUniforms> {
    KernelDescriptor::new("hosek_table")
        .output(Dimension::D2)
        .wgsl(TABLE_WGSL)
        .wgsl(include_str!("shaders/hosek_table.wgsl"))
        .cpu(hosek_table_kernel)
}

enum DatasetSource {
    Embedded,
    File(PathBuf),
    Loaded(HosekDataset),
}

pub struct HosekWilkieSkyModel<B> {
    state: SkyState,
    table: AnalyticTable<B>,
    source: DatasetSource,
    coefficients: HosekCoefficients,
    z: Vector3<f32>,
}

impl<B> HosekWilkieSkyModel<B>
where
    B: ComputeBackend<TableUniforms>,
{
    /// Fit against the built in RGB dataset.
    pub fn new(backend: B) -> Self {
        Self::with_source(backend, DatasetSource::Embedded)
    }

    /// The dataset is read from `path` on initialize.
    pub fn from_file<P: AsRef<Path>>(backend: B, path: P) -> Self {
        Self::with_source(backend, DatasetSource::File(path.as_ref().to_owned()))
    }

    pub fn with_dataset(backend: B, dataset: HosekDataset) -> Self {
        Self::with_source(backend, DatasetSource::Loaded(dataset))
    }

    fn with_source(backend: B, source: DatasetSource) -> Self {
        Self {
            state: SkyState::default(),
            table: AnalyticTable::new(backend, "hosek-wilkie-table", HOSEK_ROWS, hosek_table),
            source,
            coefficients: HosekCoefficients::default(),
            z: Vector3::zeros(),
        }
    }

    pub fn albedo(&self) -> f32 {
        self.state.albedo
    }

    pub fn set_albedo(&mut self, albedo: f32) {
        self.state.albedo = albedo;
    }

    pub fn coefficients(&self) -> &HosekCoefficients {
        &self.coefficients
    }

    /// Radiance at the zenith for each channel.
    pub fn z(&self) -> Vector3<f32> {
        self.z
    }

    pub fn table(&self) -> Option<TableId> {
        self.table.table()
    }

    pub fn read_table(&mut self) -> Result<LookupTable> {
        self.table.read()
    }

    fn dataset(&self) -> Option<&HosekDataset> {
        match &self.source {
            DatasetSource::Loaded(dataset) => Some(dataset),
            DatasetSource::Embedded | DatasetSource::File(_) => None,
        }
    }

    fn fit(&mut self) -> Result<()> {
        let dataset = match self.dataset() {
            Some(dataset) => dataset,
            None => bail!("hosek-wilkie model used before initialize"),
        };
        let sun_theta = self.state.direction.y.clamp(0.0, 1.0).acos();
        let turbidity = self.state.turbidity;
        let albedo = self.state.albedo;
        let at = |values: &[f64], stride: usize| {
            evaluate(values, stride, turbidity, albedo, sun_theta) as f32
        };

        let mut coefficients = HosekCoefficients::default();
        let mut z = Vector3::zeros();
        for channel in 0..3 {
            let params = dataset.parameters(channel);
            for (slot, coefficient) in coefficients.params.iter_mut().enumerate() {
                // H and I are stored the other way around.
                let param = match slot {
                    7 => 8,
                    8 => 7,
                    n => n,
                };
                coefficient[channel] = at(&params[param..], PARAMETER_COUNT);
            }
            z[channel] = at(dataset.radiances(channel), 1);
        }

        let normalized_sun_y = self.state.normalized_sun_y;
        if normalized_sun_y != 0.0 {
            let s = coefficients
                .radiance(sun_theta.cos(), 0.0, 1.0)
                .component_mul(&z);
            z /= s.dot(&Vector3::from(LUMINANCE));
            z *= normalized_sun_y;
        }

        self.coefficients = coefficients;
        self.z = z;
        Ok(())
    }
}

impl<B> SkyModel for HosekWilkieSkyModel<B>
where
    B: ComputeBackend<TableUniforms>,
{
    fn name(&self) -> &'static str {
        "hosek-wilkie"
    }

    fn initialize(&mut self) -> Result<()> {
        match &self.source {
            DatasetSource::Embedded => {
                self.source = DatasetSource::Loaded(HosekDataset::rgb()?);
            }
            DatasetSource::File(path) => {
                let dataset = HosekDataset::load(path)?;
                info!("hosek-wilkie dataset {:?}", path);
                self.source = DatasetSource::Loaded(dataset);
            }
            DatasetSource::Loaded(_) => {}
        }
        self.table.initialize()
    }

    fn update(&mut self) -> Result<()> {
        self.fit()?;
        let uniforms = TableUniforms::new(HOSEK_ROWS, &self.coefficients.params);
        self.table.fill(&uniforms)
    }

    fn set_render_uniforms(&self, program: &mut dyn ShaderProgram) {
        if let Some(table) = self.table() {
            program.bind_table("s_Table", TABLE_UNIT, table);
        }
        program.set_uniform("TABLE_SIZE", (TABLE_SIZE as i32).into());
        program.set_uniform("u_Direction", self.direction().into());
        for (name, value) in ["A", "B", "C", "D", "E", "F", "G", "H", "I"]
            .iter()
            .zip(&self.coefficients.params)
        {
            program.set_uniform(name, (*value).into());
        }
        program.set_uniform("Z", self.z.into());
    }

    fn state(&self) -> &SkyState {
        &self.state
    }

    fn state_mut(&mut self) -> &mut SkyState {
        &mut self.state
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;
    use byteorder::WriteBytesExt;
    use compute::CpuBackend;
    use sky_model::{RecordingProgram, UniformValue};

    const PARAMS: [f64; PARAMETER_COUNT] = [-1.0, -0.3, 1.0, 0.5, -2.0, 0.1, 0.2, 0.4, 0.6];

    // Parameter p is constant; radiance depends on albedo and turbidity only.
    fn synthetic() -> Result<Vec<u8>> {
        let mut data = Vec::with_capacity(DATASET_BYTES);
        for _channel in 0..3 {
            for i in 0..PARAMETER_VALUES {
                data.write_f64::<LittleEndian>(PARAMS[i % PARAMETER_COUNT])?;
            }
        }
        for _channel in 0..3 {
            for albedo in 0..ALBEDOS {
                for turbidity in 0..TURBIDITIES {
                    for _point in 0..SPLINE_POINTS {
                        let value = (turbidity + 1) as f64 + 10.0 * albedo as f64;
                        data.write_f64::<LittleEndian>(value)?;
                    }
                }
            }
        }
        Ok(data)
    }

    fn model() -> Result<HosekWilkieSkyModel<CpuBackend<TableUniforms>>> {
        let dataset = HosekDataset::from_bytes(&synthetic()?)?;
        let mut model = HosekWilkieSkyModel::with_dataset(CpuBackend::new(), dataset);
        model.initialize()?;
        Ok(model)
    }

    #[test]
    fn test_spline_of_constant_is_constant() {
        let spline = [2.5f64; 6];
        for v in [0.0, 0.3, 0.9, 1.0] {
            assert_relative_eq!(evaluate_spline(&spline, 1, v), 2.5, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_spline_endpoints() {
        let spline = [1.0, 9.0, 9.0, 9.0, 9.0, 4.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        assert_eq!(evaluate_spline(&spline, 1, 0.0), 1.0);
        assert_eq!(evaluate_spline(&spline, 1, 1.0), 4.0);
        let strided = [1.0, -1.0, 9.0, -1.0, 9.0, -1.0, 9.0, -1.0, 9.0, -1.0, 4.0];
        assert_eq!(evaluate_spline(&strided, 2, 1.0), 4.0);
    }

    #[test]
    fn test_dataset_length_is_checked() -> Result<()> {
        let data = synthetic()?;
        assert!(matches!(
            HosekDataset::from_bytes(&data[..data.len() - 8]),
            Err(DatasetError::WrongLength { actual, .. }) if actual == DATASET_BYTES - 8
        ));
        assert!(HosekDataset::from_bytes(&data).is_ok());
        Ok(())
    }

    #[test]
    fn test_missing_dataset_fails_initialize() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut model = HosekWilkieSkyModel::from_file(CpuBackend::new(), dir.path().join("nope.bin"));
        assert!(model.initialize().is_err());
        Ok(())
    }

    #[test]
    fn test_dataset_loads_from_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("hosek_rgb.bin");
        fs::write(&path, synthetic()?)?;
        let mut model = HosekWilkieSkyModel::from_file(CpuBackend::new(), &path);
        model.initialize()?;
        model.update()?;
        assert_relative_eq!(model.coefficients().a().x, -1.0, epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_builtin_dataset_overhead_clear_sky() -> Result<()> {
        let mut model = HosekWilkieSkyModel::new(CpuBackend::new());
        model.initialize()?;
        model.state_mut().normalized_sun_y = 0.0;
        model.set_albedo(0.0);
        model.set_turbidity(1.0);
        model.update()?;

        // Sun overhead lands on the last spline point of the turbidity 1,
        // albedo 0 fit.
        let c = model.coefficients();
        assert_relative_eq!(
            c.a(),
            Vector3::new(-1.1390719, -1.0754811, -1.0874569),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            c.h(),
            Vector3::new(0.50158101, 0.49994820, 0.49994299),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            c.i(),
            Vector3::new(1.5346810, 3.8897829, 3.1224041),
            epsilon = 1e-6
        );
        assert_relative_eq!(
            model.z(),
            Vector3::new(4.3245730, 8.0908327, 13.902380),
            epsilon = 1e-5
        );
        Ok(())
    }

    #[test]
    fn test_builtin_dataset_is_complete() -> Result<()> {
        assert_eq!(RGB_DATASET.len(), DATASET_BYTES);
        let dataset = HosekDataset::rgb()?;
        for channel in 0..3 {
            assert!(dataset.parameters(channel).iter().all(|v| v.is_finite()));
            assert!(dataset.radiances(channel).iter().all(|v| v.is_finite()));
        }
        Ok(())
    }

    #[test]
    fn test_turbidity_and_albedo_blend() -> Result<()> {
        let dataset = HosekDataset::from_bytes(&synthetic()?)?;
        let radiance = dataset.radiances(1);
        assert_relative_eq!(evaluate(radiance, 1, 4.5, 0.0, 0.3), 4.5, epsilon = 1e-9);
        assert_relative_eq!(evaluate(radiance, 1, 4.5, 0.1, 0.3), 5.5, epsilon = 1e-6);
        // Clamped to the fitted range.
        assert_relative_eq!(evaluate(radiance, 1, 12.0, 0.0, 0.3), 10.0, epsilon = 1e-9);
        assert_relative_eq!(evaluate(radiance, 1, 0.5, 0.0, 0.3), 1.0, epsilon = 1e-9);
        Ok(())
    }

    #[test]
    fn test_h_and_i_are_swapped() -> Result<()> {
        let mut model = model()?;
        model.update()?;
        let c = model.coefficients();
        for (slot, expect) in PARAMS.iter().enumerate().take(7) {
            assert_relative_eq!(c.params[slot].y, *expect as f32, epsilon = 1e-6);
        }
        assert_relative_eq!(c.h(), Vector3::repeat(0.6), epsilon = 1e-6);
        assert_relative_eq!(c.i(), Vector3::repeat(0.4), epsilon = 1e-6);
        Ok(())
    }

    #[test]
    fn test_sun_luminance_is_normalized() -> Result<()> {
        let mut model = model()?;
        model.set_direction(-Vector3::y());
        model.update()?;
        let c = model.coefficients();
        let s = c.radiance(1.0, 0.0, 1.0).component_mul(&model.z());
        assert_relative_eq!(
            s.dot(&Vector3::from(LUMINANCE)),
            model.state().normalized_sun_y,
            max_relative = 1e-4
        );
        Ok(())
    }

    #[test]
    fn test_unnormalized_z_is_raw_radiance() -> Result<()> {
        let mut model = model()?;
        model.state_mut().normalized_sun_y = 0.0;
        model.set_albedo(0.0);
        model.set_turbidity(3.0);
        model.update()?;
        assert_relative_eq!(model.z(), Vector3::repeat(3.0), epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_table_rows() -> Result<()> {
        let mut model = model()?;
        model.update()?;
        let table = model.read_table()?;
        let c = *model.coefficients();
        let last = TABLE_SIZE - 1;

        let zenith = table.texel(last, 0, 0);
        let expect = 1.0 + c.a().x * (c.b().x / 1.01).exp();
        assert_relative_eq!(zenith[0], expect, max_relative = 1e-5);

        // Toward the sun, gamma = 0 and cos(gamma) = 1.
        let h = c.h().x;
        let chi = 2.0 / (1.0 + h * h - 2.0 * h).powf(1.5);
        let sun = table.texel(last, 1, 0);
        assert_relative_eq!(
            sun[0],
            c.c().x + c.d().x + c.f().x + c.g().x * chi,
            max_relative = 1e-4
        );

        let overhead = table.texel(last, 2, 0);
        assert_relative_eq!(overhead[0], c.i().x, max_relative = 1e-6);
        assert_eq!(table.texel(0, 2, 0)[0], 0.0);

        // The rows multiply back into the full model.
        let full = c.radiance(1.0, 0.0, 1.0).x;
        assert_relative_eq!(zenith[0] * (sun[0] + overhead[0]), full, max_relative = 1e-4);
        Ok(())
    }

    #[test]
    fn test_render_uniforms() -> Result<()> {
        let mut model = model()?;
        model.update()?;
        let mut program = RecordingProgram::default();
        model.set_render_uniforms(&mut program);
        assert_eq!(program.unit(TABLE_UNIT), model.table());
        assert_eq!(program.uniform("TABLE_SIZE"), Some(&UniformValue::Int(64)));
        assert_eq!(
            program.uniform("H"),
            Some(&UniformValue::from(model.coefficients().h()))
        );
        assert_eq!(program.uniform("Z"), Some(&UniformValue::from(model.z())));
        for name in ["A", "B", "C", "D", "E", "F", "G", "I", "u_Direction"] {
            assert!(program.uniform(name).is_some(), "{}", name);
        }
        Ok(())
    }
}
