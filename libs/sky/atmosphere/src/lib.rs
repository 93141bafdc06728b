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
mod cache;
pub mod kernels;
pub mod math;
mod params;
mod pipeline;

pub use crate::{
    cache::{CacheConfig, CacheError, CacheLayout, CacheStatus, DiskCache},
    params::{
        AtmosphereParameters, IntegrationSamples, PrecomputeConfig, ScatteringUniforms,
        TableDimensions, EARTH_POS, RENDER_BETA_R, RENDER_MIE_G, SCATTERING_UNIFORMS_SIZE,
        SUN_INTENSITY,
    },
    pipeline::{AtmosphereTables, PrecomputedTables, ScatteringPipeline, SCATTERING_ORDERS},
};

use anyhow::{bail, Result};
use compute::ComputeBackend;
use log::info;
use sky_model::{ShaderProgram, SkyModel, SkyState};

pub const TRANSMITTANCE_UNIT: u32 = 0;
pub const IRRADIANCE_UNIT: u32 = 1;
pub const INSCATTER_UNIT: u32 = 2;

/// The precomputed model. All of the work happens in `initialize`; after
/// that the tables never change and only the sun direction moves.
pub struct BrunetonSkyModel<B> {
    state: SkyState,
    config: PrecomputeConfig,
    cache: DiskCache,

    // Handed to the pipeline on initialize.
    backend: Option<B>,
    pipeline: Option<ScatteringPipeline<B>>,
    cache_status: Option<CacheStatus>,
}

impl<B> BrunetonSkyModel<B>
where
    B: ComputeBackend<ScatteringUniforms>,
{
    pub fn new(backend: B, config: PrecomputeConfig, cache: CacheConfig) -> Self {
        Self {
            state: SkyState::default(),
            cache: DiskCache::new(cache, &config),
            config,
            backend: Some(backend),
            pipeline: None,
            cache_status: None,
        }
    }

    pub fn config(&self) -> &PrecomputeConfig {
        &self.config
    }

    pub fn cache(&self) -> &DiskCache {
        &self.cache
    }

    /// How the last initialize found the cache.
    pub fn cache_status(&self) -> Option<&CacheStatus> {
        self.cache_status.as_ref()
    }

    pub fn pipeline(&self) -> Option<&ScatteringPipeline<B>> {
        self.pipeline.as_ref()
    }

    pub fn pipeline_mut(&mut self) -> Option<&mut ScatteringPipeline<B>> {
        self.pipeline.as_mut()
    }
}

impl<B> SkyModel for BrunetonSkyModel<B>
where
    B: ComputeBackend<ScatteringUniforms>,
{
    fn name(&self) -> &'static str {
        "bruneton"
    }

    fn initialize(&mut self) -> Result<()> {
        let backend = match self.backend.take() {
            Some(backend) => backend,
            None => bail!("bruneton sky model is already initialized"),
        };
        let mut pipeline = ScatteringPipeline::new(backend, self.config)?;
        let status = self.cache.load(&mut pipeline)?;
        if status != CacheStatus::Hit {
            info!("building atmosphere tables");
            pipeline.precompute()?;
            let tables = pipeline.read_tables()?;
            self.cache.save(&tables)?;
        }
        self.cache_status = Some(status);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    fn update(&mut self) -> Result<()> {
        Ok(())
    }

    fn set_render_uniforms(&self, program: &mut dyn ShaderProgram) {
        program.set_uniform("betaR", RENDER_BETA_R.into());
        program.set_uniform("mieG", RENDER_MIE_G.into());
        program.set_uniform("SUN_INTENSITY", SUN_INTENSITY.into());
        program.set_uniform("EARTH_POS", EARTH_POS.into());
        program.set_uniform("SUN_DIR", self.direction().into());

        if let Some(pipeline) = &self.pipeline {
            let tables = pipeline.tables();
            program.bind_table("s_Transmittance", TRANSMITTANCE_UNIT, tables.transmittance);
            program.bind_table("s_Irradiance", IRRADIANCE_UNIT, tables.irradiance());
            program.bind_table("s_Inscatter", INSCATTER_UNIT, tables.inscatter());
        }
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
    use compute::{CpuBackend, Recorder};
    use nalgebra::Vector3;
    use sky_model::{RecordingProgram, UniformValue};
    use std::fs;

    type TestModel = BrunetonSkyModel<Recorder<CpuBackend<ScatteringUniforms>>>;

    fn model(dir: &std::path::Path) -> TestModel {
        BrunetonSkyModel::new(
            Recorder::new(CpuBackend::new()),
            PrecomputeConfig::tiny(),
            CacheConfig::in_directory(dir),
        )
    }

    fn dispatches(model: &TestModel) -> usize {
        model
            .pipeline()
            .map(|p| p.backend().log().len())
            .unwrap_or_default()
    }

    #[test]
    fn test_initialize_fills_then_uses_cache() -> Result<()> {
        let dir = tempfile::tempdir()?;

        let mut first = model(dir.path());
        first.initialize()?;
        assert!(matches!(first.cache_status(), Some(CacheStatus::Miss(_))));
        assert!(dispatches(&first) > 0);
        for path in first.cache().paths() {
            assert!(path.exists(), "{:?}", path);
        }
        let computed = first.pipeline_mut().unwrap().read_tables()?;

        let mut second = model(dir.path());
        second.initialize()?;
        assert_eq!(second.cache_status(), Some(&CacheStatus::Hit));
        assert_eq!(dispatches(&second), 0);
        assert_eq!(second.pipeline_mut().unwrap().read_tables()?, computed);
        Ok(())
    }

    #[test]
    fn test_missing_cache_file_recomputes_everything() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut first = model(dir.path());
        first.initialize()?;
        let paths = first.cache().paths();

        for missing in &paths {
            fs::remove_file(missing)?;
            let mut next = model(dir.path());
            next.initialize()?;
            assert_eq!(next.cache_status(), Some(&CacheStatus::Miss(missing.clone())));
            assert_eq!(
                next.pipeline().unwrap().backend().dispatch_count("transmittance"),
                1
            );
            for path in &paths {
                assert!(path.exists(), "{:?}", path);
            }
        }
        Ok(())
    }

    #[test]
    fn test_initialize_twice_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut model = model(dir.path());
        model.initialize()?;
        assert!(model.initialize().is_err());
        Ok(())
    }

    #[test]
    fn test_render_uniforms() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut model = model(dir.path());
        model.update()?;
        model.initialize()?;
        model.set_direction(Vector3::new(0.0, -1.0, 0.0));

        let mut program = RecordingProgram::default();
        model.set_render_uniforms(&mut program);
        assert_eq!(
            program.uniform("betaR"),
            Some(&UniformValue::Vec3([0.0058 / 1000.0, 0.0135 / 1000.0, 0.0331 / 1000.0]))
        );
        assert_eq!(program.uniform("mieG"), Some(&UniformValue::Float(0.75)));
        assert_eq!(program.uniform("SUN_INTENSITY"), Some(&UniformValue::Float(100.0)));
        assert_eq!(
            program.uniform("EARTH_POS"),
            Some(&UniformValue::Vec3([0.0, 6_360_010.0, 0.0]))
        );
        assert_eq!(
            program.uniform("SUN_DIR"),
            Some(&UniformValue::Vec3([0.0, 1.0, 0.0]))
        );

        let tables = model.pipeline().unwrap().tables();
        assert_eq!(program.uniform("s_Transmittance"), Some(&UniformValue::Int(0)));
        assert_eq!(program.unit(TRANSMITTANCE_UNIT), Some(tables.transmittance));
        assert_eq!(program.unit(IRRADIANCE_UNIT), Some(tables.irradiance()));
        assert_eq!(program.unit(INSCATTER_UNIT), Some(tables.inscatter()));
        Ok(())
    }

    #[test]
    fn test_tables_bind_only_where_declared() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut model = model(dir.path());
        model.initialize()?;

        let mut program = RecordingProgram::with_uniforms(&["s_Inscatter", "SUN_DIR"]);
        model.set_render_uniforms(&mut program);
        assert_eq!(program.unit(TRANSMITTANCE_UNIT), None);
        assert_eq!(program.unit(IRRADIANCE_UNIT), None);
        assert!(program.unit(INSCATTER_UNIT).is_some());
        assert!(program.uniform("betaR").is_none());
        Ok(())
    }
}
