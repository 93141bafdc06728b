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
use analytic::{HosekWilkieSkyModel, PreethamSkyModel, TableSkyModel, TableUniforms};
use anyhow::{anyhow, bail, Result};
use atmosphere::{BrunetonSkyModel, CacheConfig, CacheLayout, PrecomputeConfig, ScatteringUniforms};
use compute::{ComputeBackend, CpuBackend, WgpuBackend};
use gpu::{Gpu, GpuConfig};
use log::{debug, info};
use nalgebra::Vector3;
use sky_model::{RecordingProgram, ShaderProgram, SkyModel, SkyModelKind};
use std::{path::PathBuf, str::FromStr, sync::Arc, time::Instant};
use structopt::StructOpt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum BackendKind {
    Cpu,
    Wgpu,
}

impl FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_lowercase().as_str() {
            "cpu" => Self::Cpu,
            "wgpu" | "gpu" => Self::Wgpu,
            _ => bail!("unknown backend: {}", s),
        })
    }
}

/// Drive the sky models the way a renderer would and print what they publish
#[derive(Debug, StructOpt)]
#[structopt(name = "horizon")]
struct Opt {
    /// Active model: bruneton, preetham, hosek-wilkie or its index
    #[structopt(short = "m", long, default_value = "bruneton")]
    sky_model: SkyModelKind,

    /// Sun angle in degrees; 0 is the horizon, -90 overhead
    #[structopt(short = "a", long, default_value = "-180", allow_hyphen_values = true)]
    sun_angle: f32,

    /// Degrees the sun moves between frames
    #[structopt(long, default_value = "0", allow_hyphen_values = true)]
    sun_step: f32,

    /// Turbidity for the analytic models
    #[structopt(short, long)]
    turbidity: Option<f32>,

    /// Blend toward an overcast sky (preetham only)
    #[structopt(long, default_value = "0")]
    overcast: f32,

    /// Flatten the horizon brightening (preetham only)
    #[structopt(long, default_value = "0")]
    horiz_crush: f32,

    #[structopt(short, long, default_value = "1")]
    exposure: f32,

    /// cpu or wgpu
    #[structopt(short, long, default_value = "cpu")]
    backend: BackendKind,

    /// Where the atmosphere tables are cached
    #[structopt(long, default_value = ".")]
    cache_dir: PathBuf,

    /// Use unversioned cache file names
    #[structopt(long)]
    legacy_cache: bool,

    /// Use reduced atmosphere table sizes
    #[structopt(long)]
    tiny: bool,

    /// Hosek-Wilkie dataset to use instead of the built in RGB fit
    #[structopt(long)]
    hosek_data: Option<PathBuf>,

    #[structopt(short, long, default_value = "1")]
    frames: usize,
}

impl Opt {
    fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            directory: self.cache_dir.clone(),
            layout: if self.legacy_cache {
                CacheLayout::Legacy
            } else {
                CacheLayout::Fingerprinted
            },
        }
    }

    fn precompute_config(&self) -> PrecomputeConfig {
        if self.tiny {
            PrecomputeConfig::tiny()
        } else {
            PrecomputeConfig::default()
        }
    }
}

struct Sky {
    models: Vec<(SkyModelKind, Box<dyn SkyModel>)>,
}

impl Sky {
    fn new<S, T>(
        opt: &Opt,
        scattering: S,
        mut make_table_backend: impl FnMut() -> T,
    ) -> Result<Self>
    where
        S: ComputeBackend<ScatteringUniforms> + 'static,
        T: ComputeBackend<TableUniforms> + 'static,
    {
        let mut models: Vec<(SkyModelKind, Box<dyn SkyModel>)> = Vec::new();
        models.push((
            SkyModelKind::Bruneton,
            Box::new(BrunetonSkyModel::new(
                scattering,
                opt.precompute_config(),
                opt.cache_config(),
            )),
        ));

        let mut preetham = PreethamSkyModel::new(make_table_backend());
        preetham.set_overcast(opt.overcast);
        preetham.set_horiz_crush(opt.horiz_crush);
        models.push((SkyModelKind::Preetham, Box::new(preetham)));

        let hosek = match &opt.hosek_data {
            Some(path) => HosekWilkieSkyModel::from_file(make_table_backend(), path),
            None => HosekWilkieSkyModel::new(make_table_backend()),
        };
        models.push((SkyModelKind::HosekWilkie, Box::new(hosek)));

        for (kind, model) in models.iter_mut() {
            if *kind != SkyModelKind::Bruneton {
                if let Some(turbidity) = opt.turbidity {
                    model.set_turbidity(turbidity);
                }
            }
            let start = Instant::now();
            model.initialize()?;
            info!("initialized {} in {:?}", model.name(), start.elapsed());
        }
        Ok(Self { models })
    }

    fn active_mut(&mut self, kind: SkyModelKind) -> Result<&mut Box<dyn SkyModel>> {
        self.models
            .iter_mut()
            .find(|(k, _)| *k == kind)
            .map(|(_, model)| model)
            .ok_or_else(|| anyhow!("{} sky model is not available", kind))
    }

    fn set_direction(&mut self, direction: Vector3<f32>) {
        for (_, model) in self.models.iter_mut() {
            model.set_direction(direction);
        }
    }
}

fn sun_direction(degrees: f32) -> Vector3<f32> {
    let a = degrees.to_radians();
    Vector3::new(0.0, a.sin(), a.cos()).normalize()
}

fn run(opt: &Opt, mut sky: Sky) -> Result<()> {
    // Fail before the first frame rather than inside it.
    sky.active_mut(opt.sky_model)?;

    for frame in 0..opt.frames {
        let angle = opt.sun_angle + opt.sun_step * frame as f32;
        sky.set_direction(sun_direction(angle));

        let model = sky.active_mut(opt.sky_model)?;
        model.update()?;

        let mut program = RecordingProgram::default();
        program.set_uniform("sky_model", opt.sky_model.index().into());
        program.set_uniform("exposure", opt.exposure.into());
        model.set_render_uniforms(&mut program);

        info!("frame {} sun at {} degrees ({})", frame, angle, model.name());
        for (name, value) in program.uniforms() {
            println!("{:>16} = {:?}", name, value);
        }
        for (unit, table) in program.units() {
            debug!("unit {} -> {:?}", unit, table);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    match opt.backend {
        BackendKind::Cpu => {
            let sky = Sky::new(
                &opt,
                CpuBackend::<ScatteringUniforms>::new(),
                CpuBackend::<TableUniforms>::new,
            )?;
            run(&opt, sky)
        }
        BackendKind::Wgpu => {
            let gpu = Arc::new(Gpu::new(GpuConfig::default())?);
            let sky = Sky::new(
                &opt,
                WgpuBackend::<ScatteringUniforms>::new(gpu.clone()),
                || WgpuBackend::<TableUniforms>::new(gpu.clone()),
            )?;
            run(&opt, sky)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_relative_eq;

    fn cpu_sky(opt: &Opt) -> Result<Sky> {
        Sky::new(
            opt,
            CpuBackend::<ScatteringUniforms>::new(),
            CpuBackend::<TableUniforms>::new,
        )
    }

    #[test]
    fn test_sun_direction() {
        let overhead = sun_direction(90.0);
        assert_relative_eq!(overhead, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-6);
        let down = sun_direction(-180.0);
        assert_relative_eq!(down, Vector3::new(0.0, 0.0, -1.0), epsilon = 1e-6);
    }

    #[test]
    fn test_backend_names() -> Result<()> {
        assert_eq!("cpu".parse::<BackendKind>()?, BackendKind::Cpu);
        assert_eq!("WGPU".parse::<BackendKind>()?, BackendKind::Wgpu);
        assert!("vulkan".parse::<BackendKind>().is_err());
        Ok(())
    }

    #[test]
    fn test_publishes_mode_and_exposure() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let opt = Opt::from_iter_safe([
            "horizon",
            "--sky-model",
            "preetham",
            "--tiny",
            "--exposure",
            "2.5",
            "--frames",
            "2",
            "--cache-dir",
            dir.path().to_str().unwrap(),
        ])?;
        assert_eq!(opt.sky_model, SkyModelKind::Preetham);
        let sky = cpu_sky(&opt)?;
        assert_eq!(sky.models.len(), 3);
        run(&opt, sky)
    }

    #[test]
    fn test_every_model_is_built() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let opt = Opt::from_iter_safe([
            "horizon",
            "--sky-model",
            "2",
            "--tiny",
            "--cache-dir",
            dir.path().to_str().unwrap(),
        ])?;
        let sky = cpu_sky(&opt)?;
        let kinds = sky.models.iter().map(|(k, _)| *k).collect::<Vec<_>>();
        assert_eq!(kinds, SkyModelKind::ALL);
        run(&opt, sky)
    }

    #[test]
    fn test_bad_hosek_data_fails() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let missing = dir.path().join("missing.bin");
        let opt = Opt::from_iter_safe([
            "horizon",
            "--tiny",
            "--cache-dir",
            dir.path().to_str().unwrap(),
            "--hosek-data",
            missing.to_str().unwrap(),
        ])?;
        assert!(cpu_sky(&opt).is_err());
        Ok(())
    }
}
