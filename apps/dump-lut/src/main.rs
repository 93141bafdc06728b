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
use anyhow::Result;
use atmosphere::{PrecomputeConfig, ScatteringPipeline, ScatteringUniforms};
use compute::{ComputeBackend, CpuBackend, Recorder, WgpuBackend};
use gpu::{Gpu, GpuConfig};
use log::info;
use lut::dump_table;
use std::{fs, path::PathBuf, sync::Arc, time::Instant};
use structopt::StructOpt;

/// Precompute the atmosphere and dump every table it produces
#[derive(Debug, StructOpt)]
#[structopt(name = "dump-lut")]
struct Opt {
    /// Directory to write images into
    #[structopt(short, long, default_value = "__dump__")]
    output: PathBuf,

    /// Exposure used to tone map the tables
    #[structopt(short, long, default_value = "10")]
    exposure: f32,

    /// Use reduced table sizes and sample counts
    #[structopt(short, long)]
    tiny: bool,

    /// Run the kernels on the GPU instead of the host
    #[structopt(short, long)]
    gpu: bool,

    /// Also dump the scratch tables left by the last scattering order
    #[structopt(short, long)]
    scratch: bool,
}

fn dump<B>(mut pipeline: ScatteringPipeline<Recorder<B>>, opt: &Opt) -> Result<()>
where
    B: ComputeBackend<ScatteringUniforms>,
{
    let start = Instant::now();
    pipeline.precompute()?;
    let backend = pipeline.backend();
    info!(
        "{} dispatches, {} syncs in {:?}",
        backend.log().len(),
        backend.sync_count(),
        start.elapsed()
    );

    let tables = pipeline.tables().to_owned();
    let mut named = vec![
        ("transmittance", tables.transmittance),
        ("irradiance", tables.irradiance()),
        ("inscatter", tables.inscatter()),
    ];
    if opt.scratch {
        named.extend([
            ("delta-e", tables.delta_e),
            ("delta-sr", tables.delta_sr),
            ("delta-sm", tables.delta_sm),
            ("delta-j", tables.delta_j),
        ]);
    }

    fs::create_dir_all(&opt.output)?;
    for (name, id) in named {
        let table = pipeline.backend_mut().read_table(id)?;
        let written = dump_table(&table, &opt.output.join(name), opt.exposure)?;
        println!("{}: {} images", name, written.len());
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let config = if opt.tiny {
        PrecomputeConfig::tiny()
    } else {
        PrecomputeConfig::default()
    };
    info!("atmosphere fingerprint {}", config.fingerprint());

    if opt.gpu {
        let gpu = Arc::new(Gpu::new(GpuConfig::default())?);
        let backend = Recorder::new(WgpuBackend::new(gpu));
        dump(ScatteringPipeline::new(backend, config)?, &opt)
    } else {
        let backend = Recorder::new(CpuBackend::new());
        dump(ScatteringPipeline::new(backend, config)?, &opt)
    }
}
