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
use crate::{
    kernels,
    params::{PrecomputeConfig, ScatteringUniforms, TableDimensions},
};
use anyhow::{ensure, Result};
use compute::{ComputeBackend, Dispatch, KernelId, TableId};
use log::{debug, info};
use lut::{DoubleBuffer, LookupTable};
use std::{ops::Range, time::Instant};

/// Scattering orders computed after single scattering.
pub const SCATTERING_ORDERS: Range<u32> = 2..4;

/// The three tables the shading stage samples.
#[derive(Clone, Debug, PartialEq)]
pub struct PrecomputedTables {
    pub transmittance: LookupTable,
    pub irradiance: LookupTable,
    pub inscatter: LookupTable,
}

#[derive(Clone, Debug)]
pub struct AtmosphereTables {
    pub transmittance: TableId,
    pub irradiance: DoubleBuffer<TableId>,
    pub inscatter: DoubleBuffer<TableId>,

    // Scratch for one scattering order.
    pub delta_e: TableId,
    pub delta_sr: TableId,
    pub delta_sm: TableId,
    pub delta_j: TableId,
}

impl AtmosphereTables {
    fn allocate<B>(backend: &mut B, dims: &TableDimensions) -> Result<Self>
    where
        B: ComputeBackend<ScatteringUniforms>,
    {
        Ok(Self {
            transmittance: backend.create_table("transmittance", dims.transmittance())?,
            irradiance: DoubleBuffer::new(
                backend.create_table("irradiance-0", dims.irradiance())?,
                backend.create_table("irradiance-1", dims.irradiance())?,
            ),
            inscatter: DoubleBuffer::new(
                backend.create_table("inscatter-0", dims.inscatter())?,
                backend.create_table("inscatter-1", dims.inscatter())?,
            ),
            delta_e: backend.create_table("delta-e", dims.irradiance())?,
            delta_sr: backend.create_table("delta-sr", dims.inscatter())?,
            delta_sm: backend.create_table("delta-sm", dims.inscatter())?,
            delta_j: backend.create_table("delta-j", dims.inscatter())?,
        })
    }

    pub fn irradiance(&self) -> TableId {
        *self.irradiance.read()
    }

    pub fn inscatter(&self) -> TableId {
        *self.inscatter.read()
    }
}

#[derive(Copy, Clone, Debug)]
struct Kernels {
    transmittance: KernelId,
    irradiance_1: KernelId,
    inscatter_1: KernelId,
    copy_irradiance: KernelId,
    copy_inscatter_1: KernelId,
    inscatter_s: KernelId,
    irradiance_n: KernelId,
    inscatter_n: KernelId,
    copy_inscatter_n: KernelId,
}

impl Kernels {
    fn compile<B>(backend: &mut B) -> Result<Self>
    where
        B: ComputeBackend<ScatteringUniforms>,
    {
        Ok(Self {
            transmittance: backend.compile(kernels::transmittance())?,
            irradiance_1: backend.compile(kernels::irradiance_1())?,
            inscatter_1: backend.compile(kernels::inscatter_1())?,
            copy_irradiance: backend.compile(kernels::copy_irradiance())?,
            copy_inscatter_1: backend.compile(kernels::copy_inscatter_1())?,
            inscatter_s: backend.compile(kernels::inscatter_s())?,
            irradiance_n: backend.compile(kernels::irradiance_n())?,
            inscatter_n: backend.compile(kernels::inscatter_n())?,
            copy_inscatter_n: backend.compile(kernels::copy_inscatter_n())?,
        })
    }
}

fn check_dimensions(dims: &TableDimensions) -> Result<()> {
    ensure!(
        dims.transmittance_w > 0 && dims.transmittance_h > 0,
        "empty transmittance table"
    );
    ensure!(
        dims.irradiance_w >= 2 && dims.irradiance_h >= 2,
        "irradiance table must be at least 2x2"
    );
    ensure!(dims.res_r >= 2, "need at least 2 altitude layers");
    ensure!(
        dims.res_mu >= 4 && dims.res_mu % 2 == 0,
        "view cosine resolution must be even and at least 4"
    );
    ensure!(
        dims.res_mu_s >= 2 && dims.res_nu >= 2,
        "sun cosine resolutions must be at least 2"
    );
    Ok(())
}

/// Solves for multiple scattering one order at a time, per Bruneton and
/// Neyret 2008. Single scattering is closed form; every later order gathers
/// the previous one as a source term and adds it into the running totals.
///
/// The totals are double buffered: each accumulation reads the current sum
/// and writes the new sum into the other slot, then the two swap roles.
pub struct ScatteringPipeline<B> {
    backend: B,
    config: PrecomputeConfig,
    uniforms: ScatteringUniforms,
    tables: AtmosphereTables,
    kernels: Kernels,
}

impl<B> ScatteringPipeline<B>
where
    B: ComputeBackend<ScatteringUniforms>,
{
    /// Builds every kernel up front; any that fails to compile fails the
    /// whole pipeline.
    pub fn new(mut backend: B, config: PrecomputeConfig) -> Result<Self> {
        check_dimensions(&config.dimensions)?;
        let kernels = Kernels::compile(&mut backend)?;
        let tables = AtmosphereTables::allocate(&mut backend, &config.dimensions)?;
        debug!(
            "atmosphere tables allocated on {}: {}, {}, {}",
            backend.name(),
            config.dimensions.transmittance(),
            config.dimensions.irradiance(),
            config.dimensions.inscatter()
        );
        Ok(Self {
            uniforms: ScatteringUniforms::new(&config),
            backend,
            config,
            tables,
            kernels,
        })
    }

    pub fn config(&self) -> &PrecomputeConfig {
        &self.config
    }

    pub fn tables(&self) -> &AtmosphereTables {
        &self.tables
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn run(
        &mut self,
        kernel: KernelId,
        inputs: &[TableId],
        outputs: &[TableId],
        uniforms: &ScatteringUniforms,
        layer: u32,
    ) -> Result<()> {
        self.backend.dispatch(&Dispatch {
            kernel,
            inputs,
            outputs,
            layer,
            uniforms,
        })?;
        self.backend.synchronize()
    }

    fn run_layers(
        &mut self,
        kernel: KernelId,
        inputs: &[TableId],
        outputs: &[TableId],
        uniforms: &ScatteringUniforms,
    ) -> Result<()> {
        for layer in 0..self.config.dimensions.res_r {
            self.run(kernel, inputs, outputs, uniforms, layer)?;
        }
        Ok(())
    }

    pub fn precompute(&mut self) -> Result<()> {
        let start = Instant::now();
        let k = self.kernels;
        let base = self.uniforms;
        let t = self.tables.transmittance;
        let delta_e = self.tables.delta_e;
        let delta_sr = self.tables.delta_sr;
        let delta_sm = self.tables.delta_sm;
        let delta_j = self.tables.delta_j;

        debug!("transmittance");
        self.run(k.transmittance, &[], &[t], &base, 0)?;

        debug!("irradiance order 1");
        self.run(k.irradiance_1, &[t], &[delta_e], &base, 0)?;

        debug!("inscatter order 1");
        self.run_layers(k.inscatter_1, &[t], &[delta_sr, delta_sm], &base)?;

        // The accumulated irradiance excludes the direct sun, so this only
        // clears it.
        debug!("irradiance clear");
        let (read, write) = (*self.tables.irradiance.read(), *self.tables.irradiance.write());
        self.run(k.copy_irradiance, &[delta_e, read], &[write], &base.with_k(0.0), 0)?;

        for order in SCATTERING_ORDERS {
            let order_start = Instant::now();
            let gather = base.with_first(order == 2);

            debug!("order {}: inscatter reset to single scattering", order);
            let write = *self.tables.inscatter.write();
            self.run_layers(k.copy_inscatter_1, &[delta_sr, delta_sm], &[write], &base)?;
            self.tables.inscatter.swap();

            debug!("order {}: source term", order);
            self.run_layers(
                k.inscatter_s,
                &[t, delta_e, delta_sr, delta_sm],
                &[delta_j],
                &gather,
            )?;

            debug!("order {}: ground irradiance", order);
            self.run(k.irradiance_n, &[delta_sr, delta_sm], &[delta_e], &gather, 0)?;

            debug!("order {}: inscatter", order);
            self.run_layers(k.inscatter_n, &[t, delta_j], &[delta_sr], &gather)?;

            debug!("order {}: accumulate irradiance", order);
            let (read, write) = (*self.tables.irradiance.read(), *self.tables.irradiance.write());
            self.run(k.copy_irradiance, &[delta_e, read], &[write], &base.with_k(1.0), 0)?;
            self.tables.irradiance.swap();

            debug!("order {}: accumulate inscatter", order);
            let (read, write) = (*self.tables.inscatter.read(), *self.tables.inscatter.write());
            self.run_layers(k.copy_inscatter_n, &[read, delta_sr], &[write], &base)?;
            self.tables.inscatter.swap();

            debug!("order {} took {:?}", order, order_start.elapsed());
        }

        info!(
            "precomputed atmosphere on {} in {:?}",
            self.backend.name(),
            start.elapsed()
        );
        Ok(())
    }

    pub fn read_tables(&mut self) -> Result<PrecomputedTables> {
        Ok(PrecomputedTables {
            transmittance: self.backend.read_table(self.tables.transmittance)?,
            irradiance: self.backend.read_table(self.tables.irradiance())?,
            inscatter: self.backend.read_table(self.tables.inscatter())?,
        })
    }

    /// Upload previously computed tables into the current slots.
    pub fn write_tables(&mut self, tables: &PrecomputedTables) -> Result<()> {
        self.backend
            .write_table(self.tables.transmittance, &tables.transmittance)?;
        self.backend
            .write_table(self.tables.irradiance(), &tables.irradiance)?;
        self.backend
            .write_table(self.tables.inscatter(), &tables.inscatter)?;
        Ok(())
    }
}
