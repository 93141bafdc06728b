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
    workgroups, ComputeBackend, ComputeError, CpuKernel, Dispatch, Invocation, KernelDescriptor,
    KernelId, KernelOutput, Signature, TableId, Uniforms,
};
use anyhow::Result;
use log::trace;
use lut::{Extent, LookupTable};
use rayon::prelude::*;
use std::{marker::PhantomData, sync::Arc};

struct HostTable {
    label: String,
    table: LookupTable,
}

struct HostKernel<U> {
    signature: Signature,
    body: Arc<dyn CpuKernel<U>>,
}

/// Reference backend: tables in host memory, kernels as Rust functions.
/// Texels of a layer are evaluated in parallel, but a dispatch has returned
/// completely before the next one starts, so `synchronize` has nothing to do.
pub struct CpuBackend<U> {
    tables: Vec<HostTable>,
    kernels: Vec<HostKernel<U>>,
    _phantom: PhantomData<U>,
}

impl<U> Default for CpuBackend<U> {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            kernels: Vec::new(),
            _phantom: PhantomData,
        }
    }
}

impl<U> CpuBackend<U> {
    pub fn new() -> Self {
        Self::default()
    }

    fn host_table(&self, table: TableId) -> Result<&HostTable, ComputeError> {
        self.tables
            .get(table.index())
            .ok_or(ComputeError::UnknownTable(table))
    }

    /// Borrow a table without copying it out.
    pub fn table(&self, table: TableId) -> Result<&LookupTable> {
        Ok(&self.host_table(table)?.table)
    }
}

impl<U: Uniforms> ComputeBackend<U> for CpuBackend<U> {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn create_table(&mut self, label: &str, extent: Extent) -> Result<TableId> {
        trace!("creating {} table {}", extent, label);
        self.tables.push(HostTable {
            label: label.to_owned(),
            table: LookupTable::new(extent),
        });
        Ok(TableId(self.tables.len() - 1))
    }

    fn table_extent(&self, table: TableId) -> Result<Extent> {
        Ok(self.host_table(table)?.table.extent())
    }

    fn compile(&mut self, kernel: KernelDescriptor<U>) -> Result<KernelId> {
        let signature = Signature::of(&kernel);
        let body = kernel.cpu.ok_or_else(|| ComputeError::KernelCompile {
            kernel: signature.name,
            reason: "no host implementation".to_owned(),
        })?;
        self.kernels.push(HostKernel { signature, body });
        Ok(KernelId(self.kernels.len() - 1))
    }

    fn dispatch(&mut self, dispatch: &Dispatch<U>) -> Result<()> {
        let kernel = self
            .kernels
            .get(dispatch.kernel.0)
            .ok_or(ComputeError::UnknownKernel(dispatch.kernel))?;
        let extent = kernel.signature.validate(
            dispatch.inputs,
            dispatch.outputs,
            dispatch.layer,
            |id| self.host_table(id).map(|t| t.table.extent()),
        )?;
        trace!(
            "{}: layer {} of {:?} -> {:?} in {:?} groups",
            kernel.signature.name,
            dispatch.layer,
            dispatch.inputs,
            dispatch.outputs,
            workgroups(extent.width, extent.height)
        );

        let inputs = dispatch
            .inputs
            .iter()
            .map(|&id| &self.tables[id.index()].table)
            .collect::<Vec<_>>();
        let width = extent.width;
        let layer = dispatch.layer;
        let results: Vec<KernelOutput> = (0..extent.layer_len())
            .into_par_iter()
            .map(|i| {
                let at = Invocation {
                    x: i as u32 % width,
                    y: i as u32 / width,
                    layer,
                };
                kernel.body.invoke(dispatch.uniforms, &inputs, at)
            })
            .collect();

        for (slot, &id) in dispatch.outputs.iter().enumerate() {
            // Outputs never alias inputs, so nothing above borrows these.
            let target = self.tables[id.index()].table.layer_mut(layer);
            for (texel, result) in target.iter_mut().zip(&results) {
                *texel = result[slot];
            }
        }
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        Ok(())
    }

    fn read_table(&mut self, table: TableId) -> Result<LookupTable> {
        Ok(self.host_table(table)?.table.clone())
    }

    fn write_table(&mut self, table: TableId, data: &LookupTable) -> Result<()> {
        let host = self
            .tables
            .get_mut(table.index())
            .ok_or(ComputeError::UnknownTable(table))?;
        trace!("writing {} bytes into {}", data.as_bytes().len(), host.label);
        host.table.copy_from(data)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Dimension;
    use lut::Texel;
    use zerocopy::AsBytes;

    #[repr(C)]
    #[derive(AsBytes, Copy, Clone)]
    struct Scale {
        factor: f32,
    }

    fn coords(u: &Scale, _inputs: &[&LookupTable], at: Invocation) -> KernelOutput {
        let t: Texel = [at.x as f32, at.y as f32, at.layer as f32, u.factor];
        [t, [u.factor; 4]]
    }

    fn double(_u: &Scale, inputs: &[&LookupTable], at: Invocation) -> KernelOutput {
        let t = inputs[0].texel(at.x, at.y, at.layer);
        [[t[0] * 2.0, t[1] * 2.0, t[2] * 2.0, t[3] * 2.0], [0.0; 4]]
    }

    #[test]
    fn test_dispatch_writes_one_layer() -> Result<()> {
        let mut backend = CpuBackend::<Scale>::new();
        let a = backend.create_table("a", Extent::new_3d(3, 2, 2))?;
        let b = backend.create_table("b", Extent::new_3d(3, 2, 2))?;
        let kernel = backend.compile(
            KernelDescriptor::new("coords")
                .output(Dimension::D3)
                .output(Dimension::D3)
                .cpu(coords),
        )?;
        backend.dispatch(&Dispatch {
            kernel,
            inputs: &[],
            outputs: &[a, b],
            layer: 1,
            uniforms: &Scale { factor: 0.5 },
        })?;
        let a = backend.read_table(a)?;
        assert_eq!(a.texel(2, 1, 1), [2.0, 1.0, 1.0, 0.5]);
        assert_eq!(a.texel(2, 1, 0), [0.0; 4]);
        assert_eq!(backend.read_table(b)?.texel(0, 0, 1), [0.5; 4]);
        Ok(())
    }

    #[test]
    fn test_dispatch_reads_inputs() -> Result<()> {
        let mut backend = CpuBackend::<Scale>::new();
        let src = backend.create_table("src", Extent::new_2d(4, 4))?;
        let dst = backend.create_table("dst", Extent::new_2d(4, 4))?;
        let kernel = backend.compile(
            KernelDescriptor::new("double")
                .input(Dimension::D2)
                .output(Dimension::D2)
                .cpu(double),
        )?;
        let seed = LookupTable::from_fn(Extent::new_2d(4, 4), |x, y, _| {
            [x as f32, y as f32, 1.0, 0.0]
        });
        backend.write_table(src, &seed)?;
        backend.dispatch(&Dispatch {
            kernel,
            inputs: &[src],
            outputs: &[dst],
            layer: 0,
            uniforms: &Scale { factor: 1.0 },
        })?;
        backend.synchronize()?;
        assert_eq!(backend.table(dst)?.texel(3, 2, 0), [6.0, 4.0, 2.0, 0.0]);
        Ok(())
    }

    #[test]
    fn test_dispatch_rejects_in_place() -> Result<()> {
        let mut backend = CpuBackend::<Scale>::new();
        let t = backend.create_table("t", Extent::new_2d(4, 4))?;
        let kernel = backend.compile(
            KernelDescriptor::new("double")
                .input(Dimension::D2)
                .output(Dimension::D2)
                .cpu(double),
        )?;
        let result = backend.dispatch(&Dispatch {
            kernel,
            inputs: &[t],
            outputs: &[t],
            layer: 0,
            uniforms: &Scale { factor: 1.0 },
        });
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn test_compile_requires_host_kernel() {
        let mut backend = CpuBackend::<Scale>::new();
        let result = backend.compile(KernelDescriptor::new("gpu-only").output(Dimension::D2));
        assert!(result.is_err());
    }
}
