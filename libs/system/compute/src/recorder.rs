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
use crate::{ComputeBackend, Dispatch, KernelDescriptor, KernelId, TableId, Uniforms};
use anyhow::Result;
use lut::{Extent, LookupTable};
use std::collections::HashMap;

/// One dispatch as seen by a `Recorder`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchRecord {
    pub kernel: &'static str,
    pub inputs: Vec<TableId>,
    pub outputs: Vec<TableId>,
    pub layer: u32,
    /// Synchronizations issued before this dispatch.
    pub syncs_before: usize,
}

/// Wraps another backend and keeps a log of everything dispatched through
/// it, so tools can report on and check the sequencing of a pipeline.
pub struct Recorder<B> {
    inner: B,
    names: HashMap<KernelId, &'static str>,
    labels: HashMap<TableId, String>,
    log: Vec<DispatchRecord>,
    syncs: usize,
    reads: usize,
    writes: usize,
}

impl<B> Recorder<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            names: HashMap::new(),
            labels: HashMap::new(),
            log: Vec::new(),
            syncs: 0,
            reads: 0,
            writes: 0,
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }

    pub fn log(&self) -> &[DispatchRecord] {
        &self.log
    }

    pub fn label(&self, table: TableId) -> Option<&str> {
        self.labels.get(&table).map(|s| s.as_str())
    }

    pub fn sync_count(&self) -> usize {
        self.syncs
    }

    pub fn table_reads(&self) -> usize {
        self.reads
    }

    pub fn table_writes(&self) -> usize {
        self.writes
    }

    pub fn dispatch_count(&self, kernel: &str) -> usize {
        self.log.iter().filter(|r| r.kernel == kernel).count()
    }

    pub fn clear(&mut self) {
        self.log.clear();
        self.syncs = 0;
        self.reads = 0;
        self.writes = 0;
    }
}

impl<U: Uniforms, B: ComputeBackend<U>> ComputeBackend<U> for Recorder<B> {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn create_table(&mut self, label: &str, extent: Extent) -> Result<TableId> {
        let id = self.inner.create_table(label, extent)?;
        self.labels.insert(id, label.to_owned());
        Ok(id)
    }

    fn table_extent(&self, table: TableId) -> Result<Extent> {
        self.inner.table_extent(table)
    }

    fn compile(&mut self, kernel: KernelDescriptor<U>) -> Result<KernelId> {
        let name = kernel.name;
        let id = self.inner.compile(kernel)?;
        self.names.insert(id, name);
        Ok(id)
    }

    fn dispatch(&mut self, dispatch: &Dispatch<U>) -> Result<()> {
        self.inner.dispatch(dispatch)?;
        self.log.push(DispatchRecord {
            kernel: self.names.get(&dispatch.kernel).copied().unwrap_or("?"),
            inputs: dispatch.inputs.to_vec(),
            outputs: dispatch.outputs.to_vec(),
            layer: dispatch.layer,
            syncs_before: self.syncs,
        });
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.syncs += 1;
        self.inner.synchronize()
    }

    fn read_table(&mut self, table: TableId) -> Result<LookupTable> {
        self.reads += 1;
        self.inner.read_table(table)
    }

    fn write_table(&mut self, table: TableId, data: &LookupTable) -> Result<()> {
        self.writes += 1;
        self.inner.write_table(table, data)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CpuBackend, Dimension, Invocation, KernelOutput};

    fn one(_u: &u32, _inputs: &[&LookupTable], _at: Invocation) -> KernelOutput {
        [[1.0; 4], [0.0; 4]]
    }

    #[test]
    fn test_records_dispatches() -> Result<()> {
        let mut backend = Recorder::new(CpuBackend::<u32>::new());
        let table = backend.create_table("ones", Extent::new_3d(2, 2, 2))?;
        let kernel = backend.compile(KernelDescriptor::new("one").output(Dimension::D3).cpu(one))?;
        for layer in 0..2 {
            backend.dispatch(&Dispatch {
                kernel,
                inputs: &[],
                outputs: &[table],
                layer,
                uniforms: &0u32,
            })?;
            backend.synchronize()?;
        }
        assert_eq!(backend.dispatch_count("one"), 2);
        assert_eq!(backend.log()[1].layer, 1);
        assert_eq!(backend.log()[1].syncs_before, 1);
        assert_eq!(backend.sync_count(), 2);
        assert_eq!(backend.label(table), Some("ones"));
        assert_eq!(backend.read_table(table)?.texel(1, 1, 1), [1.0; 4]);
        Ok(())
    }
}
