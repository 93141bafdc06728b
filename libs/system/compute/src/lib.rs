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

//! Table compute: kernels that fill one 2D layer of one or two output tables
//! per dispatch, reading any number of previously written tables.
//!
//! Backends agree on a fixed binding convention so the same kernel
//! description works everywhere. In WGSL every kernel uses group 0 with:
//!
//!   binding 0       `var<uniform>` kernel parameters (the `U` type)
//!   binding 1       `var<uniform>` `DispatchInfo { layer: u32 }`
//!   binding 2..     one `texture_2d<f32>` / `texture_3d<f32>` per input
//!   after inputs    one `texture_storage_{2d,3d}<rgba32float, write>` per output
//!
//! and an entry point `main` with a workgroup size of 8x8x1.
mod cpu_backend;
mod recorder;
mod wgpu_backend;

pub use crate::{
    cpu_backend::CpuBackend,
    recorder::{DispatchRecord, Recorder},
    wgpu_backend::WgpuBackend,
};

use anyhow::Result;
use lut::{Extent, LookupTable, Texel};
use std::{fmt, sync::Arc};
use thiserror::Error;
use zerocopy::AsBytes;

/// Work group edge length. Must match `@workgroup_size` in the kernels.
pub const NUM_THREADS: u32 = 8;

/// Most outputs a single kernel may write.
pub const MAX_OUTPUTS: usize = 2;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableId(usize);

impl TableId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "table#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct KernelId(usize);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Dimension {
    D2,
    D3,
}

impl Dimension {
    pub fn of(extent: Extent) -> Self {
        if extent.is_3d() {
            Self::D3
        } else {
            Self::D2
        }
    }
}

#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("no such table: {0}")]
    UnknownTable(TableId),
    #[error("no such kernel: {0:?}")]
    UnknownKernel(KernelId),
    #[error("failed to compile kernel {kernel}: {reason}")]
    KernelCompile { kernel: &'static str, reason: String },
    #[error("kernel {kernel} takes {expected} {what} but {actual} were bound")]
    BindingCount {
        kernel: &'static str,
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("kernel {kernel} expects a {expected:?} table in {what} slot {slot}, got {actual}")]
    DimensionMismatch {
        kernel: &'static str,
        what: &'static str,
        slot: usize,
        expected: Dimension,
        actual: Extent,
    },
    #[error("kernel {kernel} would read and write {table} in one dispatch")]
    Aliased { kernel: &'static str, table: TableId },
    #[error("kernel {kernel} outputs must share a layer size")]
    OutputExtentMismatch { kernel: &'static str },
    #[error("kernel {kernel} dispatched at layer {layer} of a table with {depth} layers")]
    LayerOutOfRange {
        kernel: &'static str,
        layer: u32,
        depth: u32,
    },
    #[error("device error in {what}: {reason}")]
    Device { what: String, reason: String },
}

/// Anything that can be uploaded as a kernel's parameter block.
pub trait Uniforms: AsBytes + Copy + Send + Sync + 'static {}
impl<T> Uniforms for T where T: AsBytes + Copy + Send + Sync + 'static {}

/// Position of one kernel invocation: a texel in the output layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub x: u32,
    pub y: u32,
    pub layer: u32,
}

pub type KernelOutput = [Texel; MAX_OUTPUTS];

/// Host implementation of a kernel, evaluated once per output texel.
pub trait CpuKernel<U>: Send + Sync {
    fn invoke(&self, uniforms: &U, inputs: &[&LookupTable], at: Invocation) -> KernelOutput;
}

impl<U, F> CpuKernel<U> for F
where
    F: Fn(&U, &[&LookupTable], Invocation) -> KernelOutput + Send + Sync,
{
    fn invoke(&self, uniforms: &U, inputs: &[&LookupTable], at: Invocation) -> KernelOutput {
        self(uniforms, inputs, at)
    }
}

/// Everything a backend needs to build a kernel. Sources are concatenated in
/// order, so shared helpers go first.
pub struct KernelDescriptor<U> {
    pub name: &'static str,
    pub inputs: Vec<Dimension>,
    pub outputs: Vec<Dimension>,
    pub wgsl: Vec<&'static str>,
    pub cpu: Option<Arc<dyn CpuKernel<U>>>,
}

impl<U> KernelDescriptor<U> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            wgsl: Vec::new(),
            cpu: None,
        }
    }

    pub fn input(mut self, dim: Dimension) -> Self {
        self.inputs.push(dim);
        self
    }

    pub fn output(mut self, dim: Dimension) -> Self {
        self.outputs.push(dim);
        self
    }

    pub fn wgsl(mut self, source: &'static str) -> Self {
        self.wgsl.push(source);
        self
    }

    pub fn cpu<K: CpuKernel<U> + 'static>(mut self, kernel: K) -> Self {
        self.cpu = Some(Arc::new(kernel));
        self
    }

    pub fn source(&self) -> String {
        self.wgsl.join("\n")
    }
}

/// One dispatch: run `kernel` over every texel of `layer` in the outputs.
pub struct Dispatch<'a, U> {
    pub kernel: KernelId,
    pub inputs: &'a [TableId],
    pub outputs: &'a [TableId],
    pub layer: u32,
    pub uniforms: &'a U,
}

/// Number of work groups covering a `width` x `height` layer.
pub fn workgroups(width: u32, height: u32) -> (u32, u32, u32) {
    (
        (width + NUM_THREADS - 1) / NUM_THREADS,
        (height + NUM_THREADS - 1) / NUM_THREADS,
        1,
    )
}

/// A place where tables live and kernels run. Each dispatch covers one
/// layer. Callers are expected to `synchronize` before reading anything a
/// dispatch wrote.
pub trait ComputeBackend<U: Uniforms> {
    fn name(&self) -> &'static str;

    fn create_table(&mut self, label: &str, extent: Extent) -> Result<TableId>;

    fn table_extent(&self, table: TableId) -> Result<Extent>;

    fn compile(&mut self, kernel: KernelDescriptor<U>) -> Result<KernelId>;

    fn dispatch(&mut self, dispatch: &Dispatch<U>) -> Result<()>;

    fn synchronize(&mut self) -> Result<()>;

    fn read_table(&mut self, table: TableId) -> Result<LookupTable>;

    fn write_table(&mut self, table: TableId, data: &LookupTable) -> Result<()>;
}

/// Binding signature kept by backends for validating dispatches.
#[derive(Clone, Debug)]
pub(crate) struct Signature {
    pub name: &'static str,
    pub inputs: Vec<Dimension>,
    pub outputs: Vec<Dimension>,
}

impl Signature {
    pub fn of<U>(kernel: &KernelDescriptor<U>) -> Self {
        Self {
            name: kernel.name,
            inputs: kernel.inputs.clone(),
            outputs: kernel.outputs.clone(),
        }
    }

    /// Check a dispatch against this signature. Returns the shared output
    /// layer extent.
    pub fn validate<F>(
        &self,
        inputs: &[TableId],
        outputs: &[TableId],
        layer: u32,
        extent_of: F,
    ) -> Result<Extent, ComputeError>
    where
        F: Fn(TableId) -> Result<Extent, ComputeError>,
    {
        if inputs.len() != self.inputs.len() {
            return Err(ComputeError::BindingCount {
                kernel: self.name,
                what: "inputs",
                expected: self.inputs.len(),
                actual: inputs.len(),
            });
        }
        if outputs.len() != self.outputs.len() || outputs.is_empty() {
            return Err(ComputeError::BindingCount {
                kernel: self.name,
                what: "outputs",
                expected: self.outputs.len(),
                actual: outputs.len(),
            });
        }
        for (slot, (&table, &dim)) in inputs.iter().zip(&self.inputs).enumerate() {
            let extent = extent_of(table)?;
            if Dimension::of(extent) != dim {
                return Err(ComputeError::DimensionMismatch {
                    kernel: self.name,
                    what: "input",
                    slot,
                    expected: dim,
                    actual: extent,
                });
            }
        }
        let mut layer_extent: Option<Extent> = None;
        for (slot, (&table, &dim)) in outputs.iter().zip(&self.outputs).enumerate() {
            if inputs.contains(&table) || outputs[..slot].contains(&table) {
                return Err(ComputeError::Aliased {
                    kernel: self.name,
                    table,
                });
            }
            let extent = extent_of(table)?;
            if Dimension::of(extent) != dim {
                return Err(ComputeError::DimensionMismatch {
                    kernel: self.name,
                    what: "output",
                    slot,
                    expected: dim,
                    actual: extent,
                });
            }
            if layer >= extent.depth {
                return Err(ComputeError::LayerOutOfRange {
                    kernel: self.name,
                    layer,
                    depth: extent.depth,
                });
            }
            if let Some(prior) = layer_extent {
                if prior.width != extent.width || prior.height != extent.height {
                    return Err(ComputeError::OutputExtentMismatch { kernel: self.name });
                }
            }
            layer_extent = Some(extent);
        }
        layer_extent.ok_or(ComputeError::BindingCount {
            kernel: self.name,
            what: "outputs",
            expected: self.outputs.len(),
            actual: 0,
        })
    }
}
