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
    workgroups, ComputeBackend, ComputeError, Dimension, Dispatch, KernelDescriptor, KernelId,
    Signature, TableId, Uniforms,
};
use anyhow::Result;
use gpu::Gpu;
use log::{debug, trace};
use lut::{Extent, LookupTable};
use std::{borrow::Cow, marker::PhantomData, sync::Arc};
use zerocopy::AsBytes;

// Must match the DispatchInfo struct in the kernels.
#[repr(C)]
#[derive(AsBytes, Copy, Clone, Debug)]
struct DispatchInfo {
    layer: u32,
    _pad: [u32; 3],
}

struct DeviceTable {
    label: String,
    extent: Extent,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct DeviceKernel {
    signature: Signature,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
}

/// Tables as `Rgba32Float` textures, kernels as WGSL compute shaders. Every
/// dispatch is recorded and submitted on its own inside a validation scope.
pub struct WgpuBackend<U> {
    gpu: Arc<Gpu>,
    tables: Vec<DeviceTable>,
    kernels: Vec<DeviceKernel>,
    _phantom: PhantomData<U>,
}

impl<U> WgpuBackend<U> {
    pub fn new(gpu: Arc<Gpu>) -> Self {
        Self {
            gpu,
            tables: Vec::new(),
            kernels: Vec::new(),
            _phantom: PhantomData,
        }
    }

    fn device_table(&self, table: TableId) -> Result<&DeviceTable, ComputeError> {
        self.tables
            .get(table.index())
            .ok_or(ComputeError::UnknownTable(table))
    }

    fn view_dimension(dim: Dimension) -> wgpu::TextureViewDimension {
        match dim {
            Dimension::D2 => wgpu::TextureViewDimension::D2,
            Dimension::D3 => wgpu::TextureViewDimension::D3,
        }
    }

    fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }

    fn input_entry(binding: u32, dim: Dimension) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: Self::view_dimension(dim),
                multisampled: false,
            },
            count: None,
        }
    }

    fn output_entry(binding: u32, dim: Dimension) -> wgpu::BindGroupLayoutEntry {
        wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::StorageTexture {
                access: wgpu::StorageTextureAccess::WriteOnly,
                format: Gpu::TABLE_FORMAT,
                view_dimension: Self::view_dimension(dim),
            },
            count: None,
        }
    }
}

impl<U: Uniforms> ComputeBackend<U> for WgpuBackend<U> {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_table(&mut self, label: &str, extent: Extent) -> Result<TableId> {
        trace!("creating {} texture {}", extent, label);
        let texture = self.gpu.create_table_texture(label, extent);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.tables.push(DeviceTable {
            label: label.to_owned(),
            extent,
            texture,
            view,
        });
        Ok(TableId(self.tables.len() - 1))
    }

    fn table_extent(&self, table: TableId) -> Result<Extent> {
        Ok(self.device_table(table)?.extent)
    }

    fn compile(&mut self, kernel: KernelDescriptor<U>) -> Result<KernelId> {
        let signature = Signature::of(&kernel);
        let source = kernel.source();
        let mut entries = vec![Self::uniform_entry(0), Self::uniform_entry(1)];
        let mut binding = 2;
        for &dim in &signature.inputs {
            entries.push(Self::input_entry(binding, dim));
            binding += 1;
        }
        for &dim in &signature.outputs {
            entries.push(Self::output_entry(binding, dim));
            binding += 1;
        }

        let name = signature.name;
        let compiled = self.gpu.validated(name, |device, _| {
            let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(name),
                source: wgpu::ShaderSource::Wgsl(Cow::Owned(source)),
            });
            let bind_group_layout =
                device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some(name),
                    entries: &entries,
                });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(name),
                bind_group_layouts: &[&bind_group_layout],
                push_constant_ranges: &[],
            });
            let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(name),
                layout: Some(&pipeline_layout),
                module: &module,
                entry_point: "main",
            });
            (bind_group_layout, pipeline)
        });
        let (bind_group_layout, pipeline) = compiled.map_err(|err| ComputeError::KernelCompile {
            kernel: name,
            reason: err.to_string(),
        })?;
        debug!("compiled kernel {}", name);
        self.kernels.push(DeviceKernel {
            signature,
            bind_group_layout,
            pipeline,
        });
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
            |id| self.device_table(id).map(|t| t.extent),
        )?;
        let groups = workgroups(extent.width, extent.height);
        trace!(
            "{}: layer {} of {:?} -> {:?} in {:?} groups",
            kernel.signature.name,
            dispatch.layer,
            dispatch.inputs,
            dispatch.outputs,
            groups
        );

        let params = self.gpu.push_data(
            "kernel-params",
            dispatch.uniforms,
            wgpu::BufferUsages::UNIFORM,
        );
        let info = self.gpu.push_data(
            "dispatch-info",
            &DispatchInfo {
                layer: dispatch.layer,
                _pad: [0; 3],
            },
            wgpu::BufferUsages::UNIFORM,
        );

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: params.as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: info.as_entire_binding(),
            },
        ];
        for (offset, id) in dispatch.inputs.iter().chain(dispatch.outputs).enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: 2 + offset as u32,
                resource: wgpu::BindingResource::TextureView(&self.tables[id.index()].view),
            });
        }

        let name = kernel.signature.name;
        self.gpu
            .validated(name, |device, queue| {
                let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(name),
                    layout: &kernel.bind_group_layout,
                    entries: &entries,
                });
                let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some(name),
                });
                {
                    let mut cpass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                        label: Some(name),
                    });
                    cpass.set_pipeline(&kernel.pipeline);
                    cpass.set_bind_group(0, &bind_group, &[]);
                    cpass.dispatch_workgroups(groups.0, groups.1, groups.2);
                }
                queue.submit(Some(encoder.finish()));
            })
            .map_err(|err| ComputeError::Device {
                what: name.to_owned(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    fn synchronize(&mut self) -> Result<()> {
        self.gpu.wait();
        Ok(())
    }

    fn read_table(&mut self, table: TableId) -> Result<LookupTable> {
        let table = self.device_table(table)?;
        self.gpu.read_texture(&table.texture, table.extent)
    }

    fn write_table(&mut self, table: TableId, data: &LookupTable) -> Result<()> {
        let target = self.device_table(table)?;
        if target.extent != data.extent() {
            return Err(lut::LutError::ExtentMismatch {
                src: data.extent(),
                dst: target.extent,
            }
            .into());
        }
        trace!("uploading {} into {}", data.extent(), target.label);
        self.gpu.write_texture(&target.texture, data);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use gpu::GpuConfig;

    #[repr(C)]
    #[derive(AsBytes, Copy, Clone)]
    struct Fill {
        value: [f32; 4],
    }

    const FILL: &str = r#"
struct Fill { value: vec4<f32> }
struct DispatchInfo { layer: u32 }
@group(0) @binding(0) var<uniform> params: Fill;
@group(0) @binding(1) var<uniform> info: DispatchInfo;
@group(0) @binding(2) var table_out: texture_storage_3d<rgba32float, write>;

@compute @workgroup_size(8, 8, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= 16u || id.y >= 4u) {
        return;
    }
    textureStore(table_out, vec3<i32>(i32(id.x), i32(id.y), i32(info.layer)), params.value);
}
"#;

    #[test]
    #[ignore = "needs a graphics adapter"]
    fn test_fill_layer() -> Result<()> {
        let gpu = Arc::new(Gpu::new(GpuConfig::default())?);
        let mut backend = WgpuBackend::<Fill>::new(gpu);
        let table = backend.create_table("fill", Extent::new_3d(16, 4, 3))?;
        let kernel = backend.compile(
            KernelDescriptor::new("fill")
                .output(Dimension::D3)
                .wgsl(FILL),
        )?;
        backend.dispatch(&Dispatch {
            kernel,
            inputs: &[],
            outputs: &[table],
            layer: 1,
            uniforms: &Fill {
                value: [1.0, 2.0, 3.0, 4.0],
            },
        })?;
        backend.synchronize()?;
        let result = backend.read_table(table)?;
        assert_eq!(result.texel(15, 3, 1), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(result.texel(15, 3, 2), [0.0; 4]);
        Ok(())
    }

    #[test]
    #[ignore = "needs a graphics adapter"]
    fn test_bad_shader_fails_compile() -> Result<()> {
        let gpu = Arc::new(Gpu::new(GpuConfig::default())?);
        let mut backend = WgpuBackend::<Fill>::new(gpu);
        let result = backend.compile(
            KernelDescriptor::new("broken")
                .output(Dimension::D2)
                .wgsl("fn main( {"),
        );
        assert!(result.is_err());
        Ok(())
    }
}
