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
use futures::executor::block_on;
use log::{info, trace};
use lut::{Extent, LookupTable, TEXEL_SIZE};
use std::{num::NonZeroU32, sync::mpsc};
use wgpu::util::DeviceExt;
use zerocopy::AsBytes;

pub struct GpuConfig {
    power_preference: wgpu::PowerPreference,
    force_fallback_adapter: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            power_preference: wgpu::PowerPreference::HighPerformance,
            force_fallback_adapter: false,
        }
    }
}

/// A headless device and queue. There is no surface: everything we build
/// is a table that gets read back or handed to somebody else's renderer.
pub struct Gpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
}

impl Gpu {
    /// Format of every table texture.
    pub const TABLE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

    pub fn new(config: GpuConfig) -> Result<Self> {
        block_on(Self::new_async(config))
    }

    pub async fn new_async(config: GpuConfig) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::Backends::PRIMARY);
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                force_fallback_adapter: config.force_fallback_adapter,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable graphics adapter"))?;
        let info = adapter.get_info();
        info!("using {} on {:?}", info.name, info.backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("horizon-device"),
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::downlevel_defaults(),
                },
                None,
            )
            .await?;

        Ok(Self { device, queue })
    }

    pub fn push_buffer(
        &self,
        label: &'static str,
        data: &[u8],
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        trace!("uploading {} with {} bytes", label, data.len());
        self.device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: data,
                usage,
            })
    }

    pub fn push_data<T: AsBytes>(
        &self,
        label: &'static str,
        data: &T,
        usage: wgpu::BufferUsages,
    ) -> wgpu::Buffer {
        self.push_buffer(label, data.as_bytes(), usage)
    }

    pub fn create_table_texture(&self, label: &str, extent: Extent) -> wgpu::Texture {
        self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: extent.depth,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: if extent.is_3d() {
                wgpu::TextureDimension::D3
            } else {
                wgpu::TextureDimension::D2
            },
            format: Self::TABLE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::STORAGE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST,
        })
    }

    /// Run `f` inside a validation error scope and turn anything the device
    /// reports into an error instead of a panic in the uncaptured handler.
    pub fn validated<T, F>(&self, what: &str, f: F) -> Result<T>
    where
        F: FnOnce(&wgpu::Device, &wgpu::Queue) -> T,
    {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let out = f(&self.device, &self.queue);
        let validation = block_on(self.device.pop_error_scope());
        let oom = block_on(self.device.pop_error_scope());
        if let Some(err) = validation {
            bail!("{}: {}", what, err);
        }
        if let Some(err) = oom {
            bail!("{}: {}", what, err);
        }
        Ok(out)
    }

    /// Block until all submitted work has retired.
    pub fn wait(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }

    // Buffer copies need rows aligned to COPY_BYTES_PER_ROW_ALIGNMENT.
    fn padded_row_bytes(extent: Extent) -> u32 {
        let row = extent.width * TEXEL_SIZE as u32;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        (row + align - 1) / align * align
    }

    pub fn read_texture(&self, texture: &wgpu::Texture, extent: Extent) -> Result<LookupTable> {
        let row_bytes = extent.width as usize * TEXEL_SIZE;
        let padded_row = Self::padded_row_bytes(extent);
        let size = u64::from(padded_row) * u64::from(extent.height) * u64::from(extent.depth);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("table-readback"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("table-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: NonZeroU32::new(padded_row),
                    rows_per_image: NonZeroU32::new(extent.height),
                },
            },
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: extent.depth,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });
        self.wait();
        receiver.recv()??;

        let mut packed = Vec::with_capacity(extent.byte_len());
        {
            let mapping = slice.get_mapped_range();
            for row in mapping.chunks_exact(padded_row as usize) {
                packed.extend_from_slice(&row[..row_bytes]);
            }
        }
        staging.unmap();
        Ok(LookupTable::from_bytes(extent, &packed)?)
    }

    pub fn write_texture(&self, texture: &wgpu::Texture, table: &LookupTable) {
        let extent = table.extent();
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            table.as_bytes(),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: NonZeroU32::new(extent.width * TEXEL_SIZE as u32),
                rows_per_image: NonZeroU32::new(extent.height),
            },
            wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: extent.depth,
            },
        );
    }
}
