// Buffer utilities for vertex data
//
// Memory comes from gpu-allocator; the vertex buffer lives in device-local
// memory and is filled once through a host-visible staging buffer.

use anyhow::{Context, Result};
use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::command::CommandPool;
use super::VulkanDevice;
use crate::vertex::Vertex;

/// A buffer plus the allocation backing it
pub struct Buffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Option<Allocation>,
    device: Arc<VulkanDevice>,
}

impl Buffer {
    pub fn new(
        device: Arc<VulkanDevice>,
        name: &str,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Self> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;
        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.with_allocator(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .with_context(|| format!("Failed to allocate memory for '{}'", name))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // Constructed before binding so a failed bind still cleans up in Drop
        let buffer = Self {
            buffer,
            size,
            allocation: Some(allocation),
            device,
        };

        let allocation = buffer.allocation.as_ref().context("Buffer allocation missing")?;
        unsafe {
            buffer
                .device
                .device
                .bind_buffer_memory(buffer.buffer, allocation.memory(), allocation.offset())
        }
        .with_context(|| format!("Failed to bind memory for '{}'", name))?;

        Ok(buffer)
    }

    /// Copy `bytes` to the start of a host-visible buffer.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let mapped = self
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .context("Buffer memory is not host visible")?;

        if bytes.len() > mapped.len() {
            anyhow::bail!(
                "Write of {} bytes overflows {}-byte buffer",
                bytes.len(),
                mapped.len()
            );
        }
        mapped[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { self.device.device.destroy_buffer(self.buffer, None) };
        if let Some(allocation) = self.allocation.take() {
            let freed = self
                .device
                .with_allocator(|allocator| allocator.free(allocation).map_err(Into::into));
            if let Err(e) = freed {
                log::error!("Failed to free buffer memory: {:#}", e);
            }
        }
    }
}

/// Device-local vertex buffer, immutable after upload.
pub struct VertexBuffer {
    pub buffer: Buffer,
    pub vertex_count: u32,
}

impl VertexBuffer {
    pub fn new(device: Arc<VulkanDevice>, command_pool: &CommandPool, vertices: &[Vertex]) -> Result<Self> {
        let bytes: &[u8] = bytemuck::cast_slice(vertices);
        let size = bytes.len() as vk::DeviceSize;

        let mut staging = Buffer::new(
            device.clone(),
            "vertex staging",
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
        )?;
        staging.write(bytes)?;

        let buffer = Buffer::new(
            device,
            "vertices",
            size,
            vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::GpuOnly,
        )?;

        command_pool.submit_once(|device, cmd| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: buffer.size,
            };
            unsafe { device.cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]) };
        })?;

        log::info!("Uploaded {} vertices ({} bytes)", vertices.len(), size);

        Ok(Self {
            buffer,
            vertex_count: vertices.len() as u32,
        })
    }
}
