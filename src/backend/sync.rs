// Synchronization primitives
//
// Fences for GPU-CPU sync, semaphores for GPU-GPU sync. Each frame in
// flight owns one full set plus the command buffer it records into.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::command::CommandPool;
use super::VulkanDevice;
use crate::config::MAX_FRAMES_IN_FLIGHT;

/// Frame synchronization - one per frame in flight
pub struct FrameSlot {
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
    pub in_flight_fence: vk::Fence,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        // Start signaled so the very first wait returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);

        unsafe {
            Ok(Self {
                image_available: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create image-available semaphore")?,
                render_finished: device
                    .create_semaphore(&semaphore_info, None)
                    .context("Failed to create render-finished semaphore")?,
                in_flight_fence: device
                    .create_fence(&fence_info, None)
                    .context("Failed to create in-flight fence")?,
                command_buffer,
            })
        }
    }

    unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_semaphore(self.image_available, None);
        device.destroy_semaphore(self.render_finished, None);
        device.destroy_fence(self.in_flight_fence, None);
    }
}

/// Exactly `MAX_FRAMES_IN_FLIGHT` slots. Command buffers belong to the
/// pool they came from, which must outlive this.
pub struct FrameSlots {
    slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT],
    device: Arc<VulkanDevice>,
}

impl FrameSlots {
    pub fn new(device: Arc<VulkanDevice>, command_pool: &CommandPool) -> Result<Self> {
        let command_buffers = command_pool.allocate(MAX_FRAMES_IN_FLIGHT as u32)?;

        let mut slots = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
        for command_buffer in command_buffers {
            match FrameSlot::new(&device.device, command_buffer) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    for slot in &slots {
                        unsafe { slot.destroy(&device.device) };
                    }
                    return Err(e);
                }
            }
        }

        let slots: [FrameSlot; MAX_FRAMES_IN_FLIGHT] = slots
            .try_into()
            .map_err(|_| anyhow::anyhow!("Expected {} frame slots", MAX_FRAMES_IN_FLIGHT))?;

        log::debug!("Created {} frame slots", MAX_FRAMES_IN_FLIGHT);
        Ok(Self { slots, device })
    }

    pub fn get(&self, slot: usize) -> &FrameSlot {
        &self.slots[slot % MAX_FRAMES_IN_FLIGHT]
    }

    /// Block until the GPU is done with the slot's last submission.
    pub fn wait(&self, slot: usize) -> Result<()> {
        let fence = self.get(slot).in_flight_fence;
        unsafe { self.device.device.wait_for_fences(&[fence], true, u64::MAX) }
            .context("Failed to wait for in-flight fence")
    }

    pub fn reset(&self, slot: usize) -> Result<()> {
        let fence = self.get(slot).in_flight_fence;
        unsafe { self.device.device.reset_fences(&[fence]) }
            .context("Failed to reset in-flight fence")
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        for slot in &self.slots {
            unsafe { slot.destroy(&self.device.device) };
        }
    }
}
