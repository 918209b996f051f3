// Command pool and per-frame command recording
//
// The frame's command buffer is reset and re-recorded from scratch every
// frame; recording one draw is cheap next to the GPU work it describes.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;

pub struct CommandPool {
    pub pool: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self> {
        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(device.queue_families.graphics)
            // RESET: allow individual buffer reset
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        Ok(Self { pool, device })
    }

    pub fn allocate(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        unsafe { self.device.device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffers")
    }

    /// Record with `record`, submit to the graphics queue and wait for it.
    pub fn submit_once(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> Result<()> {
        let device = &self.device.device;
        let command_buffer = self.allocate(1)?[0];
        let command_buffers = [command_buffer];

        let result = unsafe {
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .context("Failed to begin one-time command buffer")
                .and_then(|()| {
                    record(device, command_buffer);
                    device
                        .end_command_buffer(command_buffer)
                        .context("Failed to end one-time command buffer")
                })
                .and_then(|()| {
                    let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
                    device
                        .queue_submit(self.device.graphics_queue, &[submit_info], vk::Fence::null())
                        .context("Failed to submit one-time command buffer")
                })
                .and_then(|()| {
                    device
                        .queue_wait_idle(self.device.graphics_queue)
                        .context("Failed to wait for graphics queue")
                })
        };

        unsafe { device.free_command_buffers(self.pool, &command_buffers) };
        result
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Frees every buffer allocated from it
        unsafe { self.device.device.destroy_command_pool(self.pool, None) };
    }
}

/// Everything one frame's draw needs.
pub struct DrawInfo {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub clear_color: [f32; 4],
}

pub fn record_draw(device: &ash::Device, cmd: vk::CommandBuffer, draw: &DrawInfo) -> Result<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: draw.clear_color,
        },
    }];
    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: draw.extent,
    };

    // Viewport and scissor are dynamic state: the pipeline survives resizes
    let viewport = vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: draw.extent.width as f32,
        height: draw.extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    };

    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("Failed to reset command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::default();
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin recording command buffer")?;

        let render_pass_info = vk::RenderPassBeginInfo::default()
            .render_pass(draw.render_pass)
            .framebuffer(draw.framebuffer)
            .render_area(render_area)
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, draw.pipeline);
        device.cmd_set_viewport(cmd, 0, &[viewport]);
        device.cmd_set_scissor(cmd, 0, &[render_area]);
        device.cmd_bind_vertex_buffers(cmd, 0, &[draw.vertex_buffer], &[0]);
        device.cmd_draw(cmd, draw.vertex_count, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .context("Failed to record command buffer")?;
    }

    Ok(())
}
