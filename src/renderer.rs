// =============================================================================
// RENDERER - Vulkan resources behind the frame scheduler
// =============================================================================
//
// OWNERSHIP (field order = destruction order):
// ┌─────────────────────────────────────────────────────────────────┐
// │  frames          semaphores, fences, command buffers            │
// │  command_pool    frees the buffers above                        │
// │  vertex_buffer   device-local triangle                          │
// │  pipeline        built against render_targets.render_pass       │
// │  render_targets  framebuffers die before the image views        │
// │  swapchain       images + views                                 │
// │  device          Arc: allocator, device, surface, instance      │
// └─────────────────────────────────────────────────────────────────┘

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use crate::backend::buffer::VertexBuffer;
use crate::backend::command::{record_draw, CommandPool, DrawInfo};
use crate::backend::pipeline::Pipeline;
use crate::backend::render_target::RenderTargets;
use crate::backend::shader::ShaderSet;
use crate::backend::sync::FrameSlots;
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::{Config, FRAGMENT_SHADER_PATH, VERTEX_SHADER_PATH};
use crate::frame::{AcquireOutcome, FrameBackend, PresentOutcome};
use crate::vertex::TRIANGLE;

pub struct Renderer {
    frames: FrameSlots,
    command_pool: CommandPool,
    vertex_buffer: VertexBuffer,
    pipeline: Pipeline,
    render_targets: RenderTargets,
    // Only empty in the middle of a rebuild
    swapchain: Option<Swapchain>,
    shaders: ShaderSet,
    clear_color: [f32; 4],
    device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(
        config: &Config,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        framebuffer_extent: vk::Extent2D,
    ) -> Result<Self> {
        let device = VulkanDevice::new(&config.device_config(), display_handle, window_handle)?;

        let swapchain = Swapchain::new(device.clone(), framebuffer_extent, None)?;
        let render_targets = RenderTargets::new(device.clone(), &swapchain)?;

        let shaders = ShaderSet::load(VERTEX_SHADER_PATH, FRAGMENT_SHADER_PATH)
            .context("Failed to load shaders. Did build.rs run glslc?")?;
        let pipeline = Pipeline::new(device.clone(), render_targets.render_pass, &shaders)?;

        let command_pool = CommandPool::new(device.clone())?;
        let vertex_buffer = VertexBuffer::new(device.clone(), &command_pool, &TRIANGLE)?;
        let frames = FrameSlots::new(device.clone(), &command_pool)?;

        log::info!(
            "Renderer ready: {} swapchain images, {:?}",
            swapchain.images.len(),
            swapchain.present_mode
        );

        Ok(Self {
            frames,
            command_pool,
            vertex_buffer,
            pipeline,
            render_targets,
            swapchain: Some(swapchain),
            shaders,
            clear_color: config.graphics.clear_color,
            device,
        })
    }

    fn swapchain(&self) -> Result<&Swapchain> {
        self.swapchain.as_ref().context("Swapchain not initialized")
    }
}

impl FrameBackend for Renderer {
    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.frames.wait(slot)
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.frames.get(slot).image_available;
        self.swapchain()?.acquire_next_image(semaphore)
    }

    fn reset_slot_fence(&mut self, slot: usize) -> Result<()> {
        self.frames.reset(slot)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let draw = DrawInfo {
            render_pass: self.render_targets.render_pass,
            framebuffer: self.render_targets.framebuffer(image_index)?,
            extent: self.swapchain()?.extent,
            pipeline: self.pipeline.pipeline,
            vertex_buffer: self.vertex_buffer.buffer.buffer,
            vertex_count: self.vertex_buffer.vertex_count,
            clear_color: self.clear_color,
        };
        record_draw(&self.device.device, self.frames.get(slot).command_buffer, &draw)
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        let frame = self.frames.get(slot);

        // Color output is the first stage that touches the acquired image
        let wait_semaphores = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [frame.command_buffer];
        let signal_semaphores = [frame.render_finished];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info],
                frame.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.frames.get(slot).render_finished;
        self.swapchain()?
            .present(self.device.present_queue, image_index, &[render_finished])
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.device.wait_idle()
    }

    fn rebuild_swapchain(&mut self, framebuffer_extent: vk::Extent2D) -> Result<()> {
        // Framebuffers reference the old image views
        self.render_targets.destroy_framebuffers();

        let old = self.swapchain.take();
        let swapchain = Swapchain::new(self.device.clone(), framebuffer_extent, old)?;

        if self.render_targets.rebuild(&swapchain)? {
            self.pipeline = Pipeline::new(
                self.device.clone(),
                self.render_targets.render_pass,
                &self.shaders,
            )?;
        }

        self.swapchain = Some(swapchain);
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle during cleanup failed: {:#}", e);
        }
    }
}
