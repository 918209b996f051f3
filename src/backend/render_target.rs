// Render targets: render pass + one framebuffer per swapchain image
//
// Framebuffers are index-paired with swapchain image views and die with
// them. The render pass only depends on the image format, so it survives a
// rebuild unless the format changes.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::{Swapchain, VulkanDevice};

pub struct RenderTargets {
    pub render_pass: vk::RenderPass,
    pub format: vk::Format,
    pub framebuffers: Vec<vk::Framebuffer>,
    device: Arc<VulkanDevice>,
}

impl RenderTargets {
    pub fn new(device: Arc<VulkanDevice>, swapchain: &Swapchain) -> Result<Self> {
        let render_pass = create_render_pass(&device, swapchain.format)?;
        let mut targets = Self {
            render_pass,
            format: swapchain.format,
            framebuffers: Vec::new(),
            device,
        };
        targets.framebuffers = create_framebuffers(&targets.device, render_pass, swapchain)?;
        Ok(targets)
    }

    pub fn framebuffer(&self, image_index: u32) -> Result<vk::Framebuffer> {
        self.framebuffers
            .get(image_index as usize)
            .copied()
            .with_context(|| format!("No framebuffer for swapchain image {}", image_index))
    }

    /// Release every framebuffer; must happen before their image views go.
    pub fn destroy_framebuffers(&mut self) {
        for framebuffer in self.framebuffers.drain(..) {
            unsafe { self.device.device.destroy_framebuffer(framebuffer, None) };
        }
    }

    /// Re-pair with a new swapchain. Returns true if the render pass was
    /// replaced, which invalidates pipelines built against the old one.
    pub fn rebuild(&mut self, swapchain: &Swapchain) -> Result<bool> {
        self.destroy_framebuffers();

        let replaced = swapchain.format != self.format;
        if replaced {
            log::warn!(
                "Swapchain format changed {:?} -> {:?}, recreating render pass",
                self.format,
                swapchain.format
            );
            let render_pass = create_render_pass(&self.device, swapchain.format)?;
            unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
            self.render_pass = render_pass;
            self.format = swapchain.format;
        }

        self.framebuffers = create_framebuffers(&self.device, self.render_pass, swapchain)?;
        Ok(replaced)
    }
}

impl Drop for RenderTargets {
    fn drop(&mut self) {
        self.destroy_framebuffers();
        unsafe { self.device.device.destroy_render_pass(self.render_pass, None) };
    }
}

/// Single color attachment: cleared on load, stored, handed to presentation
fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::default()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR);

    let color_attachment_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];

    let subpass = vk::SubpassDescription::default()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_attachment_refs);

    // The layout transition waits for the same stage the submit waits on for
    // "image available", so the image is really ours before we write to it
    let dependency = vk::SubpassDependency::default()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE);

    let attachments = [color_attachment];
    let subpasses = [subpass];
    let dependencies = [dependency];

    let render_pass_info = vk::RenderPassCreateInfo::default()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);

    unsafe { device.device.create_render_pass(&render_pass_info, None) }
        .context("Failed to create render pass")
}

fn create_framebuffers(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    swapchain: &Swapchain,
) -> Result<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(swapchain.image_views.len());

    for &image_view in &swapchain.image_views {
        let attachments = [image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::default()
            .render_pass(render_pass)
            .attachments(&attachments)
            .width(swapchain.extent.width)
            .height(swapchain.extent.height)
            .layers(1);

        match unsafe { device.device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(e).context("Failed to create framebuffer");
            }
        }
    }

    Ok(framebuffers)
}
