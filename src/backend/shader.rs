// Shader module loading
//
// Vulkan consumes SPIR-V bytecode. The files are read once at startup and
// kept as words so the pipeline can be rebuilt without touching the disk.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

use super::VulkanDevice;

/// SPIR-V for both stages of the triangle pipeline.
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    pub fn load(vertex_path: impl AsRef<Path>, fragment_path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            vertex: load_spirv(vertex_path)?,
            fragment: load_spirv(fragment_path)?,
        })
    }
}

pub fn load_spirv(path: impl AsRef<Path>) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader file: {:?}", path))?;
    let words = parse_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {:?}", path))?;
    log::debug!("Loaded {:?} ({} words)", path, words.len());
    Ok(words)
}

/// Reinterpret raw bytes as SPIR-V words, handling alignment and endianness.
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    Ok(ash::util::read_spv(&mut Cursor::new(bytes))?)
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}
