// Shader module loading
//
// SPIR-V is read from disk at startup; build.rs compiles the GLSL sources
// when glslc is available.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;

/// Load a SPIR-V file and create a shader module from it.
pub fn load_shader_module(device: &ash::Device, path: impl AsRef<Path>) -> Result<vk::ShaderModule> {
    let path = path.as_ref();
    let bytes = crate::util::read_file(path)?;

    let code = ash::util::read_spv(&mut Cursor::new(&bytes))
        .with_context(|| format!("Invalid SPIR-V in {}", path.display()))?;

    let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);

    unsafe {
        device
            .create_shader_module(&create_info, None)
            .with_context(|| format!("Failed to create shader module from {}", path.display()))
    }
}
