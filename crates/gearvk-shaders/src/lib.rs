//! Shader compilation for gearvk.
//!
//! This crate contains the gear GLSL shaders and their compiled SPIR-V
//! bytecode. Shaders are compiled at build time using shaderc; the vertex
//! shader is compiled once per gear variant with the variant's color,
//! placement, and rotation law baked in.

use std::sync::OnceLock;

/// Embedded SPIR-V shader bytecode (raw bytes, may not be aligned).
mod spirv_bytes {
    /// Red gear vertex shader (compiled SPIR-V).
    pub static GEAR_RED_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/gear_red.spv"));
    /// Green gear vertex shader (compiled SPIR-V).
    pub static GEAR_GREEN_VERT: &[u8] =
        include_bytes!(concat!(env!("OUT_DIR"), "/gear_green.spv"));
    /// Blue gear vertex shader (compiled SPIR-V).
    pub static GEAR_BLUE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/gear_blue.spv"));
    /// Shared fragment shader (compiled SPIR-V).
    pub static GEAR_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/gear_frag.spv"));
}

/// Convert byte slice to aligned u32 Vec (SPIR-V requires 4-byte alignment).
fn bytes_to_spirv(bytes: &[u8]) -> Vec<u32> {
    assert!(
        bytes.len() % 4 == 0,
        "SPIR-V bytecode must be 4-byte aligned"
    );
    bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

static GEAR_RED_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static GEAR_GREEN_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static GEAR_BLUE_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();
static GEAR_FRAG_SPIRV: OnceLock<Vec<u32>> = OnceLock::new();

/// Get the red gear vertex shader as u32 slice for Vulkan.
pub fn gear_red_vertex_shader() -> &'static [u32] {
    GEAR_RED_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::GEAR_RED_VERT))
}

/// Get the green gear vertex shader as u32 slice for Vulkan.
pub fn gear_green_vertex_shader() -> &'static [u32] {
    GEAR_GREEN_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::GEAR_GREEN_VERT))
}

/// Get the blue gear vertex shader as u32 slice for Vulkan.
pub fn gear_blue_vertex_shader() -> &'static [u32] {
    GEAR_BLUE_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::GEAR_BLUE_VERT))
}

/// Get the shared gear fragment shader as u32 slice for Vulkan.
pub fn gear_fragment_shader() -> &'static [u32] {
    GEAR_FRAG_SPIRV.get_or_init(|| bytes_to_spirv(spirv_bytes::GEAR_FRAG))
}

/// All three gear vertex shaders in gear order (red, green, blue).
pub fn gear_vertex_shaders() -> [&'static [u32]; 3] {
    [
        gear_red_vertex_shader(),
        gear_green_vertex_shader(),
        gear_blue_vertex_shader(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_shaders_load() {
        for shader in gear_vertex_shaders() {
            assert_eq!(shader[0], 0x0723_0203, "Invalid SPIR-V magic number");
            assert!(shader.len() > 100, "Shader too small");
        }
    }

    #[test]
    fn fragment_shader_loads() {
        let shader = gear_fragment_shader();
        assert_eq!(shader[0], 0x0723_0203, "Invalid SPIR-V magic number");
        assert!(shader.len() > 10, "Shader too small");
    }

    #[test]
    fn vertex_variants_differ() {
        let [red, green, blue] = gear_vertex_shaders();
        assert_ne!(red, green);
        assert_ne!(green, blue);
    }
}
