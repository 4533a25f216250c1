//! Gear scene rendering through VK_EXT_device_generated_commands.
//!
//! This crate provides:
//! - Projection math for the gear scene
//! - The indirect draw table layout and its pure builders
//! - Shading variant sets (pipelines or shader objects) behind an
//!   indirect execution set
//! - The renderer that records the generated-commands draw

pub mod camera;
pub mod renderer;
pub mod table;
pub mod variants;

pub use camera::{frustum_projection, scene_projection};
pub use renderer::{GearRenderer, PushConstants, GEAR_PARAMS, SEQUENCE_COUNT};
pub use table::{
    build_entries, vertex_variant_indices, Drawable, DrawParams, IndirectEntry, VariantMode,
};
pub use variants::{PipelineVariants, ShaderObjectVariants, ShadingVariantSet};
