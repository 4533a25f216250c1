//! Indirect draw table layout.
//!
//! The GPU consumes a flat array of [`IndirectEntry`] sequences: each entry
//! selects a shading variant through the indirect execution set and then
//! issues one non-indexed draw. The byte offsets here must agree with the
//! token offsets in the indirect commands layout.

use bytemuck::{Pod, Zeroable};

/// Byte offset of the execution-set token within a sequence.
pub const EXECUTION_SET_TOKEN_OFFSET: u32 = 0;
/// Byte offset of the draw token within a sequence.
pub const DRAW_TOKEN_OFFSET: u32 = 8;
/// Byte stride of one sequence.
pub const SEQUENCE_STRIDE: u32 = std::mem::size_of::<IndirectEntry>() as u32;

/// Index of the shared fragment shader in the indirect execution set.
///
/// Only meaningful in shader-object mode; the pipelines path consumes a
/// single index per sequence.
pub const FRAGMENT_SLOT: u32 = 1;

/// Matches `VkDrawIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawParams {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// One generated-command sequence: variant selection followed by a draw.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct IndirectEntry {
    /// Execution-set indices. In pipelines mode only the first element is
    /// consumed; in shader-object mode the elements select the vertex and
    /// fragment shaders.
    pub execution_set: [u32; 2],
    pub draw: DrawParams,
}

/// A span of the shared vertex buffer drawn by one sequence.
#[derive(Debug, Clone, Copy)]
pub struct Drawable {
    pub first_vertex: u32,
    pub vertex_count: u32,
}

/// How shading variants are provided to the execution set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariantMode {
    /// One graphics pipeline per gear.
    Pipelines,
    /// Shader objects: one vertex shader per gear plus a shared fragment
    /// shader.
    ShaderObjects,
}

/// Execution-set index of each gear's vertex-stage variant.
///
/// Pipeline sets are indexed densely. Shader sets reserve index 1 for the
/// shared fragment shader, so the second and third vertex shaders land at
/// indices 2 and 3.
pub fn vertex_variant_indices(mode: VariantMode) -> [u32; 3] {
    match mode {
        VariantMode::Pipelines => [0, 1, 2],
        VariantMode::ShaderObjects => [0, 2, 3],
    }
}

/// Build the indirect draw table for the given drawables.
pub fn build_entries(mode: VariantMode, drawables: &[Drawable]) -> Vec<IndirectEntry> {
    let indices = vertex_variant_indices(mode);

    drawables
        .iter()
        .zip(indices)
        .map(|(drawable, variant)| IndirectEntry {
            execution_set: [variant, FRAGMENT_SLOT],
            draw: DrawParams {
                vertex_count: drawable.vertex_count,
                instance_count: 1,
                first_vertex: drawable.first_vertex,
                first_instance: 0,
            },
        })
        .collect()
}

/// Reinterpret a byte slice as indirect entries.
///
/// The slice length must be a whole number of entries.
pub fn entries_from_bytes(bytes: &[u8]) -> &[IndirectEntry] {
    bytemuck::cast_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drawables() -> Vec<Drawable> {
        vec![
            Drawable {
                first_vertex: 0,
                vertex_count: 930,
            },
            Drawable {
                first_vertex: 930,
                vertex_count: 470,
            },
            Drawable {
                first_vertex: 1400,
                vertex_count: 470,
            },
        ]
    }

    #[test]
    fn sequence_layout_matches_tokens() {
        assert_eq!(SEQUENCE_STRIDE, 24);
        assert_eq!(
            std::mem::offset_of!(IndirectEntry, execution_set) as u32,
            EXECUTION_SET_TOKEN_OFFSET
        );
        assert_eq!(
            std::mem::offset_of!(IndirectEntry, draw) as u32,
            DRAW_TOKEN_OFFSET
        );
    }

    #[test]
    fn pipeline_entries_select_dense_indices() {
        let entries = build_entries(VariantMode::Pipelines, &drawables());

        assert_eq!(entries.len(), 3);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.execution_set[0], i as u32);
            assert_eq!(entry.draw.instance_count, 1);
            assert_eq!(entry.draw.first_instance, 0);
        }
    }

    #[test]
    fn shader_object_entries_skip_fragment_slot() {
        let entries = build_entries(VariantMode::ShaderObjects, &drawables());

        assert_eq!(entries[0].execution_set, [0, FRAGMENT_SLOT]);
        assert_eq!(entries[1].execution_set, [2, FRAGMENT_SLOT]);
        assert_eq!(entries[2].execution_set, [3, FRAGMENT_SLOT]);
    }

    #[test]
    fn entries_survive_byte_round_trip() {
        for mode in [VariantMode::Pipelines, VariantMode::ShaderObjects] {
            let entries = build_entries(mode, &drawables());
            let bytes: &[u8] = bytemuck::cast_slice(&entries);

            assert_eq!(bytes.len(), entries.len() * SEQUENCE_STRIDE as usize);
            assert_eq!(entries_from_bytes(bytes), entries.as_slice());
        }
    }

    #[test]
    fn draw_spans_follow_drawables() {
        let entries = build_entries(VariantMode::Pipelines, &drawables());

        assert_eq!(entries[1].draw.first_vertex, 930);
        assert_eq!(entries[1].draw.vertex_count, 470);
        assert_eq!(entries[2].draw.first_vertex, 1400);
    }
}
