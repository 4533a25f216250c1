//! Gear tessellation.

use bytemuck::{Pod, Zeroable};
use glam::Vec3;
use std::f32::consts::PI;

/// Size of one vertex in bytes (position + normal, tightly packed).
pub const VERTEX_STRIDE: u64 = std::mem::size_of::<GearVertex>() as u64;

/// Byte offset of the normal within a vertex.
pub const NORMAL_OFFSET: u64 = 12;

/// A single gear vertex: position followed by normal.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GearVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// Parameters describing one gear.
#[derive(Debug, Clone, Copy)]
pub struct GearParams {
    /// Radius of the center hole.
    pub inner_radius: f32,
    /// Radius at the center of the teeth.
    pub outer_radius: f32,
    /// Thickness of the gear along Z.
    pub width: f32,
    /// Number of teeth.
    pub teeth: u32,
    /// Radial depth of a tooth.
    pub tooth_depth: f32,
}

/// Half-open vertex range covering one surface strip (bridge vertices
/// included for strips after the first).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StripSpan {
    pub start: u32,
    pub len: u32,
}

/// Generated gear geometry.
#[derive(Debug, Clone)]
pub struct GearMesh {
    /// Vertex stream, renderable as one triangle strip.
    pub vertices: Vec<GearVertex>,
    /// Per-surface-strip spans over `vertices`.
    pub strips: Vec<StripSpan>,
}

impl GearMesh {
    /// Number of vertices in the stream.
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }
}

/// Accumulates triangle-strip geometry, stitching consecutive strips
/// together with two degenerate bridge vertices.
///
/// Every strip after the first reserves two placeholder vertices at its
/// start; `end_strip` back-fills them with a copy of the previous strip's
/// last vertex and this strip's first vertex, producing zero-area triangles
/// that connect the strips without a primitive restart.
pub struct StripBuilder {
    vertices: Vec<GearVertex>,
    strips: Vec<StripSpan>,
    normal: Vec3,
    strip_start: usize,
}

impl StripBuilder {
    pub fn new() -> Self {
        Self {
            vertices: Vec::new(),
            strips: Vec::new(),
            normal: Vec3::Z,
            strip_start: 0,
        }
    }

    /// Set the normal applied to subsequently emitted vertices.
    pub fn set_normal(&mut self, normal: Vec3) {
        self.normal = normal;
    }

    /// Start a new strip, reserving bridge vertices if this is not the first.
    pub fn begin_strip(&mut self) {
        self.strip_start = self.vertices.len();
        if self.strip_start > 0 {
            self.vertices.push(GearVertex::zeroed());
            self.vertices.push(GearVertex::zeroed());
        }
    }

    /// Emit one vertex with the current normal.
    pub fn emit(&mut self, x: f32, y: f32, z: f32) {
        self.vertices.push(GearVertex {
            position: [x, y, z],
            normal: self.normal.to_array(),
        });
    }

    /// Close the current strip, back-filling the bridge vertices.
    ///
    /// A strip with no emitted vertices is dropped, placeholders included;
    /// there is nothing to bridge to.
    pub fn end_strip(&mut self) {
        let start = self.strip_start;
        if start > 0 {
            if self.vertices.len() == start + 2 {
                self.vertices.truncate(start);
                return;
            }
            self.vertices[start] = self.vertices[start - 1];
            self.vertices[start + 1] = self.vertices[start + 2];
        } else if self.vertices.is_empty() {
            return;
        }
        self.strips.push(StripSpan {
            start: start as u32,
            len: (self.vertices.len() - start) as u32,
        });
    }

    /// Consume the builder, producing the final mesh.
    pub fn finish(self) -> GearMesh {
        GearMesh {
            vertices: self.vertices,
            strips: self.strips,
        }
    }
}

impl Default for StripBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Tessellate a gear.
///
/// The layout follows the classic gears construction: front face, front
/// tooth faces, back face, back tooth faces, the four outward walls of each
/// tooth, and the inner cylinder.
pub fn generate_gear(params: &GearParams) -> GearMesh {
    let r0 = params.inner_radius;
    let r1 = params.outer_radius - params.tooth_depth / 2.0;
    let r2 = params.outer_radius + params.tooth_depth / 2.0;
    let teeth = params.teeth;
    let half_width = params.width * 0.5;

    let da = 2.0 * PI / teeth as f32 / 4.0;
    let tooth_angle = |i: u32| i as f32 * 2.0 * PI / teeth as f32;

    let mut b = StripBuilder::new();

    // Front face
    b.set_normal(Vec3::Z);
    b.begin_strip();
    for i in 0..=teeth {
        let angle = tooth_angle(i);
        b.emit(r0 * angle.cos(), r0 * angle.sin(), half_width);
        b.emit(r1 * angle.cos(), r1 * angle.sin(), half_width);
        if i < teeth {
            b.emit(r0 * angle.cos(), r0 * angle.sin(), half_width);
            b.emit(
                r1 * (angle + 3.0 * da).cos(),
                r1 * (angle + 3.0 * da).sin(),
                half_width,
            );
        }
    }
    b.end_strip();

    // Front sides of teeth
    for i in 0..teeth {
        let angle = tooth_angle(i);
        b.begin_strip();
        b.emit(r1 * angle.cos(), r1 * angle.sin(), half_width);
        b.emit(r2 * (angle + da).cos(), r2 * (angle + da).sin(), half_width);
        b.emit(
            r1 * (angle + 3.0 * da).cos(),
            r1 * (angle + 3.0 * da).sin(),
            half_width,
        );
        b.emit(
            r2 * (angle + 2.0 * da).cos(),
            r2 * (angle + 2.0 * da).sin(),
            half_width,
        );
        b.end_strip();
    }

    // Back face
    b.set_normal(Vec3::NEG_Z);
    b.begin_strip();
    for i in 0..=teeth {
        let angle = tooth_angle(i);
        b.emit(r1 * angle.cos(), r1 * angle.sin(), -half_width);
        b.emit(r0 * angle.cos(), r0 * angle.sin(), -half_width);
        if i < teeth {
            b.emit(
                r1 * (angle + 3.0 * da).cos(),
                r1 * (angle + 3.0 * da).sin(),
                -half_width,
            );
            b.emit(r0 * angle.cos(), r0 * angle.sin(), -half_width);
        }
    }
    b.end_strip();

    // Back sides of teeth
    for i in 0..teeth {
        let angle = tooth_angle(i);
        b.begin_strip();
        b.emit(
            r1 * (angle + 3.0 * da).cos(),
            r1 * (angle + 3.0 * da).sin(),
            -half_width,
        );
        b.emit(
            r2 * (angle + 2.0 * da).cos(),
            r2 * (angle + 2.0 * da).sin(),
            -half_width,
        );
        b.emit(r1 * angle.cos(), r1 * angle.sin(), -half_width);
        b.emit(r2 * (angle + da).cos(), r2 * (angle + da).sin(), -half_width);
        b.end_strip();
    }

    // Outward faces of teeth: leading flank, crest, trailing flank, valley
    for i in 0..teeth {
        let angle = tooth_angle(i);

        let flank = Vec3::new(
            r2 * (angle + da).sin() - r1 * angle.sin(),
            -(r2 * (angle + da).cos() - r1 * angle.cos()),
            0.0,
        )
        .normalize();
        b.set_normal(flank);
        b.begin_strip();
        b.emit(r1 * angle.cos(), r1 * angle.sin(), half_width);
        b.emit(r1 * angle.cos(), r1 * angle.sin(), -half_width);
        b.emit(r2 * (angle + da).cos(), r2 * (angle + da).sin(), half_width);
        b.emit(r2 * (angle + da).cos(), r2 * (angle + da).sin(), -half_width);
        b.end_strip();

        b.set_normal(Vec3::new(angle.cos(), angle.sin(), 0.0));
        b.begin_strip();
        b.emit(r2 * (angle + da).cos(), r2 * (angle + da).sin(), half_width);
        b.emit(r2 * (angle + da).cos(), r2 * (angle + da).sin(), -half_width);
        b.emit(
            r2 * (angle + 2.0 * da).cos(),
            r2 * (angle + 2.0 * da).sin(),
            half_width,
        );
        b.emit(
            r2 * (angle + 2.0 * da).cos(),
            r2 * (angle + 2.0 * da).sin(),
            -half_width,
        );
        b.end_strip();

        let flank = Vec3::new(
            r1 * (angle + 3.0 * da).sin() - r2 * (angle + 2.0 * da).sin(),
            -(r1 * (angle + 3.0 * da).cos() - r2 * (angle + 2.0 * da).cos()),
            0.0,
        )
        .normalize();
        b.set_normal(flank);
        b.begin_strip();
        b.emit(
            r2 * (angle + 2.0 * da).cos(),
            r2 * (angle + 2.0 * da).sin(),
            half_width,
        );
        b.emit(
            r2 * (angle + 2.0 * da).cos(),
            r2 * (angle + 2.0 * da).sin(),
            -half_width,
        );
        b.emit(
            r1 * (angle + 3.0 * da).cos(),
            r1 * (angle + 3.0 * da).sin(),
            half_width,
        );
        b.emit(
            r1 * (angle + 3.0 * da).cos(),
            r1 * (angle + 3.0 * da).sin(),
            -half_width,
        );
        b.end_strip();

        b.set_normal(Vec3::new(angle.cos(), angle.sin(), 0.0));
        b.begin_strip();
        b.emit(
            r1 * (angle + 3.0 * da).cos(),
            r1 * (angle + 3.0 * da).sin(),
            half_width,
        );
        b.emit(
            r1 * (angle + 3.0 * da).cos(),
            r1 * (angle + 3.0 * da).sin(),
            -half_width,
        );
        b.emit(
            r1 * (angle + 4.0 * da).cos(),
            r1 * (angle + 4.0 * da).sin(),
            half_width,
        );
        b.emit(
            r1 * (angle + 4.0 * da).cos(),
            r1 * (angle + 4.0 * da).sin(),
            -half_width,
        );
        b.end_strip();
    }

    // Inner cylinder
    b.begin_strip();
    for i in 0..=teeth {
        let angle = tooth_angle(i);
        b.set_normal(Vec3::new(-angle.cos(), -angle.sin(), 0.0));
        b.emit(r0 * angle.cos(), r0 * angle.sin(), -half_width);
        b.emit(r0 * angle.cos(), r0 * angle.sin(), half_width);
    }
    b.end_strip();

    b.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn params(teeth: u32) -> GearParams {
        GearParams {
            inner_radius: 1.0,
            outer_radius: 4.0,
            width: 1.0,
            teeth,
            tooth_depth: 0.7,
        }
    }

    #[test]
    fn generation_is_deterministic() {
        let a = generate_gear(&params(20));
        let b = generate_gear(&params(20));
        assert_eq!(a.vertices, b.vertices);
        assert_eq!(a.strips, b.strips);
    }

    #[test]
    fn vertex_count_matches_layout() {
        // Per tooth: 4 on the front face, 6 per tooth-face strip (front and
        // back), 4 on the back face, 24 across the outward walls, 2 on the
        // cylinder; plus the constant ring/cylinder overhang.
        for teeth in [10, 20] {
            let mesh = generate_gear(&params(teeth));
            assert_eq!(mesh.vertex_count(), 46 * teeth + 10);
        }
    }

    #[test]
    fn emitted_normals_are_unit_length() {
        let mesh = generate_gear(&params(20));
        for v in &mesh.vertices {
            let len = Vec3::from_array(v.normal).length();
            assert_relative_eq!(len, 1.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn front_ring_strip_structure() {
        // The front face is the first strip: toothCount+1 boundary vertex
        // pairs plus two extra vertices per tooth segment, no leading bridge.
        let teeth = 20;
        let mesh = generate_gear(&params(teeth));
        let front = mesh.strips[0];
        assert_eq!(front.start, 0);
        assert_eq!(front.len, (teeth + 1) * 2 + teeth * 2);
    }

    #[test]
    fn strip_count_matches_surfaces() {
        // 1 front face + teeth front tooth faces + 1 back face + teeth back
        // tooth faces + 4*teeth outward walls + 1 inner cylinder.
        let teeth = 10;
        let mesh = generate_gear(&params(teeth));
        assert_eq!(mesh.strips.len() as u32, 3 + 6 * teeth);
    }

    #[test]
    fn bridges_connect_adjacent_strips() {
        let mesh = generate_gear(&params(10));
        for span in &mesh.strips[1..] {
            let start = span.start as usize;
            // Bridge duplicates the previous strip's last vertex, then this
            // strip's first real vertex.
            assert_eq!(mesh.vertices[start], mesh.vertices[start - 1]);
            assert_eq!(mesh.vertices[start + 1], mesh.vertices[start + 2]);
        }
    }

    #[test]
    fn empty_strips_are_dropped() {
        let mut b = StripBuilder::new();
        b.begin_strip();
        b.end_strip();

        b.begin_strip();
        b.emit(0.0, 0.0, 0.0);
        b.emit(1.0, 0.0, 0.0);
        b.emit(0.0, 1.0, 0.0);
        b.end_strip();

        b.begin_strip();
        b.end_strip();

        let mesh = b.finish();
        assert_eq!(mesh.strips.len(), 1);
        assert_eq!(mesh.vertex_count(), 3);
    }

    #[test]
    fn strips_tile_the_vertex_stream() {
        let mesh = generate_gear(&params(10));
        let mut expected_start = 0;
        for span in &mesh.strips {
            assert_eq!(span.start, expected_start);
            expected_start += span.len;
        }
        assert_eq!(expected_start, mesh.vertex_count());
    }
}
