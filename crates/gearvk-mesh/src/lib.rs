//! Procedural gear mesh generation.
//!
//! Gears are tessellated as a single triangle strip per mesh: individual
//! surface strips (faces, tooth walls, inner cylinder) are stitched together
//! with degenerate bridge triangles so each gear renders with one draw.

pub mod gear;

pub use gear::{generate_gear, GearMesh, GearParams, GearVertex, StripBuilder, StripSpan};
