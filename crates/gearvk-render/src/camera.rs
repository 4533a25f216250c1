//! Projection math.

use glam::{Mat4, Vec4};

/// Near plane distance of the gear scene frustum.
pub const SCENE_NEAR: f32 = 5.0;
/// Far plane distance of the gear scene frustum.
pub const SCENE_FAR: f32 = 60.0;

/// Off-center perspective frustum for Vulkan clip space.
///
/// Depth maps to [0, 1] and Y points down, so no separate correction
/// matrix is needed.
pub fn frustum_projection(
    left: f32,
    right: f32,
    bottom: f32,
    top: f32,
    near: f32,
    far: f32,
) -> Mat4 {
    let x = 2.0 * near / (right - left);
    let y = -2.0 * near / (top - bottom);
    let a = (right + left) / (right - left);
    let b = -(top + bottom) / (top - bottom);
    let c = far / (near - far);
    let d = far * near / (near - far);

    Mat4::from_cols(
        Vec4::new(x, 0.0, 0.0, 0.0),
        Vec4::new(0.0, y, 0.0, 0.0),
        Vec4::new(a, b, c, -1.0),
        Vec4::new(0.0, 0.0, d, 0.0),
    )
}

/// Projection for the gear scene, with the vertical half-extent matching the
/// window aspect ratio (`h = height / width`).
pub fn scene_projection(h: f32) -> Mat4 {
    frustum_projection(-1.0, 1.0, -h, h, SCENE_NEAR, SCENE_FAR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn project(m: Mat4, p: Vec4) -> Vec4 {
        let clip = m * p;
        clip / clip.w
    }

    #[test]
    fn near_plane_maps_to_zero_depth() {
        let m = scene_projection(1.0);
        let ndc = project(m, Vec4::new(0.0, 0.0, -SCENE_NEAR, 1.0));
        assert_relative_eq!(ndc.z, 0.0, epsilon = 1e-6);
    }

    #[test]
    fn far_plane_maps_to_one_depth() {
        let m = scene_projection(1.0);
        let ndc = project(m, Vec4::new(0.0, 0.0, -SCENE_FAR, 1.0));
        assert_relative_eq!(ndc.z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn up_in_world_is_down_in_clip() {
        let h = 0.75;
        let m = scene_projection(h);
        // Top edge of the near plane lands at the top of the viewport,
        // which is -1 in Vulkan NDC.
        let ndc = project(m, Vec4::new(0.0, h, -SCENE_NEAR, 1.0));
        assert_relative_eq!(ndc.y, -1.0, epsilon = 1e-6);
    }

    #[test]
    fn frustum_is_symmetric_in_x() {
        let m = scene_projection(1.0);
        let left = project(m, Vec4::new(-1.0, 0.0, -SCENE_NEAR, 1.0));
        let right = project(m, Vec4::new(1.0, 0.0, -SCENE_NEAR, 1.0));
        assert_relative_eq!(left.x, -1.0, epsilon = 1e-6);
        assert_relative_eq!(right.x, 1.0, epsilon = 1e-6);
    }
}
