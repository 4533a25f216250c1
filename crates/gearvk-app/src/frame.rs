//! Animation and view state.

/// Drive gear rotation speed in degrees per second.
pub const DEGREES_PER_SECOND: f32 = 70.0;

/// View rotation step per key press, in degrees.
pub const VIEW_ROT_STEP: f32 = 5.0;

/// The angle accumulator wraps here to keep float precision over long runs.
const ANGLE_WRAP: f32 = 3600.0;

/// Animation and view state advanced once per presented frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    /// Drive gear angle in degrees.
    pub angle: f32,
    /// View rotation about X and Y in degrees.
    pub view_rot: [f32; 2],
    /// Whether the gears are spinning.
    pub animate: bool,
}

impl Default for FrameState {
    fn default() -> Self {
        Self {
            angle: 0.0,
            view_rot: [20.0, 30.0],
            animate: true,
        }
    }
}

impl FrameState {
    /// Advance the animation by `dt` seconds.
    pub fn advance(&mut self, dt: f32) {
        if !self.animate {
            return;
        }

        self.angle += DEGREES_PER_SECOND * dt;
        if self.angle > ANGLE_WRAP {
            self.angle -= ANGLE_WRAP;
        }
    }

    /// Rotate the view by the given deltas in degrees.
    pub fn rotate_view(&mut self, dx: f32, dy: f32) {
        self.view_rot[0] += dx;
        self.view_rot[1] += dy;
    }

    /// Toggle the animation on or off.
    pub fn toggle_animation(&mut self) {
        self.animate = !self.animate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn advance_scales_with_dt() {
        let mut state = FrameState::default();
        state.advance(0.1);
        assert_relative_eq!(state.angle, 7.0, epsilon = 1e-5);
    }

    #[test]
    fn angle_wraps() {
        let mut state = FrameState {
            angle: 3599.0,
            ..Default::default()
        };
        state.advance(0.1);
        assert_relative_eq!(state.angle, 6.0, epsilon = 1e-3);
    }

    #[test]
    fn paused_state_does_not_advance() {
        let mut state = FrameState::default();
        state.toggle_animation();
        state.advance(1.0);
        assert_relative_eq!(state.angle, 0.0);
    }

    #[test]
    fn double_toggle_is_identity() {
        let mut state = FrameState::default();
        state.toggle_animation();
        state.toggle_animation();
        state.advance(1.0);
        assert_relative_eq!(state.angle, DEGREES_PER_SECOND);
    }

    #[test]
    fn view_rotation_accumulates() {
        let mut state = FrameState::default();
        state.rotate_view(VIEW_ROT_STEP, 0.0);
        state.rotate_view(0.0, -VIEW_ROT_STEP);
        assert_eq!(state.view_rot, [25.0, 25.0]);
    }
}
