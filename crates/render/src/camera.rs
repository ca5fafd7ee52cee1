use glam::{Mat4, Vec3};
use kiln_common::Transform;
use kiln_common::math::{safe_normalize, up_hint};
use kiln_input::{Action, InputState};
use std::f32::consts::FRAC_PI_2;
use tracing::warn;

pub const NEAR_PLANE: f32 = 0.01;
pub const FAR_PLANE: f32 = 1000.0;

/// Speed multiplier while the boost action is held.
pub const BOOST_FACTOR: f32 = 3.0;

/// Cumulative pitch limit, just short of straight up/down so the view never flips.
pub const MAX_PITCH: f32 = FRAC_PI_2 - 0.01;

/// Free-fly perspective camera.
///
/// View and projection are cached and only recomputed by [`Camera::update`],
/// [`Camera::update_view_matrix`] and [`Camera::update_projection_matrix`].
#[derive(Debug, Clone)]
pub struct Camera {
    transform: Transform,
    move_speed: f32,
    look_speed: f32,
    fov: f32,
    aspect: f32,
    view: Mat4,
    projection: Mat4,
}

impl Camera {
    /// `fov` is the vertical field of view in radians.
    pub fn new(position: Vec3, move_speed: f32, look_speed: f32, fov: f32, aspect: f32) -> Self {
        let mut transform = Transform::new();
        transform.set_position(position);
        let mut camera = Self {
            transform,
            move_speed,
            look_speed,
            fov,
            aspect: 1.0,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        };
        camera.update_view_matrix();
        camera.update_projection_matrix(aspect);
        camera
    }

    /// Apply one tick of input: movement, then look, then rebuild the view.
    pub fn update(&mut self, dt: f32, input: &InputState) {
        let mut speed = self.move_speed * dt;
        if input.action_active(Action::Boost) {
            speed *= BOOST_FACTOR;
        }

        let relative = [
            (Action::MoveForward, Vec3::Z),
            (Action::MoveBackward, Vec3::NEG_Z),
            (Action::StrafeLeft, Vec3::NEG_X),
            (Action::StrafeRight, Vec3::X),
        ];
        for (action, dir) in relative {
            if input.action_active(action) {
                self.transform.move_relative(dir * speed);
            }
        }
        if input.action_active(Action::MoveUp) {
            self.transform.move_absolute(Vec3::Y * speed);
        }
        if input.action_active(Action::MoveDown) {
            self.transform.move_absolute(Vec3::NEG_Y * speed);
        }

        if input.look_active() {
            let delta = input.pointer_delta() * self.look_speed;
            // per-tick clamp against huge single-frame deltas
            let yaw = delta.x.clamp(-FRAC_PI_2, FRAC_PI_2);
            let pitch = delta.y.clamp(-FRAC_PI_2, FRAC_PI_2);
            let current = self.transform.rotation().x;
            let target = (current + pitch).clamp(-MAX_PITCH, MAX_PITCH);
            self.transform.rotate(target - current, yaw, 0.0);
        }

        self.update_view_matrix();
    }

    /// Rebuild the view from the transform's position and forward vector.
    pub fn update_view_matrix(&mut self) {
        let forward = safe_normalize(self.transform.forward(), Vec3::Z);
        self.view = Mat4::look_to_lh(self.transform.position(), forward, up_hint(forward));
    }

    /// Rebuild the projection for a new aspect ratio. Non-positive or non-finite
    /// ratios (a minimized window) keep the previous one.
    pub fn update_projection_matrix(&mut self, aspect: f32) {
        if aspect.is_finite() && aspect > 0.0 {
            self.aspect = aspect;
        } else {
            warn!(aspect, "ignoring degenerate aspect ratio");
        }
        self.projection = Mat4::perspective_lh(self.fov, self.aspect, NEAR_PLANE, FAR_PLANE);
    }

    /// Point the camera at `target` (no roll).
    pub fn look_at(&mut self, target: Vec3) {
        let dir = target - self.transform.position();
        let dir = safe_normalize(dir, self.transform.forward());
        let yaw = dir.x.atan2(dir.z);
        let pitch = (-dir.y).asin().clamp(-MAX_PITCH, MAX_PITCH);
        self.transform.set_rotation(Vec3::new(pitch, yaw, 0.0));
        self.update_view_matrix();
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    /// Direct transform access. Call [`Camera::update_view_matrix`] after editing.
    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    pub fn position(&self) -> Vec3 {
        self.transform.position()
    }

    pub fn forward(&self) -> Vec3 {
        self.transform.forward()
    }

    pub fn fov(&self) -> f32 {
        self.fov
    }

    pub fn set_fov(&mut self, fov: f32) {
        self.fov = fov;
        self.update_projection_matrix(self.aspect);
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn move_speed(&self) -> f32 {
        self.move_speed
    }

    pub fn set_move_speed(&mut self, speed: f32) {
        self.move_speed = speed;
    }

    pub fn look_speed(&self) -> f32 {
        self.look_speed
    }

    pub fn set_look_speed(&mut self, speed: f32) {
        self.look_speed = speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec2;
    use kiln_common::math::is_invertible;
    use kiln_input::Key;

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 0.0, -10.0), 5.0, 0.002, FRAC_PI_2 / 1.5, 16.0 / 9.0)
    }

    #[test]
    fn initial_matrices_are_invertible() {
        let cam = camera();
        assert!(is_invertible(&cam.view()));
        assert!(is_invertible(&cam.projection()));
        // origin is straight ahead of a camera at z = -10 facing +Z
        let p = cam.view().transform_point3(Vec3::ZERO);
        assert!(p.abs_diff_eq(Vec3::new(0.0, 0.0, 10.0), 1e-4));
    }

    #[test]
    fn aspect_change_scales_only_x_and_y_terms() {
        let mut cam = camera();
        cam.update_projection_matrix(1.0);
        let square = cam.projection();
        cam.update_projection_matrix(2.0);
        let wide = cam.projection();

        assert!((wide.x_axis.x - square.x_axis.x / 2.0).abs() < 1e-6);
        assert_eq!(wide.y_axis.y, square.y_axis.y);
        assert_eq!(wide.z_axis.z, square.z_axis.z);
        assert_eq!(wide.w_axis.z, square.w_axis.z);
        assert_eq!(cam.aspect(), 2.0);
    }

    #[test]
    fn degenerate_aspect_keeps_previous() {
        let mut cam = camera();
        let before = cam.projection();
        cam.update_projection_matrix(0.0);
        assert_eq!(cam.projection(), before);
        cam.update_projection_matrix(f32::NAN);
        assert!(cam.projection().to_cols_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn forward_key_moves_along_facing() {
        let mut cam = camera();
        let mut input = InputState::new();
        input.press(Key::W);
        cam.update(1.0, &input);
        assert!(cam.position().abs_diff_eq(Vec3::new(0.0, 0.0, -5.0), 1e-5));
    }

    #[test]
    fn boost_triples_speed() {
        let mut cam = camera();
        let mut input = InputState::new();
        input.press(Key::D);
        input.press(Key::LeftShift);
        cam.update(0.5, &input);
        assert!(cam.position().abs_diff_eq(Vec3::new(7.5, 0.0, -10.0), 1e-5));
    }

    #[test]
    fn vertical_movement_ignores_pitch() {
        let mut cam = camera();
        cam.transform_mut().set_rotation(Vec3::new(0.5, 0.0, 0.0));
        let mut input = InputState::new();
        input.press(Key::Space);
        cam.update(1.0, &input);
        assert!(cam.position().abs_diff_eq(Vec3::new(0.0, 5.0, -10.0), 1e-5));
    }

    #[test]
    fn look_only_while_held() {
        let mut cam = camera();
        let mut input = InputState::new();
        input.add_pointer_delta(Vec2::new(100.0, 0.0));
        cam.update(0.016, &input);
        assert_eq!(cam.transform().rotation(), Vec3::ZERO);

        input.set_look_held(true);
        cam.update(0.016, &input);
        assert!((cam.transform().rotation().y - 0.2).abs() < 1e-6);
    }

    #[test]
    fn huge_delta_is_clamped_per_tick() {
        let mut cam = camera();
        let mut input = InputState::new();
        input.set_look_held(true);
        input.add_pointer_delta(Vec2::new(1.0e6, 0.0));
        cam.update(0.016, &input);
        assert!((cam.transform().rotation().y - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn cumulative_pitch_never_flips() {
        let mut cam = camera();
        let mut input = InputState::new();
        input.set_look_held(true);
        input.add_pointer_delta(Vec2::new(0.0, 700.0));
        for _ in 0..10 {
            cam.update(0.016, &input);
        }
        let pitch = cam.transform().rotation().x;
        assert!((pitch - MAX_PITCH).abs() < 1e-5);
        assert!(is_invertible(&cam.view()));
    }

    #[test]
    fn look_at_points_forward_at_target() {
        let mut cam = camera();
        cam.look_at(Vec3::new(10.0, 0.0, -10.0));
        assert!(cam.forward().abs_diff_eq(Vec3::X, 1e-5));
        cam.look_at(Vec3::new(0.0, -10.0, -10.0));
        assert!(cam.forward().y < -0.99);
        assert!(is_invertible(&cam.view()));
    }

    #[test]
    fn set_fov_rebuilds_projection() {
        let mut cam = camera();
        let before = cam.projection().y_axis.y;
        cam.set_fov(0.5);
        assert!(cam.projection().y_axis.y > before);
    }
}
