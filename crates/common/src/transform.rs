use crate::math::{is_invertible, safe_normalize};
use glam::{EulerRot, Mat4, Quat, Vec3};

/// Spatial transform: position, pitch/yaw/roll rotation (radians) and scale.
///
/// The world matrix is computed lazily. Every mutator marks the transform dirty and the
/// next call to [`Transform::world_matrix`] rebuilds it as scale, then rotation, then
/// translation (`T * R * S` in column-vector form).
///
/// Rotation is stored as Euler angles and inherits their gimbal lock.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    position: Vec3,
    pitch_yaw_roll: Vec3,
    scale: Vec3,

    forward: Vec3,
    up: Vec3,
    right: Vec3,

    world: Mat4,
    dirty: bool,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            pitch_yaw_roll: Vec3::ZERO,
            scale: Vec3::ONE,
            forward: Vec3::Z,
            up: Vec3::Y,
            right: Vec3::X,
            world: Mat4::IDENTITY,
            dirty: false,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a transform from position, pitch/yaw/roll and scale.
    pub fn from_parts(position: Vec3, pitch_yaw_roll: Vec3, scale: Vec3) -> Self {
        let mut t = Self::default();
        t.set_position(position);
        t.set_rotation(pitch_yaw_roll);
        t.set_scale(scale);
        t
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.dirty = true;
    }

    /// Set pitch/yaw/roll in radians.
    pub fn set_rotation(&mut self, pitch_yaw_roll: Vec3) {
        self.pitch_yaw_roll = pitch_yaw_roll;
        self.dirty = true;
        self.update_vectors();
    }

    pub fn set_scale(&mut self, scale: Vec3) {
        self.scale = scale;
        self.dirty = true;
    }

    /// Translate along the world axes.
    pub fn move_absolute(&mut self, offset: Vec3) {
        self.position += offset;
        self.dirty = true;
    }

    /// Translate along the local axes: `offset` is rotated by the current orientation
    /// before it is added, so +Z always means "the way this transform faces".
    pub fn move_relative(&mut self, offset: Vec3) {
        self.position += self.orientation() * offset;
        self.dirty = true;
    }

    /// Add to the current pitch/yaw/roll.
    pub fn rotate(&mut self, pitch: f32, yaw: f32, roll: f32) {
        self.pitch_yaw_roll += Vec3::new(pitch, yaw, roll);
        self.dirty = true;
        self.update_vectors();
    }

    /// Multiply the current scale component-wise.
    pub fn scale_by(&mut self, factor: Vec3) {
        self.scale *= factor;
        self.dirty = true;
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    /// Pitch/yaw/roll in radians.
    pub fn rotation(&self) -> Vec3 {
        self.pitch_yaw_roll
    }

    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    /// Orientation quaternion: roll about Z, then pitch about X, then yaw about Y.
    pub fn orientation(&self) -> Quat {
        let [pitch, yaw, roll] = self.pitch_yaw_roll.to_array();
        Quat::from_euler(EulerRot::YXZ, yaw, pitch, roll)
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// The cached world matrix, or `None` when a mutator has run since it was built.
    pub fn cached_world_matrix(&self) -> Option<Mat4> {
        (!self.dirty).then_some(self.world)
    }

    /// Local-to-world matrix, rebuilt only when dirty.
    pub fn world_matrix(&mut self) -> Mat4 {
        if !self.dirty {
            return self.world;
        }

        let translation = Mat4::from_translation(self.position);
        let rotation = Mat4::from_quat(self.orientation());
        let scale = Mat4::from_scale(self.scale);
        self.world = translation * rotation * scale;
        self.dirty = false;
        self.world
    }

    /// Transpose of the inverse world matrix, for transforming normals under
    /// non-uniform scale. A singular world matrix yields identity.
    pub fn inverse_transpose_matrix(&mut self) -> Mat4 {
        let world = self.world_matrix();
        if !is_invertible(&world) {
            return Mat4::IDENTITY;
        }
        world.inverse().transpose()
    }

    fn update_vectors(&mut self) {
        let q = self.orientation();
        self.forward = safe_normalize(q * Vec3::Z, Vec3::Z);
        self.up = safe_normalize(q * Vec3::Y, Vec3::Y);
        self.right = safe_normalize(q * Vec3::X, Vec3::X);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn default_is_identity() {
        let mut t = Transform::default();
        assert_eq!(t.position(), Vec3::ZERO);
        assert_eq!(t.scale(), Vec3::ONE);
        assert_eq!(t.forward(), Vec3::Z);
        assert_eq!(t.world_matrix(), Mat4::IDENTITY);
    }

    #[test]
    fn world_matrix_is_idempotent() {
        let mut t = Transform::from_parts(
            Vec3::new(1.0, 2.0, 3.0),
            Vec3::new(0.3, 0.7, -0.2),
            Vec3::new(2.0, 1.0, 0.5),
        );
        let a = t.world_matrix();
        let b = t.world_matrix();
        assert_eq!(a.to_cols_array(), b.to_cols_array());
        assert!(!t.is_dirty());
    }

    #[test]
    fn setters_invalidate_cache() {
        let mut t = Transform::new();
        t.world_matrix();

        t.set_position(Vec3::new(5.0, 0.0, 0.0));
        assert!(t.cached_world_matrix().is_none());
        let p = t.world_matrix().transform_point3(Vec3::ZERO);
        assert!(p.abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-6));

        t.set_scale(Vec3::splat(3.0));
        let p = t.world_matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(8.0, 0.0, 0.0), 1e-6));

        t.scale_by(Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(t.scale(), Vec3::new(6.0, 3.0, 3.0));
        let p = t.world_matrix().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(11.0, 0.0, 0.0), 1e-5));

        t.move_absolute(Vec3::new(0.0, 1.0, 0.0));
        let p = t.world_matrix().transform_point3(Vec3::ZERO);
        assert!(p.abs_diff_eq(Vec3::new(5.0, 1.0, 0.0), 1e-6));
    }

    #[test]
    fn scale_applies_before_translation() {
        let mut t = Transform::new();
        t.set_position(Vec3::new(1.0, 0.0, 0.0));
        t.set_scale(Vec3::new(2.0, 1.0, 1.0));
        let p = t.world_matrix().transform_point3(Vec3::new(1.0, 0.0, 0.0));
        assert!(p.abs_diff_eq(Vec3::new(3.0, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn rotation_applies_before_translation() {
        let mut t = Transform::new();
        t.set_position(Vec3::new(0.0, 0.0, 10.0));
        t.set_rotation(Vec3::new(0.0, FRAC_PI_2, 0.0));
        let p = t.world_matrix().transform_point3(Vec3::Z);
        assert!(p.abs_diff_eq(Vec3::new(1.0, 0.0, 10.0), 1e-5));
    }

    #[test]
    fn move_relative_follows_orientation() {
        let mut t = Transform::new();
        t.set_rotation(Vec3::new(0.0, FRAC_PI_2, 0.0));
        t.move_relative(Vec3::X);
        assert!(t.position().abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));
    }

    #[test]
    fn move_absolute_ignores_orientation() {
        let mut t = Transform::new();
        t.set_rotation(Vec3::new(0.0, FRAC_PI_2, 0.0));
        t.move_absolute(Vec3::X);
        assert!(t.position().abs_diff_eq(Vec3::X, 1e-6));
    }

    #[test]
    fn rotate_accumulates_and_updates_basis() {
        let mut t = Transform::new();
        t.rotate(0.0, FRAC_PI_2 / 2.0, 0.0);
        t.rotate(0.0, FRAC_PI_2 / 2.0, 0.0);
        assert!((t.rotation().y - FRAC_PI_2).abs() < 1e-6);
        assert!(t.forward().abs_diff_eq(Vec3::X, 1e-5));
        assert!(t.right().abs_diff_eq(Vec3::NEG_Z, 1e-5));
        assert!(t.up().abs_diff_eq(Vec3::Y, 1e-5));
    }

    #[test]
    fn pitch_tilts_forward_downward() {
        let mut t = Transform::new();
        t.rotate(FRAC_PI_2, 0.0, 0.0);
        assert!(t.forward().abs_diff_eq(Vec3::NEG_Y, 1e-5));
    }

    #[test]
    fn inverse_transpose_undoes_nonuniform_scale() {
        let mut t = Transform::new();
        t.set_scale(Vec3::new(2.0, 1.0, 1.0));
        let it = t.inverse_transpose_matrix();
        let n = it.transform_vector3(Vec3::X);
        assert!(n.abs_diff_eq(Vec3::new(0.5, 0.0, 0.0), 1e-6));
    }

    #[test]
    fn inverse_transpose_keeps_rotation_at_small_scale() {
        let mut t = Transform::new();
        t.set_rotation(Vec3::new(0.0, FRAC_PI_2, 0.0));
        t.set_scale(Vec3::splat(0.004));
        let n = t.inverse_transpose_matrix().transform_vector3(Vec3::X).normalize();
        assert!(n.abs_diff_eq(Vec3::NEG_Z, 1e-5));
    }

    #[test]
    fn inverse_transpose_of_singular_is_identity() {
        let mut t = Transform::new();
        t.set_scale(Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(t.inverse_transpose_matrix(), Mat4::IDENTITY);
    }
}
