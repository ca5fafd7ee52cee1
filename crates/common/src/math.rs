//! Guards for degenerate vector math.

use glam::{Mat3, Mat4, Vec3, Vec4};

/// Below this length a direction is treated as zero.
pub const DIRECTION_EPSILON: f32 = 1e-6;

/// Smallest |det| / (product of column lengths) still treated as invertible.
pub const SINGULAR_EPSILON: f32 = 1e-6;

/// Normalize `v`, or return `fallback` when `v` is zero-length or not finite.
pub fn safe_normalize(v: Vec3, fallback: Vec3) -> Vec3 {
    let len = v.length();
    if len.is_finite() && len > DIRECTION_EPSILON {
        v / len
    } else {
        fallback
    }
}

/// Pick an up vector usable with `forward` in a look-to matrix.
///
/// World up (+Y) unless `forward` is (anti)parallel to it, then +Z.
pub fn up_hint(forward: Vec3) -> Vec3 {
    if forward.cross(Vec3::Y).length_squared() < DIRECTION_EPSILON {
        Vec3::Z
    } else {
        Vec3::Y
    }
}

/// True when every element of the matrix is finite.
pub fn is_finite_matrix(m: &Mat4) -> bool {
    m.to_cols_array().iter().all(|v| v.is_finite())
}

/// True when the matrix can be inverted without blowing up.
///
/// The determinant is measured against the product of the column lengths, so
/// uniformly tiny or huge scales stay invertible. Affine matrices are judged
/// on their linear part; the translation column does not affect the result.
pub fn is_invertible(m: &Mat4) -> bool {
    if !is_finite_matrix(m) {
        return false;
    }
    let (det, volume) = if m.row(3) == Vec4::W {
        let linear = Mat3::from_mat4(*m);
        let volume = linear.x_axis.length() * linear.y_axis.length() * linear.z_axis.length();
        (linear.determinant(), volume)
    } else {
        let volume = m.x_axis.length() * m.y_axis.length() * m.z_axis.length() * m.w_axis.length();
        (m.determinant(), volume)
    };
    volume.is_finite() && volume > 0.0 && (det / volume).abs() > SINGULAR_EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_normalize_unit_length() {
        let n = safe_normalize(Vec3::new(3.0, 0.0, 4.0), Vec3::Z);
        assert!((n.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn safe_normalize_zero_falls_back() {
        assert_eq!(safe_normalize(Vec3::ZERO, Vec3::Z), Vec3::Z);
        assert_eq!(safe_normalize(Vec3::splat(f32::NAN), Vec3::X), Vec3::X);
    }

    #[test]
    fn up_hint_avoids_parallel_forward() {
        assert_eq!(up_hint(Vec3::Z), Vec3::Y);
        assert_eq!(up_hint(Vec3::NEG_Y), Vec3::Z);
        assert_eq!(up_hint(Vec3::Y), Vec3::Z);
    }

    #[test]
    fn invertibility() {
        assert!(is_invertible(&Mat4::IDENTITY));
        assert!(!is_invertible(&Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0))));
        assert!(!is_invertible(&Mat4::from_scale(Vec3::splat(f32::NAN))));
    }

    #[test]
    fn small_uniform_scale_is_invertible() {
        assert!(is_invertible(&Mat4::from_scale(Vec3::splat(0.004))));
        let far = Mat4::from_translation(Vec3::splat(1.0e6)) * Mat4::from_scale(Vec3::splat(0.01));
        assert!(is_invertible(&far));
    }

    #[test]
    fn collapsed_axis_is_singular_at_any_scale() {
        let flat = Mat3::from_cols(Vec3::X, Vec3::Y, Vec3::new(1.0, 1.0, 1.0e-9));
        assert!(!is_invertible(&Mat4::from_mat3(flat)));
    }
}
