use bytemuck::Zeroable;
use glam::Vec3;
use kiln_common::math::safe_normalize;

/// Lights the lit pixel program can take in one draw.
pub const MAX_LIGHTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LightKind {
    Directional = 0,
    Point = 1,
    Spot = 2,
}

impl LightKind {
    pub fn label(self) -> &'static str {
        match self {
            LightKind::Directional => "directional",
            LightKind::Point => "point",
            LightKind::Spot => "spot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Light {
    Directional {
        direction: Vec3,
        color: Vec3,
        intensity: f32,
    },
    Point {
        position: Vec3,
        range: f32,
        color: Vec3,
        intensity: f32,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        range: f32,
        color: Vec3,
        intensity: f32,
        /// Full-intensity cone half-angle, radians.
        inner_angle: f32,
        /// Falloff-to-zero cone half-angle, radians.
        outer_angle: f32,
    },
}

/// GPU record matching `struct Light` in the lit pixel program.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LightRaw {
    pub kind: u32,
    pub range: f32,
    pub intensity: f32,
    pub spot_inner: f32,
    pub direction: [f32; 3],
    pub spot_outer: f32,
    pub position: [f32; 3],
    pub _pad0: f32,
    pub color: [f32; 3],
    pub _pad1: f32,
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Light::Directional {
            direction,
            color,
            intensity,
        }
    }

    pub fn point(position: Vec3, range: f32, color: Vec3, intensity: f32) -> Self {
        Light::Point {
            position,
            range,
            color,
            intensity,
        }
    }

    pub fn kind(&self) -> LightKind {
        match self {
            Light::Directional { .. } => LightKind::Directional,
            Light::Point { .. } => LightKind::Point,
            Light::Spot { .. } => LightKind::Spot,
        }
    }

    pub fn color(&self) -> Vec3 {
        match *self {
            Light::Directional { color, .. }
            | Light::Point { color, .. }
            | Light::Spot { color, .. } => color,
        }
    }

    pub fn color_mut(&mut self) -> &mut Vec3 {
        match self {
            Light::Directional { color, .. }
            | Light::Point { color, .. }
            | Light::Spot { color, .. } => color,
        }
    }

    pub fn intensity(&self) -> f32 {
        match *self {
            Light::Directional { intensity, .. }
            | Light::Point { intensity, .. }
            | Light::Spot { intensity, .. } => intensity,
        }
    }

    pub fn intensity_mut(&mut self) -> &mut f32 {
        match self {
            Light::Directional { intensity, .. }
            | Light::Point { intensity, .. }
            | Light::Spot { intensity, .. } => intensity,
        }
    }

    /// Direction the light travels, for directional and spot lights.
    pub fn direction(&self) -> Option<Vec3> {
        match *self {
            Light::Directional { direction, .. } | Light::Spot { direction, .. } => {
                Some(direction)
            }
            Light::Point { .. } => None,
        }
    }

    pub fn direction_mut(&mut self) -> Option<&mut Vec3> {
        match self {
            Light::Directional { direction, .. } | Light::Spot { direction, .. } => {
                Some(direction)
            }
            Light::Point { .. } => None,
        }
    }

    pub fn position(&self) -> Option<Vec3> {
        match *self {
            Light::Point { position, .. } | Light::Spot { position, .. } => Some(position),
            Light::Directional { .. } => None,
        }
    }

    pub fn position_mut(&mut self) -> Option<&mut Vec3> {
        match self {
            Light::Point { position, .. } | Light::Spot { position, .. } => Some(position),
            Light::Directional { .. } => None,
        }
    }

    pub fn range_mut(&mut self) -> Option<&mut f32> {
        match self {
            Light::Point { range, .. } | Light::Spot { range, .. } => Some(range),
            Light::Directional { .. } => None,
        }
    }

    /// Pack for upload. Directions are normalized; a zero direction becomes straight down.
    pub fn to_raw(&self) -> LightRaw {
        let mut raw = LightRaw {
            kind: self.kind() as u32,
            color: self.color().to_array(),
            intensity: self.intensity(),
            ..LightRaw::zeroed()
        };
        match *self {
            Light::Directional { direction, .. } => {
                raw.direction = safe_normalize(direction, Vec3::NEG_Y).to_array();
            }
            Light::Point {
                position, range, ..
            } => {
                raw.position = position.to_array();
                raw.range = range;
            }
            Light::Spot {
                position,
                direction,
                range,
                inner_angle,
                outer_angle,
                ..
            } => {
                raw.position = position.to_array();
                raw.direction = safe_normalize(direction, Vec3::NEG_Y).to_array();
                raw.range = range;
                raw.spot_inner = inner_angle;
                raw.spot_outer = outer_angle.max(inner_angle);
            }
        }
        raw
    }
}

/// Pack up to [`MAX_LIGHTS`] lights into one contiguous block. Returns the block and
/// the number of lights it holds; the rest of the block is zero.
pub fn pack_lights(lights: &[Light]) -> ([LightRaw; MAX_LIGHTS], u32) {
    let mut block = [LightRaw::zeroed(); MAX_LIGHTS];
    let count = lights.len().min(MAX_LIGHTS);
    for (slot, light) in block.iter_mut().zip(lights) {
        *slot = light.to_raw();
    }
    (block, count as u32)
}

/// Index of the light that casts shadows: the first directional light.
pub fn dominant_light(lights: &[Light]) -> Option<usize> {
    lights
        .iter()
        .take(MAX_LIGHTS)
        .position(|l| l.kind() == LightKind::Directional)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_light_is_64_bytes() {
        assert_eq!(std::mem::size_of::<LightRaw>(), 64);
        assert_eq!(std::mem::size_of::<[LightRaw; MAX_LIGHTS]>(), 512);
    }

    #[test]
    fn directional_packs_normalized_direction() {
        let raw = Light::directional(Vec3::new(0.0, -2.0, 0.0), Vec3::ONE, 0.5).to_raw();
        assert_eq!(raw.kind, 0);
        assert_eq!(raw.direction, [0.0, -1.0, 0.0]);
        assert_eq!(raw.intensity, 0.5);
    }

    #[test]
    fn zero_direction_does_not_produce_nan() {
        let raw = Light::directional(Vec3::ZERO, Vec3::ONE, 1.0).to_raw();
        assert!(raw.direction.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn spot_outer_never_inside_inner() {
        let spot = Light::Spot {
            position: Vec3::ZERO,
            direction: Vec3::Z,
            range: 10.0,
            color: Vec3::ONE,
            intensity: 1.0,
            inner_angle: 0.5,
            outer_angle: 0.2,
        };
        let raw = spot.to_raw();
        assert_eq!(raw.kind, 2);
        assert_eq!(raw.spot_outer, 0.5);
    }

    #[test]
    fn pack_truncates_to_max() {
        let lights = vec![Light::point(Vec3::ZERO, 5.0, Vec3::ONE, 1.0); 11];
        let (block, count) = pack_lights(&lights);
        assert_eq!(count, MAX_LIGHTS as u32);
        assert!(block.iter().all(|raw| raw.kind == 1));
    }

    #[test]
    fn pack_zeroes_unused_slots() {
        let (block, count) = pack_lights(&[Light::point(Vec3::ONE, 5.0, Vec3::ONE, 2.0)]);
        assert_eq!(count, 1);
        assert_eq!(block[0].position, [1.0, 1.0, 1.0]);
        assert_eq!(block[1], LightRaw::zeroed());
    }

    #[test]
    fn dominant_light_is_first_directional() {
        let lights = [
            Light::point(Vec3::ZERO, 5.0, Vec3::ONE, 1.0),
            Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0),
            Light::directional(Vec3::X, Vec3::ONE, 1.0),
        ];
        assert_eq!(dominant_light(&lights), Some(1));
        assert_eq!(dominant_light(&lights[..1]), None);
    }

    #[test]
    fn accessors_edit_in_place() {
        let mut light = Light::point(Vec3::ZERO, 5.0, Vec3::ONE, 1.0);
        *light.color_mut() = Vec3::X;
        *light.intensity_mut() = 3.0;
        assert!(light.direction_mut().is_none());
        *light.range_mut().unwrap() = 7.0;
        assert_eq!(light.color(), Vec3::X);
        assert_eq!(light.to_raw().range, 7.0);
    }
}
