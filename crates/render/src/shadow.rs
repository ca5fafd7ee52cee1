use crate::context::{
    DepthTarget, DeviceError, GraphicsContext, RasterizerState, SamplerDesc, SamplerId, TextureId,
    Viewport,
};
use glam::{Mat4, Vec3};
use kiln_common::math::{safe_normalize, up_hint};
use kiln_common::ShaderHandle;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Shadow-map configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowSettings {
    pub enabled: bool,
    /// Square depth-map resolution in texels.
    pub resolution: u32,
    /// How far behind `center` the light eye sits, along the reversed light direction.
    pub distance: f32,
    /// Width and height of the orthographic light frustum.
    pub extent: f32,
    pub near: f32,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_bias_clamp: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            resolution: 1024,
            distance: 20.0,
            extent: 30.0,
            near: 0.1,
            depth_bias: 1000,
            slope_scaled_depth_bias: 1.0,
            depth_bias_clamp: 0.0,
        }
    }
}

impl ShadowSettings {
    pub fn far(&self) -> f32 {
        2.0 * self.distance + self.extent
    }

    /// Biased rasterizer state for the depth pass.
    pub fn rasterizer(&self) -> RasterizerState {
        RasterizerState {
            depth_bias: self.depth_bias,
            slope_scaled_depth_bias: self.slope_scaled_depth_bias,
            depth_bias_clamp: self.depth_bias_clamp,
            ..RasterizerState::default()
        }
    }
}

/// The depth texture and comparison sampler the color pass samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShadowBindings {
    pub texture: TextureId,
    pub sampler: SamplerId,
}

/// Light view and orthographic projection for one light direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightMatrices {
    pub eye: Vec3,
    pub view: Mat4,
    pub projection: Mat4,
}

impl LightMatrices {
    /// Place the eye `settings.distance` behind `center` against `direction`, looking
    /// along it. A vertical direction gets +Z as its up hint; a zero one points down.
    pub fn compute(direction: Vec3, center: Vec3, settings: &ShadowSettings) -> Self {
        let dir = safe_normalize(direction, Vec3::NEG_Y);
        let eye = center - dir * settings.distance;
        let view = Mat4::look_to_lh(eye, dir, up_hint(dir));
        let half = settings.extent * 0.5;
        let projection =
            Mat4::orthographic_lh(-half, half, -half, half, settings.near, settings.far());
        Self {
            eye,
            view,
            projection,
        }
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view
    }
}

/// Depth target, comparison sampler and light matrices for the dominant
/// directional light.
#[derive(Debug, Clone)]
pub struct ShadowMap {
    settings: ShadowSettings,
    target: DepthTarget,
    sampler: SamplerId,
    depth_shader: ShaderHandle,
    center: Vec3,
    light: Option<Vec3>,
    matrices: LightMatrices,
}

impl ShadowMap {
    /// Create the depth target and sampler. `direction` is the dominant light's
    /// direction, if there is one.
    pub fn new(
        gfx: &mut dyn GraphicsContext,
        settings: ShadowSettings,
        depth_shader: ShaderHandle,
        direction: Option<Vec3>,
        center: Vec3,
    ) -> Result<Self, DeviceError> {
        let size = settings.resolution.max(1);
        let target = gfx.create_depth_target("shadow_map", size, size)?;
        let sampler = gfx.create_sampler(&SamplerDesc::shadow_comparison("shadow_sampler"))?;
        let matrices = LightMatrices::compute(direction.unwrap_or(Vec3::NEG_Y), center, &settings);
        debug!(
            resolution = size,
            eye = ?matrices.eye,
            casting = direction.is_some(),
            "shadow map ready"
        );
        Ok(Self {
            settings,
            target,
            sampler,
            depth_shader,
            center,
            light: direction,
            matrices,
        })
    }

    /// Track the dominant light. Matrices are rebuilt only when the direction changes.
    pub fn set_light(&mut self, direction: Option<Vec3>) {
        if direction == self.light {
            return;
        }
        self.light = direction;
        if let Some(dir) = direction {
            self.matrices = LightMatrices::compute(dir, self.center, &self.settings);
            debug!(eye = ?self.matrices.eye, "shadow light moved");
        }
    }

    /// Whether the depth pass draws anything this frame.
    pub fn is_casting(&self) -> bool {
        self.settings.enabled && self.light.is_some()
    }

    pub fn light_view(&self) -> Mat4 {
        self.matrices.view
    }

    pub fn light_projection(&self) -> Mat4 {
        self.matrices.projection
    }

    pub fn matrices(&self) -> &LightMatrices {
        &self.matrices
    }

    pub fn eye(&self) -> Vec3 {
        self.matrices.eye
    }

    pub fn bindings(&self) -> ShadowBindings {
        ShadowBindings {
            texture: self.target.texture,
            sampler: self.sampler,
        }
    }

    pub fn target(&self) -> DepthTarget {
        self.target
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.target.width, self.target.height)
    }

    pub fn depth_shader(&self) -> ShaderHandle {
        self.depth_shader
    }

    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.settings.enabled = enabled;
    }
}
