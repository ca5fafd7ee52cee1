//! Per-frame orchestration: the shadow pass, the color pass and the phase
//! machine that keeps them in order.

use crate::camera::Camera;
use crate::context::{
    DepthState, DepthTargetId, GraphicsContext, RasterizerState, RenderTargetId, ShaderStage,
    Viewport,
};
use crate::entity::{FrameParams, GameEntity};
use crate::error::RenderError;
use crate::library::ResourceLibrary;
use crate::light::MAX_LIGHTS;
use crate::shadow::ShadowMap;
use crate::sky::Sky;
use glam::Vec4;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::warn;

/// Where the frame renderer is between `shadow_pass`, `color_pass` and `end_frame`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RenderPhase {
    Idle,
    ShadowPass,
    ColorPass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Abort the frame on the first binding mismatch instead of skipping the draw.
    pub strict_bindings: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            strict_bindings: cfg!(debug_assertions),
        }
    }
}

/// What one frame submitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub shadow_draws: u32,
    pub color_draws: u32,
    pub sky_drawn: bool,
    pub skipped_draws: u32,
    pub triangles: u64,
    pub camera_position: [f32; 3],
}

/// The window's back buffer, main depth buffer and full-size viewport.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MainTargets {
    pub viewport: Viewport,
}

impl MainTargets {
    pub fn for_size(width: u32, height: u32) -> Self {
        Self {
            viewport: Viewport::full(width, height),
        }
    }

    /// Bind the main targets with default rasterizer and depth state.
    pub fn bind(&self, gfx: &mut dyn GraphicsContext) {
        gfx.set_render_targets(Some(RenderTargetId::BACK_BUFFER), Some(DepthTargetId::MAIN));
        gfx.set_viewport(self.viewport);
        gfx.set_rasterizer_state(RasterizerState::default());
        gfx.set_depth_state(DepthState::default());
    }
}

/// Binds the shadow depth target for the lifetime of the guard. Dropping it,
/// early returns included, rebinds the main targets.
pub struct ShadowPassGuard<'a> {
    gfx: &'a mut dyn GraphicsContext,
    main: MainTargets,
}

impl<'a> ShadowPassGuard<'a> {
    /// Depth-only target, cleared to far depth, shadow viewport and biased rasterizer.
    /// The pixel stage is unbound.
    pub fn begin(gfx: &'a mut dyn GraphicsContext, main: MainTargets, shadow: &ShadowMap) -> Self {
        let target = shadow.target();
        gfx.set_render_targets(None, Some(target.id));
        gfx.clear_depth(target.id, 1.0);
        gfx.set_viewport(shadow.viewport());
        gfx.set_rasterizer_state(shadow.settings().rasterizer());
        gfx.set_shader(ShaderStage::Pixel, None);
        Self { gfx, main }
    }

    pub fn gfx(&mut self) -> &mut dyn GraphicsContext {
        &mut *self.gfx
    }
}

impl Drop for ShadowPassGuard<'_> {
    fn drop(&mut self) {
        self.main.bind(&mut *self.gfx);
    }
}

/// Runs Idle -> ShadowPass -> ColorPass -> Idle once per frame.
///
/// Calling a pass out of order is a [`RenderError::PhaseOrder`]; any error puts
/// the renderer back in `Idle` so the next frame starts clean.
#[derive(Debug)]
pub struct FrameRenderer {
    phase: RenderPhase,
    main: MainTargets,
    options: RenderOptions,
    reported: BTreeSet<(String, String, String)>,
    warned_light_overflow: bool,
    report: FrameReport,
    frame: u64,
}

impl FrameRenderer {
    pub fn new(width: u32, height: u32, options: RenderOptions) -> Self {
        Self {
            phase: RenderPhase::Idle,
            main: MainTargets::for_size(width, height),
            options,
            reported: BTreeSet::new(),
            warned_light_overflow: false,
            report: FrameReport::default(),
            frame: 0,
        }
    }

    pub fn phase(&self) -> RenderPhase {
        self.phase
    }

    pub fn options(&self) -> RenderOptions {
        self.options
    }

    pub fn main_targets(&self) -> MainTargets {
        self.main
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.main = MainTargets::for_size(width, height);
    }

    /// Number of distinct binding mismatches logged so far.
    pub fn reported_mismatches(&self) -> usize {
        self.reported.len()
    }

    fn expect(&mut self, expected: RenderPhase) -> Result<(), RenderError> {
        if self.phase == expected {
            Ok(())
        } else {
            let found = self.phase;
            self.phase = RenderPhase::Idle;
            Err(RenderError::PhaseOrder { expected, found })
        }
    }

    fn fail(&mut self, err: RenderError) -> RenderError {
        self.phase = RenderPhase::Idle;
        err
    }

    /// Lenient mode swallows binding mismatches: the draw is skipped, counted and
    /// logged once per (owner, shader, parameter).
    fn absorb(&mut self, err: RenderError) -> Result<(), RenderError> {
        match err {
            RenderError::Binding { owner, source } if !self.options.strict_bindings => {
                let (shader, name) = source.key();
                let key = (owner, shader.to_string(), name.to_string());
                if !self.reported.contains(&key) {
                    warn!(
                        owner = %key.0,
                        shader = %key.1,
                        parameter = %key.2,
                        error = %source,
                        "binding mismatch, draw skipped"
                    );
                    self.reported.insert(key);
                }
                self.report.skipped_draws += 1;
                Ok(())
            }
            other => Err(self.fail(other)),
        }
    }

    /// Render every entity's depth from the light. With no shadow map nothing
    /// happens; with a map that is not casting the map is only cleared.
    pub fn shadow_pass(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        library: &ResourceLibrary,
        shadow: Option<&ShadowMap>,
        entities: &mut [GameEntity],
    ) -> Result<(), RenderError> {
        self.expect(RenderPhase::Idle)?;
        self.report = FrameReport {
            frame: self.frame,
            ..FrameReport::default()
        };

        if let Some(shadow) = shadow {
            let program = if shadow.is_casting() {
                Some(
                    library
                        .shader(shadow.depth_shader())
                        .map_err(|e| self.fail(e))?,
                )
            } else {
                None
            };
            let mut guard = ShadowPassGuard::begin(gfx, self.main, shadow);
            if let Some(program) = program {
                let light_vp = shadow.matrices().view_projection();
                for entity in entities.iter_mut() {
                    match entity.draw_depth(guard.gfx(), library, program, light_vp) {
                        Ok(triangles) => {
                            self.report.shadow_draws += 1;
                            self.report.triangles += u64::from(triangles);
                        }
                        Err(err) => self.absorb(err)?,
                    }
                }
            }
        }

        self.phase = RenderPhase::ShadowPass;
        Ok(())
    }

    /// Clear the main targets, draw every entity with `frame`, then the sky.
    #[allow(clippy::too_many_arguments)]
    pub fn color_pass(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        library: &ResourceLibrary,
        entities: &mut [GameEntity],
        frame: &FrameParams<'_>,
        sky: Option<&Sky>,
        camera: &Camera,
        background: Vec4,
    ) -> Result<(), RenderError> {
        self.expect(RenderPhase::ShadowPass)?;

        if frame.lights.len() > MAX_LIGHTS && !self.warned_light_overflow {
            warn!(
                lights = frame.lights.len(),
                max = MAX_LIGHTS,
                "light list truncated"
            );
            self.warned_light_overflow = true;
        }

        self.main.bind(gfx);
        gfx.clear_render_target(RenderTargetId::BACK_BUFFER, background.to_array());
        gfx.clear_depth(DepthTargetId::MAIN, 1.0);

        for entity in entities.iter_mut() {
            match entity.draw(gfx, library, frame) {
                Ok(triangles) => {
                    self.report.color_draws += 1;
                    self.report.triangles += u64::from(triangles);
                }
                Err(err) => self.absorb(err)?,
            }
        }

        if let Some(sky) = sky {
            match sky.draw(gfx, library, camera) {
                Ok(triangles) => {
                    self.report.sky_drawn = true;
                    self.report.triangles += u64::from(triangles);
                }
                Err(err) => self.absorb(err)?,
            }
        }

        self.report.camera_position = camera.position().to_array();
        self.phase = RenderPhase::ColorPass;
        Ok(())
    }

    /// Close the frame and hand back its report.
    pub fn end_frame(&mut self) -> Result<FrameReport, RenderError> {
        self.expect(RenderPhase::ColorPass)?;
        self.phase = RenderPhase::Idle;
        self.frame += 1;
        Ok(std::mem::take(&mut self.report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{SamplerDesc, TextureId};
    use crate::headless::HeadlessContext;
    use crate::light::Light;
    use crate::material::Material;
    use crate::mesh::{Mesh, MeshData};
    use crate::shader::ShaderProgram;
    use crate::shadow::ShadowSettings;
    use crate::shaders;
    use crate::texture::{CubeFaces, TextureData};
    use glam::Vec3;
    use kiln_common::Transform;

    const WIDTH: u32 = 640;
    const HEIGHT: u32 = 360;

    struct Scene {
        gfx: HeadlessContext,
        library: ResourceLibrary,
        entities: Vec<GameEntity>,
        shadow: ShadowMap,
        sky: Sky,
        camera: Camera,
        lights: Vec<Light>,
    }

    fn scene() -> Scene {
        let mut gfx = HeadlessContext::new(WIDTH, HEIGHT);
        let mut library = ResourceLibrary::new();
        let mut load = |gfx: &mut HeadlessContext, name: &str, source: &str, stage: ShaderStage| {
            library.add_shader(ShaderProgram::load(gfx, name, source, stage).unwrap())
        };
        let lit_vs = load(&mut gfx, "lit_vs", shaders::LIT_VS, ShaderStage::Vertex);
        let lit_ps = load(&mut gfx, "lit_ps", shaders::LIT_PS, ShaderStage::Pixel);
        let shadow_vs = load(&mut gfx, "shadow_vs", shaders::SHADOW_VS, ShaderStage::Vertex);
        let sky_vs = load(&mut gfx, "sky_vs", shaders::SKY_VS, ShaderStage::Vertex);
        let sky_ps = load(&mut gfx, "sky_ps", shaders::SKY_PS, ShaderStage::Pixel);

        let sampler = gfx.create_sampler(&SamplerDesc::linear_wrap("basic")).unwrap();
        let white = gfx.create_texture("white", &TextureData::solid([255; 4])).unwrap();
        let mut material = Material::new("stone", lit_vs, lit_ps, Vec4::ONE);
        material.add_texture_srv("albedo", white);
        material.add_sampler("basic_sampler", sampler);
        let material = library.add_material(material);

        let cube = library.add_mesh(Mesh::upload(&mut gfx, "cube", &MeshData::cube(1.0)).unwrap());
        let floor = library.add_mesh(Mesh::upload(&mut gfx, "floor", &MeshData::plane(10.0, 2)).unwrap());
        let mut below = Transform::new();
        below.set_position(Vec3::new(0.0, -1.0, 0.0));
        let entities = vec![
            GameEntity::new("box", cube, material),
            GameEntity::new("floor", floor, material).with_transform(below),
        ];

        let lights = vec![Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0)];
        let shadow = ShadowMap::new(
            &mut gfx,
            ShadowSettings::default(),
            shadow_vs,
            Some(Vec3::NEG_Y),
            Vec3::ZERO,
        )
        .unwrap();
        let faces = CubeFaces::gradient(2, Vec3::Z, Vec3::Y, Vec3::X);
        let sky = Sky::create(&mut gfx, cube, &faces, sampler, sky_vs, sky_ps).unwrap();
        let camera = Camera::new(
            Vec3::new(0.0, 0.0, -10.0),
            5.0,
            0.002,
            1.0,
            WIDTH as f32 / HEIGHT as f32,
        );
        Scene {
            gfx,
            library,
            entities,
            shadow,
            sky,
            camera,
            lights,
        }
    }

    fn render(renderer: &mut FrameRenderer, s: &mut Scene) -> Result<FrameReport, RenderError> {
        renderer.shadow_pass(&mut s.gfx, &s.library, Some(&s.shadow), &mut s.entities)?;
        let frame = FrameParams::from_camera(&s.camera, 0.0)
            .with_lights(&s.lights, Vec3::splat(0.1))
            .with_shadow(&s.shadow);
        renderer.color_pass(
            &mut s.gfx,
            &s.library,
            &mut s.entities,
            &frame,
            Some(&s.sky),
            &s.camera,
            Vec4::new(0.1, 0.2, 0.3, 1.0),
        )?;
        renderer.end_frame()
    }

    fn strict() -> RenderOptions {
        RenderOptions {
            strict_bindings: true,
        }
    }

    fn assert_main_bound(gfx: &HeadlessContext) {
        let bound = gfx.bound();
        assert_eq!(bound.viewport.size(), (WIDTH, HEIGHT));
        assert_eq!(bound.color_target, Some(RenderTargetId::BACK_BUFFER));
        assert_eq!(bound.depth_target, Some(DepthTargetId::MAIN));
        assert_eq!(bound.rasterizer, RasterizerState::default());
    }

    #[test]
    fn shadow_pass_alone_restores_main_targets() {
        let mut s = scene();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        renderer
            .shadow_pass(&mut s.gfx, &s.library, Some(&s.shadow), &mut s.entities)
            .unwrap();
        assert_eq!(renderer.phase(), RenderPhase::ShadowPass);
        assert_eq!(s.gfx.draws().len(), 2);
        assert_main_bound(&s.gfx);
    }

    #[test]
    fn full_frame_restores_main_targets() {
        let mut s = scene();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        let report = render(&mut renderer, &mut s).unwrap();

        assert_eq!(report.shadow_draws, 2);
        assert_eq!(report.color_draws, 2);
        assert!(report.sky_drawn);
        assert_eq!(renderer.phase(), RenderPhase::Idle);
        // checked before present, which rebinds the back buffer itself
        assert_main_bound(&s.gfx);
        s.gfx.present().unwrap();
    }

    #[test]
    fn passes_see_their_own_state() {
        let mut s = scene();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        render(&mut renderer, &mut s).unwrap();

        let draws = s.gfx.draws();
        assert_eq!(draws.len(), 5);
        for shadow_draw in &draws[..2] {
            assert_eq!(shadow_draw.state.viewport.size(), (1024, 1024));
            assert_eq!(shadow_draw.state.color_target, None);
            assert_eq!(shadow_draw.state.depth_target, Some(s.shadow.target().id));
            assert_eq!(shadow_draw.state.pixel_shader, None);
            assert_eq!(shadow_draw.state.rasterizer.depth_bias, 1000);
        }
        for color_draw in &draws[2..] {
            assert_eq!(color_draw.state.viewport.size(), (WIDTH, HEIGHT));
            assert_eq!(color_draw.state.depth_target, Some(DepthTargetId::MAIN));
        }
        // the color pass samples the depth map it just rendered
        let shadow_texture = s.shadow.bindings().texture;
        assert_eq!(
            draws[2].state.textures.get(&(ShaderStage::Pixel, 3)),
            Some(&shadow_texture)
        );
    }

    #[test]
    fn clears_use_background_and_far_depth() {
        let mut s = scene();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        render(&mut renderer, &mut s).unwrap();
        let clears = s.gfx.clears();
        assert!(clears.iter().any(|c| c.color == Some([0.1, 0.2, 0.3, 1.0])));
        assert!(clears
            .iter()
            .any(|c| c.depth_target == Some(s.shadow.target().id) && c.depth == Some(1.0)));
    }

    #[test]
    fn out_of_order_calls_are_rejected() {
        let mut s = scene();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        assert!(matches!(
            renderer.end_frame(),
            Err(RenderError::PhaseOrder {
                expected: RenderPhase::ColorPass,
                found: RenderPhase::Idle
            })
        ));

        renderer
            .shadow_pass(&mut s.gfx, &s.library, None, &mut s.entities)
            .unwrap();
        let err = renderer
            .shadow_pass(&mut s.gfx, &s.library, None, &mut s.entities)
            .unwrap_err();
        assert!(matches!(err, RenderError::PhaseOrder { .. }));
        assert_eq!(renderer.phase(), RenderPhase::Idle);

        // a clean frame still works afterwards
        render(&mut renderer, &mut s).unwrap();
    }

    #[test]
    fn lenient_mode_skips_and_counts_mismatches() {
        let mut s = scene();
        let handle = s.entities[0].material();
        s.library
            .material_mut(handle)
            .unwrap()
            .add_texture_srv("Albedo", TextureId(0));
        let mut renderer = FrameRenderer::new(
            WIDTH,
            HEIGHT,
            RenderOptions {
                strict_bindings: false,
            },
        );
        let first = render(&mut renderer, &mut s).unwrap();
        let second = render(&mut renderer, &mut s).unwrap();

        assert_eq!(first.skipped_draws, 2);
        assert_eq!(first.color_draws, 0);
        assert_eq!(first.shadow_draws, 2);
        assert_eq!(second.skipped_draws, 2);
        assert_eq!(second.frame, 1);
        assert_eq!(renderer.reported_mismatches(), 1);
    }

    #[test]
    fn strict_mode_aborts_and_resets() {
        let mut s = scene();
        let handle = s.entities[0].material();
        s.library
            .material_mut(handle)
            .unwrap()
            .add_texture_srv("Albedo", TextureId(0));
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        assert!(matches!(
            render(&mut renderer, &mut s),
            Err(RenderError::Binding { .. })
        ));
        assert_eq!(renderer.phase(), RenderPhase::Idle);
    }

    #[test]
    fn failed_shadow_pass_still_restores_targets() {
        let mut s = scene();
        // a depth program without world_view_projection
        let lit_vs = s.library.find_shader("lit_vs").unwrap();
        let settings = ShadowSettings::default();
        s.shadow = ShadowMap::new(&mut s.gfx, settings, lit_vs, Some(Vec3::NEG_Y), Vec3::ZERO)
            .unwrap();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        assert!(render(&mut renderer, &mut s).is_err());
        assert_eq!(s.gfx.bound().viewport.size(), (WIDTH, HEIGHT));
        assert_eq!(s.gfx.bound().depth_target, Some(DepthTargetId::MAIN));
    }

    #[test]
    fn no_caster_only_clears_the_map() {
        let mut s = scene();
        s.shadow.set_light(None);
        s.lights.clear();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        let report = render(&mut renderer, &mut s).unwrap();
        assert_eq!(report.shadow_draws, 0);
        assert_eq!(report.color_draws, 2);
        assert!(s
            .gfx
            .clears()
            .iter()
            .any(|c| c.depth_target == Some(s.shadow.target().id)));
    }

    #[test]
    fn resize_changes_color_viewport() {
        let mut s = scene();
        let mut renderer = FrameRenderer::new(WIDTH, HEIGHT, strict());
        s.gfx.resize(800, 600).unwrap();
        renderer.resize(800, 600);
        render(&mut renderer, &mut s).unwrap();
        assert_eq!(s.gfx.draws()[2].state.viewport.size(), (800, 600));
    }

    #[test]
    fn report_serializes() {
        let report = FrameReport {
            frame: 3,
            triangles: 12,
            ..FrameReport::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"frame\":3"));
    }
}
