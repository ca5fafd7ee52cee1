use crate::build::SceneBuilder;
use crate::error::SceneError;
use glam::{Vec3, Vec4};
use kiln_assets::Manifest;
use kiln_common::EntityId;
use kiln_input::InputState;
use kiln_render::light::dominant_light;
use kiln_render::{
    Camera, FrameParams, FrameRenderer, FrameReport, GameEntity, GraphicsContext, Light,
    RenderError, RenderOptions, ResourceLibrary, ShadowMap, Sky,
};
use std::collections::BTreeMap;
use tracing::debug;

/// The running scene.
///
/// Owns every resource, entity, light and camera, and sequences each frame as
/// update, shadow pass, color pass (sky last), overlay, present.
#[derive(Debug)]
pub struct Game {
    pub(crate) name: String,
    pub(crate) library: ResourceLibrary,
    pub(crate) entities: Vec<GameEntity>,
    /// Radians per second about each local axis (pitch, yaw, roll).
    pub(crate) spins: BTreeMap<EntityId, Vec3>,
    pub(crate) lights: Vec<Light>,
    pub(crate) cameras: Vec<Camera>,
    pub(crate) active_camera: Option<usize>,
    pub(crate) sky: Option<Sky>,
    pub(crate) shadow: ShadowMap,
    pub(crate) ambient: Vec3,
    pub(crate) background: Vec4,
    pub(crate) renderer: FrameRenderer,
    pub(crate) time: f32,
    pub(crate) frame_time: f32,
    pub(crate) last_report: Option<FrameReport>,
}

impl Game {
    /// Create every resource `manifest` declares through `gfx`.
    pub fn build(
        gfx: &mut dyn GraphicsContext,
        manifest: &Manifest,
        options: RenderOptions,
    ) -> Result<Self, SceneError> {
        SceneBuilder::new(manifest, options).build(gfx)
    }

    /// Add an entity. Names are unique within a scene.
    pub fn add_entity(&mut self, entity: GameEntity, spin: Vec3) -> Result<EntityId, SceneError> {
        if self.entities.iter().any(|e| e.name() == entity.name()) {
            return Err(SceneError::DuplicateName {
                kind: "entity",
                name: entity.name().to_string(),
            });
        }
        let id = entity.id();
        if spin != Vec3::ZERO {
            self.spins.insert(id, spin);
        }
        self.entities.push(entity);
        Ok(id)
    }

    /// Move the active camera from `input` and advance spinning entities.
    pub fn update(&mut self, dt: f32, input: &InputState) {
        self.frame_time = dt;
        if let Some(camera) = self.camera_mut() {
            camera.update(dt, input);
        }
        for entity in &mut self.entities {
            if let Some(spin) = self.spins.get(&entity.id()) {
                let step = *spin * dt;
                entity.transform_mut().rotate(step.x, step.y, step.z);
            }
        }
    }

    /// Shadow pass then color pass. Does not present.
    pub fn render(&mut self, gfx: &mut dyn GraphicsContext) -> Result<FrameReport, SceneError> {
        let index = self.active_camera.ok_or(RenderError::NoActiveCamera)?;

        let direction = dominant_light(&self.lights).and_then(|i| self.lights[i].direction());
        self.shadow.set_light(direction);

        self.renderer
            .shadow_pass(gfx, &self.library, Some(&self.shadow), &mut self.entities)?;

        let camera = &self.cameras[index];
        let params = FrameParams::from_camera(camera, self.time)
            .with_lights(&self.lights, self.ambient)
            .with_shadow(&self.shadow);
        self.renderer.color_pass(
            gfx,
            &self.library,
            &mut self.entities,
            &params,
            self.sky.as_ref(),
            camera,
            self.background,
        )?;

        let report = self.renderer.end_frame()?;
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// One full frame: update, render, `overlay`, present. `total` is the time
    /// since start in seconds and feeds the `time` shader parameter.
    pub fn frame<G, F>(
        &mut self,
        gfx: &mut G,
        input: &InputState,
        dt: f32,
        total: f32,
        overlay: F,
    ) -> Result<FrameReport, SceneError>
    where
        G: GraphicsContext,
        F: FnOnce(&mut Self, &mut G),
    {
        self.time = total;
        self.update(dt, input);
        let report = self.render(gfx)?;
        overlay(self, gfx);
        gfx.present()?;
        Ok(report)
    }

    /// Resize the surface and the active camera's projection. Zero-sized
    /// (minimised) windows are ignored; without a camera only the surface changes.
    pub fn on_resize(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        width: u32,
        height: u32,
    ) -> Result<(), SceneError> {
        if width == 0 || height == 0 {
            debug!(width, height, "ignoring zero-sized resize");
            return Ok(());
        }
        gfx.resize(width, height)?;
        self.renderer.resize(width, height);
        if let Some(camera) = self.camera_mut() {
            camera.update_projection_matrix(width as f32 / height as f32);
        }
        debug!(width, height, "resized");
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn library(&self) -> &ResourceLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut ResourceLibrary {
        &mut self.library
    }

    pub fn entities(&self) -> &[GameEntity] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut [GameEntity] {
        &mut self.entities
    }

    pub fn entity(&self, name: &str) -> Option<&GameEntity> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn spin(&self, id: EntityId) -> Vec3 {
        self.spins.get(&id).copied().unwrap_or(Vec3::ZERO)
    }

    pub fn lights(&self) -> &[Light] {
        &self.lights
    }

    pub fn lights_mut(&mut self) -> &mut Vec<Light> {
        &mut self.lights
    }

    pub fn cameras(&self) -> &[Camera] {
        &self.cameras
    }

    /// The camera frames are rendered from, if the scene has one.
    pub fn camera(&self) -> Option<&Camera> {
        self.active_camera.and_then(|i| self.cameras.get(i))
    }

    pub fn camera_mut(&mut self) -> Option<&mut Camera> {
        self.active_camera.and_then(|i| self.cameras.get_mut(i))
    }

    /// Switch cameras. Returns false if `index` is out of range.
    pub fn set_active_camera(&mut self, index: usize) -> bool {
        if index < self.cameras.len() {
            self.active_camera = Some(index);
            true
        } else {
            false
        }
    }

    pub fn active_camera(&self) -> Option<usize> {
        self.active_camera
    }

    pub fn sky(&self) -> Option<&Sky> {
        self.sky.as_ref()
    }

    pub fn shadow(&self) -> &ShadowMap {
        &self.shadow
    }

    pub fn shadow_mut(&mut self) -> &mut ShadowMap {
        &mut self.shadow
    }

    pub fn ambient(&self) -> Vec3 {
        self.ambient
    }

    pub fn set_ambient(&mut self, ambient: Vec3) {
        self.ambient = ambient;
    }

    /// Back-buffer clear colour.
    pub fn background(&self) -> Vec4 {
        self.background
    }

    pub fn set_background(&mut self, background: Vec4) {
        self.background = background;
    }

    pub fn renderer(&self) -> &FrameRenderer {
        &self.renderer
    }

    /// Seconds the last update covered.
    pub fn frame_time(&self) -> f32 {
        self.frame_time
    }

    pub fn fps(&self) -> f32 {
        if self.frame_time > 0.0 {
            1.0 / self.frame_time
        } else {
            0.0
        }
    }

    pub fn last_report(&self) -> Option<&FrameReport> {
        self.last_report.as_ref()
    }
}
