use crate::context::{SamplerId, TextureId};
use crate::error::BindingError;
use crate::light::{pack_lights, Light};
use crate::shader::{names, IfDeclared, ParameterBlock, ShaderProgram};
use glam::{Vec2, Vec3, Vec4};
use kiln_common::ShaderHandle;
use std::collections::BTreeMap;

/// Shader pair plus the parameters and named resources bound with it.
///
/// Materials live in the resource library and are shared by handle, so an edit (from
/// the inspector, say) is seen by every entity using the material.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    name: String,
    vertex_shader: ShaderHandle,
    pixel_shader: ShaderHandle,
    color_tint: Vec4,
    roughness: f32,
    uv_scale: Vec2,
    uv_offset: Vec2,
    textures: BTreeMap<String, TextureId>,
    samplers: BTreeMap<String, SamplerId>,
}

impl Material {
    pub fn new(
        name: impl Into<String>,
        vertex_shader: ShaderHandle,
        pixel_shader: ShaderHandle,
        color_tint: Vec4,
    ) -> Self {
        Self {
            name: name.into(),
            vertex_shader,
            pixel_shader,
            color_tint,
            roughness: 0.5,
            uv_scale: Vec2::ONE,
            uv_offset: Vec2::ZERO,
            textures: BTreeMap::new(),
            samplers: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vertex_shader(&self) -> ShaderHandle {
        self.vertex_shader
    }

    pub fn pixel_shader(&self) -> ShaderHandle {
        self.pixel_shader
    }

    pub fn color_tint(&self) -> Vec4 {
        self.color_tint
    }

    pub fn set_color_tint(&mut self, tint: Vec4) {
        self.color_tint = tint;
    }

    pub fn roughness(&self) -> f32 {
        self.roughness
    }

    pub fn set_roughness(&mut self, roughness: f32) {
        self.roughness = roughness;
    }

    pub fn uv_scale(&self) -> Vec2 {
        self.uv_scale
    }

    pub fn set_uv_scale(&mut self, scale: Vec2) {
        self.uv_scale = scale;
    }

    pub fn uv_offset(&self) -> Vec2 {
        self.uv_offset
    }

    pub fn set_uv_offset(&mut self, offset: Vec2) {
        self.uv_offset = offset;
    }

    /// Register a texture under the name the pixel program declares. A later call with
    /// the same name replaces the earlier texture.
    pub fn add_texture_srv(&mut self, name: impl Into<String>, texture: TextureId) {
        self.textures.insert(name.into(), texture);
    }

    /// Register a sampler; same replace-by-name rule as textures.
    pub fn add_sampler(&mut self, name: impl Into<String>, sampler: SamplerId) {
        self.samplers.insert(name.into(), sampler);
    }

    pub fn texture(&self, name: &str) -> Option<TextureId> {
        self.textures.get(name).copied()
    }

    pub fn sampler(&self, name: &str) -> Option<SamplerId> {
        self.samplers.get(name).copied()
    }

    pub fn textures(&self) -> impl Iterator<Item = (&str, TextureId)> {
        self.textures.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn samplers(&self) -> impl Iterator<Item = (&str, SamplerId)> {
        self.samplers.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Check every registered resource name against the pixel program.
    pub fn validate(&self, pixel_shader: &ShaderProgram) -> Result<(), BindingError> {
        let mut block = pixel_shader.parameters();
        for (name, texture) in &self.textures {
            block.set_texture(name, *texture)?;
        }
        for (name, sampler) in &self.samplers {
            block.set_sampler(name, *sampler)?;
        }
        drop(block);
        Ok(())
    }

    /// Stage registered textures and samplers plus camera position and roughness.
    ///
    /// Registered names must be declared by the program; the engine scalars are
    /// written only when declared.
    pub fn prepare_material(
        &self,
        ps: &mut ParameterBlock<'_>,
        camera_position: Vec3,
    ) -> Result<(), BindingError> {
        for (name, texture) in &self.textures {
            ps.set_texture(name, *texture)?;
        }
        for (name, sampler) in &self.samplers {
            ps.set_sampler(name, *sampler)?;
        }
        ps.set_float3(names::CAMERA_POSITION, camera_position)
            .if_declared()?;
        ps.set_float(names::ROUGHNESS, self.roughness).if_declared()?;
        Ok(())
    }

    /// Stage the whole light list as one block, with its count, the index of the
    /// shadow-casting light and the scene ambient colour.
    pub fn prepare_lights(
        &self,
        ps: &mut ParameterBlock<'_>,
        lights: &[Light],
        ambient: Vec3,
        shadow_light: Option<usize>,
    ) -> Result<(), BindingError> {
        let (block, count) = pack_lights(lights);
        ps.set_data(names::LIGHTS, bytemuck::bytes_of(&block))
            .if_declared()?;
        ps.set_uint(names::LIGHT_COUNT, count).if_declared()?;
        let shadow_index = shadow_light.map_or(u32::MAX, |i| i as u32);
        ps.set_uint(names::SHADOW_LIGHT_INDEX, shadow_index)
            .if_declared()?;
        ps.set_float3(names::AMBIENT_COLOR, ambient).if_declared()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ShaderStage;
    use crate::headless::HeadlessContext;
    use crate::light::LightRaw;
    use crate::shaders;

    fn lit_ps(gfx: &mut HeadlessContext) -> ShaderProgram {
        ShaderProgram::load(gfx, "lit_ps", shaders::LIT_PS, ShaderStage::Pixel).unwrap()
    }

    fn material() -> Material {
        Material::new("stone", ShaderHandle(1), ShaderHandle(2), Vec4::ONE)
    }

    #[test]
    fn same_name_overwrites_texture() {
        let mut gfx = HeadlessContext::new(16, 16);
        let ps = lit_ps(&mut gfx);
        let mut m = material();
        m.add_texture_srv("albedo", TextureId(10));
        m.add_texture_srv("albedo", TextureId(11));
        assert_eq!(m.textures().count(), 1);
        assert_eq!(m.texture("albedo"), Some(TextureId(11)));

        let mut block = ps.parameters();
        m.prepare_material(&mut block, Vec3::ZERO).unwrap();
        block.commit(&mut gfx).unwrap();

        let binding = ps.layout().resource("albedo").unwrap().binding;
        assert_eq!(
            gfx.bound().textures.get(&(ShaderStage::Pixel, binding)),
            Some(&TextureId(11))
        );
    }

    #[test]
    fn undeclared_texture_name_fails_loudly() {
        let mut gfx = HeadlessContext::new(16, 16);
        let ps = lit_ps(&mut gfx);
        let mut m = material();
        m.add_texture_srv("Albedo", TextureId(1));
        let err = m.validate(&ps).unwrap_err();
        assert_eq!(err.key(), ("lit_ps", "Albedo"));

        let mut block = ps.parameters();
        assert!(m.prepare_material(&mut block, Vec3::ZERO).is_err());
    }

    #[test]
    fn camera_and_roughness_land_in_constants() {
        let mut gfx = HeadlessContext::new(16, 16);
        let ps = lit_ps(&mut gfx);
        let mut m = material();
        m.set_roughness(0.25);

        let mut block = ps.parameters();
        m.prepare_material(&mut block, Vec3::new(1.0, 2.0, 3.0)).unwrap();
        let layout = ps.layout();
        let cam = layout.param(names::CAMERA_POSITION).unwrap().offset as usize;
        let rough = layout.param(names::ROUGHNESS).unwrap().offset as usize;
        let bytes = block.bytes();
        let read = |at: usize| bytemuck::pod_read_unaligned::<f32>(&bytes[at..at + 4]);
        assert_eq!([read(cam), read(cam + 4), read(cam + 8)], [1.0, 2.0, 3.0]);
        assert_eq!(read(rough), 0.25);
    }

    #[test]
    fn lights_upload_as_one_block() {
        let mut gfx = HeadlessContext::new(16, 16);
        let ps = lit_ps(&mut gfx);
        let m = material();
        let lights = [
            Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0),
            Light::point(Vec3::X, 4.0, Vec3::Z, 2.0),
        ];
        let mut block = ps.parameters();
        m.prepare_lights(&mut block, &lights, Vec3::splat(0.1), Some(0))
            .unwrap();

        let layout = ps.layout();
        let bytes = block.bytes();
        let at = |name: &str| layout.param(name).unwrap().offset as usize;
        let count: u32 = bytemuck::pod_read_unaligned(&bytes[at(names::LIGHT_COUNT)..][..4]);
        assert_eq!(count, 2);
        let shadow: u32 =
            bytemuck::pod_read_unaligned(&bytes[at(names::SHADOW_LIGHT_INDEX)..][..4]);
        assert_eq!(shadow, 0);
        let second: LightRaw = bytemuck::pod_read_unaligned(&bytes[at(names::LIGHTS) + 64..][..64]);
        assert_eq!(second.kind, 1);
        assert_eq!(second.range, 4.0);
        assert_eq!(second.color, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn unlit_program_ignores_light_block() {
        let mut gfx = HeadlessContext::new(16, 16);
        let ps = ShaderProgram::load(&mut gfx, "unlit_ps", shaders::UNLIT_PS, ShaderStage::Pixel)
            .unwrap();
        let m = material();
        let mut block = ps.parameters();
        m.prepare_material(&mut block, Vec3::ZERO).unwrap();
        m.prepare_lights(&mut block, &[], Vec3::ZERO, None).unwrap();
    }
}
