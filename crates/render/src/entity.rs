use crate::camera::Camera;
use crate::context::{GraphicsContext, ShaderStage};
use crate::error::{BindingError, RenderError};
use crate::library::ResourceLibrary;
use crate::light::{dominant_light, Light};
use crate::material::Material;
use crate::shader::{names, IfDeclared, ParameterBlock, ShaderProgram};
use crate::shadow::{ShadowBindings, ShadowMap};
use glam::{Mat4, Vec3};
use kiln_common::{EntityId, MaterialHandle, MeshHandle, Transform};

/// Everything a draw needs that is not owned by the entity: camera and light
/// matrices, elapsed time, the light list and the shadow resources.
#[derive(Debug, Clone, Copy)]
pub struct FrameParams<'a> {
    pub view: Mat4,
    pub projection: Mat4,
    pub camera_position: Vec3,
    pub light_view: Mat4,
    pub light_projection: Mat4,
    pub time: f32,
    pub lights: &'a [Light],
    pub ambient: Vec3,
    pub shadow_light: Option<usize>,
    pub shadow: Option<ShadowBindings>,
}

impl<'a> FrameParams<'a> {
    pub fn from_camera(camera: &Camera, time: f32) -> Self {
        Self {
            view: camera.view(),
            projection: camera.projection(),
            camera_position: camera.position(),
            light_view: Mat4::IDENTITY,
            light_projection: Mat4::IDENTITY,
            time,
            lights: &[],
            ambient: Vec3::ZERO,
            shadow_light: None,
            shadow: None,
        }
    }

    pub fn with_lights(mut self, lights: &'a [Light], ambient: Vec3) -> Self {
        self.lights = lights;
        self.ambient = ambient;
        self.shadow_light = dominant_light(lights);
        self
    }

    /// Light matrices and depth texture from `shadow`. The texture is bound even
    /// when nothing casts, so programs always see a cleared map.
    pub fn with_shadow(mut self, shadow: &ShadowMap) -> Self {
        self.light_view = shadow.light_view();
        self.light_projection = shadow.light_projection();
        self.shadow = Some(shadow.bindings());
        if !shadow.is_casting() {
            self.shadow_light = None;
        }
        self
    }
}

/// One drawable object: a shared mesh and material plus its own transform.
#[derive(Debug, Clone)]
pub struct GameEntity {
    id: EntityId,
    name: String,
    mesh: MeshHandle,
    material: MaterialHandle,
    transform: Transform,
}

impl GameEntity {
    pub fn new(name: impl Into<String>, mesh: MeshHandle, material: MaterialHandle) -> Self {
        Self {
            id: EntityId::new(),
            name: name.into(),
            mesh,
            material,
            transform: Transform::new(),
        }
    }

    pub fn with_transform(mut self, transform: Transform) -> Self {
        self.transform = transform;
        self
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh
    }

    pub fn material(&self) -> MaterialHandle {
        self.material
    }

    pub fn set_material(&mut self, material: MaterialHandle) {
        self.material = material;
    }

    pub fn transform(&self) -> &Transform {
        &self.transform
    }

    pub fn transform_mut(&mut self) -> &mut Transform {
        &mut self.transform
    }

    /// Stage every parameter for both stages, then bind, commit and draw.
    ///
    /// Nothing reaches the device unless staging succeeded, so a binding error
    /// leaves the bound state untouched. Returns the triangle count submitted.
    pub fn draw(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        library: &ResourceLibrary,
        frame: &FrameParams<'_>,
    ) -> Result<u32, RenderError> {
        let material = library.material(self.material)?;
        let vs = library.shader(material.vertex_shader())?;
        let ps = library.shader(material.pixel_shader())?;
        let mesh = library.mesh(self.mesh)?;

        let world = self.transform.world_matrix();
        let world_inverse_transpose = self.transform.inverse_transpose_matrix();

        let binding = |source: BindingError| RenderError::Binding {
            owner: material.name().to_string(),
            source,
        };

        vs.expect_stage(ShaderStage::Vertex).map_err(binding)?;
        ps.expect_stage(ShaderStage::Pixel).map_err(binding)?;

        let vblock = stage_vertex(vs, world, world_inverse_transpose, frame).map_err(binding)?;
        let pblock = stage_pixel(ps, material, frame).map_err(binding)?;

        vs.bind(gfx);
        ps.bind(gfx);
        vblock.commit(gfx)?;
        pblock.commit(gfx)?;
        mesh.draw(gfx)?;
        Ok(mesh.triangle_count())
    }

    /// Depth-only draw with `program`, which takes `world_view_projection`.
    pub fn draw_depth(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        library: &ResourceLibrary,
        program: &ShaderProgram,
        light_view_projection: Mat4,
    ) -> Result<u32, RenderError> {
        let mesh = library.mesh(self.mesh)?;
        let wvp = light_view_projection * self.transform.world_matrix();

        let mut block = program.parameters();
        block
            .set_matrix4x4(names::WORLD_VIEW_PROJECTION, &wvp)
            .map_err(|source| RenderError::Binding {
                owner: self.name.clone(),
                source,
            })?;

        program.bind(gfx);
        block.commit(gfx)?;
        mesh.draw(gfx)?;
        Ok(mesh.triangle_count())
    }
}

fn stage_vertex<'p>(
    vs: &'p ShaderProgram,
    world: Mat4,
    world_inverse_transpose: Mat4,
    frame: &FrameParams<'_>,
) -> Result<ParameterBlock<'p>, BindingError> {
    let mut block = vs.parameters();
    block.set_matrix4x4(names::WORLD, &world).if_declared()?;
    block.set_matrix4x4(names::VIEW, &frame.view).if_declared()?;
    block
        .set_matrix4x4(names::PROJECTION, &frame.projection)
        .if_declared()?;
    block
        .set_matrix4x4(names::WORLD_INVERSE_TRANSPOSE, &world_inverse_transpose)
        .if_declared()?;
    block
        .set_matrix4x4(names::LIGHT_VIEW, &frame.light_view)
        .if_declared()?;
    block
        .set_matrix4x4(names::LIGHT_PROJECTION, &frame.light_projection)
        .if_declared()?;
    Ok(block)
}

fn stage_pixel<'p>(
    ps: &'p ShaderProgram,
    material: &Material,
    frame: &FrameParams<'_>,
) -> Result<ParameterBlock<'p>, BindingError> {
    let mut block = ps.parameters();
    block
        .set_float4(names::COLOR_TINT, material.color_tint())
        .if_declared()?;
    block
        .set_float2(names::UV_SCALE, material.uv_scale())
        .if_declared()?;
    block
        .set_float2(names::UV_OFFSET, material.uv_offset())
        .if_declared()?;
    block.set_float(names::TIME, frame.time).if_declared()?;
    material.prepare_material(&mut block, frame.camera_position)?;
    material.prepare_lights(&mut block, frame.lights, frame.ambient, frame.shadow_light)?;
    if let Some(shadow) = frame.shadow {
        block
            .set_texture(names::SHADOW_MAP, shadow.texture)
            .if_declared()?;
        block
            .set_sampler(names::SHADOW_SAMPLER, shadow.sampler)
            .if_declared()?;
    }
    Ok(block)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{DepthTargetId, RenderTargetId, SamplerId, TextureId};
    use crate::headless::{read_mat4, HeadlessContext};
    use crate::mesh::{Mesh, MeshData};
    use crate::shaders;
    use glam::Vec4;

    struct Fixture {
        gfx: HeadlessContext,
        library: ResourceLibrary,
        entity: GameEntity,
        camera: Camera,
    }

    fn fixture() -> Fixture {
        let mut gfx = HeadlessContext::new(320, 240);
        let mut library = ResourceLibrary::new();
        let vs = ShaderProgram::load(&mut gfx, "lit_vs", shaders::LIT_VS, ShaderStage::Vertex)
            .unwrap();
        let ps = ShaderProgram::load(&mut gfx, "lit_ps", shaders::LIT_PS, ShaderStage::Pixel)
            .unwrap();
        let vs = library.add_shader(vs);
        let ps = library.add_shader(ps);
        let mut material = Material::new("stone", vs, ps, Vec4::new(1.0, 0.5, 0.25, 1.0));
        material.add_texture_srv("albedo", TextureId(4));
        material.add_sampler("basic_sampler", SamplerId(2));
        let material = library.add_material(material);
        let mesh = library.add_mesh(Mesh::upload(&mut gfx, "cube", &MeshData::cube(1.0)).unwrap());

        let mut transform = Transform::new();
        transform.set_position(Vec3::new(1.0, 2.0, 3.0));
        let entity = GameEntity::new("crate", mesh, material).with_transform(transform);
        let camera = Camera::new(Vec3::new(0.0, 0.0, -10.0), 5.0, 0.002, 1.0, 4.0 / 3.0);
        Fixture {
            gfx,
            library,
            entity,
            camera,
        }
    }

    #[test]
    fn draw_uploads_matrices_then_draws() {
        let Fixture {
            mut gfx,
            library,
            mut entity,
            camera,
        } = fixture();
        let frame = FrameParams::from_camera(&camera, 2.5);
        let tris = entity.draw(&mut gfx, &library, &frame).unwrap();
        assert_eq!(tris, 12);

        let draw = &gfx.draws()[0];
        assert_eq!(draw.index_count, 36);
        let vs = library.shader(library.material(entity.material()).unwrap().vertex_shader()).unwrap();
        let at = |name: &str| vs.layout().param(name).unwrap().offset as usize;
        assert_eq!(
            read_mat4(&draw.vs_constants, at(names::WORLD)),
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0))
        );
        assert_eq!(read_mat4(&draw.vs_constants, at(names::VIEW)), camera.view());
        assert_eq!(
            read_mat4(&draw.vs_constants, at(names::PROJECTION)),
            camera.projection()
        );
    }

    #[test]
    fn draw_stages_pixel_parameters_and_resources() {
        let Fixture {
            mut gfx,
            library,
            mut entity,
            camera,
        } = fixture();
        let lights = [Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0)];
        let frame = FrameParams::from_camera(&camera, 2.5).with_lights(&lights, Vec3::splat(0.1));
        entity.draw(&mut gfx, &library, &frame).unwrap();

        let draw = &gfx.draws()[0];
        let ps = library.shader(library.material(entity.material()).unwrap().pixel_shader()).unwrap();
        let at = |name: &str| ps.layout().param(name).unwrap().offset as usize;
        let read = |at: usize| bytemuck::pod_read_unaligned::<f32>(&draw.ps_constants[at..at + 4]);
        assert_eq!(read(at(names::COLOR_TINT) + 4), 0.5);
        assert_eq!(read(at(names::TIME)), 2.5);
        assert_eq!(read(at(names::CAMERA_POSITION) + 8), -10.0);
        assert_eq!(
            draw.state.textures.get(&(ShaderStage::Pixel, 1)),
            Some(&TextureId(4))
        );
        assert_eq!(
            draw.state.samplers.get(&(ShaderStage::Pixel, 2)),
            Some(&SamplerId(2))
        );
    }

    #[test]
    fn binding_error_leaves_device_untouched() {
        let Fixture {
            mut gfx,
            mut library,
            mut entity,
            camera,
        } = fixture();
        library
            .material_mut(entity.material())
            .unwrap()
            .add_texture_srv("Albedo", TextureId(9));
        let frame = FrameParams::from_camera(&camera, 0.0);
        let err = entity.draw(&mut gfx, &library, &frame).unwrap_err();
        match err {
            RenderError::Binding { owner, source } => {
                assert_eq!(owner, "stone");
                assert_eq!(source.key(), ("lit_ps", "Albedo"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(gfx.draws().is_empty());
        assert_eq!(gfx.bound().vertex_shader, None);
    }

    #[test]
    fn depth_draw_uploads_world_view_projection() {
        let Fixture {
            mut gfx,
            mut library,
            mut entity,
            ..
        } = fixture();
        let shadow_vs =
            ShaderProgram::load(&mut gfx, "shadow_vs", shaders::SHADOW_VS, ShaderStage::Vertex)
                .unwrap();
        let handle = library.add_shader(shadow_vs);
        let program = library.shader(handle).unwrap().clone();

        gfx.set_render_targets(None, Some(DepthTargetId::MAIN));
        gfx.set_shader(ShaderStage::Pixel, None);
        let light_vp = Mat4::orthographic_lh(-5.0, 5.0, -5.0, 5.0, 0.1, 50.0);
        entity.draw_depth(&mut gfx, &library, &program, light_vp).unwrap();

        let draw = &gfx.draws()[0];
        assert_eq!(draw.state.pixel_shader, None);
        assert_ne!(draw.state.color_target, Some(RenderTargetId::BACK_BUFFER));
        let expected = light_vp * Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(read_mat4(&draw.vs_constants, 0), expected);
    }

    #[test]
    fn unknown_mesh_is_reported() {
        let Fixture {
            mut gfx,
            library,
            entity,
            camera,
        } = fixture();
        let mut orphan = GameEntity::new("orphan", MeshHandle(999), entity.material());
        let frame = FrameParams::from_camera(&camera, 0.0);
        assert!(matches!(
            orphan.draw(&mut gfx, &library, &frame),
            Err(RenderError::UnknownHandle { kind: "mesh", .. })
        ));
    }
}
