use crate::error::SceneError;
use crate::game::Game;
use glam::Vec3;
use kiln_assets::{
    Address, AssetError, CameraDesc, Filter, LightDesc, Manifest, MeshShape, SamplerDescription,
    ShaderSource, SkySource, BUILTIN_PREFIX,
};
use kiln_common::{ShaderHandle, Transform};
use kiln_render::context::{AddressMode, FilterMode};
use kiln_render::light::dominant_light;
use kiln_render::texture::to_rgba8;
use kiln_render::{
    shaders, Camera, CubeFaces, FrameRenderer, GameEntity, GraphicsContext, Light, LoadError,
    Material, Mesh, MeshData, RenderError, RenderOptions, ResourceLibrary, SamplerDesc,
    ShaderProgram, ShaderStage, ShadowMap, ShadowSettings, Sky, TextureData,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Sampler every scene has, whether or not the manifest declares one.
pub const DEFAULT_SAMPLER: &str = "basic";

const SKY_MESH: &str = "sky_cube";

/// Turns a validated manifest into GPU resources and a ready-to-run [`Game`].
///
/// Shader programs are shared: every reference to the same source resolves to
/// one [`ShaderHandle`].
pub(crate) struct SceneBuilder<'m> {
    manifest: &'m Manifest,
    options: RenderOptions,
    library: ResourceLibrary,
    programs: BTreeMap<ShaderSource, ShaderHandle>,
}

impl<'m> SceneBuilder<'m> {
    pub(crate) fn new(manifest: &'m Manifest, options: RenderOptions) -> Self {
        Self {
            manifest,
            options,
            library: ResourceLibrary::new(),
            programs: BTreeMap::new(),
        }
    }

    pub(crate) fn build(mut self, gfx: &mut dyn GraphicsContext) -> Result<Game, SceneError> {
        self.manifest.validate()?;

        self.samplers(gfx)?;
        self.textures(gfx)?;
        self.meshes(gfx)?;
        self.materials(gfx)?;

        let lights = self.lights();
        let cameras = self.cameras(gfx);
        let sky = self.sky(gfx)?;
        let shadow = self.shadow(gfx, &lights)?;

        let (width, height) = gfx.surface_size();
        let manifest = self.manifest;
        let active_camera =
            (!cameras.is_empty()).then(|| manifest.active_camera.min(cameras.len() - 1));

        let mut game = Game {
            name: manifest.name.clone(),
            library: self.library,
            entities: Vec::new(),
            spins: BTreeMap::new(),
            lights,
            cameras,
            active_camera,
            sky,
            shadow,
            ambient: manifest.ambient,
            background: manifest.background,
            renderer: FrameRenderer::new(width, height, self.options),
            time: 0.0,
            frame_time: 0.0,
            last_report: None,
        };

        for desc in &manifest.entities {
            let mesh = game
                .library
                .find_mesh(&desc.mesh)
                .ok_or_else(|| missing("mesh", &desc.mesh, &desc.name))?;
            let material = game
                .library
                .find_material(&desc.material)
                .ok_or_else(|| missing("material", &desc.material, &desc.name))?;
            let transform =
                Transform::from_parts(desc.position, degrees_to_radians(desc.rotation), desc.scale);
            let entity = GameEntity::new(&desc.name, mesh, material).with_transform(transform);
            game.add_entity(entity, desc.spin)?;
        }

        info!(
            scene = %game.name,
            meshes = game.library.mesh_count(),
            shaders = game.library.shader_count(),
            materials = game.library.material_count(),
            textures = game.library.texture_count(),
            entities = game.entities.len(),
            lights = game.lights.len(),
            cameras = game.cameras.len(),
            sky = game.sky.is_some(),
            "scene built"
        );
        Ok(game)
    }

    /// Resolve a manifest shader reference, loading it the first time it is seen.
    fn shader(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        reference: &str,
        stage: ShaderStage,
    ) -> Result<ShaderHandle, SceneError> {
        let source = self.manifest.shader_source(reference);
        if let Some(&handle) = self.programs.get(&source) {
            let program = self.library.shader(handle)?;
            if program.stage() != stage {
                return Err(LoadError::StageMismatch {
                    name: program.name().to_string(),
                    expected: stage,
                    found: program.stage(),
                }
                .into());
            }
            return Ok(handle);
        }

        let program = match &source {
            ShaderSource::Builtin(name) => {
                let text =
                    shaders::builtin(name).ok_or_else(|| SceneError::UnknownBuiltin(name.clone()))?;
                ShaderProgram::load(gfx, name, text, stage)?
            }
            ShaderSource::File(path) => ShaderProgram::load_file(gfx, path, stage)?,
        };
        let handle = self.library.add_shader(program);
        self.programs.insert(source, handle);
        Ok(handle)
    }

    fn samplers(&mut self, gfx: &mut dyn GraphicsContext) -> Result<(), SceneError> {
        for desc in &self.manifest.samplers {
            let id = gfx.create_sampler(&sampler_desc(desc))?;
            self.library.add_sampler(&desc.name, id);
        }
        if self.library.sampler(DEFAULT_SAMPLER).is_none() {
            let id = gfx.create_sampler(&SamplerDesc::linear_wrap(DEFAULT_SAMPLER))?;
            self.library.add_sampler(DEFAULT_SAMPLER, id);
        }
        Ok(())
    }

    fn textures(&mut self, gfx: &mut dyn GraphicsContext) -> Result<(), SceneError> {
        let manifest = self.manifest;
        for desc in &manifest.textures {
            let mut data = match &desc.source {
                kiln_assets::TextureSource::File(path) => {
                    TextureData::from_file(&manifest.resolve(path))?
                }
                kiln_assets::TextureSource::Solid(color) => TextureData::solid(to_rgba8(*color)),
                kiln_assets::TextureSource::Checker { size, cells, a, b } => {
                    TextureData::checker(*size, *cells, to_rgba8(*a), to_rgba8(*b))
                }
            };
            data.srgb = desc.srgb;
            let id = gfx.create_texture(&desc.name, &data)?;
            self.library.add_texture(&desc.name, id);
        }
        Ok(())
    }

    fn meshes(&mut self, gfx: &mut dyn GraphicsContext) -> Result<(), SceneError> {
        for desc in &self.manifest.meshes {
            let mesh = Mesh::upload(gfx, &desc.name, &mesh_data(&desc.shape))?;
            debug!(
                mesh = %desc.name,
                triangles = mesh.triangle_count(),
                "mesh uploaded"
            );
            self.library.add_mesh(mesh);
        }
        Ok(())
    }

    fn materials(&mut self, gfx: &mut dyn GraphicsContext) -> Result<(), SceneError> {
        let manifest = self.manifest;
        for desc in &manifest.materials {
            if self.library.find_material(&desc.name).is_some() {
                return Err(SceneError::DuplicateName {
                    kind: "material",
                    name: desc.name.clone(),
                });
            }
            let vs = self.shader(gfx, &desc.vertex_shader, ShaderStage::Vertex)?;
            let ps = self.shader(gfx, &desc.pixel_shader, ShaderStage::Pixel)?;

            let mut material = Material::new(&desc.name, vs, ps, desc.color_tint);
            material.set_roughness(desc.roughness);
            material.set_uv_scale(desc.uv_scale);
            material.set_uv_offset(desc.uv_offset);
            for (slot, texture) in &desc.textures {
                let id = self
                    .library
                    .texture(texture)
                    .ok_or_else(|| missing("texture", texture, &desc.name))?;
                material.add_texture_srv(slot, id);
            }
            for (slot, sampler) in &desc.samplers {
                let id = self
                    .library
                    .sampler(sampler)
                    .ok_or_else(|| missing("sampler", sampler, &desc.name))?;
                material.add_sampler(slot, id);
            }

            if let Err(source) = material.validate(self.library.shader(ps)?) {
                if self.options.strict_bindings {
                    return Err(RenderError::Binding {
                        owner: desc.name.clone(),
                        source,
                    }
                    .into());
                }
                warn!(material = %desc.name, error = %source, "material does not match its pixel shader");
            }
            self.library.add_material(material);
        }
        Ok(())
    }

    fn lights(&self) -> Vec<Light> {
        let lights: Vec<Light> = self.manifest.lights.iter().map(light).collect();
        if lights.len() > kiln_render::MAX_LIGHTS {
            warn!(
                lights = lights.len(),
                max = kiln_render::MAX_LIGHTS,
                "scene declares more lights than the lit shader reads"
            );
        }
        lights
    }

    fn cameras(&self, gfx: &dyn GraphicsContext) -> Vec<Camera> {
        let (width, height) = gfx.surface_size();
        let aspect = if height > 0 {
            width as f32 / height as f32
        } else {
            1.0
        };
        self.manifest
            .cameras
            .iter()
            .map(|desc| camera(desc, aspect))
            .collect()
    }

    fn sky(&mut self, gfx: &mut dyn GraphicsContext) -> Result<Option<Sky>, SceneError> {
        let manifest = self.manifest;
        let Some(desc) = &manifest.sky else {
            return Ok(None);
        };

        let faces = match &desc.source {
            SkySource::Faces(paths) => {
                let paths: [PathBuf; 6] = paths
                    .iter()
                    .map(|p| manifest.resolve(p))
                    .collect::<Vec<_>>()
                    .try_into()
                    .map_err(|_| AssetError::InvalidValue {
                        what: "sky".into(),
                        reason: format!("expected 6 faces, found {}", paths.len()),
                    })?;
                CubeFaces::from_files(&paths)?
            }
            SkySource::Gradient {
                zenith,
                horizon,
                ground,
                size,
            } => CubeFaces::gradient(*size, *zenith, *horizon, *ground),
        };

        let mesh = Mesh::upload(gfx, SKY_MESH, &MeshData::cube(1.0))?;
        let mesh = self.library.add_mesh(mesh);
        let sampler = gfx.create_sampler(&SamplerDesc {
            address: AddressMode::Clamp,
            ..SamplerDesc::linear_wrap("sky_sampler")
        })?;
        let vs = self.shader(gfx, &desc.vertex_shader, ShaderStage::Vertex)?;
        let ps = self.shader(gfx, &desc.pixel_shader, ShaderStage::Pixel)?;
        Ok(Some(Sky::create(gfx, mesh, &faces, sampler, vs, ps)?))
    }

    fn shadow(
        &mut self,
        gfx: &mut dyn GraphicsContext,
        lights: &[Light],
    ) -> Result<ShadowMap, SceneError> {
        let desc = self.manifest.shadow;
        let settings = ShadowSettings {
            enabled: desc.enabled,
            resolution: desc.resolution,
            distance: desc.distance,
            extent: desc.extent,
            near: desc.near,
            depth_bias: desc.depth_bias,
            slope_scaled_depth_bias: desc.slope_scaled_depth_bias,
            depth_bias_clamp: desc.depth_bias_clamp,
        };
        let depth_shader =
            self.shader(gfx, &format!("{BUILTIN_PREFIX}shadow_vs"), ShaderStage::Vertex)?;
        let direction = dominant_light(lights).and_then(|i| lights[i].direction());
        Ok(ShadowMap::new(gfx, settings, depth_shader, direction, desc.center)?)
    }
}

fn missing(kind: &'static str, name: &str, owner: &str) -> SceneError {
    SceneError::Missing {
        kind,
        name: name.to_string(),
        owner: owner.to_string(),
    }
}

fn degrees_to_radians(v: Vec3) -> Vec3 {
    v * (std::f32::consts::PI / 180.0)
}

fn sampler_desc(desc: &SamplerDescription) -> SamplerDesc {
    let mut sampler = SamplerDesc::linear_wrap(&desc.name);
    if desc.filter == Filter::Nearest {
        sampler.filter = FilterMode::Nearest;
        sampler.max_anisotropy = 1;
    }
    if desc.address == Address::Clamp {
        sampler.address = AddressMode::Clamp;
    }
    sampler
}

fn mesh_data(shape: &MeshShape) -> MeshData {
    match *shape {
        MeshShape::Triangle => MeshData::triangle(),
        MeshShape::Quad { size } => MeshData::quad(size),
        MeshShape::Plane { size, subdivisions } => MeshData::plane(size, subdivisions),
        MeshShape::Cube { size } => MeshData::cube(size),
        MeshShape::Sphere {
            radius,
            slices,
            stacks,
        } => MeshData::sphere(radius, slices, stacks),
        MeshShape::Cylinder {
            radius,
            height,
            segments,
        } => MeshData::cylinder(radius, height, segments),
    }
}

fn light(desc: &LightDesc) -> Light {
    match *desc {
        LightDesc::Directional {
            direction,
            color,
            intensity,
        } => Light::directional(direction, color, intensity),
        LightDesc::Point {
            position,
            range,
            color,
            intensity,
        } => Light::point(position, range, color, intensity),
        LightDesc::Spot {
            position,
            direction,
            range,
            color,
            intensity,
            inner_angle,
            outer_angle,
        } => Light::Spot {
            position,
            direction,
            range,
            color,
            intensity,
            inner_angle: inner_angle.to_radians(),
            outer_angle: outer_angle.to_radians(),
        },
    }
}

fn camera(desc: &CameraDesc, aspect: f32) -> Camera {
    let mut camera = Camera::new(
        desc.position,
        desc.move_speed,
        desc.look_speed,
        desc.fov.to_radians(),
        aspect,
    );
    if let Some(target) = desc.look_at {
        camera.look_at(target);
    }
    camera
}
