use crate::context::{DeviceError, GraphicsContext, SamplerId, ShaderId, ShaderStage, TextureId};
use crate::error::{BindingError, LoadError};
use crate::reflect::{ParamKind, ShaderLayout};
use glam::{Mat4, Vec2, Vec3, Vec4};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// Parameter and resource names the engine writes when a program declares them.
pub mod names {
    pub const WORLD: &str = "world";
    pub const VIEW: &str = "view";
    pub const PROJECTION: &str = "projection";
    pub const WORLD_INVERSE_TRANSPOSE: &str = "world_inverse_transpose";
    pub const LIGHT_VIEW: &str = "light_view";
    pub const LIGHT_PROJECTION: &str = "light_projection";
    pub const WORLD_VIEW_PROJECTION: &str = "world_view_projection";

    pub const COLOR_TINT: &str = "color_tint";
    pub const UV_SCALE: &str = "uv_scale";
    pub const UV_OFFSET: &str = "uv_offset";
    pub const TIME: &str = "time";
    pub const CAMERA_POSITION: &str = "camera_position";
    pub const ROUGHNESS: &str = "roughness";

    pub const LIGHTS: &str = "lights";
    pub const LIGHT_COUNT: &str = "light_count";
    pub const SHADOW_LIGHT_INDEX: &str = "shadow_light_index";
    pub const AMBIENT_COLOR: &str = "ambient_color";

    pub const SHADOW_MAP: &str = "shadow_map";
    pub const SHADOW_SAMPLER: &str = "shadow_sampler";
    pub const SKY_TEXTURE: &str = "sky_texture";
    pub const SKY_SAMPLER: &str = "sky_sampler";
}

/// A compiled program plus its reflected parameter table.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    name: String,
    id: ShaderId,
    layout: ShaderLayout,
}

impl ShaderProgram {
    /// Reflect and compile `source` as a `stage` program.
    pub fn load(
        gfx: &mut dyn GraphicsContext,
        name: &str,
        source: &str,
        stage: ShaderStage,
    ) -> Result<Self, LoadError> {
        let layout = ShaderLayout::reflect(source, stage).map_err(|source| LoadError::Reflect {
            name: name.to_string(),
            source,
        })?;
        let id = gfx.create_shader(name, source, &layout)?;
        debug!(
            shader = name,
            ?stage,
            uniform_bytes = layout.uniform_size(),
            params = layout.uniform.as_ref().map_or(0, |u| u.params.len()),
            resources = layout.resources.len(),
            "shader reflected"
        );
        Ok(Self {
            name: name.to_string(),
            id,
            layout,
        })
    }

    /// Read a WGSL file and load it. The program is named after the file stem.
    pub fn load_file(
        gfx: &mut dyn GraphicsContext,
        path: &Path,
        stage: ShaderStage,
    ) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let source = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::load(gfx, &name, &source, stage)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> ShaderId {
        self.id
    }

    pub fn stage(&self) -> ShaderStage {
        self.layout.stage
    }

    pub fn layout(&self) -> &ShaderLayout {
        &self.layout
    }

    pub fn declares(&self, name: &str) -> bool {
        self.layout.declares(name)
    }

    pub fn expect_stage(&self, stage: ShaderStage) -> Result<(), BindingError> {
        if self.stage() == stage {
            Ok(())
        } else {
            Err(BindingError::WrongStage {
                shader: self.name.clone(),
                expected: stage,
                found: self.stage(),
            })
        }
    }

    /// Make this the current program for its stage.
    pub fn bind(&self, gfx: &mut dyn GraphicsContext) {
        gfx.set_shader(self.stage(), Some(self.id));
    }

    /// Start staging parameters for one draw. Unset parameters are zero.
    pub fn parameters(&self) -> ParameterBlock<'_> {
        ParameterBlock {
            program: self,
            data: vec![0; self.layout.uniform_size() as usize],
            textures: BTreeMap::new(),
            samplers: BTreeMap::new(),
        }
    }
}

/// CPU staging for one program's constants and resource bindings.
///
/// Every setter checks the name and kind against the reflected table. Nothing
/// reaches the device until [`ParameterBlock::commit`].
#[must_use = "parameters reach the GPU only through `commit`"]
#[derive(Debug)]
pub struct ParameterBlock<'a> {
    program: &'a ShaderProgram,
    data: Vec<u8>,
    textures: BTreeMap<u32, TextureId>,
    samplers: BTreeMap<u32, SamplerId>,
}

impl<'a> ParameterBlock<'a> {
    pub fn program(&self) -> &'a ShaderProgram {
        self.program
    }

    pub fn declares(&self, name: &str) -> bool {
        self.program.declares(name)
    }

    /// Staged constant bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    fn write(&mut self, name: &str, kind: ParamKind, bytes: &[u8]) -> Result<(), BindingError> {
        let desc = self
            .program
            .layout
            .param(name)
            .ok_or_else(|| BindingError::UnknownParameter {
                shader: self.program.name.clone(),
                name: name.to_string(),
            })?;
        if desc.kind != kind {
            return Err(BindingError::TypeMismatch {
                shader: self.program.name.clone(),
                name: name.to_string(),
                expected: desc.kind.describe(),
                found: kind.describe(),
            });
        }
        let start = desc.offset as usize;
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn set_float(&mut self, name: &str, value: f32) -> Result<(), BindingError> {
        self.write(name, ParamKind::F32, bytemuck::bytes_of(&value))
    }

    pub fn set_float2(&mut self, name: &str, value: Vec2) -> Result<(), BindingError> {
        self.write(name, ParamKind::Vec2, bytemuck::bytes_of(&value))
    }

    pub fn set_float3(&mut self, name: &str, value: Vec3) -> Result<(), BindingError> {
        self.write(name, ParamKind::Vec3, bytemuck::bytes_of(&value))
    }

    pub fn set_float4(&mut self, name: &str, value: Vec4) -> Result<(), BindingError> {
        self.write(name, ParamKind::Vec4, bytemuck::bytes_of(&value))
    }

    pub fn set_int(&mut self, name: &str, value: i32) -> Result<(), BindingError> {
        self.write(name, ParamKind::I32, bytemuck::bytes_of(&value))
    }

    pub fn set_uint(&mut self, name: &str, value: u32) -> Result<(), BindingError> {
        self.write(name, ParamKind::U32, bytemuck::bytes_of(&value))
    }

    pub fn set_matrix4x4(&mut self, name: &str, value: &Mat4) -> Result<(), BindingError> {
        self.write(name, ParamKind::Mat4, bytemuck::bytes_of(value))
    }

    /// Raw bytes for any parameter (structs and arrays in particular). Shorter
    /// data leaves the tail of the parameter zeroed.
    pub fn set_data(&mut self, name: &str, bytes: &[u8]) -> Result<(), BindingError> {
        let desc = self
            .program
            .layout
            .param(name)
            .ok_or_else(|| BindingError::UnknownParameter {
                shader: self.program.name.clone(),
                name: name.to_string(),
            })?;
        if bytes.len() > desc.size as usize {
            return Err(BindingError::DataTooLarge {
                shader: self.program.name.clone(),
                name: name.to_string(),
                capacity: desc.size,
                len: bytes.len(),
            });
        }
        let start = desc.offset as usize;
        let end = start + desc.size as usize;
        self.data[start..end].fill(0);
        self.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn set_texture(&mut self, name: &str, texture: TextureId) -> Result<(), BindingError> {
        match self.program.layout.resource(name) {
            Some(slot) if slot.kind.is_texture() => {
                self.textures.insert(slot.binding, texture);
                Ok(())
            }
            Some(slot) => Err(BindingError::TypeMismatch {
                shader: self.program.name.clone(),
                name: name.to_string(),
                expected: slot.kind.describe(),
                found: "texture",
            }),
            None => Err(BindingError::UnknownTexture {
                shader: self.program.name.clone(),
                name: name.to_string(),
            }),
        }
    }

    pub fn set_sampler(&mut self, name: &str, sampler: SamplerId) -> Result<(), BindingError> {
        match self.program.layout.resource(name) {
            Some(slot) if !slot.kind.is_texture() => {
                self.samplers.insert(slot.binding, sampler);
                Ok(())
            }
            Some(slot) => Err(BindingError::TypeMismatch {
                shader: self.program.name.clone(),
                name: name.to_string(),
                expected: slot.kind.describe(),
                found: "sampler",
            }),
            None => Err(BindingError::UnknownSampler {
                shader: self.program.name.clone(),
                name: name.to_string(),
            }),
        }
    }

    /// Upload the staged constants and bind the staged resources for this stage.
    pub fn commit(self, gfx: &mut dyn GraphicsContext) -> Result<(), DeviceError> {
        let stage = self.program.stage();
        if self.program.layout.uniform.is_some() {
            gfx.upload_constants(self.program.id, &self.data)?;
        }
        for (binding, texture) in self.textures {
            gfx.bind_texture(stage, binding, texture);
        }
        for (binding, sampler) in self.samplers {
            gfx.bind_sampler(stage, binding, sampler);
        }
        Ok(())
    }
}

/// Treat "the program does not declare this name" as success.
///
/// Used for engine-provided values that a program may legitimately ignore; kind and
/// size mismatches still surface.
pub trait IfDeclared {
    fn if_declared(self) -> Result<(), BindingError>;
}

impl IfDeclared for Result<(), BindingError> {
    fn if_declared(self) -> Result<(), BindingError> {
        match self {
            Err(
                BindingError::UnknownParameter { .. }
                | BindingError::UnknownTexture { .. }
                | BindingError::UnknownSampler { .. },
            ) => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{read_mat4, HeadlessContext};
    use crate::shaders;

    const PS: &str = "
        struct P { tint: vec4<f32>, offset: vec3<f32>, weight: f32, count: u32 }
        @group(1) @binding(0) var<uniform> p: P;
        @group(1) @binding(1) var albedo: texture_2d<f32>;
        @group(1) @binding(2) var basic_sampler: sampler;
        @fragment fn fs_main() -> @location(0) vec4<f32> { return p.tint; }
    ";

    fn program(gfx: &mut HeadlessContext) -> ShaderProgram {
        ShaderProgram::load(gfx, "test_ps", PS, ShaderStage::Pixel).unwrap()
    }

    #[test]
    fn setters_write_at_reflected_offsets() {
        let mut gfx = HeadlessContext::new(64, 64);
        let ps = program(&mut gfx);
        let mut block = ps.parameters();
        block.set_float4("tint", Vec4::new(1.0, 2.0, 3.0, 4.0)).unwrap();
        block.set_float3("offset", Vec3::new(5.0, 6.0, 7.0)).unwrap();
        block.set_float("weight", 8.0).unwrap();
        block.set_uint("count", 9).unwrap();

        let floats: Vec<f32> = block.bytes()[..32]
            .chunks_exact(4)
            .map(bytemuck::pod_read_unaligned)
            .collect();
        assert_eq!(floats, [1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0]);
        let count: u32 = bytemuck::pod_read_unaligned(&block.bytes()[32..36]);
        assert_eq!(count, 9);
        block.commit(&mut gfx).unwrap();
    }

    #[test]
    fn unknown_name_is_a_typed_error() {
        let mut gfx = HeadlessContext::new(64, 64);
        let ps = program(&mut gfx);
        let mut block = ps.parameters();
        let err = block.set_float("wieght", 1.0).unwrap_err();
        assert_eq!(
            err,
            BindingError::UnknownParameter {
                shader: "test_ps".into(),
                name: "wieght".into()
            }
        );
        assert!(block.set_texture("Albedo", TextureId(1)).is_err());
        assert!(matches!(
            block.set_sampler("missing", SamplerId(1)),
            Err(BindingError::UnknownSampler { .. })
        ));
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let mut gfx = HeadlessContext::new(64, 64);
        let ps = program(&mut gfx);
        let mut block = ps.parameters();
        assert!(matches!(
            block.set_float("tint", 1.0),
            Err(BindingError::TypeMismatch { expected: "vec4<f32>", found: "f32", .. })
        ));
        assert!(matches!(
            block.set_texture("basic_sampler", TextureId(0)),
            Err(BindingError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn set_data_checks_capacity() {
        let mut gfx = HeadlessContext::new(64, 64);
        let ps = program(&mut gfx);
        let mut block = ps.parameters();
        block.set_data("offset", &[1u8; 12]).unwrap();
        assert!(matches!(
            block.set_data("offset", &[0u8; 13]),
            Err(BindingError::DataTooLarge { capacity: 12, len: 13, .. })
        ));
    }

    #[test]
    fn if_declared_only_forgives_missing_names() {
        let mut gfx = HeadlessContext::new(64, 64);
        let ps = program(&mut gfx);
        let mut block = ps.parameters();
        assert!(block.set_float("time", 1.0).if_declared().is_ok());
        assert!(block.set_float("tint", 1.0).if_declared().is_err());
    }

    #[test]
    fn commit_uploads_constants_and_binds_resources() {
        let mut gfx = HeadlessContext::new(64, 64);
        let vs = ShaderProgram::load(&mut gfx, "lit_vs", shaders::LIT_VS, ShaderStage::Vertex)
            .unwrap();
        let ps = program(&mut gfx);

        let world = Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0));
        let mut vblock = vs.parameters();
        vblock.set_matrix4x4(names::WORLD, &world).unwrap();
        vblock.commit(&mut gfx).unwrap();

        let mut pblock = ps.parameters();
        pblock.set_texture("albedo", TextureId(7)).unwrap();
        pblock.set_sampler("basic_sampler", SamplerId(3)).unwrap();
        pblock.commit(&mut gfx).unwrap();

        let uploaded = gfx.constants(vs.id()).unwrap();
        let offset = vs.layout().param(names::WORLD).unwrap().offset as usize;
        assert_eq!(read_mat4(uploaded, offset), world);
        assert_eq!(gfx.bound().textures.get(&(ShaderStage::Pixel, 1)), Some(&TextureId(7)));
        assert_eq!(gfx.bound().samplers.get(&(ShaderStage::Pixel, 2)), Some(&SamplerId(3)));
    }

    #[test]
    fn load_reports_reflection_errors_by_name() {
        let mut gfx = HeadlessContext::new(64, 64);
        let err = ShaderProgram::load(&mut gfx, "broken", shaders::LIT_VS, ShaderStage::Pixel)
            .unwrap_err();
        assert!(matches!(err, LoadError::Reflect { ref name, .. } if name == "broken"));
    }

    #[test]
    fn load_file_reports_missing_path() {
        let mut gfx = HeadlessContext::new(64, 64);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.wgsl");
        assert!(matches!(
            ShaderProgram::load_file(&mut gfx, &path, ShaderStage::Vertex),
            Err(LoadError::NotFound { .. })
        ));

        let path = dir.path().join("shadow.wgsl");
        std::fs::write(&path, shaders::SHADOW_VS).unwrap();
        let program = ShaderProgram::load_file(&mut gfx, &path, ShaderStage::Vertex).unwrap();
        assert_eq!(program.name(), "shadow");
    }
}
