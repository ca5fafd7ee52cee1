use crate::error::AssetError;
use glam::{Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Prefix that selects a program compiled into the renderer instead of a file.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Whole-scene description. Every field has a default, so `{}` is a valid
/// (empty) manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub name: String,
    /// Back-buffer clear colour.
    pub background: Vec4,
    /// The scene's single ambient term.
    pub ambient: Vec3,
    pub meshes: Vec<MeshDesc>,
    pub textures: Vec<TextureDesc>,
    pub samplers: Vec<SamplerDescription>,
    pub materials: Vec<MaterialDesc>,
    pub entities: Vec<EntityDesc>,
    pub lights: Vec<LightDesc>,
    pub cameras: Vec<CameraDesc>,
    pub active_camera: usize,
    pub sky: Option<SkyDesc>,
    pub shadow: ShadowDesc,
    /// Directory relative paths resolve against; set by [`Manifest::load`].
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            name: "untitled".into(),
            background: Vec4::new(0.4, 0.6, 0.75, 1.0),
            ambient: Vec3::new(0.1, 0.1, 0.12),
            meshes: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            materials: Vec::new(),
            entities: Vec::new(),
            lights: Vec::new(),
            cameras: Vec::new(),
            active_camera: 0,
            sky: None,
            shadow: ShadowDesc::default(),
            base_dir: PathBuf::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDesc {
    pub name: String,
    #[serde(flatten)]
    pub shape: MeshShape,
}

/// Procedural geometry. Mesh file formats are not read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum MeshShape {
    Triangle,
    Quad {
        #[serde(default = "one")]
        size: f32,
    },
    Plane {
        #[serde(default = "one")]
        size: f32,
        #[serde(default = "one_u32")]
        subdivisions: u32,
    },
    Cube {
        #[serde(default = "one")]
        size: f32,
    },
    Sphere {
        #[serde(default = "half")]
        radius: f32,
        #[serde(default = "default_slices")]
        slices: u32,
        #[serde(default = "default_stacks")]
        stacks: u32,
    },
    Cylinder {
        #[serde(default = "half")]
        radius: f32,
        #[serde(default = "one")]
        height: f32,
        #[serde(default = "default_slices")]
        segments: u32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextureDesc {
    pub name: String,
    #[serde(flatten)]
    pub source: TextureSource,
    /// Colour data; set false for linear data such as normal maps.
    #[serde(default = "yes")]
    pub srgb: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextureSource {
    /// PNG or JPEG, relative to the manifest.
    File(PathBuf),
    /// 1x1 texture, components 0..1.
    Solid(Vec4),
    Checker {
        #[serde(default = "default_checker_size")]
        size: u32,
        #[serde(default = "default_checker_cells")]
        cells: u32,
        a: Vec4,
        b: Vec4,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerDescription {
    pub name: String,
    #[serde(default)]
    pub filter: Filter,
    #[serde(default)]
    pub address: Address,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Address {
    #[default]
    Wrap,
    Clamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialDesc {
    pub name: String,
    /// `builtin:<name>` or a WGSL path.
    #[serde(default = "default_lit_vs")]
    pub vertex_shader: String,
    #[serde(default = "default_lit_ps")]
    pub pixel_shader: String,
    #[serde(default = "white")]
    pub color_tint: Vec4,
    #[serde(default = "half")]
    pub roughness: f32,
    #[serde(default = "unit_scale")]
    pub uv_scale: Vec2,
    #[serde(default)]
    pub uv_offset: Vec2,
    /// Shader resource name -> texture name.
    #[serde(default)]
    pub textures: BTreeMap<String, String>,
    /// Shader resource name -> sampler name.
    #[serde(default)]
    pub samplers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDesc {
    pub name: String,
    pub mesh: String,
    pub material: String,
    #[serde(default)]
    pub position: Vec3,
    /// Pitch, yaw, roll in degrees.
    #[serde(default)]
    pub rotation: Vec3,
    #[serde(default = "unit_scale3")]
    pub scale: Vec3,
    /// Radians per second about each axis.
    #[serde(default)]
    pub spin: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LightDesc {
    Directional {
        direction: Vec3,
        #[serde(default = "white3")]
        color: Vec3,
        #[serde(default = "one")]
        intensity: f32,
    },
    Point {
        position: Vec3,
        #[serde(default = "default_range")]
        range: f32,
        #[serde(default = "white3")]
        color: Vec3,
        #[serde(default = "one")]
        intensity: f32,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        #[serde(default = "default_range")]
        range: f32,
        #[serde(default = "white3")]
        color: Vec3,
        #[serde(default = "one")]
        intensity: f32,
        /// Degrees.
        #[serde(default = "default_inner_angle")]
        inner_angle: f32,
        /// Degrees.
        #[serde(default = "default_outer_angle")]
        outer_angle: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDesc {
    #[serde(default = "default_camera_name")]
    pub name: String,
    pub position: Vec3,
    /// Point to face; without it the camera faces +Z.
    #[serde(default)]
    pub look_at: Option<Vec3>,
    /// Vertical field of view in degrees.
    #[serde(default = "default_fov")]
    pub fov: f32,
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    #[serde(default = "default_look_speed")]
    pub look_speed: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkyDesc {
    #[serde(flatten)]
    pub source: SkySource,
    #[serde(default = "default_sky_vs")]
    pub vertex_shader: String,
    #[serde(default = "default_sky_ps")]
    pub pixel_shader: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkySource {
    /// Six images in +X, -X, +Y, -Y, +Z, -Z order.
    Faces(Vec<PathBuf>),
    Gradient {
        zenith: Vec3,
        horizon: Vec3,
        ground: Vec3,
        #[serde(default = "default_gradient_size")]
        size: u32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowDesc {
    pub enabled: bool,
    pub resolution: u32,
    pub distance: f32,
    pub extent: f32,
    pub near: f32,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_bias_clamp: f32,
    /// Point the light frustum is centered on.
    pub center: Vec3,
}

impl Default for ShadowDesc {
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
            center: Vec3::ZERO,
        }
    }
}

/// Where a shader program comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderSource {
    Builtin(String),
    File(PathBuf),
}

impl ShaderSource {
    pub fn parse(reference: &str) -> Self {
        match reference.strip_prefix(BUILTIN_PREFIX) {
            Some(name) => ShaderSource::Builtin(name.trim().to_string()),
            None => ShaderSource::File(PathBuf::from(reference)),
        }
    }
}

impl Manifest {
    /// Resolve a manifest-relative path. Absolute paths pass through.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Parse a shader reference, resolving file paths against the manifest.
    pub fn shader_source(&self, reference: &str) -> ShaderSource {
        match ShaderSource::parse(reference) {
            ShaderSource::File(path) => ShaderSource::File(self.resolve(&path)),
            builtin => builtin,
        }
    }

    pub fn mesh(&self, name: &str) -> Option<&MeshDesc> {
        self.meshes.iter().find(|m| m.name == name)
    }

    pub fn material(&self, name: &str) -> Option<&MaterialDesc> {
        self.materials.iter().find(|m| m.name == name)
    }

    /// Check names and references. Files are not opened here.
    pub fn validate(&self) -> Result<(), AssetError> {
        let meshes = unique("mesh", self.meshes.iter().map(|m| m.name.as_str()))?;
        let textures = unique("texture", self.textures.iter().map(|t| t.name.as_str()))?;
        let samplers = unique("sampler", self.samplers.iter().map(|s| s.name.as_str()))?;
        let materials = unique("material", self.materials.iter().map(|m| m.name.as_str()))?;
        unique("entity", self.entities.iter().map(|e| e.name.as_str()))?;
        unique("camera", self.cameras.iter().map(|c| c.name.as_str()))?;

        for mesh in &self.meshes {
            mesh.shape.validate(&mesh.name)?;
        }
        for texture in &self.textures {
            if let TextureSource::Checker { size, cells, .. } = texture.source {
                if size == 0 || cells == 0 {
                    return Err(invalid(
                        format!("texture `{}`", texture.name),
                        "checker size and cells must be positive",
                    ));
                }
            }
        }
        for material in &self.materials {
            let owner = format!("material `{}`", material.name);
            for texture in material.textures.values() {
                reference("texture", texture, &textures, &owner)?;
            }
            for sampler in material.samplers.values() {
                reference("sampler", sampler, &samplers, &owner)?;
            }
            for shader in [&material.vertex_shader, &material.pixel_shader] {
                if shader.trim().is_empty() || shader.trim() == BUILTIN_PREFIX {
                    return Err(invalid(owner, "empty shader reference"));
                }
            }
        }
        for entity in &self.entities {
            let owner = format!("entity `{}`", entity.name);
            reference("mesh", &entity.mesh, &meshes, &owner)?;
            reference("material", &entity.material, &materials, &owner)?;
            if entity.scale.cmpeq(Vec3::ZERO).any() {
                return Err(invalid(owner, "scale has a zero axis"));
            }
        }
        for (i, light) in self.lights.iter().enumerate() {
            light.validate(i)?;
        }
        for camera in &self.cameras {
            if !(camera.fov > 0.0 && camera.fov < 180.0) {
                return Err(invalid(
                    format!("camera `{}`", camera.name),
                    "fov must be between 0 and 180 degrees",
                ));
            }
        }
        if !self.cameras.is_empty() && self.active_camera >= self.cameras.len() {
            return Err(invalid(
                "active_camera".to_string(),
                format!(
                    "index {} but only {} cameras",
                    self.active_camera,
                    self.cameras.len()
                ),
            ));
        }
        if let Some(sky) = &self.sky {
            if let SkySource::Faces(faces) = &sky.source {
                if faces.len() != 6 {
                    return Err(invalid(
                        "sky".to_string(),
                        format!("expected 6 faces, found {}", faces.len()),
                    ));
                }
            }
        }
        if self.shadow.resolution == 0 {
            return Err(invalid("shadow".to_string(), "resolution must be positive"));
        }
        if self.shadow.extent <= 0.0 || self.shadow.near <= 0.0 {
            return Err(invalid(
                "shadow".to_string(),
                "extent and near must be positive",
            ));
        }
        Ok(())
    }
}

impl MeshShape {
    fn validate(&self, name: &str) -> Result<(), AssetError> {
        let ok = match *self {
            MeshShape::Triangle => true,
            MeshShape::Quad { size } | MeshShape::Cube { size } => size > 0.0,
            MeshShape::Plane { size, subdivisions } => size > 0.0 && subdivisions > 0,
            MeshShape::Sphere {
                radius,
                slices,
                stacks,
            } => radius > 0.0 && slices >= 3 && stacks >= 2,
            MeshShape::Cylinder {
                radius,
                height,
                segments,
            } => radius > 0.0 && height > 0.0 && segments >= 3,
        };
        if ok {
            Ok(())
        } else {
            Err(invalid(format!("mesh `{name}`"), "non-positive size or too few segments"))
        }
    }
}

impl LightDesc {
    fn validate(&self, index: usize) -> Result<(), AssetError> {
        let what = || format!("light {index}");
        match *self {
            LightDesc::Directional { direction, .. } if direction == Vec3::ZERO => {
                Err(invalid(what(), "zero direction"))
            }
            LightDesc::Point { range, .. } if range <= 0.0 => {
                Err(invalid(what(), "range must be positive"))
            }
            LightDesc::Spot {
                range,
                inner_angle,
                outer_angle,
                ..
            } if range <= 0.0 || inner_angle > outer_angle => Err(invalid(
                what(),
                "range must be positive and inner angle at most outer",
            )),
            _ => Ok(()),
        }
    }
}

fn unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> Result<BTreeSet<&'a str>, AssetError> {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(AssetError::DuplicateName {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(seen)
}

fn reference(
    kind: &'static str,
    name: &str,
    known: &BTreeSet<&str>,
    owner: &str,
) -> Result<(), AssetError> {
    if known.contains(name) {
        Ok(())
    } else {
        Err(AssetError::UnknownReference {
            kind,
            name: name.to_string(),
            owner: owner.to_string(),
        })
    }
}

fn invalid(what: String, reason: impl Into<String>) -> AssetError {
    AssetError::InvalidValue {
        what,
        reason: reason.into(),
    }
}

fn one() -> f32 {
    1.0
}

fn one_u32() -> u32 {
    1
}

fn half() -> f32 {
    0.5
}

fn yes() -> bool {
    true
}

fn white() -> Vec4 {
    Vec4::ONE
}

fn white3() -> Vec3 {
    Vec3::ONE
}

fn unit_scale() -> Vec2 {
    Vec2::ONE
}

fn unit_scale3() -> Vec3 {
    Vec3::ONE
}

fn default_slices() -> u32 {
    24
}

fn default_stacks() -> u32 {
    16
}

fn default_checker_size() -> u32 {
    256
}

fn default_checker_cells() -> u32 {
    8
}

fn default_range() -> f32 {
    10.0
}

fn default_inner_angle() -> f32 {
    15.0
}

fn default_outer_angle() -> f32 {
    25.0
}

fn default_camera_name() -> String {
    "main".into()
}

fn default_fov() -> f32 {
    60.0
}

fn default_move_speed() -> f32 {
    5.0
}

fn default_look_speed() -> f32 {
    0.002
}

fn default_gradient_size() -> u32 {
    64
}

fn default_lit_vs() -> String {
    "builtin:lit_vs".into()
}

fn default_lit_ps() -> String {
    "builtin:lit_ps".into()
}

fn default_sky_vs() -> String {
    "builtin:sky_vs".into()
}

fn default_sky_ps() -> String {
    "builtin:sky_ps".into()
}
