//! Scene manifests.
//!
//! A manifest is a YAML file naming every resource a scene needs: procedural
//! meshes, textures, samplers, materials with their shader pair, entities,
//! lights, cameras, the sky and shadow settings. This crate only reads and
//! checks the description; building GPU resources from it is `kiln-scene`'s job.
//!
//! # Invariants
//! - Paths in a manifest are relative to the manifest file.
//! - A manifest that passes [`Manifest::validate`] has unique names per kind and
//!   no dangling references.

mod error;
mod manifest;

pub use error::AssetError;
pub use manifest::{
    Address, CameraDesc, EntityDesc, Filter, LightDesc, Manifest, MaterialDesc, MeshDesc,
    MeshShape, SamplerDescription, ShaderSource, ShadowDesc, SkyDesc, SkySource, TextureDesc,
    TextureSource, BUILTIN_PREFIX,
};

use std::path::Path;
use tracing::debug;

impl Manifest {
    /// Parse YAML text. `base_dir` is left empty.
    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, AssetError> {
        serde_yaml::from_str(text).map_err(|source| AssetError::Yaml {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Read and validate a manifest file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AssetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut manifest = Self::from_yaml_str(&text, path)?;
        manifest.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        manifest.validate()?;
        debug!(
            path = %path.display(),
            meshes = manifest.meshes.len(),
            materials = manifest.materials.len(),
            entities = manifest.entities.len(),
            lights = manifest.lights.len(),
            "manifest loaded"
        );
        Ok(manifest)
    }

    /// Write the manifest as YAML.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), AssetError> {
        let path = path.as_ref();
        let text = serde_yaml::to_string(self).map_err(|source| AssetError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, text).map_err(|source| AssetError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

pub fn crate_info() -> &'static str {
    "kiln-assets v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};
    use std::path::PathBuf;

    const SCENE: &str = r#"
name: demo
background: [0.1, 0.2, 0.3, 1.0]
ambient: [0.2, 0.2, 0.2]
meshes:
  - name: cube
    shape: cube
    size: 2.0
  - name: ball
    shape: sphere
textures:
  - name: bricks
    file: textures/bricks.png
  - name: grid
    checker: { a: [1, 1, 1, 1], b: [0, 0, 0, 1] }
  - name: red
    solid: [1, 0, 0, 1]
samplers:
  - name: basic
materials:
  - name: stone
    roughness: 0.8
    textures: { albedo: bricks }
    samplers: { basic_sampler: basic }
  - name: flat
    pixel_shader: shaders/flat_ps.wgsl
entities:
  - name: box
    mesh: cube
    material: stone
    position: [0, 1, 0]
    spin: [0, 0.5, 0]
  - name: orb
    mesh: ball
    material: flat
lights:
  - kind: directional
    direction: [0, -1, 0]
  - kind: point
    position: [2, 2, 2]
    range: 6
cameras:
  - position: [0, 0, -10]
    look_at: [0, 0, 0]
sky:
  gradient: { zenith: [0.1, 0.3, 0.8], horizon: [0.8, 0.9, 1.0], ground: [0.2, 0.2, 0.2] }
shadow:
  resolution: 2048
"#;

    fn parse(text: &str) -> Manifest {
        Manifest::from_yaml_str(text, Path::new("test.yaml")).unwrap()
    }

    #[test]
    fn empty_manifest_uses_defaults() {
        let m = parse("{}");
        assert_eq!(m, Manifest::default());
        assert_eq!(m.background, Vec4::new(0.4, 0.6, 0.75, 1.0));
        assert_eq!(m.shadow.resolution, 1024);
        m.validate().unwrap();
    }

    #[test]
    fn full_scene_parses() {
        let m = parse(SCENE);
        m.validate().unwrap();
        assert_eq!(m.name, "demo");
        assert_eq!(m.meshes[0].shape, MeshShape::Cube { size: 2.0 });
        assert!(matches!(
            m.meshes[1].shape,
            MeshShape::Sphere { slices: 24, stacks: 16, .. }
        ));
        assert_eq!(
            m.textures[0].source,
            TextureSource::File(PathBuf::from("textures/bricks.png"))
        );
        assert!(matches!(m.textures[1].source, TextureSource::Checker { size: 256, .. }));
        assert_eq!(m.textures[2].source, TextureSource::Solid(Vec4::new(1.0, 0.0, 0.0, 1.0)));

        let stone = m.material("stone").unwrap();
        assert_eq!(stone.vertex_shader, "builtin:lit_vs");
        assert_eq!(stone.roughness, 0.8);
        assert_eq!(stone.textures["albedo"], "bricks");

        assert_eq!(m.entities[0].spin, Vec3::new(0.0, 0.5, 0.0));
        assert_eq!(m.entities[1].scale, Vec3::ONE);
        assert!(matches!(m.lights[1], LightDesc::Point { range, .. } if range == 6.0));
        assert_eq!(m.cameras[0].fov, 60.0);
        assert_eq!(m.shadow.resolution, 2048);
        assert_eq!(m.shadow.distance, 20.0);
    }

    #[test]
    fn shader_references_resolve() {
        let mut m = parse(SCENE);
        m.base_dir = PathBuf::from("/scenes");
        assert_eq!(
            m.shader_source("builtin:lit_ps"),
            ShaderSource::Builtin("lit_ps".into())
        );
        assert_eq!(
            m.shader_source("shaders/flat_ps.wgsl"),
            ShaderSource::File(PathBuf::from("/scenes/shaders/flat_ps.wgsl"))
        );
    }

    #[test]
    fn dangling_reference_is_named() {
        let mut m = parse(SCENE);
        m.entities[0].material = "marble".into();
        let err = m.validate().unwrap_err();
        assert!(matches!(
            err,
            AssetError::UnknownReference { kind: "material", ref name, .. } if name == "marble"
        ));
        assert!(err.to_string().contains("entity `box`"));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut m = parse(SCENE);
        m.meshes.push(m.meshes[0].clone());
        assert!(matches!(
            m.validate(),
            Err(AssetError::DuplicateName { kind: "mesh", .. })
        ));
    }

    #[test]
    fn sky_needs_six_faces() {
        let m = parse("sky:\n  faces: [a.png, b.png]\n");
        assert!(matches!(m.validate(), Err(AssetError::InvalidValue { .. })));
    }

    #[test]
    fn bad_values_are_rejected() {
        let mut m = parse(SCENE);
        m.active_camera = 3;
        assert!(m.validate().is_err());

        let mut m = parse(SCENE);
        m.lights.push(LightDesc::Directional {
            direction: Vec3::ZERO,
            color: Vec3::ONE,
            intensity: 1.0,
        });
        assert!(m.validate().is_err());

        let mut m = parse(SCENE);
        m.meshes[0].shape = MeshShape::Cube { size: 0.0 };
        assert!(m.validate().is_err());
    }

    #[test]
    fn unknown_shape_is_a_yaml_error() {
        let err = Manifest::from_yaml_str(
            "meshes:\n  - name: x\n    shape: torus\n",
            Path::new("bad.yaml"),
        )
        .unwrap_err();
        assert!(matches!(err, AssetError::Yaml { .. }));
        assert!(err.to_string().contains("bad.yaml"));
    }

    #[test]
    fn load_sets_base_dir_and_save_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.yaml");
        std::fs::write(&path, SCENE).unwrap();
        let m = Manifest::load(&path).unwrap();
        assert_eq!(m.base_dir, dir.path());
        assert_eq!(
            m.resolve(Path::new("textures/bricks.png")),
            dir.path().join("textures/bricks.png")
        );

        let copy = dir.path().join("copy.yaml");
        m.save(&copy).unwrap();
        let reloaded = Manifest::load(&copy).unwrap();
        assert_eq!(reloaded.entities, m.entities);
        assert_eq!(reloaded.sky, m.sky);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Manifest::load(dir.path().join("nope.yaml")),
            Err(AssetError::NotFound { .. })
        ));
    }

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("assets"));
    }
}
