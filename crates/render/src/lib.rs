//! Renderer-agnostic core of kiln.
//!
//! Everything here talks to the GPU through [`GraphicsContext`], an immediate-mode
//! capability object passed by reference. [`HeadlessContext`] implements it without
//! a GPU for tests and the CLI; the wgpu backend lives in `kiln-render-wgpu`.
//!
//! # Invariants
//! - Shader parameters are looked up in a table reflected once at load time; a name
//!   the program does not declare is a [`BindingError`], never a silent no-op.
//! - A draw stages both parameter blocks before touching the device, so a binding
//!   error leaves the bound state as it was.
//! - Frames run Idle -> ShadowPass -> ColorPass -> Idle. The shadow pass restores
//!   the main targets, viewport and rasterizer state when it ends, on error too.
//! - The sky restores default rasterizer and depth state after drawing.

pub mod camera;
pub mod context;
pub mod entity;
pub mod error;
pub mod frame;
pub mod headless;
pub mod library;
pub mod light;
pub mod material;
pub mod mesh;
pub mod reflect;
pub mod shader;
pub mod shaders;
pub mod shadow;
pub mod sky;
pub mod texture;

pub use camera::Camera;
pub use context::{
    DepthTargetId, DeviceError, GraphicsContext, RenderTargetId, SamplerDesc, SamplerId,
    ShaderStage, TextureId,
};
pub use entity::{FrameParams, GameEntity};
pub use error::{BindingError, LoadError, RenderError};
pub use frame::{FrameRenderer, FrameReport, RenderOptions, RenderPhase};
pub use headless::HeadlessContext;
pub use library::ResourceLibrary;
pub use light::{Light, LightKind, MAX_LIGHTS};
pub use material::Material;
pub use mesh::{Mesh, MeshData, Vertex};
pub use shader::{ParameterBlock, ShaderProgram};
pub use shadow::{ShadowMap, ShadowSettings};
pub use sky::Sky;
pub use texture::{CubeFaces, TextureData};

pub fn crate_info() -> &'static str {
    "kiln-render v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("render"));
    }
}
