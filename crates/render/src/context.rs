use crate::mesh::Vertex;
use crate::reflect::ShaderLayout;
use crate::texture::{CubeFaces, TextureData};

/// GPU mesh buffers (vertex + index) owned by a graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GpuMeshId(pub u32);

/// A compiled shader program owned by a graphics context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// A sampleable texture (2D, cube or depth).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SamplerId(pub u32);

/// A depth attachment. `MAIN` is the window's depth buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepthTargetId(pub u32);

impl DepthTargetId {
    pub const MAIN: Self = Self(0);
}

/// A colour attachment. Only the back buffer exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetId(pub u32);

impl RenderTargetId {
    pub const BACK_BUFFER: Self = Self(0);
}

/// Pipeline stage a shader program or resource binding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

impl ShaderStage {
    /// Bind group index the stage's uniform block and resources live in.
    pub fn bind_group(self) -> u32 {
        match self {
            ShaderStage::Vertex => 0,
            ShaderStage::Pixel => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// Viewport covering a whole `width` x `height` target.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width as u32, self.height as u32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Rasterizer state. `Default` is back-face culling with no depth bias.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RasterizerState {
    pub cull: CullMode,
    /// Constant depth bias in depth-buffer units.
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_bias_clamp: f32,
}

impl RasterizerState {
    pub fn cull_front() -> Self {
        Self {
            cull: CullMode::Front,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Depth test state. `Default` is `Less` with depth writes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthState {
    pub compare: CompareFunction,
    pub write: bool,
}

impl Default for DepthState {
    fn default() -> Self {
        Self {
            compare: CompareFunction::Less,
            write: true,
        }
    }
}

impl DepthState {
    pub fn less_equal() -> Self {
        Self {
            compare: CompareFunction::LessEqual,
            write: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Clamp,
    Border,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderColor {
    TransparentBlack,
    OpaqueBlack,
    OpaqueWhite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SamplerDesc {
    pub label: String,
    pub filter: FilterMode,
    pub address: AddressMode,
    pub border: BorderColor,
    /// `Some` makes this a comparison sampler.
    pub compare: Option<CompareFunction>,
    pub max_anisotropy: u16,
}

impl SamplerDesc {
    /// Trilinear, wrapping, 16x anisotropic: the sampler most materials use.
    pub fn linear_wrap(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            filter: FilterMode::Linear,
            address: AddressMode::Wrap,
            border: BorderColor::OpaqueBlack,
            compare: None,
            max_anisotropy: 16,
        }
    }

    /// Comparison sampler for shadow lookups. Samples outside the map hit a white
    /// border, i.e. far depth, so they read as lit.
    pub fn shadow_comparison(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            filter: FilterMode::Linear,
            address: AddressMode::Border,
            border: BorderColor::OpaqueWhite,
            compare: Some(CompareFunction::LessEqual),
            max_anisotropy: 1,
        }
    }

    pub fn is_comparison(&self) -> bool {
        self.compare.is_some()
    }
}

/// A depth attachment together with the texture view used to sample it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthTarget {
    pub id: DepthTargetId,
    pub texture: TextureId,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("unknown {kind} id {id}")]
    UnknownResource { kind: &'static str, id: u32 },

    #[error("{what} has zero size ({width}x{height})")]
    ZeroSized {
        what: String,
        width: u32,
        height: u32,
    },

    #[error("invalid mesh `{label}`: {reason}")]
    InvalidMesh { label: String, reason: String },

    #[error("invalid texture `{label}`: {reason}")]
    InvalidTexture { label: String, reason: String },

    #[error("draw issued without a {0} bound")]
    MissingState(&'static str),

    #[error("texture {texture} is bound for sampling while it is the active depth target")]
    ResourceHazard { texture: u32 },

    #[error("graphics backend: {0}")]
    Backend(String),
}

/// Capability object for everything the core asks of the graphics device.
///
/// Modelled on an immediate-mode device context: bound state (targets, viewport,
/// rasterizer and depth state, shaders, textures and samplers per stage, uploaded
/// constants) persists until it is overwritten. A backend may record commands and
/// execute them later, but draws must observe state exactly as it was bound when
/// `draw_indexed` was called.
pub trait GraphicsContext {
    fn backend_name(&self) -> &str;

    /// Size of the back buffer and main depth buffer.
    fn surface_size(&self) -> (u32, u32);

    /// Resize the back buffer and main depth buffer.
    fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError>;

    fn create_mesh(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<GpuMeshId, DeviceError>;

    /// Compile a WGSL program. `layout` is its reflected parameter table.
    fn create_shader(
        &mut self,
        label: &str,
        source: &str,
        layout: &ShaderLayout,
    ) -> Result<ShaderId, DeviceError>;

    fn create_texture(&mut self, label: &str, data: &TextureData)
    -> Result<TextureId, DeviceError>;

    /// Build a cubemap from six faces in +X, -X, +Y, -Y, +Z, -Z order.
    fn create_cubemap(&mut self, label: &str, faces: &CubeFaces)
    -> Result<TextureId, DeviceError>;

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError>;

    /// Create an off-screen depth target that can later be sampled.
    fn create_depth_target(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<DepthTarget, DeviceError>;

    fn set_render_targets(&mut self, color: Option<RenderTargetId>, depth: Option<DepthTargetId>);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_rasterizer_state(&mut self, state: RasterizerState);
    fn set_depth_state(&mut self, state: DepthState);

    /// Bind (or with `None`, unbind) the program for a stage.
    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderId>);

    /// Replace the constant buffer contents of `shader`.
    fn upload_constants(&mut self, shader: ShaderId, data: &[u8]) -> Result<(), DeviceError>;

    fn bind_texture(&mut self, stage: ShaderStage, binding: u32, texture: TextureId);
    fn bind_sampler(&mut self, stage: ShaderStage, binding: u32, sampler: SamplerId);

    fn clear_render_target(&mut self, target: RenderTargetId, color: [f32; 4]);
    fn clear_depth(&mut self, target: DepthTargetId, depth: f32);

    /// Draw the first `index_count` indices of `mesh` with the bound state.
    fn draw_indexed(&mut self, mesh: GpuMeshId, index_count: u32) -> Result<(), DeviceError>;

    /// Finish the frame. Afterwards the back buffer and main depth buffer are bound again.
    fn present(&mut self) -> Result<(), DeviceError>;
}
