use kiln_render::context::{
    AddressMode, BorderColor, CompareFunction, CullMode, DepthState, FilterMode, RasterizerState,
    SamplerDesc, ShaderId, ShaderStage,
};
use kiln_render::reflect::{ResourceKind, ShaderLayout};
use kiln_render::Vertex;
use std::num::NonZeroU64;

pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
    0 => Float32x3,
    1 => Float32x2,
    2 => Float32x3,
    3 => Float32x3
];

/// position, uv, normal, tangent.
pub fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<Vertex>() as u64,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &VERTEX_ATTRIBUTES,
    }
}

/// Everything a render pipeline is specialised on. Float state is keyed by its bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub vertex: ShaderId,
    /// `None` for depth-only draws.
    pub pixel: Option<ShaderId>,
    pub color: bool,
    pub depth: bool,
    pub cull: CullMode,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: u32,
    pub depth_bias_clamp: u32,
    pub depth_compare: CompareFunction,
    pub depth_write: bool,
}

impl PipelineKey {
    pub fn new(
        vertex: ShaderId,
        pixel: Option<ShaderId>,
        color: bool,
        depth: bool,
        rasterizer: &RasterizerState,
        depth_state: &DepthState,
    ) -> Self {
        Self {
            vertex,
            // a pixel program without a colour target writes nowhere
            pixel: pixel.filter(|_| color),
            color,
            depth,
            cull: rasterizer.cull,
            depth_bias: rasterizer.depth_bias,
            slope_scaled_depth_bias: rasterizer.slope_scaled_depth_bias.to_bits(),
            depth_bias_clamp: rasterizer.depth_bias_clamp.to_bits(),
            depth_compare: depth_state.compare,
            depth_write: depth_state.write,
        }
    }

    /// Clockwise front faces.
    pub fn primitive(&self) -> wgpu::PrimitiveState {
        wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Cw,
            cull_mode: match self.cull {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        }
    }

    pub fn depth_stencil(&self) -> Option<wgpu::DepthStencilState> {
        self.depth.then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: self.depth_write,
            depth_compare: compare(self.depth_compare),
            stencil: Default::default(),
            bias: wgpu::DepthBiasState {
                constant: self.depth_bias,
                slope_scale: f32::from_bits(self.slope_scaled_depth_bias),
                clamp: f32::from_bits(self.depth_bias_clamp),
            },
        })
    }
}

pub fn compare(function: CompareFunction) -> wgpu::CompareFunction {
    match function {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn visibility(stage: ShaderStage) -> wgpu::ShaderStages {
    match stage {
        ShaderStage::Vertex => wgpu::ShaderStages::VERTEX,
        ShaderStage::Pixel => wgpu::ShaderStages::FRAGMENT,
    }
}

/// Layout entries for a program's own bind group: its uniform block (with a
/// dynamic offset into the per-frame uniform buffer) and its resources.
pub fn bind_group_layout_entries(layout: &ShaderLayout) -> Vec<wgpu::BindGroupLayoutEntry> {
    let group = layout.stage.bind_group();
    let visibility = visibility(layout.stage);
    let mut entries = Vec::new();

    if let Some(uniform) = &layout.uniform {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: uniform.binding,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: NonZeroU64::new(u64::from(uniform.size)),
            },
            count: None,
        });
    }

    for slot in layout.resources.values().filter(|s| s.group == group) {
        let ty = match slot.kind {
            ResourceKind::Texture2d => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            ResourceKind::TextureCube => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::Cube,
                multisampled: false,
            },
            ResourceKind::DepthTexture2d => wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Depth,
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            ResourceKind::Sampler => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering)
            }
            ResourceKind::ComparisonSampler => {
                wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Comparison)
            }
        };
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: slot.binding,
            visibility,
            ty,
            count: None,
        });
    }
    entries.sort_by_key(|e| e.binding);
    entries
}

/// Device sampler settings. Without border-clamp support a border sampler
/// clamps to the edge instead.
pub fn sampler_descriptor(desc: &SamplerDesc, border_supported: bool) -> wgpu::SamplerDescriptor<'_> {
    let address = match desc.address {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        AddressMode::Border if border_supported => wgpu::AddressMode::ClampToBorder,
        AddressMode::Border => wgpu::AddressMode::ClampToEdge,
    };
    let filter = match desc.filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    };
    let border_color = (address == wgpu::AddressMode::ClampToBorder).then_some(match desc.border {
        BorderColor::TransparentBlack => wgpu::SamplerBorderColor::TransparentBlack,
        BorderColor::OpaqueBlack => wgpu::SamplerBorderColor::OpaqueBlack,
        BorderColor::OpaqueWhite => wgpu::SamplerBorderColor::OpaqueWhite,
    });
    // anisotropy needs every filter linear
    let anisotropy_clamp = if filter == wgpu::FilterMode::Linear {
        desc.max_anisotropy.clamp(1, 16)
    } else {
        1
    };
    wgpu::SamplerDescriptor {
        label: Some(desc.label.as_str()),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: filter,
        compare: desc.compare.map(compare),
        anisotropy_clamp,
        border_color,
        ..Default::default()
    }
}

pub fn color_format(srgb: bool) -> wgpu::TextureFormat {
    if srgb {
        wgpu::TextureFormat::Rgba8UnormSrgb
    } else {
        wgpu::TextureFormat::Rgba8Unorm
    }
}
