//! A [`GraphicsContext`] that draws nothing and records everything.
//!
//! Used by the CLI and by tests: it keeps the currently bound state, the last
//! constants uploaded per program, and a log of every draw with the state it saw.

use crate::context::{
    DepthState, DepthTarget, DepthTargetId, DeviceError, GpuMeshId, GraphicsContext,
    RasterizerState, RenderTargetId, SamplerDesc, SamplerId, ShaderId, ShaderStage, TextureId,
    Viewport,
};
use crate::mesh::Vertex;
use crate::reflect::ShaderLayout;
use crate::texture::{CubeFaces, TextureData};
use glam::Mat4;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureKind {
    Color2d,
    Cube,
    Depth,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureEntry {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
}

#[derive(Debug, Clone)]
struct MeshEntry {
    label: String,
    index_count: u32,
}

#[derive(Debug, Clone)]
struct ShaderEntry {
    layout: ShaderLayout,
    constants: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
struct DepthEntry {
    texture: Option<TextureId>,
}

/// Device state as the next draw would see it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundState {
    pub color_target: Option<RenderTargetId>,
    pub depth_target: Option<DepthTargetId>,
    pub viewport: Viewport,
    pub rasterizer: RasterizerState,
    pub depth: DepthState,
    pub vertex_shader: Option<ShaderId>,
    pub pixel_shader: Option<ShaderId>,
    pub textures: BTreeMap<(ShaderStage, u32), TextureId>,
    pub samplers: BTreeMap<(ShaderStage, u32), SamplerId>,
}

impl BoundState {
    /// Back buffer and main depth bound, default states, nothing else.
    pub fn main(width: u32, height: u32) -> Self {
        Self {
            color_target: Some(RenderTargetId::BACK_BUFFER),
            depth_target: Some(DepthTargetId::MAIN),
            viewport: Viewport::full(width, height),
            rasterizer: RasterizerState::default(),
            depth: DepthState::default(),
            vertex_shader: None,
            pixel_shader: None,
            textures: BTreeMap::new(),
            samplers: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub mesh: GpuMeshId,
    pub mesh_label: String,
    pub index_count: u32,
    pub state: BoundState,
    pub vs_constants: Vec<u8>,
    pub ps_constants: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClearRecord {
    pub color_target: Option<RenderTargetId>,
    pub color: Option<[f32; 4]>,
    pub depth_target: Option<DepthTargetId>,
    pub depth: Option<f32>,
}

#[derive(Debug)]
pub struct HeadlessContext {
    width: u32,
    height: u32,
    meshes: Vec<MeshEntry>,
    shaders: Vec<ShaderEntry>,
    textures: Vec<TextureEntry>,
    samplers: Vec<SamplerDesc>,
    depth_targets: Vec<DepthEntry>,
    bound: BoundState,
    draws: Vec<DrawRecord>,
    clears: Vec<ClearRecord>,
    last_frame: Vec<DrawRecord>,
    frames_presented: u64,
}

impl HeadlessContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            meshes: Vec::new(),
            shaders: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            // slot 0 is the main depth buffer
            depth_targets: vec![DepthEntry { texture: None }],
            bound: BoundState::main(width, height),
            draws: Vec::new(),
            clears: Vec::new(),
            last_frame: Vec::new(),
            frames_presented: 0,
        }
    }

    pub fn bound(&self) -> &BoundState {
        &self.bound
    }

    /// Draws issued since the last present.
    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Clears issued since the last present.
    pub fn clears(&self) -> &[ClearRecord] {
        &self.clears
    }

    /// Draws of the most recently presented frame.
    pub fn last_frame(&self) -> &[DrawRecord] {
        &self.last_frame
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    /// Last constant bytes uploaded for `shader`.
    pub fn constants(&self, shader: ShaderId) -> Option<&[u8]> {
        self.shaders
            .get(shader.0 as usize)
            .and_then(|s| s.constants.as_deref())
    }

    pub fn texture(&self, texture: TextureId) -> Option<&TextureEntry> {
        self.textures.get(texture.0 as usize)
    }

    pub fn sampler(&self, sampler: SamplerId) -> Option<&SamplerDesc> {
        self.samplers.get(sampler.0 as usize)
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    fn add_texture(&mut self, entry: TextureEntry) -> TextureId {
        self.textures.push(entry);
        TextureId(self.textures.len() as u32 - 1)
    }

    fn stage_constants(&self, shader: Option<ShaderId>) -> Vec<u8> {
        shader
            .and_then(|id| self.constants(id))
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    /// Validate the bound state the way a real device would reject it.
    fn check_draw(&self, mesh: GpuMeshId, index_count: u32) -> Result<&MeshEntry, DeviceError> {
        let entry = self
            .meshes
            .get(mesh.0 as usize)
            .ok_or(DeviceError::UnknownResource {
                kind: "mesh",
                id: mesh.0,
            })?;
        if index_count > entry.index_count {
            return Err(DeviceError::InvalidMesh {
                label: entry.label.clone(),
                reason: format!(
                    "draw of {index_count} indices exceeds {}",
                    entry.index_count
                ),
            });
        }
        if self.bound.vertex_shader.is_none() {
            return Err(DeviceError::MissingState("vertex shader"));
        }
        if self.bound.color_target.is_none() && self.bound.depth_target.is_none() {
            return Err(DeviceError::MissingState("render target"));
        }
        if self.bound.color_target.is_some() && self.bound.pixel_shader.is_none() {
            return Err(DeviceError::MissingState("pixel shader"));
        }
        let active_depth = self
            .bound
            .depth_target
            .and_then(|id| self.depth_targets.get(id.0 as usize))
            .and_then(|d| d.texture);
        if let Some(depth_texture) = active_depth {
            for ((stage, _), texture) in &self.bound.textures {
                let stage_active = match stage {
                    ShaderStage::Vertex => self.bound.vertex_shader.is_some(),
                    ShaderStage::Pixel => self.bound.pixel_shader.is_some(),
                };
                if stage_active && *texture == depth_texture {
                    return Err(DeviceError::ResourceHazard {
                        texture: texture.0,
                    });
                }
            }
        }
        Ok(entry)
    }
}

impl GraphicsContext for HeadlessContext {
    fn backend_name(&self) -> &str {
        "headless"
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ZeroSized {
                what: "back buffer".into(),
                width,
                height,
            });
        }
        debug!(width, height, "headless resize");
        self.width = width;
        self.height = height;
        Ok(())
    }

    fn create_mesh(
        &mut self,
        label: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<GpuMeshId, DeviceError> {
        if vertices.is_empty() || indices.is_empty() {
            return Err(DeviceError::InvalidMesh {
                label: label.to_string(),
                reason: "no geometry".into(),
            });
        }
        self.meshes.push(MeshEntry {
            label: label.to_string(),
            index_count: indices.len() as u32,
        });
        Ok(GpuMeshId(self.meshes.len() as u32 - 1))
    }

    fn create_shader(
        &mut self,
        _label: &str,
        _source: &str,
        layout: &ShaderLayout,
    ) -> Result<ShaderId, DeviceError> {
        self.shaders.push(ShaderEntry {
            layout: layout.clone(),
            constants: None,
        });
        Ok(ShaderId(self.shaders.len() as u32 - 1))
    }

    fn create_texture(
        &mut self,
        label: &str,
        data: &TextureData,
    ) -> Result<TextureId, DeviceError> {
        if data.width == 0 || data.height == 0 {
            return Err(DeviceError::ZeroSized {
                what: label.to_string(),
                width: data.width,
                height: data.height,
            });
        }
        if !data.is_consistent() {
            return Err(DeviceError::InvalidTexture {
                label: label.to_string(),
                reason: "pixel buffer does not match dimensions".into(),
            });
        }
        Ok(self.add_texture(TextureEntry {
            label: label.to_string(),
            width: data.width,
            height: data.height,
            kind: TextureKind::Color2d,
        }))
    }

    fn create_cubemap(
        &mut self,
        label: &str,
        faces: &CubeFaces,
    ) -> Result<TextureId, DeviceError> {
        let size = faces.size();
        Ok(self.add_texture(TextureEntry {
            label: label.to_string(),
            width: size,
            height: size,
            kind: TextureKind::Cube,
        }))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        self.samplers.push(desc.clone());
        Ok(SamplerId(self.samplers.len() as u32 - 1))
    }

    fn create_depth_target(
        &mut self,
        label: &str,
        width: u32,
        height: u32,
    ) -> Result<DepthTarget, DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ZeroSized {
                what: label.to_string(),
                width,
                height,
            });
        }
        let texture = self.add_texture(TextureEntry {
            label: label.to_string(),
            width,
            height,
            kind: TextureKind::Depth,
        });
        self.depth_targets.push(DepthEntry {
            texture: Some(texture),
        });
        Ok(DepthTarget {
            id: DepthTargetId(self.depth_targets.len() as u32 - 1),
            texture,
            width,
            height,
        })
    }

    fn set_render_targets(&mut self, color: Option<RenderTargetId>, depth: Option<DepthTargetId>) {
        self.bound.color_target = color;
        self.bound.depth_target = depth;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.bound.viewport = viewport;
    }

    fn set_rasterizer_state(&mut self, state: RasterizerState) {
        self.bound.rasterizer = state;
    }

    fn set_depth_state(&mut self, state: DepthState) {
        self.bound.depth = state;
    }

    fn set_shader(&mut self, stage: ShaderStage, shader: Option<ShaderId>) {
        match stage {
            ShaderStage::Vertex => self.bound.vertex_shader = shader,
            ShaderStage::Pixel => self.bound.pixel_shader = shader,
        }
    }

    fn upload_constants(&mut self, shader: ShaderId, data: &[u8]) -> Result<(), DeviceError> {
        let entry = self
            .shaders
            .get_mut(shader.0 as usize)
            .ok_or(DeviceError::UnknownResource {
                kind: "shader",
                id: shader.0,
            })?;
        let expected = entry.layout.uniform_size() as usize;
        if data.len() != expected {
            return Err(DeviceError::Backend(format!(
                "constant upload of {} bytes, program expects {expected}",
                data.len()
            )));
        }
        entry.constants = Some(data.to_vec());
        Ok(())
    }

    fn bind_texture(&mut self, stage: ShaderStage, binding: u32, texture: TextureId) {
        self.bound.textures.insert((stage, binding), texture);
    }

    fn bind_sampler(&mut self, stage: ShaderStage, binding: u32, sampler: SamplerId) {
        self.bound.samplers.insert((stage, binding), sampler);
    }

    fn clear_render_target(&mut self, target: RenderTargetId, color: [f32; 4]) {
        self.clears.push(ClearRecord {
            color_target: Some(target),
            color: Some(color),
            depth_target: None,
            depth: None,
        });
    }

    fn clear_depth(&mut self, target: DepthTargetId, depth: f32) {
        self.clears.push(ClearRecord {
            color_target: None,
            color: None,
            depth_target: Some(target),
            depth: Some(depth),
        });
    }

    fn draw_indexed(&mut self, mesh: GpuMeshId, index_count: u32) -> Result<(), DeviceError> {
        let mesh_label = self.check_draw(mesh, index_count)?.label.clone();
        let record = DrawRecord {
            mesh,
            mesh_label,
            index_count,
            state: self.bound.clone(),
            vs_constants: self.stage_constants(self.bound.vertex_shader),
            ps_constants: self.stage_constants(self.bound.pixel_shader),
        };
        self.draws.push(record);
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        self.last_frame = std::mem::take(&mut self.draws);
        self.clears.clear();
        self.frames_presented += 1;
        self.bound.color_target = Some(RenderTargetId::BACK_BUFFER);
        self.bound.depth_target = Some(DepthTargetId::MAIN);
        self.bound.viewport = Viewport::full(self.width, self.height);
        Ok(())
    }
}

/// Read a column-major `mat4x4<f32>` at `offset`.
pub fn read_mat4(bytes: &[u8], offset: usize) -> Mat4 {
    let mut cols = [0.0f32; 16];
    for (i, value) in cols.iter_mut().enumerate() {
        let at = offset + i * 4;
        *value = bytemuck::pod_read_unaligned(&bytes[at..at + 4]);
    }
    Mat4::from_cols_array(&cols)
}
