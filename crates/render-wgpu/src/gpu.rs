use crate::commands::{
    clamp_viewport, plan_passes, Command, DrawCommand, GroupKey, PassPlan, ResourceRef,
    StageBinding,
};
use crate::pipeline::{self, PipelineKey, DEPTH_FORMAT};
use crate::uniforms::UniformArena;
use kiln_render::context::{
    DepthState, DepthTarget, DepthTargetId, DeviceError, GpuMeshId, GraphicsContext,
    RasterizerState, RenderTargetId, SamplerDesc, SamplerId, ShaderId, ShaderStage, TextureId,
    Viewport,
};
use kiln_render::headless::{BoundState, TextureKind};
use kiln_render::reflect::{ResourceKind, ShaderLayout};
use kiln_render::{CubeFaces, TextureData, Vertex};
use std::collections::HashMap;
use std::num::NonZeroU64;
use tracing::{debug, error, info, warn};
use wgpu::util::DeviceExt;

const INITIAL_UNIFORM_CAPACITY: u64 = 64 * 1024;

struct MeshEntry {
    label: String,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

struct ShaderEntry {
    label: String,
    module: wgpu::ShaderModule,
    layout: ShaderLayout,
    group_layout: wgpu::BindGroupLayout,
}

struct TextureEntry {
    label: String,
    view: wgpu::TextureView,
    kind: TextureKind,
}

struct SamplerEntry {
    sampler: wgpu::Sampler,
    comparison: bool,
}

struct DepthEntry {
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    /// Texture id of the sampleable view, if any. The main depth buffer has none.
    sampled: Option<TextureId>,
}

/// Resources unbound slots read: white colour and cube textures, a depth
/// texture at far depth, and one sampler of each kind.
struct Fallbacks {
    color: wgpu::TextureView,
    cube: wgpu::TextureView,
    depth: wgpu::TextureView,
    sampler: wgpu::Sampler,
    comparison: wgpu::Sampler,
}

struct Overlay {
    primitives: Vec<egui::ClippedPrimitive>,
    pixels_per_point: f32,
}

/// [`GraphicsContext`] on a wgpu device and window surface.
///
/// Calls record commands against the bound state; `present` uploads the
/// frame's constants, groups the draws into render passes, draws the egui
/// overlay on top and presents the surface.
pub struct WgpuContext {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    backend: String,
    border_supported: bool,

    meshes: Vec<MeshEntry>,
    shaders: Vec<ShaderEntry>,
    textures: Vec<TextureEntry>,
    samplers: Vec<SamplerEntry>,
    depth_targets: Vec<DepthEntry>,
    fallbacks: Fallbacks,

    bound: BoundState,
    commands: Vec<Command>,
    arena: UniformArena,
    /// Offset of each program's latest constants in `arena`.
    frame_constants: HashMap<ShaderId, u32>,
    uniform_buffer: wgpu::Buffer,
    uniform_capacity: u64,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    bind_groups: HashMap<GroupKey, wgpu::BindGroup>,

    egui_renderer: egui_wgpu::Renderer,
    overlay: Option<Overlay>,
    overlay_frees: Vec<egui::TextureId>,
}

impl WgpuContext {
    /// Create a device for `target` and configure its surface at `width` x `height`.
    pub async fn new(
        target: impl Into<wgpu::SurfaceTarget<'static>>,
        width: u32,
        height: u32,
    ) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(target)
            .map_err(|e| DeviceError::Backend(format!("create surface: {e}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| DeviceError::Backend("no compatible graphics adapter".into()))?;

        let border = adapter.features() & wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("kiln_device"),
                    required_features: border,
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| DeviceError::Backend(format!("request device: {e}")))?;

        let caps = surface.get_capabilities(&adapter);
        let format = caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(caps.formats.first())
            .copied()
            .ok_or_else(|| DeviceError::Backend("surface reports no formats".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: width.max(1),
            height: height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let backend = adapter.get_info().backend.to_str().to_string();
        info!(
            backend = %backend,
            adapter = %adapter.get_info().name,
            ?format,
            border_clamp = !border.is_empty(),
            "wgpu device ready"
        );

        let alignment = device.limits().min_uniform_buffer_offset_alignment;
        let uniform_buffer = create_uniform_buffer(&device, INITIAL_UNIFORM_CAPACITY);
        let fallbacks = create_fallbacks(&device, &queue);
        let main_depth = create_depth(&device, "main_depth", config.width, config.height, false)
            .create_view(&wgpu::TextureViewDescriptor::default());
        let egui_renderer = egui_wgpu::Renderer::new(&device, format, None, 1, false);

        Ok(Self {
            surface,
            device,
            queue,
            bound: BoundState::main(config.width, config.height),
            config,
            backend,
            border_supported: !border.is_empty(),
            meshes: Vec::new(),
            shaders: Vec::new(),
            textures: Vec::new(),
            samplers: Vec::new(),
            depth_targets: vec![DepthEntry {
                view: main_depth,
                width: width.max(1),
                height: height.max(1),
                sampled: None,
            }],
            fallbacks,
            commands: Vec::new(),
            arena: UniformArena::new(alignment),
            frame_constants: HashMap::new(),
            uniform_buffer,
            uniform_capacity: INITIAL_UNIFORM_CAPACITY,
            pipelines: HashMap::new(),
            bind_groups: HashMap::new(),
            egui_renderer,
            overlay: None,
            overlay_frees: Vec::new(),
        })
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.config.format
    }

    /// Queue egui output to be drawn over the next presented frame.
    pub fn paint_overlay(
        &mut self,
        primitives: Vec<egui::ClippedPrimitive>,
        textures: &egui::TexturesDelta,
        pixels_per_point: f32,
    ) {
        for (id, delta) in &textures.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }
        self.overlay_frees.extend(textures.free.iter().copied());
        self.overlay = Some(Overlay {
            primitives,
            pixels_per_point,
        });
    }

    /// Drop everything recorded since the last present, e.g. after a failed frame.
    pub fn discard_frame(&mut self) {
        if !self.commands.is_empty() {
            debug!(commands = self.commands.len(), "discarding recorded frame");
        }
        self.end_frame();
    }

    fn shader(&self, id: ShaderId) -> Result<&ShaderEntry, DeviceError> {
        self.shaders
            .get(id.0 as usize)
            .ok_or(DeviceError::UnknownResource {
                kind: "shader",
                id: id.0,
            })
    }

    fn add_texture(&mut self, label: &str, view: wgpu::TextureView, kind: TextureKind) -> TextureId {
        self.textures.push(TextureEntry {
            label: label.to_string(),
            view,
            kind,
        });
        TextureId(self.textures.len() as u32 - 1)
    }

    /// One texture with a layer per entry of `faces`.
    fn upload(&self, label: &str, faces: &[&TextureData]) -> wgpu::Texture {
        let width = faces.first().map_or(1, |f| f.width);
        let height = faces.first().map_or(1, |f| f.height);
        let srgb = faces.first().map_or(true, |f| f.srgb);
        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: faces.len() as u32,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: pipeline::color_format(srgb),
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        for (layer, face) in faces.iter().enumerate() {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: layer as u32,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                &face.pixels,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(4 * face.width),
                    rows_per_image: Some(face.height),
                },
                wgpu::Extent3d {
                    width: face.width,
                    height: face.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        texture
    }

    /// Reject draws a real device would reject or that would read garbage.
    fn check_draw(&self, mesh: GpuMeshId, index_count: u32) -> Result<(), DeviceError> {
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
        if let Some(target) = self.bound.color_target {
            if target != RenderTargetId::BACK_BUFFER {
                return Err(DeviceError::UnknownResource {
                    kind: "render target",
                    id: target.0,
                });
            }
        }
        let depth = match self.bound.depth_target {
            Some(id) => Some(self.depth_targets.get(id.0 as usize).ok_or(
                DeviceError::UnknownResource {
                    kind: "depth target",
                    id: id.0,
                },
            )?),
            None => None,
        };
        if let Some(texture) = sampling_hazard(&self.bound, depth.and_then(|d| d.sampled)) {
            return Err(DeviceError::ResourceHazard { texture: texture.0 });
        }
        Ok(())
    }

    /// Resources and constants one stage's program sees at this draw.
    fn stage_binding(&mut self, stage: ShaderStage, shader: ShaderId) -> Result<StageBinding, DeviceError> {
        let entry = self.shader(shader)?;
        let resources = resolve_resources(
            &entry.layout,
            &self.bound,
            |id| self.textures.get(id.0 as usize).map(|t| (t.label.as_str(), t.kind)),
            |id| self.samplers.get(id.0 as usize).map(|s| s.comparison),
        )?;
        let uniform_size = entry.layout.uniform.as_ref().map(|u| u.size as usize);

        let offset = match uniform_size {
            Some(size) => Some(match self.frame_constants.get(&shader) {
                Some(offset) => *offset,
                None => {
                    // never uploaded this frame: the program reads zeros
                    let offset = self.arena.push(&vec![0; size]);
                    self.frame_constants.insert(shader, offset);
                    offset
                }
            }),
            None => None,
        };
        Ok(StageBinding {
            group: GroupKey { shader, resources },
            offset,
        })
    }

    fn ensure_pipeline(&mut self, key: &PipelineKey) -> Result<(), DeviceError> {
        if self.pipelines.contains_key(key) {
            return Ok(());
        }
        let vs = self.shader(key.vertex)?;
        let ps = key.pixel.map(|id| self.shader(id)).transpose()?;
        let label = match ps {
            Some(ps) => format!("{}+{}", vs.label, ps.label),
            None => format!("{} (depth only)", vs.label),
        };

        let mut group_layouts = vec![&vs.group_layout];
        group_layouts.extend(ps.map(|ps| &ps.group_layout));
        let targets = [Some(wgpu::ColorTargetState {
            format: self.config.format,
            blend: Some(wgpu::BlendState::REPLACE),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label.as_str()),
                bind_group_layouts: &group_layouts,
                push_constant_ranges: &[],
            });
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label.as_str()),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &vs.module,
                    entry_point: Some(vs.layout.entry_point.as_str()),
                    compilation_options: Default::default(),
                    buffers: &[pipeline::vertex_layout()],
                },
                primitive: key.primitive(),
                depth_stencil: key.depth_stencil(),
                multisample: wgpu::MultisampleState::default(),
                fragment: ps.map(|ps| wgpu::FragmentState {
                    module: &ps.module,
                    entry_point: Some(ps.layout.entry_point.as_str()),
                    compilation_options: Default::default(),
                    targets: &targets,
                }),
                multiview: None,
                cache: None,
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Backend(format!("pipeline `{label}`: {err}")));
        }
        debug!(pipeline = %label, "created render pipeline");
        self.pipelines.insert(*key, pipeline);
        Ok(())
    }

    fn ensure_bind_group(&mut self, key: &GroupKey) -> Result<(), DeviceError> {
        if self.bind_groups.contains_key(key) {
            return Ok(());
        }
        let shader = self
            .shaders
            .get(key.shader.0 as usize)
            .ok_or(DeviceError::UnknownResource {
                kind: "shader",
                id: key.shader.0,
            })?;

        let mut entries = Vec::with_capacity(key.resources.len() + 1);
        if let Some(uniform) = &shader.layout.uniform {
            entries.push(wgpu::BindGroupEntry {
                binding: uniform.binding,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &self.uniform_buffer,
                    offset: 0,
                    size: NonZeroU64::new(u64::from(uniform.size)),
                }),
            });
        }
        for (binding, resource) in &key.resources {
            let resource = match resource {
                ResourceRef::Texture(id) => wgpu::BindingResource::TextureView(
                    &self
                        .textures
                        .get(id.0 as usize)
                        .ok_or(DeviceError::UnknownResource {
                            kind: "texture",
                            id: id.0,
                        })?
                        .view,
                ),
                ResourceRef::Sampler(id) => wgpu::BindingResource::Sampler(
                    &self
                        .samplers
                        .get(id.0 as usize)
                        .ok_or(DeviceError::UnknownResource {
                            kind: "sampler",
                            id: id.0,
                        })?
                        .sampler,
                ),
                ResourceRef::FallbackTexture(kind) => {
                    wgpu::BindingResource::TextureView(match kind {
                        ResourceKind::TextureCube => &self.fallbacks.cube,
                        ResourceKind::DepthTexture2d => &self.fallbacks.depth,
                        _ => &self.fallbacks.color,
                    })
                }
                ResourceRef::FallbackSampler { comparison } => {
                    wgpu::BindingResource::Sampler(if *comparison {
                        &self.fallbacks.comparison
                    } else {
                        &self.fallbacks.sampler
                    })
                }
            };
            entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }
        entries.sort_by_key(|e| e.binding);

        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(shader.label.as_str()),
            layout: &shader.group_layout,
            entries: &entries,
        });
        self.bind_groups.insert(key.clone(), group);
        Ok(())
    }

    /// Copy the frame's constants into the uniform buffer, growing it if needed.
    fn upload_uniforms(&mut self) {
        let needed = self.arena.len() as u64;
        if needed > self.uniform_capacity {
            let capacity = needed.next_power_of_two();
            debug!(capacity, "growing uniform buffer");
            self.uniform_buffer = create_uniform_buffer(&self.device, capacity);
            self.uniform_capacity = capacity;
            // every cached group points at the old buffer
            self.bind_groups.clear();
        }
        if !self.arena.is_empty() {
            self.queue
                .write_buffer(&self.uniform_buffer, 0, self.arena.bytes());
        }
    }

    fn attachment_size(&self, pass: &PassPlan) -> (u32, u32) {
        let mut size = (u32::MAX, u32::MAX);
        if pass.color.is_some() {
            size = (self.config.width, self.config.height);
        }
        if let Some(depth) = pass.depth.and_then(|id| self.depth_targets.get(id.0 as usize)) {
            size = (size.0.min(depth.width), size.1.min(depth.height));
        }
        size
    }

    fn encode_pass(&self, encoder: &mut wgpu::CommandEncoder, surface: &wgpu::TextureView, pass: &PassPlan) {
        let color_attachment = pass.color.map(|_| wgpu::RenderPassColorAttachment {
            view: surface,
            resolve_target: None,
            ops: wgpu::Operations {
                load: match pass.clear_color {
                    Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                        r: f64::from(r),
                        g: f64::from(g),
                        b: f64::from(b),
                        a: f64::from(a),
                    }),
                    None => wgpu::LoadOp::Load,
                },
                store: wgpu::StoreOp::Store,
            },
        });
        let depth_attachment = pass
            .depth
            .and_then(|id| self.depth_targets.get(id.0 as usize))
            .map(|depth| wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: pass
                        .clear_depth
                        .map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(if pass.color.is_some() { "color_pass" } else { "depth_pass" }),
            color_attachments: &[color_attachment],
            depth_stencil_attachment: depth_attachment,
            ..Default::default()
        });

        let (width, height) = self.attachment_size(pass);
        for draw in &pass.draws {
            self.encode_draw(&mut render_pass, draw, width, height);
        }
    }

    fn encode_draw(&self, pass: &mut wgpu::RenderPass<'_>, draw: &DrawCommand, width: u32, height: u32) {
        let (Some(pipeline), Some(mesh)) = (
            self.pipelines.get(&draw.pipeline),
            self.meshes.get(draw.mesh.0 as usize),
        ) else {
            warn!(mesh = draw.mesh.0, "draw lost its pipeline or mesh");
            return;
        };
        let Some(vp) = clamp_viewport(draw.viewport, width, height) else {
            debug!(mesh = %mesh.label, "draw outside its attachment skipped");
            return;
        };

        pass.set_pipeline(pipeline);
        pass.set_viewport(vp.x, vp.y, vp.width, vp.height, vp.min_depth, vp.max_depth);
        for (stage, binding) in [(ShaderStage::Vertex, Some(&draw.vertex)), (ShaderStage::Pixel, draw.pixel.as_ref())] {
            let Some(binding) = binding else { continue };
            let Some(group) = self.bind_groups.get(&binding.group) else {
                warn!(?stage, "bind group missing at encode");
                return;
            };
            let offsets: &[u32] = match &binding.offset {
                Some(offset) => std::slice::from_ref(offset),
                None => &[],
            };
            pass.set_bind_group(stage.bind_group(), group, offsets);
        }
        pass.set_vertex_buffer(0, mesh.vertices.slice(..));
        pass.set_index_buffer(mesh.indices.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..draw.index_count, 0, 0..1);
    }

    fn paint_egui(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, overlay: &Overlay) -> Vec<wgpu::CommandBuffer> {
        let screen = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: overlay.pixels_per_point,
        };
        let extra = self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &overlay.primitives,
            &screen,
        );
        let mut pass = encoder
            .begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                ..Default::default()
            })
            .forget_lifetime();
        self.egui_renderer
            .render(&mut pass, &overlay.primitives, &screen);
        extra
    }

    /// Forget the frame's recorded work and rebind the main targets.
    fn end_frame(&mut self) {
        self.commands.clear();
        self.arena.clear();
        self.frame_constants.clear();
        self.overlay = None;
        for id in self.overlay_frees.drain(..) {
            self.egui_renderer.free_texture(&id);
        }
        self.bound.color_target = Some(RenderTargetId::BACK_BUFFER);
        self.bound.depth_target = Some(DepthTargetId::MAIN);
        self.bound.viewport = Viewport::full(self.config.width, self.config.height);
    }

    fn render_frame(&mut self, frame: &wgpu::SurfaceTexture) -> Result<(), DeviceError> {
        self.upload_uniforms();

        let commands = std::mem::take(&mut self.commands);
        for command in &commands {
            if let Command::Draw(draw) = command {
                self.ensure_bind_group(&draw.vertex.group)?;
                if let Some(pixel) = &draw.pixel {
                    self.ensure_bind_group(&pixel.group)?;
                }
            }
        }

        let view = frame
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame_encoder"),
            });
        let passes = plan_passes(&commands);
        for pass in &passes {
            self.encode_pass(&mut encoder, &view, pass);
        }
        let extra = match self.overlay.take() {
            Some(overlay) => self.paint_egui(&mut encoder, &view, &overlay),
            None => Vec::new(),
        };
        self.queue
            .submit(extra.into_iter().chain(std::iter::once(encoder.finish())));
        debug!(passes = passes.len(), commands = commands.len(), "frame submitted");
        Ok(())
    }
}

impl GraphicsContext for WgpuContext {
    fn backend_name(&self) -> &str {
        &self.backend
    }

    fn surface_size(&self) -> (u32, u32) {
        (self.config.width, self.config.height)
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if width == 0 || height == 0 {
            return Err(DeviceError::ZeroSized {
                what: "back buffer".into(),
                width,
                height,
            });
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        let view = create_depth(&self.device, "main_depth", width, height, false)
            .create_view(&wgpu::TextureViewDescriptor::default());
        self.depth_targets[0] = DepthEntry {
            view,
            width,
            height,
            sampled: None,
        };
        debug!(width, height, "surface resized");
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
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        self.meshes.push(MeshEntry {
            label: label.to_string(),
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count: indices.len() as u32,
        });
        Ok(GpuMeshId(self.meshes.len() as u32 - 1))
    }

    fn create_shader(
        &mut self,
        label: &str,
        source: &str,
        layout: &ShaderLayout,
    ) -> Result<ShaderId, DeviceError> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let group_layout = self
            .device
            .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries: &pipeline::bind_group_layout_entries(layout),
            });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::Backend(format!("shader `{label}`: {err}")));
        }
        debug!(shader = label, stage = ?layout.stage, "compiled shader module");
        self.shaders.push(ShaderEntry {
            label: label.to_string(),
            module,
            layout: layout.clone(),
            group_layout,
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
        let texture = self.upload(label, &[data]);
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(self.add_texture(label, view, TextureKind::Color2d))
    }

    fn create_cubemap(
        &mut self,
        label: &str,
        faces: &CubeFaces,
    ) -> Result<TextureId, DeviceError> {
        let faces: Vec<&TextureData> = faces.faces().iter().collect();
        let texture = self.upload(label, &faces);
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(label),
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        });
        Ok(self.add_texture(label, view, TextureKind::Cube))
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, DeviceError> {
        if desc.address == kiln_render::context::AddressMode::Border && !self.border_supported {
            debug!(sampler = %desc.label, "border addressing unsupported, clamping to edge");
        }
        let sampler = self
            .device
            .create_sampler(&pipeline::sampler_descriptor(desc, self.border_supported));
        self.samplers.push(SamplerEntry {
            sampler,
            comparison: desc.is_comparison(),
        });
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
        let depth = create_depth(&self.device, label, width, height, true);
        let view = depth.create_view(&wgpu::TextureViewDescriptor::default());
        let sampled = depth.create_view(&wgpu::TextureViewDescriptor::default());
        let texture = self.add_texture(label, sampled, TextureKind::Depth);
        self.depth_targets.push(DepthEntry {
            view,
            width,
            height,
            sampled: Some(texture),
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
        let expected = self.shader(shader)?.layout.uniform_size() as usize;
        if data.len() != expected {
            return Err(DeviceError::Backend(format!(
                "constant upload of {} bytes, program expects {expected}",
                data.len()
            )));
        }
        let offset = self.arena.push(data);
        self.frame_constants.insert(shader, offset);
        Ok(())
    }

    fn bind_texture(&mut self, stage: ShaderStage, binding: u32, texture: TextureId) {
        self.bound.textures.insert((stage, binding), texture);
    }

    fn bind_sampler(&mut self, stage: ShaderStage, binding: u32, sampler: SamplerId) {
        self.bound.samplers.insert((stage, binding), sampler);
    }

    fn clear_render_target(&mut self, target: RenderTargetId, color: [f32; 4]) {
        self.commands.push(Command::ClearColor { target, color });
    }

    fn clear_depth(&mut self, target: DepthTargetId, depth: f32) {
        self.commands.push(Command::ClearDepth { target, depth });
    }

    fn draw_indexed(&mut self, mesh: GpuMeshId, index_count: u32) -> Result<(), DeviceError> {
        self.check_draw(mesh, index_count)?;
        let vertex_shader = self
            .bound
            .vertex_shader
            .ok_or(DeviceError::MissingState("vertex shader"))?;
        let color = self.bound.color_target;
        let pixel_shader = self.bound.pixel_shader.filter(|_| color.is_some());

        let vertex = self.stage_binding(ShaderStage::Vertex, vertex_shader)?;
        let pixel = pixel_shader
            .map(|id| self.stage_binding(ShaderStage::Pixel, id))
            .transpose()?;
        let key = PipelineKey::new(
            vertex_shader,
            pixel_shader,
            color.is_some(),
            self.bound.depth_target.is_some(),
            &self.bound.rasterizer,
            &self.bound.depth,
        );
        self.ensure_pipeline(&key)?;

        self.commands.push(Command::Draw(DrawCommand {
            pipeline: key,
            color,
            depth: self.bound.depth_target,
            viewport: self.bound.viewport,
            mesh,
            index_count,
            vertex,
            pixel,
        }));
        Ok(())
    }

    fn present(&mut self) -> Result<(), DeviceError> {
        let frame = match self.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                warn!("surface lost or outdated, reconfiguring and dropping the frame");
                self.surface.configure(&self.device, &self.config);
                self.end_frame();
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                warn!("surface timed out, dropping the frame");
                self.end_frame();
                return Ok(());
            }
            Err(e) => {
                error!("surface error: {e}");
                self.end_frame();
                return Err(DeviceError::Backend(format!("acquire frame: {e}")));
            }
        };

        let result = self.render_frame(&frame);
        if result.is_ok() {
            frame.present();
        }
        self.end_frame();
        result
    }
}

/// First texture an active stage samples that is also the bound depth target.
fn sampling_hazard(bound: &BoundState, depth_texture: Option<TextureId>) -> Option<TextureId> {
    let depth_texture = depth_texture?;
    bound
        .textures
        .iter()
        .find(|((stage, _), texture)| {
            let active = match stage {
                ShaderStage::Vertex => bound.vertex_shader.is_some(),
                ShaderStage::Pixel => bound.pixel_shader.is_some(),
            };
            active && **texture == depth_texture
        })
        .map(|(_, texture)| *texture)
}

fn kind_matches(slot: ResourceKind, texture: TextureKind) -> bool {
    matches!(
        (slot, texture),
        (ResourceKind::Texture2d, TextureKind::Color2d)
            | (ResourceKind::TextureCube, TextureKind::Cube)
            | (ResourceKind::DepthTexture2d, TextureKind::Depth)
    )
}

/// Map every resource slot of `layout` to what is bound there, or to a
/// fallback when nothing is. A bound resource of the wrong kind is an error.
fn resolve_resources<'a>(
    layout: &ShaderLayout,
    bound: &BoundState,
    texture: impl Fn(TextureId) -> Option<(&'a str, TextureKind)>,
    sampler_is_comparison: impl Fn(SamplerId) -> Option<bool>,
) -> Result<Vec<(u32, ResourceRef)>, DeviceError> {
    let stage = layout.stage;
    let mut resources = Vec::with_capacity(layout.resources.len());
    for (name, slot) in &layout.resources {
        let key = (stage, slot.binding);
        let resource = if slot.kind.is_texture() {
            match bound.textures.get(&key) {
                Some(&id) => {
                    let (label, kind) = texture(id).ok_or(DeviceError::UnknownResource {
                        kind: "texture",
                        id: id.0,
                    })?;
                    if !kind_matches(slot.kind, kind) {
                        return Err(DeviceError::InvalidTexture {
                            label: label.to_string(),
                            reason: format!(
                                "bound to `{name}`, which expects a {}",
                                slot.kind.describe()
                            ),
                        });
                    }
                    ResourceRef::Texture(id)
                }
                None => ResourceRef::FallbackTexture(slot.kind),
            }
        } else {
            let comparison = slot.kind == ResourceKind::ComparisonSampler;
            match bound.samplers.get(&key) {
                Some(&id) => {
                    let is_comparison =
                        sampler_is_comparison(id).ok_or(DeviceError::UnknownResource {
                            kind: "sampler",
                            id: id.0,
                        })?;
                    if is_comparison != comparison {
                        return Err(DeviceError::Backend(format!(
                            "sampler {} bound to `{name}`, which expects a {}",
                            id.0,
                            slot.kind.describe()
                        )));
                    }
                    ResourceRef::Sampler(id)
                }
                None => ResourceRef::FallbackSampler { comparison },
            }
        };
        resources.push((slot.binding, resource));
    }
    Ok(resources)
}

fn create_uniform_buffer(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("frame_uniforms"),
        size,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// A depth texture, sampleable when `sampled`.
fn create_depth(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    sampled: bool,
) -> wgpu::Texture {
    let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
    if sampled {
        usage |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage,
        view_formats: &[],
    })
}

fn create_fallbacks(device: &wgpu::Device, queue: &wgpu::Queue) -> Fallbacks {
    let white = [255u8; 4];
    let color = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("fallback_white"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &white,
    );
    let cube = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("fallback_cube"),
            size: wgpu::Extent3d {
                width: 1,
                height: 1,
                depth_or_array_layers: 6,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        &[255u8; 24],
    );

    // far depth, so shadow lookups against it read as lit
    let depth = create_depth(device, "fallback_depth", 1, 1, true);
    let depth_attachment = depth.create_view(&wgpu::TextureViewDescriptor::default());
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("fallback_clear"),
    });
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("fallback_clear"),
        color_attachments: &[],
        depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
            view: &depth_attachment,
            depth_ops: Some(wgpu::Operations {
                load: wgpu::LoadOp::Clear(1.0),
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: None,
        }),
        ..Default::default()
    });
    queue.submit(std::iter::once(encoder.finish()));

    let sampler = device.create_sampler(&pipeline::sampler_descriptor(
        &SamplerDesc::linear_wrap("fallback_sampler"),
        false,
    ));
    let comparison = device.create_sampler(&pipeline::sampler_descriptor(
        &SamplerDesc::shadow_comparison("fallback_comparison"),
        false,
    ));

    Fallbacks {
        color: color.create_view(&wgpu::TextureViewDescriptor::default()),
        cube: cube.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(wgpu::TextureViewDimension::Cube),
            ..Default::default()
        }),
        depth: depth.create_view(&wgpu::TextureViewDescriptor::default()),
        sampler,
        comparison,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_render::shaders;

    fn lit_ps() -> ShaderLayout {
        ShaderLayout::reflect(shaders::LIT_PS, ShaderStage::Pixel).unwrap()
    }

    fn kinds(id: TextureId) -> Option<(&'static str, TextureKind)> {
        match id.0 {
            0 => Some(("bricks", TextureKind::Color2d)),
            1 => Some(("shadow", TextureKind::Depth)),
            2 => Some(("sky", TextureKind::Cube)),
            _ => None,
        }
    }

    fn comparison(id: SamplerId) -> Option<bool> {
        match id.0 {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    #[test]
    fn unbound_slots_fall_back() {
        let bound = BoundState::main(64, 64);
        let resources = resolve_resources(&lit_ps(), &bound, kinds, comparison).unwrap();
        assert_eq!(
            resources,
            vec![
                (1, ResourceRef::FallbackTexture(ResourceKind::Texture2d)),
                (2, ResourceRef::FallbackSampler { comparison: false }),
                (3, ResourceRef::FallbackTexture(ResourceKind::DepthTexture2d)),
                (4, ResourceRef::FallbackSampler { comparison: true }),
            ]
        );
    }

    #[test]
    fn bound_resources_are_used() {
        let mut bound = BoundState::main(64, 64);
        bound.textures.insert((ShaderStage::Pixel, 1), TextureId(0));
        bound.textures.insert((ShaderStage::Pixel, 3), TextureId(1));
        bound.samplers.insert((ShaderStage::Pixel, 2), SamplerId(0));
        bound.samplers.insert((ShaderStage::Pixel, 4), SamplerId(1));
        let resources = resolve_resources(&lit_ps(), &bound, kinds, comparison).unwrap();
        assert!(resources.contains(&(1, ResourceRef::Texture(TextureId(0)))));
        assert!(resources.contains(&(3, ResourceRef::Texture(TextureId(1)))));
        assert!(resources.contains(&(4, ResourceRef::Sampler(SamplerId(1)))));
    }

    #[test]
    fn vertex_stage_bindings_do_not_leak_into_pixel_slots() {
        let mut bound = BoundState::main(64, 64);
        bound.textures.insert((ShaderStage::Vertex, 1), TextureId(2));
        let resources = resolve_resources(&lit_ps(), &bound, kinds, comparison).unwrap();
        assert!(resources.contains(&(1, ResourceRef::FallbackTexture(ResourceKind::Texture2d))));
    }

    #[test]
    fn cube_in_a_2d_slot_is_rejected() {
        let mut bound = BoundState::main(64, 64);
        bound.textures.insert((ShaderStage::Pixel, 1), TextureId(2));
        let err = resolve_resources(&lit_ps(), &bound, kinds, comparison).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidTexture { ref label, .. } if label == "sky"));
        assert!(err.to_string().contains("texture_2d"));
    }

    #[test]
    fn filtering_sampler_in_comparison_slot_is_rejected() {
        let mut bound = BoundState::main(64, 64);
        bound.samplers.insert((ShaderStage::Pixel, 4), SamplerId(0));
        assert!(resolve_resources(&lit_ps(), &bound, kinds, comparison).is_err());
    }

    #[test]
    fn unknown_texture_id_is_reported() {
        let mut bound = BoundState::main(64, 64);
        bound.textures.insert((ShaderStage::Pixel, 1), TextureId(9));
        assert!(matches!(
            resolve_resources(&lit_ps(), &bound, kinds, comparison),
            Err(DeviceError::UnknownResource { kind: "texture", id: 9 })
        ));
    }

    #[test]
    fn hazard_only_for_active_stages() {
        let mut bound = BoundState::main(64, 64);
        bound.textures.insert((ShaderStage::Pixel, 3), TextureId(1));
        bound.vertex_shader = Some(ShaderId(0));
        assert_eq!(sampling_hazard(&bound, Some(TextureId(1))), None);

        bound.pixel_shader = Some(ShaderId(1));
        assert_eq!(sampling_hazard(&bound, Some(TextureId(1))), Some(TextureId(1)));
        assert_eq!(sampling_hazard(&bound, Some(TextureId(0))), None);
        assert_eq!(sampling_hazard(&bound, None), None);
    }
}
