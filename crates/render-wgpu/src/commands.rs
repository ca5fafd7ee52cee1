//! Recorded device commands and how they group into render passes.

use crate::pipeline::PipelineKey;
use kiln_render::context::{
    DepthTargetId, GpuMeshId, RenderTargetId, SamplerId, ShaderId, TextureId, Viewport,
};
use kiln_render::reflect::ResourceKind;
use std::collections::BTreeMap;

/// What a resource slot of a bind group points at. Slots the caller never
/// bound read the backend's fallback resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceRef {
    Texture(TextureId),
    Sampler(SamplerId),
    FallbackTexture(ResourceKind),
    FallbackSampler { comparison: bool },
}

/// Identity of one program's bind group; equal keys share a `wgpu::BindGroup`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub shader: ShaderId,
    pub resources: Vec<(u32, ResourceRef)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageBinding {
    pub group: GroupKey,
    /// Offset of the program's constants in the frame's uniform buffer, if it
    /// has a uniform block.
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrawCommand {
    pub pipeline: PipelineKey,
    pub color: Option<RenderTargetId>,
    pub depth: Option<DepthTargetId>,
    pub viewport: Viewport,
    pub mesh: GpuMeshId,
    pub index_count: u32,
    pub vertex: StageBinding,
    pub pixel: Option<StageBinding>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    ClearColor { target: RenderTargetId, color: [f32; 4] },
    ClearDepth { target: DepthTargetId, depth: f32 },
    Draw(DrawCommand),
}

/// One render pass: its attachments, load operations and draws in order.
#[derive(Debug, Clone, PartialEq)]
pub struct PassPlan<'a> {
    pub color: Option<RenderTargetId>,
    pub depth: Option<DepthTargetId>,
    /// `Some` clears on load, `None` loads the previous contents.
    pub clear_color: Option<[f32; 4]>,
    pub clear_depth: Option<f32>,
    pub draws: Vec<&'a DrawCommand>,
}

impl PassPlan<'_> {
    fn new(color: Option<RenderTargetId>, depth: Option<DepthTargetId>) -> Self {
        Self {
            color,
            depth,
            clear_color: None,
            clear_depth: None,
            draws: Vec::new(),
        }
    }
}

/// Group a frame's commands into passes.
///
/// Consecutive draws with the same attachments share a pass. A clear becomes
/// the load operation of the next pass that uses its target; a clear of an
/// attachment of the open pass ends that pass first. Clears nothing draws to
/// afterwards still run, as passes without draws.
pub fn plan_passes(commands: &[Command]) -> Vec<PassPlan<'_>> {
    let mut passes = Vec::new();
    let mut current: Option<PassPlan> = None;
    let mut color_clears: BTreeMap<RenderTargetId, [f32; 4]> = BTreeMap::new();
    let mut depth_clears: BTreeMap<DepthTargetId, f32> = BTreeMap::new();

    for command in commands {
        match command {
            Command::ClearColor { target, color } => {
                if current.as_ref().is_some_and(|p| p.color == Some(*target)) {
                    passes.extend(current.take());
                }
                color_clears.insert(*target, *color);
            }
            Command::ClearDepth { target, depth } => {
                if current.as_ref().is_some_and(|p| p.depth == Some(*target)) {
                    passes.extend(current.take());
                }
                depth_clears.insert(*target, *depth);
            }
            Command::Draw(draw) => {
                let same = current
                    .as_ref()
                    .is_some_and(|p| p.color == draw.color && p.depth == draw.depth);
                if !same {
                    passes.extend(current.take());
                    let mut pass = PassPlan::new(draw.color, draw.depth);
                    pass.clear_color = draw.color.and_then(|t| color_clears.remove(&t));
                    pass.clear_depth = draw.depth.and_then(|t| depth_clears.remove(&t));
                    current = Some(pass);
                }
                if let Some(pass) = current.as_mut() {
                    pass.draws.push(draw);
                }
            }
        }
    }
    passes.extend(current);

    for (target, color) in color_clears {
        let mut pass = PassPlan::new(Some(target), None);
        pass.clear_color = Some(color);
        passes.push(pass);
    }
    for (target, depth) in depth_clears {
        let mut pass = PassPlan::new(None, Some(target));
        pass.clear_depth = Some(depth);
        passes.push(pass);
    }
    passes
}

/// Clip a viewport to a `width` x `height` attachment. `None` if nothing is left.
pub fn clamp_viewport(viewport: Viewport, width: u32, height: u32) -> Option<Viewport> {
    let (w, h) = (width as f32, height as f32);
    let x = viewport.x.clamp(0.0, w);
    let y = viewport.y.clamp(0.0, h);
    let right = (viewport.x + viewport.width).clamp(x, w);
    let bottom = (viewport.y + viewport.height).clamp(y, h);
    if right - x < 1.0 || bottom - y < 1.0 {
        return None;
    }
    Some(Viewport {
        x,
        y,
        width: right - x,
        height: bottom - y,
        min_depth: viewport.min_depth.clamp(0.0, 1.0),
        max_depth: viewport.max_depth.clamp(viewport.min_depth.clamp(0.0, 1.0), 1.0),
    })
}
