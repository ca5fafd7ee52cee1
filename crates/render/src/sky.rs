use crate::camera::Camera;
use crate::context::{
    DepthState, DeviceError, GpuMeshId, GraphicsContext, RasterizerState, SamplerId, ShaderStage,
    TextureId,
};
use crate::error::{BindingError, RenderError};
use crate::library::ResourceLibrary;
use crate::shader::{names, IfDeclared, ParameterBlock, ShaderProgram};
use crate::texture::CubeFaces;
use glam::{Mat4, Vec4};
use kiln_common::{MeshHandle, ShaderHandle};

/// Cubemap drawn on the inside of a cube centered on the camera.
#[derive(Debug, Clone)]
pub struct Sky {
    mesh: MeshHandle,
    cubemap: TextureId,
    sampler: SamplerId,
    vertex_shader: ShaderHandle,
    pixel_shader: ShaderHandle,
}

impl Sky {
    pub fn new(
        mesh: MeshHandle,
        cubemap: TextureId,
        sampler: SamplerId,
        vertex_shader: ShaderHandle,
        pixel_shader: ShaderHandle,
    ) -> Self {
        Self {
            mesh,
            cubemap,
            sampler,
            vertex_shader,
            pixel_shader,
        }
    }

    /// Upload `faces` as a cubemap and build the sky around it.
    pub fn create(
        gfx: &mut dyn GraphicsContext,
        mesh: MeshHandle,
        faces: &CubeFaces,
        sampler: SamplerId,
        vertex_shader: ShaderHandle,
        pixel_shader: ShaderHandle,
    ) -> Result<Self, DeviceError> {
        let cubemap = gfx.create_cubemap("sky", faces)?;
        Ok(Self::new(mesh, cubemap, sampler, vertex_shader, pixel_shader))
    }

    pub fn mesh(&self) -> MeshHandle {
        self.mesh
    }

    pub fn cubemap(&self) -> TextureId {
        self.cubemap
    }

    /// Draw with front-face culling and a less-equal depth test, then put the
    /// default states back whether or not the draw succeeded.
    pub fn draw(
        &self,
        gfx: &mut dyn GraphicsContext,
        library: &ResourceLibrary,
        camera: &Camera,
    ) -> Result<u32, RenderError> {
        let mesh = library.mesh(self.mesh)?;
        let vs = library.shader(self.vertex_shader)?;
        let ps = library.shader(self.pixel_shader)?;

        let mut view = camera.view();
        view.w_axis = Vec4::W;

        let binding = |source: BindingError| RenderError::Binding {
            owner: "sky".to_string(),
            source,
        };
        vs.expect_stage(ShaderStage::Vertex).map_err(binding)?;
        ps.expect_stage(ShaderStage::Pixel).map_err(binding)?;
        let vblock = stage_vertex(vs, &view, &camera.projection()).map_err(binding)?;
        let pblock = stage_pixel(ps, self.cubemap, self.sampler).map_err(binding)?;

        gfx.set_rasterizer_state(RasterizerState::cull_front());
        gfx.set_depth_state(DepthState::less_equal());
        let result = submit(gfx, vs, ps, vblock, pblock, mesh.gpu_id(), mesh.index_count());
        gfx.set_rasterizer_state(RasterizerState::default());
        gfx.set_depth_state(DepthState::default());
        result?;
        Ok(mesh.triangle_count())
    }
}

fn stage_vertex<'p>(
    vs: &'p ShaderProgram,
    view: &Mat4,
    projection: &Mat4,
) -> Result<ParameterBlock<'p>, BindingError> {
    let mut block = vs.parameters();
    block.set_matrix4x4(names::VIEW, view).if_declared()?;
    block
        .set_matrix4x4(names::PROJECTION, projection)
        .if_declared()?;
    Ok(block)
}

fn stage_pixel(
    ps: &ShaderProgram,
    cubemap: TextureId,
    sampler: SamplerId,
) -> Result<ParameterBlock<'_>, BindingError> {
    let mut block = ps.parameters();
    block.set_texture(names::SKY_TEXTURE, cubemap)?;
    block.set_sampler(names::SKY_SAMPLER, sampler)?;
    Ok(block)
}

fn submit(
    gfx: &mut dyn GraphicsContext,
    vs: &ShaderProgram,
    ps: &ShaderProgram,
    vblock: ParameterBlock<'_>,
    pblock: ParameterBlock<'_>,
    mesh: GpuMeshId,
    index_count: u32,
) -> Result<(), DeviceError> {
    vs.bind(gfx);
    ps.bind(gfx);
    vblock.commit(gfx)?;
    pblock.commit(gfx)?;
    gfx.draw_indexed(mesh, index_count)
}
