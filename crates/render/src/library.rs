use crate::context::{SamplerId, TextureId};
use crate::error::RenderError;
use crate::material::Material;
use crate::mesh::Mesh;
use crate::shader::ShaderProgram;
use kiln_common::{MaterialHandle, MeshHandle, ShaderHandle};
use std::collections::BTreeMap;

/// Arenas for everything entities share by handle: meshes, shader programs and
/// materials, plus name lookups for textures and samplers.
#[derive(Debug, Default)]
pub struct ResourceLibrary {
    meshes: BTreeMap<MeshHandle, Mesh>,
    shaders: BTreeMap<ShaderHandle, ShaderProgram>,
    materials: BTreeMap<MaterialHandle, Material>,
    textures: BTreeMap<String, TextureId>,
    samplers: BTreeMap<String, SamplerId>,
    next_handle: u64,
}

impl ResourceLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn add_mesh(&mut self, mesh: Mesh) -> MeshHandle {
        let handle = MeshHandle(self.next());
        self.meshes.insert(handle, mesh);
        handle
    }

    pub fn mesh(&self, handle: MeshHandle) -> Result<&Mesh, RenderError> {
        self.meshes.get(&handle).ok_or(RenderError::UnknownHandle {
            kind: "mesh",
            id: handle.0,
        })
    }

    pub fn meshes(&self) -> impl Iterator<Item = (MeshHandle, &Mesh)> {
        self.meshes.iter().map(|(h, m)| (*h, m))
    }

    pub fn find_mesh(&self, name: &str) -> Option<MeshHandle> {
        self.meshes
            .iter()
            .find(|(_, m)| m.name() == name)
            .map(|(h, _)| *h)
    }

    pub fn add_shader(&mut self, shader: ShaderProgram) -> ShaderHandle {
        let handle = ShaderHandle(self.next());
        self.shaders.insert(handle, shader);
        handle
    }

    pub fn shader(&self, handle: ShaderHandle) -> Result<&ShaderProgram, RenderError> {
        self.shaders.get(&handle).ok_or(RenderError::UnknownHandle {
            kind: "shader",
            id: handle.0,
        })
    }

    pub fn shaders(&self) -> impl Iterator<Item = (ShaderHandle, &ShaderProgram)> {
        self.shaders.iter().map(|(h, s)| (*h, s))
    }

    pub fn find_shader(&self, name: &str) -> Option<ShaderHandle> {
        self.shaders
            .iter()
            .find(|(_, s)| s.name() == name)
            .map(|(h, _)| *h)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialHandle {
        let handle = MaterialHandle(self.next());
        self.materials.insert(handle, material);
        handle
    }

    pub fn material(&self, handle: MaterialHandle) -> Result<&Material, RenderError> {
        self.materials
            .get(&handle)
            .ok_or(RenderError::UnknownHandle {
                kind: "material",
                id: handle.0,
            })
    }

    /// Mutable access; edits are visible to every entity sharing the material.
    pub fn material_mut(&mut self, handle: MaterialHandle) -> Result<&mut Material, RenderError> {
        self.materials
            .get_mut(&handle)
            .ok_or(RenderError::UnknownHandle {
                kind: "material",
                id: handle.0,
            })
    }

    pub fn materials(&self) -> impl Iterator<Item = (MaterialHandle, &Material)> {
        self.materials.iter().map(|(h, m)| (*h, m))
    }

    pub fn materials_mut(&mut self) -> impl Iterator<Item = (MaterialHandle, &mut Material)> {
        self.materials.iter_mut().map(|(h, m)| (*h, m))
    }

    pub fn find_material(&self, name: &str) -> Option<MaterialHandle> {
        self.materials
            .iter()
            .find(|(_, m)| m.name() == name)
            .map(|(h, _)| *h)
    }

    pub fn add_texture(&mut self, name: impl Into<String>, texture: TextureId) {
        self.textures.insert(name.into(), texture);
    }

    pub fn texture(&self, name: &str) -> Option<TextureId> {
        self.textures.get(name).copied()
    }

    pub fn add_sampler(&mut self, name: impl Into<String>, sampler: SamplerId) {
        self.samplers.insert(name.into(), sampler);
    }

    pub fn sampler(&self, name: &str) -> Option<SamplerId> {
        self.samplers.get(name).copied()
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn shader_count(&self) -> usize {
        self.shaders.len()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }
}
