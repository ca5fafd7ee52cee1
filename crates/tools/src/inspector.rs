use kiln_scene::Game;

/// Read-only queries against a running scene, for logs, the CLI and the overlay.
pub struct SceneInspector;

impl SceneInspector {
    pub fn summary(game: &Game) -> SceneSummary {
        SceneSummary {
            name: game.name().to_string(),
            frame: game.last_report().map_or(0, |r| r.frame + 1),
            fps: game.fps(),
            mesh_count: game.library().mesh_count(),
            material_count: game.library().material_count(),
            entity_count: game.entities().len(),
            light_count: game.lights().len(),
            camera: game.camera().map(|c| c.position().to_array()),
            shadows: game.shadow().is_casting(),
        }
    }

    /// Transform and resource names of the entity called `name`.
    pub fn inspect_entity(game: &Game, name: &str) -> Option<EntityInfo> {
        let entity = game.entity(name)?;
        let library = game.library();
        let t = entity.transform();
        Some(EntityInfo {
            name: entity.name().to_string(),
            mesh: library
                .mesh(entity.mesh())
                .map_or_else(|_| "?".to_string(), |m| m.name().to_string()),
            material: library
                .material(entity.material())
                .map_or_else(|_| "?".to_string(), |m| m.name().to_string()),
            position: t.position().to_array(),
            rotation_degrees: t.rotation().to_array().map(f32::to_degrees),
            scale: t.scale().to_array(),
        })
    }

    pub fn meshes(game: &Game) -> Vec<MeshInfo> {
        game.library()
            .meshes()
            .map(|(_, mesh)| MeshInfo {
                name: mesh.name().to_string(),
                triangles: mesh.triangle_count(),
                vertices: mesh.vertex_count(),
                indices: mesh.index_count(),
            })
            .collect()
    }

    pub fn list_entities(game: &Game) -> Vec<String> {
        game.entities()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SceneSummary {
    pub name: String,
    /// Frames rendered so far.
    pub frame: u64,
    pub fps: f32,
    pub mesh_count: usize,
    pub material_count: usize,
    pub entity_count: usize,
    pub light_count: usize,
    pub camera: Option<[f32; 3]>,
    pub shadows: bool,
}

impl std::fmt::Display for SceneSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Scene `{}`: frame={} meshes={} materials={} entities={} lights={} shadows={}",
            self.name,
            self.frame,
            self.mesh_count,
            self.material_count,
            self.entity_count,
            self.light_count,
            if self.shadows { "on" } else { "off" },
        )?;
        match self.camera {
            Some([x, y, z]) => write!(f, " camera=({x:.2}, {y:.2}, {z:.2})"),
            None => write!(f, " camera=none"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityInfo {
    pub name: String,
    pub mesh: String,
    pub material: String,
    pub position: [f32; 3],
    pub rotation_degrees: [f32; 3],
    pub scale: [f32; 3],
}

impl std::fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{} / {}] pos=({:.2}, {:.2}, {:.2}) rot=({:.1}, {:.1}, {:.1}) scale=({:.2}, {:.2}, {:.2})",
            self.name,
            self.mesh,
            self.material,
            self.position[0],
            self.position[1],
            self.position[2],
            self.rotation_degrees[0],
            self.rotation_degrees[1],
            self.rotation_degrees[2],
            self.scale[0],
            self.scale[1],
            self.scale[2],
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshInfo {
    pub name: String,
    pub triangles: u32,
    pub vertices: u32,
    pub indices: u32,
}

impl std::fmt::Display for MeshInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} triangles, {} vertices, {} indices",
            self.name, self.triangles, self.vertices, self.indices
        )
    }
}
