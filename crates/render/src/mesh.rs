use crate::context::{DeviceError, GpuMeshId, GraphicsContext};
use glam::{Vec2, Vec3};
use std::f32::consts::{PI, TAU};

/// Interleaved vertex shared with every vertex program (locations 0..=3).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
    pub tangent: [f32; 3],
}

impl Vertex {
    pub fn new(position: Vec3, uv: Vec2, normal: Vec3, tangent: Vec3) -> Self {
        Self {
            position: position.to_array(),
            uv: uv.to_array(),
            normal: normal.to_array(),
            tangent: tangent.to_array(),
        }
    }
}

/// CPU-side geometry. Front faces wind clockwise.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Reject empty meshes, partial triangles and out-of-range indices.
    pub fn validate(&self, label: &str) -> Result<(), DeviceError> {
        let invalid = |reason: String| DeviceError::InvalidMesh {
            label: label.to_string(),
            reason,
        };
        if self.vertices.is_empty() || self.indices.is_empty() {
            return Err(invalid("mesh is empty".into()));
        }
        if self.indices.len() % 3 != 0 {
            return Err(invalid(format!(
                "{} indices is not a whole number of triangles",
                self.indices.len()
            )));
        }
        let count = self.vertices.len() as u32;
        if let Some(bad) = self.indices.iter().find(|&&i| i >= count) {
            return Err(invalid(format!(
                "index {bad} out of range for {count} vertices"
            )));
        }
        Ok(())
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Single triangle in the XY plane facing -Z.
    pub fn triangle() -> Self {
        let n = Vec3::NEG_Z;
        let t = Vec3::X;
        Self {
            vertices: vec![
                Vertex::new(Vec3::new(0.0, 0.5, 0.0), Vec2::new(0.5, 0.0), n, t),
                Vertex::new(Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 1.0), n, t),
                Vertex::new(Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 1.0), n, t),
            ],
            indices: vec![0, 1, 2],
        }
    }

    /// `size` x `size` quad in the XY plane facing -Z.
    pub fn quad(size: f32) -> Self {
        let mut mesh = Self::default();
        mesh.push_face(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, size * 0.5);
        mesh
    }

    /// Square plane in XZ facing +Y, split into `subdivisions` cells per side.
    pub fn plane(size: f32, subdivisions: u32) -> Self {
        let cells = subdivisions.max(1);
        let half = size * 0.5;
        let mut mesh = Self::default();

        for row in 0..=cells {
            for col in 0..=cells {
                let u = col as f32 / cells as f32;
                let v = row as f32 / cells as f32;
                let position = Vec3::new(-half + u * size, 0.0, half - v * size);
                mesh.vertices
                    .push(Vertex::new(position, Vec2::new(u, v), Vec3::Y, Vec3::X));
            }
        }

        // rows run from +Z (top of the texture) toward -Z
        let stride = cells + 1;
        for row in 0..cells {
            for col in 0..cells {
                let top_left = row * stride + col;
                let top_right = top_left + 1;
                let bottom_left = top_left + stride;
                let bottom_right = bottom_left + 1;
                mesh.indices.extend_from_slice(&[
                    top_left,
                    top_right,
                    bottom_right,
                    top_left,
                    bottom_right,
                    bottom_left,
                ]);
            }
        }
        mesh
    }

    /// Axis-aligned cube with 4 vertices per face (24 vertices, 36 indices).
    pub fn cube(size: f32) -> Self {
        let h = size * 0.5;
        let mut mesh = Self::default();
        for (normal, up) in [
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::Z),
            (Vec3::NEG_Y, Vec3::NEG_Z),
            (Vec3::Z, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y),
        ] {
            mesh.push_face(normal * h, normal, up, h);
        }
        mesh
    }

    /// UV sphere with `slices` segments around Y and `stacks` from pole to pole.
    pub fn sphere(radius: f32, slices: u32, stacks: u32) -> Self {
        let slices = slices.max(3);
        let stacks = stacks.max(2);
        let mut mesh = Self::default();

        for i in 0..=stacks {
            let phi = PI * i as f32 / stacks as f32;
            for j in 0..=slices {
                let theta = TAU * j as f32 / slices as f32;
                let normal = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());
                let uv = Vec2::new(j as f32 / slices as f32, i as f32 / stacks as f32);
                mesh.vertices
                    .push(Vertex::new(normal * radius, uv, normal, tangent));
            }
        }
        mesh.push_grid(0, stacks, slices);
        mesh
    }

    /// Capped cylinder around Y, centred on the origin.
    pub fn cylinder(radius: f32, height: f32, segments: u32) -> Self {
        let segments = segments.max(3);
        let half = height * 0.5;
        let mut mesh = Self::default();

        for (row, y) in [half, -half].into_iter().enumerate() {
            for j in 0..=segments {
                let theta = TAU * j as f32 / segments as f32;
                let normal = Vec3::new(theta.cos(), 0.0, theta.sin());
                let tangent = Vec3::new(-theta.sin(), 0.0, theta.cos());
                let uv = Vec2::new(j as f32 / segments as f32, row as f32);
                mesh.vertices.push(Vertex::new(
                    Vec3::new(normal.x * radius, y, normal.z * radius),
                    uv,
                    normal,
                    tangent,
                ));
            }
        }
        mesh.push_grid(0, 1, segments);

        for (y, normal) in [(half, Vec3::Y), (-half, Vec3::NEG_Y)] {
            let center = mesh.vertices.len() as u32;
            mesh.vertices.push(Vertex::new(
                Vec3::new(0.0, y, 0.0),
                Vec2::splat(0.5),
                normal,
                Vec3::X,
            ));
            for j in 0..=segments {
                let theta = TAU * j as f32 / segments as f32;
                let (s, c) = theta.sin_cos();
                mesh.vertices.push(Vertex::new(
                    Vec3::new(c * radius, y, s * radius),
                    Vec2::new(0.5 + c * 0.5, 0.5 - s * 0.5 * normal.y),
                    normal,
                    Vec3::X,
                ));
            }
            for j in 0..segments {
                let a = center + 1 + j;
                let b = a + 1;
                if normal.y > 0.0 {
                    mesh.indices.extend_from_slice(&[center, b, a]);
                } else {
                    mesh.indices.extend_from_slice(&[center, a, b]);
                }
            }
        }
        mesh
    }

    /// Four vertices facing `normal`, with `up` as the face's vertical axis.
    fn push_face(&mut self, center: Vec3, normal: Vec3, up: Vec3, half: f32) {
        // seen from the front, right = normal x up in a left-handed frame
        let right = normal.cross(up);
        let base = self.vertices.len() as u32;
        let corners = [
            (-right - up, Vec2::new(0.0, 1.0)),
            (-right + up, Vec2::new(0.0, 0.0)),
            (right + up, Vec2::new(1.0, 0.0)),
            (right - up, Vec2::new(1.0, 1.0)),
        ];
        for (offset, uv) in corners {
            self.vertices
                .push(Vertex::new(center + offset * half, uv, normal, right));
        }
        self.indices
            .extend_from_slice(&[base + 1, base + 2, base + 3, base + 1, base + 3, base]);
    }

    /// Index a (rows + 1) x (cols + 1) vertex grid whose columns run rightward and rows
    /// run downward as seen from outside.
    fn push_grid(&mut self, base: u32, rows: u32, cols: u32) {
        let stride = cols + 1;
        for i in 0..rows {
            for j in 0..cols {
                let top_left = base + i * stride + j;
                let top_right = top_left + 1;
                let bottom_left = top_left + stride;
                let bottom_right = bottom_left + 1;
                self.indices.extend_from_slice(&[
                    top_left,
                    top_right,
                    bottom_right,
                    top_left,
                    bottom_right,
                    bottom_left,
                ]);
            }
        }
    }
}

/// Immutable GPU geometry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mesh {
    name: String,
    gpu: GpuMeshId,
    vertex_count: u32,
    index_count: u32,
}

impl Mesh {
    pub fn upload(
        gfx: &mut dyn GraphicsContext,
        name: &str,
        data: &MeshData,
    ) -> Result<Self, DeviceError> {
        data.validate(name)?;
        let gpu = gfx.create_mesh(name, &data.vertices, &data.indices)?;
        Ok(Self {
            name: name.to_string(),
            gpu,
            vertex_count: data.vertices.len() as u32,
            index_count: data.indices.len() as u32,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn gpu_id(&self) -> GpuMeshId {
        self.gpu
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count / 3
    }

    /// Issue the draw with whatever state is bound.
    pub fn draw(&self, gfx: &mut dyn GraphicsContext) -> Result<(), DeviceError> {
        gfx.draw_indexed(self.gpu, self.index_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessContext;

    fn position(mesh: &MeshData, i: u32) -> Vec3 {
        Vec3::from(mesh.vertices[i as usize].position)
    }

    /// Every triangle must wind clockwise when viewed against its normal.
    fn assert_clockwise(mesh: &MeshData) {
        for tri in mesh.indices.chunks_exact(3) {
            let (a, b, c) = (position(mesh, tri[0]), position(mesh, tri[1]), position(mesh, tri[2]));
            let normal = Vec3::from(mesh.vertices[tri[0] as usize].normal)
                + Vec3::from(mesh.vertices[tri[1] as usize].normal)
                + Vec3::from(mesh.vertices[tri[2] as usize].normal);
            let face = (b - a).cross(c - a);
            if face.length_squared() < 1e-12 {
                continue; // collapsed triangle at a sphere pole
            }
            // left-handed: clockwise seen from the front puts (b - a) x (c - a) along the normal
            assert!(
                face.dot(normal) > 0.0,
                "triangle {tri:?} winds the wrong way"
            );
        }
    }

    #[test]
    fn cube_has_24_vertices_and_36_indices() {
        let cube = MeshData::cube(1.0);
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.indices.len(), 36);
        assert_eq!(cube.triangle_count(), 12);
        cube.validate("cube").unwrap();
        assert_clockwise(&cube);
    }

    #[test]
    fn builders_produce_valid_clockwise_meshes() {
        for (name, mesh) in [
            ("triangle", MeshData::triangle()),
            ("quad", MeshData::quad(2.0)),
            ("plane", MeshData::plane(10.0, 4)),
            ("sphere", MeshData::sphere(0.5, 16, 8)),
            ("cylinder", MeshData::cylinder(0.5, 2.0, 12)),
        ] {
            mesh.validate(name).unwrap();
            assert_clockwise(&mesh);
        }
    }

    #[test]
    fn tangents_are_perpendicular_to_normals() {
        let sphere = MeshData::sphere(1.0, 12, 6);
        for v in &sphere.vertices {
            let n = Vec3::from(v.normal);
            let t = Vec3::from(v.tangent);
            assert!(n.dot(t).abs() < 1e-5);
        }
    }

    #[test]
    fn plane_grid_counts() {
        let plane = MeshData::plane(4.0, 2);
        assert_eq!(plane.vertices.len(), 9);
        assert_eq!(plane.indices.len(), 2 * 2 * 6);
    }

    #[test]
    fn validate_rejects_bad_data() {
        assert!(MeshData::default().validate("empty").is_err());
        let mut mesh = MeshData::triangle();
        mesh.indices.push(0);
        assert!(mesh.validate("partial").is_err());
        let mut mesh = MeshData::triangle();
        mesh.indices[2] = 3;
        let err = mesh.validate("range").unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn upload_records_counts() {
        let mut gfx = HeadlessContext::new(32, 32);
        let mesh = Mesh::upload(&mut gfx, "cube", &MeshData::cube(1.0)).unwrap();
        assert_eq!(mesh.vertex_count(), 24);
        assert_eq!(mesh.index_count(), 36);
        assert_eq!(mesh.triangle_count(), 12);
        assert_eq!(mesh.name(), "cube");
    }
}
