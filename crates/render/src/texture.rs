use crate::error::LoadError;
use glam::{Vec3, Vec4};
use std::path::Path;
use tracing::debug;

/// Decoded RGBA8 pixels ready for upload.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
    /// Colour data (sampled with sRGB decode) as opposed to linear data such as normal maps.
    pub srgb: bool,
}

impl TextureData {
    /// Decode a PNG or JPEG file.
    pub fn from_file(path: &Path) -> Result<Self, LoadError> {
        if !path.exists() {
            return Err(LoadError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let img = image::open(path)
            .map_err(|source| LoadError::Image {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        let (width, height) = img.dimensions();
        debug!(path = %path.display(), width, height, "decoded texture");
        Ok(Self {
            width,
            height,
            pixels: img.into_raw(),
            srgb: true,
        })
    }

    pub fn from_bytes(label: &str, bytes: &[u8]) -> Result<Self, LoadError> {
        let img = image::load_from_memory(bytes)
            .map_err(|source| LoadError::Image {
                path: label.into(),
                source,
            })?
            .to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            width,
            height,
            pixels: img.into_raw(),
            srgb: true,
        })
    }

    /// 1x1 texture of one colour.
    pub fn solid(color: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: color.to_vec(),
            srgb: true,
        }
    }

    /// `size` x `size` checkerboard with `cells` squares per side.
    pub fn checker(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let size = size.max(1);
        let cell = (size / cells.max(1)).max(1);
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let even = ((x / cell) + (y / cell)) % 2 == 0;
                pixels.extend_from_slice(if even { &a } else { &b });
            }
        }
        Self {
            width: size,
            height: size,
            pixels,
            srgb: true,
        }
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y * self.width + x) * 4) as usize;
        self.pixels.get(i..i + 4).and_then(|p| p.try_into().ok())
    }

    /// True when the pixel buffer matches the dimensions.
    pub fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.pixels.len() == (self.width * self.height * 4) as usize
    }
}

/// Cubemap face, in upload order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CubeFace {
    PositiveX,
    NegativeX,
    PositiveY,
    NegativeY,
    PositiveZ,
    NegativeZ,
}

impl CubeFace {
    /// Upload order: +X, -X, +Y, -Y, +Z, -Z. Swapping faces renders a visibly wrong sky.
    pub const ORDER: [CubeFace; 6] = [
        CubeFace::PositiveX,
        CubeFace::NegativeX,
        CubeFace::PositiveY,
        CubeFace::NegativeY,
        CubeFace::PositiveZ,
        CubeFace::NegativeZ,
    ];

    /// Direction through texel (`s`, `t`) of this face, both in -1..=1 with `t` down.
    pub fn direction(self, s: f32, t: f32) -> Vec3 {
        let d = match self {
            CubeFace::PositiveX => Vec3::new(1.0, -t, -s),
            CubeFace::NegativeX => Vec3::new(-1.0, -t, s),
            CubeFace::PositiveY => Vec3::new(s, 1.0, t),
            CubeFace::NegativeY => Vec3::new(s, -1.0, -t),
            CubeFace::PositiveZ => Vec3::new(s, -t, 1.0),
            CubeFace::NegativeZ => Vec3::new(-s, -t, -1.0),
        };
        d.normalize()
    }
}

/// Six equally sized square faces in [`CubeFace::ORDER`].
#[derive(Debug, Clone, PartialEq)]
pub struct CubeFaces {
    faces: [TextureData; 6],
}

impl CubeFaces {
    pub fn new(faces: [TextureData; 6]) -> Result<Self, LoadError> {
        let (w, h) = (faces[0].width, faces[0].height);
        for (i, face) in faces.iter().enumerate() {
            if face.width != w || face.height != h || w != h {
                return Err(LoadError::CubeFaceSize {
                    face: i,
                    width: face.width,
                    height: face.height,
                    expected_width: w,
                    expected_height: w,
                });
            }
        }
        Ok(Self { faces })
    }

    /// Load six image files given in +X, -X, +Y, -Y, +Z, -Z order.
    pub fn from_files<P: AsRef<Path>>(paths: &[P; 6]) -> Result<Self, LoadError> {
        let mut faces: [TextureData; 6] = std::array::from_fn(|_| TextureData::solid([0; 4]));
        for (slot, path) in faces.iter_mut().zip(paths) {
            *slot = TextureData::from_file(path.as_ref())?;
        }
        Self::new(faces)
    }

    /// Procedural vertical gradient: `zenith` straight up, `horizon` at the horizon,
    /// `ground` straight down.
    pub fn gradient(size: u32, zenith: Vec3, horizon: Vec3, ground: Vec3) -> Self {
        let size = size.max(1);
        let faces = CubeFace::ORDER.map(|face| {
            let mut pixels = Vec::with_capacity((size * size * 4) as usize);
            for y in 0..size {
                for x in 0..size {
                    let s = 2.0 * (x as f32 + 0.5) / size as f32 - 1.0;
                    let t = 2.0 * (y as f32 + 0.5) / size as f32 - 1.0;
                    let up = face.direction(s, t).y;
                    let color = if up >= 0.0 {
                        horizon.lerp(zenith, up)
                    } else {
                        horizon.lerp(ground, -up)
                    };
                    pixels.extend_from_slice(&to_rgba8(color.extend(1.0)));
                }
            }
            TextureData {
                width: size,
                height: size,
                pixels,
                srgb: true,
            }
        });
        Self { faces }
    }

    pub fn faces(&self) -> &[TextureData; 6] {
        &self.faces
    }

    pub fn face(&self, face: CubeFace) -> &TextureData {
        let index = CubeFace::ORDER
            .iter()
            .position(|f| *f == face)
            .unwrap_or_default();
        &self.faces[index]
    }

    pub fn size(&self) -> u32 {
        self.faces[0].width
    }
}

/// Convert a 0..1 colour to RGBA8.
pub fn to_rgba8(color: Vec4) -> [u8; 4] {
    let c = (color.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
    [c.x as u8, c.y as u8, c.z as u8, c.w as u8]
}
