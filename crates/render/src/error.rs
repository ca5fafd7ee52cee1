use crate::context::{DeviceError, ShaderStage};
use crate::frame::RenderPhase;
use crate::reflect::ReflectError;
use std::path::PathBuf;

/// Resource creation failures. All of them are fatal at startup: a scene cannot
/// render without the resources it declares.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("cubemap face {face} is {width}x{height}, expected {expected_width}x{expected_height}")]
    CubeFaceSize {
        face: usize,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },

    #[error("shader `{name}`: {source}")]
    Reflect {
        name: String,
        #[source]
        source: ReflectError,
    },

    #[error("shader `{name}` is a {found:?} program, expected {expected:?}")]
    StageMismatch {
        name: String,
        expected: ShaderStage,
        found: ShaderStage,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// A material or engine parameter that does not match the bound shader program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindingError {
    #[error("shader `{shader}` declares no parameter `{name}`")]
    UnknownParameter { shader: String, name: String },

    #[error("parameter `{name}` of shader `{shader}` is {expected}, not {found}")]
    TypeMismatch {
        shader: String,
        name: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("{len} bytes do not fit parameter `{name}` of shader `{shader}` ({capacity} bytes)")]
    DataTooLarge {
        shader: String,
        name: String,
        capacity: u32,
        len: usize,
    },

    #[error("shader `{shader}` declares no texture `{name}`")]
    UnknownTexture { shader: String, name: String },

    #[error("shader `{shader}` declares no sampler `{name}`")]
    UnknownSampler { shader: String, name: String },

    #[error("shader `{shader}` is a {found:?} program, expected {expected:?}")]
    WrongStage {
        shader: String,
        expected: ShaderStage,
        found: ShaderStage,
    },
}

impl BindingError {
    /// The (shader, name) pair that identifies this mismatch.
    pub fn key(&self) -> (&str, &str) {
        match self {
            BindingError::UnknownParameter { shader, name }
            | BindingError::TypeMismatch { shader, name, .. }
            | BindingError::DataTooLarge { shader, name, .. }
            | BindingError::UnknownTexture { shader, name }
            | BindingError::UnknownSampler { shader, name } => (shader, name),
            BindingError::WrongStage { shader, .. } => (shader, ""),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("render phase out of order: expected {expected:?}, found {found:?}")]
    PhaseOrder {
        expected: RenderPhase,
        found: RenderPhase,
    },

    #[error("no active camera")]
    NoActiveCamera,

    #[error("unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },

    /// `owner` is the material (or pass) whose draw hit the mismatch.
    #[error("{owner}: {source}")]
    Binding {
        owner: String,
        #[source]
        source: BindingError,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_names_the_path() {
        let err = LoadError::NotFound {
            path: PathBuf::from("textures/missing.png"),
        };
        assert!(err.to_string().contains("textures/missing.png"));
    }

    #[test]
    fn binding_error_key_identifies_mismatch() {
        let err = BindingError::UnknownTexture {
            shader: "lit_ps".into(),
            name: "Albedo".into(),
        };
        assert_eq!(err.key(), ("lit_ps", "Albedo"));
    }

    #[test]
    fn phase_order_is_descriptive() {
        let err = RenderError::PhaseOrder {
            expected: RenderPhase::ShadowPass,
            found: RenderPhase::Idle,
        };
        assert!(err.to_string().contains("ShadowPass"));
    }
}
