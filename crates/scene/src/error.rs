use kiln_assets::AssetError;
use kiln_render::{DeviceError, LoadError, RenderError};

/// Failures while building or running a scene.
#[derive(Debug, thiserror::Error)]
pub enum SceneError {
    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("unknown builtin shader `{0}`")]
    UnknownBuiltin(String),

    #[error("duplicate {kind} name `{name}`")]
    DuplicateName { kind: &'static str, name: String },

    /// Manifest and library disagree; only reachable with an unvalidated manifest.
    #[error("{owner} references unknown {kind} `{name}`")]
    Missing {
        kind: &'static str,
        name: String,
        owner: String,
    },
}
