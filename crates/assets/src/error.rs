use std::path::PathBuf;

/// Errors from reading, writing and validating scene manifests.
#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("manifest not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("duplicate {kind} name `{name}`")]
    DuplicateName { kind: &'static str, name: String },

    #[error("{owner} references unknown {kind} `{name}`")]
    UnknownReference {
        kind: &'static str,
        name: String,
        owner: String,
    },

    #[error("invalid {what}: {reason}")]
    InvalidValue { what: String, reason: String },
}
