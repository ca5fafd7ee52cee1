//! Developer tooling: scene summaries and the egui inspector overlay.
//!
//! # Invariants
//! - Summaries never mutate the scene.
//! - Inspector edits go through the same setters the game uses, so transforms are
//!   marked dirty and light matrices follow direction edits.

pub mod inspector;
pub mod panels;

pub use inspector::{EntityInfo, MeshInfo, SceneInspector, SceneSummary};
pub use panels::InspectorPanel;

pub fn crate_info() -> &'static str {
    "kiln-tools v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("tools"));
    }
}
