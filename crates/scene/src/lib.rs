//! The scene orchestrator.
//!
//! [`Game`] is built from a [`kiln_assets::Manifest`] through any
//! [`kiln_render::GraphicsContext`] and then driven once per frame:
//! update, shadow pass, color pass with the sky last, UI overlay, present.
//!
//! # Invariants
//! - Every shader source is compiled once, however many materials use it.
//! - Entity names are unique within a game.
//! - The shadow map tracks the first directional light; its matrices are rebuilt
//!   only when that light's direction changes.
//! - Resizing with no active camera never fails; only the surface is resized.

mod build;
mod error;
mod game;

pub use build::DEFAULT_SAMPLER;
pub use error::SceneError;
pub use game::Game;

pub fn crate_info() -> &'static str {
    "kiln-scene v0.1.0"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_loads() {
        assert!(crate_info().contains("scene"));
    }
}
