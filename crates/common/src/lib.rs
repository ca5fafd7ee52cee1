//! Shared types used across the kiln workspace.
//!
//! # Invariants
//! - A `Transform`'s cached world matrix is only handed out while it is clean.
//! - Normalization helpers never return NaN; degenerate input falls back to a known axis.

pub mod math;
pub mod transform;
pub mod types;

pub use transform::Transform;
pub use types::{EntityId, MaterialHandle, MeshHandle, ShaderHandle};

pub fn crate_info() -> &'static str {
    "kiln-common v0.1.0"
}
