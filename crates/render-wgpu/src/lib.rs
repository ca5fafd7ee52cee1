//! wgpu backend for kiln.
//!
//! [`WgpuContext`] implements [`kiln_render::GraphicsContext`] on a window
//! surface. Calls record commands; `present` turns them into render passes,
//! paints the egui overlay and presents.
//!
//! # Invariants
//! - A draw sees the targets, states, resources and constants bound when
//!   `draw_indexed` was called, even though it executes at `present`.
//! - Consecutive draws to the same attachments share one render pass; a clear
//!   becomes the load operation of the next pass on its target.
//! - Slots the caller never bound read fallback resources, never stale ones.
//! - Pipelines are cached per vertex/pixel program, attachments and
//!   rasterizer/depth state.

mod commands;
mod gpu;
mod pipeline;
mod uniforms;

pub use gpu::WgpuContext;
pub use pipeline::DEPTH_FORMAT;

pub fn crate_info() -> &'static str {
    "kiln-render-wgpu v0.1.0"
}
