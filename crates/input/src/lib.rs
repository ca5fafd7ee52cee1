//! Input: a per-frame snapshot of keys, pointer motion and the look button, plus
//! bindings from physical keys to actions.
//!
//! # Invariants
//! - Consumers query actions, never raw window events.
//! - Pointer delta accumulates between polls and is cleared by `end_frame`.

pub mod action;
pub mod state;

pub use action::{Action, Key, KeyBindings};
pub use state::InputState;

pub fn crate_info() -> &'static str {
    "kiln-input v0.1.0"
}
