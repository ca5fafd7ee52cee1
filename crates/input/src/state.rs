use crate::action::{Action, Key, KeyBindings};
use glam::Vec2;
use std::collections::BTreeSet;

/// Snapshot of input for the current frame.
///
/// Window backends feed it events (`press`, `release`, `add_pointer_delta`, ...);
/// the camera and the scene read it through `action_active` and `pointer_delta`.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    bindings: KeyBindings,
    keys_down: BTreeSet<Key>,
    pointer_delta: Vec2,
    look_held: bool,
    quit_requested: bool,
}

impl InputState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bindings(bindings: KeyBindings) -> Self {
        Self {
            bindings,
            ..Self::default()
        }
    }

    pub fn bindings(&self) -> &KeyBindings {
        &self.bindings
    }

    pub fn press(&mut self, key: Key) {
        self.keys_down.insert(key);
        if self.bindings.keys_for(Action::Quit).contains(&key) {
            self.quit_requested = true;
        }
    }

    pub fn release(&mut self, key: Key) {
        self.keys_down.remove(&key);
    }

    pub fn key_down(&self, key: Key) -> bool {
        self.keys_down.contains(&key)
    }

    /// True while any key bound to `action` is held.
    pub fn action_active(&self, action: Action) -> bool {
        self.bindings
            .keys_for(action)
            .iter()
            .any(|k| self.keys_down.contains(k))
    }

    /// Accumulate pointer motion since the last `end_frame`.
    pub fn add_pointer_delta(&mut self, delta: Vec2) {
        self.pointer_delta += delta;
    }

    pub fn pointer_delta(&self) -> Vec2 {
        self.pointer_delta
    }

    /// Whether the "look" button (mouse button held for free-look) is down.
    pub fn set_look_held(&mut self, held: bool) {
        self.look_held = held;
    }

    pub fn look_active(&self) -> bool {
        self.look_held
    }

    pub fn request_quit(&mut self) {
        self.quit_requested = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Release every key and the look button, e.g. when the window loses focus.
    pub fn clear(&mut self) {
        self.keys_down.clear();
        self.look_held = false;
        self.pointer_delta = Vec2::ZERO;
    }

    /// Reset per-frame accumulators. Held keys persist.
    pub fn end_frame(&mut self) {
        self.pointer_delta = Vec2::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn press_release_tracks_keys() {
        let mut input = InputState::new();
        input.press(Key::W);
        assert!(input.key_down(Key::W));
        assert!(input.action_active(Action::MoveForward));
        input.release(Key::W);
        assert!(!input.action_active(Action::MoveForward));
    }

    #[test]
    fn pointer_delta_accumulates_until_end_frame() {
        let mut input = InputState::new();
        input.add_pointer_delta(Vec2::new(1.0, 2.0));
        input.add_pointer_delta(Vec2::new(3.0, -1.0));
        assert_eq!(input.pointer_delta(), Vec2::new(4.0, 1.0));
        input.end_frame();
        assert_eq!(input.pointer_delta(), Vec2::ZERO);
    }

    #[test]
    fn held_keys_survive_end_frame() {
        let mut input = InputState::new();
        input.press(Key::D);
        input.end_frame();
        assert!(input.action_active(Action::StrafeRight));
    }

    #[test]
    fn escape_requests_quit() {
        let mut input = InputState::new();
        assert!(!input.quit_requested());
        input.press(Key::Escape);
        assert!(input.quit_requested());
    }

    #[test]
    fn clear_drops_everything_held() {
        let mut input = InputState::new();
        input.press(Key::A);
        input.set_look_held(true);
        input.add_pointer_delta(Vec2::ONE);
        input.clear();
        assert!(!input.key_down(Key::A));
        assert!(!input.look_active());
        assert_eq!(input.pointer_delta(), Vec2::ZERO);
    }
}
