use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Physical keys the demo reacts to. Window backends translate their own key codes
/// into these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Key {
    W,
    A,
    S,
    D,
    Q,
    E,
    Space,
    LeftControl,
    LeftShift,
    Escape,
    F1,
}

/// A high-level action produced from input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    MoveForward,
    MoveBackward,
    StrafeLeft,
    StrafeRight,
    MoveUp,
    MoveDown,
    /// Speed multiplier while held.
    Boost,
    Quit,
    ToggleInspector,
}

/// Maps each action to the keys that trigger it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBindings {
    bindings: BTreeMap<Action, Vec<Key>>,
}

impl Default for KeyBindings {
    fn default() -> Self {
        let mut bindings = BTreeMap::new();
        bindings.insert(Action::MoveForward, vec![Key::W]);
        bindings.insert(Action::MoveBackward, vec![Key::S]);
        bindings.insert(Action::StrafeLeft, vec![Key::A]);
        bindings.insert(Action::StrafeRight, vec![Key::D]);
        bindings.insert(Action::MoveUp, vec![Key::Space, Key::E]);
        bindings.insert(Action::MoveDown, vec![Key::LeftControl, Key::Q]);
        bindings.insert(Action::Boost, vec![Key::LeftShift]);
        bindings.insert(Action::Quit, vec![Key::Escape]);
        bindings.insert(Action::ToggleInspector, vec![Key::F1]);
        Self { bindings }
    }
}

impl KeyBindings {
    /// Bindings with nothing mapped.
    pub fn empty() -> Self {
        Self {
            bindings: BTreeMap::new(),
        }
    }

    /// Replace the keys bound to `action`.
    pub fn bind(&mut self, action: Action, keys: Vec<Key>) {
        self.bindings.insert(action, keys);
    }

    pub fn keys_for(&self, action: Action) -> &[Key] {
        self.bindings.get(&action).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first action bound to `key`, if any.
    pub fn action_for(&self, key: Key) -> Option<Action> {
        self.bindings
            .iter()
            .find(|(_, keys)| keys.contains(&key))
            .map(|(action, _)| *action)
    }
}
