use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::core::scene::SceneObject;

/// Longest line a character will say; longer text is cut.
const MAX_SPEECH_CHARS: usize = 280;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Gesture {
    #[default]
    Idle,
    Wave,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CharacterState {
    pub x: f64,
    pub z: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speech: Option<String>,
    pub gesture: Gesture,
}

/// A user's controllable entity.
///
/// Scripts and the network layer touch it from different threads, so the
/// state sits behind a lock.
#[derive(Debug)]
pub struct Character {
    state: Mutex<CharacterState>,
}

impl Character {
    pub fn new(x: f64, z: f64) -> Self {
        Self {
            state: Mutex::new(CharacterState {
                x,
                z,
                speech: None,
                gesture: Gesture::Idle,
            }),
        }
    }

    pub fn position(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.x, state.z)
    }

    /// Non-finite coordinates are ignored.
    pub fn move_to(&self, x: f64, z: f64) -> bool {
        if !x.is_finite() || !z.is_finite() {
            return false;
        }
        let mut state = self.state.lock();
        state.x = x;
        state.z = z;
        true
    }

    pub fn say(&self, text: &str) {
        let line: String = text.chars().take(MAX_SPEECH_CHARS).collect();
        self.state.lock().speech = (!line.is_empty()).then_some(line);
    }

    pub fn wave(&self) {
        self.state.lock().gesture = Gesture::Wave;
    }

    pub fn current(&self) -> CharacterState {
        self.state.lock().clone()
    }
}

impl SceneObject for Character {
    fn kind(&self) -> &'static str {
        "character"
    }

    fn state(&self) -> Value {
        serde_json::to_value(&*self.state.lock()).unwrap_or_default()
    }
}
