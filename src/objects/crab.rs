use serde::Serialize;
use serde_json::Value;

use crate::core::scene::SceneObject;

/// Fixed background decoration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Crab {
    pub x: f64,
    pub z: f64,
}

impl Crab {
    pub fn new(x: f64, z: f64) -> Self {
        Self { x, z }
    }
}

impl SceneObject for Crab {
    fn kind(&self) -> &'static str {
        "crab"
    }

    fn state(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
