//! What a submitted script can see: its own character and the world.

use std::sync::Arc;

use rhai::{Array, Dynamic, Engine, ImmutableString, FLOAT, INT};

use crate::core::scene::{ObjectId, SceneRegistry};
use crate::core::user::CharacterSlot;
use crate::objects::Character;

/// The caller's own character, exposed to scripts as `character`.
#[derive(Debug, Clone)]
pub struct CharacterHandle {
    id: ObjectId,
    character: Arc<Character>,
    scene: Arc<SceneRegistry>,
}

impl CharacterHandle {
    pub fn new(slot: CharacterSlot, scene: Arc<SceneRegistry>) -> Self {
        Self {
            id: slot.id,
            character: slot.character,
            scene,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn character(&self) -> &Character {
        &self.character
    }

    pub fn move_to(&self, x: f64, z: f64) -> bool {
        let moved = self.character.move_to(x, z);
        if moved {
            self.scene.touch(self.id);
        }
        moved
    }

    pub fn say(&self, text: &str) {
        self.character.say(text);
        self.scene.touch(self.id);
    }

    pub fn wave(&self) {
        self.character.wave();
        self.scene.touch(self.id);
    }
}

/// The shared scene, exposed to scripts as `world`.
#[derive(Debug, Clone)]
pub struct WorldHandle {
    scene: Arc<SceneRegistry>,
}

impl WorldHandle {
    pub fn new(scene: Arc<SceneRegistry>) -> Self {
        Self { scene }
    }

    fn count(&mut self) -> INT {
        self.scene.len() as INT
    }

    fn ids(&mut self) -> Array {
        self.scene
            .ids()
            .into_iter()
            .map(|id| Dynamic::from(id as INT))
            .collect()
    }

    fn spawn_crab(&mut self, x: FLOAT, z: FLOAT) -> INT {
        if !x.is_finite() || !z.is_finite() {
            return -1;
        }
        self.scene.spawn_crab(x, z) as INT
    }

    /// Characters belong to their users and cannot be removed from a script.
    fn remove(&mut self, id: INT) -> bool {
        let Ok(id) = ObjectId::try_from(id) else {
            return false;
        };
        match self.scene.kind_of(id) {
            Some(kind) if kind != "character" => self.scene.remove(id),
            _ => false,
        }
    }
}

pub fn register_api(engine: &mut Engine) {
    engine.register_type_with_name::<CharacterHandle>("Character");
    engine.register_get("id", |c: &mut CharacterHandle| c.id as INT);
    engine.register_get("x", |c: &mut CharacterHandle| c.character.position().0);
    engine.register_get("z", |c: &mut CharacterHandle| c.character.position().1);
    engine.register_fn("move_to", |c: &mut CharacterHandle, x: FLOAT, z: FLOAT| {
        c.move_to(x, z)
    });
    engine.register_fn("move_to", |c: &mut CharacterHandle, x: INT, z: INT| {
        c.move_to(x as FLOAT, z as FLOAT)
    });
    engine.register_fn("say", |c: &mut CharacterHandle, text: ImmutableString| {
        c.say(text.as_str())
    });
    engine.register_fn("wave", |c: &mut CharacterHandle| c.wave());

    engine.register_type_with_name::<WorldHandle>("World");
    engine.register_fn("count", WorldHandle::count);
    engine.register_fn("ids", WorldHandle::ids);
    engine.register_fn("spawn_crab", WorldHandle::spawn_crab);
    engine.register_fn("spawn_crab", |w: &mut WorldHandle, x: INT, z: INT| {
        w.spawn_crab(x as FLOAT, z as FLOAT)
    });
    engine.register_fn("remove", WorldHandle::remove);
}
