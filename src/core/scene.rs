//! The shared scene: every live object, its id, and the rebuild gate.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::core::broadcast::BroadcastBus;
use crate::core::connection::Connection;
use crate::core::protocol::Outbound;
use crate::core::registry::ConnectionRegistry;
use crate::core::user::CharacterSlot;
use crate::objects::{Character, Crab};

pub type ObjectId = u64;

/// Background crabs placed on every rebuild.
pub const DEFAULT_FIXTURES: [(f64, f64); 2] = [(-5.0, 10.0), (5.0, 10.0)];

/// Anything that can live in the scene.
pub trait SceneObject: Send + Sync + fmt::Debug {
    fn kind(&self) -> &'static str;
    fn state(&self) -> Value;
}

/// Serialized form of one object as it goes over the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectView {
    pub id: ObjectId,
    pub kind: String,
    pub state: Value,
}

impl ObjectView {
    fn of(id: ObjectId, object: &dyn SceneObject) -> Self {
        Self {
            id,
            kind: object.kind().to_string(),
            state: object.state(),
        }
    }
}

#[derive(Debug, Clone)]
struct SceneEntry {
    id: ObjectId,
    object: Arc<dyn SceneObject>,
}

#[derive(Debug, Default)]
struct SceneState {
    objects: Vec<SceneEntry>,
    /// While set, additions are not announced individually.
    bulk_load: bool,
}

impl SceneState {
    fn views(&self) -> Vec<ObjectView> {
        self.objects
            .iter()
            .map(|entry| ObjectView::of(entry.id, entry.object.as_ref()))
            .collect()
    }
}

pub struct SceneRegistry {
    bus: Arc<BroadcastBus>,
    fixtures: Vec<(f64, f64)>,
    next_id: AtomicU64,
    state: Mutex<SceneState>,
    rebuild: RwLock<()>,
}

impl fmt::Debug for SceneRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneRegistry")
            .field("len", &self.len())
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl SceneRegistry {
    pub fn new(bus: Arc<BroadcastBus>) -> Self {
        Self::with_fixtures(bus, DEFAULT_FIXTURES.to_vec())
    }

    pub fn with_fixtures(bus: Arc<BroadcastBus>, fixtures: Vec<(f64, f64)>) -> Self {
        Self {
            bus,
            fixtures,
            next_id: AtomicU64::new(1),
            state: Mutex::new(SceneState::default()),
            rebuild: RwLock::new(()),
        }
    }

    pub fn bus(&self) -> &Arc<BroadcastBus> {
        &self.bus
    }

    /// Shared side of the rebuild gate. Held by join and leave so they never
    /// interleave with [`SceneRegistry::reset`].
    pub(crate) fn shared_gate(&self) -> RwLockReadGuard<'_, ()> {
        self.rebuild.read()
    }

    pub fn add(&self, object: Arc<dyn SceneObject>) -> ObjectId {
        let mut state = self.state.lock();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let announce = (!state.bulk_load).then(|| ObjectView::of(id, object.as_ref()));
        state.objects.push(SceneEntry { id, object });
        // Announced under the lock so add/remove events reach clients in id order.
        if let Some(view) = announce {
            self.bus.send_to_all(&Outbound::AddObject(view));
        }
        id
    }

    /// Remove an object. Removals are announced even during a bulk load.
    pub fn remove(&self, id: ObjectId) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.objects.iter().position(|entry| entry.id == id) else {
            return false;
        };
        state.objects.remove(index);
        self.bus.send_to_all(&Outbound::RemoveObject { id });
        true
    }

    /// Announce the current state of a live object after it changed.
    pub fn touch(&self, id: ObjectId) -> bool {
        let state = self.state.lock();
        if state.bulk_load {
            return false;
        }
        let Some(entry) = state.objects.iter().find(|entry| entry.id == id) else {
            return false;
        };
        let view = ObjectView::of(entry.id, entry.object.as_ref());
        self.bus.send_to_all(&Outbound::UpdateObject(view));
        true
    }

    pub fn snapshot(&self) -> Vec<ObjectView> {
        self.state.lock().views()
    }

    /// Queue a full snapshot on one connection. Built and queued under the
    /// scene lock, so it lands in order with add and remove events.
    pub fn send_snapshot_to(&self, connection: &Connection) -> bool {
        let state = self.state.lock();
        self.bus.send_to_connection(
            connection,
            &Outbound::SetLocation {
                objects: state.views(),
            },
        )
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.state.lock().objects.iter().any(|entry| entry.id == id)
    }

    pub fn kind_of(&self, id: ObjectId) -> Option<&'static str> {
        self.state
            .lock()
            .objects
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.object.kind())
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.state.lock().objects.iter().map(|entry| entry.id).collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Place a new controllable character somewhere near the origin.
    pub fn spawn_character(&self) -> CharacterSlot {
        let mut rng = rand::rng();
        let character = Arc::new(Character::new(
            rng.random_range(0.0..5.0),
            rng.random_range(0.0..5.0),
        ));
        let id = self.add(character.clone());
        CharacterSlot { id, character }
    }

    pub fn spawn_crab(&self, x: f64, z: f64) -> ObjectId {
        self.add(Arc::new(Crab::new(x, z)))
    }

    /// Rebuild the scene from scratch.
    ///
    /// Every user gets a fresh character. Instead of one add-event per object,
    /// clients receive a single snapshot followed by their own character
    /// assignment. Joins and leaves wait until the rebuild is complete.
    pub fn reset(&self, registry: &ConnectionRegistry) {
        let _exclusive = self.rebuild.write();
        {
            let mut state = self.state.lock();
            state.bulk_load = true;
            state.objects.clear();
        }
        for &(x, z) in &self.fixtures {
            self.spawn_crab(x, z);
        }

        let users = registry.users();
        for user in &users {
            user.cancel_execution();
            user.assign_character(self.spawn_character());
        }

        {
            let mut state = self.state.lock();
            state.bulk_load = false;
            self.bus.send_to_all(&Outbound::SetLocation {
                objects: state.views(),
            });
        }
        for user in &users {
            self.bus.send_to_one(
                user.session(),
                &Outbound::SetCharacter {
                    character: user.character_id(),
                },
            );
        }
        info!(users = users.len(), objects = self.len(), "scene reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::{ConnectionTable, Outlet};
    use crate::core::session::SessionId;
    use serde_json::json;

    fn scene() -> (Arc<SceneRegistry>, Arc<ConnectionTable>) {
        let table = Arc::new(ConnectionTable::new());
        let bus = Arc::new(BroadcastBus::new(table.clone()));
        (Arc::new(SceneRegistry::new(bus)), table)
    }

    fn listener(table: &ConnectionTable) -> Outlet {
        let (conn, outlet) = Connection::open(SessionId::generate(), 64);
        table.attach(conn);
        outlet
    }

    fn drain(outlet: &mut Outlet) -> Vec<serde_json::Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = outlet.frames.try_recv() {
            frames.push(serde_json::from_str(&frame).unwrap());
        }
        frames
    }

    #[test]
    fn ids_are_monotonic_and_not_reused() {
        let (scene, _table) = scene();
        let a = scene.spawn_crab(0.0, 0.0);
        let b = scene.spawn_crab(1.0, 1.0);
        assert!(b > a);
        assert!(scene.remove(a));
        let c = scene.spawn_crab(2.0, 2.0);
        assert!(c > b);
        assert_eq!(scene.ids(), vec![b, c]);
    }

    #[test]
    fn size_tracks_adds_minus_removes() {
        let (scene, _table) = scene();
        let ids: Vec<_> = (0..10).map(|i| scene.spawn_crab(i as f64, 0.0)).collect();
        for id in ids.iter().step_by(3) {
            assert!(scene.remove(*id));
        }
        assert!(!scene.remove(ids[0]));
        assert_eq!(scene.len(), 10 - 4);
    }

    #[test]
    fn add_and_remove_are_announced() {
        let (scene, table) = scene();
        let mut outlet = listener(&table);
        let id = scene.spawn_crab(1.0, 2.0);
        scene.remove(id);
        let frames = drain(&mut outlet);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], json!(3));
        assert_eq!(frames[0]["obj"]["kind"], json!("crab"));
        assert_eq!(frames[1], json!({"type": 4, "obj": {"id": id}}));
    }

    #[test]
    fn touch_reports_character_changes() {
        let (scene, table) = scene();
        let slot = scene.spawn_character();
        let mut outlet = listener(&table);
        slot.character.move_to(3.0, 4.0);
        assert!(scene.touch(slot.id));
        assert!(!scene.touch(9999));
        let frames = drain(&mut outlet);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0]["type"], json!(6));
        assert_eq!(frames[0]["obj"]["state"]["x"], json!(3.0));
    }

    #[test]
    fn reset_with_no_users_sends_one_snapshot() {
        let (scene, table) = scene();
        scene.spawn_crab(9.0, 9.0);
        let mut outlet = listener(&table);
        let registry = ConnectionRegistry::new(scene.clone());
        scene.reset(&registry);
        scene.reset(&registry);

        let frames = drain(&mut outlet);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f["type"] == json!(1)));
        assert_eq!(frames[1]["obj"]["objects"].as_array().unwrap().len(), DEFAULT_FIXTURES.len());
        assert_eq!(scene.len(), DEFAULT_FIXTURES.len());
    }
}
