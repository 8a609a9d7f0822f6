//! Which sessions are present, their connections, and their user state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use crate::core::broadcast::BroadcastBus;
use crate::core::connection::{Connection, ConnectionTable};
use crate::core::history::MessageHistory;
use crate::core::protocol::Outbound;
use crate::core::scene::SceneRegistry;
use crate::core::session::SessionId;
use crate::core::user::UserDescriptor;

/// Owns every [`UserDescriptor`].
///
/// A descriptor exists exactly while its session has at least one open
/// connection. Join and leave for one session are serialized on that
/// session's map entry; different sessions proceed independently.
pub struct ConnectionRegistry {
    users: DashMap<SessionId, Arc<UserDescriptor>>,
    table: Arc<ConnectionTable>,
    scene: Arc<SceneRegistry>,
    bus: Arc<BroadcastBus>,
    /// Never decremented, so display names are never reused.
    user_counter: AtomicU64,
    replay: Option<Arc<MessageHistory>>,
}

impl ConnectionRegistry {
    pub fn new(scene: Arc<SceneRegistry>) -> Self {
        let bus = scene.bus().clone();
        Self {
            users: DashMap::new(),
            table: bus.table().clone(),
            scene,
            bus,
            user_counter: AtomicU64::new(0),
            replay: None,
        }
    }

    /// Send recent chat to every newly joined connection.
    pub fn with_history_replay(mut self, history: Arc<MessageHistory>) -> Self {
        self.replay = Some(history);
        self
    }

    /// Register `connection` under its session, creating the user on first
    /// join, then bring this connection (and only it) up to date.
    pub fn join(&self, connection: &Arc<Connection>) -> Arc<UserDescriptor> {
        let _gate = self.scene.shared_gate();
        let session = connection.session().clone();

        let user = match self.users.entry(session.clone()) {
            Entry::Occupied(entry) => {
                self.table.attach(connection.clone());
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let character = self.scene.spawn_character();
                let number = self.user_counter.fetch_add(1, Ordering::Relaxed) + 1;
                let user = Arc::new(UserDescriptor::new(
                    session.clone(),
                    format!("user{number}"),
                    character,
                ));
                self.table.attach(connection.clone());
                entry.insert(user.clone());
                info!(session = %session, name = %user.name(), "user created");
                user
            }
        };

        self.scene.send_snapshot_to(connection);
        self.bus.send_to_connection(
            connection,
            &Outbound::SetCharacter {
                character: user.character_id(),
            },
        );
        if let Some(history) = &self.replay {
            for text in history.snapshot() {
                self.bus.send_to_connection(connection, &Outbound::Chat { text });
            }
        }
        debug!(session = %session, connection = connection.id(), "connection joined");
        user
    }

    /// Unregister `connection`. When it was the session's last one the user is
    /// dropped, its script cancelled and its character removed from the scene.
    pub fn leave(&self, connection: &Connection) -> Option<Arc<UserDescriptor>> {
        let _gate = self.scene.shared_gate();
        let session = connection.session();

        let removed = match self.users.entry(session.clone()) {
            Entry::Occupied(entry) => {
                if self.table.detach(session, connection.id()) == 0 {
                    Some(entry.remove())
                } else {
                    None
                }
            }
            Entry::Vacant(_) => {
                self.table.detach(session, connection.id());
                None
            }
        };
        debug!(session = %session, connection = connection.id(), "connection left");

        let user = removed?;
        user.cancel_execution();
        self.scene.remove(user.character_id());
        info!(session = %session, name = %user.name(), "user left");
        Some(user)
    }

    /// Names are stored as given; escaping is the client's job.
    pub fn rename(&self, session: &SessionId, name: String) -> bool {
        match self.users.get(session) {
            Some(user) => {
                user.rename(name);
                true
            }
            None => false,
        }
    }

    pub fn user(&self, session: &SessionId) -> Option<Arc<UserDescriptor>> {
        self.users.get(session).map(|user| user.clone())
    }

    pub fn display_name(&self, session: &SessionId) -> Option<String> {
        self.users.get(session).map(|user| user.name())
    }

    pub fn users(&self) -> Vec<Arc<UserDescriptor>> {
        self.users.iter().map(|user| user.value().clone()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.table.connection_count()
    }

    pub fn scene(&self) -> &Arc<SceneRegistry> {
        &self.scene
    }

    pub fn bus(&self) -> &Arc<BroadcastBus> {
        &self.bus
    }
}
