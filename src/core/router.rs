//! Turns connection events and inbound frames into registry, scene and script calls.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::core::broadcast::BroadcastBus;
use crate::core::connection::Connection;
use crate::core::history::MessageHistory;
use crate::core::protocol::{Inbound, Outbound};
use crate::core::registry::ConnectionRegistry;
use crate::core::session::SessionId;
use crate::core::user::UserDescriptor;
use crate::scripting::ScriptEngine;

#[derive(Clone)]
pub struct Router {
    registry: Arc<ConnectionRegistry>,
    history: Arc<MessageHistory>,
    scripts: ScriptEngine,
}

impl Router {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        history: Arc<MessageHistory>,
        scripts: ScriptEngine,
    ) -> Self {
        Self {
            registry,
            history,
            scripts,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn history(&self) -> &Arc<MessageHistory> {
        &self.history
    }

    pub fn scripts(&self) -> &ScriptEngine {
        &self.scripts
    }

    fn bus(&self) -> &Arc<BroadcastBus> {
        self.registry.bus()
    }

    pub fn on_join(&self, connection: &Arc<Connection>) -> Arc<UserDescriptor> {
        self.registry.join(connection)
    }

    pub fn on_leave(&self, connection: &Connection) {
        self.registry.leave(connection);
    }

    /// Frames that fail to parse are logged and dropped; the connection stays up.
    pub fn handle_text(&self, session: &SessionId, text: &str) {
        match Inbound::parse(text) {
            Ok(message) => self.handle(session, message),
            Err(err) => warn!(session = %session, error = %err, "ignoring inbound frame"),
        }
    }

    pub fn handle(&self, session: &SessionId, message: Inbound) {
        match message {
            Inbound::Eval { code } => match self.registry.user(session) {
                Some(user) => {
                    self.scripts.submit(user, code);
                }
                None => warn!(session = %session, "eval from a session with no user"),
            },
            Inbound::RestartLocation => {
                info!(session = %session, "location restart requested");
                self.registry.scene().reset(&self.registry);
            }
            Inbound::Chat { text } => self.chat(session, &text),
            Inbound::Rename { name } => {
                if name.trim().is_empty() {
                    debug!(session = %session, "blank name ignored");
                    return;
                }
                if self.registry.rename(session, name.clone()) {
                    info!(session = %session, name = %name, "user renamed");
                }
            }
        }
    }

    fn chat(&self, session: &SessionId, text: &str) {
        let name = self
            .registry
            .display_name(session)
            .unwrap_or_else(|| session.to_string());
        let line = format!("[{name}] {text}");
        self.history.append(line.clone());
        let delivered = self.bus().send_to_all(&Outbound::Chat { text: line });
        debug!(session = %session, delivered, "chat relayed");
    }
}
