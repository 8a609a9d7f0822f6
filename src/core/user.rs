//! Per-session server state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::core::scene::ObjectId;
use crate::core::session::SessionId;
use crate::objects::Character;

/// A character together with the id the scene assigned it.
#[derive(Debug, Clone)]
pub struct CharacterSlot {
    pub id: ObjectId,
    pub character: Arc<Character>,
}

#[derive(Debug)]
struct ExecutionTicket {
    generation: u64,
    cancel: CancellationToken,
}

/// Name, character and in-flight script of one session.
#[derive(Debug)]
pub struct UserDescriptor {
    session: SessionId,
    name: RwLock<String>,
    character: RwLock<CharacterSlot>,
    execution: Mutex<Option<ExecutionTicket>>,
    generations: AtomicU64,
}

impl UserDescriptor {
    pub fn new(session: SessionId, name: String, character: CharacterSlot) -> Self {
        Self {
            session,
            name: RwLock::new(name),
            character: RwLock::new(character),
            execution: Mutex::new(None),
            generations: AtomicU64::new(0),
        }
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    pub fn name(&self) -> String {
        self.name.read().clone()
    }

    pub fn rename(&self, name: String) {
        *self.name.write() = name;
    }

    pub fn character(&self) -> CharacterSlot {
        self.character.read().clone()
    }

    pub fn character_id(&self) -> ObjectId {
        self.character.read().id
    }

    pub fn assign_character(&self, slot: CharacterSlot) {
        *self.character.write() = slot;
    }

    /// Claim the execution slot, cancelling whatever held it before.
    pub fn begin_execution(&self) -> (u64, CancellationToken) {
        let mut slot = self.execution.lock();
        if let Some(previous) = slot.take() {
            previous.cancel.cancel();
        }
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let cancel = CancellationToken::new();
        *slot = Some(ExecutionTicket {
            generation,
            cancel: cancel.clone(),
        });
        (generation, cancel)
    }

    /// Whether `generation` still owns the slot.
    pub fn is_current(&self, generation: u64) -> bool {
        self.execution
            .lock()
            .as_ref()
            .is_some_and(|ticket| ticket.generation == generation)
    }

    /// Release the slot if `generation` still owns it. Returns whether it did.
    pub fn finish_execution(&self, generation: u64) -> bool {
        let mut slot = self.execution.lock();
        if slot.as_ref().is_some_and(|ticket| ticket.generation == generation) {
            *slot = None;
            true
        } else {
            false
        }
    }

    pub fn cancel_execution(&self) {
        if let Some(ticket) = self.execution.lock().take() {
            ticket.cancel.cancel();
        }
    }

    pub fn is_running(&self) -> bool {
        self.execution.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user() -> UserDescriptor {
        let slot = CharacterSlot {
            id: 1,
            character: Arc::new(Character::new(0.0, 0.0)),
        };
        UserDescriptor::new(SessionId::generate(), "user1".into(), slot)
    }

    #[test]
    fn new_execution_supersedes_the_old_one() {
        let user = user();
        let (first, first_cancel) = user.begin_execution();
        let (second, second_cancel) = user.begin_execution();
        assert!(first_cancel.is_cancelled());
        assert!(!second_cancel.is_cancelled());
        assert!(!user.is_current(first));
        assert!(user.is_current(second));
        assert!(!user.finish_execution(first));
        assert!(user.is_running());
        assert!(user.finish_execution(second));
        assert!(!user.is_running());
    }

    #[test]
    fn cancel_clears_the_slot() {
        let user = user();
        let (generation, cancel) = user.begin_execution();
        user.cancel_execution();
        assert!(cancel.is_cancelled());
        assert!(!user.is_current(generation));
    }

    #[test]
    fn rename_and_reassign() {
        let user = user();
        user.rename("<b>zed</b>".into());
        assert_eq!(user.name(), "<b>zed</b>");
        user.assign_character(CharacterSlot {
            id: 42,
            character: Arc::new(Character::new(1.0, 1.0)),
        });
        assert_eq!(user.character_id(), 42);
    }
}
