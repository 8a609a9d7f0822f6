//! Live connections and the per-session connection table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::session::SessionId;
use crate::error::DeliveryError;

/// Default depth of a connection's outbound queue.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

pub type ConnectionId = u64;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    /// A send failed; the peer is considered broken.
    Protocol,
    /// The peer broke the session contract (no or invalid session).
    Policy,
}

/// Server-side handle to one open channel.
///
/// Frames are pushed into a bounded queue and written by the connection's own
/// writer task, so enqueueing never waits on the network.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    session: SessionId,
    outbox: mpsc::Sender<Arc<str>>,
    shutdown: CancellationToken,
    close_code: OnceLock<CloseCode>,
}

/// Receiving half handed to the writer task.
#[derive(Debug)]
pub struct Outlet {
    pub frames: mpsc::Receiver<Arc<str>>,
    pub shutdown: CancellationToken,
}

impl Connection {
    pub fn open(session: SessionId, depth: usize) -> (Arc<Self>, Outlet) {
        let (outbox, frames) = mpsc::channel(depth.max(1));
        let shutdown = CancellationToken::new();
        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            session,
            outbox,
            shutdown: shutdown.clone(),
            close_code: OnceLock::new(),
        });
        (connection, Outlet { frames, shutdown })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Queue an already serialized frame.
    pub fn deliver(&self, frame: Arc<str>) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError::Closed);
        }
        self.outbox.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => DeliveryError::Saturated,
            mpsc::error::TrySendError::Closed(_) => DeliveryError::Closed,
        })
    }

    /// Ask the writer task to close the channel. The first code wins.
    pub fn close(&self, code: CloseCode) {
        let _ = self.close_code.set(code);
        self.shutdown.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled() || self.outbox.is_closed()
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code.get().copied()
    }
}

type ConnectionSet = ArcSwap<Vec<Arc<Connection>>>;

/// Session → open connections.
///
/// Each session's set is copy-on-write: writers swap in a new vector while
/// readers keep iterating the one they loaded.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    sessions: DashMap<SessionId, ConnectionSet>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection, returning how many the session now has.
    pub fn attach(&self, connection: Arc<Connection>) -> usize {
        let set = self
            .sessions
            .entry(connection.session().clone())
            .or_insert_with(|| ArcSwap::from_pointee(Vec::new()));
        set.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push(connection.clone());
            next
        });
        set.load().len()
    }

    /// Drop a connection, returning how many the session still has.
    pub fn detach(&self, session: &SessionId, connection: ConnectionId) -> usize {
        match self.sessions.entry(session.clone()) {
            Entry::Occupied(entry) => {
                entry.get().rcu(|current| {
                    current
                        .iter()
                        .filter(|c| c.id() != connection)
                        .cloned()
                        .collect::<Vec<_>>()
                });
                let remaining = entry.get().load().len();
                if remaining == 0 {
                    entry.remove();
                }
                remaining
            }
            Entry::Vacant(_) => 0,
        }
    }

    pub fn for_session(&self, session: &SessionId) -> Arc<Vec<Arc<Connection>>> {
        self.sessions
            .get(session)
            .map(|set| set.load_full())
            .unwrap_or_default()
    }

    /// Snapshot of every session's set, taken without holding any lock afterwards.
    pub fn all(&self) -> Vec<Arc<Vec<Arc<Connection>>>> {
        self.sessions.iter().map(|set| set.load_full()).collect()
    }

    pub fn count(&self, session: &SessionId) -> usize {
        self.sessions.get(session).map_or(0, |set| set.load().len())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.iter().map(|set| set.load().len()).sum()
    }
}
