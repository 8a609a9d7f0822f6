//! Fan-out delivery to one session or to everyone.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, warn};

use crate::core::connection::{CloseCode, Connection, ConnectionTable};
use crate::core::protocol::Outbound;
use crate::core::session::SessionId;

/// Serializes each message once and hands it to every target connection.
///
/// A connection that refuses a frame is closed with a protocol error and
/// skipped; the remaining targets still receive it. Removal from the table is
/// left to that connection's own reader loop.
pub struct BroadcastBus {
    table: Arc<ConnectionTable>,
    /// Keeps every connection's view of `send_to_all` in submission order.
    fanout: Mutex<()>,
}

impl BroadcastBus {
    pub fn new(table: Arc<ConnectionTable>) -> Self {
        Self {
            table,
            fanout: Mutex::new(()),
        }
    }

    pub fn table(&self) -> &Arc<ConnectionTable> {
        &self.table
    }

    /// Returns how many connections accepted the message.
    pub fn send_to_all(&self, message: &Outbound) -> usize {
        let Some(frame) = encode(message) else {
            return 0;
        };
        let _order = self.fanout.lock();
        self.table
            .all()
            .iter()
            .flat_map(|set| set.iter())
            .filter(|connection| deliver(connection, &frame))
            .count()
    }

    pub fn send_to_one(&self, session: &SessionId, message: &Outbound) -> usize {
        let targets = self.table.for_session(session);
        if targets.is_empty() {
            return 0;
        }
        let Some(frame) = encode(message) else {
            return 0;
        };
        targets
            .iter()
            .filter(|connection| deliver(connection, &frame))
            .count()
    }

    pub fn send_to_connection(&self, connection: &Connection, message: &Outbound) -> bool {
        encode(message).is_some_and(|frame| deliver(connection, &frame))
    }
}

fn encode(message: &Outbound) -> Option<Arc<str>> {
    match message.encode() {
        Ok(frame) => Some(frame),
        Err(err) => {
            error!(error = %err, kind = message.code(), "failed to serialize outbound message");
            None
        }
    }
}

fn deliver(connection: &Connection, frame: &Arc<str>) -> bool {
    match connection.deliver(frame.clone()) {
        Ok(()) => true,
        Err(err) => {
            warn!(
                connection = connection.id(),
                session = %connection.session(),
                error = %err,
                "delivery failed; closing connection"
            );
            connection.close(CloseCode::Protocol);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::connection::Outlet;

    fn bus_with(sessions: usize) -> (BroadcastBus, Vec<(Arc<Connection>, Outlet)>) {
        let table = Arc::new(ConnectionTable::new());
        let mut pairs = Vec::new();
        for _ in 0..sessions {
            let (conn, outlet) = Connection::open(SessionId::generate(), 8);
            table.attach(conn.clone());
            pairs.push((conn, outlet));
        }
        (BroadcastBus::new(table), pairs)
    }

    #[test]
    fn one_broken_connection_does_not_stop_the_rest() {
        let (bus, mut pairs) = bus_with(5);
        let (broken, outlet) = pairs.remove(2);
        drop(outlet);

        let delivered = bus.send_to_all(&Outbound::Chat { text: "hello".into() });
        assert_eq!(delivered, 4);
        assert!(broken.is_closed());
        assert_eq!(broken.close_code(), Some(CloseCode::Protocol));
        for (conn, outlet) in &mut pairs {
            assert!(!conn.is_closed());
            assert!(outlet.frames.try_recv().is_ok());
        }
        // Still registered until its own reader loop notices.
        assert_eq!(bus.table().connection_count(), 5);
    }

    #[test]
    fn saturated_connection_is_closed() {
        let table = Arc::new(ConnectionTable::new());
        let (slow, _slow_outlet) = Connection::open(SessionId::generate(), 1);
        let (fast, mut fast_outlet) = Connection::open(SessionId::generate(), 8);
        table.attach(slow.clone());
        table.attach(fast.clone());
        let bus = BroadcastBus::new(table);

        assert_eq!(bus.send_to_all(&Outbound::RemoveObject { id: 1 }), 2);
        assert_eq!(bus.send_to_all(&Outbound::RemoveObject { id: 2 }), 1);
        assert_eq!(slow.close_code(), Some(CloseCode::Protocol));
        assert!(fast_outlet.frames.try_recv().is_ok());
        assert!(fast_outlet.frames.try_recv().is_ok());
    }

    #[test]
    fn targeted_send_reaches_only_that_session() {
        let table = Arc::new(ConnectionTable::new());
        let session = SessionId::generate();
        let (tab_a, mut out_a) = Connection::open(session.clone(), 8);
        let (tab_b, mut out_b) = Connection::open(session.clone(), 8);
        let (other, mut out_other) = Connection::open(SessionId::generate(), 8);
        for conn in [&tab_a, &tab_b, &other] {
            table.attach(conn.clone());
        }
        let bus = BroadcastBus::new(table);

        let delivered = bus.send_to_one(&session, &Outbound::SetCharacter { character: 4 });
        assert_eq!(delivered, 2);
        assert!(out_a.frames.try_recv().is_ok());
        assert!(out_b.frames.try_recv().is_ok());
        assert!(out_other.frames.try_recv().is_err());
        assert_eq!(bus.send_to_one(&SessionId::generate(), &Outbound::RemoveObject { id: 1 }), 0);
    }

    #[test]
    fn broadcasts_keep_submission_order() {
        let (bus, mut pairs) = bus_with(3);
        for id in 0..5 {
            bus.send_to_all(&Outbound::RemoveObject { id });
        }
        for (_, outlet) in &mut pairs {
            let mut seen = Vec::new();
            while let Ok(frame) = outlet.frames.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
                seen.push(value["obj"]["id"].as_u64().unwrap());
            }
            assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        }
    }
}
