use std::collections::HashMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

use crate::error::SendError;
use crate::protocol::ServerEnvelope;

pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Outbound side of one live connection.
///
/// Sends never wait: a full queue drops the message so a slow peer cannot
/// stall the session that is talking to it.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: Uuid,
    tx: mpsc::Sender<ServerEnvelope>,
}

impl ConnectionHandle {
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerEnvelope>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn send(&self, message: ServerEnvelope) -> Result<(), SendError> {
        self.tx.try_send(message).map_err(|err| match err {
            TrySendError::Full(_) => SendError::QueueFull,
            TrySendError::Closed(_) => SendError::Closed,
        })
    }
}

/// Live outbound channels keyed by user identifier.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: HashMap<String, ConnectionHandle>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uid: &str, handle: ConnectionHandle) {
        self.connections.insert(uid.to_string(), handle);
    }

    pub fn get(&self, uid: &str) -> Option<&ConnectionHandle> {
        self.connections.get(uid)
    }

    /// Connection id currently attached to `uid`.
    pub fn owner(&self, uid: &str) -> Option<Uuid> {
        self.connections.get(uid).map(ConnectionHandle::id)
    }

    /// Removes the entry for `uid` only if it belongs to `connection_id`.
    pub fn remove_owned(&mut self, uid: &str, connection_id: Uuid) -> Option<ConnectionHandle> {
        match self.connections.get(uid) {
            Some(handle) if handle.id == connection_id => self.connections.remove(uid),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Phase;

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let (handle, mut rx) = ConnectionHandle::channel(1);
        handle.send(ServerEnvelope::stop()).unwrap();
        assert_eq!(
            handle.send(ServerEnvelope::stop()),
            Err(SendError::QueueFull)
        );

        assert_eq!(rx.try_recv().unwrap(), ServerEnvelope::stop());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn send_after_receiver_dropped_reports_closed() {
        let (handle, rx) = ConnectionHandle::channel(4);
        drop(rx);
        assert_eq!(
            handle.send(ServerEnvelope::relayed(Phase::Offer, "sdp")),
            Err(SendError::Closed)
        );
    }

    #[test]
    fn remove_owned_ignores_foreign_connection() {
        let mut table = ConnectionTable::new();
        let (first, _rx1) = ConnectionHandle::channel(4);
        let (second, _rx2) = ConnectionHandle::channel(4);

        table.insert("alice", second.clone());
        assert!(table.remove_owned("alice", first.id()).is_none());
        assert_eq!(table.owner("alice"), Some(second.id()));

        assert!(table.remove_owned("alice", second.id()).is_some());
        assert!(table.remove_owned("alice", second.id()).is_none());
        assert!(table.is_empty());
    }
}
