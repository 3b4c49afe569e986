//! Chat connection management
//!
//! Represents one active WebSocket connection with its authenticated (or
//! anonymous) participant identity and the set of rooms it joined.

use std::collections::HashSet;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use pharmachat_shared::ParticipantRole;

use super::events::ServerEvent;
use super::room::RoomId;

/// Represents an active chat connection
#[derive(Debug)]
pub struct Connection {
    /// Unique id for this connection
    pub id: Uuid,

    /// Participant identity (a fresh Uuid for anonymous customers)
    pub user_id: Uuid,

    /// Display name
    pub user_name: String,

    /// Authenticated role
    pub role: ParticipantRole,

    /// Channel to send events to this connection
    pub sender: mpsc::UnboundedSender<ServerEvent>,

    /// Rooms this connection has joined
    pub joined: RwLock<HashSet<RoomId>>,
}

impl Connection {
    /// Create a new connection
    pub fn new(
        user_id: Uuid,
        user_name: String,
        role: ParticipantRole,
        sender: mpsc::UnboundedSender<ServerEvent>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            user_name,
            role,
            sender,
            joined: RwLock::new(HashSet::new()),
        }
    }

    /// Send an event to this connection
    ///
    /// Returns Ok(()) if sent successfully, Err if connection is closed
    #[allow(clippy::result_large_err)] // Error type is from tokio mpsc, containing the failed event
    pub fn send(&self, event: ServerEvent) -> Result<(), mpsc::error::SendError<ServerEvent>> {
        self.sender.send(event)
    }

    /// Track a joined room
    pub async fn track_join(&self, room: RoomId) {
        let mut joined = self.joined.write().await;
        joined.insert(room);
    }

    /// Untrack a left room
    pub async fn track_leave(&self, room: &RoomId) {
        let mut joined = self.joined.write().await;
        joined.remove(room);
    }

    /// Rooms joined so far (snapshot)
    pub async fn joined_rooms(&self) -> HashSet<RoomId> {
        let joined = self.joined.read().await;
        joined.clone()
    }

    pub fn is_staff(&self) -> bool {
        self.role.is_staff()
    }
}

/// Test helper: connection plus the receiving end of its event channel.
#[cfg(test)]
pub(crate) fn test_connection(
    role: ParticipantRole,
    name: &str,
) -> (
    std::sync::Arc<Connection>,
    mpsc::UnboundedReceiver<ServerEvent>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        std::sync::Arc::new(Connection::new(Uuid::new_v4(), name.to_string(), role, tx)),
        rx,
    )
}
