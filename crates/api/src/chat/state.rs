//! Shared chat state
//!
//! Registry of live connections plus the room bus and presence registry they
//! share. One instance lives inside the application state for the whole
//! process lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;
use super::presence::PresenceRegistry;
use super::room::{RoomBus, RoomId};

pub struct ChatState {
    /// Map of connection_id -> connection
    connections: RwLock<HashMap<Uuid, Arc<Connection>>>,

    pub bus: Arc<dyn RoomBus>,

    pub presence: Arc<PresenceRegistry>,
}

impl ChatState {
    pub fn new(bus: Arc<dyn RoomBus>, presence: Arc<PresenceRegistry>) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            bus,
            presence,
        }
    }

    pub async fn add_connection(&self, conn: Arc<Connection>) {
        let mut connections = self.connections.write().await;
        connections.insert(conn.id, Arc::clone(&conn));

        tracing::info!(
            connection_id = %conn.id,
            user_id = %conn.user_id,
            role = %conn.role.as_str(),
            total = connections.len(),
            "Chat connection registered"
        );
    }

    pub async fn get_connection(&self, connection_id: Uuid) -> Option<Arc<Connection>> {
        let connections = self.connections.read().await;
        connections.get(&connection_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }

    /// Tear down everything a dropped connection owned: room memberships,
    /// presence entries, and `UserLeft` notices for the session rooms it was
    /// in. Membership is entirely lost on disconnect; nothing survives for a
    /// later reconnect.
    pub async fn remove_connection(&self, connection_id: Uuid) {
        let conn = {
            let mut connections = self.connections.write().await;
            connections.remove(&connection_id)
        };

        let Some(conn) = conn else {
            return;
        };

        let joined = conn.joined_rooms().await;
        self.bus.remove_connection(connection_id).await;
        self.presence.clear_connection(connection_id).await;

        // Notify remaining session participants after membership is gone so
        // the departed connection never receives its own notice.
        for room in joined {
            if let RoomId::Session(session_id) = room {
                self.bus
                    .publish(
                        &room,
                        ServerEvent::UserLeft {
                            session_id,
                            user_id: conn.user_id,
                        },
                    )
                    .await;
            }
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %conn.user_id,
            "Chat connection removed"
        );
    }
}
