//! Room multiplexer for pub/sub fan-out
//!
//! Rooms are ephemeral broadcast groups: one per chat session, one per store,
//! one admin dashboard, one for online agents. Membership is entirely lost on
//! disconnect. The multiplexer owns every membership table; connection
//! handlers interact with it only through [`RoomBus`] calls, never through
//! another handler's state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::connection::Connection;
use super::events::ServerEvent;

/// Identifies one broadcast group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomId {
    /// All participants of one chat session
    Session(Uuid),
    /// Staff watching one store's sessions
    Store(Uuid),
    /// Global staff dashboard
    AdminDashboard,
    /// Agents announcing availability
    OnlineAgents,
}

impl std::fmt::Display for RoomId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoomId::Session(id) => write!(f, "session:{id}"),
            RoomId::Store(id) => write!(f, "store:{id}"),
            RoomId::AdminDashboard => write!(f, "admin-dashboard"),
            RoomId::OnlineAgents => write!(f, "online-agents"),
        }
    }
}

/// Pub/sub seam between business logic and fan-out infrastructure.
///
/// The in-memory implementation below serves a single process; a
/// broker-backed implementation can replace it without touching the
/// lifecycle manager or delivery pipeline.
#[async_trait]
pub trait RoomBus: Send + Sync {
    /// Add a connection to a room.
    async fn join(&self, room: RoomId, conn: Arc<Connection>);

    /// Remove a connection from a room.
    async fn leave(&self, room: &RoomId, connection_id: Uuid);

    /// Deliver the event exactly once to every connection currently joined,
    /// including the publisher. Per-room delivery order follows publish order.
    async fn publish(&self, room: &RoomId, event: ServerEvent);

    /// Like `publish`, but skip one connection (e.g. the reader of a
    /// read receipt, to avoid redundant self-notification).
    async fn publish_except(&self, room: &RoomId, event: ServerEvent, skip_connection: Uuid);

    /// Like `publish`, but deliver only to staff connections. Used for
    /// internal notes that must never reach customers.
    async fn publish_staff(&self, room: &RoomId, event: ServerEvent);

    /// Remove a connection from every room it joined.
    async fn remove_connection(&self, connection_id: Uuid);

    /// Number of connections in a room.
    async fn room_size(&self, room: &RoomId) -> usize;
}

/// Single-process room multiplexer
pub struct InMemoryRoomBus {
    /// Map of room -> list of connections
    rooms: RwLock<HashMap<RoomId, Vec<Arc<Connection>>>>,
}

impl InMemoryRoomBus {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Broadcast with an optional skip filter.
    ///
    /// Silently ignores send errors (closed connections will be cleaned up)
    async fn fan_out(&self, room: &RoomId, event: ServerEvent, filter: impl Fn(&Connection) -> bool) {
        let rooms = self.rooms.read().await;
        if let Some(conns) = rooms.get(room) {
            let mut success_count = 0;
            let mut failed_count = 0;

            for conn in conns.iter().filter(|c| filter(c)) {
                match conn.send(event.clone()) {
                    Ok(()) => success_count += 1,
                    Err(_) => {
                        failed_count += 1;
                        tracing::warn!(
                            connection_id = %conn.id,
                            "Failed to send event to connection (likely closed)"
                        );
                    }
                }
            }

            tracing::debug!(
                room = %room,
                recipients = success_count,
                failed = failed_count,
                "Broadcast event to room"
            );
        } else {
            tracing::debug!(room = %room, "No subscribers for room");
        }
    }
}

impl Default for InMemoryRoomBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomBus for InMemoryRoomBus {
    async fn join(&self, room: RoomId, conn: Arc<Connection>) {
        let mut rooms = self.rooms.write().await;
        let members = rooms.entry(room).or_default();
        // A connection is a member at most once, even after a re-join.
        if !members.iter().any(|c| c.id == conn.id) {
            members.push(Arc::clone(&conn));
        }

        tracing::debug!(
            room = %room,
            connection_id = %conn.id,
            room_size = members.len(),
            "Connection joined room"
        );
    }

    async fn leave(&self, room: &RoomId, connection_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(conns) = rooms.get_mut(room) {
            conns.retain(|c| c.id != connection_id);

            // Clean up empty rooms
            if conns.is_empty() {
                rooms.remove(room);
                tracing::debug!(room = %room, "Removed empty room");
            } else {
                tracing::debug!(
                    room = %room,
                    connection_id = %connection_id,
                    room_size = conns.len(),
                    "Connection left room"
                );
            }
        }
    }

    async fn publish(&self, room: &RoomId, event: ServerEvent) {
        self.fan_out(room, event, |_| true).await;
    }

    async fn publish_except(&self, room: &RoomId, event: ServerEvent, skip_connection: Uuid) {
        self.fan_out(room, event, |c| c.id != skip_connection).await;
    }

    async fn publish_staff(&self, room: &RoomId, event: ServerEvent) {
        self.fan_out(room, event, |c| c.is_staff()).await;
    }

    async fn remove_connection(&self, connection_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        let mut removed_from = 0usize;

        for conns in rooms.values_mut() {
            let before_len = conns.len();
            conns.retain(|c| c.id != connection_id);
            if conns.len() < before_len {
                removed_from += 1;
            }
        }

        // Clean up empty rooms
        rooms.retain(|_, conns| !conns.is_empty());

        if removed_from > 0 {
            tracing::debug!(
                connection_id = %connection_id,
                room_count = removed_from,
                "Removed connection from rooms"
            );
        }
    }

    async fn room_size(&self, room: &RoomId) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room).map(|v| v.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::connection::test_connection;
    use pharmachat_shared::ParticipantRole;

    #[tokio::test]
    async fn test_room_join_and_leave() {
        let bus = InMemoryRoomBus::new();
        let room = RoomId::Session(Uuid::new_v4());

        let (conn, _rx) = test_connection(ParticipantRole::Customer, "John");

        // Initially room doesn't exist
        assert_eq!(bus.room_size(&room).await, 0);

        bus.join(room, Arc::clone(&conn)).await;
        assert_eq!(bus.room_size(&room).await, 1);

        // Double join does not duplicate membership
        bus.join(room, Arc::clone(&conn)).await;
        assert_eq!(bus.room_size(&room).await, 1);

        bus.leave(&room, conn.id).await;
        assert_eq!(bus.room_size(&room).await, 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member_including_publisher() {
        let bus = InMemoryRoomBus::new();
        let room = RoomId::Session(Uuid::new_v4());

        let (conn1, mut rx1) = test_connection(ParticipantRole::Customer, "John");
        let (conn2, mut rx2) = test_connection(ParticipantRole::Agent, "Agent A");

        bus.join(room, conn1).await;
        bus.join(room, conn2).await;

        bus.publish(&room, ServerEvent::Pong).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_publish_except_skips_originator() {
        let bus = InMemoryRoomBus::new();
        let room = RoomId::Session(Uuid::new_v4());

        let (reader, mut reader_rx) = test_connection(ParticipantRole::Agent, "Agent A");
        let (other, mut other_rx) = test_connection(ParticipantRole::Customer, "John");

        bus.join(room, Arc::clone(&reader)).await;
        bus.join(room, other).await;

        bus.publish_except(&room, ServerEvent::Pong, reader.id).await;

        assert!(reader_rx.try_recv().is_err());
        assert!(other_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_publish_staff_excludes_customers() {
        let bus = InMemoryRoomBus::new();
        let room = RoomId::Session(Uuid::new_v4());

        let (customer, mut customer_rx) = test_connection(ParticipantRole::Customer, "John");
        let (agent, mut agent_rx) = test_connection(ParticipantRole::Agent, "Agent A");

        bus.join(room, customer).await;
        bus.join(room, agent).await;

        bus.publish_staff(&room, ServerEvent::Pong).await;

        assert!(customer_rx.try_recv().is_err());
        assert!(agent_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_per_room_delivery_order_matches_publish_order() {
        let bus = InMemoryRoomBus::new();
        let room = RoomId::Session(Uuid::new_v4());
        let (conn, mut rx) = test_connection(ParticipantRole::Customer, "John");
        bus.join(room, conn).await;

        for i in 0..3u32 {
            bus.publish(
                &room,
                ServerEvent::Error {
                    message: i.to_string(),
                },
            )
            .await;
        }

        for i in 0..3u32 {
            match rx.try_recv().unwrap() {
                ServerEvent::Error { message } => assert_eq!(message, i.to_string()),
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_remove_connection_from_all_rooms() {
        let bus = InMemoryRoomBus::new();
        let room1 = RoomId::Session(Uuid::new_v4());
        let room2 = RoomId::AdminDashboard;

        let (conn, _rx) = test_connection(ParticipantRole::Agent, "Agent A");

        bus.join(room1, Arc::clone(&conn)).await;
        bus.join(room2, Arc::clone(&conn)).await;

        bus.remove_connection(conn.id).await;

        assert_eq!(bus.room_size(&room1).await, 0);
        assert_eq!(bus.room_size(&room2).await, 0);
    }
}
