//! Agent presence registry
//!
//! Tracks announced availability for connected staff. Presence is best-effort:
//! it is derived from explicit announcements plus the disconnect handler
//! clearing entries owned by a dropped connection. There is no liveness
//! heartbeat; an ungraceful disconnect that bypasses the handler leaves a
//! stale entry until the agent reconnects.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use pharmachat_shared::Availability;

use super::events::ServerEvent;
use super::room::{RoomBus, RoomId};

/// One agent's announced availability
#[derive(Debug, Clone, Serialize)]
pub struct AgentPresence {
    pub agent_id: Uuid,
    pub name: String,
    pub state: Availability,
    /// Connection that made the announcement; used to reconcile on disconnect.
    #[serde(skip)]
    pub connection_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Registry of announced agent availability
pub struct PresenceRegistry {
    entries: RwLock<HashMap<Uuid, AgentPresence>>,
    bus: Arc<dyn RoomBus>,
}

impl PresenceRegistry {
    pub fn new(bus: Arc<dyn RoomBus>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Record an availability announcement and notify the admin dashboard
    /// and the online-agents room. `Offline` removes the entry.
    pub async fn set_availability(
        &self,
        agent_id: Uuid,
        name: &str,
        state: Availability,
        connection_id: Uuid,
    ) {
        {
            let mut entries = self.entries.write().await;
            if state == Availability::Offline {
                entries.remove(&agent_id);
            } else {
                entries.insert(
                    agent_id,
                    AgentPresence {
                        agent_id,
                        name: name.to_string(),
                        state,
                        connection_id,
                        updated_at: OffsetDateTime::now_utc(),
                    },
                );
            }
        }

        tracing::info!(agent_id = %agent_id, state = %state.as_str(), "Agent presence updated");

        let event = ServerEvent::AgentStatusChanged {
            agent_id,
            agent_name: name.to_string(),
            state,
        };
        self.bus
            .publish(&RoomId::OnlineAgents, event.clone())
            .await;
        self.bus.publish(&RoomId::AdminDashboard, event).await;
    }

    /// Agents currently announced as anything other than offline. Every
    /// entry is staff (announcements are staff-gated at the socket), so no
    /// role filtering happens here.
    pub async fn list_online(&self) -> Vec<AgentPresence> {
        let entries = self.entries.read().await;
        let mut online: Vec<AgentPresence> = entries.values().cloned().collect();
        online.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        online
    }

    pub async fn get(&self, agent_id: Uuid) -> Option<AgentPresence> {
        let entries = self.entries.read().await;
        entries.get(&agent_id).cloned()
    }

    /// Unset every presence entry owned by a disconnecting connection and
    /// broadcast the implied offline transitions. Skipping this on disconnect
    /// is a presence leak.
    pub async fn clear_connection(&self, connection_id: Uuid) {
        let dropped: Vec<AgentPresence> = {
            let mut entries = self.entries.write().await;
            let ids: Vec<Uuid> = entries
                .values()
                .filter(|p| p.connection_id == connection_id)
                .map(|p| p.agent_id)
                .collect();
            ids.iter().filter_map(|id| entries.remove(id)).collect()
        };

        for presence in dropped {
            tracing::info!(
                agent_id = %presence.agent_id,
                "Cleared presence for disconnected agent"
            );
            let event = ServerEvent::AgentStatusChanged {
                agent_id: presence.agent_id,
                agent_name: presence.name,
                state: Availability::Offline,
            };
            self.bus
                .publish(&RoomId::OnlineAgents, event.clone())
                .await;
            self.bus.publish(&RoomId::AdminDashboard, event).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::connection::test_connection;
    use crate::chat::room::InMemoryRoomBus;
    use pharmachat_shared::ParticipantRole;

    fn registry() -> (Arc<InMemoryRoomBus>, PresenceRegistry) {
        let bus = Arc::new(InMemoryRoomBus::new());
        let registry = PresenceRegistry::new(bus.clone() as Arc<dyn RoomBus>);
        (bus, registry)
    }

    #[tokio::test]
    async fn test_announce_and_list() {
        let (_bus, registry) = registry();
        let agent_id = Uuid::new_v4();
        let conn_id = Uuid::new_v4();

        registry
            .set_availability(agent_id, "Agent A", Availability::Online, conn_id)
            .await;
        assert_eq!(registry.list_online().await.len(), 1);

        registry
            .set_availability(agent_id, "Agent A", Availability::Busy, conn_id)
            .await;
        let online = registry.list_online().await;
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].state, Availability::Busy);

        registry
            .set_availability(agent_id, "Agent A", Availability::Offline, conn_id)
            .await;
        assert!(registry.list_online().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_change_reaches_admin_dashboard() {
        let (bus, registry) = registry();
        let (dashboard, mut rx) = test_connection(ParticipantRole::Admin, "Admin");
        bus.join(RoomId::AdminDashboard, dashboard).await;

        registry
            .set_availability(Uuid::new_v4(), "Agent A", Availability::Online, Uuid::new_v4())
            .await;

        match rx.try_recv().unwrap() {
            ServerEvent::AgentStatusChanged { state, .. } => {
                assert_eq!(state, Availability::Online)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_state_change_reaches_online_agents_room() {
        let (bus, registry) = registry();
        let (peer, mut rx) = test_connection(ParticipantRole::Agent, "Agent B");
        bus.join(RoomId::OnlineAgents, peer).await;

        let agent_id = Uuid::new_v4();
        let conn_id = Uuid::new_v4();
        registry
            .set_availability(agent_id, "Agent A", Availability::Online, conn_id)
            .await;
        match rx.try_recv().unwrap() {
            ServerEvent::AgentStatusChanged { state, .. } => {
                assert_eq!(state, Availability::Online)
            }
            other => panic!("unexpected event {other:?}"),
        }

        // Disconnect reconciliation reaches the room too.
        registry.clear_connection(conn_id).await;
        match rx.try_recv().unwrap() {
            ServerEvent::AgentStatusChanged { state, .. } => {
                assert_eq!(state, Availability::Offline)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_clears_owned_presence_only() {
        let (bus, registry) = registry();
        let (dashboard, mut rx) = test_connection(ParticipantRole::Admin, "Admin");
        bus.join(RoomId::AdminDashboard, dashboard).await;

        let conn_a = Uuid::new_v4();
        let conn_b = Uuid::new_v4();
        let agent_a = Uuid::new_v4();
        let agent_b = Uuid::new_v4();

        registry
            .set_availability(agent_a, "Agent A", Availability::Online, conn_a)
            .await;
        registry
            .set_availability(agent_b, "Agent B", Availability::Online, conn_b)
            .await;
        // Drain the two announcement events.
        let _ = rx.try_recv();
        let _ = rx.try_recv();

        registry.clear_connection(conn_a).await;

        let online = registry.list_online().await;
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].agent_id, agent_b);

        match rx.try_recv().unwrap() {
            ServerEvent::AgentStatusChanged { agent_id, state, .. } => {
                assert_eq!(agent_id, agent_a);
                assert_eq!(state, Availability::Offline);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
