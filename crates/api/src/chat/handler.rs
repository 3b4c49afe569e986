//! WebSocket connection handler
//!
//! Upgrade endpoint plus the per-connection socket loop. Each connection gets
//! an unbounded outbound channel drained by a spawned writer task; inbound
//! frames are processed sequentially, so one connection's events are applied
//! in the order they arrived. A failed operation answers the originator with
//! `ServerEvent::Error` and never drops the connection.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use pharmachat_shared::{Availability, ChatError};

use crate::auth::AuthUser;
use crate::state::AppState;

use super::connection::Connection;
use super::delivery::{OutboundMessage, Participant};
use super::events::{ClientEvent, ServerEvent};
use super::room::{RoomBus, RoomId};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Staff/registered-customer token. Absent for anonymous customers.
    pub token: Option<String>,
    /// Display name for anonymous customers.
    pub name: Option<String>,
}

/// `GET /ws/chat` upgrade endpoint.
///
/// A valid token yields the authenticated identity; otherwise the connection
/// is an anonymous customer with a fresh id per connection.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let identity = match params.token.as_deref() {
        Some(token) => match state.jwt_manager.validate_access_token(token) {
            Ok(claims) => AuthUser {
                user_id: claims.sub,
                name: claims.name,
                role: claims.role,
            },
            Err(e) => {
                tracing::warn!(error = ?e, "WebSocket auth failed, treating as anonymous");
                AuthUser::anonymous(params.name.as_deref().unwrap_or("Guest"))
            }
        },
        None => AuthUser::anonymous(params.name.as_deref().unwrap_or("Guest")),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, identity))
}

async fn handle_socket(socket: WebSocket, state: AppState, identity: AuthUser) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<ServerEvent>();

    let conn = Arc::new(Connection::new(
        identity.user_id,
        identity.name,
        identity.role,
        event_tx,
    ));
    let connection_id = conn.id;

    state.chat.add_connection(Arc::clone(&conn)).await;

    // Writer task: drain the outbound channel into the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let payload = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = ?e, "Failed to serialize outbound event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    let _ = conn.send(ServerEvent::Connected { connection_id });

    // Sequential inbound loop: one event at a time per connection.
    while let Some(frame) = ws_rx.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(connection_id = %connection_id, error = ?e, "WebSocket read error");
                break;
            }
        };

        match frame {
            Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                Ok(event) => handle_client_event(&state, &conn, event).await,
                Err(e) => {
                    let _ = conn.send(ServerEvent::Error {
                        message: format!("Invalid event: {e}"),
                    });
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of the protocol.
            _ => {}
        }
    }

    writer.abort();
    state.chat.remove_connection(connection_id).await;
}

fn participant(conn: &Connection) -> Participant {
    Participant {
        user_id: conn.user_id,
        name: conn.user_name.clone(),
        role: conn.role,
    }
}

/// Dispatch one inbound event. Every failure path answers the originating
/// connection only.
pub(crate) async fn handle_client_event(state: &AppState, conn: &Arc<Connection>, event: ClientEvent) {
    match event {
        ClientEvent::JoinSession { session_id } => {
            let room = RoomId::Session(session_id);
            state.chat.bus.join(room, Arc::clone(conn)).await;
            conn.track_join(room).await;
            state
                .chat
                .bus
                .publish(
                    &room,
                    ServerEvent::UserJoined {
                        session_id,
                        user_id: conn.user_id,
                        user_name: conn.user_name.clone(),
                        role: conn.role,
                    },
                )
                .await;
        }

        ClientEvent::LeaveSession { session_id } => {
            let room = RoomId::Session(session_id);
            state.chat.bus.leave(&room, conn.id).await;
            conn.track_leave(&room).await;
            state
                .chat
                .bus
                .publish(
                    &room,
                    ServerEvent::UserLeft {
                        session_id,
                        user_id: conn.user_id,
                    },
                )
                .await;
        }

        ClientEvent::JoinStoreRoom { store_id } => {
            if !require_staff(conn) {
                return;
            }
            let room = RoomId::Store(store_id);
            state.chat.bus.join(room, Arc::clone(conn)).await;
            conn.track_join(room).await;
        }

        ClientEvent::JoinAdminDashboard => {
            if !require_staff(conn) {
                return;
            }
            state
                .chat
                .bus
                .join(RoomId::AdminDashboard, Arc::clone(conn))
                .await;
            conn.track_join(RoomId::AdminDashboard).await;
        }

        ClientEvent::SendMessage {
            session_id,
            content,
            reply_to,
            attachments,
            is_internal,
        } => {
            let result = state
                .delivery
                .send(
                    &participant(conn),
                    OutboundMessage {
                        session_id,
                        content,
                        reply_to,
                        attachments,
                        is_internal,
                    },
                )
                .await;
            report_error(conn, result.map(|_| ()));
        }

        ClientEvent::MarkMessagesRead { session_id } => {
            let result = state
                .delivery
                .mark_session_read(session_id, &participant(conn), Some(conn.id))
                .await;
            report_error(conn, result.map(|_| ()));
        }

        ClientEvent::StartTyping { session_id } => {
            state
                .chat
                .bus
                .publish_except(
                    &RoomId::Session(session_id),
                    ServerEvent::UserTyping {
                        session_id,
                        user_id: conn.user_id,
                        user_name: conn.user_name.clone(),
                    },
                    conn.id,
                )
                .await;
        }

        ClientEvent::StopTyping { session_id } => {
            state
                .chat
                .bus
                .publish_except(
                    &RoomId::Session(session_id),
                    ServerEvent::UserStoppedTyping {
                        session_id,
                        user_id: conn.user_id,
                    },
                    conn.id,
                )
                .await;
        }

        ClientEvent::AssignAgent {
            session_id,
            agent_id,
            agent_name,
        } => {
            if !require_staff(conn) {
                return;
            }
            let result = state
                .lifecycle
                .assign_agent(session_id, agent_id, &agent_name)
                .await;
            report_error(conn, result.map(|_| ()));
        }

        ClientEvent::UpdateSessionStatus {
            session_id,
            status,
            resolution,
        } => {
            if !require_staff(conn) {
                return;
            }
            let result = state
                .lifecycle
                .update_status(session_id, status, resolution, Some(&conn.user_name))
                .await;
            report_error(conn, result.map(|_| ()));
        }

        ClientEvent::AnnouncePresence { state: availability } => {
            if !require_staff(conn) {
                return;
            }
            state
                .chat
                .presence
                .set_availability(conn.user_id, &conn.user_name, availability, conn.id)
                .await;
            if availability == Availability::Offline {
                state.chat.bus.leave(&RoomId::OnlineAgents, conn.id).await;
                conn.track_leave(&RoomId::OnlineAgents).await;
            } else {
                state
                    .chat
                    .bus
                    .join(RoomId::OnlineAgents, Arc::clone(conn))
                    .await;
                conn.track_join(RoomId::OnlineAgents).await;
            }
        }

        ClientEvent::Ping => {
            let _ = conn.send(ServerEvent::Pong);
        }
    }
}

/// Staff gate for restricted events; answers the originator on refusal.
fn require_staff(conn: &Connection) -> bool {
    if conn.is_staff() {
        return true;
    }
    let _ = conn.send(ServerEvent::Error {
        message: "Staff access required".to_string(),
    });
    false
}

fn report_error(conn: &Connection, result: Result<(), ChatError>) {
    if let Err(e) = result {
        tracing::debug!(connection_id = %conn.id, error = %e, "Client event failed");
        let _ = conn.send(ServerEvent::Error {
            message: e.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::connection::test_connection;
    use crate::chat::lifecycle::NewSession;
    use crate::store::SessionStore;
    use pharmachat_shared::{ChatChannel, CustomerInfo, ParticipantRole, SessionStatus};
    use uuid::Uuid;

    async fn pending_session(state: &AppState, name: &str) -> Uuid {
        state
            .lifecycle
            .create_session(NewSession {
                channel: ChatChannel::Website,
                customer: CustomerInfo {
                    name: name.to_string(),
                    email: None,
                    phone: None,
                    account_id: None,
                },
                store_id: None,
                store_name: None,
                subject: None,
                category: None,
                priority: None,
            })
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_customer_cannot_use_staff_events() {
        let state = AppState::in_memory_for_tests();
        let (conn, mut rx) = test_connection(ParticipantRole::Customer, "John");
        let session_id = pending_session(&state, "John").await;

        handle_client_event(
            &state,
            &conn,
            ClientEvent::AssignAgent {
                session_id,
                agent_id: Uuid::new_v4(),
                agent_name: "Impostor".to_string(),
            },
        )
        .await;

        match rx.try_recv().unwrap() {
            ServerEvent::Error { message } => assert!(message.contains("Staff")),
            other => panic!("unexpected event {other:?}"),
        }

        let session = state.sessions.get(session_id).await.unwrap().unwrap();
        assert!(session.agent.is_none());
        assert_eq!(session.status, SessionStatus::Pending);
    }

    #[tokio::test]
    async fn test_join_session_publishes_membership_notice() {
        let state = AppState::in_memory_for_tests();
        let session_id = pending_session(&state, "John").await;

        let (observer, mut observer_rx) = test_connection(ParticipantRole::Agent, "Agent A");
        handle_client_event(
            &state,
            &observer,
            ClientEvent::JoinSession { session_id },
        )
        .await;
        // Drain the observer's own join notice.
        let _ = observer_rx.try_recv();

        let (joiner, _joiner_rx) = test_connection(ParticipantRole::Customer, "John");
        handle_client_event(&state, &joiner, ClientEvent::JoinSession { session_id }).await;

        match observer_rx.try_recv().unwrap() {
            ServerEvent::UserJoined { user_name, .. } => assert_eq!(user_name, "John"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typing_skips_originator() {
        let state = AppState::in_memory_for_tests();
        let session_id = pending_session(&state, "John").await;

        let (typist, mut typist_rx) = test_connection(ParticipantRole::Customer, "John");
        let (observer, mut observer_rx) = test_connection(ParticipantRole::Agent, "Agent A");
        handle_client_event(&state, &typist, ClientEvent::JoinSession { session_id }).await;
        handle_client_event(&state, &observer, ClientEvent::JoinSession { session_id }).await;
        while typist_rx.try_recv().is_ok() {}
        while observer_rx.try_recv().is_ok() {}

        handle_client_event(&state, &typist, ClientEvent::StartTyping { session_id }).await;

        assert!(typist_rx.try_recv().is_err());
        match observer_rx.try_recv().unwrap() {
            ServerEvent::UserTyping { user_name, .. } => assert_eq!(user_name, "John"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_send_answers_originator_only() {
        let state = AppState::in_memory_for_tests();
        let (conn, mut rx) = test_connection(ParticipantRole::Customer, "John");

        handle_client_event(
            &state,
            &conn,
            ClientEvent::SendMessage {
                session_id: Uuid::new_v4(),
                content: "hello".to_string(),
                reply_to: None,
                attachments: Vec::new(),
                is_internal: false,
            },
        )
        .await;

        assert!(matches!(
            rx.try_recv().unwrap(),
            ServerEvent::Error { .. }
        ));
    }

    #[tokio::test]
    async fn test_presence_announcement_round_trip() {
        let state = AppState::in_memory_for_tests();
        let (agent, _rx) = test_connection(ParticipantRole::Agent, "Agent A");

        handle_client_event(
            &state,
            &agent,
            ClientEvent::AnnouncePresence {
                state: Availability::Online,
            },
        )
        .await;
        assert_eq!(state.chat.presence.list_online().await.len(), 1);
        assert_eq!(state.chat.bus.room_size(&RoomId::OnlineAgents).await, 1);

        handle_client_event(
            &state,
            &agent,
            ClientEvent::AnnouncePresence {
                state: Availability::Offline,
            },
        )
        .await;
        assert!(state.chat.presence.list_online().await.is_empty());
        assert_eq!(state.chat.bus.room_size(&RoomId::OnlineAgents).await, 0);
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let state = AppState::in_memory_for_tests();
        let (conn, mut rx) = test_connection(ParticipantRole::Customer, "John");
        handle_client_event(&state, &conn, ClientEvent::Ping).await;
        assert!(matches!(rx.try_recv().unwrap(), ServerEvent::Pong));
    }
}
