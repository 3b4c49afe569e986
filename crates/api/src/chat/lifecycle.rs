//! Session lifecycle manager
//!
//! Owns the session state machine (pending -> active -> closed/transferred),
//! validates legal transitions, and synthesizes the system messages that
//! narrate them. All writes go through the session store's conditional
//! primitives so a transition happens exactly once even when requests race.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use pharmachat_shared::{
    AgentRef, ChatChannel, ChatError, ChatMessage, ChatSession, CustomerInfo, Priority,
    SessionStatus,
};

use crate::store::{AssignOutcome, MessageStore, SessionStore};

use super::events::{ActivityKind, ServerEvent};
use super::room::{RoomBus, RoomId};

/// Input for session creation (REST boundary, reachable anonymously)
#[derive(Debug, Clone)]
pub struct NewSession {
    pub channel: ChatChannel,
    pub customer: CustomerInfo,
    pub store_id: Option<Uuid>,
    pub store_name: Option<String>,
    pub subject: Option<String>,
    pub category: Option<String>,
    pub priority: Option<Priority>,
}

pub struct SessionLifecycle {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    bus: Arc<dyn RoomBus>,
}

impl SessionLifecycle {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        bus: Arc<dyn RoomBus>,
    ) -> Self {
        Self {
            sessions,
            messages,
            bus,
        }
    }

    /// Create a pending session and announce it to the dashboard.
    pub async fn create_session(&self, req: NewSession) -> Result<ChatSession, ChatError> {
        if req.customer.name.trim().is_empty() {
            return Err(ChatError::Validation(
                "Customer name cannot be empty".to_string(),
            ));
        }

        let mut session = ChatSession::new(req.channel, req.customer);
        session.store_id = req.store_id;
        session.store_name = req.store_name;
        session.subject = req.subject;
        session.category = req.category;
        if let Some(priority) = req.priority {
            session.priority = priority;
        }

        let session = self.sessions.create(session).await?;

        tracing::info!(
            session_id = %session.id,
            channel = %session.channel.as_str(),
            "Chat session created"
        );

        let activity = ServerEvent::SessionActivity {
            session_id: session.id,
            kind: ActivityKind::SessionCreated,
            customer_name: session.customer.name.clone(),
            store_id: session.store_id,
        };
        self.bus
            .publish(&RoomId::AdminDashboard, activity.clone())
            .await;
        if let Some(store_id) = session.store_id {
            self.bus.publish(&RoomId::Store(store_id), activity).await;
        }

        Ok(session)
    }

    /// Assign an agent; conditional, never a silent overwrite.
    ///
    /// A second assignment by a different agent fails with `AlreadyAssigned`;
    /// re-assigning the same agent is an idempotent success. Assignment of a
    /// pending (or transferred) session activates it.
    pub async fn assign_agent(
        &self,
        session_id: Uuid,
        agent_id: Uuid,
        agent_name: &str,
    ) -> Result<ChatSession, ChatError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))?;

        if session.status == SessionStatus::Closed {
            return Err(ChatError::InvalidTransition {
                from: SessionStatus::Closed,
                to: SessionStatus::Active,
            });
        }

        let agent = AgentRef {
            agent_id,
            name: agent_name.to_string(),
            assigned_at: OffsetDateTime::now_utc(),
        };

        let assigned = match self.sessions.assign_if_unassigned(session_id, agent).await? {
            AssignOutcome::Assigned(session) => session,
            AssignOutcome::AlreadyAssigned(existing) => {
                tracing::warn!(
                    session_id = %session_id,
                    held_by = %existing.name,
                    "Assignment conflict"
                );
                return Err(ChatError::AlreadyAssigned {
                    agent_name: existing.name,
                });
            }
        };

        self.stamp_wait_time(&session).await?;

        // Assignment of a pending or transferred session activates it. The
        // conditional update keeps the transition (and its system message)
        // single-shot under racing assigns/sends.
        if matches!(
            assigned.status,
            SessionStatus::Pending | SessionStatus::Transferred
        ) {
            let moved = self
                .sessions
                .set_status_if(session_id, assigned.status, SessionStatus::Active)
                .await?;
            if moved {
                self.post_system_message(
                    session_id,
                    format!("{agent_name} has joined the chat"),
                )
                .await?;
                let status_event = ServerEvent::SessionStatusUpdated {
                    session_id,
                    status: SessionStatus::Active,
                    resolution: None,
                };
                self.bus
                    .publish(&RoomId::Session(session_id), status_event.clone())
                    .await;
                self.bus
                    .publish(&RoomId::AdminDashboard, status_event)
                    .await;
            }
        }

        if let Some(agent) = &assigned.agent {
            let event = ServerEvent::AgentAssigned {
                session_id,
                agent: agent.clone(),
            };
            self.bus
                .publish(&RoomId::Session(session_id), event.clone())
                .await;
            self.bus.publish(&RoomId::AdminDashboard, event).await;
        }

        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))
    }

    /// Drive an explicit status change; illegal transitions fail with
    /// `InvalidTransition` and no state change.
    pub async fn update_status(
        &self,
        session_id: Uuid,
        next: SessionStatus,
        resolution: Option<String>,
        actor_name: Option<&str>,
    ) -> Result<ChatSession, ChatError> {
        let session = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))?;

        if !session.status.can_transition_to(next) {
            return Err(ChatError::InvalidTransition {
                from: session.status,
                to: next,
            });
        }

        match next {
            SessionStatus::Closed => {
                let closed = self
                    .sessions
                    .close_if_open(session_id, resolution.clone())
                    .await?;
                if !closed {
                    // Raced with another close.
                    return Err(ChatError::InvalidTransition {
                        from: SessionStatus::Closed,
                        to: SessionStatus::Closed,
                    });
                }

                let narration = match &resolution {
                    Some(text) => format!("Chat closed: {text}"),
                    None => "Chat session has been closed".to_string(),
                };
                self.post_system_message(session_id, narration).await?;

                let activity = ServerEvent::SessionActivity {
                    session_id,
                    kind: ActivityKind::SessionClosed,
                    customer_name: session.customer.name.clone(),
                    store_id: session.store_id,
                };
                self.bus
                    .publish(&RoomId::AdminDashboard, activity.clone())
                    .await;
                if let Some(store_id) = session.store_id {
                    self.bus.publish(&RoomId::Store(store_id), activity).await;
                }
            }
            SessionStatus::Active => {
                let moved = self
                    .sessions
                    .set_status_if(session_id, session.status, SessionStatus::Active)
                    .await?;
                if !moved {
                    let current = self.current_status(session_id).await?;
                    return Err(ChatError::InvalidTransition {
                        from: current,
                        to: next,
                    });
                }
                self.stamp_wait_time(&session).await?;
                let narration = match actor_name {
                    Some(name) => format!("{name} has joined the chat"),
                    None => "An agent has joined the chat".to_string(),
                };
                self.post_system_message(session_id, narration).await?;
            }
            SessionStatus::Transferred => {
                let moved = self
                    .sessions
                    .set_status_if(session_id, session.status, SessionStatus::Transferred)
                    .await?;
                if !moved {
                    let current = self.current_status(session_id).await?;
                    return Err(ChatError::InvalidTransition {
                        from: current,
                        to: next,
                    });
                }
                // Back to the queue: transfers do not keep the old agent.
                self.sessions.clear_agent(session_id).await?;
            }
            SessionStatus::Pending => {
                // No edges lead back to pending; can_transition_to rejected it.
                unreachable!("pending is not reachable from any state")
            }
        }

        let status_event = ServerEvent::SessionStatusUpdated {
            session_id,
            status: next,
            resolution,
        };
        self.bus
            .publish(&RoomId::Session(session_id), status_event.clone())
            .await;
        self.bus
            .publish(&RoomId::AdminDashboard, status_event)
            .await;

        tracing::info!(
            session_id = %session_id,
            from = %session.status.as_str(),
            to = %next.as_str(),
            "Session status updated"
        );

        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))
    }

    /// Activate a pending session because a staff member spoke first.
    ///
    /// Returns true when this call performed the transition; the conditional
    /// store update guarantees at most one caller wins, so the "agent joined"
    /// system message is posted exactly once even for back-to-back sends.
    pub async fn activate_for_staff(
        &self,
        session: &ChatSession,
        agent_name: &str,
    ) -> Result<bool, ChatError> {
        if session.status != SessionStatus::Pending {
            return Ok(false);
        }

        let moved = self
            .sessions
            .set_status_if(session.id, SessionStatus::Pending, SessionStatus::Active)
            .await?;
        if !moved {
            return Ok(false);
        }

        self.stamp_wait_time(session).await?;
        self.post_system_message(session.id, format!("{agent_name} has joined the chat"))
            .await?;

        let status_event = ServerEvent::SessionStatusUpdated {
            session_id: session.id,
            status: SessionStatus::Active,
            resolution: None,
        };
        self.bus
            .publish(&RoomId::Session(session.id), status_event.clone())
            .await;
        self.bus
            .publish(&RoomId::AdminDashboard, status_event)
            .await;

        Ok(true)
    }

    /// Persist and fan out a platform-authored message. System messages count
    /// toward `message_count` like any other non-deleted message.
    async fn post_system_message(
        &self,
        session_id: Uuid,
        content: String,
    ) -> Result<ChatMessage, ChatError> {
        let message = self
            .messages
            .append(ChatMessage::system(session_id, content))
            .await?;
        self.sessions.bump_message_count(session_id, 1).await?;
        self.bus
            .publish(
                &RoomId::Session(session_id),
                ServerEvent::NewMessage {
                    session_id,
                    message: message.clone(),
                },
            )
            .await;
        Ok(message)
    }

    async fn stamp_wait_time(&self, session: &ChatSession) -> Result<(), ChatError> {
        let waited = (OffsetDateTime::now_utc() - session.started_at).whole_seconds();
        self.sessions
            .set_wait_time_if_unset(session.id, waited.max(0))
            .await
    }

    async fn current_status(&self, session_id: Uuid) -> Result<SessionStatus, ChatError> {
        Ok(self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))?
            .status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::room::InMemoryRoomBus;
    use crate::store::{InMemoryMessageStore, InMemorySessionStore};
    use pharmachat_shared::{ChatChannel, CustomerInfo, MessageKind};

    fn fixture() -> (
        Arc<InMemorySessionStore>,
        Arc<InMemoryMessageStore>,
        SessionLifecycle,
    ) {
        let sessions = Arc::new(InMemorySessionStore::new());
        let messages = Arc::new(InMemoryMessageStore::new());
        let bus = Arc::new(InMemoryRoomBus::new());
        let lifecycle = SessionLifecycle::new(
            sessions.clone(),
            messages.clone(),
            bus as Arc<dyn RoomBus>,
        );
        (sessions, messages, lifecycle)
    }

    fn new_session(name: &str) -> NewSession {
        NewSession {
            channel: ChatChannel::Website,
            customer: CustomerInfo {
                name: name.to_string(),
                email: Some("john@x.com".to_string()),
                phone: Some("+910000000000".to_string()),
                account_id: None,
            },
            store_id: None,
            store_name: None,
            subject: Some("Order inquiry".to_string()),
            category: None,
            priority: None,
        }
    }

    #[tokio::test]
    async fn test_create_rejects_blank_customer_name() {
        let (_, _, lifecycle) = fixture();
        let mut req = new_session("  ");
        req.customer.name = "   ".to_string();
        assert!(matches!(
            lifecycle.create_session(req).await,
            Err(ChatError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_assignment_activates_pending_session_with_system_message() {
        let (sessions, messages, lifecycle) = fixture();
        let session = lifecycle.create_session(new_session("John")).await.unwrap();

        let agent_id = Uuid::new_v4();
        lifecycle
            .assign_agent(session.id, agent_id, "Agent A")
            .await
            .unwrap();

        let updated = sessions.get(session.id).await.unwrap().unwrap();
        assert_eq!(updated.status, SessionStatus::Active);
        assert_eq!(updated.agent.as_ref().map(|a| a.agent_id), Some(agent_id));
        assert!(updated.wait_time_secs.is_some());

        let history = messages.session_messages(session.id, 50, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MessageKind::System);
        assert!(history[0].content.contains("Agent A"));
        assert_eq!(updated.message_count, 1);
    }

    #[tokio::test]
    async fn test_second_agent_gets_conflict() {
        let (_, _, lifecycle) = fixture();
        let session = lifecycle.create_session(new_session("John")).await.unwrap();

        lifecycle
            .assign_agent(session.id, Uuid::new_v4(), "Agent A")
            .await
            .unwrap();

        let err = lifecycle
            .assign_agent(session.id, Uuid::new_v4(), "Agent B")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::AlreadyAssigned { ref agent_name } if agent_name == "Agent A"));
    }

    #[tokio::test]
    async fn test_close_sets_end_time_and_resolution() {
        let (sessions, messages, lifecycle) = fixture();
        let session = lifecycle.create_session(new_session("John")).await.unwrap();

        let closed = lifecycle
            .update_status(
                session.id,
                SessionStatus::Closed,
                Some("Order located and shipped".to_string()),
                None,
            )
            .await
            .unwrap();

        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(closed.ended_at.is_some());
        assert!(closed.resolved);
        assert_eq!(closed.resolution.as_deref(), Some("Order located and shipped"));

        // The close was narrated in-session.
        let history = messages.session_messages(session.id, 50, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, MessageKind::System);

        let stored = sessions.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.message_count, 1);
    }

    #[tokio::test]
    async fn test_closing_closed_session_fails_unchanged() {
        let (sessions, _, lifecycle) = fixture();
        let session = lifecycle.create_session(new_session("John")).await.unwrap();

        lifecycle
            .update_status(session.id, SessionStatus::Closed, Some("done".to_string()), None)
            .await
            .unwrap();
        let snapshot = sessions.get(session.id).await.unwrap().unwrap();

        let err = lifecycle
            .update_status(session.id, SessionStatus::Closed, Some("again".to_string()), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidTransition { .. }));

        let after = sessions.get(session.id).await.unwrap().unwrap();
        assert_eq!(after.resolution, snapshot.resolution);
        assert_eq!(after.ended_at, snapshot.ended_at);
        assert_eq!(after.message_count, snapshot.message_count);
    }

    #[tokio::test]
    async fn test_assigning_closed_session_fails() {
        let (_, _, lifecycle) = fixture();
        let session = lifecycle.create_session(new_session("John")).await.unwrap();
        lifecycle
            .update_status(session.id, SessionStatus::Closed, None, None)
            .await
            .unwrap();

        let err = lifecycle
            .assign_agent(session.id, Uuid::new_v4(), "Agent A")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_transfer_clears_agent_and_allows_reassignment() {
        let (sessions, _, lifecycle) = fixture();
        let session = lifecycle.create_session(new_session("John")).await.unwrap();
        lifecycle
            .assign_agent(session.id, Uuid::new_v4(), "Agent A")
            .await
            .unwrap();

        let transferred = lifecycle
            .update_status(session.id, SessionStatus::Transferred, None, None)
            .await
            .unwrap();
        assert_eq!(transferred.status, SessionStatus::Transferred);
        assert!(transferred.agent.is_none());
        assert!(transferred.ended_at.is_none());

        // A new agent can pick the transferred session up.
        let reassigned = lifecycle
            .assign_agent(session.id, Uuid::new_v4(), "Agent B")
            .await
            .unwrap();
        assert_eq!(reassigned.agent.as_ref().map(|a| a.name.as_str()), Some("Agent B"));

        let stored = sessions.get(session.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Active);
    }

    #[tokio::test]
    async fn test_activate_for_staff_fires_once() {
        let (_, messages, lifecycle) = fixture();
        let session = lifecycle.create_session(new_session("John")).await.unwrap();

        let first = lifecycle
            .activate_for_staff(&session, "Agent A")
            .await
            .unwrap();
        let second = lifecycle
            .activate_for_staff(&session, "Agent A")
            .await
            .unwrap();
        assert!(first);
        assert!(!second);

        // Exactly one "joined" system message.
        let history = messages.session_messages(session.id, 50, 0).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
