//! In-memory store implementations
//!
//! Used by tests and single-process deployments. All mutations to one record
//! happen under the map's write lock, which serializes the conditional
//! primitives the same way the Postgres adapters do with conditional UPDATEs.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use pharmachat_shared::{
    AgentRef, ChatError, ChatMessage, ChatSession, InternalNote, MessageStatus, Reaction,
    ReadReceipt, SessionStatus,
};

use super::message_store::{MessageStore, ReactionToggle};
use super::session_store::{AssignOutcome, SessionFilter, SessionPatch, SessionStore};

// =============================================================================
// Sessions
// =============================================================================

/// In-memory session store
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<Uuid, ChatSession>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create(&self, session: ChatSession) -> Result<ChatSession, ChatError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id, session.clone());
        Ok(session)
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<ChatSession>, ChatError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(&session_id).cloned())
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<ChatSession>, ChatError> {
        let sessions = self.sessions.read().await;
        let mut matched: Vec<ChatSession> = sessions
            .values()
            .filter(|s| filter.status.map_or(true, |st| s.status == st))
            .filter(|s| filter.channel.map_or(true, |c| s.channel == c))
            .filter(|s| filter.priority.map_or(true, |p| s.priority == p))
            .filter(|s| filter.store_id.map_or(true, |id| s.store_id == Some(id)))
            .filter(|s| {
                filter
                    .agent_id
                    .map_or(true, |id| s.agent.as_ref().map(|a| a.agent_id) == Some(id))
            })
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));

        let offset = filter.offset.unwrap_or(0).max(0) as usize;
        let limit = filter.limit.unwrap_or(50).max(0) as usize;
        Ok(matched.into_iter().skip(offset).take(limit).collect())
    }

    async fn apply_patch(
        &self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<ChatSession, ChatError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        if let Some(priority) = patch.priority {
            session.priority = priority;
        }
        if let Some(category) = patch.category {
            session.category = Some(category);
        }
        if let Some(tags) = patch.tags {
            session.tags = tags;
        }
        if let Some(rating) = patch.rating {
            session.rating = Some(rating);
        }
        if let Some(feedback) = patch.feedback {
            session.feedback = Some(feedback);
        }
        Ok(session.clone())
    }

    async fn add_internal_note(
        &self,
        session_id: Uuid,
        note: InternalNote,
    ) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        session.internal_notes.push(note);
        Ok(())
    }

    async fn set_status_if(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<bool, ChatError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        if session.status != expected {
            return Ok(false);
        }
        session.status = next;
        session.last_activity_at = OffsetDateTime::now_utc();
        Ok(true)
    }

    async fn close_if_open(
        &self,
        session_id: Uuid,
        resolution: Option<String>,
    ) -> Result<bool, ChatError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        if session.status == SessionStatus::Closed {
            return Ok(false);
        }
        let now = OffsetDateTime::now_utc();
        session.status = SessionStatus::Closed;
        session.ended_at = Some(now);
        session.last_activity_at = now;
        session.resolved = true;
        if resolution.is_some() {
            session.resolution = resolution;
        }
        Ok(true)
    }

    async fn assign_if_unassigned(
        &self,
        session_id: Uuid,
        agent: AgentRef,
    ) -> Result<AssignOutcome, ChatError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        if session.status == SessionStatus::Closed {
            return Err(ChatError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Active,
            });
        }
        match &session.agent {
            Some(existing) if existing.agent_id != agent.agent_id => {
                Ok(AssignOutcome::AlreadyAssigned(existing.clone()))
            }
            _ => {
                session.agent = Some(agent);
                session.last_activity_at = OffsetDateTime::now_utc();
                Ok(AssignOutcome::Assigned(session.clone()))
            }
        }
    }

    async fn clear_agent(&self, session_id: Uuid) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.agent = None;
        }
        Ok(())
    }

    async fn bump_message_count(&self, session_id: Uuid, delta: i64) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .get_mut(&session_id)
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        session.message_count = (session.message_count + delta).max(0);
        session.last_activity_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn set_wait_time_if_unset(&self, session_id: Uuid, secs: i64) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            if session.wait_time_secs.is_none() {
                session.wait_time_secs = Some(secs);
            }
        }
        Ok(())
    }

    async fn record_response_time(&self, session_id: Uuid, secs: i64) -> Result<(), ChatError> {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(&session_id) {
            session.avg_response_secs = Some(match session.avg_response_secs {
                Some(avg) => (avg + secs) / 2,
                None => secs,
            });
        }
        Ok(())
    }

    async fn count_active_for_agent(&self, agent_id: Uuid) -> Result<i64, ChatError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .values()
            .filter(|s| {
                s.status == SessionStatus::Active
                    && s.agent.as_ref().map(|a| a.agent_id) == Some(agent_id)
            })
            .count() as i64)
    }
}

// =============================================================================
// Messages
// =============================================================================

/// In-memory message store, keeping per-session creation order explicitly
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    inner: Arc<RwLock<MessageTable>>,
}

#[derive(Default)]
struct MessageTable {
    messages: HashMap<Uuid, ChatMessage>,
    /// Per-session append order; authoritative for history reads.
    by_session: HashMap<Uuid, Vec<Uuid>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: ChatMessage) -> Result<ChatMessage, ChatError> {
        let mut message = message;
        if message.status == MessageStatus::Sent {
            message.status = MessageStatus::Delivered;
        }
        let mut table = self.inner.write().await;
        table
            .by_session
            .entry(message.session_id)
            .or_default()
            .push(message.id);
        table.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<ChatMessage>, ChatError> {
        let table = self.inner.read().await;
        Ok(table.messages.get(&message_id).cloned())
    }

    async fn session_messages(
        &self,
        session_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let table = self.inner.read().await;
        let ids = table.by_session.get(&session_id);
        Ok(ids
            .map(|ids| {
                ids.iter()
                    .skip(offset.max(0) as usize)
                    .take(limit.max(0) as usize)
                    .filter_map(|id| table.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn unread_ids(
        &self,
        session_id: Uuid,
        reader_id: Uuid,
        include_internal: bool,
    ) -> Result<Vec<Uuid>, ChatError> {
        let table = self.inner.read().await;
        let Some(ids) = table.by_session.get(&session_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| table.messages.get(id))
            .filter(|m| m.sender.sender_id != Some(reader_id))
            .filter(|m| include_internal || !m.is_internal)
            .filter(|m| !m.is_read_by(reader_id))
            .map(|m| m.id)
            .collect())
    }

    async fn add_read_receipt(
        &self,
        message_id: Uuid,
        receipt: ReadReceipt,
    ) -> Result<bool, ChatError> {
        let mut table = self.inner.write().await;
        let message = table
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        if message.is_read_by(receipt.reader_id) {
            return Ok(false);
        }
        if message.read_by.is_empty() {
            message.status = MessageStatus::Read;
        }
        message.read_by.push(receipt);
        Ok(true)
    }

    async fn set_content(
        &self,
        message_id: Uuid,
        content: String,
        edited_at: OffsetDateTime,
    ) -> Result<ChatMessage, ChatError> {
        let mut table = self.inner.write().await;
        let message = table
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        message.content = content;
        message.is_edited = true;
        message.edited_at = Some(edited_at);
        Ok(message.clone())
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        reaction: Reaction,
    ) -> Result<ReactionToggle, ChatError> {
        let mut table = self.inner.write().await;
        let message = table
            .messages
            .get_mut(&message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        match message.reaction_index(reaction.reactor_id, &reaction.emoji) {
            Some(idx) => {
                message.reactions.remove(idx);
                Ok(ReactionToggle::Removed(message.clone()))
            }
            None => {
                message.reactions.push(reaction);
                Ok(ReactionToggle::Added(message.clone()))
            }
        }
    }

    async fn delete(&self, message_id: Uuid) -> Result<(), ChatError> {
        let mut table = self.inner.write().await;
        let message = table
            .messages
            .remove(&message_id)
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        if let Some(ids) = table.by_session.get_mut(&message.session_id) {
            ids.retain(|id| *id != message_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmachat_shared::{ChatChannel, CustomerInfo, MessageKind, SenderInfo, SenderRole};

    fn customer(name: &str) -> CustomerInfo {
        CustomerInfo {
            name: name.to_string(),
            email: None,
            phone: None,
            account_id: None,
        }
    }

    fn agent_ref(name: &str) -> AgentRef {
        AgentRef {
            agent_id: Uuid::new_v4(),
            name: name.to_string(),
            assigned_at: OffsetDateTime::now_utc(),
        }
    }

    fn message(session_id: Uuid, content: &str, sender_id: Uuid) -> ChatMessage {
        ChatMessage::new(
            session_id,
            content.to_string(),
            MessageKind::Customer,
            SenderInfo {
                sender_id: Some(sender_id),
                name: "someone".to_string(),
                role: SenderRole::Customer,
            },
        )
    }

    #[tokio::test]
    async fn test_conditional_transition_fires_once() {
        let store = InMemorySessionStore::new();
        let session = store
            .create(ChatSession::new(ChatChannel::Website, customer("John")))
            .await
            .unwrap();

        // First pending->active wins, second observes the moved state.
        assert!(store
            .set_status_if(session.id, SessionStatus::Pending, SessionStatus::Active)
            .await
            .unwrap());
        assert!(!store
            .set_status_if(session.id, SessionStatus::Pending, SessionStatus::Active)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_close_sets_end_time_exactly_once() {
        let store = InMemorySessionStore::new();
        let session = store
            .create(ChatSession::new(ChatChannel::Website, customer("John")))
            .await
            .unwrap();

        assert!(store
            .close_if_open(session.id, Some("done".to_string()))
            .await
            .unwrap());
        let closed = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(closed.status, SessionStatus::Closed);
        assert!(closed.ended_at.is_some());
        assert!(closed.resolved);

        // Second close is refused, fields untouched.
        assert!(!store.close_if_open(session.id, None).await.unwrap());
        let still = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(still.resolution.as_deref(), Some("done"));
    }

    #[tokio::test]
    async fn test_assignment_conflict_detected() {
        let store = InMemorySessionStore::new();
        let session = store
            .create(ChatSession::new(ChatChannel::Website, customer("John")))
            .await
            .unwrap();

        let first = agent_ref("Agent A");
        let outcome = store
            .assign_if_unassigned(session.id, first.clone())
            .await
            .unwrap();
        assert!(matches!(outcome, AssignOutcome::Assigned(_)));

        // Same agent again is an idempotent success.
        let again = store
            .assign_if_unassigned(session.id, first.clone())
            .await
            .unwrap();
        assert!(matches!(again, AssignOutcome::Assigned(_)));

        // A different agent gets the conflict, not a silent overwrite.
        let conflict = store
            .assign_if_unassigned(session.id, agent_ref("Agent B"))
            .await
            .unwrap();
        match conflict {
            AssignOutcome::AlreadyAssigned(existing) => {
                assert_eq!(existing.agent_id, first.agent_id)
            }
            other => panic!("expected AlreadyAssigned, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_count_never_negative() {
        let store = InMemorySessionStore::new();
        let session = store
            .create(ChatSession::new(ChatChannel::Website, customer("John")))
            .await
            .unwrap();

        store.bump_message_count(session.id, -5).await.unwrap();
        let s = store.get(session.id).await.unwrap().unwrap();
        assert_eq!(s.message_count, 0);
    }

    #[tokio::test]
    async fn test_messages_keep_creation_order() {
        let store = InMemoryMessageStore::new();
        let session_id = Uuid::new_v4();
        let sender = Uuid::new_v4();

        for i in 0..5 {
            store
                .append(message(session_id, &format!("m{i}"), sender))
                .await
                .unwrap();
        }

        let history = store.session_messages(session_id, 50, 0).await.unwrap();
        let contents: Vec<_> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_read_receipt_idempotent() {
        let store = InMemoryMessageStore::new();
        let session_id = Uuid::new_v4();
        let msg = store
            .append(message(session_id, "hi", Uuid::new_v4()))
            .await
            .unwrap();

        let reader = Uuid::new_v4();
        let receipt = ReadReceipt {
            reader_id: reader,
            read_at: OffsetDateTime::now_utc(),
        };

        assert!(store
            .add_read_receipt(msg.id, receipt.clone())
            .await
            .unwrap());
        // Re-marking by the same reader is a no-op.
        assert!(!store.add_read_receipt(msg.id, receipt).await.unwrap());

        let stored = store.get(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.read_by.len(), 1);
        assert_eq!(stored.status, MessageStatus::Read);
    }

    #[tokio::test]
    async fn test_unread_skips_own_and_already_read() {
        let store = InMemoryMessageStore::new();
        let session_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();

        let m1 = store
            .append(message(session_id, "from customer", customer_id))
            .await
            .unwrap();
        store
            .append(message(session_id, "own message", agent_id))
            .await
            .unwrap();

        let unread = store.unread_ids(session_id, agent_id, true).await.unwrap();
        assert_eq!(unread, vec![m1.id]);

        store
            .add_read_receipt(
                m1.id,
                ReadReceipt {
                    reader_id: agent_id,
                    read_at: OffsetDateTime::now_utc(),
                },
            )
            .await
            .unwrap();
        assert!(store
            .unread_ids(session_id, agent_id, true)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_unread_hides_internal_from_customers() {
        let store = InMemoryMessageStore::new();
        let session_id = Uuid::new_v4();
        let agent_id = Uuid::new_v4();
        let customer_id = Uuid::new_v4();

        let mut note = message(session_id, "watch this account", agent_id);
        note.is_internal = true;
        let note = store.append(note).await.unwrap();
        let visible = store
            .append(message(session_id, "hello", agent_id))
            .await
            .unwrap();

        let customer_unread = store
            .unread_ids(session_id, customer_id, false)
            .await
            .unwrap();
        assert_eq!(customer_unread, vec![visible.id]);

        let staff_unread = store
            .unread_ids(session_id, customer_id, true)
            .await
            .unwrap();
        assert_eq!(staff_unread, vec![note.id, visible.id]);
    }

    #[tokio::test]
    async fn test_append_stamps_delivered() {
        let store = InMemoryMessageStore::new();
        let msg = message(Uuid::new_v4(), "hi", Uuid::new_v4());
        assert_eq!(msg.status, MessageStatus::Sent);

        let stored = store.append(msg).await.unwrap();
        assert_eq!(stored.status, MessageStatus::Delivered);
    }

    #[tokio::test]
    async fn test_reaction_toggles() {
        let store = InMemoryMessageStore::new();
        let msg = store
            .append(message(Uuid::new_v4(), "hi", Uuid::new_v4()))
            .await
            .unwrap();
        let reactor = Uuid::new_v4();
        let reaction = |emoji: &str| Reaction {
            emoji: emoji.to_string(),
            reactor_id: reactor,
            reacted_at: OffsetDateTime::now_utc(),
        };

        let added = store.toggle_reaction(msg.id, reaction("👍")).await.unwrap();
        assert!(matches!(added, ReactionToggle::Added(_)));
        assert_eq!(added.message().reactions.len(), 1);

        // Different emoji from the same identity coexists.
        let second = store.toggle_reaction(msg.id, reaction("❤️")).await.unwrap();
        assert_eq!(second.message().reactions.len(), 2);

        // Identical pair removes.
        let removed = store.toggle_reaction(msg.id, reaction("👍")).await.unwrap();
        assert!(matches!(removed, ReactionToggle::Removed(_)));
        assert_eq!(removed.message().reactions.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_from_history() {
        let store = InMemoryMessageStore::new();
        let session_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let m1 = store
            .append(message(session_id, "one", sender))
            .await
            .unwrap();
        store
            .append(message(session_id, "two", sender))
            .await
            .unwrap();

        store.delete(m1.id).await.unwrap();
        let history = store.session_messages(session_id, 50, 0).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "two");

        assert!(store.delete(m1.id).await.is_err());
    }
}
