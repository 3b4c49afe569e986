//! Message delivery pipeline
//!
//! Single write path for chat messages: validate, persist, maintain the
//! session counters, then fan out. Nothing is published unless persistence
//! succeeded, so subscribers never observe a message the store does not hold.
//! Per-session observed order equals creation order because persistence
//! completes before the publish for each send.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use pharmachat_shared::{
    Attachment, ChatError, ChatMessage, MessageKind, ParticipantRole, Reaction, ReadReceipt,
    SenderInfo, SessionStatus,
};

use crate::store::{MessageStore, ReactionToggle, SessionStore};

use super::events::{ActivityKind, ServerEvent};
use super::lifecycle::SessionLifecycle;
use super::room::{RoomBus, RoomId};

/// Authenticated (or anonymous) identity performing a delivery operation
#[derive(Debug, Clone)]
pub struct Participant {
    pub user_id: Uuid,
    pub name: String,
    pub role: ParticipantRole,
}

/// A message as submitted by a client, before validation
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub session_id: Uuid,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub attachments: Vec<Attachment>,
    pub is_internal: bool,
}

pub struct MessageDelivery {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    bus: Arc<dyn RoomBus>,
    lifecycle: Arc<SessionLifecycle>,
    max_message_length: usize,
}

impl MessageDelivery {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
        bus: Arc<dyn RoomBus>,
        lifecycle: Arc<SessionLifecycle>,
        max_message_length: usize,
    ) -> Self {
        Self {
            sessions,
            messages,
            bus,
            lifecycle,
            max_message_length,
        }
    }

    /// Validate, persist and fan out one message.
    ///
    /// A staff-sent message to a pending session activates the session first,
    /// so the "agent has joined" system message precedes the staff message in
    /// session history.
    pub async fn send(
        &self,
        sender: &Participant,
        outbound: OutboundMessage,
    ) -> Result<ChatMessage, ChatError> {
        let content = outbound.content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation(
                "Message content cannot be empty".to_string(),
            ));
        }
        if content.chars().count() > self.max_message_length {
            return Err(ChatError::Validation(format!(
                "Message exceeds maximum length of {} characters",
                self.max_message_length
            )));
        }
        if outbound.is_internal && !sender.role.is_staff() {
            return Err(ChatError::Forbidden(
                "Only staff can post internal notes".to_string(),
            ));
        }

        let session = self
            .sessions
            .get(outbound.session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(outbound.session_id))?;

        if session.status == SessionStatus::Closed {
            return Err(ChatError::Validation(
                "Cannot send messages to a closed session".to_string(),
            ));
        }

        if let Some(reply_to) = outbound.reply_to {
            let target = self
                .messages
                .get(reply_to)
                .await?
                .ok_or_else(|| ChatError::message_not_found(reply_to))?;
            if target.session_id != session.id {
                return Err(ChatError::Validation(
                    "Reply target belongs to a different session".to_string(),
                ));
            }
        }

        if sender.role.is_staff() {
            self.lifecycle
                .activate_for_staff(&session, &sender.name)
                .await?;
        }

        let kind = match sender.role.sender_role() {
            pharmachat_shared::SenderRole::Customer => MessageKind::Customer,
            _ => MessageKind::Agent,
        };
        let mut message = ChatMessage::new(
            session.id,
            content.to_string(),
            kind,
            SenderInfo {
                sender_id: Some(sender.user_id),
                name: sender.name.clone(),
                role: sender.role.sender_role(),
            },
        );
        message.reply_to = outbound.reply_to;
        message.attachments = outbound.attachments;
        message.is_internal = outbound.is_internal;

        let message = self.messages.append(message).await?;
        self.sessions.bump_message_count(session.id, 1).await?;

        if sender.role.is_staff() && !outbound.is_internal {
            let elapsed = (message.created_at - session.last_activity_at).whole_seconds();
            self.sessions
                .record_response_time(session.id, elapsed.max(0))
                .await?;
        }

        tracing::debug!(
            session_id = %session.id,
            message_id = %message.id,
            internal = message.is_internal,
            "Message delivered"
        );

        let event = ServerEvent::NewMessage {
            session_id: session.id,
            message: message.clone(),
        };
        let session_room = RoomId::Session(session.id);
        if message.is_internal {
            // Internal notes never reach customer connections.
            self.bus.publish_staff(&session_room, event).await;
        } else {
            self.bus.publish(&session_room, event).await;

            let activity = ServerEvent::SessionActivity {
                session_id: session.id,
                kind: ActivityKind::Message,
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

        Ok(message)
    }

    /// Record that `reader` has observed one message. Re-reading is a no-op
    /// and publishes nothing; reading your own message is skipped.
    pub async fn mark_read(
        &self,
        message_id: Uuid,
        reader: &Participant,
        origin_connection: Option<Uuid>,
    ) -> Result<(), ChatError> {
        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or_else(|| ChatError::message_not_found(message_id))?;

        // Internal notes do not exist from a customer's point of view.
        if message.is_internal && !reader.role.is_staff() {
            return Err(ChatError::message_not_found(message_id));
        }

        if message.sender.sender_id == Some(reader.user_id) {
            return Ok(());
        }

        let added = self
            .messages
            .add_read_receipt(
                message_id,
                ReadReceipt {
                    reader_id: reader.user_id,
                    read_at: OffsetDateTime::now_utc(),
                },
            )
            .await?;

        if added {
            self.publish_read(message.session_id, reader.user_id, vec![message_id], origin_connection)
                .await;
        }
        Ok(())
    }

    /// Bulk form: mark every message of the session the reader has not yet
    /// read, limited to what their role may see. One `MessagesRead` event
    /// carries all affected ids.
    pub async fn mark_session_read(
        &self,
        session_id: Uuid,
        reader: &Participant,
        origin_connection: Option<Uuid>,
    ) -> Result<Vec<Uuid>, ChatError> {
        if self.sessions.get(session_id).await?.is_none() {
            return Err(ChatError::session_not_found(session_id));
        }

        let unread = self
            .messages
            .unread_ids(session_id, reader.user_id, reader.role.is_staff())
            .await?;
        let mut marked = Vec::with_capacity(unread.len());
        for message_id in unread {
            let receipt = ReadReceipt {
                reader_id: reader.user_id,
                read_at: OffsetDateTime::now_utc(),
            };
            if self.messages.add_read_receipt(message_id, receipt).await? {
                marked.push(message_id);
            }
        }

        if !marked.is_empty() {
            self.publish_read(session_id, reader.user_id, marked.clone(), origin_connection)
                .await;
        }
        Ok(marked)
    }

    /// Edit a message's content. Only the original sender may edit.
    pub async fn edit(
        &self,
        message_id: Uuid,
        editor: &Participant,
        new_content: String,
    ) -> Result<ChatMessage, ChatError> {
        let content = new_content.trim();
        if content.is_empty() {
            return Err(ChatError::Validation(
                "Message content cannot be empty".to_string(),
            ));
        }
        if content.chars().count() > self.max_message_length {
            return Err(ChatError::Validation(format!(
                "Message exceeds maximum length of {} characters",
                self.max_message_length
            )));
        }

        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        if message.sender.sender_id != Some(editor.user_id) {
            return Err(ChatError::Forbidden(
                "Only the sender can edit a message".to_string(),
            ));
        }

        let updated = self
            .messages
            .set_content(message_id, content.to_string(), OffsetDateTime::now_utc())
            .await?;

        self.publish_update(&updated).await;
        Ok(updated)
    }

    /// Hard-delete a message. Allowed for the sender and for elevated staff.
    pub async fn delete(&self, message_id: Uuid, actor: &Participant) -> Result<(), ChatError> {
        let message = self
            .messages
            .get(message_id)
            .await?
            .ok_or_else(|| ChatError::message_not_found(message_id))?;

        let is_sender = message.sender.sender_id == Some(actor.user_id);
        if !is_sender && !actor.role.is_elevated() {
            return Err(ChatError::Forbidden(
                "Not allowed to delete this message".to_string(),
            ));
        }

        self.messages.delete(message_id).await?;
        self.sessions
            .bump_message_count(message.session_id, -1)
            .await?;

        tracing::info!(
            message_id = %message_id,
            session_id = %message.session_id,
            actor = %actor.user_id,
            "Message deleted"
        );

        let event = ServerEvent::MessageDeleted {
            session_id: message.session_id,
            message_id,
        };
        let room = RoomId::Session(message.session_id);
        if message.is_internal {
            self.bus.publish_staff(&room, event).await;
        } else {
            self.bus.publish(&room, event).await;
        }
        Ok(())
    }

    /// Toggle a reaction: add when absent, remove when the identical
    /// (reactor, emoji) pair is present.
    pub async fn react(
        &self,
        message_id: Uuid,
        reactor: &Participant,
        emoji: String,
    ) -> Result<ReactionToggle, ChatError> {
        if emoji.trim().is_empty() {
            return Err(ChatError::Validation("Emoji cannot be empty".to_string()));
        }

        let toggle = self
            .messages
            .toggle_reaction(
                message_id,
                Reaction {
                    emoji,
                    reactor_id: reactor.user_id,
                    reacted_at: OffsetDateTime::now_utc(),
                },
            )
            .await?;

        self.publish_update(toggle.message()).await;
        Ok(toggle)
    }

    async fn publish_read(
        &self,
        session_id: Uuid,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
        origin_connection: Option<Uuid>,
    ) {
        let event = ServerEvent::MessagesRead {
            session_id,
            reader_id,
            message_ids,
        };
        let room = RoomId::Session(session_id);
        match origin_connection {
            // The reader already knows; skip its connection.
            Some(skip) => self.bus.publish_except(&room, event, skip).await,
            None => self.bus.publish(&room, event).await,
        }
    }

    async fn publish_update(&self, message: &ChatMessage) {
        let event = ServerEvent::MessageUpdated {
            session_id: message.session_id,
            message: message.clone(),
        };
        let room = RoomId::Session(message.session_id);
        if message.is_internal {
            self.bus.publish_staff(&room, event).await;
        } else {
            self.bus.publish(&room, event).await;
        }
    }
}
