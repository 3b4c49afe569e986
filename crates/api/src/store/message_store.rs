//! Message store adapter
//!
//! Append-mostly CRUD over [`ChatMessage`] records with edit, hard delete,
//! read receipts and reaction toggling. `add_read_receipt` is the idempotence
//! point for read tracking: a second receipt from the same reader is refused
//! at the storage layer, so callers can retry freely.

use async_trait::async_trait;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use pharmachat_shared::{
    Attachment, ChatError, ChatMessage, MessageKind, MessageStatus, Reaction, ReadReceipt,
    SenderInfo,
};

/// Outcome of a reaction toggle, carrying the updated message for republish
#[derive(Debug)]
pub enum ReactionToggle {
    Added(ChatMessage),
    Removed(ChatMessage),
}

impl ReactionToggle {
    pub fn message(&self) -> &ChatMessage {
        match self {
            Self::Added(m) | Self::Removed(m) => m,
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist one message. A message still in `Sent` state is stamped
    /// `Delivered` once the store holds it.
    async fn append(&self, message: ChatMessage) -> Result<ChatMessage, ChatError>;

    async fn get(&self, message_id: Uuid) -> Result<Option<ChatMessage>, ChatError>;

    /// Messages of one session in creation order.
    async fn session_messages(
        &self,
        session_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, ChatError>;

    /// Ids of messages in the session the reader has not read and did not
    /// author, in creation order. Internal notes are surfaced only when
    /// `include_internal` is set (staff readers).
    async fn unread_ids(
        &self,
        session_id: Uuid,
        reader_id: Uuid,
        include_internal: bool,
    ) -> Result<Vec<Uuid>, ChatError>;

    /// Record a read receipt unless one already exists for this reader.
    /// Returns true when the receipt was added. The first receipt overall
    /// promotes the message status to `Read`.
    async fn add_read_receipt(
        &self,
        message_id: Uuid,
        receipt: ReadReceipt,
    ) -> Result<bool, ChatError>;

    async fn set_content(
        &self,
        message_id: Uuid,
        content: String,
        edited_at: OffsetDateTime,
    ) -> Result<ChatMessage, ChatError>;

    /// Remove an identical (reactor, emoji) reaction if present, add it
    /// otherwise.
    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        reaction: Reaction,
    ) -> Result<ReactionToggle, ChatError>;

    /// Hard delete.
    async fn delete(&self, message_id: Uuid) -> Result<(), ChatError>;
}

// =============================================================================
// Postgres implementation
// =============================================================================

/// Postgres-backed message store
#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: Uuid,
    session_id: Uuid,
    content: String,
    kind: MessageKind,
    sender: sqlx::types::Json<SenderInfo>,
    status: MessageStatus,
    read_by: sqlx::types::Json<Vec<ReadReceipt>>,
    is_edited: bool,
    edited_at: Option<OffsetDateTime>,
    attachments: sqlx::types::Json<Vec<Attachment>>,
    reactions: sqlx::types::Json<Vec<Reaction>>,
    reply_to: Option<Uuid>,
    is_internal: bool,
    created_at: OffsetDateTime,
}

impl From<MessageRow> for ChatMessage {
    fn from(row: MessageRow) -> Self {
        ChatMessage {
            id: row.id,
            session_id: row.session_id,
            content: row.content,
            kind: row.kind,
            sender: row.sender.0,
            status: row.status,
            read_by: row.read_by.0,
            is_edited: row.is_edited,
            edited_at: row.edited_at,
            attachments: row.attachments.0,
            reactions: row.reactions.0,
            reply_to: row.reply_to,
            is_internal: row.is_internal,
            created_at: row.created_at,
        }
    }
}

const MESSAGE_COLUMNS: &str = "id, session_id, content, kind, sender, status, read_by, \
     is_edited, edited_at, attachments, reactions, reply_to, is_internal, created_at";

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: ChatMessage) -> Result<ChatMessage, ChatError> {
        let mut message = message;
        if message.status == MessageStatus::Sent {
            message.status = MessageStatus::Delivered;
        }
        let query = format!(
            "INSERT INTO chat_messages ({MESSAGE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
             RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(message.id)
            .bind(message.session_id)
            .bind(&message.content)
            .bind(message.kind)
            .bind(sqlx::types::Json(&message.sender))
            .bind(message.status)
            .bind(sqlx::types::Json(&message.read_by))
            .bind(message.is_edited)
            .bind(message.edited_at)
            .bind(sqlx::types::Json(&message.attachments))
            .bind(sqlx::types::Json(&message.reactions))
            .bind(message.reply_to)
            .bind(message.is_internal)
            .bind(message.created_at)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn get(&self, message_id: Uuid) -> Result<Option<ChatMessage>, ChatError> {
        let query = format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1");
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn session_messages(
        &self,
        session_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessage>, ChatError> {
        let query = format!(
            "SELECT {MESSAGE_COLUMNS} FROM chat_messages \
             WHERE session_id = $1 ORDER BY created_at ASC, id ASC LIMIT $2 OFFSET $3"
        );
        let rows = sqlx::query_as::<_, MessageRow>(&query)
            .bind(session_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn unread_ids(
        &self,
        session_id: Uuid,
        reader_id: Uuid,
        include_internal: bool,
    ) -> Result<Vec<Uuid>, ChatError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT id FROM chat_messages \
             WHERE session_id = $1 \
               AND (sender->>'sender_id' IS NULL OR sender->>'sender_id' <> $2) \
               AND ($3 OR NOT is_internal) \
               AND NOT EXISTS ( \
                 SELECT 1 FROM jsonb_array_elements(read_by) r \
                 WHERE r->>'reader_id' = $2) \
             ORDER BY created_at ASC, id ASC",
        )
        .bind(session_id)
        .bind(reader_id.to_string())
        .bind(include_internal)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn add_read_receipt(
        &self,
        message_id: Uuid,
        receipt: ReadReceipt,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query(
            "UPDATE chat_messages SET \
               read_by = read_by || $2::jsonb, \
               status = CASE WHEN jsonb_array_length(read_by) = 0 THEN 'read' ELSE status END \
             WHERE id = $1 \
               AND NOT EXISTS ( \
                 SELECT 1 FROM jsonb_array_elements(read_by) r \
                 WHERE r->>'reader_id' = $3)",
        )
        .bind(message_id)
        .bind(sqlx::types::Json(vec![&receipt]))
        .bind(receipt.reader_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // Either already read by this reader (no-op) or missing entirely.
        if self.get(message_id).await?.is_none() {
            return Err(ChatError::message_not_found(message_id));
        }
        Ok(false)
    }

    async fn set_content(
        &self,
        message_id: Uuid,
        content: String,
        edited_at: OffsetDateTime,
    ) -> Result<ChatMessage, ChatError> {
        let query = format!(
            "UPDATE chat_messages SET content = $2, is_edited = TRUE, edited_at = $3 \
             WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(message_id)
            .bind(&content)
            .bind(edited_at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ChatError::message_not_found(message_id))?;
        Ok(row.into())
    }

    async fn toggle_reaction(
        &self,
        message_id: Uuid,
        reaction: Reaction,
    ) -> Result<ReactionToggle, ChatError> {
        let mut message = self
            .get(message_id)
            .await?
            .ok_or_else(|| ChatError::message_not_found(message_id))?;

        let added = match message.reaction_index(reaction.reactor_id, &reaction.emoji) {
            Some(idx) => {
                message.reactions.remove(idx);
                false
            }
            None => {
                message.reactions.push(reaction);
                true
            }
        };

        let query = format!(
            "UPDATE chat_messages SET reactions = $2 WHERE id = $1 RETURNING {MESSAGE_COLUMNS}"
        );
        let row = sqlx::query_as::<_, MessageRow>(&query)
            .bind(message_id)
            .bind(sqlx::types::Json(&message.reactions))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ChatError::message_not_found(message_id))?;

        let updated: ChatMessage = row.into();
        Ok(if added {
            ReactionToggle::Added(updated)
        } else {
            ReactionToggle::Removed(updated)
        })
    }

    async fn delete(&self, message_id: Uuid) -> Result<(), ChatError> {
        let result = sqlx::query("DELETE FROM chat_messages WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::message_not_found(message_id));
        }
        Ok(())
    }
}
