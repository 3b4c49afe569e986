//! Session store adapter
//!
//! CRUD over [`ChatSession`] records. The conditional primitives
//! (`set_status_if`, `close_if_open`, `assign_if_unassigned`) exist so that
//! state transitions and agent assignment happen exactly once even when two
//! requests race; callers get a boolean / typed outcome instead of
//! last-writer-wins.

use async_trait::async_trait;
use serde::Deserialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

use pharmachat_shared::{
    AgentRef, ChatChannel, ChatError, ChatSession, CustomerInfo, InternalNote, Priority,
    SessionStatus,
};

/// Filter for session listing
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub channel: Option<ChatChannel>,
    pub priority: Option<Priority>,
    pub store_id: Option<Uuid>,
    pub agent_id: Option<Uuid>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Mutable session fields exposed through the REST boundary
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionPatch {
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub rating: Option<i16>,
    pub feedback: Option<String>,
}

/// Outcome of a conditional agent assignment
#[derive(Debug)]
pub enum AssignOutcome {
    Assigned(ChatSession),
    /// Another agent already holds the session; no state was changed.
    AlreadyAssigned(AgentRef),
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create(&self, session: ChatSession) -> Result<ChatSession, ChatError>;

    async fn get(&self, session_id: Uuid) -> Result<Option<ChatSession>, ChatError>;

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<ChatSession>, ChatError>;

    async fn apply_patch(
        &self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<ChatSession, ChatError>;

    async fn add_internal_note(
        &self,
        session_id: Uuid,
        note: InternalNote,
    ) -> Result<(), ChatError>;

    /// Move the session from `expected` to `next`; returns false when the
    /// session was no longer in `expected` (someone else transitioned first).
    async fn set_status_if(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<bool, ChatError>;

    /// Close the session unless already closed: sets status, `ended_at`,
    /// `resolved` and the optional resolution in one conditional write.
    async fn close_if_open(
        &self,
        session_id: Uuid,
        resolution: Option<String>,
    ) -> Result<bool, ChatError>;

    /// Assign `agent` only when the session is unassigned or already held by
    /// the same agent (idempotent re-assign).
    async fn assign_if_unassigned(
        &self,
        session_id: Uuid,
        agent: AgentRef,
    ) -> Result<AssignOutcome, ChatError>;

    /// Drop the agent reference (transfer back to the queue).
    async fn clear_agent(&self, session_id: Uuid) -> Result<(), ChatError>;

    /// Atomically adjust `message_count` and bump `last_activity_at`.
    async fn bump_message_count(&self, session_id: Uuid, delta: i64) -> Result<(), ChatError>;

    /// Stamp the wait-time metric on first agent activity; later calls no-op.
    async fn set_wait_time_if_unset(&self, session_id: Uuid, secs: i64) -> Result<(), ChatError>;

    /// Fold one observed agent response time into the smoothed average.
    async fn record_response_time(&self, session_id: Uuid, secs: i64) -> Result<(), ChatError>;

    async fn count_active_for_agent(&self, agent_id: Uuid) -> Result<i64, ChatError>;
}

// =============================================================================
// Postgres implementation
// =============================================================================

/// Postgres-backed session store
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    channel: ChatChannel,
    customer: sqlx::types::Json<CustomerInfo>,
    store_id: Option<Uuid>,
    store_name: Option<String>,
    agent: Option<sqlx::types::Json<AgentRef>>,
    status: SessionStatus,
    priority: Priority,
    subject: Option<String>,
    category: Option<String>,
    tags: sqlx::types::Json<Vec<String>>,
    internal_notes: sqlx::types::Json<Vec<InternalNote>>,
    started_at: OffsetDateTime,
    last_activity_at: OffsetDateTime,
    ended_at: Option<OffsetDateTime>,
    wait_time_secs: Option<i64>,
    avg_response_secs: Option<i64>,
    message_count: i64,
    resolved: bool,
    resolution: Option<String>,
    rating: Option<i16>,
    feedback: Option<String>,
}

impl From<SessionRow> for ChatSession {
    fn from(row: SessionRow) -> Self {
        ChatSession {
            id: row.id,
            channel: row.channel,
            customer: row.customer.0,
            store_id: row.store_id,
            store_name: row.store_name,
            agent: row.agent.map(|a| a.0),
            status: row.status,
            priority: row.priority,
            subject: row.subject,
            category: row.category,
            tags: row.tags.0,
            internal_notes: row.internal_notes.0,
            started_at: row.started_at,
            last_activity_at: row.last_activity_at,
            ended_at: row.ended_at,
            wait_time_secs: row.wait_time_secs,
            avg_response_secs: row.avg_response_secs,
            message_count: row.message_count,
            resolved: row.resolved,
            resolution: row.resolution,
            rating: row.rating,
            feedback: row.feedback,
        }
    }
}

const SESSION_COLUMNS: &str = "id, channel, customer, store_id, store_name, agent, status, \
     priority, subject, category, tags, internal_notes, started_at, last_activity_at, ended_at, \
     wait_time_secs, avg_response_secs, message_count, resolved, resolution, rating, feedback";

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn create(&self, session: ChatSession) -> Result<ChatSession, ChatError> {
        let query = format!(
            "INSERT INTO chat_sessions ({SESSION_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, \
             $18, $19, $20, $21, $22) RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(session.id)
            .bind(session.channel)
            .bind(sqlx::types::Json(&session.customer))
            .bind(session.store_id)
            .bind(&session.store_name)
            .bind(session.agent.as_ref().map(sqlx::types::Json))
            .bind(session.status)
            .bind(session.priority)
            .bind(&session.subject)
            .bind(&session.category)
            .bind(sqlx::types::Json(&session.tags))
            .bind(sqlx::types::Json(&session.internal_notes))
            .bind(session.started_at)
            .bind(session.last_activity_at)
            .bind(session.ended_at)
            .bind(session.wait_time_secs)
            .bind(session.avg_response_secs)
            .bind(session.message_count)
            .bind(session.resolved)
            .bind(&session.resolution)
            .bind(session.rating)
            .bind(&session.feedback)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<ChatSession>, ChatError> {
        let query = format!("SELECT {SESSION_COLUMNS} FROM chat_sessions WHERE id = $1");
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(session_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Into::into))
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<ChatSession>, ChatError> {
        let query = format!(
            "SELECT {SESSION_COLUMNS} FROM chat_sessions \
             WHERE ($1::varchar IS NULL OR status = $1) \
               AND ($2::varchar IS NULL OR channel = $2) \
               AND ($3::varchar IS NULL OR priority = $3) \
               AND ($4::uuid IS NULL OR store_id = $4) \
               AND ($5::text IS NULL OR agent->>'agent_id' = $5) \
             ORDER BY last_activity_at DESC \
             LIMIT $6 OFFSET $7"
        );
        let rows = sqlx::query_as::<_, SessionRow>(&query)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(filter.channel.map(|c| c.as_str()))
            .bind(filter.priority.map(|p| p.as_str()))
            .bind(filter.store_id)
            .bind(filter.agent_id.map(|a| a.to_string()))
            .bind(filter.limit.unwrap_or(50))
            .bind(filter.offset.unwrap_or(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn apply_patch(
        &self,
        session_id: Uuid,
        patch: SessionPatch,
    ) -> Result<ChatSession, ChatError> {
        let query = format!(
            "UPDATE chat_sessions SET \
               priority = COALESCE($2, priority), \
               category = COALESCE($3, category), \
               tags = COALESCE($4, tags), \
               rating = COALESCE($5, rating), \
               feedback = COALESCE($6, feedback) \
             WHERE id = $1 RETURNING {SESSION_COLUMNS}"
        );
        let row = sqlx::query_as::<_, SessionRow>(&query)
            .bind(session_id)
            .bind(patch.priority)
            .bind(&patch.category)
            .bind(patch.tags.as_ref().map(sqlx::types::Json))
            .bind(patch.rating)
            .bind(&patch.feedback)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        Ok(row.into())
    }

    async fn add_internal_note(
        &self,
        session_id: Uuid,
        note: InternalNote,
    ) -> Result<(), ChatError> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET internal_notes = internal_notes || $2::jsonb WHERE id = $1",
        )
        .bind(session_id)
        .bind(sqlx::types::Json(vec![note]))
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::session_not_found(session_id));
        }
        Ok(())
    }

    async fn set_status_if(
        &self,
        session_id: Uuid,
        expected: SessionStatus,
        next: SessionStatus,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET status = $3, last_activity_at = NOW() \
             WHERE id = $1 AND status = $2",
        )
        .bind(session_id)
        .bind(expected)
        .bind(next)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn close_if_open(
        &self,
        session_id: Uuid,
        resolution: Option<String>,
    ) -> Result<bool, ChatError> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET \
               status = 'closed', ended_at = NOW(), last_activity_at = NOW(), \
               resolved = TRUE, resolution = COALESCE($2, resolution) \
             WHERE id = $1 AND status <> 'closed'",
        )
        .bind(session_id)
        .bind(&resolution)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn assign_if_unassigned(
        &self,
        session_id: Uuid,
        agent: AgentRef,
    ) -> Result<AssignOutcome, ChatError> {
        let result = sqlx::query(
            "UPDATE chat_sessions SET agent = $2, last_activity_at = NOW() \
             WHERE id = $1 AND status <> 'closed' \
               AND (agent IS NULL OR agent->>'agent_id' = $3)",
        )
        .bind(session_id)
        .bind(sqlx::types::Json(&agent))
        .bind(agent.agent_id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            let session = self
                .get(session_id)
                .await?
                .ok_or_else(|| ChatError::session_not_found(session_id))?;
            return Ok(AssignOutcome::Assigned(session));
        }

        // Conditional update matched nothing: resolve why.
        let session = self
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))?;
        match session.agent {
            Some(existing) => Ok(AssignOutcome::AlreadyAssigned(existing)),
            None => Err(ChatError::InvalidTransition {
                from: session.status,
                to: SessionStatus::Active,
            }),
        }
    }

    async fn clear_agent(&self, session_id: Uuid) -> Result<(), ChatError> {
        sqlx::query("UPDATE chat_sessions SET agent = NULL WHERE id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn bump_message_count(&self, session_id: Uuid, delta: i64) -> Result<(), ChatError> {
        // Atomic increment, never read-modify-write.
        let result = sqlx::query(
            "UPDATE chat_sessions SET \
               message_count = GREATEST(message_count + $2, 0), \
               last_activity_at = NOW() \
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(delta)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(ChatError::session_not_found(session_id));
        }
        Ok(())
    }

    async fn set_wait_time_if_unset(&self, session_id: Uuid, secs: i64) -> Result<(), ChatError> {
        sqlx::query(
            "UPDATE chat_sessions SET wait_time_secs = $2 \
             WHERE id = $1 AND wait_time_secs IS NULL",
        )
        .bind(session_id)
        .bind(secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_response_time(&self, session_id: Uuid, secs: i64) -> Result<(), ChatError> {
        // Smoothed in place: new average = (old + observed) / 2.
        sqlx::query(
            "UPDATE chat_sessions SET avg_response_secs = \
               CASE WHEN avg_response_secs IS NULL THEN $2 \
                    ELSE (avg_response_secs + $2) / 2 END \
             WHERE id = $1",
        )
        .bind(session_id)
        .bind(secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_active_for_agent(&self, agent_id: Uuid) -> Result<i64, ChatError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM chat_sessions \
             WHERE status = 'active' AND agent->>'agent_id' = $1",
        )
        .bind(agent_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}
