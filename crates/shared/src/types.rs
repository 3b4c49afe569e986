//! Common types used across PharmaChat
//!
//! Domain model for the support-chat coordinator: sessions, messages,
//! participants and the enums that drive the session state machine.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

// =============================================================================
// Enums
// =============================================================================

/// Origin of a chat conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChatChannel {
    Website,
    InStore,
    Whatsapp,
    Mobile,
}

impl Default for ChatChannel {
    fn default() -> Self {
        Self::Website
    }
}

impl ChatChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Website => "website",
            Self::InStore => "in_store",
            Self::Whatsapp => "whatsapp",
            Self::Mobile => "mobile",
        }
    }
}

/// Session lifecycle state
///
/// Transitions are validated by [`SessionStatus::can_transition_to`]; the
/// lifecycle manager rejects everything else with `InvalidTransition`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Active,
    Closed,
    Transferred,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Transferred => "transferred",
        }
    }

    /// Closed is the only terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Legal state-machine edges:
    /// pending -> active | closed | transferred,
    /// active -> closed | transferred,
    /// transferred -> active | closed,
    /// closed -> (none).
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (Pending, Active) | (Pending, Closed) | (Pending, Transferred) => true,
            (Active, Closed) | (Active, Transferred) => true,
            (Transferred, Active) | (Transferred, Closed) => true,
            _ => false,
        }
    }
}

/// Session priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Urgent => "urgent",
        }
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Customer,
    Agent,
    System,
    Bot,
}

/// Display role of a message sender
///
/// Staff roles (manager, pharmacist, admin...) collapse to `Agent` for
/// display purposes; the distinction lives in [`ParticipantRole`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Customer,
    Agent,
    System,
    Bot,
}

/// Delivery status of a message
///
/// Monotonic per message: `Sent` while in flight, `Delivered` once the store
/// holds it, `Read` on the first read receipt. `Failed` is client-assigned
/// for refused sends. Per-recipient read state is tracked separately in
/// `read_by`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
    Failed,
}

/// Announced agent availability (not network connectivity)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Online,
    Busy,
    Away,
    Offline,
}

impl Availability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Busy => "busy",
            Self::Away => "away",
            Self::Offline => "offline",
        }
    }
}

/// Authenticated role of a connected participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Customer,
    Agent,
    Manager,
    Admin,
}

impl ParticipantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
            Self::Manager => "manager",
            Self::Admin => "admin",
        }
    }

    /// Staff roles may list sessions, assign agents and see internal notes.
    pub fn is_staff(&self) -> bool {
        !matches!(self, Self::Customer)
    }

    /// Elevated roles may delete messages they did not author.
    pub fn is_elevated(&self) -> bool {
        matches!(self, Self::Manager | Self::Admin)
    }

    /// Collapse to the display role used on messages.
    pub fn sender_role(&self) -> SenderRole {
        match self {
            Self::Customer => SenderRole::Customer,
            _ => SenderRole::Agent,
        }
    }
}

// =============================================================================
// Session
// =============================================================================

/// Customer identity attached to a session (may be anonymous: name only)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Linked account, when the customer is a registered user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<Uuid>,
}

/// Assigned agent reference, denormalized onto the session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRef {
    pub agent_id: Uuid,
    pub name: String,
    #[serde(with = "time::serde::rfc3339")]
    pub assigned_at: OffsetDateTime,
}

/// Agent-only annotation, never shown to the customer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalNote {
    pub author_id: Uuid,
    pub author_name: String,
    pub note: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// One continuous customer-support conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub channel: ChatChannel,
    pub customer: CustomerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentRef>,
    pub status: SessionStatus,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Agent-only notes; stripped before returning sessions to customers.
    #[serde(default)]
    pub internal_notes: Vec<InternalNote>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: OffsetDateTime,
    /// Set if and only if `status == Closed`.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub ended_at: Option<OffsetDateTime>,
    /// Seconds from session start to first agent activity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wait_time_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_response_secs: Option<i64>,
    /// Count of non-deleted messages, maintained incrementally.
    pub message_count: i64,
    pub resolved: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl ChatSession {
    /// Create a fresh pending session.
    pub fn new(channel: ChatChannel, customer: CustomerInfo) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: Uuid::new_v4(),
            channel,
            customer,
            store_id: None,
            store_name: None,
            agent: None,
            status: SessionStatus::Pending,
            priority: Priority::Normal,
            subject: None,
            category: None,
            tags: Vec::new(),
            internal_notes: Vec::new(),
            started_at: now,
            last_activity_at: now,
            ended_at: None,
            wait_time_secs: None,
            avg_response_secs: None,
            message_count: 0,
            resolved: false,
            resolution: None,
            rating: None,
            feedback: None,
        }
    }

    /// Session duration: until close for closed sessions, until now otherwise.
    pub fn duration(&self) -> time::Duration {
        let end = self.ended_at.unwrap_or_else(OffsetDateTime::now_utc);
        end - self.started_at
    }
}

// =============================================================================
// Message
// =============================================================================

/// Message author, resolved from the caller's authenticated identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Absent for system messages and anonymous senders without a stable id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<Uuid>,
    pub name: String,
    pub role: SenderRole,
}

/// Per-identity record that a message has been observed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadReceipt {
    pub reader_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub read_at: OffsetDateTime,
}

/// Emoji reaction; at most one per (reactor, emoji) pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reaction {
    pub emoji: String,
    pub reactor_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub reacted_at: OffsetDateTime,
}

/// Attachment metadata (no binary payload)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub url: String,
    pub name: String,
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Document,
    Audio,
    Video,
    Other,
}

/// One chat message, owned by exactly one session for its whole life
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub session_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub sender: SenderInfo,
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
    pub is_edited: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub edited_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    /// Back-reference to another message of the same session.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<Uuid>,
    /// Agent-only note, not visible to the customer.
    pub is_internal: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ChatMessage {
    /// Create a new message in `Sent` state.
    pub fn new(session_id: Uuid, content: String, kind: MessageKind, sender: SenderInfo) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            content,
            kind,
            sender,
            status: MessageStatus::Sent,
            read_by: Vec::new(),
            is_edited: false,
            edited_at: None,
            attachments: Vec::new(),
            reactions: Vec::new(),
            reply_to: None,
            is_internal: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// Platform-authored message narrating a state transition.
    pub fn system(session_id: Uuid, content: impl Into<String>) -> Self {
        Self::new(
            session_id,
            content.into(),
            MessageKind::System,
            SenderInfo {
                sender_id: None,
                name: "System".to_string(),
                role: SenderRole::System,
            },
        )
    }

    pub fn is_read_by(&self, reader_id: Uuid) -> bool {
        self.read_by.iter().any(|r| r.reader_id == reader_id)
    }

    pub fn reaction_index(&self, reactor_id: Uuid, emoji: &str) -> Option<usize> {
        self.reactions
            .iter()
            .position(|r| r.reactor_id == reactor_id && r.emoji == emoji)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closed_is_terminal() {
        let all = [
            SessionStatus::Pending,
            SessionStatus::Active,
            SessionStatus::Closed,
            SessionStatus::Transferred,
        ];
        for next in all {
            assert!(!SessionStatus::Closed.can_transition_to(next));
        }
    }

    #[test]
    fn test_legal_transitions() {
        use SessionStatus::*;
        assert!(Pending.can_transition_to(Active));
        assert!(Pending.can_transition_to(Closed));
        assert!(Pending.can_transition_to(Transferred));
        assert!(Active.can_transition_to(Closed));
        assert!(Active.can_transition_to(Transferred));
        assert!(Transferred.can_transition_to(Active));
        assert!(Transferred.can_transition_to(Closed));

        // Self-transitions and re-opening are illegal
        assert!(!Active.can_transition_to(Active));
        assert!(!Active.can_transition_to(Pending));
        assert!(!Closed.can_transition_to(Active));
    }

    #[test]
    fn test_staff_roles_collapse_to_agent() {
        assert_eq!(ParticipantRole::Agent.sender_role(), SenderRole::Agent);
        assert_eq!(ParticipantRole::Manager.sender_role(), SenderRole::Agent);
        assert_eq!(ParticipantRole::Admin.sender_role(), SenderRole::Agent);
        assert_eq!(
            ParticipantRole::Customer.sender_role(),
            SenderRole::Customer
        );
    }

    #[test]
    fn test_new_session_defaults() {
        let session = ChatSession::new(
            ChatChannel::Website,
            CustomerInfo {
                name: "John Doe".to_string(),
                email: None,
                phone: None,
                account_id: None,
            },
        );
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.message_count, 0);
        assert!(session.agent.is_none());
        assert!(session.ended_at.is_none());
        assert!(!session.resolved);
    }

    #[test]
    fn test_system_message_sender() {
        let msg = ChatMessage::system(Uuid::new_v4(), "Agent A has joined the chat");
        assert_eq!(msg.kind, MessageKind::System);
        assert_eq!(msg.sender.role, SenderRole::System);
        assert!(msg.sender.sender_id.is_none());
    }

    #[test]
    fn test_reaction_lookup() {
        let mut msg = ChatMessage::system(Uuid::new_v4(), "x");
        let reactor = Uuid::new_v4();
        msg.reactions.push(Reaction {
            emoji: "👍".to_string(),
            reactor_id: reactor,
            reacted_at: OffsetDateTime::now_utc(),
        });
        assert_eq!(msg.reaction_index(reactor, "👍"), Some(0));
        assert_eq!(msg.reaction_index(reactor, "❤️"), None);
        assert_eq!(msg.reaction_index(Uuid::new_v4(), "👍"), None);
    }
}
