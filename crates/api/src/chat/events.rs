//! Chat event types and serialization
//!
//! Defines all client-to-server and server-to-client event types with
//! type-safe serde serialization. Every inbound event maps 1:1 to one
//! lifecycle / delivery / presence call in the connection handler.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use pharmachat_shared::{
    AgentRef, Attachment, Availability, ChatMessage, ParticipantRole, SessionStatus,
};

// =============================================================================
// Client-to-Server Events
// =============================================================================

/// Events sent from client to server
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Join a session room to receive its events
    JoinSession { session_id: Uuid },

    /// Leave a session room
    LeaveSession { session_id: Uuid },

    /// Join a store-scoped room (staff only)
    JoinStoreRoom { store_id: Uuid },

    /// Join the admin dashboard room (staff only)
    JoinAdminDashboard,

    /// Send a chat message
    SendMessage {
        session_id: Uuid,
        content: String,
        #[serde(default)]
        reply_to: Option<Uuid>,
        #[serde(default)]
        attachments: Vec<Attachment>,
        /// Agent-only note, hidden from the customer (staff only)
        #[serde(default)]
        is_internal: bool,
    },

    /// Mark every unread message in the session as read by this connection
    MarkMessagesRead { session_id: Uuid },

    /// Start typing in a session
    StartTyping { session_id: Uuid },

    /// Stop typing in a session
    StopTyping { session_id: Uuid },

    /// Assign an agent to a session (staff only)
    AssignAgent {
        session_id: Uuid,
        agent_id: Uuid,
        agent_name: String,
    },

    /// Drive the session state machine (staff only)
    UpdateSessionStatus {
        session_id: Uuid,
        status: SessionStatus,
        #[serde(default)]
        resolution: Option<String>,
    },

    /// Announce agent availability (staff only)
    AnnouncePresence { state: Availability },

    /// Heartbeat ping to keep connection alive
    Ping,
}

// =============================================================================
// Server-to-Client Events
// =============================================================================

/// Summary activity kind forwarded to the admin dashboard
#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    SessionCreated,
    Message,
    SessionClosed,
}

/// Events sent from server to client
#[derive(Debug, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Connection acknowledged
    Connected { connection_id: Uuid },

    /// New message in a session the connection subscribed to
    NewMessage {
        session_id: Uuid,
        message: ChatMessage,
    },

    /// Message content/reactions changed
    MessageUpdated {
        session_id: Uuid,
        message: ChatMessage,
    },

    /// Message removed
    MessageDeleted { session_id: Uuid, message_id: Uuid },

    /// Messages observed by a reader
    MessagesRead {
        session_id: Uuid,
        reader_id: Uuid,
        message_ids: Vec<Uuid>,
    },

    /// Participant started typing
    UserTyping {
        session_id: Uuid,
        user_id: Uuid,
        user_name: String,
    },

    /// Participant stopped typing
    UserStoppedTyping { session_id: Uuid, user_id: Uuid },

    /// Agent took the session
    AgentAssigned { session_id: Uuid, agent: AgentRef },

    /// Session moved through its state machine
    SessionStatusUpdated {
        session_id: Uuid,
        status: SessionStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        resolution: Option<String>,
    },

    /// Agent availability changed (admin dashboard)
    AgentStatusChanged {
        agent_id: Uuid,
        agent_name: String,
        state: Availability,
    },

    /// Membership notice: a connection joined the session room
    UserJoined {
        session_id: Uuid,
        user_id: Uuid,
        user_name: String,
        role: ParticipantRole,
    },

    /// Membership notice: a connection left the session room
    UserLeft { session_id: Uuid, user_id: Uuid },

    /// Dashboard summary of session activity
    SessionActivity {
        session_id: Uuid,
        kind: ActivityKind,
        customer_name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        store_id: Option<Uuid>,
    },

    /// Heartbeat response
    Pong,

    /// Error, delivered to the originating connection only
    Error { message: String },
}
