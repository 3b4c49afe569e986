//! Store adapters for session and message records
//!
//! CRUD repositories with no business logic beyond field validation. Each
//! adapter is a trait so the coordinator can run against Postgres in
//! production and against the in-memory implementations in tests or a
//! single-process deployment. Conflicting writes to one session document
//! (concurrent `message_count` bumps, concurrent transitions) are serialized
//! inside the adapter: atomic/conditional UPDATEs in Postgres, a single write
//! lock in memory.

pub mod memory;
pub mod message_store;
pub mod session_store;

pub use memory::{InMemoryMessageStore, InMemorySessionStore};
pub use message_store::{MessageStore, PgMessageStore, ReactionToggle};
pub use session_store::{
    AssignOutcome, PgSessionStore, SessionFilter, SessionPatch, SessionStore,
};
