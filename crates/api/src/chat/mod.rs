//! Real-time chat coordination
//!
//! The coordinator has five cooperating parts: the room multiplexer
//! ([`room`]) for fan-out, the presence registry ([`presence`]) for agent
//! availability, the session lifecycle manager ([`lifecycle`]) for the state
//! machine, the delivery pipeline ([`delivery`]) for the message write path,
//! and the connection handler ([`handler`]) gluing WebSocket connections to
//! all of the above.

pub mod connection;
pub mod delivery;
pub mod events;
pub mod handler;
pub mod lifecycle;
pub mod presence;
pub mod room;
pub mod state;

pub use connection::Connection;
pub use delivery::{MessageDelivery, OutboundMessage, Participant};
pub use events::{ActivityKind, ClientEvent, ServerEvent};
pub use handler::ws_handler;
pub use lifecycle::{NewSession, SessionLifecycle};
pub use presence::{AgentPresence, PresenceRegistry};
pub use room::{InMemoryRoomBus, RoomBus, RoomId};
pub use state::ChatState;
