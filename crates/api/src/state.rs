//! Shared application state

use std::sync::Arc;

use sqlx::PgPool;

use crate::auth::JwtManager;
use crate::chat::{
    ChatState, InMemoryRoomBus, MessageDelivery, PresenceRegistry, RoomBus, SessionLifecycle,
};
use crate::config::Config;
use crate::store::{
    InMemoryMessageStore, InMemorySessionStore, MessageStore, PgMessageStore, PgSessionStore,
    SessionStore,
};

/// Application state shared across all routes and connection handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub jwt_manager: Arc<JwtManager>,
    pub chat: Arc<ChatState>,
    pub lifecycle: Arc<SessionLifecycle>,
    pub delivery: Arc<MessageDelivery>,
    pub sessions: Arc<dyn SessionStore>,
    pub messages: Arc<dyn MessageStore>,
}

impl AppState {
    /// Production wiring: Postgres-backed stores, in-process room bus.
    pub fn new(config: Config, pool: PgPool) -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(pool.clone()));
        let messages: Arc<dyn MessageStore> = Arc::new(PgMessageStore::new(pool));
        Self::assemble(config, sessions, messages)
    }

    /// Single-process wiring with in-memory stores (no database).
    pub fn in_memory(config: Config) -> Self {
        let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let messages: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
        Self::assemble(config, sessions, messages)
    }

    fn assemble(
        config: Config,
        sessions: Arc<dyn SessionStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let config = Arc::new(config);
        let jwt_manager = Arc::new(JwtManager::new(&config.jwt_secret, config.jwt_expiry_hours));

        let bus: Arc<dyn RoomBus> = Arc::new(InMemoryRoomBus::new());
        let presence = Arc::new(PresenceRegistry::new(Arc::clone(&bus)));
        let chat = Arc::new(ChatState::new(Arc::clone(&bus), presence));

        let lifecycle = Arc::new(SessionLifecycle::new(
            Arc::clone(&sessions),
            Arc::clone(&messages),
            Arc::clone(&bus),
        ));
        let delivery = Arc::new(MessageDelivery::new(
            Arc::clone(&sessions),
            Arc::clone(&messages),
            bus,
            Arc::clone(&lifecycle),
            config.max_message_length,
        ));

        Self {
            config,
            jwt_manager,
            chat,
            lifecycle,
            delivery,
            sessions,
            messages,
        }
    }

    /// In-memory state with fixed test configuration.
    #[cfg(test)]
    pub(crate) fn in_memory_for_tests() -> Self {
        Self::in_memory(Config {
            bind_address: "127.0.0.1:0".to_string(),
            public_url: "http://localhost:3000".to_string(),
            database_url: "postgres://unused".to_string(),
            database_max_connections: 1,
            jwt_secret: "test-jwt-secret-must-be-at-least-32-characters-long".to_string(),
            jwt_expiry_hours: 24,
            max_message_length: 4000,
            history_page_size: 50,
        })
    }
}
