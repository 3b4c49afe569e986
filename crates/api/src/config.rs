//! Application configuration

use std::env;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: String,
    pub public_url: String,

    // Database
    pub database_url: String,
    pub database_max_connections: u32,

    // Authentication
    pub jwt_secret: String,
    pub jwt_expiry_hours: i64,

    // Chat
    pub max_message_length: usize,
    pub history_page_size: i64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Server
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            public_url: env::var("PUBLIC_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            // Database
            database_url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            database_max_connections: env::var("DATABASE_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .unwrap_or(10),

            // Authentication
            jwt_secret: {
                let secret =
                    env::var("JWT_SECRET").map_err(|_| ConfigError::Missing("JWT_SECRET"))?;
                // Reject weak signing keys outright
                if secret.len() < 32 {
                    return Err(ConfigError::WeakSecret(
                        "JWT_SECRET must be at least 32 characters",
                    ));
                }
                secret
            },
            jwt_expiry_hours: env::var("JWT_EXPIRY_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()
                .unwrap_or(24),

            // Chat
            max_message_length: env::var("CHAT_MAX_MESSAGE_LENGTH")
                .unwrap_or_else(|_| "4000".to_string())
                .parse()
                .unwrap_or(4000),
            history_page_size: env::var("CHAT_HISTORY_PAGE_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()
                .unwrap_or(50),
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Weak secret: {0}")]
    WeakSecret(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn setup_minimal_config() {
        env::set_var("DATABASE_URL", "postgres://test");
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );
    }

    fn cleanup_config() {
        env::remove_var("DATABASE_URL");
        env::remove_var("JWT_SECRET");
        env::remove_var("CHAT_MAX_MESSAGE_LENGTH");
    }

    #[test]
    #[serial]
    fn test_missing_database_url_fails() {
        cleanup_config();
        env::set_var(
            "JWT_SECRET",
            "test-jwt-secret-must-be-at-least-32-characters-long",
        );

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::Missing("DATABASE_URL"))));
        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_weak_jwt_secret_rejected() {
        setup_minimal_config();
        env::set_var("JWT_SECRET", "short");

        let result = Config::from_env();
        assert!(matches!(result, Err(ConfigError::WeakSecret(_))));
        cleanup_config();
    }

    #[test]
    #[serial]
    fn test_defaults_applied() {
        setup_minimal_config();
        env::remove_var("CHAT_MAX_MESSAGE_LENGTH");

        let config = Config::from_env().unwrap();
        assert_eq!(config.max_message_length, 4000);
        assert_eq!(config.history_page_size, 50);
        assert_eq!(config.bind_address, "0.0.0.0:3000");
        cleanup_config();
    }
}
