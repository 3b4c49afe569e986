//! JWT token generation and validation

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use pharmachat_shared::ParticipantRole;

/// JWT claims structure for PharmaChat-issued tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: Uuid,
    /// Display name
    pub name: String,
    /// Participant role
    pub role: ParticipantRole,
    /// Issued at
    pub iat: i64,
    /// Expiration
    pub exp: i64,
}

/// JWT manager for token operations
#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_hours: i64,
}

impl JwtManager {
    /// Create a new JWT manager
    pub fn new(secret: &str, access_token_expiry_hours: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_token_expiry_hours,
        }
    }

    /// Generate an access token for a user
    pub fn generate_access_token(
        &self,
        user_id: Uuid,
        name: &str,
        role: ParticipantRole,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let now = OffsetDateTime::now_utc();
        let claims = Claims {
            sub: user_id,
            name: name.to_string(),
            role,
            iat: now.unix_timestamp(),
            exp: (now + Duration::hours(self.access_token_expiry_hours)).unix_timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }

    /// Validate an access token and return its claims
    pub fn validate_access_token(
        &self,
        token: &str,
    ) -> Result<Claims, jsonwebtoken::errors::Error> {
        let validation = Validation::new(Algorithm::HS256);
        let data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> JwtManager {
        JwtManager::new("test-secret-that-is-long-enough-for-hs256", 24)
    }

    #[test]
    fn test_token_round_trip() {
        let m = manager();
        let user_id = Uuid::new_v4();
        let token = m
            .generate_access_token(user_id, "Agent A", ParticipantRole::Agent)
            .unwrap();

        let claims = m.validate_access_token(&token).unwrap();
        assert_eq!(claims.sub, user_id);
        assert_eq!(claims.name, "Agent A");
        assert_eq!(claims.role, ParticipantRole::Agent);
    }

    #[test]
    fn test_invalid_token_rejected() {
        let m = manager();
        assert!(m.validate_access_token("not-a-token").is_err());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let m = manager();
        let other = JwtManager::new("another-secret-that-is-also-long-enough", 24);
        let token = m
            .generate_access_token(Uuid::new_v4(), "x", ParticipantRole::Customer)
            .unwrap();
        assert!(other.validate_access_token(&token).is_err());
    }
}
