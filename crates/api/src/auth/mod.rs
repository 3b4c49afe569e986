//! Authentication module for PharmaChat
//!
//! Thin boundary layer: validates a bearer/query token into an
//! [`AuthUser`] (identity + role). Session creation and message sending stay
//! reachable for unauthenticated customers; staff surfaces require a token.

pub mod jwt;
pub mod middleware;

pub use jwt::{Claims, JwtManager};
pub use middleware::{optional_auth, require_staff, AuthUser};
