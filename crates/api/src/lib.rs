//! PharmaChat API server
//!
//! Real-time customer-support chat coordinator: REST surface for session and
//! message management plus a WebSocket endpoint for live delivery, typing
//! signals and agent presence.

#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod auth;
pub mod chat;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;
pub mod store;
