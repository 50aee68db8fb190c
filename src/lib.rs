//! swift-search library -- object metadata queuer for search indexing.
//!
//! This crate provides an axum middleware that watches object writes and
//! deletes passing through a storage proxy and publishes a metadata event to
//! a durable RabbitMQ queue for each one whose account or container opted in
//! to indexing.  Publishing is best-effort: broker failures are logged and
//! never reach the client.

use std::sync::Arc;

pub mod broker;
pub mod config;
pub mod dispatch;
pub mod eligibility;
pub mod errors;
pub mod info;
pub mod message;
pub mod metadata;
pub mod metrics;
pub mod middleware;
pub mod publisher;
pub mod request;
pub mod server;

use crate::config::Config;
use crate::middleware::Queuer;

/// Shared application state passed to handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Indexing middleware state.
    pub queuer: Arc<Queuer>,
    /// HTTP client for the upstream storage service.
    pub client: reqwest::Client,
}
