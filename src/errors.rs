//! Error types.
//!
//! [`QueueError`] covers every way talking to the broker can fail.  It
//! stays between the broker adapter and the publisher, which turns it into
//! a logged [`crate::publisher::PublishOutcome::Failed`].  [`ProxyError`]
//! belongs to the proxy host and renders as a gateway error response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

/// Broker connection and publish failures.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The transport connection could not be opened.
    #[error("failed to connect to broker: {0}")]
    Connect(#[source] lapin::Error),

    /// The transport connection did not open in time.
    #[error("broker connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// A channel could not be opened (or put in confirm mode).
    #[error("failed to open broker channel: {0}")]
    Channel(#[source] lapin::Error),

    /// The durable queue could not be declared.
    #[error("failed to declare queue {queue}: {source}")]
    Declare {
        queue: String,
        #[source]
        source: lapin::Error,
    },

    /// `basic.publish` or its confirmation failed.
    #[error("failed to publish message: {0}")]
    Publish(#[source] lapin::Error),

    /// The broker refused the message.
    #[error("broker rejected message on {routing_key}")]
    Nack { routing_key: String },

    /// The broker did not confirm the message in time.
    #[error("publish confirmation timed out after {0:?}")]
    ConfirmTimeout(Duration),

    /// The event could not be encoded as JSON.
    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),

    /// Failure reported by a non-AMQP channel implementation.
    #[error("{0}")]
    Other(String),
}

/// Proxy host errors.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The upstream storage service could not be reached.
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),

    /// The request body could not be read.
    #[error("failed to read request body: {0}")]
    Body(String),

    /// The upstream URL could not be built.
    #[error("invalid upstream url: {0}")]
    InvalidUrl(String),

    /// The upstream response could not be relayed.
    #[error("invalid upstream response: {0}")]
    Response(String),
}

impl ProxyError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Upstream(_) | ProxyError::InvalidUrl(_) | ProxyError::Response(_) => {
                StatusCode::BAD_GATEWAY
            }
            ProxyError::Body(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        tracing::warn!("Proxy error: {}", self);
        (
            self.status_code(),
            [("content-type", "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
