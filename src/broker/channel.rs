//! Abstract broker traits.
//!
//! A connector performs the whole "connect, open channel, declare queue"
//! sequence and hands back a channel only when every step succeeded, so a
//! half-initialized channel never reaches the publisher.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::errors::QueueError;

/// A live channel with the target queue already declared.
pub trait BrokerChannel: Send + Sync + 'static {
    /// Publish `body` as a persistent message on the default exchange with
    /// `routing_key`, resolving once the broker has accepted it.
    fn publish<'a>(
        &'a self,
        routing_key: &'a str,
        body: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>>;
}

/// Factory for fresh broker channels.
pub trait BrokerConnector: Send + Sync + 'static {
    /// Open a connection and channel and declare the durable queue.
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerChannel>, QueueError>> + Send + '_>>;
}
