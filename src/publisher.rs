//! Event publisher with a cached broker channel.
//!
//! The publisher owns at most one channel.  It is opened on first use,
//! reused across requests, and thrown away as soon as a publish on it
//! fails.  A failed publish gets exactly one retry on a freshly opened
//! channel; there is no third attempt.
//!
//! One async mutex covers "get or open the channel, then publish", so
//! concurrent callers queue behind each other and never race to replace the
//! channel.  Nothing here returns an error: every failure is logged and
//! reported as [`PublishOutcome::Failed`].

use metrics::counter;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::broker::channel::{BrokerChannel, BrokerConnector};
use crate::message::EventMessage;
use crate::metrics::{BROKER_RECONNECTS_TOTAL, EVENTS_PUBLISHED_TOTAL};
use crate::request::RequestDescriptor;

/// Result of one publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    Sent,
    Failed,
}

impl PublishOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            PublishOutcome::Sent => "sent",
            PublishOutcome::Failed => "failed",
        }
    }
}

/// Publishes index events to one queue.
pub struct EventPublisher {
    connector: Arc<dyn BrokerConnector>,
    routing_key: String,
    channel: Mutex<Option<Arc<dyn BrokerChannel>>>,
}

impl EventPublisher {
    /// `routing_key` is the queue name; messages go to the default exchange.
    pub fn new(connector: Arc<dyn BrokerConnector>, routing_key: impl Into<String>) -> Self {
        Self {
            connector,
            routing_key: routing_key.into(),
            channel: Mutex::new(None),
        }
    }

    pub fn routing_key(&self) -> &str {
        &self.routing_key
    }

    /// Whether a channel is currently cached.
    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.is_some()
    }

    /// Build the event for `req` and publish it.
    pub async fn publish(&self, req: &RequestDescriptor) -> PublishOutcome {
        let mut slot = self.channel.lock().await;
        let Some(channel) = self.cached_or_open(&mut slot).await else {
            error!(
                "No broker channel, skipping index event for {} {}",
                req.method, req.path
            );
            return self.finish(PublishOutcome::Failed);
        };
        let message = EventMessage::from_request(req);
        self.send_locked(&mut slot, channel, &message).await
    }

    /// Publish an already built event.
    pub async fn publish_message(&self, message: &EventMessage) -> PublishOutcome {
        let mut slot = self.channel.lock().await;
        let Some(channel) = self.cached_or_open(&mut slot).await else {
            error!(
                "No broker channel, skipping index event for {} {}",
                message.http_method, message.uri
            );
            return self.finish(PublishOutcome::Failed);
        };
        self.send_locked(&mut slot, channel, message).await
    }

    async fn cached_or_open(
        &self,
        slot: &mut Option<Arc<dyn BrokerChannel>>,
    ) -> Option<Arc<dyn BrokerChannel>> {
        if let Some(channel) = slot.as_ref() {
            return Some(Arc::clone(channel));
        }
        let channel = self.open().await?;
        *slot = Some(Arc::clone(&channel));
        Some(channel)
    }

    async fn open(&self) -> Option<Arc<dyn BrokerChannel>> {
        match self.connector.connect().await {
            Ok(channel) => Some(channel),
            Err(err) => {
                error!("Failed to connect to broker: {}", err);
                None
            }
        }
    }

    async fn send_locked(
        &self,
        slot: &mut Option<Arc<dyn BrokerChannel>>,
        channel: Arc<dyn BrokerChannel>,
        message: &EventMessage,
    ) -> PublishOutcome {
        let body = match message.to_json() {
            Ok(body) => body,
            Err(err) => {
                error!("Failed to encode index event for {}: {}", message.uri, err);
                return self.finish(PublishOutcome::Failed);
            }
        };

        let first = channel.publish(&self.routing_key, &body).await;
        let outcome = match first {
            Ok(()) => PublishOutcome::Sent,
            Err(err) => {
                warn!(
                    "Publish of {} {} failed, reconnecting: {}",
                    message.http_method, message.uri, err
                );
                *slot = None;
                drop(channel);
                counter!(BROKER_RECONNECTS_TOTAL).increment(1);

                match self.open().await {
                    None => PublishOutcome::Failed,
                    Some(fresh) => {
                        *slot = Some(Arc::clone(&fresh));
                        match fresh.publish(&self.routing_key, &body).await {
                            Ok(()) => PublishOutcome::Sent,
                            Err(err) => {
                                error!("Retry publish failed: {}", err);
                                *slot = None;
                                PublishOutcome::Failed
                            }
                        }
                    }
                }
            }
        };

        match outcome {
            PublishOutcome::Sent => info!(
                "{} {} sent to queue {}",
                message.http_method, message.uri, self.routing_key
            ),
            PublishOutcome::Failed => error!(
                "{} {} failed to send to queue {}",
                message.http_method, message.uri, self.routing_key
            ),
        }
        self.finish(outcome)
    }

    fn finish(&self, outcome: PublishOutcome) -> PublishOutcome {
        counter!(EVENTS_PUBLISHED_TOTAL, "outcome" => outcome.as_str()).increment(1);
        outcome
    }
}
