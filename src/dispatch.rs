//! Inline or background event dispatch.
//!
//! Inline dispatch awaits the publish inside the request.  Background
//! dispatch builds the event at request time and hands it to a single
//! worker task through a bounded [`EventQueue`]; the request never waits
//! for the broker.  When the queue is full the configured [`DropPolicy`]
//! decides which event is discarded, and every discard is counted.

use metrics::{counter, gauge};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{DispatchConfig, DispatchMode, DropPolicy};
use crate::message::EventMessage;
use crate::metrics::{DISPATCH_QUEUE_DEPTH, EVENTS_DROPPED_TOTAL};
use crate::publisher::{EventPublisher, PublishOutcome};
use crate::request::RequestDescriptor;

/// What happened to an event offered to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// Queue full; the offered event was discarded.
    DroppedNewest,
    /// Queue full; the oldest event was evicted and the offered one queued.
    EvictedOldest,
    /// Queue closed for shutdown; the offered event was discarded.
    Closed,
}

struct QueueState {
    items: VecDeque<EventMessage>,
    closed: bool,
}

/// Bounded single-consumer event queue.
pub struct EventQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
    policy: DropPolicy,
    dropped: AtomicU64,
}

impl EventQueue {
    pub fn new(capacity: usize, policy: DropPolicy) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity.min(1024)),
                closed: false,
            }),
            notify: Notify::new(),
            capacity: capacity.max(1),
            policy,
            dropped: AtomicU64::new(0),
        }
    }

    /// Offer an event, applying the drop policy when full.  A closed queue
    /// discards every offer.
    pub fn push(&self, message: EventMessage) -> Enqueued {
        let (result, depth) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let closed = state.closed;
            let items = &mut state.items;
            let result = if closed {
                Enqueued::Closed
            } else if items.len() < self.capacity {
                items.push_back(message);
                Enqueued::Accepted
            } else {
                match self.policy {
                    DropPolicy::DropNewest => Enqueued::DroppedNewest,
                    DropPolicy::DropOldest => {
                        items.pop_front();
                        items.push_back(message);
                        Enqueued::EvictedOldest
                    }
                }
            };
            let depth = items.len();
            (result, depth)
        };

        gauge!(DISPATCH_QUEUE_DEPTH).set(depth as f64);
        if result == Enqueued::Accepted {
            self.notify.notify_one();
        } else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            counter!(EVENTS_DROPPED_TOTAL).increment(1);
            if result == Enqueued::Closed {
                debug!("Dispatch queue closed, dropped an index event");
            } else {
                warn!("Dispatch queue full ({}), dropped an index event", self.capacity);
            }
            if result == Enqueued::EvictedOldest {
                self.notify.notify_one();
            }
        }
        result
    }

    /// Wait for the next event.  Returns `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<EventMessage> {
        loop {
            let (next, closed) = {
                let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
                let next = state.items.pop_front();
                gauge!(DISPATCH_QUEUE_DEPTH).set(state.items.len() as f64);
                (next, state.closed)
            };
            if next.is_some() {
                return next;
            }
            if closed {
                return None;
            }
            self.notify.notified().await;
        }
    }

    /// Stop accepting new work; the consumer drains what is left.
    pub fn close(&self) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed = true;
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).closed
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A single worker task publishing from an [`EventQueue`].
pub struct BackgroundDispatcher {
    queue: Arc<EventQueue>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BackgroundDispatcher {
    /// Spawn the worker on the current tokio runtime.
    pub fn spawn(publisher: Arc<EventPublisher>, capacity: usize, policy: DropPolicy) -> Self {
        let queue = Arc::new(EventQueue::new(capacity, policy));
        let worker_queue = Arc::clone(&queue);
        let worker = tokio::spawn(async move {
            debug!("Index event worker started");
            while let Some(message) = worker_queue.pop().await {
                publisher.publish_message(&message).await;
            }
            info!("Index event worker stopped");
        });
        Self {
            queue,
            worker: Mutex::new(Some(worker)),
        }
    }

    pub fn submit(&self, message: EventMessage) -> Enqueued {
        self.queue.push(message)
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Close the queue and wait for the worker to publish what is queued.
    pub async fn shutdown(&self) {
        self.queue.close();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(worker) = worker {
            if let Err(err) = worker.await {
                warn!("Index event worker ended abnormally: {}", err);
            }
        }
    }
}

/// Result of dispatching one eligible request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    Published(PublishOutcome),
    Queued(Enqueued),
}

/// Publishing strategy selected by configuration.
pub enum Dispatcher {
    Inline(Arc<EventPublisher>),
    Background(BackgroundDispatcher),
}

impl Dispatcher {
    /// Build the dispatcher described by `config`.  Background mode spawns
    /// its worker, so this must run inside a tokio runtime.
    pub fn from_config(publisher: Arc<EventPublisher>, config: &DispatchConfig) -> Self {
        match config.mode {
            DispatchMode::Inline => Dispatcher::Inline(publisher),
            DispatchMode::Background => Dispatcher::Background(BackgroundDispatcher::spawn(
                publisher,
                config.queue_depth,
                config.drop_policy,
            )),
        }
    }

    pub async fn dispatch(&self, req: &RequestDescriptor) -> Dispatched {
        match self {
            Dispatcher::Inline(publisher) => Dispatched::Published(publisher.publish(req).await),
            Dispatcher::Background(background) => {
                Dispatched::Queued(background.submit(EventMessage::from_request(req)))
            }
        }
    }

    pub async fn shutdown(&self) {
        if let Dispatcher::Background(background) = self {
            background.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::channel::{BrokerChannel, BrokerConnector};
    use crate::errors::QueueError;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::AtomicUsize;

    fn message(uri: &str) -> EventMessage {
        EventMessage::from_request(&RequestDescriptor::new("PUT", uri, Vec::new()))
    }

    #[test]
    fn test_drop_newest_keeps_queued_events() {
        let queue = EventQueue::new(2, DropPolicy::DropNewest);
        assert_eq!(queue.push(message("/v1/a/c/1")), Enqueued::Accepted);
        assert_eq!(queue.push(message("/v1/a/c/2")), Enqueued::Accepted);
        assert_eq!(queue.push(message("/v1/a/c/3")), Enqueued::DroppedNewest);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_drop_oldest_evicts_head() {
        let queue = EventQueue::new(2, DropPolicy::DropOldest);
        queue.push(message("/v1/a/c/1"));
        queue.push(message("/v1/a/c/2"));
        assert_eq!(queue.push(message("/v1/a/c/3")), Enqueued::EvictedOldest);
        assert_eq!(queue.dropped(), 1);

        assert_eq!(queue.pop().await.unwrap().uri, "/v1/a/c/2");
        assert_eq!(queue.pop().await.unwrap().uri, "/v1/a/c/3");
        assert!(queue.is_empty());
    }

    #[test]
    fn test_push_after_close_is_counted_as_dropped() {
        let queue = EventQueue::new(4, DropPolicy::DropOldest);
        queue.push(message("/v1/a/c/1"));
        queue.close();
        assert!(queue.is_closed());
        assert_eq!(queue.push(message("/v1/a/c/2")), Enqueued::Closed);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dropped(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_drains_then_ends() {
        let queue = EventQueue::new(4, DropPolicy::DropNewest);
        queue.push(message("/v1/a/c/1"));
        queue.close();
        assert!(queue.pop().await.is_some());
        assert!(queue.pop().await.is_none());
    }

    struct CountingChannel(Arc<AtomicUsize>);
    struct CountingConnector(Arc<AtomicUsize>);

    impl BrokerChannel for CountingChannel {
        fn publish<'a>(
            &'a self,
            _routing_key: &'a str,
            _body: &'a [u8],
        ) -> Pin<Box<dyn Future<Output = Result<(), QueueError>> + Send + 'a>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }
    }

    impl BrokerConnector for CountingConnector {
        fn connect(
            &self,
        ) -> Pin<Box<dyn Future<Output = Result<Arc<dyn BrokerChannel>, QueueError>> + Send + '_>>
        {
            let published = Arc::clone(&self.0);
            Box::pin(async move {
                Ok(Arc::new(CountingChannel(published)) as Arc<dyn BrokerChannel>)
            })
        }
    }

    #[tokio::test]
    async fn test_background_dispatch_publishes_and_drains_on_shutdown() {
        let published = Arc::new(AtomicUsize::new(0));
        let publisher = Arc::new(EventPublisher::new(
            Arc::new(CountingConnector(Arc::clone(&published))),
            "swift_search",
        ));
        let config = DispatchConfig {
            mode: DispatchMode::Background,
            queue_depth: 64,
            drop_policy: DropPolicy::DropNewest,
        };
        let dispatcher = Dispatcher::from_config(publisher, &config);

        let req = RequestDescriptor::new("DELETE", "/v1/a/c/o", Vec::new());
        for _ in 0..5 {
            assert_eq!(
                dispatcher.dispatch(&req).await,
                Dispatched::Queued(Enqueued::Accepted)
            );
        }
        dispatcher.shutdown().await;
        assert_eq!(published.load(Ordering::SeqCst), 5);

        // Nothing is accepted after shutdown, and the discard is counted.
        assert_eq!(
            dispatcher.dispatch(&req).await,
            Dispatched::Queued(Enqueued::Closed)
        );
        let Dispatcher::Background(background) = &dispatcher else {
            panic!("expected background dispatcher");
        };
        assert_eq!(background.queue().dropped(), 1);
        assert!(background.queue().is_empty());
        assert_eq!(published.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_inline_dispatch_reports_outcome() {
        let published = Arc::new(AtomicUsize::new(0));
        let publisher = Arc::new(EventPublisher::new(
            Arc::new(CountingConnector(Arc::clone(&published))),
            "swift_search",
        ));
        let dispatcher = Dispatcher::from_config(publisher, &DispatchConfig::default());
        let req = RequestDescriptor::new("POST", "/v1/a/c/o", Vec::new());
        assert_eq!(
            dispatcher.dispatch(&req).await,
            Dispatched::Published(PublishOutcome::Sent)
        );
        assert_eq!(published.load(Ordering::SeqCst), 1);
    }
}
