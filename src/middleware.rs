//! The indexing middleware.
//!
//! [`Queuer`] ties the eligibility check to the dispatcher.
//! [`queuer_middleware`] runs it for every request passing through an axum
//! router and then forwards the request untouched.  Nothing the queuer does
//! can change the status, headers, or body of the wrapped response.

use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use metrics::counter;
use std::sync::Arc;

use crate::config::Config;
use crate::dispatch::{Dispatched, Dispatcher};
use crate::eligibility::{self, Decision};
use crate::metadata::lookup::MetadataLookup;
use crate::metrics::EVENTS_SKIPPED_TOTAL;
use crate::publisher::EventPublisher;
use crate::request::RequestDescriptor;

/// Eligibility check plus event dispatch for one proxy instance.
pub struct Queuer {
    lookup: Arc<dyn MetadataLookup>,
    dispatcher: Dispatcher,
    opt_in_key: String,
}

impl Queuer {
    pub fn new(
        lookup: Arc<dyn MetadataLookup>,
        dispatcher: Dispatcher,
        opt_in_key: impl Into<String>,
    ) -> Self {
        Self {
            lookup,
            dispatcher,
            opt_in_key: opt_in_key.into(),
        }
    }

    /// Build a queuer from configuration.  Background dispatch spawns its
    /// worker, so call this inside a tokio runtime.
    pub fn from_config(
        config: &Config,
        lookup: Arc<dyn MetadataLookup>,
        publisher: Arc<EventPublisher>,
    ) -> Self {
        Self::new(
            lookup,
            Dispatcher::from_config(publisher, &config.dispatch),
            config.indexing.opt_in_key.clone(),
        )
    }

    pub fn opt_in_key(&self) -> &str {
        &self.opt_in_key
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Check `req` and dispatch an event if it is indexable.
    ///
    /// Returns `None` for requests that are not indexable.
    pub async fn observe(&self, req: &RequestDescriptor) -> Option<Dispatched> {
        let decision = eligibility::evaluate(req, self.lookup.as_ref(), &self.opt_in_key).await;
        if decision != Decision::Eligible {
            counter!(EVENTS_SKIPPED_TOTAL, "reason" => decision.as_str()).increment(1);
            return None;
        }
        Some(self.dispatcher.dispatch(req).await)
    }

    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

/// Axum middleware: observe the request, then forward it unconditionally.
pub async fn queuer_middleware(
    State(queuer): State<Arc<Queuer>>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let descriptor = RequestDescriptor::from_http(&req);
    queuer.observe(&descriptor).await;
    next.run(req).await
}

/// Wrap every route of `router` with the queuer.
pub fn layer<S>(router: Router<S>, queuer: Arc<Queuer>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(middleware::from_fn_with_state(queuer, queuer_middleware))
}
