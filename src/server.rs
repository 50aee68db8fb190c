//! Axum router construction for the indexing proxy.
//!
//! The [`app`] function serves `/health`, `/info` and `/metrics` locally and
//! forwards everything else to the upstream storage service.  The queuer
//! middleware wraps every route, so object writes reaching the proxy are
//! checked for indexing before they are forwarded.

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::errors::ProxyError;
use crate::info::info_handler;
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the axum [`Router`] for the proxy.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .route("/health", get(health_check))
        .route("/info", get(info_handler))
        .route("/metrics", get(metrics_handler))
        .fallback(proxy_handler)
        .with_state(state.clone());

    // Layer ordering: inner layers run first, outer layers wrap them.
    // The queuer is innermost so it sees the request as routed.
    crate::middleware::layer(router, Arc::clone(&state.queuer))
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        // Object bodies can be large.
        .layer(DefaultBodyLimit::disable())
}

// -- Health check ------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok"}` with 200 OK.
async fn health_check() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "application/json")],
        r#"{"status":"ok"}"#,
    )
}

// -- Proxy -------------------------------------------------------------------

/// Hop-by-hop headers that must not be forwarded in either direction.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP {
        headers.remove(*name);
    }
}

/// Build the upstream URL for a request path and query.
fn upstream_url(base: &str, path_and_query: &str) -> Result<reqwest::Url, ProxyError> {
    let raw = format!("{}{}", base.trim_end_matches('/'), path_and_query);
    reqwest::Url::parse(&raw).map_err(|e| ProxyError::InvalidUrl(format!("{raw}: {e}")))
}

/// Forward a request to the upstream storage service and relay the answer.
async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
) -> Result<Response, ProxyError> {
    let (parts, body) = req.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let url = upstream_url(&state.config.upstream.url, path_and_query)?;

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| ProxyError::Body(e.to_string()))?;

    let mut headers = parts.headers;
    strip_hop_by_hop(&mut headers);
    headers.remove(header::HOST);

    debug!("Proxying {} {}", parts.method, url);
    let upstream = state
        .client
        .request(parts.method, url)
        .headers(headers)
        .body(body)
        .send()
        .await?;

    let status = upstream.status();
    let mut response_headers = upstream.headers().clone();
    strip_hop_by_hop(&mut response_headers);
    let bytes = upstream.bytes().await?;

    let mut response = Response::builder()
        .status(status)
        .body(Body::from(bytes))
        .map_err(|e| ProxyError::Response(e.to_string()))?;
    *response.headers_mut() = response_headers;
    Ok(response)
}
