//! Capability description published under `/info`.

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::config::RECOGNIZED_QUEUE_KEYS;
use crate::eligibility::ALLOWED_METHODS;
use crate::message::{ALLOWED_HEADERS, META_OBJECT_PREFIX};
use crate::AppState;

/// What the queuer indexes and how it is configured.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueuerInfo {
    pub methods: Vec<String>,
    pub indexed_headers: Vec<String>,
    pub enabling_header: String,
    pub config_keys: Vec<String>,
}

impl QueuerInfo {
    pub fn new(opt_in_key: &str) -> Self {
        let mut indexed_headers: Vec<String> =
            ALLOWED_HEADERS.iter().map(|h| h.to_string()).collect();
        indexed_headers.push(META_OBJECT_PREFIX.to_string());

        Self {
            methods: ALLOWED_METHODS.iter().map(|m| m.to_string()).collect(),
            indexed_headers,
            enabling_header: format!("x-(account|container)-meta-{opt_in_key}"),
            config_keys: RECOGNIZED_QUEUE_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// `GET /info` -- `{"swift_search": {...}}`.
pub async fn info_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let info = QueuerInfo::new(state.queuer.opt_in_key());
    Json(json!({ "swift_search": info }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_info_lists_methods_headers_and_keys() {
        let info = QueuerInfo::new("search-enabled");
        assert_eq!(info.methods, vec!["PUT", "POST", "DELETE"]);
        assert_eq!(
            info.indexed_headers,
            vec!["content-type", "content-length", "x-project-name", "x-object-meta-"]
        );
        assert_eq!(info.enabling_header, "x-(account|container)-meta-search-enabled");
        assert!(info.config_keys.contains(&"queue_vhost".to_string()));
        assert!(info.config_keys.contains(&"connection_timeout_seconds".to_string()));
    }
}
