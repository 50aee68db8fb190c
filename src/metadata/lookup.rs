//! Abstract metadata lookup trait.
//!
//! Methods use manual desugaring with pinned futures so implementations can
//! be stored as `Arc<dyn MetadataLookup>`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use crate::request::{PathSegments, RequestDescriptor};

/// User metadata of one account or container, keyed by lowercase name
/// without the `x-account-meta-` / `x-container-meta-` prefix.
pub type MetaMap = HashMap<String, String>;

/// Header carrying the client's storage token.
pub const AUTH_TOKEN_HEADER: &str = "x-auth-token";

/// Per-request context for a lookup: the API version from the request path
/// and the credentials the client presented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupContext {
    pub version: String,
    pub auth_token: Option<String>,
}

impl LookupContext {
    pub fn new(version: impl Into<String>, auth_token: Option<String>) -> Self {
        Self {
            version: version.into(),
            auth_token,
        }
    }

    /// Context for looking up metadata on behalf of `req`.
    pub fn for_request(req: &RequestDescriptor, segments: &PathSegments) -> Self {
        Self::new(
            segments.version.clone(),
            req.header(AUTH_TOKEN_HEADER).map(str::to_string),
        )
    }
}

impl Default for LookupContext {
    fn default() -> Self {
        Self::new("v1", None)
    }
}

/// Read-only metadata source.
pub trait MetadataLookup: Send + Sync + 'static {
    /// Metadata of `account`.
    fn account_meta<'a>(
        &'a self,
        ctx: &'a LookupContext,
        account: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetaMap>> + Send + 'a>>;

    /// Metadata of `container` within `account`.
    fn container_meta<'a>(
        &'a self,
        ctx: &'a LookupContext,
        account: &'a str,
        container: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetaMap>> + Send + 'a>>;
}
