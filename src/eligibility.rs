//! Per-request indexing eligibility.
//!
//! A request is indexable when, in this order:
//!
//! 1. its method is `PUT`, `POST` or `DELETE`;
//! 2. its path addresses an object (`/v1/<account>/<container>/<object>`);
//! 3. the opt-in metadata key is truthy on the container, or the container
//!    does not carry the key at all and it is truthy on the account.
//!
//! The first failing check decides; later checks (and their metadata
//! lookups) are skipped.  A container that sets the key to a falsy value
//! does not fall back to the account.
//!
//! Metadata is looked up with the API version from the request path and the
//! request's `x-auth-token`.

use tracing::{debug, warn};

use crate::metadata::lookup::{LookupContext, MetaMap, MetadataLookup};
use crate::request::{RequestDescriptor, Scope};

/// Methods that create, update, or delete objects.
pub const ALLOWED_METHODS: &[&str] = &["PUT", "POST", "DELETE"];

/// Outcome of the eligibility check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Eligible,
    InvalidMethod,
    /// Account, container, or non-storage path.
    NotAnObject,
    /// Opt-in key missing or falsy.
    NotOptedIn,
}

impl Decision {
    pub fn is_eligible(self) -> bool {
        matches!(self, Decision::Eligible)
    }

    /// Short label used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Eligible => "eligible",
            Decision::InvalidMethod => "invalid_method",
            Decision::NotAnObject => "not_an_object",
            Decision::NotOptedIn => "not_opted_in",
        }
    }
}

/// Parse a configuration-style boolean.
///
/// `true`, `1`, `yes` and `on` (any case, surrounding whitespace ignored)
/// are true; everything else, including a missing value, is false.
pub fn config_true_value(value: Option<&str>) -> bool {
    match value {
        Some(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "true" | "1" | "yes" | "on"
        ),
        None => false,
    }
}

fn find_key<'a>(meta: &'a MetaMap, key: &str) -> Option<&'a str> {
    meta.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// Run the eligibility checks for `req`.
pub async fn evaluate(
    req: &RequestDescriptor,
    lookup: &dyn MetadataLookup,
    opt_in_key: &str,
) -> Decision {
    if !ALLOWED_METHODS.contains(&req.method.as_str()) {
        debug!("{} {} not indexable: invalid method", req.method, req.path);
        return Decision::InvalidMethod;
    }

    let segments = match req.segments() {
        Some(s) if s.scope() == Scope::Object => s,
        _ => {
            debug!("{} {} not indexable: not an object", req.method, req.path);
            return Decision::NotAnObject;
        }
    };
    // Object scope guarantees a container segment.
    let container = segments.container.as_deref().unwrap_or_default();
    let ctx = LookupContext::for_request(req, &segments);

    let container_meta = match lookup
        .container_meta(&ctx, &segments.account, container)
        .await
    {
        Ok(meta) => meta,
        Err(err) => {
            warn!(
                "Container metadata lookup for {}/{} failed: {:#}",
                segments.account, container, err
            );
            MetaMap::new()
        }
    };

    let enabled = match find_key(&container_meta, opt_in_key) {
        Some(value) => config_true_value(Some(value)),
        None => {
            let account_meta = match lookup.account_meta(&ctx, &segments.account).await {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(
                        "Account metadata lookup for {} failed: {:#}",
                        segments.account, err
                    );
                    MetaMap::new()
                }
            };
            config_true_value(find_key(&account_meta, opt_in_key))
        }
    };

    if !enabled {
        debug!(
            "{} {} not indexable: metadata `{}` not enabled",
            req.method, req.path, opt_in_key
        );
        return Decision::NotOptedIn;
    }

    Decision::Eligible
}

/// Boolean form of [`evaluate`].
pub async fn is_eligible(
    req: &RequestDescriptor,
    lookup: &dyn MetadataLookup,
    opt_in_key: &str,
) -> bool {
    evaluate(req, lookup, opt_in_key).await.is_eligible()
}
