//! Metadata lookups against the storage service.
//!
//! Issues `HEAD /<version>/<account>` and `HEAD /<version>/<account>/<container>`
//! and collects the `x-account-meta-*` / `x-container-meta-*` response
//! headers.  Lookups authenticate with the configured service token when
//! there is one, and otherwise with the token the client sent, so they see
//! exactly what the client is allowed to see.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::debug;

use super::lookup::{LookupContext, MetaMap, MetadataLookup, AUTH_TOKEN_HEADER};

const ACCOUNT_META_PREFIX: &str = "x-account-meta-";
const CONTAINER_META_PREFIX: &str = "x-container-meta-";

/// Characters left unescaped in a path segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// HEAD-based metadata lookup.
pub struct HttpMetadataLookup {
    client: reqwest::Client,
    endpoint: String,
    /// Service token; takes precedence over the client's token.
    auth_token: Option<String>,
}

impl HttpMetadataLookup {
    pub fn new(endpoint: &str, auth_token: Option<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            auth_token,
        })
    }

    fn account_url(&self, ctx: &LookupContext, account: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            utf8_percent_encode(&ctx.version, SEGMENT),
            utf8_percent_encode(account, SEGMENT)
        )
    }

    fn container_url(&self, ctx: &LookupContext, account: &str, container: &str) -> String {
        format!(
            "{}/{}",
            self.account_url(ctx, account),
            utf8_percent_encode(container, SEGMENT)
        )
    }

    fn token<'a>(&'a self, ctx: &'a LookupContext) -> Option<&'a str> {
        self.auth_token.as_deref().or(ctx.auth_token.as_deref())
    }

    async fn head(
        &self,
        url: String,
        token: Option<&str>,
        prefix: &'static str,
    ) -> anyhow::Result<MetaMap> {
        let mut request = self.client.head(&url);
        if let Some(token) = token {
            request = request.header(AUTH_TOKEN_HEADER, token);
        }
        let response = request.send().await?;

        match response.status() {
            status if status.is_success() => Ok(extract_meta(response.headers(), prefix)),
            StatusCode::NOT_FOUND => {
                debug!("Metadata lookup {} returned 404", url);
                Ok(MetaMap::new())
            }
            status => Err(anyhow::anyhow!(
                "metadata lookup {} failed with status {}",
                url,
                status
            )),
        }
    }
}

/// Collect headers starting with `prefix`, stripped and lowercased.
fn extract_meta(headers: &HeaderMap, prefix: &str) -> MetaMap {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let key = name.as_str().strip_prefix(prefix)?;
            let value = value.to_str().ok()?;
            Some((key.to_ascii_lowercase(), value.to_string()))
        })
        .collect()
}

impl MetadataLookup for HttpMetadataLookup {
    fn account_meta<'a>(
        &'a self,
        ctx: &'a LookupContext,
        account: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetaMap>> + Send + 'a>> {
        let url = self.account_url(ctx, account);
        Box::pin(self.head(url, self.token(ctx), ACCOUNT_META_PREFIX))
    }

    fn container_meta<'a>(
        &'a self,
        ctx: &'a LookupContext,
        account: &'a str,
        container: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetaMap>> + Send + 'a>> {
        let url = self.container_url(ctx, account, container);
        Box::pin(self.head(url, self.token(ctx), CONTAINER_META_PREFIX))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eligibility::{evaluate, Decision};
    use crate::request::RequestDescriptor;
    use axum::body::Body;
    use axum::http::Request;
    use axum::response::Response;
    use axum::Router;
    use reqwest::header::HeaderValue;

    const USER_TOKEN: &str = "AUTH_tk_user";
    const SERVICE_TOKEN: &str = "AUTH_tk_service";
    const KEY: &str = "search-enabled";

    fn lookup() -> HttpMetadataLookup {
        HttpMetadataLookup::new("http://storage.local:8080/", None, Duration::from_secs(1)).unwrap()
    }

    fn meta_response(status: StatusCode, headers: &[(&str, &str)]) -> Response {
        let mut builder = Response::builder().status(status.as_u16());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    /// Storage service stand-in that only answers authenticated requests.
    async fn fake_storage(req: Request<Body>) -> Response {
        let token = req
            .headers()
            .get(AUTH_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let Some(token) = token.filter(|t| t == USER_TOKEN || t == SERVICE_TOKEN) else {
            return meta_response(StatusCode::UNAUTHORIZED, &[]);
        };

        match req.uri().path() {
            "/v1/acct" => meta_response(
                StatusCode::NO_CONTENT,
                &[
                    ("x-account-meta-search-enabled", "yes"),
                    ("x-account-object-count", "7"),
                ],
            ),
            "/v1/acct/cont" => {
                meta_response(StatusCode::NO_CONTENT, &[("x-container-meta-color", "blue")])
            }
            "/v1/acct/optout" => meta_response(
                StatusCode::NO_CONTENT,
                &[("x-container-meta-search-enabled", "false")],
            ),
            "/v2/acct" => meta_response(StatusCode::NO_CONTENT, &[("x-account-meta-api", "v2")]),
            "/v1/whoami" => {
                meta_response(StatusCode::NO_CONTENT, &[("x-account-meta-token", token.as_str())])
            }
            "/v1/acct/missing" => meta_response(StatusCode::NOT_FOUND, &[]),
            _ => meta_response(StatusCode::SERVICE_UNAVAILABLE, &[]),
        }
    }

    async fn spawn_storage() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, Router::new().fallback(fake_storage))
                .await
                .unwrap();
        });
        format!("http://{addr}")
    }

    fn remote(endpoint: &str, service_token: Option<&str>) -> HttpMetadataLookup {
        HttpMetadataLookup::new(
            endpoint,
            service_token.map(str::to_string),
            Duration::from_secs(2),
        )
        .unwrap()
    }

    fn user_ctx() -> LookupContext {
        LookupContext::new("v1", Some(USER_TOKEN.to_string()))
    }

    #[test]
    fn test_urls_are_escaped() {
        let l = lookup();
        let ctx = LookupContext::default();
        assert_eq!(
            l.account_url(&ctx, "AUTH_test"),
            "http://storage.local:8080/v1/AUTH_test"
        );
        assert_eq!(
            l.container_url(&ctx, "AUTH_test", "my photos"),
            "http://storage.local:8080/v1/AUTH_test/my%20photos"
        );
        assert_eq!(
            l.container_url(&ctx, "acct", "a/b"),
            "http://storage.local:8080/v1/acct/a%2Fb"
        );
    }

    #[test]
    fn test_url_uses_request_version() {
        let ctx = LookupContext::new("v2", None);
        assert_eq!(
            lookup().account_url(&ctx, "acct"),
            "http://storage.local:8080/v2/acct"
        );
    }

    #[test]
    fn test_extract_meta_strips_prefix() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-container-meta-search-enabled",
            HeaderValue::from_static("True"),
        );
        headers.insert("x-container-object-count", HeaderValue::from_static("3"));
        headers.insert("x-account-meta-other", HeaderValue::from_static("x"));

        let meta = extract_meta(&headers, CONTAINER_META_PREFIX);
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get("search-enabled").map(String::as_str), Some("True"));
    }

    #[tokio::test]
    async fn test_head_collects_account_metadata() {
        let endpoint = spawn_storage().await;
        let meta = remote(&endpoint, None)
            .account_meta(&user_ctx(), "acct")
            .await
            .unwrap();
        assert_eq!(meta.len(), 1);
        assert_eq!(meta.get(KEY).map(String::as_str), Some("yes"));
    }

    #[tokio::test]
    async fn test_missing_container_is_empty_map() {
        let endpoint = spawn_storage().await;
        let meta = remote(&endpoint, None)
            .container_meta(&user_ctx(), "acct", "missing")
            .await
            .unwrap();
        assert!(meta.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_an_error() {
        let endpoint = spawn_storage().await;
        let err = remote(&endpoint, None)
            .container_meta(&user_ctx(), "acct", "broken")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_unauthenticated_lookup_is_an_error() {
        let endpoint = spawn_storage().await;
        let err = remote(&endpoint, None)
            .account_meta(&LookupContext::default(), "acct")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("401"));
    }

    #[tokio::test]
    async fn test_service_token_takes_precedence_over_client_token() {
        let endpoint = spawn_storage().await;

        let meta = remote(&endpoint, None)
            .account_meta(&user_ctx(), "whoami")
            .await
            .unwrap();
        assert_eq!(meta.get("token").map(String::as_str), Some(USER_TOKEN));

        let meta = remote(&endpoint, Some(SERVICE_TOKEN))
            .account_meta(&user_ctx(), "whoami")
            .await
            .unwrap();
        assert_eq!(meta.get("token").map(String::as_str), Some(SERVICE_TOKEN));
    }

    #[tokio::test]
    async fn test_lookup_follows_request_version() {
        let endpoint = spawn_storage().await;
        let ctx = LookupContext::new("v2", Some(USER_TOKEN.to_string()));
        let meta = remote(&endpoint, None).account_meta(&ctx, "acct").await.unwrap();
        assert_eq!(meta.get("api").map(String::as_str), Some("v2"));
    }

    fn put(path: &str, token: Option<&str>) -> RequestDescriptor {
        let headers = token
            .map(|t| vec![("X-Auth-Token".to_string(), t.to_string())])
            .unwrap_or_default();
        RequestDescriptor::new("PUT", path, headers)
    }

    #[tokio::test]
    async fn test_eligibility_over_http_falls_through_to_account() {
        let endpoint = spawn_storage().await;
        let lookup = remote(&endpoint, None);

        let decision = evaluate(&put("/v1/acct/cont/obj", Some(USER_TOKEN)), &lookup, KEY).await;
        assert_eq!(decision, Decision::Eligible);

        // Missing container: empty metadata, so the account decides.
        let decision = evaluate(&put("/v1/acct/missing/obj", Some(USER_TOKEN)), &lookup, KEY).await;
        assert_eq!(decision, Decision::Eligible);

        let decision = evaluate(&put("/v1/acct/optout/obj", Some(USER_TOKEN)), &lookup, KEY).await;
        assert_eq!(decision, Decision::NotOptedIn);

        let decision = evaluate(&put("/v1/acct/cont/obj", None), &lookup, KEY).await;
        assert_eq!(decision, Decision::NotOptedIn);
    }
}
