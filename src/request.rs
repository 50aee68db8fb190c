//! Request descriptor and path scope classification.
//!
//! A [`RequestDescriptor`] is the immutable view of an inbound request that
//! the eligibility check and the event builder work from.  Header names keep
//! whatever casing the source used; lookups are case-insensitive.

use percent_encoding::percent_decode_str;

/// Path segments of a storage request: `/<version>/<account>[/<container>[/<object>]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegments {
    pub version: String,
    pub account: String,
    pub container: Option<String>,
    pub object: Option<String>,
}

/// Which level of the storage hierarchy a path addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Account,
    Container,
    Object,
}

impl PathSegments {
    /// Split `path` into version/account/container/object.
    ///
    /// The object segment keeps the remainder of the path, slashes included.
    /// Returns `None` when the path does not start with `/`, has fewer than
    /// two segments, or has an empty version or account segment.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix('/')?;
        let mut parts = rest.splitn(4, '/');

        let version = parts.next().filter(|s| !s.is_empty())?;
        let account = parts.next().filter(|s| !s.is_empty())?;
        let container = parts.next().filter(|s| !s.is_empty());
        // Anything after an empty container segment (`/v1/a//o`) is not an object.
        let object = match container {
            Some(_) => parts.next().filter(|s| !s.is_empty()),
            None => None,
        };

        Some(Self {
            version: version.to_string(),
            account: account.to_string(),
            container: container.map(str::to_string),
            object: object.map(str::to_string),
        })
    }

    pub fn scope(&self) -> Scope {
        match (&self.container, &self.object) {
            (Some(_), Some(_)) => Scope::Object,
            (Some(_), None) => Scope::Container,
            _ => Scope::Account,
        }
    }
}

/// Immutable per-request view used for eligibility and event construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// HTTP method, uppercase.
    pub method: String,
    /// Decoded request path.
    pub path: String,
    /// Header entries in source order and source casing.
    pub headers: Vec<(String, String)>,
}

impl RequestDescriptor {
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        headers: Vec<(String, String)>,
    ) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers,
        }
    }

    /// Build a descriptor from an HTTP request.
    ///
    /// The path is percent-decoded.  Repeated header names are joined into a
    /// single entry with `", "`; values that are not valid UTF-8 are skipped.
    /// `http` normalizes header names, so these descriptors always carry
    /// lowercase names.
    pub fn from_http<B>(req: &http::Request<B>) -> Self {
        let path = percent_decode_str(req.uri().path())
            .decode_utf8_lossy()
            .into_owned();

        let mut headers: Vec<(String, String)> = Vec::with_capacity(req.headers().keys_len());
        for name in req.headers().keys() {
            let values: Vec<&str> = req
                .headers()
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect();
            if values.is_empty() {
                continue;
            }
            headers.push((name.as_str().to_string(), values.join(", ")));
        }

        Self {
            method: req.method().as_str().to_string(),
            path,
            headers,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn segments(&self) -> Option<PathSegments> {
        PathSegments::parse(&self.path)
    }

    /// Scope of the request path, or `None` for paths outside the storage
    /// namespace (e.g. `/info`).
    pub fn scope(&self) -> Option<Scope> {
        self.segments().map(|s| s.scope())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_object_path() {
        let segs = PathSegments::parse("/v1/acct/cont/obj").unwrap();
        assert_eq!(segs.version, "v1");
        assert_eq!(segs.account, "acct");
        assert_eq!(segs.container.as_deref(), Some("cont"));
        assert_eq!(segs.object.as_deref(), Some("obj"));
        assert_eq!(segs.scope(), Scope::Object);
    }

    #[test]
    fn test_object_keeps_nested_slashes() {
        let segs = PathSegments::parse("/v1/acct/cont/a/b/c.txt").unwrap();
        assert_eq!(segs.object.as_deref(), Some("a/b/c.txt"));
        assert_eq!(segs.scope(), Scope::Object);
    }

    #[test]
    fn test_account_and_container_scopes() {
        assert_eq!(
            PathSegments::parse("/v1/acct").unwrap().scope(),
            Scope::Account
        );
        assert_eq!(
            PathSegments::parse("/v1/acct/").unwrap().scope(),
            Scope::Account
        );
        assert_eq!(
            PathSegments::parse("/v1/acct/cont").unwrap().scope(),
            Scope::Container
        );
        assert_eq!(
            PathSegments::parse("/v1/acct/cont/").unwrap().scope(),
            Scope::Container
        );
    }

    #[test]
    fn test_unparseable_paths() {
        assert_eq!(PathSegments::parse("/info"), None);
        assert_eq!(PathSegments::parse("/"), None);
        assert_eq!(PathSegments::parse(""), None);
        assert_eq!(PathSegments::parse("v1/acct/cont/obj"), None);
        assert_eq!(PathSegments::parse("//acct/cont/obj"), None);
        assert_eq!(PathSegments::parse("/v1//cont/obj"), None);
    }

    #[test]
    fn test_empty_container_is_not_object() {
        let segs = PathSegments::parse("/v1/acct//obj").unwrap();
        assert_eq!(segs.scope(), Scope::Account);
    }

    #[test]
    fn test_from_http_decodes_path_and_joins_headers() {
        let req = http::Request::builder()
            .method("PUT")
            .uri("/v1/acct/cont/my%20file.txt?multipart-manifest=put")
            .header("Content-Type", "text/plain")
            .header("x-object-meta-tag", "a")
            .header("x-object-meta-tag", "b")
            .body(())
            .unwrap();

        let desc = RequestDescriptor::from_http(&req);
        assert_eq!(desc.method, "PUT");
        assert_eq!(desc.path, "/v1/acct/cont/my file.txt");
        assert_eq!(desc.header("content-type"), Some("text/plain"));
        assert_eq!(desc.header("X-Object-Meta-Tag"), Some("a, b"));
        assert!(desc.headers.iter().any(|(k, _)| k == "content-type"));
        assert_eq!(desc.scope(), Some(Scope::Object));
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let desc = RequestDescriptor::new(
            "POST",
            "/v1/a/c/o",
            vec![("X-Project-Name".to_string(), "storm".to_string())],
        );
        assert_eq!(desc.header("x-project-name"), Some("storm"));
        assert_eq!(desc.header("X-PROJECT-NAME"), Some("storm"));
        assert_eq!(desc.header("x-missing"), None);
    }
}
