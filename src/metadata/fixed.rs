//! Fixed metadata table.
//!
//! Serves account and container metadata from memory.  Used when the proxy
//! is configured with `metadata.source: static` and by tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::lookup::{LookupContext, MetaMap, MetadataLookup};
use crate::config::StaticMetadataConfig;

/// In-memory metadata table.
///
/// Keys are normalized to lowercase on insert.  Lookup calls are counted so
/// callers can verify how many lookups a decision needed.
#[derive(Debug, Default)]
pub struct StaticMetadata {
    accounts: HashMap<String, MetaMap>,
    /// Keyed by `account/container`.
    containers: HashMap<String, MetaMap>,
    account_lookups: AtomicUsize,
    container_lookups: AtomicUsize,
}

impl StaticMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &StaticMetadataConfig) -> Self {
        let mut table = Self::new();
        for (account, meta) in &config.accounts {
            table.accounts.insert(account.clone(), normalize(meta));
        }
        for (path, meta) in &config.containers {
            table.containers.insert(path.clone(), normalize(meta));
        }
        table
    }

    /// Set one metadata entry on an account.
    pub fn with_account(mut self, account: &str, key: &str, value: &str) -> Self {
        self.accounts
            .entry(account.to_string())
            .or_default()
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Set one metadata entry on a container.
    pub fn with_container(mut self, account: &str, container: &str, key: &str, value: &str) -> Self {
        self.containers
            .entry(container_key(account, container))
            .or_default()
            .insert(key.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn account_lookups(&self) -> usize {
        self.account_lookups.load(Ordering::SeqCst)
    }

    pub fn container_lookups(&self) -> usize {
        self.container_lookups.load(Ordering::SeqCst)
    }
}

fn container_key(account: &str, container: &str) -> String {
    format!("{account}/{container}")
}

fn normalize(meta: &HashMap<String, String>) -> MetaMap {
    meta.iter()
        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
        .collect()
}

impl MetadataLookup for StaticMetadata {
    fn account_meta<'a>(
        &'a self,
        _ctx: &'a LookupContext,
        account: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetaMap>> + Send + 'a>> {
        self.account_lookups.fetch_add(1, Ordering::SeqCst);
        let meta = self.accounts.get(account).cloned().unwrap_or_default();
        Box::pin(async move { Ok(meta) })
    }

    fn container_meta<'a>(
        &'a self,
        _ctx: &'a LookupContext,
        account: &'a str,
        container: &'a str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<MetaMap>> + Send + 'a>> {
        self.container_lookups.fetch_add(1, Ordering::SeqCst);
        let meta = self
            .containers
            .get(&container_key(account, container))
            .cloned()
            .unwrap_or_default();
        Box::pin(async move { Ok(meta) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lookup_returns_configured_entries() {
        let ctx = LookupContext::default();
        let table = StaticMetadata::new()
            .with_account("acct", "Search-Enabled", "True")
            .with_container("acct", "cont", "color", "blue");

        let account = table.account_meta(&ctx, "acct").await.unwrap();
        assert_eq!(account.get("search-enabled").map(String::as_str), Some("True"));

        let container = table.container_meta(&ctx, "acct", "cont").await.unwrap();
        assert_eq!(container.get("color").map(String::as_str), Some("blue"));

        assert!(table.container_meta(&ctx, "acct", "other").await.unwrap().is_empty());
        assert!(table.account_meta(&ctx, "nobody").await.unwrap().is_empty());
        assert_eq!(table.account_lookups(), 2);
        assert_eq!(table.container_lookups(), 2);
    }

    #[tokio::test]
    async fn test_from_config_normalizes_keys() {
        let mut config = StaticMetadataConfig::default();
        config.containers.insert(
            "acct/cont".to_string(),
            HashMap::from([("QUEUER-ENABLED".to_string(), "yes".to_string())]),
        );
        let table = StaticMetadata::from_config(&config);
        let ctx = LookupContext::default();
        let meta = table.container_meta(&ctx, "acct", "cont").await.unwrap();
        assert_eq!(meta.get("queuer-enabled").map(String::as_str), Some("yes"));
    }
}
