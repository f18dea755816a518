//! Blockchain data access
//!
//! [`BlockchainApi`] is the seam between the engine and the chain. Two
//! backends implement it (explorer and node), and [`CachedClient`] decorates
//! either with a TTL cache. All operations return the raw JSON payload;
//! turning it into records is the normalizer's job.

pub mod cache;
pub mod explorer;
mod http;
pub mod node;

#[cfg(test)]
pub(crate) mod mock;

use crate::config::{BackendKind, ChainConfig, ChainCredentials};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub use cache::{CacheStats, CachedClient};
pub use explorer::ExplorerClient;
pub use node::NodeClient;

/// Offset/limit window over an address's history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u32,
    pub limit: u32,
}

impl Page {
    pub fn new(offset: u32, limit: u32) -> Self {
        Self { offset, limit }
    }

    /// First `limit` entries
    pub fn first(limit: u32) -> Self {
        Self::new(0, limit)
    }

    pub(crate) fn query(&self) -> [(&'static str, String); 2] {
        [
            ("offset", self.offset.to_string()),
            ("limit", self.limit.to_string()),
        ]
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::first(50)
    }
}

/// Read-only access to chain data.
///
/// Errors follow the crate taxonomy: missing data is `NotFound`, throttling
/// is `RateLimited`, timeouts and connection failures are `Transport`, other
/// non-2xx statuses are `Upstream` and unparseable bodies are `Malformed`.
/// Implementations never retry; callers decide.
#[async_trait]
pub trait BlockchainApi: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    async fn get_address_info(&self, address: &str) -> Result<Value>;

    async fn get_transaction(&self, tx_id: &str) -> Result<Value>;

    async fn get_address_transactions(&self, address: &str, page: Page) -> Result<Value>;

    async fn get_utxos(&self, address: &str) -> Result<Value>;

    /// Token metadata (name, decimals)
    async fn get_token_info(&self, token_id: &str) -> Result<Value>;

    async fn get_network_status(&self) -> Result<Value>;
}

/// Build the configured backend, wrapped in a cache when the TTL is non-zero.
pub fn build_client(
    config: &ChainConfig,
    credentials: ChainCredentials,
) -> Result<Arc<dyn BlockchainApi>> {
    tracing::info!(
        backend = config.backend.name(),
        base_url = %config.base_url,
        cache_ttl_secs = config.cache_ttl_secs,
        cache_max_entries = config.cache_max_entries,
        "Creating blockchain client"
    );
    match config.backend {
        BackendKind::Explorer => {
            let client = ExplorerClient::new(&config.base_url, config.timeout(), credentials.api_key)?;
            Ok(with_cache(client, config))
        }
        BackendKind::Node => {
            let client = NodeClient::new(&config.base_url, config.timeout(), credentials)?;
            Ok(with_cache(client, config))
        }
    }
}

fn with_cache<C: BlockchainApi + 'static>(client: C, config: &ChainConfig) -> Arc<dyn BlockchainApi> {
    if config.cache_ttl_secs == 0 {
        Arc::new(client)
    } else {
        Arc::new(CachedClient::new(
            client,
            Duration::from_secs(config.cache_ttl_secs),
            config.cache_max_entries,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_build_client_per_backend() {
        let mut config = ChainConfig::default();
        let client = build_client(&config, ChainCredentials::default()).unwrap();
        assert_eq!(client.name(), "explorer");

        config.backend = BackendKind::Node;
        config.base_url = "http://127.0.0.1:9053".to_string();
        config.cache_ttl_secs = 0;
        let client = build_client(&config, ChainCredentials::default()).unwrap();
        assert_eq!(client.name(), "node");
    }

    #[test]
    fn test_build_client_rejects_bad_url() {
        let config = ChainConfig {
            base_url: "::not a url::".to_string(),
            ..ChainConfig::default()
        };
        let err = build_client(&config, ChainCredentials::default()).err().unwrap();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_page_query() {
        let page = Page::new(20, 10);
        assert_eq!(
            page.query(),
            [("offset", "20".to_string()), ("limit", "10".to_string())]
        );
        assert_eq!(Page::default(), Page::first(50));
    }
}
