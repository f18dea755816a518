//! Configuration for the analysis engine

pub mod endpoints;

use crate::llm::ProviderKind;
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

// Re-export endpoint resolution
pub use endpoints::{env_vars, ChainCredentials, Credentials};

/// Supported blockchain data backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Explorer REST API (aggregated, paginated)
    #[default]
    Explorer,
    /// Direct node REST API
    Node,
}

impl BackendKind {
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Explorer => "explorer",
            BackendKind::Node => "node",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "explorer" => Ok(BackendKind::Explorer),
            "node" => Ok(BackendKind::Node),
            other => Err(Error::Config(format!(
                "Unknown blockchain backend: {}. Supported: explorer, node",
                other
            ))),
        }
    }
}

/// Blockchain client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub backend: BackendKind,
    /// Base URL including any API version prefix
    pub base_url: String,
    /// Per-call timeout (milliseconds)
    pub timeout_ms: u64,
    /// Response cache TTL in seconds; 0 disables the cache
    pub cache_ttl_secs: u64,
    /// Cached responses kept before the least recently used is evicted
    pub cache_max_entries: usize,
    /// Transactions fetched per address
    pub page_limit: u32,
    /// Caller-side retry for rate limiting and transport failures
    pub retry: RetryPolicy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Explorer,
            base_url: endpoints::defaults::EXPLORER_URL.to_string(),
            timeout_ms: 15_000,
            cache_ttl_secs: 300, // 5 minutes
            cache_max_entries: 5_000,
            page_limit: 50,
            retry: RetryPolicy::default(),
        }
    }
}

impl ChainConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Anthropic Claude settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaudeConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub api_version: String,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            base_url: endpoints::defaults::CLAUDE_URL.to_string(),
            model: "claude-3-sonnet-20240229".to_string(),
            max_tokens: 4096,
            api_version: "2023-06-01".to_string(),
        }
    }
}

/// Local Ollama settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: endpoints::defaults::OLLAMA_URL.to_string(),
            model: "llama3".to_string(),
            max_tokens: 4096,
        }
    }
}

/// LLM layer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider used when the caller does not pick one
    pub provider: ProviderKind,
    /// Secondary provider tried after the primary fails
    pub fallback: Option<ProviderKind>,
    pub claude: ClaudeConfig,
    pub ollama: OllamaConfig,
    /// Per-call timeout (milliseconds)
    pub timeout_ms: u64,
    pub temperature: f32,
    pub retry: RetryPolicy,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Claude,
            fallback: None,
            claude: ClaudeConfig::default(),
            ollama: OllamaConfig::default(),
            timeout_ms: 60_000,
            temperature: 0.2,
            retry: RetryPolicy::default(),
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Context budget settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Hard ceiling on the rendered context (bytes of UTF-8)
    pub budget_chars: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_chars: 16_000, // roughly 4k tokens
        }
    }
}

/// Forensic trace settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Hop depth when the caller does not specify one
    pub default_depth: u8,
    /// Addresses with more transactions than this are not expanded
    pub fan_out_ceiling: u64,
    /// Concurrent fetches per hop level
    pub concurrency: usize,
    /// Transactions fetched per traced address
    pub page_limit: u32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            default_depth: 2,
            fan_out_ceiling: 500,
            concurrency: 4,
            page_limit: 50,
        }
    }
}

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub trace: TraceConfig,
    /// Whole-request deadline (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    120_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            llm: LlmConfig::default(),
            context: ContextConfig::default(),
            trace: TraceConfig::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Config {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(&|key: &str| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load a JSON config file, then apply environment overrides
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        let mut config = Self::from_json(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.apply_overrides(&|key: &str| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Parse a JSON config; missing fields take their defaults.
    ///
    /// A chain section that names the node backend without a `base_url`
    /// gets the default node URL rather than the explorer's.
    pub fn from_json(content: &str) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_str(content)?;
        let has_url = raw
            .get("chain")
            .and_then(|chain| chain.get("base_url"))
            .is_some();
        let mut config: Config = serde_json::from_value(raw)?;
        if !has_url && config.chain.backend == BackendKind::Node {
            config.chain.base_url = endpoints::defaults::NODE_URL.to_string();
        }
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Apply overrides from an environment-like lookup
    pub fn apply_overrides<F>(&mut self, lookup: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(backend) = lookup(env_vars::BLOCKCHAIN_BACKEND) {
            self.chain.backend = backend.parse()?;
            self.chain.base_url = endpoints::resolve_chain_url(self.chain.backend, lookup);
        } else if lookup(env_vars::BLOCKCHAIN_API_URL).is_some()
            || lookup(env_vars::ERGO_EXPLORER_URL).is_some()
            || lookup(env_vars::ERGO_NODE_URL).is_some()
        {
            self.chain.base_url = endpoints::resolve_chain_url(self.chain.backend, lookup);
        }
        if let Some(secs) = parse_var::<u64, F>(lookup, env_vars::BLOCKCHAIN_TIMEOUT_SECS)? {
            self.chain.timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(ttl) = parse_var(lookup, env_vars::BLOCKCHAIN_CACHE_TTL_SECS)? {
            self.chain.cache_ttl_secs = ttl;
        }
        if let Some(max) = parse_var(lookup, env_vars::BLOCKCHAIN_CACHE_MAX_ENTRIES)? {
            self.chain.cache_max_entries = max;
        }

        if let Some(provider) = lookup(env_vars::LLM_PROVIDER) {
            self.llm.provider = provider.parse()?;
        }
        if let Some(fallback) = lookup(env_vars::LLM_FALLBACK_PROVIDER) {
            self.llm.fallback = match fallback.trim() {
                "" | "none" => None,
                other => Some(other.parse()?),
            };
        }
        if let Some(retries) = parse_var::<u32, F>(lookup, env_vars::LLM_MAX_RETRIES)? {
            self.llm.retry.max_retries = retries.min(crate::retry::MAX_RETRIES_CAP);
        }
        if let Some(secs) = parse_var::<u64, F>(lookup, env_vars::LLM_TIMEOUT_SECS)? {
            self.llm.timeout_ms = secs.saturating_mul(1000);
        }
        if let Some(url) = lookup(env_vars::LLM_API_URL) {
            self.llm.claude.base_url = url;
        }
        if let Some(model) = lookup(env_vars::CLAUDE_MODEL) {
            self.llm.claude.model = model;
        }
        if let Some(url) = lookup(env_vars::OLLAMA_API_URL) {
            self.llm.ollama.base_url = url;
        }
        if let Some(model) = lookup(env_vars::OLLAMA_MODEL) {
            self.llm.ollama.model = model;
        }

        if let Some(budget) = parse_var(lookup, env_vars::CONTEXT_BUDGET_CHARS)? {
            self.context.budget_chars = budget;
        }
        if let Some(ceiling) = parse_var(lookup, env_vars::TRACE_FAN_OUT_CEILING)? {
            self.trace.fan_out_ceiling = ceiling;
        }
        if let Some(concurrency) = parse_var::<usize, F>(lookup, env_vars::TRACE_CONCURRENCY)? {
            self.trace.concurrency = concurrency.max(1);
        }
        if let Some(secs) = parse_var::<u64, F>(lookup, env_vars::REQUEST_TIMEOUT_SECS)? {
            self.request_timeout_ms = secs.saturating_mul(1000);
        }

        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{}={}: {}", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_deserialize_defaults() {
        let parsed: Config = serde_json::from_value(serde_json::json!({})).expect("parse config");
        assert_eq!(parsed.chain.backend, BackendKind::Explorer);
        assert_eq!(parsed.llm.provider, ProviderKind::Claude);
        assert!(parsed.llm.fallback.is_none());
        assert_eq!(parsed.llm.retry.max_retries, 2);
        assert_eq!(parsed.request_timeout_ms, 120_000);
    }

    #[test]
    fn config_deserialize_explicit() {
        let value = serde_json::json!({
            "chain": {
                "backend": "node",
                "base_url": "http://127.0.0.1:9053",
                "timeout_ms": 5000,
                "cache_ttl_secs": 0,
                "page_limit": 20
            },
            "llm": {
                "provider": "ollama",
                "fallback": "claude",
                "claude": {
                    "base_url": "https://api.anthropic.com/v1",
                    "model": "claude-3-haiku-20240307",
                    "max_tokens": 1024,
                    "api_version": "2023-06-01"
                },
                "ollama": {
                    "base_url": "http://localhost:11434",
                    "model": "mistral",
                    "max_tokens": 2048
                },
                "timeout_ms": 30000,
                "temperature": 0.0,
                "retry": { "max_retries": 4, "base_delay_ms": 100, "max_delay_ms": 1000 }
            },
            "request_timeout_ms": 60000
        });
        let parsed: Config = serde_json::from_value(value).expect("parse config");
        assert_eq!(parsed.chain.backend, BackendKind::Node);
        assert_eq!(parsed.chain.retry, RetryPolicy::default());
        assert_eq!(parsed.llm.provider, ProviderKind::Ollama);
        assert_eq!(parsed.llm.fallback, Some(ProviderKind::Claude));
        assert_eq!(parsed.llm.retry.max_retries, 4);
        assert_eq!(parsed.trace.default_depth, 2);
    }

    #[test]
    fn env_overrides_apply() {
        let lookup = lookup_from(&[
            (env_vars::BLOCKCHAIN_BACKEND, "node"),
            (env_vars::ERGO_NODE_URL, "http://node:9053"),
            (env_vars::LLM_PROVIDER, "ollama"),
            (env_vars::LLM_FALLBACK_PROVIDER, "claude"),
            (env_vars::LLM_MAX_RETRIES, "3"),
            (env_vars::CONTEXT_BUDGET_CHARS, "4000"),
            (env_vars::TRACE_CONCURRENCY, "0"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(&lookup).unwrap();

        assert_eq!(config.chain.backend, BackendKind::Node);
        assert_eq!(config.chain.base_url, "http://node:9053");
        assert_eq!(config.llm.provider, ProviderKind::Ollama);
        assert_eq!(config.llm.fallback, Some(ProviderKind::Claude));
        assert_eq!(config.llm.retry.max_retries, 3);
        assert_eq!(config.context.budget_chars, 4000);
        assert_eq!(config.trace.concurrency, 1);
    }

    #[test]
    fn invalid_override_is_config_error() {
        let lookup = lookup_from(&[(env_vars::LLM_MAX_RETRIES, "many")]);
        let mut config = Config::default();
        let err = config.apply_overrides(&lookup).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let lookup = lookup_from(&[(env_vars::BLOCKCHAIN_BACKEND, "graph")]);
        assert!(config.apply_overrides(&lookup).is_err());
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{ "context": {{ "budget_chars": 2048 }}, "trace": {{ "default_depth": 3, "fan_out_ceiling": 100, "concurrency": 2, "page_limit": 25 }} }}"#
        )
        .unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.context.budget_chars, 2048);
        assert_eq!(config.trace.default_depth, 3);
        assert_eq!(config.trace.fan_out_ceiling, 100);
    }

    #[test]
    fn partial_sections_fill_from_defaults() {
        let config = Config::from_json(r#"{ "chain": { "backend": "node" }, "llm": { "provider": "ollama" } }"#)
            .expect("partial config");
        assert_eq!(config.chain.backend, BackendKind::Node);
        assert_eq!(config.chain.base_url, endpoints::defaults::NODE_URL);
        assert_eq!(config.chain.cache_max_entries, 5_000);
        assert_eq!(config.llm.provider, ProviderKind::Ollama);
        assert_eq!(config.llm.claude.model, ClaudeConfig::default().model);

        let config = Config::from_json(r#"{ "chain": { "backend": "node", "base_url": "http://n:1" } }"#)
            .expect("explicit url");
        assert_eq!(config.chain.base_url, "http://n:1");
    }

    #[test]
    fn huge_timeouts_saturate() {
        let lookup = lookup_from(&[
            (env_vars::BLOCKCHAIN_TIMEOUT_SECS, "18446744073709551615"),
            (env_vars::REQUEST_TIMEOUT_SECS, "18446744073709551615"),
            (env_vars::LLM_TIMEOUT_SECS, "18446744073709551615"),
            (env_vars::BLOCKCHAIN_CACHE_MAX_ENTRIES, "10"),
        ]);
        let mut config = Config::default();
        config.apply_overrides(&lookup).unwrap();
        assert_eq!(config.chain.timeout_ms, u64::MAX);
        assert_eq!(config.request_timeout_ms, u64::MAX);
        assert_eq!(config.llm.timeout_ms, u64::MAX);
        assert_eq!(config.chain.cache_max_entries, 10);
    }

    #[test]
    fn missing_file_is_config_error() {
        let err = Config::from_file(Path::new("/nonexistent/blue.json")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
