//! Endpoint and credential resolution
//!
//! Supports multiple configuration methods:
//! 1. Generic env vars (BLOCKCHAIN_API_URL, LLM_API_URL) - highest priority
//! 2. Backend-specific env vars (ERGO_EXPLORER_URL, ERGO_NODE_URL, OLLAMA_API_URL)
//! 3. Public defaults - explorer API and a local node / Ollama
//!
//! # Examples
//!
//! ```bash
//! # Option 1: Explicit URL for whichever backend is selected
//! export BLOCKCHAIN_BACKEND="node"
//! export BLOCKCHAIN_API_URL="http://10.0.0.5:9053"
//!
//! # Option 2: Backend-specific URLs, switch with BLOCKCHAIN_BACKEND
//! export ERGO_EXPLORER_URL="https://explorer.example.org/api/v1"
//! export ERGO_NODE_URL="http://127.0.0.1:9053"
//!
//! # Option 3: No env vars - public explorer API (rate limited)
//! ```
//!
//! Secrets are kept out of [`super::Config`] so the config can be printed and
//! serialized without leaking keys.

use super::BackendKind;
use secrecy::SecretString;

/// Environment variable names
pub mod env_vars {
    // Blockchain backend
    pub const BLOCKCHAIN_BACKEND: &str = "BLOCKCHAIN_BACKEND";
    pub const BLOCKCHAIN_API_URL: &str = "BLOCKCHAIN_API_URL";
    pub const ERGO_EXPLORER_URL: &str = "ERGO_EXPLORER_URL";
    pub const ERGO_NODE_URL: &str = "ERGO_NODE_URL";
    pub const BLOCKCHAIN_API_KEY: &str = "BLOCKCHAIN_API_KEY";
    pub const NODE_USERNAME: &str = "NODE_USERNAME";
    pub const NODE_PASSWORD: &str = "NODE_PASSWORD";
    pub const BLOCKCHAIN_TIMEOUT_SECS: &str = "BLOCKCHAIN_TIMEOUT_SECS";
    pub const BLOCKCHAIN_CACHE_TTL_SECS: &str = "BLOCKCHAIN_CACHE_TTL_SECS";
    pub const BLOCKCHAIN_CACHE_MAX_ENTRIES: &str = "BLOCKCHAIN_CACHE_MAX_ENTRIES";

    // LLM providers
    pub const LLM_PROVIDER: &str = "LLM_PROVIDER";
    pub const LLM_FALLBACK_PROVIDER: &str = "LLM_FALLBACK_PROVIDER";
    pub const LLM_MAX_RETRIES: &str = "LLM_MAX_RETRIES";
    pub const LLM_TIMEOUT_SECS: &str = "LLM_TIMEOUT_SECS";
    pub const LLM_API_URL: &str = "LLM_API_URL";
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    pub const CLAUDE_MODEL: &str = "CLAUDE_MODEL";
    pub const OLLAMA_API_URL: &str = "OLLAMA_API_URL";
    pub const OLLAMA_MODEL: &str = "OLLAMA_MODEL";

    // Engine limits
    pub const CONTEXT_BUDGET_CHARS: &str = "CONTEXT_BUDGET_CHARS";
    pub const TRACE_FAN_OUT_CEILING: &str = "TRACE_FAN_OUT_CEILING";
    pub const TRACE_CONCURRENCY: &str = "TRACE_CONCURRENCY";
    pub const REQUEST_TIMEOUT_SECS: &str = "REQUEST_TIMEOUT_SECS";
}

/// Public defaults
pub mod defaults {
    pub const EXPLORER_URL: &str = "https://api.ergoplatform.com/api/v1";
    pub const NODE_URL: &str = "http://127.0.0.1:9053";
    pub const CLAUDE_URL: &str = "https://api.anthropic.com/v1";
    pub const OLLAMA_URL: &str = "http://localhost:11434";
}

/// Resolve the blockchain base URL for a backend.
///
/// Priority:
/// 1. BLOCKCHAIN_API_URL
/// 2. ERGO_EXPLORER_URL / ERGO_NODE_URL depending on the backend
/// 3. Public default
pub fn resolve_chain_url<F>(backend: BackendKind, lookup: &F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = non_empty(lookup(env_vars::BLOCKCHAIN_API_URL)) {
        tracing::debug!("Using BLOCKCHAIN_API_URL for {}", backend.name());
        return url;
    }

    let (var, fallback) = match backend {
        BackendKind::Explorer => (env_vars::ERGO_EXPLORER_URL, defaults::EXPLORER_URL),
        BackendKind::Node => (env_vars::ERGO_NODE_URL, defaults::NODE_URL),
    };
    if let Some(url) = non_empty(lookup(var)) {
        tracing::debug!("Using {} for {}", var, backend.name());
        return url;
    }

    if backend == BackendKind::Explorer {
        tracing::warn!("No explorer URL configured, using public explorer API (rate limited)");
    }
    fallback.to_string()
}

/// Credentials for the blockchain backend
#[derive(Debug, Default)]
pub struct ChainCredentials {
    /// Explorer `api_key` header or node bearer token
    pub api_key: Option<SecretString>,
    /// Node basic auth user
    pub username: Option<String>,
    /// Node basic auth password
    pub password: Option<SecretString>,
}

/// All secrets the engine needs
#[derive(Debug, Default)]
pub struct Credentials {
    pub chain: ChainCredentials,
    pub anthropic_api_key: Option<SecretString>,
}

impl Credentials {
    /// Load credentials from the process environment
    pub fn from_env() -> Self {
        Self::from_lookup(&|key: &str| std::env::var(key).ok())
    }

    /// Load credentials through an arbitrary lookup (used by tests)
    pub fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret = |key: &str| api_key(lookup(key)).map(SecretString::from);
        Self {
            chain: ChainCredentials {
                api_key: secret(env_vars::BLOCKCHAIN_API_KEY),
                username: non_empty(lookup(env_vars::NODE_USERNAME)),
                password: secret(env_vars::NODE_PASSWORD),
            },
            anthropic_api_key: secret(env_vars::ANTHROPIC_API_KEY),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Template placeholders such as `your_api_key_here` count as unset.
fn api_key(value: Option<String>) -> Option<String> {
    non_empty(value).filter(|v| !v.starts_with("your_"))
}
