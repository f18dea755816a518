//! LLM client layer
//!
//! One concrete client per provider, selected through the [`LlmProvider`]
//! enum. HTTP goes through an injected [`HttpTransport`] so providers can be
//! exercised without a network. [`LlmDispatcher`] adds retry and fallback.

pub mod claude;
pub mod dispatch;
pub mod ollama;
pub mod parse;
pub mod transport;

use crate::context::{ConversationContext, Turn};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use claude::ClaudeClient;
pub use dispatch::{LlmDispatcher, RequestLifecycle, RequestState};
pub use ollama::OllamaClient;
pub use transport::{HttpReply, HttpTransport, ReqwestTransport};

/// Provider families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Hosted Anthropic Claude
    Claude,
    /// Local Ollama inference
    Ollama,
}

impl ProviderKind {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderKind::Claude => "claude",
            ProviderKind::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "ollama" | "local" => Ok(ProviderKind::Ollama),
            other => Err(Error::Config(format!(
                "Unknown LLM provider: {}. Supported: claude, ollama",
                other
            ))),
        }
    }
}

/// Per-request generation options
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmOptions {
    /// System prompt
    pub system: Option<String>,
    /// Overrides the provider's configured max tokens
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// A single generation request
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Final user message (facts and question)
    pub prompt: String,
    /// Earlier conversation turns, oldest first
    pub context: Vec<Turn>,
    pub options: LlmOptions,
}

impl LlmRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Vec::new(),
            options: LlmOptions::default(),
        }
    }

    /// Build a request from an assembled, budgeted context
    pub fn from_context(context: &ConversationContext, options: LlmOptions) -> Self {
        Self {
            prompt: context.body.clone(),
            context: context.turns.clone(),
            options,
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.options.system = Some(system.into());
        self
    }

    /// History and prompt flattened into one text block
    pub fn flattened_prompt(&self) -> String {
        if self.context.is_empty() {
            return self.prompt.clone();
        }
        let mut out = String::new();
        for turn in &self.context {
            out.push_str(turn.role.name());
            out.push_str(": ");
            out.push_str(&turn.text);
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.prompt);
        out
    }
}

/// Raw provider output before dispatch metadata is attached
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub model: String,
}

/// Dispatcher output
#[derive(Debug, Clone, Serialize)]
pub struct LlmResponse {
    pub text: String,
    /// JSON object found in the reply, if any
    pub structured: Option<Value>,
    /// Provider that produced `text`
    pub provider: ProviderKind,
    pub model: String,
    pub latency_ms: u64,
    /// Attempts made against the serving provider
    pub attempts: u32,
    /// Served by the fallback provider
    pub degraded: bool,
}

/// Concrete provider clients
pub enum LlmProvider {
    Claude(ClaudeClient),
    Ollama(OllamaClient),
}

impl LlmProvider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            LlmProvider::Claude(_) => ProviderKind::Claude,
            LlmProvider::Ollama(_) => ProviderKind::Ollama,
        }
    }

    pub fn model(&self) -> &str {
        match self {
            LlmProvider::Claude(client) => client.model(),
            LlmProvider::Ollama(client) => client.model(),
        }
    }

    /// One attempt, no retry
    pub async fn complete(&self, request: &LlmRequest) -> Result<Completion> {
        match self {
            LlmProvider::Claude(client) => client.complete(request).await,
            LlmProvider::Ollama(client) => client.complete(request).await,
        }
    }
}

impl From<ClaudeClient> for LlmProvider {
    fn from(client: ClaudeClient) -> Self {
        LlmProvider::Claude(client)
    }
}

impl From<OllamaClient> for LlmProvider {
    fn from(client: OllamaClient) -> Self {
        LlmProvider::Ollama(client)
    }
}
