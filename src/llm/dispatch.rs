//! Provider dispatch with retry and fallback
//!
//! Every request walks a small state machine:
//!
//! ```text
//! Pending -> Dispatched -> Success
//!                |-> Retrying -> Dispatched
//!                |-> Failed   -> Dispatched (fallback provider)
//! ```
//!
//! Transient failures are retried against the same provider with
//! exponential backoff. When the primary is exhausted the configured
//! fallback gets the same request and the same retry policy.

use super::parse::extract_structured;
use super::transport::HttpTransport;
use super::{ClaudeClient, LlmProvider, LlmRequest, LlmResponse, OllamaClient, ProviderKind};
use crate::config::LlmConfig;
use crate::retry::{self, RetryPolicy};
use crate::{Error, Result};
use secrecy::SecretString;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Request lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    Pending,
    Dispatched,
    Retrying,
    Success,
    Failed,
}

impl RequestState {
    pub fn can_advance_to(self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Pending, Dispatched)
                | (Dispatched, Success)
                | (Dispatched, Retrying)
                | (Dispatched, Failed)
                | (Retrying, Dispatched)
                | (Failed, Dispatched)
        )
    }
}

/// One recorded state change
#[derive(Debug, Clone, Serialize)]
pub struct Transition {
    pub provider: ProviderKind,
    pub state: RequestState,
    /// 1-based attempt against `provider`
    pub attempt: u32,
}

/// Ordered record of a request's state changes
#[derive(Debug, Clone, Serialize)]
pub struct RequestLifecycle {
    state: RequestState,
    transitions: Vec<Transition>,
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLifecycle {
    pub fn new() -> Self {
        Self {
            state: RequestState::Pending,
            transitions: Vec::new(),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Calls sent to `provider`
    pub fn dispatches(&self, provider: ProviderKind) -> u32 {
        self.count(provider, RequestState::Dispatched)
    }

    /// Retries against `provider`
    pub fn retries(&self, provider: ProviderKind) -> u32 {
        self.count(provider, RequestState::Retrying)
    }

    fn count(&self, provider: ProviderKind, state: RequestState) -> u32 {
        self.transitions
            .iter()
            .filter(|t| t.provider == provider && t.state == state)
            .count() as u32
    }

    fn advance(&mut self, provider: ProviderKind, next: RequestState, attempt: u32) {
        debug_assert!(
            self.state.can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.state,
            next
        );
        tracing::trace!(provider = %provider, from = ?self.state, to = ?next, attempt, "LLM request transition");
        self.state = next;
        self.transitions.push(Transition {
            provider,
            state: next,
            attempt,
        });
    }
}

/// Routes requests to providers
pub struct LlmDispatcher {
    providers: Vec<LlmProvider>,
    fallback: Option<ProviderKind>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl LlmDispatcher {
    pub fn new(retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            providers: Vec::new(),
            fallback: None,
            retry,
            timeout,
        }
    }

    /// Both providers over one shared transport
    pub fn from_config(
        config: &LlmConfig,
        anthropic_api_key: Option<SecretString>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        let claude = ClaudeClient::new(config.claude.clone(), anthropic_api_key, transport.clone())
            .with_timeout(config.timeout())
            .with_temperature(config.temperature);
        let ollama = OllamaClient::new(config.ollama.clone(), transport)
            .with_timeout(config.timeout())
            .with_temperature(config.temperature);

        Self::new(config.retry.clone(), config.timeout())
            .with_provider(claude.into())
            .with_provider(ollama.into())
            .with_fallback(config.fallback)
    }

    /// Register a provider, replacing any of the same kind
    pub fn with_provider(mut self, provider: LlmProvider) -> Self {
        self.providers.retain(|p| p.kind() != provider.kind());
        self.providers.push(provider);
        self
    }

    pub fn with_fallback(mut self, fallback: Option<ProviderKind>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn fallback(&self) -> Option<ProviderKind> {
        self.fallback
    }

    fn provider(&self, kind: ProviderKind) -> Option<&LlmProvider> {
        self.providers.iter().find(|p| p.kind() == kind)
    }

    /// Send `request` to `primary`, falling back if configured.
    pub async fn query(&self, primary: ProviderKind, request: &LlmRequest) -> Result<LlmResponse> {
        self.query_traced(primary, request).await.0
    }

    /// Same as [`LlmDispatcher::query`], also returning the lifecycle record.
    pub async fn query_traced(
        &self,
        primary: ProviderKind,
        request: &LlmRequest,
    ) -> (Result<LlmResponse>, RequestLifecycle) {
        let mut lifecycle = RequestLifecycle::new();
        let mut failures = Vec::new();

        match self.attempt(primary, request, &mut lifecycle).await {
            Ok(response) => return (Ok(response), lifecycle),
            Err(e) => failures.push(format!("{}: {}", primary, e)),
        }

        if let Some(fallback) = self.fallback.filter(|f| *f != primary) {
            tracing::warn!(
                primary = %primary,
                fallback = %fallback,
                error = %failures[0],
                "Primary LLM provider failed, serving degraded from fallback"
            );
            match self.attempt(fallback, request, &mut lifecycle).await {
                Ok(mut response) => {
                    response.degraded = true;
                    return (Ok(response), lifecycle);
                }
                Err(e) => failures.push(format!("{}: {}", fallback, e)),
            }
        }

        tracing::error!(failures = ?failures, "All LLM providers failed");
        (Err(Error::ProviderExhausted(failures)), lifecycle)
    }

    async fn attempt(
        &self,
        kind: ProviderKind,
        request: &LlmRequest,
        lifecycle: &mut RequestLifecycle,
    ) -> Result<LlmResponse> {
        let provider = self
            .provider(kind)
            .ok_or_else(|| Error::Config(format!("LLM provider {} is not configured", kind)))?;

        let started = Instant::now();
        let timeout = self.timeout;
        let record = &mut *lifecycle;
        let attempted = self
            .retry
            .run_counted(kind.name(), move |attempt| {
                if attempt > 0 {
                    record.advance(kind, RequestState::Retrying, attempt);
                }
                record.advance(kind, RequestState::Dispatched, attempt + 1);
                let provider: &LlmProvider = provider;
                let request: &LlmRequest = request;
                retry::with_timeout(timeout, kind.name(), provider.complete(request))
            })
            .await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match attempted.outcome {
            Ok(completion) => {
                lifecycle.advance(kind, RequestState::Success, attempted.attempts);
                let structured = extract_structured(&completion.text);
                tracing::info!(
                    provider = %kind,
                    model = %completion.model,
                    attempts = attempted.attempts,
                    latency_ms,
                    structured = structured.is_some(),
                    "LLM request succeeded"
                );
                Ok(LlmResponse {
                    text: completion.text,
                    structured,
                    provider: kind,
                    model: completion.model,
                    latency_ms,
                    attempts: attempted.attempts,
                    degraded: false,
                })
            }
            Err(e) => {
                lifecycle.advance(kind, RequestState::Failed, attempted.attempts);
                tracing::warn!(
                    provider = %kind,
                    model = provider.model(),
                    attempts = attempted.attempts,
                    retryable = e.is_retryable(),
                    error = %e,
                    "LLM provider failed"
                );
                Err(e)
            }
        }
    }
}
