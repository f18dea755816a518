//! Analysis orchestration
//!
//! Runs one request end to end: fetch chain data, normalize it, trace when
//! asked, assemble a budgeted context and hand it to the LLM dispatcher.

use crate::assets::AssetRegistry;
use crate::chain::{build_client, BlockchainApi, Page};
use crate::config::{Config, Credentials};
use crate::context::{ContextBuilder, FactCategory, Turn};
use crate::forensic::{ForensicTracer, TraceOptions, TraceReport, MAX_HOPS};
use crate::llm::{LlmDispatcher, LlmOptions, LlmRequest, ProviderKind, ReqwestTransport};
use crate::normalize::{
    net_flow, normalize_address, normalize_token_info, normalize_transaction,
    normalize_transaction_page, validate_address, validate_tx_id, Transaction, WalletFlows,
};
use crate::retry::with_timeout;
use crate::{Error, Result};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

const WALLET_PROMPT: &str = "You are a blockchain analyst for the Ergo network. \
Explain wallet balances and activity from the facts given, and say when the data is incomplete.";
const TRANSACTION_PROMPT: &str = "You are a blockchain transaction analyst for the Ergo network. \
Describe what the transaction did, who took part and anything unusual about it.";
const NETWORK_PROMPT: &str = "You are a blockchain network analyst. \
Describe the current state of the network from the facts given.";
const FORENSIC_PROMPT: &str = "You are a blockchain forensic analyst. \
Identify relationships and patterns in the traced fund flows. Only state what the facts support.";

/// Counterparties and transactions listed per wallet
const WALLET_DETAIL_LIMIT: usize = 10;
/// Trace edges listed in a forensic context
const EDGE_DETAIL_LIMIT: usize = 25;
/// Scalar fields listed from a network status payload
const NETWORK_FIELD_LIMIT: usize = 40;
/// Token metadata lookups per request
const TOKEN_LOOKUP_LIMIT: usize = 20;

/// What to analyze
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Subject {
    Wallet(String),
    Transaction(String),
    Network,
    Forensic { address: String, depth: u8 },
}

impl Subject {
    pub fn kind(&self) -> &'static str {
        match self {
            Subject::Wallet(_) => "wallet",
            Subject::Transaction(_) => "transaction",
            Subject::Network => "network",
            Subject::Forensic { .. } => "forensic",
        }
    }

    /// Reject subjects that cannot be valid chain identifiers
    pub fn validate(&self) -> Result<()> {
        match self {
            Subject::Wallet(address) => validate_address(address),
            Subject::Transaction(id) => validate_tx_id(id),
            Subject::Network => Ok(()),
            Subject::Forensic { address, depth } => {
                if *depth > MAX_HOPS {
                    return Err(Error::InvalidArgument(format!(
                        "trace depth must be at most {}, got {}",
                        MAX_HOPS, depth
                    )));
                }
                validate_address(address)
            }
        }
    }

    fn system_prompt(&self) -> &'static str {
        match self {
            Subject::Wallet(_) => WALLET_PROMPT,
            Subject::Transaction(_) => TRANSACTION_PROMPT,
            Subject::Network => NETWORK_PROMPT,
            Subject::Forensic { .. } => FORENSIC_PROMPT,
        }
    }

    fn default_question(&self) -> &'static str {
        match self {
            Subject::Wallet(_) => "Summarize this wallet's holdings and recent activity.",
            Subject::Transaction(_) => "Explain what this transaction did.",
            Subject::Network => "Summarize the current network status.",
            Subject::Forensic { .. } => {
                "Describe where funds flowed from this address and flag anything suspicious."
            }
        }
    }
}

/// One analysis request
#[derive(Debug, Clone)]
pub struct AnalysisRequest {
    pub subject: Subject,
    pub question: Option<String>,
    pub provider: ProviderKind,
    /// Earlier turns of the conversation, oldest first
    pub history: Vec<Turn>,
}

impl AnalysisRequest {
    pub fn new(subject: Subject, provider: ProviderKind) -> Self {
        Self {
            subject,
            question: None,
            provider,
            history: Vec::new(),
        }
    }

    pub fn with_question(mut self, question: impl Into<String>) -> Self {
        self.question = Some(question.into());
        self
    }

    pub fn with_history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self
    }
}

/// What the caller gets back
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisOutcome {
    pub request_id: String,
    pub subject: String,
    /// LLM answer text
    pub result: String,
    /// JSON object found in the answer, if any
    pub structured: Option<Value>,
    pub provider_used: ProviderKind,
    pub model: String,
    /// Served by the fallback provider
    pub degraded: bool,
    pub attempts: u32,
    pub latency_ms: u64,
    /// Some chain data could not be fetched
    pub partial: bool,
    pub incomplete: Vec<String>,
    /// Context truncation notes
    pub warnings: Vec<String>,
}

/// Facts gathered for one subject
struct Gathered {
    builder: ContextBuilder,
    incomplete: Vec<String>,
}

impl Gathered {
    fn new(budget: usize) -> Self {
        Self {
            builder: ContextBuilder::new(budget),
            incomplete: Vec::new(),
        }
    }
}

/// Orchestrates chain access, tracing, context assembly and LLM dispatch
pub struct Analyzer {
    client: Arc<dyn BlockchainApi>,
    dispatcher: LlmDispatcher,
    config: Config,
}

impl Analyzer {
    pub fn new(client: Arc<dyn BlockchainApi>, dispatcher: LlmDispatcher, config: Config) -> Self {
        Self {
            client,
            dispatcher,
            config,
        }
    }

    /// Production wiring: configured backend and both providers over reqwest
    pub fn from_config(config: Config, credentials: Credentials) -> Result<Self> {
        let client = build_client(&config.chain, credentials.chain)?;
        let dispatcher = LlmDispatcher::from_config(
            &config.llm,
            credentials.anthropic_api_key,
            Arc::new(ReqwestTransport::new()),
        );
        tracing::info!(
            backend = client.name(),
            provider = %config.llm.provider,
            fallback = ?config.llm.fallback,
            "Analyzer ready"
        );
        Ok(Self::new(client, dispatcher, config))
    }

    pub fn client(&self) -> &Arc<dyn BlockchainApi> {
        &self.client
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one request under the configured request deadline
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<AnalysisOutcome> {
        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!(
            "analysis",
            request_id = %request_id,
            subject = request.subject.kind(),
            provider = %request.provider
        );
        let deadline = self.request_deadline();

        async move {
            request.subject.validate()?;
            tracing::info!("Analysis started");

            let gathered = self.gather(&request.subject, self.data_deadline(deadline)).await?;
            let Gathered {
                mut builder,
                incomplete,
            } = gathered;
            builder
                .set_question(
                    request
                        .question
                        .as_deref()
                        .unwrap_or_else(|| request.subject.default_question()),
                )
                .add_turns(request.history.iter().cloned());

            let context = builder.build();
            tracing::debug!(
                budget = builder.budget(),
                rendered = context.rendered.len(),
                "Context assembled"
            );
            let warnings: Vec<String> = context.warnings.iter().map(|w| w.to_string()).collect();
            for warning in &warnings {
                tracing::warn!(warning = %warning, "Context truncated");
            }

            let llm_request = LlmRequest::from_context(
                &context,
                LlmOptions {
                    system: Some(request.subject.system_prompt().to_string()),
                    ..LlmOptions::default()
                },
            );
            let response = tokio::time::timeout_at(
                deadline,
                self.dispatcher.query(request.provider, &llm_request),
            )
            .await
            .map_err(|_| Error::Transport("request deadline exceeded".to_string()))??;

            let partial = !incomplete.is_empty();
            tracing::info!(
                provider_used = %response.provider,
                degraded = response.degraded,
                partial,
                "Analysis complete"
            );
            Ok(AnalysisOutcome {
                request_id,
                subject: request.subject.kind().to_string(),
                result: response.text,
                structured: response.structured,
                provider_used: response.provider,
                model: response.model,
                degraded: response.degraded,
                attempts: response.attempts,
                latency_ms: response.latency_ms,
                partial,
                incomplete,
                warnings,
            })
        }
        .instrument(span)
        .await
    }

    /// Run a forensic trace without involving an LLM
    pub async fn trace(&self, address: &str, depth: u8) -> Result<TraceReport> {
        Subject::Forensic {
            address: address.to_string(),
            depth,
        }
        .validate()?;
        let deadline = self.request_deadline();
        let mut registry = AssetRegistry::new();
        Ok(self.run_trace(address, depth, deadline, &mut registry).await)
    }

    /// Configured request timeout from now; an unrepresentable instant becomes a day
    fn request_deadline(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.request_timeout())
            .unwrap_or_else(|| now + Duration::from_secs(24 * 60 * 60))
    }

    /// Time left for chain work, keeping one LLM timeout in reserve
    fn data_deadline(&self, deadline: Instant) -> Instant {
        let total = deadline.saturating_duration_since(Instant::now());
        let reserve = self.config.llm.timeout().min(total / 2);
        deadline - reserve
    }

    async fn run_trace(
        &self,
        address: &str,
        depth: u8,
        deadline: Instant,
        registry: &mut AssetRegistry,
    ) -> TraceReport {
        let options = TraceOptions::from_config(&self.config.trace, depth)
            .with_call_timeout(self.config.chain.timeout())
            .with_retry(self.config.chain.retry.clone())
            .with_deadline(deadline);
        ForensicTracer::new(self.client.as_ref(), options)
            .trace(address, registry)
            .await
    }

    /// Retried, timed chain call that must finish before `deadline`
    async fn fetch<F, Fut>(&self, label: &str, deadline: Instant, mut op: F) -> Result<Value>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let timeout = self.config.chain.timeout();
        let retried = self
            .config
            .chain
            .retry
            .run(label, |_| with_timeout(timeout, label, op()));
        tokio::time::timeout_at(deadline, retried)
            .await
            .map_err(|_| Error::Transport(format!("{}: request deadline exceeded", label)))?
    }

    async fn gather(&self, subject: &Subject, deadline: Instant) -> Result<Gathered> {
        let mut gathered = Gathered::new(self.config.context.budget_chars);
        let mut registry = AssetRegistry::new();
        match subject {
            Subject::Wallet(address) => {
                self.gather_wallet(address, deadline, &mut registry, &mut gathered)
                    .await?
            }
            Subject::Transaction(id) => {
                self.gather_transaction(id, deadline, &mut registry, &mut gathered)
                    .await?
            }
            Subject::Network => self.gather_network(deadline, &mut gathered).await?,
            Subject::Forensic { address, depth } => {
                let mut report = self.run_trace(address, *depth, deadline, &mut registry).await;
                let assets: Vec<String> = report.asset_ids().into_iter().map(String::from).collect();
                self.learn_tokens(assets, deadline, &mut registry).await;
                report.resolve(&registry);
                forensic_facts(&report, &mut gathered);
            }
        }
        Ok(gathered)
    }

    async fn gather_wallet(
        &self,
        address: &str,
        deadline: Instant,
        registry: &mut AssetRegistry,
        gathered: &mut Gathered,
    ) -> Result<()> {
        let page = Page::first(self.config.chain.page_limit);
        let (info, history, utxos) = tokio::join!(
            self.fetch("address info", deadline, || self.client.get_address_info(address)),
            self.fetch("address transactions", deadline, || self
                .client
                .get_address_transactions(address, page)),
            self.fetch("unspent boxes", deadline, || self.client.get_utxos(address)),
        );

        let mut snapshot = normalize_address(&info?, registry)?;
        let history = history.and_then(|raw| normalize_transaction_page(&raw, registry));

        let mut assets: BTreeSet<String> = snapshot.balances.keys().cloned().collect();
        if let Ok(page) = &history {
            for tx in &page.items {
                assets.extend(asset_ids(tx));
            }
        }
        self.learn_tokens(assets, deadline, registry).await;
        snapshot.resolve(registry);

        let builder = &mut gathered.builder;
        builder
            .add_fact(FactCategory::Summary, "Address", snapshot.address.as_str())
            .add_fact(FactCategory::Summary, "Transactions", snapshot.tx_count);
        if let Some(balance) = snapshot.native_balance() {
            builder.add_fact(FactCategory::Summary, "Balance", balance.clone());
        }
        if let Some(first) = snapshot.first_seen {
            builder.add_fact(FactCategory::Summary, "First seen", first.to_rfc3339());
        }
        if let Some(last) = snapshot.last_seen {
            builder.add_fact(FactCategory::Summary, "Last seen", last.to_rfc3339());
        }
        for token in snapshot.tokens() {
            builder.add_fact(FactCategory::Detail, "Token balance", token.clone());
        }

        match utxos {
            Ok(value) => {
                if let Some(count) = item_count(&value) {
                    gathered
                        .builder
                        .add_fact(FactCategory::Detail, "Unspent boxes", count);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Unspent boxes unavailable");
                gathered.incomplete.push(format!("utxos: {}", e));
            }
        }

        let transactions = match history {
            Ok(mut page) => {
                for tx in &mut page.items {
                    tx.resolve(registry);
                }
                page.items
            }
            Err(e) => {
                tracing::warn!(error = %e, "Transaction history unavailable");
                gathered.incomplete.push(format!("transactions: {}", e));
                return Ok(());
            }
        };

        let flows = WalletFlows::from_transactions(address, &transactions);
        let builder = &mut gathered.builder;
        builder
            .add_fact(FactCategory::Summary, "Recent transactions", flows.transactions as u64)
            .add_fact(FactCategory::Summary, "Sent in", flows.sent as u64)
            .add_fact(FactCategory::Summary, "Received only in", flows.received as u64);
        for (incoming, outgoing) in flows.amounts(registry) {
            let label = registry.symbol(&incoming.asset_id);
            builder
                .add_fact(FactCategory::Summary, format!("{} received", label), incoming)
                .add_fact(FactCategory::Summary, format!("{} sent", label), outgoing);
        }
        for (party, shared) in WalletFlows::top_counterparties(&transactions, address, WALLET_DETAIL_LIMIT) {
            builder.add_fact(
                FactCategory::Detail,
                format!("Counterparty {}", party),
                format!("{} shared transaction(s)", shared),
            );
        }
        for tx in transactions.iter().take(WALLET_DETAIL_LIMIT) {
            builder.add_fact(
                FactCategory::Detail,
                format!("Transaction {}", tx.id),
                describe_net_flow(tx, address, registry),
            );
        }
        Ok(())
    }

    async fn gather_transaction(
        &self,
        id: &str,
        deadline: Instant,
        registry: &mut AssetRegistry,
        gathered: &mut Gathered,
    ) -> Result<()> {
        let raw = self
            .fetch("transaction", deadline, || self.client.get_transaction(id))
            .await?;
        let mut tx = normalize_transaction(&raw, registry)?;
        self.learn_tokens(asset_ids(&tx), deadline, registry).await;
        tx.resolve(registry);

        let builder = &mut gathered.builder;
        builder
            .add_fact(FactCategory::Summary, "Transaction", tx.id.as_str())
            .add_fact(FactCategory::Summary, "Inputs", tx.inputs.len() as u64)
            .add_fact(FactCategory::Summary, "Outputs", tx.outputs.len() as u64)
            .add_fact(FactCategory::Summary, "Total in", registry.native(tx.native_in()))
            .add_fact(FactCategory::Summary, "Total out", registry.native(tx.native_out()))
            .add_fact(FactCategory::Summary, "Fee", tx.fee.clone());
        if let Some(height) = tx.height {
            builder.add_fact(FactCategory::Summary, "Height", height);
        }
        if let Some(timestamp) = tx.timestamp {
            builder.add_fact(FactCategory::Summary, "Time", timestamp.to_rfc3339());
        }
        if let Some(block) = &tx.block_id {
            builder.add_fact(FactCategory::Detail, "Block", block.as_str());
        }
        for input in &tx.inputs {
            builder.add_fact(
                FactCategory::Detail,
                format!("Input from {}", input.address),
                input.amount.clone(),
            );
        }
        for output in &tx.outputs {
            builder.add_fact(
                FactCategory::Detail,
                format!("Output to {}", output.address),
                output.amount.clone(),
            );
        }
        Ok(())
    }

    /// Fetch metadata for assets no payload gave decimals for.
    ///
    /// Best effort: an asset whose lookup fails stays in raw units.
    async fn learn_tokens(
        &self,
        asset_ids: impl IntoIterator<Item = String>,
        deadline: Instant,
        registry: &mut AssetRegistry,
    ) {
        let unknown: Vec<String> = asset_ids
            .into_iter()
            .filter(|id| registry.decimals(id).is_none())
            .take(TOKEN_LOOKUP_LIMIT)
            .collect();
        if unknown.is_empty() {
            return;
        }
        tracing::debug!(tokens = unknown.len(), "Looking up token metadata");

        let fetched: Vec<(String, Result<Value>)> = stream::iter(unknown)
            .map(|id| async move {
                let info = self
                    .fetch("token info", deadline, || self.client.get_token_info(&id))
                    .await;
                (id, info)
            })
            .buffer_unordered(self.config.trace.concurrency.max(1))
            .collect()
            .await;
        for (id, info) in fetched {
            match info.and_then(|value| normalize_token_info(&id, &value, registry)) {
                Ok(()) => tracing::debug!(
                    token_id = %id,
                    decimals = ?registry.decimals(&id),
                    "Token metadata learned"
                ),
                Err(e) => tracing::warn!(token_id = %id, error = %e, "Token metadata unavailable"),
            }
        }
    }

    async fn gather_network(&self, deadline: Instant, gathered: &mut Gathered) -> Result<()> {
        let raw = self
            .fetch("network status", deadline, || self.client.get_network_status())
            .await?;
        let builder = &mut gathered.builder;
        builder.add_fact(FactCategory::Summary, "Backend", self.client.name());
        for (label, keys) in [
            ("Height", &["fullHeight", "height", "bestFullHeight"][..]),
            ("Headers height", &["headersHeight", "bestHeaderHeight"][..]),
            ("Peers", &["peersCount", "peers"][..]),
            ("Difficulty", &["difficulty"][..]),
        ] {
            if let Some(value) = find_scalar(&raw, keys) {
                builder.add_fact(FactCategory::Summary, label, value);
            }
        }

        let mut fields = Vec::new();
        flatten_scalars(&raw, "", &mut fields);
        for (key, value) in fields.into_iter().take(NETWORK_FIELD_LIMIT) {
            builder.add_fact(FactCategory::Detail, key, value);
        }
        Ok(())
    }
}

fn forensic_facts(report: &TraceReport, gathered: &mut Gathered) {
    let builder = &mut gathered.builder;
    builder
        .add_fact(FactCategory::Summary, "Origin", report.origin.as_str())
        .add_fact(FactCategory::Summary, "Hops traced", report.hop_limit as u64)
        .add_fact(FactCategory::Summary, "Addresses reached", report.nodes.len() as u64)
        .add_fact(FactCategory::Summary, "Flows found", report.edges.len() as u64);
    let aggregators: Vec<&str> = report.aggregators().map(|n| n.address.as_str()).collect();
    if !aggregators.is_empty() {
        builder.add_fact(
            FactCategory::Summary,
            "High-activity addresses (not expanded)",
            aggregators.join(", "),
        );
    }
    if report.deadline_exceeded {
        builder.add_fact(FactCategory::Summary, "Note", "trace stopped at the request deadline");
    }
    if let Some(origin) = report.node(&report.origin) {
        for amount in origin.outflow.values() {
            builder.add_fact(FactCategory::Summary, "Origin sent", amount.clone());
        }
        for amount in origin.inflow.values() {
            builder.add_fact(FactCategory::Summary, "Origin received", amount.clone());
        }
    }
    for edge in report.largest_edges(EDGE_DETAIL_LIMIT) {
        builder.add_fact(
            FactCategory::Detail,
            format!("Hop {} {} -> {}", edge.hop, edge.from, edge.to),
            edge.amount.clone(),
        );
    }
    gathered.incomplete.extend(report.incomplete.iter().cloned());
}

/// Distinct assets moved by a transaction
fn asset_ids(tx: &Transaction) -> BTreeSet<String> {
    tx.inputs
        .iter()
        .chain(&tx.outputs)
        .map(|t| t.amount.asset_id.clone())
        .collect()
}

fn describe_net_flow(tx: &Transaction, address: &str, registry: &AssetRegistry) -> String {
    let parts: Vec<String> = net_flow(tx, address)
        .into_iter()
        .map(|(asset, delta)| {
            let sign = if delta < 0 { "-" } else { "+" };
            format!("{}{}", sign, registry.amount(&asset, delta.unsigned_abs()))
        })
        .collect();
    if parts.is_empty() {
        "no net change".to_string()
    } else {
        parts.join(", ")
    }
}

/// Entries in a list payload (`items`, bare array)
fn item_count(value: &Value) -> Option<u64> {
    match value {
        Value::Array(items) => Some(items.len() as u64),
        Value::Object(obj) => obj
            .get("total")
            .and_then(Value::as_u64)
            .or_else(|| obj.get("items").and_then(Value::as_array).map(|a| a.len() as u64)),
        _ => None,
    }
}

/// First scalar under any of `keys`, at the top level or one object down
fn find_scalar(value: &Value, keys: &[&str]) -> Option<String> {
    let obj = value.as_object()?;
    let direct = keys.iter().find_map(|k| obj.get(*k).and_then(scalar));
    direct.or_else(|| {
        obj.values()
            .filter(|v| v.is_object())
            .find_map(|nested| find_scalar(nested, keys))
    })
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn flatten_scalars(value: &Value, prefix: &str, out: &mut Vec<(String, String)>) {
    if let Value::Object(obj) = value {
        for (key, child) in obj {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", prefix, key)
            };
            match scalar(child) {
                Some(text) => out.push((path, text)),
                None => flatten_scalars(child, &path, out),
            }
        }
    }
}
