//! Multi-hop fund flow tracing
//!
//! Breadth-first walk outward from an origin address. Each level's
//! addresses are fetched concurrently (bounded) and the level completes
//! before the next begins, so hop distances are exact. Failures are kept
//! to the branch that hit them: the node is marked `partial` and the walk
//! goes on.

mod attribution;

use crate::assets::AssetRegistry;
use crate::chain::{BlockchainApi, Page};
use crate::config::TraceConfig;
use crate::normalize::{normalize_transaction_page, AssetAmount};
use crate::retry::{self, RetryPolicy};
use crate::Result;
use attribution::attribute;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;

/// Deepest trace the engine will run
pub const MAX_HOPS: u8 = 5;

/// Knobs for one trace
#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// Levels to expand; clamped to [`MAX_HOPS`]
    pub hop_limit: u8,
    /// Non-origin addresses with more transactions are not expanded
    pub fan_out_ceiling: u64,
    /// Concurrent fetches per level
    pub concurrency: usize,
    pub page_limit: u32,
    /// Timeout for a single fetch
    pub call_timeout: Duration,
    /// Give up and return what was gathered at this instant
    pub deadline: Option<Instant>,
    pub retry: RetryPolicy,
}

impl TraceOptions {
    pub fn new(hop_limit: u8) -> Self {
        Self::from_config(&TraceConfig::default(), hop_limit)
    }

    pub fn from_config(config: &TraceConfig, hop_limit: u8) -> Self {
        Self {
            hop_limit,
            fan_out_ceiling: config.fan_out_ceiling,
            concurrency: config.concurrency.max(1),
            page_limit: config.page_limit,
            call_timeout: Duration::from_secs(15),
            deadline: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// An address reached by the trace
#[derive(Debug, Clone, Serialize)]
pub struct TraceNode {
    pub address: String,
    /// Distance from the origin (0 = origin)
    pub hop: u8,
    /// Value received from other traced addresses, per asset
    pub inflow: BTreeMap<String, AssetAmount>,
    /// Value sent to other traced addresses, per asset
    pub outflow: BTreeMap<String, AssetAmount>,
    /// Counterparties found when this address was expanded
    pub next_hops: BTreeSet<String>,
    /// Transaction count reported by the chain, when fetched
    pub tx_total: Option<u64>,
    /// Too busy to expand (exchange, pool, mixer)
    pub aggregator: bool,
    /// Fetch failed or was cut off
    pub partial: bool,
    pub expanded: bool,
}

impl TraceNode {
    fn new(address: &str, hop: u8) -> Self {
        Self {
            address: address.to_string(),
            hop,
            inflow: BTreeMap::new(),
            outflow: BTreeMap::new(),
            next_hops: BTreeSet::new(),
            tx_total: None,
            aggregator: false,
            partial: false,
            expanded: false,
        }
    }
}

/// Aggregated flow between two addresses in one asset
#[derive(Debug, Clone, Serialize)]
pub struct TraceEdge {
    pub from: String,
    pub to: String,
    pub amount: AssetAmount,
    /// Level at which the flow was discovered (1 = origin's direct counterparties)
    pub hop: u8,
    /// Contributing transactions
    pub transactions: Vec<String>,
}

/// Trace output
#[derive(Debug, Clone, Serialize)]
pub struct TraceReport {
    pub origin: String,
    pub hop_limit: u8,
    /// Visited addresses in discovery order
    pub nodes: Vec<TraceNode>,
    pub edges: Vec<TraceEdge>,
    /// Some branch is missing data
    pub partial: bool,
    /// Addresses whose data is missing, with the reason
    pub incomplete: Vec<String>,
    /// Addresses expanded
    pub expansions: usize,
    pub deadline_exceeded: bool,
}

impl TraceReport {
    pub fn node(&self, address: &str) -> Option<&TraceNode> {
        self.nodes.iter().find(|n| n.address == address)
    }

    pub fn aggregators(&self) -> impl Iterator<Item = &TraceNode> {
        self.nodes.iter().filter(|n| n.aggregator)
    }

    /// Edges ordered by amount within each asset, largest first
    pub fn largest_edges(&self, limit: usize) -> Vec<&TraceEdge> {
        let mut edges: Vec<&TraceEdge> = self.edges.iter().collect();
        edges.sort_by(|a, b| {
            a.amount
                .asset_id
                .cmp(&b.amount.asset_id)
                .then_with(|| b.amount.raw.cmp(&a.amount.raw))
        });
        edges.truncate(limit);
        edges
    }

    /// Assets moved along any edge
    pub fn asset_ids(&self) -> BTreeSet<&str> {
        self.edges.iter().map(|e| e.amount.asset_id.as_str()).collect()
    }

    /// Re-apply metadata learned after the walk finished
    pub fn resolve(&mut self, registry: &AssetRegistry) {
        for edge in &mut self.edges {
            edge.amount = registry.amount(&edge.amount.asset_id, edge.amount.raw);
        }
        for node in &mut self.nodes {
            for amount in node.inflow.values_mut().chain(node.outflow.values_mut()) {
                *amount = registry.amount(&amount.asset_id, amount.raw);
            }
        }
    }
}

/// Visited addresses, indexed by address
struct Arena {
    nodes: Vec<TraceNode>,
    index: HashMap<String, usize>,
}

impl Arena {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Insert if unseen; returns whether it was new
    fn visit(&mut self, address: &str, hop: u8) -> bool {
        if self.index.contains_key(address) {
            return false;
        }
        self.index.insert(address.to_string(), self.nodes.len());
        self.nodes.push(TraceNode::new(address, hop));
        true
    }

    fn get_mut(&mut self, address: &str) -> Option<&mut TraceNode> {
        let i = *self.index.get(address)?;
        self.nodes.get_mut(i)
    }
}

/// Mutable trace state
struct Walk<'r> {
    arena: Arena,
    edges: Vec<TraceEdge>,
    edge_index: HashMap<(String, String, String), usize>,
    seen: HashSet<(String, String, String)>,
    incomplete: Vec<String>,
    expansions: usize,
    deadline_exceeded: bool,
    registry: &'r mut AssetRegistry,
}

impl Walk<'_> {
    fn mark_partial(&mut self, address: &str, reason: String) {
        if let Some(node) = self.arena.get_mut(address) {
            node.partial = true;
        }
        self.incomplete.push(format!("{}: {}", address, reason));
    }

    /// Record flows of one fetched page; returns newly discovered addresses.
    fn expand(&mut self, address: &str, hop: u8, raw: &Value, ceiling: u64) -> Vec<String> {
        let page = match normalize_transaction_page(raw, self.registry) {
            Ok(page) => page,
            Err(e) => {
                tracing::warn!(address, error = %e, "Unreadable transaction page");
                self.mark_partial(address, e.to_string());
                return Vec::new();
            }
        };

        let Some(node) = self.arena.get_mut(address) else {
            return Vec::new();
        };
        node.tx_total = Some(page.total);
        if hop > 0 && page.total > ceiling {
            node.aggregator = true;
            tracing::info!(address, tx_total = page.total, ceiling, "Aggregator address, not expanding");
            return Vec::new();
        }
        node.expanded = true;
        self.expansions += 1;

        let mut discovered = Vec::new();
        for tx in &page.items {
            for flow in attribute(tx, address) {
                if !self.seen.insert((tx.id.clone(), flow.from.clone(), flow.to.clone())) {
                    continue;
                }
                let counterparty = if flow.from == address {
                    flow.to.clone()
                } else {
                    flow.from.clone()
                };
                for (asset, raw) in &flow.amounts {
                    self.add_edge(&flow.from, &flow.to, asset, *raw, hop + 1, &tx.id);
                }
                if let Some(node) = self.arena.get_mut(address) {
                    node.next_hops.insert(counterparty.clone());
                }
                if self.arena.visit(&counterparty, hop + 1) {
                    discovered.push(counterparty);
                }
            }
        }
        discovered
    }

    fn add_edge(&mut self, from: &str, to: &str, asset: &str, raw: u128, hop: u8, tx_id: &str) {
        let key = (from.to_string(), to.to_string(), asset.to_string());
        match self.edge_index.get(&key) {
            Some(&i) => {
                let edge = &mut self.edges[i];
                edge.amount.raw = edge.amount.raw.saturating_add(raw);
                edge.transactions.push(tx_id.to_string());
            }
            None => {
                self.edge_index.insert(key, self.edges.len());
                self.edges.push(TraceEdge {
                    from: from.to_string(),
                    to: to.to_string(),
                    amount: self.registry.amount(asset, raw),
                    hop,
                    transactions: vec![tx_id.to_string()],
                });
            }
        }
    }

    fn finish(mut self, origin: &str, hop_limit: u8) -> TraceReport {
        // Token metadata may have been learned after an edge was created
        for edge in &mut self.edges {
            edge.amount = self.registry.amount(&edge.amount.asset_id, edge.amount.raw);
        }
        for edge in &self.edges {
            if let Some(node) = self.arena.get_mut(&edge.from) {
                accumulate(&mut node.outflow, &edge.amount);
            }
            if let Some(node) = self.arena.get_mut(&edge.to) {
                accumulate(&mut node.inflow, &edge.amount);
            }
        }

        TraceReport {
            origin: origin.to_string(),
            hop_limit,
            partial: !self.incomplete.is_empty(),
            nodes: self.arena.nodes,
            edges: self.edges,
            incomplete: self.incomplete,
            expansions: self.expansions,
            deadline_exceeded: self.deadline_exceeded,
        }
    }
}

fn accumulate(totals: &mut BTreeMap<String, AssetAmount>, amount: &AssetAmount) {
    totals
        .entry(amount.asset_id.clone())
        .and_modify(|a| a.raw = a.raw.saturating_add(amount.raw))
        .or_insert_with(|| amount.clone());
}

/// Runs traces against a chain client
pub struct ForensicTracer<'a> {
    client: &'a dyn BlockchainApi,
    options: TraceOptions,
}

impl<'a> ForensicTracer<'a> {
    pub fn new(client: &'a dyn BlockchainApi, options: TraceOptions) -> Self {
        Self { client, options }
    }

    async fn fetch(&self, address: String) -> (String, Result<Value>) {
        let page = Page::first(self.options.page_limit);
        let timeout = self.options.call_timeout;
        let result = self
            .options
            .retry
            .run("trace fetch", |_| {
                retry::with_timeout(
                    timeout,
                    "address transactions",
                    self.client.get_address_transactions(&address, page),
                )
            })
            .await;
        (address, result)
    }

    /// Trace outward from `origin`.
    ///
    /// Never fails as a whole: missing data shows up as `partial` nodes and
    /// entries in `incomplete`.
    pub async fn trace(&self, origin: &str, registry: &mut AssetRegistry) -> TraceReport {
        let hop_limit = self.options.hop_limit.min(MAX_HOPS);
        if hop_limit < self.options.hop_limit {
            tracing::warn!(
                requested = self.options.hop_limit,
                max = MAX_HOPS,
                "Hop limit clamped"
            );
        }

        let mut walk = Walk {
            arena: Arena::new(),
            edges: Vec::new(),
            edge_index: HashMap::new(),
            seen: HashSet::new(),
            incomplete: Vec::new(),
            expansions: 0,
            deadline_exceeded: false,
            registry,
        };
        walk.arena.visit(origin, 0);
        let mut frontier = vec![origin.to_string()];

        for hop in 0..hop_limit {
            if frontier.is_empty() {
                break;
            }
            tracing::debug!(hop, frontier = frontier.len(), "Expanding trace level");

            let mut fetches = stream::iter(frontier.clone())
                .map(|address| self.fetch(address))
                .buffered(self.options.concurrency.max(1));

            let mut results = Vec::with_capacity(frontier.len());
            loop {
                let next = match self.options.deadline {
                    Some(deadline) => match tokio::time::timeout_at(deadline, fetches.next()).await {
                        Ok(next) => next,
                        Err(_) => {
                            walk.deadline_exceeded = true;
                            break;
                        }
                    },
                    None => fetches.next().await,
                };
                match next {
                    Some(result) => results.push(result),
                    None => break,
                }
            }
            drop(fetches);

            let mut next_frontier = Vec::new();
            for (address, result) in results.iter() {
                match result {
                    Ok(raw) => {
                        next_frontier.extend(walk.expand(address, hop, raw, self.options.fan_out_ceiling))
                    }
                    Err(e) => {
                        tracing::warn!(address = %address, hop, error = %e, "Trace branch failed");
                        walk.mark_partial(address, e.to_string());
                    }
                }
            }

            if walk.deadline_exceeded {
                for address in frontier.iter().skip(results.len()) {
                    walk.mark_partial(address, "deadline exceeded".to_string());
                }
                tracing::warn!(hop, gathered = walk.arena.nodes.len(), "Trace deadline reached, returning partial result");
                break;
            }
            frontier = next_frontier;
        }

        let report = walk.finish(origin, hop_limit);
        tracing::info!(
            origin,
            hop_limit,
            nodes = report.nodes.len(),
            edges = report.edges.len(),
            expansions = report.expansions,
            partial = report.partial,
            "Trace complete"
        );
        report
    }
}
