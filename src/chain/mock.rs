//! In-memory [`BlockchainApi`] for tests

use super::{BlockchainApi, Page};
use crate::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

/// Canned payloads keyed by operation.
///
/// Keys: `address:{a}`, `tx:{id}`, `txs:{a}`, `utxos:{a}`, `token:{id}`, `network`.
/// Unknown keys answer `NotFound`.
#[derive(Default)]
pub(crate) struct MockChain {
    payloads: HashMap<String, Value>,
    failures: Mutex<HashMap<String, VecDeque<fn() -> Error>>>,
    delays: HashMap<String, Duration>,
    calls: Mutex<Vec<String>>,
}

impl MockChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: &str, payload: Value) -> Self {
        self.payloads.insert(format!("address:{}", address), payload);
        self
    }

    pub fn with_transaction(mut self, tx_id: &str, payload: Value) -> Self {
        self.payloads.insert(format!("tx:{}", tx_id), payload);
        self
    }

    pub fn with_page(mut self, address: &str, payload: Value) -> Self {
        self.payloads.insert(format!("txs:{}", address), payload);
        self
    }

    pub fn with_utxos(mut self, address: &str, payload: Value) -> Self {
        self.payloads.insert(format!("utxos:{}", address), payload);
        self
    }

    pub fn with_token(mut self, token_id: &str, payload: Value) -> Self {
        self.payloads.insert(format!("token:{}", token_id), payload);
        self
    }

    pub fn with_network(mut self, payload: Value) -> Self {
        self.payloads.insert("network".to_string(), payload);
        self
    }

    /// Fail the next `times` calls for `key` before answering normally
    pub fn fail_next(self, key: &str, times: usize, make: fn() -> Error) -> Self {
        if let Ok(mut failures) = self.failures.lock() {
            let queue = failures.entry(key.to_string()).or_default();
            queue.extend(std::iter::repeat(make).take(times));
        }
        self
    }

    pub fn with_delay(mut self, key: &str, delay: Duration) -> Self {
        self.delays.insert(key.to_string(), delay);
        self
    }

    pub fn calls_for(&self, key: &str) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.iter().filter(|c| c.as_str() == key).count())
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or(0)
    }

    async fn answer(&self, key: String) -> Result<Value> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(key.clone());
        }
        if let Some(delay) = self.delays.get(&key) {
            tokio::time::sleep(*delay).await;
        }
        let failure = self
            .failures
            .lock()
            .ok()
            .and_then(|mut failures| failures.get_mut(&key).and_then(|q| q.pop_front()));
        if let Some(make) = failure {
            return Err(make());
        }
        self.payloads
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::NotFound(key))
    }
}

#[async_trait]
impl BlockchainApi for MockChain {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_address_info(&self, address: &str) -> Result<Value> {
        self.answer(format!("address:{}", address)).await
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<Value> {
        self.answer(format!("tx:{}", tx_id)).await
    }

    async fn get_address_transactions(&self, address: &str, _page: Page) -> Result<Value> {
        self.answer(format!("txs:{}", address)).await
    }

    async fn get_utxos(&self, address: &str) -> Result<Value> {
        self.answer(format!("utxos:{}", address)).await
    }

    async fn get_token_info(&self, token_id: &str) -> Result<Value> {
        self.answer(format!("token:{}", token_id)).await
    }

    async fn get_network_status(&self) -> Result<Value> {
        self.answer("network".to_string()).await
    }
}
