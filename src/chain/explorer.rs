//! Explorer REST API backend

use super::http::{Auth, JsonGetter};
use super::{BlockchainApi, Page};
use crate::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::{json, Value};
use std::time::Duration;

/// Client for the public explorer API (`/api/v1`)
pub struct ExplorerClient {
    http: JsonGetter,
}

impl ExplorerClient {
    pub fn new(base_url: &str, timeout: Duration, api_key: Option<SecretString>) -> Result<Self> {
        let http = JsonGetter::new("explorer", base_url, timeout)?
            .with_auth(api_key.map_or(Auth::None, |key| Auth::Header("api_key", key)));
        tracing::debug!(base_url = %http.base(), "Explorer client ready");
        Ok(Self { http })
    }
}

#[async_trait]
impl BlockchainApi for ExplorerClient {
    fn name(&self) -> &'static str {
        "explorer"
    }

    /// Balance plus the transaction total and newest activity, in one object
    async fn get_address_info(&self, address: &str) -> Result<Value> {
        let balance_path = format!("addresses/{}/balance/total", address);
        let history_path = format!("addresses/{}/transactions", address);
        let history_query = [("offset", "0".to_string()), ("limit", "1".to_string())];

        let (balance, history) = futures::try_join!(
            self.http.get_json(&balance_path, &[]),
            self.http.get_json(&history_path, &history_query),
        )?;

        let last_seen = history
            .get("items")
            .and_then(|items| items.get(0))
            .and_then(|tx| tx.get("timestamp"))
            .cloned()
            .unwrap_or(Value::Null);

        Ok(json!({
            "address": address,
            "balance": balance,
            "transactionsCount": history.get("total").cloned().unwrap_or(json!(0)),
            "lastSeen": last_seen,
        }))
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<Value> {
        self.http
            .get_json(&format!("transactions/{}", tx_id), &[])
            .await
    }

    async fn get_address_transactions(&self, address: &str, page: Page) -> Result<Value> {
        self.http
            .get_json(
                &format!("addresses/{}/transactions", address),
                &page.query(),
            )
            .await
    }

    async fn get_utxos(&self, address: &str) -> Result<Value> {
        self.http
            .get_json(&format!("boxes/unspent/byAddress/{}", address), &[])
            .await
    }

    async fn get_token_info(&self, token_id: &str) -> Result<Value> {
        self.http
            .get_json(&format!("tokens/{}", token_id), &[])
            .await
    }

    async fn get_network_status(&self) -> Result<Value> {
        let (info, state) = futures::try_join!(
            self.http.get_json("info", &[]),
            self.http.get_json("networkState", &[]),
        )?;
        Ok(json!({ "info": info, "networkState": state }))
    }
}
