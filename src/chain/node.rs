//! Direct node REST API backend

use super::http::{Auth, JsonGetter};
use super::{BlockchainApi, Page};
use crate::config::ChainCredentials;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Client for a node's REST API.
///
/// Supports a bearer token, HTTP basic auth, or both.
pub struct NodeClient {
    http: JsonGetter,
}

impl NodeClient {
    pub fn new(base_url: &str, timeout: Duration, credentials: ChainCredentials) -> Result<Self> {
        let mut http = JsonGetter::new("node", base_url, timeout)?;
        if let Some(token) = credentials.api_key {
            http = http.with_auth(Auth::Bearer(token));
        }
        if let Some(username) = credentials.username {
            http = http.with_auth(Auth::Basic {
                username,
                password: credentials.password,
            });
        }
        tracing::debug!(base_url = %http.base(), "Node client ready");
        Ok(Self { http })
    }
}

#[async_trait]
impl BlockchainApi for NodeClient {
    fn name(&self) -> &'static str {
        "node"
    }

    async fn get_address_info(&self, address: &str) -> Result<Value> {
        let mut info = self
            .http
            .get_json(&format!("addresses/{}", address), &[])
            .await?;
        // Some node builds omit the address from their own reply
        if let Some(obj) = info.as_object_mut() {
            obj.entry("address")
                .or_insert_with(|| Value::String(address.to_string()));
        }
        Ok(info)
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
            .get_json(&format!("addresses/{}/utxos", address), &[])
            .await
    }

    async fn get_token_info(&self, token_id: &str) -> Result<Value> {
        self.http
            .get_json(&format!("blockchain/token/byId/{}", token_id), &[])
            .await
    }

    async fn get_network_status(&self) -> Result<Value> {
        self.http.get_json("info", &[]).await
    }
}
