//! HTTP transport seam for LLM providers

use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// Status and raw body of an HTTP exchange
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: u16,
    pub body: String,
}

impl HttpReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Posts JSON and returns the raw reply.
///
/// Non-2xx statuses are returned as replies, not errors; mapping them is
/// the provider's job.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply>;
}

/// Production transport backed by reqwest
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&'static str, String)],
        body: &Value,
        timeout: Duration,
    ) -> Result<HttpReply> {
        let mut builder = self.client.post(url).timeout(timeout).json(body);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }

        let response = builder.send().await.map_err(Error::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Error::from_reqwest)?;
        Ok(HttpReply { status, body })
    }
}
