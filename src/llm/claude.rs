//! Anthropic Claude messages API client

use super::transport::HttpTransport;
use super::{Completion, LlmRequest};
use crate::config::ClaudeConfig;
use crate::context::{Role, Turn};
use crate::{Error, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct ClaudeClient {
    config: ClaudeConfig,
    api_key: Option<SecretString>,
    temperature: f32,
    timeout: Duration,
    transport: Arc<dyn HttpTransport>,
}

impl ClaudeClient {
    pub fn new(
        config: ClaudeConfig,
        api_key: Option<SecretString>,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            config,
            api_key,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
            transport,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "max_tokens": request.options.max_tokens.unwrap_or(self.config.max_tokens),
            "temperature": request.options.temperature.unwrap_or(self.temperature),
            "messages": messages(&request.context, &request.prompt),
        });
        if let Some(system) = &request.options.system {
            body["system"] = json!(system);
        }
        body
    }

    pub async fn complete(&self, request: &LlmRequest) -> Result<Completion> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or_else(|| Error::Config("ANTHROPIC_API_KEY is not set".to_string()))?;

        let headers = [
            ("x-api-key", api_key.expose_secret().to_string()),
            ("anthropic-version", self.config.api_version.clone()),
        ];
        let reply = self
            .transport
            .post_json(&self.endpoint(), &headers, &self.build_body(request), self.timeout)
            .await?;

        if !reply.is_success() {
            return Err(Error::from_status(reply.status, "claude", &reply.body));
        }

        let envelope: Value = serde_json::from_str(&reply.body)
            .map_err(|e| Error::Malformed(format!("claude response: {}", e)))?;
        let text = extract_text(&envelope)?;
        let model = envelope
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.config.model)
            .to_string();

        tracing::debug!(
            model = %model,
            stop_reason = envelope.get("stop_reason").and_then(|s| s.as_str()).unwrap_or("unknown"),
            "Claude completion received"
        );
        Ok(Completion { text, model })
    }
}

/// The messages API wants strictly alternating roles starting with the
/// user, so consecutive turns of one role are merged and leading assistant
/// turns are dropped.
fn messages(history: &[Turn], prompt: &str) -> Vec<Value> {
    let mut merged: Vec<(Role, String)> = Vec::new();
    let turns = history
        .iter()
        .map(|t| (t.role, t.text.as_str()))
        .chain(std::iter::once((Role::User, prompt)));

    for (role, text) in turns {
        if merged.is_empty() && role == Role::Assistant {
            continue;
        }
        match merged.last_mut() {
            Some((last, buf)) if *last == role => {
                buf.push_str("\n\n");
                buf.push_str(text);
            }
            _ => merged.push((role, text.to_string())),
        }
    }

    merged
        .into_iter()
        .map(|(role, content)| json!({ "role": role.name(), "content": content }))
        .collect()
}

fn extract_text(envelope: &Value) -> Result<String> {
    let content = envelope
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| Error::Malformed("claude response has no content array".to_string()))?;

    let text: Vec<&str> = content
        .iter()
        .filter(|block| block.get("type").and_then(|t| t.as_str()) == Some("text"))
        .filter_map(|block| block.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(Error::Malformed(
            "claude response has no text blocks".to_string(),
        ));
    }
    Ok(text.join(""))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::transport::HttpReply;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Recording {
        reply: HttpReply,
        seen: Mutex<Vec<(String, Vec<(&'static str, String)>, Value)>>,
    }

    #[async_trait]
    impl HttpTransport for Recording {
        async fn post_json(
            &self,
            url: &str,
            headers: &[(&'static str, String)],
            body: &Value,
            _timeout: Duration,
        ) -> Result<HttpReply> {
            self.seen
                .lock()
                .unwrap()
                .push((url.to_string(), headers.to_vec(), body.clone()));
            Ok(self.reply.clone())
        }
    }

    fn claude_with(reply: HttpReply) -> (ClaudeClient, Arc<Recording>) {
        let transport = Arc::new(Recording {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        let client = ClaudeClient::new(
            ClaudeConfig::default(),
            Some(SecretString::from("sk-test")),
            transport.clone(),
        );
        (client, transport)
    }

    #[tokio::test]
    async fn test_request_shape_and_text() {
        let (client, transport) = claude_with(HttpReply {
            status: 200,
            body: json!({
                "model": "claude-3-sonnet-20240229",
                "content": [{"type": "text", "text": "Balance is 2 ERG"}],
                "stop_reason": "end_turn"
            })
            .to_string(),
        });
        let request = LlmRequest::new("How much?").with_system("You analyze wallets");
        let completion = client.complete(&request).await.unwrap();
        assert_eq!(completion.text, "Balance is 2 ERG");

        let seen = transport.seen.lock().unwrap();
        let (url, headers, body) = &seen[0];
        assert_eq!(url, "https://api.anthropic.com/v1/messages");
        assert!(headers.iter().any(|(k, v)| *k == "x-api-key" && v == "sk-test"));
        assert!(headers.iter().any(|(k, _)| *k == "anthropic-version"));
        assert_eq!(body["system"], "You analyze wallets");
        assert_eq!(body["messages"][0]["content"], "How much?");
    }

    #[tokio::test]
    async fn test_missing_key_is_config_error() {
        let transport = Arc::new(Recording {
            reply: HttpReply { status: 200, body: String::new() },
            seen: Mutex::new(Vec::new()),
        });
        let client = ClaudeClient::new(ClaudeConfig::default(), None, transport.clone());
        let err = client.complete(&LlmRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_status_and_bad_envelope() {
        let (client, _) = claude_with(HttpReply {
            status: 529,
            body: "overloaded".to_string(),
        });
        let err = client.complete(&LlmRequest::new("hi")).await.unwrap_err();
        assert!(err.is_retryable());

        let (client, _) = claude_with(HttpReply {
            status: 200,
            body: "<html>".to_string(),
        });
        let err = client.complete(&LlmRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn test_messages_alternate() {
        let history = vec![
            Turn::new(Role::Assistant, "Hello"),
            Turn::new(Role::User, "first"),
            Turn::new(Role::User, "second"),
            Turn::new(Role::Assistant, "answer"),
            Turn::new(Role::User, "follow-up"),
        ];
        let msgs = messages(&history, "question");
        let roles: Vec<&str> = msgs.iter().map(|m| m["role"].as_str().unwrap()).collect();
        assert_eq!(roles, vec!["user", "assistant", "user"]);
        assert_eq!(msgs[0]["content"], "first\n\nsecond");
        assert_eq!(msgs[2]["content"], "follow-up\n\nquestion");
    }
}
