//! Local Ollama `/api/generate` client

use super::transport::HttpTransport;
use super::{Completion, LlmRequest};
use crate::config::OllamaConfig;
use crate::{Error, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct OllamaClient {
    config: OllamaConfig,
    temperature: f32,
    timeout: Duration,
    transport: Arc<dyn HttpTransport>,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            config,
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
        format!("{}/api/generate", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, request: &LlmRequest) -> Value {
        let mut body = json!({
            "model": self.config.model,
            "prompt": request.flattened_prompt(),
            "stream": false,
            "options": {
                "temperature": request.options.temperature.unwrap_or(self.temperature),
                "num_predict": request.options.max_tokens.unwrap_or(self.config.max_tokens),
            }
        });
        if let Some(system) = &request.options.system {
            body["system"] = json!(system);
        }
        body
    }

    pub async fn complete(&self, request: &LlmRequest) -> Result<Completion> {
        let reply = self
            .transport
            .post_json(&self.endpoint(), &[], &self.build_body(request), self.timeout)
            .await?;

        if !reply.is_success() {
            return Err(Error::from_status(reply.status, "ollama", &reply.body));
        }

        let envelope: Value = serde_json::from_str(&reply.body)
            .map_err(|e| Error::Malformed(format!("ollama response: {}", e)))?;
        if let Some(error) = envelope.get("error").and_then(|e| e.as_str()) {
            return Err(Error::Upstream {
                status: reply.status,
                message: format!("ollama: {}", error),
            });
        }
        let text = envelope
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| Error::Malformed("ollama response has no `response` field".to_string()))?
            .to_string();

        let model = envelope
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(&self.config.model)
            .to_string();

        tracing::debug!(
            model = %model,
            eval_count = envelope.get("eval_count").and_then(|c| c.as_u64()).unwrap_or(0),
            "Ollama completion received"
        );
        Ok(Completion { text, model })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Role, Turn};
    use crate::llm::transport::HttpReply;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Canned {
        reply: HttpReply,
        bodies: Mutex<Vec<(String, Value)>>,
    }

    #[async_trait]
    impl HttpTransport for Canned {
        async fn post_json(
            &self,
            url: &str,
            _headers: &[(&'static str, String)],
            body: &Value,
            _timeout: Duration,
        ) -> Result<HttpReply> {
            self.bodies
                .lock()
                .unwrap()
                .push((url.to_string(), body.clone()));
            Ok(self.reply.clone())
        }
    }

    fn canned(status: u16, body: Value) -> Arc<Canned> {
        Arc::new(Canned {
            reply: HttpReply {
                status,
                body: body.to_string(),
            },
            bodies: Mutex::new(Vec::new()),
        })
    }

    #[tokio::test]
    async fn test_generate_flattens_history() {
        let transport = canned(200, json!({"model": "llama3", "response": "ok", "done": true}));
        let client = OllamaClient::new(OllamaConfig::default(), transport.clone());

        let mut request = LlmRequest::new("Any large outflows?").with_system("forensics");
        request.context = vec![Turn::new(Role::User, "Trace 9hY")];
        let completion = client.complete(&request).await.unwrap();
        assert_eq!(completion.text, "ok");
        assert_eq!(completion.model, "llama3");

        let bodies = transport.bodies.lock().unwrap();
        let (url, body) = &bodies[0];
        assert_eq!(url, "http://localhost:11434/api/generate");
        assert_eq!(body["stream"], false);
        assert_eq!(body["system"], "forensics");
        let prompt = body["prompt"].as_str().unwrap();
        assert!(prompt.starts_with("user: Trace 9hY"));
        assert!(prompt.ends_with("Any large outflows?"));
    }

    #[tokio::test]
    async fn test_missing_response_field_is_malformed() {
        let transport = canned(200, json!({"done": true}));
        let client = OllamaClient::new(OllamaConfig::default(), transport);
        let err = client.complete(&LlmRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[tokio::test]
    async fn test_unknown_model_is_not_retryable() {
        let transport = canned(404, json!({"error": "model 'llama9' not found"}));
        let client = OllamaClient::new(OllamaConfig::default(), transport);
        let err = client.complete(&LlmRequest::new("hi")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(!err.is_retryable());
    }
}
