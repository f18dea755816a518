//! Error types for the analysis engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Rate limited by upstream: {0}")]
    RateLimited(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned HTTP {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Malformed upstream data: {0}")]
    Malformed(String),

    #[error("All LLM providers failed: {}", .0.join("; "))]
    ProviderExhausted(Vec<String>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether a caller may retry the failed call.
    ///
    /// Rate limiting, transport failures and 5xx responses are transient.
    /// Everything else (missing data, 4xx, unparseable payloads) is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::RateLimited(_) | Error::Transport(_) | Error::Network(_) => true,
            Error::Upstream { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Map an HTTP status and body into the canonical taxonomy.
    pub fn from_status(status: u16, context: &str, body: &str) -> Self {
        let message = if body.is_empty() {
            context.to_string()
        } else {
            format!("{}: {}", context, truncate_body(body))
        };
        match status {
            404 => Error::NotFound(message),
            429 => Error::RateLimited(message),
            _ => Error::Upstream { status, message },
        }
    }

    /// Timeouts and connection failures become [`Error::Transport`].
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::Transport(format!("request timed out: {}", e))
        } else if e.is_connect() {
            Error::Transport(format!("connection failed: {}", e))
        } else {
            Error::Network(e)
        }
    }
}

fn truncate_body(body: &str) -> &str {
    const MAX: usize = 256;
    if body.len() <= MAX {
        return body;
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            Error::from_status(404, "address", ""),
            Error::NotFound(_)
        ));
        assert!(matches!(
            Error::from_status(429, "address", "slow down"),
            Error::RateLimited(_)
        ));
        assert!(matches!(
            Error::from_status(503, "address", ""),
            Error::Upstream { status: 503, .. }
        ));
    }

    #[test]
    fn test_retry_classification() {
        assert!(Error::RateLimited("x".into()).is_retryable());
        assert!(Error::Transport("timeout".into()).is_retryable());
        assert!(Error::from_status(502, "llm", "").is_retryable());
        assert!(!Error::from_status(400, "llm", "").is_retryable());
        assert!(!Error::from_status(401, "llm", "").is_retryable());
        assert!(!Error::Malformed("bad".into()).is_retryable());
        assert!(!Error::NotFound("gone".into()).is_retryable());
    }

    #[test]
    fn test_long_body_is_truncated() {
        let body = "é".repeat(400);
        let err = Error::from_status(500, "node", &body);
        let text = err.to_string();
        assert!(text.len() < body.len());
    }
}
