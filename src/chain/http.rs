//! Shared GET plumbing for the chain backends

use crate::{Error, Result};
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use std::time::{Duration, Instant};
use url::Url;

/// How a backend authenticates
pub(crate) enum Auth {
    None,
    /// Key sent in a named header
    Header(&'static str, SecretString),
    Bearer(SecretString),
    Basic {
        username: String,
        password: Option<SecretString>,
    },
}

impl Auth {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Auth::None => request,
            Auth::Header(name, key) => request.header(*name, key.expose_secret()),
            Auth::Bearer(token) => request.bearer_auth(token.expose_secret()),
            Auth::Basic { username, password } => {
                request.basic_auth(username, password.as_ref().map(|p| p.expose_secret()))
            }
        }
    }
}

/// GET client bound to one base URL
pub(crate) struct JsonGetter {
    client: Client,
    base: Url,
    timeout: Duration,
    auths: Vec<Auth>,
    backend: &'static str,
}

impl JsonGetter {
    pub fn new(backend: &'static str, base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid {} URL {}: {}", backend, base_url, e)))?;
        // Without the trailing slash `join` would replace the last segment (e.g. `v1`)
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: Client::new(),
            base,
            timeout,
            auths: Vec::new(),
            backend,
        })
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        if !matches!(auth, Auth::None) {
            self.auths.push(auth);
        }
        self
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| Error::InvalidArgument(format!("bad path {}: {}", path, e)))
    }

    /// GET `path` and parse the body as JSON.
    pub async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = self.url(path)?;
        let mut request = self.client.get(url.clone()).timeout(self.timeout);
        if !query.is_empty() {
            request = request.query(query);
        }
        for auth in &self.auths {
            request = auth.apply(request);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(Error::from_reqwest)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(Error::from_reqwest)?;

        tracing::debug!(
            backend = self.backend,
            path = %url.path(),
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chain API call"
        );

        if !(200..300).contains(&status) {
            return Err(Error::from_status(
                status,
                &format!("{} {}", self.backend, url.path()),
                &body,
            ));
        }
        serde_json::from_str(&body)
            .map_err(|e| Error::Malformed(format!("{} {}: {}", self.backend, url.path(), e)))
    }
}
