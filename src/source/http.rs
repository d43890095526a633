//! HTTP transport for the snapshot endpoint.
//!
//! Uses reqwest. No client-level timeout is set: the data source races each
//! request against its own (escalating) timeout and drops the request future
//! when it loses, which aborts the connection.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::Value;
use url::Url;

use super::{SnapshotTransport, TransportFailure};
use crate::error::ConfigError;

/// Default path of the snapshot endpoint under the base URL
pub const DEFAULT_SNAPSHOT_PATH: &str = "/api/topology";

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    url: Url,
}

impl HttpTransport {
    /// Build a transport for `path` under `endpoint`.
    pub fn new(endpoint: &str, path: &str) -> Result<Self, ConfigError> {
        let url = snapshot_url(endpoint, path)?;
        let client = Client::builder()
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;
        Ok(Self { client, url })
    }

    /// Use an existing client (shared connection pool, custom TLS, ...)
    pub fn with_client(client: Client, url: Url) -> Self {
        Self { client, url }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

/// Join `path` onto `endpoint`, rejecting anything that is not http(s).
pub fn snapshot_url(endpoint: &str, path: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEndpoint {
        url: endpoint.to_string(),
        reason,
    };
    let base = Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
    if !matches!(base.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", base.scheme())));
    }
    base.join(path).map_err(|e| invalid(e.to_string()))
}

#[async_trait]
impl SnapshotTransport for HttpTransport {
    async fn fetch_payload(&self) -> Result<Value, TransportFailure> {
        let response = self
            .client
            .get(self.url.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| TransportFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportFailure::Transport(format!("HTTP {}", status)));
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_decode() {
                TransportFailure::Data(format!("response is not valid JSON: {}", e))
            } else {
                TransportFailure::Transport(e.to_string())
            }
        })
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}
