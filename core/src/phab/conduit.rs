//! Conduit (Phabricator API) client.
//!
//! Calls are `POST <api root>/<method>` with form fields `params` (JSON, carrying the token
//! under `__conduit__`), `output=json` and `__conduit__=1`. Responses are the usual
//! `{result, error_code, error_info}` envelope.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

/// Errors from Conduit calls. A lookup that finds nothing is not an error.
#[derive(Debug, Error)]
pub enum ConduitError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("conduit error {code}: {info}")]
    Api { code: String, info: String },

    #[error("unexpected response to {method}: {source}")]
    Decode {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid conduit host {0:?}")]
    InvalidHost(String),

    #[error("method {0} is not offered by this server")]
    UnknownMethod(String),
}

impl ConduitError {
    pub fn decode(method: &str, source: serde_json::Error) -> Self {
        ConduitError::Decode {
            method: method.to_string(),
            source,
        }
    }
}

/// An authenticated client bound to one host.
#[async_trait]
pub trait Conduit: Send + Sync {
    /// Invoke `method` with `params` (a JSON object) and return the `result` member.
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConduitError>;
}

/// Call `method` and decode its result into `T`.
pub async fn call_as<T: DeserializeOwned>(
    conduit: &dyn Conduit,
    method: &str,
    params: Value,
) -> Result<T, ConduitError> {
    let value = conduit.call(method, params).await?;
    decode(method, value)
}

/// Decode a result value, tagging failures with the method name.
pub fn decode<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ConduitError> {
    serde_json::from_value(value).map_err(|source| ConduitError::decode(method, source))
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    error_info: Option<String>,
}

/// Conduit over HTTP.
pub struct HttpConduit {
    client: reqwest::Client,
    api_root: Url,
    token: String,
    /// Methods advertised by `conduit.query`; empty until discovery ran.
    interfaces: HashSet<String>,
}

impl HttpConduit {
    /// `host` is the API root, e.g. "https://forge.example.org/api/".
    pub fn new(client: reqwest::Client, host: &str, token: &str) -> Result<Self, ConduitError> {
        Ok(Self {
            client,
            api_root: api_root(host)?,
            token: token.to_string(),
            interfaces: HashSet::new(),
        })
    }

    /// Ask the server which methods it offers; later calls to anything else fail fast.
    pub async fn update_interfaces(&mut self) -> Result<usize, ConduitError> {
        let methods = self.call("conduit.query", json!({})).await?;
        self.interfaces = methods
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        Ok(self.interfaces.len())
    }

    pub fn host(&self) -> &str {
        self.api_root.as_str()
    }
}

fn api_root(host: &str) -> Result<Url, ConduitError> {
    let trimmed = host.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash).map_err(|_| ConduitError::InvalidHost(host.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(ConduitError::InvalidHost(host.to_string())),
    }
}

#[async_trait]
impl Conduit for HttpConduit {
    async fn call(&self, method: &str, params: Value) -> Result<Value, ConduitError> {
        if !self.interfaces.is_empty() && !self.interfaces.contains(method) {
            return Err(ConduitError::UnknownMethod(method.to_string()));
        }
        let mut params = match params {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        params.insert("__conduit__".into(), json!({ "token": self.token }));

        let url = self
            .api_root
            .join(method)
            .map_err(|_| ConduitError::InvalidHost(self.api_root.to_string()))?;
        debug!(method, host = %self.api_root, "conduit call");

        let form = [
            ("params", Value::Object(params).to_string()),
            ("output", "json".to_string()),
            ("__conduit__", "1".to_string()),
        ];
        let res = self.client.post(url).form(&form).send().await?.error_for_status()?;
        let body = res.text().await?;
        let envelope: Envelope =
            serde_json::from_str(&body).map_err(|source| ConduitError::decode(method, source))?;

        if let Some(code) = envelope.error_code {
            let info = envelope.error_info.unwrap_or_default();
            warn!(method, code = %code, info = %info, "conduit returned an error");
            return Err(ConduitError::Api { code, info });
        }
        Ok(envelope.result.unwrap_or(Value::Null))
    }
}

/// Creates initialized clients for the endpoint registry.
#[async_trait]
pub trait ConduitConnector: Send + Sync {
    async fn connect(&self, host: &str, token: &str) -> Result<Arc<dyn Conduit>, ConduitError>;
}

/// Production connector: one shared reqwest client, interface discovery on connect.
pub struct HttpConnector {
    client: reqwest::Client,
}

impl HttpConnector {
    pub fn new() -> Result<Self, ConduitError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("phabrelay/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl ConduitConnector for HttpConnector {
    async fn connect(&self, host: &str, token: &str) -> Result<Arc<dyn Conduit>, ConduitError> {
        let mut conduit = HttpConduit::new(self.client.clone(), host, token)?;
        let methods = conduit.update_interfaces().await?;
        debug!(host = conduit.host(), methods, "conduit interfaces discovered");
        Ok(Arc::new(conduit))
    }
}
