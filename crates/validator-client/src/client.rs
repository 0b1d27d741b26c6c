//! Validator JSON-RPC client
//!
//! Implements the istanbul proxy API over a single HTTP POST endpoint.

use crate::error::ValidatorError;
use crate::models::{methods, Proxy, RpcRequest, RpcResponse, JSONRPC_VERSION};
use crate::validator_trait::ValidatorClientTrait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Validator JSON-RPC client
#[derive(Debug)]
pub struct ValidatorClient {
    client: Client,
    rpc_url: String,
    next_id: AtomicU64,
}

impl ValidatorClient {
    /// Create a new validator client
    ///
    /// # Arguments
    /// * `rpc_url` - Validator RPC URL (e.g., "http://127.0.0.1:8545")
    /// * `timeout` - Upper bound on each request, connect through body read
    pub fn new(rpc_url: String, timeout: Duration) -> Result<Self, ValidatorError> {
        Url::parse(&rpc_url).map_err(|e| ValidatorError::InvalidUrl(format!("{rpc_url}: {e}")))?;

        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            rpc_url,
            next_id: AtomicU64::new(1),
        })
    }

    /// Get the RPC URL
    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    /// Issue one JSON-RPC call and decode its result.
    ///
    /// A nonzero `error.code` is reported as [`ValidatorError::Rpc`] with the
    /// raw body; anything that is not a well-formed envelope is
    /// [`ValidatorError::Decode`].
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T, ValidatorError> {
        let request = RpcRequest {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
        };
        debug!("Calling {} (id {}) on {}", method, request.id, self.rpc_url);

        let response = self.client
            .post(&self.rpc_url)
            .header("Accept", "application/json")
            .json(&request)
            .send()
            .await
            .inspect_err(|e| warn!("HTTP {} failed: {}", method, e))?;

        let status = response.status();
        let body = response.text().await?;

        let envelope: RpcResponse = serde_json::from_str(&body).map_err(|e| ValidatorError::Decode {
            message: format!("{method}: HTTP {status}: {e}"),
            body: body.clone(),
        })?;

        if let Some(error) = envelope.error {
            if error.code != 0 {
                return Err(ValidatorError::Rpc {
                    code: error.code,
                    message: error.message,
                    body,
                });
            }
        }

        serde_json::from_value(envelope.result.unwrap_or(Value::Null)).map_err(|e| ValidatorError::Decode {
            message: format!("{method}: unexpected result: {e}"),
            body,
        })
    }

    /// Get the proxies the validator is configured with
    ///
    /// # Returns
    /// * `Ok(Vec<Proxy>)` - Configured proxies; a `null` result is an empty list
    /// * `Err(ValidatorError)` - If the request fails or the validator rejects it
    pub async fn get_configured_proxies(&self) -> Result<Vec<Proxy>, ValidatorError> {
        let proxies: Option<Vec<Proxy>> = self.call(methods::GET_PROXIES_INFO, Vec::new()).await?;
        Ok(proxies.unwrap_or_default())
    }

    /// Add a proxy to the validator configuration
    ///
    /// # Arguments
    /// * `internal` - Internal enode URL
    /// * `external` - External enode URL
    pub async fn add_proxy(&self, internal: &str, external: &str) -> Result<bool, ValidatorError> {
        self.call(methods::ADD_PROXY, vec![json!(internal), json!(external)]).await
    }

    /// Remove a proxy from the validator configuration
    ///
    /// # Arguments
    /// * `internal` - Internal enode URL of the proxy to remove
    pub async fn remove_proxy(&self, internal: &str) -> Result<bool, ValidatorError> {
        self.call(methods::REMOVE_PROXY, vec![json!(internal)]).await
    }
}

#[async_trait::async_trait]
impl ValidatorClientTrait for ValidatorClient {
    fn rpc_url(&self) -> &str {
        self.rpc_url()
    }

    async fn get_configured_proxies(&self) -> Result<Vec<Proxy>, ValidatorError> {
        self.get_configured_proxies().await
    }

    async fn add_proxy(&self, internal: &str, external: &str) -> Result<bool, ValidatorError> {
        self.add_proxy(internal, external).await
    }

    async fn remove_proxy(&self, internal: &str) -> Result<bool, ValidatorError> {
        self.remove_proxy(internal).await
    }
}
