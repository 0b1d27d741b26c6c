//! Mock ValidatorClient for unit testing
//!
//! This module provides an in-memory implementation of `ValidatorClientTrait`
//! that behaves like the validator's proxy table and records every call.

use crate::error::ValidatorError;
use crate::models::Proxy;
use crate::validator_trait::ValidatorClientTrait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// A call observed by the mock, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatorCall {
    GetConfiguredProxies,
    AddProxy { internal: String, external: String },
    RemoveProxy { internal: String },
}

/// Mock ValidatorClient for testing
///
/// Like the real validator, `add_proxy` keeps the existing entry when a
/// proxy with the same node ID is already configured.
#[derive(Debug, Clone)]
pub struct MockValidatorClient {
    rpc_url: String,
    proxies: Arc<Mutex<Vec<Proxy>>>,
    calls: Arc<Mutex<Vec<ValidatorCall>>>,
    get_error: Arc<Mutex<Option<(i64, String)>>>,
    failing_internal: Arc<Mutex<HashSet<String>>>,
}

impl MockValidatorClient {
    /// Create a new mock client with no configured proxies
    pub fn new(rpc_url: impl Into<String>) -> Self {
        Self {
            rpc_url: rpc_url.into(),
            proxies: Arc::new(Mutex::new(Vec::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            get_error: Arc::new(Mutex::new(None)),
            failing_internal: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Replace the configured proxy table (for test setup)
    pub fn set_proxies(&self, proxies: Vec<Proxy>) {
        *self.proxies.lock().unwrap() = proxies;
    }

    /// Current configured proxy table
    pub fn proxies(&self) -> Vec<Proxy> {
        self.proxies.lock().unwrap().clone()
    }

    /// Make `get_configured_proxies` fail with an RPC error, or clear it with `None`
    pub fn set_get_error(&self, error: Option<(i64, String)>) {
        *self.get_error.lock().unwrap() = error;
    }

    /// Make add/remove calls for this internal enode URL fail with an RPC error
    pub fn fail_calls_for(&self, internal: impl Into<String>) {
        self.failing_internal.lock().unwrap().insert(internal.into());
    }

    /// Clear all injected add/remove failures
    pub fn clear_failures(&self) {
        self.failing_internal.lock().unwrap().clear();
    }

    /// Every call issued so far, in order
    pub fn calls(&self) -> Vec<ValidatorCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Only the add/remove calls issued so far, in order
    pub fn mutations(&self) -> Vec<ValidatorCall> {
        self.calls()
            .into_iter()
            .filter(|c| !matches!(c, ValidatorCall::GetConfiguredProxies))
            .collect()
    }

    /// Forget recorded calls
    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: ValidatorCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn injected_failure(&self, internal: &str) -> Result<(), ValidatorError> {
        if self.failing_internal.lock().unwrap().contains(internal) {
            return Err(rpc_error(-32000, "injected failure"));
        }
        Ok(())
    }
}

fn rpc_error(code: i64, message: &str) -> ValidatorError {
    ValidatorError::Rpc {
        code,
        message: message.to_string(),
        body: format!(r#"{{"jsonrpc":"2.0","id":1,"error":{{"code":{code},"message":"{message}"}}}}"#),
    }
}

fn node_id(enode: &str) -> &str {
    enode
        .split_once("://")
        .map_or(enode, |(_, rest)| rest)
        .split_once('@')
        .map_or("", |(id, _)| id)
}

#[async_trait::async_trait]
impl ValidatorClientTrait for MockValidatorClient {
    fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn get_configured_proxies(&self) -> Result<Vec<Proxy>, ValidatorError> {
        self.record(ValidatorCall::GetConfiguredProxies);
        if let Some((code, message)) = self.get_error.lock().unwrap().clone() {
            return Err(rpc_error(code, &message));
        }
        Ok(self.proxies())
    }

    async fn add_proxy(&self, internal: &str, external: &str) -> Result<bool, ValidatorError> {
        self.record(ValidatorCall::AddProxy {
            internal: internal.to_string(),
            external: external.to_string(),
        });
        self.injected_failure(internal)?;

        let mut proxies = self.proxies.lock().unwrap();
        let id = node_id(internal);
        if !proxies.iter().any(|p| node_id(&p.internal_enode_url) == id) {
            proxies.push(Proxy::new(internal, external));
        }
        Ok(true)
    }

    async fn remove_proxy(&self, internal: &str) -> Result<bool, ValidatorError> {
        self.record(ValidatorCall::RemoveProxy {
            internal: internal.to_string(),
        });
        self.injected_failure(internal)?;

        let mut proxies = self.proxies.lock().unwrap();
        let before = proxies.len();
        proxies.retain(|p| p.internal_enode_url != internal);
        Ok(proxies.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_is_noop_on_node_id_collision() {
        let mock = MockValidatorClient::new("http://validator:8545");
        mock.set_proxies(vec![Proxy::new("enode://a@10.0.0.1:30503", "enode://a@1.2.3.4:30303")]);

        mock.add_proxy("enode://a@10.0.0.2:30503", "enode://a@1.2.3.5:30303").await.unwrap();

        assert_eq!(
            mock.proxies(),
            vec![Proxy::new("enode://a@10.0.0.1:30503", "enode://a@1.2.3.4:30303")]
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mock = MockValidatorClient::new("http://validator:8545");
        mock.set_get_error(Some((1, "boom".to_string())));
        assert!(mock.get_configured_proxies().await.unwrap_err().is_rpc());

        mock.fail_calls_for("enode://b@10.0.0.3:30503");
        assert!(mock.remove_proxy("enode://b@10.0.0.3:30503").await.is_err());
        assert_eq!(mock.calls().len(), 2);
    }
}
