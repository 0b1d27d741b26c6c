//! ValidatorClient trait for mocking
//!
//! This trait abstracts the ValidatorClient so the reconciliation engine can
//! be exercised in unit tests without a running validator.

use crate::error::ValidatorError;
use crate::models::Proxy;

/// Trait for validator proxy-configuration operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ValidatorClientTrait: Send + Sync {
    /// Get the RPC URL
    fn rpc_url(&self) -> &str;

    /// Proxies the validator is currently configured with.
    async fn get_configured_proxies(&self) -> Result<Vec<Proxy>, ValidatorError>;

    /// Registers a proxy. The validator silently keeps its existing entry
    /// when a proxy with the same node ID is already configured.
    async fn add_proxy(&self, internal: &str, external: &str) -> Result<bool, ValidatorError>;

    /// Deregisters the proxy with this internal enode URL.
    async fn remove_proxy(&self, internal: &str) -> Result<bool, ValidatorError>;
}
