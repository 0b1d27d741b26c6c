//! Validator JSON-RPC models
//!
//! Wire shapes for the JSON-RPC 2.0 envelope and for the proxy entries
//! returned by `istanbul_getProxiesInfo`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// JSON-RPC protocol version sent with every request
pub const JSONRPC_VERSION: &str = "2.0";

/// RPC method names
pub mod methods {
    /// Lists the proxies the validator is configured with
    pub const GET_PROXIES_INFO: &str = "istanbul_getProxiesInfo";
    /// Registers a proxy: params `[internal, external]`
    pub const ADD_PROXY: &str = "istanbul_addProxy";
    /// Deregisters a proxy: params `[internal]`
    pub const REMOVE_PROXY: &str = "istanbul_removeProxy";
}

/// A proxy peer with its two enode URL roles.
///
/// Equality is structural over `(internal, external)`. The validator
/// reports additional fields (`isPeered`, `validators`, ...) which are
/// ignored; missing fields decode as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Proxy {
    /// Enode URL the validator uses to reach the proxy
    #[serde(default, alias = "InternalEnodeUrl")]
    pub internal_enode_url: String,
    /// Enode URL the proxy advertises to the public network
    #[serde(default, alias = "ExternalEnodeUrl")]
    pub external_enode_url: String,
}

impl Proxy {
    /// Creates a proxy from its internal and external enode URLs.
    pub fn new(internal_enode_url: impl Into<String>, external_enode_url: impl Into<String>) -> Self {
        Self {
            internal_enode_url: internal_enode_url.into(),
            external_enode_url: external_enode_url.into(),
        }
    }

    /// A proxy is complete once both roles are known.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.internal_enode_url.is_empty() && !self.external_enode_url.is_empty()
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{internal: {}, external: {}}}",
            self.internal_enode_url, self.external_enode_url
        )
    }
}

/// JSON-RPC request envelope
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: Vec<serde_json::Value>,
    pub id: u64,
}

/// JSON-RPC response envelope
///
/// `result` is kept as raw JSON so the envelope can be checked for an
/// error before the result is decoded into its concrete type.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}
