//! Validator JSON-RPC Client
//!
//! A Rust client for the proxy-management subset of a validator's JSON-RPC
//! API. Every call is a single HTTP POST carrying a JSON-RPC 2.0 envelope.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use validator_client::ValidatorClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ValidatorClient::new(
//!     "http://127.0.0.1:8545".to_string(),
//!     Duration::from_secs(10),
//! )?;
//!
//! // Proxies the validator is currently configured with
//! let proxies = client.get_configured_proxies().await?;
//!
//! // Register a proxy by its internal and external enode URLs
//! client.add_proxy(
//!     "enode://abcd@10.0.0.1:30503",
//!     "enode://abcd@1.2.3.4:30303",
//! ).await?;
//!
//! // Deregister it again by its internal enode URL
//! client.remove_proxy("enode://abcd@10.0.0.1:30503").await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Proxy operations**: `istanbul_getProxiesInfo`, `istanbul_addProxy`,
//!   `istanbul_removeProxy`
//! - **Error classification**: transport failures and validator-reported
//!   RPC errors are distinct variants, both carrying the raw body
//! - **Mocking**: `ValidatorClientTrait` plus an in-memory mock behind the
//!   `test-util` feature

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod validator_trait;
#[cfg(feature = "test-util")]
pub mod mock;

pub use client::ValidatorClient;
pub use error::ValidatorError;
pub use models::*;
pub use validator_trait::ValidatorClientTrait;
#[cfg(feature = "test-util")]
pub use mock::{MockValidatorClient, ValidatorCall};
