//! Controller-specific error types.
//!
//! Startup errors (`Kube`, `Kubeconfig`, `InvalidConfig`) end the process.
//! Everything else is logged by the controller loop and retried on the next
//! trigger.

use thiserror::Error;
use kube::Error as KubeError;
use validator_client::ValidatorError;

/// Errors that can occur in the Proxy Informer.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cluster credentials could not be loaded
    #[error("Failed to load cluster credentials: {0}")]
    Kubeconfig(String),

    /// Validator RPC error (transport or RPC-level)
    #[error("Validator error: {0}")]
    Validator(#[from] ValidatorError),

    /// The resource cache has not completed its initial list
    #[error("Kubernetes state not synchronized")]
    NotSynced,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
