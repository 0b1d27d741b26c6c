//! Process configuration.
//!
//! Command-line flags with environment fallbacks, converted once into an
//! immutable [`Config`] that the controller and reconciler share.

use crate::error::ControllerError;
use clap::{Parser, ValueEnum};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Annotation carrying a proxy's external enode URL
pub const EXTERNAL_ENODE_URL_ANNOTATION: &str = "proxy.mantalabs.com/external-enode-url";
/// Annotation carrying a proxy's internal enode URL
pub const INTERNAL_ENODE_URL_ANNOTATION: &str = "proxy.mantalabs.com/internal-enode-url";

/// Default validator RPC endpoint
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Absolute path to a kubeconfig file (in-cluster config when unset)
    #[arg(long, env = "KUBECONFIG_PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Validator JSON-RPC URL
    #[arg(long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    pub rpc_url: String,

    /// Namespace of proxy resources
    #[arg(long, env = "PROXY_NAMESPACE", default_value = "default")]
    pub proxy_namespace: String,

    /// Label selector to select proxy resources
    #[arg(long, env = "PROXY_LABEL_SELECTOR", default_value = "proxy=true")]
    pub proxy_label_selector: String,

    /// Kind of resource carrying the enode annotations
    #[arg(long, env = "PROXY_RESOURCE_KIND", value_enum, default_value = "pod")]
    pub resource_kind: ResourceKind,

    /// Seconds between periodic re-synchronizations
    #[arg(long = "resync-period", env = "RESYNC_PERIOD_SECS", default_value_t = 10)]
    pub resync_period_secs: u64,

    /// Seconds before a validator RPC call is abandoned
    #[arg(long = "rpc-timeout", env = "RPC_TIMEOUT_SECS", default_value_t = 10)]
    pub rpc_timeout_secs: u64,

    /// Seconds before a hostname lookup is abandoned
    #[arg(long = "resolve-timeout", env = "RESOLVE_TIMEOUT_SECS", default_value_t = 5)]
    pub resolve_timeout_secs: u64,
}

/// Resource kinds the observer can watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ResourceKind {
    Pod,
    Service,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pod => write!(f, "Pod"),
            Self::Service => write!(f, "Service"),
        }
    }
}

/// Annotation keys read during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnnotationKeys {
    pub external: String,
    pub internal: String,
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self {
            external: EXTERNAL_ENODE_URL_ANNOTATION.to_string(),
            internal: INTERNAL_ENODE_URL_ANNOTATION.to_string(),
        }
    }
}

/// Validated configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub kubeconfig: Option<PathBuf>,
    pub rpc_url: String,
    pub namespace: String,
    pub label_selector: String,
    pub resource_kind: ResourceKind,
    pub resync_period: Duration,
    pub rpc_timeout: Duration,
    pub resolve_timeout: Duration,
    pub annotations: AnnotationKeys,
}

fn positive_secs(name: &str, secs: u64) -> Result<Duration, ControllerError> {
    if secs == 0 {
        return Err(ControllerError::InvalidConfig(format!("{name} must be greater than zero")));
    }
    Ok(Duration::from_secs(secs))
}

impl TryFrom<Args> for Config {
    type Error = ControllerError;

    fn try_from(args: Args) -> Result<Self, Self::Error> {
        if args.proxy_namespace.trim().is_empty() {
            return Err(ControllerError::InvalidConfig("proxy namespace must not be empty".to_string()));
        }

        Ok(Self {
            kubeconfig: args.kubeconfig,
            rpc_url: args.rpc_url,
            namespace: args.proxy_namespace,
            label_selector: args.proxy_label_selector,
            resource_kind: args.resource_kind,
            resync_period: positive_secs("resync period", args.resync_period_secs)?,
            rpc_timeout: positive_secs("RPC timeout", args.rpc_timeout_secs)?,
            resolve_timeout: positive_secs("resolve timeout", args.resolve_timeout_secs)?,
            annotations: AnnotationKeys::default(),
        })
    }
}
