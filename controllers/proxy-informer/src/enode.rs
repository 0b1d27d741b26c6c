//! Enode URL normalization.
//!
//! Validators resolve hostnames before storing a proxy, so every enode URL
//! is rewritten to an address literal before it is compared with the
//! validator's configuration or sent to it.
//!
//! `enode://<node-id>@<host>[:<port>][?query]`

use std::fmt;
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Reasons an enode URL is dropped during discovery.
#[derive(Debug, Error)]
pub enum EnodeError {
    #[error("failed to parse enode URL {url}: {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("enode URL {0} has no node ID")]
    MissingNodeId(String),

    #[error("enode URL {0} has no host")]
    MissingHost(String),

    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out resolving {host} after {timeout:?}")]
    ResolveTimeout { host: String, timeout: Duration },

    #[error("{0} resolved to no addresses")]
    NoAddress(String),
}

/// Hostname lookup used by [`EnodeCodec`].
#[async_trait::async_trait]
pub trait HostResolver: Send + Sync + fmt::Debug {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>>;
}

/// Resolver backed by the system's `getaddrinfo`.
#[derive(Debug, Default)]
pub struct SystemResolver;

#[async_trait::async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((host, 0)).await?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

/// An enode URL split into its node ID and address-literal form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedEnode {
    pub node_id: String,
    pub url: String,
}

/// Parses and normalizes enode URLs.
#[derive(Debug, Clone)]
pub struct EnodeCodec {
    resolver: Arc<dyn HostResolver>,
    resolve_timeout: Duration,
}

impl EnodeCodec {
    /// Codec using the system resolver.
    pub fn new(resolve_timeout: Duration) -> Self {
        Self::with_resolver(Arc::new(SystemResolver), resolve_timeout)
    }

    pub fn with_resolver(resolver: Arc<dyn HostResolver>, resolve_timeout: Duration) -> Self {
        Self {
            resolver,
            resolve_timeout,
        }
    }

    /// Extracts the node ID and returns the URL with its host as an address
    /// literal.
    ///
    /// URLs that already carry an IP literal are returned unchanged. Otherwise
    /// the host is replaced by the first address the resolver returns; the
    /// port and query are kept.
    pub async fn normalize(&self, raw: &str) -> Result<NormalizedEnode, EnodeError> {
        let raw = raw.trim();
        let mut url = Url::parse(raw).map_err(|source| EnodeError::Parse {
            url: raw.to_string(),
            source,
        })?;

        let node_id = url.username().to_string();
        if node_id.is_empty() {
            return Err(EnodeError::MissingNodeId(raw.to_string()));
        }

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.trim_start_matches('[').trim_end_matches(']').to_string(),
            _ => return Err(EnodeError::MissingHost(raw.to_string())),
        };

        if host.parse::<IpAddr>().is_ok() {
            return Ok(NormalizedEnode {
                node_id,
                url: raw.to_string(),
            });
        }

        let ip = self.resolve(&host).await?;
        url.set_ip_host(ip).map_err(|()| EnodeError::MissingHost(raw.to_string()))?;

        Ok(NormalizedEnode {
            node_id,
            url: url.to_string(),
        })
    }

    async fn resolve(&self, host: &str) -> Result<IpAddr, EnodeError> {
        let addrs = tokio::time::timeout(self.resolve_timeout, self.resolver.lookup(host))
            .await
            .map_err(|_elapsed| EnodeError::ResolveTimeout {
                host: host.to_string(),
                timeout: self.resolve_timeout,
            })?
            .map_err(|source| EnodeError::Resolve {
                host: host.to_string(),
                source,
            })?;

        addrs
            .into_iter()
            .next()
            .ok_or_else(|| EnodeError::NoAddress(host.to_string()))
    }
}
