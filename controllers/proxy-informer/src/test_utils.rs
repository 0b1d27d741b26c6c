//! Test utilities for unit testing discovery and reconciliation
//!
//! This module provides in-memory stand-ins for the resource observer and
//! the hostname resolver.

use crate::enode::HostResolver;
use crate::observer::{Annotations, ProxyObserver, Snapshot};
use std::collections::HashMap;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Observer over a fixed, mutable snapshot
#[derive(Debug, Default)]
pub struct StaticObserver {
    resources: Mutex<Snapshot>,
    synced: AtomicBool,
}

impl StaticObserver {
    /// A synced observer with no resources
    pub fn synced() -> Self {
        let observer = Self::default();
        observer.set_synced(true);
        observer
    }

    pub fn set_synced(&self, synced: bool) {
        self.synced.store(synced, Ordering::SeqCst);
    }

    /// Insert or replace a resource's annotations
    pub fn put(&self, identity: &str, annotations: Annotations) {
        self.resources.lock().unwrap().insert(identity.to_string(), annotations);
    }
}

impl ProxyObserver for StaticObserver {
    fn list(&self) -> Snapshot {
        self.resources.lock().unwrap().clone()
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// Helper to build the annotation map of a proxy resource
pub fn proxy_annotations(internal: Option<&str>, external: Option<&str>) -> Annotations {
    let mut annotations = Annotations::new();
    if let Some(internal) = internal {
        annotations.insert(crate::config::INTERNAL_ENODE_URL_ANNOTATION.to_string(), internal.to_string());
    }
    if let Some(external) = external {
        annotations.insert(crate::config::EXTERNAL_ENODE_URL_ANNOTATION.to_string(), external.to_string());
    }
    annotations
}

/// Resolver over a fixed host table; unknown hosts fail
#[derive(Debug, Default)]
pub struct StaticResolver {
    hosts: HashMap<String, Vec<IpAddr>>,
    delay: Option<Duration>,
}

impl StaticResolver {
    pub fn with_host(mut self, host: &str, addrs: &[&str]) -> Self {
        let addrs = addrs.iter().map(|a| a.parse().unwrap()).collect();
        self.hosts.insert(host.to_string(), addrs);
        self
    }

    /// Delay every lookup, to exercise the resolve timeout
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait::async_trait]
impl HostResolver for StaticResolver {
    async fn lookup(&self, host: &str) -> io::Result<Vec<IpAddr>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no such host: {host}")))
    }
}
