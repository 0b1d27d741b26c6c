//! Proxy discovery.
//!
//! Looks for resources that have non-empty enode URL annotations and groups
//! the URLs by node ID to define proxies. The internal and external roles of
//! one proxy may come from different resources. The set is rebuilt from the
//! snapshot on every call.

use crate::config::AnnotationKeys;
use crate::enode::EnodeCodec;
use crate::error::ControllerError;
use crate::observer::ProxyObserver;
use futures::future::join_all;
use std::collections::BTreeMap;
use tracing::{info, warn};
use validator_client::Proxy;

#[derive(Debug, Clone, Copy)]
enum Role {
    External,
    Internal,
}

impl Role {
    fn assign(self, proxy: &mut Proxy, url: String) {
        match self {
            Self::External => proxy.external_enode_url = url,
            Self::Internal => proxy.internal_enode_url = url,
        }
    }
}

/// Derives the desired proxy set from observed resources.
#[derive(Debug, Clone)]
pub struct Discovery {
    codec: EnodeCodec,
    keys: AnnotationKeys,
}

impl Discovery {
    pub fn new(codec: EnodeCodec, keys: AnnotationKeys) -> Self {
        Self { codec, keys }
    }

    /// Complete proxies described by the observer's current snapshot,
    /// ordered by node ID.
    ///
    /// Fails with [`ControllerError::NotSynced`] until the observer's initial
    /// list has completed. Endpoints that fail to parse or resolve are logged
    /// and dropped; proxies missing a role are logged and skipped.
    pub async fn current_proxies(&self, observer: &dyn ProxyObserver) -> Result<Vec<Proxy>, ControllerError> {
        if !observer.is_synced() {
            return Err(ControllerError::NotSynced);
        }

        let snapshot = observer.list();

        let mut endpoints = Vec::new();
        for (identity, annotations) in &snapshot {
            for (role, key) in [(Role::External, &self.keys.external), (Role::Internal, &self.keys.internal)] {
                if let Some(raw) = annotations.get(key).filter(|value| !value.trim().is_empty()) {
                    endpoints.push((identity.as_str(), role, raw.as_str()));
                }
            }
        }

        // Lookups run concurrently; results are folded in snapshot order so
        // the last write for a role stays deterministic.
        let normalized = join_all(endpoints.iter().map(|(_, _, raw)| self.codec.normalize(raw))).await;

        let mut proxies: BTreeMap<String, Proxy> = BTreeMap::new();
        for ((identity, role, raw), result) in endpoints.into_iter().zip(normalized) {
            match result {
                Ok(enode) => role.assign(proxies.entry(enode.node_id).or_default(), enode.url),
                Err(e) => warn!("Failed to parse enode {} on {}: {}", raw, identity, e),
            }
        }

        Ok(proxies
            .into_values()
            .filter(|proxy| {
                if !proxy.is_complete() {
                    info!("Skipping partially defined proxy: {}", proxy);
                }
                proxy.is_complete()
            })
            .collect())
    }
}
