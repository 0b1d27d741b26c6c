//! Kubernetes resource observer.
//!
//! A label-scoped watch feeds a reflector store. The store is the snapshot
//! discovery reads; the watch loop only signals that *something* changed.
//! Notifications carry no payload and are coalesced into a channel of
//! capacity one, so a burst of events becomes a single pending trigger.

use crate::controller::cancelled;
use futures::StreamExt;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::reflector::{self, Store};
use kube_runtime::watcher::Event;
use kube_runtime::{watcher, WatchStreamExt};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Annotations of a single resource
pub type Annotations = BTreeMap<String, String>;

/// Resource identity (`namespace/name`) to annotations
pub type Snapshot = BTreeMap<String, Annotations>;

/// Read side of the resource cache.
pub trait ProxyObserver: Send + Sync {
    /// Current best-known snapshot.
    fn list(&self) -> Snapshot;

    /// Whether the initial list has completed.
    fn is_synced(&self) -> bool;
}

/// Observer backed by a reflector store of `K`.
pub struct KubeObserver<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    store: Store<K>,
    synced: Arc<AtomicBool>,
}

impl<K> ProxyObserver for KubeObserver<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    fn list(&self) -> Snapshot {
        self.store
            .state()
            .iter()
            .map(|obj| {
                let identity = match obj.namespace() {
                    Some(ns) => format!("{}/{}", ns, obj.name_any()),
                    None => obj.name_any(),
                };
                (identity, obj.annotations().clone())
            })
            .collect()
    }

    fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

/// Drives the watch stream that keeps a [`KubeObserver`] current.
pub struct WatchTask<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    config: watcher::Config,
    writer: reflector::store::Writer<K>,
    synced: Arc<AtomicBool>,
    kind: String,
}

/// Creates an observer of the resources matching `label_selector` and the
/// task that must run for it to fill.
pub fn observe<K>(api: Api<K>, label_selector: &str, kind: &str) -> (KubeObserver<K>, WatchTask<K>)
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (store, writer) = reflector::store();
    let synced = Arc::new(AtomicBool::new(false));

    let observer = KubeObserver {
        store,
        synced: synced.clone(),
    };
    let task = WatchTask {
        api,
        config: watcher::Config::default().labels(label_selector),
        writer,
        synced,
        kind: kind.to_string(),
    };
    (observer, task)
}

impl<K> WatchTask<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Debug + Send + Sync + Unpin,
{
    /// Runs until `shutdown` flips to true.
    ///
    /// Sends a notification when the initial list completes and on every
    /// add, update, or delete afterwards. Watch errors are retried with
    /// backoff and never end the task.
    pub async fn run(self, notify: mpsc::Sender<()>, mut shutdown: watch::Receiver<bool>) {
        info!("Starting {} watcher", self.kind);

        let stream = watcher(self.api, self.config)
            .default_backoff()
            .reflect(self.writer);
        let mut stream = std::pin::pin!(stream);

        loop {
            let event = tokio::select! {
                biased;
                () = cancelled(&mut shutdown) => break,
                event = stream.next() => event,
            };

            match event {
                Some(Ok(Event::InitDone)) => {
                    if !self.synced.swap(true, Ordering::SeqCst) {
                        info!("{} cache synchronized", self.kind);
                    }
                    signal(&notify);
                }
                Some(Ok(Event::Apply(obj))) => {
                    info!("Applied {} {}, re-synchronizing", self.kind, obj.name_any());
                    signal(&notify);
                }
                Some(Ok(Event::Delete(obj))) => {
                    info!("Deleted {} {}, re-synchronizing", self.kind, obj.name_any());
                    signal(&notify);
                }
                Some(Ok(Event::Init)) => debug!("{} watcher (re)listing", self.kind),
                Some(Ok(Event::InitApply(obj))) => debug!("{} init apply: {}", self.kind, obj.name_any()),
                Some(Err(e)) => warn!("{} watcher error (will retry): {}", self.kind, e),
                None => {
                    warn!("{} watch stream ended", self.kind);
                    break;
                }
            }
        }

        info!("{} watcher done", self.kind);
    }
}

fn signal(notify: &mpsc::Sender<()>) {
    match notify.try_send(()) {
        Ok(()) => {}
        // A trigger is already queued; it will observe this change too.
        Err(mpsc::error::TrySendError::Full(())) => {}
        Err(mpsc::error::TrySendError::Closed(())) => debug!("Notification receiver closed"),
    }
}
