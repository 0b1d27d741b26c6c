//! Main controller implementation.
//!
//! The controller owns the resource watch and two trigger sources: watch
//! notifications and a periodic resync timer. Both funnel into the
//! reconciler's single-flight `trigger`.
//!
//! Lifecycle: `Initializing` until the resource cache has synced, `Running`
//! while triggers are served, `Draining` once shutdown is requested and
//! every task is being joined, then `Stopped`.

use crate::config::{Config, ResourceKind};
use crate::discovery::Discovery;
use crate::enode::EnodeCodec;
use crate::error::ControllerError;
use crate::observer::{observe, ProxyObserver};
use crate::reconciler::{Reconciler, TriggerSource};
use futures::future::BoxFuture;
use futures::FutureExt;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::NamespaceResourceScope;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt;
use std::fmt::Debug;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info};
use validator_client::ValidatorClient;

/// Resolves once `shutdown` is set, or once its sender is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

/// Controller lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerPhase {
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing"),
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Main controller for validator proxy synchronization.
pub struct Controller {
    reconciler: Arc<Reconciler>,
    observer: Arc<dyn ProxyObserver>,
    resync_period: Duration,
    phase: watch::Sender<ControllerPhase>,
    watch_task: BoxFuture<'static, ()>,
    notifications: mpsc::Receiver<()>,
    shutdown: watch::Receiver<bool>,
}

impl Controller {
    /// Creates a new controller instance.
    ///
    /// Connects to the cluster and lists the proxy resources once; failures
    /// here are fatal. The validator is first contacted by the startup pass.
    pub async fn new(config: &Config, shutdown: watch::Receiver<bool>) -> Result<Self, ControllerError> {
        info!("Initializing Proxy Informer");

        let client = kube_client(config.kubeconfig.as_deref()).await?;

        match config.resource_kind {
            ResourceKind::Pod => Self::for_kind::<Pod>(client, config, shutdown).await,
            ResourceKind::Service => Self::for_kind::<Service>(client, config, shutdown).await,
        }
    }

    async fn for_kind<K>(client: Client, config: &Config, shutdown: watch::Receiver<bool>) -> Result<Self, ControllerError>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    {
        let kind = config.resource_kind.to_string();
        let api: Api<K> = Api::namespaced(client, &config.namespace);

        info!("Checking access to {} resources in namespace {}...", kind, config.namespace);
        api.list(&ListParams::default().labels(&config.label_selector).limit(1))
            .await
            .map_err(|e| {
                error!("Failed to list {} resources in namespace {}: {}", kind, config.namespace, e);
                ControllerError::Kube(e)
            })?;
        info!("Kubernetes API reachable");

        let (observer, task) = observe(api, &config.label_selector, &kind);
        let observer: Arc<dyn ProxyObserver> = Arc::new(observer);

        let validator = ValidatorClient::new(config.rpc_url.clone(), config.rpc_timeout)?;
        let discovery = Discovery::new(EnodeCodec::new(config.resolve_timeout), config.annotations.clone());
        let reconciler = Arc::new(Reconciler::new(Arc::new(validator), observer.clone(), discovery));

        // A trigger already queued covers any later change
        let (notify_tx, notify_rx) = mpsc::channel(1);
        let watch_task = task.run(notify_tx, shutdown.clone());

        Ok(Self::with_parts(reconciler, observer, config.resync_period, watch_task, notify_rx, shutdown))
    }

    /// Assembles a controller from already-built parts.
    ///
    /// `watch_task` must keep `observer` current, send on `notifications` after
    /// changes, and return once `shutdown` is set.
    pub fn with_parts(
        reconciler: Arc<Reconciler>,
        observer: Arc<dyn ProxyObserver>,
        resync_period: Duration,
        watch_task: impl Future<Output = ()> + Send + 'static,
        notifications: mpsc::Receiver<()>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (phase, _) = watch::channel(ControllerPhase::Initializing);
        Self {
            reconciler,
            observer,
            resync_period,
            phase,
            watch_task: watch_task.boxed(),
            notifications,
            shutdown,
        }
    }

    /// Subscribes to phase changes.
    pub fn phase(&self) -> watch::Receiver<ControllerPhase> {
        self.phase.subscribe()
    }

    /// Runs until shutdown is requested and every task has finished.
    pub async fn run(self) -> Result<(), ControllerError> {
        let Controller {
            reconciler,
            observer,
            resync_period,
            phase,
            watch_task,
            mut notifications,
            mut shutdown,
        } = self;

        info!("Proxy Informer running (phase {})", ControllerPhase::Initializing);
        let mut tasks: Vec<(&str, JoinHandle<()>)> = vec![("watch", tokio::spawn(watch_task))];

        if wait_for_sync(observer.as_ref(), &mut notifications, &mut shutdown).await {
            transition(&phase, ControllerPhase::Running);

            tasks.push((
                "notification",
                tokio::spawn(notification_loop(reconciler.clone(), notifications, shutdown.clone())),
            ));
            tasks.push((
                "timer",
                tokio::spawn(timer_loop(reconciler, resync_period, shutdown.clone())),
            ));

            cancelled(&mut shutdown).await;
        }

        transition(&phase, ControllerPhase::Draining);

        let mut result = Ok(());
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!("{} task failed: {}", name, e);
                if result.is_ok() {
                    result = Err(ControllerError::Watch(format!("{} task failed: {}", name, e)));
                }
            }
        }

        transition(&phase, ControllerPhase::Stopped);
        result
    }
}

fn transition(phase: &watch::Sender<ControllerPhase>, next: ControllerPhase) {
    let previous = phase.send_replace(next);
    info!("Controller phase: {} -> {}", previous, next);
}

async fn kube_client(kubeconfig: Option<&Path>) -> Result<Client, ControllerError> {
    let config = match kubeconfig {
        Some(path) => {
            info!("Loading kubeconfig from {}", path.display());
            let kubeconfig = Kubeconfig::read_from(path)
                .map_err(|e| ControllerError::Kubeconfig(format!("{}: {}", path.display(), e)))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| ControllerError::Kubeconfig(format!("{}: {}", path.display(), e)))?
        }
        None => kube::Config::infer()
            .await
            .map_err(|e| ControllerError::Kubeconfig(e.to_string()))?,
    };

    Ok(Client::try_from(config)?)
}

/// Waits for the observer's initial list. Returns false if shutdown came
/// first.
async fn wait_for_sync(
    observer: &dyn ProxyObserver,
    notifications: &mut mpsc::Receiver<()>,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    loop {
        if observer.is_synced() {
            return true;
        }

        tokio::select! {
            biased;
            () = cancelled(shutdown) => return false,
            received = notifications.recv() => {
                if received.is_none() {
                    debug!("Watch ended before the cache synchronized");
                    cancelled(shutdown).await;
                    return false;
                }
            }
        }
    }
}

/// Runs the startup pass, then one pass per watch notification.
async fn notification_loop(
    reconciler: Arc<Reconciler>,
    mut notifications: mpsc::Receiver<()>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut source = TriggerSource::Startup;

    loop {
        tokio::select! {
            biased;
            () = cancelled(&mut shutdown) => break,
            () = reconciler.trigger(source) => {}
        }

        tokio::select! {
            biased;
            () = cancelled(&mut shutdown) => break,
            received = notifications.recv() => match received {
                Some(()) => source = TriggerSource::Notification,
                None => {
                    debug!("Notification channel closed");
                    cancelled(&mut shutdown).await;
                    break;
                }
            }
        }
    }

    debug!("Notification trigger stopped");
}

/// Runs one pass per resync period. The first tick is one period after start.
async fn timer_loop(reconciler: Arc<Reconciler>, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancelled(&mut shutdown) => break,
            _ = interval.tick() => {}
        }

        tokio::select! {
            biased;
            () = cancelled(&mut shutdown) => break,
            () = reconciler.trigger(TriggerSource::Timer) => {}
        }
    }

    debug!("Timer trigger stopped");
}
