//! Reconciliation logic for validator proxies.
//!
//! A pass ensures the validator proxy configuration matches the proxies we
//! discover:
//! 1. Get the proxies configured on the validator
//! 2. Get the proxies discovered on Kubernetes
//! 3. Calculate proxies to remove from and to add to the validator
//! 4. Remove proxies, then add proxies
//!
//! Nothing is carried between passes, so any call that fails is retried by
//! the next pass.

use crate::discovery::Discovery;
use crate::error::ControllerError;
use crate::observer::ProxyObserver;
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator_client::{Proxy, ValidatorClientTrait};

/// Changes needed to make the validator match the discovered proxies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    /// Configured on the validator but no longer discovered
    pub to_remove: Vec<Proxy>,
    /// Discovered but not configured on the validator
    pub to_add: Vec<Proxy>,
}

impl Diff {
    /// Set differences by structural equality of `(internal, external)`,
    /// keeping input order.
    pub fn compute(configured: &[Proxy], current: &[Proxy]) -> Self {
        let configured_set: HashSet<&Proxy> = configured.iter().collect();
        let current_set: HashSet<&Proxy> = current.iter().collect();

        Self {
            to_remove: configured.iter().filter(|p| !current_set.contains(p)).cloned().collect(),
            to_add: current.iter().filter(|p| !configured_set.contains(p)).cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_remove.is_empty() && self.to_add.is_empty()
    }
}

/// Outcome of one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub configured: usize,
    pub current: usize,
    pub removed: usize,
    pub added: usize,
    /// Calls the validator answered with `false`
    pub rejected: usize,
    /// Calls that returned an error
    pub failed: usize,
}

/// What caused a pass to be requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Startup,
    Notification,
    Timer,
}

impl fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Startup => write!(f, "startup"),
            Self::Notification => write!(f, "notification"),
            Self::Timer => write!(f, "timer"),
        }
    }
}

/// Clears the in-flight flag even if the pass future is dropped mid-apply.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Reconciles the validator's proxy configuration.
pub struct Reconciler {
    validator: Arc<dyn ValidatorClientTrait>,
    observer: Arc<dyn ProxyObserver>,
    discovery: Discovery,
    running: AtomicBool,
    pending: AtomicBool,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        validator: Arc<dyn ValidatorClientTrait>,
        observer: Arc<dyn ProxyObserver>,
        discovery: Discovery,
    ) -> Self {
        Self {
            validator,
            observer,
            discovery,
            running: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    /// Requests a pass, running at most one at a time.
    ///
    /// If a pass is already in flight this only marks a rerun as pending and
    /// returns; the caller that owns the in-flight pass runs it once the
    /// current pass finishes. Pass errors are logged here.
    pub async fn trigger(&self, source: TriggerSource) {
        self.pending.store(true, Ordering::SeqCst);

        loop {
            if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                debug!("Reconciliation in flight, coalescing {} trigger", source);
                return;
            }
            let guard = InFlight(&self.running);

            while self.pending.swap(false, Ordering::SeqCst) {
                debug!("Reconciling validator proxies ({})", source);
                match self.reconcile().await {
                    Ok(report) if report.failed > 0 || report.rejected > 0 => {
                        warn!("Reconciliation finished with {} failed and {} rejected calls, will retry", report.failed, report.rejected);
                    }
                    Ok(report) => debug!(
                        "Reconciliation done: {} configured, {} discovered, {} removed, {} added",
                        report.configured, report.current, report.removed, report.added
                    ),
                    Err(e) => warn!("Reconciliation aborted: {}", e),
                }
            }

            drop(guard);
            if !self.pending.load(Ordering::SeqCst) {
                return;
            }
        }
    }

    /// Runs one pass.
    ///
    /// Aborts without touching the validator when either side cannot be
    /// read. Individual add/remove failures are logged and counted; the
    /// remaining calls are still attempted.
    pub async fn reconcile(&self) -> Result<ReconcileReport, ControllerError> {
        let configured = self.validator.get_configured_proxies().await?;
        let current = self.discovery.current_proxies(self.observer.as_ref()).await?;
        let diff = Diff::compute(&configured, &current);

        let mut report = ReconcileReport {
            configured: configured.len(),
            current: current.len(),
            ..ReconcileReport::default()
        };

        if diff.is_empty() {
            debug!("Validator proxy configuration is up to date ({} proxies)", current.len());
            return Ok(report);
        }

        info!(
            "Synchronizing validator proxies: {} configured, {} discovered, {} to remove, {} to add",
            configured.len(),
            current.len(),
            diff.to_remove.len(),
            diff.to_add.len()
        );

        // Remove first. The validator returns success but keeps its existing
        // entry when we add a proxy that shares a node ID with a configured
        // one, so a replaced proxy must be gone before its successor is added.
        for proxy in &diff.to_remove {
            info!("Removing proxy: {}", proxy);
            match self.validator.remove_proxy(&proxy.internal_enode_url).await {
                Ok(true) => report.removed += 1,
                Ok(false) => {
                    warn!("Validator did not remove proxy: {}", proxy);
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!("Failed to remove proxy from validator: {} {}", proxy, e);
                    report.failed += 1;
                }
            }
        }

        for proxy in &diff.to_add {
            info!("Adding proxy: {}", proxy);
            match self.validator.add_proxy(&proxy.internal_enode_url, &proxy.external_enode_url).await {
                Ok(true) => report.added += 1,
                Ok(false) => {
                    warn!("Validator did not add proxy: {}", proxy);
                    report.rejected += 1;
                }
                Err(e) => {
                    warn!("Failed to add proxy to validator: {} {}", proxy, e);
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnnotationKeys;
    use crate::enode::EnodeCodec;
    use crate::test_utils::{proxy_annotations, StaticObserver, StaticResolver};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use validator_client::{MockValidatorClient, ValidatorCall, ValidatorError};

    const A_IN: &str = "enode://A@10.0.0.1:30303";
    const A_EXT: &str = "enode://A@1.2.3.4:30303";
    const B_IN: &str = "enode://B@10.0.0.2:30503";
    const B_EXT: &str = "enode://B@1.2.3.5:30303";

    fn discovery() -> Discovery {
        let codec = EnodeCodec::with_resolver(Arc::new(StaticResolver::default()), Duration::from_secs(1));
        Discovery::new(codec, AnnotationKeys::default())
    }

    fn setup() -> (Reconciler, MockValidatorClient, Arc<StaticObserver>) {
        let validator = MockValidatorClient::new("http://validator:8545");
        let observer = Arc::new(StaticObserver::synced());
        let reconciler = Reconciler::new(Arc::new(validator.clone()), observer.clone(), discovery());
        (reconciler, validator, observer)
    }

    #[test]
    fn test_diff_set_differences() {
        let a = Proxy::new(A_IN, A_EXT);
        let b = Proxy::new(B_IN, B_EXT);
        let c = Proxy::new("enode://C@10.0.0.3:30503", "enode://C@1.2.3.6:30303");

        let diff = Diff::compute(&[a.clone(), b.clone()], &[b.clone(), c.clone()]);

        assert_eq!(diff.to_remove, vec![a]);
        assert_eq!(diff.to_add, vec![c]);
    }

    #[test]
    fn test_diff_is_structural() {
        let configured = Proxy::new(A_IN, A_EXT);
        let moved = Proxy::new(A_IN, "enode://A@5.6.7.8:30303");

        let diff = Diff::compute(&[configured.clone()], &[moved.clone()]);

        assert_eq!(diff.to_remove, vec![configured]);
        assert_eq!(diff.to_add, vec![moved]);
    }

    #[test]
    fn test_diff_of_equal_sets_is_empty() {
        let proxies = vec![Proxy::new(A_IN, A_EXT), Proxy::new(B_IN, B_EXT)];
        let reversed: Vec<Proxy> = proxies.iter().rev().cloned().collect();
        assert!(Diff::compute(&proxies, &reversed).is_empty());
    }

    #[tokio::test]
    async fn test_stale_proxy_is_removed() {
        let (reconciler, validator, _observer) = setup();
        validator.set_proxies(vec![Proxy::new(A_IN, A_EXT)]);

        let report = reconciler.reconcile().await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.added, 0);
        assert_eq!(validator.mutations(), vec![ValidatorCall::RemoveProxy { internal: A_IN.to_string() }]);
        assert!(validator.proxies().is_empty());
    }

    #[tokio::test]
    async fn test_new_proxy_is_added() {
        let (reconciler, validator, observer) = setup();
        observer.put("default/proxy-b", proxy_annotations(Some(B_IN), Some(B_EXT)));

        let report = reconciler.reconcile().await.unwrap();

        assert_eq!(report.added, 1);
        assert_eq!(
            validator.mutations(),
            vec![ValidatorCall::AddProxy { internal: B_IN.to_string(), external: B_EXT.to_string() }]
        );
    }

    #[tokio::test]
    async fn test_second_pass_is_noop() {
        let (reconciler, validator, observer) = setup();
        validator.set_proxies(vec![Proxy::new(A_IN, A_EXT)]);
        observer.put("default/proxy-b", proxy_annotations(Some(B_IN), Some(B_EXT)));

        reconciler.reconcile().await.unwrap();
        validator.clear_calls();
        let report = reconciler.reconcile().await.unwrap();

        assert_eq!(report, ReconcileReport { configured: 1, current: 1, ..ReconcileReport::default() });
        assert!(validator.mutations().is_empty());
        assert_eq!(validator.proxies(), vec![Proxy::new(B_IN, B_EXT)]);
    }

    #[tokio::test]
    async fn test_replaced_proxy_is_removed_before_added() {
        let (reconciler, validator, observer) = setup();
        let new_ext = "enode://A@5.6.7.8:30303";
        validator.set_proxies(vec![Proxy::new(A_IN, A_EXT)]);
        observer.put("default/proxy-a", proxy_annotations(Some(A_IN), Some(new_ext)));

        reconciler.reconcile().await.unwrap();

        assert_eq!(
            validator.mutations(),
            vec![
                ValidatorCall::RemoveProxy { internal: A_IN.to_string() },
                ValidatorCall::AddProxy { internal: A_IN.to_string(), external: new_ext.to_string() },
            ]
        );
        // The mock ignores adds that collide on node ID, so this only holds
        // because the removal went first.
        assert_eq!(validator.proxies(), vec![Proxy::new(A_IN, new_ext)]);
    }

    #[tokio::test]
    async fn test_get_error_aborts_before_mutations() {
        let (reconciler, validator, observer) = setup();
        validator.set_get_error(Some((1, "not running".to_string())));
        observer.put("default/proxy-b", proxy_annotations(Some(B_IN), Some(B_EXT)));

        let err = reconciler.reconcile().await.unwrap_err();

        assert!(matches!(err, ControllerError::Validator(ValidatorError::Rpc { code: 1, .. })));
        assert!(validator.mutations().is_empty());

        // The next trigger starts from scratch
        validator.set_get_error(None);
        reconciler.reconcile().await.unwrap();
        assert_eq!(validator.proxies(), vec![Proxy::new(B_IN, B_EXT)]);
    }

    #[tokio::test]
    async fn test_unsynced_observer_aborts_pass() {
        let (reconciler, validator, observer) = setup();
        observer.set_synced(false);
        validator.set_proxies(vec![Proxy::new(A_IN, A_EXT)]);

        let err = reconciler.reconcile().await.unwrap_err();

        assert!(matches!(err, ControllerError::NotSynced));
        assert!(validator.mutations().is_empty());
        assert_eq!(validator.proxies().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_call_does_not_stop_the_pass() {
        let (reconciler, validator, observer) = setup();
        let c_in = "enode://C@10.0.0.3:30503";
        validator.set_proxies(vec![Proxy::new(A_IN, A_EXT), Proxy::new(c_in, "enode://C@1.2.3.6:30303")]);
        validator.fail_calls_for(A_IN);
        observer.put("default/proxy-b", proxy_annotations(Some(B_IN), Some(B_EXT)));

        let report = reconciler.reconcile().await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.added, 1);

        // Retried in full once the validator recovers
        validator.clear_failures();
        validator.clear_calls();
        reconciler.reconcile().await.unwrap();
        assert_eq!(validator.mutations(), vec![ValidatorCall::RemoveProxy { internal: A_IN.to_string() }]);
        assert_eq!(validator.proxies(), vec![Proxy::new(B_IN, B_EXT)]);
    }

    /// Validator whose `get_configured_proxies` blocks until a permit is added.
    struct GatedValidator {
        gate: Semaphore,
        calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl GatedValidator {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                calls: AtomicUsize::new(0),
                active: AtomicUsize::new(0),
                max_active: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl ValidatorClientTrait for GatedValidator {
        fn rpc_url(&self) -> &str {
            "http://gated:8545"
        }

        async fn get_configured_proxies(&self) -> Result<Vec<Proxy>, ValidatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            let permit = self.gate.acquire().await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if let Ok(permit) = permit {
                permit.forget();
            }
            Ok(Vec::new())
        }

        async fn add_proxy(&self, _internal: &str, _external: &str) -> Result<bool, ValidatorError> {
            Ok(true)
        }

        async fn remove_proxy(&self, _internal: &str) -> Result<bool, ValidatorError> {
            Ok(true)
        }
    }

    async fn wait_for_calls(validator: &GatedValidator, n: usize) {
        for _ in 0..200 {
            if validator.calls.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("validator never reached {n} calls");
    }

    #[tokio::test]
    async fn test_concurrent_triggers_coalesce() {
        let validator = Arc::new(GatedValidator::new());
        let reconciler = Arc::new(Reconciler::new(
            validator.clone(),
            Arc::new(StaticObserver::synced()),
            discovery(),
        ));

        let first = {
            let reconciler = reconciler.clone();
            tokio::spawn(async move { reconciler.trigger(TriggerSource::Timer).await })
        };
        wait_for_calls(&validator, 1).await;

        // Both return immediately while the first pass is blocked
        reconciler.trigger(TriggerSource::Notification).await;
        reconciler.trigger(TriggerSource::Notification).await;

        validator.gate.add_permits(2);
        first.await.unwrap();

        // One rerun covers both coalesced triggers
        assert_eq!(validator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(validator.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_abandoned_pass_releases_flight() {
        let validator = Arc::new(GatedValidator::new());
        let reconciler = Reconciler::new(validator.clone(), Arc::new(StaticObserver::synced()), discovery());

        let abandoned = tokio::time::timeout(Duration::from_millis(50), reconciler.trigger(TriggerSource::Timer)).await;
        assert!(abandoned.is_err());

        validator.gate.add_permits(1);
        reconciler.trigger(TriggerSource::Timer).await;
        assert_eq!(validator.calls.load(Ordering::SeqCst), 2);
    }
}
