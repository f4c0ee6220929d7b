use crate::resolver::Resolver;
use ahash::AHashMap as HashMap;
use netpol_resolver_core::PolicyUpdater;
use netpol_resolver_k8s_api::{ClusterApi, Event, NetworkPolicy, Pod, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

/// The latest known policy objects of a namespace, mirrored locally so the
/// resolution path can read them without a network call. Written only by the
/// namespace's own policy worker.
pub(crate) type PolicyMirror = Arc<RwLock<HashMap<String, NetworkPolicy>>>;

/// Owns one active namespace's pod and policy subscriptions.
pub(crate) struct NamespaceWatch {
    policies: PolicyMirror,
    pod_task: WatchTask,
    policy_task: WatchTask,
}

struct WatchTask {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

// === impl NamespaceWatch ===

impl NamespaceWatch {
    /// Starts the pod and policy workers for the namespace. Each owns its own
    /// cancellation signal.
    pub(crate) fn spawn<A, U>(namespace: &str, resolver: Arc<Resolver<A, U>>) -> Self
    where
        A: ClusterApi,
        U: PolicyUpdater,
    {
        let policies = PolicyMirror::default();

        let pod_task = {
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let resolver = resolver.clone();
            let ns = namespace.to_string();
            let task = tokio::spawn(
                pod_loop(ns, resolver, token).instrument(info_span!("pods", ns = %namespace)),
            );
            WatchTask { cancel, task }
        };

        let policy_task = {
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            let mirror = policies.clone();
            let ns = namespace.to_string();
            let task = tokio::spawn(
                policy_loop(ns, resolver, mirror, token)
                    .instrument(info_span!("networkpolicies", ns = %namespace)),
            );
            WatchTask { cancel, task }
        };

        Self {
            policies,
            pod_task,
            policy_task,
        }
    }

    pub(crate) fn policies(&self) -> PolicyMirror {
        self.policies.clone()
    }

    /// Cancels both subscriptions and does not return until both workers have
    /// stopped consuming events, so the namespace can be re-activated
    /// immediately afterward without event duplication.
    pub(crate) async fn shutdown(self) {
        self.pod_task.stop().await;
        self.policy_task.stop().await;
    }
}

// === impl WatchTask ===

impl WatchTask {
    async fn stop(self) {
        self.cancel.cancel();
        if let Err(error) = self.task.await {
            if error.is_panic() {
                warn!(%error, "Watch worker panicked");
            }
        }
    }
}

async fn pod_loop<A, U>(namespace: String, resolver: Arc<Resolver<A, U>>, cancel: CancellationToken)
where
    A: ClusterApi,
    U: PolicyUpdater,
{
    let mut rx = resolver.api().watch_pods(&namespace);
    // Previous version of each pod, so modifications carry an old/new pair.
    let mut pods: HashMap<String, Pod> = HashMap::default();
    loop {
        let ev = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stopping pod watch");
                return;
            }
            ev = rx.recv() => ev,
        };
        match ev {
            Event::Added(pod) => {
                let name = pod.name_any();
                pods.insert(name.clone(), pod.clone());
                if let Err(error) = resolver.on_pod_added(&pod).await {
                    warn!(%error, pod = %name, "Failed to reconcile added pod");
                }
            }
            Event::Modified(pod) => {
                let name = pod.name_any();
                let old = pods.insert(name.clone(), pod.clone());
                if let Err(error) = resolver.on_pod_modified(old.as_ref(), &pod).await {
                    warn!(%error, pod = %name, "Failed to reconcile modified pod");
                }
            }
            Event::Deleted(pod) => {
                pods.remove(&pod.name_any());
                resolver.on_pod_deleted(&pod);
            }
        }
    }
}

async fn policy_loop<A, U>(
    namespace: String,
    resolver: Arc<Resolver<A, U>>,
    mirror: PolicyMirror,
    cancel: CancellationToken,
) where
    A: ClusterApi,
    U: PolicyUpdater,
{
    let mut rx = resolver.api().watch_policies(&namespace);
    loop {
        let ev = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Stopping policy watch");
                return;
            }
            ev = rx.recv() => ev,
        };
        // The mirror must reflect the event before any pod is re-resolved.
        let policy = match ev {
            Event::Added(policy) | Event::Modified(policy) => {
                mirror.write().insert(policy.name_any(), policy.clone());
                policy
            }
            Event::Deleted(policy) => {
                mirror.write().remove(&policy.name_any());
                policy
            }
        };
        if let Err(error) = resolver.on_policy_changed(&policy).await {
            // A failed push leaves the affected workload on its previous
            // policy until the next reconciliation; the worker keeps going.
            warn!(%error, policy = %policy.name_any(), "Policy reconciliation failed");
        }
    }
}
