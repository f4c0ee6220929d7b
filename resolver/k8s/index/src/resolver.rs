use crate::{
    cache::Cache,
    defaults,
    metrics::Metrics,
    mode::ActivationMode,
    namespace::NamespaceWatch,
    translate::{translate_egress_rule, translate_ingress_rule},
};
use anyhow::{anyhow, bail, Context, Result};
use ipnet::IpNet;
use netpol_resolver_core::{
    PodKey, PolicyUpdater, ResolvedPolicy, WorkloadId, WorkloadMeta, CONTAINER_NAME_TAG,
    DEFAULT_IP_KEY, INFRA_CONTAINER_NAME, NAMESPACE_TAG, POD_NAME_TAG, POD_NAMESPACE_TAG,
};
use netpol_resolver_k8s_api::{
    pods_matching_policy, rules_for_pod, ClusterApi, Event, Namespace, NetworkPolicy, Pod,
    ResourceExt,
};
use std::{collections::BTreeMap, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    /// The reserved system namespace, never subject to isolation.
    pub system_namespace: String,

    pub mode: ActivationMode,

    /// Networks that identity-free allow rules fan out over.
    pub enforcement_networks: Vec<IpNet>,
}

/// The top-level controller: tracks which namespaces are isolated, answers
/// policy lookups for newly observed workloads, and re-resolves workloads as
/// pods and policy objects change.
pub struct Resolver<A, U> {
    api: A,
    updater: U,
    config: Config,
    metrics: Metrics,
    cache: Cache,
    stop: CancellationToken,
}

// === impl Resolver ===

impl<A, U> Resolver<A, U>
where
    A: ClusterApi,
    U: PolicyUpdater,
{
    pub fn new(api: A, updater: U, config: Config, metrics: Metrics) -> Self {
        Self {
            api,
            updater,
            config,
            metrics,
            cache: Cache::default(),
            stop: CancellationToken::new(),
        }
    }

    /// Performs the initial namespace sync, then drives namespace activation
    /// from the namespace event stream until [`Resolver::stop`] is called,
    /// finally tearing down every remaining activation before returning.
    ///
    /// The initial sync is the one unrecoverable failure: without a namespace
    /// list there is no state to resolve against.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let namespaces = self
            .api
            .list_namespaces()
            .await
            .context("initial namespace sync failed")?;
        for ns in &namespaces {
            self.on_namespace_added(ns).await;
        }

        let mut rx = self.api.watch_namespaces();
        loop {
            let ev = tokio::select! {
                _ = self.stop.cancelled() => break,
                ev = rx.recv() => ev,
            };
            match ev {
                Event::Added(ns) => self.on_namespace_added(&ns).await,
                Event::Modified(ns) => self.on_namespace_modified(&ns).await,
                Event::Deleted(ns) => self.on_namespace_deleted(&ns).await,
            }
        }

        debug!("Draining namespace activations");
        for watch in self.cache.deactivate_all() {
            watch.shutdown().await;
            self.metrics.active_namespaces.dec();
        }
        Ok(())
    }

    /// Requests shutdown. `run` deactivates all namespaces before returning.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    pub fn namespace_is_active(&self, namespace: &str) -> bool {
        self.cache.namespace_is_active(namespace)
    }

    /// The pull path, invoked by the enforcement side on first sight of a new
    /// workload. Records the workload↔pod mapping and computes the policy.
    pub async fn resolve(&self, workload: WorkloadId, meta: &WorkloadMeta) -> Result<ResolvedPolicy> {
        // Only the container owning the pod's network namespace is policed;
        // siblings fall outside the policy domain.
        if meta.tag(CONTAINER_NAME_TAG) != Some(INFRA_CONTAINER_NAME) {
            info!(%workload, "Workload is not a pod's infra container; leaving unenforced");
            return Ok(defaults::unenforced());
        }
        let name = meta
            .tag(POD_NAME_TAG)
            .ok_or_else(|| anyhow!("workload metadata carries no pod name"))?;
        let namespace = meta
            .tag(POD_NAMESPACE_TAG)
            .ok_or_else(|| anyhow!("workload metadata carries no pod namespace"))?;
        self.cache.put(workload, PodKey::new(namespace, name));
        self.resolve_pod(namespace, name).await
    }

    /// Computes the policy for a pod from current orchestrator state. The
    /// result is rebuilt in full on every call, so repeated resolution of
    /// unchanged state is identical.
    pub async fn resolve_pod(&self, namespace: &str, name: &str) -> Result<ResolvedPolicy> {
        self.metrics.resolutions.inc();
        match self.resolve_pod_inner(namespace, name).await {
            Ok(policy) => Ok(policy),
            Err(error) => {
                self.metrics.resolution_errors.inc();
                Err(error)
            }
        }
    }

    async fn resolve_pod_inner(&self, namespace: &str, name: &str) -> Result<ResolvedPolicy> {
        info!(ns = %namespace, pod = %name, "Resolving policy");
        let pod = self
            .api
            .get_pod(namespace, name)
            .await
            .with_context(|| format!("failed to fetch pod {namespace}/{name}"))?;

        // Without an address the pod cannot be enforced yet; the next pod
        // update carrying an address triggers re-resolution.
        let ip = match pod_ip(&pod) {
            Some(ip) => ip.to_string(),
            None => {
                debug!(ns = %namespace, pod = %name, "Pod has no address yet");
                return Ok(defaults::unenforced());
            }
        };
        if host_networked(&pod) {
            debug!(ns = %namespace, pod = %name, "Pod shares the host network; not isolated");
            return Ok(defaults::unenforced());
        }

        let mut identity_tags = pod.labels().clone();
        identity_tags.insert(NAMESPACE_TAG.to_string(), namespace.to_string());
        let ips = BTreeMap::from([(DEFAULT_IP_KEY.to_string(), ip)]);
        let key = PodKey::new(namespace, name);

        if !self.cache.namespace_is_active(namespace) {
            debug!(ns = %namespace, pod = %name, "Namespace is not isolated; allowing all");
            let policy =
                defaults::allow_all(identity_tags, ips, &self.config.enforcement_networks);
            self.cache.record_applied_labels(&key, pod.labels());
            return Ok(policy);
        }

        let mirror = self
            .cache
            .policy_mirror(namespace)
            .ok_or_else(|| anyhow!("active namespace {namespace} has no policy mirror"))?;
        let policies = {
            let mirror = mirror.read();
            let mut policies: Vec<NetworkPolicy> = mirror.values().cloned().collect();
            policies.sort_by_key(|p| p.name_any());
            policies
        };
        let (ingress_rules, egress_rules) = rules_for_pod(&policies, &pod)?;

        let all_namespaces = self
            .api
            .list_namespaces()
            .await
            .context("failed to list namespaces")?;

        let mut resolved = ResolvedPolicy {
            identity_tags,
            ips,
            ..Default::default()
        };
        for rule in &ingress_rules {
            let translated = translate_ingress_rule(
                rule,
                namespace,
                &all_namespaces,
                &self.config.enforcement_networks,
            )?;
            resolved.ingress_selectors.extend(translated.selectors);
            resolved.ingress_acls.extend(translated.acls);
        }
        for rule in &egress_rules {
            let translated = translate_egress_rule(
                rule,
                namespace,
                &all_namespaces,
                &self.config.enforcement_networks,
            )?;
            resolved.egress_selectors.extend(translated.selectors);
            resolved.egress_acls.extend(translated.acls);
        }

        self.cache.record_applied_labels(&key, pod.labels());
        Ok(resolved)
    }

    /// Re-resolves a pod and pushes the result, keyed by the cached workload
    /// identity. Returns false when the pod has no cached identity, which is
    /// expected before the enforcement side first resolves the workload.
    async fn reconcile_pod(&self, namespace: &str, name: &str) -> Result<bool> {
        let key = PodKey::new(namespace, name);
        let workload = match self.cache.workload_for(&key) {
            Some(workload) => workload,
            None => return Ok(false),
        };
        let policy = self.resolve_pod(namespace, name).await?;
        self.metrics.policy_updates.inc();
        if let Err(error) = self.updater.update_policy(&workload, policy).await {
            self.metrics.policy_update_errors.inc();
            return Err(error.context(format!("failed to push policy for {key}")));
        }
        Ok(true)
    }

    pub(crate) async fn on_pod_added(&self, pod: &Pod) -> Result<()> {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        debug!(ns = %namespace, pod = %name, "Pod added");
        if !self.reconcile_pod(&namespace, &name).await? {
            debug!(ns = %namespace, pod = %name, "Pod has no resolved workload yet; skipping");
        }
        Ok(())
    }

    pub(crate) async fn on_pod_modified(&self, old: Option<&Pod>, new: &Pod) -> Result<()> {
        let namespace = new.namespace().unwrap_or_default();
        let name = new.name_any();
        if let Some(old) = old {
            // Every resolution is a full rebuild; skip updates that change
            // neither the address nor the label set.
            if !policy_update_needed(old, new) {
                debug!(ns = %namespace, pod = %name, "Pod update is a no-op for policy");
                return Ok(());
            }
        }
        if !self.reconcile_pod(&namespace, &name).await? {
            warn!(ns = %namespace, pod = %name, "Dropping update for pod with no cached workload identity");
        }
        Ok(())
    }

    pub(crate) fn on_pod_deleted(&self, pod: &Pod) {
        let namespace = pod.namespace().unwrap_or_default();
        let name = pod.name_any();
        // The enforcement side tears down the workload's data path on its own
        // delete notification; only the mapping is dropped here.
        match self.cache.remove(&PodKey::new(&*namespace, &*name)) {
            Some(workload) => {
                debug!(ns = %namespace, pod = %name, %workload, "Pod removed from cache")
            }
            None => debug!(ns = %namespace, pod = %name, "Pod was already absent from the cache"),
        }
    }

    /// Re-resolves every local pod whose effective policy the object could
    /// affect. Individual failures do not abort the batch; they are reported
    /// in aggregate.
    pub(crate) async fn on_policy_changed(&self, policy: &NetworkPolicy) -> Result<()> {
        let namespace = policy.namespace().unwrap_or_default();
        debug!(ns = %namespace, policy = %policy.name_any(), "Policy object changed");
        let pods = self
            .api
            .list_local_pods(&namespace)
            .await
            .with_context(|| format!("failed to list pods in {namespace}"))?;
        let affected = pods_matching_policy(policy, &pods)?;
        let total = affected.len();
        let mut failed = 0usize;
        for pod in affected {
            let name = pod.name_any();
            match self.reconcile_pod(&namespace, &name).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(ns = %namespace, pod = %name, "Dropping update for pod with no cached workload identity")
                }
                Err(error) => {
                    failed += 1;
                    warn!(%error, ns = %namespace, pod = %name, "Failed to re-resolve pod");
                }
            }
        }
        if failed > 0 {
            bail!("{failed} of {total} affected pods failed to re-resolve");
        }
        Ok(())
    }

    pub(crate) async fn on_namespace_added(self: &Arc<Self>, ns: &Namespace) {
        let name = ns.name_any();
        if self.cache.namespace_is_active(&name) {
            debug!(ns = %name, "Namespace already active");
            return;
        }
        if self.config.mode.activates(ns, &self.config.system_namespace) {
            self.activate_namespace(&name).await;
        }
    }

    pub(crate) async fn on_namespace_modified(self: &Arc<Self>, ns: &Namespace) {
        let name = ns.name_any();
        let wanted = self.config.mode.activates(ns, &self.config.system_namespace);
        match (wanted, self.cache.namespace_is_active(&name)) {
            (true, false) => {
                info!(ns = %name, "Namespace became isolated");
                self.activate_namespace(&name).await;
            }
            (false, true) => {
                info!(ns = %name, "Namespace is no longer isolated");
                self.deactivate_namespace(&name).await;
            }
            _ => {}
        }
    }

    pub(crate) async fn on_namespace_deleted(&self, ns: &Namespace) {
        self.deactivate_namespace(&ns.name_any()).await;
    }

    async fn activate_namespace(self: &Arc<Self>, namespace: &str) {
        info!(ns = %namespace, "Activating namespace");
        let watch = NamespaceWatch::spawn(namespace, self.clone());
        self.cache.activate_namespace(namespace, watch);
        self.metrics.active_namespaces.inc();
        // The watch carries no historical replay; reconcile pre-existing pods
        // now so none is left on its unisolated policy.
        self.sync_namespace(namespace).await;
    }

    async fn sync_namespace(&self, namespace: &str) {
        let pods = match self.api.list_local_pods(namespace).await {
            Ok(pods) => pods,
            Err(error) => {
                warn!(%error, ns = %namespace, "Failed to list pods for activation sync");
                return;
            }
        };
        for pod in &pods {
            let name = pod.name_any();
            match self.reconcile_pod(namespace, &name).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(ns = %namespace, pod = %name, "Pod has no resolved workload yet; skipping")
                }
                Err(error) => {
                    warn!(%error, ns = %namespace, pod = %name, "Activation sync failed for pod")
                }
            }
        }
    }

    pub(crate) async fn deactivate_namespace(&self, namespace: &str) {
        match self.cache.deactivate_namespace(namespace) {
            Some(watch) => {
                info!(ns = %namespace, "Deactivating namespace");
                watch.shutdown().await;
                self.metrics.active_namespaces.dec();
            }
            None => debug!(ns = %namespace, "Namespace was not active"),
        }
    }

    pub(crate) fn api(&self) -> &A {
        &self.api
    }

    #[cfg(test)]
    pub(crate) fn cache(&self) -> &Cache {
        &self.cache
    }

    #[cfg(test)]
    pub(crate) fn metrics(&self) -> &Metrics {
        &self.metrics
    }
}

fn pod_ip(pod: &Pod) -> Option<&str> {
    pod.status
        .as_ref()?
        .pod_ip
        .as_deref()
        .filter(|ip| !ip.is_empty())
}

fn host_networked(pod: &Pod) -> bool {
    if pod
        .spec
        .as_ref()
        .and_then(|spec| spec.host_network)
        .unwrap_or(false)
    {
        return true;
    }
    // Older API objects may not carry the flag; a pod whose address equals the
    // node address is host-networked.
    match pod.status.as_ref() {
        Some(status) => match (status.pod_ip.as_deref(), status.host_ip.as_deref()) {
            (Some(pod_ip), Some(host_ip)) => pod_ip == host_ip,
            _ => false,
        },
        None => false,
    }
}

fn policy_update_needed(old: &Pod, new: &Pod) -> bool {
    let old_ip = old.status.as_ref().and_then(|s| s.pod_ip.as_deref());
    let new_ip = new.status.as_ref().and_then(|s| s.pod_ip.as_deref());
    old_ip != new_ip || old.labels() != new.labels()
}
