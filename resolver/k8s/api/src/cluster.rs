use crate::watch::Watch;
use anyhow::Result;
use k8s_openapi::api::{core::v1::Namespace, core::v1::Pod, networking::v1::NetworkPolicy};
use kube::{
    api::{Api, ListParams},
    runtime::watcher,
};
use tracing::info_span;

/// The orchestrator collaborator: list/get/watch primitives scoped to the
/// local node where relevant.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>>;

    /// Pods of the namespace scheduled on the local node.
    async fn list_local_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    fn watch_namespaces(&self) -> Watch<Namespace>;

    fn watch_pods(&self, namespace: &str) -> Watch<Pod>;

    fn watch_policies(&self, namespace: &str) -> Watch<NetworkPolicy>;
}

#[async_trait::async_trait]
impl<T: ClusterApi> ClusterApi for std::sync::Arc<T> {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        self.as_ref().list_namespaces().await
    }

    async fn list_local_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        self.as_ref().list_local_pods(namespace).await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.as_ref().get_pod(namespace, name).await
    }

    fn watch_namespaces(&self) -> Watch<Namespace> {
        self.as_ref().watch_namespaces()
    }

    fn watch_pods(&self, namespace: &str) -> Watch<Pod> {
        self.as_ref().watch_pods(namespace)
    }

    fn watch_policies(&self, namespace: &str) -> Watch<NetworkPolicy> {
        self.as_ref().watch_policies(namespace)
    }
}

/// [`ClusterApi`] backed by a `kube::Client`.
#[derive(Clone)]
pub struct KubeCluster {
    client: kube::Client,
    node: String,
}

// === impl KubeCluster ===

impl KubeCluster {
    /// Limits the amount of time a watch can be idle before being reset.
    ///
    /// Must be less than 295 or Kubernetes throws an error.
    const WATCH_TIMEOUT_SECS: u32 = 290;

    pub fn new(client: kube::Client, node: impl Into<String>) -> Self {
        Self {
            client,
            node: node.into(),
        }
    }

    fn node_fields(&self) -> String {
        format!("spec.nodeName={}", self.node)
    }

    fn watch_config(&self) -> watcher::Config {
        watcher::Config::default().timeout(Self::WATCH_TIMEOUT_SECS)
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    async fn list_namespaces(&self) -> Result<Vec<Namespace>> {
        let api = Api::<Namespace>::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_local_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(&self.node_fields());
        Ok(api.list(&params).await?.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    fn watch_namespaces(&self) -> Watch<Namespace> {
        let api = Api::<Namespace>::all(self.client.clone());
        Watch::from(watcher(api, self.watch_config())).instrument(info_span!("namespaces"))
    }

    fn watch_pods(&self, namespace: &str) -> Watch<Pod> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        let config = self.watch_config().fields(&self.node_fields());
        Watch::from(watcher(api, config)).instrument(info_span!("pods", ns = %namespace))
    }

    fn watch_policies(&self, namespace: &str) -> Watch<NetworkPolicy> {
        let api = Api::<NetworkPolicy>::namespaced(self.client.clone(), namespace);
        Watch::from(watcher(api, self.watch_config()))
            .instrument(info_span!("networkpolicies", ns = %namespace))
    }
}
