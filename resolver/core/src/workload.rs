use std::collections::BTreeMap;

/// Workload tag carrying the pod name.
pub const POD_NAME_TAG: &str = "io.kubernetes.pod.name";

/// Workload tag carrying the pod namespace.
pub const POD_NAMESPACE_TAG: &str = "io.kubernetes.pod.namespace";

/// Workload tag carrying the container name.
pub const CONTAINER_NAME_TAG: &str = "io.kubernetes.container.name";

/// Name of the infra container that owns a pod's network namespace. Only this
/// container is resolved against real policy; sibling containers inherit.
pub const INFRA_CONTAINER_NAME: &str = "POD";

/// Opaque handle assigned to a running workload by the enforcement side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkloadId(String);

/// Tags attached to a workload by the enforcement side, carrying its
/// orchestrator identity.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkloadMeta(BTreeMap<String, String>);

/// The natural orchestrator-side key for a workload.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PodKey {
    pub namespace: String,
    pub name: String,
}

// === impl WorkloadId ===

impl From<String> for WorkloadId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for WorkloadId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl AsRef<str> for WorkloadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// === impl WorkloadMeta ===

impl WorkloadMeta {
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }
}

impl From<BTreeMap<String, String>> for WorkloadMeta {
    fn from(tags: BTreeMap<String, String>) -> Self {
        Self(tags)
    }
}

impl FromIterator<(String, String)> for WorkloadMeta {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl FromIterator<(&'static str, &'static str)> for WorkloadMeta {
    fn from_iter<T: IntoIterator<Item = (&'static str, &'static str)>>(iter: T) -> Self {
        iter.into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

// === impl PodKey ===

impl PodKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl std::fmt::Display for PodKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
