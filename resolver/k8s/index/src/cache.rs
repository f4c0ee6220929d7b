use crate::namespace::{NamespaceWatch, PolicyMirror};
use ahash::AHashMap as HashMap;
use netpol_resolver_core::{PodKey, WorkloadId};
use parking_lot::Mutex;
use std::collections::BTreeMap;

/// The only state shared across event workers: the bidirectional
/// workload↔pod index and the namespace activation registry.
///
/// Every operation takes the single internal lock for a plain map operation
/// and nothing else; in particular, tearing down a namespace's watch tasks
/// happens on the handle *after* it has been removed here.
#[derive(Default)]
pub(crate) struct Cache {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    pods: HashMap<PodKey, PodEntry>,
    workloads: HashMap<WorkloadId, PodKey>,
    namespaces: HashMap<String, NamespaceWatch>,
}

struct PodEntry {
    workload: WorkloadId,
    last_applied_labels: BTreeMap<String, String>,
}

// === impl Cache ===

impl Cache {
    /// Inserts or overwrites the mapping for a pod, keeping the reverse index
    /// consistent with the forward one.
    pub(crate) fn put(&self, workload: WorkloadId, key: PodKey) {
        let mut inner = self.inner.lock();
        if let Some(prev_key) = inner.workloads.insert(workload.clone(), key.clone()) {
            if prev_key != key {
                inner.pods.remove(&prev_key);
            }
        }
        let entry = PodEntry {
            workload: workload.clone(),
            last_applied_labels: BTreeMap::new(),
        };
        if let Some(prev) = inner.pods.insert(key, entry) {
            if prev.workload != workload {
                inner.workloads.remove(&prev.workload);
            }
        }
    }

    pub(crate) fn workload_for(&self, key: &PodKey) -> Option<WorkloadId> {
        self.inner.lock().pods.get(key).map(|e| e.workload.clone())
    }

    /// Removes the pod's mapping in both directions, returning the workload
    /// identity that was mapped, if any, so double-deletes are observable.
    pub(crate) fn remove(&self, key: &PodKey) -> Option<WorkloadId> {
        let mut inner = self.inner.lock();
        let entry = inner.pods.remove(key)?;
        inner.workloads.remove(&entry.workload);
        Some(entry.workload)
    }

    /// Records the labels a computed policy was based on. Returns false if the
    /// pod has no cache entry.
    pub(crate) fn record_applied_labels(
        &self,
        key: &PodKey,
        labels: &BTreeMap<String, String>,
    ) -> bool {
        match self.inner.lock().pods.get_mut(key) {
            Some(entry) => {
                entry.last_applied_labels = labels.clone();
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub(crate) fn applied_labels(&self, key: &PodKey) -> Option<BTreeMap<String, String>> {
        self.inner
            .lock()
            .pods
            .get(key)
            .map(|e| e.last_applied_labels.clone())
    }

    pub(crate) fn activate_namespace(&self, namespace: &str, watch: NamespaceWatch) {
        self.inner
            .lock()
            .namespaces
            .insert(namespace.to_string(), watch);
    }

    /// Removes the namespace's activation, handing the watch handle back so
    /// the caller can await its termination without holding the lock.
    pub(crate) fn deactivate_namespace(&self, namespace: &str) -> Option<NamespaceWatch> {
        self.inner.lock().namespaces.remove(namespace)
    }

    pub(crate) fn namespace_is_active(&self, namespace: &str) -> bool {
        self.inner.lock().namespaces.contains_key(namespace)
    }

    pub(crate) fn policy_mirror(&self, namespace: &str) -> Option<PolicyMirror> {
        self.inner
            .lock()
            .namespaces
            .get(namespace)
            .map(|watch| watch.policies())
    }

    pub(crate) fn deactivate_all(&self) -> Vec<NamespaceWatch> {
        let mut inner = self.inner.lock();
        inner.namespaces.drain().map(|(_, watch)| watch).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    #[test]
    fn put_then_lookup_then_remove() {
        let cache = Cache::default();
        let key = PodKey::new("default", "client");
        cache.put("w-1".into(), key.clone());
        assert_eq!(cache.workload_for(&key), Some("w-1".into()));
        assert_eq!(cache.remove(&key), Some("w-1".into()));
        assert_eq!(cache.workload_for(&key), None);
        // The second delete is a visible no-op.
        assert_eq!(cache.remove(&key), None);
    }

    #[test]
    fn put_overwrites_and_keeps_indexes_in_sync() {
        let cache = Cache::default();
        let key = PodKey::new("default", "client");
        cache.put("w-1".into(), key.clone());
        cache.put("w-2".into(), key.clone());
        assert_eq!(cache.workload_for(&key), Some("w-2".into()));

        // Re-pointing a workload at a new pod drops the old pod's entry.
        let moved = PodKey::new("default", "client-2");
        cache.put("w-2".into(), moved.clone());
        assert_eq!(cache.workload_for(&key), None);
        assert_eq!(cache.workload_for(&moved), Some("w-2".into()));
    }

    #[test]
    fn applied_labels_round_trip() {
        let cache = Cache::default();
        let key = PodKey::new("default", "client");
        let labels = btreemap! { "app".to_string() => "api".to_string() };

        assert!(!cache.record_applied_labels(&key, &labels));
        assert_eq!(cache.applied_labels(&key), None);

        cache.put("w-1".into(), key.clone());
        assert_eq!(cache.applied_labels(&key), Some(BTreeMap::new()));
        assert!(cache.record_applied_labels(&key, &labels));
        assert_eq!(cache.applied_labels(&key), Some(labels));
    }
}
