use prometheus_client::{
    metrics::{counter::Counter, gauge::Gauge},
    registry::Registry,
};

/// Resolver metrics, registered on the admin server's registry.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub(crate) resolutions: Counter,
    pub(crate) resolution_errors: Counter,
    pub(crate) policy_updates: Counter,
    pub(crate) policy_update_errors: Counter,
    pub(crate) active_namespaces: Gauge,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();

        prom.register(
            "resolutions",
            "Count of policy resolutions",
            metrics.resolutions.clone(),
        );
        prom.register(
            "resolution_errors",
            "Count of policy resolutions that failed",
            metrics.resolution_errors.clone(),
        );
        prom.register(
            "policy_updates",
            "Count of policy pushes to the enforcement collaborator",
            metrics.policy_updates.clone(),
        );
        prom.register(
            "policy_update_errors",
            "Count of policy pushes rejected by the enforcement collaborator",
            metrics.policy_update_errors.clone(),
        );
        prom.register(
            "active_namespaces",
            "Number of namespaces currently under isolation enforcement",
            metrics.active_namespaces.clone(),
        );

        metrics
    }
}
