use crate::{network::IpRule, selector::TagSelector, workload::WorkloadId};
use anyhow::Result;
use std::collections::BTreeMap;

/// Key under which a workload's primary address is recorded in
/// [`ResolvedPolicy::ips`].
pub const DEFAULT_IP_KEY: &str = "default";

/// The complete access-control policy computed for one workload.
///
/// A policy is always regenerated from current orchestrator state, never
/// patched in place. A policy with no selectors and no ACLs but populated
/// identity tags denies everything not explicitly permitted; a policy that is
/// entirely empty signals that the workload is outside the policy domain and
/// the enforcement side should apply its own default.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolvedPolicy {
    pub ingress_selectors: Vec<TagSelector>,
    pub egress_selectors: Vec<TagSelector>,
    pub ingress_acls: Vec<IpRule>,
    pub egress_acls: Vec<IpRule>,
    pub identity_tags: BTreeMap<String, String>,
    pub ips: BTreeMap<String, String>,
}

/// Models the enforcement collaborator that applies resolved policies.
#[async_trait::async_trait]
pub trait PolicyUpdater: Send + Sync + 'static {
    async fn update_policy(&self, workload: &WorkloadId, policy: ResolvedPolicy) -> Result<()>;
}

#[async_trait::async_trait]
impl<T: PolicyUpdater> PolicyUpdater for std::sync::Arc<T> {
    async fn update_policy(&self, workload: &WorkloadId, policy: ResolvedPolicy) -> Result<()> {
        self.as_ref().update_policy(workload, policy).await
    }
}
