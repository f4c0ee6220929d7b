use crate::labels::{InvalidSelector, Selector};
use k8s_openapi::api::{
    core::v1::Pod,
    networking::v1::{NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule},
};
use kube::ResourceExt;

const INGRESS_TYPE: &str = "Ingress";
const EGRESS_TYPE: &str = "Egress";

/// Filters `pods` down to those selected by the policy's pod selector.
pub fn pods_matching_policy<'p>(
    policy: &NetworkPolicy,
    pods: &'p [Pod],
) -> Result<Vec<&'p Pod>, InvalidSelector> {
    let selector = pod_selector(policy)?;
    Ok(pods
        .iter()
        .filter(|pod| selector.matches(pod.labels()))
        .collect())
}

/// Collects the ingress and egress rules of every policy that selects the
/// pod, honoring `policyTypes` defaulting: when the field is absent, a policy
/// is an ingress policy, and an egress policy only if it declares egress
/// rules.
pub fn rules_for_pod(
    policies: &[NetworkPolicy],
    pod: &Pod,
) -> Result<(Vec<NetworkPolicyIngressRule>, Vec<NetworkPolicyEgressRule>), InvalidSelector> {
    let mut ingress = Vec::new();
    let mut egress = Vec::new();
    for policy in policies {
        if !pod_selector(policy)?.matches(pod.labels()) {
            continue;
        }
        let spec = match policy.spec.as_ref() {
            Some(spec) => spec,
            None => continue,
        };
        let (has_ingress, has_egress) = match spec.policy_types.as_ref() {
            Some(types) => (
                types.iter().any(|t| t == INGRESS_TYPE),
                types.iter().any(|t| t == EGRESS_TYPE),
            ),
            None => (true, spec.egress.is_some()),
        };
        if has_ingress {
            ingress.extend(spec.ingress.iter().flatten().cloned());
        }
        if has_egress {
            egress.extend(spec.egress.iter().flatten().cloned());
        }
    }
    Ok((ingress, egress))
}

fn pod_selector(policy: &NetworkPolicy) -> Result<Selector, InvalidSelector> {
    policy
        .spec
        .as_ref()
        .map(|spec| Selector::try_from(&spec.pod_selector))
        .unwrap_or_else(|| Ok(Selector::default()))
}
