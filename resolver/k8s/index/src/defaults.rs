use ipnet::IpNet;
use netpol_resolver_core::{
    Action, IpRule, KeyValueOperator, Operator, PortRange, Protocol, ResolvedPolicy, TagSelector,
    NAMESPACE_TAG,
};
use std::collections::BTreeMap;

/// The policy applied to workloads in namespaces without isolation intent:
/// every flow is permitted, but the workload still carries its identity tags
/// so peers in isolated namespaces can match it.
pub fn allow_all(
    identity_tags: BTreeMap<String, String>,
    ips: BTreeMap<String, String>,
    networks: &[IpNet],
) -> ResolvedPolicy {
    let acls: Vec<IpRule> = networks
        .iter()
        .flat_map(|&net| {
            [Protocol::Tcp, Protocol::Udp].map(|protocol| IpRule {
                net,
                ports: PortRange::ALL,
                protocol,
                action: Action::Accept,
            })
        })
        .collect();
    ResolvedPolicy {
        ingress_selectors: vec![unrestricted_selector()],
        egress_selectors: vec![unrestricted_selector()],
        ingress_acls: acls.clone(),
        egress_acls: acls,
        identity_tags,
        ips,
    }
}

/// The policy for workloads outside the policy domain (sidecar containers,
/// host-networked pods, pods with no address yet). It carries nothing at all,
/// signaling the enforcement side to apply its own default.
pub fn unenforced() -> ResolvedPolicy {
    ResolvedPolicy::default()
}

fn unrestricted_selector() -> TagSelector {
    TagSelector {
        clause: vec![KeyValueOperator::new(
            NAMESPACE_TAG,
            Operator::KeyExists,
            ["*"],
        )],
        action: Action::Accept,
    }
}
