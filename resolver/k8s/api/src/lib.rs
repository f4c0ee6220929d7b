#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
mod matching;
mod watch;

mod cluster;

pub use self::{
    cluster::{ClusterApi, KubeCluster},
    labels::Selector,
    matching::{pods_matching_policy, rules_for_pod},
    watch::{Event, Watch},
};
pub use k8s_openapi::{
    api::{
        core::v1::{Namespace, Pod, PodSpec, PodStatus},
        networking::v1::{
            IPBlock, NetworkPolicy, NetworkPolicyEgressRule, NetworkPolicyIngressRule,
            NetworkPolicyPeer, NetworkPolicyPort, NetworkPolicySpec,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, LabelSelectorRequirement},
        util::intstr::IntOrString,
    },
};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    runtime::watcher,
};
