#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod network;
mod policy;
mod selector;
mod workload;

pub use self::{
    network::{IpRule, PortRange, Protocol},
    policy::{PolicyUpdater, ResolvedPolicy, DEFAULT_IP_KEY},
    selector::{Action, KeyValueOperator, Operator, TagSelector, NAMESPACE_TAG, PORT_TAG},
    workload::{
        PodKey, WorkloadId, WorkloadMeta, CONTAINER_NAME_TAG, INFRA_CONTAINER_NAME, POD_NAME_TAG,
        POD_NAMESPACE_TAG,
    },
};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};
