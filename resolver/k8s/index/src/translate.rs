//! Translation of declarative policy rules into tag selectors and IP ACLs.
//!
//! Within one rule, each peer produces one independent selector (peers are
//! ORed); everything inside a peer's clause is ANDed. A rule's port list is
//! merged into every peer clause. Rules that reference no identity at all
//! degenerate into plain network/port ACLs.

use ipnet::IpNet;
use netpol_resolver_core::{
    Action, IpRule, KeyValueOperator, Operator, PortRange, Protocol, TagSelector, NAMESPACE_TAG,
    PORT_TAG,
};
use netpol_resolver_k8s_api::{
    labels::{self, InvalidSelector},
    IPBlock, IntOrString, LabelSelector, Namespace, NetworkPolicyEgressRule,
    NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort, ResourceExt, Selector,
};

#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error(transparent)]
    Selector(#[from] InvalidSelector),

    #[error("invalid CIDR {cidr:?}: {source}")]
    InvalidCidr {
        cidr: String,
        #[source]
        source: ipnet::AddrParseError,
    },

    #[error("named port {0:?} cannot be expressed as a network rule")]
    NamedPort(String),

    #[error("port {0} is outside the valid range")]
    InvalidPort(i32),

    #[error("unsupported protocol {0:?}")]
    UnsupportedProtocol(String),
}

/// The policy primitives produced by one rule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RuleTranslation {
    pub selectors: Vec<TagSelector>,
    pub acls: Vec<IpRule>,
}

pub fn translate_ingress_rule(
    rule: &NetworkPolicyIngressRule,
    namespace: &str,
    all_namespaces: &[Namespace],
    networks: &[IpNet],
) -> Result<RuleTranslation, TranslateError> {
    translate_rule(
        rule.from.as_deref(),
        rule.ports.as_deref(),
        namespace,
        all_namespaces,
        networks,
    )
}

pub fn translate_egress_rule(
    rule: &NetworkPolicyEgressRule,
    namespace: &str,
    all_namespaces: &[Namespace],
    networks: &[IpNet],
) -> Result<RuleTranslation, TranslateError> {
    translate_rule(
        rule.to.as_deref(),
        rule.ports.as_deref(),
        namespace,
        all_namespaces,
        networks,
    )
}

fn translate_rule(
    peers: Option<&[NetworkPolicyPeer]>,
    ports: Option<&[NetworkPolicyPort]>,
    namespace: &str,
    all_namespaces: &[Namespace],
    networks: &[IpNet],
) -> Result<RuleTranslation, TranslateError> {
    let mut out = RuleTranslation::default();

    // A present-but-empty peer or port list matches nothing, unlike an absent
    // field, which leaves that dimension unconstrained.
    if peers.is_some_and(|p| p.is_empty()) || ports.is_some_and(|p| p.is_empty()) {
        return Ok(out);
    }

    let peers = match peers {
        Some(peers) => peers,
        None => {
            // No peer restriction: the whole rule is identity-free. With no
            // ports either, this is the canonical allow-everything rule.
            out.acls = network_acls(networks, ports)?;
            return Ok(out);
        }
    };

    let port = port_clause(ports);
    for peer in peers {
        if let Some(block) = peer.ip_block.as_ref() {
            out.acls.extend(ip_block_acls(block, ports)?);
            continue;
        }
        match (peer.pod_selector.as_ref(), peer.namespace_selector.as_ref()) {
            // An empty peer selects everything.
            (None, None) => out.acls.extend(network_acls(networks, ports)?),
            (pod_selector, namespace_selector) => {
                let namespaces = match namespace_selector {
                    Some(selector) => {
                        let matched = matching_namespaces(selector, all_namespaces, namespace)?;
                        if matched.is_empty() {
                            // No namespace can satisfy this peer; it must not
                            // degrade into an always-false clause.
                            continue;
                        }
                        matched
                    }
                    None => vec![namespace.to_string()],
                };
                out.selectors
                    .push(peer_selector(pod_selector, namespaces, port.as_ref())?);
            }
        }
    }
    Ok(out)
}

/// Builds the `@port` constraint merged into every peer clause of a rule.
/// Returns None when the rule leaves ports unconstrained, including the case
/// of a port entry with no port number (which matches the whole range).
fn port_clause(ports: Option<&[NetworkPolicyPort]>) -> Option<KeyValueOperator> {
    let ports = ports?;
    let mut values = Vec::with_capacity(ports.len());
    for spec in ports {
        let port = spec.port.as_ref()?;
        let value = match port {
            IntOrString::Int(n) => match spec.end_port {
                Some(end) => format!("{}:{}", n, end),
                None => n.to_string(),
            },
            IntOrString::String(name) => name.clone(),
        };
        values.push(value);
    }
    Some(KeyValueOperator {
        key: PORT_TAG.to_string(),
        operator: Operator::Equal,
        values,
    })
}

fn peer_selector(
    pod_selector: Option<&LabelSelector>,
    namespaces: Vec<String>,
    port: Option<&KeyValueOperator>,
) -> Result<TagSelector, TranslateError> {
    let mut clause = Vec::new();
    if let Some(port) = port {
        clause.push(port.clone());
    }
    clause.push(KeyValueOperator {
        key: NAMESPACE_TAG.to_string(),
        operator: Operator::Equal,
        values: namespaces,
    });
    if let Some(selector) = pod_selector {
        let selector = Selector::try_from(selector)?;
        for (key, value) in selector.match_labels() {
            clause.push(KeyValueOperator::new(key, Operator::Equal, [value]));
        }
        for expr in selector.match_expressions() {
            clause.push(requirement_clause(expr));
        }
    }
    Ok(TagSelector {
        clause,
        action: Action::Accept,
    })
}

fn requirement_clause(expr: &labels::Expression) -> KeyValueOperator {
    match expr.operator() {
        labels::Operator::In => KeyValueOperator::new(expr.key(), Operator::Equal, expr.values()),
        labels::Operator::NotIn => {
            KeyValueOperator::new(expr.key(), Operator::NotEqual, expr.values())
        }
        labels::Operator::Exists => KeyValueOperator::new(expr.key(), Operator::KeyExists, ["*"]),
        labels::Operator::DoesNotExist => {
            KeyValueOperator::new(expr.key(), Operator::KeyNotExists, ["*"])
        }
    }
}

/// Evaluates a namespace selector against the current namespace list. The
/// workload's own namespace is excluded: same-namespace traffic is governed by
/// pod-selector peers.
fn matching_namespaces(
    selector: &LabelSelector,
    all_namespaces: &[Namespace],
    own: &str,
) -> Result<Vec<String>, TranslateError> {
    let selector = Selector::try_from(selector)?;
    let mut matched: Vec<String> = all_namespaces
        .iter()
        .filter(|ns| selector.matches(ns.labels()))
        .map(|ns| ns.name_any())
        .filter(|name| name != own)
        .collect();
    matched.sort();
    matched.dedup();
    Ok(matched)
}

/// Identity-free accept rules over the enforcement networks, one per network
/// per port. Absent ports fan out over the full range on both protocols.
fn network_acls(
    networks: &[IpNet],
    ports: Option<&[NetworkPolicyPort]>,
) -> Result<Vec<IpRule>, TranslateError> {
    let mut acls = Vec::new();
    for (ports, protocol) in acl_ports(ports)? {
        for net in networks {
            acls.push(IpRule {
                net: *net,
                ports,
                protocol,
                action: Action::Accept,
            });
        }
    }
    Ok(acls)
}

/// Accept rules for the block's CIDR plus deny carve-outs for its exceptions,
/// each crossed with the rule's ports.
fn ip_block_acls(
    block: &IPBlock,
    ports: Option<&[NetworkPolicyPort]>,
) -> Result<Vec<IpRule>, TranslateError> {
    let net = parse_cidr(&block.cidr)?;
    let ports = acl_ports(ports)?;
    let mut acls: Vec<IpRule> = ports
        .iter()
        .map(|&(ports, protocol)| IpRule {
            net,
            ports,
            protocol,
            action: Action::Accept,
        })
        .collect();
    for except in block.except.iter().flatten() {
        let net = parse_cidr(except)?;
        acls.extend(ports.iter().map(|&(ports, protocol)| IpRule {
            net,
            ports,
            protocol,
            action: Action::Deny,
        }));
    }
    Ok(acls)
}

fn parse_cidr(cidr: &str) -> Result<IpNet, TranslateError> {
    cidr.parse().map_err(|source| TranslateError::InvalidCidr {
        cidr: cidr.to_string(),
        source,
    })
}

/// Renders a rule's ports as (range, protocol) pairs for the ACL path, where
/// named ports cannot be expressed.
fn acl_ports(
    ports: Option<&[NetworkPolicyPort]>,
) -> Result<Vec<(PortRange, Protocol)>, TranslateError> {
    let ports = match ports {
        Some(ports) => ports,
        None => {
            return Ok(vec![
                (PortRange::ALL, Protocol::Tcp),
                (PortRange::ALL, Protocol::Udp),
            ])
        }
    };
    let mut out = Vec::with_capacity(ports.len());
    for spec in ports {
        let protocol = parse_protocol(spec.protocol.as_deref())?;
        let range = match spec.port.as_ref() {
            None => PortRange::ALL,
            Some(IntOrString::Int(n)) => {
                let start = valid_port(*n)?;
                let end = spec.end_port.map(valid_port).transpose()?.unwrap_or(start);
                PortRange { start, end }
            }
            Some(IntOrString::String(name)) => {
                return Err(TranslateError::NamedPort(name.clone()))
            }
        };
        out.push((range, protocol));
    }
    Ok(out)
}

fn parse_protocol(protocol: Option<&str>) -> Result<Protocol, TranslateError> {
    match protocol {
        None | Some("TCP") => Ok(Protocol::Tcp),
        Some("UDP") => Ok(Protocol::Udp),
        Some(other) => Err(TranslateError::UnsupportedProtocol(other.to_string())),
    }
}

fn valid_port(port: i32) -> Result<u16, TranslateError> {
    if (1..=i32::from(u16::MAX)).contains(&port) {
        Ok(port as u16)
    } else {
        Err(TranslateError::InvalidPort(port))
    }
}
