use anyhow::{anyhow, Error, Result};
use netpol_resolver_k8s_api::{Namespace, ResourceExt};
use serde::Deserialize;

/// Selects how namespaces opt into isolation enforcement.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ActivationMode {
    /// Every namespace is isolated (the GA network-policy model).
    AllNamespaces,

    /// Only namespaces carrying the default-deny isolation annotation are
    /// isolated (the legacy opt-in model).
    AnnotationOptIn,
}

#[derive(Deserialize)]
struct IsolationAnnotation {
    ingress: Option<IngressIsolation>,
}

#[derive(Deserialize)]
struct IngressIsolation {
    isolation: Option<String>,
}

// === impl ActivationMode ===

impl ActivationMode {
    /// Annotation key marking a namespace as isolated under the opt-in model.
    pub const ANNOTATION: &'static str = "net.beta.kubernetes.io/network-policy";

    const DEFAULT_DENY: &'static str = "DefaultDeny";

    /// Whether the namespace is subject to isolation enforcement. The system
    /// namespace never is, regardless of mode or annotations.
    pub fn activates(&self, ns: &Namespace, system_namespace: &str) -> bool {
        if ns.name_any() == system_namespace {
            return false;
        }
        match self {
            Self::AllNamespaces => true,
            Self::AnnotationOptIn => Self::annotated_default_deny(ns),
        }
    }

    fn annotated_default_deny(ns: &Namespace) -> bool {
        let value = match ns.annotations().get(Self::ANNOTATION) {
            Some(value) => value,
            None => return false,
        };
        // The annotation value is free-form JSON; anything unparsable is
        // treated as not opted in.
        match serde_json::from_str::<IsolationAnnotation>(value) {
            Ok(annotation) => annotation
                .ingress
                .and_then(|ingress| ingress.isolation)
                .is_some_and(|isolation| isolation == Self::DEFAULT_DENY),
            Err(_) => false,
        }
    }
}

impl std::str::FromStr for ActivationMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(Self::AllNamespaces),
            "annotation" => Ok(Self::AnnotationOptIn),
            s => Err(anyhow!("invalid activation mode: {:?}", s)),
        }
    }
}

impl std::fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllNamespaces => "all".fmt(f),
            Self::AnnotationOptIn => "annotation".fmt(f),
        }
    }
}
