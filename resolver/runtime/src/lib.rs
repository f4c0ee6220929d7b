#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod args;

pub use self::args::Args;

use anyhow::Result;
use netpol_resolver_core::{PolicyUpdater, ResolvedPolicy, WorkloadId};

/// A [`PolicyUpdater`] that only logs each push, so the resolver can run
/// standalone. An embedding enforcement engine supplies its own updater
/// through the library API instead.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogPolicyUpdater;

#[async_trait::async_trait]
impl PolicyUpdater for LogPolicyUpdater {
    async fn update_policy(&self, workload: &WorkloadId, policy: ResolvedPolicy) -> Result<()> {
        tracing::info!(
            %workload,
            ingress_selectors = policy.ingress_selectors.len(),
            egress_selectors = policy.egress_selectors.len(),
            ingress_acls = policy.ingress_acls.len(),
            egress_acls = policy.egress_acls.len(),
            "Applying policy"
        );
        Ok(())
    }
}
