use crate::LogPolicyUpdater;
use anyhow::{bail, Result};
use clap::Parser;
use ipnet::IpNet;
use netpol_resolver_k8s_api::KubeCluster;
use netpol_resolver_k8s_index::{ActivationMode, Config, Metrics, Resolver};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "netpol-resolver", about = "A network policy resolution agent")]
pub struct Args {
    #[clap(
        long,
        default_value = "netpol_resolver=info,warn",
        env = "NETPOL_RESOLVER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Name of the node this agent runs on; scopes pod listing and watching.
    #[clap(long, env = "NODE_NAME")]
    node_name: String,

    /// The reserved namespace that is never subject to isolation.
    #[clap(long, default_value = "kube-system")]
    system_namespace: String,

    /// Whether all namespaces are isolated, or only those carrying the
    /// default-deny annotation.
    #[clap(long, default_value = "all")]
    activation_mode: ActivationMode,

    /// Networks that identity-free allow rules fan out over.
    #[clap(long, default_value = "0.0.0.0/0")]
    enforcement_networks: IpNets,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            node_name,
            system_namespace,
            activation_mode,
            enforcement_networks: IpNets(enforcement_networks),
        } = self;

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("resolver"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let api = KubeCluster::new(runtime.client(), node_name);
        let resolver = Arc::new(Resolver::new(
            api,
            LogPolicyUpdater,
            Config {
                system_namespace,
                mode: activation_mode,
                enforcement_networks,
            },
            metrics,
        ));

        let mut task = tokio::spawn(resolver.clone().run().instrument(info_span!("resolver")));

        // The resolver only completes early on a fatal startup failure; wait
        // for the shutdown signal otherwise.
        tokio::select! {
            res = &mut task => {
                res??;
                bail!("resolver terminated unexpectedly");
            }
            res = runtime.run() => {
                if res.is_err() {
                    bail!("aborted");
                }
            }
        }

        resolver.stop();
        task.await??;
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct IpNets(Vec<IpNet>);

impl std::str::FromStr for IpNets {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(|n| n.trim().parse().map_err(Into::into))
            .collect::<Result<Vec<IpNet>>>()
            .map(Self)
    }
}
