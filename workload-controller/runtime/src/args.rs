use crate::{
    core::RoutingTableSource,
    index::{self, ClusterInfo, RouteSettings},
    k8s, Supervisor, SupervisorMetrics,
};
use anyhow::{bail, Result};
use clap::Parser;
use futures::prelude::*;
use prometheus_client::registry::Registry;
use tokio::time::Duration;
use tracing::{debug, info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "workload", about = "A workload discovery and routing controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "workload=info,warn",
        env = "WORKLOAD_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace in which workloads are deployed.
    #[clap(long, default_value = "integration", env = "WORKLOAD_NAMESPACE")]
    namespace: String,

    /// The pod label naming the workload that owns a pod.
    #[clap(long, default_value = "worker-name")]
    correlation_label: String,

    #[clap(long, default_value = "cluster.local")]
    cluster_domain: String,

    /// The path under which workloads are routed.
    #[clap(long, default_value = "/proxy")]
    proxy_path: String,

    /// Routes traffic through an integrator host instead of in-cluster service addresses.
    #[clap(long, env = "YARP_INTEGRATOR_HOST")]
    integrator_host: Option<String>,

    #[clap(long, default_value = "ProxySessionAffinity")]
    affinity_key_name: String,

    /// How often disconnected watches are re-opened.
    #[clap(long, default_value = "10")]
    reconnect_interval_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            namespace,
            correlation_label,
            cluster_domain,
            proxy_path,
            integrator_host,
            affinity_key_name,
            reconnect_interval_secs,
        } = self;

        if reconnect_interval_secs == 0 {
            bail!("--reconnect-interval-secs must be greater than zero");
        }

        let store = index::Store::shared(ClusterInfo {
            namespace: namespace.clone(),
            correlation_label,
            dns_domain: cluster_domain,
        });
        let router = index::Router::new(
            store.clone(),
            RouteSettings {
                proxy_path,
                integrator_host,
                affinity_key_name,
            },
        );

        let mut prom = <Registry>::default();
        index::metrics::register(&mut prom, store.clone(), router.clone());
        let supervisor_metrics = SupervisorMetrics::register(&mut prom);

        let runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        // Watch workloads and their pods, applying each change to the index.
        let api = k8s::KubeApi::new(runtime.client(), &namespace);
        let reconciler = index::Reconciler::new(api.clone(), store, router.clone());
        let supervisor = Supervisor::spawn(
            api,
            reconciler,
            Duration::from_secs(reconnect_interval_secs),
            supervisor_metrics,
            runtime.shutdown_handle(),
        );
        info!(%namespace, states = ?supervisor.states(), "Supervising watches");

        tokio::spawn(
            log_routing_tables(router, runtime.shutdown_handle())
                .instrument(info_span!("routing")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for the background tasks to
        // complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// Logs each routing table as it is installed, until shutdown.
async fn log_routing_tables(router: index::Router, drain: drain::Watch) {
    let mut tables = router.watch();
    let shutdown = drain.signaled();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            table = tables.next() => match table {
                Some(table) => debug!(
                    generation = table.generation,
                    routes = ?table.routes.iter().map(|r| r.path.as_str()).collect::<Vec<_>>(),
                    "Routing table updated"
                ),
                None => return,
            },
            release = &mut shutdown => {
                drop(release);
                return;
            }
        }
    }
}
