
use crate::{ClusterInfo, Reconciler, RouteSettings, Router, SharedStore, Store};
use futures::prelude::*;
use maplit::*;
use parking_lot::Mutex;
use std::sync::Arc;
use workload_controller_core::{Refreshable, RoutingTableSource};
use workload_controller_k8s_api::{
    self as k8s, api::core::v1::ContainerStatus, ChangeStream, ClusterApi, Quantity, Selector,
};

const NS: &str = "integration";
const LABEL: &str = "worker-name";

/// A cluster whose pod listing is served from memory. Watches never yield and no workload can
/// be read.
#[derive(Clone, Default)]
struct FakeCluster {
    pods: Arc<Mutex<Vec<k8s::Pod>>>,
    fail_list: Arc<Mutex<bool>>,
}

struct TestConfig {
    cluster: FakeCluster,
    store: SharedStore,
    router: Router,
    reconciler: Reconciler<FakeCluster>,
    _tracing: tracing::subscriber::DefaultGuard,
}

// === impl FakeCluster ===

impl FakeCluster {
    fn push_pod(&self, pod: k8s::Pod) {
        self.pods.lock().push(pod);
    }

    fn fail_list(&self, fail: bool) {
        *self.fail_list.lock() = fail;
    }
}

#[async_trait::async_trait]
impl ClusterApi for FakeCluster {
    async fn watch_workloads(&self) -> anyhow::Result<ChangeStream<k8s::Deployment>> {
        Ok(stream::pending().boxed())
    }

    async fn watch_pods(&self) -> anyhow::Result<ChangeStream<k8s::Pod>> {
        Ok(stream::pending().boxed())
    }

    async fn list_pods(&self, selector: &Selector) -> anyhow::Result<Vec<k8s::Pod>> {
        if *self.fail_list.lock() {
            anyhow::bail!("connection refused");
        }
        Ok(self
            .pods
            .lock()
            .iter()
            .filter(|pod| {
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                selector.matches(&labels)
            })
            .cloned()
            .collect())
    }

    async fn get_workload(&self, _: &str) -> anyhow::Result<Option<k8s::Deployment>> {
        Ok(None)
    }
}

// === impl TestConfig ===

impl Default for TestConfig {
    fn default() -> Self {
        Self::with_settings(RouteSettings::default())
    }
}

impl TestConfig {
    fn with_settings(settings: RouteSettings) -> Self {
        let _tracing = tracing::subscriber::set_default(
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_max_level(tracing::Level::TRACE)
                .finish(),
        );
        let cluster = FakeCluster::default();
        let store = Store::shared(ClusterInfo {
            namespace: NS.to_string(),
            correlation_label: LABEL.to_string(),
            dns_domain: "cluster.local".to_string(),
        });
        let router = Router::new(store.clone(), settings);
        let reconciler = Reconciler::new(cluster.clone(), store.clone(), router.clone());
        Self {
            cluster,
            store,
            router,
            reconciler,
            _tracing,
        }
    }
}

fn mk_deployment(
    name: impl ToString,
    containers: impl IntoIterator<Item = (&'static str, &'static str)>,
) -> k8s::Deployment {
    let name = name.to_string();
    let labels = btreemap! { "integrationName".to_string() => name.clone() };
    k8s::Deployment {
        metadata: k8s::ObjectMeta {
            namespace: Some(NS.to_string()),
            name: Some(name.clone()),
            uid: Some(format!("uid-{}", name)),
            ..Default::default()
        },
        spec: Some(k8s::DeploymentSpec {
            selector: k8s::LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: k8s::PodTemplateSpec {
                metadata: Some(k8s::ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(k8s::PodSpec {
                    containers: containers
                        .into_iter()
                        .map(|(name, image)| k8s::Container {
                            name: name.to_string(),
                            image: Some(image.to_string()),
                            resources: Some(k8s::ResourceRequirements {
                                limits: Some(btreemap! {
                                    "memory".to_string() => Quantity("512Mi".to_string()),
                                }),
                                requests: Some(btreemap! {
                                    "memory".to_string() => Quantity("256Mi".to_string()),
                                    "cpu".to_string() => Quantity("100m".to_string()),
                                }),
                                ..Default::default()
                            }),
                            ..Default::default()
                        })
                        .collect(),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Creates a pod owned by `workload` whose containers report the given readiness and restarts.
fn mk_pod(
    workload: impl ToString,
    name: impl ToString,
    containers: impl IntoIterator<Item = (bool, i32)>,
) -> k8s::Pod {
    let workload = workload.to_string();
    k8s::Pod {
        metadata: k8s::ObjectMeta {
            namespace: Some(NS.to_string()),
            name: Some(name.to_string()),
            labels: Some(btreemap! {
                LABEL.to_string() => workload.clone(),
                "integrationName".to_string() => workload,
            }),
            ..Default::default()
        },
        status: Some(k8s::PodStatus {
            container_statuses: Some(
                containers
                    .into_iter()
                    .enumerate()
                    .map(|(i, (ready, restart_count))| ContainerStatus {
                        name: format!("container-{}", i),
                        ready,
                        restart_count,
                        state: Some(k8s::ContainerState::default()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }),
        ..Default::default()
    }
}
