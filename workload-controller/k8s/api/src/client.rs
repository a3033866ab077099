use crate::{watch, ChangeStream, Selector};
use anyhow::Result;
use k8s_openapi::api::{apps::v1::Deployment, core::v1::Pod};
use kube::{
    api::{Api, ListParams},
    runtime::watcher,
    Client,
};

/// The subset of the cluster API needed to observe workloads and their pods.
///
/// All operations are scoped to the namespace the implementation was built for.
#[async_trait::async_trait]
pub trait ClusterApi: Clone + Send + Sync + 'static {
    async fn watch_workloads(&self) -> Result<ChangeStream<Deployment>>;

    async fn watch_pods(&self) -> Result<ChangeStream<Pod>>;

    async fn list_pods(&self, selector: &Selector) -> Result<Vec<Pod>>;

    async fn get_workload(&self, name: &str) -> Result<Option<Deployment>>;
}

/// A `ClusterApi` backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeApi {
    client: Client,
    namespace: String,
}

// === impl KubeApi ===

impl KubeApi {
    /// Limits the amount of time a watch can be idle before the API server closes it.
    ///
    /// Must be less than 295 or Kubernetes throws an error.
    const WATCH_TIMEOUT_SECS: u32 = 290;

    pub fn new(client: Client, namespace: impl ToString) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn deployments(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn watcher_config() -> watcher::Config {
        watcher::Config::default().timeout(Self::WATCH_TIMEOUT_SECS)
    }
}

impl std::fmt::Debug for KubeApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeApi")
            .field("namespace", &self.namespace)
            .finish()
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeApi {
    // Each watcher lists before it watches, so every (re)opened subscription starts with a
    // `Restarted` snapshot. Idle watch timeouts are resumed from the last resource version.
    async fn watch_workloads(&self) -> Result<ChangeStream<Deployment>> {
        let events = watcher::watcher(self.deployments(), Self::watcher_config());
        Ok(watch::changes(events))
    }

    async fn watch_pods(&self) -> Result<ChangeStream<Pod>> {
        let events = watcher::watcher(self.pods(), Self::watcher_config());
        Ok(watch::changes(events))
    }

    async fn list_pods(&self, selector: &Selector) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(&selector.to_string());
        let pods = self.pods().list(&params).await?;
        tracing::trace!(%selector, pods = pods.items.len(), "Listed pods");
        Ok(pods.items)
    }

    async fn get_workload(&self, name: &str) -> Result<Option<Deployment>> {
        self.deployments().get_opt(name).await.map_err(Into::into)
    }
}
