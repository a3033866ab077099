use crate::{
    pod::PodUpdate, routing::Router, store::SharedStore, workload::Workload, TranslateError,
};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};
use workload_controller_core::Refreshable;
use workload_controller_k8s_api::{self as k8s, Change, ClusterApi, ResourceExt};

/// Applies watch events to the store, one at a time.
///
/// Callers must not apply events concurrently: the reconciler reads the store to decide whether
/// a workload is new before it lists the workload's pods, and relies on no other writer
/// intervening.
#[derive(Clone, Debug)]
pub struct Reconciler<C> {
    client: C,
    store: SharedStore,
    router: Router,
}

// === impl Reconciler ===

impl<C: ClusterApi> Reconciler<C> {
    pub fn new(client: C, store: SharedStore, router: Router) -> Self {
        Self {
            client,
            store,
            router,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Applies a workload change. The routing table is recompiled when a workload is added or
    /// removed.
    pub async fn apply_workload(&self, change: Change<k8s::Deployment>) -> Result<(), TranslateError> {
        match change {
            Change::Applied(deployment) => {
                let workload = Workload::from_resource(&deployment)?;
                if self.index_workload(workload).await {
                    self.router.refresh();
                }
            }

            Change::Deleted(deployment) => {
                let name = deployment
                    .metadata
                    .name
                    .ok_or(TranslateError::MissingName { kind: "Deployment" })?;
                let removed = self.store.write().delete_workload(&name);
                if removed {
                    self.router.refresh();
                }
            }

            Change::Restarted(deployments) => self.reset_workloads(deployments).await,
        }
        Ok(())
    }

    /// Applies a pod change.
    pub fn apply_pod(&self, change: Change<k8s::Pod>) -> Result<(), TranslateError> {
        let mut store = self.store.write();
        let label = store.cluster_info().correlation_label.clone();
        match change {
            Change::Applied(pod) => {
                let update = PodUpdate::from_resource(&pod, &label)?;
                if !store.apply_pod(update) {
                    debug!(pod = %pod.name_any(), "Ignoring pod without a known workload");
                }
            }

            Change::Deleted(pod) => {
                let name = pod
                    .metadata
                    .name
                    .as_deref()
                    .ok_or(TranslateError::MissingName { kind: "Pod" })?;
                let owner = pod.labels().get(&label).map(String::as_str);
                if !store.delete_pod(owner, name) {
                    debug!(pod = %name, "Ignoring pod without a known workload");
                }
            }

            Change::Restarted(pods) => {
                let updates = pods
                    .iter()
                    .filter_map(|pod| translate(PodUpdate::from_resource(pod, &label)))
                    .collect::<Vec<_>>();
                debug!(pods = updates.len(), "Resetting pods");
                store.reset_pods(updates);
            }
        }
        Ok(())
    }

    /// Replaces the indexed workloads with a fresh listing, removing any workload that is no
    /// longer listed.
    async fn reset_workloads(&self, deployments: Vec<k8s::Deployment>) {
        let workloads = deployments
            .iter()
            .filter_map(|deployment| translate(Workload::from_resource(deployment)))
            .collect::<Vec<_>>();
        debug!(workloads = workloads.len(), "Resetting workloads");

        let names = workloads
            .iter()
            .map(|workload| workload.name.clone())
            .collect::<HashSet<_>>();
        let mut changed = self.store.write().retain_workloads(&names);
        for workload in workloads.into_iter() {
            changed |= self.index_workload(workload).await;
        }

        if changed {
            self.router.refresh();
        }
    }

    /// Creates or updates a workload in the store. Returns true if the workload was created.
    #[instrument(skip_all, fields(workload = %workload.name))]
    async fn index_workload(&self, workload: Workload) -> bool {
        // Pods that were observed before their workload were dropped, so a new workload's pods
        // are listed explicitly. The listing happens before the store is locked.
        let indexed = self.store.read().indexes(&workload);
        let seed = if indexed {
            Vec::new()
        } else {
            self.list_pods(&workload).await
        };

        self.store.write().apply_workload(workload, seed)
    }

    /// Lists a workload's current pods so they can be applied along with the workload.
    ///
    /// A failed listing is not fatal: the workload is still indexed and its pods converge as the
    /// pod watch delivers them.
    async fn list_pods(&self, workload: &Workload) -> Vec<PodUpdate> {
        if workload.selector.is_empty() {
            return Vec::new();
        }

        let pods = match self.client.list_pods(&workload.selector).await {
            Ok(pods) => pods,
            Err(error) => {
                warn!(%error, selector = %workload.selector, "Failed to list workload pods");
                return Vec::new();
            }
        };

        let label = self.store.read().cluster_info().correlation_label.clone();
        pods.iter()
            .filter_map(|pod| translate(PodUpdate::from_resource(pod, &label)))
            .collect()
    }
}

/// Drops a resource that cannot be translated, logging why.
fn translate<T>(result: Result<T, TranslateError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(error) => {
            warn!(%error, "Skipping resource");
            None
        }
    }
}
