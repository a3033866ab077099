use crate::{pod::PodUpdate, workload::Workload, ClusterInfo};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};
use tracing::{debug, trace};
use workload_controller_core::WorkloadRecord;

pub type SharedStore = Arc<RwLock<Store>>;

/// Holds the snapshot of all known workloads, keyed by name in the order they were discovered.
///
/// The store is only written by the reconciler, which never holds the lock across an await
/// point. Readers clone what they need and release the lock.
#[derive(Debug)]
pub struct Store {
    workloads: IndexMap<String, WorkloadRecord>,
    cluster_info: Arc<ClusterInfo>,
}

// === impl Store ===

impl Store {
    pub fn new(cluster_info: impl Into<Arc<ClusterInfo>>) -> Self {
        Self {
            workloads: IndexMap::default(),
            cluster_info: cluster_info.into(),
        }
    }

    pub fn shared(cluster_info: impl Into<Arc<ClusterInfo>>) -> SharedStore {
        Arc::new(RwLock::new(Self::new(cluster_info)))
    }

    pub fn cluster_info(&self) -> &ClusterInfo {
        &self.cluster_info
    }

    pub fn get(&self, name: &str) -> Option<&WorkloadRecord> {
        self.workloads.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.workloads.contains_key(name)
    }

    /// Iterates over workloads in discovery order.
    pub fn iter(&self) -> impl Iterator<Item = &WorkloadRecord> + '_ {
        self.workloads.values()
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }

    pub fn pod_count(&self) -> usize {
        self.workloads.values().map(|wl| wl.pods.len()).sum()
    }

    /// Returns true if the workload is indexed under its current id.
    pub(crate) fn indexes(&self, workload: &Workload) -> bool {
        self.workloads
            .get(&workload.name)
            .map_or(false, |record| record.id == workload.id)
    }

    /// Creates or updates a workload.
    ///
    /// When the workload is not yet known, it is inserted and the `seed` pods are applied to it.
    /// The seed is ignored for known workloads, whose pods are maintained by the pod watch. A
    /// workload whose id has changed was deleted and recreated, so its old record is dropped.
    ///
    /// Containers are upserted by name and are never removed.
    ///
    /// Returns true if the workload was created.
    pub(crate) fn apply_workload(&mut self, workload: Workload, seed: Vec<PodUpdate>) -> bool {
        let Workload {
            id,
            name,
            namespace,
            containers,
            ..
        } = workload;

        let created = match self.workloads.get(&name).map(|record| record.id != id) {
            None => true,
            Some(true) => {
                debug!(workload = %name, id = %id, "Workload was recreated");
                self.workloads.shift_remove(&name);
                true
            }
            Some(false) => false,
        };
        if created {
            let address = self.cluster_info.service_address(&name, &namespace);
            self.workloads.insert(
                name.clone(),
                WorkloadRecord::new(id, name.clone(), namespace, address),
            );
            debug!(workload = %name, "Added workload");

            for pod in seed.into_iter() {
                self.apply_pod(pod);
            }
        }

        if let Some(record) = self.workloads.get_mut(&name) {
            for container in containers.into_iter() {
                trace!(workload = %name, container = %container.name, "Updating container");
                record.upsert_container(container);
            }
        }

        created
    }

    /// Removes a workload along with all of its containers and pods.
    ///
    /// Returns true if the workload existed.
    pub(crate) fn delete_workload(&mut self, name: &str) -> bool {
        // Preserve the discovery order of the remaining workloads.
        let removed = self.workloads.shift_remove(name).is_some();
        if removed {
            debug!(workload = %name, "Removed workload");
        }
        removed
    }

    /// Removes every workload that is not named in `names`.
    ///
    /// Returns true if any workload was removed.
    pub(crate) fn retain_workloads(&mut self, names: &HashSet<String>) -> bool {
        let before = self.workloads.len();
        self.workloads.retain(|name, _| {
            let keep = names.contains(name);
            if !keep {
                debug!(workload = %name, "Removed workload");
            }
            keep
        });
        self.workloads.len() < before
    }

    /// Replaces all pod records with a fresh listing.
    ///
    /// Pods that are not listed are removed from their workloads before the listed pods are
    /// applied.
    pub(crate) fn reset_pods(&mut self, updates: Vec<PodUpdate>) {
        let mut listed = HashMap::<&str, HashSet<&str>>::new();
        for update in updates.iter() {
            if let Some(owner) = update.owner.as_deref() {
                listed.entry(owner).or_default().insert(update.name.as_str());
            }
        }

        for workload in self.workloads.values_mut() {
            let names = listed.get(workload.name.as_str());
            let before = workload.pods.len();
            workload
                .pods
                .retain(|pod| names.map_or(false, |names| names.contains(pod.name.as_str())));
            if workload.pods.len() < before {
                debug!(workload = %workload.name, pruned = before - workload.pods.len(), "Pruned pods");
            }
        }
        drop(listed);

        for update in updates.into_iter() {
            self.apply_pod(update);
        }
    }

    /// Replaces a pod's record under its owning workload.
    ///
    /// A pod that is terminating is removed and not reinserted.
    ///
    /// Returns false if the pod's owner is not known, in which case the store is unchanged.
    pub(crate) fn apply_pod(&mut self, update: PodUpdate) -> bool {
        let PodUpdate {
            owner,
            name,
            record,
        } = update;

        let Some(workload) = owner.as_deref().and_then(|o| self.workloads.get_mut(o)) else {
            trace!(pod = %name, ?owner, "No workload owns pod");
            return false;
        };

        match record {
            Some(record) => {
                trace!(workload = %workload.name, pod = %name, running = record.running, "Updating pod");
                workload.replace_pod(record);
            }
            None => {
                workload.remove_pod(&name);
                debug!(workload = %workload.name, pod = %name, "Pod is terminating");
            }
        }

        true
    }

    /// Removes a pod from its owning workload.
    ///
    /// Returns false if the pod's owner is not known.
    pub(crate) fn delete_pod(&mut self, owner: Option<&str>, name: &str) -> bool {
        let Some(workload) = owner.and_then(|o| self.workloads.get_mut(o)) else {
            trace!(pod = %name, ?owner, "No workload owns pod");
            return false;
        };

        if workload.remove_pod(name).is_some() {
            debug!(workload = %workload.name, pod = %name, "Removed pod");
        }
        true
    }
}
