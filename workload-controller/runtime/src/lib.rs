#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use workload_controller_core as core;
pub use workload_controller_k8s_api as k8s;
pub use workload_controller_k8s_index as index;

mod args;
mod supervisor;

pub use self::{
    args::Args,
    supervisor::{Kind, SubscriptionState, Supervisor, SupervisorMetrics},
};

/// Serves workload queries from the index.
#[derive(Clone, Debug)]
pub struct WorkloadDiscover(index::SharedStore);

impl WorkloadDiscover {
    pub fn new(store: index::SharedStore) -> Self {
        Self(store)
    }
}

impl core::DiscoverWorkloads for WorkloadDiscover {
    fn get_all_workloads(&self) -> Vec<core::WorkloadRecord> {
        self.0.read().iter().cloned().collect()
    }

    fn get_workload(&self, name: &str) -> Option<core::WorkloadRecord> {
        self.0.read().get(name).cloned()
    }
}
