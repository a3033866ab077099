//! Workload Controller index
//!
//! The index holds an in-memory snapshot of the workloads deployed in a single namespace and
//! compiles it into the routing table served by the front door. It is fed by two watches:
//!
//! - Each `Deployment` is a workload. We record its identity, its service address, and the
//!   resources and image of each of its containers.
//! - Each `Pod` carries a correlation label (`worker-name` by default) naming the workload that
//!   owns it. Pods are recorded under their owning workload; pods without a known owner are
//!   ignored.
//!
//! ```text
//! [ Deployment ] <- [ Pod ]
//!       |
//!       v
//! [ RoutingTable ]
//! ```
//!
//! The two watches are not ordered with respect to each other, so a pod may be observed before
//! its workload. When a workload is first observed, its pods are listed from the API server so
//! that the snapshot converges regardless of the order in which events arrive.
//!
//! Whenever the set of workloads changes, the routing table is recompiled from the snapshot and
//! published as a new immutable value.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
mod pod;
mod reconcile;
pub mod routing;
mod store;
mod workload;

#[cfg(test)]
mod tests;

pub use self::{
    pod::PodUpdate,
    reconcile::Reconciler,
    routing::{RouteSettings, Router},
    store::{SharedStore, Store},
    workload::Workload,
};

/// Holds metadata about the namespace being indexed.
#[derive(Clone, Debug)]
pub struct ClusterInfo {
    /// The namespace in which workloads are deployed.
    pub namespace: String,

    /// The pod label that names a pod's owning workload.
    pub correlation_label: String,

    /// The cluster's DNS domain, e.g. `cluster.local`.
    pub dns_domain: String,
}

/// Indicates that a resource could not be translated into index state.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    #[error("{kind} is missing a name")]
    MissingName { kind: &'static str },

    #[error("{kind} {name} is missing a namespace")]
    MissingNamespace { kind: &'static str, name: String },

    #[error("failed to encode container status of pod {name}: {source}")]
    ContainerStatus {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

// === impl ClusterInfo ===

impl ClusterInfo {
    /// The address of the service fronting a workload.
    pub fn service_address(&self, name: &str, namespace: &str) -> String {
        format!("http://{}.{}.svc.{}.", name, namespace, self.dns_domain)
    }
}
