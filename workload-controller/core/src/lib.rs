#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod routing;
pub mod workload;

pub use self::{
    routing::{
        ClusterConfig, Refreshable, RouteConfig, RoutingTable, RoutingTableSource,
        RoutingTableStream,
    },
    workload::{ContainerRecord, DiscoverWorkloads, PodRecord, WorkloadRecord},
};
