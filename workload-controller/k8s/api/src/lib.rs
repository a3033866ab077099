#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
pub mod labels;
mod watch;

pub use self::{
    client::{ClusterApi, KubeApi},
    labels::Selector,
    watch::{changes, Change, ChangeStream},
};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{Deployment, DeploymentSpec},
        core::v1::{
            Container, ContainerState, ContainerStatus, Pod, PodSpec, PodStatus,
            PodTemplateSpec, ResourceRequirements,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, Time},
    },
};
pub use kube::{
    api::{Api, ObjectMeta, ResourceExt},
    Client,
};
