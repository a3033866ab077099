use crate::TranslateError;
use workload_controller_core::ContainerRecord;
use workload_controller_k8s_api::{self as k8s, ResourceExt, Selector};

/// The parts of a `Deployment` that are tracked by the index.
#[derive(Clone, Debug, PartialEq)]
pub struct Workload {
    pub id: String,
    pub name: String,
    pub namespace: String,

    /// Selects the workload's pods.
    pub selector: Selector,

    pub containers: Vec<ContainerRecord>,
}

// === impl Workload ===

impl Workload {
    const KIND: &'static str = "Deployment";

    pub fn from_resource(deployment: &k8s::Deployment) -> Result<Self, TranslateError> {
        let name = deployment
            .metadata
            .name
            .clone()
            .ok_or(TranslateError::MissingName { kind: Self::KIND })?;
        let namespace = deployment
            .namespace()
            .ok_or_else(|| TranslateError::MissingNamespace {
                kind: Self::KIND,
                name: name.clone(),
            })?;
        let id = deployment.uid().unwrap_or_default();

        let spec = deployment.spec.as_ref();
        let selector = spec
            .map(|spec| Selector::from(&spec.selector))
            .unwrap_or_default();
        let containers = spec
            .and_then(|spec| spec.template.spec.as_ref())
            .map(|pod| pod.containers.iter().map(container_record).collect())
            .unwrap_or_default();

        Ok(Self {
            id,
            name,
            namespace,
            selector,
            containers,
        })
    }
}

fn container_record(container: &k8s::Container) -> ContainerRecord {
    let resources = container.resources.as_ref();
    let limit = |key: &str| {
        resources
            .and_then(|r| r.limits.as_ref())
            .and_then(|limits| limits.get(key))
            .map(|q| q.0.clone())
    };
    let request = |key: &str| {
        resources
            .and_then(|r| r.requests.as_ref())
            .and_then(|requests| requests.get(key))
            .map(|q| q.0.clone())
    };

    ContainerRecord {
        name: container.name.clone(),
        memory_limit: limit("memory"),
        cpu_limit: limit("cpu"),
        memory_request: request("memory"),
        cpu_request: request("cpu"),
        image: container.image.clone(),
    }
}
