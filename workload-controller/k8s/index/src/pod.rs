use crate::TranslateError;
use workload_controller_core::PodRecord;
use workload_controller_k8s_api::{self as k8s, ContainerState, ResourceExt};

/// A pod change, translated for the index.
#[derive(Clone, Debug, PartialEq)]
pub struct PodUpdate {
    /// The workload named by the pod's correlation label, if the label is set.
    pub owner: Option<String>,

    pub name: String,

    /// The pod's new record. Unset when the pod is terminating.
    pub record: Option<PodRecord>,
}

// === impl PodUpdate ===

impl PodUpdate {
    const KIND: &'static str = "Pod";

    pub fn from_resource(pod: &k8s::Pod, correlation_label: &str) -> Result<Self, TranslateError> {
        let name = pod
            .metadata
            .name
            .clone()
            .ok_or(TranslateError::MissingName { kind: Self::KIND })?;
        let owner = pod.labels().get(correlation_label).cloned();

        // A pod with a deletion timestamp is already on its way out; it is treated as gone.
        if pod.metadata.deletion_timestamp.is_some() {
            return Ok(Self {
                owner,
                name,
                record: None,
            });
        }

        let record = pod_record(&name, pod.status.as_ref())?;
        Ok(Self {
            owner,
            name,
            record: Some(record),
        })
    }
}

fn pod_record(name: &str, status: Option<&k8s::PodStatus>) -> Result<PodRecord, TranslateError> {
    let statuses = status.and_then(|s| s.container_statuses.as_deref());

    // A pod that has not reported any container statuses is not running.
    let running = statuses
        .map(|statuses| statuses.iter().all(|s| s.ready))
        .unwrap_or(false);

    let states = statuses.map(|statuses| {
        statuses
            .iter()
            .map(|s| s.state.as_ref())
            .collect::<Vec<Option<&ContainerState>>>()
    });
    let container_status =
        serde_json::to_string(&states).map_err(|source| TranslateError::ContainerStatus {
            name: name.to_string(),
            source,
        })?;

    let restart_count = statuses
        .map(|statuses| statuses.iter().map(|s| s.restart_count).sum::<i32>())
        .unwrap_or(0);

    Ok(PodRecord {
        name: name.to_string(),
        running,
        container_status,
        last_start_time: status.and_then(|s| s.start_time.as_ref()).map(|t| t.0),
        restart_count: Some(restart_count),
    })
}
