use chrono::{offset::Utc, DateTime};
use serde::Serialize;

/// Models read-only discovery of the workloads observed in the cluster.
///
/// Lookups never block on the cluster: they return whatever the local snapshot holds, which may
/// lag behind the cluster's own state.
pub trait DiscoverWorkloads {
    fn get_all_workloads(&self) -> Vec<WorkloadRecord>;

    fn get_workload(&self, name: &str) -> Option<WorkloadRecord>;
}

/// A deployed workload, as last observed from the workload and pod watches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRecord {
    /// The workload's cluster UID.
    pub id: String,
    pub name: String,
    pub namespace: String,

    /// The in-cluster address at which the workload's service is reachable.
    pub address: String,

    /// Containers in the order they were first observed.
    pub containers: Vec<ContainerRecord>,

    /// Pods in the order they were last (re)inserted.
    pub pods: Vec<PodRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerRecord {
    pub name: String,

    // Quantities are kept in their canonical string form and are never interpreted.
    pub memory_limit: Option<String>,
    pub cpu_limit: Option<String>,
    pub memory_request: Option<String>,
    pub cpu_request: Option<String>,

    pub image: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PodRecord {
    pub name: String,

    /// True when every reported container status is ready.
    pub running: bool,

    /// A JSON document holding the state of each container.
    pub container_status: String,

    pub last_start_time: Option<DateTime<Utc>>,
    pub restart_count: Option<i32>,
}

// === impl WorkloadRecord ===

impl WorkloadRecord {
    pub fn new(
        id: impl ToString,
        name: impl ToString,
        namespace: impl ToString,
        address: impl ToString,
    ) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            address: address.to_string(),
            containers: Vec::new(),
            pods: Vec::new(),
        }
    }

    pub fn container(&self, name: &str) -> Option<&ContainerRecord> {
        self.containers.iter().find(|c| c.name == name)
    }

    pub fn pod(&self, name: &str) -> Option<&PodRecord> {
        self.pods.iter().find(|p| p.name == name)
    }

    /// Inserts a container or overwrites the resource and image fields of an existing container
    /// with the same name.
    pub fn upsert_container(&mut self, container: ContainerRecord) {
        match self.containers.iter_mut().find(|c| c.name == container.name) {
            Some(existing) => *existing = container,
            None => self.containers.push(container),
        }
    }

    /// Removes a pod by name, returning it if it was present.
    pub fn remove_pod(&mut self, name: &str) -> Option<PodRecord> {
        let idx = self.pods.iter().position(|p| p.name == name)?;
        Some(self.pods.remove(idx))
    }

    /// Replaces any pod with the same name, moving it to the end of the list.
    pub fn replace_pod(&mut self, pod: PodRecord) {
        self.remove_pod(&pod.name);
        self.pods.push(pod);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_pod(name: &str, running: bool) -> PodRecord {
        PodRecord {
            name: name.to_string(),
            running,
            container_status: "[]".to_string(),
            last_start_time: None,
            restart_count: Some(0),
        }
    }

    #[test]
    fn upsert_container_overwrites_by_name() {
        let mut wl = WorkloadRecord::new("uid-0", "etl-x", "integration", "http://etl-x");
        wl.upsert_container(ContainerRecord {
            name: "integration".to_string(),
            image: Some("etl:1".to_string()),
            ..Default::default()
        });
        wl.upsert_container(ContainerRecord {
            name: "sidecar".to_string(),
            ..Default::default()
        });
        wl.upsert_container(ContainerRecord {
            name: "integration".to_string(),
            image: Some("etl:2".to_string()),
            memory_limit: Some("512Mi".to_string()),
            ..Default::default()
        });

        let names = wl.containers.iter().map(|c| c.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, ["integration", "sidecar"]);
        let integration = wl.container("integration").expect("container must exist");
        assert_eq!(integration.image.as_deref(), Some("etl:2"));
        assert_eq!(integration.memory_limit.as_deref(), Some("512Mi"));
    }

    #[test]
    fn replace_pod_never_duplicates() {
        let mut wl = WorkloadRecord::new("uid-0", "etl-x", "integration", "http://etl-x");
        wl.replace_pod(mk_pod("p1", true));
        wl.replace_pod(mk_pod("p2", true));
        wl.replace_pod(mk_pod("p1", false));

        assert_eq!(wl.pods.len(), 2);
        assert_eq!(wl.pods[1], mk_pod("p1", false));
        assert!(wl.remove_pod("p1").is_some());
        assert!(wl.remove_pod("p1").is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let wl = WorkloadRecord::new("uid-0", "etl-x", "integration", "http://etl-x");
        let json = serde_json::to_value(&wl).unwrap();
        assert_eq!(json["containers"], serde_json::json!([]));
        assert_eq!(json["address"], "http://etl-x");
        assert!(json.get("namespace").is_some());
    }
}
