use crate::store::{SharedStore, Store};
use std::{collections::BTreeMap, sync::Arc};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use workload_controller_core::{
    routing::{Destination, SessionAffinity, Transform},
    ClusterConfig, Refreshable, RouteConfig, RoutingTable, RoutingTableSource, RoutingTableStream,
    WorkloadRecord,
};

const CATCH_ALL: &str = "{**catch-all}";
const ROUTE_HEADER: &str = "X-Route";

/// Configures how routes are compiled from workloads.
#[derive(Clone, Debug)]
pub struct RouteSettings {
    /// The path under which all workloads are exposed, e.g. `/proxy`.
    pub proxy_path: String,

    /// When set, destinations are addressed through this host as `{host}/{name}.{namespace}`
    /// instead of through the workload's in-cluster service address.
    pub integrator_host: Option<String>,

    /// The name of the session affinity cookie.
    pub affinity_key_name: String,
}

/// Compiles the routing table from the store and publishes it.
///
/// Tables are never mutated once published. Each compilation installs a new table with the next
/// generation, so a consumer holding a table always sees a consistent view while newer tables are
/// installed.
#[derive(Clone, Debug)]
pub struct Router {
    store: SharedStore,
    settings: Arc<RouteSettings>,
    tx: Arc<watch::Sender<Arc<RoutingTable>>>,
}

// === impl RouteSettings ===

impl Default for RouteSettings {
    fn default() -> Self {
        Self {
            proxy_path: "/proxy".to_string(),
            integrator_host: None,
            affinity_key_name: "ProxySessionAffinity".to_string(),
        }
    }
}

impl RouteSettings {
    fn route_prefix(&self, name: &str) -> String {
        format!("{}/{}", self.proxy_path.trim_end_matches('/'), name)
    }

    fn destination_address(&self, workload: &WorkloadRecord) -> String {
        match self.integrator_host.as_deref().filter(|h| !h.is_empty()) {
            Some(host) => format!(
                "{}/{}.{}",
                host.trim_end_matches('/'),
                workload.name,
                workload.namespace
            ),
            None => workload.address.clone(),
        }
    }
}

// === impl Router ===

impl Router {
    /// Creates a router with an empty table at generation 0.
    pub fn new(store: SharedStore, settings: RouteSettings) -> Self {
        let (tx, _) = watch::channel(Arc::new(RoutingTable::default()));
        Self {
            store,
            settings: Arc::new(settings),
            tx: Arc::new(tx),
        }
    }

    pub fn settings(&self) -> &RouteSettings {
        &self.settings
    }

    /// Returns a receiver that is notified each time a table is installed.
    pub fn subscribe(&self) -> watch::Receiver<Arc<RoutingTable>> {
        self.tx.subscribe()
    }

    pub fn generation(&self) -> u64 {
        self.tx.borrow().generation
    }

    /// Builds one route and one cluster for each workload, in discovery order.
    ///
    /// Routes do not depend on a workload's containers or pods: every known workload is routable.
    pub fn compile(store: &Store, settings: &RouteSettings) -> (Vec<RouteConfig>, Vec<ClusterConfig>) {
        let mut routes = Vec::with_capacity(store.len());
        let mut clusters = Vec::with_capacity(store.len());

        for (order, workload) in (0..).zip(store.iter()) {
            let name = workload.name.as_str();
            let prefix = settings.route_prefix(name);
            let cluster_id = format!("{}-cluster", name);

            routes.push(RouteConfig {
                route_id: format!("{}-etl-route", name),
                cluster_id: cluster_id.clone(),
                path: format!("{}/{}", prefix, CATCH_ALL),
                order,
                transforms: vec![
                    Transform::PathRemovePrefix(prefix.clone()),
                    Transform::RequestHeader {
                        name: ROUTE_HEADER.to_string(),
                        value: prefix,
                    },
                    Transform::XForwarded,
                    Transform::CopyRequestHeaders,
                    Transform::CopyResponseHeaders,
                ],
            });

            let destination = Destination {
                address: settings.destination_address(workload),
            };
            clusters.push(ClusterConfig {
                cluster_id,
                destinations: BTreeMap::from([(name.to_string(), destination)]),
                session_affinity: SessionAffinity::sticky_cookie(&settings.affinity_key_name),
            });
        }

        (routes, clusters)
    }

    /// Replaces the current table and notifies all subscribers.
    fn install(&self, routes: Vec<RouteConfig>, clusters: Vec<ClusterConfig>) -> Arc<RoutingTable> {
        let mut installed = Arc::default();
        self.tx.send_modify(|table| {
            *table = Arc::new(RoutingTable {
                generation: table.generation + 1,
                routes,
                clusters,
            });
            installed = table.clone();
        });
        installed
    }
}

impl Refreshable for Router {
    fn refresh(&self) {
        // The store's read lock is held until the table is installed so that tables are
        // installed in the same order as the store states they were compiled from.
        let store = self.store.read();
        let (routes, clusters) = Self::compile(&store, &self.settings);
        let table = self.install(routes, clusters);
        drop(store);

        tracing::info!(
            generation = table.generation,
            routes = table.routes.len(),
            "Published routing table"
        );
    }
}

impl RoutingTableSource for Router {
    fn current(&self) -> Arc<RoutingTable> {
        self.tx.borrow().clone()
    }

    fn watch(&self) -> RoutingTableStream {
        Box::pin(WatchStream::new(self.tx.subscribe()))
    }

    fn publish(&self, routes: Vec<RouteConfig>, clusters: Vec<ClusterConfig>) -> Arc<RoutingTable> {
        let table = self.install(routes, clusters);
        tracing::info!(
            generation = table.generation,
            routes = table.routes.len(),
            "Published routing table override"
        );
        table
    }
}
