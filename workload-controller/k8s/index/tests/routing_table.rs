use std::{collections::BTreeMap, sync::Arc};
use workload_controller_core::{
    routing::{Destination, SessionAffinity},
    ClusterConfig, RouteConfig, RoutingTable, RoutingTableSource,
};
use workload_controller_k8s_index::{ClusterInfo, RouteSettings, Router, Store};

const PUBLISHERS: usize = 4;
const READERS: usize = 8;
const TABLES_PER_PUBLISHER: usize = 200;

fn mk_router() -> Router {
    let store = Store::shared(ClusterInfo {
        namespace: "integration".to_string(),
        correlation_label: "worker-name".to_string(),
        dns_domain: "cluster.local".to_string(),
    });
    Router::new(store, RouteSettings::default())
}

/// Builds a table in which every route and cluster is tagged with the same publication.
fn mk_table(tag: &str, size: usize) -> (Vec<RouteConfig>, Vec<ClusterConfig>) {
    (0..size)
        .map(|i| {
            let name = format!("{}-{}", tag, i);
            let route = RouteConfig {
                route_id: format!("{}-etl-route", name),
                cluster_id: format!("{}-cluster", name),
                path: format!("/proxy/{}/{{**catch-all}}", name),
                order: i as i32,
                transforms: Vec::new(),
            };
            let cluster = ClusterConfig {
                cluster_id: format!("{}-cluster", name),
                destinations: BTreeMap::from([(
                    name.clone(),
                    Destination {
                        address: format!("http://{}.integration.svc.cluster.local.", name),
                    },
                )]),
                session_affinity: SessionAffinity::sticky_cookie("ProxySessionAffinity"),
            };
            (route, cluster)
        })
        .unzip()
}

/// Asserts that a table was published as a whole.
fn assert_consistent(table: &RoutingTable) {
    assert_eq!(table.routes.len(), table.clusters.len());
    let Some(first) = table.routes.first() else {
        return;
    };
    let tag = first.route_id.split('-').next();
    for (route, cluster) in table.routes.iter().zip(&table.clusters) {
        assert_eq!(route.cluster_id, cluster.cluster_id);
        assert_eq!(
            route.route_id.split('-').next(),
            tag,
            "table {} mixes publications",
            table.generation
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_observe_torn_tables() {
    let router = mk_router();

    let readers = (0..READERS)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move {
                let mut last = 0;
                let mut observed = 0usize;
                while last < (PUBLISHERS * TABLES_PER_PUBLISHER) as u64 {
                    let table = router.current();
                    assert_consistent(&table);
                    assert!(table.generation >= last, "generations must not go backwards");
                    last = table.generation;
                    observed += 1;
                    tokio::task::yield_now().await;
                }
                observed
            })
        })
        .collect::<Vec<_>>();

    let publishers = (0..PUBLISHERS)
        .map(|p| {
            let router = router.clone();
            tokio::spawn(async move {
                for n in 0..TABLES_PER_PUBLISHER {
                    let tag = format!("p{}n{}", p, n);
                    let (routes, clusters) = mk_table(&tag, 1 + (n % 5));
                    let table = router.publish(routes, clusters);
                    assert_consistent(&table);
                    tokio::task::yield_now().await;
                }
            })
        })
        .collect::<Vec<_>>();

    for publisher in publishers {
        publisher.await.expect("publisher must not panic");
    }
    for reader in readers {
        assert!(reader.await.expect("reader must not panic") > 0);
    }

    let table = router.current();
    assert_eq!(table.generation, (PUBLISHERS * TABLES_PER_PUBLISHER) as u64);
    assert_consistent(&table);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn held_tables_are_immutable() {
    let router = mk_router();
    let (routes, clusters) = mk_table("a", 3);
    let held: Arc<RoutingTable> = router.publish(routes, clusters);

    let (routes, clusters) = mk_table("b", 1);
    router.publish(routes, clusters);

    assert_eq!(held.generation, 1);
    assert_eq!(held.routes.len(), 3);
    assert_eq!(router.current().generation, 2);
    assert_eq!(router.current().routes.len(), 1);
}
