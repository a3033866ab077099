use futures::prelude::*;
use serde::Serialize;
use std::{collections::BTreeMap, pin::Pin, sync::Arc};

/// A capability to recompute derived state from the current snapshot.
///
/// The API layer holds this after it creates or removes workloads out of band so that it can
/// force the routing table to be rebuilt without knowing which component builds it.
pub trait Refreshable {
    fn refresh(&self);
}

/// Models the routing table consumed by the forwarding layer.
pub trait RoutingTableSource {
    /// Returns the currently installed table.
    fn current(&self) -> Arc<RoutingTable>;

    /// Returns a stream that yields the current table and then every table that supersedes it.
    fn watch(&self) -> RoutingTableStream;

    /// Installs a table built elsewhere, replacing the current one.
    fn publish(&self, routes: Vec<RouteConfig>, clusters: Vec<ClusterConfig>)
        -> Arc<RoutingTable>;
}

pub type RoutingTableStream = Pin<Box<dyn Stream<Item = Arc<RoutingTable>> + Send + Sync + 'static>>;

/// An immutable routing table. Tables are never modified once published; a new table with a
/// greater generation replaces them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingTable {
    pub generation: u64,
    pub routes: Vec<RouteConfig>,
    pub clusters: Vec<ClusterConfig>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteConfig {
    pub route_id: String,
    pub cluster_id: String,

    /// A path template, e.g. `/proxy/etl-x/{**catch-all}`.
    pub path: String,

    /// Lower values are matched first.
    pub order: i32,

    pub transforms: Vec<Transform>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Transform {
    PathRemovePrefix(String),
    RequestHeader { name: String, value: String },
    XForwarded,
    CopyRequestHeaders,
    CopyResponseHeaders,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfig {
    pub cluster_id: String,
    pub destinations: BTreeMap<String, Destination>,
    pub session_affinity: SessionAffinity,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    pub address: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAffinity {
    pub enabled: bool,
    pub policy: AffinityPolicy,
    pub failure_policy: AffinityFailurePolicy,
    pub affinity_key_name: String,
    pub cookie: AffinityCookie,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AffinityPolicy {
    Cookie,
}

/// What to do when the pinned destination is unavailable.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum AffinityFailurePolicy {
    /// Pick a new destination and re-pin the client.
    Redistribute,
    /// Fail the request.
    Return503Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AffinityCookie {
    pub same_site: SameSite,
    pub secure: CookieSecurePolicy,
    pub http_only: bool,
    pub is_essential: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SameSite {
    None,
    Lax,
    Strict,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum CookieSecurePolicy {
    SameAsRequest,
    Always,
    None,
}

// === impl RoutingTable ===

impl RoutingTable {
    pub fn route(&self, route_id: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.route_id == route_id)
    }

    pub fn cluster(&self, cluster_id: &str) -> Option<&ClusterConfig> {
        self.clusters.iter().find(|c| c.cluster_id == cluster_id)
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.clusters.is_empty()
    }
}

// === impl SessionAffinity ===

impl SessionAffinity {
    /// Cookie-based affinity that redistributes when the pinned destination is unavailable.
    pub fn sticky_cookie(affinity_key_name: impl ToString) -> Self {
        Self {
            enabled: true,
            policy: AffinityPolicy::Cookie,
            failure_policy: AffinityFailurePolicy::Redistribute,
            affinity_key_name: affinity_key_name.to_string(),
            cookie: AffinityCookie {
                same_site: SameSite::None,
                secure: CookieSecurePolicy::Always,
                http_only: true,
                is_essential: true,
            },
        }
    }
}
