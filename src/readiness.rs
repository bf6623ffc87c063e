//! Readiness prober
//!
//! An install is ready when every workload pod reports Ready and the admin
//! routes resolve. The externally reachable URLs are written into the
//! credential Secrets before readiness is reported, since API clients read
//! them from there.

use k8s_openapi::api::core::v1::{Pod, Secret};
use tracing::{debug, info};

use crate::credentials::{ensure_value, ADMIN_URL};
use crate::error::{OperatorError, Result};
use crate::store::ClusterStore;

pub const ADMIN_ROUTE: &str = "system-provider-admin-route";
pub const MASTER_ROUTE: &str = "system-master-admin-route";

const POD_SUCCEEDED: &str = "Succeeded";

/// Pod counts towards readiness unless it ran to completion.
fn is_workload(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) != Some(POD_SUCCEEDED)
}

pub fn pod_is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        .unwrap_or(false)
}

/// False when there are no workload pods or any of them is not Ready.
pub fn pods_ready(pods: &[Pod]) -> bool {
    let mut workloads = pods.iter().filter(|p| is_workload(p)).peekable();
    if workloads.peek().is_none() {
        return false;
    }
    workloads.all(pod_is_ready)
}

/// URL of a route; a missing route is a not-found error.
pub async fn route_url(store: &dyn ClusterStore, namespace: &str, name: &str) -> Result<String> {
    let route = store
        .get_route(namespace, name)
        .await?
        .ok_or_else(|| OperatorError::NotFound(format!("route {}/{}", namespace, name)))?;
    Ok(route.url())
}

/// Resolve `route_name` and store its URL as `ADMIN_URL` in `secret`.
pub async fn publish_url(
    store: &dyn ClusterStore,
    namespace: &str,
    route_name: &str,
    secret: &Secret,
) -> Result<Secret> {
    let url = route_url(store, namespace, route_name).await?;
    debug!(namespace = %namespace, route = %route_name, url = %url, "Resolved route");
    ensure_value(store, namespace, secret, ADMIN_URL, &url).await
}

/// Outcome of [`probe`]
#[derive(Debug, Clone)]
pub enum Readiness {
    NotReady,
    /// Credentials as stored after their URLs were published
    Ready {
        admin_credentials: Secret,
        master_credentials: Secret,
    },
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        matches!(self, Readiness::Ready { .. })
    }
}

/// Check workload health and publish the admin and master URLs.
pub async fn probe(
    store: &dyn ClusterStore,
    namespace: &str,
    admin_credentials: &Secret,
    master_credentials: &Secret,
) -> Result<Readiness> {
    let pods = store.list_pods(namespace).await?;
    if !pods_ready(&pods) {
        let not_ready = pods.iter().filter(|p| is_workload(p) && !pod_is_ready(p)).count();
        info!(namespace = %namespace, pods = pods.len(), not_ready = not_ready, "Install not ready");
        return Ok(Readiness::NotReady);
    }

    let admin_credentials = publish_url(store, namespace, ADMIN_ROUTE, admin_credentials).await?;
    let master_credentials = publish_url(store, namespace, MASTER_ROUTE, master_credentials).await?;
    Ok(Readiness::Ready {
        admin_credentials,
        master_credentials,
    })
}
