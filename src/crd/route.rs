//! OpenShift Route, typed for the fields the operator reads and writes

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

pub const TLS_TERMINATION_EDGE: &str = "edge";

/// Route exposes a service at an external host name
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize)]
#[kube(
    group = "route.openshift.io",
    version = "v1",
    kind = "Route",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct RouteSpec {
    #[serde(default)]
    pub host: String,

    pub to: RouteTargetReference,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<RoutePort>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<RouteTls>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wildcard_policy: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteTargetReference {
    pub kind: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePort {
    pub target_port: IntOrString,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTls {
    #[serde(default)]
    pub termination: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insecure_edge_termination_policy: Option<String>,
}

impl RouteSpec {
    /// Route to `service` on its `http` port with edge TLS.
    pub fn edge_to_service(host: impl Into<String>, service: impl Into<String>) -> Self {
        RouteSpec {
            host: host.into(),
            to: RouteTargetReference {
                kind: "Service".to_string(),
                name: service.into(),
            },
            port: Some(RoutePort {
                target_port: IntOrString::String("http".to_string()),
            }),
            tls: Some(RouteTls {
                termination: TLS_TERMINATION_EDGE.to_string(),
                insecure_edge_termination_policy: None,
            }),
            wildcard_policy: None,
        }
    }
}

impl Route {
    /// `https://host` when TLS is configured, `http://host` otherwise.
    pub fn url(&self) -> String {
        let scheme = if self.spec.tls.is_some() { "https" } else { "http" };
        format!("{}://{}", scheme, self.spec.host)
    }
}
