//! Cluster access used by reconciliation passes
//!
//! Every read and write a pass makes against the host control plane goes
//! through [`ClusterStore`], so phase logic can be exercised with a mock.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Secret};
use kube::api::{
    Api, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams, PostParams,
};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde_json::Value;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::crd::{ApiPlatform, ApiTenant, Route};
use crate::error::{OperatorError, Result};

/// Field manager recorded on status patches
pub const FIELD_MANAGER: &str = "apiplatform-operator";

/// Trait abstracting Kubernetes operations for both controllers
///
/// `create_*` calls surface `OperatorError::AlreadyExists` when the object is
/// already present; `replace_*` calls surface `OperatorError::Conflict` when
/// the object changed since it was read.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterStore: Send + Sync {
    async fn get_platform(&self, namespace: &str, name: &str) -> Result<Option<ApiPlatform>>;

    /// Replace spec and metadata, guarded by `metadata.resourceVersion`
    async fn replace_platform(&self, platform: &ApiPlatform) -> Result<ApiPlatform>;

    /// Merge-patch the status subresource
    async fn patch_platform_status(&self, namespace: &str, name: &str, patch: Value)
        -> Result<()>;

    async fn get_tenant(&self, namespace: &str, name: &str) -> Result<Option<ApiTenant>>;

    async fn replace_tenant(&self, tenant: &ApiTenant) -> Result<ApiTenant>;

    async fn patch_tenant_status(&self, namespace: &str, name: &str, patch: Value) -> Result<()>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>>;

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret>;

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>>;

    async fn get_route(&self, namespace: &str, name: &str) -> Result<Option<Route>>;

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route>;

    /// Create an arbitrary rendered object; the kind is taken from its type meta
    async fn create_object(&self, namespace: &str, object: &DynamicObject) -> Result<()>;
}

/// Real Kubernetes client implementation
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, namespace: &str, object: &DynamicObject) -> Result<Api<DynamicObject>> {
        let types = object.types.as_ref().ok_or_else(|| {
            OperatorError::invalid_state(format!(
                "rendered object {} has no apiVersion/kind",
                object.name_any()
            ))
        })?;
        let (group, version) = match types.api_version.split_once('/') {
            Some((group, version)) => (group.to_string(), version.to_string()),
            None => (String::new(), types.api_version.clone()),
        };
        let gvk = GroupVersionKind {
            group,
            version,
            kind: types.kind.clone(),
        };
        let api_resource = ApiResource::from_gvk(&gvk);
        Ok(Api::namespaced_with(self.client.clone(), namespace, &api_resource))
    }
}

fn status_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_platform(&self, namespace: &str, name: &str) -> Result<Option<ApiPlatform>> {
        let api: Api<ApiPlatform> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| OperatorError::kube(format!("get ApiPlatform {}/{}", namespace, name), e))
    }

    async fn replace_platform(&self, platform: &ApiPlatform) -> Result<ApiPlatform> {
        let namespace = crate::crd::namespace_of(platform);
        let name = platform.name_any();
        let api: Api<ApiPlatform> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), platform)
            .await
            .map_err(|e| OperatorError::kube(format!("update ApiPlatform {}/{}", namespace, name), e))
    }

    async fn patch_platform_status(
        &self,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> Result<()> {
        let api: Api<ApiPlatform> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &status_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                OperatorError::kube(format!("update ApiPlatform status {}/{}", namespace, name), e)
            })?;
        Ok(())
    }

    async fn get_tenant(&self, namespace: &str, name: &str) -> Result<Option<ApiTenant>> {
        let api: Api<ApiTenant> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| OperatorError::kube(format!("get ApiTenant {}/{}", namespace, name), e))
    }

    async fn replace_tenant(&self, tenant: &ApiTenant) -> Result<ApiTenant> {
        let namespace = crate::crd::namespace_of(tenant);
        let name = tenant.name_any();
        let api: Api<ApiTenant> = Api::namespaced(self.client.clone(), &namespace);
        api.replace(&name, &PostParams::default(), tenant)
            .await
            .map_err(|e| OperatorError::kube(format!("update ApiTenant {}/{}", namespace, name), e))
    }

    async fn patch_tenant_status(&self, namespace: &str, name: &str, patch: Value) -> Result<()> {
        let api: Api<ApiTenant> = Api::namespaced(self.client.clone(), namespace);
        api.patch_status(name, &status_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| {
                OperatorError::kube(format!("update ApiTenant status {}/{}", namespace, name), e)
            })?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| OperatorError::kube(format!("get Secret {}/{}", namespace, name), e))
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await.map_err(|e| {
            OperatorError::kube(format!("create Secret {}/{}", namespace, secret.name_any()), e)
        })
    }

    async fn replace_secret(&self, namespace: &str, secret: &Secret) -> Result<Secret> {
        let name = secret.name_any();
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(&name, &PostParams::default(), secret)
            .await
            .map_err(|e| OperatorError::kube(format!("update Secret {}/{}", namespace, name), e))
    }

    async fn list_pods(&self, namespace: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| OperatorError::kube(format!("list Pods in {}", namespace), e))?;
        Ok(pods.items)
    }

    async fn get_route(&self, namespace: &str, name: &str) -> Result<Option<Route>> {
        let api: Api<Route> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name)
            .await
            .map_err(|e| OperatorError::kube(format!("get Route {}/{}", namespace, name), e))
    }

    async fn create_route(&self, namespace: &str, route: &Route) -> Result<Route> {
        let api: Api<Route> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), route).await.map_err(|e| {
            OperatorError::kube(format!("create Route {}/{}", namespace, route.name_any()), e)
        })
    }

    async fn create_object(&self, namespace: &str, object: &DynamicObject) -> Result<()> {
        let api = self.dynamic_api(namespace, object)?;
        let kind = object.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default();
        debug!(namespace = %namespace, kind = %kind, name = %object.name_any(), "Creating install object");
        api.create(&PostParams::default(), object).await.map_err(|e| {
            OperatorError::kube(
                format!("create {} {}/{}", kind, namespace, object.name_any()),
                e,
            )
        })?;
        Ok(())
    }
}
