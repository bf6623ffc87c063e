//! Tenant provisioner
//!
//! Signs up a tenant account on the parent platform once, then keeps the
//! tenant's credential Secret and routes in place. Sign-up is the only step
//! that is not re-entrant: it runs only while the tenant id is 0, and the id
//! is persisted right after the call returns.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::credentials::{create_or_get, opaque_secret, ADMIN_ACCESS_TOKEN, MASTER_ACCESS_TOKEN};
use crate::crd::{controller_owner, namespace_of, ApiPlatform, ApiTenant, Route, RouteSpec, SignupRequest};
use crate::error::{OperatorError, Result};
use crate::readiness::publish_url;
use crate::store::ClusterStore;
use crate::tenant_api::{from_credentials, TenantServiceFactory};

pub const PROVIDER_SERVICE: &str = "system-provider";
pub const DEVELOPER_SERVICE: &str = "system-developer";

pub fn admin_route_name(tenant: &ApiTenant) -> String {
    format!("{}-provider-admin-route", tenant.name_any())
}

pub fn developer_route_name(tenant: &ApiTenant) -> String {
    format!("{}-provider-developer-route", tenant.name_any())
}

/// Outcome of [`ensure_tenant`]
#[derive(Debug, Clone)]
pub struct ProvisionedTenant {
    /// Latest persisted snapshot of the tenant
    pub tenant: ApiTenant,
    /// Credential Secret with ADMIN_ACCESS_TOKEN and ADMIN_URL
    pub credentials: Secret,
    /// Whether sign-up ran in this call
    pub signed_up: bool,
}

/// Sign up the tenant if needed, then ensure its credentials and routes.
///
/// `tenant` is not modified; when sign-up runs, the returned snapshot
/// carries the new id and has already been persisted.
pub async fn ensure_tenant(
    store: &dyn ClusterStore,
    factory: &dyn TenantServiceFactory,
    platform: &ApiPlatform,
    tenant: &ApiTenant,
) -> Result<ProvisionedTenant> {
    let namespace = namespace_of(tenant);
    let secret_name = tenant.admin_credentials_name();

    let (tenant, credentials, signed_up) = if tenant.is_provisioned() {
        let credentials = store.get_secret(&namespace, &secret_name).await?.ok_or_else(|| {
            OperatorError::invalid_state(format!(
                "tenant {} is signed up (id {}) but credential {}/{} is missing",
                tenant.name_any(),
                tenant.tenant_id(),
                namespace,
                secret_name
            ))
        })?;
        (tenant.clone(), credentials, false)
    } else {
        let (persisted, credentials) = sign_up(store, factory, platform, tenant, &secret_name).await?;
        (persisted, credentials, true)
    };

    let owner = controller_owner(&tenant)?;
    let account = &tenant.spec.tenant;
    ensure_route(
        store,
        &namespace,
        &admin_route_name(&tenant),
        RouteSpec::edge_to_service(require_host(&account.admin_domain, "admin_domain")?, PROVIDER_SERVICE),
        &owner,
    )
    .await?;
    ensure_route(
        store,
        &namespace,
        &developer_route_name(&tenant),
        RouteSpec::edge_to_service(require_host(&account.domain, "domain")?, DEVELOPER_SERVICE),
        &owner,
    )
    .await?;

    let credentials = publish_url(store, &namespace, &admin_route_name(&tenant), &credentials).await?;

    Ok(ProvisionedTenant {
        tenant,
        credentials,
        signed_up,
    })
}

async fn sign_up(
    store: &dyn ClusterStore,
    factory: &dyn TenantServiceFactory,
    platform: &ApiPlatform,
    tenant: &ApiTenant,
    secret_name: &str,
) -> Result<(ApiTenant, Secret)> {
    let namespace = namespace_of(tenant);
    let master_name = platform.master_credentials_name();
    let master = store
        .get_secret(&namespace_of(platform), &master_name)
        .await?
        .ok_or_else(|| OperatorError::NotFound(format!("master credential {}", master_name)))?;
    let master_api = from_credentials(factory, &master, MASTER_ACCESS_TOKEN)?;

    let request = SignupRequest {
        org_name: tenant.spec.name.clone(),
        username: tenant.spec.admin_username.clone(),
        email: tenant.spec.admin_email.clone(),
        password: tenant.spec.admin_password.clone(),
    };
    info!(namespace = %namespace, tenant = %tenant.name_any(), org = %request.org_name, "Signing up tenant");
    let signup = master_api.sign_up(&request).await?;

    let mut updated = tenant.clone();
    updated.spec.tenant = signup.account;
    updated.spec.admin_credentials = Some(secret_name.to_string());
    let persisted = store.replace_tenant(&updated).await.map_err(|e| {
        warn!(
            namespace = %namespace,
            tenant = %tenant.name_any(),
            tenant_id = updated.spec.tenant.id,
            "Tenant signed up but its id could not be persisted"
        );
        e
    })?;
    info!(namespace = %namespace, tenant = %tenant.name_any(), tenant_id = persisted.tenant_id(), "Tenant signed up");

    let owner = controller_owner(&persisted)?;
    let secret = opaque_secret(
        secret_name,
        BTreeMap::from([(ADMIN_ACCESS_TOKEN.to_string(), signup.access_token.value)]),
        Some(owner),
    );
    let credentials = create_or_get(store, &namespace, &secret).await?;
    Ok((persisted, credentials))
}

fn require_host<'a>(host: &'a str, field: &str) -> Result<&'a str> {
    if host.is_empty() {
        return Err(OperatorError::invalid_state(format!("tenant account has no {}", field)));
    }
    Ok(host)
}

/// Get-or-create an owned route.
pub async fn ensure_route(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    spec: RouteSpec,
    owner: &OwnerReference,
) -> Result<Route> {
    if let Some(existing) = store.get_route(namespace, name).await? {
        return Ok(existing);
    }

    let mut route = Route::new(name, spec);
    route.metadata.namespace = Some(namespace.to_string());
    route.metadata.owner_references = Some(vec![owner.clone()]);

    match store.create_route(namespace, &route).await {
        Ok(created) => {
            info!(namespace = %namespace, route = %name, host = %created.spec.host, "Created route");
            Ok(created)
        }
        Err(e) if e.is_already_exists() => store
            .get_route(namespace, name)
            .await?
            .ok_or_else(|| OperatorError::NotFound(format!("route {}/{}", namespace, name))),
        Err(e) => Err(e),
    }
}
