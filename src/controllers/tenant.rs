//! ApiTenant Controller
//!
//! Waits for the parent ApiPlatform to be ready, signs the tenant up once,
//! then keeps its credentials, routes, users and auth providers in place.

use std::sync::Arc;

use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{error_policy_backoff, now, Context};
use crate::conditions::{
    build_condition, set_condition, CONDITION_ENTITIES_SYNCED, CONDITION_FALSE, CONDITION_READY,
    CONDITION_TRUE, TENANT_CONDITION_PROVISIONED,
};
use crate::credentials::ADMIN_ACCESS_TOKEN;
use crate::crd::{controller_owner, namespace_of, ApiPlatform, ApiTenant};
use crate::error::{OperatorError, Result};
use crate::sync::sync_entities;
use crate::tenancy::ensure_tenant;
use crate::tenant_api::from_credentials;

pub struct TenantController {
    ctx: Arc<Context>,
}

impl TenantController {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run the ApiTenant controller until shutdown
    pub async fn run(self: Arc<Self>, client: Client) -> Result<()> {
        let tenants: Api<ApiTenant> = match &self.ctx.config.namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let error_delay = self.ctx.config.error_requeue_interval;

        info!("Starting ApiTenant controller");

        Controller::new(tenants, Config::default())
            .shutdown_on_signal()
            .run(
                |tenant, ctx| async move { ctx.reconcile(tenant).await },
                move |tenant, error, _ctx| error_policy_backoff(tenant, error, error_delay),
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => debug!("Reconciled ApiTenant: {}", obj.name),
                    Err(e) => warn!("ApiTenant reconciliation failed: {}", e),
                }
            })
            .await;

        Ok(())
    }

    pub async fn reconcile(&self, trigger: Arc<ApiTenant>) -> Result<Action> {
        let namespace = namespace_of(trigger.as_ref());
        let name = trigger.name_any();

        let Some(current) = self.ctx.store.get_tenant(&namespace, &name).await? else {
            debug!(namespace = %namespace, name = %name, "ApiTenant no longer exists");
            return Ok(Action::await_change());
        };
        if current.metadata.deletion_timestamp.is_some() {
            return Ok(Action::await_change());
        }

        info!(namespace = %namespace, name = %name, tenant_id = current.tenant_id(), "Reconciling ApiTenant");

        match self.run_pass(&current).await {
            Ok(action) => Ok(action),
            Err(e) => {
                error!(namespace = %namespace, name = %name, error = %e, "ApiTenant pass failed");
                self.record_failure(&current, &e).await;
                Err(e)
            }
        }
    }

    async fn run_pass(&self, current: &ApiTenant) -> Result<Action> {
        let store = self.ctx.store.as_ref();
        let namespace = namespace_of(current);

        let mut next = current.defaulted();
        next.spec.validate()?;

        let platform = self.parent(&namespace, &next.spec.platform_ref).await?;
        if next.owner_references().is_empty() {
            next.owner_references_mut().push(controller_owner(&platform)?);
        }

        if !platform.is_ready() {
            info!(
                namespace = %namespace,
                name = %next.name_any(),
                platform = %platform.name_any(),
                "Waiting for platform"
            );
            let status = next.status_mut();
            status.ready = false;
            set_condition(
                &mut status.conditions,
                build_condition(
                    TENANT_CONDITION_PROVISIONED,
                    CONDITION_FALSE,
                    "WaitingForPlatform",
                    &format!("platform {} is not ready", platform.name_any()),
                ),
            );
            set_condition(
                &mut status.conditions,
                build_condition(CONDITION_READY, CONDITION_FALSE, "WaitingForPlatform", "platform is not ready"),
            );
            self.persist(current, next).await?;
            return Ok(Action::requeue(self.ctx.config.not_ready_interval));
        }

        let stamped = next.owner_references() != current.owner_references();
        if stamped {
            // stamp the owner before sign-up so the persisted id carries it
            next = store.replace_tenant(&next).await?;
        }

        let provisioned = ensure_tenant(store, self.ctx.tenant_api.as_ref(), &platform, &next).await?;
        if provisioned.signed_up {
            info!(namespace = %namespace, name = %next.name_any(), tenant_id = provisioned.tenant.tenant_id(), "Tenant provisioned");
        }

        let admin_api = from_credentials(self.ctx.tenant_api.as_ref(), &provisioned.credentials, ADMIN_ACCESS_TOKEN)?;
        let summary = sync_entities(
            admin_api.as_ref(),
            &next.spec.users,
            &next.spec.seed_users,
            &next.spec.auth_providers,
        )
        .await?;
        if summary.is_noop() {
            debug!(namespace = %namespace, name = %next.name_any(), "Entities already in sync");
        } else {
            info!(namespace = %namespace, name = %next.name_any(), summary = ?summary, "Synchronized entities");
        }

        // latest snapshot known to be stored
        let base = if stamped || provisioned.signed_up {
            provisioned.tenant.clone()
        } else {
            current.clone()
        };
        let mut next = provisioned.tenant;
        let tenant_id = next.tenant_id();
        let status = next.status_mut();
        status.ready = true;
        set_condition(
            &mut status.conditions,
            build_condition(
                TENANT_CONDITION_PROVISIONED,
                CONDITION_TRUE,
                "SignedUp",
                &format!("tenant id {}", tenant_id),
            ),
        );
        set_condition(
            &mut status.conditions,
            build_condition(CONDITION_ENTITIES_SYNCED, CONDITION_TRUE, "Synced", "users and auth providers in sync"),
        );
        set_condition(
            &mut status.conditions,
            build_condition(CONDITION_READY, CONDITION_TRUE, "Ready", "tenant is provisioned"),
        );
        self.persist(&base, next).await?;

        Ok(Action::requeue(self.ctx.config.resync_interval))
    }

    async fn parent(&self, namespace: &str, platform_ref: &str) -> Result<ApiPlatform> {
        self.ctx
            .store
            .get_platform(namespace, platform_ref)
            .await?
            .ok_or_else(|| OperatorError::NotFound(format!("platform {}/{}", namespace, platform_ref)))
    }

    /// `base` is the latest persisted snapshot `next` was derived from.
    async fn persist(&self, base: &ApiTenant, mut next: ApiTenant) -> Result<()> {
        let store = self.ctx.store.as_ref();
        let mut resource_version = base.metadata.resource_version.clone();
        if next.spec != base.spec || next.metadata.owner_references != base.metadata.owner_references {
            let persisted = store.replace_tenant(&next).await?;
            resource_version = persisted.metadata.resource_version;
        }

        let status = next.status_mut();
        status.last_updated = Some(now());
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        store
            .patch_tenant_status(&namespace_of(base), &base.name_any(), patch)
            .await
    }

    async fn record_failure(&self, current: &ApiTenant, error: &OperatorError) {
        let mut conditions = current
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        set_condition(
            &mut conditions,
            build_condition(CONDITION_READY, CONDITION_FALSE, "ReconcileFailed", &error.to_string()),
        );
        // no resourceVersion: a sign-up in this pass may already have bumped it
        let patch = json!({
            "status": {
                "ready": false,
                "conditions": conditions,
                "lastUpdated": now(),
            },
        });
        if let Err(e) = self
            .ctx
            .store
            .patch_tenant_status(&namespace_of(current), &current.name_any(), patch)
            .await
        {
            warn!(name = %current.name_any(), error = %e, "Failed to record ApiTenant failure");
        }
    }
}
