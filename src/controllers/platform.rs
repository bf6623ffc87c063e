//! ApiPlatform Controller
//!
//! Drives an ApiPlatform through its phases:
//!
//! | phase        | pass                                                 | next         |
//! |--------------|------------------------------------------------------|--------------|
//! | (none)       | apply defaults, validate                             | credentials  |
//! | credentials  | get-or-create admin and master credentials           | reconcile    |
//! | reconcile    | materialize install, probe, sync users and providers | reconcile    |
//!
//! Every pass works on a copy of the object it read. The copy is persisted
//! only when the whole pass succeeded; a failed pass records `Ready=False`
//! through the status subresource and leaves the phase where it was.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config;
use kube::{Client, ResourceExt};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{error_policy_backoff, now, Context};
use crate::conditions::{
    build_condition, set_condition, CONDITION_ENTITIES_SYNCED, CONDITION_FALSE, CONDITION_READY,
    CONDITION_TRUE, PLATFORM_CONDITION_CREDENTIALS, PLATFORM_CONDITION_INSTALLED,
};
use crate::credentials::{ensure_opaque_credential, ADMIN_ACCESS_TOKEN, MASTER_ACCESS_TOKEN};
use crate::crd::{controller_owner, namespace_of, ApiPlatform, Phase, PLATFORM_VERSION};
use crate::error::{OperatorError, Result};
use crate::install::{install_params, materialize};
use crate::readiness::{probe, Readiness};
use crate::sync::sync_entities;
use crate::tenant_api::from_credentials;

/// New snapshot produced by a successful pass
struct PassOutcome {
    platform: ApiPlatform,
    requeue_after: Duration,
}

pub struct PlatformController {
    ctx: Arc<Context>,
}

impl PlatformController {
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run the ApiPlatform controller until shutdown
    pub async fn run(self: Arc<Self>, client: Client) -> Result<()> {
        let platforms: Api<ApiPlatform> = match &self.ctx.config.namespace {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let error_delay = self.ctx.config.error_requeue_interval;

        info!("Starting ApiPlatform controller");

        Controller::new(platforms, Config::default())
            .shutdown_on_signal()
            .run(
                |platform, ctx| async move { ctx.reconcile(platform).await },
                move |platform, error, _ctx| error_policy_backoff(platform, error, error_delay),
                Arc::clone(&self),
            )
            .for_each(|result| async move {
                match result {
                    Ok((obj, _action)) => debug!("Reconciled ApiPlatform: {}", obj.name),
                    Err(e) => warn!("ApiPlatform reconciliation failed: {}", e),
                }
            })
            .await;

        Ok(())
    }

    /// One reconciliation pass for the object behind `trigger`.
    pub async fn reconcile(&self, trigger: Arc<ApiPlatform>) -> Result<Action> {
        let namespace = namespace_of(trigger.as_ref());
        let name = trigger.name_any();

        let Some(current) = self.ctx.store.get_platform(&namespace, &name).await? else {
            debug!(namespace = %namespace, name = %name, "ApiPlatform no longer exists");
            return Ok(Action::await_change());
        };
        if current.metadata.deletion_timestamp.is_some() {
            // owned objects are garbage-collected through their owner references
            return Ok(Action::await_change());
        }

        let phase = current.phase();
        info!(namespace = %namespace, name = %name, phase = %phase.as_str(), "Reconciling ApiPlatform");

        let result = match phase {
            Phase::NoPhase => self.initialise(&current),
            Phase::ProvisionCredentials => self.provision_credentials(&current).await,
            Phase::ReconcileInstall => self.reconcile_install(&current).await,
        };

        match result {
            Ok(outcome) => {
                self.persist(&current, outcome.platform).await?;
                Ok(Action::requeue(outcome.requeue_after))
            }
            Err(e) => {
                error!(namespace = %namespace, name = %name, phase = %phase.as_str(), error = %e, "ApiPlatform pass failed");
                self.record_failure(&current, &e).await;
                Err(e)
            }
        }
    }

    /// Defaults and validation; a spec that fails validation stays in NoPhase.
    fn initialise(&self, platform: &ApiPlatform) -> Result<PassOutcome> {
        let mut next = platform.defaulted();
        next.spec.validate()?;

        let status = next.status_mut();
        status.phase = Phase::NoPhase.next();
        status.ready = false;
        set_condition(
            &mut status.conditions,
            build_condition(CONDITION_READY, CONDITION_FALSE, "Provisioning", "spec accepted"),
        );

        Ok(PassOutcome {
            platform: next,
            requeue_after: self.ctx.config.not_ready_interval,
        })
    }

    async fn provision_credentials(&self, platform: &ApiPlatform) -> Result<PassOutcome> {
        let store = self.ctx.store.as_ref();
        let namespace = namespace_of(platform);
        let owner = controller_owner(platform)?;

        let admin_name = platform.admin_credentials_name();
        let master_name = platform.master_credentials_name();
        ensure_opaque_credential(store, &namespace, &admin_name, ADMIN_ACCESS_TOKEN, &owner).await?;
        ensure_opaque_credential(store, &namespace, &master_name, MASTER_ACCESS_TOKEN, &owner).await?;

        let mut next = platform.defaulted();
        next.spec.admin_credentials = Some(admin_name.clone());
        next.spec.master_credentials = Some(master_name.clone());

        let status = next.status_mut();
        status.phase = Phase::ProvisionCredentials.next();
        set_condition(
            &mut status.conditions,
            build_condition(
                PLATFORM_CONDITION_CREDENTIALS,
                CONDITION_TRUE,
                "CredentialsProvisioned",
                &format!("credentials in {} and {}", admin_name, master_name),
            ),
        );

        Ok(PassOutcome {
            platform: next,
            requeue_after: self.ctx.config.not_ready_interval,
        })
    }

    async fn reconcile_install(&self, platform: &ApiPlatform) -> Result<PassOutcome> {
        let store = self.ctx.store.as_ref();
        let namespace = namespace_of(platform);
        let mut next = platform.defaulted();

        let admin = self.require_secret(&namespace, &next.admin_credentials_name()).await?;
        let master = self.require_secret(&namespace, &next.master_credentials_name()).await?;

        let params = install_params(&next, &admin, &master);
        materialize(store, self.ctx.renderer.as_ref(), &next, &params).await?;

        let readiness = probe(store, &namespace, &admin, &master).await?;
        let status = next.status_mut();
        set_condition(
            &mut status.conditions,
            build_condition(PLATFORM_CONDITION_INSTALLED, CONDITION_TRUE, "Materialized", "install resources created"),
        );

        let Readiness::Ready { admin_credentials, .. } = readiness else {
            status.ready = false;
            set_condition(
                &mut status.conditions,
                build_condition(CONDITION_READY, CONDITION_FALSE, "WaitingForWorkloads", "install is not ready yet"),
            );
            return Ok(PassOutcome {
                platform: next,
                requeue_after: self.ctx.config.not_ready_interval,
            });
        };

        let admin_api = from_credentials(self.ctx.tenant_api.as_ref(), &admin_credentials, ADMIN_ACCESS_TOKEN)?;
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

        let status = next.status_mut();
        status.ready = true;
        status.version = PLATFORM_VERSION.to_string();
        set_condition(
            &mut status.conditions,
            build_condition(CONDITION_READY, CONDITION_TRUE, "Ready", "platform is installed and reachable"),
        );
        set_condition(
            &mut status.conditions,
            build_condition(CONDITION_ENTITIES_SYNCED, CONDITION_TRUE, "Synced", "users and auth providers in sync"),
        );

        Ok(PassOutcome {
            platform: next,
            requeue_after: self.ctx.config.resync_interval,
        })
    }

    /// Replace spec/metadata when they changed, then patch status, both
    /// guarded by the resourceVersion that was read.
    async fn persist(&self, current: &ApiPlatform, mut next: ApiPlatform) -> Result<()> {
        let namespace = namespace_of(current);
        let name = current.name_any();
        let store = self.ctx.store.as_ref();

        let mut resource_version = current.metadata.resource_version.clone();
        if next.spec != current.spec || next.metadata.owner_references != current.metadata.owner_references {
            let persisted = store.replace_platform(&next).await?;
            resource_version = persisted.metadata.resource_version;
        }

        let status = next.status_mut();
        status.observed_generation = current.metadata.generation;
        status.last_updated = Some(now());
        let patch = json!({
            "metadata": { "resourceVersion": resource_version },
            "status": status,
        });
        store.patch_platform_status(&namespace, &name, patch).await
    }

    async fn require_secret(&self, namespace: &str, name: &str) -> Result<Secret> {
        self.ctx
            .store
            .get_secret(namespace, name)
            .await?
            .ok_or_else(|| OperatorError::NotFound(format!("credential {}/{}", namespace, name)))
    }

    /// Record `Ready=False` without touching the phase or the spec.
    async fn record_failure(&self, current: &ApiPlatform, error: &OperatorError) {
        let mut conditions = current
            .status
            .as_ref()
            .map(|s| s.conditions.clone())
            .unwrap_or_default();
        set_condition(
            &mut conditions,
            build_condition(CONDITION_READY, CONDITION_FALSE, "ReconcileFailed", &error.to_string()),
        );
        let patch = json!({
            "metadata": { "resourceVersion": current.metadata.resource_version },
            "status": {
                "ready": false,
                "conditions": conditions,
                "lastUpdated": now(),
            },
        });
        if let Err(e) = self
            .ctx
            .store
            .patch_platform_status(&namespace_of(current), &current.name_any(), patch)
            .await
        {
            warn!(name = %current.name_any(), error = %e, "Failed to record ApiPlatform failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OperatorConfig;
    use crate::credentials::{opaque_secret, ADMIN_URL};
    use crate::crd::{PlatformSpec, PlatformStatus, Route, RouteSpec, User};
    use crate::install::MockResourceRenderer;
    use crate::store::MockClusterStore;
    use crate::tenant_api::{MockTenantService, MockTenantServiceFactory};
    use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
    use mockall::predicate::eq;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn platform(phase: Option<Phase>) -> ApiPlatform {
        let mut platform = ApiPlatform::new(
            "demo",
            PlatformSpec {
                route_suffix: "apps.example.com".to_string(),
                users: vec![User {
                    username: "alice".to_string(),
                    email: "alice@example.com".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            },
        );
        platform.metadata.namespace = Some("apip".to_string());
        platform.metadata.uid = Some("uid-1".to_string());
        platform.metadata.resource_version = Some("7".to_string());
        platform.metadata.generation = Some(2);
        platform.status = phase.map(|phase| PlatformStatus {
            phase,
            ..Default::default()
        });
        platform
    }

    fn controller(
        store: MockClusterStore,
        factory: MockTenantServiceFactory,
        renderer: MockResourceRenderer,
    ) -> PlatformController {
        PlatformController::new(Arc::new(Context {
            store: Arc::new(store),
            tenant_api: Arc::new(factory),
            renderer: Arc::new(renderer),
            config: OperatorConfig::default(),
        }))
    }

    fn returns(store: &mut MockClusterStore, platform: ApiPlatform) {
        store
            .expect_get_platform()
            .returning(move |_, _| Ok(Some(platform.clone())));
    }

    /// Records every status patch for later inspection
    fn capture_status(store: &mut MockClusterStore) -> Arc<Mutex<Vec<Value>>> {
        let patches = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&patches);
        store.expect_patch_platform_status().returning(move |_, _, patch| {
            sink.lock().unwrap().push(patch);
            Ok(())
        });
        patches
    }

    fn ready_pod() -> Pod {
        Pod {
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn credential(name: &str) -> Secret {
        opaque_secret(
            name,
            BTreeMap::from([
                (ADMIN_ACCESS_TOKEN.to_string(), "a".to_string()),
                (MASTER_ACCESS_TOKEN.to_string(), "m".to_string()),
                (ADMIN_URL.to_string(), format!("https://{}.apps.example.com", name)),
            ]),
            None,
        )
    }

    fn install_store(pods: Vec<Pod>) -> MockClusterStore {
        let mut store = MockClusterStore::new();
        store
            .expect_get_secret()
            .returning(|_, name| Ok(Some(credential(name))));
        store.expect_create_object().returning(|_, _| Ok(()));
        store.expect_list_pods().returning(move |_| Ok(pods.clone()));
        store.expect_get_route().returning(|_, name| {
            Ok(Some(Route::new(
                name,
                RouteSpec::edge_to_service(format!("{}.apps.example.com", name), "system-provider"),
            )))
        });
        store.expect_replace_secret().returning(|_, s| Ok(s.clone()));
        store
    }

    fn renderer() -> MockResourceRenderer {
        let mut renderer = MockResourceRenderer::new();
        renderer.expect_render().returning(|_| Ok(vec![]));
        renderer
    }

    #[tokio::test]
    async fn test_missing_object_ends_pass_quietly() {
        let mut store = MockClusterStore::new();
        store.expect_get_platform().returning(|_, _| Ok(None));
        store.expect_patch_platform_status().never();
        store.expect_replace_platform().never();

        let ctrl = controller(store, MockTenantServiceFactory::new(), MockResourceRenderer::new());
        let action = ctrl.reconcile(Arc::new(platform(None))).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    #[tokio::test]
    async fn test_no_phase_advances_to_credentials() {
        let mut store = MockClusterStore::new();
        returns(&mut store, platform(None));
        store
            .expect_replace_platform()
            .times(1)
            .withf(|p| p.spec.seed_users.role == "admin")
            .returning(|p| {
                let mut persisted = p.clone();
                persisted.metadata.resource_version = Some("8".to_string());
                Ok(persisted)
            });
        let patches = capture_status(&mut store);
        store.expect_get_secret().never();

        let ctrl = controller(store, MockTenantServiceFactory::new(), MockResourceRenderer::new());
        let action = ctrl.reconcile(Arc::new(platform(None))).await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let patches = patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0]["status"]["phase"], "credentials");
        assert_eq!(patches[0]["metadata"]["resourceVersion"], "8");
    }

    #[tokio::test]
    async fn test_invalid_spec_stays_in_no_phase() {
        let mut invalid = platform(None);
        invalid.spec.route_suffix.clear();

        let mut store = MockClusterStore::new();
        returns(&mut store, invalid.clone());
        store.expect_replace_platform().never();
        let patches = capture_status(&mut store);

        let ctrl = controller(store, MockTenantServiceFactory::new(), MockResourceRenderer::new());
        let err = ctrl.reconcile(Arc::new(invalid)).await.unwrap_err();
        assert!(matches!(err, OperatorError::Validation(_)));

        let patches = patches.lock().unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches[0]["status"]["ready"], false);
        assert!(patches[0]["status"].get("phase").is_none());
        assert_eq!(patches[0]["metadata"]["resourceVersion"], "7");
    }

    #[tokio::test]
    async fn test_credentials_phase_creates_both_secrets() {
        let mut store = MockClusterStore::new();
        returns(&mut store, platform(Some(Phase::ProvisionCredentials)));
        store.expect_get_secret().times(2).returning(|_, _| Ok(None));
        store
            .expect_create_secret()
            .times(2)
            .returning(|_, s| Ok(s.clone()));
        store
            .expect_replace_platform()
            .times(1)
            .withf(|p| {
                p.spec.admin_credentials.as_deref() == Some("demo-admin-credentials")
                    && p.spec.master_credentials.as_deref() == Some("demo-master-credentials")
            })
            .returning(|p| Ok(p.clone()));
        let patches = capture_status(&mut store);

        let ctrl = controller(store, MockTenantServiceFactory::new(), MockResourceRenderer::new());
        ctrl.reconcile(Arc::new(platform(Some(Phase::ProvisionCredentials))))
            .await
            .unwrap();

        assert_eq!(patches.lock().unwrap()[0]["status"]["phase"], "reconcile");
    }

    #[tokio::test]
    async fn test_credentials_failure_keeps_phase() {
        let mut store = MockClusterStore::new();
        returns(&mut store, platform(Some(Phase::ProvisionCredentials)));
        store
            .expect_get_secret()
            .returning(|_, _| Err(OperatorError::KubeApi("unavailable".to_string())));
        store.expect_replace_platform().never();
        let patches = capture_status(&mut store);

        let ctrl = controller(store, MockTenantServiceFactory::new(), MockResourceRenderer::new());
        assert!(ctrl
            .reconcile(Arc::new(platform(Some(Phase::ProvisionCredentials))))
            .await
            .is_err());
        assert!(patches.lock().unwrap()[0]["status"].get("phase").is_none());
    }

    #[tokio::test]
    async fn test_install_not_ready_requeues_short() {
        let mut unhealthy = ready_pod();
        if let Some(status) = unhealthy.status.as_mut() {
            status.conditions = None;
        }
        let mut store = install_store(vec![ready_pod(), unhealthy]);
        returns(&mut store, platform(Some(Phase::ReconcileInstall)));
        store.expect_replace_platform().returning(|p| Ok(p.clone()));
        let patches = capture_status(&mut store);

        let mut factory = MockTenantServiceFactory::new();
        factory.expect_authenticated().never();

        let ctrl = controller(store, factory, renderer());
        let action = ctrl
            .reconcile(Arc::new(platform(Some(Phase::ReconcileInstall))))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));

        let patches = patches.lock().unwrap();
        assert_eq!(patches[0]["status"]["ready"], false);
        assert_eq!(patches[0]["status"]["phase"], "reconcile");
    }

    #[tokio::test]
    async fn test_ready_install_syncs_entities() {
        let mut store = install_store(vec![ready_pod()]);
        returns(&mut store, platform(Some(Phase::ReconcileInstall)));
        store.expect_replace_platform().returning(|p| Ok(p.clone()));
        let patches = capture_status(&mut store);

        let mut factory = MockTenantServiceFactory::new();
        factory
            .expect_authenticated()
            .times(1)
            .with(eq("https://system-provider-admin-route.apps.example.com"), eq("a"))
            .returning(|_, _| {
                let mut service = MockTenantService::new();
                service.expect_list_auth_providers().returning(|| Ok(vec![]));
                service.expect_list_users().returning(|| Ok(vec![]));
                service
                    .expect_create_user()
                    .times(1)
                    .withf(|u| u.username == "alice")
                    .returning(|_| Ok(()));
                Ok(Arc::new(service))
            });

        let ctrl = controller(store, factory, renderer());
        let action = ctrl
            .reconcile(Arc::new(platform(Some(Phase::ReconcileInstall))))
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(60)));

        let patches = patches.lock().unwrap();
        assert_eq!(patches[0]["status"]["ready"], true);
        assert_eq!(patches[0]["status"]["version"], PLATFORM_VERSION);
        assert_eq!(patches[0]["status"]["observedGeneration"], 2);
    }

    #[tokio::test]
    async fn test_sync_failure_resets_ready() {
        let mut store = install_store(vec![ready_pod()]);
        let mut was_ready = platform(Some(Phase::ReconcileInstall));
        if let Some(status) = was_ready.status.as_mut() {
            status.ready = true;
        }
        returns(&mut store, was_ready.clone());
        store.expect_replace_platform().never();
        let patches = capture_status(&mut store);

        let mut factory = MockTenantServiceFactory::new();
        factory.expect_authenticated().returning(|_, _| {
            let mut service = MockTenantService::new();
            service.expect_list_auth_providers().returning(|| {
                Err(OperatorError::TenantApi {
                    operation: "list auth providers".to_string(),
                    status: 503,
                    body: String::new(),
                })
            });
            Ok(Arc::new(service))
        });

        let ctrl = controller(store, factory, renderer());
        let err = ctrl.reconcile(Arc::new(was_ready)).await.unwrap_err();
        assert!(matches!(err, OperatorError::TenantApi { status: 503, .. }));
        assert_eq!(patches.lock().unwrap()[0]["status"]["ready"], false);
    }
}
