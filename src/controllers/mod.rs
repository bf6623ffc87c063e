//! Controllers for the API platform operator
//!
//! Each controller watches its custom resource and runs one reconciliation
//! pass per trigger. `kube::runtime::Controller` guarantees a single pass
//! per object at a time; passes for different objects share nothing but the
//! read-only [`Context`].

mod platform;
mod tenant;

pub use platform::PlatformController;
pub use tenant::TenantController;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::warn;

use crate::config::OperatorConfig;
use crate::error::OperatorError;
use crate::install::ResourceRenderer;
use crate::store::ClusterStore;
use crate::tenant_api::TenantServiceFactory;

/// Collaborators shared by every pass
pub struct Context {
    pub store: Arc<dyn ClusterStore>,
    pub tenant_api: Arc<dyn TenantServiceFactory>,
    pub renderer: Arc<dyn ResourceRenderer>,
    pub config: OperatorConfig,
}

/// Requeue a failed object after the configured error delay.
///
/// Every error class is retried the same way; validation failures simply
/// fail again until the spec is fixed.
pub fn error_policy_backoff<K>(obj: Arc<K>, error: &OperatorError, delay: Duration) -> Action
where
    K: Resource<DynamicType = ()>,
{
    warn!(
        kind = %K::kind(&()),
        namespace = %obj.namespace().unwrap_or_default(),
        name = %obj.name_any(),
        error = %error,
        retry_in = ?delay,
        "Reconciliation pass failed"
    );
    Action::requeue(delay)
}

pub(crate) fn now() -> String {
    Utc::now().to_rfc3339()
}
