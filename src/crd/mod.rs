//! Custom Resource Definitions for the API platform operator
//!
//! Defines the resources the operator manages:
//! - ApiPlatform: an installed API-management platform instance
//! - ApiTenant: a tenant account signed up on a platform
//!
//! plus the OpenShift `Route` type the operator reads and creates.

mod entities;
mod platform;
mod route;
mod tenant;

use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{OperatorError, Result};

pub use entities::{
    format_indexed, widest_directive, AccessToken, AuthProvider, AuthProviderEnvelope,
    AuthProviderList, SeedPolicy, Signup, SignupRequest, SignupResponse, TenantAccount, User,
    UserEnvelope, UserList, MAX_FORMAT_WIDTH, MAX_SEED_COUNT, USER_STATE_PENDING,
};
pub use platform::{ApiPlatform, Phase, PlatformSpec, PlatformStatus, PLATFORM_VERSION};
pub use route::{Route, RoutePort, RouteSpec, RouteTargetReference, RouteTls};
pub use tenant::{ApiTenant, TenantSpec, TenantStatus};

/// Status condition shared by both custom resources
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceCondition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: String,
    /// Last time the condition transitioned
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

/// Controller owner reference pointing at `owner`.
///
/// Fails when the owner has not been persisted yet (no uid).
pub fn controller_owner<K>(owner: &K) -> Result<OwnerReference>
where
    K: Resource<DynamicType = ()>,
{
    owner.controller_owner_ref(&()).ok_or_else(|| {
        OperatorError::invalid_state(format!(
            "{} {} has no uid, cannot own other objects",
            K::kind(&()),
            owner.meta().name.as_deref().unwrap_or_default()
        ))
    })
}

/// Namespace of a namespaced resource, `default` when unset.
pub fn namespace_of<K: Resource>(obj: &K) -> String {
    obj.namespace().unwrap_or_else(|| "default".to_string())
}

/// Checks shared by both kinds: identity keys must be present and unique.
/// Seed formats must pad within [`MAX_FORMAT_WIDTH`], the seed count is
/// capped at [`MAX_SEED_COUNT`], and seeding more than one user needs an
/// indexed name format.
pub(crate) fn validate_entities(
    users: &[User],
    auth_providers: &[AuthProvider],
    seed: &SeedPolicy,
) -> Result<()> {
    let mut usernames = BTreeSet::new();
    for user in users {
        if user.username.is_empty() {
            return Err(OperatorError::validation("user with empty username"));
        }
        if !usernames.insert(user.username.as_str()) {
            return Err(OperatorError::validation(format!(
                "duplicate username {}",
                user.username
            )));
        }
    }

    let mut providers = BTreeSet::new();
    for provider in auth_providers {
        if provider.name.is_empty() {
            return Err(OperatorError::validation("auth provider with empty name"));
        }
        if !providers.insert(provider.name.as_str()) {
            return Err(OperatorError::validation(format!(
                "duplicate auth provider {}",
                provider.name
            )));
        }
    }

    for (field, format) in [
        ("nameFormat", &seed.name_format),
        ("emailFormat", &seed.email_format),
    ] {
        match widest_directive(format) {
            Some(width) if width <= MAX_FORMAT_WIDTH => {}
            _ => {
                return Err(OperatorError::validation(format!(
                    "seedUsers.{} {:?} pads wider than {} characters",
                    field, format, MAX_FORMAT_WIDTH
                )))
            }
        }
    }

    if seed.count > MAX_SEED_COUNT {
        return Err(OperatorError::validation(format!(
            "seedUsers.count {} exceeds {}",
            seed.count, MAX_SEED_COUNT
        )));
    }

    if seed.count > 1 && !seed.names_are_indexed() {
        return Err(OperatorError::validation(format!(
            "seedUsers.nameFormat {:?} has no index directive but count is {}",
            seed.name_format, seed.count
        )));
    }

    Ok(())
}
