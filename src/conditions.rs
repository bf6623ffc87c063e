//! Kubernetes-standard status condition helpers
//!
//! Condition types for both custom resources and the builder used to
//! record them following the Kubernetes API conventions.

use chrono::Utc;

use crate::crd::InstanceCondition;

// Condition status values
pub const CONDITION_TRUE: &str = "True";
pub const CONDITION_FALSE: &str = "False";

// Shared by ApiPlatform and ApiTenant
pub const CONDITION_READY: &str = "Ready";
pub const CONDITION_ENTITIES_SYNCED: &str = "EntitiesSynced";

// ApiPlatform condition types
pub const PLATFORM_CONDITION_CREDENTIALS: &str = "CredentialsProvisioned";
pub const PLATFORM_CONDITION_INSTALLED: &str = "Installed";

// ApiTenant condition types
pub const TENANT_CONDITION_PROVISIONED: &str = "TenantProvisioned";

/// Build a condition with the current timestamp.
pub fn build_condition(
    condition_type: &str,
    status: &str,
    reason: &str,
    message: &str,
) -> InstanceCondition {
    InstanceCondition {
        r#type: condition_type.to_string(),
        status: status.to_string(),
        last_transition_time: Some(Utc::now().to_rfc3339()),
        reason: Some(reason.to_string()),
        message: Some(message.to_string()),
    }
}

/// Set or update a condition in a list, preserving lastTransitionTime when status hasn't changed.
pub fn set_condition(conditions: &mut Vec<InstanceCondition>, new: InstanceCondition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) {
        if existing.status != new.status {
            *existing = new;
        } else {
            existing.reason = new.reason;
            existing.message = new.message;
        }
    } else {
        conditions.push(new);
    }
}

pub fn find_condition<'a>(
    conditions: &'a [InstanceCondition],
    condition_type: &str,
) -> Option<&'a InstanceCondition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}
