//! ApiPlatform Custom Resource Definition
//!
//! Desired state of one installed API-management platform: routing, sizing
//! hints, the credential objects it owns, and the users and authentication
//! providers to keep in sync on its admin account.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{validate_entities, AuthProvider, InstanceCondition, SeedPolicy, User};
use crate::error::{OperatorError, Result};

/// Platform release installed by this operator
pub const PLATFORM_VERSION: &str = "2.2.0.GA";

/// ApiPlatform is the Schema for the apiplatforms API
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apiplatform.io",
    version = "v1alpha1",
    kind = "ApiPlatform",
    namespaced,
    status = "PlatformStatus",
    shortname = "apip",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct PlatformSpec {
    /// Wildcard routing suffix, e.g. `apps.example.com`
    pub route_suffix: String,

    /// Name of the default tenant created by the install
    #[serde(default)]
    pub tenant_name: Option<String>,

    /// Storage class for shared (RWX) volumes
    #[serde(default)]
    pub rwx_storage_class: Option<String>,

    /// Size of the database volume claim
    #[serde(default)]
    pub mysql_pvc_size: Option<String>,

    /// Route wildcard policy
    #[serde(default)]
    pub wildcard_policy: Option<String>,

    #[serde(default)]
    pub admin_username: Option<String>,

    #[serde(default)]
    pub admin_email: Option<String>,

    /// Users to keep in sync on the admin account
    #[serde(default)]
    pub users: Vec<User>,

    /// Additional users synthesized by index
    #[serde(default)]
    pub seed_users: SeedPolicy,

    /// Authentication providers to create on the admin account
    #[serde(default)]
    pub auth_providers: Vec<AuthProvider>,

    /// Secret holding ADMIN_ACCESS_TOKEN and ADMIN_URL
    #[serde(default)]
    pub admin_credentials: Option<String>,

    /// Secret holding MASTER_ACCESS_TOKEN and the master ADMIN_URL
    #[serde(default)]
    pub master_credentials: Option<String>,
}

/// Provisioning stage of an ApiPlatform.
///
/// Serialized as the stage names used on the wire; unknown values fail
/// deserialization instead of being silently skipped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    #[serde(rename = "")]
    NoPhase,
    #[serde(rename = "credentials")]
    ProvisionCredentials,
    #[serde(rename = "reconcile")]
    ReconcileInstall,
}

impl Phase {
    /// Phase reached after a successful pass in `self`.
    pub fn next(self) -> Phase {
        match self {
            Phase::NoPhase => Phase::ProvisionCredentials,
            Phase::ProvisionCredentials => Phase::ReconcileInstall,
            Phase::ReconcileInstall => Phase::ReconcileInstall,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::NoPhase => "",
            Phase::ProvisionCredentials => "credentials",
            Phase::ReconcileInstall => "reconcile",
        }
    }
}

/// Status of the ApiPlatform
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    /// Installed platform version
    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub phase: Phase,

    /// Workloads healthy and routes resolved in the last pass
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub conditions: Vec<InstanceCondition>,

    #[serde(default)]
    pub observed_generation: Option<i64>,

    #[serde(default)]
    pub last_updated: Option<String>,
}

impl PlatformSpec {
    pub fn apply_defaults(&mut self) {
        self.seed_users.apply_defaults();
    }

    pub fn validate(&self) -> Result<()> {
        if self.route_suffix.trim().is_empty() {
            return Err(OperatorError::validation("routeSuffix must not be empty"));
        }
        validate_entities(&self.users, &self.auth_providers, &self.seed_users)
    }
}

impl ApiPlatform {
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    /// Copy of `self` with spec defaults filled in.
    pub fn defaulted(&self) -> ApiPlatform {
        let mut copy = self.clone();
        copy.spec.apply_defaults();
        copy
    }

    pub fn status_mut(&mut self) -> &mut PlatformStatus {
        self.status.get_or_insert_with(PlatformStatus::default)
    }

    pub fn admin_credentials_name(&self) -> String {
        self.spec
            .admin_credentials
            .clone()
            .unwrap_or_else(|| format!("{}-admin-credentials", self.metadata.name.as_deref().unwrap_or("platform")))
    }

    pub fn master_credentials_name(&self) -> String {
        self.spec
            .master_credentials
            .clone()
            .unwrap_or_else(|| format!("{}-master-credentials", self.metadata.name.as_deref().unwrap_or("platform")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_spec_parsing() {
        let json = r#"{
            "routeSuffix": "apps.example.com",
            "mysqlPvcSize": "5Gi",
            "users": [{"username": "alice", "email": "alice@example.com", "role": "admin"}],
            "seedUsers": {"count": 2, "nameFormat": "u%02d"},
            "authProviders": [{"kind": "github", "name": "github", "client_id": "abc"}]
        }"#;
        let spec: PlatformSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.route_suffix, "apps.example.com");
        assert_eq!(spec.mysql_pvc_size.as_deref(), Some("5Gi"));
        assert_eq!(spec.users[0].username, "alice");
        assert_eq!(spec.seed_users.count, 2);
        assert_eq!(spec.auth_providers[0].client_id, "abc");
        assert!(spec.admin_credentials.is_none());
    }

    #[test]
    fn test_phase_wire_names() {
        assert_eq!(serde_json::to_string(&Phase::NoPhase).unwrap(), r#""""#);
        assert_eq!(
            serde_json::from_str::<Phase>(r#""credentials""#).unwrap(),
            Phase::ProvisionCredentials
        );
        assert_eq!(
            serde_json::from_str::<Phase>(r#""reconcile""#).unwrap(),
            Phase::ReconcileInstall
        );
    }

    #[test]
    fn test_unknown_phase_is_rejected() {
        assert!(serde_json::from_str::<Phase>(r#""installing""#).is_err());
        let status = r#"{"version": "", "phase": "bogus", "ready": false}"#;
        assert!(serde_json::from_str::<PlatformStatus>(status).is_err());
    }

    #[test]
    fn test_phase_only_moves_forward() {
        assert_eq!(Phase::NoPhase.next(), Phase::ProvisionCredentials);
        assert_eq!(Phase::ProvisionCredentials.next(), Phase::ReconcileInstall);
        assert_eq!(Phase::ReconcileInstall.next(), Phase::ReconcileInstall);
        assert_ne!(Phase::NoPhase.next(), Phase::ReconcileInstall);
    }

    #[test]
    fn test_missing_status_means_no_phase() {
        let platform = ApiPlatform::new("demo", PlatformSpec::default());
        assert_eq!(platform.phase(), Phase::NoPhase);
        assert!(!platform.is_ready());
    }

    #[test]
    fn test_validate_requires_route_suffix() {
        let spec = PlatformSpec::default();
        assert!(spec.validate().is_err());

        let spec = PlatformSpec {
            route_suffix: "apps.example.com".to_string(),
            ..Default::default()
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_defaulted_does_not_touch_original() {
        let platform = ApiPlatform::new("demo", PlatformSpec::default());
        let defaulted = platform.defaulted();
        assert_eq!(defaulted.spec.seed_users.role, "admin");
        assert!(platform.spec.seed_users.role.is_empty());
    }

    #[test]
    fn test_credential_names() {
        let mut platform = ApiPlatform::new("demo", PlatformSpec::default());
        assert_eq!(platform.admin_credentials_name(), "demo-admin-credentials");
        assert_eq!(platform.master_credentials_name(), "demo-master-credentials");

        platform.spec.admin_credentials = Some("custom".to_string());
        assert_eq!(platform.admin_credentials_name(), "custom");
    }
}
