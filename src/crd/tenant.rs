//! ApiTenant Custom Resource Definition
//!
//! A tenant account signed up on a parent ApiPlatform, plus the users and
//! authentication providers to keep in sync on that tenant's admin portal.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{validate_entities, AuthProvider, InstanceCondition, SeedPolicy, TenantAccount, User};
use crate::error::{OperatorError, Result};

/// ApiTenant is the Schema for the apitenants API
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apiplatform.io",
    version = "v1alpha1",
    kind = "ApiTenant",
    namespaced,
    status = "TenantStatus",
    shortname = "apit",
    printcolumn = r#"{"name":"Platform","type":"string","jsonPath":".spec.platformRef"}"#,
    printcolumn = r#"{"name":"TenantID","type":"integer","jsonPath":".spec.tenant.id"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TenantSpec {
    /// Name of the parent ApiPlatform in the same namespace
    pub platform_ref: String,

    /// Organization name of the tenant
    pub name: String,

    #[serde(default)]
    pub admin_email: String,

    #[serde(default)]
    pub admin_username: String,

    #[serde(default)]
    pub admin_password: String,

    /// Remote account; `id == 0` until sign-up succeeded
    #[serde(default)]
    pub tenant: TenantAccount,

    /// Secret holding the tenant's ADMIN_ACCESS_TOKEN and ADMIN_URL
    #[serde(default)]
    pub admin_credentials: Option<String>,

    #[serde(default)]
    pub users: Vec<User>,

    #[serde(default)]
    pub seed_users: SeedPolicy,

    #[serde(default)]
    pub auth_providers: Vec<AuthProvider>,
}

/// Status of the ApiTenant
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct TenantStatus {
    #[serde(default)]
    pub ready: bool,

    #[serde(default)]
    pub conditions: Vec<InstanceCondition>,

    #[serde(default)]
    pub last_updated: Option<String>,
}

impl TenantSpec {
    pub fn apply_defaults(&mut self) {
        self.seed_users.apply_defaults();
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("platformRef", &self.platform_ref),
            ("name", &self.name),
            ("adminUsername", &self.admin_username),
            ("adminEmail", &self.admin_email),
            ("adminPassword", &self.admin_password),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(OperatorError::validation(format!("{} must not be empty", field)));
            }
        }
        validate_entities(&self.users, &self.auth_providers, &self.seed_users)
    }
}

impl ApiTenant {
    /// Remote tenant id, 0 while unprovisioned.
    pub fn tenant_id(&self) -> i64 {
        self.spec.tenant.id
    }

    pub fn is_provisioned(&self) -> bool {
        self.tenant_id() != 0
    }

    pub fn is_ready(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.ready)
    }

    pub fn defaulted(&self) -> ApiTenant {
        let mut copy = self.clone();
        copy.spec.apply_defaults();
        copy
    }

    pub fn status_mut(&mut self) -> &mut TenantStatus {
        self.status.get_or_insert_with(TenantStatus::default)
    }

    pub fn admin_credentials_name(&self) -> String {
        self.spec.admin_credentials.clone().unwrap_or_else(|| {
            format!(
                "{}-provider-admin-credentials",
                self.metadata.name.as_deref().unwrap_or("tenant")
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_spec() -> TenantSpec {
        TenantSpec {
            platform_ref: "demo".to_string(),
            name: "acme".to_string(),
            admin_email: "admin@acme.test".to_string(),
            admin_username: "admin".to_string(),
            admin_password: "secret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_tenant_spec_parsing() {
        let json = r#"{
            "platformRef": "demo",
            "name": "acme",
            "adminEmail": "admin@acme.test",
            "adminUsername": "admin",
            "adminPassword": "secret",
            "tenant": {"id": 5, "admin_domain": "acme-admin.apps.example.com"}
        }"#;
        let spec: TenantSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.tenant.id, 5);
        assert_eq!(spec.tenant.admin_domain, "acme-admin.apps.example.com");
        assert!(spec.users.is_empty());
    }

    #[test]
    fn test_missing_tenant_defaults_to_unprovisioned() {
        let tenant = ApiTenant::new("acme", valid_spec());
        assert_eq!(tenant.tenant_id(), 0);
        assert!(!tenant.is_provisioned());
        assert!(!tenant.is_ready());
    }

    #[test]
    fn test_validate_required_fields() {
        assert!(valid_spec().validate().is_ok());

        let mut spec = valid_spec();
        spec.admin_password.clear();
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("adminPassword"));

        let mut spec = valid_spec();
        spec.platform_ref = "  ".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_admin_credentials_name() {
        let mut tenant = ApiTenant::new("acme", valid_spec());
        assert_eq!(tenant.admin_credentials_name(), "acme-provider-admin-credentials");
        tenant.spec.admin_credentials = Some("mine".to_string());
        assert_eq!(tenant.admin_credentials_name(), "mine");
    }
}
