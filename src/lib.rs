//! API Platform Kubernetes Operator
//!
//! Installs multi-tenant API-management platforms and provisions tenants on
//! them.
//!
//! ## Custom Resources
//!
//! - `ApiPlatform`: credentials, install resources, readiness, and the
//!   users/auth providers of the platform's admin portal
//! - `ApiTenant`: a tenant account signed up once on a parent platform,
//!   with its own credentials, routes, users and auth providers
//!
//! ## Example
//!
//! ```yaml
//! apiVersion: apiplatform.io/v1alpha1
//! kind: ApiPlatform
//! metadata:
//!   name: demo
//! spec:
//!   routeSuffix: apps.example.com
//!   seedUsers:
//!     count: 3
//! ---
//! apiVersion: apiplatform.io/v1alpha1
//! kind: ApiTenant
//! metadata:
//!   name: acme
//! spec:
//!   platformRef: demo
//!   name: acme
//!   adminUsername: admin
//!   adminEmail: admin@acme.test
//!   adminPassword: changeme
//! ```

pub mod conditions;
pub mod config;
pub mod controllers;
pub mod credentials;
pub mod crd;
pub mod error;
pub mod install;
pub mod readiness;
pub mod store;
pub mod sync;
pub mod tenancy;
pub mod tenant_api;

pub use config::OperatorConfig;
pub use controllers::{Context, PlatformController, TenantController};
pub use crd::{
    ApiPlatform, ApiTenant, AuthProvider, InstanceCondition, Phase, PlatformSpec, PlatformStatus,
    SeedPolicy, TenantAccount, TenantSpec, TenantStatus, User,
};
pub use error::{OperatorError, Result};
