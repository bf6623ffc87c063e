//! Tenant Service: the platform's admin REST API
//!
//! [`TenantService`] is the authenticated client a pass talks to;
//! [`TenantServiceFactory`] builds one for a base URL and access token,
//! usually read from a credential Secret via [`from_credentials`].

mod client;

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;

#[cfg(test)]
use mockall::automock;

pub use client::{HttpTenantService, HttpTenantServiceFactory, SIGNUP_PATH};

use crate::credentials::{secret_value, ADMIN_URL};
use crate::crd::{AuthProvider, Signup, SignupRequest, User};
use crate::error::Result;

/// Authenticated calls against one account's admin API
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TenantService: Send + Sync {
    async fn create_user(&self, user: &User) -> Result<()>;

    async fn list_users(&self) -> Result<Vec<User>>;

    async fn update_user(&self, id: i64, user: &User) -> Result<()>;

    /// Role changes are a separate call from the generic update
    async fn update_user_role(&self, id: i64, role: &str) -> Result<()>;

    async fn activate_user(&self, id: i64) -> Result<()>;

    async fn create_auth_provider(&self, provider: &AuthProvider) -> Result<()>;

    async fn list_auth_providers(&self) -> Result<Vec<AuthProvider>>;

    /// Sign up a new tenant account; requires a master token
    async fn sign_up(&self, request: &SignupRequest) -> Result<Signup>;
}

#[cfg_attr(test, automock)]
pub trait TenantServiceFactory: Send + Sync {
    fn authenticated(&self, base_url: &str, access_token: &str) -> Result<Arc<dyn TenantService>>;
}

/// Client for the account described by a credential Secret.
///
/// `ADMIN_URL` gives the base URL, `token_key` names the access token.
pub fn from_credentials(
    factory: &dyn TenantServiceFactory,
    secret: &Secret,
    token_key: &str,
) -> Result<Arc<dyn TenantService>> {
    let base_url = secret_value(secret, ADMIN_URL)?;
    let token = secret_value(secret, token_key)?;
    factory.authenticated(&base_url, &token)
}
