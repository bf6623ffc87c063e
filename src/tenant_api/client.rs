//! reqwest implementation of the Tenant Service

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::{TenantService, TenantServiceFactory};
use crate::crd::{
    AuthProvider, AuthProviderList, Signup, SignupRequest, SignupResponse, User, UserList,
};
use crate::error::{OperatorError, Result};

const USERS_PATH: &str = "admin/api/users.json";
const AUTH_PROVIDERS_PATH: &str = "admin/api/account/authentication_providers.json";
/// Tenant sign-up, authenticated with the master token
pub const SIGNUP_PATH: &str = "master/api/providers.json";

/// Status a call must answer with
#[derive(Debug, Clone, Copy)]
enum Expect {
    /// Exactly 201
    Created,
    /// Any 2xx
    Success,
}

impl Expect {
    fn accepts(self, status: StatusCode) -> bool {
        match self {
            Expect::Created => status == StatusCode::CREATED,
            Expect::Success => status.is_success(),
        }
    }
}

/// Admin API client bound to one base URL and access token
pub struct HttpTenantService {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpTenantService {
    pub fn new(http: reqwest::Client, base_url: &str, access_token: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn send(&self, operation: &str, request: RequestBuilder, expect: Expect) -> Result<Response> {
        let response = request
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;

        let status = response.status();
        debug!(operation = %operation, status = %status.as_u16(), "Tenant API response");
        if expect.accepts(status) {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(OperatorError::TenantApi {
            operation: operation.to_string(),
            status: status.as_u16(),
            body,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T> {
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl TenantService for HttpTenantService {
    async fn create_user(&self, user: &User) -> Result<()> {
        let request = self.http.post(self.url(USERS_PATH)).json(user);
        self.send("create user", request, Expect::Created).await?;
        Ok(())
    }

    async fn list_users(&self) -> Result<Vec<User>> {
        let request = self.http.get(self.url(USERS_PATH));
        let response = self.send("list users", request, Expect::Success).await?;
        let list: UserList = Self::read_json(response).await?;
        Ok(list.users.into_iter().map(|e| e.user).collect())
    }

    async fn update_user(&self, id: i64, user: &User) -> Result<()> {
        let path = format!("admin/api/users/{}.json", id);
        let request = self.http.put(self.url(&path)).json(user);
        self.send("update user", request, Expect::Success).await?;
        Ok(())
    }

    async fn update_user_role(&self, id: i64, role: &str) -> Result<()> {
        let path = format!("admin/api/users/{}/{}.json", id, role);
        let request = self.http.put(self.url(&path));
        self.send("update user role", request, Expect::Success).await?;
        Ok(())
    }

    async fn activate_user(&self, id: i64) -> Result<()> {
        let path = format!("admin/api/users/{}/activate.json", id);
        let request = self.http.put(self.url(&path));
        self.send("activate user", request, Expect::Success).await?;
        Ok(())
    }

    async fn create_auth_provider(&self, provider: &AuthProvider) -> Result<()> {
        let request = self.http.post(self.url(AUTH_PROVIDERS_PATH)).json(provider);
        self.send("create auth provider", request, Expect::Created).await?;
        Ok(())
    }

    async fn list_auth_providers(&self) -> Result<Vec<AuthProvider>> {
        let request = self.http.get(self.url(AUTH_PROVIDERS_PATH));
        let response = self
            .send("list auth providers", request, Expect::Success)
            .await?;
        let list: AuthProviderList = Self::read_json(response).await?;
        Ok(list
            .authentication_providers
            .into_iter()
            .map(|e| e.authentication_provider)
            .collect())
    }

    async fn sign_up(&self, request: &SignupRequest) -> Result<Signup> {
        let builder = self.http.post(self.url(SIGNUP_PATH)).json(request);
        let response = self.send("sign up tenant", builder, Expect::Success).await?;
        let signup: SignupResponse = Self::read_json(response).await?;
        if signup.signup.account.id == 0 {
            return Err(OperatorError::invalid_state(format!(
                "sign-up for {} returned no account id",
                request.org_name
            )));
        }
        Ok(signup.signup)
    }
}

/// Builds [`HttpTenantService`] clients sharing one connection pool
pub struct HttpTenantServiceFactory {
    http: reqwest::Client,
}

impl HttpTenantServiceFactory {
    /// `insecure_tls` accepts self-signed router certificates.
    pub fn new(timeout: Duration, insecure_tls: bool) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure_tls)
            .build()?;
        Ok(Self { http })
    }
}

impl TenantServiceFactory for HttpTenantServiceFactory {
    fn authenticated(&self, base_url: &str, access_token: &str) -> Result<Arc<dyn TenantService>> {
        if base_url.is_empty() {
            return Err(OperatorError::invalid_state("tenant API base URL is empty"));
        }
        Ok(Arc::new(HttpTenantService::new(
            self.http.clone(),
            base_url,
            access_token,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let service = HttpTenantService::new(reqwest::Client::new(), "https://a.example.com/", "t");
        assert_eq!(service.url(USERS_PATH), "https://a.example.com/admin/api/users.json");
    }

    #[test]
    fn test_expect_accepts() {
        assert!(Expect::Created.accepts(StatusCode::CREATED));
        assert!(!Expect::Created.accepts(StatusCode::OK));
        assert!(Expect::Success.accepts(StatusCode::OK));
        assert!(Expect::Success.accepts(StatusCode::NO_CONTENT));
        assert!(!Expect::Success.accepts(StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_factory_rejects_empty_url() {
        let factory = HttpTenantServiceFactory::new(Duration::from_secs(1), false).unwrap();
        assert!(factory.authenticated("", "tok").is_err());
        assert!(factory.authenticated("https://a.example.com", "tok").is_ok());
    }
}
