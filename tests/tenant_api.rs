//! Tenant Service client against a local HTTP mock

use std::sync::Arc;
use std::time::Duration;

use apiplatform_operator::crd::SignupRequest;
use apiplatform_operator::tenant_api::{HttpTenantServiceFactory, TenantService, TenantServiceFactory};
use apiplatform_operator::{AuthProvider, OperatorError, User};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "s3cr3t";

async fn service(server: &MockServer) -> Arc<dyn TenantService> {
    HttpTenantServiceFactory::new(Duration::from_secs(5), false)
        .unwrap()
        .authenticated(&server.uri(), TOKEN)
        .unwrap()
}

fn alice() -> User {
    User {
        username: "alice".to_string(),
        email: "alice@example.com".to_string(),
        password: "pw".to_string(),
        role: "member".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_create_user_requires_created() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/api/users.json"))
        .and(query_param("access_token", TOKEN))
        .and(body_partial_json(json!({"username": "alice", "password": "pw"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"user": {"id": 7, "username": "alice"}})))
        .expect(1)
        .mount(&server)
        .await;

    service(&server).await.create_user(&alice()).await.unwrap();
}

#[tokio::test]
async fn test_create_user_with_ok_status_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/admin/api/users.json"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let err = service(&server).await.create_user(&alice()).await.unwrap_err();
    assert!(matches!(err, OperatorError::TenantApi { status: 200, .. }));
}

#[tokio::test]
async fn test_list_users_unwraps_envelopes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/api/users.json"))
        .and(query_param("access_token", TOKEN))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "users": [
                {"user": {"id": 1, "username": "alice", "email": "alice@example.com",
                          "role": "admin", "state": "active"}},
                {"user": {"id": 2, "username": "bob", "state": "pending"}}
            ]
        })))
        .mount(&server)
        .await;

    let users = service(&server).await.list_users().await.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].id, 1);
    assert_eq!(users[0].role, "admin");
    assert!(users[1].is_pending());
}

#[tokio::test]
async fn test_user_update_role_and_activate_paths() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/admin/api/users/7.json"))
        .and(body_partial_json(json!({"email": "alice@example.com"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/admin/api/users/7/member.json"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/admin/api/users/7/activate.json"))
        .and(query_param("access_token", TOKEN))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server).await;
    service.update_user(7, &alice()).await.unwrap();
    service.update_user_role(7, "member").await.unwrap();
    service.activate_user(7).await.unwrap();
}

#[tokio::test]
async fn test_auth_providers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/api/account/authentication_providers.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "authentication_providers": [
                {"authentication_provider": {"id": 3, "kind": "github", "name": "github"}}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/admin/api/account/authentication_providers.json"))
        .and(body_partial_json(json!({"kind": "keycloak", "name": "sso"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let service = service(&server).await;
    let providers = service.list_auth_providers().await.unwrap();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].name, "github");

    let sso = AuthProvider {
        kind: "keycloak".to_string(),
        name: "sso".to_string(),
        ..Default::default()
    };
    service.create_auth_provider(&sso).await.unwrap();
}

fn signup_request() -> SignupRequest {
    SignupRequest {
        org_name: "acme".to_string(),
        username: "admin".to_string(),
        email: "admin@acme.test".to_string(),
        password: "secret".to_string(),
    }
}

#[tokio::test]
async fn test_sign_up_returns_account_and_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/master/api/providers.json"))
        .and(query_param("access_token", TOKEN))
        .and(body_partial_json(json!({"org_name": "acme", "username": "admin"})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "signup": {
                "account": {"id": 42, "org_name": "acme",
                            "admin_domain": "acme-admin.apps.example.com",
                            "domain": "acme.apps.example.com", "state": "approved"},
                "access_token": {"value": "tenant-token"}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let signup = service(&server).await.sign_up(&signup_request()).await.unwrap();
    assert_eq!(signup.account.id, 42);
    assert_eq!(signup.account.admin_domain, "acme-admin.apps.example.com");
    assert_eq!(signup.access_token.value, "tenant-token");
}

#[tokio::test]
async fn test_sign_up_without_account_id_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/master/api/providers.json"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "signup": {"account": {"id": 0}, "access_token": {"value": "t"}}
        })))
        .mount(&server)
        .await;

    let err = service(&server).await.sign_up(&signup_request()).await.unwrap_err();
    assert!(matches!(err, OperatorError::InvalidState(_)));
}

#[tokio::test]
async fn test_error_carries_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/api/users.json"))
        .respond_with(ResponseTemplate::new(403).set_body_string("access denied"))
        .mount(&server)
        .await;

    match service(&server).await.list_users().await.unwrap_err() {
        OperatorError::TenantApi { operation, status, body } => {
            assert_eq!(operation, "list users");
            assert_eq!(status, 403);
            assert_eq!(body, "access denied");
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn test_malformed_body_is_a_serialization_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/admin/api/users.json"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = service(&server).await.list_users().await.unwrap_err();
    assert!(matches!(err, OperatorError::Serialization(_)));
}
