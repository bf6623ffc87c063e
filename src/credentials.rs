//! Credential provisioner
//!
//! Credential objects are opaque Secrets owned by the resource that created
//! them. Creation is get-or-create: an existing Secret is never overwritten,
//! and losing a create race to another writer returns the winner's object.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::ByteString;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, info};

use crate::error::{OperatorError, Result};
use crate::store::ClusterStore;

pub const ADMIN_ACCESS_TOKEN: &str = "ADMIN_ACCESS_TOKEN";
pub const MASTER_ACCESS_TOKEN: &str = "MASTER_ACCESS_TOKEN";
pub const ADMIN_URL: &str = "ADMIN_URL";

const TOKEN_LENGTH: usize = 32;

/// Random alphanumeric access token (~190 bits).
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// Opaque Secret holding `values`, labelled as managed by this operator.
pub fn opaque_secret(
    name: &str,
    values: BTreeMap<String, String>,
    owner: Option<OwnerReference>,
) -> Secret {
    let mut labels = BTreeMap::new();
    labels.insert("app.kubernetes.io/name".to_string(), "apiplatform".to_string());
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "apiplatform-operator".to_string(),
    );
    if let Some(owner) = &owner {
        labels.insert("apiplatform.io/instance".to_string(), owner.name.clone());
    }

    let data = values
        .into_iter()
        .map(|(k, v)| (k, ByteString(v.into_bytes())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(labels),
            owner_references: owner.map(|o| vec![o]),
            ..Default::default()
        },
        data: Some(data),
        type_: Some("Opaque".to_string()),
        ..Default::default()
    }
}

/// Value stored under `key`, from `data` or (unsubmitted) `stringData`.
pub fn secret_value(secret: &Secret, key: &str) -> Result<String> {
    if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get(key)) {
        return String::from_utf8(bytes.0.clone()).map_err(|e| {
            OperatorError::Configuration(format!(
                "Key {} of secret {} is not UTF-8: {}",
                key,
                secret.metadata.name.as_deref().unwrap_or_default(),
                e
            ))
        });
    }
    if let Some(value) = secret.string_data.as_ref().and_then(|d| d.get(key)) {
        return Ok(value.clone());
    }
    Err(OperatorError::invalid_state(format!(
        "secret {} has no key {}",
        secret.metadata.name.as_deref().unwrap_or_default(),
        key
    )))
}

/// All keys of the Secret as strings; non UTF-8 values are skipped.
pub fn secret_values(secret: &Secret) -> BTreeMap<String, String> {
    let mut values: BTreeMap<String, String> = secret.string_data.clone().unwrap_or_default();
    if let Some(data) = &secret.data {
        for (key, bytes) in data {
            if let Ok(value) = String::from_utf8(bytes.0.clone()) {
                values.insert(key.clone(), value);
            }
        }
    }
    values
}

/// Get-or-create an owned Secret with a single freshly generated token.
pub async fn ensure_opaque_credential(
    store: &dyn ClusterStore,
    namespace: &str,
    name: &str,
    key: &str,
    owner: &OwnerReference,
) -> Result<Secret> {
    if let Some(existing) = store.get_secret(namespace, name).await? {
        debug!(namespace = %namespace, secret = %name, "Credential already exists");
        return Ok(existing);
    }

    let secret = opaque_secret(
        name,
        BTreeMap::from([(key.to_string(), generate_token())]),
        Some(owner.clone()),
    );
    create_or_get(store, namespace, &secret).await
}

/// Create `secret`; when another writer created it first, return theirs.
pub async fn create_or_get(store: &dyn ClusterStore, namespace: &str, secret: &Secret) -> Result<Secret> {
    let name = secret.metadata.name.clone().unwrap_or_default();
    match store.create_secret(namespace, secret).await {
        Ok(created) => {
            info!(namespace = %namespace, secret = %name, "Created credential");
            Ok(created)
        }
        Err(e) if e.is_already_exists() => {
            debug!(namespace = %namespace, secret = %name, "Credential created concurrently, re-reading");
            store.get_secret(namespace, &name).await?.ok_or_else(|| {
                OperatorError::NotFound(format!("secret {}/{} vanished after create conflict", namespace, name))
            })
        }
        Err(e) => Err(e),
    }
}

/// Store `value` under `key`, writing only when the stored value differs.
pub async fn ensure_value(
    store: &dyn ClusterStore,
    namespace: &str,
    secret: &Secret,
    key: &str,
    value: &str,
) -> Result<Secret> {
    if secret_value(secret, key).ok().as_deref() == Some(value) {
        return Ok(secret.clone());
    }

    let mut updated = secret.clone();
    updated
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(key.to_string(), ByteString(value.as_bytes().to_vec()));
    info!(
        namespace = %namespace,
        secret = %secret.metadata.name.as_deref().unwrap_or_default(),
        key = %key,
        "Updating credential"
    );
    store.replace_secret(namespace, &updated).await
}
