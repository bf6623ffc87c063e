//! Install materializer
//!
//! Renders the platform install template with parameters taken from the
//! instance's credentials and spec, stamps every rendered object with the
//! instance as controlling owner and creates it. Objects that already exist
//! are left as they are; drift is not corrected.

use std::collections::BTreeMap;
use std::path::Path;

use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::ResourceExt;
use minijinja::syntax::SyntaxConfig;
use minijinja::{Environment, UndefinedBehavior};
use serde::Deserialize;
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::credentials::secret_values;
use crate::crd::{controller_owner, namespace_of, ApiPlatform};
use crate::error::{OperatorError, Result};
use crate::store::ClusterStore;

/// Turns install parameters into concrete resources
#[cfg_attr(test, automock)]
pub trait ResourceRenderer: Send + Sync {
    /// Must be deterministic for identical parameters
    fn render(&self, params: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>>;
}

/// Renders a multi-document YAML template with `${PARAM}` placeholders.
///
/// Undefined parameters fail the render instead of producing empty strings.
pub struct TemplateRenderer {
    env: Environment<'static>,
    template: String,
}

impl TemplateRenderer {
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let syntax = SyntaxConfig::builder()
            .variable_delimiters("${", "}")
            .block_delimiters("{%", "%}")
            .comment_delimiters("{#", "#}")
            .build()?;

        let mut env = Environment::new();
        env.set_syntax(syntax);
        env.set_undefined_behavior(UndefinedBehavior::Strict);

        Ok(Self {
            env,
            template: template.into(),
        })
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let template = std::fs::read_to_string(path).map_err(|e| {
            OperatorError::Configuration(format!(
                "Failed to read install template {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::new(template)
    }
}

impl ResourceRenderer for TemplateRenderer {
    fn render(&self, params: &BTreeMap<String, String>) -> Result<Vec<DynamicObject>> {
        let rendered = self.env.render_str(&self.template, params)?;
        parse_documents(&rendered)
    }
}

/// Split multi-document YAML into objects. Empty documents are skipped and
/// `kind: List` documents are flattened into their items.
pub fn parse_documents(yaml: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(yaml) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let json = serde_json::to_value(&value)?;
        if json.get("kind").and_then(|k| k.as_str()) == Some("List") {
            let items = json
                .get("items")
                .and_then(|i| i.as_array())
                .cloned()
                .unwrap_or_default();
            for item in items {
                objects.push(serde_json::from_value(item)?);
            }
        } else {
            objects.push(serde_json::from_value(json)?);
        }
    }
    Ok(objects)
}

/// Parameters for the install template.
///
/// Every key of both credential objects, the optional spec overrides when
/// set, and always `WILDCARD_DOMAIN`.
pub fn install_params(
    platform: &ApiPlatform,
    admin_credentials: &Secret,
    master_credentials: &Secret,
) -> BTreeMap<String, String> {
    let mut params = secret_values(admin_credentials);
    params.extend(secret_values(master_credentials));

    let spec = &platform.spec;
    let overrides = [
        ("TENANT_NAME", &spec.tenant_name),
        ("RWX_STORAGE_CLASS", &spec.rwx_storage_class),
        ("WILDCARD_POLICY", &spec.wildcard_policy),
        ("MYSQL_PVC_SIZE", &spec.mysql_pvc_size),
        ("ADMIN_USERNAME", &spec.admin_username),
        ("ADMIN_EMAIL", &spec.admin_email),
    ];
    for (key, value) in overrides {
        if let Some(value) = value.as_ref().filter(|v| !v.is_empty()) {
            params.insert(key.to_string(), value.clone());
        }
    }

    params.insert("WILDCARD_DOMAIN".to_string(), spec.route_suffix.clone());
    params
}

/// Render and create the install resources owned by `platform`.
///
/// Returns the number of objects newly created in this call.
pub async fn materialize(
    store: &dyn ClusterStore,
    renderer: &dyn ResourceRenderer,
    platform: &ApiPlatform,
    params: &BTreeMap<String, String>,
) -> Result<usize> {
    let namespace = namespace_of(platform);
    let owner = controller_owner(platform)?;
    let objects = renderer.render(params)?;

    let mut created = 0;
    for mut object in objects {
        object.metadata.namespace = Some(namespace.clone());
        object.metadata.owner_references = Some(vec![owner.clone()]);

        match store.create_object(&namespace, &object).await {
            Ok(()) => created += 1,
            Err(e) if e.is_already_exists() => {
                debug!(namespace = %namespace, name = %object.name_any(), "Install object already exists");
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        namespace = %namespace,
        name = %platform.name_any(),
        created = created,
        "Materialized install"
    );
    Ok(created)
}
