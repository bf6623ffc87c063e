//! API Platform Kubernetes Operator
//!
//! Reconciles ApiPlatform and ApiTenant resources.
//!
//! ## Usage
//!
//! ```bash
//! # Run the operator (requires kubeconfig)
//! apiplatform-operator --install-template ./install.yaml
//!
//! # Print the CRDs to install them
//! apiplatform-operator --print-crds | kubectl apply -f -
//!
//! # Run with custom log level
//! RUST_LOG=apiplatform_operator=debug apiplatform-operator
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use apiplatform_operator::controllers::{Context, PlatformController, TenantController};
use apiplatform_operator::install::TemplateRenderer;
use apiplatform_operator::store::KubeStore;
use apiplatform_operator::tenant_api::HttpTenantServiceFactory;
use apiplatform_operator::{ApiPlatform, ApiTenant, OperatorConfig};
use clap::Parser;
use kube::{Client, CustomResourceExt};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// API Platform Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "apiplatform-operator")]
#[command(version, about = "Kubernetes Operator for API-management platforms and their tenants")]
struct Args {
    /// Namespace to watch (empty for all namespaces)
    #[arg(long, default_value = "")]
    namespace: String,

    /// Requeue delay for stable instances
    #[arg(long, default_value_t = 60)]
    resync_seconds: u64,

    /// Requeue delay while an instance is not ready
    #[arg(long, default_value_t = 10)]
    not_ready_seconds: u64,

    /// Requeue delay after a failed pass
    #[arg(long, default_value_t = 30)]
    error_requeue_seconds: u64,

    /// Multi-document YAML template of the platform install
    #[arg(long, default_value = apiplatform_operator::config::DEFAULT_INSTALL_TEMPLATE)]
    install_template: PathBuf,

    /// Timeout for each tenant API call
    #[arg(long, default_value_t = 10)]
    tenant_api_timeout_seconds: u64,

    /// Accept self-signed certificates on platform routes
    #[arg(long, default_value = "false")]
    tenant_api_insecure_tls: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print the CustomResourceDefinitions and exit
    #[arg(long, default_value = "false")]
    print_crds: bool,
}

impl Args {
    fn config(&self) -> OperatorConfig {
        OperatorConfig {
            namespace: Some(self.namespace.clone()).filter(|ns| !ns.is_empty()),
            resync_interval: Duration::from_secs(self.resync_seconds),
            not_ready_interval: Duration::from_secs(self.not_ready_seconds),
            error_requeue_interval: Duration::from_secs(self.error_requeue_seconds),
            install_template: self.install_template.clone(),
            tenant_api_timeout: Duration::from_secs(self.tenant_api_timeout_seconds),
            tenant_api_insecure_tls: self.tenant_api_insecure_tls,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_crds {
        print!(
            "{}---\n{}",
            serde_yaml::to_string(&ApiPlatform::crd())?,
            serde_yaml::to_string(&ApiTenant::crd())?
        );
        return Ok(());
    }

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = args.config();
    config.validate()?;

    info!("Starting API Platform Kubernetes Operator");
    info!(
        "Watching namespace: {}",
        config.namespace.as_deref().unwrap_or("all")
    );

    let renderer = TemplateRenderer::from_file(&config.install_template)?;
    let tenant_api = HttpTenantServiceFactory::new(config.tenant_api_timeout, config.tenant_api_insecure_tls)?;

    let client = Client::try_default().await?;
    info!("Connected to Kubernetes API server");

    let ctx = Arc::new(Context {
        store: Arc::new(KubeStore::new(client.clone())),
        tenant_api: Arc::new(tenant_api),
        renderer: Arc::new(renderer),
        config,
    });

    let platform_controller = Arc::new(PlatformController::new(Arc::clone(&ctx)));
    let tenant_controller = Arc::new(TenantController::new(Arc::clone(&ctx)));

    let platform_handle = {
        let client = client.clone();
        tokio::spawn(async move {
            if let Err(e) = platform_controller.run(client).await {
                error!("Platform controller error: {}", e);
            }
        })
    };

    let tenant_handle = tokio::spawn(async move {
        if let Err(e) = tenant_controller.run(client).await {
            error!("Tenant controller error: {}", e);
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = platform_handle => {
            if let Err(e) = result {
                error!("Platform controller task failed: {}", e);
            }
        }
        result = tenant_handle => {
            if let Err(e) = result {
                error!("Tenant controller task failed: {}", e);
            }
        }
    }

    info!("API Platform Operator shutting down");
    Ok(())
}
