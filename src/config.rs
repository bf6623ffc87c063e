//! Runtime settings shared read-only by every reconciliation pass

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{OperatorError, Result};

pub const DEFAULT_INSTALL_TEMPLATE: &str = "/etc/apiplatform/install.yaml";

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Namespace to watch; `None` watches all namespaces
    pub namespace: Option<String>,
    /// Requeue delay once an instance is stable
    pub resync_interval: Duration,
    /// Requeue delay while an instance is not ready
    pub not_ready_interval: Duration,
    /// Requeue delay after a failed pass
    pub error_requeue_interval: Duration,
    pub install_template: PathBuf,
    pub tenant_api_timeout: Duration,
    /// Accept self-signed certificates from the platform's router
    pub tenant_api_insecure_tls: bool,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_interval: Duration::from_secs(60),
            not_ready_interval: Duration::from_secs(10),
            error_requeue_interval: Duration::from_secs(30),
            install_template: PathBuf::from(DEFAULT_INSTALL_TEMPLATE),
            tenant_api_timeout: Duration::from_secs(10),
            tenant_api_insecure_tls: false,
        }
    }
}

impl OperatorConfig {
    pub fn validate(&self) -> Result<()> {
        let intervals = [
            ("resync", self.resync_interval),
            ("not-ready", self.not_ready_interval),
            ("error-requeue", self.error_requeue_interval),
            ("tenant-api-timeout", self.tenant_api_timeout),
        ];
        for (name, interval) in intervals {
            if interval.is_zero() {
                return Err(OperatorError::Configuration(format!(
                    "{} interval must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OperatorConfig::default();
        assert_eq!(config.resync_interval, Duration::from_secs(60));
        assert_eq!(config.not_ready_interval, Duration::from_secs(10));
        assert!(!config.tenant_api_insecure_tls);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let config = OperatorConfig {
            not_ready_interval: Duration::ZERO,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("not-ready"));
    }
}
