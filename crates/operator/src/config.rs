//! Operator configuration

use anyhow::{bail, Context, Result};
use operator_lib::audit::DEFAULT_DELETION_REASONS;
use operator_lib::projection::DEFAULT_ANNOTATION_PREFIX;
use operator_lib::{AnnotationKeys, AuditBackend, CloudTrailConfig, OrphanPolicy, ReconcileSettings};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Operator configuration, read from the process environment
#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Log at debug level
    #[serde(default)]
    pub debug_logging: bool,

    /// Minutes an orphaned claim is kept before deletion
    #[serde(default = "default_grace_period_minutes")]
    pub grace_period_minutes: u64,

    #[serde(default = "default_annotation_prefix")]
    pub annotation_prefix: String,

    /// Namespaces to reconcile; empty means all
    #[serde(default)]
    pub namespaces: Vec<String>,

    #[serde(default = "default_audit_lookback_minutes")]
    pub audit_lookback_minutes: u64,

    #[serde(default = "default_audit_timeout_secs")]
    pub audit_timeout_secs: u64,

    /// `cloudtrail` (volume detach events) or `events` (Kubernetes Events)
    #[serde(default)]
    pub audit_backend: AuditBackend,

    #[serde(default)]
    pub aws_region: Option<String>,

    #[serde(default)]
    pub cloudtrail_endpoint_url: Option<String>,

    /// Event reasons that mark a deletion, for the `events` backend
    #[serde(default = "default_deletion_reasons")]
    pub audit_deletion_reasons: Vec<String>,

    #[serde(default)]
    pub reclaim_scaled_down: bool,

    #[serde(default)]
    pub dry_run: bool,

    /// Empty disables the heartbeat file
    #[serde(default = "default_heartbeat_file")]
    pub heartbeat_file: String,

    #[serde(default)]
    pub metrics_file: Option<String>,
}

fn default_grace_period_minutes() -> u64 {
    60
}

fn default_annotation_prefix() -> String {
    DEFAULT_ANNOTATION_PREFIX.to_string()
}

fn default_audit_lookback_minutes() -> u64 {
    24 * 60
}

fn default_audit_timeout_secs() -> u64 {
    10
}

fn default_deletion_reasons() -> Vec<String> {
    DEFAULT_DELETION_REASONS.iter().map(|r| r.to_string()).collect()
}

fn default_heartbeat_file() -> String {
    "/tmp/heartbeat".to_string()
}

fn non_blank(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_env(config::Environment::default())
    }

    fn from_env(env: config::Environment) -> Result<Self> {
        let env = env
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("namespaces")
            .with_list_parse_key("audit_deletion_reasons");

        let config = config::Config::builder()
            .add_source(env)
            .build()
            .context("Failed to read environment")?;

        let mut loaded: OperatorConfig = config
            .try_deserialize()
            .context("Invalid operator configuration")?;
        loaded.namespaces = non_blank(loaded.namespaces);
        loaded.audit_deletion_reasons = non_blank(loaded.audit_deletion_reasons);
        if loaded.audit_deletion_reasons.is_empty() {
            loaded.audit_deletion_reasons = default_deletion_reasons();
        }
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<()> {
        if self.annotation_prefix.trim().is_empty() {
            bail!("ANNOTATION_PREFIX must not be empty");
        }
        if self.audit_timeout_secs == 0 {
            bail!("AUDIT_TIMEOUT_SECS must be greater than zero");
        }
        Ok(())
    }

    pub fn annotation_keys(&self) -> AnnotationKeys {
        AnnotationKeys::with_prefix(self.annotation_prefix.trim())
    }

    pub fn settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            namespaces: self.namespaces.clone(),
            policy: OrphanPolicy::new(
                Duration::from_secs(self.grace_period_minutes * 60),
                Duration::from_secs(self.audit_lookback_minutes * 60),
                Duration::from_secs(self.audit_timeout_secs),
            ),
            reclaim_scaled_down: self.reclaim_scaled_down,
            dry_run: self.dry_run,
        }
    }

    pub fn cloudtrail(&self) -> CloudTrailConfig {
        let non_empty = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        CloudTrailConfig {
            region: non_empty(&self.aws_region),
            endpoint_url: non_empty(&self.cloudtrail_endpoint_url),
        }
    }

    pub fn heartbeat_path(&self) -> Option<PathBuf> {
        let path = self.heartbeat_file.trim();
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    pub fn metrics_path(&self) -> Option<PathBuf> {
        self.metrics_file
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map(PathBuf::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<OperatorConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        OperatorConfig::from_env(config::Environment::default().source(Some(map)))
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert!(!config.debug_logging);
        assert_eq!(config.grace_period_minutes, 60);
        assert_eq!(config.annotation_prefix, "pvc-operator");
        assert!(config.namespaces.is_empty());
        assert_eq!(config.audit_backend, AuditBackend::CloudTrail);
        assert_eq!(config.cloudtrail().region, None);
        assert_eq!(config.audit_deletion_reasons, vec!["Deleted", "Killing"]);
        assert!(!config.dry_run);
        assert_eq!(config.heartbeat_path(), Some(PathBuf::from("/tmp/heartbeat")));
        assert_eq!(config.metrics_path(), None);

        let settings = config.settings();
        assert_eq!(settings.policy.grace_period, Duration::from_secs(3600));
        assert_eq!(settings.policy.lookback, Duration::from_secs(24 * 3600));
        assert_eq!(settings.policy.query_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_environment_overrides() {
        let config = load(&[
            ("GRACE_PERIOD_MINUTES", "120"),
            ("NAMESPACES", "prod, staging"),
            ("ANNOTATION_PREFIX", "storage.example.com"),
            ("DRY_RUN", "true"),
            ("RECLAIM_SCALED_DOWN", "true"),
            ("HEARTBEAT_FILE", ""),
            ("METRICS_FILE", "/var/lib/node-exporter/pvc.prom"),
        ])
        .unwrap();

        assert_eq!(config.namespaces, vec!["prod", "staging"]);
        assert_eq!(
            config.annotation_keys().storage_size,
            "storage.example.com/storage-size"
        );
        assert_eq!(config.heartbeat_path(), None);
        assert!(config.metrics_path().is_some());

        let settings = config.settings();
        assert!(settings.dry_run);
        assert!(settings.reclaim_scaled_down);
        assert_eq!(settings.policy.grace_period, Duration::from_secs(7200));
    }

    #[test]
    fn test_lookback_raised_to_grace_period() {
        let config = load(&[
            ("GRACE_PERIOD_MINUTES", "300"),
            ("AUDIT_LOOKBACK_MINUTES", "30"),
        ])
        .unwrap();

        assert_eq!(config.settings().policy.lookback, Duration::from_secs(300 * 60));
    }

    #[test]
    fn test_audit_backend_selection() {
        let config = load(&[
            ("AUDIT_BACKEND", "events"),
            ("AUDIT_DELETION_REASONS", "Killing,SuccessfulDelete"),
        ])
        .unwrap();
        assert_eq!(config.audit_backend, AuditBackend::Events);
        assert_eq!(config.audit_deletion_reasons, vec!["Killing", "SuccessfulDelete"]);

        let config = load(&[
            ("AWS_REGION", "eu-west-1"),
            ("CLOUDTRAIL_ENDPOINT_URL", " "),
        ])
        .unwrap();
        let cloudtrail = config.cloudtrail();
        assert_eq!(cloudtrail.region.as_deref(), Some("eu-west-1"));
        assert_eq!(cloudtrail.endpoint_url, None);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(load(&[("AUDIT_BACKEND", "syslog")]).is_err());
        assert!(load(&[("GRACE_PERIOD_MINUTES", "soon")]).is_err());
        assert!(load(&[("AUDIT_TIMEOUT_SECS", "0")]).is_err());
        assert!(load(&[("ANNOTATION_PREFIX", " ")]).is_err());
    }
}
