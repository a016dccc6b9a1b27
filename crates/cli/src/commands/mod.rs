//! Subcommand implementations

pub mod claims;
pub mod plan;
pub mod quantity;
pub mod run;

use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use operator_lib::orphan::{DEFAULT_AUDIT_TIMEOUT, DEFAULT_LOOKBACK};
use operator_lib::{
    AnnotationKeys, AuditBackend, AuditTrail, CloudTrailAudit, CloudTrailConfig, KubeCluster,
    KubeEventAudit, OrphanPolicy, ReconcileSettings, Reconciler,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Cluster connection and policy options shared by the cluster commands
#[derive(Debug, Clone, Default)]
pub struct ClusterOptions {
    pub kubeconfig: Option<String>,
    pub annotation_prefix: Option<String>,
    pub grace_period_minutes: Option<u64>,
    pub default_namespaces: Vec<String>,
    pub audit_backend: AuditBackend,
}

impl ClusterOptions {
    pub fn annotation_keys(&self) -> AnnotationKeys {
        match self.annotation_prefix.as_deref().map(str::trim) {
            Some(prefix) if !prefix.is_empty() => AnnotationKeys::with_prefix(prefix),
            _ => AnnotationKeys::default(),
        }
    }

    /// Settings for a pass; explicit namespaces win over configured defaults
    pub fn settings(&self, namespaces: &[String]) -> ReconcileSettings {
        let grace = Duration::from_secs(self.grace_period_minutes.unwrap_or(60) * 60);
        let namespaces = if namespaces.is_empty() {
            self.default_namespaces.clone()
        } else {
            namespaces.to_vec()
        };
        ReconcileSettings {
            namespaces,
            policy: OrphanPolicy::new(grace, DEFAULT_LOOKBACK, DEFAULT_AUDIT_TIMEOUT),
            ..Default::default()
        }
    }

    async fn client(&self) -> Result<kube::Client> {
        let config = match &self.kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .with_context(|| format!("Failed to read kubeconfig {}", path))?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .context("Invalid kubeconfig")?
            }
            None => kube::Config::infer()
                .await
                .context("Failed to find cluster configuration")?,
        };
        kube::Client::try_from(config).context("Failed to create Kubernetes client")
    }

    /// Connect to the cluster and build a reconciler
    pub async fn reconciler(&self, settings: ReconcileSettings) -> Result<Reconciler> {
        let client = self.client().await?;
        debug!(namespaces = ?settings.namespaces, "Connected to cluster");
        let cluster = KubeCluster::new(client.clone(), self.annotation_keys());
        let audit: Arc<dyn AuditTrail> = match self.audit_backend {
            AuditBackend::CloudTrail => {
                Arc::new(CloudTrailAudit::from_env(client, &CloudTrailConfig::default()).await)
            }
            AuditBackend::Events => Arc::new(KubeEventAudit::new(client, Vec::new())),
        };
        Ok(Reconciler::new(Arc::new(cluster), audit, settings))
    }
}
