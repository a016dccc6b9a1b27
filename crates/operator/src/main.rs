//! PVC operator
//!
//! Runs a single reconciliation pass over persistent volume claims and
//! exits. Scheduling is left to a CronJob.

use anyhow::{Context, Result};
use operator_lib::health::{write_heartbeat, Heartbeat};
use operator_lib::observability::write_textfile;
use operator_lib::{
    AuditBackend, AuditTrail, CloudTrailAudit, KubeCluster, KubeEventAudit, Reconciler,
    StructuredLogger,
};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;

const OPERATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_tracing(debug: bool) {
    let level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{level},kube=warn,hyper=warn,tower=warn"))
        }))
        .with(fmt::layer().json())
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = config::OperatorConfig::load();
    init_tracing(config.as_ref().map(|c| c.debug_logging).unwrap_or(false));
    let config = config?;

    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| "pvc-operator".to_string());
    let logger = StructuredLogger::new(instance);
    logger.log_startup(OPERATOR_VERSION, config.dry_run, &config.namespaces);

    match run(&config, &logger).await {
        Ok(()) => {
            logger.log_finished(None);
            Ok(())
        }
        Err(e) => {
            logger.log_finished(Some(&format!("{:#}", e)));
            Err(e)
        }
    }
}

async fn run(config: &config::OperatorConfig, logger: &StructuredLogger) -> Result<()> {
    let client = kube::Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;
    info!("Kubernetes client initialized");

    let cluster = KubeCluster::new(client.clone(), config.annotation_keys());
    let audit: Arc<dyn AuditTrail> = match config.audit_backend {
        AuditBackend::CloudTrail => {
            Arc::new(CloudTrailAudit::from_env(client, &config.cloudtrail()).await)
        }
        AuditBackend::Events => Arc::new(KubeEventAudit::new(
            client,
            config.audit_deletion_reasons.clone(),
        )),
    };
    info!(backend = %config.audit_backend, "Audit trail initialized");
    let reconciler = Reconciler::new(Arc::new(cluster), audit, config.settings())
        .with_logger(logger.clone());

    let heartbeat = config.heartbeat_path();
    if reconciler.check_ready().await {
        if let Some(path) = &heartbeat {
            if let Err(e) = write_heartbeat(path, Heartbeat::Ready).await {
                warn!(path = %path.display(), error = %e, "Failed to write heartbeat");
            }
        }
    }

    let result = reconciler.run().await;

    if let Some(path) = config.metrics_path() {
        if let Err(e) = write_textfile(&path).await {
            warn!(path = %path.display(), error = %format!("{:#}", e), "Failed to export metrics");
        }
    }

    let report = result.context("Reconciliation pass failed")?;
    if let Some(path) = &heartbeat {
        if let Err(e) = write_heartbeat(path, Heartbeat::Running).await {
            warn!(path = %path.display(), error = %e, "Failed to write heartbeat");
        }
    }

    info!(
        actions = report.actions.len(),
        errors = report.summary.errors,
        "Pass finished"
    );
    Ok(())
}
