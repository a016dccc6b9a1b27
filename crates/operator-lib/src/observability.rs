//! Observability for the operator
//!
//! Provides:
//! - Prometheus metrics for reconciliation outcomes, exported as a textfile
//! - Structured JSON log events for significant domain events

use crate::models::{ClaimRef, DeleteReason};
use crate::orphan::OrphanRecord;
use crate::quantity::StorageQuantity;
use anyhow::Context;
use prometheus::{
    register_histogram, register_int_gauge, register_int_gauge_vec, Encoder, Histogram,
    IntGauge, IntGaugeVec, TextEncoder,
};
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{error, info, warn};

/// Histogram buckets for pass duration (in seconds)
const PASS_DURATION_BUCKETS: &[f64] = &[0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ReconcileMetricsInner> = OnceLock::new();

struct ReconcileMetricsInner {
    claims_resized: IntGauge,
    claims_deleted: IntGaugeVec,
    claims_skipped: IntGauge,
    claim_errors: IntGauge,
    claims_ignored: IntGauge,
    audit_fallbacks: IntGauge,
    planned_actions: IntGauge,
    pass_duration_seconds: Histogram,
    last_success_timestamp: IntGauge,
}

impl ReconcileMetricsInner {
    fn new() -> Self {
        Self {
            claims_resized: register_int_gauge!(
                "pvc_operator_claims_resized_total",
                "Claims whose requested storage was grown"
            )
            .expect("Failed to register claims_resized"),

            claims_deleted: register_int_gauge_vec!(
                "pvc_operator_claims_deleted_total",
                "Claims deleted, by reason",
                &["reason"]
            )
            .expect("Failed to register claims_deleted"),

            claims_skipped: register_int_gauge!(
                "pvc_operator_claims_skipped_total",
                "Claims skipped because of conflicts, missing objects or invalid sizes"
            )
            .expect("Failed to register claims_skipped"),

            claim_errors: register_int_gauge!(
                "pvc_operator_claim_errors_total",
                "Claims whose action failed with an API error"
            )
            .expect("Failed to register claim_errors"),

            claims_ignored: register_int_gauge!(
                "pvc_operator_claims_ignored_total",
                "Claims without a usable ownership annotation"
            )
            .expect("Failed to register claims_ignored"),

            audit_fallbacks: register_int_gauge!(
                "pvc_operator_audit_fallbacks_total",
                "Orphan evaluations that fell back to the current time"
            )
            .expect("Failed to register audit_fallbacks"),

            planned_actions: register_int_gauge!(
                "pvc_operator_planned_actions",
                "Actions decided in the most recent pass"
            )
            .expect("Failed to register planned_actions"),

            pass_duration_seconds: register_histogram!(
                "pvc_operator_pass_duration_seconds",
                "Wall time of a reconciliation pass",
                PASS_DURATION_BUCKETS.to_vec()
            )
            .expect("Failed to register pass_duration_seconds"),

            last_success_timestamp: register_int_gauge!(
                "pvc_operator_last_success_timestamp_seconds",
                "Unix time of the last completed pass"
            )
            .expect("Failed to register last_success_timestamp"),
        }
    }
}

/// Operator metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct ReconcileMetrics {
    _private: (),
}

impl Default for ReconcileMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ReconcileMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ReconcileMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ReconcileMetricsInner {
        GLOBAL_METRICS.get_or_init(ReconcileMetricsInner::new)
    }

    pub fn inc_resized(&self) {
        self.inner().claims_resized.inc();
    }

    pub fn inc_deleted(&self, reason: DeleteReason) {
        self.inner()
            .claims_deleted
            .with_label_values(&[&reason.to_string()])
            .inc();
    }

    pub fn inc_skipped(&self) {
        self.inner().claims_skipped.inc();
    }

    pub fn inc_errors(&self) {
        self.inner().claim_errors.inc();
    }

    pub fn add_ignored(&self, count: usize) {
        self.inner().claims_ignored.add(count as i64);
    }

    pub fn inc_audit_fallbacks(&self) {
        self.inner().audit_fallbacks.inc();
    }

    pub fn set_planned_actions(&self, count: usize) {
        self.inner().planned_actions.set(count as i64);
    }

    pub fn observe_pass_duration(&self, duration_secs: f64) {
        self.inner().pass_duration_seconds.observe(duration_secs);
    }

    pub fn set_last_success(&self, unix_secs: i64) {
        self.inner().last_success_timestamp.set(unix_secs);
    }
}

/// Render every registered metric in the text exposition format
pub fn render_text() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&prometheus::gather(), &mut buffer)
        .context("Failed to encode metrics")?;
    String::from_utf8(buffer).context("Metrics output is not valid UTF-8")
}

/// Write metrics for a textfile collector. The file is replaced atomically
/// so a scrape never reads a partial write.
pub async fn write_textfile(path: &Path) -> anyhow::Result<()> {
    let text = render_text()?;
    let tmp = path.with_extension("prom.tmp");
    tokio::fs::write(&tmp, text)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;
    Ok(())
}

/// Counts reported at the end of a pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub resized: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub errors: usize,
    pub ignored: usize,
    pub audit_fallbacks: usize,
    /// Actions decided but not applied because of dry run
    pub planned: usize,
    pub dry_run: bool,
}

/// Structured logger for operator events
///
/// Provides consistent JSON-formatted logging for resizes, deletions,
/// and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn log_startup(&self, version: &str, dry_run: bool, namespaces: &[String]) {
        info!(
            event = "operator_started",
            instance = %self.instance,
            operator_version = %version,
            dry_run = dry_run,
            namespaces = ?namespaces,
            "PVC operator started"
        );
    }

    pub fn log_pass_started(&self, namespaces: usize, workloads: usize, claims: usize) {
        info!(
            event = "pass_started",
            instance = %self.instance,
            namespaces = namespaces,
            workloads = workloads,
            claims = claims,
            "Reconciliation pass started"
        );
    }

    pub fn log_claim_resized(&self, claim: &ClaimRef, new_size: &StorageQuantity, dry_run: bool) {
        info!(
            event = "claim_resized",
            instance = %self.instance,
            namespace = %claim.namespace,
            claim = %claim.name,
            new_size = %new_size,
            new_size_bytes = new_size.bytes(),
            dry_run = dry_run,
            "Claim storage request grown"
        );
    }

    pub fn log_claim_deleted(&self, claim: &ClaimRef, reason: DeleteReason, dry_run: bool) {
        info!(
            event = "claim_deleted",
            instance = %self.instance,
            namespace = %claim.namespace,
            claim = %claim.name,
            reason = %reason,
            dry_run = dry_run,
            "Claim deleted"
        );
    }

    pub fn log_orphan_fallback(&self, record: &OrphanRecord) {
        warn!(
            event = "orphan_fallback",
            instance = %self.instance,
            namespace = %record.claim.namespace,
            claim = %record.claim.name,
            subject_kind = %record.subject_kind,
            subject = %record.subject_name,
            fallback = ?record.fallback,
            "No deletion time available, treating claim as orphaned now"
        );
    }

    pub fn log_shrink_refused(
        &self,
        claim: &ClaimRef,
        declared: &StorageQuantity,
        current: &StorageQuantity,
    ) {
        warn!(
            event = "shrink_refused",
            instance = %self.instance,
            namespace = %claim.namespace,
            claim = %claim.name,
            declared = %declared,
            current = %current,
            "Declared size is smaller than the claim, volumes cannot shrink"
        );
    }

    pub fn log_summary(&self, summary: &PassSummary) {
        info!(
            event = "pass_summary",
            instance = %self.instance,
            resized = summary.resized,
            deleted = summary.deleted,
            skipped = summary.skipped,
            errors = summary.errors,
            ignored = summary.ignored,
            audit_fallbacks = summary.audit_fallbacks,
            planned = summary.planned,
            dry_run = summary.dry_run,
            "Reconciliation pass complete"
        );
    }

    pub fn log_finished(&self, failure: Option<&str>) {
        match failure {
            None => info!(
                event = "operator_finished",
                instance = %self.instance,
                success = true,
                "PVC operator finished"
            ),
            Some(reason) => error!(
                event = "operator_finished",
                instance = %self.instance,
                success = false,
                reason = %reason,
                "PVC operator failed"
            ),
        }
    }
}
