//! Reconciliation driver
//!
//! One pass walks `Listing → Deciding → Applying → Done`. Everything is
//! listed before anything is decided, so a listing failure aborts the pass
//! before any mutation. Per-claim failures never abort the pass.

use crate::audit::AuditTrail;
use crate::cluster::ClusterApi;
use crate::error::{ReconcileError, ReconcileResult};
use crate::health::{components, HealthRegistry};
use crate::matcher::partition;
use crate::models::{Action, VolumeClaim, Workload};
use crate::observability::{PassSummary, ReconcileMetrics, StructuredLogger};
use crate::orphan::{OrphanEngine, OrphanPolicy, OrphanRecord, OrphanVerdict};
use crate::reclaim;
use crate::resize::{self, ResizeDecision};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Settings for one pass
#[derive(Debug, Clone, Default)]
pub struct ReconcileSettings {
    /// Namespaces in scope; empty means every namespace
    pub namespaces: Vec<String>,
    pub policy: OrphanPolicy,
    pub reclaim_scaled_down: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    Listing,
    Deciding,
    Applying,
    Done,
}

impl fmt::Display for PassPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PassPhase::Listing => "listing",
            PassPhase::Deciding => "deciding",
            PassPhase::Applying => "applying",
            PassPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// Objects of one namespace as listed at the start of a pass
#[derive(Debug, Clone)]
pub struct NamespaceSnapshot {
    pub namespace: String,
    pub workloads: Vec<Workload>,
    pub claims: Vec<VolumeClaim>,
}

/// Everything listed by the Listing phase
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub namespaces: Vec<NamespaceSnapshot>,
}

impl Snapshot {
    pub fn workload_count(&self) -> usize {
        self.namespaces.iter().map(|ns| ns.workloads.len()).sum()
    }

    pub fn claim_count(&self) -> usize {
        self.namespaces.iter().map(|ns| ns.claims.len()).sum()
    }
}

/// Output of the Deciding phase
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub actions: Vec<Action>,
    /// Orphan evaluations, including scale-down candidates
    pub orphans: Vec<OrphanRecord>,
    /// Claims skipped because of missing or invalid sizes
    pub skipped: usize,
    pub ignored: usize,
    pub audit_fallbacks: usize,
}

/// What happened to one action
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum Outcome {
    Applied,
    /// Dry run; not sent to the cluster
    Planned,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionReport {
    #[serde(flatten)]
    pub action: Action,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Result of a completed pass
#[derive(Debug, Clone, Serialize)]
pub struct PassReport {
    pub summary: PassSummary,
    pub actions: Vec<ActionReport>,
    pub orphans: Vec<OrphanRecord>,
}

/// Runs reconciliation passes against injected collaborators
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
    audit: Arc<dyn AuditTrail>,
    settings: ReconcileSettings,
    metrics: ReconcileMetrics,
    logger: StructuredLogger,
    health: HealthRegistry,
}

impl Reconciler {
    pub fn new(
        cluster: Arc<dyn ClusterApi>,
        audit: Arc<dyn AuditTrail>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            cluster,
            audit,
            settings,
            metrics: ReconcileMetrics::new(),
            logger: StructuredLogger::new("pvc-operator"),
            health: HealthRegistry::new(),
        }
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = health;
        self
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn health(&self) -> &HealthRegistry {
        &self.health
    }

    /// Check that the cluster API answers and the audit trail is reachable.
    /// Returns readiness; an unreachable audit trail only degrades.
    pub async fn check_ready(&self) -> bool {
        self.health.register(components::CLUSTER_API).await;
        self.health.register(components::AUDIT_TRAIL).await;

        let cluster_ok = match self.settings.namespaces.first() {
            Some(ns) => self.cluster.list_volume_claims(ns).await.map(|_| ()),
            None => self.cluster.list_namespaces().await.map(|_| ()),
        };
        if let Err(e) = &cluster_ok {
            self.health
                .set_unhealthy(components::CLUSTER_API, e.to_string())
                .await;
        }

        let timeout = self.settings.policy.query_timeout;
        match tokio::time::timeout(timeout, self.audit.check()).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                self.health
                    .set_degraded(components::AUDIT_TRAIL, e.to_string())
                    .await
            }
            Err(_) => {
                self.health
                    .set_degraded(components::AUDIT_TRAIL, "audit lookup timed out")
                    .await
            }
        }

        let ready = cluster_ok.is_ok();
        let health = self.health.health().await;
        match self.health.problems().await {
            Some(problems) if !ready => {
                error!(status = ?health.status, problems = %problems, "Readiness check failed")
            }
            Some(problems) => {
                warn!(status = ?health.status, problems = %problems, "Readiness check degraded")
            }
            None => info!(status = ?health.status, "Readiness check complete"),
        }
        ready
    }

    /// Run one pass now
    pub async fn run(&self) -> ReconcileResult<PassReport> {
        self.run_at(Utc::now()).await
    }

    /// Run one pass with a fixed notion of "now"
    pub async fn run_at(&self, now: DateTime<Utc>) -> ReconcileResult<PassReport> {
        let started = Instant::now();

        let snapshot = match self.list().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.health
                    .set_unhealthy(components::CLUSTER_API, e.to_string())
                    .await;
                return Err(e);
            }
        };
        self.logger.log_pass_started(
            snapshot.namespaces.len(),
            snapshot.workload_count(),
            snapshot.claim_count(),
        );

        let plan = self.decide(snapshot, now).await;
        let report = self.apply(plan).await;

        self.enter(PassPhase::Done);
        self.metrics
            .observe_pass_duration(started.elapsed().as_secs_f64());
        self.metrics.set_last_success(Utc::now().timestamp());
        self.logger.log_summary(&report.summary);
        Ok(report)
    }

    /// List and decide without applying anything
    pub async fn plan_at(&self, now: DateTime<Utc>) -> ReconcileResult<Plan> {
        let snapshot = self.list().await?;
        Ok(self.decide(snapshot, now).await)
    }

    /// Listing phase: every namespace in scope, before any decision
    pub async fn list(&self) -> ReconcileResult<Snapshot> {
        self.enter(PassPhase::Listing);

        let namespaces = if self.settings.namespaces.is_empty() {
            self.cluster
                .list_namespaces()
                .await
                .map_err(|source| ReconcileError::Listing {
                    what: "namespaces",
                    namespace: "*".to_string(),
                    source,
                })?
        } else {
            self.settings.namespaces.clone()
        };

        let mut snapshot = Snapshot::default();
        for namespace in namespaces {
            let workloads = self
                .cluster
                .list_workloads(&namespace)
                .await
                .map_err(|source| ReconcileError::Listing {
                    what: "workloads",
                    namespace: namespace.clone(),
                    source,
                })?;
            let claims = self
                .cluster
                .list_volume_claims(&namespace)
                .await
                .map_err(|source| ReconcileError::Listing {
                    what: "volume claims",
                    namespace: namespace.clone(),
                    source,
                })?;
            debug!(
                namespace = %namespace,
                workloads = workloads.len(),
                claims = claims.len(),
                "Namespace listed"
            );
            snapshot.namespaces.push(NamespaceSnapshot {
                namespace,
                workloads,
                claims,
            });
        }

        Ok(snapshot)
    }

    /// Deciding phase
    pub async fn decide(&self, snapshot: Snapshot, now: DateTime<Utc>) -> Plan {
        self.enter(PassPhase::Deciding);

        let engine = OrphanEngine::new(self.audit.as_ref(), &self.settings.policy);
        let mut plan = Plan::default();

        for ns in snapshot.namespaces {
            let buckets = partition(&ns.workloads, ns.claims);
            plan.ignored += buckets.ignored.len();

            for orphan in &buckets.orphaned {
                let verdict = engine.evaluate(orphan, now).await;
                self.record_verdict(&mut plan, verdict);
            }

            for m in &buckets.matches {
                if self.settings.reclaim_scaled_down {
                    if let Some(verdict) = reclaim::evaluate(&engine, m, now).await {
                        // A claim being deleted is not resized in the same pass
                        if self.record_verdict(&mut plan, verdict) {
                            continue;
                        }
                    }
                }

                match resize::decide(m) {
                    Ok(ResizeDecision::Grow(action)) => plan.actions.push(action),
                    Ok(ResizeDecision::UpToDate) => {}
                    Ok(ResizeDecision::ShrinkRefused { declared, current }) => {
                        self.logger
                            .log_shrink_refused(&m.claim.claim_ref(), &declared, &current);
                    }
                    Err(e) => {
                        warn!(claim = %m.claim.claim_ref(), error = %e, "Skipping claim");
                        plan.skipped += 1;
                    }
                }
            }
        }

        debug!(actions = plan.actions.len(), "Decisions complete");
        plan
    }

    /// Returns true when the verdict produced a deletion
    fn record_verdict(&self, plan: &mut Plan, verdict: OrphanVerdict) -> bool {
        if verdict.record.fallback.is_some() {
            self.logger.log_orphan_fallback(&verdict.record);
            plan.audit_fallbacks += 1;
        }
        plan.orphans.push(verdict.record);
        match verdict.action {
            Some(action) => {
                plan.actions.push(action);
                true
            }
            None => false,
        }
    }

    /// Applying phase
    async fn apply(&self, plan: Plan) -> PassReport {
        self.enter(PassPhase::Applying);

        let dry_run = self.settings.dry_run;
        let mut summary = PassSummary {
            skipped: plan.skipped,
            ignored: plan.ignored,
            audit_fallbacks: plan.audit_fallbacks,
            dry_run,
            ..Default::default()
        };
        self.metrics.set_planned_actions(plan.actions.len());
        self.metrics.add_ignored(plan.ignored);
        for _ in 0..plan.skipped {
            self.metrics.inc_skipped();
        }
        for _ in 0..plan.audit_fallbacks {
            self.metrics.inc_audit_fallbacks();
        }

        let mut reports = Vec::with_capacity(plan.actions.len());
        for action in plan.actions {
            let outcome = if dry_run {
                self.log_action(&action, true);
                summary.planned += 1;
                Outcome::Planned
            } else {
                self.apply_one(&action, &mut summary).await
            };
            reports.push(ActionReport { action, outcome });
        }

        if summary.errors == 0 {
            self.health.set_healthy(components::CLUSTER_API).await;
        }

        PassReport {
            summary,
            actions: reports,
            orphans: plan.orphans,
        }
    }

    async fn apply_one(&self, action: &Action, summary: &mut PassSummary) -> Outcome {
        let claim = action.claim();
        let result = match action {
            Action::ResizePatch { claim, new_size } => {
                self.cluster.patch_capacity(claim, new_size).await
            }
            Action::DeleteClaim { claim, .. } => self.cluster.delete_claim(claim).await,
        };

        match result {
            Ok(()) => {
                self.log_action(action, false);
                match action {
                    Action::ResizePatch { .. } => {
                        summary.resized += 1;
                        self.metrics.inc_resized();
                    }
                    Action::DeleteClaim { reason, .. } => {
                        summary.deleted += 1;
                        self.metrics.inc_deleted(*reason);
                    }
                }
                Outcome::Applied
            }
            Err(e) => {
                let err = ReconcileError::from_apply(claim.to_string(), e);
                if err.is_transient() {
                    warn!(claim = %claim, error = %err, "Skipping claim until the next pass");
                    summary.skipped += 1;
                    self.metrics.inc_skipped();
                    Outcome::Skipped(err.to_string())
                } else {
                    error!(claim = %claim, error = %err, "Failed to apply action");
                    summary.errors += 1;
                    self.metrics.inc_errors();
                    Outcome::Failed(err.to_string())
                }
            }
        }
    }

    fn log_action(&self, action: &Action, dry_run: bool) {
        match action {
            Action::ResizePatch { claim, new_size } => {
                self.logger.log_claim_resized(claim, new_size, dry_run)
            }
            Action::DeleteClaim { claim, reason } => {
                self.logger.log_claim_deleted(claim, *reason, dry_run)
            }
        }
    }

    fn enter(&self, phase: PassPhase) {
        info!(phase = %phase, dry_run = self.settings.dry_run, "Entering phase");
    }
}
