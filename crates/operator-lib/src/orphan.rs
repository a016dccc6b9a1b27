//! Orphan lifecycle
//!
//! An orphaned claim becomes deletable once its owner has been gone for at
//! least the grace period. The deletion time comes from the audit trail. When
//! the audit trail has no answer (no event, error, timeout) the claim is
//! treated as orphaned just now and is never deleted in that pass.

use crate::audit::{AuditSubject, AuditTrail, ResourceKind};
use crate::error::{AuditError, ReconcileError};
use crate::matcher::OrphanedClaim;
use crate::models::{Action, ClaimRef, DeleteReason, VolumeClaim};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

/// Default grace period before an orphaned claim may be deleted
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60 * 60);

/// Default audit lookback window
pub const DEFAULT_LOOKBACK: Duration = Duration::from_secs(24 * 60 * 60);

/// Default timeout for a single audit query
pub const DEFAULT_AUDIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Timing policy for the orphan lifecycle
#[derive(Debug, Clone)]
pub struct OrphanPolicy {
    pub grace_period: Duration,
    /// How far back to search the audit trail; never shorter than the grace period
    pub lookback: Duration,
    pub query_timeout: Duration,
}

impl Default for OrphanPolicy {
    fn default() -> Self {
        Self {
            grace_period: DEFAULT_GRACE_PERIOD,
            lookback: DEFAULT_LOOKBACK,
            query_timeout: DEFAULT_AUDIT_TIMEOUT,
        }
    }
}

impl OrphanPolicy {
    pub fn new(grace_period: Duration, lookback: Duration, query_timeout: Duration) -> Self {
        Self {
            grace_period,
            lookback: lookback.max(grace_period),
            query_timeout,
        }
    }
}

/// Why `orphaned_since` fell back to the current time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "fallback", content = "detail", rename_all = "snake_case")]
pub enum FallbackReason {
    NoEvent,
    Timeout,
    LookupFailed(String),
}

/// Derived orphan state for one claim
#[derive(Debug, Clone, Serialize)]
pub struct OrphanRecord {
    pub claim: ClaimRef,
    /// Resource whose deletion orphaned the claim
    pub subject_kind: &'static str,
    pub subject_name: String,
    pub orphaned_since: DateTime<Utc>,
    pub elapsed_secs: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
}

/// Outcome of evaluating one orphaned claim
#[derive(Debug, Clone)]
pub struct OrphanVerdict {
    pub record: OrphanRecord,
    pub action: Option<Action>,
}

/// Evaluates orphaned claims against the audit trail
pub struct OrphanEngine<'a> {
    audit: &'a dyn AuditTrail,
    policy: &'a OrphanPolicy,
}

impl<'a> OrphanEngine<'a> {
    pub fn new(audit: &'a dyn AuditTrail, policy: &'a OrphanPolicy) -> Self {
        Self { audit, policy }
    }

    /// Evaluate a claim whose owning workload is gone
    pub async fn evaluate(&self, orphan: &OrphanedClaim, now: DateTime<Utc>) -> OrphanVerdict {
        self.evaluate_subject(
            &orphan.claim,
            ResourceKind::StatefulSet,
            &orphan.owner,
            DeleteReason::Orphaned,
            now,
        )
        .await
    }

    /// Evaluate a claim against the deletion of an arbitrary subject resource
    pub async fn evaluate_subject(
        &self,
        claim: &VolumeClaim,
        kind: ResourceKind,
        subject: &str,
        reason: DeleteReason,
        now: DateTime<Utc>,
    ) -> OrphanVerdict {
        let audit_subject = AuditSubject {
            kind,
            namespace: &claim.namespace,
            name: subject,
            volume: claim.volume.as_deref(),
        };
        let (orphaned_since, fallback) = match self.lookup(&audit_subject, now).await {
            Ok(Some(ts)) => (ts, None),
            Ok(None) => (now, Some(FallbackReason::NoEvent)),
            Err(AuditError::Timeout(_)) => (now, Some(FallbackReason::Timeout)),
            Err(source) => {
                let err = ReconcileError::AuditLookup {
                    resource: audit_subject.to_string(),
                    source,
                };
                (now, Some(FallbackReason::LookupFailed(err.to_string())))
            }
        };
        let claim = claim.claim_ref();

        if let Some(fallback) = &fallback {
            debug!(claim = %claim, subject = %audit_subject, fallback = ?fallback, "Audit fallback");
        }

        // Clock skew can put the event slightly in the future
        let elapsed = (now - orphaned_since).max(chrono::Duration::zero());
        let grace = self.policy.grace_period;
        // A fallback timestamp is not evidence of deletion, even with a zero grace period
        let eligible = fallback.is_none() && elapsed.to_std().map(|e| e >= grace).unwrap_or(false);

        let action = if eligible {
            Some(Action::DeleteClaim {
                claim: claim.clone(),
                reason,
            })
        } else {
            debug!(
                claim = %claim,
                elapsed_secs = elapsed.num_seconds(),
                grace_secs = grace.as_secs(),
                "Orphaned claim still within grace period"
            );
            None
        };

        OrphanVerdict {
            record: OrphanRecord {
                claim,
                subject_kind: kind.as_str(),
                subject_name: subject.to_string(),
                orphaned_since,
                elapsed_secs: elapsed.num_seconds(),
                fallback,
            },
            action,
        }
    }

    /// Start of the audit window for a pass evaluated at `now`
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        chrono::Duration::from_std(self.policy.lookback)
            .ok()
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    async fn lookup(
        &self,
        subject: &AuditSubject<'_>,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>, AuditError> {
        let query = self
            .audit
            .find_deletion_event(subject, self.window_start(now));
        match tokio::time::timeout(self.policy.query_timeout, query).await {
            Ok(result) => result,
            Err(_) => Err(AuditError::Timeout(self.policy.query_timeout)),
        }
    }
}
