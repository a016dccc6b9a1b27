//! Scale-down reclaim
//!
//! When a workload is scaled down, claims of the removed instances keep
//! their ownership annotation and still match the workload. A claim whose
//! ordinal is at or beyond the replica count is run through the orphan
//! lifecycle against the deleted pod instead of the workload.

use crate::audit::ResourceKind;
use crate::matcher::Match;
use crate::models::DeleteReason;
use crate::orphan::{OrphanEngine, OrphanVerdict};
use chrono::{DateTime, Utc};

/// Ordinal of a claim that belongs to a removed instance
pub fn surplus_ordinal(m: &Match) -> Option<u32> {
    let ordinal = m.claim.ordinal()?;
    // Kubernetes defaults an unset replica count to 1
    let replicas = m.workload.replicas.unwrap_or(1).max(0) as u32;
    (ordinal >= replicas).then_some(ordinal)
}

/// Name of the pod instance a surplus claim was mounted by
pub fn instance_name(workload: &str, ordinal: u32) -> String {
    format!("{}-{}", workload, ordinal)
}

/// Evaluate a matched claim for scale-down reclaim.
/// `None` when the claim belongs to a live instance.
pub async fn evaluate(
    engine: &OrphanEngine<'_>,
    m: &Match,
    now: DateTime<Utc>,
) -> Option<OrphanVerdict> {
    let ordinal = surplus_ordinal(m)?;
    let instance = instance_name(&m.workload.name, ordinal);
    let verdict = engine
        .evaluate_subject(
            &m.claim,
            ResourceKind::Pod,
            &instance,
            DeleteReason::ScaledDown,
            now,
        )
        .await;
    Some(verdict)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, SizeField, VolumeClaim, Workload};
    use crate::orphan::OrphanPolicy;
    use crate::testing::StaticAudit;
    use chrono::TimeZone;

    fn matched(claim_name: &str, replicas: Option<i32>) -> Match {
        Match {
            workload: Workload {
                namespace: "default".into(),
                name: "web".into(),
                desired_size: SizeField::from_raw(Some("10Gi")),
                replicas,
            },
            claim: VolumeClaim {
                namespace: "default".into(),
                name: claim_name.into(),
                owner: Some("web".into()),
                capacity: SizeField::from_raw(Some("10Gi")),
                resource_version: None,
                volume: Some("pv-data-web".into()),
            },
        }
    }

    #[test]
    fn test_surplus_ordinal() {
        assert_eq!(surplus_ordinal(&matched("data-web-0", Some(3))), None);
        assert_eq!(surplus_ordinal(&matched("data-web-2", Some(3))), None);
        assert_eq!(surplus_ordinal(&matched("data-web-3", Some(3))), Some(3));
        assert_eq!(surplus_ordinal(&matched("data-web-1", Some(0))), Some(1));
        assert_eq!(surplus_ordinal(&matched("data-web-1", None)), Some(1));
        assert_eq!(surplus_ordinal(&matched("data-web-0", None)), None);
    }

    #[test]
    fn test_claim_without_ordinal_is_never_surplus() {
        assert_eq!(surplus_ordinal(&matched("web-data", Some(0))), None);
    }

    #[tokio::test]
    async fn test_removed_instance_is_reclaimed_after_grace() {
        let t0 = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let audit = StaticAudit::default().with_deletion(ResourceKind::Pod, "default", "web-2", t0);
        let policy = OrphanPolicy::default();
        let engine = OrphanEngine::new(&audit, &policy);

        let verdict = evaluate(&engine, &matched("data-web-2", Some(2)), t0 + chrono::Duration::hours(2))
            .await
            .expect("surplus claim");
        assert_eq!(verdict.record.subject_name, "web-2");
        assert_eq!(verdict.record.subject_kind, "Pod");
        match verdict.action {
            Some(Action::DeleteClaim { reason, .. }) => assert_eq!(reason, DeleteReason::ScaledDown),
            other => panic!("expected delete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_live_instance_is_not_evaluated() {
        let audit = StaticAudit::default();
        let policy = OrphanPolicy::default();
        let engine = OrphanEngine::new(&audit, &policy);

        assert!(evaluate(&engine, &matched("data-web-1", Some(2)), Utc::now())
            .await
            .is_none());
        assert_eq!(audit.calls(), 0);
    }
}
