//! End-to-end reconciliation passes against the in-memory doubles

use chrono::{DateTime, Duration, TimeZone, Utc};
use operator_lib::driver::Outcome;
use operator_lib::testing::{claim, workload, FakeCluster, Mutation, StaticAudit};
use operator_lib::{ReconcileError, ReconcileSettings, Reconciler, ResourceKind};
use std::sync::Arc;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn mixed_cluster() -> FakeCluster {
    FakeCluster::new()
        .with_workload(workload("default", "web", Some("500Gi"), Some(2)))
        .with_claim(claim("default", "data-web-0", Some("web"), Some("100Gi")))
        .with_claim(claim("default", "data-web-1", Some("web"), Some("500Gi")))
        .with_claim(claim("default", "data-old-0", Some("old"), Some("10Gi")))
        .with_claim(claim("default", "scratch", None, Some("1Gi")))
}

fn old_deleted_at(at: DateTime<Utc>) -> StaticAudit {
    StaticAudit::default().with_deletion(ResourceKind::StatefulSet, "default", "old", at)
}

#[tokio::test]
async fn test_full_pass_resizes_and_deletes() {
    let cluster = Arc::new(mixed_cluster());
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(old_deleted_at(t0())),
        ReconcileSettings::default(),
    );

    let report = r.run_at(t0() + Duration::minutes(90)).await.unwrap();

    assert_eq!(report.summary.resized, 1);
    assert_eq!(report.summary.deleted, 1);
    assert_eq!(report.summary.ignored, 1);
    assert_eq!(report.summary.errors, 0);
    assert!(cluster.claim("default", "data-old-0").is_none());
    assert!(cluster.claim("default", "scratch").is_some());
    assert_eq!(
        cluster
            .claim("default", "data-web-0")
            .unwrap()
            .capacity
            .quantity()
            .unwrap()
            .as_str(),
        "500Gi"
    );
}

#[tokio::test]
async fn test_orphan_within_grace_is_kept() {
    let cluster = Arc::new(mixed_cluster());
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(old_deleted_at(t0())),
        ReconcileSettings::default(),
    );

    let report = r.run_at(t0() + Duration::minutes(30)).await.unwrap();

    assert_eq!(report.summary.deleted, 0);
    assert!(cluster.claim("default", "data-old-0").is_some());
    assert_eq!(report.orphans.len(), 1);
    assert_eq!(report.orphans[0].elapsed_secs, 30 * 60);
}

#[tokio::test]
async fn test_second_pass_is_idempotent() {
    let cluster = Arc::new(mixed_cluster());
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(old_deleted_at(t0())),
        ReconcileSettings::default(),
    );
    let now = t0() + Duration::hours(2);

    r.run_at(now).await.unwrap();
    let mutations_after_first = cluster.mutations().len();

    let second = r.run_at(now).await.unwrap();
    assert!(second.actions.is_empty());
    assert!(second.orphans.is_empty());
    assert_eq!(cluster.mutations().len(), mutations_after_first);
}

#[tokio::test]
async fn test_listing_failure_applies_nothing() {
    let cluster = Arc::new(
        mixed_cluster()
            .with_workload(workload("zeta", "db", Some("1Ti"), Some(1)))
            .with_claim(claim("zeta", "data-db-0", Some("db"), Some("1Gi")))
            .failing_listing("zeta"),
    );
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(old_deleted_at(t0())),
        ReconcileSettings::default(),
    );

    let err = r.run_at(t0() + Duration::hours(2)).await.unwrap_err();

    assert!(matches!(err, ReconcileError::Listing { .. }));
    assert!(cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_conflict_is_skipped_not_retried() {
    let cluster = Arc::new(mixed_cluster().conflicting("data-web-0"));
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(StaticAudit::default()),
        ReconcileSettings::default(),
    );

    let report = r.run_at(t0()).await.unwrap();

    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.errors, 0);
    assert!(matches!(report.actions[0].outcome, Outcome::Skipped(_)));
    assert!(cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_audit_error_never_deletes() {
    let cluster = Arc::new(mixed_cluster());
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(StaticAudit::default().failing("throttled")),
        ReconcileSettings::default(),
    );

    let report = r.run_at(t0() + Duration::days(3)).await.unwrap();

    assert_eq!(report.summary.deleted, 0);
    assert_eq!(report.summary.audit_fallbacks, 1);
    assert_eq!(report.summary.resized, 1);
    assert!(cluster.claim("default", "data-old-0").is_some());
}

#[tokio::test]
async fn test_dry_run_reports_without_mutating() {
    let cluster = Arc::new(mixed_cluster());
    let settings = ReconcileSettings {
        dry_run: true,
        ..Default::default()
    };
    let r = Reconciler::new(cluster.clone(), Arc::new(old_deleted_at(t0())), settings);

    let report = r.run_at(t0() + Duration::hours(2)).await.unwrap();

    assert!(report.summary.dry_run);
    assert_eq!(report.summary.planned, 2);
    assert_eq!(report.summary.resized, 0);
    assert!(report.actions.iter().all(|a| a.outcome == Outcome::Planned));
    assert!(cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_scale_down_reclaim_deletes_instead_of_resizing() {
    let cluster = Arc::new(
        FakeCluster::new()
            .with_workload(workload("default", "web", Some("20Gi"), Some(1)))
            .with_claim(claim("default", "data-web-0", Some("web"), Some("10Gi")))
            .with_claim(claim("default", "data-web-1", Some("web"), Some("10Gi"))),
    );
    let audit = StaticAudit::default().with_deletion(ResourceKind::Pod, "default", "web-1", t0());
    let settings = ReconcileSettings {
        reclaim_scaled_down: true,
        ..Default::default()
    };
    let r = Reconciler::new(cluster.clone(), Arc::new(audit), settings);

    r.run_at(t0() + Duration::hours(2)).await.unwrap();

    assert_eq!(
        cluster.mutations(),
        vec![
            Mutation::Patched {
                claim: "default/data-web-0".into(),
                size: "20Gi".into()
            },
            Mutation::Deleted {
                claim: "default/data-web-1".into()
            },
        ]
    );
}

#[tokio::test]
async fn test_scale_down_within_grace_is_still_resized() {
    let cluster = Arc::new(
        FakeCluster::new()
            .with_workload(workload("default", "web", Some("20Gi"), Some(1)))
            .with_claim(claim("default", "data-web-1", Some("web"), Some("10Gi"))),
    );
    let audit = StaticAudit::default().with_deletion(ResourceKind::Pod, "default", "web-1", t0());
    let settings = ReconcileSettings {
        reclaim_scaled_down: true,
        ..Default::default()
    };
    let r = Reconciler::new(cluster.clone(), Arc::new(audit), settings);

    let report = r.run_at(t0() + Duration::minutes(10)).await.unwrap();

    assert_eq!(report.summary.deleted, 0);
    assert_eq!(report.summary.resized, 1);
}

#[tokio::test]
async fn test_reclaim_disabled_leaves_surplus_claims() {
    let cluster = Arc::new(
        FakeCluster::new()
            .with_workload(workload("default", "web", Some("10Gi"), Some(0)))
            .with_claim(claim("default", "data-web-0", Some("web"), Some("10Gi"))),
    );
    let audit = Arc::new(StaticAudit::default().with_deletion(ResourceKind::Pod, "default", "web-0", t0()));
    let r = Reconciler::new(cluster.clone(), audit.clone(), ReconcileSettings::default());

    let report = r.run_at(t0() + Duration::days(1)).await.unwrap();

    assert!(report.actions.is_empty());
    assert_eq!(audit.calls(), 0);
}

#[tokio::test]
async fn test_namespace_scope_limits_listing() {
    let cluster = Arc::new(
        mixed_cluster()
            .with_workload(workload("other", "db", Some("1Ti"), Some(1)))
            .with_claim(claim("other", "data-db-0", Some("db"), Some("1Gi")))
            .failing_listing("*"),
    );
    let settings = ReconcileSettings {
        namespaces: vec!["other".into()],
        ..Default::default()
    };
    let r = Reconciler::new(cluster.clone(), Arc::new(StaticAudit::default()), settings);

    let report = r.run_at(t0()).await.unwrap();

    assert_eq!(report.summary.resized, 1);
    assert_eq!(
        cluster.mutations(),
        vec![Mutation::Patched {
            claim: "other/data-db-0".into(),
            size: "1Ti".into()
        }]
    );
}

#[test]
fn test_plan_without_runtime_macro() {
    let cluster = Arc::new(mixed_cluster());
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(old_deleted_at(t0())),
        ReconcileSettings::default(),
    );

    let plan = tokio_test::block_on(r.plan_at(t0() + Duration::hours(2))).unwrap();

    assert_eq!(plan.actions.len(), 2);
    assert_eq!(plan.ignored, 1);
    assert!(cluster.mutations().is_empty());
}

#[tokio::test]
async fn test_delete_of_vanished_claim_is_skipped() {
    let cluster = Arc::new(mixed_cluster().vanishing("data-old-0"));
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(old_deleted_at(t0())),
        ReconcileSettings::default(),
    );

    let report = r.run_at(t0() + Duration::minutes(90)).await.unwrap();

    let delete = report
        .actions
        .iter()
        .find(|a| a.action.is_delete())
        .expect("delete planned");
    match &delete.outcome {
        Outcome::Skipped(detail) => assert!(detail.contains("no longer exists"), "{detail}"),
        other => panic!("expected skip, got {:?}", other),
    }
    assert_eq!(report.summary.deleted, 0);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.errors, 0);
    assert_eq!(report.summary.resized, 1);
}

#[tokio::test]
async fn test_delete_conflict_keeps_claim() {
    let cluster = Arc::new(mixed_cluster().conflicting("data-old-0"));
    let r = Reconciler::new(
        cluster.clone(),
        Arc::new(old_deleted_at(t0())),
        ReconcileSettings::default(),
    );

    let report = r.run_at(t0() + Duration::minutes(90)).await.unwrap();

    let delete = report
        .actions
        .iter()
        .find(|a| a.action.is_delete())
        .expect("delete planned");
    assert!(matches!(delete.outcome, Outcome::Skipped(_)));
    assert_eq!(report.summary.deleted, 0);
    assert_eq!(report.summary.skipped, 1);
    assert_eq!(report.summary.errors, 0);
    assert!(cluster.claim("default", "data-old-0").is_some());
}

#[tokio::test]
async fn test_audit_window_uses_pass_clock() {
    let cluster = Arc::new(mixed_cluster());
    let audit = Arc::new(old_deleted_at(t0()));
    let r = Reconciler::new(cluster, audit.clone(), ReconcileSettings::default());

    let now = t0() + Duration::minutes(90);
    r.plan_at(now).await.unwrap();

    assert_eq!(audit.last_window_start(), Some(now - Duration::hours(24)));
    assert_eq!(audit.volumes_seen(), vec![Some("pv-data-old-0".to_string())]);
}
