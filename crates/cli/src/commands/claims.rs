//! Claim listing

use anyhow::Result;
use operator_lib::matcher::{partition, IgnoreReason};
use operator_lib::{SizeField, VolumeClaim, Workload};
use serde::Serialize;
use tabled::Tabled;

use super::ClusterOptions;
use crate::output::{color_status, print_table, OutputFormat};

#[derive(Tabled, Serialize)]
struct ClaimRow {
    #[tabled(rename = "Namespace")]
    namespace: String,
    #[tabled(rename = "Claim")]
    claim: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Owner")]
    owner: String,
    #[tabled(rename = "Current")]
    current: String,
    #[tabled(rename = "Desired")]
    desired: String,
}

fn size_text(size: &SizeField) -> String {
    match size {
        SizeField::Present(q) => q.to_string(),
        SizeField::Missing => "-".to_string(),
        SizeField::Malformed { raw, .. } => format!("invalid ({})", raw),
    }
}

fn row(claim: &VolumeClaim, status: &str, workload: Option<&Workload>) -> ClaimRow {
    ClaimRow {
        namespace: claim.namespace.clone(),
        claim: claim.name.clone(),
        status: status.to_string(),
        owner: claim.owner.clone().unwrap_or_else(|| "-".to_string()),
        current: size_text(&claim.capacity),
        desired: workload
            .map(|w| size_text(&w.desired_size))
            .unwrap_or_else(|| "-".to_string()),
    }
}

/// Classify every claim of one namespace
fn classify(workloads: &[Workload], claims: Vec<VolumeClaim>) -> Vec<ClaimRow> {
    let buckets = partition(workloads, claims);
    let mut rows = Vec::with_capacity(buckets.len());

    for m in &buckets.matches {
        rows.push(row(&m.claim, "matched", Some(&m.workload)));
    }
    for orphan in &buckets.orphaned {
        rows.push(row(&orphan.claim, "orphaned", None));
    }
    for ignored in &buckets.ignored {
        let status = match ignored.reason {
            IgnoreReason::Unmanaged => "ignored",
            IgnoreReason::AmbiguousOwner { .. } => "ambiguous",
        };
        rows.push(row(&ignored.claim, status, None));
    }

    rows.sort_by(|a, b| a.claim.cmp(&b.claim));
    rows
}

/// List claims with their classification
pub async fn list_claims(
    options: &ClusterOptions,
    namespaces: &[String],
    format: OutputFormat,
) -> Result<()> {
    let reconciler = options.reconciler(options.settings(namespaces)).await?;
    let snapshot = reconciler.list().await?;

    let mut rows = Vec::new();
    for ns in snapshot.namespaces {
        rows.extend(classify(&ns.workloads, ns.claims));
    }

    if let OutputFormat::Table = format {
        for row in rows.iter_mut() {
            row.status = color_status(&row.status);
        }
    }
    print_table(&rows, format)
}
