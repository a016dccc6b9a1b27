//! Plan command

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use operator_lib::orphan::OrphanRecord;
use operator_lib::Action;
use serde::Serialize;
use tabled::Tabled;

use super::ClusterOptions;
use crate::output::{color_status, print_info, print_json, print_table, OutputFormat};

/// Row for the actions table
#[derive(Tabled, Serialize)]
pub struct ActionRow {
    #[tabled(rename = "Action")]
    pub action: String,
    #[tabled(rename = "Namespace")]
    pub namespace: String,
    #[tabled(rename = "Claim")]
    pub claim: String,
    #[tabled(rename = "Detail")]
    pub detail: String,
    #[tabled(rename = "Outcome")]
    pub outcome: String,
}

impl ActionRow {
    pub fn new(action: &Action, outcome: impl Into<String>) -> Self {
        let (kind, detail) = match action {
            Action::ResizePatch { new_size, .. } => ("resize", format!("grow to {}", new_size)),
            Action::DeleteClaim { reason, .. } => ("delete", reason.to_string()),
        };
        let claim = action.claim();
        Self {
            action: kind.to_string(),
            namespace: claim.namespace.clone(),
            claim: claim.name.clone(),
            detail,
            outcome: outcome.into(),
        }
    }
}

/// Row for the orphan table
#[derive(Tabled)]
pub struct OrphanRow {
    #[tabled(rename = "Claim")]
    claim: String,
    #[tabled(rename = "Deleted Resource")]
    subject: String,
    #[tabled(rename = "Orphaned Since")]
    since: String,
    #[tabled(rename = "Elapsed")]
    elapsed: String,
}

impl From<&OrphanRecord> for OrphanRow {
    fn from(record: &OrphanRecord) -> Self {
        let since = match &record.fallback {
            Some(_) => format!("{} (fallback)", record.orphaned_since.format("%Y-%m-%d %H:%M:%S")),
            None => record.orphaned_since.format("%Y-%m-%d %H:%M:%S").to_string(),
        };
        Self {
            claim: record.claim.to_string(),
            subject: format!("{}/{}", record.subject_kind, record.subject_name),
            since,
            elapsed: format_elapsed(record.elapsed_secs),
        }
    }
}

pub fn format_elapsed(secs: i64) -> String {
    let (hours, minutes) = (secs / 3600, (secs % 3600) / 60);
    if hours > 0 {
        format!("{}h{}m", hours, minutes)
    } else {
        format!("{}m", minutes)
    }
}

/// Print orphan evaluations as a table
pub fn print_orphans(records: &[OrphanRecord]) {
    if records.is_empty() {
        return;
    }
    let rows: Vec<OrphanRow> = records.iter().map(OrphanRow::from).collect();
    println!();
    println!("{}", "Orphaned Claims".bold());
    println!("{}", tabled::Table::new(rows).with(tabled::settings::Style::rounded()));
}

/// Show what a pass would do
pub async fn show_plan(
    options: &ClusterOptions,
    namespaces: &[String],
    reclaim_scaled_down: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut settings = options.settings(namespaces);
    settings.reclaim_scaled_down = reclaim_scaled_down;
    let reconciler = options.reconciler(settings).await?;

    let plan = reconciler.plan_at(Utc::now()).await?;

    match format {
        OutputFormat::Json => print_json(&plan)?,
        OutputFormat::Table => {
            let rows: Vec<ActionRow> = plan
                .actions
                .iter()
                .map(|a| ActionRow::new(a, color_status("planned")))
                .collect();
            print_table(&rows, format)?;
            print_orphans(&plan.orphans);
            println!();
            print_info(&format!(
                "{} actions, {} skipped, {} ignored, {} audit fallbacks",
                plan.actions.len(),
                plan.skipped,
                plan.ignored,
                plan.audit_fallbacks
            ));
        }
    }
    Ok(())
}
