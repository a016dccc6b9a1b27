//! Run command

use anyhow::Result;
use operator_lib::driver::Outcome;

use super::plan::{print_orphans, ActionRow};
use super::ClusterOptions;
use crate::output::{
    color_status, print_json, print_success, print_table, print_warning, OutputFormat,
};

fn outcome_label(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Applied => color_status("applied"),
        Outcome::Planned => color_status("planned"),
        Outcome::Skipped(reason) => format!("{}: {}", color_status("skipped"), reason),
        Outcome::Failed(reason) => format!("{}: {}", color_status("failed"), reason),
    }
}

/// Run one reconciliation pass
pub async fn run_pass(
    options: &ClusterOptions,
    namespaces: &[String],
    dry_run: bool,
    reclaim_scaled_down: bool,
    format: OutputFormat,
) -> Result<()> {
    let mut settings = options.settings(namespaces);
    settings.dry_run = dry_run;
    settings.reclaim_scaled_down = reclaim_scaled_down;
    let reconciler = options.reconciler(settings).await?;

    let report = reconciler.run().await?;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Table => {
            let rows: Vec<ActionRow> = report
                .actions
                .iter()
                .map(|a| ActionRow::new(&a.action, outcome_label(&a.outcome)))
                .collect();
            print_table(&rows, format)?;
            print_orphans(&report.orphans);
            println!();

            let s = &report.summary;
            let line = format!(
                "resized {}, deleted {}, skipped {}, errors {}, ignored {}, audit fallbacks {}",
                s.resized, s.deleted, s.skipped, s.errors, s.ignored, s.audit_fallbacks
            );
            if s.dry_run {
                print_warning(&format!("Dry run: {} actions planned, nothing applied", s.planned));
            } else if s.errors > 0 {
                print_warning(&line);
            } else {
                print_success(&line);
            }
        }
    }
    Ok(())
}
