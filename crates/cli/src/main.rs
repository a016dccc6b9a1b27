//! PVC operator CLI
//!
//! A command-line tool for inspecting what the PVC operator would do,
//! listing claims with their classification, comparing quantities and
//! running a reconciliation pass by hand.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use commands::{claims, plan, quantity, run, ClusterOptions};
use operator_lib::AuditBackend;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PVC operator CLI
#[derive(Parser)]
#[command(name = "pvcctl")]
#[command(author, version, about = "CLI for the PVC operator", long_about = None)]
pub struct Cli {
    /// Path to kubeconfig file (uses default if not specified)
    #[arg(long, env = "KUBECONFIG", global = true)]
    pub kubeconfig: Option<String>,

    /// Annotation prefix used on workloads and claims
    #[arg(long, env = "ANNOTATION_PREFIX", global = true)]
    pub annotation_prefix: Option<String>,

    /// Minutes an orphaned claim is kept before deletion
    #[arg(long, env = "GRACE_PERIOD_MINUTES", global = true)]
    pub grace_period_minutes: Option<u64>,

    /// Where orphan deletion times come from: cloudtrail or events
    #[arg(long, env = "AUDIT_BACKEND", global = true, default_value_t = AuditBackend::CloudTrail)]
    pub audit_backend: AuditBackend,

    /// Output format
    #[arg(long, short, global = true)]
    pub format: Option<output::OutputFormat>,

    /// Enable verbose output
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Default)]
pub struct NamespaceArgs {
    /// Namespace to include; repeat for several (all namespaces if omitted)
    #[arg(long = "namespace", short = 'n')]
    pub namespaces: Vec<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the actions a pass would take, without applying them
    Plan {
        #[command(flatten)]
        scope: NamespaceArgs,

        /// Include scale-down reclaim in the plan
        #[arg(long)]
        reclaim_scaled_down: bool,
    },

    /// List claims with their ownership classification
    Claims {
        #[command(flatten)]
        scope: NamespaceArgs,
    },

    /// Storage quantity utilities
    #[command(subcommand)]
    Quantity(QuantityCommands),

    /// Run one reconciliation pass
    Run {
        #[command(flatten)]
        scope: NamespaceArgs,

        /// Report actions without applying them
        #[arg(long)]
        dry_run: bool,

        /// Delete claims of instances removed by a scale-down
        #[arg(long)]
        reclaim_scaled_down: bool,
    },
}

#[derive(Subcommand)]
pub enum QuantityCommands {
    /// Parse and compare two quantities
    Compare {
        /// First quantity (e.g. 500Gi)
        a: String,
        /// Second quantity (e.g. 512000Mi)
        b: String,
    },
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{level},kube=warn,hyper=warn,tower=warn"))
        }))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let file_config = config::Config::load()?;
    let format = cli
        .format
        .or_else(|| file_config.format())
        .unwrap_or_default();
    let options = ClusterOptions {
        kubeconfig: cli.kubeconfig.clone(),
        annotation_prefix: cli
            .annotation_prefix
            .clone()
            .or_else(|| file_config.annotation_prefix.clone()),
        grace_period_minutes: cli
            .grace_period_minutes
            .or(file_config.grace_period_minutes),
        default_namespaces: file_config.default_namespaces.clone(),
        audit_backend: cli.audit_backend,
    };

    match cli.command {
        Commands::Plan {
            scope,
            reclaim_scaled_down,
        } => {
            plan::show_plan(&options, &scope.namespaces, reclaim_scaled_down, format).await?;
        }
        Commands::Claims { scope } => {
            claims::list_claims(&options, &scope.namespaces, format).await?;
        }
        Commands::Quantity(QuantityCommands::Compare { a, b }) => {
            quantity::compare(&a, &b, format)?;
        }
        Commands::Run {
            scope,
            dry_run,
            reclaim_scaled_down,
        } => {
            run::run_pass(&options, &scope.namespaces, dry_run, reclaim_scaled_down, format)
                .await?;
        }
    }

    Ok(())
}
