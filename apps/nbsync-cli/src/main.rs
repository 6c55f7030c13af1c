//! nbsync - Yandex Cloud to NetBox inventory sync
//!
//! Reads the cloud inventory, reconciles it into NetBox and prints a run
//! summary. Configuration comes from the environment (and `.env` when
//! present); see [`config`] for the variables.

use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use nbsync_connector_rest::{NetBoxClient, YandexCloudClient};
use nbsync_provisioning::{ExecutionMode, RunOptions, RunReport, SyncEngine};

mod config;
mod error;
mod logging;

use config::SyncConfig;
use error::{CliError, CliResult};

/// Synchronise Yandex Cloud inventory into NetBox
#[derive(Parser, Debug)]
#[command(name = "nbsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Plan the run and report decisions without writing to NetBox
    #[arg(long)]
    dry_run: bool,

    /// Keep managed records that no longer exist in the cloud
    #[arg(long)]
    no_cleanup: bool,

    /// Process each entity through every phase before the next one
    #[arg(long)]
    standard: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn run_options(&self) -> RunOptions {
        RunOptions {
            mode: if self.standard {
                ExecutionMode::Standard
            } else {
                ExecutionMode::Batch
            },
            simulate: self.dry_run,
            cleanup: !self.no_cleanup,
            ..RunOptions::default()
        }
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            e.print();
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let config = SyncConfig::from_env()?;
    logging::init_logging(&config.log_filter(), config.log_json);
    info!(config = ?config, "Configuration loaded");

    let source = YandexCloudClient::new(config.yandex_config())?;
    let destination = NetBoxClient::new(config.netbox_config())?;

    let options = cli.run_options();
    info!(
        mode = %options.mode,
        simulate = options.simulate,
        cleanup = options.cleanup,
        "Starting sync"
    );

    let engine = SyncEngine::new(Arc::new(source), Arc::new(destination), options);
    let report = engine.run().await?;

    if cli.json {
        let body = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::Output(e.to_string()))?;
        println!("{body}");
    } else {
        print_summary(&report);
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(CliError::RunFailed {
            failures: report.failures.len(),
        })
    }
}

fn print_summary(report: &RunReport) {
    let heading = if report.simulate {
        "Dry run complete"
    } else {
        "Sync complete"
    };
    println!(
        "{heading} ({} mode, {} ms)",
        report.mode, report.statistics.duration_ms
    );

    for (kind, counts) in &report.statistics.by_kind {
        println!(
            "  {kind:<16} created {:>4}  updated {:>4}  migrated {:>4}  deleted {:>4}  unchanged {:>4}  skipped {:>4}  failed {:>4}",
            counts.created,
            counts.updated,
            counts.migrated,
            counts.deleted,
            counts.unchanged,
            counts.skipped,
            counts.failed,
        );
    }

    let preview = &report.preview;
    println!(
        "Changes: {} create, {} update, {} delete, {} migrate, {} tag",
        preview.create, preview.update, preview.delete, preview.migrate, preview.tag
    );
    if !report.cleanup_ran {
        println!("Orphan cleanup did not run");
    }

    for migration in &report.migrations {
        println!(
            "  migrate {} #{}: '{}' -> '{}'{}",
            migration.kind,
            migration.id,
            migration.old_name,
            migration.new_name,
            if migration.applied { "" } else { " (not applied)" }
        );
    }
    for skipped in &report.skipped {
        warn!(kind = %skipped.kind, subject = %skipped.subject, reason = %skipped.reason, "Skipped");
    }
    for failure in &report.failures {
        println!(
            "  FAILED {} {} {}: {}",
            failure.operation, failure.kind, failure.subject, failure.message
        );
    }
}
