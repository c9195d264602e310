//! process-scan: stage the album groups of a scan ledger
//!
//! ```bash
//! process-scan --scan <ledger.db> --staging <dir> [--dry-run] [--rate-limit N]
//!              [--workers N] [--db <catalog.db>] [--quarantine <dir>]
//! ```
//!
//! Exit codes: 0 completed, 1 fatal (ledger open failure), 2 completed with
//! errors, 130 cancelled.

use anyhow::{Context, Result};
use clap::Parser;
use melodee_common::config::{load_config, TomlConfig};
use melodee_common::db::init_database;
use melodee_common::logging::init_tracing;
use melodee_ingest::cli::{build_info, cancel_on_shutdown, EXIT_FATAL};
use melodee_ingest::config::{ProcessOverrides, ProcessSettings};
use melodee_ingest::db::{QuarantineRepository, ScanLedger, StagingRepository};
use melodee_ingest::services::{
    DirectoryCodeGenerator, ProcessReport, Processor, ProcessorConfig, QuarantineService,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "process-scan")]
#[command(about = "Move the album groups of a scan ledger into the staging tree")]
#[command(version)]
struct Args {
    /// Scan ledger produced by scan-inbound
    #[arg(short, long)]
    scan: PathBuf,

    /// Root of the staging tree
    #[arg(long)]
    staging: Option<PathBuf>,

    /// Plan only: no moves, no sidecars, no database writes
    #[arg(long)]
    dry_run: bool,

    /// Maximum file moves per second (0 = unlimited)
    #[arg(long)]
    rate_limit: Option<u32>,

    /// Albums processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Catalog database for staging items and quarantine records
    #[arg(long)]
    db: Option<PathBuf>,

    /// Quarantine area root
    #[arg(long)]
    quarantine: Option<PathBuf>,

    /// Config file (default: ~/.config/melodee/melodee.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("process-scan: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    };

    init_tracing(&config.logging.level);
    info!("Starting {}", build_info("process-scan"));

    let code = match run(args, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("process-scan: {:#}", e);
            EXIT_FATAL
        }
    };

    std::process::exit(code);
}

async fn run(args: Args, config: &TomlConfig) -> Result<i32> {
    let settings = ProcessSettings::resolve(
        ProcessOverrides {
            staging_dir: args.staging,
            quarantine_dir: args.quarantine,
            database: args.db,
            workers: args.workers,
            rate_limit: args.rate_limit,
        },
        config,
    );

    let ledger = ScanLedger::open(&args.scan)
        .await
        .with_context(|| format!("Failed to open scan ledger {}", args.scan.display()))?;
    info!(
        scan_id = ledger.scan_id(),
        staging = %settings.staging_dir.display(),
        dry_run = args.dry_run,
        "Processing scan"
    );

    let processor_config = ProcessorConfig {
        staging_root: settings.staging_dir.clone(),
        workers: settings.workers,
        rate_limit: settings.rate_limit,
        dry_run: args.dry_run,
    };

    // Dry runs never open the catalog, so nothing is persisted
    let catalog_path = settings.database.as_ref().filter(|_| !args.dry_run);
    let mut processor = match catalog_path {
        Some(db_path) => {
            let pool = init_database(db_path)
                .await
                .with_context(|| format!("Failed to open catalog database {}", db_path.display()))?;
            let codes = DirectoryCodeGenerator::with_pool(pool.clone())
                .await
                .context("Failed to load artist directory codes")?;
            let quarantine =
                QuarantineService::new(QuarantineRepository::new(pool.clone()), &settings.quarantine_dir);

            Processor::new(processor_config, codes)
                .with_staging_repository(StagingRepository::new(pool))
                .with_quarantine(quarantine)
        }
        None => {
            if settings.database.is_none() {
                warn!("No catalog database configured: staging items will not be persisted");
            }
            Processor::new(processor_config, DirectoryCodeGenerator::in_memory())
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    let report = processor
        .process_ledger(&ledger, &cancel)
        .await
        .context("Processing failed")?;
    ledger.close().await;

    print_report(&report);

    let outcome = report.outcome();
    info!(scan_id = %report.scan_id, outcome = ?outcome, "Run finished");
    Ok(outcome.exit_code())
}

fn print_report(report: &ProcessReport) {
    let mode = if report.dry_run { " (dry run)" } else { "" };
    println!("Processed scan {}{}", report.scan_id, mode);
    println!("  albums staged:       {}", report.albums_staged);
    println!("  albums with errors:  {}", report.albums_with_errors);
    println!("  files moved:         {}", report.files_moved);
    println!("  files failed:        {}", report.files_failed);
    println!("  files quarantined:   {}", report.files_quarantined);
    println!("  elapsed:             {:.1}s", report.elapsed.as_secs_f64());

    for album in report.albums.iter().filter(|a| !a.is_valid()) {
        println!();
        println!("  {} - {} ({})", album.artist, album.album, album.group_id);
        for err in &album.errors {
            println!("    {}", err);
        }
    }

    if report.cancelled {
        println!();
        println!("CANCELLED: remaining albums were left in the inbound folder");
    }
}
