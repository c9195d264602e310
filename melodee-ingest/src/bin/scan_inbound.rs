//! scan-inbound: walk an inbound folder into a new scan ledger
//!
//! ```bash
//! scan-inbound --path /srv/inbound [--output <dir>] [--workers N] [--config <toml>]
//! ```
//!
//! Exit codes: 0 done, 1 fatal (missing path, ledger failure), 130 cancelled.

use anyhow::{Context, Result};
use clap::Parser;
use melodee_common::config::{load_config, TomlConfig};
use melodee_common::logging::init_tracing;
use melodee_ingest::cli::{build_info, cancel_on_shutdown, EXIT_FATAL};
use melodee_ingest::config::ScanSettings;
use melodee_ingest::db::{remove_expired_ledgers, ScanLedger};
use melodee_ingest::models::AlbumGroup;
use melodee_ingest::services::{group_ledger, FileScanner, InboundScanner, ScanStats};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Number of album groups listed in the summary
const TOP_GROUPS: usize = 10;

#[derive(Parser, Debug)]
#[command(name = "scan-inbound")]
#[command(about = "Scan an inbound folder of audio files into a scan ledger")]
#[command(version)]
struct Args {
    /// Inbound directory to scan
    #[arg(short, long)]
    path: PathBuf,

    /// Directory receiving the ledger database
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Concurrent metadata extraction workers
    #[arg(short, long)]
    workers: Option<usize>,

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
            eprintln!("scan-inbound: {}", e);
            std::process::exit(EXIT_FATAL);
        }
    };

    init_tracing(&config.logging.level);
    info!("Starting {}", build_info("scan-inbound"));

    let code = match run(args, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("scan-inbound: {:#}", e);
            EXIT_FATAL
        }
    };

    std::process::exit(code);
}

async fn run(args: Args, config: &TomlConfig) -> Result<i32> {
    let settings = ScanSettings::resolve(args.output, args.workers, config);

    FileScanner::check_root(&args.path)
        .with_context(|| format!("Cannot scan {}", args.path.display()))?;

    let scan_id = ScanLedger::new_scan_id();
    let ledger = ScanLedger::create(&settings.output_dir, &scan_id)
        .await
        .with_context(|| format!("Failed to create ledger in {}", settings.output_dir.display()))?;

    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    let scanner = InboundScanner::new(settings.workers);
    let stats = scanner
        .scan(&args.path, &ledger, &cancel)
        .await
        .context("Scan failed")?;

    let groups = group_ledger(&ledger).await.context("Album grouping failed")?;

    print_summary(&ledger, &stats, &groups);

    match remove_expired_ledgers(&settings.output_dir, settings.retention()) {
        Ok(removed) if !removed.is_empty() => {
            info!(removed = removed.len(), retention_days = settings.retention_days, "Expired ledgers removed")
        }
        Ok(_) => {}
        Err(e) => warn!(error = %e, "Ledger retention cleanup failed"),
    }

    ledger.close().await;

    Ok(if stats.cancelled { 130 } else { 0 })
}

fn print_summary(ledger: &ScanLedger, stats: &ScanStats, groups: &[AlbumGroup]) {
    println!("Scan {}", ledger.scan_id());
    if let Some(path) = ledger.path() {
        println!("  ledger:        {}", path.display());
    }
    println!("  files:         {}", stats.total_files);
    println!("  valid:         {}", stats.valid_files);
    println!("  invalid:       {}", stats.invalid_files);
    println!("  album groups:  {}", groups.len());
    println!(
        "  elapsed:       {:.1}s ({:.1} files/s)",
        stats.elapsed.as_secs_f64(),
        stats.files_per_second
    );
    if stats.cancelled {
        println!("  CANCELLED before all files were scanned");
    }

    if groups.is_empty() {
        return;
    }

    let mut ranked: Vec<&AlbumGroup> = groups.iter().collect();
    ranked.sort_by(|a, b| {
        b.track_count()
            .cmp(&a.track_count())
            .then_with(|| a.group_id.cmp(&b.group_id))
    });

    println!();
    println!("Top album groups:");
    for group in ranked.into_iter().take(TOP_GROUPS) {
        let year = if group.year > 0 {
            group.year.to_string()
        } else {
            "----".to_string()
        };
        println!(
            "  {:>3} tracks  {}  {} - {}",
            group.track_count(),
            year,
            group.artist,
            group.album
        );
    }
}
