//! melodee-staging: operator review of staged albums and quarantined files
//!
//! ```bash
//! melodee-staging [--db <catalog.db>] list [--status pending_review]
//! melodee-staging approve 12 --notes "tags checked"
//! melodee-staging reject 13 --notes "wrong pressing"
//! melodee-staging promote 12 --library /srv/music
//! melodee-staging quarantine list --unresolved
//! ```
//!
//! Failures print the error code (BAD_REQUEST, NOT_FOUND, CONFLICT, ...) and exit 1.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use melodee_common::config::{load_config, TomlConfig};
use melodee_common::db::init_database;
use melodee_common::logging::init_tracing;
use melodee_ingest::cli::{build_info, EXIT_FATAL};
use melodee_ingest::config::resolve_database;
use melodee_ingest::db::{QuarantineRepository, StagingRepository};
use melodee_ingest::models::{
    Page, QuarantineFilter, QuarantineReason, QuarantineRecord, StagingItem, StagingStatus,
};
use melodee_ingest::services::{PromotionHandler, QuarantineService};
use serde::Serialize;
use sqlx::SqlitePool;
use std::path::PathBuf;
use tracing::{debug, info};

#[derive(Parser, Debug)]
#[command(name = "melodee-staging")]
#[command(about = "Review, promote and clean up staged albums")]
#[command(version)]
struct Args {
    /// Catalog database
    #[arg(long)]
    db: Option<PathBuf>,

    /// Config file (default: ~/.config/melodee/melodee.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List staging items, newest first
    List {
        #[arg(long)]
        status: Option<StagingStatus>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// Show one staging item
    Show { id: i64 },
    /// Review queue counts
    Stats,
    /// Approve a pending item
    Approve {
        id: i64,
        #[arg(long)]
        notes: Option<String>,
        #[arg(long, env = "MELODEE_REVIEWER", default_value = "operator")]
        reviewer: String,
    },
    /// Reject a pending item (notes required)
    Reject {
        id: i64,
        #[arg(long)]
        notes: String,
        #[arg(long, env = "MELODEE_REVIEWER", default_value = "operator")]
        reviewer: String,
    },
    /// Promote an approved item into the library and catalog
    Promote {
        id: i64,
        /// Production library root
        #[arg(long)]
        library: PathBuf,
    },
    /// Delete a rejected item
    Delete {
        id: i64,
        /// Also remove the staged files
        #[arg(long)]
        delete_files: bool,
    },
    /// Quarantined files
    #[command(subcommand)]
    Quarantine(QuarantineCommand),
}

#[derive(Subcommand, Debug)]
enum QuarantineCommand {
    /// List quarantine records, newest first
    List {
        #[arg(long)]
        reason: Option<QuarantineReason>,
        /// Library (scan) id
        #[arg(long)]
        library: Option<String>,
        /// Only records not yet resolved
        #[arg(long)]
        unresolved: bool,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 20)]
        per_page: u32,
    },
    /// Mark a record as handled
    Resolve { id: i64 },
    /// Move the file back to its original location and drop the record
    Requeue {
        id: i64,
        /// Quarantine area root
        #[arg(long)]
        quarantine: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error [{}]: {}", e.code(), e);
            std::process::exit(EXIT_FATAL);
        }
    };

    init_tracing(&config.logging.level);
    debug!("Starting {}", build_info("melodee-staging"));

    if let Err(e) = run(args, &config).await {
        let code = e
            .downcast_ref::<melodee_common::Error>()
            .map(|err| err.code())
            .unwrap_or("INTERNAL_ERROR");
        eprintln!("error [{}]: {:#}", code, e);
        std::process::exit(EXIT_FATAL);
    }
}

async fn run(args: Args, config: &TomlConfig) -> Result<()> {
    let db_path = resolve_database(args.db, config);
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open catalog database {}", db_path.display()))?;

    dispatch(args.command, pool, config, args.json).await
}

async fn dispatch(command: Command, pool: SqlitePool, config: &TomlConfig, json: bool) -> Result<()> {
    let repo = StagingRepository::new(pool.clone());

    match command {
        Command::List {
            status,
            page,
            per_page,
        } => {
            let page = repo.list(status, page, per_page).await?;
            if json {
                return print_json(&page);
            }
            print_staging_page(&page);
        }
        Command::Show { id } => {
            let item = repo.get(id).await?;
            if json {
                return print_json(&item);
            }
            print_staging_item(&item);
        }
        Command::Stats => {
            let stats = repo.stats().await?;
            if json {
                return print_json(&stats);
            }
            println!("pending review: {}", stats.pending_review);
            println!("approved:       {}", stats.approved);
            println!("rejected:       {}", stats.rejected);
            println!("total items:    {}", stats.total_items());
            println!("total tracks:   {}", stats.total_tracks);
            println!("total size:     {}", stats.total_size);
        }
        Command::Approve {
            id,
            notes,
            reviewer,
        } => {
            let item = repo.approve(id, &reviewer, notes.as_deref()).await?;
            println!("Approved #{}: {} - {}", item.id, item.artist_name, item.album_name);
        }
        Command::Reject {
            id,
            notes,
            reviewer,
        } => {
            let item = repo.reject(id, &reviewer, &notes).await?;
            println!("Rejected #{}: {} - {}", item.id, item.artist_name, item.album_name);
        }
        Command::Promote { id, library } => {
            let handler = PromotionHandler::new(pool, library);
            let outcome = handler.promote(id).await?;
            info!(id, album_id = outcome.album_id, "Promotion complete");
            if json {
                return print_json(&PromotedView {
                    artist_id: outcome.artist_id,
                    album_id: outcome.album_id,
                    track_count: outcome.track_count,
                    directory: &outcome.directory,
                });
            }
            println!(
                "Promoted #{} as album {} ({} tracks) -> {}",
                id,
                outcome.album_id,
                outcome.track_count,
                outcome.production_path.display()
            );
        }
        Command::Delete { id, delete_files } => {
            repo.delete(id, delete_files).await?;
            println!("Deleted #{}", id);
        }
        Command::Quarantine(command) => return run_quarantine(command, pool, config, json).await,
    }

    Ok(())
}

async fn run_quarantine(
    command: QuarantineCommand,
    pool: SqlitePool,
    config: &TomlConfig,
    json: bool,
) -> Result<()> {
    let quarantine_root = |cli: Option<PathBuf>| {
        cli.or_else(|| config.process.quarantine_dir.clone())
            .unwrap_or_else(|| config.root_folder().join("quarantine"))
    };

    match command {
        QuarantineCommand::List {
            reason,
            library,
            unresolved,
            page,
            per_page,
        } => {
            let service = QuarantineService::new(QuarantineRepository::new(pool), quarantine_root(None));
            let filter = QuarantineFilter {
                reason,
                library_id: library,
                resolved: unresolved.then_some(false),
            };
            let page = service.list(&filter, page, per_page).await?;
            if json {
                return print_json(&page);
            }
            print_quarantine_page(&page);
        }
        QuarantineCommand::Resolve { id } => {
            let service = QuarantineService::new(QuarantineRepository::new(pool), quarantine_root(None));
            let record = service.resolve(id).await?;
            println!("Resolved #{}: {}", record.id, record.file_path.display());
        }
        QuarantineCommand::Requeue { id, quarantine } => {
            let service =
                QuarantineService::new(QuarantineRepository::new(pool), quarantine_root(quarantine));
            let restored = service.requeue(id).await?;
            println!("Requeued #{} -> {}", id, restored.display());
        }
    }

    Ok(())
}

#[derive(Serialize)]
struct PromotedView<'a> {
    artist_id: i64,
    album_id: i64,
    track_count: usize,
    directory: &'a str,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_staging_page(page: &Page<StagingItem>) {
    println!(
        "{:>5}  {:<15} {:>6}  ARTIST - ALBUM",
        "ID", "STATUS", "TRACKS"
    );
    for item in &page.items {
        println!(
            "{:>5}  {:<15} {:>6}  {} - {}",
            item.id, item.status.as_str(), item.track_count, item.artist_name, item.album_name
        );
    }
    println!(
        "page {}/{} ({} items)",
        page.page,
        page.total_pages().max(1),
        page.total
    );
}

fn print_staging_item(item: &StagingItem) {
    println!("id:             {}", item.id);
    println!("status:         {}", item.status);
    println!("artist:         {}", item.artist_name);
    println!("album:          {}", item.album_name);
    println!("tracks:         {}", item.track_count);
    println!("size:           {}", item.total_size);
    println!("scan:           {}", item.scan_id);
    println!("staging path:   {}", item.staging_path.display());
    println!("sidecar:        {}", item.metadata_file.display());
    println!("processed at:   {}", item.processed_at.to_rfc3339());
    if let Some(reviewer) = &item.reviewed_by {
        println!("reviewed by:    {}", reviewer);
    }
    if let Some(at) = &item.reviewed_at {
        println!("reviewed at:    {}", at.to_rfc3339());
    }
    if let Some(notes) = &item.notes {
        println!("notes:          {}", notes);
    }
}

fn print_quarantine_page(page: &Page<QuarantineRecord>) {
    for record in &page.items {
        let state = if record.resolved { "resolved" } else { "open" };
        println!(
            "{:>5}  {:<22} {:<8} {}",
            record.id,
            record.reason.as_str(),
            state,
            record.file_path.display()
        );
        println!("       {}", record.message);
    }
    println!(
        "page {}/{} ({} records)",
        page.page,
        page.total_pages().max(1),
        page.total
    );
}
