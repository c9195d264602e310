//! Ledger and catalog setup for integration tests

use anyhow::Result;
use melodee_common::db::init_database;
use melodee_ingest::db::ScanLedger;
use melodee_ingest::services::{InboundScanner, ScanStats};
use sqlx::SqlitePool;
use std::path::Path;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// Temporary on-disk catalog database
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for duration of test
pub async fn create_test_catalog() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let pool = init_database(&temp_dir.path().join("melodee.db")).await?;
    Ok((temp_dir, pool))
}

/// Scan `inbound` into a fresh ledger under `ledger_dir`
pub async fn scan_inbound(inbound: &Path, ledger_dir: &Path) -> Result<(ScanLedger, ScanStats)> {
    let ledger = ScanLedger::create(ledger_dir, &ScanLedger::new_scan_id()).await?;
    let stats = InboundScanner::new(2)
        .scan(inbound, &ledger, &CancellationToken::new())
        .await?;
    Ok((ledger, stats))
}

/// Row count of a catalog table
pub async fn count_rows(pool: &SqlitePool, table: &str) -> Result<i64> {
    let query = format!("SELECT COUNT(*) FROM {}", table);
    Ok(sqlx::query_scalar(&query).fetch_one(pool).await?)
}
