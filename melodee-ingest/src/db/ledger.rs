//! Scan ledger
//!
//! One embedded SQLite database per scan run holding every discovered file.
//! The handle is created explicitly, passed by reference and closed when the
//! run ends. The pool has a single connection: the ledger has one writer.

use super::{now_rfc3339, parse_optional_timestamp, parse_timestamp};
use crate::models::{AlbumGroup, AudioTags, ExtractionFailure, ScannedFile};
use crate::services::album_grouping::{build_album_groups, GroupAssignment};
use chrono::{DateTime, Utc};
use melodee_common::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

const SCANNED_FILE_COLUMNS: &str = r#"
    id, file_path, file_size, content_hash, modified_time,
    artist, album_artist, album, title, track_number, disc_number, year, genre,
    duration, bitrate, sample_rate,
    is_valid, error_kind, error_message, album_group_hash, album_group_id, created_at
"#;

/// Summary row describing the run that produced a ledger
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRun {
    pub scan_id: String,
    pub root_path: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_files: i64,
    pub valid_files: i64,
    pub invalid_files: i64,
    pub cancelled: bool,
}

/// Handle to one scan run's ledger database
pub struct ScanLedger {
    pool: SqlitePool,
    path: Option<PathBuf>,
    scan_id: String,
}

impl ScanLedger {
    /// Fresh scan id derived from the current time
    pub fn new_scan_id() -> String {
        format!("scan_{}", Utc::now().format("%Y%m%d_%H%M%S_%3f"))
    }

    /// Ledger file location for a scan id
    pub fn ledger_path(dir: &Path, scan_id: &str) -> PathBuf {
        dir.join(format!("{}.db", scan_id))
    }

    /// Create a new ledger file in `dir`
    ///
    /// Refuses to reuse an existing file: every run gets its own ledger.
    pub async fn create(dir: &Path, scan_id: &str) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = Self::ledger_path(dir, scan_id);
        if path.exists() {
            return Err(Error::Conflict(format!(
                "Ledger already exists: {}",
                path.display()
            )));
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true);
        let pool = single_writer_pool(options).await?;

        let ledger = Self {
            pool,
            path: Some(path),
            scan_id: scan_id.to_string(),
        };
        ledger.init_schema().await?;

        info!(scan_id, path = ?ledger.path, "Created scan ledger");
        Ok(ledger)
    }

    /// Open an existing ledger file
    pub async fn open(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(format!("Ledger not found: {}", path.display())));
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false);
        let pool = single_writer_pool(options).await?;

        let fallback_id = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "scan".to_string());

        let mut ledger = Self {
            pool,
            path: Some(path.to_path_buf()),
            scan_id: fallback_id,
        };
        ledger.init_schema().await?;

        if let Some(run) = ledger.scan_run().await? {
            ledger.scan_id = run.scan_id;
        }

        debug!(scan_id = %ledger.scan_id, path = %path.display(), "Opened scan ledger");
        Ok(ledger)
    }

    /// In-memory ledger (tests, dry runs over synthetic input)
    pub async fn open_in_memory(scan_id: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = single_writer_pool(options).await?;

        let ledger = Self {
            pool,
            path: None,
            scan_id: scan_id.to_string(),
        };
        ledger.init_schema().await?;
        Ok(ledger)
    }

    pub fn scan_id(&self) -> &str {
        &self.scan_id
    }

    /// Ledger file path (`None` for in-memory ledgers)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Flush and release the database
    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scanned_files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                file_path TEXT NOT NULL UNIQUE,
                file_size INTEGER NOT NULL,
                content_hash TEXT NOT NULL,
                modified_time TEXT NOT NULL,
                artist TEXT,
                album_artist TEXT,
                album TEXT,
                title TEXT,
                track_number INTEGER,
                disc_number INTEGER,
                year INTEGER,
                genre TEXT,
                duration REAL,
                bitrate INTEGER,
                sample_rate INTEGER,
                is_valid INTEGER NOT NULL,
                error_kind TEXT,
                error_message TEXT,
                album_group_hash TEXT,
                album_group_id TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_scanned_files_group ON scanned_files(album_group_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS scan_runs (
                scan_id TEXT PRIMARY KEY,
                root_path TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT,
                total_files INTEGER NOT NULL DEFAULT 0,
                valid_files INTEGER NOT NULL DEFAULT 0,
                invalid_files INTEGER NOT NULL DEFAULT 0,
                cancelled INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record the start of the run that fills this ledger
    pub async fn record_run_start(&self, root_path: &Path) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO scan_runs (scan_id, root_path, started_at)
            VALUES (?, ?, ?)
            ON CONFLICT(scan_id) DO UPDATE SET root_path = excluded.root_path
            "#,
        )
        .bind(&self.scan_id)
        .bind(root_path.to_string_lossy().to_string())
        .bind(now_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Record final counts for the run
    pub async fn record_run_finish(
        &self,
        total_files: usize,
        valid_files: usize,
        invalid_files: usize,
        cancelled: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE scan_runs
            SET finished_at = ?, total_files = ?, valid_files = ?, invalid_files = ?, cancelled = ?
            WHERE scan_id = ?
            "#,
        )
        .bind(now_rfc3339())
        .bind(total_files as i64)
        .bind(valid_files as i64)
        .bind(invalid_files as i64)
        .bind(cancelled)
        .bind(&self.scan_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Run summary, if the ledger was produced by the scanner
    pub async fn scan_run(&self) -> Result<Option<ScanRun>> {
        let row = sqlx::query(
            r#"
            SELECT scan_id, root_path, started_at, finished_at,
                   total_files, valid_files, invalid_files, cancelled
            FROM scan_runs
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let root_path: String = row.try_get("root_path")?;
                let started_at: String = row.try_get("started_at")?;
                Ok(Some(ScanRun {
                    scan_id: row.try_get("scan_id")?,
                    root_path: PathBuf::from(root_path),
                    started_at: parse_timestamp(&started_at)?,
                    finished_at: parse_optional_timestamp(row.try_get("finished_at")?)?,
                    total_files: row.try_get("total_files")?,
                    valid_files: row.try_get("valid_files")?,
                    invalid_files: row.try_get("invalid_files")?,
                    cancelled: row.try_get("cancelled")?,
                }))
            }
            None => Ok(None),
        }
    }

    /// Insert one scanned file, returning its row id
    pub async fn insert_file(&self, file: &ScannedFile) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO scanned_files (
                file_path, file_size, content_hash, modified_time,
                artist, album_artist, album, title, track_number, disc_number, year, genre,
                duration, bitrate, sample_rate,
                is_valid, error_kind, error_message, album_group_hash, album_group_id, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.file_path.to_string_lossy().to_string())
        .bind(file.file_size as i64)
        .bind(&file.content_hash)
        .bind(file.modified_time.to_rfc3339())
        .bind(&file.tags.artist)
        .bind(&file.tags.album_artist)
        .bind(&file.tags.album)
        .bind(&file.tags.title)
        .bind(file.tags.track_number)
        .bind(file.tags.disc_number)
        .bind(file.tags.year)
        .bind(&file.tags.genre)
        .bind(file.tags.duration)
        .bind(file.tags.bitrate)
        .bind(file.tags.sample_rate)
        .bind(file.is_valid)
        .bind(file.error_kind.map(|k| k.as_str()))
        .bind(&file.error_message)
        .bind(&file.album_group_hash)
        .bind(&file.album_group_id)
        .bind(file.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// All rows ordered by path
    pub async fn load_all(&self) -> Result<Vec<ScannedFile>> {
        self.load_where("1 = 1").await
    }

    pub async fn load_valid(&self) -> Result<Vec<ScannedFile>> {
        self.load_where("is_valid = 1").await
    }

    pub async fn load_invalid(&self) -> Result<Vec<ScannedFile>> {
        self.load_where("is_valid = 0").await
    }

    async fn load_where(&self, predicate: &str) -> Result<Vec<ScannedFile>> {
        let sql = format!(
            "SELECT {} FROM scanned_files WHERE {} ORDER BY file_path",
            SCANNED_FILE_COLUMNS, predicate
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(scanned_file_from_row).collect()
    }

    pub async fn count_files(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scanned_files")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Attach group identifiers to a single row
    pub async fn assign_group(&self, file_id: i64, group_hash: &str, group_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE scanned_files SET album_group_hash = ?, album_group_id = ? WHERE id = ?",
        )
        .bind(group_hash)
        .bind(group_id)
        .bind(file_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Ledger row {}", file_id)));
        }
        Ok(())
    }

    /// Attach group identifiers in one transaction
    pub async fn assign_groups(&self, assignments: &[GroupAssignment]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for assignment in assignments {
            sqlx::query(
                "UPDATE scanned_files SET album_group_hash = ?, album_group_id = ? WHERE id = ?",
            )
            .bind(&assignment.group_hash)
            .bind(&assignment.group_id)
            .bind(assignment.file_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!(
            scan_id = %self.scan_id,
            rows = assignments.len(),
            "Assigned album groups"
        );
        Ok(())
    }

    /// Album groups built from rows that carry a group id
    pub async fn album_groups(&self) -> Result<Vec<AlbumGroup>> {
        let files = self
            .load_where("is_valid = 1 AND album_group_id IS NOT NULL")
            .await?;
        Ok(build_album_groups(files))
    }

    /// Delete rows older than the retention window, returning how many were removed
    pub async fn purge_expired(&self, retention: chrono::Duration) -> Result<u64> {
        let cutoff = (Utc::now() - retention).to_rfc3339();
        let result = sqlx::query("DELETE FROM scanned_files WHERE created_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

async fn single_writer_pool(options: SqliteConnectOptions) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    Ok(pool)
}

fn scanned_file_from_row(row: &SqliteRow) -> Result<ScannedFile> {
    let file_path: String = row.try_get("file_path")?;
    let file_size: i64 = row.try_get("file_size")?;
    let modified_time: String = row.try_get("modified_time")?;
    let created_at: String = row.try_get("created_at")?;
    let error_kind: Option<String> = row.try_get("error_kind")?;

    let error_kind = error_kind
        .map(|k| ExtractionFailure::from_str(&k).map_err(Error::Internal))
        .transpose()?;

    Ok(ScannedFile {
        id: row.try_get("id")?,
        file_path: PathBuf::from(file_path),
        file_size: file_size.max(0) as u64,
        content_hash: row.try_get("content_hash")?,
        modified_time: parse_timestamp(&modified_time)?,
        tags: AudioTags {
            artist: row.try_get("artist")?,
            album_artist: row.try_get("album_artist")?,
            album: row.try_get("album")?,
            title: row.try_get("title")?,
            track_number: row.try_get("track_number")?,
            disc_number: row.try_get("disc_number")?,
            year: row.try_get("year")?,
            genre: row.try_get("genre")?,
            duration: row.try_get("duration")?,
            bitrate: row.try_get("bitrate")?,
            sample_rate: row.try_get("sample_rate")?,
        },
        is_valid: row.try_get("is_valid")?,
        error_kind,
        error_message: row.try_get("error_message")?,
        album_group_hash: row.try_get("album_group_hash")?,
        album_group_id: row.try_get("album_group_id")?,
        created_at: parse_timestamp(&created_at)?,
    })
}

/// Delete ledger files in `dir` whose modification time is older than `retention`
///
/// Only `scan_*.db` files are considered; returns the removed paths.
pub fn remove_expired_ledgers(dir: &Path, retention: Duration) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    if !dir.is_dir() {
        return Ok(removed);
    }

    let now = SystemTime::now();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.starts_with("scan_") && name.ends_with(".db")) {
            continue;
        }

        let age = entry
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| now.duration_since(modified).ok());

        if matches!(age, Some(age) if age > retention) {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    // WAL side files may or may not exist
                    for suffix in ["-wal", "-shm"] {
                        let _ = std::fs::remove_file(format!("{}{}", path.display(), suffix));
                    }
                    info!(path = %path.display(), "Removed expired scan ledger");
                    removed.push(path);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove expired ledger"),
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_file(path: &str, album: &str, year: Option<u32>) -> ScannedFile {
        ScannedFile::valid(
            PathBuf::from(path),
            1234,
            format!("hash-{}", path),
            Utc::now(),
            AudioTags {
                artist: Some("The Beatles".into()),
                album: Some(album.into()),
                title: Some("Something".into()),
                track_number: Some(2),
                disc_number: Some(1),
                year,
                duration: Some(182.5),
                bitrate: Some(320),
                sample_rate: Some(44100),
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_insert_and_load_round_trip() {
        let ledger = ScanLedger::open_in_memory("scan_test").await.unwrap();
        let file = sample_file("/inbound/a.mp3", "Abbey Road", Some(1969));

        let id = ledger.insert_file(&file).await.unwrap();
        assert!(id > 0);

        let loaded = ledger.load_all().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, id);
        assert_eq!(loaded[0].tags, file.tags);
        assert_eq!(loaded[0].content_hash, file.content_hash);
        assert!(loaded[0].is_valid);
    }

    #[tokio::test]
    async fn test_duplicate_path_rejected() {
        let ledger = ScanLedger::open_in_memory("scan_test").await.unwrap();
        let file = sample_file("/inbound/a.mp3", "Abbey Road", Some(1969));
        ledger.insert_file(&file).await.unwrap();
        assert!(ledger.insert_file(&file).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_rows_keep_error_kind() {
        let ledger = ScanLedger::open_in_memory("scan_test").await.unwrap();
        let file = sample_file("/inbound/bad.mp3", "X", None)
            .into_invalid(ExtractionFailure::UnsupportedContainer, "not audio");
        ledger.insert_file(&file).await.unwrap();

        assert!(ledger.load_valid().await.unwrap().is_empty());
        let invalid = ledger.load_invalid().await.unwrap();
        assert_eq!(invalid[0].error_kind, Some(ExtractionFailure::UnsupportedContainer));
        assert_eq!(invalid[0].error_message.as_deref(), Some("not audio"));
    }

    #[tokio::test]
    async fn test_create_and_reopen_file_ledger() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let ledger = ScanLedger::create(temp_dir.path(), "scan_20261017_000000_000")
            .await
            .unwrap();
        ledger.record_run_start(Path::new("/inbound")).await.unwrap();
        ledger
            .insert_file(&sample_file("/inbound/a.mp3", "Abbey Road", Some(1969)))
            .await
            .unwrap();
        ledger.record_run_finish(1, 1, 0, false).await.unwrap();
        let path = ledger.path().unwrap().to_path_buf();
        ledger.close().await;

        // Same scan id cannot be created twice
        assert!(ScanLedger::create(temp_dir.path(), "scan_20261017_000000_000")
            .await
            .is_err());

        let reopened = ScanLedger::open(&path).await.unwrap();
        assert_eq!(reopened.scan_id(), "scan_20261017_000000_000");
        let run = reopened.scan_run().await.unwrap().unwrap();
        assert_eq!(run.root_path, PathBuf::from("/inbound"));
        assert_eq!(run.valid_files, 1);
        assert!(run.finished_at.is_some());
        assert_eq!(reopened.count_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_assign_group_updates_one_row() {
        let ledger = ScanLedger::open_in_memory("scan_test").await.unwrap();
        let id = ledger
            .insert_file(&sample_file("/inbound/a.mp3", "Abbey Road", Some(1969)))
            .await
            .unwrap();
        ledger
            .insert_file(&sample_file("/inbound/b.mp3", "Let It Be", Some(1970)))
            .await
            .unwrap();

        ledger
            .assign_group(id, "thebeatles::abbeyroad", "thebeatles::abbeyroad_1969")
            .await
            .unwrap();

        let groups = ledger.album_groups().await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id, "thebeatles::abbeyroad_1969");
        assert_eq!(groups[0].track_count(), 1);

        let missing = ledger.assign_group(9_999, "x::y", "x::y_0").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_open_missing_ledger_is_not_found() {
        let result = ScanLedger::open(Path::new("/nonexistent/scan_x.db")).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_recent_rows() {
        let ledger = ScanLedger::open_in_memory("scan_test").await.unwrap();
        let mut old = sample_file("/inbound/old.mp3", "Abbey Road", Some(1969));
        old.created_at = Utc::now() - chrono::Duration::days(120);
        ledger.insert_file(&old).await.unwrap();
        ledger
            .insert_file(&sample_file("/inbound/new.mp3", "Abbey Road", Some(1969)))
            .await
            .unwrap();

        let removed = ledger.purge_expired(chrono::Duration::days(90)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(ledger.count_files().await.unwrap(), 1);
    }

    #[test]
    fn test_remove_expired_ledgers_ignores_recent_and_foreign_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("scan_1.db"), b"").unwrap();
        std::fs::write(temp_dir.path().join("notes.txt"), b"").unwrap();

        let removed =
            remove_expired_ledgers(temp_dir.path(), Duration::from_secs(90 * 24 * 3600)).unwrap();
        assert!(removed.is_empty());

        let removed = remove_expired_ledgers(temp_dir.path(), Duration::ZERO).unwrap();
        // Zero retention: anything with a strictly positive age goes
        assert!(removed.len() <= 1);
        assert!(temp_dir.path().join("notes.txt").exists());
    }
}
