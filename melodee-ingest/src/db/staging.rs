//! Staging item repository
//!
//! Status changes go through [`StagingStatus::apply`] and are written as
//! single-row conditional updates (`WHERE id = ? AND status = ?`), so a
//! concurrent reviewer racing on the same item gets a conflict instead of a
//! silent overwrite.

use super::{now_rfc3339, parse_optional_timestamp, parse_timestamp};
use crate::models::{
    normalize_paging, NewStagingItem, Page, StagingAction, StagingItem, StagingStats,
    StagingStatus, Transition,
};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use melodee_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::path::PathBuf;
use tracing::{info, warn};

const STAGING_COLUMNS: &str = r#"
    id, scan_id, staging_path, metadata_file, artist_name, album_name,
    track_count, total_size, processed_at, status, reviewed_by, reviewed_at,
    notes, metadata_checksum, created_at
"#;

/// Repository over the `staging_items` table
#[derive(Clone)]
pub struct StagingRepository {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl StagingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert a freshly staged album in `pending_review`
    pub async fn create(&self, item: &NewStagingItem) -> Result<StagingItem> {
        let staging_path = item.staging_path.to_string_lossy().to_string();
        let metadata_file = item.metadata_file.to_string_lossy().to_string();
        let now = now_rfc3339();

        let id = retry_on_lock("create staging item", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO staging_items (
                    scan_id, staging_path, metadata_file, artist_name, album_name,
                    track_count, total_size, processed_at, status, metadata_checksum, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.scan_id)
            .bind(&staging_path)
            .bind(&metadata_file)
            .bind(&item.artist_name)
            .bind(&item.album_name)
            .bind(item.track_count)
            .bind(item.total_size)
            .bind(&now)
            .bind(StagingStatus::PendingReview.as_str())
            .bind(&item.metadata_checksum)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await?;

        info!(
            id,
            artist = %item.artist_name,
            album = %item.album_name,
            "Created staging item"
        );
        self.get(id).await
    }

    pub async fn find(&self, id: i64) -> Result<Option<StagingItem>> {
        let sql = format!("SELECT {} FROM staging_items WHERE id = ?", STAGING_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(staging_item_from_row).transpose()
    }

    /// Load one item, `NotFound` if missing
    pub async fn get(&self, id: i64) -> Result<StagingItem> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Staging item {} not found", id)))
    }

    /// Paginated listing, newest first
    pub async fn list(
        &self,
        status: Option<StagingStatus>,
        page: u32,
        per_page: u32,
    ) -> Result<Page<StagingItem>> {
        let (page, per_page, offset) = normalize_paging(page, per_page);
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM staging_items WHERE (?1 IS NULL OR status = ?1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            r#"
            SELECT {} FROM staging_items
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at DESC, id DESC
            LIMIT ?2 OFFSET ?3
            "#,
            STAGING_COLUMNS
        );
        let rows = sqlx::query(&sql)
            .bind(status)
            .bind(per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(staging_item_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Counts per status plus track and byte totals over all items
    pub async fn stats(&self) -> Result<StagingStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'pending_review' THEN 1 ELSE 0 END), 0) AS pending_review,
                COALESCE(SUM(CASE WHEN status = 'approved' THEN 1 ELSE 0 END), 0) AS approved,
                COALESCE(SUM(CASE WHEN status = 'rejected' THEN 1 ELSE 0 END), 0) AS rejected,
                COALESCE(SUM(track_count), 0) AS total_tracks,
                COALESCE(SUM(total_size), 0) AS total_size
            FROM staging_items
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StagingStats {
            pending_review: row.try_get("pending_review")?,
            approved: row.try_get("approved")?,
            rejected: row.try_get("rejected")?,
            total_tracks: row.try_get("total_tracks")?,
            total_size: row.try_get("total_size")?,
        })
    }

    /// `pending_review` → `approved`
    pub async fn approve(
        &self,
        id: i64,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<StagingItem> {
        self.review(id, StagingAction::Approve, reviewer, notes).await
    }

    /// `pending_review` → `rejected`; a non-blank reason is required
    pub async fn reject(&self, id: i64, reviewer: &str, notes: &str) -> Result<StagingItem> {
        if notes.trim().is_empty() {
            return Err(Error::InvalidInput(
                "Rejection notes are required".to_string(),
            ));
        }
        self.review(id, StagingAction::Reject, reviewer, Some(notes))
            .await
    }

    async fn review(
        &self,
        id: i64,
        action: StagingAction,
        reviewer: &str,
        notes: Option<&str>,
    ) -> Result<StagingItem> {
        let current = self.get(id).await?;
        let next = match current.status.apply(action)? {
            Transition::To(status) => status,
            Transition::Remove => {
                return Err(Error::Internal(format!("{} does not keep the row", action)))
            }
        };

        let notes = notes.map(str::trim).filter(|n| !n.is_empty());
        let now = now_rfc3339();

        let updated = retry_on_lock("review staging item", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE staging_items
                SET status = ?, reviewed_by = ?, reviewed_at = ?, notes = COALESCE(?, notes)
                WHERE id = ? AND status = ?
                "#,
            )
            .bind(next.as_str())
            .bind(reviewer)
            .bind(&now)
            .bind(notes)
            .bind(id)
            .bind(current.status.as_str())
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            return Err(self.lost_race(id, action).await);
        }

        info!(id, reviewer, status = %next, "Reviewed staging item");
        self.get(id).await
    }

    /// Hard-delete a `rejected` item, optionally removing its staged files
    pub async fn delete(&self, id: i64, delete_files: bool) -> Result<()> {
        let current = self.get(id).await?;
        current.status.apply(StagingAction::Delete)?;

        let deleted = retry_on_lock("delete staging item", self.max_lock_wait_ms, || async {
            let result = sqlx::query("DELETE FROM staging_items WHERE id = ? AND status = ?")
                .bind(id)
                .bind(StagingStatus::Rejected.as_str())
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if deleted == 0 {
            return Err(self.lost_race(id, StagingAction::Delete).await);
        }

        if delete_files && current.staging_path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&current.staging_path) {
                warn!(
                    id,
                    path = %current.staging_path.display(),
                    error = %e,
                    "Staging item deleted but its files could not be removed"
                );
            }
        }

        info!(id, delete_files, "Deleted staging item");
        Ok(())
    }

    /// Error for a conditional update that matched no row
    async fn lost_race(&self, id: i64, action: StagingAction) -> Error {
        match self.find(id).await {
            Ok(Some(item)) => match item.status.apply(action) {
                Err(invalid) => invalid.into(),
                Ok(_) => Error::Conflict(format!("Staging item {} changed concurrently", id)),
            },
            Ok(None) => Error::NotFound(format!("Staging item {} not found", id)),
            Err(e) => e,
        }
    }
}

/// Remove a promoted item inside the promotion transaction
///
/// Matches only `approved` rows; anything else is a conflict and rolls the promotion back.
pub async fn delete_promoted(conn: &mut SqliteConnection, id: i64) -> Result<()> {
    let result = sqlx::query("DELETE FROM staging_items WHERE id = ? AND status = ?")
        .bind(id)
        .bind(StagingStatus::Approved.as_str())
        .execute(conn)
        .await?;

    if result.rows_affected() == 0 {
        return Err(Error::Conflict(format!(
            "Staging item {} is no longer approved",
            id
        )));
    }
    Ok(())
}

fn staging_item_from_row(row: &SqliteRow) -> Result<StagingItem> {
    let staging_path: String = row.try_get("staging_path")?;
    let metadata_file: String = row.try_get("metadata_file")?;
    let status: String = row.try_get("status")?;
    let processed_at: String = row.try_get("processed_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(StagingItem {
        id: row.try_get("id")?,
        scan_id: row.try_get("scan_id")?,
        staging_path: PathBuf::from(staging_path),
        metadata_file: PathBuf::from(metadata_file),
        artist_name: row.try_get("artist_name")?,
        album_name: row.try_get("album_name")?,
        track_count: row.try_get("track_count")?,
        total_size: row.try_get("total_size")?,
        processed_at: parse_timestamp(&processed_at)?,
        status: status.parse()?,
        reviewed_by: row.try_get("reviewed_by")?,
        reviewed_at: parse_optional_timestamp(row.try_get("reviewed_at")?)?,
        notes: row.try_get("notes")?,
        metadata_checksum: row.try_get("metadata_checksum")?,
        created_at: parse_timestamp(&created_at)?,
    })
}
