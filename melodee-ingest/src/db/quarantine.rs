//! Quarantine record repository

use super::{now_rfc3339, parse_optional_timestamp, parse_timestamp};
use crate::models::{normalize_paging, Page, QuarantineFilter, QuarantineReason, QuarantineRecord};
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use melodee_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

const QUARANTINE_COLUMNS: &str = r#"
    id, file_path, original_path, reason, message, library_id,
    resolved, resolved_at, created_at, updated_at
"#;

const FILTER_CLAUSE: &str = r#"
    (?1 IS NULL OR reason = ?1)
    AND (?2 IS NULL OR library_id = ?2)
    AND (?3 IS NULL OR resolved = ?3)
"#;

#[derive(Clone)]
pub struct QuarantineRepository {
    pool: SqlitePool,
    max_lock_wait_ms: u64,
}

impl QuarantineRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            max_lock_wait_ms: DEFAULT_MAX_LOCK_WAIT_MS,
        }
    }

    pub async fn insert(
        &self,
        file_path: &Path,
        original_path: &Path,
        reason: QuarantineReason,
        message: &str,
        library_id: &str,
    ) -> Result<QuarantineRecord> {
        let file_path = file_path.to_string_lossy().to_string();
        let original_path = original_path.to_string_lossy().to_string();
        let now = now_rfc3339();

        let id = retry_on_lock("insert quarantine record", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                INSERT INTO quarantine_records (
                    file_path, original_path, reason, message, library_id,
                    resolved, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, 0, ?, ?)
                "#,
            )
            .bind(&file_path)
            .bind(&original_path)
            .bind(reason.as_str())
            .bind(message)
            .bind(library_id)
            .bind(&now)
            .bind(&now)
            .execute(&self.pool)
            .await?;
            Ok(result.last_insert_rowid())
        })
        .await?;

        self.get(id).await
    }

    pub async fn find(&self, id: i64) -> Result<Option<QuarantineRecord>> {
        let sql = format!(
            "SELECT {} FROM quarantine_records WHERE id = ?",
            QUARANTINE_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    pub async fn get(&self, id: i64) -> Result<QuarantineRecord> {
        self.find(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Quarantine record {} not found", id)))
    }

    /// Paginated listing, newest first
    pub async fn list(
        &self,
        filter: &QuarantineFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<QuarantineRecord>> {
        let (page, per_page, offset) = normalize_paging(page, per_page);
        let reason = filter.reason.map(|r| r.as_str());
        let library_id = filter.library_id.as_deref();
        let resolved = filter.resolved;

        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM quarantine_records WHERE {}",
            FILTER_CLAUSE
        ))
        .bind(reason)
        .bind(library_id)
        .bind(resolved)
        .fetch_one(&self.pool)
        .await?;

        let sql = format!(
            r#"
            SELECT {} FROM quarantine_records
            WHERE {}
            ORDER BY created_at DESC, id DESC
            LIMIT ?4 OFFSET ?5
            "#,
            QUARANTINE_COLUMNS, FILTER_CLAUSE
        );
        let rows = sqlx::query(&sql)
            .bind(reason)
            .bind(library_id)
            .bind(resolved)
            .bind(per_page as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        let items = rows
            .iter()
            .map(record_from_row)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            total,
            page,
            per_page,
        })
    }

    /// Set the resolved flag; `Conflict` if it was already set
    pub async fn mark_resolved(&self, id: i64) -> Result<QuarantineRecord> {
        let now = now_rfc3339();
        let updated = retry_on_lock("resolve quarantine record", self.max_lock_wait_ms, || async {
            let result = sqlx::query(
                r#"
                UPDATE quarantine_records
                SET resolved = 1, resolved_at = ?, updated_at = ?
                WHERE id = ? AND resolved = 0
                "#,
            )
            .bind(&now)
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if updated == 0 {
            // Distinguish a missing record from one already resolved
            self.get(id).await?;
            return Err(Error::Conflict(format!(
                "Quarantine record {} is already resolved",
                id
            )));
        }

        self.get(id).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        let deleted = retry_on_lock("delete quarantine record", self.max_lock_wait_ms, || async {
            let result = sqlx::query("DELETE FROM quarantine_records WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(result.rows_affected())
        })
        .await?;

        if deleted == 0 {
            return Err(Error::NotFound(format!("Quarantine record {} not found", id)));
        }
        Ok(())
    }
}

fn record_from_row(row: &SqliteRow) -> Result<QuarantineRecord> {
    let file_path: String = row.try_get("file_path")?;
    let original_path: String = row.try_get("original_path")?;
    let reason: String = row.try_get("reason")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(QuarantineRecord {
        id: row.try_get("id")?,
        file_path: PathBuf::from(file_path),
        original_path: PathBuf::from(original_path),
        reason: reason.parse()?,
        message: row.try_get("message")?,
        library_id: row.try_get("library_id")?,
        resolved: row.try_get("resolved")?,
        resolved_at: parse_optional_timestamp(row.try_get("resolved_at")?)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use melodee_common::db::init_memory_database;

    async fn repo() -> QuarantineRepository {
        QuarantineRepository::new(init_memory_database().await.unwrap())
    }

    async fn insert(repo: &QuarantineRepository, name: &str, reason: QuarantineReason, lib: &str) -> QuarantineRecord {
        repo.insert(
            &PathBuf::from(format!("/quarantine/{}", name)),
            &PathBuf::from(format!("/inbound/{}", name)),
            reason,
            "bad file",
            lib,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = repo().await;
        let record = insert(&repo, "a.mp3", QuarantineReason::TagParseError, "scan_1").await;
        assert!(!record.resolved);
        assert_eq!(record.original_path, PathBuf::from("/inbound/a.mp3"));
        assert_eq!(repo.get(record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_list_filters() {
        let repo = repo().await;
        insert(&repo, "a.mp3", QuarantineReason::TagParseError, "scan_1").await;
        let b = insert(&repo, "b.mp3", QuarantineReason::ChecksumMismatch, "scan_1").await;
        insert(&repo, "c.mp3", QuarantineReason::TagParseError, "scan_2").await;
        repo.mark_resolved(b.id).await.unwrap();

        let all = repo.list(&QuarantineFilter::default(), 1, 50).await.unwrap();
        assert_eq!(all.total, 3);
        // Newest first
        assert!(all.items[0].id > all.items[2].id);

        let tag_errors = QuarantineFilter {
            reason: Some(QuarantineReason::TagParseError),
            ..Default::default()
        };
        assert_eq!(repo.list(&tag_errors, 1, 50).await.unwrap().total, 2);

        let scan_1_open = QuarantineFilter {
            library_id: Some("scan_1".into()),
            resolved: Some(false),
            ..Default::default()
        };
        let page = repo.list(&scan_1_open, 1, 50).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].file_path, PathBuf::from("/quarantine/a.mp3"));
    }

    #[tokio::test]
    async fn test_resolve_twice_conflicts_and_missing_is_not_found() {
        let repo = repo().await;
        let record = insert(&repo, "a.mp3", QuarantineReason::Other, "scan_1").await;

        let resolved = repo.mark_resolved(record.id).await.unwrap();
        assert!(resolved.resolved);
        assert!(resolved.resolved_at.is_some());

        assert!(matches!(repo.mark_resolved(record.id).await, Err(Error::Conflict(_))));
        assert!(matches!(repo.mark_resolved(999).await, Err(Error::NotFound(_))));
        assert!(matches!(repo.delete(999).await, Err(Error::NotFound(_))));
    }
}
