//! Persistence for artist directory codes

use super::now_rfc3339;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};
use melodee_common::Result;
use sqlx::{Row, SqlitePool};

/// One persisted artist → code mapping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryCodeRow {
    pub artist_normalized: String,
    pub artist_name: String,
    pub code: String,
}

/// Load every known mapping
pub async fn load_all(pool: &SqlitePool) -> Result<Vec<DirectoryCodeRow>> {
    let rows = sqlx::query(
        "SELECT artist_normalized, artist_name, code FROM artist_directory_codes ORDER BY code",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(DirectoryCodeRow {
                artist_normalized: row.try_get("artist_normalized")?,
                artist_name: row.try_get("artist_name")?,
                code: row.try_get("code")?,
            })
        })
        .collect()
}

/// Persist a new mapping
///
/// The `code` column is unique; a concurrent writer claiming the same code
/// surfaces as a database error.
pub async fn save(pool: &SqlitePool, row: &DirectoryCodeRow) -> Result<()> {
    let now = now_rfc3339();
    retry_on_lock("save directory code", DEFAULT_MAX_LOCK_WAIT_MS, || async {
        sqlx::query(
            r#"
            INSERT INTO artist_directory_codes (artist_normalized, artist_name, code, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&row.artist_normalized)
        .bind(&row.artist_name)
        .bind(&row.code)
        .bind(&now)
        .execute(pool)
        .await?;
        Ok(())
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use melodee_common::db::init_memory_database;

    #[tokio::test]
    async fn test_save_and_load() {
        let pool = init_memory_database().await.unwrap();
        let row = DirectoryCodeRow {
            artist_normalized: "thebeatles".into(),
            artist_name: "The Beatles".into(),
            code: "BE".into(),
        };
        save(&pool, &row).await.unwrap();

        assert_eq!(load_all(&pool).await.unwrap(), vec![row.clone()]);

        // Saving again for the same artist keeps a single row
        save(&pool, &row).await.unwrap();
        assert_eq!(load_all(&pool).await.unwrap().len(), 1);

        // Codes are unique across artists
        let clash = DirectoryCodeRow {
            artist_normalized: "beck".into(),
            artist_name: "Beck".into(),
            code: "BE".into(),
        };
        assert!(save(&pool, &clash).await.is_err());
    }
}
