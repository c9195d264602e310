//! Artist directory codes
//!
//! Short, stable, filesystem-safe prefixes for artist directories in the staging
//! and production trees ("The Beatles" → `BE`, "Led Zeppelin" → `LZ`).

use crate::db::directory_codes::{self as store, DirectoryCodeRow};
use crate::services::album_grouping::normalize_artist;
use melodee_common::Result;
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// Code used when a name has no usable characters
pub const FALLBACK_CODE: &str = "ZZ";

#[derive(Default)]
struct CodeTable {
    by_artist: HashMap<String, String>,
    taken: HashSet<String>,
}

/// Allocates directory codes, serializing allocation behind a mutex
pub struct DirectoryCodeGenerator {
    table: Mutex<CodeTable>,
    pool: Option<SqlitePool>,
}

impl DirectoryCodeGenerator {
    /// Generator holding mappings in memory only
    pub fn in_memory() -> Self {
        Self {
            table: Mutex::new(CodeTable::default()),
            pool: None,
        }
    }

    /// Generator backed by the catalog's `artist_directory_codes` table
    pub async fn with_pool(pool: SqlitePool) -> Result<Self> {
        let mut table = CodeTable::default();
        for row in store::load_all(&pool).await? {
            table.taken.insert(row.code.clone());
            table.by_artist.insert(row.artist_normalized, row.code);
        }

        tracing::debug!(codes = table.taken.len(), "Loaded artist directory codes");
        Ok(Self {
            table: Mutex::new(table),
            pool: Some(pool),
        })
    }

    /// Code for `artist_name`, allocating and persisting one on first request
    pub async fn code_for(&self, artist_name: &str) -> Result<String> {
        let normalized = normalize_artist(artist_name);
        let mut table = self.table.lock().await;

        if let Some(code) = table.by_artist.get(&normalized) {
            return Ok(code.clone());
        }

        let base = base_code(artist_name);
        let mut code = base.clone();
        let mut suffix = 1u32;
        while table.taken.contains(&code) {
            code = format!("{}{}", base, suffix);
            suffix += 1;
        }

        if let Some(pool) = &self.pool {
            store::save(
                pool,
                &DirectoryCodeRow {
                    artist_normalized: normalized.clone(),
                    artist_name: artist_name.trim().to_string(),
                    code: code.clone(),
                },
            )
            .await?;
        }

        tracing::debug!(artist = artist_name, code = %code, "Assigned directory code");
        table.taken.insert(code.clone());
        table.by_artist.insert(normalized, code.clone());
        Ok(code)
    }
}

/// Initials-based code before collision handling
pub fn base_code(artist_name: &str) -> String {
    let trimmed = artist_name.trim();
    let without_article = match trimmed.get(..4) {
        Some(prefix) if prefix.eq_ignore_ascii_case("the ") && trimmed.len() > 4 => &trimmed[4..],
        _ => trimmed,
    };

    let words: Vec<String> = without_article
        .split_whitespace()
        .map(|w| w.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>())
        .filter(|w| !w.is_empty())
        .collect();

    let code: String = match words.as_slice() {
        [] => String::new(),
        [single] => single.chars().take(2).collect(),
        many => many.iter().take(4).filter_map(|w| w.chars().next()).collect(),
    };

    if code.is_empty() {
        FALLBACK_CODE.to_string()
    } else {
        code.to_ascii_uppercase()
    }
}
