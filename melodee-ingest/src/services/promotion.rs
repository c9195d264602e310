//! Promotion of approved staging items into the production catalog
//!
//! Staged files are first copied into a hidden scratch directory next to the
//! album's production location. All catalog writes for one album then happen
//! in a single transaction, the scratch directory is renamed into place and
//! the transaction commits. The staging copy is only removed after the commit
//! succeeded: a crash mid-promotion leaves a duplicate, never a loss, and a
//! retry clears what the crash left behind.

use crate::db::catalog;
use crate::db::staging::{delete_promoted, StagingRepository};
use crate::models::{Album, AlbumSidecar, StagingItem, StagingStatus, Track, SIDECAR_FILE_NAME};
use crate::services::album_grouping::normalize_artist;
use crate::services::processor::album_relative_dir;
use crate::utils::fs_ops::copy_dir_verified;
use melodee_common::{Error, Result};
use sqlx::{SqliteConnection, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Catalog rows created by a promotion
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionOutcome {
    pub artist_id: i64,
    pub album_id: i64,
    pub track_count: usize,
    /// Album directory relative to the library root
    pub directory: String,
    /// Absolute location of the promoted files
    pub production_path: PathBuf,
}

pub struct PromotionHandler {
    pool: SqlitePool,
    staging: StagingRepository,
    library_root: PathBuf,
}

impl PromotionHandler {
    pub fn new(pool: SqlitePool, library_root: impl Into<PathBuf>) -> Self {
        Self {
            staging: StagingRepository::new(pool.clone()),
            pool,
            library_root: library_root.into(),
        }
    }

    pub fn library_root(&self) -> &Path {
        &self.library_root
    }

    /// Promote one approved staging item
    pub async fn promote(&self, staging_id: i64) -> Result<PromotionOutcome> {
        let item = self.staging.get(staging_id).await?;
        if item.status != StagingStatus::Approved {
            return Err(Error::InvalidInput(format!(
                "Staging item {} is {}; only approved items can be promoted",
                staging_id, item.status
            )));
        }

        let (sidecar, checksum) = AlbumSidecar::read_from(&item.metadata_file)?;
        if checksum != item.metadata_checksum {
            return Err(Error::Conflict(format!(
                "Sidecar {} changed since staging",
                item.metadata_file.display()
            )));
        }

        let relative = album_relative_dir(
            &sidecar.artist.directory_code,
            &sidecar.artist.name,
            sidecar.album.year,
            &sidecar.album.name,
        );
        let directory = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect::<Vec<_>>()
            .join("/");
        let production_path = self.library_root.join(&relative);
        let scratch_path = scratch_dir(&production_path);

        self.clear_interrupted(&item, &directory, &production_path, &scratch_path)
            .await?;

        // Copy outside the transaction; catalog writers only wait for the rename
        let copy_from = item.staging_path.clone();
        let copy_to = scratch_path.clone();
        let copied = tokio::task::spawn_blocking(move || copy_dir_verified(&copy_from, &copy_to))
            .await
            .map_err(|e| Error::Internal(format!("Copy task failed: {}", e)))
            .and_then(|r| r.map_err(Error::from));
        if let Err(e) = copied {
            warn!(staging_id, error = %e, "Promotion copy failed");
            remove_dir_if_present(&scratch_path);
            return Err(e);
        }

        let mut tx = self.pool.begin().await?;
        let (artist_id, album_id) = match write_catalog(&mut tx, &item, &sidecar, &directory).await {
            Ok(ids) => ids,
            Err(e) => {
                rollback(tx, staging_id, &e).await;
                remove_dir_if_present(&scratch_path);
                return Err(e);
            }
        };

        if let Err(e) = std::fs::rename(&scratch_path, &production_path) {
            let e = Error::from(e);
            rollback(tx, staging_id, &e).await;
            remove_dir_if_present(&scratch_path);
            return Err(e);
        }

        if let Err(e) = tx.commit().await {
            remove_dir_if_present(&production_path);
            error!(staging_id, error = %e, "Promotion commit failed");
            return Err(e.into());
        }

        if let Err(e) = std::fs::remove_dir_all(&item.staging_path) {
            warn!(
                staging_id,
                path = %item.staging_path.display(),
                error = %e,
                "Promoted album left a duplicate in staging"
            );
        }

        info!(
            staging_id,
            artist_id,
            album_id,
            tracks = sidecar.tracks.len(),
            directory = %directory,
            "Promoted album"
        );

        Ok(PromotionOutcome {
            artist_id,
            album_id,
            track_count: sidecar.tracks.len(),
            directory,
            production_path,
        })
    }
}

impl PromotionHandler {
    /// Clear leftovers of an earlier promotion of the same item
    ///
    /// A scratch directory is always stale. An existing production directory
    /// is only replaced when no album claims it and it holds this item's own
    /// sidecar, i.e. a rename that happened before a failed commit.
    async fn clear_interrupted(
        &self,
        item: &StagingItem,
        directory: &str,
        production_path: &Path,
        scratch_path: &Path,
    ) -> Result<()> {
        if scratch_path.exists() {
            warn!(
                staging_id = item.id,
                path = %scratch_path.display(),
                "Removing stale promotion scratch directory"
            );
            std::fs::remove_dir_all(scratch_path)?;
        }

        if !production_path.exists() {
            return Ok(());
        }

        let claimed = catalog::find_album_by_directory(&self.pool, directory).await?;
        if claimed.is_none() && holds_sidecar(production_path, &item.metadata_checksum) {
            warn!(
                staging_id = item.id,
                path = %production_path.display(),
                "Replacing production copy left by an interrupted promotion"
            );
            std::fs::remove_dir_all(production_path)?;
            return Ok(());
        }

        Err(Error::Conflict(format!(
            "Production directory already exists: {}",
            production_path.display()
        )))
    }
}

/// Artist, album, tracks, then the staging row; returns (artist_id, album_id)
async fn write_catalog(
    conn: &mut SqliteConnection,
    item: &StagingItem,
    sidecar: &AlbumSidecar,
    directory: &str,
) -> Result<(i64, i64)> {
    let artist_id = catalog::find_or_create_artist(
        conn,
        &sidecar.artist.name,
        &normalize_artist(&sidecar.artist.name),
        &sidecar.artist.directory_code,
    )
    .await?;

    let album_id = catalog::insert_album(
        conn,
        &Album {
            id: 0,
            artist_id,
            name: sidecar.album.name.clone(),
            year: (sidecar.album.year > 0).then_some(sidecar.album.year),
            directory: directory.to_string(),
            track_count: sidecar.tracks.len() as i64,
            total_size: sidecar.total_size() as i64,
        },
    )
    .await?;

    for track in &sidecar.tracks {
        catalog::insert_track(
            conn,
            &Track {
                id: 0,
                album_id,
                artist_id,
                title: track.name.clone(),
                track_number: track.track_number,
                disc_number: track.disc_number,
                duration: track.duration,
                file_path: format!("{}/{}", directory, track.file_path),
                file_size: track.file_size as i64,
                bitrate: track.bitrate,
                sample_rate: track.sample_rate,
                checksum: track.checksum.clone(),
            },
        )
        .await?;
    }

    delete_promoted(conn, item.id).await?;
    Ok((artist_id, album_id))
}

async fn rollback(tx: sqlx::Transaction<'_, sqlx::Sqlite>, staging_id: i64, cause: &Error) {
    warn!(staging_id, error = %cause, "Promotion failed, rolling back");
    if let Err(e) = tx.rollback().await {
        error!(staging_id, error = %e, "Rollback failed");
    }
}

/// Sibling of the album directory that receives the copy before the rename
fn scratch_dir(production_path: &Path) -> PathBuf {
    let name = production_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    production_path.with_file_name(format!(".{}.promoting", name))
}

fn holds_sidecar(album_dir: &Path, checksum: &str) -> bool {
    match AlbumSidecar::read_from(&album_dir.join(SIDECAR_FILE_NAME)) {
        Ok((_, found)) => found == checksum,
        Err(_) => false,
    }
}

fn remove_dir_if_present(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_dir_all(path) {
            error!(path = %path.display(), error = %e, "Failed to remove partial promotion copy");
        }
    }
}
