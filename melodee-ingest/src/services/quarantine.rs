//! Quarantine service
//!
//! Moves failing files out of the inbound tree into
//! `{quarantine_root}/{library_id}/{reason}/` and keeps a record of each one.
//! Records are never deleted automatically: an operator resolves them or
//! requeues the file back to where it was found.

use crate::db::QuarantineRepository;
use crate::models::{Page, QuarantineFilter, QuarantineReason, QuarantineRecord};
use crate::utils::fs_ops::{move_file, sanitize_segment, unique_path};
use melodee_common::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Clone)]
pub struct QuarantineService {
    repo: QuarantineRepository,
    root: PathBuf,
}

impl QuarantineService {
    pub fn new(repo: QuarantineRepository, root: impl Into<PathBuf>) -> Self {
        Self {
            repo,
            root: root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relocate `path` into the quarantine area and record it
    ///
    /// A failed relocation is logged and the record keeps the original location.
    pub async fn quarantine(
        &self,
        path: &Path,
        reason: QuarantineReason,
        message: &str,
        library_id: &str,
    ) -> Result<QuarantineRecord> {
        let current = match self.relocate(path, reason, library_id) {
            Ok(target) => target,
            Err(e) => {
                warn!(
                    file = %path.display(),
                    reason = %reason,
                    error = %e,
                    "Could not relocate file to quarantine, recording in place"
                );
                path.to_path_buf()
            }
        };

        let record = self
            .repo
            .insert(&current, path, reason, message, library_id)
            .await?;

        info!(
            id = record.id,
            file = %path.display(),
            reason = %reason,
            library_id,
            "Quarantined file"
        );
        Ok(record)
    }

    /// Record a failure without touching the file
    pub async fn record(
        &self,
        path: &Path,
        reason: QuarantineReason,
        message: &str,
        library_id: &str,
    ) -> Result<QuarantineRecord> {
        let record = self.repo.insert(path, path, reason, message, library_id).await?;
        info!(id = record.id, file = %path.display(), reason = %reason, "Recorded quarantine entry");
        Ok(record)
    }

    fn relocate(&self, path: &Path, reason: QuarantineReason, library_id: &str) -> std::io::Result<PathBuf> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unnamed".to_string());

        let dir = self
            .root
            .join(sanitize_segment(library_id, "library"))
            .join(reason.as_str());
        std::fs::create_dir_all(&dir)?;

        let target = unique_path(&dir.join(file_name));
        move_file(path, &target)?;
        Ok(target)
    }

    pub async fn list(
        &self,
        filter: &QuarantineFilter,
        page: u32,
        per_page: u32,
    ) -> Result<Page<QuarantineRecord>> {
        self.repo.list(filter, page, per_page).await
    }

    pub async fn get(&self, id: i64) -> Result<QuarantineRecord> {
        self.repo.get(id).await
    }

    /// Mark a record handled; the file is presumed fixed elsewhere
    pub async fn resolve(&self, id: i64) -> Result<QuarantineRecord> {
        let record = self.repo.mark_resolved(id).await?;
        info!(id, "Resolved quarantine record");
        Ok(record)
    }

    /// Move the file back to its original location and drop the record
    ///
    /// Returns the restored path so the caller can schedule it for processing.
    pub async fn requeue(&self, id: i64) -> Result<PathBuf> {
        let record = self.repo.get(id).await?;
        let original = record.original_path.clone();

        if record.file_path != original {
            if !record.file_path.exists() {
                return Err(Error::NotFound(format!(
                    "Quarantined file missing: {}",
                    record.file_path.display()
                )));
            }
            if original.exists() {
                return Err(Error::Conflict(format!(
                    "Original location is occupied: {}",
                    original.display()
                )));
            }
            move_file(&record.file_path, &original)?;
        } else if !original.exists() {
            return Err(Error::NotFound(format!(
                "Quarantined file missing: {}",
                original.display()
            )));
        }

        self.repo.delete(id).await?;
        info!(id, file = %original.display(), "Requeued quarantined file");
        Ok(original)
    }
}
