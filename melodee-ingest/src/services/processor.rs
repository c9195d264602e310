//! Scan processor
//!
//! Moves grouped albums from the inbound tree into the staging layout
//! `{code}/{artist}/{year:04} - {album}/`, writes an `album.melodee.json`
//! sidecar next to the tracks and registers a staging item for review.
//!
//! Per-file failures never abort an album: the file is recorded, the sidecar
//! is flagged `is_valid = false` and files already moved stay moved.

use crate::db::{ScanLedger, StagingRepository};
use crate::models::{
    AlbumGroup, AlbumSidecar, NewStagingItem, QuarantineReason, ScannedFile, SidecarAlbum,
    SidecarArtist, SidecarTrack,
};
use crate::services::album_grouping::group_ledger;
use crate::services::directory_codes::DirectoryCodeGenerator;
use crate::services::metadata_extractor::calculate_file_hash;
use crate::services::quarantine::QuarantineService;
use crate::services::rate_limiter::TokenBucket;
use crate::utils::fs_ops::{move_file, sanitize_segment};
use futures::stream::{self, StreamExt};
use melodee_common::Result;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Processor settings
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Root of the staging tree
    pub staging_root: PathBuf,
    /// Albums processed concurrently
    pub workers: usize,
    /// File moves per second; `None` means unlimited
    pub rate_limit: Option<u32>,
    /// Compute the plan without touching disk or database
    pub dry_run: bool,
}

impl ProcessorConfig {
    pub fn new(staging_root: impl Into<PathBuf>) -> Self {
        Self {
            staging_root: staging_root.into(),
            workers: melodee_common::config::DEFAULT_WORKERS,
            rate_limit: None,
            dry_run: false,
        }
    }
}

/// How a processing run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    CompletedWithErrors,
    Cancelled,
}

impl RunOutcome {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed => 0,
            RunOutcome::CompletedWithErrors => 2,
            RunOutcome::Cancelled => 130,
        }
    }
}

/// Result of staging one album group
#[derive(Debug, Clone, PartialEq)]
pub struct StagedAlbum {
    pub group_id: String,
    pub artist: String,
    pub album: String,
    pub year: u32,
    pub directory_code: String,
    /// Album directory inside the staging tree
    pub staging_path: PathBuf,
    /// Written sidecar (`None` on dry runs or when nothing was staged)
    pub sidecar_path: Option<PathBuf>,
    pub staging_item_id: Option<i64>,
    pub files_moved: usize,
    pub files_failed: usize,
    pub files_quarantined: usize,
    pub errors: Vec<String>,
    pub cancelled: bool,
}

impl StagedAlbum {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Totals for one processing run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessReport {
    pub scan_id: String,
    pub dry_run: bool,
    pub albums_staged: usize,
    pub albums_with_errors: usize,
    pub files_moved: usize,
    pub files_failed: usize,
    pub files_quarantined: usize,
    /// Per-album results ordered by group id
    pub albums: Vec<StagedAlbum>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl ProcessReport {
    pub fn outcome(&self) -> RunOutcome {
        if self.cancelled {
            RunOutcome::Cancelled
        } else if self.albums_with_errors > 0 || self.files_failed > 0 || self.files_quarantined > 0 {
            RunOutcome::CompletedWithErrors
        } else {
            RunOutcome::Completed
        }
    }
}

enum FileOutcome {
    Moved(SidecarTrack),
    Quarantined(String),
    Failed(String),
}

pub struct Processor {
    config: ProcessorConfig,
    codes: DirectoryCodeGenerator,
    staging: Option<StagingRepository>,
    quarantine: Option<QuarantineService>,
    bucket: Option<TokenBucket>,
}

impl Processor {
    pub fn new(config: ProcessorConfig, codes: DirectoryCodeGenerator) -> Self {
        Self {
            config,
            codes,
            staging: None,
            quarantine: None,
            bucket: None,
        }
    }

    /// Persist a staging item for every staged album
    pub fn with_staging_repository(mut self, repo: StagingRepository) -> Self {
        self.staging = Some(repo);
        self
    }

    /// Quarantine checksum mismatches, move failures and invalid scan rows
    pub fn with_quarantine(mut self, quarantine: QuarantineService) -> Self {
        self.quarantine = Some(quarantine);
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// Stage every album group of a ledger, then quarantine its invalid rows
    ///
    /// Groups the ledger first if the scan left no group ids behind.
    pub async fn process_ledger(
        &mut self,
        ledger: &ScanLedger,
        cancel: &CancellationToken,
    ) -> Result<ProcessReport> {
        let mut groups = ledger.album_groups().await?;
        if groups.is_empty() {
            groups = group_ledger(ledger).await?;
        }
        let invalid = ledger.load_invalid().await?;

        let mut report = self.process_groups(ledger.scan_id(), groups, cancel).await?;
        if !report.cancelled {
            report.files_quarantined += self.quarantine_invalid(ledger.scan_id(), &invalid).await;
        }
        Ok(report)
    }

    /// Stage album groups with a bounded worker pool
    pub async fn process_groups(
        &mut self,
        scan_id: &str,
        groups: Vec<AlbumGroup>,
        cancel: &CancellationToken,
    ) -> Result<ProcessReport> {
        let start = Instant::now();
        let total_groups = groups.len();

        if !self.config.dry_run {
            std::fs::create_dir_all(&self.config.staging_root)?;
            if let Some(limit) = self.config.rate_limit {
                let mut bucket = TokenBucket::new(limit);
                bucket.start_refill();
                self.bucket = Some(bucket);
            }
        }

        info!(
            scan_id,
            groups = total_groups,
            workers = self.config.workers,
            rate_limit = ?self.config.rate_limit,
            dry_run = self.config.dry_run,
            "Processing album groups"
        );

        let this = &*self;
        let mut albums: Vec<StagedAlbum> = stream::iter(groups)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|group| this.stage_album(scan_id, group, cancel))
            .buffer_unordered(self.config.workers.max(1))
            .collect()
            .await;

        if let Some(mut bucket) = self.bucket.take() {
            bucket.stop();
        }

        albums.sort_by(|a, b| a.group_id.cmp(&b.group_id));

        let mut report = ProcessReport {
            scan_id: scan_id.to_string(),
            dry_run: self.config.dry_run,
            cancelled: cancel.is_cancelled()
                && (albums.len() < total_groups || albums.iter().any(|a| a.cancelled)),
            elapsed: start.elapsed(),
            ..Default::default()
        };
        for album in &albums {
            if album.sidecar_path.is_some() || (self.config.dry_run && album.files_moved > 0) {
                report.albums_staged += 1;
            }
            if !album.is_valid() {
                report.albums_with_errors += 1;
            }
            report.files_moved += album.files_moved;
            report.files_failed += album.files_failed;
            report.files_quarantined += album.files_quarantined;
        }
        report.albums = albums;

        info!(
            scan_id,
            albums_staged = report.albums_staged,
            albums_with_errors = report.albums_with_errors,
            files_moved = report.files_moved,
            files_failed = report.files_failed,
            files_quarantined = report.files_quarantined,
            cancelled = report.cancelled,
            "Processing finished"
        );
        Ok(report)
    }

    /// Hand invalid ledger rows to the quarantine service; returns how many were quarantined
    pub async fn quarantine_invalid(&self, library_id: &str, files: &[ScannedFile]) -> usize {
        let invalid: Vec<&ScannedFile> = files.iter().filter(|f| !f.is_valid).collect();
        if invalid.is_empty() {
            return 0;
        }

        let quarantine = match (&self.quarantine, self.config.dry_run) {
            (Some(quarantine), false) => quarantine,
            _ => {
                for file in &invalid {
                    warn!(
                        file = %file.file_path.display(),
                        error = ?file.error_message,
                        "Invalid file left in place"
                    );
                }
                return 0;
            }
        };

        let mut quarantined = 0;
        for file in invalid {
            let reason = file
                .error_kind
                .map(QuarantineReason::from)
                .unwrap_or(QuarantineReason::Other);
            let message = file
                .error_message
                .clone()
                .unwrap_or_else(|| "failed validation".to_string());

            match quarantine
                .quarantine(&file.file_path, reason, &message, library_id)
                .await
            {
                Ok(_) => quarantined += 1,
                Err(e) => error!(
                    file = %file.file_path.display(),
                    error = %e,
                    "Failed to quarantine invalid file"
                ),
            }
        }
        quarantined
    }

    async fn stage_album(
        &self,
        scan_id: &str,
        group: AlbumGroup,
        cancel: &CancellationToken,
    ) -> StagedAlbum {
        let mut staged = StagedAlbum {
            group_id: group.group_id.clone(),
            artist: group.artist.clone(),
            album: group.album.clone(),
            year: group.year,
            directory_code: String::new(),
            staging_path: PathBuf::new(),
            sidecar_path: None,
            staging_item_id: None,
            files_moved: 0,
            files_failed: 0,
            files_quarantined: 0,
            errors: Vec::new(),
            cancelled: false,
        };

        let code = match self.codes.code_for(&group.artist).await {
            Ok(code) => code,
            Err(e) => {
                error!(album = %group.album, error = %e, "Could not assign directory code");
                staged.errors.push(format!("directory code: {}", e));
                staged.files_failed = group.files.len();
                return staged;
            }
        };
        staged.directory_code = code.clone();

        let album_dir = self
            .config
            .staging_root
            .join(album_relative_dir(&code, &group.artist, group.year, &group.album));
        staged.staging_path = album_dir.clone();

        if !self.config.dry_run {
            if let Err(e) = std::fs::create_dir_all(&album_dir) {
                error!(album = %group.album, path = %album_dir.display(), error = %e, "Could not create album directory");
                staged.errors.push(format!("{}: {}", album_dir.display(), e));
                staged.files_failed = group.files.len();
                return staged;
            }
        }

        let mut sidecar = AlbumSidecar::new(
            scan_id,
            SidecarArtist {
                name: group.artist.clone(),
                directory_code: code,
            },
            SidecarAlbum {
                name: group.album.clone(),
                year: group.year,
            },
        );

        let mut used_names = HashSet::new();
        for (index, file) in group.files.iter().enumerate() {
            if cancel.is_cancelled() {
                staged.cancelled = true;
                break;
            }

            let name = self.claim_file_name(&album_dir, canonical_file_name(file, index), &mut used_names);
            match self.stage_file(scan_id, file, index, &album_dir, &name).await {
                FileOutcome::Moved(track) => {
                    staged.files_moved += 1;
                    sidecar.tracks.push(track);
                }
                FileOutcome::Quarantined(err) => {
                    staged.files_quarantined += 1;
                    sidecar.record_error(err.clone());
                    staged.errors.push(err);
                }
                FileOutcome::Failed(err) => {
                    staged.files_failed += 1;
                    sidecar.record_error(err.clone());
                    staged.errors.push(err);
                }
            }
        }

        if self.config.dry_run {
            debug!(album = %group.album, path = %album_dir.display(), "Dry run, nothing written");
            return staged;
        }

        if sidecar.tracks.is_empty() {
            // Nothing landed; do not leave an empty album behind
            let _ = std::fs::remove_dir(&album_dir);
            if staged.errors.is_empty() {
                staged.errors.push("no tracks staged".to_string());
            }
            return staged;
        }

        let (sidecar_path, checksum) = match sidecar.write_to(&album_dir) {
            Ok(written) => written,
            Err(e) => {
                error!(album = %group.album, error = %e, "Failed to write sidecar");
                staged.errors.push(format!("sidecar: {}", e));
                return staged;
            }
        };
        staged.sidecar_path = Some(sidecar_path.clone());

        if let Some(repo) = &self.staging {
            let item = NewStagingItem {
                scan_id: scan_id.to_string(),
                staging_path: album_dir.clone(),
                metadata_file: sidecar_path,
                artist_name: group.artist.clone(),
                album_name: group.album.clone(),
                track_count: sidecar.tracks.len() as i64,
                total_size: sidecar.total_size() as i64,
                metadata_checksum: checksum,
            };
            match repo.create(&item).await {
                Ok(created) => staged.staging_item_id = Some(created.id),
                Err(e) => {
                    error!(album = %group.album, error = %e, "Failed to persist staging item");
                    staged.errors.push(format!("staging item: {}", e));
                }
            }
        }

        info!(
            scan_id,
            album = %group.album,
            artist = %group.artist,
            moved = staged.files_moved,
            errors = staged.errors.len(),
            path = %album_dir.display(),
            "Staged album"
        );
        staged
    }

    async fn stage_file(
        &self,
        scan_id: &str,
        file: &ScannedFile,
        index: usize,
        album_dir: &Path,
        name: &str,
    ) -> FileOutcome {
        let source = file.file_path.clone();

        let hash_path = source.clone();
        let hashed = tokio::task::spawn_blocking(move || calculate_file_hash(&hash_path)).await;
        let current_hash = match hashed {
            Ok(Ok(hash)) => hash,
            Ok(Err(e)) => return self.fail_file(scan_id, file, e.to_string()).await,
            Err(e) => return self.fail_file(scan_id, file, e.to_string()).await,
        };

        if current_hash != file.content_hash {
            let message = format!(
                "{}: checksum mismatch (expected {}, found {})",
                source.display(),
                file.content_hash,
                current_hash
            );
            warn!(file = %source.display(), "Checksum changed since scan");

            if let (Some(quarantine), false) = (&self.quarantine, self.config.dry_run) {
                match quarantine
                    .quarantine(&source, QuarantineReason::ChecksumMismatch, &message, scan_id)
                    .await
                {
                    Ok(_) => return FileOutcome::Quarantined(message),
                    Err(e) => error!(file = %source.display(), error = %e, "Failed to quarantine file"),
                }
            }
            return FileOutcome::Failed(message);
        }

        let track = sidecar_track(file, index, name);
        if self.config.dry_run {
            return FileOutcome::Moved(track);
        }

        if let Some(bucket) = &self.bucket {
            if let Err(e) = bucket.acquire().await {
                return self.fail_file(scan_id, file, e.to_string()).await;
            }
        }

        let target = album_dir.join(name);
        let move_source = source.clone();
        let moved = tokio::task::spawn_blocking(move || move_file(&move_source, &target)).await;
        match moved {
            Ok(Ok(())) => {
                debug!(file = %source.display(), name, "Moved file to staging");
                FileOutcome::Moved(track)
            }
            Ok(Err(e)) => self.fail_file(scan_id, file, e.to_string()).await,
            Err(e) => self.fail_file(scan_id, file, e.to_string()).await,
        }
    }

    /// Record a per-file move failure; the file itself is left where it is
    async fn fail_file(&self, scan_id: &str, file: &ScannedFile, error: String) -> FileOutcome {
        let message = format!("{}: {}", file.file_path.display(), error);
        warn!(file = %file.file_path.display(), error = %error, "File move failed");

        if let (Some(quarantine), false) = (&self.quarantine, self.config.dry_run) {
            if let Err(e) = quarantine
                .record(&file.file_path, QuarantineReason::MoveFailure, &message, scan_id)
                .await
            {
                error!(file = %file.file_path.display(), error = %e, "Failed to record move failure");
            }
        }
        FileOutcome::Failed(message)
    }

    /// Reserve a file name inside the album, appending ` (n)` on clashes
    fn claim_file_name(&self, album_dir: &Path, name: String, used: &mut HashSet<String>) -> String {
        let taken = |candidate: &str, used: &HashSet<String>| {
            used.contains(candidate) || (!self.config.dry_run && album_dir.join(candidate).exists())
        };

        let mut candidate = name.clone();
        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) => (stem.to_string(), format!(".{}", ext)),
            None => (name.clone(), String::new()),
        };
        let mut n = 1;
        while taken(&candidate, &*used) {
            candidate = format!("{} ({}){}", stem, n, ext);
            n += 1;
        }

        used.insert(candidate.clone());
        candidate
    }
}

/// Album directory relative to the staging (and production) root
pub fn album_relative_dir(code: &str, artist: &str, year: u32, album: &str) -> PathBuf {
    PathBuf::from(sanitize_segment(code, "ZZ"))
        .join(sanitize_segment(artist, "Unknown Artist"))
        .join(format!(
            "{:04} - {}",
            year,
            sanitize_segment(album, "Unknown Album")
        ))
}

fn track_number(file: &ScannedFile, index: usize) -> u32 {
    file.tags
        .track_number
        .filter(|t| *t > 0)
        .unwrap_or(index as u32 + 1)
}

fn disc_number(file: &ScannedFile) -> u32 {
    file.tags.disc_number.filter(|d| *d > 0).unwrap_or(1)
}

/// `{track:02} - {title}.{ext}`, or `{disc}-{track:02} - {title}.{ext}` past the first disc
pub fn canonical_file_name(file: &ScannedFile, index: usize) -> String {
    let track = track_number(file, index);
    let disc = disc_number(file);
    let title = sanitize_segment(&file.display_title(), "Untitled");
    let ext = file.extension();

    let base = if disc > 1 {
        format!("{}-{:02} - {}", disc, track, title)
    } else {
        format!("{:02} - {}", track, title)
    };

    if ext.is_empty() {
        base
    } else {
        format!("{}.{}", base, ext)
    }
}

fn sidecar_track(file: &ScannedFile, index: usize, name: &str) -> SidecarTrack {
    SidecarTrack {
        track_number: track_number(file, index),
        disc_number: disc_number(file),
        name: file.display_title(),
        duration: file.tags.duration,
        file_path: name.to_string(),
        file_size: file.file_size,
        bitrate: file.tags.bitrate,
        sample_rate: file.tags.sample_rate,
        checksum: file.content_hash.clone(),
        original_path: file.file_path.to_string_lossy().to_string(),
    }
}
