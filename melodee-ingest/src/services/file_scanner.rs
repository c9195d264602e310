//! Inbound audio file scanner
//!
//! Two stages:
//! - discovery: sequential directory walk with symlink loop detection and
//!   extension filtering ([`FileScanner`])
//! - extraction: a bounded pool of workers reading metadata on the blocking
//!   pool, feeding a single writer that owns every ledger insert ([`InboundScanner`])

use crate::db::ScanLedger;
use crate::models::{AudioTags, ExtractionFailure, ScannedFile};
use crate::services::metadata_extractor::MetadataExtractor;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use walkdir::{DirEntry, WalkDir};

/// Extensions considered audio during discovery
pub const AUDIO_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "oga", "opus", "m4a", "aac", "mp4", "wav", "wma", "aiff", "aif", "wv",
    "ape",
];

/// Audio file scanner errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// Specified path does not exist
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    /// Path exists but is not a directory
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Ledger could not be written; the scan stops
    #[error("Ledger error: {0}")]
    Ledger(#[from] melodee_common::Error),

    /// Discovery task failed
    #[error("Scan task failed: {0}")]
    Task(String),
}

impl From<ScanError> for melodee_common::Error {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::PathNotFound(path) => {
                melodee_common::Error::NotFound(format!("Path not found: {}", path.display()))
            }
            ScanError::NotADirectory(path) => {
                melodee_common::Error::InvalidInput(format!("Not a directory: {}", path.display()))
            }
            ScanError::Ledger(e) => e,
            ScanError::Task(msg) => melodee_common::Error::Internal(msg),
        }
    }
}

/// Outcome of one scan run
#[derive(Debug, Clone, PartialEq)]
pub struct ScanStats {
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub elapsed: Duration,
    pub files_per_second: f64,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

/// Audio file discovery
#[derive(Debug, Clone)]
pub struct FileScanner {
    ignore_patterns: Vec<String>,
}

impl FileScanner {
    /// Scanner ignoring system and NAS metadata entries
    pub fn new() -> Self {
        Self {
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                "desktop.ini".to_string(),
                ".git".to_string(),
                ".svn".to_string(),
                "@eaDir".to_string(),
            ],
        }
    }

    /// Validate the scan root
    pub fn check_root(root_path: &Path) -> Result<(), ScanError> {
        if !root_path.exists() {
            return Err(ScanError::PathNotFound(root_path.to_path_buf()));
        }
        if !root_path.is_dir() {
            return Err(ScanError::NotADirectory(root_path.to_path_buf()));
        }
        Ok(())
    }

    /// Walk `root_path` and return audio candidates sorted by path
    ///
    /// Container validity is not checked here: a file with an audio extension
    /// but foreign bytes becomes an invalid ledger row during extraction.
    pub fn discover(&self, root_path: &Path) -> Result<Vec<PathBuf>, ScanError> {
        Self::check_root(root_path)?;

        let mut symlink_visited = HashSet::new();
        let mut files = Vec::new();

        let walker = WalkDir::new(root_path)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| self.should_process_entry(e, &mut symlink_visited));

        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && is_audio_extension(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error accessing entry");
                }
            }
        }

        files.sort();
        tracing::debug!(
            root = %root_path.display(),
            candidates = files.len(),
            "Discovery complete"
        );
        Ok(files)
    }

    fn should_process_entry(&self, entry: &DirEntry, symlink_visited: &mut HashSet<PathBuf>) -> bool {
        if entry.depth() == 0 {
            return true;
        }

        let file_name = entry.file_name().to_string_lossy();

        // AppleDouble resource forks
        if file_name.starts_with("._") {
            return false;
        }
        if self.ignore_patterns.iter().any(|p| file_name == p.as_str()) {
            return false;
        }

        if entry.file_type().is_symlink() {
            if let Ok(canonical) = entry.path().canonicalize() {
                if !symlink_visited.insert(canonical) {
                    tracing::warn!(path = %entry.path().display(), "Symlink loop detected");
                    return false;
                }
            }
        }

        true
    }
}

impl Default for FileScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn is_audio_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.as_str()))
}

/// Concurrent scan of an inbound directory into a ledger
pub struct InboundScanner {
    discovery: FileScanner,
    extractor: MetadataExtractor,
    workers: usize,
}

impl InboundScanner {
    pub fn new(workers: usize) -> Self {
        Self {
            discovery: FileScanner::new(),
            extractor: MetadataExtractor::new(),
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Scan `root_path`, writing one ledger row per discovered file
    ///
    /// Root problems fail before any work. A ledger write failure stops the
    /// run; rows already written stay. Cancellation is honored between files.
    pub async fn scan(
        &self,
        root_path: &Path,
        ledger: &ScanLedger,
        cancel: &CancellationToken,
    ) -> Result<ScanStats, ScanError> {
        FileScanner::check_root(root_path)?;
        let start = Instant::now();

        ledger.record_run_start(root_path).await?;

        let discovery = self.discovery.clone();
        let root = root_path.to_path_buf();
        let files = tokio::task::spawn_blocking(move || discovery.discover(&root))
            .await
            .map_err(|e| ScanError::Task(e.to_string()))??;
        let discovered = files.len();
        tracing::info!(
            scan_id = ledger.scan_id(),
            root = %root_path.display(),
            files = discovered,
            workers = self.workers,
            "Starting extraction"
        );

        let (tx, mut rx) = mpsc::channel::<ScannedFile>(self.workers * 4);
        let extractor = self.extractor;
        let workers = self.workers;

        let producer = async move {
            let mut results = stream::iter(files)
                .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
                .map(|path| extract_blocking(extractor, path))
                .buffer_unordered(workers);

            while let Some(file) = results.next().await {
                if tx.send(file).await.is_err() {
                    // Writer stopped after a ledger failure
                    break;
                }
            }
        };

        // Owns the receiver: when an insert fails, the producer's next send errors out
        let writer = async move {
            let mut valid = 0usize;
            let mut invalid = 0usize;

            while let Some(file) = rx.recv().await {
                ledger.insert_file(&file).await?;
                if file.is_valid {
                    valid += 1;
                } else {
                    invalid += 1;
                }

                let written = valid + invalid;
                if written % 100 == 0 {
                    tracing::info!(
                        scan_id = ledger.scan_id(),
                        written,
                        total = discovered,
                        "Scan progress"
                    );
                }
            }

            Ok::<_, melodee_common::Error>((valid, invalid))
        };

        let ((), written) = tokio::join!(producer, writer);
        let (valid_files, invalid_files) = match written {
            Ok(counts) => counts,
            Err(e) => {
                tracing::error!(scan_id = ledger.scan_id(), error = %e, "Ledger write failed, aborting scan");
                return Err(ScanError::Ledger(e));
            }
        };

        let total_files = valid_files + invalid_files;
        let cancelled = cancel.is_cancelled() && total_files < discovered;
        ledger
            .record_run_finish(total_files, valid_files, invalid_files, cancelled)
            .await?;

        let elapsed = start.elapsed();
        let files_per_second = if elapsed.as_secs_f64() > 0.0 {
            total_files as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        tracing::info!(
            scan_id = ledger.scan_id(),
            total_files,
            valid_files,
            invalid_files,
            cancelled,
            elapsed_ms = elapsed.as_millis() as u64,
            "Scan complete"
        );

        Ok(ScanStats {
            total_files,
            valid_files,
            invalid_files,
            elapsed,
            files_per_second,
            cancelled,
        })
    }
}

/// Run extraction on the blocking pool; a panicking extractor yields an invalid row
async fn extract_blocking(extractor: MetadataExtractor, path: PathBuf) -> ScannedFile {
    let task_path = path.clone();
    match tokio::task::spawn_blocking(move || extractor.extract(&task_path)).await {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(file = %path.display(), error = %e, "Extraction task failed");
            ScannedFile::valid(path, 0, String::new(), Utc::now(), AudioTags::default())
                .into_invalid(ExtractionFailure::Unreadable, format!("extraction task failed: {}", e))
        }
    }
}
