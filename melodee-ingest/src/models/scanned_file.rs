//! Scan ledger row model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Why a discovered file failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionFailure {
    /// Magic bytes do not match a supported audio container
    UnsupportedContainer,
    /// Container readable but tags missing or unparseable
    TagParse,
    /// File could not be read at all
    Unreadable,
}

impl ExtractionFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionFailure::UnsupportedContainer => "unsupported_container",
            ExtractionFailure::TagParse => "tag_parse",
            ExtractionFailure::Unreadable => "unreadable",
        }
    }
}

impl FromStr for ExtractionFailure {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unsupported_container" => Ok(ExtractionFailure::UnsupportedContainer),
            "tag_parse" => Ok(ExtractionFailure::TagParse),
            "unreadable" => Ok(ExtractionFailure::Unreadable),
            other => Err(format!("unknown extraction failure: {}", other)),
        }
    }
}

/// Tag and stream properties read from one audio file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioTags {
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub title: Option<String>,
    pub track_number: Option<u32>,
    pub disc_number: Option<u32>,
    pub year: Option<u32>,
    pub genre: Option<String>,
    /// Duration in seconds
    pub duration: Option<f64>,
    /// Bitrate in kbps
    pub bitrate: Option<u32>,
    /// Sample rate in Hz
    pub sample_rate: Option<u32>,
}

impl AudioTags {
    /// Artist used for album grouping: album artist first, then track artist
    pub fn grouping_artist(&self) -> Option<&str> {
        self.album_artist
            .as_deref()
            .filter(|a| !a.trim().is_empty())
            .or_else(|| self.artist.as_deref().filter(|a| !a.trim().is_empty()))
    }
}

/// One discovered file in the scan ledger
///
/// Created by the scanner, mutated once by the grouping engine to attach
/// `album_group_hash` / `album_group_id`, immutable afterward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedFile {
    /// Ledger row id (0 until inserted)
    pub id: i64,
    /// Absolute path, unique within a ledger
    pub file_path: PathBuf,
    pub file_size: u64,
    /// SHA-256 hex digest of the file contents (empty if unreadable)
    pub content_hash: String,
    pub modified_time: DateTime<Utc>,
    pub tags: AudioTags,
    pub is_valid: bool,
    pub error_kind: Option<ExtractionFailure>,
    pub error_message: Option<String>,
    pub album_group_hash: Option<String>,
    pub album_group_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ScannedFile {
    /// Valid row for a successfully extracted file
    pub fn valid(
        file_path: PathBuf,
        file_size: u64,
        content_hash: String,
        modified_time: DateTime<Utc>,
        tags: AudioTags,
    ) -> Self {
        Self {
            id: 0,
            file_path,
            file_size,
            content_hash,
            modified_time,
            tags,
            is_valid: true,
            error_kind: None,
            error_message: None,
            album_group_hash: None,
            album_group_id: None,
            created_at: Utc::now(),
        }
    }

    /// Mark this row invalid, keeping whatever was extracted so far
    pub fn into_invalid(mut self, kind: ExtractionFailure, message: impl Into<String>) -> Self {
        self.is_valid = false;
        self.error_kind = Some(kind);
        self.error_message = Some(message.into());
        self
    }

    /// Lowercase file extension, empty if none
    pub fn extension(&self) -> String {
        self.file_path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }

    /// Title tag, falling back to the file stem
    pub fn display_title(&self) -> String {
        self.tags
            .title
            .clone()
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| file_stem(&self.file_path))
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "Untitled".to_string())
}
