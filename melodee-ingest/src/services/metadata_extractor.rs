//! Audio metadata extraction
//!
//! Reads one file's container and tag data with lofty, hashes its contents and
//! validates it. Extraction never fails outright: problems produce an invalid
//! [`ScannedFile`] carrying the failure class and message so the scan continues.

use crate::models::{AudioTags, ExtractionFailure, ScannedFile};
use chrono::{DateTime, Utc};
use lofty::file::{FileType, TaggedFileExt};
use lofty::prelude::*;
use lofty::probe::Probe;
use lofty::tag::{ItemKey, Tag};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Metadata extraction errors
#[derive(Debug, Error)]
pub enum MetadataError {
    /// lofty could not parse the container or its tags
    #[error("Failed to read tags: {0}")]
    ReadError(String),

    /// Magic bytes do not match a supported audio container
    #[error("Unsupported container: {0}")]
    UnsupportedFormat(String),

    /// No tag block found in the file
    #[error("No metadata found")]
    NoMetadata,

    /// Tag present but a required field is empty
    #[error("Missing required tag: {0}")]
    MissingTag(&'static str),

    /// I/O error (file read)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl MetadataError {
    /// Failure class recorded in the ledger
    pub fn failure_kind(&self) -> ExtractionFailure {
        match self {
            MetadataError::UnsupportedFormat(_) => ExtractionFailure::UnsupportedContainer,
            MetadataError::ReadError(_)
            | MetadataError::NoMetadata
            | MetadataError::MissingTag(_) => ExtractionFailure::TagParse,
            MetadataError::IoError(_) => ExtractionFailure::Unreadable,
        }
    }
}

/// Metadata extractor service
#[derive(Debug, Default, Clone, Copy)]
pub struct MetadataExtractor {}

impl MetadataExtractor {
    pub fn new() -> Self {
        Self {}
    }

    /// Extract one file into a ledger row
    ///
    /// Size, modification time and hash are filled in whenever the file is readable,
    /// even if tag parsing later fails.
    pub fn extract(&self, file_path: &Path) -> ScannedFile {
        let placeholder = ScannedFile::valid(
            file_path.to_path_buf(),
            0,
            String::new(),
            Utc::now(),
            AudioTags::default(),
        );

        let fs_meta = match std::fs::metadata(file_path) {
            Ok(m) => m,
            Err(e) => {
                return placeholder.into_invalid(ExtractionFailure::Unreadable, e.to_string());
            }
        };

        let modified_time = fs_meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        let content_hash = match calculate_file_hash(file_path) {
            Ok(hash) => hash,
            Err(e) => {
                return ScannedFile {
                    file_size: fs_meta.len(),
                    modified_time,
                    ..placeholder
                }
                .into_invalid(ExtractionFailure::Unreadable, e.to_string());
            }
        };

        let mut file = ScannedFile::valid(
            file_path.to_path_buf(),
            fs_meta.len(),
            content_hash,
            modified_time,
            AudioTags::default(),
        );

        match self.read_tags(file_path) {
            Ok(tags) => {
                let missing = required_tag_missing(&tags);
                file.tags = tags;
                if let Some(field) = missing {
                    let err = MetadataError::MissingTag(field);
                    file = file.into_invalid(err.failure_kind(), err.to_string());
                }
            }
            Err(err) => {
                file = file.into_invalid(err.failure_kind(), err.to_string());
            }
        }

        if !file.is_valid {
            tracing::debug!(
                file = %file_path.display(),
                error = ?file.error_message,
                "File failed validation"
            );
        }

        file
    }

    /// Parse container properties and tags
    pub fn read_tags(&self, file_path: &Path) -> Result<AudioTags, MetadataError> {
        verify_container(file_path)?;

        let tagged_file = Probe::open(file_path)
            .map_err(|e| MetadataError::ReadError(e.to_string()))?
            .read()
            .map_err(|e| MetadataError::ReadError(e.to_string()))?;

        let properties = tagged_file.properties();
        let duration = properties.duration().as_secs_f64();

        let mut tags = AudioTags {
            duration: (duration > 0.0).then_some(duration),
            // lofty reports bitrates in kbps already
            bitrate: properties.audio_bitrate().or_else(|| properties.overall_bitrate()),
            sample_rate: properties.sample_rate(),
            ..Default::default()
        };

        let tag = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
            .ok_or(MetadataError::NoMetadata)?;

        tags.artist = clean(tag.artist().map(|s| s.to_string()));
        tags.album_artist = clean(tag.get_string(&ItemKey::AlbumArtist).map(str::to_string));
        tags.album = clean(tag.album().map(|s| s.to_string()));
        tags.title = clean(tag.title().map(|s| s.to_string()));
        tags.genre = clean(tag.genre().map(|s| s.to_string()));
        tags.track_number = tag.track();
        tags.disc_number = tag.disk();
        tags.year = tag_year(tag);

        tracing::trace!(
            file = %file_path.display(),
            format = format_name(tagged_file.file_type()),
            artist = ?tags.artist,
            album = ?tags.album,
            year = ?tags.year,
            "Extracted metadata"
        );

        Ok(tags)
    }
}

/// Human-readable container name, for reports
pub fn format_name(file_type: FileType) -> &'static str {
    match file_type {
        FileType::Mpeg => "MP3",
        FileType::Flac => "FLAC",
        FileType::Opus => "Opus",
        FileType::Vorbis => "OGG Vorbis",
        FileType::Aac => "AAC",
        FileType::Mp4 => "MP4",
        FileType::Aiff => "AIFF",
        FileType::Wav => "WAV",
        FileType::WavPack => "WavPack",
        FileType::Ape => "APE",
        _ => "Unknown",
    }
}

fn clean(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required_tag_missing(tags: &AudioTags) -> Option<&'static str> {
    if tags.grouping_artist().is_none() {
        Some("artist")
    } else if tags.album.is_none() {
        Some("album")
    } else {
        None
    }
}

/// Year from the tag, falling back to the first four digits of date items
fn tag_year(tag: &Tag) -> Option<u32> {
    tag.year().filter(|y| *y > 0).or_else(|| {
        [
            ItemKey::Year,
            ItemKey::RecordingDate,
            ItemKey::OriginalReleaseDate,
        ]
        .iter()
        .filter_map(|key| tag.get_string(key))
        .find_map(parse_year)
    })
}

/// Parse a leading four-digit year out of strings like "1969", "1969-09-26"
pub fn parse_year(value: &str) -> Option<u32> {
    let digits: String = value.trim().chars().take(4).collect();
    if digits.len() == 4 && digits.chars().all(|c| c.is_ascii_digit()) {
        digits.parse().ok().filter(|y| *y > 0)
    } else {
        None
    }
}

/// Calculate SHA-256 hash of file contents, reading in 1MB chunks
pub fn calculate_file_hash(file_path: &Path) -> std::io::Result<String> {
    let mut file = File::open(file_path)?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 1024 * 1024];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Check the file starts with a known audio container signature
pub fn verify_container(path: &Path) -> Result<(), MetadataError> {
    let mut file = File::open(path)?;
    let mut buffer = [0u8; 12];
    let bytes_read = file.read(&mut buffer)?;

    if is_audio_signature(&buffer[..bytes_read]) {
        Ok(())
    } else {
        Err(MetadataError::UnsupportedFormat(format!(
            "{} does not look like an audio file",
            path.display()
        )))
    }
}

fn is_audio_signature(header: &[u8]) -> bool {
    if header.len() < 4 {
        return false;
    }

    match header {
        // MP3 frame sync / ID3v2
        [0xFF, 0xFB, ..] | [0xFF, 0xF3, ..] | [0xFF, 0xF2, ..] | [0xFF, 0xFA, ..] => true,
        [b'I', b'D', b'3', ..] => true,
        // ADTS AAC
        [0xFF, 0xF1, ..] | [0xFF, 0xF9, ..] => true,
        [b'f', b'L', b'a', b'C', ..] => true,
        [b'O', b'g', b'g', b'S', ..] => true,
        // MP4 / M4A
        [_, _, _, _, b'f', b't', b'y', b'p', ..] => true,
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E'] => true,
        [b'F', b'O', b'R', b'M', _, _, _, _, b'A', b'I', b'F', _] => true,
        [b'w', b'v', b'p', b'k', ..] => true,
        [b'M', b'A', b'C', b' ', ..] => true,
        // ASF (WMA)
        [0x30, 0x26, 0xB2, 0x75, ..] => true,
        _ => false,
    }
}
