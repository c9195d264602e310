//! `album.melodee.json` sidecar written next to every staged album

use super::StagingStatus;
use melodee_common::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// File name of the sidecar inside a staged album directory
pub const SIDECAR_FILE_NAME: &str = "album.melodee.json";

/// Sidecar schema version
pub const SIDECAR_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbumSidecar {
    pub version: String,
    pub scan_id: String,
    pub artist: SidecarArtist,
    pub album: SidecarAlbum,
    pub tracks: Vec<SidecarTrack>,
    pub status: StagingStatus,
    /// False when one or more files of the album failed to move
    #[serde(default = "default_true")]
    pub is_valid: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarArtist {
    pub name: String,
    pub directory_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarAlbum {
    pub name: String,
    pub year: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarTrack {
    pub track_number: u32,
    pub disc_number: u32,
    pub name: String,
    /// Seconds
    pub duration: Option<f64>,
    /// Path relative to the album directory
    pub file_path: String,
    pub file_size: u64,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    /// SHA-256 of the audio file
    pub checksum: String,
    /// Inbound location before the move
    pub original_path: String,
}

fn default_true() -> bool {
    true
}

impl AlbumSidecar {
    pub fn new(scan_id: &str, artist: SidecarArtist, album: SidecarAlbum) -> Self {
        Self {
            version: SIDECAR_VERSION.to_string(),
            scan_id: scan_id.to_string(),
            artist,
            album,
            tracks: Vec::new(),
            status: StagingStatus::PendingReview,
            is_valid: true,
            errors: Vec::new(),
        }
    }

    /// Record a per-file failure; the album stays staged but is flagged invalid
    pub fn record_error(&mut self, error: impl Into<String>) {
        self.is_valid = false;
        self.errors.push(error.into());
    }

    pub fn total_size(&self) -> u64 {
        self.tracks.iter().map(|t| t.file_size).sum()
    }

    /// Serialized form (pretty-printed JSON)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Checksum of the serialized form
    pub fn checksum(&self) -> Result<String> {
        Ok(checksum_bytes(&self.to_bytes()?))
    }

    /// Write into `album_dir`, returning the sidecar path and checksum of the bytes written
    pub fn write_to(&self, album_dir: &Path) -> Result<(PathBuf, String)> {
        let bytes = self.to_bytes()?;
        let path = album_dir.join(SIDECAR_FILE_NAME);
        std::fs::write(&path, &bytes)?;
        Ok((path, checksum_bytes(&bytes)))
    }

    /// Read a sidecar file, returning it with the checksum of the bytes on disk
    pub fn read_from(path: &Path) -> Result<(Self, String)> {
        let bytes = std::fs::read(path)?;
        let sidecar = Self::from_bytes(&bytes)?;
        Ok((sidecar, checksum_bytes(&bytes)))
    }
}

/// SHA-256 hex digest
pub fn checksum_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
