//! Album group view over ledger rows

use super::ScannedFile;

/// Files believed to belong to one album release
///
/// Derived from ledger rows sharing an `album_group_id`; never stored on its own.
#[derive(Debug, Clone, PartialEq)]
pub struct AlbumGroup {
    /// `group_hash + "_" + voted_year`
    pub group_id: String,
    /// `normalized_artist + "::" + normalized_album`
    pub group_hash: String,
    /// Display artist (most common spelling among members)
    pub artist: String,
    /// Display album (most common spelling among members)
    pub album: String,
    /// Voted year, 0 when no member carries a year
    pub year: u32,
    /// Members ordered by disc, track, path
    pub files: Vec<ScannedFile>,
}

impl AlbumGroup {
    pub fn track_count(&self) -> usize {
        self.files.len()
    }

    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.file_size).sum()
    }
}
