//! Data models for the ingest pipeline
//!
//! Plain data structs; persistence lives in [`crate::db`].

pub mod album_group;
pub mod catalog;
pub mod quarantine;
pub mod scanned_file;
pub mod sidecar;
pub mod staging;

pub use album_group::AlbumGroup;
pub use catalog::{Album, Track};
pub use quarantine::{QuarantineFilter, QuarantineReason, QuarantineRecord};
pub use scanned_file::{AudioTags, ExtractionFailure, ScannedFile};
pub use sidecar::{AlbumSidecar, SidecarAlbum, SidecarArtist, SidecarTrack, SIDECAR_FILE_NAME};
pub use staging::{
    InvalidTransition, NewStagingItem, StagingAction, StagingItem, StagingStats, StagingStatus,
    Transition,
};

use serde::Serialize;

/// One page of a paginated listing
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Matching rows across all pages
    pub total: i64,
    /// 1-based page number
    pub page: u32,
    pub per_page: u32,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u32 {
        if self.per_page == 0 {
            return 0;
        }
        ((self.total.max(0) as u64 + self.per_page as u64 - 1) / self.per_page as u64) as u32
    }
}

/// Clamp user-supplied paging to sane bounds, returning (page, per_page, offset)
pub fn normalize_paging(page: u32, per_page: u32) -> (u32, u32, i64) {
    let page = page.max(1);
    let per_page = per_page.clamp(1, 500);
    (page, per_page, (page as i64 - 1) * per_page as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paging() {
        assert_eq!(normalize_paging(0, 0), (1, 1, 0));
        assert_eq!(normalize_paging(3, 20), (3, 20, 40));
        assert_eq!(normalize_paging(1, 10_000), (1, 500, 0));

        let page: Page<()> = Page {
            items: vec![],
            total: 41,
            page: 1,
            per_page: 20,
        };
        assert_eq!(page.total_pages(), 3);
    }
}
