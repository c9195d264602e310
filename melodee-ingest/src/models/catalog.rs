//! Production catalog rows written by promotion

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Album {
    pub id: i64,
    pub artist_id: i64,
    pub name: String,
    pub year: Option<u32>,
    /// Path relative to the production library root, unique
    pub directory: String,
    pub track_count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: i64,
    pub album_id: i64,
    pub artist_id: i64,
    pub title: String,
    pub track_number: u32,
    pub disc_number: u32,
    pub duration: Option<f64>,
    /// Path relative to the production library root
    pub file_path: String,
    pub file_size: i64,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub checksum: String,
}
