//! Tagged audio fixtures
//!
//! Short WAV files written with hound, then tagged with an ID3v2 block via lofty
//! so the extractor sees them as regular inbound tracks.

use lofty::config::WriteOptions;
use lofty::prelude::*;
use lofty::tag::{ItemKey, Tag, TagType};
use std::path::{Path, PathBuf};

/// Tags written into a generated track
#[derive(Debug, Clone)]
pub struct TrackTags {
    pub artist: String,
    pub album_artist: Option<String>,
    pub album: String,
    pub title: String,
    pub track: u32,
    pub disc: Option<u32>,
    pub year: Option<u32>,
}

impl TrackTags {
    pub fn new(artist: &str, album: &str, title: &str, track: u32) -> Self {
        Self {
            artist: artist.to_string(),
            album_artist: None,
            album: album.to_string(),
            title: title.to_string(),
            track,
            disc: None,
            year: None,
        }
    }

    pub fn year(mut self, year: u32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn disc(mut self, disc: u32) -> Self {
        self.disc = Some(disc);
        self
    }

    pub fn album_artist(mut self, album_artist: &str) -> Self {
        self.album_artist = Some(album_artist.to_string());
        self
    }
}

/// Write a 0.2 s mono tone; `seed` varies the pitch so file contents differ
pub fn generate_wav(path: &Path, seed: u32) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = hound::WavWriter::create(path, spec)?;
    let freq = 220.0 + 20.0 * seed as f32;
    let total_samples = spec.sample_rate as usize / 5;
    for i in 0..total_samples {
        let t = i as f32 / spec.sample_rate as f32;
        let sample = (0.3 * (2.0 * std::f32::consts::PI * freq * t).sin() * i16::MAX as f32) as i16;
        writer.write_sample(sample)?;
    }

    writer.finalize()?;
    Ok(path.to_path_buf())
}

/// Generate a WAV file and tag it
pub fn generate_tagged_wav(path: &Path, tags: &TrackTags) -> anyhow::Result<PathBuf> {
    generate_wav(path, tags.track + 10 * tags.disc.unwrap_or(1))?;

    let mut tag = Tag::new(TagType::Id3v2);
    tag.set_artist(tags.artist.clone());
    tag.set_album(tags.album.clone());
    tag.set_title(tags.title.clone());
    tag.set_track(tags.track);
    if let Some(disc) = tags.disc {
        tag.set_disk(disc);
    }
    if let Some(album_artist) = &tags.album_artist {
        tag.insert_text(ItemKey::AlbumArtist, album_artist.clone());
    }
    if let Some(year) = tags.year {
        tag.insert_text(ItemKey::RecordingDate, year.to_string());
    }

    tag.save_to_path(path, WriteOptions::default())?;
    Ok(path.to_path_buf())
}

/// Write `titles.len()` tracks of one album into `dir`, numbered from 1
pub fn generate_album(
    dir: &Path,
    artist: &str,
    album: &str,
    year: u32,
    titles: &[&str],
) -> anyhow::Result<Vec<PathBuf>> {
    titles
        .iter()
        .enumerate()
        .map(|(i, title)| {
            let track = i as u32 + 1;
            let path = dir.join(format!("track{:02}.wav", track));
            generate_tagged_wav(&path, &TrackTags::new(artist, album, title, track).year(year))
        })
        .collect()
}
