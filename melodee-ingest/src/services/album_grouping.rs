//! Album grouping engine
//!
//! Two deterministic stages over the valid rows of a scan ledger:
//!
//! 1. Normalization and hashing: `group_hash = normalize_artist(artist) + "::" +
//!    normalize_album(album)`, where the artist is the album artist when tagged,
//!    else the track artist.
//! 2. Year voting: the most frequent year among a hash cluster's members wins
//!    (ties go to the lowest year, no years gives 0) and
//!    `album_group_id = group_hash + "_" + year`.
//!
//! A hash cluster always yields exactly one group. Two releases sharing an
//! artist and normalized album name are not split by competing years.

use crate::db::ScanLedger;
use crate::models::{AlbumGroup, ScannedFile};
use melodee_common::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};

/// Bracketed remaster markers: "(Remastered)", "[2009 Remaster]", "{Remastered 2015}"
static BRACKETED_REMASTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)[\(\[\{][^\)\]\}]*\bremaster(?:ed)?\b[^\)\]\}]*[\)\]\}]")
        .expect("remaster pattern is valid")
});

/// Trailing dash form: "Abbey Road - Remastered 2009", "Help! - 2009 Remaster"
static TRAILING_REMASTER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\s+-\s+(?:\d{4}\s+)?(?:digital\s+)?remaster(?:ed)?(?:\s+\d{4})?(?:\s+version)?\s*$")
        .expect("remaster pattern is valid")
});

/// Leading article followed by any whitespace, including tabs and no-break spaces
static LEADING_ARTICLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^the\s+").expect("article pattern is valid"));

/// Group ids computed for one ledger row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAssignment {
    pub file_id: i64,
    pub group_hash: String,
    pub group_id: String,
}

/// Normalize an album name for grouping
pub fn normalize_album(album: &str) -> String {
    let lowered = album.to_lowercase();
    let stripped = BRACKETED_REMASTER.replace_all(&lowered, "");
    let stripped = TRAILING_REMASTER.replace(&stripped, "");
    let trimmed = stripped.trim();
    let without_article = LEADING_ARTICLE.replace(trimmed, "");
    strip_whitespace(&without_article)
}

/// Normalize an artist name: lowercase, no whitespace
pub fn normalize_artist(artist: &str) -> String {
    strip_whitespace(&artist.to_lowercase())
}

fn strip_whitespace(value: &str) -> String {
    value.chars().filter(|c| !c.is_whitespace()).collect()
}

pub fn group_hash(artist: &str, album: &str) -> String {
    format!("{}::{}", normalize_artist(artist), normalize_album(album))
}

pub fn group_id(group_hash: &str, year: u32) -> String {
    format!("{}_{}", group_hash, year)
}

/// Most frequent year; ties resolve to the lowest year; no years gives 0
pub fn vote_year<I>(years: I) -> u32
where
    I: IntoIterator<Item = Option<u32>>,
{
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for year in years.into_iter().flatten().filter(|y| *y > 0) {
        *counts.entry(year).or_insert(0) += 1;
    }

    let mut winner = (0u32, 0usize);
    // Ascending iteration with a strict comparison keeps the lowest year on ties
    for (year, count) in counts {
        if count > winner.1 {
            winner = (year, count);
        }
    }
    winner.0
}

/// Hash of one file, `None` when it lacks an artist or album
pub fn file_group_hash(file: &ScannedFile) -> Option<String> {
    let artist = file.tags.grouping_artist()?;
    let album = file.tags.album.as_deref().filter(|a| !a.trim().is_empty())?;
    Some(group_hash(artist, album))
}

/// Compute group ids for every valid file
///
/// Output is sorted by file id and does not depend on input order.
pub fn compute_assignments(files: &[ScannedFile]) -> Vec<GroupAssignment> {
    let mut clusters: HashMap<String, Vec<&ScannedFile>> = HashMap::new();
    for file in files.iter().filter(|f| f.is_valid) {
        if let Some(hash) = file_group_hash(file) {
            clusters.entry(hash).or_default().push(file);
        }
    }

    let mut assignments = Vec::with_capacity(files.len());
    for (hash, members) in clusters {
        let year = vote_year(members.iter().map(|f| f.tags.year));
        let id = group_id(&hash, year);
        for file in members {
            assignments.push(GroupAssignment {
                file_id: file.id,
                group_hash: hash.clone(),
                group_id: id.clone(),
            });
        }
    }

    assignments.sort_by_key(|a| a.file_id);
    assignments
}

/// Group every valid row of the ledger, persisting ids in one transaction
pub async fn group_ledger(ledger: &ScanLedger) -> Result<Vec<AlbumGroup>> {
    let files = ledger.load_valid().await?;
    let assignments = compute_assignments(&files);
    ledger.assign_groups(&assignments).await?;

    let groups = ledger.album_groups().await?;
    tracing::info!(
        scan_id = ledger.scan_id(),
        files = assignments.len(),
        groups = groups.len(),
        "Album grouping complete"
    );
    Ok(groups)
}

/// Build album groups from rows carrying a group id, sorted by group id
pub fn build_album_groups(files: Vec<ScannedFile>) -> Vec<AlbumGroup> {
    let mut by_id: BTreeMap<String, Vec<ScannedFile>> = BTreeMap::new();
    for file in files {
        if let Some(id) = file.album_group_id.clone() {
            by_id.entry(id).or_default().push(file);
        }
    }

    by_id
        .into_iter()
        .map(|(group_id, mut members)| {
            members.sort_by(|a, b| {
                member_order_key(a)
                    .cmp(&member_order_key(b))
                    .then_with(|| a.file_path.cmp(&b.file_path))
            });

            let group_hash = members
                .first()
                .and_then(|f| f.album_group_hash.clone())
                .unwrap_or_default();
            let year = year_from_group_id(&group_id)
                .unwrap_or_else(|| vote_year(members.iter().map(|f| f.tags.year)));
            let artist = most_common(members.iter().filter_map(|f| f.tags.grouping_artist()));
            let album = most_common(members.iter().filter_map(|f| f.tags.album.as_deref()));

            AlbumGroup {
                group_id,
                group_hash,
                artist,
                album,
                year,
                files: members,
            }
        })
        .collect()
}

fn member_order_key(file: &ScannedFile) -> (u32, u32) {
    (
        file.tags.disc_number.unwrap_or(1),
        file.tags.track_number.unwrap_or(0),
    )
}

fn year_from_group_id(group_id: &str) -> Option<u32> {
    group_id.rsplit_once('_').and_then(|(_, year)| year.parse().ok())
}

/// Most frequent trimmed spelling; ties go to the lexicographically smallest
fn most_common<'a, I>(values: I) -> String
where
    I: Iterator<Item = &'a str>,
{
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for value in values.map(str::trim).filter(|v| !v.is_empty()) {
        *counts.entry(value).or_insert(0) += 1;
    }

    let mut best: Option<(&str, usize)> = None;
    for (value, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((value, count));
        }
    }
    best.map(|(v, _)| v.to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AudioTags;
    use chrono::Utc;
    use std::path::PathBuf;

    fn file(id: i64, artist: &str, album: &str, year: Option<u32>, track: u32) -> ScannedFile {
        let mut f = ScannedFile::valid(
            PathBuf::from(format!("/inbound/{}.flac", id)),
            100,
            format!("hash{}", id),
            Utc::now(),
            AudioTags {
                artist: Some(artist.into()),
                album: Some(album.into()),
                year,
                track_number: Some(track),
                ..Default::default()
            },
        );
        f.id = id;
        f
    }

    #[test]
    fn test_normalize_album_variants_collapse() {
        let expected = normalize_album("Led Zeppelin IV");
        assert_eq!(expected, "ledzeppeliniv");
        assert_eq!(normalize_album("led zeppelin iv"), expected);
        assert_eq!(normalize_album("Led   Zeppelin IV  (Remaster)"), expected);
        assert_eq!(normalize_album("Led Zeppelin IV [2014 Remastered]"), expected);
        assert_eq!(normalize_album("Led Zeppelin IV {Remastered}"), expected);
        assert_eq!(normalize_album("Led Zeppelin IV - Remastered 2014"), expected);
    }

    #[test]
    fn test_normalize_album_strips_leading_article_only() {
        assert_eq!(normalize_album("The White Album"), "whitealbum");
        assert_eq!(normalize_album("Meet The Beatles"), "meetthebeatles");
        assert_eq!(normalize_album("Theater"), "theater");
        // Tag noise around the article
        assert_eq!(normalize_album("The\tWall"), "wall");
        assert_eq!(normalize_album("The\u{a0}Wall"), "wall");
        assert_eq!(normalize_album("THE  Wall"), "wall");
        // Non-remaster brackets are kept
        assert_eq!(normalize_album("Abbey Road (Deluxe)"), "abbeyroad(deluxe)");
    }

    #[test]
    fn test_normalize_artist() {
        assert_eq!(normalize_artist("The  Beatles "), "thebeatles");
        assert_eq!(group_hash("The Beatles", "Abbey Road"), "thebeatles::abbeyroad");
    }

    #[test]
    fn test_vote_year() {
        assert_eq!(vote_year([Some(1971), Some(1971), Some(1994)]), 1971);
        assert_eq!(vote_year([Some(1994), Some(1971)]), 1971);
        assert_eq!(vote_year([Some(1994), Some(1994), Some(1971)]), 1994);
        assert_eq!(vote_year([None, None]), 0);
        assert_eq!(vote_year(Vec::<Option<u32>>::new()), 0);
        assert_eq!(vote_year([None, Some(2001)]), 2001);
    }

    #[test]
    fn test_assignments_are_order_invariant() {
        let files = vec![
            file(1, "Led Zeppelin", "Led Zeppelin IV", Some(1971), 1),
            file(2, "Led Zeppelin", "led zeppelin iv", Some(1971), 2),
            file(3, "Led Zeppelin", "Led   Zeppelin IV  (Remaster)", Some(1994), 3),
            file(4, "Led Zeppelin", "Houses of the Holy", Some(1973), 1),
        ];
        let mut reversed = files.clone();
        reversed.reverse();

        let forward = compute_assignments(&files);
        assert_eq!(forward, compute_assignments(&reversed));

        let iv: Vec<_> = forward.iter().filter(|a| a.file_id <= 3).collect();
        assert!(iv.iter().all(|a| a.group_id == "ledzeppelin::ledzeppeliniv_1971"));
        assert_eq!(forward[3].group_id, "ledzeppelin::housesoftheholy_1973");
    }

    #[test]
    fn test_invalid_and_untagged_files_are_skipped() {
        let mut untagged = file(2, "X", "Y", None, 1);
        untagged.tags.album = None;
        let invalid = file(3, "X", "Y", None, 1)
            .into_invalid(crate::models::ExtractionFailure::TagParse, "bad");

        let assignments = compute_assignments(&[file(1, "X", "Y", None, 1), untagged, invalid]);
        assert_eq!(assignments.len(), 1);
        assert_eq!(assignments[0].group_id, "x::y_0");
    }

    #[test]
    fn test_build_groups_orders_members_and_picks_display_names() {
        let mut files = vec![
            file(1, "The Beatles", "Abbey Road", Some(1969), 2),
            file(2, "The Beatles", "abbey road", Some(1969), 1),
            file(3, "The Beatles", "Abbey Road", Some(1969), 3),
        ];
        for a in compute_assignments(&files) {
            let f = files.iter_mut().find(|f| f.id == a.file_id).unwrap();
            f.album_group_hash = Some(a.group_hash);
            f.album_group_id = Some(a.group_id);
        }

        let groups = build_album_groups(files);
        assert_eq!(groups.len(), 1);
        let group = &groups[0];
        assert_eq!(group.group_id, "thebeatles::abbeyroad_1969");
        assert_eq!(group.year, 1969);
        assert_eq!(group.artist, "The Beatles");
        assert_eq!(group.album, "Abbey Road");
        let tracks: Vec<_> = group.files.iter().map(|f| f.tags.track_number).collect();
        assert_eq!(tracks, vec![Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn test_most_common_tie_breaks_lexicographically() {
        assert_eq!(most_common(["b", "a"].into_iter()), "a");
        assert_eq!(most_common(["b", "a", "b"].into_iter()), "b");
        assert_eq!(most_common(std::iter::empty()), "");
    }

    #[tokio::test]
    async fn test_group_ledger_persists_ids() {
        let ledger = ScanLedger::open_in_memory("scan_test").await.unwrap();
        for (i, year) in [Some(1971), Some(1971), Some(1994)].into_iter().enumerate() {
            let mut f = file(0, "Led Zeppelin", "Led Zeppelin IV", year, i as u32 + 1);
            f.file_path = PathBuf::from(format!("/inbound/{}.flac", i));
            ledger.insert_file(&f).await.unwrap();
        }

        let groups = group_ledger(&ledger).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].track_count(), 3);
        assert_eq!(groups[0].year, 1971);

        let rows = ledger.load_valid().await.unwrap();
        assert!(rows
            .iter()
            .all(|r| r.album_group_id.as_deref() == Some("ledzeppelin::ledzeppeliniv_1971")));
    }
}
