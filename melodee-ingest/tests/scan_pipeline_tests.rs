//! Scan → group → stage, end to end over generated audio

mod helpers;

use helpers::{generate_album, generate_tagged_wav, generate_wav, scan_inbound, TrackTags};
use melodee_ingest::db::{QuarantineRepository, ScanLedger, StagingRepository};
use melodee_ingest::models::{
    AlbumSidecar, QuarantineFilter, QuarantineReason, StagingStatus, SIDECAR_FILE_NAME,
};
use melodee_ingest::services::{
    group_ledger, DirectoryCodeGenerator, Processor, ProcessorConfig, QuarantineService, RunOutcome,
};
use std::collections::BTreeMap;
use std::fs;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_abbey_road_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let inbound = temp_dir.path().join("inbound");
    let come_together = generate_tagged_wav(
        &inbound.join("cd1/come_together.wav"),
        &TrackTags::new("The Beatles", "Abbey Road", "Come Together", 1).year(1969),
    )
    .unwrap();
    let something = generate_tagged_wav(
        &inbound.join("misc/something.wav"),
        &TrackTags::new("The Beatles", "Abbey Road", "Something", 2).year(1969),
    )
    .unwrap();

    let (ledger, stats) = scan_inbound(&inbound, &temp_dir.path().join("scans"))
        .await
        .unwrap();
    assert_eq!(stats.total_files, 2);
    assert_eq!(stats.valid_files, 2);
    assert!(!stats.cancelled);
    assert_eq!(ledger.count_files().await.unwrap(), 2);

    let groups = group_ledger(&ledger).await.unwrap();
    assert_eq!(groups.len(), 1);
    let group = &groups[0];
    assert_eq!(group.track_count(), 2);
    assert_eq!(group.artist, "The Beatles");
    assert_eq!(group.album, "Abbey Road");
    assert_eq!(group.year, 1969);
    assert_eq!(group.group_id, "thebeatles::abbeyroad_1969");

    let pool = melodee_common::db::init_memory_database().await.unwrap();
    let staging_root = temp_dir.path().join("staging");
    let mut processor = Processor::new(
        ProcessorConfig::new(&staging_root),
        DirectoryCodeGenerator::with_pool(pool.clone()).await.unwrap(),
    )
    .with_staging_repository(StagingRepository::new(pool.clone()));

    let report = processor
        .process_ledger(&ledger, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.outcome(), RunOutcome::Completed);
    assert_eq!(report.albums_staged, 1);
    assert_eq!(report.files_moved, 2);

    let album_dir = staging_root.join("BE/The Beatles/1969 - Abbey Road");
    assert!(album_dir.join("01 - Come Together.wav").is_file());
    assert!(album_dir.join("02 - Something.wav").is_file());
    assert!(!come_together.exists());
    assert!(!something.exists());

    let mut entries: Vec<String> = fs::read_dir(&album_dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    entries.sort();
    assert_eq!(
        entries,
        vec!["01 - Come Together.wav", "02 - Something.wav", SIDECAR_FILE_NAME]
    );

    let (sidecar, checksum) = AlbumSidecar::read_from(&album_dir.join(SIDECAR_FILE_NAME)).unwrap();
    assert_eq!(sidecar.status, StagingStatus::PendingReview);
    assert!(sidecar.is_valid);
    assert_eq!(sidecar.artist.directory_code, "BE");
    assert_eq!(sidecar.album.year, 1969);
    assert_eq!(sidecar.tracks.len(), 2);
    assert_eq!(sidecar.tracks[0].name, "Come Together");
    assert_eq!(sidecar.tracks[1].track_number, 2);

    let items = StagingRepository::new(pool.clone())
        .list(Some(StagingStatus::PendingReview), 1, 20)
        .await
        .unwrap();
    assert_eq!(items.total, 1);
    let item = &items.items[0];
    assert_eq!(item.staging_path, album_dir);
    assert_eq!(item.track_count, 2);
    assert_eq!(item.metadata_checksum, checksum);
    assert_eq!(item.scan_id, ledger.scan_id());
}

#[tokio::test]
async fn test_rescan_is_idempotent() {
    let temp_dir = TempDir::new().unwrap();
    let inbound = temp_dir.path().join("inbound");
    generate_album(
        &inbound.join("Revolver"),
        "The Beatles",
        "Revolver",
        1966,
        &["Taxman", "Eleanor Rigby", "I'm Only Sleeping"],
    )
    .unwrap();
    generate_album(
        &inbound.join("Pet Sounds"),
        "The Beach Boys",
        "Pet Sounds",
        1966,
        &["Wouldn't It Be Nice", "Sloop John B"],
    )
    .unwrap();

    let mut snapshots = Vec::new();
    for run in ["first", "second"] {
        let (ledger, stats) = scan_inbound(&inbound, &temp_dir.path().join(run))
            .await
            .unwrap();
        assert_eq!(stats.valid_files, 5);
        group_ledger(&ledger).await.unwrap();

        let rows: BTreeMap<_, _> = ledger
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|f| (f.file_path.clone(), (f.content_hash.clone(), f.album_group_id.clone())))
            .collect();
        snapshots.push(rows);
        ledger.close().await;
    }

    assert_eq!(snapshots[0], snapshots[1]);
    let group_ids: std::collections::BTreeSet<_> =
        snapshots[0].values().filter_map(|(_, id)| id.clone()).collect();
    assert_eq!(group_ids.len(), 2);
}

#[tokio::test]
async fn test_remaster_variants_group_under_majority_year() {
    let temp_dir = TempDir::new().unwrap();
    let inbound = temp_dir.path().join("inbound");
    generate_tagged_wav(
        &inbound.join("orig/1.wav"),
        &TrackTags::new("Led Zeppelin", "Led Zeppelin IV", "Black Dog", 1).year(1971),
    )
    .unwrap();
    generate_tagged_wav(
        &inbound.join("orig/2.wav"),
        &TrackTags::new("Led Zeppelin", "Led Zeppelin IV", "Rock and Roll", 2).year(1971),
    )
    .unwrap();
    generate_tagged_wav(
        &inbound.join("remaster/4.wav"),
        &TrackTags::new("Led Zeppelin", "Led Zeppelin IV (Remastered)", "Stairway to Heaven", 4)
            .year(1994),
    )
    .unwrap();

    let (ledger, _) = scan_inbound(&inbound, &temp_dir.path().join("scans"))
        .await
        .unwrap();
    let groups = group_ledger(&ledger).await.unwrap();

    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].year, 1971);
    assert_eq!(groups[0].album, "Led Zeppelin IV");
    assert_eq!(groups[0].track_count(), 3);
}

#[tokio::test]
async fn test_album_artist_wins_over_track_artist() {
    let temp_dir = TempDir::new().unwrap();
    let inbound = temp_dir.path().join("inbound");
    for (i, artist) in ["Johnny Cash", "June Carter"].iter().enumerate() {
        generate_tagged_wav(
            &inbound.join(format!("{}.wav", i)),
            &TrackTags::new(artist, "Duets", "Jackson", i as u32 + 1)
                .album_artist("Various Artists")
                .year(1967),
        )
        .unwrap();
    }

    let (ledger, _) = scan_inbound(&inbound, &temp_dir.path().join("scans"))
        .await
        .unwrap();
    let groups = group_ledger(&ledger).await.unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].artist, "Various Artists");
}

#[tokio::test]
async fn test_invalid_files_are_quarantined_by_reason() {
    let temp_dir = TempDir::new().unwrap();
    let inbound = temp_dir.path().join("inbound");
    generate_album(&inbound.join("Kind of Blue"), "Miles Davis", "Kind of Blue", 1959, &["So What"])
        .unwrap();
    fs::write(inbound.join("readme.mp3"), b"this is not an mp3").unwrap();
    generate_wav(&inbound.join("untagged.wav"), 3).unwrap();

    let (ledger, stats) = scan_inbound(&inbound, &temp_dir.path().join("scans"))
        .await
        .unwrap();
    assert_eq!(stats.total_files, 3);
    assert_eq!(stats.valid_files, 1);
    assert_eq!(stats.invalid_files, 2);

    let pool = melodee_common::db::init_memory_database().await.unwrap();
    let quarantine_root = temp_dir.path().join("quarantine");
    let quarantine = QuarantineService::new(QuarantineRepository::new(pool.clone()), &quarantine_root);
    let mut processor = Processor::new(
        ProcessorConfig::new(temp_dir.path().join("staging")),
        DirectoryCodeGenerator::in_memory(),
    )
    .with_quarantine(quarantine.clone());

    let report = processor
        .process_ledger(&ledger, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.files_moved, 1);
    assert_eq!(report.files_quarantined, 2);
    assert_eq!(report.outcome(), RunOutcome::CompletedWithErrors);

    let records = quarantine
        .list(&QuarantineFilter::default(), 1, 20)
        .await
        .unwrap();
    assert_eq!(records.total, 2);

    let library = ledger.scan_id().to_string();
    let unsupported = quarantine_root
        .join(&library)
        .join("unsupported_container/readme.mp3");
    let untagged = quarantine_root.join(&library).join("tag_parse_error/untagged.wav");
    assert!(unsupported.is_file());
    assert!(untagged.is_file());
    assert!(!inbound.join("readme.mp3").exists());

    let tag_errors = quarantine
        .list(
            &QuarantineFilter {
                reason: Some(QuarantineReason::TagParseError),
                ..Default::default()
            },
            1,
            20,
        )
        .await
        .unwrap();
    assert_eq!(tag_errors.total, 1);
    assert_eq!(tag_errors.items[0].original_path, inbound.join("untagged.wav"));
}

#[tokio::test]
async fn test_missing_root_fails_before_ledger_writes() {
    let temp_dir = TempDir::new().unwrap();
    let ledger = ScanLedger::open_in_memory("scan_missing").await.unwrap();

    let result = melodee_ingest::services::InboundScanner::new(2)
        .scan(
            &temp_dir.path().join("does-not-exist"),
            &ledger,
            &CancellationToken::new(),
        )
        .await;

    assert!(result.is_err());
    assert!(ledger.scan_run().await.unwrap().is_none());
}
