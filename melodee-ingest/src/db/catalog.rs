//! Production catalog writes used by promotion
//!
//! Write helpers take a `&mut SqliteConnection` so the caller controls the
//! transaction; reads go straight to the pool.

use super::now_rfc3339;
use crate::models::{Album, Track};
use melodee_common::{Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};

/// Find an artist by normalized name, creating it if missing. Returns the artist id.
pub async fn find_or_create_artist(
    conn: &mut SqliteConnection,
    name: &str,
    name_normalized: &str,
    directory_code: &str,
) -> Result<i64> {
    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM artists WHERE name_normalized = ?")
            .bind(name_normalized)
            .fetch_optional(&mut *conn)
            .await?;

    if let Some(id) = existing {
        return Ok(id);
    }

    let result = sqlx::query(
        r#"
        INSERT INTO artists (name, name_normalized, directory_code, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(name)
    .bind(name_normalized)
    .bind(directory_code)
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;

    tracing::debug!(artist = name, "Created catalog artist");
    Ok(result.last_insert_rowid())
}

/// Insert an album; `Conflict` if its directory is already catalogued
pub async fn insert_album(conn: &mut SqliteConnection, album: &Album) -> Result<i64> {
    let existing: Option<i64> = sqlx::query_scalar("SELECT id FROM albums WHERE directory = ?")
        .bind(&album.directory)
        .fetch_optional(&mut *conn)
        .await?;

    if existing.is_some() {
        return Err(Error::Conflict(format!(
            "Album directory already in catalog: {}",
            album.directory
        )));
    }

    let result = sqlx::query(
        r#"
        INSERT INTO albums (artist_id, name, year, directory, track_count, total_size, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(album.artist_id)
    .bind(&album.name)
    .bind(album.year)
    .bind(&album.directory)
    .bind(album.track_count)
    .bind(album.total_size)
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert one track row (`track.id` is ignored)
pub async fn insert_track(conn: &mut SqliteConnection, track: &Track) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO tracks (
            album_id, artist_id, title, track_number, disc_number, duration,
            file_path, file_size, bitrate, sample_rate, checksum, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(track.album_id)
    .bind(track.artist_id)
    .bind(&track.title)
    .bind(track.track_number)
    .bind(track.disc_number)
    .bind(track.duration)
    .bind(&track.file_path)
    .bind(track.file_size)
    .bind(track.bitrate)
    .bind(track.sample_rate)
    .bind(&track.checksum)
    .bind(now_rfc3339())
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_rowid())
}

pub async fn get_album(pool: &SqlitePool, id: i64) -> Result<Option<Album>> {
    let row = sqlx::query(&format!("SELECT {} FROM albums WHERE id = ?", ALBUM_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(album_from_row).transpose()
}

/// Album claiming a library directory, if any
pub async fn find_album_by_directory(pool: &SqlitePool, directory: &str) -> Result<Option<Album>> {
    let row = sqlx::query(&format!(
        "SELECT {} FROM albums WHERE directory = ?",
        ALBUM_COLUMNS
    ))
    .bind(directory)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(album_from_row).transpose()
}

const ALBUM_COLUMNS: &str = "id, artist_id, name, year, directory, track_count, total_size";

fn album_from_row(row: &SqliteRow) -> Result<Album> {
    Ok(Album {
        id: row.try_get("id")?,
        artist_id: row.try_get("artist_id")?,
        name: row.try_get("name")?,
        year: row.try_get("year")?,
        directory: row.try_get("directory")?,
        track_count: row.try_get("track_count")?,
        total_size: row.try_get("total_size")?,
    })
}

/// Tracks of an album ordered by disc then track
pub async fn get_tracks(pool: &SqlitePool, album_id: i64) -> Result<Vec<Track>> {
    let rows = sqlx::query(
        r#"
        SELECT id, album_id, artist_id, title, track_number, disc_number, duration,
               file_path, file_size, bitrate, sample_rate, checksum
        FROM tracks
        WHERE album_id = ?
        ORDER BY disc_number, track_number
        "#,
    )
    .bind(album_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(track_from_row).collect()
}

fn track_from_row(row: &SqliteRow) -> Result<Track> {
    Ok(Track {
        id: row.try_get("id")?,
        album_id: row.try_get("album_id")?,
        artist_id: row.try_get("artist_id")?,
        title: row.try_get("title")?,
        track_number: row.try_get("track_number")?,
        disc_number: row.try_get("disc_number")?,
        duration: row.try_get("duration")?,
        file_path: row.try_get("file_path")?,
        file_size: row.try_get("file_size")?,
        bitrate: row.try_get("bitrate")?,
        sample_rate: row.try_get("sample_rate")?,
        checksum: row.try_get("checksum")?,
    })
}

/// Row counts of (artists, albums, tracks)
pub async fn counts(pool: &SqlitePool) -> Result<(i64, i64, i64)> {
    let row = sqlx::query(
        r#"
        SELECT
            (SELECT COUNT(*) FROM artists) AS artists,
            (SELECT COUNT(*) FROM albums) AS albums,
            (SELECT COUNT(*) FROM tracks) AS tracks
        "#,
    )
    .fetch_one(pool)
    .await?;

    Ok((
        row.try_get("artists")?,
        row.try_get("albums")?,
        row.try_get("tracks")?,
    ))
}
