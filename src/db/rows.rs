//! Row shapes shared by lookups, search and browsing.
//!
//! Each `*_SELECT` is a complete `SELECT ... FROM ...` without a `WHERE`
//! clause. Album and artist selects aggregate over tracks and need a
//! `GROUP BY` appended by the caller.

use std::path::Path;

use crate::model::{Album, Artist, Rating, TrackInfo};

pub(crate) const TRACK_SELECT: &str = r#"
SELECT
    t.id AS id,
    t.name AS title,
    t.album_id AS album_id,
    al.name AS album,
    t.artist_id AS artist_id,
    ar.name AS artist,
    t.number AS number,
    t.fs_path AS fs_path,
    t.duration AS duration,
    t.year AS year,
    t.bitrate AS bitrate,
    t.size AS size,
    t.created_at AS created_at,
    us.favourite AS favourite,
    us.user_rating AS rating,
    us.last_played AS last_played,
    COALESCE(us.play_count, 0) AS plays
FROM tracks t
    JOIN albums al ON al.id = t.album_id
    JOIN artists ar ON ar.id = t.artist_id
    LEFT JOIN user_stats us ON us.track_id = t.id
"#;

pub(crate) const ALBUM_SELECT: &str = r#"
SELECT
    al.id AS id,
    al.name AS name,
    CASE WHEN COUNT(DISTINCT t.artist_id) = 1 THEN MAX(ar.name) ELSE 'Various Artists' END AS artist,
    COUNT(t.id) AS song_count,
    COALESCE(SUM(t.duration), 0) AS duration,
    CAST(COALESCE(AVG(t.bitrate), 0) AS INTEGER) AS avg_bitrate,
    MAX(t.year) AS year,
    COALESCE(SUM(us.play_count), 0) AS plays,
    MAX(us.last_played) AS last_played,
    als.favourite AS favourite,
    als.user_rating AS rating
FROM albums al
    JOIN tracks t ON t.album_id = al.id
    JOIN artists ar ON ar.id = t.artist_id
    LEFT JOIN user_stats us ON us.track_id = t.id
    LEFT JOIN albums_stats als ON als.album_id = al.id
"#;

pub(crate) const ARTIST_SELECT: &str = r#"
SELECT
    ar.id AS id,
    ar.name AS name,
    COUNT(DISTINCT t.album_id) AS album_count,
    MAX(t.year) AS year,
    COALESCE(SUM(us.play_count), 0) AS plays,
    MAX(us.last_played) AS last_played,
    ars.favourite AS favourite,
    ars.user_rating AS rating
FROM artists ar
    JOIN tracks t ON t.artist_id = ar.id
    LEFT JOIN user_stats us ON us.track_id = t.id
    LEFT JOIN artists_stats ars ON ars.artist_id = ar.id
"#;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TrackRow {
    pub id: i64,
    pub title: String,
    pub album_id: i64,
    pub album: String,
    pub artist_id: i64,
    pub artist: String,
    pub number: Option<i64>,
    pub fs_path: String,
    pub duration: Option<i64>,
    pub year: Option<i64>,
    pub bitrate: Option<i64>,
    pub size: Option<i64>,
    pub created_at: Option<i64>,
    pub favourite: Option<i64>,
    pub rating: Option<i64>,
    pub last_played: Option<i64>,
    pub plays: i64,
}

impl From<TrackRow> for TrackInfo {
    fn from(row: TrackRow) -> Self {
        let format = Path::new(&row.fs_path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();

        TrackInfo {
            id: row.id,
            title: row.title,
            album_id: row.album_id,
            album: row.album,
            artist_id: row.artist_id,
            artist: row.artist,
            track_number: row.number.unwrap_or(0),
            format,
            duration: row.duration.unwrap_or(0),
            year: row.year.and_then(|y| i32::try_from(y).ok()),
            bitrate: row.bitrate,
            size: row.size,
            created_at: row.created_at,
            favourite: row.favourite,
            rating: Rating::from_db(row.rating),
            last_played: row.last_played,
            plays: row.plays,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AlbumRow {
    pub id: i64,
    pub name: String,
    pub artist: String,
    pub song_count: i64,
    pub duration: i64,
    pub avg_bitrate: i64,
    pub year: Option<i64>,
    pub plays: i64,
    pub last_played: Option<i64>,
    pub favourite: Option<i64>,
    pub rating: Option<i64>,
}

impl From<AlbumRow> for Album {
    fn from(row: AlbumRow) -> Self {
        Album {
            id: row.id,
            name: row.name,
            artist: row.artist,
            song_count: row.song_count,
            duration: row.duration,
            avg_bitrate: row.avg_bitrate,
            year: row.year.and_then(|y| i32::try_from(y).ok()),
            plays: row.plays,
            last_played: row.last_played,
            favourite: row.favourite,
            rating: Rating::from_db(row.rating),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArtistRow {
    pub id: i64,
    pub name: String,
    pub album_count: i64,
    pub favourite: Option<i64>,
    pub rating: Option<i64>,
}

impl From<ArtistRow> for Artist {
    fn from(row: ArtistRow) -> Self {
        Artist {
            id: row.id,
            name: row.name,
            album_count: row.album_count,
            favourite: row.favourite,
            rating: Rating::from_db(row.rating),
        }
    }
}
