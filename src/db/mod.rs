//! Catalog storage.
//!
//! Uses SQLx with SQLite. The store is opened as a single connection which is
//! handed to the [`DatabaseQueue`] worker; every helper here takes that
//! connection explicitly and is only ever called from inside a queue job.
//!
//! # Example
//!
//! ```ignore
//! use music_library::db::{self, DatabaseQueue};
//!
//! let conn = db::open(Some(Path::new("library.db"))).await?;
//! let (queue, _worker) = DatabaseQueue::spawn(conn, 64, cancel);
//! queue.submit_and_wait(|conn| Box::pin(db::migrate(conn))).await?;
//! ```

use sqlx::migrate::Migrator;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, SqliteConnection};
use std::path::{MAIN_SEPARATOR, Path};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Result, ResultExt};

pub mod queue;
pub(crate) mod rows;

pub use queue::{DatabaseExecutable, DatabaseQueue};

/// Connection string for a throwaway in-memory catalog.
pub const MEMORY_URL: &str = "sqlite::memory:";

/// Embedded forward-only schema migrations.
pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open the store's single connection.
///
/// `None` opens an in-memory catalog. A file database and its parent
/// directory are created when missing.
pub async fn open(database: Option<&Path>) -> Result<SqliteConnection> {
    let options = match database {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(format!("creating {}", parent.display()))?;
            }
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        None => SqliteConnectOptions::from_str(MEMORY_URL)?,
    }
    .foreign_keys(true)
    .busy_timeout(Duration::from_secs(5));

    let conn = options
        .connect()
        .await
        .with_context("opening catalog database")?;

    tracing::info!(
        target: "db",
        database = %database.map_or_else(|| "memory".into(), |p| p.display().to_string()),
        "Opened catalog database"
    );
    Ok(conn)
}

/// Apply pending schema migrations.
pub async fn migrate(conn: &mut SqliteConnection) -> Result<()> {
    MIGRATOR.run_direct(conn).await?;
    Ok(())
}

/// Escape `%`, `_` and the escape character itself for a `LIKE ... ESCAPE '\'`.
pub fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `LIKE` pattern matching every path strictly below `dir`.
pub fn directory_pattern(dir: &str) -> String {
    separated_pattern(dir, MAIN_SEPARATOR)
}

fn separated_pattern(dir: &str, separator: char) -> String {
    let dir = dir.trim_end_matches(separator);
    format!("{}%", escape_like(&format!("{dir}{separator}")))
}

/// Values written for one indexed file.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NewTrack {
    pub title: String,
    pub artist: String,
    pub album: String,
    /// Directory holding the file; part of the album's identity
    pub directory: String,
    pub fs_path: String,
    pub number: Option<i64>,
    /// Milliseconds
    pub duration: i64,
    pub year: Option<i64>,
    pub bitrate: Option<i64>,
    pub size: i64,
    pub mtime: i64,
}

/// Get or create an artist by exact name.
pub(crate) async fn get_or_create_artist(conn: &mut SqliteConnection, name: &str) -> sqlx::Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM artists WHERE name = ?")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await?;

    if let Some((id,)) = row {
        return Ok(id);
    }

    let result = sqlx::query("INSERT INTO artists (name) VALUES (?)")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Get or create an album by name and directory.
pub(crate) async fn get_or_create_album(
    conn: &mut SqliteConnection,
    name: &str,
    directory: &str,
) -> sqlx::Result<i64> {
    let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM albums WHERE name = ? AND fs_path = ?")
        .bind(name)
        .bind(directory)
        .fetch_optional(&mut *conn)
        .await?;

    if let Some((id,)) = row {
        return Ok(id);
    }

    let result = sqlx::query("INSERT INTO albums (name, fs_path) VALUES (?, ?)")
        .bind(name)
        .bind(directory)
        .execute(&mut *conn)
        .await?;
    Ok(result.last_insert_rowid())
}

/// Insert a track or update the one already stored for its path.
pub(crate) async fn upsert_track(
    conn: &mut SqliteConnection,
    track: &NewTrack,
    artist_id: i64,
    album_id: i64,
) -> sqlx::Result<i64> {
    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO tracks
            (name, album_id, artist_id, number, fs_path, duration, year, bitrate, size, mtime, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, CAST(strftime('%s', 'now') AS INTEGER))
        ON CONFLICT(fs_path) DO UPDATE SET
            name = excluded.name,
            album_id = excluded.album_id,
            artist_id = excluded.artist_id,
            number = excluded.number,
            duration = excluded.duration,
            year = excluded.year,
            bitrate = excluded.bitrate,
            size = excluded.size,
            mtime = excluded.mtime
        RETURNING id
        "#,
    )
    .bind(&track.title)
    .bind(album_id)
    .bind(artist_id)
    .bind(track.number)
    .bind(&track.fs_path)
    .bind(track.duration)
    .bind(track.year)
    .bind(track.bitrate)
    .bind(track.size)
    .bind(track.mtime)
    .fetch_one(&mut *conn)
    .await?;

    Ok(id)
}

/// Stored `(size, mtime)` for a path, if the path is indexed.
pub(crate) async fn file_state(
    conn: &mut SqliteConnection,
    fs_path: &str,
) -> sqlx::Result<Option<(Option<i64>, Option<i64>)>> {
    sqlx::query_as("SELECT size, mtime FROM tracks WHERE fs_path = ?")
        .bind(fs_path)
        .fetch_optional(&mut *conn)
        .await
}

/// Delete the track stored for a path. Returns rows removed.
pub(crate) async fn delete_track_by_path(conn: &mut SqliteConnection, fs_path: &str) -> sqlx::Result<u64> {
    let result = sqlx::query("DELETE FROM tracks WHERE fs_path = ?")
        .bind(fs_path)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Delete every track strictly below a directory. Returns rows removed.
pub(crate) async fn delete_tracks_under(conn: &mut SqliteConnection, dir: &str) -> sqlx::Result<u64> {
    let result = sqlx::query(r"DELETE FROM tracks WHERE fs_path LIKE ? ESCAPE '\'")
        .bind(directory_pattern(dir))
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Number of tracks in the catalog.
pub(crate) async fn count_tracks(conn: &mut SqliteConnection) -> sqlx::Result<i64> {
    let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tracks")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Delete albums and artists left without tracks, with their stats rows.
///
/// Returns `(albums, artists)` removed.
pub(crate) async fn delete_empty_parents(conn: &mut SqliteConnection) -> sqlx::Result<(u64, u64)> {
    use sqlx::Connection;

    let mut tx = conn.begin().await?;

    sqlx::query(
        "DELETE FROM albums_stats WHERE album_id NOT IN (SELECT DISTINCT album_id FROM tracks WHERE album_id IS NOT NULL)",
    )
    .execute(&mut *tx)
    .await?;
    let albums = sqlx::query(
        "DELETE FROM albums WHERE id NOT IN (SELECT DISTINCT album_id FROM tracks WHERE album_id IS NOT NULL)",
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query(
        "DELETE FROM artists_stats WHERE artist_id NOT IN (SELECT DISTINCT artist_id FROM tracks WHERE artist_id IS NOT NULL)",
    )
    .execute(&mut *tx)
    .await?;
    let artists = sqlx::query(
        "DELETE FROM artists WHERE id NOT IN (SELECT DISTINCT artist_id FROM tracks WHERE artist_id IS NOT NULL)",
    )
    .execute(&mut *tx)
    .await?
    .rows_affected();

    sqlx::query("DELETE FROM user_stats WHERE track_id NOT IN (SELECT id FROM tracks)")
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok((albums, artists))
}
