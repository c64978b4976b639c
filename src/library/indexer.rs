//! Media insertion and identity resolution.
//!
//! Indexing one file is: stat it, read its tags through the configured
//! [`MediaReader`], then resolve artist and album and upsert the track in a
//! single queue job wrapped in one transaction. Albums are keyed by name and
//! the file's directory, never by artist.

use sqlx::Connection;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use crate::db::{self, DatabaseQueue, NewTrack};
use crate::error::{Error, Result};
use crate::metadata::{MediaFile, MediaReader, guess_track_number};
use crate::model::UNKNOWN;

/// Result of indexing a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Tags were read and the track row written
    Indexed(i64),
    /// Size and modification time match the stored row; nothing was read
    Unchanged,
}

/// Size and modification time of a file on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: i64,
    /// Milliseconds since the Unix epoch
    pub modified: i64,
}

impl FileInfo {
    /// Stat a file. A missing file is [`Error::FileNotFound`].
    pub async fn stat(path: &Path) -> Result<Self> {
        let metadata = match tokio::fs::metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::file_not_found(path));
            }
            Err(e) => return Err(e.into()),
        };

        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX));

        Ok(Self {
            size: i64::try_from(metadata.len()).unwrap_or(i64::MAX),
            modified,
        })
    }
}

/// Writes media files into the catalog.
#[derive(Clone)]
pub struct Indexer {
    queue: DatabaseQueue,
    reader: Arc<dyn MediaReader>,
}

impl Indexer {
    pub fn new(queue: DatabaseQueue, reader: Arc<dyn MediaReader>) -> Self {
        Self { queue, reader }
    }

    /// Index a file, skipping it when it has not changed since the last run.
    pub async fn add_media(&self, path: &Path) -> Result<IndexOutcome> {
        self.index(path, false).await
    }

    /// Index a file, reading its tags even if it looks unchanged.
    pub async fn reindex(&self, path: &Path) -> Result<IndexOutcome> {
        self.index(path, true).await
    }

    async fn index(&self, path: &Path, force: bool) -> Result<IndexOutcome> {
        let path = normalize_path(path)?;
        let file = FileInfo::stat(&path).await?;

        if !force && self.is_unchanged(&path, file).await? {
            tracing::trace!(target: "library::indexer", path = %path.display(), "Unchanged, skipping");
            return Ok(IndexOutcome::Unchanged);
        }

        let media = self.read_tags(&path).await?;
        let track = new_track(&path, media.as_ref(), file)?;
        let id = self.insert(track).await?;

        tracing::debug!(target: "library::indexer", path = %path.display(), track_id = id, "Indexed");
        Ok(IndexOutcome::Indexed(id))
    }

    /// Remove the track stored for a file. Returns rows removed.
    pub async fn remove_file(&self, path: &Path) -> Result<u64> {
        let fs_path = path_str(&normalize_path(path)?)?.to_owned();
        let removed = self
            .queue
            .submit_and_wait(move |conn| {
                Box::pin(async move { Ok(db::delete_track_by_path(conn, &fs_path).await?) })
            })
            .await?;

        if removed > 0 {
            tracing::info!(target: "library::indexer", path = %path.display(), "Removed track");
        }
        Ok(removed)
    }

    /// Remove every track below a directory. Returns rows removed.
    pub async fn remove_directory(&self, dir: &Path) -> Result<u64> {
        let dir_path = path_str(&normalize_path(dir)?)?.to_owned();
        let removed = self
            .queue
            .submit_and_wait(move |conn| {
                Box::pin(async move { Ok(db::delete_tracks_under(conn, &dir_path).await?) })
            })
            .await?;

        tracing::info!(
            target: "library::indexer",
            path = %dir.display(),
            removed,
            "Removed directory"
        );
        Ok(removed)
    }

    async fn is_unchanged(&self, path: &Path, file: FileInfo) -> Result<bool> {
        let fs_path = path_str(path)?.to_owned();
        let stored = self
            .queue
            .submit_and_wait(move |conn| {
                Box::pin(async move { Ok(db::file_state(conn, &fs_path).await?) })
            })
            .await?;

        Ok(stored == Some((Some(file.size), Some(file.modified))))
    }

    async fn read_tags(&self, path: &Path) -> Result<Box<dyn MediaFile>> {
        let reader = Arc::clone(&self.reader);
        let owned = path.to_path_buf();

        tokio::task::spawn_blocking(move || reader.read(&owned))
            .await
            .map_err(|e| Error::metadata(path, format!("tag reader failed: {e}")))?
    }

    async fn insert(&self, track: NewTrack) -> Result<i64> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let mut tx = conn.begin().await?;
                    let artist_id = db::get_or_create_artist(&mut *tx, &track.artist).await?;
                    let album_id =
                        db::get_or_create_album(&mut *tx, &track.album, &track.directory).await?;
                    let id = db::upsert_track(&mut *tx, &track, artist_id, album_id).await?;
                    tx.commit().await?;
                    Ok(id)
                })
            })
            .await
    }
}

/// Absolute form of `path` with `.` and `..` folded away, without touching
/// the filesystem.
pub fn normalize_path(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut clean = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                clean.pop();
            }
            other => clean.push(other),
        }
    }
    Ok(clean)
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| Error::metadata(path, "path is not valid UTF-8"))
}

fn non_blank(value: &str) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn new_track(path: &Path, media: &dyn MediaFile, file: FileInfo) -> Result<NewTrack> {
    let fs_path = path_str(path)?.to_owned();
    let directory = path
        .parent()
        .map(path_str)
        .transpose()?
        .unwrap_or_default()
        .to_owned();
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(&fs_path)
        .to_owned();

    let number = match media.track() {
        0 => guess_track_number(path),
        n => n,
    };

    Ok(NewTrack {
        title: non_blank(media.title()).unwrap_or(file_name),
        artist: non_blank(media.artist()).unwrap_or_else(|| UNKNOWN.to_string()),
        album: non_blank(media.album()).unwrap_or_else(|| UNKNOWN.to_string()),
        directory,
        fs_path,
        number: (number > 0).then_some(i64::from(number)),
        duration: i64::try_from(media.length().as_millis()).unwrap_or(i64::MAX),
        year: (media.year() > 0).then_some(i64::from(media.year())),
        bitrate: (media.bitrate() > 0).then_some(i64::from(media.bitrate())),
        size: file.size,
        mtime: file.modified,
    })
}
