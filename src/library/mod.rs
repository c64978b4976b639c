//! The local media library.
//!
//! [`LocalLibrary`] wires the pieces together: one [`DatabaseQueue`] owning
//! the catalog connection, an [`Indexer`] writing through it, a [`Scanner`]
//! walking the configured roots, an optional directory watch feeding the
//! same queue, and a [`Sweeper`] retiring rows whose files are gone.
//!
//! # Example
//!
//! ```ignore
//! use music_library::library::{Library, LocalLibrary};
//!
//! let library = LocalLibrary::open(&config, Arc::new(LoftyReader), cancel).await?;
//! library.initialize().await?;
//! library.scan().await?;
//! let hits = library.search(SearchArgs::new("bugs")).await?;
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{CleanupConfig, Config};
use crate::db::rows::{ALBUM_SELECT, ARTIST_SELECT, AlbumRow, ArtistRow, TRACK_SELECT, TrackRow};
use crate::db::{self, DatabaseQueue};
use crate::error::{Error, Result};
use crate::metadata::MediaReader;
use crate::model::{Album, Artist, TrackInfo};
use crate::scanner::watcher::{self, DirectoryWatch, WatchHandler};
use crate::scanner::{Scanner, Walker};

pub mod browse;
pub mod cleanup;
pub mod indexer;
mod stats;

pub use browse::{BrowseArgs, Browser, Order, OrderBy, SearchArgs};
pub use cleanup::{SweepOutcome, SweepReport, Sweeper};
pub use indexer::{IndexOutcome, Indexer};

/// Library operations used by the rest of the server.
#[async_trait]
pub trait Library: Send + Sync {
    /// Add a root directory to scan. Adding the same root twice is a no-op.
    fn add_library_path(&self, path: &Path) -> Result<()>;

    /// Walk every root, then sweep out rows whose files are gone.
    ///
    /// Waits for a scan already in progress before starting.
    async fn scan(&self) -> Result<()>;

    /// Wait for a running scan and any watcher-started walks.
    async fn wait_scan(&self);

    /// Index a single file.
    async fn add_media(&self, path: &Path) -> Result<()>;

    /// Tracks whose title, album or artist contains the query.
    async fn search(&self, args: SearchArgs) -> Result<Vec<TrackInfo>>;

    /// Location on disk of a track.
    async fn get_file_path(&self, track_id: i64) -> Result<PathBuf>;

    /// Tracks of an album in track-number order. Unknown albums are empty.
    async fn get_album_files(&self, album_id: i64) -> Result<Vec<TrackInfo>>;

    /// Bring the catalog schema up to date and start background work.
    async fn initialize(&self) -> Result<()>;

    /// Close the library and delete its database file, if it has one.
    async fn truncate(&self) -> Result<()>;

    /// Stop background work and close the catalog.
    async fn close(&self);
}

/// Library backed by a SQLite catalog and the local filesystem.
pub struct LocalLibrary {
    database: Option<PathBuf>,
    scan_disabled: bool,
    cleanup: CleanupConfig,
    pub(crate) queue: DatabaseQueue,
    worker: Mutex<Option<JoinHandle<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    indexer: Indexer,
    scanner: Scanner,
    sweeper: Sweeper,
    watch: Option<DirectoryWatch>,
    cancel: CancellationToken,
}

impl LocalLibrary {
    /// Open the catalog and start the queue worker and directory watch.
    ///
    /// Call [`Library::initialize`] before use. Cancelling `cancel` stops
    /// everything the library started.
    pub async fn open(
        config: &Config,
        reader: Arc<dyn MediaReader>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let cancel = cancel.child_token();
        let conn = db::open(config.library.database.as_deref()).await?;
        let (queue, worker) = DatabaseQueue::spawn(conn, config.queue.capacity, cancel.clone());
        let indexer = Indexer::new(queue.clone(), reader);

        let (watch, events) = if config.library.watch {
            match DirectoryWatch::new() {
                Ok((watch, events)) => (Some(watch), Some(events)),
                Err(e) => {
                    tracing::warn!(target: "library", error = %e, "Directory watching disabled");
                    (None, None)
                }
            }
        } else {
            (None, None)
        };

        let walker = Walker::new(
            indexer.clone(),
            watch.clone(),
            config.scan.clone(),
            cancel.clone(),
        );
        let mut tasks = Vec::new();
        if let Some(events) = events {
            let handler = WatchHandler::new(indexer.clone(), walker.clone());
            tasks.push(tokio::spawn(watcher::run_event_loop(
                events,
                handler,
                cancel.clone(),
            )));
        }

        let sweeper = Sweeper::new(
            queue.clone(),
            config.cleanup.clone(),
            config.scan.fast,
            cancel.clone(),
        );

        let library = Self {
            database: config.library.database.clone(),
            scan_disabled: config.scan.disable,
            cleanup: config.cleanup.clone(),
            queue,
            worker: Mutex::new(Some(worker)),
            tasks: Mutex::new(tasks),
            indexer,
            scanner: Scanner::new(walker),
            sweeper,
            watch,
            cancel,
        };

        for path in &config.library.paths {
            library.add_library_path(path)?;
        }
        Ok(library)
    }

    pub fn queue(&self) -> &DatabaseQueue {
        &self.queue
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn sweeper(&self) -> &Sweeper {
        &self.sweeper
    }

    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    pub async fn track_count(&self) -> Result<u64> {
        let count = self
            .queue
            .submit_and_wait(|conn| Box::pin(async move { Ok(db::count_tracks(conn).await?) }))
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// True if the file at `path` is in the catalog.
    pub async fn media_exists(&self, path: &Path) -> Result<bool> {
        let path = indexer::normalize_path(path)?;
        let Some(fs_path) = path.to_str().map(str::to_owned) else {
            return Ok(false);
        };
        let state = self
            .queue
            .submit_and_wait(move |conn| {
                Box::pin(async move { Ok(db::file_state(conn, &fs_path).await?) })
            })
            .await?;
        Ok(state.is_some())
    }

    /// Re-read tags of every indexed file, a batch at a time.
    ///
    /// Returns the number of files re-read. Missing files are left for the
    /// sweeper.
    pub async fn rescan(&self) -> Result<u64> {
        let batch_size = i64::from(self.cleanup.batch_size.max(1));
        let mut cursor = 0i64;
        let mut updated = 0u64;
        tracing::info!(target: "library", "Rescan started");

        loop {
            let batch: Vec<(i64, String)> = self
                .queue
                .submit_and_wait(move |conn| {
                    Box::pin(async move {
                        let rows: Vec<(i64, String)> = sqlx::query_as(
                            "SELECT id, fs_path FROM tracks WHERE id > ? ORDER BY id LIMIT ?",
                        )
                        .bind(cursor)
                        .bind(batch_size)
                        .fetch_all(&mut *conn)
                        .await?;
                        Ok(rows)
                    })
                })
                .await?;

            let Some(&(last_id, _)) = batch.last() else {
                break;
            };
            cursor = last_id;

            for (_, path) in &batch {
                match self.indexer.reindex(Path::new(path)).await {
                    Ok(_) => updated += 1,
                    Err(e) if e.is_cancelled() => return Err(e),
                    Err(Error::FileNotFound(_)) => {}
                    Err(e) => {
                        tracing::warn!(target: "library", path = %path, error = %e, "Failed to re-read file");
                    }
                }
            }

            if (batch.len() as i64) < batch_size {
                break;
            }
        }

        tracing::info!(target: "library", updated, "Rescan finished");
        Ok(updated)
    }

    pub async fn get_track(&self, track_id: i64) -> Result<TrackInfo> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let row: Option<TrackRow> =
                        sqlx::query_as(&format!("{TRACK_SELECT} WHERE t.id = ?"))
                            .bind(track_id)
                            .fetch_optional(&mut *conn)
                            .await?;
                    row.map(TrackInfo::from)
                        .ok_or(Error::TrackNotFound(track_id))
                })
            })
            .await
    }

    pub async fn get_album(&self, album_id: i64) -> Result<Album> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let row: Option<AlbumRow> =
                        sqlx::query_as(&format!("{ALBUM_SELECT} WHERE al.id = ? GROUP BY al.id"))
                            .bind(album_id)
                            .fetch_optional(&mut *conn)
                            .await?;
                    row.map(Album::from).ok_or(Error::AlbumNotFound(album_id))
                })
            })
            .await
    }

    pub async fn get_artist(&self, artist_id: i64) -> Result<Artist> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let row: Option<ArtistRow> =
                        sqlx::query_as(&format!("{ARTIST_SELECT} WHERE ar.id = ? GROUP BY ar.id"))
                            .bind(artist_id)
                            .fetch_optional(&mut *conn)
                            .await?;
                    row.map(Artist::from).ok_or(Error::ArtistNotFound(artist_id))
                })
            })
            .await
    }

    /// Albums with at least one track by the artist, by name.
    pub async fn get_artist_albums(&self, artist_id: i64) -> Result<Vec<Album>> {
        let args = BrowseArgs {
            artist_id: Some(artist_id),
            order_by: OrderBy::Name,
            ..BrowseArgs::default()
        };
        let (albums, _) = self.browse_albums(args).await?;
        Ok(albums)
    }

    /// Directory an album was found in.
    pub async fn get_album_path(&self, album_id: i64) -> Result<PathBuf> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let row: Option<(String,)> =
                        sqlx::query_as("SELECT fs_path FROM albums WHERE id = ?")
                            .bind(album_id)
                            .fetch_optional(&mut *conn)
                            .await?;
                    row.map(|(path,)| PathBuf::from(path))
                        .ok_or(Error::AlbumNotFound(album_id))
                })
            })
            .await
    }

    pub async fn search_albums(&self, args: SearchArgs) -> Result<Vec<Album>> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move { browse::search_albums(conn, &args).await })
            })
            .await
    }

    pub async fn search_artists(&self, args: SearchArgs) -> Result<Vec<Artist>> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move { browse::search_artists(conn, &args).await })
            })
            .await
    }
}

#[async_trait]
impl Library for LocalLibrary {
    fn add_library_path(&self, path: &Path) -> Result<()> {
        let path = indexer::normalize_path(path)?;
        if self.scanner.add_path(path.clone()) {
            tracing::info!(target: "library", path = %path.display(), "Library path added");
        }
        Ok(())
    }

    async fn scan(&self) -> Result<()> {
        if self.scan_disabled {
            tracing::info!(target: "library", "Scanning is disabled");
            return Ok(());
        }

        self.scanner.scan().await;
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        match self.sweeper.sweep().await {
            Ok(_) => Ok(()),
            Err(e) if e.is_cancelled() => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn wait_scan(&self) {
        self.scanner.wait().await;
    }

    async fn add_media(&self, path: &Path) -> Result<()> {
        self.indexer.add_media(path).await.map(|_| ())
    }

    async fn search(&self, args: SearchArgs) -> Result<Vec<TrackInfo>> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move { browse::search_tracks(conn, &args).await })
            })
            .await
    }

    async fn get_file_path(&self, track_id: i64) -> Result<PathBuf> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let row: Option<(String,)> =
                        sqlx::query_as("SELECT fs_path FROM tracks WHERE id = ?")
                            .bind(track_id)
                            .fetch_optional(&mut *conn)
                            .await?;
                    row.map(|(path,)| PathBuf::from(path))
                        .ok_or(Error::TrackNotFound(track_id))
                })
            })
            .await
    }

    async fn get_album_files(&self, album_id: i64) -> Result<Vec<TrackInfo>> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let rows: Vec<TrackRow> = sqlx::query_as(&format!(
                        "{TRACK_SELECT} WHERE t.album_id = ? ORDER BY al.name, t.number, t.id"
                    ))
                    .bind(album_id)
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows.into_iter().map(TrackInfo::from).collect())
                })
            })
            .await
    }

    async fn initialize(&self) -> Result<()> {
        self.queue
            .submit_and_wait(|conn| Box::pin(db::migrate(conn)))
            .await?;
        tracing::info!(target: "library", "Catalog schema is up to date");

        if let Some(period) = self.cleanup.interval {
            self.tasks.lock().push(self.sweeper.spawn_periodic(period));
        }
        Ok(())
    }

    async fn truncate(&self) -> Result<()> {
        self.close().await;

        let Some(database) = &self.database else {
            return Ok(());
        };
        match tokio::fs::remove_file(database).await {
            Ok(()) => {
                tracing::info!(target: "library", path = %database.display(), "Catalog database removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn close(&self) {
        self.cancel.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(target: "library", error = %e, "Background task failed");
            }
        }
        self.scanner.walker().group().wait().await;

        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            tracing::warn!(target: "library", error = %e, "Database worker failed");
        }
    }
}

impl Drop for LocalLibrary {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{MockMedia, SeedTrack, seeded_library, temp_library_with, write_file};
    use std::time::Duration;

    fn titles(tracks: &[TrackInfo]) -> Vec<&str> {
        tracks.iter().map(|t| t.title.as_str()).collect()
    }

    #[tokio::test]
    async fn test_concurrent_inserts_are_all_found() {
        let (library, guard) = temp_library_with(|_| {}).await;
        let library = Arc::new(library);

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..100 {
            let path = write_file(guard.dir.path(), &format!("song {i}.mp3"));
            guard
                .reader
                .set(&path, MockMedia::new("Band", "Record", &format!("Unique Title {i}")));
            let library = Arc::clone(&library);
            tasks.spawn(async move { library.add_media(&path).await });
        }
        while let Some(result) = tasks.join_next().await {
            result.unwrap().unwrap();
        }

        assert_eq!(library.track_count().await.unwrap(), 100);
        for i in [0, 42, 99] {
            let title = format!("Unique Title {i}");
            let found = library.search(SearchArgs::new(&title)).await.unwrap();
            assert_eq!(titles(&found), [title.as_str()]);
        }
    }

    #[tokio::test]
    async fn test_album_identity_ignores_artist() {
        let (library, _guard) = seeded_library(&[
            SeedTrack::new("Buggy Bugoff", "Return Of The Bugs", "Payback"),
            SeedTrack::new("Buggy Bugoff", "Return Of The Bugs", "Realization"),
            SeedTrack::new("Off By One", "Return Of The Bugs", "Off By One"),
            SeedTrack::new("Buggy Bugoff", "Return Of The Bugs", "Bonus").dir("bonus"),
        ])
        .await;

        let albums = library
            .search_albums(SearchArgs::new("Return Of The Bugs"))
            .await
            .unwrap();
        assert_eq!(albums.len(), 2);

        let shared = albums.iter().find(|a| a.song_count == 3).unwrap();
        assert_eq!(shared.artist, crate::model::VARIOUS_ARTISTS);
        let files = library.get_album_files(shared.id).await.unwrap();
        assert_eq!(titles(&files), ["Payback", "Realization", "Off By One"]);

        let other = albums.iter().find(|a| a.song_count == 1).unwrap();
        assert_eq!(other.artist, "Buggy Bugoff");
        assert!(library.get_album_path(other.id).await.unwrap().ends_with("bonus"));
    }

    #[tokio::test]
    async fn test_scan_is_idempotent() {
        let (library, guard) = temp_library_with(|_| {}).await;
        let sub = guard.dir.path().join("disc");
        std::fs::create_dir(&sub).unwrap();
        for (dir, name) in [
            (guard.dir.path(), "01 a.mp3"),
            (sub.as_path(), "02 b.flac"),
            (sub.as_path(), "notes.txt"),
        ] {
            let path = write_file(dir, name);
            guard.reader.set(&path, MockMedia::new("Band", "Record", name));
        }

        library.scan().await.unwrap();
        let (first, total) = library.browse_tracks(BrowseArgs::default()).await.unwrap();
        assert_eq!(total, 2);

        library.scan().await.unwrap();
        let (second, _) = library.browse_tracks(BrowseArgs::default()).await.unwrap();
        assert_eq!(first, second);
        // The second scan found nothing changed
        assert_eq!(guard.reader.reads(), 2);
    }

    #[tokio::test]
    async fn test_deleted_file_is_swept() {
        let (library, guard) = seeded_library(&[
            SeedTrack::new("Band", "Record", "Keeper"),
            SeedTrack::new("Band", "Record", "Goner"),
        ])
        .await;
        let goner = library.search(SearchArgs::new("Goner")).await.unwrap().remove(0);
        let path = library.get_file_path(goner.id).await.unwrap();
        assert!(path.starts_with(guard.dir.path()));

        std::fs::remove_file(&path).unwrap();
        library.sweeper().sweep().await.unwrap();

        assert!(library.search(SearchArgs::new("Goner")).await.unwrap().is_empty());
        assert!(!library.media_exists(&path).await.unwrap());
        assert!(matches!(
            library.get_track(goner.id).await,
            Err(Error::TrackNotFound(_))
        ));
        assert_eq!(library.track_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_back_to_back_scans_do_not_overlap() {
        let (library, guard) = temp_library_with(|_| {}).await;
        let library = Arc::new(library);
        guard.reader.set_delay(Duration::from_millis(5));

        // Unreadable files are read again by every scan, so both scans do work
        for i in 0..10 {
            let path = write_file(guard.dir.path(), &format!("{i:02} file.mp3"));
            if i % 2 == 0 {
                guard.reader.set(&path, MockMedia::new("Band", "Record", &format!("Song {i}")));
            } else {
                guard.reader.fail(&path);
            }
        }

        let first = {
            let library = Arc::clone(&library);
            tokio::spawn(async move { library.scan().await })
        };
        let second = {
            let library = Arc::clone(&library);
            tokio::spawn(async move { library.scan().await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        assert_eq!(guard.reader.max_in_flight(), 1);
        assert_eq!(guard.reader.reads(), 15);
        assert_eq!(library.track_count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_lookups() {
        let (library, _guard) = seeded_library(&[
            SeedTrack::new("Band", "First", "One").year(1999),
            SeedTrack::new("Band", "Second", "Two").year(2004),
        ])
        .await;
        let one = library.search(SearchArgs::new("One")).await.unwrap().remove(0);

        let track = library.get_track(one.id).await.unwrap();
        assert_eq!(track.album, "First");
        assert_eq!(track.format, "mp3");
        assert_eq!(track.year, Some(1999));

        let artist = library.get_artist(one.artist_id).await.unwrap();
        assert_eq!(artist.name, "Band");
        assert_eq!(artist.album_count, 2);

        let albums = library.get_artist_albums(one.artist_id).await.unwrap();
        assert_eq!(
            albums.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            ["First", "Second"]
        );

        assert!(library.get_album(9999).await.unwrap_err().is_not_found());
        assert!(library.get_file_path(9999).await.unwrap_err().is_not_found());
        assert!(library.get_album_files(9999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rescan_picks_up_new_tags() {
        let (library, guard) = temp_library_with(|_| {}).await;
        let path = write_file(guard.dir.path(), "song.mp3");
        guard.reader.set(&path, MockMedia::new("Band", "Record", "Old Title"));
        library.add_media(&path).await.unwrap();

        guard.reader.set(&path, MockMedia::new("Band", "Record", "New Title"));
        // Unchanged on disk, so a plain add keeps the old tags
        library.add_media(&path).await.unwrap();
        assert_eq!(library.search(SearchArgs::new("New")).await.unwrap().len(), 0);

        assert_eq!(library.rescan().await.unwrap(), 1);
        assert_eq!(library.search(SearchArgs::new("New")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disabled_scan_does_nothing() {
        let (library, guard) = temp_library_with(|config| config.scan.disable = true).await;
        let path = write_file(guard.dir.path(), "song.mp3");
        guard.reader.set(&path, MockMedia::new("Band", "Record", "Song"));

        library.scan().await.unwrap();
        assert_eq!(library.track_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_truncate_removes_database_file() {
        let db_dir = tempfile::tempdir().unwrap();
        let db_path = db_dir.path().join("catalog.db");
        let (library, _guard) =
            temp_library_with(|config| config.library.database = Some(db_path.clone())).await;
        assert!(db_path.exists());

        library.truncate().await.unwrap();
        assert!(!db_path.exists());
        assert!(library.queue().is_closed());
        assert!(matches!(
            library.track_count().await,
            Err(Error::Cancelled)
        ));
    }
}
