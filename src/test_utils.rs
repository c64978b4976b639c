//! Test utilities and fixtures for library tests.
//!
//! Provides an in-memory catalog behind a running queue, a scriptable
//! [`MediaReader`] so tests never need real audio files, and helpers that
//! build a small library from a list of tracks.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{SeedTrack, seeded_library};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (library, _guard) = seeded_library(&[SeedTrack::new("Band", "Record", "Song")]).await;
//!     // ... test logic
//! }
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::config::{Config, ScanConfig};
use crate::db::{self, DatabaseQueue};
use crate::error::{Error, Result};
use crate::library::{Library, LocalLibrary};
use crate::metadata::{MediaFile, MediaReader};

/// Stops the queue worker when dropped.
pub struct QueueGuard {
    cancel: CancellationToken,
}

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A migrated in-memory catalog behind a running queue.
pub async fn temp_queue() -> (DatabaseQueue, QueueGuard) {
    let conn = db::open(None).await.expect("Failed to open memory db");
    let cancel = CancellationToken::new();
    let (queue, _worker) = DatabaseQueue::spawn(conn, 16, cancel.clone());
    queue
        .submit_and_wait(|conn| Box::pin(db::migrate(conn)))
        .await
        .expect("Failed to migrate");
    (queue, QueueGuard { cancel })
}

/// Tag values handed out by [`MockReader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockMedia {
    pub artist: String,
    pub album: String,
    pub title: String,
    pub track: u32,
    pub length: Duration,
    pub year: u32,
    pub bitrate: u32,
}

impl MockMedia {
    /// Three minutes long, no track number, year or bitrate.
    pub fn new(artist: &str, album: &str, title: &str) -> Self {
        Self {
            artist: artist.to_string(),
            album: album.to_string(),
            title: title.to_string(),
            track: 0,
            length: Duration::from_secs(180),
            year: 0,
            bitrate: 0,
        }
    }
}

impl MediaFile for MockMedia {
    fn artist(&self) -> &str {
        &self.artist
    }

    fn album(&self) -> &str {
        &self.album
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn track(&self) -> u32 {
        self.track
    }

    fn length(&self) -> Duration {
        self.length
    }

    fn year(&self) -> u32 {
        self.year
    }

    fn bitrate(&self) -> u32 {
        self.bitrate
    }
}

/// A [`MediaReader`] answering from a table instead of real files.
///
/// Paths without an entry, or marked with [`MockReader::fail`], fail with a
/// metadata error. Counts reads and the most reads ever in flight at once.
#[derive(Default)]
pub struct MockReader {
    media: Mutex<HashMap<PathBuf, MockMedia>>,
    failing: Mutex<HashSet<PathBuf>>,
    delay: Mutex<Duration>,
    reads: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, path: &Path, media: MockMedia) {
        self.failing.lock().remove(path);
        self.media.lock().insert(path.to_path_buf(), media);
    }

    pub fn fail(&self, path: &Path) {
        self.failing.lock().insert(path.to_path_buf());
    }

    /// Make every read take at least `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl MediaReader for MockReader {
    fn read(&self, path: &Path) -> Result<Box<dyn MediaFile>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = if self.failing.lock().contains(path) {
            Err(Error::metadata(path, "unreadable tags"))
        } else {
            match self.media.lock().get(path) {
                Some(media) => Ok(Box::new(media.clone()) as Box<dyn MediaFile>),
                None => Err(Error::metadata(path, "no tags")),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Create a placeholder file; its contents are never parsed.
pub fn write_file(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"not really audio").expect("Failed to write test file");
    path
}

/// Keeps a test library's reader and root directory alive.
pub struct TestGuard {
    pub reader: Arc<MockReader>,
    /// The library's only root
    pub dir: TempDir,
}

/// An initialized in-memory library rooted at a fresh temp directory.
///
/// Scans run in fast mode and watching is off; `configure` may change
/// anything afterwards.
pub async fn temp_library_with(configure: impl FnOnce(&mut Config)) -> (LocalLibrary, TestGuard) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let reader = Arc::new(MockReader::new());

    let mut config = Config::default();
    config.library.paths = vec![dir.path().to_path_buf()];
    config.library.watch = false;
    config.scan = ScanConfig::fast();
    configure(&mut config);

    let library = LocalLibrary::open(&config, reader.clone(), CancellationToken::new())
        .await
        .expect("Failed to open library");
    library.initialize().await.expect("Failed to initialize library");

    (library, TestGuard { reader, dir })
}

/// One track for [`seeded_library`].
#[derive(Debug, Clone)]
pub struct SeedTrack {
    pub media: MockMedia,
    /// Subdirectory of the library root holding the file
    pub dir: Option<String>,
}

impl SeedTrack {
    pub fn new(artist: &str, album: &str, title: &str) -> Self {
        Self {
            media: MockMedia::new(artist, album, title),
            dir: None,
        }
    }

    pub fn year(mut self, year: u32) -> Self {
        self.media.year = year;
        self
    }

    pub fn length(mut self, length: Duration) -> Self {
        self.media.length = length;
        self
    }

    pub fn dir(mut self, dir: &str) -> Self {
        self.dir = Some(dir.to_string());
        self
    }
}

/// A library holding `tracks`, indexed one by one in order.
///
/// File names carry a running number, so track numbers follow the slice.
pub async fn seeded_library(tracks: &[SeedTrack]) -> (LocalLibrary, TestGuard) {
    let (library, guard) = temp_library_with(|_| {}).await;

    for (i, seed) in tracks.iter().enumerate() {
        let dir = match &seed.dir {
            Some(sub) => guard.dir.path().join(sub),
            None => guard.dir.path().to_path_buf(),
        };
        std::fs::create_dir_all(&dir).expect("Failed to create track directory");

        let path = write_file(&dir, &format!("{:02} {}.mp3", i + 1, seed.media.title));
        guard.reader.set(&path, seed.media.clone());
        library.add_media(&path).await.expect("Failed to index track");
    }

    (library, guard)
}
