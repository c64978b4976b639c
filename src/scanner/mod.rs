//! Concurrent library scanning.
//!
//! A [`Scanner`] walks every configured root at once, one [`Walker`] per
//! root, handing supported files to the indexer and registering visited
//! directories with the filesystem watch. Scans never overlap: a new scan
//! first waits for the running one and for any walks the watcher started.

use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::ScanConfig;
use crate::library::indexer::Indexer;

pub mod watcher;

use watcher::DirectoryWatch;

/// File extensions treated as media, compared case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "ogg", "oga", "wav", "fla", "flac", "m4a", "opus", "webm", "mp4",
];

/// True if the file name has a supported media extension.
///
/// Dot-files such as `.mp3` have no extension and are rejected.
pub fn is_supported_format(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.iter().any(|s| s.eq_ignore_ascii_case(ext)))
}

/// An entry produced by a directory walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalkEntry {
    Directory(PathBuf),
    File(PathBuf),
}

/// Walks `root` recursively on a blocking thread.
///
/// Entries arrive in walk order; the root itself comes first. The walk stops
/// early once the receiver is dropped.
pub fn walk(root: PathBuf) -> mpsc::Receiver<WalkEntry> {
    let (tx, rx) = mpsc::channel(100);

    // Spawn a blocking task to perform the synchronous file system traversal
    tokio::task::spawn_blocking(move || {
        for entry in WalkDir::new(&root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(target: "scanner", root = %root.display(), error = %e, "Error while walking");
                    continue;
                }
            };

            let is_dir = entry.file_type().is_dir();
            let path = entry.into_path();
            let item = if is_dir {
                WalkEntry::Directory(path)
            } else {
                WalkEntry::File(path)
            };

            if tx.blocking_send(item).is_err() {
                break;
            }
        }
    });

    rx
}

/// Counts walks in flight so scans and shutdown can wait for them.
#[derive(Clone)]
pub struct WalkGroup {
    active: Arc<watch::Sender<usize>>,
}

/// Marks one walk as in flight until dropped.
pub struct WalkGuard {
    active: Arc<watch::Sender<usize>>,
}

impl WalkGroup {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            active: Arc::new(tx),
        }
    }

    pub fn enter(&self) -> WalkGuard {
        self.active.send_modify(|n| *n += 1);
        WalkGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub fn active(&self) -> usize {
        *self.active.borrow()
    }

    /// Resolves once no walk is in flight.
    pub async fn wait(&self) {
        let mut rx = self.active.subscribe();
        if rx.wait_for(|n| *n == 0).await.is_err() {
            tracing::debug!(target: "scanner", "Walk counter dropped while waiting");
        }
    }
}

impl Default for WalkGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WalkGuard {
    fn drop(&mut self) {
        self.active.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Walks one directory tree into the catalog.
#[derive(Clone)]
pub struct Walker {
    indexer: Indexer,
    watch: Option<DirectoryWatch>,
    config: Arc<ScanConfig>,
    cancel: CancellationToken,
    group: WalkGroup,
    permits: Arc<Semaphore>,
}

impl Walker {
    pub fn new(
        indexer: Indexer,
        watch: Option<DirectoryWatch>,
        config: ScanConfig,
        cancel: CancellationToken,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_walks.max(1)));
        Self {
            indexer,
            watch,
            config: Arc::new(config),
            cancel,
            group: WalkGroup::new(),
            permits,
        }
    }

    pub fn group(&self) -> &WalkGroup {
        &self.group
    }

    /// Walk `root`, indexing supported files as they are found.
    ///
    /// Per-file failures are logged and skipped. Returns early, without an
    /// error, when cancelled.
    pub async fn walk(&self, root: PathBuf) {
        let _walking = self.group.enter();
        let start = Instant::now();
        let throttle = self.config.throttle();
        let mut entries = walk(root.clone());
        let mut since_pause = 0u64;
        let mut indexed = 0u64;

        tracing::info!(target: "scanner", root = %root.display(), "Walking started");

        loop {
            let entry = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    tracing::info!(target: "scanner", root = %root.display(), "Walk cancelled");
                    return;
                }
                entry = entries.recv() => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            match entry {
                WalkEntry::Directory(dir) => self.watch_directory(&dir),
                WalkEntry::File(path) if is_supported_format(&path) => {
                    match self.indexer.add_media(&path).await {
                        Ok(_) => indexed += 1,
                        Err(e) if e.is_cancelled() => return,
                        Err(e) => {
                            tracing::warn!(target: "scanner", path = %path.display(), error = %e, "Failed to index file");
                        }
                    }
                }
                WalkEntry::File(_) => {}
            }

            since_pause += 1;
            if let Some((every, pause)) = throttle
                && since_pause >= every
            {
                since_pause = 0;
                if !self.pause(pause).await {
                    return;
                }
            }
        }

        tracing::info!(
            target: "scanner",
            root = %root.display(),
            indexed,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Walking finished"
        );
    }

    /// Start a background walk, bounded by `max_concurrent_walks`.
    ///
    /// The walk counts as in flight from the moment it is requested.
    pub fn spawn_walk(&self, root: PathBuf) -> JoinHandle<()> {
        let walker = self.clone();
        let pending = self.group.enter();

        tokio::spawn(async move {
            let _pending = pending;
            let permit = tokio::select! {
                biased;
                _ = walker.cancel.cancelled() => return,
                permit = Arc::clone(&walker.permits).acquire_owned() => permit,
            };
            let Ok(_permit) = permit else {
                return;
            };
            walker.walk(root).await;
        })
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    pub async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    pub(crate) fn watch_directory(&self, dir: &Path) {
        if let Some(watch) = &self.watch
            && let Err(e) = watch.watch(dir)
        {
            tracing::warn!(target: "scanner", path = %dir.display(), error = %e, "Failed to watch directory");
        }
    }

    pub(crate) fn unwatch_directory(&self, dir: &Path) {
        // The OS usually drops the watch itself once the directory is gone
        if let Some(watch) = &self.watch
            && let Err(e) = watch.unwatch(dir)
        {
            tracing::debug!(target: "scanner", path = %dir.display(), error = %e, "Unwatch after removal failed");
        }
    }
}

/// Coordinates full scans over the configured roots.
pub struct Scanner {
    paths: RwLock<Vec<PathBuf>>,
    walker: Walker,
    scan_lock: Mutex<()>,
}

impl Scanner {
    pub fn new(walker: Walker) -> Self {
        Self {
            paths: RwLock::new(Vec::new()),
            walker,
            scan_lock: Mutex::new(()),
        }
    }

    /// Add a root to scan. Duplicates are ignored.
    pub fn add_path(&self, path: PathBuf) -> bool {
        let mut paths = self.paths.write();
        if paths.contains(&path) {
            return false;
        }
        paths.push(path);
        true
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.paths.read().clone()
    }

    pub fn walker(&self) -> &Walker {
        &self.walker
    }

    /// Walk every root concurrently and wait for all of them.
    ///
    /// A scan already running, or walks started by the watcher, are waited
    /// for first.
    pub async fn scan(&self) {
        let _scanning = self.scan_lock.lock().await;
        self.walker.group.wait().await;

        if let Some(wait) = self.walker.config.initial_wait() {
            tracing::info!(target: "scanner", wait_ms = wait.as_millis() as u64, "Pausing before scan");
            if !self.walker.pause(wait).await {
                return;
            }
        }

        let start = Instant::now();
        let roots = self.paths();
        tracing::info!(target: "scanner", roots = roots.len(), "Scan started");

        let mut walkers = JoinSet::new();
        for root in roots {
            let walker = self.walker.clone();
            walkers.spawn(async move { walker.walk(root).await });
        }
        while let Some(result) = walkers.join_next().await {
            if let Err(e) = result {
                tracing::error!(target: "scanner", error = %e, "Walker task failed");
            }
        }

        tracing::info!(
            target: "scanner",
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Scan finished"
        );
    }

    /// Wait for a running scan and any in-flight walks to finish.
    pub async fn wait(&self) {
        drop(self.scan_lock.lock().await);
        self.walker.group.wait().await;
    }
}
