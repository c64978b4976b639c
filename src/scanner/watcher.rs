//! File system watcher keeping the catalog in step with the disk.
//!
//! Uses the `notify` crate with the full debouncer. Every directory is
//! watched on its own (non-recursively) as walkers discover it, so newly
//! created directories are picked up by walking them.
//!
//! # Design
//!
//! - **Debounced events**: rapid changes to one file coalesce into one event
//! - **Pure classification**: [`plan_actions`] turns an event into
//!   [`WatchAction`]s without touching the catalog
//! - **Same queue**: actions go through the indexer, so watch-driven writes
//!   are serialized with scans like everything else
//! - **Bounded walks**: new directories are walked through
//!   [`Walker::spawn_walk`], capped by `max_concurrent_walks`
//!
//! # Usage
//!
//! ```rust,ignore
//! let (watch, events) = DirectoryWatch::new()?;
//! watch.watch(Path::new("/music"))?;
//! tokio::spawn(run_event_loop(events, WatchHandler::new(indexer, walker, watch), cancel));
//! ```

use notify::event::{ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Walker, is_supported_format};
use crate::error::Result;
use crate::library::indexer::Indexer;

/// How long the debouncer waits for a burst of events to settle.
const DEBOUNCE_TIMEOUT: Duration = Duration::from_millis(500);

/// What the catalog should do about one filesystem change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchAction {
    /// A media file appeared
    AddFile(PathBuf),
    /// A media file's contents changed: remove, then index again
    UpdateFile(PathBuf),
    /// A media file went away
    RemoveFile(PathBuf),
    /// A directory appeared: watch and walk it
    AddDirectory(PathBuf),
    /// A directory went away: unwatch it and drop everything under it
    RemoveDirectory(PathBuf),
}

/// What is currently at a path on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    Missing,
    File,
    Directory,
}

impl PathState {
    pub fn of(path: &Path) -> Self {
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => Self::Directory,
            Ok(_) => Self::File,
            Err(_) => Self::Missing,
        }
    }
}

/// Translate a debounced event into catalog actions.
///
/// `state_of` reports what is on disk now; it is only consulted for paths
/// that appeared or changed.
pub fn plan_actions(event: &Event, state_of: impl Fn(&Path) -> PathState) -> Vec<WatchAction> {
    let mut actions = Vec::new();

    match event.kind {
        // Attribute-only changes never affect the catalog
        EventKind::Modify(ModifyKind::Metadata(_))
        | EventKind::Access(_)
        | EventKind::Any
        | EventKind::Other => {}

        EventKind::Remove(kind) => {
            for path in &event.paths {
                removed(path, Some(kind), &mut actions);
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {
            for path in &event.paths {
                removed(path, None, &mut actions);
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            if let [from, to] = event.paths.as_slice() {
                removed(from, None, &mut actions);
                appeared(to, state_of(to), &mut actions);
            }
        }

        EventKind::Modify(ModifyKind::Name(RenameMode::To)) | EventKind::Create(_) => {
            for path in &event.paths {
                appeared(path, state_of(path), &mut actions);
            }
        }

        // Unpaired rename: decide by whether the path still exists
        EventKind::Modify(ModifyKind::Name(_)) => {
            for path in &event.paths {
                match state_of(path) {
                    PathState::Missing => removed(path, None, &mut actions),
                    state => appeared(path, state, &mut actions),
                }
            }
        }

        EventKind::Modify(_) => {
            for path in &event.paths {
                if state_of(path) == PathState::File && is_supported_format(path) {
                    actions.push(WatchAction::UpdateFile(path.clone()));
                }
            }
        }
    }

    actions
}

fn removed(path: &Path, kind: Option<RemoveKind>, actions: &mut Vec<WatchAction>) {
    let action = match kind {
        Some(RemoveKind::Folder) => Some(WatchAction::RemoveDirectory(path.to_path_buf())),
        Some(RemoveKind::File) => {
            is_supported_format(path).then(|| WatchAction::RemoveFile(path.to_path_buf()))
        }
        // Gone from disk, so guess from the name
        _ if is_supported_format(path) => Some(WatchAction::RemoveFile(path.to_path_buf())),
        _ => Some(WatchAction::RemoveDirectory(path.to_path_buf())),
    };
    actions.extend(action);
}

fn appeared(path: &Path, state: PathState, actions: &mut Vec<WatchAction>) {
    match state {
        PathState::Directory => actions.push(WatchAction::AddDirectory(path.to_path_buf())),
        PathState::File if is_supported_format(path) => {
            actions.push(WatchAction::AddFile(path.to_path_buf()));
        }
        PathState::File | PathState::Missing => {}
    }
}

struct WatchState {
    debouncer: Debouncer<RecommendedWatcher, RecommendedCache>,
    watched: HashSet<PathBuf>,
}

/// Shared handle to the OS watcher.
///
/// Clones refer to the same watcher, which stops when the last clone drops.
#[derive(Clone)]
pub struct DirectoryWatch {
    state: Arc<Mutex<WatchState>>,
}

impl DirectoryWatch {
    /// Start the OS watcher with nothing watched yet.
    ///
    /// Returns the handle and the stream of debounced events.
    pub fn new() -> std::result::Result<(Self, mpsc::Receiver<DebounceEventResult>), WatchError> {
        let (tx, rx) = mpsc::channel(256);

        let debouncer = new_debouncer(DEBOUNCE_TIMEOUT, None, move |result: DebounceEventResult| {
            // Runs on the debouncer's own thread, outside the runtime
            if tx.blocking_send(result).is_err() {
                tracing::trace!(target: "scanner::watcher", "Event receiver gone, dropping events");
            }
        })
        .map_err(|e| WatchError::Init(e.to_string()))?;

        let watch = Self {
            state: Arc::new(Mutex::new(WatchState {
                debouncer,
                watched: HashSet::new(),
            })),
        };
        Ok((watch, rx))
    }

    /// Watch a single directory. Already watched directories are a no-op.
    pub fn watch(&self, dir: &Path) -> std::result::Result<(), WatchError> {
        let mut state = self.state.lock();
        if state.watched.contains(dir) {
            return Ok(());
        }

        state
            .debouncer
            .watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| WatchError::Watch(dir.to_path_buf(), e.to_string()))?;
        state.watched.insert(dir.to_path_buf());

        tracing::debug!(target: "scanner::watcher", path = %dir.display(), "Watching directory");
        Ok(())
    }

    /// Stop watching a directory and everything watched below it.
    pub fn unwatch(&self, dir: &Path) -> std::result::Result<(), WatchError> {
        let mut state = self.state.lock();

        let below: Vec<PathBuf> = state
            .watched
            .iter()
            .filter(|p| p.starts_with(dir) && p.as_path() != dir)
            .cloned()
            .collect();
        for path in below {
            state.watched.remove(&path);
            if let Err(e) = state.debouncer.unwatch(&path) {
                tracing::trace!(target: "scanner::watcher", path = %path.display(), error = %e, "Unwatch failed");
            }
        }

        if !state.watched.remove(dir) {
            return Ok(());
        }
        tracing::debug!(target: "scanner::watcher", path = %dir.display(), "Unwatching directory");
        state
            .debouncer
            .unwatch(dir)
            .map_err(|e| WatchError::Watch(dir.to_path_buf(), e.to_string()))
    }

    pub fn is_watched(&self, dir: &Path) -> bool {
        self.state.lock().watched.contains(dir)
    }

    pub fn watched_count(&self) -> usize {
        self.state.lock().watched.len()
    }
}

/// Applies [`WatchAction`]s to the catalog.
///
/// Directory watches go through the walker's [`DirectoryWatch`], if it has one.
#[derive(Clone)]
pub struct WatchHandler {
    indexer: Indexer,
    walker: Walker,
}

impl WatchHandler {
    pub fn new(indexer: Indexer, walker: Walker) -> Self {
        Self { indexer, walker }
    }

    pub async fn apply(&self, action: WatchAction) -> Result<()> {
        match action {
            WatchAction::AddFile(path) => {
                tracing::info!(target: "scanner::watcher", path = %path.display(), "File created");
                self.indexer.add_media(&path).await?;
            }
            WatchAction::UpdateFile(path) => {
                tracing::info!(target: "scanner::watcher", path = %path.display(), "File modified");
                self.indexer.remove_file(&path).await?;
                self.indexer.add_media(&path).await?;
            }
            WatchAction::RemoveFile(path) => {
                self.indexer.remove_file(&path).await?;
            }
            WatchAction::AddDirectory(path) => {
                tracing::info!(target: "scanner::watcher", path = %path.display(), "Directory created");
                self.walker.watch_directory(&path);
                self.walker.spawn_walk(path);
            }
            WatchAction::RemoveDirectory(path) => {
                self.walker.unwatch_directory(&path);
                self.indexer.remove_directory(&path).await?;
            }
        }
        Ok(())
    }
}

/// Consume watcher events until cancelled.
pub async fn run_event_loop(
    mut events: mpsc::Receiver<DebounceEventResult>,
    handler: WatchHandler,
    cancel: CancellationToken,
) {
    tracing::info!(target: "scanner::watcher", "Directory watcher started");

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = events.recv() => match result {
                Some(result) => result,
                None => break,
            },
        };

        match result {
            Ok(events) => {
                for event in events {
                    for action in plan_actions(&event, PathState::of) {
                        match handler.apply(action).await {
                            Ok(()) => {}
                            Err(e) if e.is_cancelled() => return,
                            Err(e) => {
                                tracing::warn!(target: "scanner::watcher", error = %e, "Failed to apply change");
                            }
                        }
                    }
                }
            }
            Err(errors) => {
                for error in errors {
                    tracing::warn!(target: "scanner::watcher", error = %error, "Watch error");
                }
            }
        }
    }

    tracing::info!(target: "scanner::watcher", "Directory watcher stopped");
}

/// Errors that can occur during file watching.
#[derive(Debug, Clone, thiserror::Error)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {0}")]
    Init(String),
    #[error("Failed to watch {0}: {1}")]
    Watch(PathBuf, String),
}
