//! Orphan cleanup.
//!
//! The sweeper walks the track table in id order, a batch at a time, and
//! removes rows whose file is no longer on disk. Albums and artists left
//! without tracks go afterwards, together with their stats rows.
//!
//! Only one sweep runs at a time; a sweep requested while another is active
//! returns straight away.

use parking_lot::RwLock;
use sqlx::{QueryBuilder, Sqlite};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;

use crate::config::CleanupConfig;
use crate::db::{self, DatabaseQueue};
use crate::error::Result;

/// Counts from a completed sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: u64,
    pub removed_tracks: u64,
    pub removed_albums: u64,
    pub removed_artists: u64,
}

/// How a sweep request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    Finished(SweepReport),
    /// Another sweep was active
    AlreadyRunning,
    /// Shutdown interrupted the sweep between batches
    Cancelled,
}

/// Removes catalog rows whose files are gone.
#[derive(Clone)]
pub struct Sweeper {
    queue: DatabaseQueue,
    config: CleanupConfig,
    fast: bool,
    cancel: CancellationToken,
    running: Arc<RwLock<bool>>,
}

/// Clears the running flag when the sweep ends, however it ends.
struct RunningGuard(Arc<RwLock<bool>>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        *self.0.write() = false;
    }
}

impl Sweeper {
    pub fn new(
        queue: DatabaseQueue,
        config: CleanupConfig,
        fast: bool,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            queue,
            config,
            fast,
            cancel,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    fn try_start(&self) -> Option<RunningGuard> {
        let mut running = self.running.write();
        if *running {
            return None;
        }
        *running = true;
        Some(RunningGuard(Arc::clone(&self.running)))
    }

    /// Run one sweep over the whole catalog.
    ///
    /// A failure to fetch a batch aborts the sweep. Files that cannot be
    /// stat'ed for reasons other than "not found" are kept.
    pub async fn sweep(&self) -> Result<SweepOutcome> {
        if self.is_running() {
            tracing::info!(target: "library::cleanup", "Cleanup already running");
            return Ok(SweepOutcome::AlreadyRunning);
        }
        let Some(_running) = self.try_start() else {
            tracing::info!(target: "library::cleanup", "Cleanup already running");
            return Ok(SweepOutcome::AlreadyRunning);
        };

        let start = Instant::now();
        let total = self
            .queue
            .submit_and_wait(|conn| Box::pin(async move { Ok(db::count_tracks(conn).await?) }))
            .await?;

        let mut report = SweepReport::default();
        if total == 0 {
            tracing::debug!(target: "library::cleanup", "No tracks to check");
        } else if !self.sweep_tracks(total, &mut report).await? {
            return Ok(SweepOutcome::Cancelled);
        }

        let (albums, artists) = self
            .queue
            .submit_and_wait(|conn| Box::pin(async move { Ok(db::delete_empty_parents(conn).await?) }))
            .await?;
        report.removed_albums = albums;
        report.removed_artists = artists;

        tracing::info!(
            target: "library::cleanup",
            checked = report.checked,
            removed_tracks = report.removed_tracks,
            removed_albums = report.removed_albums,
            removed_artists = report.removed_artists,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Cleanup finished"
        );
        Ok(SweepOutcome::Finished(report))
    }

    /// Check every track a batch at a time. Returns false when cancelled.
    async fn sweep_tracks(&self, total: i64, report: &mut SweepReport) -> Result<bool> {
        let batch_size = self.config.batch_size.max(1);
        let mut cursor = 0i64;
        tracing::info!(target: "library::cleanup", total, "Cleaning up missing files");

        loop {
            let batch = match self.fetch_batch(cursor, batch_size).await {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(target: "library::cleanup", error = %e, "Failed to fetch tracks, aborting cleanup");
                    return Err(e);
                }
            };
            let Some(&(last_id, _)) = batch.last() else {
                break;
            };
            cursor = last_id;

            let mut missing = Vec::new();
            for (id, path) in &batch {
                report.checked += 1;
                match tokio::fs::metadata(path).await {
                    Ok(_) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => missing.push(*id),
                    Err(e) => {
                        tracing::warn!(target: "library::cleanup", path = %path, error = %e, "Cannot stat file, keeping it");
                    }
                }
            }

            if !missing.is_empty() {
                report.removed_tracks += self.remove_tracks(missing).await?;
            }

            if batch.len() < batch_size as usize {
                break;
            }
            if !self.fast && !self.pause(self.config.batch_pause).await {
                tracing::info!(target: "library::cleanup", checked = report.checked, "Cleanup cancelled");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Sweep every `period` until cancelled.
    pub fn spawn_periodic(&self, period: Duration) -> JoinHandle<()> {
        let sweeper = self.clone();

        tokio::spawn(async move {
            let mut timer = interval(period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately; scans already sweep at start
            timer.tick().await;

            tracing::info!(target: "library::cleanup", period_s = period.as_secs(), "Periodic cleanup started");
            loop {
                tokio::select! {
                    _ = sweeper.cancel.cancelled() => break,
                    _ = timer.tick() => {
                        if let Err(e) = sweeper.sweep().await {
                            tracing::warn!(target: "library::cleanup", error = %e, "Periodic cleanup failed");
                        }
                    }
                }
            }
            tracing::info!(target: "library::cleanup", "Periodic cleanup stopped");
        })
    }

    async fn fetch_batch(&self, after: i64, limit: u32) -> Result<Vec<(i64, String)>> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let rows: Vec<(i64, String)> = sqlx::query_as(
                        "SELECT id, fs_path FROM tracks WHERE id > ? ORDER BY id LIMIT ?",
                    )
                    .bind(after)
                    .bind(i64::from(limit))
                    .fetch_all(&mut *conn)
                    .await?;
                    Ok(rows)
                })
            })
            .await
    }

    async fn remove_tracks(&self, ids: Vec<i64>) -> Result<u64> {
        let removed = self
            .queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let mut query = QueryBuilder::<Sqlite>::new("DELETE FROM tracks WHERE id IN (");
                    let mut separated = query.separated(", ");
                    for id in &ids {
                        separated.push_bind(*id);
                    }
                    separated.push_unseparated(")");
                    let result = query.build().execute(&mut *conn).await?;
                    Ok(result.rows_affected())
                })
            })
            .await?;

        tracing::info!(target: "library::cleanup", removed, "Removed tracks with missing files");
        Ok(removed)
    }

    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}
