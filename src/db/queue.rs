//! Single-writer database job queue.
//!
//! One worker task owns the only [`SqliteConnection`] and runs submitted jobs
//! strictly in submission order. Everything that touches the catalog, reads
//! included, goes through here, so no two jobs ever interleave.
//!
//! ```ignore
//! let (queue, worker) = DatabaseQueue::spawn(conn, 64, cancel.clone());
//!
//! let count: i64 = queue
//!     .submit_and_wait(|conn| {
//!         Box::pin(async move {
//!             let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM tracks")
//!                 .fetch_one(&mut *conn)
//!                 .await?;
//!             Ok(n)
//!         })
//!     })
//!     .await?;
//! ```

use futures::FutureExt;
use futures::future::BoxFuture;
use sqlx::{Connection, SqliteConnection};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// A unit of work run against the store's single connection.
pub type DatabaseExecutable = Box<
    dyn for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<()>> + Send + 'static,
>;

/// Cheap, cloneable handle for submitting jobs to the worker.
#[derive(Clone)]
pub struct DatabaseQueue {
    jobs: mpsc::Sender<DatabaseExecutable>,
    cancel: CancellationToken,
}

impl DatabaseQueue {
    /// Start the worker task. It stops when `cancel` fires, closing `conn`.
    pub fn spawn(
        conn: SqliteConnection,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run_worker(conn, rx, cancel.clone()));
        (Self { jobs: tx, cancel }, worker)
    }

    /// Enqueue a job without waiting for it to run.
    ///
    /// Only waits while the mailbox is full. Errors from the job itself are
    /// logged by the worker.
    pub async fn submit<F>(&self, job: F) -> Result<()>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<()>> + Send + 'static,
    {
        self.enqueue(Box::new(job)).await
    }

    /// Enqueue a job and wait for its result.
    pub async fn submit_and_wait<T, F>(&self, job: F) -> Result<T>
    where
        T: Send + 'static,
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> BoxFuture<'c, Result<T>> + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.submit(move |conn| {
            Box::pin(async move {
                let result = job(conn).await;
                if let Err(e) = &result {
                    tracing::warn!(target: "db::queue", error = %e, "Database job failed");
                }
                // The waiter may have been cancelled; nobody to tell then
                let _ = reply_tx.send(result);
                Ok(())
            })
        })
        .await?;

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            reply = reply_rx => reply.unwrap_or(Err(Error::JobPanicked)),
        }
    }

    /// True once the queue has been told to stop.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.jobs.is_closed()
    }

    async fn enqueue(&self, job: DatabaseExecutable) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            sent = self.jobs.send(job) => sent.map_err(|_| Error::Cancelled),
        }
    }
}

async fn run_worker(
    mut conn: SqliteConnection,
    mut jobs: mpsc::Receiver<DatabaseExecutable>,
    cancel: CancellationToken,
) {
    tracing::debug!(target: "db::queue", "Database worker started");

    loop {
        let job = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let outcome = AssertUnwindSafe(async { job(&mut conn).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(target: "db::queue", error = %e, "Database job failed");
            }
            Err(panic) => {
                tracing::error!(
                    target: "db::queue",
                    panic = panic_message(panic.as_ref()),
                    "Database job panicked"
                );
            }
        }
    }

    // Pending jobs are dropped here; their waiters see the cancellation
    jobs.close();
    let dropped = std::iter::from_fn(|| jobs.try_recv().ok()).count();
    if dropped > 0 {
        tracing::debug!(target: "db::queue", dropped, "Discarded queued jobs");
    }

    if let Err(e) = conn.close().await {
        tracing::warn!(target: "db::queue", error = %e, "Failed to close database connection");
    }
    tracing::debug!(target: "db::queue", "Database worker stopped");
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    async fn memory_queue(capacity: usize) -> (DatabaseQueue, JoinHandle<()>, CancellationToken) {
        let conn = crate::db::open(None).await.unwrap();
        let cancel = CancellationToken::new();
        let (queue, worker) = DatabaseQueue::spawn(conn, capacity, cancel.clone());
        (queue, worker, cancel)
    }

    #[tokio::test]
    async fn test_submit_and_wait_returns_value() {
        let (queue, _worker, _cancel) = memory_queue(4).await;

        let value: i64 = queue
            .submit_and_wait(|conn| {
                Box::pin(async move {
                    let (n,): (i64,) = sqlx::query_as("SELECT 40 + 2").fetch_one(&mut *conn).await?;
                    Ok(n)
                })
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn test_jobs_run_in_submission_order() {
        let (queue, _worker, _cancel) = memory_queue(2).await;
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue
                .submit(move |_conn| {
                    Box::pin(async move {
                        // Early jobs take longer; order must still hold
                        tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(i))).await;
                        seen.lock().push(i);
                        Ok(())
                    })
                })
                .await
                .unwrap();
        }

        // A waited job runs after everything before it
        queue
            .submit_and_wait(|_conn| Box::pin(async { Ok(()) }))
            .await
            .unwrap();

        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_failing_job_does_not_stop_worker() {
        let (queue, _worker, _cancel) = memory_queue(4).await;

        let failed: Result<()> = queue
            .submit_and_wait(|conn| {
                Box::pin(async move {
                    sqlx::query("SELECT * FROM no_such_table").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .await;
        assert!(matches!(failed, Err(Error::Database(_))));

        let ok: i64 = queue
            .submit_and_wait(|_conn| Box::pin(async { Ok(7) }))
            .await
            .unwrap();
        assert_eq!(ok, 7);
    }

    #[tokio::test]
    async fn test_panicking_job_is_survived() {
        let (queue, _worker, _cancel) = memory_queue(4).await;

        let crashed: Result<i64> = queue
            .submit_and_wait(|conn| {
                Box::pin(async move {
                    let (n,): (i64,) = sqlx::query_as("SELECT 1").fetch_one(&mut *conn).await?;
                    if n == 1 {
                        panic!("job blew up");
                    }
                    Ok(n)
                })
            })
            .await;
        assert!(matches!(crashed, Err(Error::JobPanicked)));

        let ok: i64 = queue
            .submit_and_wait(|_conn| Box::pin(async { Ok(1) }))
            .await
            .unwrap();
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn test_cancellation_releases_waiters() {
        let (queue, worker, cancel) = memory_queue(4).await;

        let blocked = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .submit_and_wait(|_conn| {
                        Box::pin(async {
                            tokio::time::sleep(Duration::from_secs(60)).await;
                            Ok(())
                        })
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), blocked)
            .await
            .expect("waiter was not released")
            .unwrap();
        assert!(matches!(result, Err(Error::Cancelled)));

        // Submitting after shutdown fails fast
        assert!(queue.is_closed());
        let late = queue.submit(|_conn| Box::pin(async { Ok(()) })).await;
        assert!(matches!(late, Err(Error::Cancelled)));

        // The worker finishes the in-flight job before it notices the token
        worker.abort();
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let (_queue, worker, cancel) = memory_queue(4).await;
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .expect("worker did not stop")
            .unwrap();
    }

    /// Log sink shared with a test subscriber.
    #[derive(Clone, Default)]
    struct CapturedLog(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_waited_job_failure_is_logged() {
        let log = CapturedLog::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer({
                let log = log.clone();
                move || log.clone()
            })
            .with_ansi(false)
            .finish();
        // Current-thread runtime, so the worker logs through this subscriber
        let _default = tracing::subscriber::set_default(subscriber);

        let (queue, _worker, _cancel) = memory_queue(4).await;
        let failed: Result<()> = queue
            .submit_and_wait(|conn| {
                Box::pin(async move {
                    sqlx::query("SELECT * FROM missing_table").execute(&mut *conn).await?;
                    Ok(())
                })
            })
            .await;
        assert!(failed.is_err());

        let output = String::from_utf8_lossy(&log.0.lock()).into_owned();
        assert!(output.contains("Database job failed"), "{output}");
        assert!(output.contains("missing_table"), "{output}");
    }
}
