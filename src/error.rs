//! Library-wide error types.
//!
//! Library modules return [`Result`] built on the [`Error`] enum below,
//! while the CLI in `main.rs` uses `anyhow` for convenient propagation.
//!
//! # Design
//!
//! - [`Error`]: top-level error enum shared by every subsystem
//! - [`Error::is_not_found`] and [`Error::is_cancelled`] let callers branch on
//!   the two kinds they usually care about without matching every variant
//!
//! # Example
//!
//! ```ignore
//! use music_library::error::{Error, Result};
//!
//! async fn first_track(library: &LocalLibrary) -> Result<TrackInfo> {
//!     match library.get_track(1).await {
//!         Err(e) if e.is_not_found() => { /* 404 */ }
//!         other => other,
//!     }
//! }
//! ```

use std::path::PathBuf;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level library error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration failed
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Tags could not be read from a media file
    #[error("Metadata error for {path}: {message}")]
    Metadata { path: PathBuf, message: String },

    /// Media file does not exist on disk
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Track {0} not found")]
    TrackNotFound(i64),

    #[error("Album {0} not found")]
    AlbumNotFound(i64),

    #[error("Artist {0} not found")]
    ArtistNotFound(i64),

    /// Ratings live in 0..=5
    #[error("Rating must be in the 0-5 range, got {0}")]
    InvalidRating(u8),

    /// The library is shutting down
    #[error("Operation cancelled")]
    Cancelled,

    /// A database job panicked before producing a result
    #[error("Database job panicked")]
    JobPanicked,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a metadata error.
    pub fn metadata(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a file not found error.
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound(path.into())
    }

    /// Create a config error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Add context to an error.
    pub fn context(self, ctx: impl Into<String>) -> Self {
        Self::WithContext {
            context: ctx.into(),
            source: Box::new(self),
        }
    }

    /// True for every "no such entity" error, looking through context wrappers.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::FileNotFound(_)
            | Self::TrackNotFound(_)
            | Self::AlbumNotFound(_)
            | Self::ArtistNotFound(_) => true,
            Self::WithContext { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True when the operation was aborted by shutdown.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::WithContext { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Add context to an error result.
    fn with_context(self, ctx: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Io(e).context(ctx))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, sqlx::Error> {
    fn with_context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| Error::Database(e).context(ctx))
    }
}
