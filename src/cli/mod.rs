//! Command-line interface for the music library.
//!
//! Provides commands for scanning, watching, searching, browsing and rating
//! without running the full server.

mod commands;

pub use commands::{Cli, Commands, run_command};
