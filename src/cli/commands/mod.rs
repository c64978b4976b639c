//! CLI command definitions and dispatch.
//!
//! Each group of subcommands lives in its own submodule:
//! - `scan`: scanning, watching, rescanning and cleanup
//! - `browse`: search and paginated listings
//! - `rate`: ratings

mod browse;
mod rate;
mod scan;

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

use crate::config::{self, Config};
use crate::library::{Library, LocalLibrary};
use crate::metadata::LoftyReader;

pub use browse::{cmd_browse, cmd_search};
pub use rate::cmd_rate;
pub use scan::{cmd_cleanup, cmd_rescan, cmd_scan, cmd_watch};

/// Local music library engine
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true, env = "MUSIC_LIBRARY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Catalog database, overriding the configured one
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,

    /// Skip scan and cleanup throttling
    #[arg(long, global = true)]
    pub fast: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan the library roots and clean up missing files
    Scan {
        /// Extra roots to scan besides the configured ones
        paths: Vec<PathBuf>,
    },
    /// Scan, then keep the catalog in sync until Ctrl+C
    Watch {
        /// Extra roots to watch besides the configured ones
        paths: Vec<PathBuf>,
    },
    /// Search tracks by title, album or artist
    Search {
        query: String,
        /// Matches to skip
        #[arg(long, default_value_t = 0)]
        offset: u32,
        /// Maximum matches, 0 for all
        #[arg(long, default_value_t = 20)]
        count: u32,
    },
    /// List artists, albums or tracks a page at a time
    Browse {
        #[command(subcommand)]
        target: BrowseTarget,
    },
    /// Remove catalog entries whose files are gone
    Cleanup,
    /// Re-read tags of every indexed file
    Rescan,
    /// Rate a track, album or artist from 0 (unrated) to 5
    Rate {
        #[arg(value_enum)]
        target: RateTarget,
        id: i64,
        rating: u8,
    },
}

#[derive(Subcommand)]
pub enum BrowseTarget {
    Artists(BrowseOptions),
    Albums(BrowseOptions),
    Tracks(BrowseOptions),
}

#[derive(Args, Clone)]
pub struct BrowseOptions {
    /// Zero-based page
    #[arg(long, default_value_t = 0)]
    pub page: u32,
    /// Entries per page, 0 for all
    #[arg(long, default_value_t = 20)]
    pub per_page: u32,
    #[arg(long, value_enum, default_value_t = SortKey::Id)]
    pub order_by: SortKey,
    /// Sort descending
    #[arg(long)]
    pub desc: bool,
    #[arg(long)]
    pub artist_id: Option<i64>,
    #[arg(long)]
    pub from_year: Option<i32>,
    #[arg(long)]
    pub to_year: Option<i32>,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Id,
    Name,
    Artist,
    Random,
    Favourites,
    Recent,
    Frequent,
    Year,
}

#[derive(ValueEnum, Clone, Copy, PartialEq, Eq)]
pub enum RateTarget {
    Track,
    Album,
    Artist,
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let rt = Runtime::new()?;

    match &cli.command {
        Commands::Scan { paths } => cmd_scan(&rt, cli, paths),
        Commands::Watch { paths } => cmd_watch(&rt, cli, paths),
        Commands::Search {
            query,
            offset,
            count,
        } => cmd_search(&rt, cli, query, *offset, *count),
        Commands::Browse { target } => cmd_browse(&rt, cli, target),
        Commands::Cleanup => cmd_cleanup(&rt, cli),
        Commands::Rescan => cmd_rescan(&rt, cli),
        Commands::Rate {
            target,
            id,
            rating,
        } => cmd_rate(&rt, cli, *target, *id, *rating),
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Load the configuration with command-line overrides applied.
pub(crate) fn load_config(cli: &Cli) -> Config {
    let mut config = match &cli.config {
        Some(path) => config::load_from(path),
        None => config::load(),
    };

    if let Some(database) = &cli.database {
        config.library.database = Some(database.clone());
    } else if config.library.database.is_none() {
        config.library.database = config::default_database_path();
    }
    if cli.fast {
        config.scan.fast = true;
    }
    config
}

/// Open and initialize the library. Ctrl+C cancels the returned token.
pub(crate) async fn open_library(
    config: &Config,
) -> anyhow::Result<(LocalLibrary, CancellationToken)> {
    let cancel = CancellationToken::new();
    let library = LocalLibrary::open(config, Arc::new(LoftyReader), cancel.clone()).await?;
    library.initialize().await?;

    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!(target: "cli", "Interrupted, shutting down");
            on_signal.cancel();
        }
    });

    Ok((library, cancel))
}

/// Print a value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
