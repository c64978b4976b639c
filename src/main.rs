//! Music Library command-line tool.
//!
//! Scans, watches and queries a local music catalog.

use clap::Parser;
use music_library::cli;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Log filter used when `RUST_LOG` is unset. Covers the crate's log targets.
const DEFAULT_FILTER: &str = "music_library=info,library=info,scanner=info,db=info,cli=info";

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging; stdout is reserved for command output
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)))
        .init();

    cli::run_command(&args)
}
