//! Scanning, watching, rescan and cleanup commands.

use std::path::PathBuf;
use tokio::runtime::Runtime;

use super::{Cli, load_config, open_library};
use crate::library::{Library, SweepOutcome};

/// Scan the configured roots plus `paths`, then sweep.
pub fn cmd_scan(rt: &Runtime, cli: &Cli, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut config = load_config(cli);
    config.library.watch = false;
    config.library.paths.extend(paths.iter().cloned());

    rt.block_on(async {
        let (library, _cancel) = open_library(&config).await?;
        if library.scanner().paths().is_empty() {
            anyhow::bail!("No library paths configured; pass one or add it to the config file");
        }

        library.scan().await?;
        println!("Scan complete. {} tracks in the catalog.", library.track_count().await?);
        library.close().await;
        Ok(())
    })
}

/// Scan, then follow filesystem changes until interrupted.
pub fn cmd_watch(rt: &Runtime, cli: &Cli, paths: &[PathBuf]) -> anyhow::Result<()> {
    let mut config = load_config(cli);
    config.library.watch = true;
    config.library.paths.extend(paths.iter().cloned());

    rt.block_on(async {
        let (library, cancel) = open_library(&config).await?;
        if !library.is_watching() {
            anyhow::bail!("Directory watching is not available on this system");
        }

        library.scan().await?;
        println!(
            "Watching {} roots ({} tracks). Press Ctrl+C to stop.",
            library.scanner().paths().len(),
            library.track_count().await?
        );

        cancel.cancelled().await;
        library.close().await;
        Ok(())
    })
}

/// Re-read the tags of every indexed file.
pub fn cmd_rescan(rt: &Runtime, cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli);
    config.library.watch = false;

    rt.block_on(async {
        let (library, _cancel) = open_library(&config).await?;
        let updated = library.rescan().await?;
        println!("Rescan complete. {updated} files re-read.");
        library.close().await;
        Ok(())
    })
}

/// Run one cleanup sweep.
pub fn cmd_cleanup(rt: &Runtime, cli: &Cli) -> anyhow::Result<()> {
    let mut config = load_config(cli);
    config.library.watch = false;

    rt.block_on(async {
        let (library, _cancel) = open_library(&config).await?;
        match library.sweeper().sweep().await? {
            SweepOutcome::Finished(report) => println!(
                "Checked {} tracks: removed {} tracks, {} albums, {} artists.",
                report.checked, report.removed_tracks, report.removed_albums, report.removed_artists
            ),
            SweepOutcome::AlreadyRunning => println!("A cleanup is already running."),
            SweepOutcome::Cancelled => println!("Cleanup interrupted."),
        }
        library.close().await;
        Ok(())
    })
}
