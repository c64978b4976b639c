//! Rating command.

use tokio::runtime::Runtime;

use super::{Cli, RateTarget, load_config, open_library};
use crate::library::Library;

/// Rate a track, album or artist. Zero clears the rating.
pub fn cmd_rate(
    rt: &Runtime,
    cli: &Cli,
    target: RateTarget,
    id: i64,
    rating: u8,
) -> anyhow::Result<()> {
    let mut config = load_config(cli);
    config.library.watch = false;

    rt.block_on(async {
        let (library, _cancel) = open_library(&config).await?;
        let result = match target {
            RateTarget::Track => library.set_track_rating(id, rating).await,
            RateTarget::Album => library.set_album_rating(id, rating).await,
            RateTarget::Artist => library.set_artist_rating(id, rating).await,
        };
        library.close().await;
        result?;

        if rating == 0 {
            println!("Rating cleared.");
        } else {
            println!("Rated {rating}/5.");
        }
        Ok(())
    })
}
