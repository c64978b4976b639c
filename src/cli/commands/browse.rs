//! Search and browse commands.

use tokio::runtime::Runtime;

use super::{BrowseOptions, BrowseTarget, Cli, SortKey, load_config, open_library, print_json};
use crate::library::{BrowseArgs, Browser, Library, Order, OrderBy, SearchArgs};

/// Print tracks matching `query`.
pub fn cmd_search(
    rt: &Runtime,
    cli: &Cli,
    query: &str,
    offset: u32,
    count: u32,
) -> anyhow::Result<()> {
    let mut config = load_config(cli);
    config.library.watch = false;

    rt.block_on(async {
        let (library, _cancel) = open_library(&config).await?;
        let args = SearchArgs {
            query: query.to_string(),
            offset,
            count,
        };
        let tracks = library.search(args).await?;
        print_json(&tracks)?;
        library.close().await;
        Ok(())
    })
}

/// Print one page of artists, albums or tracks with the total count.
pub fn cmd_browse(rt: &Runtime, cli: &Cli, target: &BrowseTarget) -> anyhow::Result<()> {
    let mut config = load_config(cli);
    config.library.watch = false;

    rt.block_on(async {
        let (library, _cancel) = open_library(&config).await?;
        match target {
            BrowseTarget::Artists(options) => {
                let (artists, total) = library.browse_artists(browse_args(options)).await?;
                print_json(&serde_json::json!({ "total": total, "artists": artists }))?;
            }
            BrowseTarget::Albums(options) => {
                let (albums, total) = library.browse_albums(browse_args(options)).await?;
                print_json(&serde_json::json!({ "total": total, "albums": albums }))?;
            }
            BrowseTarget::Tracks(options) => {
                let (tracks, total) = library.browse_tracks(browse_args(options)).await?;
                print_json(&serde_json::json!({ "total": total, "tracks": tracks }))?;
            }
        }
        library.close().await;
        Ok(())
    })
}

fn browse_args(options: &BrowseOptions) -> BrowseArgs {
    let order_by = match options.order_by {
        SortKey::Id => OrderBy::Id,
        SortKey::Name => OrderBy::Name,
        SortKey::Artist => OrderBy::ArtistName,
        SortKey::Random => OrderBy::Random,
        SortKey::Favourites => OrderBy::Favourites,
        SortKey::Recent => OrderBy::RecentlyPlayed,
        SortKey::Frequent => OrderBy::FrequentlyPlayed,
        SortKey::Year => OrderBy::Year,
    };

    BrowseArgs {
        page: options.page,
        per_page: options.per_page,
        offset: 0,
        order: if options.desc { Order::Desc } else { Order::Asc },
        order_by,
        artist_id: options.artist_id,
        from_year: options.from_year,
        to_year: options.to_year,
    }
}
