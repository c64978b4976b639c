//! Favourites, ratings and play counts.
//!
//! Stats rows are created on first use and never reference their parent
//! row through a foreign key.

use chrono::{DateTime, Utc};
use sqlx::{Connection, QueryBuilder, Sqlite, SqliteConnection};

use super::LocalLibrary;
use crate::error::Result;
use crate::model::{Favourites, Rating};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatKind {
    Track,
    Album,
    Artist,
}

impl StatKind {
    fn stats_table(self) -> &'static str {
        match self {
            Self::Track => "user_stats",
            Self::Album => "albums_stats",
            Self::Artist => "artists_stats",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Track => "track_id",
            Self::Album => "album_id",
            Self::Artist => "artist_id",
        }
    }

    fn entity_table(self) -> &'static str {
        match self {
            Self::Track => "tracks",
            Self::Album => "albums",
            Self::Artist => "artists",
        }
    }
}

impl LocalLibrary {
    /// Count a play of a track at `at`.
    ///
    /// A play is only counted once a third of the track's duration has
    /// passed since the previous counted play. Returns whether it counted.
    pub async fn record_track_play(&self, track_id: i64, at: DateTime<Utc>) -> Result<bool> {
        let played_at = at.timestamp();
        let counted = self
            .queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO user_stats (track_id, last_played, play_count)
                        VALUES (?, ?, 1)
                        ON CONFLICT(track_id) DO UPDATE SET
                            last_played = excluded.last_played,
                            play_count = play_count + 1
                        WHERE last_played IS NULL
                            OR last_played + COALESCE(
                                (SELECT duration / 1000 FROM tracks WHERE id = excluded.track_id), 0
                            ) / 3 < excluded.last_played
                        "#,
                    )
                    .bind(track_id)
                    .bind(played_at)
                    .execute(&mut *conn)
                    .await?;
                    Ok(result.rows_affected() > 0)
                })
            })
            .await?;

        tracing::debug!(target: "library::stats", track_id, counted, "Recorded play");
        Ok(counted)
    }

    /// Mark tracks, albums and artists as favourite, stamped with the
    /// current time.
    pub async fn record_favourite(&self, favourites: Favourites) -> Result<()> {
        let now = Utc::now().timestamp();
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let mut tx = conn.begin().await?;
                    for (kind, ids) in grouped(&favourites) {
                        if ids.is_empty() {
                            continue;
                        }
                        let key = kind.key();
                        let mut query = QueryBuilder::<Sqlite>::new(format!(
                            "INSERT INTO {} ({key}, favourite) ",
                            kind.stats_table()
                        ));
                        query.push_values(ids, |mut row, id| {
                            row.push_bind(*id).push_bind(now);
                        });
                        query.push(format!(
                            " ON CONFLICT({key}) DO UPDATE SET favourite = excluded.favourite"
                        ));
                        query.build().execute(&mut *tx).await?;
                    }
                    tx.commit().await?;
                    Ok(())
                })
            })
            .await
    }

    /// Clear the favourite mark. Unknown ids are ignored.
    pub async fn remove_favourite(&self, favourites: Favourites) -> Result<()> {
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let mut tx = conn.begin().await?;
                    for (kind, ids) in grouped(&favourites) {
                        if ids.is_empty() {
                            continue;
                        }
                        let mut query = QueryBuilder::<Sqlite>::new(format!(
                            "UPDATE {} SET favourite = NULL WHERE {} IN (",
                            kind.stats_table(),
                            kind.key()
                        ));
                        let mut separated = query.separated(", ");
                        for id in ids {
                            separated.push_bind(*id);
                        }
                        separated.push_unseparated(")");
                        query.build().execute(&mut *tx).await?;
                    }
                    tx.commit().await?;
                    Ok(())
                })
            })
            .await
    }

    /// Favourite ids of entities still in the catalog, newest first.
    pub async fn get_favourites(&self) -> Result<Favourites> {
        self.queue
            .submit_and_wait(|conn| {
                Box::pin(async move {
                    Ok(Favourites {
                        artists: favourite_ids(conn, StatKind::Artist).await?,
                        albums: favourite_ids(conn, StatKind::Album).await?,
                        tracks: favourite_ids(conn, StatKind::Track).await?,
                    })
                })
            })
            .await
    }

    /// Rate a track 0-5. Zero clears the rating.
    ///
    /// The stats row is written even when no such track is cataloged yet.
    pub async fn set_track_rating(&self, track_id: i64, rating: u8) -> Result<()> {
        self.set_rating(StatKind::Track, track_id, rating).await
    }

    /// Rate an album 0-5. Zero clears the rating.
    pub async fn set_album_rating(&self, album_id: i64, rating: u8) -> Result<()> {
        self.set_rating(StatKind::Album, album_id, rating).await
    }

    /// Rate an artist 0-5. Zero clears the rating.
    pub async fn set_artist_rating(&self, artist_id: i64, rating: u8) -> Result<()> {
        self.set_rating(StatKind::Artist, artist_id, rating).await
    }

    async fn set_rating(&self, kind: StatKind, id: i64, rating: u8) -> Result<()> {
        let rating = Rating::new(rating)?;
        self.queue
            .submit_and_wait(move |conn| {
                Box::pin(async move {
                    let key = kind.key();
                    sqlx::query(&format!(
                        "INSERT INTO {} ({key}, user_rating) VALUES (?, ?) \
                         ON CONFLICT({key}) DO UPDATE SET user_rating = excluded.user_rating",
                        kind.stats_table()
                    ))
                    .bind(id)
                    .bind(rating.to_db())
                    .execute(&mut *conn)
                    .await?;
                    Ok(())
                })
            })
            .await?;

        tracing::debug!(target: "library::stats", ?kind, id, rating = rating.get(), "Rating set");
        Ok(())
    }
}

fn grouped(favourites: &Favourites) -> [(StatKind, &[i64]); 3] {
    [
        (StatKind::Track, favourites.tracks.as_slice()),
        (StatKind::Album, favourites.albums.as_slice()),
        (StatKind::Artist, favourites.artists.as_slice()),
    ]
}

async fn favourite_ids(conn: &mut SqliteConnection, kind: StatKind) -> Result<Vec<i64>> {
    let key = kind.key();
    let rows: Vec<(i64,)> = sqlx::query_as(&format!(
        "SELECT {key} FROM {} WHERE favourite IS NOT NULL AND {key} IN (SELECT id FROM {}) \
         ORDER BY favourite DESC, {key} DESC",
        kind.stats_table(),
        kind.entity_table()
    ))
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::library::Library;
    use crate::test_utils::{SeedTrack, seeded_library};
    use chrono::TimeZone;
    use std::time::Duration;

    #[tokio::test]
    async fn test_rating_set_and_cleared() {
        let (library, _guard) = seeded_library(&[SeedTrack::new("Band", "Record", "Song")]).await;
        let id = library.search(Default::default()).await.unwrap()[0].id;

        library.set_track_rating(id, 3).await.unwrap();
        assert_eq!(library.get_track(id).await.unwrap().rating.get(), 3);

        library.set_track_rating(id, 0).await.unwrap();
        assert_eq!(library.get_track(id).await.unwrap().rating.get(), 0);
    }

    #[tokio::test]
    async fn test_invalid_rating_leaves_stored_value() {
        let (library, _guard) = seeded_library(&[SeedTrack::new("Band", "Record", "Song")]).await;
        let track = library.search(Default::default()).await.unwrap().remove(0);

        library.set_album_rating(track.album_id, 4).await.unwrap();
        let err = library.set_album_rating(track.album_id, 6).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRating(6)));
        assert_eq!(library.get_album(track.album_id).await.unwrap().rating.get(), 4);

        library.set_artist_rating(track.artist_id, 5).await.unwrap();
        assert_eq!(library.get_artist(track.artist_id).await.unwrap().rating.get(), 5);
    }

    #[tokio::test]
    async fn test_stats_do_not_need_a_cataloged_parent() {
        let (library, _guard) = seeded_library(&[]).await;

        library.set_track_rating(42, 2).await.unwrap();
        library.set_album_rating(7, 4).await.unwrap();
        assert!(library.record_track_play(42, Utc::now()).await.unwrap());

        let (rating, plays): (Option<i64>, i64) = library
            .queue()
            .submit_and_wait(|conn| {
                Box::pin(async move {
                    Ok(sqlx::query_as(
                        "SELECT user_rating, play_count FROM user_stats WHERE track_id = 42",
                    )
                    .fetch_one(&mut *conn)
                    .await?)
                })
            })
            .await
            .unwrap();
        assert_eq!((rating, plays), (Some(2), 1));

        // Nothing to list until the track itself exists
        assert!(library.get_favourites().await.unwrap().tracks.is_empty());
    }

    #[tokio::test]
    async fn test_play_counted_after_a_third_of_the_track() {
        let seed = SeedTrack::new("Band", "Record", "Song").length(Duration::from_secs(180));
        let (library, _guard) = seeded_library(&[seed]).await;
        let id = library.search(Default::default()).await.unwrap()[0].id;
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

        assert!(library.record_track_play(id, start).await.unwrap());
        // Within 60 seconds of the last play
        assert!(!library.record_track_play(id, start + chrono::Duration::seconds(30)).await.unwrap());
        assert!(library.record_track_play(id, start + chrono::Duration::seconds(61)).await.unwrap());

        let track = library.get_track(id).await.unwrap();
        assert_eq!(track.plays, 2);
        assert_eq!(track.last_played, Some(1_700_000_061));
    }

    #[tokio::test]
    async fn test_favourites_round_trip() {
        let (library, _guard) = seeded_library(&[
            SeedTrack::new("Band", "Record", "One"),
            SeedTrack::new("Band", "Record", "Two"),
        ])
        .await;
        let tracks = library.search(Default::default()).await.unwrap();
        let album_id = tracks[0].album_id;
        let artist_id = tracks[0].artist_id;

        library
            .record_favourite(Favourites {
                artists: vec![artist_id],
                albums: vec![album_id],
                tracks: vec![tracks[0].id, tracks[1].id],
            })
            .await
            .unwrap();

        let favourites = library.get_favourites().await.unwrap();
        assert_eq!(favourites.artists, [artist_id]);
        assert_eq!(favourites.albums, [album_id]);
        // Same timestamp, so the newer id comes first
        assert_eq!(favourites.tracks, [tracks[1].id, tracks[0].id]);
        assert!(library.get_album(album_id).await.unwrap().favourite.is_some());

        library
            .remove_favourite(Favourites {
                tracks: vec![tracks[1].id],
                albums: vec![album_id],
                ..Favourites::default()
            })
            .await
            .unwrap();

        let favourites = library.get_favourites().await.unwrap();
        assert_eq!(favourites.tracks, [tracks[0].id]);
        assert!(favourites.albums.is_empty());
        assert_eq!(favourites.artists, [artist_id]);
    }
}
