//! Core data models for the music library.
//!
//! These are the shapes handed to callers of [`Library`](crate::library::Library)
//! and [`Browser`](crate::library::Browser). Row-mapping structs live next to
//! the queries that produce them; the types here never expose a track's real
//! location on disk.
//!
//! # Database Schema
//!
//! - `artists` - artists with unique names
//! - `albums` - albums identified by (name, directory)
//! - `tracks` - audio files, unique by path
//! - `user_stats`, `albums_stats`, `artists_stats` - favourites, ratings, plays

use serde::Serialize;

use crate::error::{Error, Result};

/// Album artist shown when an album's tracks come from several artists.
pub const VARIOUS_ARTISTS: &str = "Various Artists";

/// Placeholder for a blank artist or album tag.
pub const UNKNOWN: &str = "Unknown";

/// A star rating. Zero means "not rated".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Rating(u8);

impl Rating {
    pub const MAX: u8 = 5;

    /// Validates `value` against the 0-5 range.
    pub fn new(value: u8) -> Result<Self> {
        if value > Self::MAX {
            return Err(Error::InvalidRating(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn is_rated(self) -> bool {
        self.0 > 0
    }

    /// Stored form: unrated becomes NULL.
    pub(crate) fn to_db(self) -> Option<i64> {
        self.is_rated().then_some(i64::from(self.0))
    }

    /// Anything outside 1-5 reads back as unrated.
    pub(crate) fn from_db(value: Option<i64>) -> Self {
        match value {
            Some(v @ 1..=5) => Self(v as u8),
            _ => Self(0),
        }
    }
}

impl TryFrom<u8> for Rating {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

/// An artist in the music library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    /// Albums with at least one track by this artist
    pub album_count: i64,
    /// Unix timestamp of when the artist was marked favourite
    pub favourite: Option<i64>,
    pub rating: Rating,
}

/// An album in the music library.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Album {
    pub id: i64,
    pub name: String,
    /// The single artist on the album, or [`VARIOUS_ARTISTS`]
    pub artist: String,
    pub song_count: i64,
    /// Total duration in milliseconds
    pub duration: i64,
    /// Average bitrate in kbps
    pub avg_bitrate: i64,
    /// Latest year among the album's tracks
    pub year: Option<i32>,
    pub plays: i64,
    pub last_played: Option<i64>,
    pub favourite: Option<i64>,
    pub rating: Rating,
}

/// A track as returned by searching and browsing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackInfo {
    pub id: i64,
    pub title: String,
    pub album_id: i64,
    pub album: String,
    pub artist_id: i64,
    pub artist: String,
    pub track_number: i64,
    /// Lowercase file extension ("flac", "mp3", ...)
    pub format: String,
    /// Duration in milliseconds
    pub duration: i64,
    pub year: Option<i32>,
    /// Bitrate in kbps
    pub bitrate: Option<i64>,
    /// File size in bytes
    pub size: Option<i64>,
    /// Unix timestamp of when the track was first indexed
    pub created_at: Option<i64>,
    pub favourite: Option<i64>,
    pub rating: Rating,
    pub last_played: Option<i64>,
    pub plays: i64,
}

/// Favourite ids grouped by kind.
///
/// Used both to mark or unmark favourites and to list them, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Favourites {
    pub artists: Vec<i64>,
    pub albums: Vec<i64>,
    pub tracks: Vec<i64>,
}
