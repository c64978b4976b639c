//! Audio file metadata reading.
//!
//! The indexer only sees the [`MediaFile`] abstraction, produced by a
//! [`MediaReader`]. The default reader uses lofty for format-independent
//! tag access; tests inject their own readers.

use lofty::file::{AudioFile, TaggedFileExt};
use lofty::probe::Probe;
use lofty::tag::Accessor;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

mod track_number;

pub use track_number::guess_track_number;

/// Tag values of a single media file.
///
/// Blank strings and zero numbers mean "not present"; the indexer decides
/// on fallbacks.
pub trait MediaFile: Send {
    fn artist(&self) -> &str;
    fn album(&self) -> &str;
    fn title(&self) -> &str;
    /// Track number, 0 when unknown
    fn track(&self) -> u32;
    fn length(&self) -> Duration;
    /// Release year, 0 when unknown
    fn year(&self) -> u32;
    /// Bitrate in kbps, 0 when unknown
    fn bitrate(&self) -> u32;
}

/// Opens media files and extracts their tags.
///
/// Called from a blocking thread, so implementations may do synchronous I/O.
pub trait MediaReader: Send + Sync {
    fn read(&self, path: &Path) -> Result<Box<dyn MediaFile>>;
}

/// Track metadata as read from the file's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: Duration,
    pub track_number: Option<u32>,
    pub year: Option<u32>,
    pub bitrate: Option<u32>,
}

impl MediaFile for TrackMetadata {
    fn artist(&self) -> &str {
        &self.artist
    }

    fn album(&self) -> &str {
        &self.album
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn track(&self) -> u32 {
        self.track_number.unwrap_or(0)
    }

    fn length(&self) -> Duration {
        self.duration
    }

    fn year(&self) -> u32 {
        self.year.unwrap_or(0)
    }

    fn bitrate(&self) -> u32 {
        self.bitrate.unwrap_or(0)
    }
}

/// [`MediaReader`] backed by lofty.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoftyReader;

impl MediaReader for LoftyReader {
    fn read(&self, path: &Path) -> Result<Box<dyn MediaFile>> {
        Ok(Box::new(read(path)?))
    }
}

/// Read tags and audio properties from a file.
pub fn read(path: &Path) -> Result<TrackMetadata> {
    // Probe the file to determine format and read tags
    let tagged_file = Probe::open(path)
        .map_err(|e| Error::metadata(path, format!("failed to open file for probing: {e}")))?
        .read()
        .map_err(|e| Error::metadata(path, format!("failed to read file metadata: {e}")))?;

    // Get the primary tag, or fall back to the first available tag
    let tag = tagged_file
        .primary_tag()
        .or_else(|| tagged_file.first_tag());

    let text = |value: Option<std::borrow::Cow<'_, str>>| {
        value.map(|s| s.trim().to_string()).unwrap_or_default()
    };

    let properties = tagged_file.properties();

    Ok(TrackMetadata {
        title: text(tag.and_then(|t| t.title())),
        artist: text(tag.and_then(|t| t.artist())),
        album: text(tag.and_then(|t| t.album())),
        duration: properties.duration(),
        track_number: tag.and_then(|t| t.track()).filter(|n| *n > 0),
        year: tag.and_then(|t| t.year()).filter(|y| *y > 0),
        bitrate: properties
            .audio_bitrate()
            .or_else(|| properties.overall_bitrate())
            .filter(|b| *b > 0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_non_audio_file_returns_error() {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        writeln!(file, "This is just some text, not music.").expect("Failed to write to temp file");

        let result = read(file.path());

        assert!(matches!(result, Err(Error::Metadata { .. })));
    }

    #[test]
    fn test_read_non_existent_file_returns_error() {
        let path = Path::new("non_existent_file.mp3");
        assert!(LoftyReader.read(path).is_err());
    }

    #[test]
    fn test_track_metadata_as_media_file() {
        let meta = TrackMetadata {
            title: "Song".to_string(),
            artist: "Band".to_string(),
            album: "Record".to_string(),
            duration: Duration::from_secs(200),
            track_number: None,
            year: Some(1999),
            bitrate: None,
        };
        let media: &dyn MediaFile = &meta;

        assert_eq!(media.title(), "Song");
        assert_eq!(media.track(), 0);
        assert_eq!(media.year(), 1999);
        assert_eq!(media.bitrate(), 0);
        assert_eq!(media.length(), Duration::from_secs(200));
    }
}
