//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\music-library\config.toml
//! - macOS: ~/Library/Application Support/music-library/config.toml
//! - Linux: ~/.config/music-library/config.toml
//!
//! Durations are written as human-readable strings ("15ms", "5s", "1h 30m").
//! Every section is optional; missing keys fall back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Library roots and catalog location
    pub library: LibraryConfig,

    /// Directory scanning
    pub scan: ScanConfig,

    /// Orphan cleanup sweep
    pub cleanup: CleanupConfig,

    /// Database job queue
    pub queue: QueueConfig,
}

/// Library management settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Library scan roots
    pub paths: Vec<PathBuf>,

    /// Catalog database file. Unset keeps the catalog in memory.
    pub database: Option<PathBuf>,

    /// Whether to watch library directories for changes
    pub watch: bool,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            database: None,
            watch: true,
        }
    }
}

/// Scanner throttling and concurrency.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Skip scanning entirely (watching still works)
    pub disable: bool,

    /// Entries a walker visits before pausing. 0 disables throttling.
    pub files_per_operation: u64,

    /// Pause after every `files_per_operation` entries
    #[serde(with = "humantime_duration")]
    pub sleep_after_operation: Duration,

    /// Pause before a scan starts walking
    #[serde(with = "humantime_duration")]
    pub initial_wait_duration: Duration,

    /// Skip every pause: initial wait, throttling and cleanup batch pauses
    pub fast: bool,

    /// Upper bound on directory walks started by the watcher at once
    pub max_concurrent_walks: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            disable: false,
            files_per_operation: 1000,
            sleep_after_operation: Duration::from_millis(15),
            initial_wait_duration: Duration::from_secs(1),
            fast: false,
            max_concurrent_walks: 4,
        }
    }
}

impl ScanConfig {
    /// Configuration with every pause turned off.
    pub fn fast() -> Self {
        Self {
            fast: true,
            ..Self::default()
        }
    }

    /// `(entries, pause)` when walkers should throttle, `None` otherwise.
    pub fn throttle(&self) -> Option<(u64, Duration)> {
        if self.fast || self.files_per_operation == 0 || self.sleep_after_operation.is_zero() {
            return None;
        }
        Some((self.files_per_operation, self.sleep_after_operation))
    }

    /// Pause before walking, if any.
    pub fn initial_wait(&self) -> Option<Duration> {
        if self.fast || self.initial_wait_duration.is_zero() {
            return None;
        }
        Some(self.initial_wait_duration)
    }
}

/// Orphan cleanup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanupConfig {
    /// Tracks checked per batch
    pub batch_size: u32,

    /// Pause between batches (skipped in fast mode)
    #[serde(with = "humantime_duration")]
    pub batch_pause: Duration,

    /// Run the sweep periodically at this interval
    #[serde(
        with = "humantime_duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub interval: Option<Duration>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            batch_pause: Duration::from_secs(5),
            interval: None,
        }
    }
}

/// Database job queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Jobs that may wait in the mailbox before submitters block
    pub capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { capacity: 64 }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("music-library"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Default catalog location in the OS data directory
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("music-library").join("library.db"))
}

/// Load configuration from the default location.
///
/// Returns default config if file doesn't exist or can't be parsed.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from a specific file.
///
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoConfigDir)?;
    save_to(config, &path)
}

/// Save configuration to a specific file, atomically.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Duration Serialization
// ============================================================================

/// Serde adapter storing [`Duration`] as a humantime string.
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&humantime::format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(D::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer, de::Error as _};
        use std::time::Duration;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => serializer.collect_str(&humantime::format_duration(*d)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => humantime::parse_duration(raw.trim())
                    .map(Some)
                    .map_err(D::Error::custom),
                None => Ok(None),
            }
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine config directory")]
    NoConfigDir,

    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

impl From<ConfigError> for crate::error::Error {
    fn from(e: ConfigError) -> Self {
        crate::error::Error::Config(e.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_serializes() {
        let config = Config::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[library]"));
        assert!(toml.contains("[scan]"));
        assert!(toml.contains("[cleanup]"));
        assert!(toml.contains("[queue]"));
        assert!(toml.contains("sleep_after_operation = \"15ms\""));
    }

    #[test]
    fn test_config_roundtrip() {
        let mut config = Config::default();
        config.library.paths.push(PathBuf::from("/music"));
        config.scan.files_per_operation = 250;
        config.cleanup.interval = Some(Duration::from_secs(3600));

        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml).unwrap();

        assert_eq!(parsed.library.paths, vec![PathBuf::from("/music")]);
        assert_eq!(parsed.scan.files_per_operation, 250);
        assert_eq!(parsed.cleanup.interval, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let toml = r#"
[scan]
sleep_after_operation = "1s 500ms"
fast = true
"#;
        let config: Config = toml::from_str(toml).unwrap();

        assert_eq!(config.scan.sleep_after_operation, Duration::from_millis(1500));
        assert!(config.scan.fast);

        assert_eq!(config.scan.files_per_operation, 1000);
        assert_eq!(config.cleanup.batch_size, 100);
        assert_eq!(config.cleanup.batch_pause, Duration::from_secs(5));
        assert_eq!(config.cleanup.interval, None);
        assert_eq!(config.queue.capacity, 64);
        assert!(config.library.watch);
        assert!(config.library.database.is_none());
    }

    #[test]
    fn test_invalid_duration_is_rejected() {
        let toml = r#"
[cleanup]
batch_pause = "soon"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn test_fast_mode_disables_pauses() {
        let fast = ScanConfig::fast();
        assert_eq!(fast.throttle(), None);
        assert_eq!(fast.initial_wait(), None);

        let normal = ScanConfig::default();
        assert_eq!(normal.throttle(), Some((1000, Duration::from_millis(15))));
        assert_eq!(normal.initial_wait(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_save_and_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.library.paths.push(PathBuf::from("/srv/music"));
        save_to(&config, &path).unwrap();

        let loaded = load_from(&path);
        assert_eq!(loaded.library.paths, vec![PathBuf::from("/srv/music")]);
        assert!(!path.with_extension("toml.tmp").exists());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_from(&dir.path().join("absent.toml"));
        assert!(config.library.paths.is_empty());
    }
}
