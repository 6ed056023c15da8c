//! # Configuration Module
//!
//! Data directory setup and tunable parameters for Speler.
//!
//! ## Data Storage
//!
//! Speler keeps its catalog database (and optional `config.json`) in the
//! platform-standard data directory:
//! - Linux: `~/.local/share/speler/`
//! - macOS: `~/Library/Application Support/speler/`
//! - Windows: `%APPDATA%\speler\`
//!
//! ## Config File
//!
//! `config.json` is optional. Every key may be omitted:
//!
//! ```json
//! {
//!   "db_path": "/srv/music/speler.db",
//!   "music_dir": "~/Music",
//!   "engine": { "anti_repeat_window_secs": 3600, "ratings_per_play": 5 }
//! }
//! ```

use anyhow::{Context, Result};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "speler";
const DB_FILE: &str = "speler.db";
const CONFIG_FILE: &str = "config.json";

/// Returns the Speler data directory, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The speler subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let speler_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&speler_dir).with_context(|| {
        format!(
            "Failed to create Speler data directory at {}. Please check file permissions.",
            speler_dir.display()
        )
    })?;

    Ok(speler_dir)
}

/// Returns the platform-appropriate database file path.
///
/// # Examples
///
/// ```no_run
/// use speler::config::get_db_path;
///
/// let db_path = get_db_path()?;
/// println!("Database location: {}", db_path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join(DB_FILE))
}

/// Tuning of the selection and rating engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Span in which an already-played artist is avoided, and from which
    /// comparison candidates are drawn.
    pub anti_repeat_window_secs: u64,
    /// Comparisons a song may take part in per play.
    pub ratings_per_play: u32,
    /// Multiplier applied to the elapsed-days reference spread.
    pub spread_damping: f64,
    pub priority_values_ttl_secs: u64,
    pub rank_ttl_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            anti_repeat_window_secs: 2400,
            ratings_per_play: 5,
            spread_damping: 1.66,
            priority_values_ttl_secs: 7200,
            rank_ttl_secs: 3600,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn anti_repeat_window(&self) -> chrono::Duration {
        let secs = i64::try_from(self.anti_repeat_window_secs).unwrap_or(i64::MAX);
        chrono::Duration::seconds(secs.min(i64::MAX / 1000))
    }

    /// How many top-priority candidates the anti-repeat pass looks at.
    /// One per minute of window, at least one.
    #[must_use]
    pub fn top_k(&self) -> usize {
        usize::try_from(self.anti_repeat_window_secs / 60).unwrap_or(usize::MAX).max(1)
    }

    #[must_use]
    pub const fn priority_values_ttl(&self) -> Duration {
        Duration::from_secs(self.priority_values_ttl_secs)
    }

    #[must_use]
    pub const fn rank_ttl(&self) -> Duration {
        Duration::from_secs(self.rank_ttl_secs)
    }
}

/// Configuration for runtime behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Path to the database file
    pub db_path: PathBuf,
    /// Root of the audio files; song paths are relative to it.
    pub music_dir: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: get_db_path().unwrap_or_else(|_| PathBuf::from(DB_FILE)),
            music_dir: None,
            engine: EngineConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load `config.json` from the data directory, falling back to defaults
    /// when it does not exist.
    pub fn new() -> Result<Self> {
        let path = get_data_dir()?.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self {
                db_path: get_db_path()?,
                ..Self::default()
            })
        }
    }

    /// Read configuration from an explicit JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        if let Some(dir) = config.music_dir.take() {
            config.music_dir = Some(absolute(&dir)?);
        }
        Ok(config)
    }

    /// Set the music directory, made absolute against the working directory.
    pub fn with_music_dir(mut self, dir: &Path) -> Result<Self> {
        self.music_dir = Some(absolute(dir)?);
        Ok(self)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    let expanded = match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest)),
        Err(_) => path.to_path_buf(),
    };
    Ok(expanded
        .absolutize()
        .with_context(|| format!("Cannot resolve path {}", path.display()))?
        .into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_db_path_returns_valid_path() {
        let path = get_db_path().unwrap();
        assert_eq!(path.file_name().unwrap(), DB_FILE);

        let parent = path.parent().expect("Database path should have parent");
        assert_eq!(parent.file_name().unwrap(), APP_DIR);
        assert!(parent.is_dir());
    }

    #[test]
    fn test_db_path_absolute() {
        let path = get_db_path().expect("Should get valid path");
        assert!(path.is_absolute(), "Database path should be absolute");
    }

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.top_k(), 40);
        assert_eq!(engine.anti_repeat_window(), chrono::Duration::minutes(40));
        assert_eq!(engine.priority_values_ttl(), Duration::from_secs(7200));

        let tiny = EngineConfig {
            anti_repeat_window_secs: 30,
            ..engine
        };
        assert_eq!(tiny.top_k(), 1);
    }

    #[test]
    fn test_load_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE);
        fs::write(
            &file,
            r#"{"db_path": "/tmp/x.db", "music_dir": "music", "engine": {"ratings_per_play": 3}}"#,
        )
        .unwrap();

        let config = RuntimeConfig::load(&file).unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/x.db"));
        assert!(config.music_dir.unwrap().is_absolute());
        assert_eq!(config.engine.ratings_per_play, 3);
        assert_eq!(config.engine.anti_repeat_window_secs, 2400);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join(CONFIG_FILE);
        fs::write(&file, "not json").unwrap();
        assert!(RuntimeConfig::load(&file).is_err());
    }
}
