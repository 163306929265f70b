//! Persisted user settings (`config.json` under the platform config dir).
//!
//! Loaded once at startup and saved after a download has actually started,
//! so the remembered folder is always the last one used, not just browsed to.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ConfigError;
use crate::model::Bitrate;

const APP_DIR: &str = "yt-playlist-mp3";
const FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Folder of the last started download
    #[serde(default, alias = "output_dir", skip_serializing_if = "Option::is_none")]
    pub last_output_dir: Option<PathBuf>,
    /// Bitrate of the last started download
    #[serde(default)]
    pub bitrate: Bitrate,
}

/// Default location of the config file
pub fn default_path() -> Result<PathBuf, ConfigError> {
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join(FILE_NAME))
        .ok_or(ConfigError::NoConfigDir)
}

impl Config {
    /// Loads from the default location; any problem yields defaults.
    pub fn load() -> Self {
        match default_path() {
            Ok(path) => Self::load_from(&path),
            Err(e) => {
                warn!("{e}; using default settings");
                Self::default()
            }
        }
    }

    /// Missing or corrupt files load as defaults.
    pub fn load_from(path: &Path) -> Self {
        match Self::try_load_from(path) {
            Ok(cfg) => cfg,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no config file yet");
                Self::default()
            }
            Err(e) => {
                warn!(path = %path.display(), "ignoring unreadable config: {e}");
                Self::default()
            }
        }
    }

    pub fn try_load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&default_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::load_from(&dir.path().join("config.json"));
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.bitrate, Bitrate::Kbps320);
    }

    #[test]
    fn corrupt_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());
        assert!(matches!(
            Config::try_load_from(&path),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn save_creates_parent_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cfg = Config {
            last_output_dir: Some(PathBuf::from("/tmp/out")),
            bitrate: Bitrate::Kbps192,
        };
        cfg.save_to(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"last_output_dir\": \"/tmp/out\""));
        assert!(text.contains("\"bitrate\": \"192 kbps\""));
        assert_eq!(Config::load_from(&path), cfg);
    }

    #[test]
    fn legacy_output_dir_key_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{ "output_dir": "/music" }"#).unwrap();
        let cfg = Config::load_from(&path);
        assert_eq!(cfg.last_output_dir, Some(PathBuf::from("/music")));
        assert_eq!(cfg.bitrate, Bitrate::default());
    }
}
