// Configuration management for jukebox
// Handles loading/saving settings, with sensible defaults when config is missing

use crate::model::PlaylistMode;
use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub playlists_path: PathBuf,
    pub log_dir: PathBuf,
    pub player: PlayerConfig,
    pub playlist: PlaylistConfig,
    pub textinfo: TextInfoConfig,
    pub request: RequestConfig,
    pub skip: SkipConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    pub volume: f64,
    pub poll_interval_ms: u64,
    /// Start playing as soon as something lands in an idle queue
    pub auto_play: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaylistConfig {
    pub system_mode: PlaylistMode,
    pub history_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextInfoConfig {
    pub enabled: bool,
    pub template_dir: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestConfig {
    pub enabled: bool,
    pub prefix: String,
    pub max_per_user: usize,
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipConfig {
    pub enabled: bool,
    pub keyword: String,
    pub threshold: usize,
}

impl Default for Config {
    fn default() -> Self {
        let base = Self::base_dir();
        Self {
            playlists_path: base.join("playlists.json"),
            log_dir: PathBuf::from("logs"),
            player: PlayerConfig::default(),
            playlist: PlaylistConfig::default(),
            textinfo: TextInfoConfig::default(),
            request: RequestConfig::default(),
            skip: SkipConfig::default(),
        }
    }
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            volume: 0.7,
            poll_interval_ms: 250,
            auto_play: true,
        }
    }
}

impl Default for PlaylistConfig {
    fn default() -> Self {
        Self {
            system_mode: PlaylistMode::Loop,
            history_limit: 1000,
        }
    }
}

impl Default for TextInfoConfig {
    fn default() -> Self {
        let base = Config::base_dir();
        Self {
            enabled: false,
            template_dir: base.join("templates"),
            output_dir: base.join("textinfo"),
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prefix: "点歌".to_string(),
            max_per_user: 2,
            cooldown_secs: 30,
        }
    }
}

impl Default for SkipConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keyword: "切歌".to_string(),
            threshold: 3,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Read `path`, writing the defaults there first when it doesn't exist yet
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Invalid config {}: {}", path.display(), e))?;
            Ok(config)
        } else {
            info!("No config at {}, writing defaults", path.display());
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("jukebox");

        Ok(config_dir.join("config.toml"))
    }

    fn base_dir() -> PathBuf {
        config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("jukebox")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_writes_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.playlist.system_mode, PlaylistMode::Loop);
        assert_eq!(config.playlist.history_limit, 1000);
    }

    #[test]
    fn test_round_trip_keeps_changes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.playlist.system_mode = PlaylistMode::Random;
        config.skip.threshold = 5;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.playlist.system_mode, PlaylistMode::Random);
        assert_eq!(loaded.skip.threshold, 5);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[request]\nprefix = \"!sr\"\n").unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.request.prefix, "!sr");
        assert_eq!(config.request.max_per_user, 2);
        assert_eq!(config.player.poll_interval_ms, 250);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "player = 3").unwrap();

        assert!(Config::load_from(&path).is_err());
    }
}
