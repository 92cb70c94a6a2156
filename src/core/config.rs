use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A saved streaming endpoint. `name` is the identity key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favorite {
    pub name: String,
    pub url: String,
    pub key: String,
}

impl Favorite {
    pub fn new(name: impl Into<String>, url: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            key: key.into(),
        }
    }

    /// Stream key as shown in listings: long keys keep only their first 10 characters.
    pub fn masked_key(&self) -> String {
        if self.key.chars().count() > 10 {
            let prefix: String = self.key.chars().take(10).collect();
            format!("{}...", prefix)
        } else {
            self.key.clone()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub last_stream_key: String,
    pub favorites: Vec<Favorite>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_favorite_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ytdlp_path: Option<PathBuf>,
}

/// Reads and writes the persisted [`AppConfig`] document.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform config directory, e.g. `~/.config/telestream/config.json`.
    pub fn at_default_location() -> Self {
        Self::new(Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("telestream"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Never fails: a missing or unreadable document yields the defaults.
    pub fn load(&self) -> AppConfig {
        if !self.path.exists() {
            log::info!("No config file at {}, using defaults", self.path.display());
            return AppConfig::default();
        }

        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Failed to read config file at {}: {}", self.path.display(), e);
                return AppConfig::default();
            }
        };

        match serde_json::from_str::<AppConfig>(&content) {
            Ok(config) => {
                log::info!("Loaded existing config from {}", self.path.display());
                config
            }
            Err(e) => {
                log::warn!("Config file is corrupted ({}), falling back to defaults", e);
                AppConfig::default()
            }
        }
    }

    /// Replaces the document by writing a temp file next to it and renaming it over.
    pub fn save(&self, config: &AppConfig) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    anyhow::anyhow!("Failed to create config directory {}: {}", parent.display(), e)
                })?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        let tmp_path = self.path.with_extension("json.tmp");
        std::fs::write(&tmp_path, content)
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", tmp_path.display(), e))?;
        std::fs::rename(&tmp_path, &self.path).map_err(|e| {
            anyhow::anyhow!("Failed to replace config file at {}: {}", self.path.display(), e)
        })?;

        log::debug!("Saved config to {}", self.path.display());
        Ok(())
    }
}
