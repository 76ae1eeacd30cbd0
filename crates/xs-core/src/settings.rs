use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::errors::{CoreError, Result};

/// Resolution hint value selecting the high quality 1080p profile
pub const RESOLUTION_1080_HQ: u32 = 1081;

/// User settings consulted by the authentication and streaming layers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Stream resolution hint (720, 1080, or 1081 for 1080p HQ)
    pub resolution: u32,
    /// Prefer IPv6 ICE candidates
    pub ipv6: bool,
    /// Locale sent with new sessions
    pub preferred_game_language: String,
    /// Address forwarded when requesting streaming tokens, to pin the service region
    pub force_region_ip: Option<String>,
    /// Preferred xHome region name
    pub xhome_region: Option<String>,
    /// Preferred xCloud region name
    pub xcloud_region: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            resolution: 720,
            ipv6: false,
            preferred_game_language: "en-US".to_string(),
            force_region_ip: None,
            xhome_region: None,
            xcloud_region: None,
        }
    }
}

impl Settings {
    /// OS name reported to the streaming service; it selects the stream profile
    pub fn os_name(&self) -> &'static str {
        match self.resolution {
            1080 => "windows",
            RESOLUTION_1080_HQ => "tizen",
            _ => "android",
        }
    }

    /// Locale for new sessions, `en-US` when unset
    pub fn locale(&self) -> &str {
        if self.preferred_game_language.is_empty() {
            "en-US"
        } else {
            &self.preferred_game_language
        }
    }
}

/// Read access to the current settings
pub trait SettingsReader: Send + Sync {
    fn settings(&self) -> Settings;
}

impl SettingsReader for Settings {
    fn settings(&self) -> Settings {
        self.clone()
    }
}

/// Settings backed by a TOML file
#[derive(Debug)]
pub struct SettingsFile {
    path: PathBuf,
    current: RwLock<Settings>,
}

impl SettingsFile {
    /// Load settings from `path`, using defaults when the file does not exist yet
    #[instrument(level = "debug")]
    pub async fn load(path: PathBuf) -> Result<Self> {
        let current = match tokio::fs::read_to_string(&path).await {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}, using defaults", path.display());
                Settings::default()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            current: RwLock::new(current),
        })
    }

    /// Default settings location for the current platform
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            directories::ProjectDirs::from("", "", "xstream").ok_or(CoreError::NoConfigDir)?;
        Ok(project_dirs.config_dir().join("settings.toml"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the settings and write them back to disk
    pub async fn update(&self, settings: Settings) -> Result<()> {
        let toml = toml::to_string_pretty(&settings)?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, toml).await?;

        *self.current.write().map_err(|_| CoreError::LockPoisoned)? = settings;
        Ok(())
    }
}

impl SettingsReader for SettingsFile {
    fn settings(&self) -> Settings {
        match self.current.read() {
            Ok(settings) => settings.clone(),
            Err(_) => {
                warn!("Settings lock poisoned, falling back to defaults");
                Settings::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_os_name_from_resolution() {
        let mut settings = Settings::default();
        assert_eq!(settings.os_name(), "android");

        settings.resolution = 1080;
        assert_eq!(settings.os_name(), "windows");

        settings.resolution = RESOLUTION_1080_HQ;
        assert_eq!(settings.os_name(), "tizen");
    }

    #[tokio::test]
    async fn test_missing_file_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let file = SettingsFile::load(temp.path().join("settings.toml"))
            .await
            .unwrap();

        assert_eq!(file.settings(), Settings::default());
    }

    #[tokio::test]
    async fn test_update_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("settings.toml");
        let file = SettingsFile::load(path.clone()).await.unwrap();

        let settings = Settings {
            ipv6: true,
            resolution: 1080,
            force_region_ip: Some("203.0.113.7".to_string()),
            ..Settings::default()
        };
        file.update(settings.clone()).await.unwrap();
        assert_eq!(file.settings(), settings);

        let reloaded = SettingsFile::load(path).await.unwrap();
        assert_eq!(reloaded.settings(), settings);
    }

    #[tokio::test]
    async fn test_partial_file_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("settings.toml");
        std::fs::write(&path, "ipv6 = true\n").unwrap();

        let file = SettingsFile::load(path).await.unwrap();
        let settings = file.settings();
        assert!(settings.ipv6);
        assert_eq!(settings.locale(), "en-US");
    }
}
