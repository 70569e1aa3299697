// plugbrowser Settings Engine
// Manages the per-profile configuration: loading, saving, updating individual values, and resetting to defaults.
// The configuration is stored as `config.json` in the profile directory.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::managers::session_manager::SessionManager;
use crate::platform;
use crate::services::render_engine::WEBSITE_DATA_DIR;
use crate::types::errors::ConfigError;
use crate::types::protocol::InitPayload;
use crate::types::settings::ProfileConfig;

/// Name of the instance rendezvous socket inside the profile directory.
pub const SOCKET_FILE: &str = "plugbrowser.sock";
const CONFIG_FILE: &str = "config.json";
const CONTENT_FILTERS_DIR: &str = "content filters";

/// Trait defining the settings engine interface.
pub trait SettingsEngineTrait {
    fn load(&mut self) -> Result<ProfileConfig, ConfigError>;
    fn save(&self) -> Result<(), ConfigError>;
    fn get_config(&self) -> &ProfileConfig;
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), ConfigError>;
    fn reset(&mut self) -> Result<(), ConfigError>;
    fn profile_dir(&self) -> &Path;
}

/// Settings engine that persists a [`ProfileConfig`] as JSON on disk.
pub struct SettingsEngine {
    profile_dir: PathBuf,
    config: ProfileConfig,
}

impl SettingsEngine {
    /// Opens the named profile under the platform config directory.
    pub fn open(profile: &str) -> Result<Self, ConfigError> {
        Self::in_dir(platform::get_profile_dir(profile))
    }

    /// Opens a profile rooted at `profile_dir`, creating it if needed.
    ///
    /// Fails with [`ConfigError::PathUnwritable`] when the path exists but is
    /// not a directory, or when it cannot be created.
    pub fn in_dir(profile_dir: PathBuf) -> Result<Self, ConfigError> {
        if profile_dir.exists() && !profile_dir.is_dir() {
            return Err(ConfigError::PathUnwritable(profile_dir.display().to_string()));
        }
        fs::create_dir_all(&profile_dir)
            .map_err(|_| ConfigError::PathUnwritable(profile_dir.display().to_string()))?;
        let filters_dir = profile_dir.join(CONTENT_FILTERS_DIR);
        if let Err(e) = fs::create_dir_all(&filters_dir) {
            warn!("Can't create {}: {}", filters_dir.display(), e);
        }

        Ok(Self {
            profile_dir,
            config: ProfileConfig::default(),
        })
    }

    pub fn config_file(&self) -> PathBuf {
        self.profile_dir.join(CONFIG_FILE)
    }

    pub fn socket_file(&self) -> PathBuf {
        self.profile_dir.join(SOCKET_FILE)
    }

    pub fn content_filters_dir(&self) -> PathBuf {
        self.profile_dir.join(CONTENT_FILTERS_DIR)
    }

    /// Where non-private renderers keep cookies and cache.
    pub fn website_data_dir(&self) -> PathBuf {
        self.profile_dir.join(WEBSITE_DATA_DIR)
    }

    /// Delete the persistent cookies and cache. Returns false when there
    /// was nothing to delete.
    pub fn clear_website_data(&self) -> Result<bool, ConfigError> {
        let dir = self.website_data_dir();
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("Cleared website data in {}", dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(ConfigError::IoError(format!(
                "Failed to clear {}: {}",
                dir.display(),
                e
            ))),
        }
    }

    /// Session manager reading and writing this profile's session files.
    pub fn session_manager(&self) -> SessionManager {
        SessionManager::in_profile(&self.profile_dir)
    }

    pub fn config_mut(&mut self) -> &mut ProfileConfig {
        &mut self.config
    }

    /// Startup payload for a new renderer process, without uri or socket id.
    pub fn init_template(&self) -> InitPayload {
        let config = &self.config;
        InitPayload {
            private: true,
            web_view_settings: config.web_view_settings.clone(),
            search_url: config.search_url().to_string(),
            user_agent: config.user_agent().to_string(),
            adblock_filters: config.adblock.clone(),
            media_filters: config.media_filters.clone(),
            content_filters: config.active_content_filters(),
            content_filters_path: Some(self.content_filters_dir()),
            content_filter_whitelist: config.content_filter_whitelist.clone(),
            profile_path: Some(self.profile_dir.clone()),
            socket_id: 0,
            uri: String::new(),
        }
    }
}

impl SettingsEngineTrait for SettingsEngine {
    /// Loads the configuration from `config.json`.
    ///
    /// A missing file yields the defaults; a malformed one is an error.
    fn load(&mut self) -> Result<ProfileConfig, ConfigError> {
        let path = self.config_file();

        if !path.exists() {
            self.config = ProfileConfig::default();
            return Ok(self.config.clone());
        }

        let content = fs::read_to_string(&path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: ProfileConfig = serde_json::from_str(&content).map_err(|e| {
            ConfigError::SerializationError(format!("Failed to parse config file: {}", e))
        })?;

        info!("Loaded profile config from {}", path.display());
        self.config = config;
        Ok(self.config.clone())
    }

    fn save(&self) -> Result<(), ConfigError> {
        let path = self.config_file();

        let json = serde_json::to_string_pretty(&self.config).map_err(|e| {
            ConfigError::SerializationError(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(&path, json)
            .map_err(|e| ConfigError::IoError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    fn get_config(&self) -> &ProfileConfig {
        &self.config
    }

    /// Updates an individual setting by dot-notation key path.
    ///
    /// Keys use the on-disk (kebab-case) names, e.g. `"home-uri"`,
    /// `"web-view-settings.enable-javascript"` or `"adblock./ads/"`. Map
    /// entries may be added; struct fields must already exist. Saves to disk
    /// after a successful update.
    fn set_value(&mut self, key: &str, value: serde_json::Value) -> Result<(), ConfigError> {
        if key.is_empty() {
            return Err(ConfigError::InvalidKey("Key cannot be empty".to_string()));
        }

        let parts: Vec<&str> = key.split('.').collect();

        let mut json_value = serde_json::to_value(&self.config).map_err(|e| {
            ConfigError::SerializationError(format!("Failed to serialize config: {}", e))
        })?;

        {
            let mut current = &mut json_value;
            for (i, part) in parts.iter().enumerate() {
                if i == parts.len() - 1 {
                    match current {
                        serde_json::Value::Object(map) => {
                            // Top-level struct fields are fixed; nested maps accept new entries.
                            if i == 0 && !map.contains_key(*part) {
                                return Err(ConfigError::InvalidKey(format!(
                                    "Key '{}' not found in config",
                                    key
                                )));
                            }
                            map.insert(part.to_string(), value.clone());
                        }
                        _ => {
                            return Err(ConfigError::InvalidKey(format!(
                                "Cannot navigate to key '{}': intermediate value is not an object",
                                key
                            )));
                        }
                    }
                } else {
                    current = match current.get_mut(*part) {
                        Some(v) => v,
                        None => {
                            return Err(ConfigError::InvalidKey(format!(
                                "Key '{}' not found in config",
                                key
                            )));
                        }
                    };
                }
            }
        }

        let new_config: ProfileConfig = serde_json::from_value(json_value).map_err(|e| {
            ConfigError::InvalidValue(format!("Invalid value for key '{}': {}", key, e))
        })?;

        self.config = new_config;
        self.save()?;

        Ok(())
    }

    /// Resets every setting to its default and saves to disk.
    fn reset(&mut self) -> Result<(), ConfigError> {
        self.config = ProfileConfig::default();
        self.save()?;
        Ok(())
    }

    fn profile_dir(&self) -> &Path {
        &self.profile_dir
    }
}
