use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::BridgeError;

pub const STORE_FILENAME: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Harvest base URL, e.g. `https://harvest.example.com/`
    pub url: String,
    /// Harvest API token
    pub token: String,
    /// Whether foreign contexts may ask for an automatic login
    #[serde(rename = "autoLogin")]
    pub auto_login: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            url: String::new(),
            token: String::new(),
            auto_login: true,
        }
    }
}

impl Settings {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: token.into(),
            auto_login: true,
        }
    }

    pub fn is_complete(&self) -> bool {
        !self.url.is_empty() && !self.token.is_empty()
    }
}

/// Read-only access to the user's configuration.
///
/// Every bridge operation resolves the settings afresh, so edits made through
/// the settings UI take effect on the next call.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    async fn load(&self) -> Result<Settings, BridgeError>;
}

pub struct StoreManager {
    settings_path: Option<PathBuf>,
    settings: Mutex<Settings>,
}

impl StoreManager {
    /// Create a new store manager backed by `settings.json` in the given directory
    pub fn new(app_dir: &Path) -> Result<Self, BridgeError> {
        Self::open(app_dir.join(STORE_FILENAME))
    }

    /// Open a specific settings file, falling back to defaults when it does not exist yet
    pub fn open(settings_path: PathBuf) -> Result<Self, BridgeError> {
        let settings = if settings_path.exists() {
            Self::load_settings_from_disk(&settings_path)?
        } else {
            Settings::default()
        };

        Ok(Self {
            settings_path: Some(settings_path),
            settings: Mutex::new(settings),
        })
    }

    /// Store that never touches the disk
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            settings_path: None,
            settings: Mutex::new(settings),
        }
    }

    fn load_settings_from_disk(path: &Path) -> Result<Settings, BridgeError> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    fn save_settings_to_disk(path: &Path, settings: &Settings) -> Result<(), BridgeError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let content = serde_json::to_string_pretty(settings)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get a copy of current settings
    pub fn get_settings(&self) -> Settings {
        self.settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Update settings and persist to disk
    pub fn update_settings<F>(&self, updater: F) -> Result<(), BridgeError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut settings = self
            .settings
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        updater(&mut settings);

        if let Some(path) = &self.settings_path {
            Self::save_settings_to_disk(path, &settings)?;
        }

        Ok(())
    }

    pub fn set_connection(&self, url: &str, token: &str) -> Result<(), BridgeError> {
        self.update_settings(|s| {
            s.url = url.to_string();
            s.token = token.to_string();
        })
    }

    pub fn set_auto_login(&self, enabled: bool) -> Result<(), BridgeError> {
        self.update_settings(|s| {
            s.auto_login = enabled;
        })
    }

    pub fn settings_path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }
}

#[async_trait]
impl ConfigSource for StoreManager {
    async fn load(&self) -> Result<Settings, BridgeError> {
        Ok(self.get_settings())
    }
}
