use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeError;

use crate::domain::{Efficiency, RegionId, RegionPreference};
use crate::infra::market::{DEFAULT_BASE_URL, DEFAULT_TTL};

const APP_QUALIFIER: &str = "com";
const APP_ORG: &str = "ProductionValueScanner";
const APP_NAME: &str = "ProductionValueScanner";

/// User defaults for the CLI. Command-line flags override every field.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub efficiency: Efficiency,
    pub region: RegionPreference,
    /// Where output is sold. Falls back to the buy region, then the first known region.
    pub sell_region: Option<RegionId>,
    /// Regions the market client searches in cheapest mode.
    pub regions: Vec<RegionId>,
    pub max_depth: u32,
    pub concurrency: usize,
    pub market_url: String,
    pub price_ttl_minutes: u64,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            efficiency: Efficiency::default(),
            region: RegionPreference::default(),
            sell_region: None,
            regions: Vec::new(),
            max_depth: 20,
            concurrency: 8,
            market_url: DEFAULT_BASE_URL.to_string(),
            price_ttl_minutes: DEFAULT_TTL.as_secs() / 60,
            log_level: "info".to_string(),
        }
    }
}

pub fn settings_file() -> Option<PathBuf> {
    ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .map(|dirs| dirs.config_dir().join("settings.json"))
}

/// Settings from the platform config dir; defaults when missing or unreadable.
pub fn load_settings() -> Settings {
    settings_file()
        .map(|path| load_settings_from(&path))
        .unwrap_or_default()
}

pub fn load_settings_from(path: &Path) -> Settings {
    let Ok(data) = fs::read_to_string(path) else {
        return Settings::default();
    };
    match serde_json::from_str(&data) {
        Ok(settings) => settings,
        Err(error) => {
            tracing::warn!(path = %path.display(), %error, "ignoring corrupt settings file");
            Settings::default()
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<PathBuf, SettingsError> {
    let path = settings_file().ok_or(SettingsError::StorageUnavailable)?;
    save_settings_to(&path, settings)?;
    Ok(path)
}

pub fn save_settings_to(path: &Path, settings: &Settings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(path, json)?;
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("storage directory unavailable")]
    StorageUnavailable,
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] SerdeError),
}
