//! Persistent on-disk caching for the reference dataset with TTL + version tracking.

use std::{
    fs, io,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use serde::{Deserialize, Serialize};

use crate::infra::dataset::RecipeDataset;

const CACHE_DIRNAME: &str = "production-value-scanner";
const CACHE_FILENAME: &str = "dataset_cache.json";

/// Cache TTL: 7 days. Recipes only change with game patches.
pub const DATASET_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Cached reference dataset with TTL + version tracking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetCache {
    /// Dataset version reported by the market API when this cache was created.
    pub dataset_version: String,
    /// Unix timestamp (seconds) when this cache was created.
    pub cached_at: u64,
    pub dataset: RecipeDataset,
}

impl DatasetCache {
    /// Create a new cache with current timestamp.
    pub fn new(dataset_version: String, dataset: RecipeDataset) -> Self {
        Self {
            dataset_version,
            cached_at: unix_now(),
            dataset,
        }
    }

    /// Check if cache has expired (older than TTL).
    pub fn is_expired(&self) -> bool {
        self.age() > DATASET_CACHE_TTL
    }

    /// Get cache age as Duration.
    pub fn age(&self) -> Duration {
        Duration::from_secs(unix_now().saturating_sub(self.cached_at))
    }

    /// Human-readable age string.
    pub fn age_string(&self) -> String {
        let secs = self.age().as_secs();
        if secs < 60 {
            format!("{secs}s")
        } else if secs < 3600 {
            format!("{}m", secs / 60)
        } else if secs < 86400 {
            format!("{}h", secs / 3600)
        } else {
            format!("{}d", secs / 86400)
        }
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Location of the dataset cache file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetCacheStore {
    path: PathBuf,
}

impl DatasetCacheStore {
    /// Cache file in the platform's local data directory.
    pub fn default_location() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CACHE_DIRNAME);
        Self::at(base.join(CACHE_FILENAME))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the dataset cache from disk, if it exists and parses.
    pub fn load(&self) -> Option<DatasetCache> {
        if !self.path.exists() {
            tracing::debug!(path = %self.path.display(), "no dataset cache found");
            return None;
        }

        match fs::read_to_string(&self.path) {
            Ok(content) => match serde_json::from_str::<DatasetCache>(&content) {
                Ok(cache) => {
                    tracing::debug!(
                        path = %self.path.display(),
                        version = cache.dataset_version.as_str(),
                        age = cache.age_string().as_str(),
                        "loaded dataset cache"
                    );
                    Some(cache)
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to parse dataset cache");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to read dataset cache");
                None
            }
        }
    }

    /// Save the dataset cache to disk.
    pub fn save(&self, cache: &DatasetCache) -> Result<(), io::Error> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string(cache)?; // compact, the dataset can be large
        fs::write(&self.path, content)?;
        tracing::info!(
            recipes = cache.dataset.recipes.len(),
            version = cache.dataset_version.as_str(),
            path = %self.path.display(),
            "saved dataset cache"
        );
        Ok(())
    }
}
