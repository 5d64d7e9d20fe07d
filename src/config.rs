// Acquisition configuration
//
// Stored as JSON under `<config_dir>/streamsync/`. Every field has a
// default, so partial files (or no file at all) are valid.

use crate::error::{AcquisitionError, Result};
use crate::metadata::quirks::DEFAULT_QUIRK_VENDORS;
use crate::metadata::MetadataNormalizer;
use crate::receiver::ReceiverOptions;
use crate::worker::WorkerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "streamsync";
const BINDINGS_FILE: &str = "bindings.json";

/// Application configuration directory, created if missing
pub fn default_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        AcquisitionError::InvalidConfiguration("Could not find config directory".to_string())
    })?;
    let app_config_dir = config_dir.join(APP_DIR);
    std::fs::create_dir_all(&app_config_dir)?;
    Ok(app_config_dir)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Seconds to wait for stream advertisements
    pub wait_time_secs: f64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: 0.1,
        }
    }
}

impl DiscoveryConfig {
    pub fn wait_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.wait_time_secs.max(0.0)).unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizerConfig {
    /// Manufacturer substrings that trigger the vendor fixes
    pub quirk_vendors: Vec<String>,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            quirk_vendors: DEFAULT_QUIRK_VENDORS.iter().map(|v| v.to_string()).collect(),
        }
    }
}

impl NormalizerConfig {
    pub fn build(&self) -> MetadataNormalizer {
        MetadataNormalizer::with_vendors(self.quirk_vendors.as_slice())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub discovery: DiscoveryConfig,
    pub receiver: ReceiverOptions,
    pub worker: WorkerConfig,
    pub normalizer: NormalizerConfig,
    /// Binding file; `<config_dir>/streamsync/bindings.json` when unset
    pub bindings_path: Option<PathBuf>,
}

impl AcquisitionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&content)?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn bindings_path(&self) -> Result<PathBuf> {
        match &self.bindings_path {
            Some(path) => Ok(path.clone()),
            None => Ok(default_config_dir()?.join(BINDINGS_FILE)),
        }
    }
}
