//! Persistent stats configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use framestat_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::accumulator::name_key;

/// Default file name for the stats configuration.
pub const CONFIG_FILE_NAME: &str = "framestat.toml";

/// Default TCP port of the remote listener sink.
pub const DEFAULT_REMOTE_PORT: u16 = 4242;

/// Settings persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StatsConfig {
    /// Groups whose stats reach the sinks. Empty means every group.
    pub net_enabled_groups: Vec<String>,
    /// Port of the remote listener sink.
    pub remote_port: u16,
    /// Directory for captures started without an explicit path.
    pub capture_dir: PathBuf,
    /// Slow-mode threshold in seconds.
    pub slow_threshold_secs: f32,
    /// Seconds a slow stat stays on screen after it last exceeded the threshold.
    pub min_slow_duration_secs: f32,
    /// HUD font scale.
    pub font_scale: f32,
    /// Engine version written into capture headers.
    pub engine_version: u32,
    /// Change list written into capture headers.
    pub changelist: u32,
    /// Named stat sets: set name to ordered stat names.
    pub sets: BTreeMap<String, Vec<String>>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            net_enabled_groups: Vec::new(),
            remote_port: DEFAULT_REMOTE_PORT,
            capture_dir: PathBuf::from("stats"),
            slow_threshold_secs: 0.01,
            min_slow_duration_secs: 10.0,
            font_scale: 1.0,
            engine_version: 0,
            changelist: 0,
            sets: BTreeMap::new(),
        }
    }
}

impl StatsConfig {
    /// Load a configuration file.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::Config(format!(
                "configuration file not found: {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))
    }

    /// Load a configuration file, falling back to defaults when it is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load_from_path(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the configuration, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("failed to serialize configuration: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Whether sinks receive stats of the group named `group`.
    #[must_use]
    pub fn is_net_enabled(&self, group: &str) -> bool {
        if self.net_enabled_groups.is_empty() {
            return true;
        }
        let key = name_key(group);
        self.net_enabled_groups
            .iter()
            .any(|enabled| name_key(enabled) == key)
    }

    /// Stat names of the set called `name`, matched case-insensitively.
    #[must_use]
    pub fn find_set(&self, name: &str) -> Option<(&str, &[String])> {
        let key = name_key(name);
        self.sets
            .iter()
            .find(|(set, _)| name_key(set) == key)
            .map(|(set, stats)| (set.as_str(), stats.as_slice()))
    }
}
