// tally-store/src/config.rs

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, time::Duration};

use crate::{snapshot::DEFAULT_RETENTION, watcher::DEFAULT_POLL_INTERVAL};

pub const ROOT_ENV: &str = "TALLY_ROOT";

/// Config is merged: defaults -> user file -> explicit file -> env -> runtime
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub watcher: WatcherConfig,
    pub snapshots: SnapshotConfig,
    pub archive: ArchiveConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    pub root: Option<PathBuf>,   // default: platform data dir
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
    pub fs_events: bool,
}
impl Default for WatcherConfig {
    fn default() -> Self {
        Self { poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64, fs_events: false }
    }
}
impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SnapshotConfig {
    pub retention: usize,
}
impl Default for SnapshotConfig {
    fn default() -> Self { Self { retention: DEFAULT_RETENTION } }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArchiveConfig {
    /// How many calendar months the recent-archives reader looks back.
    pub recent_months: usize,
}
impl Default for ArchiveConfig {
    fn default() -> Self { Self { recent_months: 3 } }
}

/// A layer as written on disk; unset fields leave lower layers alone.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartialConfig {
    pub storage: PartialStorage,
    pub watcher: PartialWatcher,
    pub snapshots: PartialSnapshots,
    pub archive: PartialArchive,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartialStorage { pub root: Option<PathBuf> }

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartialWatcher { pub poll_interval_ms: Option<u64>, pub fs_events: Option<bool> }

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartialSnapshots { pub retention: Option<usize> }

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PartialArchive { pub recent_months: Option<usize> }

fn merge(a: &mut Config, b: &PartialConfig) {
    if b.storage.root.is_some() { a.storage.root = b.storage.root.clone(); }
    if let Some(v) = b.watcher.poll_interval_ms { a.watcher.poll_interval_ms = v.max(10); }
    if let Some(v) = b.watcher.fs_events { a.watcher.fs_events = v; }
    if let Some(v) = b.snapshots.retention { a.snapshots.retention = v.max(1); }
    if let Some(v) = b.archive.recent_months { a.archive.recent_months = v; }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "tally", "tally")
}

pub fn user_config_path() -> Option<PathBuf> {
    project_dirs().map(|p| p.config_dir().join("config.toml"))
}

fn read_layer(path: &Path) -> Result<Option<PartialConfig>> {
    if !path.exists() { return Ok(None); }
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let layer = toml::from_str(&text).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(layer))
}

impl Config {
    /// Loads defaults, the user file, an optional explicit file (which must exist)
    /// and the `TALLY_ROOT` override.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = Config::default();
        if let Some(user) = user_config_path() {
            if let Some(layer) = read_layer(&user)? { merge(&mut cfg, &layer); }
        }
        if let Some(path) = explicit {
            let layer = read_layer(path)?.with_context(|| format!("config file {} not found", path.display()))?;
            merge(&mut cfg, &layer);
        }
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            cfg.storage.root = Some(PathBuf::from(root));
        }
        Ok(cfg)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let layer: PartialConfig = toml::from_str(text).context("parse config toml")?;
        let mut cfg = Config::default();
        merge(&mut cfg, &layer);
        Ok(cfg)
    }

    pub fn apply_runtime_overlay(&mut self, patch: &PartialConfig) { merge(self, patch); }

    /// Application root: configured value or the platform data directory.
    pub fn resolve_root(&self) -> crate::error::Result<PathBuf> {
        if let Some(root) = &self.storage.root { return Ok(root.clone()); }
        project_dirs()
            .map(|p| p.data_dir().to_path_buf())
            .ok_or(crate::error::StoreError::NoAppRoot)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("serialize toml")
    }
}
