use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use library::{ProgressHistory, ResolutionThresholds, SyncConfig, WatchConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_VERSION: u32 = 1;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub version: u32,
    pub video_root: String,
    pub provider_root: String,
    pub streaming_root: String,
    pub library_path: String,
    pub mapping_path: String,
    pub settings_path: String,
    pub port: u16,
    pub provider_url: String,
    pub provider_timeout_secs: u64,
    pub ffprobe_path: String,
    pub mkvmerge_path: String,
    pub bonus_dir_patterns: Vec<String>,
    pub media_extensions: Vec<String>,
    pub backup_suffixes: Vec<String>,
    pub freshness_secs: u64,
    pub patch_delay_ms: u64,
    pub watch_poll_secs: u64,
    pub watch_settle_ms: u64,
    pub watch_sweep_secs: u64,
    pub watch_sweep_item_delay_ms: u64,
    pub watch_mapping: bool,
    pub watch_debounce_secs: u64,
    pub resolution: ResolutionThresholds,
    pub progress_bootstrap: ProgressHistory,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let sync = SyncConfig::default();
        Self {
            version: CONFIG_VERSION,
            video_root: "".to_string(),
            provider_root: sync.provider_root,
            streaming_root: "".to_string(),
            library_path: "library.json".to_string(),
            mapping_path: "mapping.json".to_string(),
            settings_path: "settings.redb".to_string(),
            port: 3000,
            provider_url: "http://127.0.0.1:8080/api".to_string(),
            provider_timeout_secs: 10,
            ffprobe_path: "ffprobe".to_string(),
            mkvmerge_path: "mkvmerge".to_string(),
            bonus_dir_patterns: sync.bonus_dir_patterns,
            media_extensions: sync.media_extensions,
            backup_suffixes: sync.backup_suffixes,
            freshness_secs: 60 * 60 * 24 * 7,
            patch_delay_ms: 2000,
            watch_poll_secs: 5,
            watch_settle_ms: 3000,
            watch_sweep_secs: 60 * 60,
            watch_sweep_item_delay_ms: 250,
            watch_mapping: true,
            watch_debounce_secs: 2,
            resolution: ResolutionThresholds::default(),
            progress_bootstrap: ProgressHistory::default(),
        }
    }
}

impl ServerConfig {
    /// Core settings with paths resolved against the config file directory.
    pub fn sync_config(&self, config_path: &Path) -> SyncConfig {
        SyncConfig {
            video_root: resolve_path(config_path, &self.video_root),
            provider_root: self.provider_root.trim_end_matches('/').to_string(),
            streaming_root: resolve_path(config_path, &self.streaming_root),
            mapping_path: resolve_path(config_path, &self.mapping_path),
            bonus_dir_patterns: self.bonus_dir_patterns.clone(),
            media_extensions: self.media_extensions.clone(),
            backup_suffixes: self.backup_suffixes.clone(),
            resolution: self.resolution.clone(),
            progress_bootstrap: self.progress_bootstrap.clone(),
            freshness: Duration::from_secs(self.freshness_secs),
            patch_delay: Duration::from_millis(self.patch_delay_ms),
        }
    }

    pub fn watch_config(&self) -> WatchConfig {
        WatchConfig {
            poll_interval: Duration::from_secs(self.watch_poll_secs.max(1)),
            settle_delay: Duration::from_millis(self.watch_settle_ms),
            sweep_interval: Duration::from_secs(self.watch_sweep_secs.max(1)),
            sweep_item_delay: Duration::from_millis(self.watch_sweep_item_delay_ms),
        }
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "io error: {}", err),
            ConfigError::Yaml(err) => write!(f, "yaml error: {}", err),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        ConfigError::Yaml(err)
    }
}

pub fn config_path_from_env() -> PathBuf {
    match env::var("REELSYNC_CONFIG") {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => default_config_path(),
    }
}

fn default_config_path() -> PathBuf {
    match env::current_exe() {
        Ok(exe) => exe
            .parent()
            .map(|dir| dir.join("config.yaml"))
            .unwrap_or_else(|| PathBuf::from("config.yaml")),
        Err(_) => PathBuf::from("config.yaml"),
    }
}

pub fn load_or_create_config(path: &Path) -> Result<(ServerConfig, bool), ConfigError> {
    if path.exists() {
        let contents = fs::read_to_string(path)?;
        let mut config: ServerConfig = serde_yaml::from_str(&contents)?;
        if config.version < CONFIG_VERSION {
            config.version = CONFIG_VERSION;
        }
        if config.port == 0 {
            config.port = 3000;
        }
        if config.library_path.trim().is_empty() {
            config.library_path = "library.json".to_string();
        }
        if config.mapping_path.trim().is_empty() {
            config.mapping_path = "mapping.json".to_string();
        }
        if config.settings_path.trim().is_empty() {
            config.settings_path = "settings.redb".to_string();
        }
        if config.watch_debounce_secs == 0 {
            config.watch_debounce_secs = 2;
        }
        return Ok((config, false));
    }

    let config = ServerConfig::default();
    save_config(path, &config)?;
    Ok((config, true))
}

pub fn save_config(path: &Path, config: &ServerConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_yaml::to_string(config)?;
    fs::write(path, contents)?;
    Ok(())
}

pub fn resolve_path(config_path: &Path, value: &str) -> PathBuf {
    let raw = PathBuf::from(value.trim());
    if raw.is_absolute() {
        return raw;
    }
    let base = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    base.join(raw)
}
