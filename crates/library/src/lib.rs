pub mod alias;
pub mod config;
pub mod enrich;
pub mod events;
pub mod fs;
pub mod index;
pub mod manager;
pub mod merge;
pub mod naming;
pub mod patch;
pub mod progress;
pub mod provider;
pub mod reconcile;
pub mod scan;
pub mod settings;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{BonusMatcher, ResolutionThresholds, SyncConfig};
pub use events::{Notification, Notifier};
pub use fs::{DirEntryNode, DirectoryLister, WalkDirLister};
pub use index::{CachedLibrary, LibraryIndex};
pub use manager::{LibraryManager, LibraryServices, RebuildMode, StatusReport};
pub use progress::ProgressHistory;
pub use provider::{
    ItemDetails, MediaProvider, PlaybackStatus, ProviderError, ProviderItem, WatchState,
};
pub use reconcile::{WatchConfig, WatchReconciler};
pub use settings::{RedbSettings, SettingsError, SettingsStore};
pub use store::{parse_with_recovery, JsonFileStorage, LibraryStorage};

#[derive(Debug)]
pub enum LibraryError {
    Io(std::io::Error),
    Json(serde_json::Error),
    Provider(ProviderError),
    Settings(SettingsError),
    Pattern(regex::Error),
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for LibraryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LibraryError::Io(err) => write!(f, "io error: {}", err),
            LibraryError::Json(err) => write!(f, "json error: {}", err),
            LibraryError::Provider(err) => write!(f, "provider error: {}", err),
            LibraryError::Settings(err) => write!(f, "settings error: {}", err),
            LibraryError::Pattern(err) => write!(f, "invalid pattern: {}", err),
            LibraryError::Join(err) => write!(f, "background task failed: {}", err),
        }
    }
}

impl std::error::Error for LibraryError {}

impl From<std::io::Error> for LibraryError {
    fn from(err: std::io::Error) -> Self {
        LibraryError::Io(err)
    }
}

impl From<serde_json::Error> for LibraryError {
    fn from(err: serde_json::Error) -> Self {
        LibraryError::Json(err)
    }
}

impl From<ProviderError> for LibraryError {
    fn from(err: ProviderError) -> Self {
        LibraryError::Provider(err)
    }
}

impl From<SettingsError> for LibraryError {
    fn from(err: SettingsError) -> Self {
        LibraryError::Settings(err)
    }
}

impl From<regex::Error> for LibraryError {
    fn from(err: regex::Error) -> Self {
        LibraryError::Pattern(err)
    }
}

impl From<tokio::task::JoinError> for LibraryError {
    fn from(err: tokio::task::JoinError) -> Self {
        LibraryError::Join(err)
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
