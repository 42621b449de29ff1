use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{ItemId, VideoLibrary};
use metadata::{MediaInfo, MediaInspector, MetadataError};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::fs::{DirEntryNode, DirectoryLister};
use crate::provider::{
    ItemDetails, MediaProvider, PlaybackStatus, ProviderError, ProviderItem, WatchState,
};
use crate::settings::{SettingsError, SettingsStore};
use crate::store::LibraryStorage;
use crate::LibraryError;

pub fn provider_item(value: serde_json::Value) -> ProviderItem {
    serde_json::from_value(value).unwrap()
}

#[derive(Default)]
pub struct FakeProvider {
    pub aggregation: Mutex<Vec<ProviderItem>>,
    pub children: Mutex<HashMap<ItemId, Vec<ProviderItem>>>,
    pub details: Mutex<HashMap<ItemId, ItemDetails>>,
    pub watch: Mutex<HashMap<ItemId, WatchState>>,
    pub playback: Mutex<PlaybackStatus>,
    pub marked: Mutex<Vec<(ItemId, bool)>>,
    pub watch_requests: Mutex<Vec<ItemId>>,
    pub fail_children: AtomicBool,
    pub aggregation_calls: AtomicUsize,
    /// When set, `aggregation` waits for a notification before answering.
    pub gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeProvider {
    pub fn with_tree(aggregation: Vec<ProviderItem>) -> Self {
        let provider = FakeProvider::default();
        *provider.aggregation.lock() = aggregation;
        provider
    }
}

#[async_trait]
impl MediaProvider for FakeProvider {
    async fn aggregation(&self) -> Result<Vec<ProviderItem>, ProviderError> {
        self.aggregation_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(self.aggregation.lock().clone())
    }

    async fn children(&self, id: ItemId) -> Result<Vec<ProviderItem>, ProviderError> {
        if self.fail_children.load(Ordering::SeqCst) {
            return Err(ProviderError::Request("connection refused".to_string()));
        }
        Ok(self.children.lock().get(&id).cloned().unwrap_or_default())
    }

    async fn details(&self, id: ItemId) -> Result<Option<ItemDetails>, ProviderError> {
        Ok(self.details.lock().get(&id).cloned())
    }

    async fn playback_status(&self) -> Result<PlaybackStatus, ProviderError> {
        Ok(self.playback.lock().clone())
    }

    async fn watch_state(&self, id: ItemId) -> Result<Option<WatchState>, ProviderError> {
        self.watch_requests.lock().push(id);
        Ok(self.watch.lock().get(&id).cloned())
    }

    async fn mark_watched(&self, id: ItemId, watched: bool) -> Result<(), ProviderError> {
        self.marked.lock().push((id, watched));
        Ok(())
    }
}

pub struct FakeLister {
    pub tree: DirEntryNode,
}

impl FakeLister {
    pub fn from_paths(paths: &[&str]) -> Self {
        Self {
            tree: DirEntryNode::from_paths(paths),
        }
    }
}

#[async_trait]
impl DirectoryLister for FakeLister {
    async fn list(&self, _root: &Path) -> Result<DirEntryNode, LibraryError> {
        Ok(self.tree.clone())
    }
}

/// Answers by file name; unknown files fail.
#[derive(Default)]
pub struct FakeInspector {
    pub infos: Mutex<HashMap<String, MediaInfo>>,
}

#[async_trait]
impl MediaInspector for FakeInspector {
    async fn inspect(&self, path: &Path) -> Result<MediaInfo, MetadataError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        self.infos
            .lock()
            .get(&name)
            .cloned()
            .ok_or(MetadataError::NoTracks)
    }
}

#[derive(Default)]
pub struct MemoryStorage {
    pub library: Mutex<Option<VideoLibrary>>,
    pub saves: AtomicUsize,
    /// When set, the next save waits for a notification before storing.
    pub save_gate: Mutex<Option<Arc<Notify>>>,
}

impl MemoryStorage {
    pub fn with_library(library: VideoLibrary) -> Self {
        Self {
            library: Mutex::new(Some(library)),
            ..Self::default()
        }
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<VideoLibrary> {
        self.library.lock().clone()
    }
}

#[async_trait]
impl LibraryStorage for MemoryStorage {
    async fn load(&self) -> Result<Option<VideoLibrary>, LibraryError> {
        Ok(self.library.lock().clone())
    }

    async fn save(&self, library: &VideoLibrary) -> Result<(), LibraryError> {
        let gate = self.save_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        *self.library.lock() = Some(library.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemorySettings {
    values: Mutex<HashMap<String, String>>,
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>, SettingsError> {
        Ok(self.values.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SettingsError> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
