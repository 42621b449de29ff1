use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use common::content_hash;
use library::{LibraryManager, RebuildMode};
use notify::{Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Watches the mapping document and starts a quick rebuild when its
/// content changes.
pub fn configure_mapping_watcher(state: &AppState) {
    if !state.config.watch_mapping {
        info!("Mapping watcher disabled (watch_mapping=false)");
        *state.watcher.write() = None;
        return;
    }

    let debounce = Duration::from_secs(state.config.watch_debounce_secs.max(1));
    let mapping_path = state.manager.config().mapping_path.clone();

    match setup_watcher(state.manager.clone(), mapping_path.clone(), debounce) {
        Ok(watcher) => {
            info!(
                "Watching {} for mapping changes (debounce {}s)",
                mapping_path.display(),
                debounce.as_secs()
            );
            *state.watcher.write() = Some(watcher);
        }
        Err(err) => {
            warn!("Failed to start mapping watcher: {}", err);
            *state.watcher.write() = None;
        }
    }
}

fn setup_watcher(
    manager: Arc<LibraryManager>,
    mapping_path: PathBuf,
    debounce: Duration,
) -> Result<RecommendedWatcher, notify::Error> {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<Event>();
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        NotifyConfig::default(),
    )?;

    // Editors often replace the file, so the directory is watched.
    let dir = mapping_path
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;

    tokio::spawn(async move {
        let initial = hash_file(&mapping_path).await;
        watch_loop(manager, mapping_path, rx, debounce, initial).await;
    });

    Ok(watcher)
}

async fn watch_loop(
    manager: Arc<LibraryManager>,
    mapping_path: PathBuf,
    mut rx: UnboundedReceiver<Event>,
    debounce: Duration,
    mut last_hash: Option<String>,
) {
    loop {
        let event = match rx.recv().await {
            Some(event) => event,
            None => break,
        };
        if !is_relevant_event(&event, &mapping_path) {
            continue;
        }

        loop {
            tokio::select! {
                _ = tokio::time::sleep(debounce) => break,
                maybe_event = rx.recv() => {
                    if maybe_event.is_none() {
                        return;
                    }
                }
            }
        }

        let hash = hash_file(&mapping_path).await;
        if hash == last_hash {
            debug!("Mapping file touched without content change");
            continue;
        }
        last_hash = hash;

        while manager.is_rebuilding() {
            tokio::time::sleep(debounce).await;
        }
        if manager.start_rebuild(RebuildMode::Quick) {
            info!("Mapping changed; quick rebuild started");
        }
    }
}

async fn hash_file(path: &Path) -> Option<String> {
    tokio::fs::read(path)
        .await
        .ok()
        .map(|bytes| content_hash(&bytes))
}

fn is_relevant_event(event: &Event, mapping_path: &Path) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    );
    kind_matches
        && event
            .paths
            .iter()
            .any(|path| path.file_name() == mapping_path.file_name())
}
