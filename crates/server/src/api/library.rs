use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use common::LibraryItem;
use library::{RebuildMode, StatusReport};
use tracing::warn;

use crate::state::{
    AppState, CancelResponse, JsonResult, RebuildQuery, RebuildResponse, WatchedRequest,
    WatchedResponse,
};
use crate::utils::{json_error, parse_item_id};

pub async fn get_status(State(state): State<AppState>) -> Json<StatusReport> {
    Json(state.manager.status())
}

/// The whole committed tree, serialized straight from the snapshot.
pub async fn get_library(State(state): State<AppState>) -> Response {
    let Some(cached) = state.manager.snapshot() else {
        return json_error(StatusCode::SERVICE_UNAVAILABLE, "library not loaded yet").into_response();
    };
    match serde_json::to_vec(&cached.library) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(err) => json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode library: {}", err),
        )
        .into_response(),
    }
}

pub async fn get_item(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> JsonResult<LibraryItem> {
    let id = parse_item_id(&id)?;
    state
        .manager
        .find(id, false)
        .map(Json)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "item not found"))
}

pub async fn get_file(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> JsonResult<LibraryItem> {
    let id = parse_item_id(&id)?;
    state
        .manager
        .find(id, true)
        .map(Json)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "file not found"))
}

pub async fn get_aliases(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> JsonResult<Vec<LibraryItem>> {
    let id = parse_item_id(&id)?;
    Ok(Json(state.manager.aliases(id)))
}

pub async fn get_parent(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> JsonResult<LibraryItem> {
    let id = parse_item_id(&id)?;
    state
        .manager
        .parent(id)
        .map(Json)
        .ok_or_else(|| json_error(StatusCode::NOT_FOUND, "parent not found"))
}

pub async fn rebuild(
    State(state): State<AppState>,
    Query(query): Query<RebuildQuery>,
) -> (StatusCode, Json<RebuildResponse>) {
    let mode = if query.quick {
        RebuildMode::Quick
    } else {
        RebuildMode::Full
    };
    let started = state.manager.start_rebuild(mode);
    let status = if started {
        StatusCode::ACCEPTED
    } else {
        StatusCode::CONFLICT
    };
    (status, Json(RebuildResponse { started }))
}

pub async fn cancel_rebuild(State(state): State<AppState>) -> Json<CancelResponse> {
    Json(CancelResponse {
        cancelled: state.manager.cancel_rebuild(),
    })
}

pub async fn set_watched(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(request): Json<WatchedRequest>,
) -> JsonResult<WatchedResponse> {
    let id = parse_item_id(&id)?;
    if state.manager.find(id, false).is_none() {
        return Err(json_error(StatusCode::NOT_FOUND, "item not found"));
    }
    match state.manager.set_watched(id, request.watched).await {
        Ok(changed) => Ok(Json(WatchedResponse { changed })),
        Err(err) => {
            warn!("Failed to mark {} watched: {}", id, err);
            Err(json_error(StatusCode::BAD_GATEWAY, err.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::provider::HttpProvider;
    use common::{ItemId, ItemType, LibraryStatus, VideoLibrary};
    use library::{
        JsonFileStorage, LibraryManager, LibraryServices, LibraryStorage, Notifier, RedbSettings,
        SyncConfig, WalkDirLister,
    };
    use metadata::ToolInspector;
    use parking_lot::RwLock;
    use std::sync::Arc;
    use std::time::Duration;

    fn library() -> VideoLibrary {
        let mut file = LibraryItem::new(ItemId::from(11), ItemType::File, "Heat (1995).mkv");
        file.uri = Some("/videos/Movies/Heat/Heat (1995).mkv".to_string());
        let mut movie = LibraryItem::new(ItemId::from(10), ItemType::Movie, "Heat");
        movie.push_child(file);
        let mut alias = movie.clone();
        alias.name = "Heat Alias".to_string();
        alias.is_alias = Some(true);
        alias.collection_id = Some(ItemId::ALIAS_ONLY);
        VideoLibrary {
            status: LibraryStatus::Done,
            progress: 100.0,
            last_update: 1,
            array: vec![movie, alias],
            main_file_count: 1,
            bonus_file_count: 0,
        }
    }

    async fn state(dir: &tempfile::TempDir) -> AppState {
        let storage = Arc::new(JsonFileStorage::new(dir.path().join("library.json")));
        storage.save(&library()).await.unwrap();
        let services = LibraryServices {
            provider: Arc::new(HttpProvider::new(
                reqwest::Client::new(),
                "http://127.0.0.1:9",
                Duration::from_millis(200),
            )),
            lister: Arc::new(WalkDirLister),
            inspector: Arc::new(ToolInspector::new("ffprobe", "mkvmerge")),
            storage,
            settings: Arc::new(RedbSettings::open(&dir.path().join("settings.redb")).unwrap()),
        };
        let manager = LibraryManager::new(SyncConfig::default(), services, Notifier::default());
        assert!(manager.load_persisted().await);
        AppState {
            manager,
            config: Arc::new(ServerConfig::default()),
            watcher: Arc::new(RwLock::new(None)),
        }
    }

    #[tokio::test]
    async fn lookups_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;

        let Json(item) = get_item(State(state.clone()), AxumPath("10".to_string()))
            .await
            .unwrap();
        assert_eq!(item.kind, ItemType::Movie);
        assert!(item.is_alias.is_none());

        let (status, _) = get_file(State(state.clone()), AxumPath("10".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);

        let Json(file) = get_file(State(state.clone()), AxumPath("11".to_string()))
            .await
            .unwrap();
        assert_eq!(file.name, "Heat (1995).mkv");

        let Json(parent) = get_parent(State(state.clone()), AxumPath("11".to_string()))
            .await
            .unwrap();
        assert_eq!(parent.id, ItemId::from(10));

        let Json(aliases) = get_aliases(State(state.clone()), AxumPath("10".to_string()))
            .await
            .unwrap();
        assert_eq!(aliases.len(), 1);
        assert_eq!(aliases[0].name, "Heat Alias");

        let (status, _) = get_item(State(state), AxumPath("nope".to_string()))
            .await
            .unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reflects_the_loaded_library() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let Json(report) = get_status(State(state.clone())).await;
        assert_eq!(report.status, LibraryStatus::Done);
        assert_eq!(report.progress, 100.0);
        assert!(!report.rebuilding);

        let Json(cancel) = cancel_rebuild(State(state)).await;
        assert!(!cancel.cancelled);
    }

    #[tokio::test]
    async fn provider_failures_surface_as_bad_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir).await;
        let (status, _) = set_watched(
            State(state.clone()),
            AxumPath("11".to_string()),
            Json(WatchedRequest { watched: true }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(state.manager.find(ItemId::from(11), true).unwrap().watched, None);

        let (status, _) = set_watched(
            State(state),
            AxumPath("999".to_string()),
            Json(WatchedRequest { watched: true }),
        )
        .await
        .unwrap_err();
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
