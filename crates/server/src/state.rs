use std::sync::Arc;

use axum::http::StatusCode;
use axum::Json;
use library::LibraryManager;
use notify::RecommendedWatcher;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<LibraryManager>,
    pub config: Arc<ServerConfig>,
    pub watcher: Arc<RwLock<Option<RecommendedWatcher>>>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct RebuildResponse {
    pub started: bool,
}

#[derive(Serialize)]
pub struct CancelResponse {
    pub cancelled: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedResponse {
    pub changed: bool,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct RebuildQuery {
    pub quick: bool,
}

#[derive(Deserialize)]
pub struct WatchedRequest {
    pub watched: bool,
}

pub type JsonResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;
