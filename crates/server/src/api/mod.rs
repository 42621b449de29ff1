pub mod library;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use ::library::Notification;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::debug;

use crate::state::{AppState, HealthResponse};

pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/library", get(library::get_library))
        .route("/library/status", get(library::get_status))
        .route("/library/items/:id", get(library::get_item))
        .route("/library/files/:id", get(library::get_file))
        .route("/library/items/:id/aliases", get(library::get_aliases))
        .route("/library/items/:id/parent", get(library::get_parent))
        .route("/library/items/:id/watched", post(library::set_watched))
        .route("/library/rebuild", post(library::rebuild))
        .route("/library/rebuild/cancel", post(library::cancel_rebuild))
        .route("/events", get(events))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn events(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let receiver = state.manager.notifier().subscribe();
    ws.on_upgrade(move |socket| forward_events(socket, receiver))
}

/// Pushes notifications to one websocket client until either side closes.
async fn forward_events(socket: WebSocket, mut receiver: broadcast::Receiver<Notification>) {
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            message = receiver.recv() => match message {
                Ok(notification) => {
                    let text = match serde_json::to_string(&notification) {
                        Ok(text) => text,
                        Err(err) => {
                            debug!("Failed to encode notification: {}", err);
                            continue;
                        }
                    };
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Event listener lagged; {} notifications dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("Event listener disconnected");
}
