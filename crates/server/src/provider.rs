use std::time::Duration;

use async_trait::async_trait;
use common::ItemId;
use library::{ItemDetails, MediaProvider, PlaybackStatus, ProviderError, ProviderItem, WatchState};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Deserialize)]
struct ItemList {
    #[serde(default)]
    items: Vec<ProviderItem>,
}

#[derive(Serialize)]
struct WatchedRequest {
    watched: bool,
}

/// JSON-over-HTTP client for the media center.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl HttpProvider {
    pub fn new(client: Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, ProviderError> {
        debug!("Provider request {}", url);
        request
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let url = self.url(path);
        let response = self.send(self.client.get(&url), &url).await?;
        decode(check(response, &url)?).await
    }

    /// Like `get_json` but maps 404 to `None`.
    async fn get_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ProviderError> {
        let url = self.url(path);
        let response = self.send(self.client.get(&url), &url).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        decode(check(response, &url)?).await.map(Some)
    }
}

fn check(response: Response, url: &str) -> Result<Response, ProviderError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ProviderError::Status {
            status: response.status().as_u16(),
            url: url.to_string(),
        })
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let body = response
        .bytes()
        .await
        .map_err(|err| ProviderError::Request(err.to_string()))?;
    serde_json::from_slice(&body).map_err(|err| ProviderError::Decode(err.to_string()))
}

#[async_trait]
impl MediaProvider for HttpProvider {
    async fn aggregation(&self) -> Result<Vec<ProviderItem>, ProviderError> {
        let list: ItemList = self.get_json("library/aggregations").await?;
        Ok(list.items)
    }

    async fn children(&self, id: ItemId) -> Result<Vec<ProviderItem>, ProviderError> {
        let list: ItemList = self
            .get_json(&format!("library/items/{}/children", id))
            .await?;
        Ok(list.items)
    }

    async fn details(&self, id: ItemId) -> Result<Option<ItemDetails>, ProviderError> {
        self.get_optional(&format!("library/items/{}", id)).await
    }

    async fn playback_status(&self) -> Result<PlaybackStatus, ProviderError> {
        self.get_json("playback/status").await
    }

    async fn watch_state(&self, id: ItemId) -> Result<Option<WatchState>, ProviderError> {
        self.get_optional(&format!("library/items/{}/watch-state", id))
            .await
    }

    async fn mark_watched(&self, id: ItemId, watched: bool) -> Result<(), ProviderError> {
        let url = self.url(&format!("library/items/{}/watched", id));
        let request = self.client.post(&url).json(&WatchedRequest { watched });
        check(self.send(request, &url).await?, &url)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use common::ItemType;
    use serde_json::{json, Value};

    async fn serve() -> HttpProvider {
        let app = Router::new()
            .route(
                "/api/library/aggregations",
                get(|| async {
                    Json(json!({"items": [
                        {"id": "9007199254740993", "type": 1, "name": "Heat"},
                        {"id": 2, "type": "TvShow", "name": "Show", "extra": true}
                    ]}))
                }),
            )
            .route(
                "/api/library/items/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "7" {
                        Ok(Json(json!({"title": "Heat", "genres": ["Crime"]})))
                    } else {
                        Err(HttpStatus::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/api/library/items/:id/children",
                get(|| async { HttpStatus::INTERNAL_SERVER_ERROR }),
            )
            .route(
                "/api/library/items/:id/watched",
                post(|Json(body): Json<Value>| async move {
                    if body["watched"] == json!(true) {
                        HttpStatus::NO_CONTENT
                    } else {
                        HttpStatus::BAD_REQUEST
                    }
                }),
            )
            .route(
                "/api/playback/status",
                get(|| async { Json(json!({"playing": true, "item": 7})) }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        HttpProvider::new(
            Client::new(),
            &format!("http://{}/api/", addr),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn decodes_listing_with_large_string_ids() {
        let provider = serve().await;
        let items = provider.aggregation().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].kind, ItemType::Movie);
        assert_eq!(items[0].id, ItemId::Int(9_007_199_254_740_993));
        assert_ne!(items[0].id, ItemId::Int(9_007_199_254_740_992));
        assert_eq!(items[1].kind, ItemType::TvShow);
    }

    #[tokio::test]
    async fn details_map_not_found_to_none() {
        let provider = serve().await;
        let details = provider.details(ItemId::from(7)).await.unwrap().unwrap();
        assert_eq!(details.genres, vec!["Crime".to_string()]);
        assert!(provider.details(ItemId::from(8)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn error_statuses_become_provider_errors() {
        let provider = serve().await;
        match provider.children(ItemId::from(2)).await {
            Err(ProviderError::Status { status, url }) => {
                assert_eq!(status, 500);
                assert!(url.ends_with("/api/library/items/2/children"));
            }
            other => panic!("unexpected result: {:?}", other.map(|items| items.len())),
        }
    }

    #[tokio::test]
    async fn playback_and_mark_watched() {
        let provider = serve().await;
        let status = provider.playback_status().await.unwrap();
        assert!(status.playing);
        assert_eq!(status.item, Some(ItemId::from(7)));
        provider.mark_watched(ItemId::from(7), true).await.unwrap();
        assert!(provider.mark_watched(ItemId::from(7), false).await.is_err());
    }
}
