use async_trait::async_trait;
use common::{ItemId, ItemType, LibraryItem};
use serde::{Deserialize, Deserializer, Serialize};

/// The external media-center API the library is merged against.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    /// Top-level filtered aggregation listing.
    async fn aggregation(&self) -> Result<Vec<ProviderItem>, ProviderError>;
    async fn children(&self, id: ItemId) -> Result<Vec<ProviderItem>, ProviderError>;
    async fn details(&self, id: ItemId) -> Result<Option<ItemDetails>, ProviderError>;
    async fn playback_status(&self) -> Result<PlaybackStatus, ProviderError>;
    async fn watch_state(&self, id: ItemId) -> Result<Option<WatchState>, ProviderError>;
    async fn mark_watched(&self, id: ItemId, watched: bool) -> Result<(), ProviderError>;
}

#[derive(Debug)]
pub enum ProviderError {
    Request(String),
    Status { status: u16, url: String },
    Decode(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Request(err) => write!(f, "request failed: {}", err),
            ProviderError::Status { status, url } => {
                write!(f, "unexpected status {} from {}", status, url)
            }
            ProviderError::Decode(err) => write!(f, "invalid response: {}", err),
        }
    }
}

impl std::error::Error for ProviderError {}

/// Item as delivered by the provider. Unknown fields are dropped on decode;
/// `into_item` keeps only what the library model carries.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderItem {
    pub id: ItemId,
    #[serde(rename = "type", deserialize_with = "item_type_from_name_or_code")]
    pub kind: ItemType,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub parent_id: Option<ItemId>,
    #[serde(default)]
    pub aggregation_id: Option<ItemId>,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub logo: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub watched: Option<bool>,
    #[serde(default)]
    pub watched_by_user: Option<bool>,
    #[serde(default)]
    pub playback: Option<Playback>,
    #[serde(default)]
    pub items: Option<Vec<ProviderItem>>,
}

/// Leaf playback block nested in provider items.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playback {
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub add_time: Option<u64>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub position: Option<f64>,
    #[serde(default)]
    pub last_play_time: Option<u64>,
}

impl ProviderItem {
    /// Flattens the playback block into the node and converts nested items.
    pub fn into_item(self, parent: Option<ItemId>) -> LibraryItem {
        let mut item = LibraryItem::new(self.id, self.kind, self.name);
        item.parent_id = self.parent_id.or(parent);
        item.aggregation_id = self.aggregation_id;
        item.title = self.title;
        item.uri = self.uri;
        item.logo = self.logo;
        item.poster_path = self.poster_path;
        item.backdrop_path = self.backdrop_path;
        item.year = self.year.filter(|year| *year > 0);
        item.watched = self.watched;
        item.watched_by_user = self.watched_by_user;

        if let Some(playback) = self.playback {
            if item.uri.is_none() {
                item.uri = playback.uri;
            }
            item.add_time = playback.add_time;
            item.duration = playback.duration;
            item.position = playback.position;
            item.last_play_time = playback.last_play_time;
        }

        if let Some(children) = self.items {
            let id = item.id;
            item.data = Some(
                children
                    .into_iter()
                    .map(|child| child.into_item(Some(id)))
                    .collect(),
            );
        }
        item
    }
}

fn item_type_from_name_or_code<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<ItemType, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Code(u8),
        Name(ItemType),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Name(kind) => Ok(kind),
        Repr::Code(code) => match code {
            0 => Ok(ItemType::File),
            1 => Ok(ItemType::Movie),
            2 => Ok(ItemType::Collection),
            3 => Ok(ItemType::TvShow),
            4 => Ok(ItemType::TvSeason),
            5 => Ok(ItemType::TvEpisode),
            6 => Ok(ItemType::TvCollection),
            other => Err(serde::de::Error::custom(format!(
                "unknown item type code {}",
                other
            ))),
        },
    }
}

/// Node-level details: cast, genres, overview, ratings, counts.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemDetails {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub genres: Vec<String>,
    pub actors: Vec<String>,
    pub directors: Vec<String>,
    pub overview: Option<String>,
    pub rating: Option<f64>,
    pub season_count: Option<u32>,
    pub episode_count: Option<u32>,
    pub logo: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
}

impl ItemDetails {
    pub fn apply_to(self, item: &mut LibraryItem) {
        if item.title.is_none() {
            item.title = self.title;
        }
        if item.year.is_none() {
            item.year = self.year.filter(|year| *year > 0);
        }
        if !self.genres.is_empty() {
            item.genres = Some(self.genres);
        }
        if !self.actors.is_empty() {
            item.actors = Some(self.actors);
        }
        if !self.directors.is_empty() {
            item.directors = Some(self.directors);
        }
        if self.overview.is_some() {
            item.overview = self.overview;
        }
        if self.rating.is_some() {
            item.rating = self.rating;
        }
        if self.season_count.is_some() {
            item.season_count = self.season_count;
        }
        if self.episode_count.is_some() {
            item.episode_count = self.episode_count;
        }
        if item.logo.is_none() {
            item.logo = self.logo;
        }
        if item.poster_path.is_none() {
            item.poster_path = self.poster_path;
        }
        if item.backdrop_path.is_none() {
            item.backdrop_path = self.backdrop_path;
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PlaybackStatus {
    pub playing: bool,
    pub item: Option<ItemId>,
    pub position: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WatchState {
    pub watched: bool,
    pub watched_by_user: Option<bool>,
    pub position: Option<f64>,
    pub last_play_time: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_items_flatten_playback_and_drop_unknown_fields() {
        let json = r#"{
            "id": "9007199254740993",
            "type": 0,
            "name": "Movie.mkv",
            "vendorBlob": {"internal": true},
            "playback": {"uri": "/videos/Movie.mkv", "duration": 5400.5, "addTime": 1700000000000}
        }"#;
        let provider: ProviderItem = serde_json::from_str(json).unwrap();
        let item = provider.into_item(Some(ItemId::from(3)));
        assert_eq!(item.kind, ItemType::File);
        assert_eq!(item.parent_id, Some(ItemId::from(3)));
        assert_eq!(item.uri.as_deref(), Some("/videos/Movie.mkv"));
        assert_eq!(item.duration, Some(5400.5));
        assert_eq!(item.add_time, Some(1_700_000_000_000));

        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("vendorBlob").is_none());
        assert!(value.get("playback").is_none());
    }

    #[test]
    fn nested_items_become_children() {
        let json = r#"{
            "id": 10, "type": "TvEpisode", "name": "Pilot",
            "items": [{"id": 11, "type": "File", "name": "Show - S01E01.mkv"}]
        }"#;
        let provider: ProviderItem = serde_json::from_str(json).unwrap();
        let item = provider.into_item(None);
        assert_eq!(item.kind, ItemType::TvEpisode);
        assert_eq!(item.children().len(), 1);
        assert_eq!(item.children()[0].parent_id, Some(ItemId::from(10)));
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let json = r#"{"id": 1, "type": 42, "name": "x"}"#;
        assert!(serde_json::from_str::<ProviderItem>(json).is_err());
    }

    #[test]
    fn details_fill_without_clobbering_titles() {
        let mut item = LibraryItem::new(ItemId::from(5), ItemType::Movie, "Heat");
        item.title = Some("Heat".to_string());
        ItemDetails {
            title: Some("HEAT".to_string()),
            year: Some(1995),
            genres: vec!["Crime".to_string()],
            season_count: None,
            ..ItemDetails::default()
        }
        .apply_to(&mut item);
        assert_eq!(item.title.as_deref(), Some("Heat"));
        assert_eq!(item.year, Some(1995));
        assert_eq!(item.genres, Some(vec!["Crime".to_string()]));
    }
}
