use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Identity of a library node.
///
/// Provider ids and extras ids are integers and are kept exact, including
/// ids beyond the 2^53 range that providers send as strings. Synthetic
/// collections use small negative fractions (`-0.001`, `-0.002`, ...).
/// Integral values always land in `Int`, so each id has one representation.
#[derive(Clone, Copy, Debug)]
pub enum ItemId {
    Int(i64),
    Fraction(f64),
}

impl ItemId {
    /// `collectionId` value marking a top-level alias-only copy.
    pub const ALIAS_ONLY: ItemId = ItemId::Int(-2);

    pub fn new(value: f64) -> Self {
        if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
            ItemId::Int(value as i64)
        } else {
            ItemId::Fraction(value)
        }
    }

    pub fn is_synthetic(self) -> bool {
        match self {
            ItemId::Int(value) => value < 0,
            ItemId::Fraction(value) => value < 0.0,
        }
    }

    pub fn is_fractional(self) -> bool {
        matches!(self, ItemId::Fraction(_))
    }

    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        if let Ok(value) = input.parse::<i64>() {
            return Some(ItemId::Int(value));
        }
        let value = input.parse::<f64>().ok()?;
        if value.is_finite() {
            Some(Self::new(value))
        } else {
            None
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            ItemId::Int(value) => value as f64,
            ItemId::Fraction(value) => value,
        }
    }
}

impl Default for ItemId {
    fn default() -> Self {
        ItemId::Int(0)
    }
}

impl PartialEq for ItemId {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ItemId::Int(a), ItemId::Int(b)) => a == b,
            (ItemId::Fraction(a), ItemId::Fraction(b)) => a.to_bits() == b.to_bits(),
            _ => false,
        }
    }
}

impl Eq for ItemId {}

impl Hash for ItemId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            ItemId::Int(value) => {
                0u8.hash(state);
                value.hash(state);
            }
            ItemId::Fraction(value) => {
                1u8.hash(state);
                value.to_bits().hash(state);
            }
        }
    }
}

impl Ord for ItemId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (ItemId::Int(a), ItemId::Int(b)) => a.cmp(b),
            (ItemId::Fraction(a), ItemId::Fraction(b)) => a.total_cmp(b),
            _ => self
                .as_f64()
                .total_cmp(&other.as_f64())
                .then_with(|| self.is_fractional().cmp(&other.is_fractional())),
        }
    }
}

impl PartialOrd for ItemId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        ItemId::Int(value)
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemId::Int(value) => write!(f, "{}", value),
            ItemId::Fraction(value) => write!(f, "{}", value),
        }
    }
}

impl Serialize for ItemId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ItemId::Int(value) => serializer.serialize_i64(*value),
            ItemId::Fraction(value) => serializer.serialize_f64(*value),
        }
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ItemIdVisitor)
    }
}

// Some provider payloads carry ids beyond 2^53 as strings.
struct ItemIdVisitor;

impl<'de> Visitor<'de> for ItemIdVisitor {
    type Value = ItemId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a numeric id or a string holding one")
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> Result<ItemId, E> {
        Ok(ItemId::Int(value))
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> Result<ItemId, E> {
        i64::try_from(value)
            .map(ItemId::Int)
            .map_err(|_| E::custom(format!("id out of range: {}", value)))
    }

    fn visit_f64<E: de::Error>(self, value: f64) -> Result<ItemId, E> {
        if value.is_finite() {
            Ok(ItemId::new(value))
        } else {
            Err(E::custom("id is not finite"))
        }
    }

    fn visit_str<E: de::Error>(self, value: &str) -> Result<ItemId, E> {
        ItemId::parse(value).ok_or_else(|| E::custom(format!("invalid id: {}", value)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    File,
    Movie,
    Collection,
    TvShow,
    TvSeason,
    TvEpisode,
    TvCollection,
    Extra,
}

impl ItemType {
    pub fn is_container(self) -> bool {
        !matches!(self, ItemType::File | ItemType::Extra)
    }

    pub fn is_collection(self) -> bool {
        matches!(self, ItemType::Collection | ItemType::TvCollection)
    }
}

/// Rebuild lifecycle, strictly sequential within one rebuild.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LibraryStatus {
    #[default]
    NotStarted,
    Initialized,
    BonusMaterialLinked,
    AllVideos,
    MediaDetails,
    Done,
}

/// HDR variants in ascending rank order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HdrKind {
    #[serde(rename = "HDR")]
    Hdr,
    #[serde(rename = "HLG")]
    Hlg,
    #[serde(rename = "HDR10")]
    Hdr10,
    #[serde(rename = "HDR10+")]
    Hdr10Plus,
    #[serde(rename = "DV")]
    DolbyVision,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryItem {
    pub id: ItemId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<ItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregation_id: Option<ItemId>,
    #[serde(rename = "type")]
    pub kind: ItemType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<LibraryItem>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poster_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backdrop_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias_poster_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_play_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub add_time: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<f64>,
    #[serde(rename = "is3D", default, skip_serializing_if = "Option::is_none")]
    pub is_3d: Option<bool>,
    #[serde(rename = "isHD", default, skip_serializing_if = "Option::is_none")]
    pub is_hd: Option<bool>,
    #[serde(rename = "is2K", default, skip_serializing_if = "Option::is_none")]
    pub is_2k: Option<bool>,
    #[serde(rename = "is4K", default, skip_serializing_if = "Option::is_none")]
    pub is_4k: Option<bool>,
    #[serde(rename = "isSD", default, skip_serializing_if = "Option::is_none")]
    pub is_sd: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hdr: Option<HdrKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_channels: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_languages: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_languages: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_sort: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overview: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode_count: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watched: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watched_by_user: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_alias: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_link: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hide: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LibraryItem {
    pub fn new(id: ItemId, kind: ItemType, name: impl Into<String>) -> Self {
        Self {
            id,
            parent_id: None,
            collection_id: None,
            aggregation_id: None,
            kind,
            name: name.into(),
            title: None,
            data: None,
            uri: None,
            stream_uri: None,
            mobile_uri: None,
            sample_uri: None,
            logo: None,
            poster_path: None,
            backdrop_path: None,
            alias_poster_path: None,
            duration: None,
            position: None,
            last_play_time: None,
            add_time: None,
            year: None,
            resolution: None,
            aspect_ratio: None,
            is_3d: None,
            is_hd: None,
            is_2k: None,
            is_4k: None,
            is_sd: None,
            hdr: None,
            video_codec: None,
            audio_channels: None,
            audio_languages: None,
            subtitle_languages: None,
            cut: None,
            cut_sort: None,
            season: None,
            episode: None,
            genres: None,
            actors: None,
            directors: None,
            overview: None,
            rating: None,
            season_count: None,
            episode_count: None,
            watched: None,
            watched_by_user: None,
            is_alias: None,
            is_link: None,
            original_name: None,
            hide: None,
            error: None,
        }
    }

    /// Display title, falling back to the name.
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.name)
    }

    pub fn children(&self) -> &[LibraryItem] {
        self.data.as_deref().unwrap_or(&[])
    }

    pub fn is_alias(&self) -> bool {
        self.is_alias.unwrap_or(false)
    }

    pub fn is_alias_only(&self) -> bool {
        self.collection_id == Some(ItemId::ALIAS_ONLY)
    }

    pub fn push_child(&mut self, child: LibraryItem) {
        self.data.get_or_insert_with(Vec::new).push(child);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoLibrary {
    pub status: LibraryStatus,
    pub progress: f64,
    #[serde(default)]
    pub last_update: u64,
    #[serde(default)]
    pub array: Vec<LibraryItem>,
    #[serde(default)]
    pub main_file_count: usize,
    #[serde(default)]
    pub bonus_file_count: usize,
}

impl Default for VideoLibrary {
    fn default() -> Self {
        Self {
            status: LibraryStatus::NotStarted,
            progress: -1.0,
            last_update: 0,
            array: Vec::new(),
            main_file_count: 0,
            bonus_file_count: 0,
        }
    }
}

pub fn content_hash(input: &[u8]) -> String {
    blake3::hash(input).to_hex().to_string()
}

pub fn relpath_from(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(path_to_slash_string(rel))
}

pub fn join_relpath(root: &Path, relpath: &str) -> PathBuf {
    let mut out = PathBuf::from(root);
    for part in relpath.split('/') {
        if part.is_empty() {
            continue;
        }
        out.push(part);
    }
    out
}

/// Directory part of a `/`-separated relative path; empty at the root.
pub fn parent_relpath(relpath: &str) -> &str {
    match relpath.trim_end_matches('/').rfind('/') {
        Some(idx) => &relpath[..idx],
        None => "",
    }
}

pub fn file_name(relpath: &str) -> &str {
    let trimmed = relpath.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

pub fn join_rel(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir.trim_end_matches('/'), name)
    }
}

fn path_to_slash_string(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_deterministic() {
        let first = content_hash(b"{\"aliases\":[]}");
        let second = content_hash(b"{\"aliases\":[]}");
        assert_eq!(first, second);
        assert_ne!(first, content_hash(b"{\"aliases\":[{}]}"));
    }

    #[test]
    fn item_ids_accept_numbers_and_strings() {
        let ids: Vec<ItemId> = serde_json::from_str("[42, \"43\", -0.002]").unwrap();
        assert_eq!(ids, vec![ItemId::from(42), ItemId::from(43), ItemId::new(-0.002)]);
        assert_eq!(serde_json::to_string(&ids).unwrap(), "[42,43,-0.002]");
    }

    #[test]
    fn large_string_ids_stay_distinct() {
        let ids: Vec<ItemId> =
            serde_json::from_str("[\"9007199254740993\", \"9007199254740992\"]").unwrap();
        assert_ne!(ids[0], ids[1]);
        assert_eq!(ids[0], ItemId::Int(9_007_199_254_740_993));
        assert_eq!(ids[0].to_string(), "9007199254740993");
        assert_eq!(serde_json::to_string(&ids[0]).unwrap(), "9007199254740993");
    }

    #[test]
    fn integral_values_share_one_representation() {
        assert_eq!(ItemId::new(0.0), ItemId::new(-0.0));
        assert_eq!(ItemId::new(42.0), ItemId::from(42));
        assert_eq!(serde_json::from_str::<ItemId>("42.0").unwrap(), ItemId::from(42));
        assert!(ItemId::new(-0.001).is_fractional());
        assert!(!ItemId::new(-10001.0).is_fractional());
        assert!(ItemId::new(-0.001).is_synthetic());
        assert!(ItemId::new(-0.002) < ItemId::new(-0.001));
        assert!(ItemId::from(-10001) < ItemId::new(-0.001));
        assert!(ItemId::new(-0.001) < ItemId::from(0));
    }

    #[test]
    fn library_item_omits_absent_fields() {
        let mut item = LibraryItem::new(ItemId::from(7), ItemType::TvShow, "Show");
        item.is_sd = Some(true);
        item.hdr = Some(HdrKind::Hdr10Plus);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": 7, "type": "TvShow", "name": "Show", "isSD": true, "hdr": "HDR10+"})
        );
    }

    #[test]
    fn hdr_rank_follows_declaration_order() {
        assert!(HdrKind::DolbyVision > HdrKind::Hdr10Plus);
        assert!(HdrKind::Hdr10 > HdrKind::Hlg);
        assert!(HdrKind::Hlg > HdrKind::Hdr);
    }

    #[test]
    fn relpath_helpers() {
        assert_eq!(parent_relpath("Show/Season 1/ep.mkv"), "Show/Season 1");
        assert_eq!(parent_relpath("ep.mkv"), "");
        assert_eq!(file_name("Show/Season 1/ep.mkv"), "ep.mkv");
        assert_eq!(join_rel("", "Show"), "Show");
        assert_eq!(join_rel("Show", "_Extras_"), "Show/_Extras_");
        let root = Path::new("/videos");
        assert_eq!(
            relpath_from(root, Path::new("/videos/Show/ep.mkv")).as_deref(),
            Some("Show/ep.mkv")
        );
    }
}
