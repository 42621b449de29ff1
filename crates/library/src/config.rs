use std::path::PathBuf;
use std::time::Duration;

use regex::{RegexSet, RegexSetBuilder};
use serde::{Deserialize, Serialize};

use crate::progress::ProgressHistory;
use crate::LibraryError;

/// Pixel thresholds for the resolution buckets. A file lands in the first
/// bucket whose width or height threshold it reaches.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolutionThresholds {
    pub uhd_width: u32,
    pub uhd_height: u32,
    pub fhd_width: u32,
    pub fhd_height: u32,
    pub hd_width: u32,
    pub hd_height: u32,
}

impl Default for ResolutionThresholds {
    fn default() -> Self {
        Self {
            uhd_width: 3200,
            uhd_height: 1800,
            fhd_width: 1800,
            fhd_height: 1000,
            hd_width: 1200,
            hd_height: 700,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub video_root: PathBuf,
    /// Prefix of provider uris that corresponds to `video_root`.
    pub provider_root: String,
    pub streaming_root: PathBuf,
    pub mapping_path: PathBuf,
    pub bonus_dir_patterns: Vec<String>,
    pub media_extensions: Vec<String>,
    pub backup_suffixes: Vec<String>,
    pub resolution: ResolutionThresholds,
    pub progress_bootstrap: ProgressHistory,
    pub freshness: Duration,
    pub patch_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            video_root: PathBuf::from("videos"),
            provider_root: "/videos".to_string(),
            streaming_root: PathBuf::from("streaming"),
            mapping_path: PathBuf::from("mapping.json"),
            bonus_dir_patterns: default_bonus_patterns(),
            media_extensions: default_media_extensions(),
            backup_suffixes: default_backup_suffixes(),
            resolution: ResolutionThresholds::default(),
            progress_bootstrap: ProgressHistory::default(),
            freshness: Duration::from_secs(7 * 24 * 60 * 60),
            patch_delay: Duration::from_millis(2000),
        }
    }
}

impl SyncConfig {
    /// Video-root relative path of a provider uri, `/`-separated.
    pub fn relpath_of<'a>(&self, uri: &'a str) -> &'a str {
        let root = self.provider_root.trim_end_matches('/');
        let rest = if !root.is_empty() && uri.starts_with(root) {
            &uri[root.len()..]
        } else {
            uri
        };
        rest.trim_start_matches('/')
    }

    pub fn provider_uri(&self, relpath: &str) -> String {
        format!(
            "{}/{}",
            self.provider_root.trim_end_matches('/'),
            relpath.trim_start_matches('/')
        )
    }

    pub fn is_media_file(&self, name: &str) -> bool {
        let Some((_, ext)) = name.rsplit_once('.') else {
            return false;
        };
        self.media_extensions
            .iter()
            .any(|known| known.trim_start_matches('.').eq_ignore_ascii_case(ext))
    }

    pub fn is_backup_file(&self, name: &str) -> bool {
        let lower = name.to_lowercase();
        self.backup_suffixes
            .iter()
            .any(|suffix| lower.ends_with(&suffix.to_lowercase()))
    }

    pub fn bonus_matcher(&self) -> Result<BonusMatcher, LibraryError> {
        BonusMatcher::new(&self.bonus_dir_patterns)
    }
}

pub fn default_bonus_patterns() -> Vec<String> {
    [
        "^_?extras_?$",
        "^featurettes$",
        "^behind the scenes$",
        "^deleted scenes$",
        "^interviews$",
        "^trailers$",
        "^bonus( material)?$",
    ]
    .iter()
    .map(|pattern| pattern.to_string())
    .collect()
}

pub fn default_media_extensions() -> Vec<String> {
    ["mkv", "mk3d", "mp4", "m4v", "avi", "mov", "mpg", "mpeg", "ts", "m2ts", "wmv", "webm"]
        .iter()
        .map(|ext| ext.to_string())
        .collect()
}

pub fn default_backup_suffixes() -> Vec<String> {
    ["~", ".bak", ".orig", ".part", ".tmp"]
        .iter()
        .map(|suffix| suffix.to_string())
        .collect()
}

/// Case-insensitive matcher for bonus-material directory names.
#[derive(Clone, Debug)]
pub struct BonusMatcher {
    set: RegexSet,
}

impl BonusMatcher {
    pub fn new(patterns: &[String]) -> Result<Self, LibraryError> {
        let set = RegexSetBuilder::new(patterns)
            .case_insensitive(true)
            .build()?;
        Ok(Self { set })
    }

    pub fn is_bonus_dir(&self, name: &str) -> bool {
        self.set.is_match(name)
    }

    /// True when any directory component of `relpath` is a bonus directory.
    pub fn is_under_bonus(&self, relpath: &str) -> bool {
        let mut parts: Vec<&str> = relpath.split('/').filter(|part| !part.is_empty()).collect();
        parts.pop();
        parts.iter().any(|part| self.is_bonus_dir(part))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relpath_strips_provider_root() {
        let config = SyncConfig {
            provider_root: "/volume1/video/".to_string(),
            ..SyncConfig::default()
        };
        assert_eq!(config.relpath_of("/volume1/video/Movies/A.mkv"), "Movies/A.mkv");
        assert_eq!(config.relpath_of("Movies/A.mkv"), "Movies/A.mkv");
        assert_eq!(config.provider_uri("Movies/A.mkv"), "/volume1/video/Movies/A.mkv");
    }

    #[test]
    fn media_and_backup_classification() {
        let config = SyncConfig::default();
        assert!(config.is_media_file("Show - S01E01.MKV"));
        assert!(!config.is_media_file("poster.jpg"));
        assert!(!config.is_media_file("README"));
        assert!(config.is_backup_file("Movie.mkv.bak"));
        assert!(config.is_backup_file("Movie.mkv~"));
        assert!(!config.is_backup_file("Movie.mkv"));
    }

    #[test]
    fn bonus_matcher_is_case_insensitive() {
        let matcher = SyncConfig::default().bonus_matcher().unwrap();
        assert!(matcher.is_bonus_dir("_Extras_"));
        assert!(matcher.is_bonus_dir("Deleted Scenes"));
        assert!(!matcher.is_bonus_dir("Season 1"));
        assert!(matcher.is_under_bonus("Show/Season 1/_Extras_/deleted.mkv"));
        assert!(!matcher.is_under_bonus("Show/Season 1/extras.mkv"));
    }

    #[test]
    fn invalid_bonus_pattern_is_reported() {
        let err = BonusMatcher::new(&["(".to_string()]).unwrap_err();
        assert!(matches!(err, LibraryError::Pattern(_)));
    }
}
