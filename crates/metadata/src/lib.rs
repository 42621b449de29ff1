use std::path::Path;

use async_trait::async_trait;

mod tools;

pub use tools::{parse_ffprobe, parse_mkvmerge, ToolInspector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Video,
    Audio,
    Text,
    Other,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct TrackInfo {
    pub codec: Option<String>,
    pub language: Option<String>,
    pub title: Option<String>,
    pub channels: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub hdr_format: Option<String>,
    pub color_transfer: Option<String>,
    pub stereo_mode: Option<u32>,
    pub default: Option<bool>,
    pub forced: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub kind: TrackKind,
    pub info: TrackInfo,
}

impl Track {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            info: TrackInfo::default(),
        }
    }
}

/// Technical metadata for one media file.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct MediaInfo {
    pub duration: Option<f64>,
    pub tracks: Vec<Track>,
}

impl MediaInfo {
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &Track> {
        self.tracks.iter().filter(move |track| track.kind == kind)
    }

    pub fn first_video(&self) -> Option<&TrackInfo> {
        self.tracks_of(TrackKind::Video).next().map(|track| &track.info)
    }
}

#[derive(Debug)]
pub enum MetadataError {
    Io(std::io::Error),
    Json(serde_json::Error),
    ToolFailed { tool: String, status: Option<i32> },
    NoTracks,
}

impl std::fmt::Display for MetadataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetadataError::Io(err) => write!(f, "io error: {}", err),
            MetadataError::Json(err) => write!(f, "json error: {}", err),
            MetadataError::ToolFailed { tool, status } => match status {
                Some(code) => write!(f, "{} exited with status {}", tool, code),
                None => write!(f, "{} was terminated", tool),
            },
            MetadataError::NoTracks => write!(f, "no track information available"),
        }
    }
}

impl std::error::Error for MetadataError {}

impl From<std::io::Error> for MetadataError {
    fn from(err: std::io::Error) -> Self {
        MetadataError::Io(err)
    }
}

impl From<serde_json::Error> for MetadataError {
    fn from(err: serde_json::Error) -> Self {
        MetadataError::Json(err)
    }
}

#[async_trait]
pub trait MediaInspector: Send + Sync {
    async fn inspect(&self, path: &Path) -> Result<MediaInfo, MetadataError>;
}

/// Aligns the nth track of each kind in `secondary` with the nth track of the
/// same kind in `primary`. Fields already present in the primary win; gaps are
/// filled from the secondary. Unmatched secondary tracks are appended.
pub fn merge_tracks(primary: MediaInfo, secondary: MediaInfo) -> MediaInfo {
    let mut merged = primary;
    if merged.duration.is_none() {
        merged.duration = secondary.duration;
    }

    let mut seen: Vec<(TrackKind, usize)> = Vec::new();
    for track in secondary.tracks {
        let ordinal = match seen.iter_mut().find(|(kind, _)| *kind == track.kind) {
            Some((_, count)) => {
                *count += 1;
                *count - 1
            }
            None => {
                seen.push((track.kind, 1));
                0
            }
        };
        let target = merged
            .tracks
            .iter_mut()
            .filter(|existing| existing.kind == track.kind)
            .nth(ordinal);
        match target {
            Some(existing) => fill_missing(&mut existing.info, track.info),
            None => merged.tracks.push(track),
        }
    }
    merged
}

fn fill_missing(target: &mut TrackInfo, source: TrackInfo) {
    fn fill<T>(slot: &mut Option<T>, value: Option<T>) {
        if slot.is_none() {
            *slot = value;
        }
    }
    fill(&mut target.codec, source.codec);
    fill(&mut target.language, source.language);
    fill(&mut target.title, source.title);
    fill(&mut target.channels, source.channels);
    fill(&mut target.width, source.width);
    fill(&mut target.height, source.height);
    fill(&mut target.hdr_format, source.hdr_format);
    fill(&mut target.color_transfer, source.color_transfer);
    fill(&mut target.stereo_mode, source.stereo_mode);
    fill(&mut target.default, source.default);
    fill(&mut target.forced, source.forced);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(kind: TrackKind, codec: Option<&str>, language: Option<&str>) -> Track {
        let mut track = Track::new(kind);
        track.info.codec = codec.map(str::to_string);
        track.info.language = language.map(str::to_string);
        track
    }

    #[test]
    fn merge_aligns_tracks_by_kind_and_ordinal() {
        let primary = MediaInfo {
            duration: Some(100.0),
            tracks: vec![
                track(TrackKind::Video, Some("hevc"), None),
                track(TrackKind::Audio, Some("eac3"), None),
                track(TrackKind::Audio, Some("aac"), None),
            ],
        };
        let mut stereo = track(TrackKind::Video, Some("V_MPEGH/ISO/HEVC"), None);
        stereo.info.stereo_mode = Some(1);
        let secondary = MediaInfo {
            duration: Some(99.0),
            tracks: vec![
                track(TrackKind::Audio, Some("A_EAC3"), Some("eng")),
                stereo,
                track(TrackKind::Audio, Some("A_AAC"), Some("ger")),
                track(TrackKind::Text, Some("S_TEXT/UTF8"), Some("eng")),
            ],
        };

        let merged = merge_tracks(primary, secondary);
        assert_eq!(merged.duration, Some(100.0));
        assert_eq!(merged.tracks.len(), 4);
        assert_eq!(merged.tracks[0].info.codec.as_deref(), Some("hevc"));
        assert_eq!(merged.tracks[0].info.stereo_mode, Some(1));
        assert_eq!(merged.tracks[1].info.codec.as_deref(), Some("eac3"));
        assert_eq!(merged.tracks[1].info.language.as_deref(), Some("eng"));
        assert_eq!(merged.tracks[2].info.language.as_deref(), Some("ger"));
        assert_eq!(merged.tracks[3].kind, TrackKind::Text);
    }

    #[test]
    fn merge_tolerates_empty_primary() {
        let secondary = MediaInfo {
            duration: None,
            tracks: vec![track(TrackKind::Video, Some("V_MPEG4/ISO/AVC"), None)],
        };
        let merged = merge_tracks(MediaInfo::default(), secondary.clone());
        assert_eq!(merged, secondary);
    }
}
