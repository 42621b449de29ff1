use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::{merge_tracks, MediaInfo, MediaInspector, MetadataError, Track, TrackKind};

/// Inspects files with ffprobe and, for Matroska containers, mkvmerge.
/// Either tool may be missing; the outputs are merged by track position.
#[derive(Debug, Clone)]
pub struct ToolInspector {
    ffprobe_path: PathBuf,
    mkvmerge_path: PathBuf,
}

impl ToolInspector {
    pub fn new(ffprobe_path: impl Into<PathBuf>, mkvmerge_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
            mkvmerge_path: mkvmerge_path.into(),
        }
    }

    async fn run_ffprobe(&self, path: &Path) -> Result<Option<MediaInfo>, MetadataError> {
        let mut command = Command::new(&self.ffprobe_path);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);
        match run_tool("ffprobe", command).await? {
            Some(stdout) => Ok(Some(parse_ffprobe(&stdout)?)),
            None => Ok(None),
        }
    }

    async fn run_mkvmerge(&self, path: &Path) -> Result<Option<MediaInfo>, MetadataError> {
        let mut command = Command::new(&self.mkvmerge_path);
        command.arg("-J").arg(path);
        match run_tool("mkvmerge", command).await? {
            Some(stdout) => Ok(Some(parse_mkvmerge(&stdout)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl MediaInspector for ToolInspector {
    async fn inspect(&self, path: &Path) -> Result<MediaInfo, MetadataError> {
        let mut last_error = None;

        let probed = match self.run_ffprobe(path).await {
            Ok(info) => info,
            Err(err) => {
                debug!("ffprobe failed for {:?}: {}", path, err);
                last_error = Some(err);
                None
            }
        };

        let container = if is_matroska(path) {
            match self.run_mkvmerge(path).await {
                Ok(info) => info,
                Err(err) => {
                    debug!("mkvmerge failed for {:?}: {}", path, err);
                    last_error = Some(err);
                    None
                }
            }
        } else {
            None
        };

        match (probed, container) {
            (Some(primary), Some(secondary)) => Ok(merge_tracks(primary, secondary)),
            (Some(info), None) | (None, Some(info)) => Ok(info),
            (None, None) => Err(last_error.unwrap_or(MetadataError::NoTracks)),
        }
    }
}

/// Runs a tool and returns its stdout. A tool that is not installed yields
/// `None` rather than an error.
async fn run_tool(name: &str, mut command: Command) -> Result<Option<Vec<u8>>, MetadataError> {
    let output = match command.output().await {
        Ok(output) => output,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            warn!("{} not found; skipping", name);
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    if !output.status.success() {
        return Err(MetadataError::ToolFailed {
            tool: name.to_string(),
            status: output.status.code(),
        });
    }
    Ok(Some(output.stdout))
}

fn is_matroska(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "mkv" | "mk3d" | "webm"))
        .unwrap_or(false)
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    #[serde(default)]
    format: Option<ProbeFormat>,
}

#[derive(Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

#[derive(Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u32>,
    color_transfer: Option<String>,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
    #[serde(default)]
    tags: HashMap<String, String>,
    #[serde(default)]
    disposition: HashMap<String, i64>,
}

#[derive(Deserialize)]
struct ProbeSideData {
    side_data_type: Option<String>,
}

pub fn parse_ffprobe(bytes: &[u8]) -> Result<MediaInfo, MetadataError> {
    let output: ProbeOutput = serde_json::from_slice(bytes)?;
    let mut info = MediaInfo {
        duration: output
            .format
            .and_then(|format| format.duration)
            .and_then(|value| value.parse::<f64>().ok()),
        tracks: Vec::new(),
    };

    for stream in output.streams {
        let kind = match stream.codec_type.as_deref() {
            Some("video") => TrackKind::Video,
            Some("audio") => TrackKind::Audio,
            Some("subtitle") => TrackKind::Text,
            _ => TrackKind::Other,
        };
        let mut track = Track::new(kind);
        track.info.codec = stream.codec_name;
        track.info.width = stream.width;
        track.info.height = stream.height;
        track.info.channels = stream.channels;
        track.info.language = stream.tags.get("language").and_then(|lang| known_language(lang));
        track.info.title = stream.tags.get("title").cloned();
        track.info.default = stream.disposition.get("default").map(|value| *value != 0);
        track.info.forced = stream.disposition.get("forced").map(|value| *value != 0);
        if kind == TrackKind::Video {
            track.info.hdr_format =
                probe_hdr_format(stream.color_transfer.as_deref(), &stream.side_data_list);
        }
        track.info.color_transfer = stream.color_transfer;
        info.tracks.push(track);
    }
    Ok(info)
}

fn probe_hdr_format(transfer: Option<&str>, side_data: &[ProbeSideData]) -> Option<String> {
    let kinds: Vec<&str> = side_data
        .iter()
        .filter_map(|entry| entry.side_data_type.as_deref())
        .collect();
    if kinds.iter().any(|kind| kind.contains("DOVI")) {
        return Some("Dolby Vision".to_string());
    }
    if kinds.iter().any(|kind| kind.contains("HDR10+") || kind.contains("SMPTE2094-40")) {
        return Some("HDR10+".to_string());
    }
    match transfer {
        Some("smpte2084") => Some("HDR10".to_string()),
        Some("arib-std-b67") => Some("HLG".to_string()),
        _ if kinds.iter().any(|kind| kind.contains("Mastering display metadata")) => {
            Some("HDR".to_string())
        }
        _ => None,
    }
}

#[derive(Deserialize)]
struct MkvOutput {
    #[serde(default)]
    tracks: Vec<MkvTrack>,
    #[serde(default)]
    container: Option<MkvContainer>,
}

#[derive(Deserialize)]
struct MkvContainer {
    #[serde(default)]
    properties: MkvContainerProperties,
}

#[derive(Deserialize, Default)]
struct MkvContainerProperties {
    duration: Option<u64>,
}

#[derive(Deserialize)]
struct MkvTrack {
    #[serde(rename = "type")]
    kind: Option<String>,
    codec: Option<String>,
    #[serde(default)]
    properties: MkvTrackProperties,
}

#[derive(Deserialize, Default)]
struct MkvTrackProperties {
    language: Option<String>,
    track_name: Option<String>,
    default_track: Option<bool>,
    forced_track: Option<bool>,
    pixel_dimensions: Option<String>,
    audio_channels: Option<u32>,
    stereo_mode: Option<u32>,
}

pub fn parse_mkvmerge(bytes: &[u8]) -> Result<MediaInfo, MetadataError> {
    let output: MkvOutput = serde_json::from_slice(bytes)?;
    let mut info = MediaInfo {
        duration: output
            .container
            .and_then(|container| container.properties.duration)
            .map(|nanos| nanos as f64 / 1_000_000_000.0),
        tracks: Vec::new(),
    };

    for entry in output.tracks {
        let kind = match entry.kind.as_deref() {
            Some("video") => TrackKind::Video,
            Some("audio") => TrackKind::Audio,
            Some("subtitles") => TrackKind::Text,
            _ => TrackKind::Other,
        };
        let props = entry.properties;
        let mut track = Track::new(kind);
        track.info.codec = entry.codec;
        track.info.language = props.language.as_deref().and_then(known_language);
        track.info.title = props.track_name;
        track.info.default = props.default_track;
        track.info.forced = props.forced_track;
        track.info.channels = props.audio_channels;
        track.info.stereo_mode = props.stereo_mode;
        if let Some((width, height)) = props.pixel_dimensions.as_deref().and_then(parse_dimensions)
        {
            track.info.width = Some(width);
            track.info.height = Some(height);
        }
        info.tracks.push(track);
    }
    Ok(info)
}

fn parse_dimensions(value: &str) -> Option<(u32, u32)> {
    let (width, height) = value.split_once('x')?;
    Some((width.trim().parse().ok()?, height.trim().parse().ok()?))
}

fn known_language(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("und") {
        None
    } else {
        Some(trimmed.to_string())
    }
}
