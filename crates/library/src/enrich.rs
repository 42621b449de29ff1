use std::collections::BTreeSet;

use common::{file_name, join_relpath, HdrKind, ItemType, LibraryItem};
use metadata::{MediaInfo, MediaInspector, TrackKind};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use unicode_normalization::{is_nfc, UnicodeNormalization};

use crate::config::{ResolutionThresholds, SyncConfig};
use crate::index::{item_at, item_at_mut};
use crate::naming::{compare_titles, NamePatterns};
use crate::progress::ProgressTracker;
use crate::provider::MediaProvider;
use crate::LibraryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionBucket {
    Uhd,
    Fhd,
    Hd,
    Sd,
}

pub fn resolution_bucket(width: u32, height: u32, thresholds: &ResolutionThresholds) -> ResolutionBucket {
    if width >= thresholds.uhd_width || height >= thresholds.uhd_height {
        ResolutionBucket::Uhd
    } else if width >= thresholds.fhd_width || height >= thresholds.fhd_height {
        ResolutionBucket::Fhd
    } else if width >= thresholds.hd_width || height >= thresholds.hd_height {
        ResolutionBucket::Hd
    } else {
        ResolutionBucket::Sd
    }
}

pub fn hdr_kind(format: &str) -> Option<HdrKind> {
    let lower = format.trim().to_lowercase();
    if lower.is_empty() {
        None
    } else if lower.contains("dolby vision") || lower == "dv" || lower.contains("dovi") {
        Some(HdrKind::DolbyVision)
    } else if lower.contains("hdr10+") || lower.contains("2094") {
        Some(HdrKind::Hdr10Plus)
    } else if lower.contains("hdr10") || lower.contains("2084") {
        Some(HdrKind::Hdr10)
    } else if lower.contains("hlg") || lower.contains("b67") {
        Some(HdrKind::Hlg)
    } else {
        Some(HdrKind::Hdr)
    }
}

/// Copies technical track data onto a file node.
pub fn apply_media_info(
    item: &mut LibraryItem,
    info: &MediaInfo,
    thresholds: &ResolutionThresholds,
    patterns: &NamePatterns,
) {
    if let Some(video) = info.first_video() {
        if let (Some(width), Some(height)) = (video.width, video.height) {
            if width > 0 && height > 0 {
                item.resolution = Some(format!("{}x{}", width, height));
                item.aspect_ratio = Some((width as f64 / height as f64 * 100.0).round() / 100.0);
                match resolution_bucket(width, height, thresholds) {
                    ResolutionBucket::Uhd => item.is_4k = Some(true),
                    ResolutionBucket::Fhd => item.is_2k = Some(true),
                    ResolutionBucket::Hd => item.is_hd = Some(true),
                    ResolutionBucket::Sd => item.is_sd = Some(true),
                }
            }
        }
        item.hdr = video.hdr_format.as_deref().and_then(hdr_kind);
        if video.stereo_mode.map(|mode| mode != 0).unwrap_or(false) {
            item.is_3d = Some(true);
        }
        item.video_codec = video.codec.clone();
    }

    let file = item.uri.as_deref().map(file_name).unwrap_or(&item.name);
    if patterns.has_3d_token(file) {
        item.is_3d = Some(true);
    }

    item.audio_channels = info
        .tracks_of(TrackKind::Audio)
        .filter_map(|track| track.info.channels)
        .max();
    item.audio_languages = languages(info, TrackKind::Audio);
    item.subtitle_languages = languages(info, TrackKind::Text);
    if item.duration.is_none() {
        item.duration = info.duration;
    }
}

fn languages(info: &MediaInfo, kind: TrackKind) -> Option<Vec<String>> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for track in info.tracks_of(kind) {
        if let Some(language) = &track.info.language {
            if seen.insert(language.clone()) {
                out.push(language.clone());
            }
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn collect_paths(
    items: &[LibraryItem],
    wanted: &dyn Fn(&LibraryItem) -> bool,
    path: &mut Vec<usize>,
    out: &mut Vec<Vec<usize>>,
) {
    for (idx, item) in items.iter().enumerate() {
        path.push(idx);
        if wanted(item) {
            out.push(path.clone());
        }
        collect_paths(item.children(), wanted, path, out);
        path.pop();
    }
}

fn paths_where(items: &[LibraryItem], wanted: &dyn Fn(&LibraryItem) -> bool) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    collect_paths(items, wanted, &mut Vec::new(), &mut out);
    out
}

/// Inspects every file node. A failing file is annotated and skipped.
/// Returns `false` when cancelled.
pub async fn fetch_media_info(
    items: &mut [LibraryItem],
    inspector: &dyn MediaInspector,
    config: &SyncConfig,
    patterns: &NamePatterns,
    cancel: &CancellationToken,
    progress: Option<&ProgressTracker>,
) -> bool {
    let targets = paths_where(items, &|item| item.kind == ItemType::File && item.uri.is_some());
    for path in targets {
        if cancel.is_cancelled() {
            return false;
        }
        let Some(uri) = item_at(items, &path).and_then(|item| item.uri.clone()) else {
            continue;
        };
        let file = join_relpath(&config.video_root, config.relpath_of(&uri));
        let result = inspector.inspect(&file).await;
        if let Some(item) = item_at_mut(items, &path) {
            match result {
                Ok(info) => apply_media_info(item, &info, &config.resolution, patterns),
                Err(err) => {
                    warn!("No media info for {:?}: {}", file, err);
                    item.error = Some(err.to_string());
                }
            }
        }
        if let Some(progress) = progress {
            progress.advance(1.0);
        }
    }
    true
}

fn wants_details(item: &LibraryItem) -> bool {
    matches!(
        item.kind,
        ItemType::Movie | ItemType::TvShow | ItemType::Collection | ItemType::TvCollection
    ) && !item.id.is_synthetic()
}

/// Fetches node-level details for movies, shows and provider collections.
/// Provider failures abort the phase. Returns `Ok(false)` when cancelled.
pub async fn fetch_show_info(
    items: &mut [LibraryItem],
    provider: &dyn MediaProvider,
    cancel: &CancellationToken,
    progress: Option<&ProgressTracker>,
) -> Result<bool, LibraryError> {
    for path in paths_where(items, &wants_details) {
        if cancel.is_cancelled() {
            return Ok(false);
        }
        let Some(id) = item_at(items, &path).map(|item| item.id) else {
            continue;
        };
        let details = provider.details(id).await?;
        match (details, item_at_mut(items, &path)) {
            (Some(details), Some(item)) => details.apply_to(item),
            (None, _) => debug!("No details for item {}", id),
            _ => {}
        }
        if let Some(progress) = progress {
            progress.advance(1.0);
        }
    }
    Ok(true)
}

/// NFC-normalizes path-like fields and recomputes container aggregates
/// bottom-up.
pub fn finalize_tree(items: &mut [LibraryItem]) {
    for item in items.iter_mut() {
        normalize_paths(item);
        if let Some(children) = item.data.as_mut() {
            finalize_tree(children);
        }
        aggregate(item);
    }
}

fn normalize_paths(item: &mut LibraryItem) {
    for field in [
        &mut item.uri,
        &mut item.stream_uri,
        &mut item.mobile_uri,
        &mut item.sample_uri,
        &mut item.logo,
        &mut item.poster_path,
        &mut item.backdrop_path,
        &mut item.alias_poster_path,
    ] {
        if let Some(value) = field.as_mut() {
            if !is_nfc(value) {
                *value = value.nfc().collect();
            }
        }
    }
}

fn aggregate(item: &mut LibraryItem) {
    if item.kind == ItemType::File || item.kind == ItemType::Extra {
        return;
    }
    let children: Vec<&LibraryItem> = item
        .children()
        .iter()
        .filter(|child| child.kind != ItemType::Extra)
        .collect();
    if children.is_empty() {
        return;
    }

    let flag = |get: fn(&LibraryItem) -> Option<bool>| children.iter().any(|child| get(child) == Some(true));
    let is_3d = flag(|c| c.is_3d);
    let is_hd = flag(|c| c.is_hd);
    let is_2k = flag(|c| c.is_2k);
    let is_4k = flag(|c| c.is_4k);
    let all_sd = children.iter().all(|child| child.is_sd == Some(true));
    let hdr = children.iter().filter_map(|child| child.hdr).max();
    let all_watched = children.iter().all(|child| child.watched == Some(true));
    let any_unwatched = children.iter().any(|child| child.watched == Some(false));
    let year = children
        .iter()
        .filter_map(|child| child.year)
        .filter(|year| *year != 0)
        .min();

    if matches!(
        item.kind,
        ItemType::Collection | ItemType::TvCollection | ItemType::TvShow
    ) {
        if let Some(year) = year {
            item.year = Some(year);
        }
    }
    item.is_3d = is_3d.then_some(true);
    item.is_hd = is_hd.then_some(true);
    item.is_2k = is_2k.then_some(true);
    item.is_4k = is_4k.then_some(true);
    item.is_sd = (all_sd && !is_hd && !is_2k && !is_4k).then_some(true);
    item.hdr = hdr;
    if all_watched {
        item.watched = Some(true);
    } else if any_unwatched {
        item.watched = Some(false);
    }
}

/// Stable sort of the top level and every container by title, then by cut
/// rank. Season children keep their episode order.
pub fn sort_tree(items: &mut [LibraryItem]) {
    items.sort_by(|a, b| {
        compare_titles(a.display_title(), b.display_title())
            .then_with(|| a.cut_sort.unwrap_or(0).cmp(&b.cut_sort.unwrap_or(0)))
    });
    for item in items.iter_mut() {
        if item.kind == ItemType::TvSeason {
            continue;
        }
        if let Some(children) = item.data.as_mut() {
            sort_tree(children);
        }
    }
}
