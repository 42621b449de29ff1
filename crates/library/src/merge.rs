use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use common::{file_name, join_rel, join_relpath, parent_relpath, ItemId, ItemType, LibraryItem};
use futures_util::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{BonusMatcher, SyncConfig};
use crate::naming::{file_stem, stream_candidates, NamePatterns};
use crate::progress::ProgressTracker;
use crate::provider::MediaProvider;
use crate::scan::ScanResult;
use crate::LibraryError;

/// First id handed to a synthetic extra; later ones count down.
pub const EXTRAS_ID_BASE: i64 = -10001;

/// Walks the provider tree in step with the scanned directory tree.
pub struct TreeMerger {
    config: Arc<SyncConfig>,
    provider: Arc<dyn MediaProvider>,
    scan: Arc<ScanResult>,
    bonus: BonusMatcher,
    patterns: NamePatterns,
    cancel: CancellationToken,
    progress: Option<Arc<ProgressTracker>>,
    next_extra: AtomicI64,
    attached: Mutex<HashSet<String>>,
}

impl TreeMerger {
    pub fn new(
        config: Arc<SyncConfig>,
        provider: Arc<dyn MediaProvider>,
        scan: Arc<ScanResult>,
        cancel: CancellationToken,
        progress: Option<Arc<ProgressTracker>>,
    ) -> Result<Self, LibraryError> {
        Ok(Self {
            bonus: config.bonus_matcher()?,
            patterns: NamePatterns::new()?,
            config,
            provider,
            scan,
            cancel,
            progress,
            next_extra: AtomicI64::new(EXTRAS_ID_BASE),
            attached: Mutex::new(HashSet::new()),
        })
    }

    /// Merges every top-level node in place. Returns `false` when cancelled.
    pub async fn merge(&self, items: &mut [LibraryItem]) -> Result<bool, LibraryError> {
        for item in items.iter_mut() {
            if !self.merge_node(item).await? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn merge_node<'a>(&'a self, item: &'a mut LibraryItem) -> BoxFuture<'a, Result<bool, LibraryError>> {
        async move {
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            if let Some(progress) = &self.progress {
                progress.advance(1.0);
            }

            if item.kind.is_container() {
                if item.data.is_none() {
                    let parent = item.id;
                    let children = self.provider.children(parent).await?;
                    item.data = Some(
                        children
                            .into_iter()
                            .map(|child| child.into_item(Some(parent)))
                            .collect(),
                    );
                }
                if let Some(children) = item.data.as_mut() {
                    for child in children.iter_mut() {
                        if !self.merge_node(child).await? {
                            return Ok(false);
                        }
                    }
                }
            }

            match item.kind {
                ItemType::File => self.enrich_file(item).await,
                ItemType::TvEpisode => self.number_episode(item),
                ItemType::TvSeason => sort_by_episode(item),
                _ => {}
            }

            if matches!(item.kind, ItemType::Movie | ItemType::TvShow | ItemType::TvSeason) {
                if item.uri.is_none() {
                    item.uri = self
                        .base_dir(item)
                        .map(|dir| self.config.provider_uri(&dir));
                }
                self.attach_extras(item);
            }
            Ok(true)
        }
        .boxed()
    }

    async fn enrich_file(&self, item: &mut LibraryItem) {
        let relpath = item
            .uri
            .as_deref()
            .map(|uri| self.config.relpath_of(uri).to_string());
        if let Some(relpath) = &relpath {
            if !self.bonus.is_under_bonus(relpath) {
                self.probe_streams(item, relpath).await;
            }
        }
        let name = relpath.as_deref().map(file_name).unwrap_or(&item.name);
        let cut = self.patterns.parse_cut(name);
        item.cut = cut.label;
        item.cut_sort = Some(cut.rank);
    }

    async fn probe_streams(&self, item: &mut LibraryItem, relpath: &str) {
        let dir = parent_relpath(relpath);
        let stem = file_stem(file_name(relpath));
        let base = join_relpath(&self.config.streaming_root, dir);

        let mut found = None;
        for candidate in stream_candidates(stem) {
            if exists(&base.join(&candidate)).await {
                found = Some(candidate);
                break;
            }
        }

        let mut stems: Vec<&str> = Vec::new();
        if let Some(candidate) = &found {
            stems.push(candidate.trim_end_matches(".mpd"));
            item.stream_uri = Some(join_rel(dir, candidate));
        }
        if !stems.contains(&stem) {
            stems.push(stem);
        }
        item.mobile_uri = first_existing(&base, dir, &stems, ".mobile.mp4").await;
        item.sample_uri = first_existing(&base, dir, &stems, ".sample.mp4").await;
    }

    fn number_episode(&self, item: &mut LibraryItem) {
        let numbers = item.children().first().and_then(|first| {
            [first.title.as_deref(), Some(first.name.as_str()), first.uri.as_deref()]
                .into_iter()
                .flatten()
                .find_map(|text| self.patterns.parse_episode(text))
        });
        if let Some((season, episode)) = numbers {
            item.season = Some(season);
            item.episode = Some(episode);
        }
    }

    /// On-disk directory (video-root relative) a node's media lives in.
    fn base_dir(&self, item: &LibraryItem) -> Option<String> {
        match item.kind {
            ItemType::Extra => None,
            ItemType::File => item
                .uri
                .as_deref()
                .map(|uri| parent_relpath(self.config.relpath_of(uri)).to_string()),
            ItemType::TvShow => {
                let season = item.children().iter().find_map(|child| self.base_dir(child))?;
                Some(self.show_dir(season))
            }
            _ => item
                .children()
                .iter()
                .filter(|child| child.kind != ItemType::Extra)
                .find_map(|child| self.base_dir(child)),
        }
    }

    fn show_dir(&self, dir: String) -> String {
        if self.patterns.is_season_dir(file_name(&dir)) {
            parent_relpath(&dir).to_string()
        } else {
            dir
        }
    }

    /// Attaches bonus-directory files below each child's base directory as
    /// extras. Each bonus directory contributes once per rebuild.
    fn attach_extras(&self, item: &mut LibraryItem) {
        if self.scan.bonus_dirs.is_empty() {
            return;
        }
        let kind = item.kind;
        let Some(children) = item.data.as_mut() else {
            return;
        };
        for child in children.iter_mut() {
            if child.kind == ItemType::Extra {
                continue;
            }
            let Some(mut base) = self.base_dir(child) else {
                continue;
            };
            if kind == ItemType::TvShow {
                base = self.show_dir(base);
            }
            for bonus in &self.scan.bonus_dirs {
                let dir = join_rel(&base, bonus);
                let files = self.scan.files_in(&dir);
                if files.is_empty() || !self.attached.lock().insert(dir.clone()) {
                    continue;
                }
                for file in files {
                    let mut extra = LibraryItem::new(self.next_extra_id(), ItemType::Extra, file.clone());
                    extra.parent_id = Some(child.id);
                    extra.title = Some(file_stem(file).to_string());
                    extra.uri = Some(self.config.provider_uri(&join_rel(&dir, file)));
                    child.push_child(extra);
                }
            }
        }
    }

    fn next_extra_id(&self) -> ItemId {
        ItemId::from(self.next_extra.fetch_sub(1, Ordering::SeqCst))
    }
}

fn sort_by_episode(item: &mut LibraryItem) {
    if let Some(children) = item.data.as_mut() {
        children.sort_by_key(|child| child.episode.unwrap_or(0));
    }
}

async fn exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

async fn first_existing(base: &Path, dir: &str, stems: &[&str], suffix: &str) -> Option<String> {
    for stem in stems {
        let name = format!("{}{}", stem, suffix);
        if exists(&base.join(&name)).await {
            return Some(join_rel(dir, &name));
        }
    }
    None
}
