use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{ItemId, ItemType, LibraryItem, LibraryStatus, VideoLibrary};
use metadata::MediaInspector;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alias::{load_mapping, resolve_aliases, strip_non_canonical};
use crate::config::SyncConfig;
use crate::enrich::{fetch_media_info, fetch_show_info, finalize_tree, sort_tree};
use crate::events::{Notifier, ITEM_UPDATED, LIBRARY_UPDATED, REBUILD_FAILED};
use crate::fs::DirectoryLister;
use crate::index::CachedLibrary;
use crate::merge::TreeMerger;
use crate::naming::NamePatterns;
use crate::patch::{PatchWriter, WatchFields};
use crate::progress::{BuildStatus, Phase, ProgressHistory, ProgressTracker, SharedBuild};
use crate::provider::{MediaProvider, WatchState};
use crate::scan::Scanner;
use crate::settings::SettingsStore;
use crate::store::LibraryStorage;
use crate::{now_millis, LibraryError};

/// How long the refresh loop waits before retrying after a rebuild that did
/// not commit.
const REFRESH_RETRY: Duration = Duration::from_secs(60 * 60);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RebuildMode {
    /// Provider fetch, scan, merge and metadata, then aliases.
    Full,
    /// Re-applies the mapping document to the cached tree.
    Quick,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub status: LibraryStatus,
    pub progress: f64,
    pub rebuilding: bool,
    pub last_update: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// External collaborators of the manager.
#[derive(Clone)]
pub struct LibraryServices {
    pub provider: Arc<dyn MediaProvider>,
    pub lister: Arc<dyn DirectoryLister>,
    pub inspector: Arc<dyn MediaInspector>,
    pub storage: Arc<dyn LibraryStorage>,
    pub settings: Arc<dyn SettingsStore>,
}

/// Owns the committed library and the single in-flight rebuild.
pub struct LibraryManager {
    config: Arc<SyncConfig>,
    services: LibraryServices,
    notifier: Notifier,
    cached: RwLock<Option<Arc<CachedLibrary>>>,
    build: SharedBuild,
    rebuilding: AtomicBool,
    patches: PatchWriter,
    committed: Notify,
    /// When the last rebuild ended without committing.
    last_failure: Mutex<Option<Instant>>,
}

impl LibraryManager {
    pub fn new(config: SyncConfig, services: LibraryServices, notifier: Notifier) -> Arc<Self> {
        let patches = PatchWriter::new(services.storage.clone(), config.patch_delay);
        Arc::new(Self {
            config: Arc::new(config),
            services,
            notifier,
            cached: RwLock::new(None),
            build: Arc::new(RwLock::new(None)),
            rebuilding: AtomicBool::new(false),
            patches,
            committed: Notify::new(),
            last_failure: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn provider(&self) -> Arc<dyn MediaProvider> {
        self.services.provider.clone()
    }

    /// The committed library. Readers keep a consistent snapshot for as long
    /// as they hold the `Arc`.
    pub fn snapshot(&self) -> Option<Arc<CachedLibrary>> {
        self.cached.read().clone()
    }

    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> StatusReport {
        let rebuilding = self.is_rebuilding();
        let last_update = self
            .snapshot()
            .map(|cached| cached.library.last_update)
            .unwrap_or(0);
        if let Some(build) = self.build.read().as_ref() {
            return StatusReport {
                status: build.status,
                progress: build.progress,
                rebuilding,
                last_update,
                error: build.error.clone(),
            };
        }
        match self.snapshot() {
            Some(cached) => StatusReport {
                status: cached.library.status,
                progress: cached.library.progress,
                rebuilding,
                last_update,
                error: None,
            },
            None => StatusReport {
                status: LibraryStatus::NotStarted,
                progress: -1.0,
                rebuilding,
                last_update,
                error: None,
            },
        }
    }

    pub fn find(&self, id: ItemId, files_only: bool) -> Option<LibraryItem> {
        self.snapshot()?.find(id, files_only).cloned()
    }

    pub fn aliases(&self, id: ItemId) -> Vec<LibraryItem> {
        match self.snapshot() {
            Some(cached) => cached.aliases(id).into_iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn parent(&self, id: ItemId) -> Option<LibraryItem> {
        self.snapshot()?.parent(id).cloned()
    }

    /// Movies and seasons the periodic watch sweep visits.
    pub fn sweep_targets(&self) -> Vec<(ItemId, ItemType)> {
        let Some(cached) = self.snapshot() else {
            return Vec::new();
        };
        cached
            .ids_of_kind(&[ItemType::Movie, ItemType::TvSeason])
            .into_iter()
            .filter_map(|id| cached.find(id, false).map(|item| (id, item.kind)))
            .collect()
    }

    /// Loads the persisted library into the cache. A missing or unreadable
    /// file leaves the cache empty.
    pub async fn load_persisted(&self) -> bool {
        match self.services.storage.load().await {
            Ok(Some(library)) => {
                info!(
                    "Loaded persisted library: {} top-level items, status {:?}",
                    library.array.len(),
                    library.status
                );
                *self.cached.write() = Some(Arc::new(CachedLibrary::new(library)));
                true
            }
            Ok(None) => {
                info!("No persisted library found");
                false
            }
            Err(err) => {
                warn!("Failed to load persisted library: {}", err);
                false
            }
        }
    }

    /// Time until the next scheduled full rebuild: when the committed
    /// library goes stale, but no sooner than `REFRESH_RETRY` after a
    /// rebuild that did not commit.
    pub fn next_refresh_delay(&self) -> Duration {
        let due = self.staleness_delay();
        match *self.last_failure.lock() {
            Some(failed_at) => due.max(REFRESH_RETRY.saturating_sub(failed_at.elapsed())),
            None => due,
        }
    }

    fn staleness_delay(&self) -> Duration {
        let Some(cached) = self.snapshot() else {
            return Duration::ZERO;
        };
        if cached.library.status != LibraryStatus::Done {
            return Duration::ZERO;
        }
        let age = Duration::from_millis(now_millis().saturating_sub(cached.library.last_update));
        self.config.freshness.saturating_sub(age)
    }

    /// Starts a background rebuild. Returns `false` when one is already
    /// running.
    pub fn start_rebuild(self: &Arc<Self>, mode: RebuildMode) -> bool {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Rebuild already in progress; {:?} request ignored", mode);
            return false;
        }
        let cancel = CancellationToken::new();
        *self.build.write() = Some(BuildStatus {
            status: LibraryStatus::NotStarted,
            progress: 0.0,
            error: None,
            cancel: cancel.clone(),
        });
        info!("Starting {:?} library rebuild", mode);
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_rebuild(mode, cancel).await;
        });
        true
    }

    pub fn cancel_rebuild(&self) -> bool {
        if !self.is_rebuilding() {
            return false;
        }
        match self.build.read().as_ref() {
            Some(build) => {
                build.cancel.cancel();
                true
            }
            None => false,
        }
    }

    async fn run_rebuild(&self, mode: RebuildMode, cancel: CancellationToken) {
        let history = ProgressHistory::load(
            self.services.settings.as_ref(),
            &self.config.progress_bootstrap,
        );
        let tracker = Arc::new(ProgressTracker::new(
            history,
            self.build.clone(),
            self.notifier.clone(),
        ));
        let result = match mode {
            RebuildMode::Full => self.build_full(&cancel, &tracker).await,
            RebuildMode::Quick => self.build_quick(&cancel, &tracker).await,
        };
        let committed = match result {
            Ok(Some(library)) if !cancel.is_cancelled() => match self.commit(library).await {
                Ok(count) => {
                    let observed = tracker.finish();
                    if mode == RebuildMode::Full {
                        if let Err(err) = observed.save(self.services.settings.as_ref()) {
                            warn!("Failed to store progress history: {}", err);
                        }
                    }
                    info!("Library rebuild committed: {} top-level items", count);
                    *self.build.write() = None;
                    true
                }
                Err(err) => {
                    self.fail(&cancel, err);
                    false
                }
            },
            Ok(_) => {
                info!("Library rebuild cancelled; cached library kept");
                *self.build.write() = None;
                false
            }
            Err(err) => {
                self.fail(&cancel, err);
                false
            }
        };
        *self.last_failure.lock() = if committed { None } else { Some(Instant::now()) };
        self.rebuilding.store(false, Ordering::SeqCst);
        self.committed.notify_waiters();
    }

    async fn build_full(
        &self,
        cancel: &CancellationToken,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<Option<VideoLibrary>, LibraryError> {
        let provider = self.services.provider.clone();
        let mut items: Vec<LibraryItem> = provider
            .aggregation()
            .await?
            .into_iter()
            .map(|item| item.into_item(None))
            .collect();
        if cancel.is_cancelled() {
            return Ok(None);
        }
        tracker.set_status(LibraryStatus::Initialized);
        self.adopt_if_empty(&items, tracker.value());

        tracker.begin(Phase::Scan);
        let listing = self.services.lister.list(&self.config.video_root).await?;
        let bonus = self.config.bonus_matcher()?;
        let Some(scan) = Scanner::new(&self.config, &bonus, cancel, Some(tracker.as_ref())).scan(&listing)
        else {
            return Ok(None);
        };
        info!(
            "Scanned {} main and {} bonus files",
            scan.main_file_count, scan.bonus_file_count
        );
        tracker.set_file_count(scan.total_files());
        tracker.set_status(LibraryStatus::BonusMaterialLinked);
        let (main_files, bonus_files) = (scan.main_file_count, scan.bonus_file_count);

        tracker.begin(Phase::Merge);
        let merger = TreeMerger::new(
            self.config.clone(),
            provider.clone(),
            Arc::new(scan),
            cancel.clone(),
            Some(tracker.clone()),
        )?;
        if !merger.merge(&mut items).await? {
            return Ok(None);
        }

        tracker.begin(Phase::MediaInfo);
        let patterns = NamePatterns::new()?;
        let inspected = fetch_media_info(
            &mut items,
            self.services.inspector.as_ref(),
            &self.config,
            &patterns,
            cancel,
            Some(tracker.as_ref()),
        )
        .await;
        if !inspected {
            return Ok(None);
        }
        tracker.set_status(LibraryStatus::AllVideos);

        tracker.begin(Phase::ShowInfo);
        if !fetch_show_info(&mut items, provider.as_ref(), cancel, Some(tracker.as_ref())).await? {
            return Ok(None);
        }
        tracker.set_status(LibraryStatus::MediaDetails);

        tracker.begin(Phase::Finalize);
        let library = self.finalize(items, main_files, bonus_files, cancel).await?;
        tracker.advance(1.0);
        Ok(library)
    }

    async fn build_quick(
        &self,
        cancel: &CancellationToken,
        tracker: &Arc<ProgressTracker>,
    ) -> Result<Option<VideoLibrary>, LibraryError> {
        let Some(cached) = self.snapshot() else {
            info!("No cached library; running a full rebuild instead");
            return self.build_full(cancel, tracker).await;
        };
        tracker.set_status(LibraryStatus::MediaDetails);
        tracker.begin(Phase::Finalize);
        let mut items = cached.library.array.clone();
        strip_non_canonical(&mut items);
        let library = self
            .finalize(
                items,
                cached.library.main_file_count,
                cached.library.bonus_file_count,
                cancel,
            )
            .await?;
        tracker.advance(1.0);
        Ok(library)
    }

    async fn finalize(
        &self,
        mut items: Vec<LibraryItem>,
        main_file_count: usize,
        bonus_file_count: usize,
        cancel: &CancellationToken,
    ) -> Result<Option<VideoLibrary>, LibraryError> {
        let mapping = load_mapping(&self.config.mapping_path).await?;
        if cancel.is_cancelled() {
            return Ok(None);
        }
        let report = resolve_aliases(&mut items, &mapping, &self.config);
        for target in &report.unresolved {
            warn!("Mapping target not found: {}", target);
        }
        debug!(
            "Applied {} changes, {} aliases, {} collections",
            report.changes, report.aliases, report.collections
        );
        finalize_tree(&mut items);
        sort_tree(&mut items);
        Ok(Some(VideoLibrary {
            status: LibraryStatus::Done,
            progress: 100.0,
            last_update: now_millis(),
            array: items,
            main_file_count,
            bonus_file_count,
        }))
    }

    /// On a first run the raw provider listing is served until the rebuild
    /// commits.
    fn adopt_if_empty(&self, items: &[LibraryItem], progress: f64) {
        let mut cached = self.cached.write();
        if cached.is_some() {
            return;
        }
        info!("No cached library; serving the provider listing until the rebuild completes");
        *cached = Some(Arc::new(CachedLibrary::new(VideoLibrary {
            status: LibraryStatus::Initialized,
            progress,
            last_update: 0,
            array: items.to_vec(),
            main_file_count: 0,
            bonus_file_count: 0,
        })));
    }

    async fn commit(&self, library: VideoLibrary) -> Result<usize, LibraryError> {
        let count = library.array.len();
        let last_update = library.last_update;
        let cached = Arc::new(CachedLibrary::new(library));
        self.patches
            .replace(&cached.library, || *self.cached.write() = Some(cached.clone()))
            .await?;
        self.notifier.send(
            LIBRARY_UPDATED,
            json!({ "lastUpdate": last_update, "count": count }),
        );
        Ok(count)
    }

    fn fail(&self, cancel: &CancellationToken, err: LibraryError) {
        cancel.cancel();
        warn!("Library rebuild failed: {}", err);
        let message = err.to_string();
        if let Some(build) = self.build.write().as_mut() {
            build.error = Some(message.clone());
        }
        self.notifier.send(REBUILD_FAILED, json!({ "error": message }));
    }

    /// Starts a full rebuild whenever the committed library goes stale; a
    /// rebuild that fails is retried after `REFRESH_RETRY`.
    pub async fn run_refresh_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            let delay = self.next_refresh_delay();
            debug!("Next library refresh in {:?}", delay);
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.committed.notified() => continue,
                _ = tokio::time::sleep(delay) => {}
            }
            if !self.start_rebuild(RebuildMode::Full) {
                debug!("Scheduled refresh skipped; rebuild already running");
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.committed.notified() => {}
                _ = tokio::time::sleep(REFRESH_RETRY) => {}
            }
        }
        if let Err(err) = self.patches.flush_now().await {
            warn!("Failed to flush pending library patch: {}", err);
        }
    }

    /// Copies provider watch state onto the cached node and its aliases,
    /// then notifies and patches the persisted library. Returns whether
    /// anything changed.
    pub async fn apply_watch_state(&self, id: ItemId, state: &WatchState) -> Result<bool, LibraryError> {
        let fields = WatchFields::from(state);
        let changed = {
            let mut guard = self.cached.write();
            let Some(cached) = guard.as_mut() else {
                return Ok(false);
            };
            let differs = cached
                .index
                .locations(id)
                .iter()
                .filter_map(|location| crate::index::item_at(&cached.library.array, &location.path))
                .any(|item| fields.differs(item));
            if differs {
                Arc::make_mut(cached).update_all(id, |item| fields.apply(item));
            }
            differs
        };
        if !changed {
            return Ok(false);
        }
        self.notifier.send(
            ITEM_UPDATED,
            json!({
                "id": id,
                "watched": fields.watched,
                "watchedByUser": fields.watched_by_user,
                "position": fields.position,
                "lastPlayTime": fields.last_play_time,
            }),
        );
        self.patches.enqueue(id, fields).await?;
        Ok(true)
    }

    /// Marks an item on the provider and mirrors the change locally.
    pub async fn set_watched(&self, id: ItemId, watched: bool) -> Result<bool, LibraryError> {
        self.services.provider.mark_watched(id, watched).await?;
        let state = WatchState {
            watched,
            watched_by_user: Some(watched),
            position: None,
            last_play_time: None,
        };
        self.apply_watch_state(id, &state).await
    }
}
