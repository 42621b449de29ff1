use std::sync::Arc;
use std::time::Duration;

use common::{ItemId, ItemType};
use serde::Deserialize;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::manager::LibraryManager;
use crate::provider::{MediaProvider, ProviderItem, WatchState};
use crate::LibraryError;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Wait after playback stops before asking the provider for the result.
    #[serde(with = "millis")]
    pub settle_delay: Duration,
    #[serde(with = "millis")]
    pub sweep_interval: Duration,
    /// Pause between items during a sweep.
    #[serde(with = "millis")]
    pub sweep_item_delay: Duration,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            settle_delay: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(60 * 60),
            sweep_item_delay: Duration::from_millis(250),
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Keeps cached watch state in line with the provider: re-reads an item
/// after it stops playing, and periodically sweeps movies and seasons.
pub struct WatchReconciler {
    manager: Arc<LibraryManager>,
    provider: Arc<dyn MediaProvider>,
    config: WatchConfig,
}

impl WatchReconciler {
    pub fn new(
        manager: Arc<LibraryManager>,
        provider: Arc<dyn MediaProvider>,
        config: WatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            provider,
            config,
        })
    }

    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut poll = tokio::time::interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut playing: Option<ItemId> = None;
        let mut next_sweep = Instant::now() + self.config.sweep_interval;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = poll.tick() => {
                    playing = self.poll_playback(playing).await;
                }
                _ = tokio::time::sleep_until(next_sweep) => {
                    if self.manager.is_rebuilding() {
                        debug!("Watch sweep postponed; rebuild in progress");
                    } else {
                        self.sweep(&shutdown).await;
                    }
                    next_sweep = Instant::now() + self.config.sweep_interval;
                }
            }
        }
    }

    async fn poll_playback(self: &Arc<Self>, previous: Option<ItemId>) -> Option<ItemId> {
        let current = match self.provider.playback_status().await {
            Ok(status) => status.item.filter(|_| status.playing),
            Err(err) => {
                debug!("Playback status unavailable: {}", err);
                return previous;
            }
        };
        if let Some(stopped) = previous.filter(|id| Some(*id) != current) {
            let reconciler = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(reconciler.config.settle_delay).await;
                if let Err(err) = reconciler.reconcile(stopped).await {
                    warn!("Failed to reconcile watch state of {}: {}", stopped, err);
                }
            });
        }
        current
    }

    /// Re-reads watch state for one item. Seasons are reconciled through
    /// their episodes.
    pub async fn reconcile(&self, id: ItemId) -> Result<usize, LibraryError> {
        let kind = self.manager.find(id, false).map(|item| item.kind);
        if kind == Some(ItemType::TvSeason) {
            let episodes = self.provider.children(id).await?;
            let mut changed = 0;
            for episode in &episodes {
                changed += self.apply_tree(episode).await?;
            }
            return Ok(changed);
        }
        match self.provider.watch_state(id).await? {
            Some(state) => Ok(usize::from(self.manager.apply_watch_state(id, &state).await?)),
            None => Ok(0),
        }
    }

    async fn apply_tree(&self, root: &ProviderItem) -> Result<usize, LibraryError> {
        let mut changed = 0;
        let mut stack = vec![root];
        while let Some(item) = stack.pop() {
            if let Some(watched) = item.watched {
                let playback = item.playback.as_ref();
                let state = WatchState {
                    watched,
                    watched_by_user: item.watched_by_user,
                    position: playback.and_then(|playback| playback.position),
                    last_play_time: playback.and_then(|playback| playback.last_play_time),
                };
                if self.manager.apply_watch_state(item.id, &state).await? {
                    changed += 1;
                }
            }
            if let Some(children) = &item.items {
                stack.extend(children.iter());
            }
        }
        Ok(changed)
    }

    /// Visits every movie and season. Stops early on shutdown or when a
    /// rebuild starts.
    pub async fn sweep(&self, shutdown: &CancellationToken) -> bool {
        let targets = self.manager.sweep_targets();
        info!("Watch sweep over {} items", targets.len());
        let mut changed = 0;
        for (id, _) in targets {
            if shutdown.is_cancelled() || self.manager.is_rebuilding() {
                debug!("Watch sweep interrupted");
                return false;
            }
            match self.reconcile(id).await {
                Ok(count) => changed += count,
                Err(err) => debug!("Watch sweep skipped {}: {}", id, err),
            }
            tokio::time::sleep(self.config.sweep_item_delay).await;
        }
        info!("Watch sweep finished: {} items changed", changed);
        true
    }
}
