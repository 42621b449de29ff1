use std::sync::Arc;
use std::time::Duration;

use common::{ItemId, LibraryItem, VideoLibrary};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::index::for_each_occurrence;
use crate::provider::WatchState;
use crate::store::LibraryStorage;
use crate::LibraryError;

/// The mutable per-item fields an incremental patch carries. `None` leaves
/// the stored value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WatchFields {
    pub watched: Option<bool>,
    pub watched_by_user: Option<bool>,
    pub position: Option<f64>,
    pub last_play_time: Option<u64>,
}

impl WatchFields {
    pub fn of(item: &LibraryItem) -> Self {
        Self {
            watched: item.watched,
            watched_by_user: item.watched_by_user,
            position: item.position,
            last_play_time: item.last_play_time,
        }
    }

    pub fn differs(&self, item: &LibraryItem) -> bool {
        (self.watched.is_some() && self.watched != item.watched)
            || (self.watched_by_user.is_some() && self.watched_by_user != item.watched_by_user)
            || (self.position.is_some() && self.position != item.position)
            || (self.last_play_time.is_some() && self.last_play_time != item.last_play_time)
    }

    pub fn apply(&self, item: &mut LibraryItem) {
        if let Some(watched) = self.watched {
            item.watched = Some(watched);
        }
        if let Some(by_user) = self.watched_by_user {
            item.watched_by_user = Some(by_user);
        }
        if let Some(position) = self.position {
            item.position = Some(position);
        }
        if let Some(last_play_time) = self.last_play_time {
            item.last_play_time = Some(last_play_time);
        }
    }
}

impl From<&WatchState> for WatchFields {
    fn from(state: &WatchState) -> Self {
        Self {
            watched: Some(state.watched),
            watched_by_user: state.watched_by_user,
            position: state.position,
            last_play_time: state.last_play_time,
        }
    }
}

#[derive(Default)]
struct PatchState {
    buffer: Option<VideoLibrary>,
    generation: u64,
    flush_pending: bool,
}

/// Debounced write-back of per-item field changes into the persisted
/// library, without a rebuild. At most one flush is scheduled at a time.
pub struct PatchWriter {
    storage: Arc<dyn LibraryStorage>,
    delay: Duration,
    state: Arc<Mutex<PatchState>>,
}

impl PatchWriter {
    pub fn new(storage: Arc<dyn LibraryStorage>, delay: Duration) -> Self {
        Self {
            storage,
            delay,
            state: Arc::new(Mutex::new(PatchState::default())),
        }
    }

    /// Copies `fields` onto every occurrence of `id` in the buffered
    /// persisted library and schedules a flush. Returns the number of
    /// occurrences patched.
    pub async fn enqueue(&self, id: ItemId, fields: WatchFields) -> Result<usize, LibraryError> {
        let mut state = self.state.lock().await;
        if state.buffer.is_none() {
            match self.storage.load().await? {
                Some(library) => state.buffer = Some(library),
                None => {
                    debug!("No persisted library to patch for item {}", id);
                    return Ok(0);
                }
            }
        }
        let count = match state.buffer.as_mut() {
            Some(buffer) => for_each_occurrence(&mut buffer.array, id, &mut |item| fields.apply(item)),
            None => 0,
        };
        if count > 0 && !state.flush_pending {
            state.flush_pending = true;
            let generation = state.generation;
            tokio::spawn(flush_later(
                self.state.clone(),
                self.storage.clone(),
                self.delay,
                generation,
            ));
        }
        Ok(count)
    }

    /// Persists a freshly built library in place of the stored one. The
    /// patch lock is held from before `swap` until the save completes, so a
    /// patch arriving meanwhile waits and then loads the new document. Any
    /// buffered patch of the old document is dropped.
    pub async fn replace(
        &self,
        library: &VideoLibrary,
        swap: impl FnOnce(),
    ) -> Result<(), LibraryError> {
        let mut state = self.state.lock().await;
        state.buffer = None;
        state.generation += 1;
        state.flush_pending = false;
        swap();
        self.storage.save(library).await
    }

    /// Writes a pending buffer immediately.
    pub async fn flush_now(&self) -> Result<(), LibraryError> {
        let mut state = self.state.lock().await;
        if !state.flush_pending {
            return Ok(());
        }
        state.generation += 1;
        state.flush_pending = false;
        if let Some(buffer) = state.buffer.take() {
            self.storage.save(&buffer).await?;
        }
        Ok(())
    }
}

async fn flush_later(
    state: Arc<Mutex<PatchState>>,
    storage: Arc<dyn LibraryStorage>,
    delay: Duration,
    generation: u64,
) {
    tokio::time::sleep(delay).await;
    let mut state = state.lock().await;
    if state.generation != generation {
        return;
    }
    state.flush_pending = false;
    let Some(buffer) = state.buffer.take() else {
        return;
    };
    // The lock stays held so a concurrent enqueue cannot load a stale copy.
    if let Err(err) = storage.save(&buffer).await {
        warn!("Failed to write library patch: {}", err);
        state.buffer = Some(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStorage;
    use common::{ItemType, LibraryStatus};

    fn library() -> VideoLibrary {
        let mut movie = LibraryItem::new(ItemId::from(41), ItemType::Movie, "Heat");
        let mut file = LibraryItem::new(ItemId::from(42), ItemType::File, "Heat.mkv");
        file.watched = Some(false);
        movie.push_child(file.clone());
        let mut alias = movie.clone();
        alias.is_alias = Some(true);
        alias.name = "Heat (Alt)".to_string();
        let mut other = LibraryItem::new(ItemId::from(50), ItemType::File, "Other.mkv");
        other.watched = Some(false);
        VideoLibrary {
            status: LibraryStatus::Done,
            progress: 100.0,
            last_update: 1,
            array: vec![movie, alias, other],
            main_file_count: 2,
            bonus_file_count: 0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_patches_coalesce_into_one_write() {
        let storage = Arc::new(MemoryStorage::with_library(library()));
        let writer = PatchWriter::new(storage.clone(), Duration::from_secs(2));

        for position in 1..=5 {
            let count = writer
                .enqueue(
                    ItemId::from(42),
                    WatchFields {
                        watched: Some(true),
                        position: Some(position as f64),
                        ..WatchFields::default()
                    },
                )
                .await
                .unwrap();
            assert_eq!(count, 2);
        }
        assert_eq!(storage.save_count(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        assert_eq!(storage.save_count(), 1);

        let stored = storage.stored().unwrap();
        let mut expected = library();
        for item in expected.array.iter_mut().take(2) {
            let file = &mut item.data.as_mut().unwrap()[0];
            file.watched = Some(true);
            file.position = Some(5.0);
        }
        assert_eq!(stored, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn replace_drops_buffered_patches_of_the_old_document() {
        let storage = Arc::new(MemoryStorage::with_library(library()));
        let writer = PatchWriter::new(storage.clone(), Duration::from_secs(2));
        let fields = WatchFields {
            watched: Some(true),
            ..WatchFields::default()
        };
        writer.enqueue(ItemId::from(50), fields).await.unwrap();

        let mut rebuilt = library();
        rebuilt.last_update = 2;
        let mut swapped = false;
        writer.replace(&rebuilt, || swapped = true).await.unwrap();
        assert!(swapped);
        assert_eq!(storage.save_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(storage.save_count(), 1);
        assert_eq!(storage.stored().unwrap(), rebuilt);

        assert_eq!(writer.enqueue(ItemId::from(50), fields).await.unwrap(), 1);
        tokio::time::sleep(Duration::from_secs(3)).await;
        tokio::task::yield_now().await;
        let stored = storage.stored().unwrap();
        assert_eq!(stored.last_update, 2);
        assert_eq!(stored.array[2].watched, Some(true));
    }

    #[tokio::test]
    async fn unknown_ids_and_missing_library_do_not_write() {
        let storage = Arc::new(MemoryStorage::default());
        let writer = PatchWriter::new(storage.clone(), Duration::from_millis(1));
        let fields = WatchFields {
            watched: Some(true),
            ..WatchFields::default()
        };
        assert_eq!(writer.enqueue(ItemId::from(42), fields).await.unwrap(), 0);

        let storage = Arc::new(MemoryStorage::with_library(library()));
        let writer = PatchWriter::new(storage.clone(), Duration::from_millis(1));
        assert_eq!(writer.enqueue(ItemId::from(999), fields).await.unwrap(), 0);
        writer.flush_now().await.unwrap();
        assert_eq!(storage.save_count(), 0);
    }

    #[test]
    fn fields_only_touch_provided_values() {
        let mut item = LibraryItem::new(ItemId::from(1), ItemType::File, "a.mkv");
        item.position = Some(12.0);
        let fields = WatchFields {
            watched: Some(true),
            ..WatchFields::default()
        };
        assert!(fields.differs(&item));
        fields.apply(&mut item);
        assert_eq!(item.position, Some(12.0));
        assert!(!fields.differs(&item));
        assert_eq!(WatchFields::of(&item).watched, Some(true));
    }
}
