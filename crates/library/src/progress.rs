use std::sync::Arc;

use common::LibraryStatus;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::events::{Notifier, LIBRARY_PROGRESS};
use crate::settings::SettingsStore;
use crate::LibraryError;

pub const PHASE_COUNT: usize = 5;
pub const HISTORY_KEY: &str = "library.progress_history";

/// Highest value an estimate may report; 100 is reserved for `Done`.
pub const MAX_ESTIMATE: f64 = 99.5;

const BROADCAST_STEP: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Scan = 0,
    Merge = 1,
    MediaInfo = 2,
    ShowInfo = 3,
    Finalize = 4,
}

impl Phase {
    fn index(self) -> usize {
        self as usize
    }
}

/// Units processed and time spent per phase in the last completed rebuild.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProgressHistory {
    pub units: [f64; PHASE_COUNT],
    pub durations_ms: [u64; PHASE_COUNT],
}

impl Default for ProgressHistory {
    fn default() -> Self {
        Self {
            units: [2000.0, 2600.0, 2000.0, 400.0, 1.0],
            durations_ms: [15_000, 240_000, 300_000, 60_000, 5_000],
        }
    }
}

impl ProgressHistory {
    /// Reads the stored history, falling back to `bootstrap` when nothing
    /// usable is stored.
    pub fn load(settings: &dyn SettingsStore, bootstrap: &ProgressHistory) -> ProgressHistory {
        match settings.get(HISTORY_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<ProgressHistory>(&raw) {
                Ok(history) if history.is_usable() => history,
                Ok(_) => bootstrap.clone(),
                Err(err) => {
                    warn!("Ignoring unreadable progress history: {}", err);
                    bootstrap.clone()
                }
            },
            Ok(None) => bootstrap.clone(),
            Err(err) => {
                warn!("Failed to read progress history: {}", err);
                bootstrap.clone()
            }
        }
    }

    pub fn save(&self, settings: &dyn SettingsStore) -> Result<(), LibraryError> {
        let raw = serde_json::to_string(self)?;
        settings.set(HISTORY_KEY, &raw)?;
        Ok(())
    }

    fn is_usable(&self) -> bool {
        self.durations_ms.iter().sum::<u64>() > 0
    }
}

/// Maps per-phase unit counts onto a global 0..99.5 estimate.
#[derive(Clone, Debug)]
pub struct ProgressModel {
    history: ProgressHistory,
    starts: [f64; PHASE_COUNT],
    ceilings: [f64; PHASE_COUNT],
    scale: f64,
    last: f64,
}

impl ProgressModel {
    pub fn new(history: ProgressHistory) -> Self {
        let total: u64 = history.durations_ms.iter().sum();
        let mut starts = [0.0; PHASE_COUNT];
        let mut ceilings = [0.0; PHASE_COUNT];
        let mut cumulative = 0u64;
        for idx in 0..PHASE_COUNT {
            starts[idx] = share(cumulative, total);
            cumulative += history.durations_ms[idx];
            ceilings[idx] = share(cumulative, total);
        }
        Self {
            history,
            starts,
            ceilings,
            scale: 1.0,
            last: 0.0,
        }
    }

    /// Scales the expected unit counts of later phases by the ratio of the
    /// current file count to the historical one.
    pub fn set_file_count(&mut self, files: usize) {
        let historical = self.history.units[Phase::Scan.index()];
        self.scale = if historical > 0.0 {
            files as f64 / historical
        } else {
            1.0
        };
    }

    pub fn estimate(&mut self, phase: Phase, done: f64) -> f64 {
        let idx = phase.index();
        let mut expected = self.history.units[idx];
        if phase != Phase::Scan {
            expected *= self.scale;
        }
        let fraction = if expected > 0.0 {
            (done / expected).clamp(0.0, 1.0)
        } else {
            1.0
        };
        let value = self.starts[idx] + (self.ceilings[idx] - self.starts[idx]) * fraction;
        let value = value.min(self.ceilings[idx]).min(MAX_ESTIMATE);
        if value > self.last {
            self.last = value;
        }
        self.last
    }

    pub fn ceiling(&self, phase: Phase) -> f64 {
        self.ceilings[phase.index()]
    }
}

fn share(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        MAX_ESTIMATE * part as f64 / total as f64
    }
}

/// Externally visible state of an in-flight (or failed) rebuild.
#[derive(Clone, Debug)]
pub struct BuildStatus {
    pub status: LibraryStatus,
    pub progress: f64,
    pub error: Option<String>,
    pub cancel: CancellationToken,
}

pub type SharedBuild = Arc<RwLock<Option<BuildStatus>>>;

struct TrackerState {
    model: ProgressModel,
    phase: Option<Phase>,
    done: f64,
    phase_started: Instant,
    observed: ProgressHistory,
    last_sent: f64,
    last_sent_phase: Option<Phase>,
}

/// Feeds phase counters through the model into the shared build status and
/// the notifier.
pub struct ProgressTracker {
    shared: SharedBuild,
    notifier: Notifier,
    state: Mutex<TrackerState>,
}

impl ProgressTracker {
    pub fn new(history: ProgressHistory, shared: SharedBuild, notifier: Notifier) -> Self {
        Self {
            shared,
            notifier,
            state: Mutex::new(TrackerState {
                model: ProgressModel::new(history),
                phase: None,
                done: 0.0,
                phase_started: Instant::now(),
                observed: ProgressHistory {
                    units: [0.0; PHASE_COUNT],
                    durations_ms: [0; PHASE_COUNT],
                },
                last_sent: -1.0,
                last_sent_phase: None,
            }),
        }
    }

    pub fn begin(&self, phase: Phase) {
        let mut state = self.state.lock();
        close_phase(&mut state);
        state.phase = Some(phase);
        state.done = 0.0;
        state.phase_started = Instant::now();
        let value = state.model.estimate(phase, 0.0);
        self.publish(&mut state, value);
    }

    pub fn advance(&self, units: f64) {
        let mut state = self.state.lock();
        let Some(phase) = state.phase else {
            return;
        };
        state.done += units;
        let done = state.done;
        let value = state.model.estimate(phase, done);
        self.publish(&mut state, value);
    }

    pub fn set_file_count(&self, files: usize) {
        self.state.lock().model.set_file_count(files);
    }

    pub fn set_status(&self, status: LibraryStatus) {
        if let Some(build) = self.shared.write().as_mut() {
            build.status = status;
        }
        let value = self.value();
        self.notifier.send(
            LIBRARY_PROGRESS,
            serde_json::json!({ "status": status, "progress": value }),
        );
    }

    pub fn value(&self) -> f64 {
        self.state.lock().model.last
    }

    /// Closes the running phase and returns what this rebuild observed.
    pub fn finish(&self) -> ProgressHistory {
        let mut state = self.state.lock();
        close_phase(&mut state);
        state.phase = None;
        state.observed.clone()
    }

    fn publish(&self, state: &mut TrackerState, value: f64) {
        let status = {
            let mut shared = self.shared.write();
            match shared.as_mut() {
                Some(build) => {
                    if value > build.progress {
                        build.progress = value;
                    }
                    build.status
                }
                None => return,
            }
        };
        let phase_changed = state.phase != state.last_sent_phase;
        if phase_changed || value - state.last_sent >= BROADCAST_STEP {
            state.last_sent = value;
            state.last_sent_phase = state.phase;
            self.notifier.send(
                LIBRARY_PROGRESS,
                serde_json::json!({ "status": status, "progress": value }),
            );
        }
    }
}

fn close_phase(state: &mut TrackerState) {
    if let Some(phase) = state.phase {
        let idx = phase.index();
        state.observed.units[idx] = state.done;
        state.observed.durations_ms[idx] = state.phase_started.elapsed().as_millis() as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemorySettings;

    fn shared() -> SharedBuild {
        Arc::new(RwLock::new(Some(BuildStatus {
            status: LibraryStatus::NotStarted,
            progress: 0.0,
            error: None,
            cancel: CancellationToken::new(),
        })))
    }

    #[test]
    fn ceilings_follow_cumulative_duration_share() {
        let model = ProgressModel::new(ProgressHistory {
            units: [10.0, 10.0, 10.0, 10.0, 1.0],
            durations_ms: [100, 100, 100, 100, 0],
        });
        assert!((model.ceiling(Phase::Scan) - 24.875).abs() < 1e-9);
        assert!((model.ceiling(Phase::ShowInfo) - MAX_ESTIMATE).abs() < 1e-9);
        assert!((model.ceiling(Phase::Finalize) - MAX_ESTIMATE).abs() < 1e-9);
    }

    #[test]
    fn estimate_is_monotonic_and_capped() {
        let mut model = ProgressModel::new(ProgressHistory::default());
        let mut last = 0.0;
        for done in 0..3000 {
            let value = model.estimate(Phase::Scan, done as f64);
            assert!(value >= last);
            assert!(value <= model.ceiling(Phase::Scan));
            last = value;
        }
        // Going back to fewer units never lowers the value.
        assert_eq!(model.estimate(Phase::Scan, 5.0), last);
        let end = model.estimate(Phase::Finalize, 1000.0);
        assert!(end <= MAX_ESTIMATE);
        assert!(end >= last);
    }

    #[test]
    fn later_phases_scale_with_file_count() {
        let history = ProgressHistory {
            units: [100.0, 100.0, 100.0, 100.0, 1.0],
            durations_ms: [0, 1000, 0, 0, 0],
        };
        let mut small = ProgressModel::new(history.clone());
        small.set_file_count(50);
        let mut same = ProgressModel::new(history);
        same.set_file_count(100);
        let half_of_small = small.estimate(Phase::Merge, 25.0);
        let quarter_of_same = same.estimate(Phase::Merge, 25.0);
        assert!((half_of_small - MAX_ESTIMATE / 2.0).abs() < 1e-9);
        assert!((quarter_of_same - MAX_ESTIMATE / 4.0).abs() < 1e-9);
    }

    #[test]
    fn history_round_trips_through_settings() {
        let settings = MemorySettings::default();
        let bootstrap = ProgressHistory::default();
        assert_eq!(ProgressHistory::load(&settings, &bootstrap), bootstrap);

        let observed = ProgressHistory {
            units: [12.0, 30.0, 12.0, 3.0, 1.0],
            durations_ms: [5, 50, 500, 20, 2],
        };
        observed.save(&settings).unwrap();
        assert_eq!(ProgressHistory::load(&settings, &bootstrap), observed);

        settings.set(HISTORY_KEY, "not json").unwrap();
        assert_eq!(ProgressHistory::load(&settings, &bootstrap), bootstrap);
    }

    #[tokio::test]
    async fn tracker_writes_shared_status_and_throttles_broadcasts() {
        let build = shared();
        let notifier = Notifier::new(256);
        let mut rx = notifier.subscribe();
        let tracker = ProgressTracker::new(
            ProgressHistory {
                units: [1000.0, 1.0, 1.0, 1.0, 1.0],
                durations_ms: [1000, 0, 0, 0, 0],
            },
            build.clone(),
            notifier,
        );
        tracker.begin(Phase::Scan);
        for _ in 0..1000 {
            tracker.advance(1.0);
        }
        let progress = build.read().as_ref().unwrap().progress;
        assert!((progress - MAX_ESTIMATE).abs() < 1e-9);

        let mut messages = 0;
        while rx.try_recv().is_ok() {
            messages += 1;
        }
        assert!(messages > 1);
        assert!(messages < 250);

        let observed = tracker.finish();
        assert_eq!(observed.units[0], 1000.0);
    }
}
