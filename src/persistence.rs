use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use tokio::{sync::watch, task::JoinHandle};

use crate::settings::Settings;
use crate::timer::{TimerMode, TimerState};

// Snapshots are written every second; keep routine output quiet.
const ENABLE_LOGS: bool = false;

use crate::{log_debug, log_warn};

/// A single durable JSON value on disk.
#[derive(Debug, Clone)]
pub struct LocalSlot {
    path: PathBuf,
}

impl LocalSlot {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn in_dir(dir: &Path, key: &str) -> Self {
        Self::new(dir.join(format!("{key}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when the slot has never been written.
    pub fn read<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let value = serde_json::from_str(&contents)
            .with_context(|| format!("malformed JSON in {}", self.path.display()))?;
        Ok(Some(value))
    }

    /// Write through a sibling temp file so a crash mid-write never leaves
    /// a truncated slot behind.
    pub fn write<T: Serialize>(&self, value: &T) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))
    }
}

/// On-disk shape of the timer snapshot slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedTimer {
    pub time_left: u64,
    pub is_running: bool,
    pub mode: TimerMode,
    pub sessions_completed: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub settings: Settings,
    #[serde(default)]
    pub phase_duration: Option<u64>,
    #[serde(default)]
    pub phase_started_at: Option<DateTime<Utc>>,
}

impl PersistedTimer {
    pub fn capture(state: &TimerState, settings: &Settings) -> Self {
        Self {
            time_left: state.time_left_secs,
            is_running: state.is_running,
            mode: state.mode,
            sessions_completed: state.sessions_completed,
            start_time: state.started_at,
            settings: *settings,
            phase_duration: Some(state.phase_duration_secs),
            phase_started_at: state.phase_started_at,
        }
    }

    pub fn timer_state(&self) -> TimerState {
        TimerState {
            mode: self.mode,
            time_left_secs: self.time_left,
            is_running: self.is_running,
            sessions_completed: self.sessions_completed,
            started_at: self.start_time,
            phase_duration_secs: self
                .phase_duration
                .unwrap_or_else(|| self.settings.duration_secs(self.mode)),
            phase_started_at: self.phase_started_at,
        }
    }
}

impl Default for PersistedTimer {
    fn default() -> Self {
        let settings = Settings::default();
        Self::capture(&TimerState::new(&settings), &settings)
    }
}

/// Reads and writes the timer snapshot slot. Never fails toward the
/// engine: bad reads become defaults, failed writes are logged.
#[derive(Debug, Clone)]
pub struct PersistenceAdapter {
    slot: LocalSlot,
}

impl PersistenceAdapter {
    pub fn new(slot: LocalSlot) -> Self {
        Self { slot }
    }

    pub fn slot(&self) -> &LocalSlot {
        &self.slot
    }

    pub fn save(&self, state: &TimerState, settings: &Settings) -> bool {
        self.write(&PersistedTimer::capture(state, settings))
    }

    pub fn write(&self, snapshot: &PersistedTimer) -> bool {
        match self.slot.write(snapshot) {
            Ok(()) => {
                log_debug!("timer snapshot saved ({}s left)", snapshot.time_left);
                true
            }
            Err(err) => {
                log_warn!("Timer snapshot not saved: {err:#}");
                false
            }
        }
    }

    /// `None` only means "nothing usable on disk"; callers fall back to
    /// defaults.
    pub fn load_stored(&self) -> Option<PersistedTimer> {
        match self.slot.read::<PersistedTimer>() {
            Ok(stored) => stored,
            Err(err) => {
                log_warn!("Discarding unreadable timer snapshot: {err:#}");
                None
            }
        }
    }

    pub fn load(&self) -> PersistedTimer {
        self.load_stored().unwrap_or_default()
    }
}

/// Writes snapshots on the blocking pool, one at a time and in order.
/// Submissions that arrive while a write is in flight collapse into the
/// newest one.
pub struct SnapshotWriter {
    latest: watch::Sender<PersistedTimer>,
    task: JoinHandle<()>,
}

impl SnapshotWriter {
    pub fn spawn(adapter: PersistenceAdapter, initial: PersistedTimer) -> Self {
        let (latest, mut pending) = watch::channel(initial);
        let task = tokio::spawn(async move {
            while pending.changed().await.is_ok() {
                let snapshot = pending.borrow_and_update().clone();
                let adapter = adapter.clone();
                if let Err(err) =
                    tokio::task::spawn_blocking(move || adapter.write(&snapshot)).await
                {
                    log_warn!("Timer snapshot writer failed: {err}");
                }
            }
        });
        Self { latest, task }
    }

    pub fn submit(&self, state: &TimerState, settings: &Settings) {
        self.latest
            .send_replace(PersistedTimer::capture(state, settings));
    }

    /// Write whatever is still pending, then stop.
    pub async fn close(self) {
        drop(self.latest);
        if let Err(err) = self.task.await {
            log_warn!("Timer snapshot writer did not finish cleanly: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{
        FOCUS_MINUTES_MAX, LONG_BREAK_MINUTES_MAX, SHORT_BREAK_MINUTES_MAX, VOLUME_MAX,
    };
    use chrono::TimeZone;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn adapter(dir: &Path) -> PersistenceAdapter {
        PersistenceAdapter::new(LocalSlot::in_dir(dir, "timer"))
    }

    #[test]
    fn save_then_load_round_trips_running_state() {
        let dir = tempdir().unwrap();
        let persistence = adapter(dir.path());
        let settings = Settings {
            long_break_minutes: 20,
            ..Settings::default()
        };
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let state = TimerState {
            mode: TimerMode::LongBreak,
            time_left_secs: 731,
            is_running: true,
            sessions_completed: 8,
            started_at: Some(started),
            phase_duration_secs: 1200,
            phase_started_at: Some(started),
        };

        assert!(persistence.save(&state, &settings));
        let loaded = persistence.load();
        assert_eq!(loaded.timer_state(), state);
        assert_eq!(loaded.settings, settings);
    }

    #[test]
    fn missing_slot_loads_defaults() {
        let dir = tempdir().unwrap();
        let loaded = adapter(dir.path()).load();
        assert_eq!(loaded, PersistedTimer::default());
        assert_eq!(loaded.time_left, 1500);
        assert!(!loaded.is_running);
    }

    #[test]
    fn malformed_slot_loads_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("timer.json"), "{\"timeLeft\": \"soon\"}").unwrap();
        let persistence = adapter(dir.path());
        assert!(persistence.load_stored().is_none());
        assert_eq!(persistence.load(), PersistedTimer::default());
    }

    #[test]
    fn start_time_is_written_as_iso_8601() {
        let dir = tempdir().unwrap();
        let persistence = adapter(dir.path());
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);
        state.start(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        persistence.save(&state, &settings);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(persistence.slot().path()).unwrap())
                .unwrap();
        assert_eq!(raw["startTime"], "2024-03-01T09:30:00Z");
        assert_eq!(raw["mode"], "focus");
        assert_eq!(raw["timeLeft"], 1500);
        assert_eq!(raw["settings"]["focusMinutes"], 25);
    }

    #[test]
    fn snapshot_without_phase_fields_still_loads() {
        let dir = tempdir().unwrap();
        let raw = serde_json::json!({
            "timeLeft": 120,
            "isRunning": false,
            "mode": "shortBreak",
            "sessionsCompleted": 1,
            "startTime": null,
            "settings": { "shortBreakMinutes": 5 }
        });
        std::fs::write(dir.path().join("timer.json"), raw.to_string()).unwrap();

        let state = adapter(dir.path()).load().timer_state();
        assert_eq!(state.mode, TimerMode::ShortBreak);
        assert_eq!(state.time_left_secs, 120);
        assert_eq!(state.phase_duration_secs, 300);
    }

    #[test]
    fn write_failure_is_absorbed() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("occupied");
        std::fs::write(&blocker, "file, not a directory").unwrap();
        let persistence = PersistenceAdapter::new(LocalSlot::new(blocker.join("timer.json")));
        let settings = Settings::default();
        assert!(!persistence.save(&TimerState::new(&settings), &settings));
    }

    #[tokio::test]
    async fn writer_flushes_the_newest_snapshot_on_close() {
        let dir = tempdir().unwrap();
        let persistence = adapter(dir.path());
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);

        let writer = SnapshotWriter::spawn(
            persistence.clone(),
            PersistedTimer::capture(&state, &settings),
        );
        state.start(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        for _ in 0..5 {
            state.tick(&settings, Utc::now());
            writer.submit(&state, &settings);
        }
        writer.close().await;

        assert_eq!(persistence.load().timer_state(), state);
        assert_eq!(persistence.load().time_left, 1495);
    }

    fn timestamp() -> impl Strategy<Value = DateTime<Utc>> {
        (1_500_000_000i64..2_000_000_000, 0u32..1_000_000_000)
            .prop_map(|(secs, nanos)| Utc.timestamp_opt(secs, nanos).unwrap())
    }

    fn valid_settings() -> impl Strategy<Value = Settings> {
        (
            1..=FOCUS_MINUTES_MAX,
            1..=SHORT_BREAK_MINUTES_MAX,
            1..=LONG_BREAK_MINUTES_MAX,
            1u32..=12,
            any::<bool>(),
            any::<bool>(),
            any::<bool>(),
            0..=VOLUME_MAX,
        )
            .prop_map(|(focus, short, long, cadence, sound, notify, dnd, volume)| Settings {
                focus_minutes: focus,
                short_break_minutes: short,
                long_break_minutes: long,
                sessions_until_long_break: cadence,
                sound_enabled: sound,
                notifications_enabled: notify,
                do_not_disturb_enabled: dnd,
                volume,
            })
    }

    prop_compose! {
        fn valid_state()(
            settings in valid_settings(),
            mode in prop_oneof![
                Just(TimerMode::Focus),
                Just(TimerMode::ShortBreak),
                Just(TimerMode::LongBreak),
            ],
            is_running in any::<bool>(),
            sessions_completed in 0u32..10_000,
            started in timestamp(),
            phase_started in proptest::option::of(timestamp()),
            permille in 1u64..=1000,
        ) -> (TimerState, Settings) {
            let phase_duration_secs = settings.duration_secs(mode);
            let state = TimerState {
                mode,
                time_left_secs: (phase_duration_secs * permille / 1000).max(1),
                is_running,
                sessions_completed,
                started_at: is_running.then_some(started),
                phase_duration_secs,
                phase_started_at: if is_running {
                    Some(phase_started.unwrap_or(started))
                } else {
                    phase_started
                },
            };
            (state, settings)
        }
    }

    proptest! {
        #[test]
        fn any_valid_state_survives_save_and_load((state, settings) in valid_state()) {
            let dir = tempdir().unwrap();
            let persistence = adapter(dir.path());
            prop_assert!(persistence.save(&state, &settings));

            let loaded = persistence.load();
            prop_assert_eq!(loaded.settings, settings);
            prop_assert_eq!(loaded.timer_state(), state);
        }
    }
}
