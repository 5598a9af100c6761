use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::Settings;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum TimerMode {
    Focus,
    ShortBreak,
    LongBreak,
}

impl Default for TimerMode {
    fn default() -> Self {
        TimerMode::Focus
    }
}

impl TimerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimerMode::Focus => "focus",
            TimerMode::ShortBreak => "shortBreak",
            TimerMode::LongBreak => "longBreak",
        }
    }

    pub fn is_break(&self) -> bool {
        !matches!(self, TimerMode::Focus)
    }
}

impl std::str::FromStr for TimerMode {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "focus" => Ok(TimerMode::Focus),
            "shortBreak" => Ok(TimerMode::ShortBreak),
            "longBreak" => Ok(TimerMode::LongBreak),
            other => Err(anyhow::anyhow!("unknown timer mode '{other}'")),
        }
    }
}

/// Everything the engine knows about the countdown. Only the engine loop
/// mutates it; consumers see clones through [`super::TimerSnapshot`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    pub mode: TimerMode,
    pub time_left_secs: u64,
    pub is_running: bool,
    pub sessions_completed: u32,
    /// Set on every resume, cleared on pause. `Some` iff `is_running`.
    pub started_at: Option<DateTime<Utc>>,
    /// Length of the current phase as it was when the phase began.
    pub phase_duration_secs: u64,
    /// First start of the current phase; survives pauses.
    pub phase_started_at: Option<DateTime<Utc>>,
}

/// A phase that just ran out, captured before the transition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedPhase {
    pub mode: TimerMode,
    pub duration_secs: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub settings: Settings,
    pub next_mode: TimerMode,
}

impl TimerState {
    pub fn new(settings: &Settings) -> Self {
        let duration = settings.duration_secs(TimerMode::Focus);
        Self {
            mode: TimerMode::Focus,
            time_left_secs: duration,
            is_running: false,
            sessions_completed: 0,
            started_at: None,
            phase_duration_secs: duration,
            phase_started_at: None,
        }
    }

    /// Resume the countdown. Returns `false` if it was already running.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_running {
            return false;
        }
        self.is_running = true;
        self.started_at = Some(now);
        self.phase_started_at.get_or_insert(now);
        true
    }

    /// Pause without touching `time_left_secs`.
    pub fn pause(&mut self) -> bool {
        if !self.is_running {
            return false;
        }
        self.is_running = false;
        self.started_at = None;
        true
    }

    pub fn reset(&mut self, settings: &Settings) {
        *self = Self::new(settings);
    }

    /// New settings only rescale an idle countdown; a running phase keeps
    /// its length until the next transition.
    pub fn apply_settings(&mut self, settings: &Settings) {
        if self.is_running {
            return;
        }
        self.load_phase(self.mode, settings);
    }

    /// One elapsed second. Completes the phase when the countdown hits zero.
    pub fn tick(&mut self, settings: &Settings, now: DateTime<Utc>) -> Option<CompletedPhase> {
        if !self.is_running {
            return None;
        }
        self.time_left_secs = self.time_left_secs.saturating_sub(1);
        if self.time_left_secs == 0 {
            Some(self.complete(settings, now))
        } else {
            None
        }
    }

    /// Force completion of the running phase, whatever is left on the clock.
    pub fn finish(&mut self, settings: &Settings, now: DateTime<Utc>) -> CompletedPhase {
        self.time_left_secs = 0;
        self.complete(settings, now)
    }

    fn complete(&mut self, settings: &Settings, now: DateTime<Utc>) -> CompletedPhase {
        let duration_secs = self.phase_duration_secs;
        let started_at = self
            .phase_started_at
            .or(self.started_at)
            .unwrap_or_else(|| now - ChronoDuration::seconds(duration_secs as i64));
        let finished_mode = self.mode;

        let next_mode = match finished_mode {
            TimerMode::Focus => {
                self.sessions_completed = self.sessions_completed.saturating_add(1);
                next_break(self.sessions_completed, settings.sessions_until_long_break)
            }
            TimerMode::ShortBreak | TimerMode::LongBreak => TimerMode::Focus,
        };

        self.load_phase(next_mode, settings);
        self.is_running = false;
        self.started_at = None;

        CompletedPhase {
            mode: finished_mode,
            duration_secs,
            started_at,
            completed_at: now,
            settings: *settings,
            next_mode,
        }
    }

    fn load_phase(&mut self, mode: TimerMode, settings: &Settings) {
        let duration = settings.duration_secs(mode);
        self.mode = mode;
        self.time_left_secs = duration;
        self.phase_duration_secs = duration;
        self.phase_started_at = None;
    }

    /// Repair a state read back from disk so the invariants hold again.
    pub fn normalized(mut self, settings: &Settings) -> Self {
        if self.phase_duration_secs == 0 {
            self.phase_duration_secs = settings.duration_secs(self.mode);
        }
        if self.time_left_secs == 0 {
            self.time_left_secs = self.phase_duration_secs;
        }
        self.time_left_secs = self.time_left_secs.min(self.phase_duration_secs);

        if self.is_running && self.started_at.is_none() {
            self.is_running = false;
        }
        if !self.is_running {
            self.started_at = None;
            // An idle countdown follows the current durations, same as
            // `apply_settings`.
            if self.phase_duration_secs != settings.duration_secs(self.mode) {
                self.load_phase(self.mode, settings);
            }
        }
        self
    }
}

/// Break that follows the `completed`-th focus phase.
pub fn next_break(completed: u32, sessions_until_long_break: u32) -> TimerMode {
    let cadence = sessions_until_long_break.max(1);
    if completed % cadence == 0 {
        TimerMode::LongBreak
    } else {
        TimerMode::ShortBreak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn run_phase(state: &mut TimerState, settings: &Settings, clock: &mut i64) -> CompletedPhase {
        state.start(at(*clock));
        loop {
            *clock += 1;
            if let Some(done) = state.tick(settings, at(*clock)) {
                return done;
            }
        }
    }

    #[test]
    fn initial_state_is_idle_focus() {
        let settings = Settings::default();
        let state = TimerState::new(&settings);
        assert_eq!(state.mode, TimerMode::Focus);
        assert_eq!(state.time_left_secs, 25 * 60);
        assert!(!state.is_running);
        assert_eq!(state.sessions_completed, 0);
        assert!(state.started_at.is_none());
    }

    #[test]
    fn pause_keeps_time_left() {
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);
        state.start(at(0));
        state.tick(&settings, at(1));
        state.tick(&settings, at(2));
        assert!(state.pause());
        assert_eq!(state.time_left_secs, 25 * 60 - 2);
        assert!(state.started_at.is_none());
        assert!(state.phase_started_at.is_some());
    }

    #[test]
    fn ticks_are_ignored_while_paused() {
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);
        assert!(state.tick(&settings, at(1)).is_none());
        assert_eq!(state.time_left_secs, 25 * 60);
    }

    #[test]
    fn focus_completion_moves_to_short_break_and_stops() {
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);
        let mut clock = 0;
        let done = run_phase(&mut state, &settings, &mut clock);

        assert_eq!(done.mode, TimerMode::Focus);
        assert_eq!(done.duration_secs, 1500);
        assert_eq!(done.started_at, at(0));
        assert_eq!(done.completed_at, at(1500));
        assert_eq!(done.next_mode, TimerMode::ShortBreak);

        assert_eq!(state.mode, TimerMode::ShortBreak);
        assert_eq!(state.time_left_secs, 5 * 60);
        assert_eq!(state.sessions_completed, 1);
        assert!(!state.is_running);
        assert!(state.started_at.is_none());
    }

    #[test]
    fn break_completion_returns_to_focus_without_counting() {
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);
        let mut clock = 0;
        run_phase(&mut state, &settings, &mut clock);
        let done = run_phase(&mut state, &settings, &mut clock);

        assert_eq!(done.mode, TimerMode::ShortBreak);
        assert_eq!(state.mode, TimerMode::Focus);
        assert_eq!(state.time_left_secs, 1500);
        assert_eq!(state.sessions_completed, 1);
    }

    #[test]
    fn record_start_survives_pause_and_resume() {
        let settings = Settings {
            focus_minutes: 1,
            ..Settings::default()
        };
        let mut state = TimerState::new(&settings);
        state.start(at(0));
        for s in 1..=10 {
            state.tick(&settings, at(s));
        }
        state.pause();
        state.start(at(100));
        assert_eq!(state.started_at, Some(at(100)));

        let mut done = None;
        for s in 101..=200 {
            if let Some(d) = state.tick(&settings, at(s)) {
                done = Some(d);
                break;
            }
        }
        let done = done.expect("phase should complete");
        assert_eq!(done.started_at, at(0));
        assert!(done.completed_at > done.started_at);
    }

    #[test]
    fn idle_settings_change_rescales_immediately() {
        let mut settings = Settings::default();
        let mut state = TimerState::new(&settings);
        settings.focus_minutes = 30;
        state.apply_settings(&settings);
        assert_eq!(state.time_left_secs, 1800);
        assert_eq!(state.phase_duration_secs, 1800);
    }

    #[test]
    fn running_settings_change_waits_for_transition() {
        let mut settings = Settings::default();
        let mut state = TimerState::new(&settings);
        state.start(at(0));
        state.tick(&settings, at(1));

        settings.focus_minutes = 30;
        settings.short_break_minutes = 10;
        state.apply_settings(&settings);
        assert_eq!(state.time_left_secs, 1499);

        let done = state.finish(&settings, at(2));
        assert_eq!(done.duration_secs, 1500);
        assert_eq!(state.time_left_secs, 600);
    }

    #[test]
    fn reset_is_idempotent() {
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);
        let mut clock = 0;
        run_phase(&mut state, &settings, &mut clock);
        state.start(at(clock));

        state.reset(&settings);
        let once = state.clone();
        state.reset(&settings);
        assert_eq!(state, once);
        assert_eq!(state, TimerState::new(&settings));
    }

    #[test]
    fn lowering_cadence_only_affects_next_completion() {
        let mut settings = Settings {
            focus_minutes: 1,
            short_break_minutes: 1,
            ..Settings::default()
        };
        let mut state = TimerState::new(&settings);
        let mut clock = 0;
        for _ in 0..3 {
            run_phase(&mut state, &settings, &mut clock);
            run_phase(&mut state, &settings, &mut clock);
        }
        assert_eq!(state.sessions_completed, 3);

        settings.sessions_until_long_break = 2;
        let done = run_phase(&mut state, &settings, &mut clock);
        assert_eq!(done.next_mode, TimerMode::LongBreak);
        assert_eq!(state.sessions_completed, 4);
    }

    #[test]
    fn normalized_repairs_out_of_range_values() {
        let settings = Settings::default();
        let state = TimerState {
            mode: TimerMode::ShortBreak,
            time_left_secs: 10_000,
            is_running: true,
            sessions_completed: 2,
            started_at: None,
            phase_duration_secs: 0,
            phase_started_at: None,
        }
        .normalized(&settings);

        assert_eq!(state.phase_duration_secs, 300);
        assert_eq!(state.time_left_secs, 300);
        assert!(!state.is_running);
    }

    #[test]
    fn idle_restore_follows_shorter_settings() {
        let settings = Settings {
            focus_minutes: 20,
            ..Settings::default()
        };
        let state = TimerState::new(&Settings::default()).normalized(&settings);
        assert_eq!(state.time_left_secs, 1200);
        assert_eq!(state.phase_duration_secs, 1200);
        assert!(state.time_left_secs <= settings.duration_secs(state.mode));
    }

    #[test]
    fn idle_restore_keeps_paused_progress_when_durations_match() {
        let settings = Settings::default();
        let mut state = TimerState::new(&settings);
        state.start(at(0));
        state.tick(&settings, at(1));
        state.pause();

        let restored = state.clone().normalized(&settings);
        assert_eq!(restored, state);
        assert_eq!(restored.time_left_secs, 1499);
    }

    #[test]
    fn running_restore_keeps_its_phase_length() {
        let settings = Settings {
            focus_minutes: 20,
            ..Settings::default()
        };
        let mut state = TimerState::new(&Settings::default());
        state.start(at(0));
        state.tick(&Settings::default(), at(1));

        let restored = state.clone().normalized(&settings);
        assert_eq!(restored, state);
        assert_eq!(restored.phase_duration_secs, 1500);
    }

    #[test]
    fn mode_parses_its_wire_name() {
        for mode in [TimerMode::Focus, TimerMode::ShortBreak, TimerMode::LongBreak] {
            assert_eq!(mode.as_str().parse::<TimerMode>().unwrap(), mode);
        }
        assert!("nap".parse::<TimerMode>().is_err());
    }

    proptest! {
        #[test]
        fn long_break_follows_every_nth_focus(cadence in 1u32..8, rounds in 1usize..20) {
            let settings = Settings {
                focus_minutes: 1,
                short_break_minutes: 1,
                long_break_minutes: 1,
                sessions_until_long_break: cadence,
                ..Settings::default()
            };
            let mut state = TimerState::new(&settings);
            let mut clock = 0;
            for n in 1..=rounds {
                let focus = run_phase(&mut state, &settings, &mut clock);
                prop_assert_eq!(focus.mode, TimerMode::Focus);
                let expected = if n as u32 % cadence == 0 {
                    TimerMode::LongBreak
                } else {
                    TimerMode::ShortBreak
                };
                prop_assert_eq!(state.mode, expected);
                prop_assert_eq!(state.sessions_completed, n as u32);

                let before = state.sessions_completed;
                run_phase(&mut state, &settings, &mut clock);
                prop_assert_eq!(state.sessions_completed, before);
            }
        }
    }
}
