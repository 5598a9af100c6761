use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persistence::LocalSlot;
use crate::timer::TimerMode;

pub const FOCUS_MINUTES_MAX: u32 = 60;
pub const SHORT_BREAK_MINUTES_MAX: u32 = 30;
pub const LONG_BREAK_MINUTES_MAX: u32 = 60;
pub const VOLUME_MAX: u8 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoredSettings")]
pub struct Settings {
    pub focus_minutes: u32,
    pub short_break_minutes: u32,
    pub long_break_minutes: u32,
    pub sessions_until_long_break: u32,
    pub sound_enabled: bool,
    pub notifications_enabled: bool,
    pub do_not_disturb_enabled: bool,
    pub volume: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            focus_minutes: 25,
            short_break_minutes: 5,
            long_break_minutes: 15,
            sessions_until_long_break: 4,
            sound_enabled: true,
            notifications_enabled: true,
            do_not_disturb_enabled: false,
            volume: 50,
        }
    }
}

/// Settings as found on disk. Numbers are read wide and signed so that an
/// out-of-range field is clamped instead of failing the whole slot.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct StoredSettings {
    focus_minutes: i64,
    short_break_minutes: i64,
    long_break_minutes: i64,
    sessions_until_long_break: i64,
    sound_enabled: bool,
    notifications_enabled: bool,
    do_not_disturb_enabled: bool,
    volume: i64,
}

impl Default for StoredSettings {
    fn default() -> Self {
        let defaults = Settings::default();
        Self {
            focus_minutes: defaults.focus_minutes.into(),
            short_break_minutes: defaults.short_break_minutes.into(),
            long_break_minutes: defaults.long_break_minutes.into(),
            sessions_until_long_break: defaults.sessions_until_long_break.into(),
            sound_enabled: defaults.sound_enabled,
            notifications_enabled: defaults.notifications_enabled,
            do_not_disturb_enabled: defaults.do_not_disturb_enabled,
            volume: defaults.volume.into(),
        }
    }
}

impl From<StoredSettings> for Settings {
    fn from(stored: StoredSettings) -> Self {
        Self {
            focus_minutes: stored.focus_minutes.clamp(1, FOCUS_MINUTES_MAX.into()) as u32,
            short_break_minutes: stored
                .short_break_minutes
                .clamp(1, SHORT_BREAK_MINUTES_MAX.into()) as u32,
            long_break_minutes: stored
                .long_break_minutes
                .clamp(1, LONG_BREAK_MINUTES_MAX.into()) as u32,
            sessions_until_long_break: stored
                .sessions_until_long_break
                .clamp(1, i64::from(u32::MAX)) as u32,
            sound_enabled: stored.sound_enabled,
            notifications_enabled: stored.notifications_enabled,
            do_not_disturb_enabled: stored.do_not_disturb_enabled,
            volume: stored.volume.clamp(0, i64::from(VOLUME_MAX)) as u8,
        }
    }
}

impl Settings {
    pub fn duration_secs(&self, mode: TimerMode) -> u64 {
        let minutes = match mode {
            TimerMode::Focus => self.focus_minutes,
            TimerMode::ShortBreak => self.short_break_minutes,
            TimerMode::LongBreak => self.long_break_minutes,
        };
        u64::from(minutes.max(1)) * 60
    }

    /// Volume as a sink gain in `0.0..=1.0`.
    pub fn gain(&self) -> f32 {
        f32::from(self.volume.min(VOLUME_MAX)) / f32::from(VOLUME_MAX)
    }

    /// Merge a patch. Zero or negative counts reject the whole patch;
    /// anything above a ceiling is clamped.
    pub fn apply(&self, patch: &SettingsPatch) -> Result<Settings, SettingsError> {
        let checks = [
            ("focusMinutes", patch.focus_minutes),
            ("shortBreakMinutes", patch.short_break_minutes),
            ("longBreakMinutes", patch.long_break_minutes),
            ("sessionsUntilLongBreak", patch.sessions_until_long_break),
        ];
        for (field, value) in checks {
            if let Some(value) = value {
                if value <= 0 {
                    return Err(SettingsError::NonPositive { field, value });
                }
            }
        }

        Ok(Settings {
            focus_minutes: clamp_minutes(patch.focus_minutes, self.focus_minutes, FOCUS_MINUTES_MAX),
            short_break_minutes: clamp_minutes(
                patch.short_break_minutes,
                self.short_break_minutes,
                SHORT_BREAK_MINUTES_MAX,
            ),
            long_break_minutes: clamp_minutes(
                patch.long_break_minutes,
                self.long_break_minutes,
                LONG_BREAK_MINUTES_MAX,
            ),
            sessions_until_long_break: patch
                .sessions_until_long_break
                .map(|v| v.min(i64::from(u32::MAX)) as u32)
                .unwrap_or(self.sessions_until_long_break),
            sound_enabled: patch.sound_enabled.unwrap_or(self.sound_enabled),
            notifications_enabled: patch
                .notifications_enabled
                .unwrap_or(self.notifications_enabled),
            do_not_disturb_enabled: patch
                .do_not_disturb_enabled
                .unwrap_or(self.do_not_disturb_enabled),
            volume: patch
                .volume
                .map(|v| v.clamp(0, i64::from(VOLUME_MAX)) as u8)
                .unwrap_or(self.volume),
        })
    }
}

fn clamp_minutes(value: Option<i64>, current: u32, max: u32) -> u32 {
    match value {
        Some(v) => v.clamp(1, i64::from(max)) as u32,
        None => current,
    }
}

/// Partial update coming from a settings form. Numbers are signed so
/// that bad input reaches validation instead of failing to deserialize.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsPatch {
    pub focus_minutes: Option<i64>,
    pub short_break_minutes: Option<i64>,
    pub long_break_minutes: Option<i64>,
    pub sessions_until_long_break: Option<i64>,
    pub sound_enabled: Option<bool>,
    pub notifications_enabled: Option<bool>,
    pub do_not_disturb_enabled: Option<bool>,
    pub volume: Option<i64>,
}

impl SettingsPatch {
    /// Parse a single `field=value` assignment using the camelCase names
    /// of the settings slot.
    pub fn parse_assignment(input: &str) -> anyhow::Result<Self> {
        let (field, raw) = input
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected <field>=<value>, got '{input}'"))?;
        let field = field.trim();
        let raw = raw.trim();

        let number = || {
            raw.parse::<i64>()
                .map_err(|_| anyhow::anyhow!("{field} expects a number, got '{raw}'"))
        };
        let flag = || {
            raw.parse::<bool>()
                .map_err(|_| anyhow::anyhow!("{field} expects true or false, got '{raw}'"))
        };

        let mut patch = Self::default();
        match field {
            "focusMinutes" => patch.focus_minutes = Some(number()?),
            "shortBreakMinutes" => patch.short_break_minutes = Some(number()?),
            "longBreakMinutes" => patch.long_break_minutes = Some(number()?),
            "sessionsUntilLongBreak" => patch.sessions_until_long_break = Some(number()?),
            "volume" => patch.volume = Some(number()?),
            "soundEnabled" => patch.sound_enabled = Some(flag()?),
            "notificationsEnabled" => patch.notifications_enabled = Some(flag()?),
            "doNotDisturbEnabled" => patch.do_not_disturb_enabled = Some(flag()?),
            other => anyhow::bail!("unknown setting '{other}'"),
        }
        Ok(patch)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("{field} must be at least 1, got {value}")]
    NonPositive { field: &'static str, value: i64 },
}

/// Result of an accepted update, so callers can react to flips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsChange {
    pub previous: Settings,
    pub current: Settings,
}

impl SettingsChange {
    pub fn notifications_turned_on(&self) -> bool {
        !self.previous.notifications_enabled && self.current.notifications_enabled
    }
}

/// Guarded setter over the settings slot. Owned by the engine loop, so it
/// needs no locking of its own.
pub struct SettingsStore {
    slot: LocalSlot,
    current: Settings,
}

impl SettingsStore {
    /// Read the slot, falling back to `fallback` and then to defaults when
    /// the slot is missing or unreadable.
    pub fn open(slot: LocalSlot, fallback: Option<Settings>) -> Self {
        let stored = match slot.read::<Settings>() {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!(
                    "Ignoring unreadable settings at {}: {err:#}",
                    slot.path().display()
                );
                None
            }
        };

        let current = stored.or(fallback).unwrap_or_default();
        Self { slot, current }
    }

    pub fn current(&self) -> Settings {
        self.current
    }

    pub fn update(&mut self, patch: &SettingsPatch) -> Result<SettingsChange, SettingsError> {
        let next = self.current.apply(patch)?;
        let change = SettingsChange {
            previous: self.current,
            current: next,
        };
        self.current = next;
        self.persist();
        Ok(change)
    }

    fn persist(&self) {
        if let Err(err) = self.slot.write(&self.current) {
            log::error!(
                "Failed to write settings to {}: {err:#}",
                self.slot.path().display()
            );
        }
    }
}
