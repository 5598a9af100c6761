//! Best-effort side effects fired when a phase runs out: the alarm sound
//! and a system notification. Nothing here can fail the caller.

mod log_notifier;

pub use log_notifier::LogNotifier;

use std::sync::Arc;

use anyhow::Result;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::audio::AlarmOutput;
use crate::settings::Settings;
use crate::timer::TimerMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Permission {
    Undetermined,
    Granted,
    Denied,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseNotification {
    pub title: String,
    pub body: String,
}

impl PhaseNotification {
    /// Copy for the phase that just finished.
    pub fn for_completed(mode: TimerMode) -> Self {
        match mode {
            TimerMode::Focus => Self {
                title: "Focus session complete".into(),
                body: "Great work! Time to rest.".into(),
            },
            TimerMode::ShortBreak | TimerMode::LongBreak => Self {
                title: "Break is over".into(),
                body: "Back to focus!".into(),
            },
        }
    }
}

/// Platform notification backend.
pub trait Notifier: Send + Sync {
    fn permission(&self) -> Permission;
    fn request_permission(&self) -> Permission;
    fn show(&self, notification: &PhaseNotification) -> Result<()>;
}

#[derive(Clone)]
pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    alarm: Arc<dyn AlarmOutput>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, alarm: Arc<dyn AlarmOutput>) -> Self {
        Self { notifier, alarm }
    }

    /// Ask for permission only if the platform has not answered yet. Called
    /// when notifications get switched on, not on every phase.
    pub fn ensure_permission(&self) -> Permission {
        match self.notifier.permission() {
            Permission::Undetermined => {
                let answer = self.notifier.request_permission();
                info!("Notification permission request answered: {answer:?}");
                answer
            }
            known => known,
        }
    }

    /// Sound plus notification for a finished phase, honouring the toggles.
    pub fn phase_complete(&self, mode: TimerMode, settings: &Settings) {
        if settings.do_not_disturb_enabled {
            debug!("Do not disturb on; skipping alarm and notification");
            return;
        }
        if settings.sound_enabled {
            self.play_sound(settings);
        }
        self.notify_phase_complete(mode, settings);
    }

    pub fn notify_phase_complete(&self, mode: TimerMode, settings: &Settings) {
        if !settings.notifications_enabled {
            return;
        }
        if self.notifier.permission() != Permission::Granted {
            debug!("Notification permission not granted; skipping");
            return;
        }
        let notification = PhaseNotification::for_completed(mode);
        if let Err(err) = self.notifier.show(&notification) {
            warn!("Failed to show notification: {err:#}");
        }
    }

    pub fn play_sound(&self, settings: &Settings) {
        if !settings.sound_enabled {
            return;
        }
        if let Err(err) = self.alarm.play_alarm(settings.gain()) {
            warn!("Failed to play alarm: {err}");
        }
    }
}
