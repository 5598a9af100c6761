use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    notifications::NotificationDispatcher,
    persistence::{PersistedTimer, PersistenceAdapter, SnapshotWriter},
    recorder::{SessionRecord, SessionRecorder},
    settings::{Settings, SettingsError, SettingsPatch, SettingsStore},
};
use crate::{log_debug, log_info};

use super::{
    state::{CompletedPhase, TimerMode, TimerState},
    ticker::{spawn_ticker, TickerEvent, TickerHandle},
};

const ENABLE_LOGS: bool = true;

/// What consumers get to read. Published after every tick and command.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerSnapshot {
    pub mode: TimerMode,
    pub time_left: u64,
    pub is_running: bool,
    pub sessions_completed: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub settings: Settings,
}

impl TimerSnapshot {
    fn capture(state: &TimerState, settings: &Settings) -> Self {
        Self {
            mode: state.mode,
            time_left: state.time_left_secs,
            is_running: state.is_running,
            sessions_completed: state.sessions_completed,
            started_at: state.started_at,
            settings: *settings,
        }
    }

    /// `MM:SS`, minutes zero-padded to two digits.
    pub fn formatted_time_left(&self) -> String {
        format!("{:02}:{:02}", self.time_left / 60, self.time_left % 60)
    }
}

enum EngineCommand {
    Toggle(oneshot::Sender<TimerSnapshot>),
    Reset(oneshot::Sender<TimerSnapshot>),
    UpdateSettings(SettingsPatch, oneshot::Sender<Result<Settings, SettingsError>>),
}

/// Everything the engine needs, assembled by the caller.
pub struct EngineParts {
    pub settings: SettingsStore,
    pub persistence: PersistenceAdapter,
    pub dispatcher: NotificationDispatcher,
    pub recorder: SessionRecorder,
    /// State to resume from. `None` starts fresh.
    pub restored: Option<TimerState>,
    pub tick_interval: Duration,
}

struct Engine {
    state: TimerState,
    settings: SettingsStore,
    persistence: SnapshotWriter,
    dispatcher: NotificationDispatcher,
    recorder: SessionRecorder,
    ticker: TickerHandle,
    tick_interval: Duration,
    next_run_id: u64,
    active_run: Option<u64>,
    published: watch::Sender<TimerSnapshot>,
    side_effects: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Persist first, then publish. Called after every mutation.
    fn commit(&mut self) -> TimerSnapshot {
        let settings = self.settings.current();
        self.persistence.submit(&self.state, &settings);
        let snapshot = TimerSnapshot::capture(&self.state, &settings);
        self.published.send_replace(snapshot.clone());
        snapshot
    }

    fn start_ticking(&mut self) {
        self.next_run_id += 1;
        let run_id = self.next_run_id;
        self.active_run = Some(run_id);
        self.ticker
            .start(run_id, self.state.time_left_secs, self.tick_interval);
    }

    fn stop_ticking(&mut self) {
        if self.active_run.take().is_some() {
            self.ticker.stop();
        }
    }

    fn toggle(&mut self) -> TimerSnapshot {
        if self.state.is_running {
            self.state.pause();
            self.stop_ticking();
            log_info!(
                "Paused {} with {}s left",
                self.state.mode.as_str(),
                self.state.time_left_secs
            );
        } else {
            self.state.start(Utc::now());
            self.start_ticking();
            log_info!(
                "Started {} with {}s left",
                self.state.mode.as_str(),
                self.state.time_left_secs
            );
        }
        self.commit()
    }

    fn reset(&mut self) -> TimerSnapshot {
        self.stop_ticking();
        self.state.reset(&self.settings.current());
        log_info!("Timer reset");
        self.commit()
    }

    fn update_settings(&mut self, patch: &SettingsPatch) -> Result<Settings, SettingsError> {
        let change = self.settings.update(patch)?;
        if change.notifications_turned_on() {
            let dispatcher = self.dispatcher.clone();
            self.side_effects.push(tokio::task::spawn_blocking(move || {
                dispatcher.ensure_permission();
            }));
        }
        self.side_effects.retain(|handle| !handle.is_finished());
        self.state.apply_settings(&change.current);
        self.commit();
        Ok(change.current)
    }

    fn on_ticker_event(&mut self, event: TickerEvent) {
        let (run_id, completed) = match event {
            TickerEvent::Tick { run_id, .. } => (run_id, false),
            TickerEvent::Complete { run_id } => (run_id, true),
        };
        if self.active_run != Some(run_id) {
            log_debug!("dropping stale ticker event {event:?}");
            return;
        }

        let settings = self.settings.current();
        let now = Utc::now();
        let phase = if completed {
            Some(self.state.finish(&settings, now))
        } else {
            self.state.tick(&settings, now)
        };

        if let Some(phase) = phase {
            self.active_run = None;
            self.ticker.stop();
            self.on_phase_complete(phase);
        }
        self.commit();
    }

    /// Side effects of a finished phase. Neither the alarm nor the remote
    /// write is awaited here.
    fn on_phase_complete(&mut self, phase: CompletedPhase) {
        log_info!(
            "{} phase complete after {}s; next up {} ({} focus sessions so far)",
            phase.mode.as_str(),
            phase.duration_secs,
            phase.next_mode.as_str(),
            self.state.sessions_completed
        );

        let dispatcher = self.dispatcher.clone();
        let mode = phase.mode;
        let settings = phase.settings;
        self.side_effects.push(tokio::task::spawn_blocking(move || {
            dispatcher.phase_complete(mode, &settings);
        }));

        let recorder = self.recorder.clone();
        self.side_effects.push(tokio::spawn(async move {
            recorder.record(&phase).await;
        }));

        self.side_effects.retain(|handle| !handle.is_finished());
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<EngineCommand>,
        mut ticks: mpsc::UnboundedReceiver<TickerEvent>,
        cancel: CancellationToken,
    ) {
        if self.state.is_running {
            log_info!(
                "Resuming {} with {}s left",
                self.state.mode.as_str(),
                self.state.time_left_secs
            );
            self.start_ticking();
        }
        self.commit();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(EngineCommand::Toggle(reply)) => {
                        let _ = reply.send(self.toggle());
                    }
                    Some(EngineCommand::Reset(reply)) => {
                        let _ = reply.send(self.reset());
                    }
                    Some(EngineCommand::UpdateSettings(patch, reply)) => {
                        let _ = reply.send(self.update_settings(&patch));
                    }
                    None => break,
                },
                Some(event) = ticks.recv() => self.on_ticker_event(event),
            }
        }

        self.stop_ticking();
        self.persistence
            .submit(&self.state, &self.settings.current());
        self.persistence.close().await;
        for handle in self.side_effects.drain(..) {
            let _ = handle.await;
        }
        log_info!("Timer engine stopped");
    }
}

/// Handle to the engine task. Cheap to clone; every clone talks to the same
/// engine.
#[derive(Clone)]
pub struct TimerController {
    commands: mpsc::Sender<EngineCommand>,
    snapshots: watch::Receiver<TimerSnapshot>,
    recorder: SessionRecorder,
    cancel: CancellationToken,
}

impl TimerController {
    /// Start the engine and its ticker. The returned handle completes once
    /// the engine has shut down and flushed its last snapshot.
    pub fn spawn(parts: EngineParts, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let settings = parts.settings.current();
        let state = match parts.restored {
            Some(restored) => restored.normalized(&settings),
            None => TimerState::new(&settings),
        };

        let (ticks_tx, ticks_rx) = mpsc::unbounded_channel();
        let (ticker, _ticker_task) = spawn_ticker(ticks_tx, cancel.child_token());
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (published, snapshots) =
            watch::channel(TimerSnapshot::capture(&state, &settings));

        let persistence = SnapshotWriter::spawn(
            parts.persistence,
            PersistedTimer::capture(&state, &settings),
        );
        let engine = Engine {
            state,
            settings: parts.settings,
            persistence,
            dispatcher: parts.dispatcher,
            recorder: parts.recorder.clone(),
            ticker,
            tick_interval: parts.tick_interval,
            next_run_id: 0,
            active_run: None,
            published,
            side_effects: Vec::new(),
        };

        let handle = tokio::spawn(engine.run(commands_rx, ticks_rx, cancel.clone()));

        (
            Self {
                commands: commands_tx,
                snapshots,
                recorder: parts.recorder,
                cancel,
            },
            handle,
        )
    }

    pub async fn toggle(&self) -> Result<TimerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Toggle(reply)).await?;
        rx.await.map_err(|_| engine_gone())
    }

    pub async fn reset(&self) -> Result<TimerSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::Reset(reply)).await?;
        rx.await.map_err(|_| engine_gone())
    }

    /// Validation failures come back as [`SettingsError`] inside the
    /// `anyhow::Error`.
    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineCommand::UpdateSettings(patch, reply)).await?;
        Ok(rx.await.map_err(|_| engine_gone())??)
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerSnapshot> {
        self.snapshots.clone()
    }

    /// Completed phases, newest first.
    pub fn records(&self) -> watch::Receiver<Vec<SessionRecord>> {
        self.recorder.subscribe()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| engine_gone())
    }
}

fn engine_gone() -> anyhow::Error {
    anyhow!("timer engine has stopped")
}
