pub mod audio;
mod cli;
pub mod config;
pub mod db;
pub mod notifications;
pub mod persistence;
pub mod recorder;
pub mod settings;
pub mod timer;
mod utils;

use std::sync::Arc;

use anyhow::{Context, Result};
use log::info;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use audio::{AlarmOutput, AudioEngineHandle};
use config::{AppConfig, SETTINGS_KEY, TIMER_KEY};
use db::Database;
use notifications::{LogNotifier, NotificationDispatcher, Notifier};
use persistence::{LocalSlot, PersistenceAdapter};
use recorder::{
    HttpSessionLog, MemorySessionLog, SessionLog, SessionRecorder, OUTBOX_POLL_INTERVAL,
};
use settings::SettingsStore;
use timer::{EngineParts, TimerController};

/// The pluggable edges of the engine.
pub struct Backends {
    pub session_log: Arc<dyn SessionLog>,
    pub notifier: Arc<dyn Notifier>,
    pub alarm: Arc<dyn AlarmOutput>,
}

impl Backends {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let session_log: Arc<dyn SessionLog> = match &config.remote_url {
            Some(url) => {
                info!("Recording sessions to {url}");
                Arc::new(HttpSessionLog::new(url)?)
            }
            None => {
                info!("No remote session log configured; history is kept in memory");
                Arc::new(MemorySessionLog::new())
            }
        };

        Ok(Self {
            session_log,
            notifier: Arc::new(LogNotifier::new()),
            alarm: Arc::new(AudioEngineHandle::new()),
        })
    }
}

/// A running engine plus the recorder tasks that feed its history.
pub struct FocusApp {
    pub controller: TimerController,
    pub recorder: SessionRecorder,
    cancel: CancellationToken,
    engine: JoinHandle<()>,
    tasks: Vec<JoinHandle<()>>,
}

impl FocusApp {
    pub async fn start(config: &AppConfig, backends: Backends) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir).with_context(|| {
            format!("failed to create data directory {}", config.data_dir.display())
        })?;

        let persistence = PersistenceAdapter::new(LocalSlot::in_dir(&config.data_dir, TIMER_KEY));
        let stored = persistence.load_stored();
        let settings = SettingsStore::open(
            LocalSlot::in_dir(&config.data_dir, SETTINGS_KEY),
            stored.as_ref().map(|snapshot| snapshot.settings),
        );

        let database = Database::new(config.database_path())?;
        let recorder = SessionRecorder::new(&config.user_id, backends.session_log, database);
        let dispatcher = NotificationDispatcher::new(backends.notifier, backends.alarm);

        let cancel = CancellationToken::new();
        let mut tasks = vec![
            recorder.load_and_subscribe(cancel.child_token()).await,
            recorder.spawn_outbox_loop(cancel.child_token(), OUTBOX_POLL_INTERVAL),
        ];
        if settings.current().notifications_enabled {
            let dispatcher = dispatcher.clone();
            tasks.push(tokio::task::spawn_blocking(move || {
                dispatcher.ensure_permission();
            }));
        }

        let (controller, engine) = TimerController::spawn(
            EngineParts {
                settings,
                persistence,
                dispatcher,
                recorder: recorder.clone(),
                restored: stored.map(|snapshot| snapshot.timer_state()),
                tick_interval: config.tick_interval,
            },
            cancel.child_token(),
        );

        Ok(Self {
            controller,
            recorder,
            cancel,
            engine,
            tasks,
        })
    }

    /// Stop the engine, wait for it to write its final snapshot, then stop
    /// the recorder tasks.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.engine.await {
            log::error!("Timer engine task failed: {err}");
        }
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

pub fn run() -> Result<()> {
    let config = AppConfig::from_env()?;
    utils::logging::init(config.debug);
    info!(
        "focustimer starting up (user {}, data in {})",
        config.user_id,
        config.data_dir.display()
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(async {
        let backends = Backends::from_config(&config)?;
        let app = FocusApp::start(&config, backends).await?;
        let result = cli::run(&app).await;
        app.shutdown().await;
        result
    })
}
