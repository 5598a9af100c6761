//! Local SQLite store for the session cache and the retry outbox.
//!
//! rusqlite connections are not `Sync`, so the connection lives on one OS
//! thread and async callers ship closures to it, getting the result back
//! over a oneshot.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

pub mod helpers;
mod migrations;
pub mod repositories;

pub use repositories::outbox::OutboxItem;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum Message {
    Run(Job),
    Close,
}

struct Worker {
    jobs: mpsc::Sender<Message>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else { return };

        if self.jobs.send(Message::Close).is_err() {
            error!("Database thread already gone at shutdown");
        }
        if let Err(err) = handle.join() {
            error!("Database thread panicked: {err:?}");
        }
    }
}

/// Handle to the database thread. Clones share the thread, which exits when
/// the last clone is dropped.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Option<Arc<PathBuf>>,
}

impl Database {
    /// Open (or create) the database file, creating parent directories as
    /// needed.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let file = path.clone();
        let db = Self::start(
            move || {
                let conn = Connection::open(&file)
                    .with_context(|| format!("failed to open {}", file.display()))?;
                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                Ok(conn)
            },
            Some(path),
        )?;

        if let Some(path) = db.path() {
            info!("Session database ready at {}", path.display());
        }
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::start(|| Ok(Connection::open_in_memory()?), None)
    }

    fn start<F>(open: F, path: Option<PathBuf>) -> Result<Self>
    where
        F: FnOnce() -> Result<Connection> + Send + 'static,
    {
        let (jobs_tx, jobs_rx) = mpsc::channel::<Message>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let thread = thread::Builder::new()
            .name("focustimer-db".into())
            .spawn(move || {
                let mut conn = match open().and_then(|mut conn| {
                    migrations::run_migrations(&mut conn)?;
                    Ok(conn)
                }) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Ok(Message::Run(job)) = jobs_rx.recv() {
                    job(&mut conn);
                }
            })
            .context("failed to spawn database thread")?;

        ready_rx
            .recv()
            .context("database thread exited during startup")?
            .context("failed to initialise session database")?;

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: path.map(Arc::new),
        })
    }

    /// `None` for in-memory databases.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    /// Run `task` on the database thread.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(Message::Run(job))
            .map_err(|_| anyhow!("database thread is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread dropped the request"))?
    }
}
