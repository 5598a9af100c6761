use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::session_log::{sort_newest_first, SessionEntry, SessionLog, SessionRecord};

/// In-process session log. Used when no remote endpoint is configured and
/// as the test double for the remote store.
#[derive(Clone)]
pub struct MemorySessionLog {
    logs: Arc<Mutex<HashMap<String, Vec<SessionRecord>>>>,
    changes: broadcast::Sender<String>,
    offline: Arc<AtomicBool>,
}

impl MemorySessionLog {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(64);
        Self {
            logs: Arc::new(Mutex::new(HashMap::new())),
            changes,
            offline: Arc::new(AtomicBool::new(false)),
        }
    }

    /// While offline every append fails, as an unreachable remote would.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self, user_id: &str) -> usize {
        self.snapshot(user_id).len()
    }

    fn snapshot(&self, user_id: &str) -> Vec<SessionRecord> {
        let guard = match self.logs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut records = guard.get(user_id).cloned().unwrap_or_default();
        sort_newest_first(&mut records);
        records
    }
}

impl Default for MemorySessionLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionLog for MemorySessionLog {
    async fn append(&self, user_id: &str, entry: &SessionEntry) -> Result<String> {
        if self.offline.load(Ordering::SeqCst) {
            bail!("session log unreachable");
        }
        let id = Uuid::new_v4().to_string();
        {
            let mut guard = match self.logs.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            guard
                .entry(user_id.to_string())
                .or_default()
                .push(SessionRecord::from_entry(id.clone(), entry.clone()));
        }
        let _ = self.changes.send(user_id.to_string());
        Ok(id)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        Ok(self.snapshot(user_id))
    }

    async fn watch(
        &self,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Vec<SessionRecord>>> {
        let (tx, rx) = mpsc::channel(8);
        let mut changes = self.changes.subscribe();
        let log = self.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            if tx.send(log.snapshot(&user_id)).await.is_err() {
                return;
            }
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = changes.recv() => match changed {
                        Ok(changed_user) if changed_user != user_id => continue,
                        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if tx.send(log.snapshot(&user_id)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(rx)
    }
}
