//! Recording of completed phases.
//!
//! Each completed phase is appended to a per-user [`SessionLog`]. Successful
//! writes are mirrored into the local SQLite cache so history is available
//! offline; failed writes go to the outbox and are retried with backoff.
//! Subscribers see the merged history newest first through a `watch`
//! channel.

mod http;
mod memory;
mod outbox;
mod session_log;

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::db::Database;
use crate::timer::CompletedPhase;
use crate::{log_info, log_warn};

pub use http::HttpSessionLog;
pub use memory::MemorySessionLog;
pub use outbox::{backoff_delay, BACKOFF_BASE, BACKOFF_CAP};
pub use session_log::{sort_newest_first, SessionEntry, SessionLog, SessionRecord};

const ENABLE_LOGS: bool = true;

pub const OUTBOX_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SessionRecorder {
    user_id: Arc<str>,
    log: Arc<dyn SessionLog>,
    db: Database,
    records: Arc<watch::Sender<Vec<SessionRecord>>>,
    flush_lock: Arc<Mutex<()>>,
}

impl SessionRecorder {
    pub fn new(user_id: &str, log: Arc<dyn SessionLog>, db: Database) -> Self {
        let (records, _) = watch::channel(Vec::new());
        Self {
            user_id: Arc::from(user_id),
            log,
            db,
            records: Arc::new(records),
            flush_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn record(&self, phase: &CompletedPhase) -> Option<SessionRecord> {
        self.append(SessionEntry::from(phase)).await
    }

    /// Append one entry to the remote log. On failure the entry is queued in
    /// the outbox and `None` is returned; the caller is never failed.
    pub async fn append(&self, entry: SessionEntry) -> Option<SessionRecord> {
        match self.log.append(&self.user_id, &entry).await {
            Ok(id) => {
                let record = SessionRecord::from_entry(id, entry);
                log_info!(
                    "Recorded {} session {} ({}s)",
                    record.kind.as_str(),
                    record.id,
                    record.duration
                );
                if let Err(err) = self.db.cache_session(&self.user_id, &record).await {
                    log_warn!("Failed to cache session {}: {err:#}", record.id);
                }
                self.merge(vec![record.clone()]);
                self.flush_outbox().await;
                Some(record)
            }
            Err(err) => {
                let message = format!("{err:#}");
                log_warn!("Failed to record {} session: {message}", entry.kind.as_str());
                let item = outbox::new_item(&self.user_id, entry, &message);
                if let Err(err) = self.db.enqueue_outbox(&item).await {
                    log_warn!("Failed to queue session for retry, dropping it: {err:#}");
                }
                None
            }
        }
    }

    /// Publish the cached history, then follow the remote log until `cancel`
    /// fires. Each remote snapshot replaces both the cache and the published
    /// list.
    pub async fn load_and_subscribe(&self, cancel: CancellationToken) -> JoinHandle<()> {
        match self.db.load_cached_sessions(&self.user_id).await {
            Ok(cached) => {
                log_info!("Loaded {} cached sessions", cached.len());
                self.records.send_replace(cached);
            }
            Err(err) => log_warn!("Failed to load cached sessions: {err:#}"),
        }

        let recorder = self.clone();
        tokio::spawn(async move {
            let mut updates = match recorder.log.watch(&recorder.user_id, cancel.clone()).await {
                Ok(updates) => updates,
                Err(err) => {
                    log_warn!("Session log subscription failed, history stays cached: {err:#}");
                    return;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    update = updates.recv() => {
                        let Some(mut remote) = update else { break };
                        sort_newest_first(&mut remote);
                        if let Err(err) = recorder
                            .db
                            .replace_cached_sessions(&recorder.user_id, remote.clone())
                            .await
                        {
                            log_warn!("Failed to refresh session cache: {err:#}");
                        }
                        recorder.records.send_replace(remote);
                    }
                }
            }
        })
    }

    pub fn records(&self) -> Vec<SessionRecord> {
        self.records.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<SessionRecord>> {
        self.records.subscribe()
    }

    pub async fn pending_count(&self) -> usize {
        self.db.count_outbox(&self.user_id).await.unwrap_or(0)
    }

    /// Retry whatever is due in the outbox. Returns how many entries were
    /// delivered.
    pub async fn flush_outbox(&self) -> usize {
        let _guard = self.flush_lock.lock().await;
        match outbox::flush(&self.db, self.log.as_ref(), &self.user_id, Utc::now()).await {
            Ok(delivered) => {
                let count = delivered.len();
                for record in &delivered {
                    if let Err(err) = self.db.cache_session(&self.user_id, record).await {
                        log_warn!("Failed to cache session {}: {err:#}", record.id);
                    }
                }
                if count > 0 {
                    self.merge(delivered);
                }
                count
            }
            Err(err) => {
                log_warn!("Outbox flush failed: {err:#}");
                0
            }
        }
    }

    pub fn spawn_outbox_loop(&self, cancel: CancellationToken, period: Duration) -> JoinHandle<()> {
        let recorder = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        recorder.flush_outbox().await;
                    }
                }
            }
        })
    }

    fn merge(&self, fresh: Vec<SessionRecord>) {
        self.records.send_modify(|records| {
            for record in fresh {
                if !records.iter().any(|existing| existing.id == record.id) {
                    records.push(record);
                }
            }
            sort_newest_first(records);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::timer::TimerMode;

    fn entry(offset_secs: i64) -> SessionEntry {
        let completed = Utc::now() + chrono::Duration::seconds(offset_secs);
        SessionEntry {
            kind: TimerMode::Focus,
            duration: 1500,
            started_at: completed - chrono::Duration::seconds(1500),
            completed_at: completed,
            settings: Settings::default(),
        }
    }

    fn recorder(log: &MemorySessionLog) -> SessionRecorder {
        let db = Database::open_in_memory().unwrap();
        SessionRecorder::new("u1", Arc::new(log.clone()), db)
    }

    #[tokio::test]
    async fn successful_append_is_cached_and_published() {
        let log = MemorySessionLog::new();
        let recorder = recorder(&log);

        let record = recorder.append(entry(0)).await.unwrap();
        assert_eq!(recorder.records(), vec![record.clone()]);
        assert_eq!(log.len("u1"), 1);

        // The cache stores millisecond timestamps, so compare identity only.
        let cached = recorder.db.load_cached_sessions("u1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].id, record.id);
        assert_eq!(cached[0].kind, record.kind);
    }

    #[tokio::test]
    async fn failed_append_is_queued_not_raised() {
        let log = MemorySessionLog::new();
        log.set_offline(true);
        let recorder = recorder(&log);

        assert!(recorder.append(entry(0)).await.is_none());
        assert!(recorder.records().is_empty());
        assert_eq!(recorder.pending_count().await, 1);
    }

    #[tokio::test]
    async fn queued_entries_are_delivered_once_due() {
        let log = MemorySessionLog::new();
        log.set_offline(true);
        let recorder = recorder(&log);
        recorder.append(entry(0)).await;

        log.set_offline(false);
        // Not due yet: the first retry waits at least the base delay.
        assert_eq!(recorder.flush_outbox().await, 0);

        let due = recorder
            .db
            .due_outbox("u1", Utc::now() + chrono::Duration::minutes(1), 10)
            .await
            .unwrap();
        let mut item = due[0].clone();
        item.next_attempt_at = Utc::now() - chrono::Duration::seconds(1);
        recorder.db.enqueue_outbox(&item).await.unwrap();

        assert_eq!(recorder.flush_outbox().await, 1);
        assert_eq!(recorder.pending_count().await, 0);
        assert_eq!(log.len("u1"), 1);
        assert_eq!(recorder.records().len(), 1);
    }

    #[tokio::test]
    async fn remote_snapshots_replace_cached_history() {
        let log = MemorySessionLog::new();
        let recorder = recorder(&log);
        let stale = SessionRecord::from_entry("stale".into(), entry(-3600));
        recorder.db.cache_session("u1", &stale).await.unwrap();

        log.append("u1", &entry(-60)).await.unwrap();
        let mut updates = recorder.subscribe();

        let cancel = CancellationToken::new();
        let handle = recorder.load_and_subscribe(cancel.clone()).await;
        assert_eq!(recorder.records()[0].id, "stale");

        updates
            .wait_for(|records| records.len() == 1 && records[0].id != "stale")
            .await
            .unwrap();
        let cached = recorder.db.load_cached_sessions("u1").await.unwrap();
        assert_eq!(cached.len(), 1);
        assert_ne!(cached[0].id, "stale");

        cancel.cancel();
        handle.await.unwrap();
    }
}
