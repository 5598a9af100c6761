use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

use crate::db::{Database, OutboxItem};
use crate::{log_info, log_warn};

use super::session_log::{SessionEntry, SessionLog, SessionRecord};

const ENABLE_LOGS: bool = true;

pub const BACKOFF_BASE: Duration = Duration::from_secs(5);
pub const BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);
const MAX_JITTER_MS: u64 = 1_000;
const FLUSH_BATCH: usize = 32;

/// Delay before retry number `attempts + 1`: `BACKOFF_BASE * 2^attempts`
/// capped at `BACKOFF_CAP`, plus `jitter`.
pub fn backoff_delay(attempts: u32, jitter: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempts).unwrap_or(u32::MAX);
    BACKOFF_BASE
        .checked_mul(factor)
        .unwrap_or(BACKOFF_CAP)
        .min(BACKOFF_CAP)
        + jitter
}

fn random_jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS))
}

pub(super) fn new_item(user_id: &str, entry: SessionEntry, error: &str) -> OutboxItem {
    let now = Utc::now();
    OutboxItem {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        entry,
        attempts: 0,
        next_attempt_at: now + chrono_delay(backoff_delay(0, random_jitter())),
        last_error: Some(error.to_string()),
    }
}

fn chrono_delay(delay: Duration) -> chrono::Duration {
    chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(300))
}

/// Retry every due outbox entry once. Returns the records that made it into
/// the remote log, in the order they were sent.
pub(super) async fn flush(
    db: &Database,
    log: &dyn SessionLog,
    user_id: &str,
    now: DateTime<Utc>,
) -> anyhow::Result<Vec<SessionRecord>> {
    let due = db.due_outbox(user_id, now, FLUSH_BATCH).await?;
    let mut delivered = Vec::with_capacity(due.len());

    for item in due {
        match log.append(user_id, &item.entry).await {
            Ok(id) => {
                if let Err(err) = db.delete_outbox(&item.id).await {
                    log_warn!("Delivered session {} left in the outbox: {err:#}", item.id);
                }
                log_info!("Delivered queued session {} as {id}", item.id);
                delivered.push(SessionRecord::from_entry(id, item.entry));
            }
            Err(err) => {
                let attempts = item.attempts.saturating_add(1);
                let delay = backoff_delay(attempts, random_jitter());
                let message = format!("{err:#}");
                log_warn!(
                    "Queued session {} failed again (attempt {attempts}), retrying in {}s: {message}",
                    item.id,
                    delay.as_secs()
                );
                db.reschedule_outbox(&item.id, attempts, now + chrono_delay(delay), &message)
                    .await?;
            }
        }
    }

    Ok(delivered)
}
