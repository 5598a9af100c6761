use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime},
    Database,
};
use crate::recorder::SessionEntry;

/// A completed phase still waiting for the remote log.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxItem {
    pub id: String,
    pub user_id: String,
    pub entry: SessionEntry,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

fn row_to_item(row: &Row) -> Result<OutboxItem> {
    let payload: String = row.get("payload_json")?;
    let attempts: i64 = row.get("attempts")?;
    let next_attempt_at: String = row.get("next_attempt_at")?;

    Ok(OutboxItem {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        entry: serde_json::from_str(&payload).context("malformed outbox payload")?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        next_attempt_at: parse_datetime(&next_attempt_at, "next_attempt_at")?,
        last_error: row.get("last_error")?,
    })
}

impl Database {
    pub async fn enqueue_outbox(&self, item: &OutboxItem) -> Result<()> {
        let item = item.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO session_outbox
                     (id, user_id, payload_json, attempts, next_attempt_at, last_error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    item.id,
                    item.user_id,
                    serde_json::to_string(&item.entry)?,
                    i64::from(item.attempts),
                    format_datetime(&item.next_attempt_at),
                    item.last_error,
                    format_datetime(&Utc::now()),
                ],
            )
            .context("failed to enqueue outbox entry")?;
            Ok(())
        })
        .await
    }

    /// Entries for `user_id` whose retry time has come, oldest first.
    pub async fn due_outbox(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<OutboxItem>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, payload_json, attempts, next_attempt_at, last_error
                 FROM session_outbox
                 WHERE user_id = ?1 AND next_attempt_at <= ?2
                 ORDER BY created_at ASC
                 LIMIT ?3",
            )?;

            let mut rows = stmt.query(params![
                user_id,
                format_datetime(&now),
                i64::try_from(limit).unwrap_or(i64::MAX)
            ])?;
            let mut items = Vec::new();
            while let Some(row) = rows.next()? {
                items.push(row_to_item(row)?);
            }
            Ok(items)
        })
        .await
    }

    pub async fn reschedule_outbox(
        &self,
        id: &str,
        attempts: u32,
        next_attempt_at: DateTime<Utc>,
        last_error: &str,
    ) -> Result<()> {
        let id = id.to_string();
        let last_error = last_error.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE session_outbox
                 SET attempts = ?1,
                     next_attempt_at = ?2,
                     last_error = ?3
                 WHERE id = ?4",
                params![
                    i64::from(attempts),
                    format_datetime(&next_attempt_at),
                    last_error,
                    id
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn delete_outbox(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.execute(move |conn| {
            conn.execute("DELETE FROM session_outbox WHERE id = ?1", params![id])?;
            Ok(())
        })
        .await
    }

    pub async fn count_outbox(&self, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM session_outbox WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
        .await
    }
}
