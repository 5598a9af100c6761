use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::db::{
    helpers::{format_datetime, parse_datetime, to_i64, to_u64},
    Database,
};
use crate::recorder::SessionRecord;

fn row_to_record(row: &Row) -> Result<SessionRecord> {
    let kind: String = row.get("kind")?;
    let duration_secs: i64 = row.get("duration_secs")?;
    let started_at: String = row.get("started_at")?;
    let completed_at: String = row.get("completed_at")?;
    let settings_json: String = row.get("settings_json")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        kind: kind.parse()?,
        duration: to_u64(duration_secs, "duration_secs")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        completed_at: parse_datetime(&completed_at, "completed_at")?,
        settings: serde_json::from_str(&settings_json).context("malformed settings_json")?,
    })
}

fn insert_record(conn: &Connection, user_id: &str, record: &SessionRecord, cached_at: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO session_cache
             (id, user_id, kind, duration_secs, started_at, completed_at, settings_json, cached_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            record.id,
            user_id,
            record.kind.as_str(),
            to_i64(record.duration)?,
            format_datetime(&record.started_at),
            format_datetime(&record.completed_at),
            serde_json::to_string(&record.settings)?,
            cached_at,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Cached records for `user_id`, newest first. Rows that no longer
    /// parse are skipped rather than failing the whole read.
    pub async fn load_cached_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, kind, duration_secs, started_at, completed_at, settings_json
                 FROM session_cache
                 WHERE user_id = ?1
                 ORDER BY completed_at DESC, id DESC",
            )?;

            let mut rows = stmt.query(params![user_id])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                match row_to_record(row) {
                    Ok(record) => records.push(record),
                    Err(err) => log::warn!("Skipping unreadable cached session: {err:#}"),
                }
            }
            Ok(records)
        })
        .await
    }

    /// Add one freshly written record. Already-cached ids are left alone.
    pub async fn cache_session(&self, user_id: &str, record: &SessionRecord) -> Result<()> {
        let user_id = user_id.to_string();
        let record = record.clone();
        self.execute(move |conn| {
            insert_record(conn, &user_id, &record, &format_datetime(&Utc::now()))
        })
        .await
    }

    /// Replace the whole cache for `user_id` with the remote contents.
    pub async fn replace_cached_sessions(
        &self,
        user_id: &str,
        records: Vec<SessionRecord>,
    ) -> Result<()> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "DELETE FROM session_cache WHERE user_id = ?1",
                params![user_id],
            )?;
            let cached_at = format_datetime(&Utc::now());
            for record in &records {
                insert_record(&tx, &user_id, record, &cached_at)?;
            }
            tx.commit().context("failed to commit session cache replacement")?;
            Ok(())
        })
        .await
    }
}
