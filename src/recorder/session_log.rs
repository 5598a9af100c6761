use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::settings::Settings;
use crate::timer::{CompletedPhase, TimerMode};

/// Body appended to the remote log for one completed phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    #[serde(rename = "type")]
    pub kind: TimerMode,
    /// Seconds, as configured when the phase began.
    pub duration: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub settings: Settings,
}

impl From<&CompletedPhase> for SessionEntry {
    fn from(phase: &CompletedPhase) -> Self {
        Self {
            kind: phase.mode,
            duration: phase.duration_secs,
            started_at: phase.started_at,
            completed_at: phase.completed_at,
            settings: phase.settings,
        }
    }
}

/// An entry once the remote log has assigned it an id. Immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TimerMode,
    pub duration: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub settings: Settings,
}

impl SessionRecord {
    pub fn from_entry(id: String, entry: SessionEntry) -> Self {
        Self {
            id,
            kind: entry.kind,
            duration: entry.duration,
            started_at: entry.started_at,
            completed_at: entry.completed_at,
            settings: entry.settings,
        }
    }
}

/// Newest first, ties broken by id so the order is stable.
pub fn sort_newest_first(records: &mut [SessionRecord]) {
    records.sort_by(|a, b| {
        b.completed_at
            .cmp(&a.completed_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}

/// Append-only, per-user log of completed phases.
#[async_trait]
pub trait SessionLog: Send + Sync {
    /// Append and return the id the log assigned.
    async fn append(&self, user_id: &str, entry: &SessionEntry) -> Result<String>;

    /// Full log for `user_id`, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>>;

    /// Stream of full log contents, one item per observed change, until
    /// `cancel` fires.
    async fn watch(
        &self,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Vec<SessionRecord>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, minute: u32) -> SessionRecord {
        let completed = Utc.with_ymd_and_hms(2024, 2, 2, 10, minute, 0).unwrap();
        SessionRecord {
            id: id.into(),
            kind: TimerMode::Focus,
            duration: 60,
            started_at: completed - chrono::Duration::seconds(60),
            completed_at: completed,
            settings: Settings::default(),
        }
    }

    #[test]
    fn wire_format_uses_type_and_camel_case() {
        let entry = SessionEntry {
            kind: TimerMode::ShortBreak,
            duration: 300,
            started_at: Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, 0).unwrap(),
            completed_at: Utc.with_ymd_and_hms(2024, 2, 2, 10, 5, 0).unwrap(),
            settings: Settings::default(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["type"], "shortBreak");
        assert_eq!(json["duration"], 300);
        assert!(json.get("startedAt").is_some());
        assert!(json.get("completedAt").is_some());
        assert_eq!(json["settings"]["shortBreakMinutes"], 5);
    }

    #[test]
    fn sorting_puts_latest_first() {
        let mut records = vec![record("a", 1), record("c", 30), record("b", 15)];
        sort_newest_first(&mut records);
        let ids: Vec<_> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, ["c", "b", "a"]);
    }
}
