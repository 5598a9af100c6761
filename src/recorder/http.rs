use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::warn;
use reqwest::{Client, Url};
use serde::Deserialize;
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session_log::{sort_newest_first, SessionEntry, SessionLog, SessionRecord};

const POLL_INTERVAL: Duration = Duration::from_secs(15);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct Created {
    id: String,
}

/// Session log behind a REST document store:
/// `POST {base}/users/{user}/sessions` appends, `GET` on the same path
/// lists. Live updates are delivered by polling.
#[derive(Clone)]
pub struct HttpSessionLog {
    client: Client,
    base_url: Url,
}

impl HttpSessionLog {
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url =
            Url::parse(base_url).with_context(|| format!("invalid session log URL '{base_url}'"))?;
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, base_url })
    }

    fn sessions_url(&self, user_id: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("session log URL cannot be a base"))?
            .pop_if_empty()
            .extend(["users", user_id, "sessions"]);
        Ok(url)
    }
}

#[async_trait]
impl SessionLog for HttpSessionLog {
    async fn append(&self, user_id: &str, entry: &SessionEntry) -> Result<String> {
        let created: Created = self
            .client
            .post(self.sessions_url(user_id)?)
            .json(entry)
            .send()
            .await
            .context("session log append request failed")?
            .error_for_status()
            .context("session log rejected append")?
            .json()
            .await
            .context("session log returned malformed append response")?;
        Ok(created.id)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<SessionRecord>> {
        let mut records: Vec<SessionRecord> = self
            .client
            .get(self.sessions_url(user_id)?)
            .send()
            .await
            .context("session log list request failed")?
            .error_for_status()
            .context("session log rejected list")?
            .json()
            .await
            .context("session log returned malformed list")?;
        sort_newest_first(&mut records);
        Ok(records)
    }

    async fn watch(
        &self,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<Vec<SessionRecord>>> {
        let (tx, rx) = mpsc::channel(8);
        let log = self.clone();
        let user_id = user_id.to_string();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(POLL_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut last: Option<Vec<SessionRecord>> = None;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match log.list(&user_id).await {
                            Ok(records) => {
                                if last.as_ref() == Some(&records) {
                                    continue;
                                }
                                last = Some(records.clone());
                                if tx.send(records).await.is_err() {
                                    break;
                                }
                            }
                            Err(err) => warn!("Session log poll failed: {err:#}"),
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
