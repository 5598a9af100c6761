use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};

pub const DATA_DIR_VAR: &str = "FOCUSTIMER_DATA_DIR";
pub const USER_VAR: &str = "FOCUSTIMER_USER";
pub const REMOTE_URL_VAR: &str = "FOCUSTIMER_REMOTE_URL";
pub const DEBUG_VAR: &str = "FOCUSTIMER_DEBUG";
pub const TICK_MS_VAR: &str = "FOCUSTIMER_TICK_MS";

const DEFAULT_DATA_DIR: &str = ".focustimer";
const DEFAULT_USER: &str = "local";
const DEFAULT_TICK_MS: u64 = 1000;

pub const SETTINGS_KEY: &str = "settings";
pub const TIMER_KEY: &str = "timer";
pub const DATABASE_FILE: &str = "focustimer.sqlite3";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub user_id: String,
    /// Base URL of the remote session log. `None` keeps history in memory.
    pub remote_url: Option<String>,
    pub debug: bool,
    pub tick_interval: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            user_id: DEFAULT_USER.to_string(),
            remote_url: None,
            debug: false,
            tick_interval: Duration::from_millis(DEFAULT_TICK_MS),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        let tick_interval = match non_empty(TICK_MS_VAR) {
            Some(raw) => {
                let millis: u64 = raw
                    .parse()
                    .with_context(|| format!("{TICK_MS_VAR} must be a whole number of ms, got '{raw}'"))?;
                Duration::from_millis(millis.max(1))
            }
            None => defaults.tick_interval,
        };

        Ok(Self {
            data_dir: non_empty(DATA_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            user_id: non_empty(USER_VAR).unwrap_or(defaults.user_id),
            remote_url: non_empty(REMOTE_URL_VAR),
            debug: non_empty(DEBUG_VAR)
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            tick_interval,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(DATABASE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(config(&[]).unwrap(), AppConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let cfg = config(&[
            (DATA_DIR_VAR, "/tmp/ft"),
            (USER_VAR, "ada"),
            (REMOTE_URL_VAR, "https://log.example.com"),
            (DEBUG_VAR, "TRUE"),
            (TICK_MS_VAR, "50"),
        ])
        .unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/tmp/ft"));
        assert_eq!(cfg.user_id, "ada");
        assert_eq!(cfg.remote_url.as_deref(), Some("https://log.example.com"));
        assert!(cfg.debug);
        assert_eq!(cfg.tick_interval, Duration::from_millis(50));
        assert_eq!(cfg.database_path(), PathBuf::from("/tmp/ft/focustimer.sqlite3"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let cfg = config(&[(USER_VAR, "  "), (REMOTE_URL_VAR, "")]).unwrap();
        assert_eq!(cfg.user_id, "local");
        assert!(cfg.remote_url.is_none());
    }

    #[test]
    fn bad_tick_interval_is_an_error() {
        assert!(config(&[(TICK_MS_VAR, "fast")]).is_err());
    }
}
