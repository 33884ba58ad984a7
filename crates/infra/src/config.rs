//! Runtime configuration, read from the environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `DATA_DIR` | `./data` | Directory holding `event_store.db` and `read_model.db` |
//! | `POLL_INTERVAL_MS` | `250` | Projector sleep between cycles |

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_DATA_DIR: &str = "./data";
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 250;

const EVENT_STORE_FILE: &str = "event_store.db";
const READ_MODEL_FILE: &str = "read_model.db";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer number of milliseconds, got {value:?}")]
    InvalidInterval { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    pub data_dir: PathBuf,
    pub poll_interval: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (used by `from_env` and tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(dir) = lookup("DATA_DIR").filter(|d| !d.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir);
        }

        if let Some(raw) = lookup("POLL_INTERVAL_MS") {
            let invalid = || ConfigError::InvalidInterval {
                name: "POLL_INTERVAL_MS",
                value: raw.clone(),
            };
            let millis: u64 = raw.trim().parse().map_err(|_| invalid())?;
            if millis == 0 {
                return Err(invalid());
            }
            config.poll_interval = Duration::from_millis(millis);
        }

        Ok(config)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn event_store_path(&self) -> PathBuf {
        self.data_dir.join(EVENT_STORE_FILE)
    }

    pub fn read_model_path(&self) -> PathBuf {
        self.data_dir.join(READ_MODEL_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<LedgerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        LedgerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg, LedgerConfig::default());
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.event_store_path(), PathBuf::from("./data/event_store.db"));
        assert_eq!(cfg.read_model_path(), PathBuf::from("./data/read_model.db"));
    }

    #[test]
    fn overrides_are_read() {
        let cfg = config(&[("DATA_DIR", "/var/lib/ledger"), ("POLL_INTERVAL_MS", "1000")]).unwrap();
        assert_eq!(cfg.data_dir(), Path::new("/var/lib/ledger"));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn zero_or_garbage_interval_is_rejected() {
        for bad in ["0", "-5", "fast", ""] {
            assert!(config(&[("POLL_INTERVAL_MS", bad)]).is_err(), "accepted {bad:?}");
        }
    }
}
