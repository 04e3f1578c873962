use std::path::PathBuf;
use std::time::Duration;

use crate::engine::SchedulerConfig;
use crate::limits::*;

const WAL_FILE_NAME: &str = "timetable.wal";

/// Process configuration, read once from `TIMETABLE_*` environment variables.
/// Missing or unparseable values fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub data_dir: PathBuf,
    pub lock_timeout: Duration,
    pub metrics_port: Option<u16>,
    /// Compact the log once this many records were appended since the last compaction.
    pub compact_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            metrics_port: None,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            data_dir: lookup("TIMETABLE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            lock_timeout: lookup("TIMETABLE_LOCK_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            metrics_port: lookup("TIMETABLE_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: lookup("TIMETABLE_COMPACT_THRESHOLD")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.compact_threshold),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join(WAL_FILE_NAME)
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            lock_timeout: self.lock_timeout,
            ..SchedulerConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(lookup(&[]));
        assert_eq!(config, Config::default());
        assert_eq!(config.lock_timeout, Duration::from_secs(5));
        assert_eq!(config.wal_path(), PathBuf::from("./data/timetable.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("TIMETABLE_DATA_DIR", "/var/lib/timetable"),
            ("TIMETABLE_LOCK_TIMEOUT_MS", "250"),
            ("TIMETABLE_METRICS_PORT", "9100"),
            ("TIMETABLE_COMPACT_THRESHOLD", "50"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/timetable"));
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.metrics_port, Some(9100));
        assert_eq!(config.compact_threshold, 50);
        assert_eq!(config.scheduler_config().lock_timeout, Duration::from_millis(250));
    }

    #[test]
    fn garbage_falls_back() {
        let config = Config::from_lookup(lookup(&[
            ("TIMETABLE_LOCK_TIMEOUT_MS", "soon"),
            ("TIMETABLE_METRICS_PORT", "70000"),
        ]));
        assert_eq!(config.lock_timeout, Config::default().lock_timeout);
        assert_eq!(config.metrics_port, None);
    }
}
