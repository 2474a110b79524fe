use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::engine::history::DEFAULT_QUEUE_CAPACITY;
use crate::recording::DEFAULT_SAMPLE_INTERVAL;
use crate::system::collector::DEFAULT_MAX_WORKERS;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub intervals: IntervalsConfig,
    pub collector: CollectorConfig,
    pub alerts: AlertsConfig,
    pub history: HistoryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// SQLite file for alerts, sessions and history. Empty disables persistence.
    pub database_path: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            database_path: "monitor.db".to_string(),
        }
    }
}

impl GeneralConfig {
    pub fn database_path(&self) -> Option<PathBuf> {
        let trimmed = self.database_path.trim();
        (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub cpu_ms: u64,
    pub memory_ms: u64,
    pub processes_ms: u64,
    pub recording_sample_ms: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        IntervalsConfig {
            cpu_ms: 1000,
            memory_ms: 3000,
            processes_ms: 5000,
            recording_sample_ms: DEFAULT_SAMPLE_INTERVAL.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub max_workers: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            max_workers: DEFAULT_MAX_WORKERS,
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub queue_capacity: usize,
    pub retention_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        HistoryConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retention_days: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Runtime knobs the engine needs, resolved from [`Config`].
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub cpu_interval: Duration,
    pub memory_interval: Duration,
    pub processes_interval: Duration,
    pub recording_interval: Duration,
    pub max_workers: usize,
    pub history_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig::from_config(&Config::default())
    }
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        let ms = |v: u64| Duration::from_millis(v.max(1));
        EngineConfig {
            cpu_interval: ms(config.intervals.cpu_ms),
            memory_interval: ms(config.intervals.memory_ms),
            processes_interval: ms(config.intervals.processes_ms),
            recording_interval: ms(config.intervals.recording_sample_ms),
            max_workers: config.collector.max_workers.max(1),
            history_queue_capacity: config.history.queue_capacity.max(1),
        }
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("hostpulse").join("config.toml"))
}

pub fn load_config() -> Config {
    match config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Config::default(),
    }
}

/// Reads `path`, falling back to defaults when it is missing or malformed.
/// A malformed file is ignored as a whole, never merged field by field.
pub fn load_config_from_path(path: &Path) -> Config {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            debug!("no config at {}: {err}", path.display());
            return Config::default();
        }
    };
    match toml::from_str(&contents) {
        Ok(config) => config,
        Err(err) => {
            warn!("ignoring malformed config {}: {err}", path.display());
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = Config::default();
        assert_eq!(config.general.database_path, "monitor.db");
        assert_eq!(config.intervals.cpu_ms, 1000);
        assert_eq!(config.intervals.memory_ms, 3000);
        assert_eq!(config.intervals.processes_ms, 5000);
        assert_eq!(config.intervals.recording_sample_ms, 2000);
        assert_eq!(config.collector.max_workers, 10);
        assert_eq!(config.alerts.cpu_threshold, 0.0);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn parse_partial_toml() {
        let toml_str = r#"
[intervals]
cpu_ms = 500
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.intervals.cpu_ms, 500);
        // Other fields should be defaults
        assert_eq!(config.intervals.memory_ms, 3000);
        assert_eq!(config.history.queue_capacity, 64);
    }

    #[test]
    fn parse_full_toml() {
        let toml_str = r#"
[general]
database_path = "/var/lib/hostpulse/metrics.db"

[intervals]
cpu_ms = 250
memory_ms = 750
processes_ms = 1500
recording_sample_ms = 1000

[collector]
max_workers = 4

[alerts]
cpu_threshold = 70.0
memory_threshold = 80.5

[history]
queue_capacity = 8
retention_days = 14

[logging]
level = "debug"
json = true
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.general.database_path(),
            Some(PathBuf::from("/var/lib/hostpulse/metrics.db"))
        );
        assert_eq!(config.collector.max_workers, 4);
        assert!((config.alerts.memory_threshold - 80.5).abs() < f64::EPSILON);
        assert_eq!(config.history.retention_days, 14);
        assert!(config.logging.json);

        let engine = EngineConfig::from_config(&config);
        assert_eq!(engine.cpu_interval, Duration::from_millis(250));
        assert_eq!(engine.recording_interval, Duration::from_secs(1));
        assert_eq!(engine.history_queue_capacity, 8);
    }

    #[test]
    fn empty_database_path_disables_persistence() {
        let config: Config = toml::from_str("[general]\ndatabase_path = \"  \"\n").unwrap();
        assert_eq!(config.general.database_path(), None);
    }

    #[test]
    fn zero_values_are_clamped() {
        let config: Config =
            toml::from_str("[intervals]\ncpu_ms = 0\n[collector]\nmax_workers = 0\n").unwrap();
        let engine = EngineConfig::from_config(&config);
        assert_eq!(engine.cpu_interval, Duration::from_millis(1));
        assert_eq!(engine.max_workers, 1);
    }

    #[test]
    fn missing_file_keeps_persistence_and_default_cadence() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from_path(&dir.path().join("config.toml"));
        assert_eq!(
            config.general.database_path(),
            Some(PathBuf::from("monitor.db"))
        );

        let engine = EngineConfig::from_config(&config);
        assert_eq!(engine.memory_interval, Duration::from_secs(3));
        assert_eq!(engine.recording_interval, DEFAULT_SAMPLE_INTERVAL);
    }

    #[test]
    fn mistyped_file_is_ignored_as_a_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[general]\ndatabase_path = \"\"\n[alerts]\ncpu_threshold = \"high\"\n",
        )
        .unwrap();

        let config = load_config_from_path(&path);
        // The valid `database_path` line is not applied either.
        assert!(config.general.database_path().is_some());
        assert_eq!(config.alerts.cpu_threshold, 0.0);
    }
}
