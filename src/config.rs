//! Configuration loaded from ~/.tieloop/config.yaml.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsl::ast::Params;
use crate::dsl::parser::MAX_TEMPO;
use crate::event::SchedulerSettings;
use crate::output::HardwareConnector;

/// Errors reading an explicitly named config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Player configuration. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Tempo before a score sets one.
    pub bpm: u32,
    /// Gate fraction before a score sets one, 0–1.
    pub gate: f64,
    pub velocity: u8,
    /// Scheduler tick period in microseconds.
    pub tick_micros: u64,
    /// Serial device paths of CV modules; empty scans every serial port.
    pub cv_ports: Vec<PathBuf>,
    pub midi_client_name: String,
    /// Filter used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub log_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let params = Params::default();
        Self {
            bpm: params.tempo,
            gate: params.gate,
            velocity: params.velocity,
            tick_micros: 10,
            cv_ports: Vec::new(),
            midi_client_name: "tieloop".to_string(),
            log_filter: "info".to_string(),
            log_file: PathBuf::from("tieloop.log"),
        }
    }
}

impl Config {
    /// The standard config path.
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::home_dir()?.join(".tieloop").join("config.yaml"))
    }

    /// Load config from the standard path (~/.tieloop/config.yaml).
    /// Returns None if the file doesn't exist or doesn't parse.
    pub fn load() -> Option<Self> {
        let content = std::fs::read_to_string(Self::default_path()?).ok()?;
        serde_yaml::from_str(&content).ok()
    }

    /// Load config from an explicit path.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Document defaults for the compiler.
    pub fn defaults(&self) -> Params {
        Params {
            tempo: self.bpm.clamp(1, MAX_TEMPO),
            gate: self.gate.clamp(0.0, 1.0),
            velocity: self.velocity.min(127),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick: Duration::from_micros(self.tick_micros.max(1)),
            defaults: self.defaults(),
        }
    }

    pub fn connector(&self) -> HardwareConnector {
        HardwareConnector::new(self.cv_ports.clone(), self.midi_client_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.bpm, 120);
        assert_eq!(config.gate, 0.95);
        assert_eq!(config.velocity, 120);
        assert_eq!(config.tick_micros, 10);
        assert!(config.cv_ports.is_empty());
        assert_eq!(config.log_file, PathBuf::from("tieloop.log"));
    }

    #[test]
    fn serialize_deserialize() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let yaml = r#"
bpm: 90
cv_ports:
  - /dev/ttyACM0
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bpm, 90);
        assert_eq!(config.cv_ports, vec![PathBuf::from("/dev/ttyACM0")]);
        assert_eq!(config.midi_client_name, "tieloop");
        assert_eq!(config.defaults().tempo, 90);

        let fast: Config = serde_yaml::from_str("bpm: 90000").unwrap();
        assert_eq!(fast.defaults().tempo, MAX_TEMPO);
    }

    #[test]
    fn from_path_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "gate: 0.5\ntick_micros: 250").unwrap();
        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.gate, 0.5);
        assert_eq!(
            config.scheduler_settings().tick,
            Duration::from_micros(250)
        );
    }

    #[test]
    fn from_path_reports_errors() {
        let missing = Config::from_path(Path::new("/nonexistent/tieloop.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bpm: [not, a, number]").unwrap();
        assert!(matches!(
            Config::from_path(file.path()),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn defaults_are_clamped() {
        let config = Config {
            bpm: 0,
            gate: 3.0,
            velocity: 200,
            ..Config::default()
        };
        let params = config.defaults();
        assert_eq!(params.tempo, 1);
        assert_eq!(params.gate, 1.0);
        assert_eq!(params.velocity, 127);
    }

    #[test]
    fn load_missing_file_returns_none() {
        // can't guarantee the file is absent, just that this doesn't panic
        let _ = Config::load();
    }
}
