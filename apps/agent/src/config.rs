use std::{env, fs, path};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Agent-global configuration.
///
/// Covers everything that is not per-project: the control-plane endpoint,
/// default probe cadence, the registered project directories, and the paths
/// the daemon owns (PID file, queue file).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: Api,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub projects: Vec<Project>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    pub base_url: String,
    /// Bearer token; reporting is skipped entirely when unset.
    pub token: Option<String>,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    pub interval: String,
    pub timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    pub pid_file: path::PathBuf,
    /// Poll cadence of the config-file watcher, in milliseconds.
    pub watch_poll_ms: u64,
    /// Quiet window after the last config change before a reload fires.
    pub debounce_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub path: path::PathBuf,
    pub max_events: usize,
}

/// One registered project directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub path: path::PathBuf,
}

impl Default for Api {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8710".to_string(),
            token: None,
            timeout: "10s".to_string(),
        }
    }
}

impl Default for Defaults {
    fn default() -> Self {
        Self { interval: "30s".to_string(), timeout: "5s".to_string() }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pid_file: state_dir().join("vigil-agent.pid"),
            watch_poll_ms: 500,
            debounce_ms: 1_000,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { path: state_dir().join("queue.json"), max_events: 1_000 }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api: Api::default(),
            defaults: Defaults::default(),
            daemon: DaemonConfig::default(),
            queue: QueueConfig::default(),
            projects: Vec::new(),
        }
    }
}

/// State directory for files the agent owns ($XDG_STATE_HOME/vigil or
/// $HOME/.local/state/vigil, /tmp/vigil as a last resort).
fn state_dir() -> path::PathBuf {
    if let Ok(state_home) = env::var("XDG_STATE_HOME") {
        path::PathBuf::from(state_home).join("vigil")
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".local/state/vigil")
    } else {
        path::PathBuf::from("/tmp/vigil")
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl Config {
    /// Generate Config structure from file.
    ///
    /// Creates a default config in ~/.config/vigil/config.toml or the
    /// specified path, with the name config.toml, if one does not exist.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|err| ConfigError::ReadFailed { path: config_path.clone(), source: err })?;
            toml::from_str(raw_string.as_str())
                .map_err(|err| ConfigError::ParseFailed { path: config_path, source: err })
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Serialize and write a config to a file.
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|err| ConfigError::WriteFailed { path: path.to_path_buf(), source: err })?;
        }

        fs::write(path, config_str)
            .map_err(|err| ConfigError::WriteFailed { path: path.to_path_buf(), source: err })
    }

    /// Directories the daemon watches for config edits: every registered
    /// project directory.
    pub fn watched_dirs(&self) -> Vec<path::PathBuf> {
        self.projects.iter().map(|p| p.path.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let raw = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&raw).unwrap();
        assert_eq!(parsed.queue.max_events, 1_000);
        assert_eq!(parsed.daemon.debounce_ms, 1_000);
        assert!(parsed.projects.is_empty());
    }

    #[test]
    fn from_config_writes_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::from_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.defaults.interval, "30s");

        // Second read parses the file we just wrote.
        let again = Config::from_config(Some(&path)).unwrap();
        assert_eq!(again.api.base_url, config.api.base_url);
    }

    #[test]
    fn non_toml_extension_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        Config::from_config(Some(&path)).unwrap();
        assert!(dir.path().join("config.toml").exists());
    }
}
