use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the agent's own configuration.
///
/// Per-project files are deliberately *not* covered here: a broken project
/// file skips that project and is never fatal (see [`crate::resolver`]).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),

    #[error("No usable config path (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
}

/// Errors raised by daemon lifecycle operations.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("Failed to access PID file {path}: {source}")]
    PidFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] std::io::Error),
}

/// Errors raised by the durable event queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Failed to access queue file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Queue file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
}
