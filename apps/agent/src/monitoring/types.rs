use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Built-in fallback interval when no level of the config cascade sets one.
pub const DEFAULT_INTERVAL_MS: u64 = 30_000;
/// Built-in fallback probe timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

fn default_method() -> String {
    "GET".to_string()
}

fn default_expected_status() -> u16 {
    200
}

/// Type-specific probe configuration, one variant per supported runtime kind.
///
/// Closed set: adding a kind means adding a variant, and every dispatch site
/// is an exhaustive match.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TargetSpec {
    Http {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(rename = "expectedStatus", default = "default_expected_status")]
        expected_status: u16,
        #[serde(default)]
        headers: HashMap<String, String>,
    },
    Tcp {
        host: String,
        port: u16,
    },
    Process {
        #[serde(rename = "match")]
        pattern: String,
    },
    Docker {
        container: String,
    },
    Command {
        command: String,
        #[serde(rename = "successExitCode", default)]
        success_exit_code: i32,
    },
}

impl TargetSpec {
    /// Short label for logs and status output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http { .. } => "http",
            Self::Tcp { .. } => "tcp",
            Self::Process { .. } => "process",
            Self::Docker { .. } => "docker",
            Self::Command { .. } => "command",
        }
    }
}

/// Immutable snapshot of one monitored runtime.
///
/// A config load produces a fresh set of these; they are never mutated in
/// place, so a reload swaps the whole set.
#[derive(Debug, Clone)]
pub struct ResolvedTarget {
    pub project_id: String,
    pub project_path: PathBuf,
    pub project_name: String,
    pub name: String,
    pub spec: TargetSpec,
    pub interval_ms: u64,
    pub timeout_ms: u64,
    pub enabled: bool,
}

impl ResolvedTarget {
    /// Scheduler key: unique per (project, runtime) pair.
    pub fn key(&self) -> String {
        format!("{}:{}", self.project_path.display(), self.name)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outcome of a single probe.
///
/// Only ever built through [`HealthCheckResult::healthy`] /
/// [`HealthCheckResult::unhealthy`], so a result is always complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResult {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,

    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    pub fn healthy(response_time_ms: u64) -> Self {
        Self {
            success: true,
            response_time_ms: Some(response_time_ms),
            status_code: None,
            error_message: None,
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response_time_ms: None,
            status_code: None,
            error_message: Some(error.into()),
            metadata: serde_json::Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_status_code(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_response_time(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}
