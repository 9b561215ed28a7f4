//! Resolves registered project directories into a flat list of
//! [`ResolvedTarget`]s.
//!
//! A pure read of filesystem state: a project whose `vigil.yaml` is missing,
//! unreadable, or malformed is skipped with a warning, never fatal.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::{Config, Project};
use crate::monitoring::scheduler::TargetLoader;
use crate::monitoring::types::{
    DEFAULT_INTERVAL_MS, DEFAULT_TIMEOUT_MS, ResolvedTarget, TargetSpec,
};

/// Name of the per-project target definition file.
pub const PROJECT_FILE: &str = "vigil.yaml";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectFile {
    name: Option<String>,
    defaults: Option<ProjectDefaults>,
    #[serde(default)]
    runtimes: Vec<RuntimeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectDefaults {
    interval: Option<String>,
    timeout: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeEntry {
    name: String,
    #[serde(flatten)]
    spec: TargetSpec,
    interval: Option<String>,
    timeout: Option<String>,
    #[serde(default = "enabled_default")]
    enabled: bool,
}

fn enabled_default() -> bool {
    true
}

/// Resolve a human-readable duration string to milliseconds.
///
/// Scans left-to-right for `<digits><unit>` tokens (`ms`, `s`, `m`, `h`, `d`)
/// and sums them; anything else is ignored. `"1h30m"` is 5_400_000, an empty
/// or fully-unmatched string is 0.
pub fn parse_duration_ms(input: &str) -> u64 {
    let bytes = input.as_bytes();
    let mut total: u64 = 0;
    let mut i = 0;

    while i < bytes.len() {
        if !bytes[i].is_ascii_digit() {
            i += 1;
            continue;
        }

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        // Digit run is ASCII by construction.
        let value: u64 = match input[start..i].parse() {
            Ok(v) => v,
            Err(_) => continue,
        };

        let rest = &bytes[i..];
        let (multiplier, unit_len) = if rest.starts_with(b"ms") {
            (1, 2)
        } else if rest.starts_with(b"s") {
            (1_000, 1)
        } else if rest.starts_with(b"m") {
            (60_000, 1)
        } else if rest.starts_with(b"h") {
            (3_600_000, 1)
        } else if rest.starts_with(b"d") {
            (86_400_000, 1)
        } else {
            // Bare number with no unit: not a token, ignore it.
            continue;
        };

        total = total.saturating_add(value.saturating_mul(multiplier));
        i += unit_len;
    }

    total
}

/// First non-empty duration string in the cascade, resolved to milliseconds;
/// the built-in default when every level is unset or resolves to 0.
fn resolve_cascade(levels: &[Option<&str>], builtin_ms: u64) -> u64 {
    for level in levels {
        if let Some(raw) = level {
            if !raw.trim().is_empty() {
                let ms = parse_duration_ms(raw);
                return if ms == 0 { builtin_ms } else { ms };
            }
        }
    }
    builtin_ms
}

/// Reads per-project target definitions and produces resolved targets.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config: Config,
}

impl ConfigResolver {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Resolve every registered project into targets. Never fails; broken
    /// projects are skipped.
    pub fn resolve(&self) -> Vec<ResolvedTarget> {
        let mut targets = Vec::new();
        for project in &self.config.projects {
            match self.resolve_project(project) {
                Ok(mut project_targets) => targets.append(&mut project_targets),
                Err(reason) => {
                    tracing::warn!(
                        project = %project.id,
                        path = %project.path.display(),
                        "Skipping project: {reason}"
                    );
                }
            }
        }
        targets
    }

    fn resolve_project(&self, project: &Project) -> Result<Vec<ResolvedTarget>, String> {
        let file_path = project.path.join(PROJECT_FILE);
        let raw = fs::read_to_string(&file_path)
            .map_err(|e| format!("cannot read {}: {e}", file_path.display()))?;
        let parsed: ProjectFile = serde_yaml::from_str(&raw)
            .map_err(|e| format!("cannot parse {}: {e}", file_path.display()))?;

        let project_name = parsed
            .name
            .unwrap_or_else(|| dir_name(&project.path));
        let defaults = parsed.defaults.unwrap_or(ProjectDefaults { interval: None, timeout: None });

        let targets = parsed
            .runtimes
            .into_iter()
            .map(|entry| {
                let interval_ms = resolve_cascade(
                    &[
                        entry.interval.as_deref(),
                        defaults.interval.as_deref(),
                        Some(self.config.defaults.interval.as_str()),
                    ],
                    DEFAULT_INTERVAL_MS,
                );
                let timeout_ms = resolve_cascade(
                    &[
                        entry.timeout.as_deref(),
                        defaults.timeout.as_deref(),
                        Some(self.config.defaults.timeout.as_str()),
                    ],
                    DEFAULT_TIMEOUT_MS,
                );
                ResolvedTarget {
                    project_id: project.id.clone(),
                    project_path: project.path.clone(),
                    project_name: project_name.clone(),
                    name: entry.name,
                    spec: entry.spec,
                    interval_ms,
                    timeout_ms,
                    enabled: entry.enabled,
                }
            })
            .collect();

        Ok(targets)
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[async_trait]
impl TargetLoader for ConfigResolver {
    async fn load(&self) -> Vec<ResolvedTarget> {
        self.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Defaults, Project};
    use std::path::PathBuf;

    #[test]
    fn parse_duration_sums_tokens() {
        assert_eq!(parse_duration_ms("1h30m"), 5_400_000);
        assert_eq!(parse_duration_ms("30s"), 30_000);
        assert_eq!(parse_duration_ms(""), 0);
        assert_eq!(parse_duration_ms("250ms"), 250);
        assert_eq!(parse_duration_ms("1d"), 86_400_000);
        assert_eq!(parse_duration_ms("2m30s"), 150_000);
    }

    #[test]
    fn parse_duration_ignores_unmatched_text() {
        assert_eq!(parse_duration_ms("every 5m or so"), 300_000);
        assert_eq!(parse_duration_ms("soon"), 0);
        assert_eq!(parse_duration_ms("42"), 0);
        assert_eq!(parse_duration_ms("10x5s"), 5_000);
    }

    #[test]
    fn cascade_prefers_most_specific_level() {
        assert_eq!(resolve_cascade(&[Some("10s"), Some("1m"), Some("30s")], 30_000), 10_000);
        assert_eq!(resolve_cascade(&[None, Some("1m"), Some("30s")], 30_000), 60_000);
        assert_eq!(resolve_cascade(&[None, None, None], 30_000), 30_000);
        // A level that resolves to 0 falls back to the built-in.
        assert_eq!(resolve_cascade(&[Some("bogus"), Some("1m")], 30_000), 30_000);
    }

    fn write_project(dir: &Path, yaml: &str) -> Project {
        fs::write(dir.join(PROJECT_FILE), yaml).unwrap();
        Project { id: "p1".to_string(), path: dir.to_path_buf() }
    }

    fn resolver_for(projects: Vec<Project>) -> ConfigResolver {
        let mut config = Config::default();
        config.defaults = Defaults { interval: "30s".to_string(), timeout: "5s".to_string() };
        config.projects = projects;
        ConfigResolver::new(config)
    }

    #[test]
    fn resolves_runtimes_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let project = write_project(
            dir.path(),
            concat!(
                "name: shop\n",
                "defaults:\n",
                "  interval: 1m\n",
                "runtimes:\n",
                "  - name: web\n",
                "    type: http\n",
                "    url: https://shop.example/health\n",
                "    timeout: 2s\n",
                "  - name: db\n",
                "    type: tcp\n",
                "    host: localhost\n",
                "    port: 5432\n",
                "    enabled: false\n",
            ),
        );
        let targets = resolver_for(vec![project]).resolve();
        assert_eq!(targets.len(), 2);

        let web = &targets[0];
        assert_eq!(web.project_name, "shop");
        assert_eq!(web.interval_ms, 60_000); // project default
        assert_eq!(web.timeout_ms, 2_000); // target override
        assert!(web.enabled);

        let db = &targets[1];
        assert_eq!(db.interval_ms, 60_000);
        assert_eq!(db.timeout_ms, 5_000); // global default
        assert!(!db.enabled);
    }

    #[test]
    fn broken_project_is_skipped_not_fatal() {
        let good = tempfile::tempdir().unwrap();
        let bad = tempfile::tempdir().unwrap();
        let missing = tempfile::tempdir().unwrap();

        let good_project = write_project(
            good.path(),
            "runtimes:\n  - name: api\n    type: tcp\n    host: localhost\n    port: 80\n",
        );
        fs::write(bad.path().join(PROJECT_FILE), ": not yaml {{{").unwrap();

        let targets = resolver_for(vec![
            good_project,
            Project { id: "bad".to_string(), path: bad.path().to_path_buf() },
            Project { id: "missing".to_string(), path: missing.path().to_path_buf() },
        ])
        .resolve();

        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].name, "api");
        // Name falls back to the directory name when the file omits it.
        assert_eq!(targets[0].project_name, dir_name(good.path()));
    }

    #[test]
    fn key_is_stable_per_project_and_name() {
        let target = ResolvedTarget {
            project_id: "p".to_string(),
            project_path: PathBuf::from("/srv/shop"),
            project_name: "shop".to_string(),
            name: "web".to_string(),
            spec: TargetSpec::Tcp { host: "localhost".to_string(), port: 80 },
            interval_ms: 1,
            timeout_ms: 1,
            enabled: true,
        };
        assert_eq!(target.key(), "/srv/shop:web");
    }
}
