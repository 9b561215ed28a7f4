//! Config-change detection for hot reload.
//!
//! Watching is an external notification source behind [`ChangeSource`]: it
//! emits changed paths into a channel the daemon consumes, so reload logic is
//! testable without a real filesystem. The production implementation polls
//! watched directories for YAML mtime changes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Emits the paths of changed configuration files.
pub trait ChangeSource: Send + Sync {
    /// Start emitting change events until `token` is cancelled.
    fn subscribe(&self, token: CancellationToken) -> mpsc::Receiver<PathBuf>;
}

/// Polls watched directories for YAML files whose mtime moved.
pub struct PollWatcher {
    dirs: Vec<PathBuf>,
    poll_interval: Duration,
}

impl PollWatcher {
    pub fn new(dirs: Vec<PathBuf>, poll_interval: Duration) -> Self {
        Self { dirs, poll_interval }
    }
}

fn is_yaml(path: &PathBuf) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// Snapshot of YAML file mtimes directly under the watched directories.
fn scan(dirs: &[PathBuf]) -> HashMap<PathBuf, SystemTime> {
    let mut seen = HashMap::new();
    for dir in dirs {
        let Ok(entries) = std::fs::read_dir(dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if !is_yaml(&path) {
                continue;
            }
            if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                seen.insert(path, modified);
            }
        }
    }
    seen
}

impl ChangeSource for PollWatcher {
    fn subscribe(&self, token: CancellationToken) -> mpsc::Receiver<PathBuf> {
        let (tx, rx) = mpsc::channel(32);
        let dirs = self.dirs.clone();
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            let mut known = scan(&dirs);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(poll_interval) => {}
                }

                let current = scan(&dirs);
                for (path, modified) in &current {
                    let changed = match known.get(path) {
                        Some(previous) => previous != modified,
                        None => true,
                    };
                    if changed && tx.send(path.clone()).await.is_err() {
                        return;
                    }
                }
                // Deleted files count as changes too.
                for path in known.keys() {
                    if !current.contains_key(path) && tx.send(path.clone()).await.is_err() {
                        return;
                    }
                }
                known = current;
            }
        });

        rx
    }
}

/// Reset-and-arm timer: fires once after a quiet window with no further
/// triggers. Pure state machine; the daemon loop supplies the clock.
#[derive(Debug)]
pub struct DebounceTimer {
    quiet: Duration,
    deadline: Option<Instant>,
}

impl DebounceTimer {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, deadline: None }
    }

    /// Arm (or re-arm) the timer: the deadline moves to `now + quiet`.
    pub fn trigger(&mut self, now: Instant) {
        self.deadline = Some(now + self.quiet);
    }

    /// Pending deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Consume the deadline if it has passed. Returns whether the timer
    /// fired; a fired timer is disarmed until the next trigger.
    pub fn fire_if_due(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn debounce_fires_only_after_quiet_window() {
        let quiet = Duration::from_millis(1_000);
        let mut timer = DebounceTimer::new(quiet);
        let t0 = Instant::now();

        assert!(timer.deadline().is_none());
        assert!(!timer.fire_if_due(t0));

        timer.trigger(t0);
        assert!(!timer.fire_if_due(t0 + Duration::from_millis(999)));
        assert!(timer.fire_if_due(t0 + quiet));
        // Disarmed after firing.
        assert!(timer.deadline().is_none());
    }

    #[tokio::test]
    async fn rapid_triggers_coalesce_into_one_deadline() {
        let quiet = Duration::from_millis(1_000);
        let mut timer = DebounceTimer::new(quiet);
        let t0 = Instant::now();

        timer.trigger(t0);
        timer.trigger(t0 + Duration::from_millis(400));
        timer.trigger(t0 + Duration::from_millis(800));

        // Quiet window counts from the LAST trigger.
        assert!(!timer.fire_if_due(t0 + Duration::from_millis(1_500)));
        assert!(timer.fire_if_due(t0 + Duration::from_millis(1_800)));
        assert!(!timer.fire_if_due(t0 + Duration::from_millis(5_000)));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_watcher_reports_yaml_changes() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("vigil.yaml");
        std::fs::write(&config, "runtimes: []\n").unwrap();

        let watcher =
            PollWatcher::new(vec![dir.path().to_path_buf()], Duration::from_millis(50));
        let token = CancellationToken::new();
        let mut rx = watcher.subscribe(token.clone());

        // Unrelated and non-YAML files are ignored.
        std::fs::write(dir.path().join("notes.txt"), "x").unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(rx.try_recv().is_err());

        // Rewrite with a bumped mtime.
        let later = std::time::SystemTime::now() + Duration::from_secs(5);
        std::fs::write(&config, "runtimes: [] # edited\n").unwrap();
        let file = std::fs::File::open(&config).unwrap();
        file.set_modified(later).unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let changed = rx.recv().await.unwrap();
        assert_eq!(changed, config);

        token.cancel();
    }
}
