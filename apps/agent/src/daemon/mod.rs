//! Process lifecycle: single-instance enforcement, signal handling, debounced
//! config watching, and wiring scheduler output to reporting.

pub mod pidfile;
pub mod watch;

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiClient, StatusReport};
use crate::config::Config;
use crate::error::DaemonError;
use crate::monitoring::scheduler::{CheckEvent, Scheduler};
use pidfile::PidFile;
use watch::{ChangeSource, DebounceTimer, PollWatcher};

/// The daemon owns its scheduler, watcher, and lifecycle state; one value per
/// process, no globals.
pub struct Daemon {
    scheduler: Arc<Scheduler>,
    pid_file: PidFile,
    watcher: Arc<dyn ChangeSource>,
    api: Option<ApiClient>,
    debounce: Duration,
}

impl Daemon {
    pub fn new(config: &Config, scheduler: Arc<Scheduler>) -> Result<Self, DaemonError> {
        let watcher = Arc::new(PollWatcher::new(
            config.watched_dirs(),
            Duration::from_millis(config.daemon.watch_poll_ms),
        ));
        // Reporting needs a token; without one we only log locally.
        let api = match &config.api.token {
            Some(_) => {
                let timeout_ms = crate::resolver::parse_duration_ms(&config.api.timeout);
                let timeout = Duration::from_millis(if timeout_ms == 0 { 10_000 } else { timeout_ms });
                match ApiClient::new(config.api.base_url.clone(), config.api.token.clone(), timeout)
                {
                    Ok(client) => Some(client),
                    Err(e) => {
                        tracing::warn!("Failed to build API client, reporting disabled: {e}");
                        None
                    }
                }
            }
            None => {
                tracing::info!("No API token configured, results are logged locally only");
                None
            }
        };

        Ok(Self {
            scheduler,
            pid_file: PidFile::new(config.daemon.pid_file.clone()),
            watcher,
            api,
            debounce: Duration::from_millis(config.daemon.debounce_ms),
        })
    }

    #[cfg(test)]
    fn with_watcher(mut self, watcher: Arc<dyn ChangeSource>) -> Self {
        self.watcher = watcher;
        self
    }

    /// Run until a termination signal. Returns `Ok(false)` without touching
    /// anything when another live instance holds the PID file.
    pub async fn run(&self) -> Result<bool, DaemonError> {
        if !self.pid_file.acquire()? {
            return Ok(false);
        }
        tracing::info!(pid = std::process::id(), "Daemon started");

        let (tx, rx) = mpsc::channel(64);
        self.scheduler.start(tx).await;

        let token = CancellationToken::new();
        let changes = self.watcher.subscribe(token.clone());

        let outcome = self.event_loop(rx, changes).await;

        token.cancel();
        self.scheduler.stop();
        self.pid_file.release();
        tracing::info!("Daemon stopped");
        outcome.map(|()| true)
    }

    async fn event_loop(
        &self,
        mut results: mpsc::Receiver<CheckEvent>,
        mut changes: mpsc::Receiver<std::path::PathBuf>,
    ) -> Result<(), DaemonError> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut debounce = DebounceTimer::new(self.debounce);

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM, shutting down");
                    return Ok(());
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT, shutting down");
                    return Ok(());
                }
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading targets");
                    self.scheduler.reload().await;
                }
                Some(path) = changes.recv() => {
                    tracing::debug!(path = %path.display(), "Config change detected");
                    debounce.trigger(Instant::now());
                }
                Some(event) = results.recv() => {
                    self.handle_result(event).await;
                }
                _ = sleep_until_opt(debounce.deadline()) => {
                    if debounce.fire_if_due(Instant::now()) {
                        tracing::info!("Config quiet window elapsed, reloading targets");
                        self.scheduler.reload().await;
                    }
                }
            }
        }
    }

    /// Log the result; report it upstream when authenticated. A failed report
    /// is logged and dropped, never queued: the offline queue file belongs to
    /// the CLI process and has no cross-process locking.
    async fn handle_result(&self, event: CheckEvent) {
        let key = event.target.key();
        if event.result.success {
            tracing::info!(
                target = %key,
                kind = event.target.spec.kind(),
                response_time_ms = event.result.response_time_ms,
                "Check passed"
            );
        } else {
            tracing::warn!(
                target = %key,
                kind = event.target.spec.kind(),
                error = event.result.error_message.as_deref().unwrap_or("unknown"),
                "Check failed"
            );
        }

        if let Some(api) = &self.api {
            let report = StatusReport::from_event(&event);
            if !api.report_status(&report).await {
                tracing::warn!(target = %key, "Dropping undeliverable status report");
            }
        }
    }
}

/// Pending forever when no deadline is armed, so the select arm stays inert.
async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::checker::Probe;
    use crate::monitoring::scheduler::TargetLoader;
    use crate::monitoring::types::{HealthCheckResult, ResolvedTarget, TargetSpec};
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct OneTargetLoader;

    #[async_trait]
    impl TargetLoader for OneTargetLoader {
        async fn load(&self) -> Vec<ResolvedTarget> {
            vec![ResolvedTarget {
                project_id: "p".to_string(),
                project_path: PathBuf::from("/srv/p"),
                project_name: "p".to_string(),
                name: "t".to_string(),
                spec: TargetSpec::Tcp { host: "localhost".to_string(), port: 1 },
                interval_ms: 60_000,
                timeout_ms: 1_000,
                enabled: true,
            }]
        }
    }

    struct OkRunner(std::sync::atomic::AtomicUsize);

    impl OkRunner {
        fn new() -> Self {
            Self(std::sync::atomic::AtomicUsize::new(0))
        }

        fn count(&self) -> usize {
            self.0.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Probe for OkRunner {
        async fn check(&self, _target: &ResolvedTarget) -> HealthCheckResult {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            HealthCheckResult::healthy(1)
        }
    }

    /// Emits a scripted list of change events.
    struct ScriptedChanges(Vec<PathBuf>);

    impl ChangeSource for ScriptedChanges {
        fn subscribe(&self, _token: CancellationToken) -> mpsc::Receiver<PathBuf> {
            let (tx, rx) = mpsc::channel(8);
            let paths = self.0.clone();
            tokio::spawn(async move {
                for path in paths {
                    let _ = tx.send(path).await;
                }
            });
            rx
        }
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.daemon.pid_file = dir.join("agent.pid");
        config.daemon.debounce_ms = 50;
        config.queue.path = dir.join("queue.json");
        config
    }

    #[tokio::test]
    async fn second_start_against_live_pid_returns_false() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        // First instance holds the PID file (acquired directly: the daemon's
        // run() would block on signals).
        let holder = PidFile::new(config.daemon.pid_file.clone());
        assert!(holder.acquire().unwrap());

        let scheduler =
            Arc::new(Scheduler::new(Arc::new(OneTargetLoader), Arc::new(OkRunner::new())));
        let daemon = Daemon::new(&config, scheduler).unwrap();
        assert!(!daemon.run().await.unwrap(), "start must fail while the pid is live");

        holder.release();
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_changes_coalesce_into_one_reload() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path());

        let runner = Arc::new(OkRunner::new());
        let scheduler =
            Arc::new(Scheduler::new(Arc::new(OneTargetLoader), Arc::clone(&runner) as Arc<dyn Probe>));
        let changes = vec![
            PathBuf::from("/srv/p/vigil.yaml"),
            PathBuf::from("/srv/p/vigil.yaml"),
            PathBuf::from("/srv/p/vigil.yaml"),
        ];
        let daemon = Daemon::new(&config, Arc::clone(&scheduler))
            .unwrap()
            .with_watcher(Arc::new(ScriptedChanges(changes)));

        let (tx, rx) = mpsc::channel(64);
        scheduler.start(tx).await;
        let token = CancellationToken::new();
        let change_rx = daemon.watcher.subscribe(token.clone());

        // Drive the event loop briefly; three rapid triggers must produce
        // exactly one reload after the quiet window.
        let loop_fut = daemon.event_loop(rx, change_rx);
        let driven = tokio::time::timeout(Duration::from_millis(500), loop_fut);
        let _ = driven.await; // times out; the loop runs until signalled

        // The 60s-interval target probes once per schedule generation:
        // initial start + one debounced reload = 2.
        assert_eq!(runner.count(), 2, "rapid edits must coalesce into one reload");
        assert_eq!(scheduler.status().len(), 1);
        scheduler.stop();
        token.cancel();
    }
}
