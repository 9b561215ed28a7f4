//! Per-target timer ownership and single-flight probe execution.
//!
//! Each enabled target gets one scheduling task. A tick that fires while the
//! target's probe is still in flight re-arms the next timer and skips the
//! probe instead of queueing it, so a slow probe degrades the cadence rather
//! than building a backlog. `stop`/`reload` cancel pending timers but never
//! abort an in-flight probe; its late result is epoch-checked and discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::checker::Probe;
use super::types::{HealthCheckResult, ResolvedTarget};

/// Source of target definitions; the daemon injects the config resolver,
/// tests inject a fixed list.
#[async_trait]
pub trait TargetLoader: Send + Sync {
    async fn load(&self) -> Vec<ResolvedTarget>;
}

/// One probe outcome, tagged with the target it belongs to.
#[derive(Debug, Clone)]
pub struct CheckEvent {
    pub target: ResolvedTarget,
    pub result: HealthCheckResult,
}

/// Read-only view of one scheduled target.
#[derive(Debug, Clone)]
pub struct TargetStatus {
    pub key: String,
    pub kind: &'static str,
    pub next_run_at: Instant,
    pub running: bool,
}

/// Scheduler-internal state for one target.
struct ScheduledCheck {
    kind: &'static str,
    next_run_at: Instant,
    running: bool,
    /// Load generation this entry belongs to. A reload bumps the generation,
    /// so a probe started before the reload can never update (or be reported
    /// against) an entry re-created for the same key afterwards.
    epoch: u64,
}

/// What a firing timer should do.
#[derive(Debug, PartialEq, Eq)]
enum TickDecision {
    /// Entry was removed or replaced; the scheduling task exits.
    Gone,
    /// A probe is already in flight: skip, timer re-armed.
    Skip { next: Instant },
    /// Probe now; the running flag is set.
    Run,
}

struct RunState {
    token: CancellationToken,
    tx: mpsc::Sender<CheckEvent>,
}

pub struct Scheduler {
    loader: Arc<dyn TargetLoader>,
    runner: Arc<dyn Probe>,
    checks: Arc<Mutex<HashMap<String, ScheduledCheck>>>,
    run_state: Mutex<Option<RunState>>,
    epoch: AtomicU64,
}

impl Scheduler {
    pub fn new(loader: Arc<dyn TargetLoader>, runner: Arc<dyn Probe>) -> Self {
        Self {
            loader,
            runner,
            checks: Arc::new(Mutex::new(HashMap::new())),
            run_state: Mutex::new(None),
            epoch: AtomicU64::new(0),
        }
    }

    /// Load targets and schedule every enabled one. Disabled targets are not
    /// scheduled at all. Idempotent: a second call while started is a no-op.
    /// Returns the number of scheduled targets.
    pub async fn start(&self, tx: mpsc::Sender<CheckEvent>) -> usize {
        let token = {
            let mut state = self.run_state.lock().expect("scheduler lock poisoned");
            if state.is_some() {
                tracing::warn!("Scheduler already started, ignoring start()");
                return 0;
            }
            let token = CancellationToken::new();
            *state = Some(RunState { token: token.clone(), tx: tx.clone() });
            token
        };

        self.schedule_all(tx, token).await
    }

    /// Cancel every armed timer and drop all scheduling state. In-flight
    /// probes are not aborted; their results are discarded on completion.
    pub fn stop(&self) {
        let state = self.run_state.lock().expect("scheduler lock poisoned").take();
        match state {
            Some(state) => state.token.cancel(),
            None => return,
        }
        self.checks.lock().expect("scheduler lock poisoned").clear();
        tracing::info!("Scheduler stopped");
    }

    /// Tear down all timers and re-run the target load. The only way target
    /// definitions change while running.
    pub async fn reload(&self) -> usize {
        let (token, tx) = {
            let mut state = self.run_state.lock().expect("scheduler lock poisoned");
            let Some(old) = state.take() else {
                tracing::warn!("Scheduler not started, ignoring reload()");
                return 0;
            };
            old.token.cancel();
            let token = CancellationToken::new();
            *state = Some(RunState { token: token.clone(), tx: old.tx.clone() });
            (token, old.tx)
        };
        self.checks.lock().expect("scheduler lock poisoned").clear();

        let count = self.schedule_all(tx, token).await;
        tracing::info!(targets = count, "Scheduler reloaded");
        count
    }

    /// Probe every currently-enabled target exactly once, concurrently, with
    /// no timer bookkeeping. Independent of start()/stop() state.
    pub async fn run_once(&self) -> Vec<CheckEvent> {
        let targets = self.loader.load().await;
        let probes = targets.into_iter().filter(|t| t.enabled).map(|target| {
            let runner = Arc::clone(&self.runner);
            async move {
                let result = runner.check(&target).await;
                CheckEvent { target, result }
            }
        });
        futures::future::join_all(probes).await
    }

    /// Snapshot of per-target scheduling state.
    pub fn status(&self) -> Vec<TargetStatus> {
        let checks = self.checks.lock().expect("scheduler lock poisoned");
        let mut statuses: Vec<TargetStatus> = checks
            .iter()
            .map(|(key, check)| TargetStatus {
                key: key.clone(),
                kind: check.kind,
                next_run_at: check.next_run_at,
                running: check.running,
            })
            .collect();
        statuses.sort_by(|a, b| a.key.cmp(&b.key));
        statuses
    }

    async fn schedule_all(&self, tx: mpsc::Sender<CheckEvent>, token: CancellationToken) -> usize {
        let targets = self.loader.load().await;
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;

        let mut scheduled = 0;
        for target in targets {
            if !target.enabled {
                tracing::debug!(target = %target.key(), "Target disabled, not scheduling");
                continue;
            }
            self.spawn_target(target, epoch, tx.clone(), token.clone());
            scheduled += 1;
        }
        tracing::info!(targets = scheduled, "Scheduled targets");
        scheduled
    }

    fn spawn_target(
        &self,
        target: ResolvedTarget,
        epoch: u64,
        tx: mpsc::Sender<CheckEvent>,
        token: CancellationToken,
    ) {
        let key = target.key();
        let interval = target.interval();
        // First probe fires at load time, not after one interval.
        let first = Instant::now();
        self.checks.lock().expect("scheduler lock poisoned").insert(
            key.clone(),
            ScheduledCheck {
                kind: target.spec.kind(),
                next_run_at: first,
                running: false,
                epoch,
            },
        );

        let checks = Arc::clone(&self.checks);
        let runner = Arc::clone(&self.runner);
        tokio::spawn(async move {
            let mut next = first;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep_until(next) => {}
                }

                match begin_tick(&checks, &key, epoch, interval) {
                    TickDecision::Gone => break,
                    TickDecision::Skip { next: rearmed } => {
                        tracing::debug!(target = %key, "Probe still in flight, skipping tick");
                        next = rearmed;
                        continue;
                    }
                    TickDecision::Run => {}
                }

                let result = runner.check(&target).await;

                match finish_tick(&checks, &key, epoch, interval) {
                    Some(rearmed) => {
                        // Handler failures must never stop the timer loop.
                        if let Err(e) =
                            tx.send(CheckEvent { target: target.clone(), result }).await
                        {
                            tracing::error!(target = %key, "Failed to deliver check result: {e}");
                        }
                        next = rearmed;
                    }
                    None => {
                        tracing::debug!(target = %key, "Discarding late result after teardown");
                        break;
                    }
                }
            }
        });
    }
}

/// Decide what a firing timer does, updating the running flag and next-run
/// bookkeeping under the map lock.
fn begin_tick(
    checks: &Mutex<HashMap<String, ScheduledCheck>>,
    key: &str,
    epoch: u64,
    interval: std::time::Duration,
) -> TickDecision {
    let mut checks = checks.lock().expect("scheduler lock poisoned");
    let Some(check) = checks.get_mut(key) else {
        return TickDecision::Gone;
    };
    if check.epoch != epoch {
        return TickDecision::Gone;
    }
    if check.running {
        let next = Instant::now() + interval;
        check.next_run_at = next;
        return TickDecision::Skip { next };
    }
    check.running = true;
    TickDecision::Run
}

/// Clear the running flag and arm the next timer. Returns `None` when the
/// entry is gone or belongs to a newer load generation, in which case the
/// caller discards the probe result.
fn finish_tick(
    checks: &Mutex<HashMap<String, ScheduledCheck>>,
    key: &str,
    epoch: u64,
    interval: std::time::Duration,
) -> Option<Instant> {
    let mut checks = checks.lock().expect("scheduler lock poisoned");
    let check = checks.get_mut(key)?;
    if check.epoch != epoch {
        return None;
    }
    check.running = false;
    let next = Instant::now() + interval;
    check.next_run_at = next;
    Some(next)
}
