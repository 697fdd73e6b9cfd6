//! Scheduler module: sweeps every target with bounded concurrency and
//! assembles availability projections.

mod projection;
mod window;

pub use projection::*;
pub use window::*;

use crate::db::{CheckOutcome, CheckStatus, DbError, Store, Target};
use crate::probe::Prober;

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

/// Slack on top of the probe timeout before a prober is considered hung.
const PROBE_GRACE: Duration = Duration::from_millis(500);

/// Errors that stop a sweep as a whole. Per-target failures never do.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("failed to read targets: {0}")]
    Registry(DbError),
    #[error("target {0} not found")]
    TargetNotFound(i64),
}

/// Probe settings shared by every sweep.
#[derive(Debug, Clone, Copy)]
pub struct SweepConfig {
    pub probe_timeout: Duration,
    pub max_concurrent_probes: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(2),
            max_concurrent_probes: 10,
        }
    }
}

/// Runs sweeps over the registry.
///
/// Only one sweep (or single-target check) runs at a time, which keeps at
/// most one probe in flight per target. Probes inside a sweep share a
/// global semaphore.
pub struct Sweeper<P> {
    store: Arc<Store>,
    prober: Arc<P>,
    config: SweepConfig,
    semaphore: Arc<Semaphore>,
    gate: Mutex<()>,
}

impl<P: Prober> Sweeper<P> {
    pub fn new(store: Arc<Store>, prober: P, config: SweepConfig) -> Self {
        let permits = config.max_concurrent_probes.max(1);
        Self {
            store,
            prober: Arc::new(prober),
            config,
            semaphore: Arc::new(Semaphore::new(permits)),
            gate: Mutex::new(()),
        }
    }

    /// Probe every target now, waiting for any sweep already running.
    pub async fn run_sweep(&self) -> Result<Vec<TargetProjection>, SweepError> {
        let _guard = self.gate.lock().await;
        self.sweep().await
    }

    /// Probe every target unless a sweep is already running, in which case
    /// the request is dropped and `None` returned.
    pub async fn try_run_sweep(&self) -> Option<Result<Vec<TargetProjection>, SweepError>> {
        let Ok(_guard) = self.gate.try_lock() else {
            tracing::warn!("Skipping sweep, another one is still running");
            return None;
        };
        Some(self.sweep().await)
    }

    /// Probe a single target now, e.g. right after it was registered.
    pub async fn check_target(&self, id: i64) -> Result<TargetProjection, SweepError> {
        let _guard = self.gate.lock().await;

        let target = self.store.get_target(id).map_err(|e| match e {
            DbError::NotFound => SweepError::TargetNotFound(id),
            other => SweepError::Registry(other),
        })?;
        self.probe_task(target.id, target.address.clone()).await;

        self.project(&[target])
            .pop()
            .ok_or(SweepError::TargetNotFound(id))
    }

    /// Current projections from stored state, without probing.
    pub fn snapshot(&self) -> Result<Vec<TargetProjection>, SweepError> {
        let targets = self.store.list_targets().map_err(SweepError::Registry)?;
        Ok(self.project(&targets))
    }

    async fn sweep(&self) -> Result<Vec<TargetProjection>, SweepError> {
        let targets = self.store.list_targets().map_err(SweepError::Registry)?;
        warn_duplicate_addresses(&targets);

        let started = Instant::now();
        let mut probes = JoinSet::new();
        for target in &targets {
            probes.spawn(self.probe_task(target.id, target.address.clone()));
        }

        let (mut up, mut down) = (0usize, 0usize);
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(CheckStatus::Up) => up += 1,
                Ok(CheckStatus::Down) => down += 1,
                Err(e) => tracing::error!("Probe task failed: {}", e),
            }
        }

        tracing::info!(
            "Sweep of {} targets finished in {:?}: {} up, {} down",
            targets.len(),
            started.elapsed(),
            up,
            down
        );

        Ok(self.project(&targets))
    }

    /// Probe one target under the global cap and record the outcome.
    fn probe_task(&self, target_id: i64, address: String) -> impl Future<Output = CheckStatus> + Send + 'static {
        let store = self.store.clone();
        let prober = self.prober.clone();
        let semaphore = self.semaphore.clone();
        let timeout = self.config.probe_timeout;

        async move {
            // The semaphore is never closed, so acquiring only waits.
            let _permit = semaphore.acquire_owned().await;

            let time = Utc::now();
            let outcome = match tokio::time::timeout(timeout + PROBE_GRACE, prober.probe(&address, timeout)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!("Probe of {} overran its {:?} timeout", address, timeout);
                    CheckOutcome::down()
                }
            };

            record_outcome(&store, target_id, &outcome, time);
            outcome.status
        }
    }

    /// Assemble projections in the given order. Targets deleted in the
    /// meantime are left out.
    fn project(&self, targets: &[Target]) -> Vec<TargetProjection> {
        targets
            .iter()
            .filter_map(|snapshot| {
                let target = match self.store.get_target(snapshot.id) {
                    Ok(t) => t,
                    Err(DbError::NotFound) => {
                        tracing::info!("Target {} was removed during the sweep", snapshot.id);
                        return None;
                    }
                    Err(e) => {
                        tracing::error!("Failed to reload target {}: {}", snapshot.id, e);
                        snapshot.clone()
                    }
                };

                let recent = self
                    .store
                    .recent_checks(target.id, LONG_WINDOW)
                    .unwrap_or_else(|e| {
                        tracing::error!("Failed to read history of target {}: {}", target.id, e);
                        Vec::new()
                    });

                Some(TargetProjection::new(target, &recent))
            })
            .collect()
    }
}

impl<P: Prober> Sweeper<P> {
    /// Run a sweep every `period` in the background until stopped.
    ///
    /// The first sweep starts immediately. Ticks that find a sweep already
    /// running are skipped.
    pub fn spawn_sweep_loop(self: &Arc<Self>, period: Duration) -> SweepLoop {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        let sweeper = self.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        if let Some(Err(e)) = sweeper.try_run_sweep().await {
                            tracing::error!("Scheduled sweep failed: {}", e);
                        }
                    }
                }
            }
        });

        tracing::info!("Sweeping all targets every {:?}", period);
        SweepLoop { stop: stop_tx, task }
    }
}

/// Handle to the background sweep loop.
pub struct SweepLoop {
    stop: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SweepLoop {
    /// Stop the loop after any sweep in progress completes.
    pub async fn stop(self) {
        let _ = self.stop.send(());
        if let Err(e) = self.task.await {
            tracing::error!("Sweep loop ended abnormally: {}", e);
        }
    }
}

/// Append the check, then mirror it onto the target. Failures are logged
/// and stay local to this target.
fn record_outcome(store: &Store, target_id: i64, outcome: &CheckOutcome, time: chrono::DateTime<Utc>) {
    let record = match store.append_check(target_id, outcome, time) {
        Ok(record) => record,
        Err(e) => {
            tracing::error!("Failed to record check for target {}: {}", target_id, e);
            return;
        }
    };

    if let Err(e) = store.update_status(&record) {
        tracing::error!(
            "Recorded check {} but failed to update status of target {}: {}",
            record.id,
            target_id,
            e
        );
    }
}

/// Addresses are unique at registration; a duplicate here means that was bypassed.
fn warn_duplicate_addresses(targets: &[Target]) {
    let mut seen: HashMap<&str, i64> = HashMap::with_capacity(targets.len());
    for target in targets {
        if let Some(first) = seen.insert(target.address.as_str(), target.id) {
            tracing::warn!(
                "Address {} is registered by both target {} and target {}",
                target.address,
                first,
                target.id
            );
        }
    }
}
