//! Polling scheduler.
//!
//! Runs a [`TickHandler`] on a fixed cadence in a background tokio task:
//!
//! ```text
//! start ──► tick ──► sleep(max(0, interval - tick elapsed)) ──► tick ──► ...
//!             │
//!             └─ Err ──► scheduler stops itself, status = Failed
//! ```
//!
//! ## Guarantees
//!
//! - At most one tick is in flight: ticks run sequentially inside one task,
//!   and `start` refuses to spawn a second task while one is alive.
//! - `stop` cancels the pending sleep (or the in-flight tick, at its next
//!   await point) and waits for the task to finish, so a following `start`
//!   can never overlap the old run.
//! - A failed tick is fatal to the run. The scheduler does not retry;
//!   retry policy lives in the data source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::{ConfigError, SchedulerError, SyncError};

/// Work performed on every tick
#[async_trait]
pub trait TickHandler: Send + Sync + 'static {
    async fn on_tick(&self) -> Result<(), SyncError>;
}

/// Observable scheduler state
#[derive(Debug, Clone)]
pub enum SchedulerStatus {
    /// Never started
    Idle,
    Running,
    /// Stopped by the owner
    Stopped,
    /// Stopped itself after a failed tick
    Failed(Arc<SyncError>),
}

impl SchedulerStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SchedulerStatus::Running)
    }

    pub fn failure(&self) -> Option<&Arc<SyncError>> {
        match self {
            SchedulerStatus::Failed(err) => Some(err),
            _ => None,
        }
    }
}

struct ActiveRun {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<Option<Arc<SyncError>>>,
}

pub struct PollingScheduler {
    interval: Duration,
    handler: Arc<dyn TickHandler>,
    status_tx: Arc<watch::Sender<SchedulerStatus>>,
    run: Option<ActiveRun>,
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("interval", &self.interval)
            .field("status", &*self.status_tx.borrow())
            .finish()
    }
}

impl PollingScheduler {
    pub fn new(interval: Duration, handler: Arc<dyn TickHandler>) -> Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        let (status_tx, _) = watch::channel(SchedulerStatus::Idle);
        Ok(Self {
            interval,
            handler,
            status_tx: Arc::new(status_tx),
            run: None,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// True while the background task is alive
    pub fn is_running(&self) -> bool {
        self.run.as_ref().is_some_and(|run| !run.task.is_finished())
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status_tx.borrow().clone()
    }

    /// Watch status changes (e.g. to surface a failure notification)
    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status_tx.subscribe()
    }

    /// Begin ticking. The first tick runs immediately.
    ///
    /// Fails with `AlreadyRunning` if a run is still alive. A run that
    /// already ended on its own (after a failed tick) is discarded.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        if self.is_running() {
            return Err(SchedulerError::AlreadyRunning);
        }
        self.run = None;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.status_tx.send_replace(SchedulerStatus::Running);
        let task = tokio::spawn(run_loop(
            self.handler.clone(),
            self.interval,
            shutdown_rx,
            self.status_tx.clone(),
        ));
        self.run = Some(ActiveRun { shutdown_tx, task });
        Ok(())
    }

    /// Stop ticking and wait for the background task to end. No-op when
    /// not running. A failure status from an earlier self-stop is kept.
    pub async fn stop(&mut self) {
        let Some(run) = self.run.take() else {
            return;
        };
        let _ = run.shutdown_tx.send(true);
        match run.task.await {
            Ok(None) => {
                self.status_tx.send_replace(SchedulerStatus::Stopped);
            }
            Ok(Some(_)) => {
                // Ended on its own before the signal landed; status says Failed
            }
            Err(e) => {
                error!(error = %e, "Polling scheduler task ended abnormally");
                self.status_tx.send_replace(SchedulerStatus::Stopped);
            }
        }
    }

    /// Wait until the current run ends by itself. Returns the tick failure
    /// that ended it. Returns immediately when nothing is running.
    pub async fn wait(&mut self) -> Result<(), SchedulerError> {
        let Some(run) = self.run.as_mut() else {
            return Ok(());
        };
        let outcome = (&mut run.task).await;
        self.run = None;
        match outcome {
            Ok(None) => Ok(()),
            Ok(Some(err)) => Err(SchedulerError::TickFailed(err)),
            Err(e) => {
                self.status_tx.send_replace(SchedulerStatus::Stopped);
                Err(SchedulerError::TaskAborted(e.to_string()))
            }
        }
    }

    /// Change the cadence. A running scheduler is stopped and restarted so
    /// the new interval applies now, not after the pending sleep.
    pub async fn set_interval(&mut self, interval: Duration) -> Result<(), SyncError> {
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval.into());
        }
        self.interval = interval;
        if self.is_running() {
            self.stop().await;
            self.start()?;
            info!(
                interval_ms = interval.as_millis() as u64,
                "Polling interval changed, scheduler restarted"
            );
        }
        Ok(())
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        if let Some(run) = self.run.take() {
            let _ = run.shutdown_tx.send(true);
            run.task.abort();
        }
    }
}

async fn run_loop(
    handler: Arc<dyn TickHandler>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    status_tx: Arc<watch::Sender<SchedulerStatus>>,
) -> Option<Arc<SyncError>> {
    info!(
        interval_ms = interval.as_millis() as u64,
        "Polling scheduler started"
    );

    loop {
        if *shutdown_rx.borrow() {
            break;
        }

        let started = Instant::now();
        let outcome = tokio::select! {
            result = handler.on_tick() => result,
            _ = shutdown_rx.changed() => {
                info!("Polling scheduler stopped (during tick)");
                return None;
            }
        };

        if let Err(err) = outcome {
            let err = Arc::new(err);
            error!(error = %err, "Refresh cycle failed, polling scheduler paused");
            status_tx.send_replace(SchedulerStatus::Failed(err.clone()));
            return Some(err);
        }

        let elapsed = started.elapsed();
        let pause = interval.saturating_sub(elapsed);
        debug!(
            elapsed_ms = elapsed.as_millis() as u64,
            pause_ms = pause.as_millis() as u64,
            "Tick complete"
        );

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown_rx.changed() => break,
        }
    }

    info!("Polling scheduler stopped");
    None
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
