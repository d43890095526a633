//! Live topology session.
//!
//! Wires the pieces together:
//!
//! ```text
//! PollingScheduler ──tick──► TopologySession::refresh
//!                               │ DataSource::fetch_snapshot (timeout + retry)
//!                               │ inactive filter
//!                               │ TopologyStore::reconcile  (write lock)
//!                               ▼
//!                            TopologyObserver (read guard, only on change)
//! ```
//!
//! A failed refresh stops the scheduler. The store keeps its last good
//! state and the session reports `AwaitingRetry` (nothing loaded yet) or
//! `Paused` (refresh failed) until the owner calls
//! [`TopologyDashboard::retry`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use crate::config::{DashboardConfig, RefreshRate};
use crate::error::{FetchError, SchedulerError, SyncError};
use crate::scheduler::{PollingScheduler, TickHandler};
use crate::source::{DataSource, HttpTransport, SnapshotTransport};
use crate::topology::{ReconcileReport, TopologyStore};

/// Where in the session's life a fetch failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePhase {
    /// Nothing has been loaded yet
    FirstLoad,
    /// A later refresh failed; the previous state is still shown
    Refresh,
}

/// Receives state changes. Called on the refresh task with the store
/// read-locked, so implementations should copy what they need and return.
pub trait TopologyObserver: Send + Sync + 'static {
    fn topology_changed(&self, store: &TopologyStore, report: &ReconcileReport, first_load: bool);

    fn on_failure(&self, _error: &FetchError, _phase: FailurePhase) {}
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionStatus {
    Idle,
    Live {
        last_success: DateTime<Utc>,
        generation: u64,
    },
    /// The first load failed; nothing to show until a retry succeeds
    AwaitingRetry { error: FetchError },
    /// A refresh failed; the store holds the last good state
    Paused { error: FetchError },
    Stopped,
}

impl SessionStatus {
    pub fn is_live(&self) -> bool {
        matches!(self, SessionStatus::Live { .. })
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            SessionStatus::AwaitingRetry { error } | SessionStatus::Paused { error } => Some(error),
            _ => None,
        }
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// One refresh cycle: fetch, filter, reconcile, notify.
pub struct TopologySession {
    source: DataSource,
    store: Arc<RwLock<TopologyStore>>,
    observer: Arc<dyn TopologyObserver>,
    root_id: String,
    show_inactive: AtomicBool,
    loaded: AtomicBool,
    status_tx: watch::Sender<SessionStatus>,
}

impl std::fmt::Debug for TopologySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologySession")
            .field("source", &self.source)
            .field("root_id", &self.root_id)
            .field("show_inactive", &self.show_inactive.load(Ordering::Relaxed))
            .field("status", &*self.status_tx.borrow())
            .finish()
    }
}

impl TopologySession {
    pub fn new(
        source: DataSource,
        root_id: impl Into<String>,
        show_inactive: bool,
        observer: Arc<dyn TopologyObserver>,
    ) -> Self {
        let root_id = root_id.into();
        let (status_tx, _) = watch::channel(SessionStatus::Idle);
        Self {
            source,
            store: Arc::new(RwLock::new(TopologyStore::new(root_id.clone()))),
            observer,
            root_id,
            show_inactive: AtomicBool::new(show_inactive),
            loaded: AtomicBool::new(false),
            status_tx,
        }
    }

    pub fn store(&self) -> Arc<RwLock<TopologyStore>> {
        self.store.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    pub fn show_inactive(&self) -> bool {
        self.show_inactive.load(Ordering::SeqCst)
    }

    /// Takes effect on the next refresh
    pub fn set_show_inactive(&self, show: bool) {
        self.show_inactive.store(show, Ordering::SeqCst);
    }

    /// Run one cycle. The observer hears about it when something changed,
    /// and always on the first successful load.
    pub async fn refresh(&self) -> Result<ReconcileReport, FetchError> {
        let snapshot = match self.source.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.record_failure(&err);
                return Err(err);
            }
        };

        let snapshot = if self.show_inactive() {
            snapshot
        } else {
            snapshot.without_inactive(&self.root_id)
        };

        // Counts as loaded only once the write lock is held
        let mut store = self.store.write().await;
        let first_load = !self.loaded.swap(true, Ordering::SeqCst);
        let report = store.reconcile(snapshot);
        let store = store.downgrade();

        if report.changed() || first_load {
            info!(
                added = report.added.len(),
                updated = report.updated.len(),
                removed = report.removed.len(),
                entities = store.len(),
                first_load,
                "Topology changed"
            );
            self.observer.topology_changed(&store, &report, first_load);
        } else {
            debug!(entities = store.len(), "Topology unchanged");
        }

        self.status_tx.send_replace(SessionStatus::Live {
            last_success: Utc::now(),
            generation: store.generation(),
        });
        Ok(report)
    }

    fn record_failure(&self, err: &FetchError) {
        let phase = if self.loaded.load(Ordering::SeqCst) {
            FailurePhase::Refresh
        } else {
            FailurePhase::FirstLoad
        };
        warn!(
            error = %err,
            kind = err.kind().as_str(),
            phase = ?phase,
            "Topology refresh failed, waiting for retry"
        );
        let status = match phase {
            FailurePhase::FirstLoad => SessionStatus::AwaitingRetry { error: err.clone() },
            FailurePhase::Refresh => SessionStatus::Paused { error: err.clone() },
        };
        self.status_tx.send_replace(status);
        self.observer.on_failure(err, phase);
    }

    /// Owner-initiated stop. A failure status is kept so it stays visible.
    fn mark_stopped(&self) {
        self.status_tx.send_if_modified(|status| match status {
            SessionStatus::Idle | SessionStatus::Live { .. } => {
                *status = SessionStatus::Stopped;
                true
            }
            _ => false,
        });
    }
}

#[async_trait]
impl TickHandler for TopologySession {
    async fn on_tick(&self) -> Result<(), SyncError> {
        self.refresh().await?;
        Ok(())
    }
}

// =============================================================================
// DASHBOARD
// =============================================================================

/// Owner of a session and its scheduler.
///
/// Mutating methods take `&mut self`, and `refresh_now` refuses to run while
/// the scheduler is alive, so at most one refresh touches the store at a time.
#[derive(Debug)]
pub struct TopologyDashboard {
    config: DashboardConfig,
    session: Arc<TopologySession>,
    scheduler: PollingScheduler,
}

impl TopologyDashboard {
    pub fn new(
        config: DashboardConfig,
        transport: Arc<dyn SnapshotTransport>,
        observer: Arc<dyn TopologyObserver>,
    ) -> Result<Self, SyncError> {
        config.validate()?;
        let source = DataSource::new(transport, config.fetch.retry_policy())?;
        let session = Arc::new(TopologySession::new(
            source,
            config.root_id.clone(),
            config.show_inactive,
            observer,
        ));
        let scheduler = PollingScheduler::new(config.refresh.interval(), session.clone())?;
        Ok(Self {
            config,
            session,
            scheduler,
        })
    }

    /// Dashboard backed by the HTTP snapshot endpoint named in `config`.
    pub fn connect(
        config: DashboardConfig,
        observer: Arc<dyn TopologyObserver>,
    ) -> Result<Self, SyncError> {
        let transport = HttpTransport::new(&config.endpoint, &config.snapshot_path)?;
        Self::new(config, Arc::new(transport), observer)
    }

    pub fn config(&self) -> &DashboardConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<RwLock<TopologyStore>> {
        self.session.store()
    }

    pub fn status(&self) -> SessionStatus {
        self.session.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.session.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Begin polling; the first refresh runs immediately.
    pub fn start(&mut self) -> Result<(), SyncError> {
        self.scheduler.start()?;
        info!(
            endpoint = %self.config.endpoint,
            refresh = %self.config.refresh,
            "Topology dashboard started"
        );
        Ok(())
    }

    pub async fn stop(&mut self) {
        self.scheduler.stop().await;
        self.session.mark_stopped();
    }

    /// Resume polling after a failure.
    pub fn retry(&mut self) -> Result<(), SyncError> {
        if let Some(err) = self.status().error() {
            info!(error = %err, "Retrying topology refresh");
        }
        self.scheduler.start()?;
        Ok(())
    }

    /// Wait until polling ends on its own, i.e. after a failed refresh.
    pub async fn wait(&mut self) -> Result<(), SyncError> {
        self.scheduler.wait().await?;
        Ok(())
    }

    pub async fn set_refresh_rate(&mut self, rate: RefreshRate) -> Result<(), SyncError> {
        self.scheduler.set_interval(rate.interval()).await?;
        self.config.refresh = rate;
        Ok(())
    }

    /// Applies from the next refresh; entities hidden by the filter are
    /// removed from the store then, and come back as additions.
    pub fn set_show_inactive(&mut self, show: bool) {
        self.session.set_show_inactive(show);
        self.config.show_inactive = show;
    }

    /// One refresh outside the schedule. Only allowed while polling is
    /// stopped.
    pub async fn refresh_now(&self) -> Result<ReconcileReport, SyncError> {
        if self.scheduler.is_running() {
            return Err(SchedulerError::AlreadyRunning.into());
        }
        Ok(self.session.refresh().await?)
    }

    /// Stop polling and release the session.
    pub async fn dispose(mut self) {
        self.stop().await;
        info!("Topology dashboard disposed");
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FetchConfig;
    use crate::source::TransportFailure;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Replays scripted results, repeating the last one when exhausted
    struct Script {
        steps: Mutex<VecDeque<Result<Value, TransportFailure>>>,
        calls: AtomicU32,
    }

    impl Script {
        fn new(steps: Vec<Result<Value, TransportFailure>>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotTransport for Script {
        async fn fetch_payload(&self) -> Result<Value, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut steps = self.steps.lock().unwrap();
            if steps.len() > 1 {
                steps.pop_front().unwrap()
            } else {
                steps.front().cloned().unwrap()
            }
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Changed {
            entities: usize,
            active: usize,
            added: usize,
            first_load: bool,
        },
        Failed(FailurePhase),
    }

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    impl TopologyObserver for Recorder {
        fn topology_changed(&self, store: &TopologyStore, report: &ReconcileReport, first_load: bool) {
            self.events.lock().unwrap().push(Event::Changed {
                entities: store.len(),
                active: store.count_active(),
                added: report.added.len(),
                first_load,
            });
        }

        fn on_failure(&self, _error: &FetchError, phase: FailurePhase) {
            self.events.lock().unwrap().push(Event::Failed(phase));
        }
    }

    fn payload(active: u64) -> Value {
        json!({"nodes": [
            {"id": "ROOT", "name": "Root"},
            {"id": "G1", "parentId": "ROOT", "type": "ORGANIZATIONAL", "name": "Servers"},
            {"id": "L1", "parentId": "G1", "activeConnections": active, "name": "web-1"},
            {"id": "L2", "parentId": "G1", "activeConnections": 0, "name": "web-2"},
        ]})
    }

    fn refused() -> Result<Value, TransportFailure> {
        Err(TransportFailure::Transport("connection refused".into()))
    }

    fn config() -> DashboardConfig {
        DashboardConfig::default().fetch(FetchConfig {
            max_retries: 0,
            ..Default::default()
        })
    }

    fn dashboard(
        config: DashboardConfig,
        script: Arc<Script>,
    ) -> (TopologyDashboard, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        let dashboard = TopologyDashboard::new(config, script, recorder.clone()).unwrap();
        (dashboard, recorder)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_load_notifies_and_goes_live() {
        let script = Script::new(vec![Ok(payload(2))]);
        let (mut dashboard, recorder) = dashboard(config(), script.clone());
        assert_eq!(dashboard.status(), SessionStatus::Idle);

        dashboard.start().unwrap();
        settle().await;

        assert_eq!(
            recorder.events(),
            vec![Event::Changed {
                entities: 4,
                active: 1,
                added: 4,
                first_load: true
            }]
        );
        assert!(dashboard.status().is_live());
        assert_eq!(dashboard.store().read().await.edge_count(), 3);

        dashboard.stop().await;
        assert_eq!(dashboard.status(), SessionStatus::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_refresh_is_silent() {
        let script = Script::new(vec![Ok(payload(2))]);
        let (mut dashboard, recorder) = dashboard(config(), script.clone());

        dashboard.start().unwrap();
        // Medium cadence: ticks at 0s, 10s, 20s
        tokio::time::sleep(Duration::from_secs(25)).await;
        dashboard.stop().await;

        assert_eq!(script.calls(), 3);
        assert_eq!(recorder.events().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_failure_pauses_and_keeps_state() {
        let script = Script::new(vec![Ok(payload(2)), refused(), Ok(payload(0))]);
        let (mut dashboard, recorder) = dashboard(config(), script.clone());

        dashboard.start().unwrap();
        tokio::time::sleep(Duration::from_secs(15)).await;

        assert!(matches!(
            dashboard.status(),
            SessionStatus::Paused {
                error: FetchError::TransportError { attempts: 1, .. }
            }
        ));
        assert!(!dashboard.is_running());
        assert_eq!(dashboard.store().read().await.len(), 4);
        assert_eq!(recorder.events()[1], Event::Failed(FailurePhase::Refresh));

        // Paused means no more fetches
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(script.calls(), 2);

        dashboard.retry().unwrap();
        settle().await;
        assert!(dashboard.status().is_live());
        assert_eq!(
            recorder.events()[2],
            Event::Changed {
                entities: 4,
                active: 0,
                added: 0,
                first_load: false
            }
        );
        dashboard.dispose().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_load_failure_awaits_retry() {
        let script = Script::new(vec![refused(), Ok(payload(1))]);
        let (mut dashboard, recorder) = dashboard(config(), script.clone());

        dashboard.start().unwrap();
        let err = dashboard.wait().await.unwrap_err();
        assert!(matches!(
            err.as_fetch(),
            Some(FetchError::TransportError { .. })
        ));
        assert!(matches!(
            dashboard.status(),
            SessionStatus::AwaitingRetry { .. }
        ));
        assert!(dashboard.store().read().await.is_empty());
        assert_eq!(recorder.events(), vec![Event::Failed(FailurePhase::FirstLoad)]);

        // Stopping keeps the failure visible
        dashboard.stop().await;
        assert!(dashboard.status().error().is_some());

        dashboard.retry().unwrap();
        settle().await;
        assert!(matches!(
            recorder.events()[1],
            Event::Changed {
                first_load: true,
                ..
            }
        ));
        dashboard.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_cancelled_behind_reader_is_not_a_load() {
        let script = Script::new(vec![Ok(payload(1)), refused(), Ok(payload(1))]);
        let (mut dashboard, recorder) = dashboard(config(), script.clone());

        // A renderer holds the store while the first tick wants to write
        let store = dashboard.store();
        let reader = store.read().await;
        dashboard.start().unwrap();
        settle().await;
        assert_eq!(script.calls(), 1);
        dashboard.stop().await;
        drop(reader);

        assert!(store.read().await.is_empty());
        assert!(recorder.events().is_empty());

        assert!(dashboard.refresh_now().await.is_err());
        assert!(matches!(
            dashboard.status(),
            SessionStatus::AwaitingRetry { .. }
        ));
        assert_eq!(recorder.events(), vec![Event::Failed(FailurePhase::FirstLoad)]);

        dashboard.refresh_now().await.unwrap();
        assert!(matches!(
            recorder.events()[1],
            Event::Changed {
                first_load: true,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactive_filter_applies_upstream() {
        let script = Script::new(vec![Ok(payload(3))]);
        let (mut dashboard, recorder) = dashboard(config().show_inactive(false), script.clone());

        let report = dashboard.refresh_now().await.unwrap();
        assert_eq!(report.added, vec!["ROOT", "G1", "L1"]);
        assert!(!dashboard.store().read().await.contains("L2"));

        dashboard.set_show_inactive(true);
        let report = dashboard.refresh_now().await.unwrap();
        assert_eq!(report.added, vec!["L2"]);
        assert!(report.removed.is_empty());
        assert!(dashboard.config().show_inactive);
        assert_eq!(recorder.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_rejected_while_polling() {
        let script = Script::new(vec![Ok(payload(1))]);
        let (mut dashboard, _recorder) = dashboard(config(), script.clone());

        dashboard.start().unwrap();
        settle().await;
        assert!(matches!(
            dashboard.refresh_now().await,
            Err(SyncError::Scheduler(SchedulerError::AlreadyRunning))
        ));
        assert!(matches!(
            dashboard.start(),
            Err(SyncError::Scheduler(SchedulerError::AlreadyRunning))
        ));
        dashboard.stop().await;
        assert!(dashboard.refresh_now().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_refresh_rate_restarts_cadence() {
        let script = Script::new(vec![Ok(payload(1))]);
        let (mut dashboard, _recorder) = dashboard(config(), script.clone());

        dashboard.start().unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(script.calls(), 1);

        // High = 5s: ticks at 1s, 6s, 11s
        dashboard.set_refresh_rate(RefreshRate::High).await.unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        dashboard.stop().await;

        assert_eq!(script.calls(), 4);
        assert_eq!(dashboard.config().refresh, RefreshRate::High);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let script = Script::new(vec![Ok(payload(1))]);
        let recorder = Arc::new(Recorder::default());
        let config = config().refresh(RefreshRate::Custom { interval_ms: 0 });
        assert!(matches!(
            TopologyDashboard::new(config, script, recorder),
            Err(SyncError::Config(_))
        ));
    }
}
