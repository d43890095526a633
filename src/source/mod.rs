//! Snapshot data source.
//!
//! `DataSource` owns the whole retry policy: each attempt is raced against
//! its timeout (the losing request future is dropped, which cancels the
//! underlying HTTP request), failures are classified, and only a single
//! classified [`FetchError`] leaves this module. Callers never retry on top.

pub mod http;
pub mod retry;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::error::{FailureKind, FetchError, SyncError};
use crate::topology::Snapshot;

pub use http::HttpTransport;
pub use retry::RetryPolicy;

/// A failed request, as reported by the transport. Timeouts are detected by
/// the data source, not the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFailure {
    /// Connection refused, reset, non-success HTTP status
    Transport(String),
    /// Response arrived but the body is not usable JSON
    Data(String),
}

/// One network request for the raw snapshot payload
#[async_trait]
pub trait SnapshotTransport: Send + Sync {
    async fn fetch_payload(&self) -> Result<Value, TransportFailure>;

    /// Short label for log lines
    fn describe(&self) -> String {
        "snapshot transport".to_string()
    }
}

// ---------------------------------------------------------------------------
// Attempt outcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum AttemptFailure {
    Timeout,
    Data(String),
    Transport(String),
}

impl AttemptFailure {
    fn kind(&self) -> FailureKind {
        match self {
            AttemptFailure::Timeout => FailureKind::Timeout,
            AttemptFailure::Data(_) => FailureKind::Data,
            AttemptFailure::Transport(_) => FailureKind::Transport,
        }
    }

    fn message(&self, timeout: Duration) -> String {
        match self {
            AttemptFailure::Timeout => format!("no response within {:?}", timeout),
            AttemptFailure::Data(m) | AttemptFailure::Transport(m) => m.clone(),
        }
    }

    fn into_error(self, attempts: u32, timeout: Duration) -> FetchError {
        match self {
            AttemptFailure::Timeout => FetchError::TimeoutExceeded {
                attempts,
                last_timeout: timeout,
            },
            AttemptFailure::Data(message) => FetchError::InvalidPayload { attempts, message },
            AttemptFailure::Transport(message) => FetchError::TransportError { attempts, message },
        }
    }
}

// ---------------------------------------------------------------------------
// DataSource
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct DataSource {
    transport: Arc<dyn SnapshotTransport>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("transport", &self.transport.describe())
            .field("policy", &self.policy)
            .finish()
    }
}

impl DataSource {
    /// Create a data source. The policy is validated here so a bad retry
    /// budget fails at setup, not on the first refresh.
    pub fn new(
        transport: Arc<dyn SnapshotTransport>,
        policy: RetryPolicy,
    ) -> Result<Self, SyncError> {
        policy.validate()?;
        Ok(Self { transport, policy })
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch with the configured policy.
    pub async fn fetch_snapshot(&self) -> Result<Snapshot, FetchError> {
        fetch_with_policy(self.transport.as_ref(), &self.policy).await
    }

    /// Fetch with an explicit first-attempt timeout and retry budget,
    /// keeping the configured increment and pause.
    pub async fn fetch_snapshot_with(
        &self,
        timeout: Duration,
        max_retries: u32,
    ) -> Result<Snapshot, SyncError> {
        let policy = RetryPolicy {
            base_timeout: timeout,
            max_retries,
            ..self.policy.clone()
        };
        policy.validate()?;
        Ok(fetch_with_policy(self.transport.as_ref(), &policy).await?)
    }
}

async fn fetch_with_policy(
    transport: &dyn SnapshotTransport,
    policy: &RetryPolicy,
) -> Result<Snapshot, FetchError> {
    let mut timeout = policy.base_timeout;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        let failure = match tokio::time::timeout(timeout, transport.fetch_payload()).await {
            Ok(Ok(payload)) => match Snapshot::from_payload(payload) {
                Ok(snapshot) => {
                    debug!(
                        attempt,
                        entities = snapshot.len(),
                        "Snapshot fetched"
                    );
                    return Ok(snapshot);
                }
                Err(e) => AttemptFailure::Data(e.to_string()),
            },
            Ok(Err(TransportFailure::Data(message))) => AttemptFailure::Data(message),
            Ok(Err(TransportFailure::Transport(message))) => AttemptFailure::Transport(message),
            Err(_elapsed) => AttemptFailure::Timeout,
        };

        let kind = failure.kind();
        if !policy.should_retry(kind, attempt) {
            let err = failure.into_error(attempt, timeout);
            error!(
                transport = %transport.describe(),
                attempts = attempt,
                kind = kind.as_str(),
                error = %err,
                "Snapshot fetch failed, giving up"
            );
            return Err(err);
        }

        let next = policy.next_timeout(timeout, kind);
        warn!(
            transport = %transport.describe(),
            attempt,
            max_attempts = policy.max_attempts(),
            kind = kind.as_str(),
            reason = %failure.message(timeout),
            next_timeout_ms = next.as_millis() as u64,
            "Snapshot fetch attempt failed, retrying"
        );
        timeout = next;
        tokio::time::sleep(policy.retry_pause).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// One scripted response
    enum Step {
        Respond(Value),
        Fail(TransportFailure),
        /// Never completes; flips the flag when the request is dropped
        Hang(Arc<AtomicBool>),
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Transport that replays a script, repeating the last step when exhausted
    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
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
    impl SnapshotTransport for ScriptedTransport {
        async fn fetch_payload(&self) -> Result<Value, TransportFailure> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = {
                let mut steps = self.steps.lock().unwrap();
                if steps.len() > 1 {
                    steps.pop_front().unwrap()
                } else {
                    match steps.front().unwrap() {
                        Step::Respond(v) => Step::Respond(v.clone()),
                        Step::Fail(f) => Step::Fail(f.clone()),
                        Step::Hang(flag) => Step::Hang(flag.clone()),
                    }
                }
            };
            match step {
                Step::Respond(value) => Ok(value),
                Step::Fail(failure) => Err(failure),
                Step::Hang(flag) => {
                    let _guard = DropFlag(flag);
                    std::future::pending::<()>().await;
                    unreachable!()
                }
            }
        }
    }

    fn policy(base_secs: u64, retries: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(base_secs), retries).unwrap()
    }

    fn payload() -> Value {
        json!({"nodes": [{"id": "ROOT"}, {"id": "L1", "parentId": "ROOT"}]})
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_success() {
        let transport = ScriptedTransport::new(vec![Step::Respond(payload())]);
        let source = DataSource::new(transport.clone(), policy(10, 3)).unwrap();

        let snapshot = source.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_escalate_then_give_up() {
        let dropped = Arc::new(AtomicBool::new(false));
        let transport = ScriptedTransport::new(vec![Step::Hang(dropped.clone())]);
        let source = DataSource::new(transport.clone(), policy(10, 2)).unwrap();

        let started = Instant::now();
        let err = source.fetch_snapshot().await.unwrap_err();

        assert_eq!(
            err,
            FetchError::TimeoutExceeded {
                attempts: 3,
                last_timeout: Duration::from_secs(20),
            }
        );
        assert_eq!(transport.calls(), 3);
        // 10s + 1s pause + 15s + 1s pause + 20s
        assert_eq!(started.elapsed(), Duration::from_secs(47));
        assert!(dropped.load(Ordering::SeqCst), "timed-out request must be released");
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_timeout() {
        let dropped = Arc::new(AtomicBool::new(false));
        let transport = ScriptedTransport::new(vec![
            Step::Hang(dropped.clone()),
            Step::Respond(payload()),
        ]);
        let source = DataSource::new(transport.clone(), policy(5, 3)).unwrap();

        let snapshot = source.fetch_snapshot().await.unwrap();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(transport.calls(), 2);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_failures_retry_within_budget() {
        let transport = ScriptedTransport::new(vec![Step::Fail(TransportFailure::Transport(
            "connection refused".into(),
        ))]);
        let source = DataSource::new(transport.clone(), policy(10, 3)).unwrap();

        let started = Instant::now();
        let err = source.fetch_snapshot().await.unwrap_err();
        assert_eq!(
            err,
            FetchError::TransportError {
                attempts: 4,
                message: "connection refused".into(),
            }
        );
        assert_eq!(transport.calls(), 4);
        // Only the pauses elapse; the timeout is never hit
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_fails_without_retry() {
        let transport = ScriptedTransport::new(vec![Step::Respond(json!({"items": []}))]);
        let source = DataSource::new(transport.clone(), policy(10, 3)).unwrap();

        let err = source.fetch_snapshot().await.unwrap_err();
        assert!(matches!(err, FetchError::InvalidPayload { attempts: 1, .. }));
        assert!(err.to_string().contains("nodes"));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_payload_retried_when_enabled() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(TransportFailure::Data("truncated body".into())),
            Step::Respond(payload()),
        ]);
        let source = DataSource::new(
            transport.clone(),
            policy(10, 1).retry_data_failures(true),
        )
        .unwrap();

        assert!(source.fetch_snapshot().await.is_ok());
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_with_rejects_large_budget() {
        let transport = ScriptedTransport::new(vec![Step::Respond(payload())]);
        let source = DataSource::new(transport.clone(), policy(10, 3)).unwrap();

        let err = source
            .fetch_snapshot_with(Duration::from_secs(1), 9)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
        assert_eq!(transport.calls(), 0);

        let snapshot = source
            .fetch_snapshot_with(Duration::from_secs(1), 0)
            .await
            .unwrap();
        assert_eq!(snapshot.len(), 2);
    }

    #[test]
    fn test_new_rejects_invalid_policy() {
        let transport = ScriptedTransport::new(vec![Step::Respond(payload())]);
        let bad = RetryPolicy {
            max_retries: 42,
            ..Default::default()
        };
        assert!(matches!(
            DataSource::new(transport, bad),
            Err(SyncError::Config(_))
        ));
    }
}
