//! Live topology synchronization.
//!
//! Polls a backend for a snapshot of a hierarchical topology (groups and
//! connections), detects changes with canonical content hashes, and keeps an
//! in-memory store in line with the backend by adding, updating and removing
//! only what changed.
//!
//! ```text
//! ┌───────────────────────┐   tick   ┌─────────────────┐
//! │ PollingScheduler      │ ───────► │ TopologySession │
//! └───────────────────────┘          └────────┬────────┘
//!                                             │
//!            ┌────────────────────────────────┼──────────────────────┐
//!            ▼                                ▼                      ▼
//!   DataSource (timeout, retry)     TopologyStore::reconcile   TopologyObserver
//!            │
//!            ▼
//!   SnapshotTransport (HTTP)
//! ```
//!
//! [`graph::GraphIndex`] answers shortest-path queries over laid-out
//! entities and is rebuilt whenever positions change.

pub mod config;
pub mod dashboard;
pub mod error;
pub mod graph;
pub mod scheduler;
pub mod source;
pub mod topology;

pub use config::{DashboardConfig, FetchConfig, RefreshRate};
pub use dashboard::{
    FailurePhase, SessionStatus, TopologyDashboard, TopologyObserver, TopologySession,
};
pub use error::{ConfigError, FailureKind, FetchError, SchedulerError, SyncError};
pub use graph::{GraphIndex, Point};
pub use scheduler::{PollingScheduler, SchedulerStatus, TickHandler};
pub use source::{DataSource, HttpTransport, RetryPolicy, SnapshotTransport, TransportFailure};
pub use topology::{
    ActiveCounts, Classification, ContentHash, Edge, Entity, RawEntity, ReconcileReport, Snapshot,
    TopologyStore,
};
