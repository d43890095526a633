//! Topology state: entities, content hashing and incremental reconciliation.
//!
//! # Architecture
//!
//! ```text
//! JSON payload
//!      │  Snapshot::from_payload
//!      ▼
//! Snapshot (RawEntity list) ──► optional inactive filter
//!      │
//!      ▼
//! TopologyStore::reconcile ──► ReconcileReport { added, updated, removed }
//!      │
//!      ▼
//! entities / edges / children_of / active_counts  (read by the renderer)
//! ```

pub mod display_name;
pub mod entity;
pub mod hasher;
pub mod store;

pub use display_name::shrink_display_name;
pub use entity::{
    active_connections, Classification, Entity, RawEntity, Snapshot, SnapshotError,
    DEFAULT_ROOT_ID,
};
pub use hasher::{canonicalize, content_hash, ContentHash};
pub use store::{ActiveCounts, Edge, ReconcileReport, TopologyStore};
