//! Offline-first sync engine for Quire notes.
//!
//! Every local mutation is queued; a sync cycle pushes the queue to the
//! server and pulls remote changes since a sequence cursor. Edits made while
//! offline are never lost: they wait in the queue, and a remote change that
//! overlaps a pending local change is recorded as a conflict instead of
//! overwriting it.
//!
//! # Architecture
//!
//! ## Components
//!
//! - **Queue**: Coalesced pending changes, one entry per note
//! - **Protocol**: Push/pull messages exchanged with the server
//! - **Transport**: Abstracts over how those messages reach the server
//! - **Store**: Callbacks into the host's local persistence
//! - **Network**: Connectivity state and transitions
//! - **Conflict**: Detection and the record of unresolved conflicts
//! - **Status**: Engine state broadcast to subscribers
//! - **Engine**: Orchestrates the sync cycle
//!
//! ## Sync Cycle
//!
//! 1. **Gate**: Skip with an error when disabled or offline
//! 2. **Push**: Send the whole queue as one batch
//! 3. **Pull**: Page through remote changes since the cursor
//! 4. **Apply**: Save or delete locally, or record a conflict
//! 5. **Report**: Counts plus every error hit along the way
//!
//! # Example
//!
//! ```
//! use quire_sync::{
//!     ChangeOperation, InMemoryStore, ManualNetworkMonitor, MockTransport, SyncConfig,
//!     SyncEngine,
//! };
//! use quire_types::{DeviceId, Note};
//! use std::sync::Arc;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SyncConfig::new("https://sync.example.com", DeviceId::new());
//! let engine = SyncEngine::new(
//!     config,
//!     Arc::new(MockTransport::new()),
//!     Arc::new(ManualNetworkMonitor::new(true)),
//!     Arc::new(InMemoryStore::new()),
//! );
//!
//! let note = engine.add_sync_metadata(Note::new("Groceries", serde_json::json!({})));
//! engine.queue_change(&note, ChangeOperation::Create);
//!
//! let report = engine.trigger_sync().await;
//! assert_eq!(report.pushed, 1);
//! # }
//! ```

pub mod config;
pub mod conflict;
mod engine;
mod error;
pub mod metadata;
pub mod network;
pub mod protocol;
pub mod queue;
pub mod status;
pub mod store;
pub mod transport;

pub use config::SyncConfig;
pub use conflict::{Classification, Conflict, ConflictDetector, ConflictLog, ConflictSource};
pub use engine::{SyncEngine, SyncReport};
pub use error::{SyncError, SyncResult};
pub use metadata::add_sync_metadata;
pub use network::{
    ConnectivityEvent, ManualNetworkMonitor, NetworkMonitor, ReachabilityConfig,
    ReachabilityMonitor,
};
pub use protocol::{
    AcceptedChange, ChangeOperation, ChangeRecord, PullRequest, PullResponse, PushConflict,
    PushEntryError, PushRequest, PushResponse, RemoteChange, ServerStatus,
};
pub use queue::ChangeQueue;
pub use status::{StatusBus, Subscription, SyncState, SyncStatus};
pub use store::LocalStore;
pub use store::memory::InMemoryStore;
pub use transport::SyncTransport;
pub use transport::mock::MockTransport;
