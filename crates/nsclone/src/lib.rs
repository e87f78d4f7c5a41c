//! nsclone: crash-recoverable namespace cloning for a distributed database
//! control plane.
//!
//! A clone takes a source namespace (at a past point in time, through its
//! snapshot schedule) and produces a new target namespace whose tablets are
//! cloned from the source tablets, then restored to the requested time.
//!
//! # Lifecycle
//!
//! - [`CloneStateManager::start_clone`] exports and imports the snapshot,
//!   persists a [`CloneRecord`] and dispatches one clone call per tablet
//! - [`CloneStateManager::run`], invoked periodically, moves each record
//!   `CREATING -> RESTORING -> RESTORED`
//! - [`CloneStateManager::reload_all`] rebuilds in-memory state from the
//!   durable store after a restart or leader change
//!
//! The cluster is reached only through [`ExternalFunctions`] and
//! [`CloneRecordStore`], so the manager runs against test doubles.

pub mod api;
pub mod config;
pub mod error;
pub mod external;
pub mod index;
pub mod manager;
pub mod metrics;
pub mod reconcile;
pub mod record;
pub mod store;
pub mod types;

// Re-exports
pub use config::CloneConfig;
pub use error::{CloneError, CloneErrorKind};
pub use external::{ExternalFunctions, NamespaceHandle};
pub use index::CloneIndex;
pub use manager::{CloneSource, CloneStateManager};
pub use record::{AggregateState, CloneRecord, CloneStateData, TabletCloneEntry};
pub use store::{CloneRecordStore, InMemoryCloneRecordStore};
pub use types::*;

#[cfg(feature = "full")]
pub use reconcile::spawn_reconciler;
#[cfg(feature = "full")]
pub use store::SqliteCloneRecordStore;
