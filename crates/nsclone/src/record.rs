//! The clone record: one persisted unit of work per clone attempt.
//!
//! Readers get an immutable [`Arc`] snapshot of the last committed state.
//! Writers get a private staged copy through [`CloneRecord::acquire_write`];
//! the staged copy becomes visible only after [`CloneWriteLock::commit`]
//! has durably persisted it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::error::CloneError;
use crate::store::CloneRecordStore;
use crate::types::{CloneId, HybridTime, NamespaceId, SnapshotId, TabletId};

/// Clone-wide lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AggregateState {
    /// Target tablets are being cloned from their source tablets.
    Creating,
    /// All target tablets run; waiting for the restore to complete.
    Restoring,
    /// Terminal.
    Restored,
}

impl AggregateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "CREATING",
            Self::Restoring => "RESTORING",
            Self::Restored => "RESTORED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Restored)
    }
}

impl fmt::Display for AggregateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tablet being cloned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletCloneEntry {
    pub source_tablet_id: TabletId,
    pub target_tablet_id: TabletId,
}

/// The persisted fields of a clone record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneStateData {
    pub seq_no: u32,
    pub source_namespace_id: NamespaceId,
    pub target_namespace_name: String,
    pub source_snapshot_id: SnapshotId,
    pub target_snapshot_id: SnapshotId,
    pub restore_time: HybridTime,
    pub aggregate_state: AggregateState,
    /// Fixed at creation.
    pub tablets: Vec<TabletCloneEntry>,
}

/// In-memory handle to a clone record.
pub struct CloneRecord {
    id: CloneId,
    committed: RwLock<Arc<CloneStateData>>,
    // Serializes writers so two staged copies never race to commit.
    write_gate: Mutex<()>,
}

impl CloneRecord {
    /// Wrap state that is already durable (loaded from the store or just persisted).
    pub fn from_committed(id: CloneId, data: CloneStateData) -> Arc<Self> {
        Arc::new(Self {
            id,
            committed: RwLock::new(Arc::new(data)),
            write_gate: Mutex::new(()),
        })
    }

    /// Persist `data` as a brand new record and return the committed handle.
    /// Nothing is returned (and nothing becomes visible) if persistence fails.
    pub fn create(
        id: CloneId,
        data: CloneStateData,
        store: &dyn CloneRecordStore,
    ) -> Result<Arc<Self>, CloneError> {
        store.upsert(&id, &data)?;
        Ok(Self::from_committed(id, data))
    }

    pub fn id(&self) -> &CloneId {
        &self.id
    }

    /// Immutable snapshot of the last committed state.
    pub fn acquire_read(&self) -> Arc<CloneStateData> {
        let committed = self.committed.read().unwrap_or_else(|poisoned| {
            tracing::error!(clone_id = %self.id, "clone record lock poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&committed)
    }

    /// Private mutable copy of the committed state. Blocks other writers of
    /// this record until the returned lock is committed or dropped.
    pub fn acquire_write(&self) -> CloneWriteLock<'_> {
        let gate = self.write_gate.lock().unwrap_or_else(PoisonError::into_inner);
        let staged = (*self.acquire_read()).clone();
        CloneWriteLock {
            record: self,
            staged,
            _gate: gate,
        }
    }
}

impl fmt::Debug for CloneRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloneRecord")
            .field("id", &self.id)
            .field("committed", &self.acquire_read())
            .finish()
    }
}

/// Staged mutation of a [`CloneRecord`]. Dropping it discards the staged copy.
pub struct CloneWriteLock<'a> {
    record: &'a CloneRecord,
    staged: CloneStateData,
    _gate: MutexGuard<'a, ()>,
}

impl CloneWriteLock<'_> {
    pub fn data(&self) -> &CloneStateData {
        &self.staged
    }

    pub fn data_mut(&mut self) -> &mut CloneStateData {
        &mut self.staged
    }

    /// Durably persist the staged copy, then publish it to readers.
    ///
    /// On persistence failure the staged copy is dropped and the committed
    /// state is left untouched.
    pub fn commit(self, store: &dyn CloneRecordStore) -> Result<(), CloneError> {
        store.upsert(&self.record.id, &self.staged)?;
        let mut committed = self
            .record
            .committed
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *committed = Arc::new(self.staged);
        Ok(())
    }
}

impl std::ops::Deref for CloneWriteLock<'_> {
    type Target = CloneStateData;

    fn deref(&self) -> &CloneStateData {
        &self.staged
    }
}
