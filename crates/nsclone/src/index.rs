//! In-memory map from source namespace to its current clone record.
//!
//! A single mutex covers membership. It is never held across a
//! collaborator or persistence call: callers take a point-in-time copy
//! with [`CloneIndex::snapshot`] and act on it after the lock is released.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::CloneError;
use crate::record::CloneRecord;
use crate::types::NamespaceId;

#[derive(Default)]
struct IndexInner {
    entries: HashMap<NamespaceId, Arc<CloneRecord>>,
    // Sources with a creation between its rejection check and its insert.
    reserved: HashSet<NamespaceId>,
}

/// Source namespace id -> tracked clone record.
#[derive(Default)]
pub struct CloneIndex {
    inner: Mutex<IndexInner>,
}

impl CloneIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, IndexInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("clone index mutex poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Tracked record for `source`, or `NotFound`.
    pub fn lookup(&self, source: &NamespaceId) -> Result<Arc<CloneRecord>, CloneError> {
        self.lock().entries.get(source).cloned().ok_or_else(|| {
            CloneError::NotFound(format!("no clone state for source namespace {source}"))
        })
    }

    /// First half of insert-or-reject: claim `source` for a new record.
    ///
    /// Rejects with `AlreadyPresent` if the tracked record for `source` is
    /// not terminal, or if another creation for `source` holds a
    /// reservation. The claim is released when the reservation is inserted
    /// or dropped.
    pub fn reserve_or_reject(
        &self,
        source: &NamespaceId,
    ) -> Result<IndexReservation<'_>, CloneError> {
        let mut inner = self.lock();
        let mut tracked_seq_no = None;
        if let Some(existing) = inner.entries.get(source) {
            let existing = existing.acquire_read();
            let state = existing.aggregate_state;
            tracked_seq_no = Some(existing.seq_no);
            if !state.is_terminal() {
                return Err(CloneError::AlreadyPresent(format!(
                    "cannot create new clone state because there is already an ongoing clone \
                     for source namespace {source} in state {state}"
                )));
            }
        }
        if !inner.reserved.insert(source.clone()) {
            return Err(CloneError::AlreadyPresent(format!(
                "cannot create new clone state because another clone for source namespace \
                 {source} is being created"
            )));
        }
        Ok(IndexReservation {
            index: self,
            source: source.clone(),
            tracked_seq_no,
        })
    }

    /// Track `record` unless a record with a higher `seq_no` is already
    /// tracked for the same source. Returns whether the record was inserted.
    pub fn load(&self, record: Arc<CloneRecord>) -> bool {
        let mut inner = self.lock();
        Self::insert_unless_downgrade(&mut inner, record)
    }

    fn insert_unless_downgrade(inner: &mut IndexInner, record: Arc<CloneRecord>) -> bool {
        let data = record.acquire_read();
        if let Some(existing) = inner.entries.get(&data.source_namespace_id) {
            let existing_seq_no = existing.acquire_read().seq_no;
            tracing::info!(
                source_namespace_id = %data.source_namespace_id,
                existing_seq_no,
                seq_no = data.seq_no,
                "Found existing clone state for source namespace"
            );
            if data.seq_no < existing_seq_no {
                return false;
            }
        }
        inner
            .entries
            .insert(data.source_namespace_id.clone(), Arc::clone(&record));
        true
    }

    /// Clear every tracked record, then replay `loader`'s records through
    /// [`CloneIndex::load`].
    pub fn reset_and_reload<F>(&self, loader: F) -> Result<(), CloneError>
    where
        F: FnOnce(&mut dyn FnMut(Arc<CloneRecord>)) -> Result<(), CloneError>,
    {
        self.lock().entries.clear();
        loader(&mut |record| {
            self.load(record);
        })
    }

    /// Point-in-time copy of all tracked entries.
    pub fn snapshot(&self) -> Vec<(NamespaceId, Arc<CloneRecord>)> {
        self.lock()
            .entries
            .iter()
            .map(|(source, record)| (source.clone(), Arc::clone(record)))
            .collect()
    }

    /// Visit a point-in-time copy of the index outside the lock.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&NamespaceId, &Arc<CloneRecord>),
    {
        for (source, record) in self.snapshot() {
            visitor(&source, &record);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Claim on a source namespace obtained from [`CloneIndex::reserve_or_reject`].
#[must_use = "dropping a reservation releases it without inserting"]
pub struct IndexReservation<'a> {
    index: &'a CloneIndex,
    source: NamespaceId,
    tracked_seq_no: Option<u32>,
}

impl IndexReservation<'_> {
    pub fn source(&self) -> &NamespaceId {
        &self.source
    }

    /// seq_no of the terminal record tracked for the source when the claim
    /// was taken, if any. A new record must carry a strictly higher one.
    pub fn tracked_seq_no(&self) -> Option<u32> {
        self.tracked_seq_no
    }

    /// Insert the (already persisted) record and release the claim.
    pub fn insert(self, record: Arc<CloneRecord>) -> bool {
        let mut inner = self.index.lock();
        let inserted = CloneIndex::insert_unless_downgrade(&mut inner, record);
        if !inserted {
            tracing::warn!(
                source_namespace_id = %self.source,
                "Newer clone state already tracked, not replacing it"
            );
        }
        inserted
        // Drop releases the claim.
    }
}

impl Drop for IndexReservation<'_> {
    fn drop(&mut self) {
        self.index.lock().reserved.remove(&self.source);
    }
}
