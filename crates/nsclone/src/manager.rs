//! Clone orchestration: creates clone records and answers completion queries.
//!
//! Starting a clone runs synchronously through snapshot export, import,
//! target snapshot creation, record creation and dispatch of one remote
//! clone call per tablet. Everything after that is driven by the
//! reconciliation sweep in [`crate::reconcile`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::CloneConfig;
use crate::error::CloneError;
use crate::external::{
    CloneTabletRequest, CreateSnapshotRequest, ExternalFunctions, ImportedSnapshot, TableKind,
};
use crate::index::{CloneIndex, IndexReservation};
use crate::metrics;
use crate::record::{AggregateState, CloneRecord, CloneStateData, TabletCloneEntry};
use crate::store::CloneRecordStore;
use crate::types::{CloneId, Deadline, HybridTime, NamespaceId, SnapshotId, SnapshotScheduleId};

/// What to clone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloneSource {
    /// The namespace, through the snapshot schedule that protects it.
    Namespace(NamespaceId),
    /// Whatever namespace the schedule covers.
    SnapshotSchedule(SnapshotScheduleId),
}

/// Drives clone records from creation to `RESTORED`.
pub struct CloneStateManager {
    pub(crate) external: Arc<dyn ExternalFunctions>,
    pub(crate) store: Arc<dyn CloneRecordStore>,
    pub(crate) index: CloneIndex,
    enabled: AtomicBool,
    rpc_timeout: Duration,
}

impl CloneStateManager {
    pub fn new(
        external: Arc<dyn ExternalFunctions>,
        store: Arc<dyn CloneRecordStore>,
        config: &CloneConfig,
    ) -> Self {
        Self {
            external,
            store,
            index: CloneIndex::new(),
            enabled: AtomicBool::new(config.enable_db_clone),
            rpc_timeout: config.rpc_timeout(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Flip the clone feature flag at runtime. Clones already tracked keep
    /// being reconciled either way.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        tracing::info!(enabled, "DB clone feature flag updated");
    }

    /// Deadline applied to boundary requests that carry none.
    pub fn default_deadline(&self) -> Deadline {
        Deadline::after(self.rpc_timeout)
    }

    /// Start cloning `source` as of `restore_time` into a new namespace.
    ///
    /// Steps:
    /// 1. Export the snapshot descriptor from the source's schedule
    /// 2. Import it as `target_namespace_name`
    /// 3. Snapshot the imported tables
    /// 4. Reject if the source has a clone in flight, else allocate its
    ///    next clone seq_no
    /// 5. Persist and track the clone record
    /// 6. Dispatch one clone call per tablet
    ///
    /// Returns the source namespace id and the allocated seq_no.
    pub fn start_clone(
        &self,
        source: CloneSource,
        restore_time: HybridTime,
        target_namespace_name: &str,
        deadline: Deadline,
    ) -> Result<(NamespaceId, u32), CloneError> {
        if !self.is_enabled() {
            return Err(CloneError::Configuration(
                "enable_db_clone is disabled".to_string(),
            ));
        }
        if target_namespace_name.is_empty() {
            return Err(CloneError::InvalidArgument(
                "got empty target namespace name".to_string(),
            ));
        }

        let schedule_id = match &source {
            CloneSource::SnapshotSchedule(id) => *id,
            CloneSource::Namespace(namespace_id) => {
                self.external.find_snapshot_schedule(namespace_id)?
            }
        };

        tracing::info!(
            schedule_id = %schedule_id,
            restore_time = %restore_time,
            target_namespace_name,
            "Starting clone"
        );

        // 1. Export
        let descriptor =
            self.external
                .export_snapshot_from_schedule(&schedule_id, restore_time, deadline)?;
        let source_snapshot_id = descriptor.snapshot_id;

        // 2. Import
        let imported = self
            .external
            .import_snapshot(&descriptor, target_namespace_name, deadline)?;
        if imported.namespace_map.len() != 1 {
            return Err(CloneError::IllegalState(format!(
                "expected 1 namespace, got {}",
                imported.namespace_map.len()
            )));
        }
        let source_namespace_id = imported
            .namespace_map
            .keys()
            .next()
            .cloned()
            .ok_or_else(|| CloneError::Internal("namespace map emptied".to_string()))?;
        if let CloneSource::Namespace(requested) = &source {
            if *requested != source_namespace_id {
                return Err(CloneError::IllegalState(format!(
                    "snapshot schedule {schedule_id} covers namespace {source_namespace_id}, \
                     not the requested namespace {requested}"
                )));
            }
        }

        // 3. Snapshot the imported tables. Imported snapshots are created
        // synchronously, so tablets may be cloned from it right away.
        let create_request = target_snapshot_request(&imported)?;
        let target_snapshot_id = self.external.create_snapshot(&create_request, deadline)?;
        tracing::info!(
            source_snapshot_id = %source_snapshot_id,
            target_snapshot_id = %target_snapshot_id,
            tables = create_request.table_ids.len(),
            "Target snapshot created"
        );

        // 4. Claim the source, then allocate seq_no. A rejected request
        // never consumes a seq_no.
        let reservation = self
            .index
            .reserve_or_reject(&source_namespace_id)
            .inspect_err(|_| metrics::CLONES_REJECTED.inc())?;
        let seq_no = self
            .external
            .lookup_namespace(&source_namespace_id)?
            .fetch_and_increment_clone_seq_no();

        // 5. Persist + track
        let record = self.create_clone_state(
            reservation,
            seq_no,
            &source_namespace_id,
            target_namespace_name,
            source_snapshot_id,
            target_snapshot_id,
            restore_time,
            &imported,
        )?;

        // 6. Dispatch
        self.schedule_clone_ops(&record)?;

        Ok((source_namespace_id, seq_no))
    }

    #[allow(clippy::too_many_arguments)]
    fn create_clone_state(
        &self,
        reservation: IndexReservation<'_>,
        seq_no: u32,
        source_namespace_id: &NamespaceId,
        target_namespace_name: &str,
        source_snapshot_id: SnapshotId,
        target_snapshot_id: SnapshotId,
        restore_time: HybridTime,
        imported: &ImportedSnapshot,
    ) -> Result<Arc<CloneRecord>, CloneError> {
        if let Some(tracked) = reservation.tracked_seq_no() {
            if seq_no <= tracked {
                return Err(CloneError::IllegalState(format!(
                    "allocated clone seq_no {seq_no} for namespace {source_namespace_id} \
                     is not newer than the tracked seq_no {tracked}"
                )));
            }
        }

        let tablets: Vec<TabletCloneEntry> = imported
            .tables
            .values()
            .flat_map(|table| table.tablets.iter())
            .map(|pair| TabletCloneEntry {
                source_tablet_id: pair.old_id.clone(),
                target_tablet_id: pair.new_id.clone(),
            })
            .collect();

        // A namespace without tablets has nothing to clone.
        let aggregate_state = if tablets.is_empty() {
            AggregateState::Restored
        } else {
            AggregateState::Creating
        };

        let data = CloneStateData {
            seq_no,
            source_namespace_id: source_namespace_id.clone(),
            target_namespace_name: target_namespace_name.to_string(),
            source_snapshot_id,
            target_snapshot_id,
            restore_time,
            aggregate_state,
            tablets,
        };

        let record = CloneRecord::create(CloneId::generate(), data, self.store.as_ref())?;
        if !reservation.insert(Arc::clone(&record)) {
            return Err(CloneError::IllegalState(format!(
                "clone {} for namespace {source_namespace_id} with seq_no {seq_no} \
                 was superseded before it could be tracked",
                record.id()
            )));
        }

        metrics::CLONES_STARTED.inc();
        tracing::info!(
            clone_id = %record.id(),
            source_namespace_id = %source_namespace_id,
            seq_no,
            state = %aggregate_state,
            tablets = record.acquire_read().tablets.len(),
            "Clone state created"
        );
        Ok(record)
    }

    fn schedule_clone_ops(&self, record: &CloneRecord) -> Result<(), CloneError> {
        let data = record.acquire_read();
        for entry in &data.tablets {
            let source_tablet = self.external.lookup_tablet(&entry.source_tablet_id)?;
            let target_tablet = self.external.lookup_tablet(&entry.target_tablet_id)?;
            let target_table = target_tablet.table;

            let request = CloneTabletRequest {
                source_tablet_id: entry.source_tablet_id.clone(),
                target_tablet_id: entry.target_tablet_id.clone(),
                source_snapshot_id: data.source_snapshot_id,
                target_snapshot_id: data.target_snapshot_id,
                target_table_id: target_table.table_id,
                target_namespace_name: target_table.namespace_name,
                clone_request_seq_no: data.seq_no,
                target_pg_table_id: target_table.pg_table_id,
                target_schema: target_table.schema,
                target_partition_schema: target_table.partition_schema,
                target_index_info: target_table.index_info,
            };
            self.external.dispatch_clone_tablet(&source_tablet, request)?;
            tracing::debug!(
                source_tablet_id = %entry.source_tablet_id,
                target_tablet_id = %entry.target_tablet_id,
                seq_no = data.seq_no,
                "Clone tablet call scheduled"
            );
        }
        Ok(())
    }

    /// Whether the clone identified by (`source_namespace_id`, `seq_no`) is done.
    ///
    /// A newer clone of the same source implies the queried one is done.
    pub fn is_clone_done(
        &self,
        source_namespace_id: &NamespaceId,
        seq_no: u32,
    ) -> Result<bool, CloneError> {
        let record = self.index.lookup(source_namespace_id).map_err(|_| {
            CloneError::IllegalState(format!(
                "clone seq_no {seq_no} never started for namespace {source_namespace_id} \
                 (no clone state)"
            ))
        })?;
        let data = record.acquire_read();
        let current_seq_no = data.seq_no;
        match current_seq_no.cmp(&seq_no) {
            std::cmp::Ordering::Greater => Ok(true),
            std::cmp::Ordering::Equal => Ok(data.aggregate_state == AggregateState::Restored),
            std::cmp::Ordering::Less => Err(CloneError::IllegalState(format!(
                "clone seq_no {seq_no} never started for namespace {source_namespace_id} \
                 (current seq no {current_seq_no})"
            ))),
        }
    }

    /// Committed state of the clone tracked for `source_namespace_id`.
    pub fn clone_state(
        &self,
        source_namespace_id: &NamespaceId,
    ) -> Result<Arc<CloneStateData>, CloneError> {
        Ok(self.index.lookup(source_namespace_id)?.acquire_read())
    }

    /// Rebuild the index from the durable store. Run at startup and
    /// whenever this process becomes leader.
    pub fn reload_all(&self) -> Result<(), CloneError> {
        let mut loaded = 0usize;
        self.index.reset_and_reload(|load| {
            self.store.load_all(&mut |id, data| {
                loaded += 1;
                load(CloneRecord::from_committed(id, data));
                Ok(())
            })
        })?;
        tracing::info!(
            loaded,
            tracked = self.index.len(),
            "Clone states reloaded"
        );
        Ok(())
    }

    pub fn tracked_count(&self) -> usize {
        self.index.len()
    }
}

fn target_snapshot_request(
    imported: &ImportedSnapshot,
) -> Result<CreateSnapshotRequest, CloneError> {
    let mut table_ids = Vec::with_capacity(imported.tables.len());
    for table in imported.tables.values() {
        if let TableKind::Unrecognized(raw) = table.kind {
            return Err(CloneError::Internal(format!(
                "found unknown table type {raw} for table {}",
                table.new_id
            )));
        }
        table_ids.push(table.new_id.clone());
    }
    // The import already enumerated every index; do not add them twice.
    Ok(CreateSnapshotRequest {
        table_ids,
        transaction_aware: true,
        imported: true,
        add_indexes: false,
    })
}
