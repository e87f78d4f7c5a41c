//! Operations the clone orchestrator consumes from the rest of the cluster.
//!
//! Everything behind [`ExternalFunctions`] is owned by another subsystem:
//! snapshot export/import, restore execution, the catalog, and the
//! tablet-server RPC layer. Implementations may block on network I/O.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::CloneError;
use crate::types::{
    Deadline, HybridTime, NamespaceId, RestorationId, SnapshotId, SnapshotScheduleId, TableId,
    TabletId,
};

/// Exported point-in-time description of a snapshot schedule's tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotDescriptor {
    pub snapshot_id: SnapshotId,
    /// Opaque snapshot metadata handed back to the importer unchanged.
    pub metadata: serde_json::Value,
}

/// A namespace created by importing a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedNamespace {
    pub new_id: NamespaceId,
    pub name: String,
}

/// Kind of an imported table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableKind {
    Sql,
    Cql,
    KeyValue,
    /// A table type this build does not know how to snapshot.
    Unrecognized(i32),
}

/// Source tablet and the target tablet it is cloned into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabletIdPair {
    pub old_id: TabletId,
    pub new_id: TabletId,
}

/// One table recreated by the import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedTable {
    pub old_id: TableId,
    pub new_id: TableId,
    pub kind: TableKind,
    pub tablets: Vec<TabletIdPair>,
}

/// Result of importing a snapshot descriptor as a new namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportedSnapshot {
    /// Source namespace id -> imported namespace.
    pub namespace_map: BTreeMap<NamespaceId, ImportedNamespace>,
    /// Source user-defined type id -> new type id.
    pub type_map: BTreeMap<String, String>,
    /// Source table id -> imported table.
    pub tables: BTreeMap<TableId, ImportedTable>,
}

/// Request to snapshot a set of tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSnapshotRequest {
    pub table_ids: Vec<TableId>,
    pub transaction_aware: bool,
    pub imported: bool,
    pub add_indexes: bool,
}

/// Catalog metadata of the table a target tablet belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetTableInfo {
    pub table_id: TableId,
    pub namespace_name: String,
    pub pg_table_id: Option<String>,
    pub schema: serde_json::Value,
    pub partition_schema: serde_json::Value,
    pub index_info: Option<serde_json::Value>,
}

/// Runtime view of a tablet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TabletInfo {
    pub tablet_id: TabletId,
    /// True once the tablet is running and serving.
    pub running: bool,
    pub table: TargetTableInfo,
}

/// Request sent to the tablet server hosting a source tablet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneTabletRequest {
    pub source_tablet_id: TabletId,
    pub target_tablet_id: TabletId,
    pub source_snapshot_id: SnapshotId,
    pub target_snapshot_id: SnapshotId,
    pub target_table_id: TableId,
    pub target_namespace_name: String,
    pub clone_request_seq_no: u32,
    pub target_pg_table_id: Option<String>,
    pub target_schema: serde_json::Value,
    pub target_partition_schema: serde_json::Value,
    pub target_index_info: Option<serde_json::Value>,
}

/// Progress of a restore as reported by the snapshot coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RestorationState {
    Restoring,
    Restored,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestorationInfo {
    pub id: RestorationId,
    pub state: RestorationState,
}

/// Handle to a namespace in the catalog.
pub trait NamespaceHandle: Send + Sync {
    fn id(&self) -> &NamespaceId;

    /// Atomically bump the namespace's clone counter and return the new value.
    fn fetch_and_increment_clone_seq_no(&self) -> u32;
}

/// Trait for the cluster operations the orchestrator drives.
///
/// Implementations must be thread-safe (`Send + Sync`). Errors are
/// surfaced to callers unchanged.
pub trait ExternalFunctions: Send + Sync {
    /// Snapshot schedule protecting `namespace_id`.
    fn find_snapshot_schedule(
        &self,
        namespace_id: &NamespaceId,
    ) -> Result<SnapshotScheduleId, CloneError>;

    fn export_snapshot_from_schedule(
        &self,
        schedule_id: &SnapshotScheduleId,
        as_of: HybridTime,
        deadline: Deadline,
    ) -> Result<SnapshotDescriptor, CloneError>;

    fn import_snapshot(
        &self,
        descriptor: &SnapshotDescriptor,
        target_namespace_name: &str,
        deadline: Deadline,
    ) -> Result<ImportedSnapshot, CloneError>;

    fn create_snapshot(
        &self,
        request: &CreateSnapshotRequest,
        deadline: Deadline,
    ) -> Result<SnapshotId, CloneError>;

    fn issue_restore(
        &self,
        snapshot_id: &SnapshotId,
        restore_at: HybridTime,
    ) -> Result<RestorationId, CloneError>;

    fn list_restorations(&self, snapshot_id: &SnapshotId)
        -> Result<Vec<RestorationInfo>, CloneError>;

    fn lookup_tablet(&self, tablet_id: &TabletId) -> Result<TabletInfo, CloneError>;

    fn lookup_namespace(
        &self,
        namespace_id: &NamespaceId,
    ) -> Result<Arc<dyn NamespaceHandle>, CloneError>;

    /// Schedule a remote clone on the server hosting `source_tablet`.
    /// Fire-and-forget: completion is observed through tablet state.
    fn dispatch_clone_tablet(
        &self,
        source_tablet: &TabletInfo,
        request: CloneTabletRequest,
    ) -> Result<(), CloneError>;
}
