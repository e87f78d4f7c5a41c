//! In-process fake cluster implementing the orchestrator's collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use nsclone::external::{
    CloneTabletRequest, CreateSnapshotRequest, ImportedNamespace, ImportedSnapshot, ImportedTable,
    RestorationInfo, RestorationState, SnapshotDescriptor, TableKind, TabletIdPair, TabletInfo,
    TargetTableInfo,
};
use nsclone::{
    CloneConfig, CloneError, CloneRecordStore, CloneStateManager, Deadline, ExternalFunctions,
    HybridTime, NamespaceHandle, NamespaceId, RestorationId, SnapshotId, SnapshotScheduleId,
    TableId, TabletId,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("nsclone=debug")
        .with_test_writer()
        .try_init();
}

pub fn enabled_config() -> CloneConfig {
    CloneConfig {
        enable_db_clone: true,
        ..CloneConfig::default()
    }
}

pub fn manager(cluster: &Arc<FakeCluster>, store: Arc<dyn CloneRecordStore>) -> CloneStateManager {
    CloneStateManager::new(cluster.clone(), store, &enabled_config())
}

pub fn deadline() -> Deadline {
    Deadline::after(std::time::Duration::from_secs(30))
}

pub struct FakeNamespace {
    id: NamespaceId,
    clone_seq_no: AtomicU32,
}

impl NamespaceHandle for FakeNamespace {
    fn id(&self) -> &NamespaceId {
        &self.id
    }

    fn fetch_and_increment_clone_seq_no(&self) -> u32 {
        self.clone_seq_no.fetch_add(1, Ordering::SeqCst) + 1
    }
}

struct SourceNamespace {
    handle: Arc<FakeNamespace>,
    schedule_id: SnapshotScheduleId,
    tables: Vec<(TableKind, usize)>,
}

#[derive(Default)]
pub struct FakeCluster {
    namespaces: Mutex<HashMap<NamespaceId, SourceNamespace>>,
    exported: Mutex<HashMap<SnapshotId, NamespaceId>>,
    tablets: Mutex<HashMap<TabletId, TabletInfo>>,
    restorations: Mutex<HashMap<SnapshotId, Vec<RestorationInfo>>>,
    dispatched: Mutex<Vec<CloneTabletRequest>>,
    snapshot_requests: Mutex<Vec<CreateSnapshotRequest>>,
    next_id: AtomicUsize,
    restore_calls: AtomicUsize,
    pub fail_create_snapshot: AtomicBool,
    pub extra_namespace_on_import: AtomicBool,
    pub fail_dispatch: AtomicBool,
}

impl FakeCluster {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next(&self) -> usize {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Register a source namespace with one SQL table of `tablets` tablets.
    pub fn add_namespace(&self, id: &str, tablets: usize) -> SnapshotScheduleId {
        let tables = if tablets == 0 {
            vec![]
        } else {
            vec![(TableKind::Sql, tablets)]
        };
        self.add_namespace_with_tables(id, tables)
    }

    pub fn add_namespace_with_tables(
        &self,
        id: &str,
        tables: Vec<(TableKind, usize)>,
    ) -> SnapshotScheduleId {
        let schedule_id = SnapshotScheduleId::generate();
        let namespace_id = NamespaceId::new(id);
        self.namespaces.lock().unwrap().insert(
            namespace_id.clone(),
            SourceNamespace {
                handle: Arc::new(FakeNamespace {
                    id: namespace_id,
                    clone_seq_no: AtomicU32::new(0),
                }),
                schedule_id,
                tables,
            },
        );
        schedule_id
    }

    pub fn set_tablet_running(&self, tablet_id: &TabletId, running: bool) {
        if let Some(tablet) = self.tablets.lock().unwrap().get_mut(tablet_id) {
            tablet.running = running;
        }
    }

    pub fn set_targets_running(&self, targets: &[TabletId]) {
        for tablet in targets {
            self.set_tablet_running(tablet, true);
        }
    }

    pub fn complete_restorations(&self) {
        for list in self.restorations.lock().unwrap().values_mut() {
            for restoration in list.iter_mut() {
                restoration.state = RestorationState::Restored;
            }
        }
    }

    pub fn add_restoration(&self, snapshot_id: SnapshotId, state: RestorationState) {
        self.restorations
            .lock()
            .unwrap()
            .entry(snapshot_id)
            .or_default()
            .push(RestorationInfo {
                id: RestorationId::generate(),
                state,
            });
    }

    pub fn restore_calls(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    pub fn dispatched(&self) -> Vec<CloneTabletRequest> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn snapshot_requests(&self) -> Vec<CreateSnapshotRequest> {
        self.snapshot_requests.lock().unwrap().clone()
    }

    fn table_info(table_id: &TableId, namespace_name: &str) -> TargetTableInfo {
        TargetTableInfo {
            table_id: table_id.clone(),
            namespace_name: namespace_name.to_string(),
            pg_table_id: Some(format!("pg-{table_id}")),
            schema: serde_json::json!({ "columns": ["k", "v"] }),
            partition_schema: serde_json::json!({ "hash": ["k"] }),
            index_info: None,
        }
    }
}

impl ExternalFunctions for FakeCluster {
    fn find_snapshot_schedule(
        &self,
        namespace_id: &NamespaceId,
    ) -> Result<SnapshotScheduleId, CloneError> {
        self.namespaces
            .lock()
            .unwrap()
            .get(namespace_id)
            .map(|ns| ns.schedule_id)
            .ok_or_else(|| CloneError::NotFound(format!("no schedule for {namespace_id}")))
    }

    fn export_snapshot_from_schedule(
        &self,
        schedule_id: &SnapshotScheduleId,
        as_of: HybridTime,
        _deadline: Deadline,
    ) -> Result<SnapshotDescriptor, CloneError> {
        let namespace_id = self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .find(|(_, ns)| ns.schedule_id == *schedule_id)
            .map(|(id, _)| id.clone())
            .ok_or_else(|| CloneError::NotFound(format!("schedule {schedule_id}")))?;
        let snapshot_id = SnapshotId::generate();
        self.exported
            .lock()
            .unwrap()
            .insert(snapshot_id, namespace_id.clone());
        Ok(SnapshotDescriptor {
            snapshot_id,
            metadata: serde_json::json!({ "namespace": namespace_id, "as_of": as_of }),
        })
    }

    fn import_snapshot(
        &self,
        descriptor: &SnapshotDescriptor,
        target_namespace_name: &str,
        _deadline: Deadline,
    ) -> Result<ImportedSnapshot, CloneError> {
        let source = self
            .exported
            .lock()
            .unwrap()
            .get(&descriptor.snapshot_id)
            .cloned()
            .ok_or_else(|| CloneError::NotFound("unknown snapshot".to_string()))?;
        let tables = self.namespaces.lock().unwrap()[&source].tables.clone();

        let mut imported = ImportedSnapshot::default();
        imported.namespace_map.insert(
            source.clone(),
            ImportedNamespace {
                new_id: NamespaceId::new(format!("{target_namespace_name}-{}", self.next())),
                name: target_namespace_name.to_string(),
            },
        );
        if self.extra_namespace_on_import.load(Ordering::SeqCst) {
            imported.namespace_map.insert(
                NamespaceId::new("other"),
                ImportedNamespace {
                    new_id: NamespaceId::new("other-clone"),
                    name: target_namespace_name.to_string(),
                },
            );
        }

        let mut registry = self.tablets.lock().unwrap();
        for (t, (kind, tablet_count)) in tables.into_iter().enumerate() {
            let old_table = TableId::new(format!("{source}-table-{t}"));
            let new_table =
                TableId::new(format!("{target_namespace_name}-table-{t}-{}", self.next()));
            let mut pairs = Vec::new();
            for _ in 0..tablet_count {
                let n = self.next();
                let old_id = TabletId::new(format!("{source}-tablet-{n}"));
                let new_id = TabletId::new(format!("{target_namespace_name}-tablet-{n}"));
                registry.insert(
                    old_id.clone(),
                    TabletInfo {
                        tablet_id: old_id.clone(),
                        running: true,
                        table: Self::table_info(&old_table, source.as_str()),
                    },
                );
                registry.insert(
                    new_id.clone(),
                    TabletInfo {
                        tablet_id: new_id.clone(),
                        running: false,
                        table: Self::table_info(&new_table, target_namespace_name),
                    },
                );
                pairs.push(TabletIdPair { old_id, new_id });
            }
            imported.tables.insert(
                old_table.clone(),
                ImportedTable {
                    old_id: old_table,
                    new_id: new_table,
                    kind,
                    tablets: pairs,
                },
            );
        }
        Ok(imported)
    }

    fn create_snapshot(
        &self,
        request: &CreateSnapshotRequest,
        _deadline: Deadline,
    ) -> Result<SnapshotId, CloneError> {
        if self.fail_create_snapshot.load(Ordering::SeqCst) {
            return Err(CloneError::Collaborator("snapshot coordinator unavailable".into()));
        }
        self.snapshot_requests.lock().unwrap().push(request.clone());
        Ok(SnapshotId::generate())
    }

    fn issue_restore(
        &self,
        snapshot_id: &SnapshotId,
        _restore_at: HybridTime,
    ) -> Result<RestorationId, CloneError> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        let id = RestorationId::generate();
        self.restorations
            .lock()
            .unwrap()
            .entry(*snapshot_id)
            .or_default()
            .push(RestorationInfo {
                id,
                state: RestorationState::Restoring,
            });
        Ok(id)
    }

    fn list_restorations(
        &self,
        snapshot_id: &SnapshotId,
    ) -> Result<Vec<RestorationInfo>, CloneError> {
        Ok(self
            .restorations
            .lock()
            .unwrap()
            .get(snapshot_id)
            .cloned()
            .unwrap_or_default())
    }

    fn lookup_tablet(&self, tablet_id: &TabletId) -> Result<TabletInfo, CloneError> {
        self.tablets
            .lock()
            .unwrap()
            .get(tablet_id)
            .cloned()
            .ok_or_else(|| CloneError::NotFound(format!("tablet {tablet_id}")))
    }

    fn lookup_namespace(
        &self,
        namespace_id: &NamespaceId,
    ) -> Result<Arc<dyn NamespaceHandle>, CloneError> {
        self.namespaces
            .lock()
            .unwrap()
            .get(namespace_id)
            .map(|ns| ns.handle.clone() as Arc<dyn NamespaceHandle>)
            .ok_or_else(|| CloneError::NotFound(format!("namespace {namespace_id}")))
    }

    fn dispatch_clone_tablet(
        &self,
        source_tablet: &TabletInfo,
        request: CloneTabletRequest,
    ) -> Result<(), CloneError> {
        assert_eq!(source_tablet.tablet_id, request.source_tablet_id);
        if self.fail_dispatch.load(Ordering::SeqCst) {
            return Err(CloneError::Collaborator(format!(
                "tablet server for {} unreachable",
                source_tablet.tablet_id
            )));
        }
        self.dispatched.lock().unwrap().push(request);
        Ok(())
    }
}

/// Target tablet ids of the clone tracked for `source`.
pub fn target_tablets(manager: &CloneStateManager, source: &str) -> Vec<TabletId> {
    manager
        .clone_state(&NamespaceId::new(source))
        .unwrap()
        .tablets
        .iter()
        .map(|entry| entry.target_tablet_id.clone())
        .collect()
}
