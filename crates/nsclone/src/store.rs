use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::error::CloneError;
use crate::record::CloneStateData;
use crate::types::CloneId;

/// Visitor applied to every durably stored clone record during a load.
pub type RecordVisitor<'a> = dyn FnMut(CloneId, CloneStateData) -> Result<(), CloneError> + 'a;

/// Trait for durable clone record storage.
///
/// Implementations must be thread-safe (`Send + Sync`).
pub trait CloneRecordStore: Send + Sync {
    /// Durably write the record. Must not return `Ok` unless the write
    /// survives a restart.
    fn upsert(&self, id: &CloneId, data: &CloneStateData) -> Result<(), CloneError>;

    /// Replay every stored record through `visitor`. Stops at the first
    /// visitor error and returns it.
    fn load_all(&self, visitor: &mut RecordVisitor<'_>) -> Result<(), CloneError>;
}

/// In-memory record store backed by DashMap. Fast but lost on restart.
pub struct InMemoryCloneRecordStore {
    records: DashMap<CloneId, (u64, CloneStateData)>,
    next_version: AtomicU64,
    fail_writes: AtomicBool,
}

impl InMemoryCloneRecordStore {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            next_version: AtomicU64::new(0),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Simulate an unavailable backend: while set, every `upsert` fails.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn get(&self, id: &CloneId) -> Option<CloneStateData> {
        self.records.get(id).map(|entry| entry.value().1.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for InMemoryCloneRecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CloneRecordStore for InMemoryCloneRecordStore {
    fn upsert(&self, id: &CloneId, data: &CloneStateData) -> Result<(), CloneError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CloneError::Collaborator(format!(
                "record store unavailable, cannot persist clone {id}"
            )));
        }
        let version = self.next_version.fetch_add(1, Ordering::SeqCst);
        self.records.insert(id.clone(), (version, data.clone()));
        Ok(())
    }

    fn load_all(&self, visitor: &mut RecordVisitor<'_>) -> Result<(), CloneError> {
        // Copy out first so the visitor never runs under a shard lock.
        let mut rows: Vec<(u64, CloneId, CloneStateData)> = self
            .records
            .iter()
            .map(|entry| (entry.value().0, entry.key().clone(), entry.value().1.clone()))
            .collect();
        rows.sort_by_key(|(version, _, _)| *version);
        for (_, id, data) in rows {
            visitor(id, data)?;
        }
        Ok(())
    }
}

#[cfg(feature = "full")]
pub use sqlite::SqliteCloneRecordStore;

#[cfg(feature = "full")]
mod sqlite {
    use rusqlite::{params, Connection};
    use std::sync::{Mutex, MutexGuard};

    use super::{CloneRecordStore, RecordVisitor};
    use crate::error::CloneError;
    use crate::record::CloneStateData;
    use crate::types::CloneId;

    const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS clone_states (
        id TEXT PRIMARY KEY,
        source_namespace_id TEXT NOT NULL,
        seq_no INTEGER NOT NULL,
        aggregate_state TEXT NOT NULL,
        data TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_clone_states_source ON clone_states(source_namespace_id);
    "#;

    /// Persistent record store backed by SQLite. Survives restarts.
    ///
    /// Records superseded by a newer clone of the same source are kept; only
    /// the in-memory index drops them.
    pub struct SqliteCloneRecordStore {
        conn: Mutex<Connection>,
    }

    impl SqliteCloneRecordStore {
        /// Open (or create) a SQLite clone state database at the given path.
        ///
        /// On Unix systems, the database file permissions are restricted to 0600.
        pub fn open(path: &str) -> Result<Self, CloneError> {
            let conn = Connection::open(path)?;
            conn.execute_batch("PRAGMA journal_mode=WAL;")?;
            conn.execute_batch(SCHEMA)?;

            #[cfg(unix)]
            if path != ":memory:" {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) =
                    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                {
                    tracing::warn!(
                        path = %path,
                        error = %e,
                        "failed to set clone state database file permissions to 0600"
                    );
                }
            }

            Ok(Self {
                conn: Mutex::new(conn),
            })
        }

        fn conn(&self) -> MutexGuard<'_, Connection> {
            match self.conn.lock() {
                Ok(c) => c,
                Err(poisoned) => {
                    tracing::error!("clone state store mutex poisoned, recovering");
                    poisoned.into_inner()
                }
            }
        }

        /// Number of stored records, including superseded ones.
        pub fn count(&self) -> Result<u64, CloneError> {
            let count: i64 =
                self.conn()
                    .query_row("SELECT COUNT(*) FROM clone_states", [], |row| row.get(0))?;
            Ok(count.max(0) as u64)
        }
    }

    impl CloneRecordStore for SqliteCloneRecordStore {
        fn upsert(&self, id: &CloneId, data: &CloneStateData) -> Result<(), CloneError> {
            let json = serde_json::to_string(data)?;
            let now = chrono::Utc::now().timestamp_micros();
            self.conn().execute(
                "INSERT INTO clone_states \
                     (id, source_namespace_id, seq_no, aggregate_state, data, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
                 ON CONFLICT(id) DO UPDATE SET \
                     seq_no = excluded.seq_no, \
                     aggregate_state = excluded.aggregate_state, \
                     data = excluded.data, \
                     updated_at = excluded.updated_at",
                params![
                    id.as_str(),
                    data.source_namespace_id.as_str(),
                    data.seq_no,
                    data.aggregate_state.as_str(),
                    json,
                    now,
                ],
            )?;
            Ok(())
        }

        fn load_all(&self, visitor: &mut RecordVisitor<'_>) -> Result<(), CloneError> {
            let rows = {
                let conn = self.conn();
                let mut stmt = conn
                    .prepare("SELECT id, data FROM clone_states ORDER BY updated_at ASC, id ASC")?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                rows
            };

            for (id, json) in rows {
                let data: CloneStateData = serde_json::from_str(&json)?;
                visitor(CloneId::new(id), data)?;
            }
            Ok(())
        }
    }
}
