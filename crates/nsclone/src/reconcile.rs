//! Reconciliation sweep: advances every tracked clone one step.
//!
//! Handlers are re-entrant. They re-check tablet and restore status on
//! every sweep instead of re-issuing work, so a crash or failover between
//! issuing a restore and persisting `RESTORING` heals on the next sweep.

use crate::error::CloneError;
use crate::external::RestorationState;
use crate::manager::CloneStateManager;
use crate::metrics;
use crate::record::{AggregateState, CloneRecord};

impl CloneStateManager {
    /// Advance every tracked clone record by at most one state.
    ///
    /// Per-record failures are logged and retried on the next sweep; they
    /// never stop the sweep.
    pub fn run(&self) {
        let mut in_progress: i64 = 0;
        self.index.for_each(|source_namespace_id, record| {
            let state = record.acquire_read().aggregate_state;
            let result = match state {
                AggregateState::Creating => self.handle_creating(record),
                AggregateState::Restoring => self.handle_restoring(record),
                AggregateState::Restored => Ok(()),
            };
            if let Err(e) = result {
                metrics::RECONCILE_FAILURES.inc();
                tracing::warn!(
                    source_namespace_id = %source_namespace_id,
                    clone_id = %record.id(),
                    state = %state,
                    error = %e,
                    "Could not handle clone state for source namespace"
                );
            }
            if !record.acquire_read().aggregate_state.is_terminal() {
                in_progress += 1;
            }
        });
        metrics::CLONES_IN_PROGRESS.set(in_progress);
    }

    /// `CREATING` -> `RESTORING` once every target tablet is running.
    pub fn handle_creating(&self, record: &CloneRecord) -> Result<(), CloneError> {
        let mut lock = record.acquire_write();
        if lock.aggregate_state != AggregateState::Creating {
            return Err(CloneError::IllegalState(format!(
                "expected clone to be in creating state, found {}",
                lock.aggregate_state
            )));
        }

        for entry in &lock.tablets {
            let tablet = self.external.lookup_tablet(&entry.target_tablet_id)?;
            if !tablet.running {
                tracing::debug!(
                    source_namespace_id = %lock.source_namespace_id,
                    seq_no = lock.seq_no,
                    target_tablet_id = %entry.target_tablet_id,
                    "Target tablet not running yet"
                );
                return Ok(());
            }
        }

        tracing::info!(
            source_namespace_id = %lock.source_namespace_id,
            seq_no = lock.seq_no,
            "All tablets for cloned namespace are running. Marking clone operation as restoring."
        );

        // A restore may already exist if it was submitted before a crash or
        // failover but RESTORING was never persisted.
        let restorations = self.external.list_restorations(&lock.target_snapshot_id)?;
        if restorations.is_empty() {
            let restoration_id = self
                .external
                .issue_restore(&lock.target_snapshot_id, lock.restore_time)?;
            tracing::info!(
                target_snapshot_id = %lock.target_snapshot_id,
                restoration_id = %restoration_id,
                restore_time = %lock.restore_time,
                "Restore issued"
            );
        } else {
            tracing::info!(
                target_snapshot_id = %lock.target_snapshot_id,
                restorations = restorations.len(),
                "Restore already issued, not issuing another"
            );
        }

        lock.data_mut().aggregate_state = AggregateState::Restoring;
        lock.commit(self.store.as_ref())?;
        metrics::STATE_TRANSITIONS
            .with_label_values(&[AggregateState::Restoring.as_str()])
            .inc();
        Ok(())
    }

    /// `RESTORING` -> `RESTORED` once the single restore of the target
    /// snapshot reports completion.
    pub fn handle_restoring(&self, record: &CloneRecord) -> Result<(), CloneError> {
        let mut lock = record.acquire_write();
        if lock.aggregate_state != AggregateState::Restoring {
            return Err(CloneError::IllegalState(format!(
                "expected clone to be in restoring state, found {}",
                lock.aggregate_state
            )));
        }

        let restorations = self.external.list_restorations(&lock.target_snapshot_id)?;
        let restoration = match restorations.as_slice() {
            [only] => only,
            _ => {
                return Err(CloneError::IllegalState(format!(
                    "unexpected number of restorations for snapshot {}: {}",
                    lock.target_snapshot_id,
                    restorations.len()
                )))
            }
        };

        if restoration.state != RestorationState::Restored {
            tracing::debug!(
                source_namespace_id = %lock.source_namespace_id,
                seq_no = lock.seq_no,
                restoration_id = %restoration.id,
                "Restore not finished yet"
            );
            return Ok(());
        }

        lock.data_mut().aggregate_state = AggregateState::Restored;
        let source_namespace_id = lock.source_namespace_id.clone();
        let seq_no = lock.seq_no;
        lock.commit(self.store.as_ref())?;
        metrics::STATE_TRANSITIONS
            .with_label_values(&[AggregateState::Restored.as_str()])
            .inc();
        tracing::info!(
            source_namespace_id = %source_namespace_id,
            seq_no,
            "Clone restored"
        );
        Ok(())
    }
}

/// Spawn a background task that sweeps every `interval`.
///
/// Sweeps run on the blocking pool since collaborator calls are
/// synchronous. A slow sweep delays the next tick rather than overlapping it.
#[cfg(feature = "full")]
pub fn spawn_reconciler(
    manager: std::sync::Arc<CloneStateManager>,
    interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Clone reconciler started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let manager = std::sync::Arc::clone(&manager);
            if let Err(e) = tokio::task::spawn_blocking(move || manager.run()).await {
                tracing::error!(error = %e, "Clone reconcile sweep panicked");
            }
        }
    })
}
