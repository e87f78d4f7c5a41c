//! Request and response messages served by the clone manager.

use serde::{Deserialize, Serialize};

use crate::error::CloneError;
use crate::manager::{CloneSource, CloneStateManager};
use crate::types::{Deadline, HybridTime, NamespaceId, SnapshotScheduleId};

/// Clone whatever namespace a snapshot schedule covers, as of `restore_ht`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneFromSnapshotScheduleRequest {
    pub snapshot_schedule_id: SnapshotScheduleId,
    pub restore_ht: u64,
    pub target_namespace_name: String,
}

/// Clone a namespace by id, as of `restore_ht`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneNamespaceRequest {
    pub source_namespace_id: NamespaceId,
    pub restore_ht: u64,
    pub target_namespace_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneResponse {
    pub source_namespace_id: NamespaceId,
    pub seq_no: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsCloneDoneRequest {
    pub source_namespace_id: NamespaceId,
    pub seq_no: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsCloneDoneResponse {
    pub is_done: bool,
}

impl CloneStateManager {
    /// Serve a schedule-based clone request. `deadline` defaults to the
    /// configured RPC timeout.
    pub fn clone_from_snapshot_schedule(
        &self,
        req: &CloneFromSnapshotScheduleRequest,
        deadline: Option<Deadline>,
    ) -> Result<CloneResponse, CloneError> {
        if req.target_namespace_name.is_empty() {
            return Err(CloneError::InvalidArgument(
                "got empty target namespace name".to_string(),
            ));
        }
        tracing::info!(request = ?req, "Servicing CloneFromSnapshotSchedule request");
        let (source_namespace_id, seq_no) = self.start_clone(
            CloneSource::SnapshotSchedule(req.snapshot_schedule_id),
            HybridTime::from_u64(req.restore_ht),
            &req.target_namespace_name,
            deadline.unwrap_or_else(|| self.default_deadline()),
        )?;
        Ok(CloneResponse {
            source_namespace_id,
            seq_no,
        })
    }

    /// Serve a namespace-based clone request.
    pub fn clone_namespace(
        &self,
        req: &CloneNamespaceRequest,
        deadline: Option<Deadline>,
    ) -> Result<CloneResponse, CloneError> {
        tracing::info!(request = ?req, "Servicing CloneNamespace request");
        let (source_namespace_id, seq_no) = self.start_clone(
            CloneSource::Namespace(req.source_namespace_id.clone()),
            HybridTime::from_u64(req.restore_ht),
            &req.target_namespace_name,
            deadline.unwrap_or_else(|| self.default_deadline()),
        )?;
        Ok(CloneResponse {
            source_namespace_id,
            seq_no,
        })
    }

    pub fn handle_is_clone_done(
        &self,
        req: &IsCloneDoneRequest,
    ) -> Result<IsCloneDoneResponse, CloneError> {
        let is_done = self.is_clone_done(&req.source_namespace_id, req.seq_no)?;
        Ok(IsCloneDoneResponse { is_done })
    }
}
