// Data source resource manager
//
// Inbound side: phase-two commit and rollback requests from the coordinator.
// Commit only queues the undo row for deletion; rollback replays the undo log.
// Outbound side: branch registration, status reports and lock queries are
// forwarded to the coordinator client.

use std::collections::HashMap;
use std::sync::Arc;

use crossbeam::channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use parking_lot::RwLock;

use super::resource::{DbResource, Resource};
use crate::common::{BranchId, BranchStatus, BranchType, Xid};
use crate::error::{AtError, Result};
use crate::registry::AtRegistry;

/// Phase-two instructions received from the coordinator
pub trait ResourceManagerInbound: Send + Sync {
    fn branch_commit(
        &self,
        branch_type: BranchType,
        xid: &str,
        branch_id: BranchId,
        resource_id: &str,
        application_data: &[u8],
    ) -> Result<BranchStatus>;

    fn branch_rollback(
        &self,
        branch_type: BranchType,
        xid: &str,
        branch_id: BranchId,
        resource_id: &str,
        application_data: &[u8],
    ) -> Result<BranchStatus>;
}

/// Requests sent to the coordinator
pub trait ResourceManagerOutbound: Send + Sync {
    /// Register a branch holding `lock_keys`; returns the assigned branch id
    fn branch_register(
        &self,
        branch_type: BranchType,
        resource_id: &str,
        client_id: &str,
        xid: &str,
        application_data: &str,
        lock_keys: &str,
    ) -> Result<BranchId>;

    fn branch_report(
        &self,
        branch_type: BranchType,
        xid: &str,
        branch_id: BranchId,
        status: BranchStatus,
        application_data: &str,
    ) -> Result<()>;

    /// Whether `lock_keys` can be acquired by `xid`
    fn lock_query(&self, branch_type: BranchType, resource_id: &str, xid: &str, lock_keys: &str) -> Result<bool>;
}

/// A committed branch whose undo row is waiting for deletion
#[derive(Debug, Clone, PartialEq)]
struct PendingCommit {
    xid: Xid,
    branch_id: BranchId,
    resource_id: String,
}

pub struct DataSourceManager {
    registry: Arc<AtRegistry>,
    coordinator: Arc<dyn ResourceManagerOutbound>,
    resources: RwLock<HashMap<String, Arc<DbResource>>>,
    commit_tx: Sender<PendingCommit>,
    commit_rx: Receiver<PendingCommit>,
}

impl DataSourceManager {
    pub fn new(registry: Arc<AtRegistry>, coordinator: Arc<dyn ResourceManagerOutbound>) -> Self {
        let (commit_tx, commit_rx) = unbounded();
        DataSourceManager {
            registry,
            coordinator,
            resources: RwLock::new(HashMap::new()),
            commit_tx,
            commit_rx,
        }
    }

    pub fn branch_type(&self) -> BranchType {
        BranchType::AT
    }

    pub fn register_resource(&self, resource: Arc<DbResource>) {
        let resource_id = resource.resource_id().to_string();
        let mut resources = self.resources.write();
        if resources.insert(resource_id.clone(), resource).is_none() {
            info!("Registered resource {}", resource_id);
        }
    }

    pub fn unregister_resource(&self, resource_id: &str) -> Option<Arc<DbResource>> {
        self.resources.write().remove(resource_id)
    }

    pub fn resource(&self, resource_id: &str) -> Option<Arc<DbResource>> {
        self.resources.read().get(resource_id).cloned()
    }

    pub fn managed_resources(&self) -> Vec<Arc<DbResource>> {
        self.resources.read().values().cloned().collect()
    }

    fn require_resource(&self, resource_id: &str) -> Result<Arc<DbResource>> {
        self.resource(resource_id)
            .ok_or_else(|| AtError::Resource(format!("resource {} is not registered", resource_id)))
    }

    pub fn pending_commits(&self) -> usize {
        self.commit_rx.len()
    }

    /// Delete the undo rows of every queued commit, one batch per resource.
    ///
    /// Entries of a resource whose batch fails are queued again.
    pub fn process_pending_commits(&self) -> Result<usize> {
        let mut by_resource: HashMap<String, Vec<PendingCommit>> = HashMap::new();
        for pending in self.commit_rx.try_iter() {
            by_resource.entry(pending.resource_id.clone()).or_default().push(pending);
        }

        let mut deleted = 0;
        let mut first_error = None;
        for (resource_id, batch) in by_resource {
            match self.delete_batch(&resource_id, &batch) {
                Ok(()) => deleted += batch.len(),
                Err(e) => {
                    error!("Failed to delete undo logs of resource {}: {}", resource_id, e);
                    for pending in batch {
                        if let Err(e) = self.commit_tx.send(pending) {
                            warn!("Commit queue closed, cannot re-queue undo log of branch {}", e.0.branch_id);
                        }
                    }
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(deleted),
        }
    }

    fn delete_batch(&self, resource_id: &str, batch: &[PendingCommit]) -> Result<()> {
        let resource = self.require_resource(resource_id)?;
        let manager = self.registry.undo_log_manager(resource.db_type())?;
        let xids: Vec<Xid> = batch.iter().map(|p| p.xid.clone()).collect();
        let branch_ids: Vec<BranchId> = batch.iter().map(|p| p.branch_id).collect();
        let mut conn = resource.connect()?;
        manager.batch_delete_undo_log(&xids, &branch_ids, conn.as_mut())
    }
}

impl ResourceManagerInbound for DataSourceManager {
    fn branch_commit(
        &self,
        _branch_type: BranchType,
        xid: &str,
        branch_id: BranchId,
        resource_id: &str,
        _application_data: &[u8],
    ) -> Result<BranchStatus> {
        let pending = PendingCommit { xid: xid.to_string(), branch_id, resource_id: resource_id.to_string() };
        if self.commit_tx.send(pending).is_err() {
            warn!("Commit queue closed, undo log of branch {} is left in place", branch_id);
        }
        Ok(BranchStatus::PhaseTwoCommitted)
    }

    fn branch_rollback(
        &self,
        _branch_type: BranchType,
        xid: &str,
        branch_id: BranchId,
        resource_id: &str,
        _application_data: &[u8],
    ) -> Result<BranchStatus> {
        let resource = self.require_resource(resource_id)?;
        let manager = self.registry.undo_log_manager(resource.db_type())?;
        let mut conn = resource.connect()?;

        match manager.run_undo(xid, branch_id, conn.as_mut()) {
            Ok(()) => {
                info!("Branch {} of {} rolled back", branch_id, xid);
                Ok(BranchStatus::PhaseTwoRollbacked)
            }
            Err(e) if e.is_dirty_data() => {
                error!("Branch {} of {} cannot be rolled back: {}", branch_id, xid, e);
                Ok(BranchStatus::PhaseTwoRollbackFailedUnretryable)
            }
            Err(e) => {
                warn!("Rollback of branch {} of {} failed, will retry: {}", branch_id, xid, e);
                Ok(BranchStatus::PhaseTwoRollbackFailedRetryable)
            }
        }
    }
}

impl ResourceManagerOutbound for DataSourceManager {
    fn branch_register(
        &self,
        branch_type: BranchType,
        resource_id: &str,
        client_id: &str,
        xid: &str,
        application_data: &str,
        lock_keys: &str,
    ) -> Result<BranchId> {
        let branch_id =
            self.coordinator
                .branch_register(branch_type, resource_id, client_id, xid, application_data, lock_keys)?;
        info!("Registered branch {} of {} on {} with locks {}", branch_id, xid, resource_id, lock_keys);
        Ok(branch_id)
    }

    fn branch_report(
        &self,
        branch_type: BranchType,
        xid: &str,
        branch_id: BranchId,
        status: BranchStatus,
        application_data: &str,
    ) -> Result<()> {
        self.coordinator
            .branch_report(branch_type, xid, branch_id, status, application_data)
    }

    fn lock_query(&self, branch_type: BranchType, resource_id: &str, xid: &str, lock_keys: &str) -> Result<bool> {
        self.coordinator.lock_query(branch_type, resource_id, xid, lock_keys)
    }
}
