//! Instance Status Tracking
//!
//! TigerStyle: The seam between the simulated provider and the system under
//! test.
//!
//! When a reboot or resize finishes, the simulated provider tells the
//! tracker that the compute server is running. The orchestration side keys
//! its own instance records by compute server id; the tracker finds that
//! record and marks its service status.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CloudError, ResourceKind, Result};
use crate::servers::ServerId;

/// Service status of an orchestrated instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    New,
    Building,
    Running,
    Shutdown,
    Failed,
}

/// Receives "server is running" notifications
#[async_trait]
pub trait InstanceStatusTracker: Send + Sync {
    /// Mark the instance backed by `server_id` as running.
    async fn mark_running(&self, server_id: &ServerId) -> Result<()>;
}

/// Tracker that accepts and drops every notification
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracker;

#[async_trait]
impl InstanceStatusTracker for NoopTracker {
    async fn mark_running(&self, server_id: &ServerId) -> Result<()> {
        debug!(%server_id, "running notification dropped");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Records {
    /// compute server id -> instance id
    by_server: HashMap<ServerId, String>,
    /// instance id -> service status
    statuses: HashMap<String, ServiceStatus>,
}

/// In-memory instance records, looked up by compute server id
#[derive(Debug, Default)]
pub struct InMemoryInstanceStatuses {
    records: Mutex<Records>,
}

impl InMemoryInstanceStatuses {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an instance backed by a compute server
    pub fn register(&self, instance_id: impl Into<String>, server_id: &ServerId, status: ServiceStatus) {
        let instance_id = instance_id.into();
        let mut records = self.lock();
        records.by_server.insert(server_id.clone(), instance_id.clone());
        records.statuses.insert(instance_id, status);
    }

    /// Current service status of an instance
    pub fn status(&self, instance_id: &str) -> Option<ServiceStatus> {
        self.lock().statuses.get(instance_id).copied()
    }

    fn lock(&self) -> MutexGuard<'_, Records> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl InstanceStatusTracker for InMemoryInstanceStatuses {
    async fn mark_running(&self, server_id: &ServerId) -> Result<()> {
        let mut records = self.lock();
        let instance_id = records
            .by_server
            .get(server_id)
            .cloned()
            .ok_or_else(|| CloudError::not_found(ResourceKind::Instance, server_id.as_str()))?;
        debug!(%server_id, %instance_id, "setting instance to running");
        records.statuses.insert(instance_id, ServiceStatus::Running);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_running() {
        let tracker = InMemoryInstanceStatuses::new();
        let server_id = ServerId::from("FAKE_1");
        tracker.register("inst_1", &server_id, ServiceStatus::Building);

        tracker.mark_running(&server_id).await.unwrap();

        assert_eq!(tracker.status("inst_1"), Some(ServiceStatus::Running));
    }

    #[tokio::test]
    async fn test_unknown_server() {
        let tracker = InMemoryInstanceStatuses::new();
        let result = tracker.mark_running(&ServerId::from("FAKE_missing")).await;
        assert!(result.unwrap_err().is_not_found());
    }
}
