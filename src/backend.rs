//! Simulated Backend
//!
//! TigerStyle: One owner for every registry and the scheduler.
//!
//! A `Backend` is a cheap handle (`Arc` inside). Every tenant-scoped view
//! and every scheduled event goes through the same state, so clients built
//! for different contexts observe the same in-flight transitions.
//! `reset` clears everything between test cases.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::config::SimConfig;
use crate::error::Result;
use crate::flavors::FlavorCatalog;
use crate::scheduler::{EventScheduler, EventSink};
use crate::servers::{self, Server, ServerEvent, ServerId};
use crate::status::{InstanceStatusTracker, NoopTracker};
use crate::volumes::{self, Volume, VolumeEvent, VolumeId};

/// Any scheduled transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Server(ServerEvent),
    Volume(VolumeEvent),
}

impl From<ServerEvent> for SimEvent {
    fn from(event: ServerEvent) -> Self {
        Self::Server(event)
    }
}

impl From<VolumeEvent> for SimEvent {
    fn from(event: VolumeEvent) -> Self {
        Self::Volume(event)
    }
}

struct BackendState {
    config: SimConfig,
    scheduler: EventScheduler<SimEvent>,
    flavors: FlavorCatalog,
    servers: RwLock<HashMap<ServerId, Server>>,
    volumes: RwLock<HashMap<VolumeId, Volume>>,
    next_local_id: AtomicU64,
    next_volume_seq: AtomicU64,
    instance_status: Arc<dyn InstanceStatusTracker>,
}

/// Shared simulated cloud state
#[derive(Clone)]
pub struct Backend {
    state: Arc<BackendState>,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("clock", &self.state.config.clock)
            .field("scheduler", &self.state.scheduler)
            .finish_non_exhaustive()
    }
}

impl Default for Backend {
    /// Default configuration on a simulated clock
    fn default() -> Self {
        Self::build(SimConfig::default(), Arc::new(NoopTracker))
    }
}

impl Backend {
    /// Create a backend that drops running notifications
    pub fn new(config: SimConfig) -> Result<Self> {
        Self::with_instance_status(config, Arc::new(NoopTracker))
    }

    /// Create a backend that reports running servers to `tracker`
    pub fn with_instance_status(
        config: SimConfig,
        tracker: Arc<dyn InstanceStatusTracker>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(config, tracker))
    }

    fn build(config: SimConfig, tracker: Arc<dyn InstanceStatusTracker>) -> Self {
        let scheduler = EventScheduler::new(config.clock);
        Self {
            state: Arc::new(BackendState {
                config,
                scheduler,
                flavors: FlavorCatalog::seeded(),
                servers: RwLock::new(HashMap::new()),
                volumes: RwLock::new(HashMap::new()),
                next_local_id: AtomicU64::new(0),
                next_volume_seq: AtomicU64::new(0),
                instance_status: tracker,
            }),
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.state.config
    }

    pub fn flavors(&self) -> &FlavorCatalog {
        &self.state.flavors
    }

    pub(crate) fn servers_db(&self) -> &RwLock<HashMap<ServerId, Server>> {
        &self.state.servers
    }

    pub(crate) fn volumes_db(&self) -> &RwLock<HashMap<VolumeId, Volume>> {
        &self.state.volumes
    }

    pub(crate) fn instance_status(&self) -> &Arc<dyn InstanceStatusTracker> {
        &self.state.instance_status
    }

    pub(crate) fn next_local_id(&self) -> u64 {
        self.state.next_local_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn next_volume_seq(&self) -> u64 {
        self.state.next_volume_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Schedule a transition `delay_ms` from now
    pub(crate) fn schedule(&self, delay_ms: u64, event: impl Into<SimEvent>) {
        self.state
            .scheduler
            .schedule(self, Duration::from_millis(delay_ms), event.into());
    }

    /// Let time pass, firing due transitions
    pub async fn advance(&self, by: Duration) -> usize {
        self.state.scheduler.advance(self, by).await
    }

    pub async fn advance_ms(&self, ms: u64) -> usize {
        self.advance(Duration::from_millis(ms)).await
    }

    /// Fire every queued transition, including ones they schedule
    pub async fn run_until_idle(&self) -> usize {
        self.state.scheduler.run_until_idle(self).await
    }

    /// Simulated time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.state.scheduler.now_ms()
    }

    /// Transitions waiting on the simulated clock
    pub fn pending_events(&self) -> usize {
        self.state.scheduler.pending()
    }

    /// Clear every registry and the simulated queue. Ids are never reused,
    /// so the creation counters keep counting.
    pub async fn reset(&self) {
        self.state.scheduler.clear();
        let servers = std::mem::take(&mut *self.state.servers.write().await).len();
        let volumes = std::mem::take(&mut *self.state.volumes.write().await).len();
        info!(servers, volumes, "simulated backend reset");
    }
}

#[async_trait]
impl EventSink<SimEvent> for Backend {
    async fn dispatch(&self, event: SimEvent) -> Result<()> {
        match event {
            SimEvent::Server(event) => servers::apply(self, event).await,
            SimEvent::Volume(event) => volumes::apply(self, event).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::servers::{CreateServer, Servers};
    use crate::status::{InMemoryInstanceStatuses, ServiceStatus};
    use crate::volumes::Volumes;

    #[test]
    fn test_invalid_config_rejected() {
        let config = SimConfig {
            hosts: Vec::new(),
            ..SimConfig::default()
        };
        assert!(Backend::new(config).is_err());
    }

    #[tokio::test]
    async fn test_reset_clears_registries() {
        let backend = Backend::new(SimConfig::simulated()).unwrap();
        let ctx = Context::new("tenant_a");
        Servers::new(&backend, &ctx)
            .create(CreateServer::new("web", "i", "1"))
            .await
            .unwrap();
        Volumes::new(&backend, &ctx).create(1, None, None).await.unwrap();
        assert_eq!(backend.pending_events(), 2);

        backend.reset().await;

        assert_eq!(backend.pending_events(), 0);
        assert!(Servers::new(&backend, &ctx).list().await.is_empty());
        assert!(Volumes::new(&backend, &ctx).list().await.is_empty());

        let next = Servers::new(&backend, &ctx)
            .create(CreateServer::new("web", "i", "1"))
            .await
            .unwrap();
        assert_eq!(next.local_id, 1);
    }

    #[tokio::test]
    async fn test_reboot_marks_instance_running() {
        let tracker = Arc::new(InMemoryInstanceStatuses::new());
        let backend =
            Backend::with_instance_status(SimConfig::simulated(), tracker.clone()).unwrap();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);
        let server = servers
            .create(CreateServer::new("web", "i", "2"))
            .await
            .unwrap();
        tracker.register("inst_1", &server.id, ServiceStatus::Building);
        backend.advance_ms(1_000).await;

        servers.reboot(&server.id).await.unwrap();
        backend.advance_ms(1_000).await;
        assert_eq!(tracker.status("inst_1"), Some(ServiceStatus::Building));

        backend.advance_ms(1_500).await;
        assert_eq!(tracker.status("inst_1"), Some(ServiceStatus::Running));
    }

    #[tokio::test]
    async fn test_resize_marks_instance_running_while_verifying() {
        let tracker = Arc::new(InMemoryInstanceStatuses::new());
        let backend =
            Backend::with_instance_status(SimConfig::simulated(), tracker.clone()).unwrap();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);
        let server = servers
            .create(CreateServer::new("web", "i", "2"))
            .await
            .unwrap();
        tracker.register("inst_1", &server.id, ServiceStatus::Building);
        backend.advance_ms(1_000).await;

        servers.resize(&server.id, Some("3")).await.unwrap();
        backend.run_until_idle().await;

        assert_eq!(tracker.status("inst_1"), Some(ServiceStatus::Running));
        assert_eq!(
            servers.get(&server.id).await.unwrap().status,
            "VERIFY_RESIZE"
        );
    }
}
