//! Server Registry and State Machine
//!
//! TigerStyle: Compute instances whose transitions complete in the background.
//!
//! ```text
//! create ───► BUILD ──(1s)──► ACTIVE
//! reboot ───► REBOOT ──(1s)──► ACTIVE ──(1.5s)──► running notification
//! resize ───► RESIZE ──(0.8s)──► flavor applied ──(1s)──► VERIFY_RESIZE
//! migrate ──► RESIZE ──(0.8s)──► ──(0.75s)──► host changed
//!                                 └──(1s)──► VERIFY_RESIZE
//! VERIFY_RESIZE ──confirm──► ACTIVE
//! VERIFY_RESIZE ──revert───► ACTIVE (prior host / flavor restored)
//! delete ───► SHUTDOWN ──(1.5s)──► removed
//! ```
//!
//! Failure modes come from [`ServerFault`]; see `fault` for the name
//! suffixes that select them.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::Backend;
use crate::context::Context;
use crate::error::{CloudError, ResourceKind, Result};
use crate::fault::ServerFault;
use crate::flavors::{self_links, FlavorCatalog, FlavorRef, Link};
use crate::volumes::{BlockDeviceMapping, Volume, VolumeId, VolumeStatus, Volumes, VOLUME_DEVICE};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Server ID prefix
pub const SERVER_ID_PREFIX: &str = "FAKE_";

/// Private address reported for every server
pub const SERVER_PRIVATE_ADDRESS: &str = "123.123.123.123";

/// Base URL for server links
pub const SERVER_LINK_BASE: &str = "https://localhost:9999/v1.0/1234/instances";

// =============================================================================
// Types
// =============================================================================

/// Server identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Generate a fresh, never reused id
    pub fn generate() -> Self {
        Self(format!("{}{}", SERVER_ID_PREFIX, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ServerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerStatus {
    Build,
    Active,
    Reboot,
    Resize,
    VerifyResize,
    Shutdown,
}

impl ServerStatus {
    /// Get string representation, as the provider reports it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "BUILD",
            Self::Active => "ACTIVE",
            Self::Reboot => "REBOOT",
            Self::Resize => "RESIZE",
            Self::VerifyResize => "VERIFY_RESIZE",
            Self::Shutdown => "SHUTDOWN",
        }
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for ServerStatus {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// A network address
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Address {
    pub addr: String,
}

/// A compute instance
#[derive(Debug, Clone, Serialize)]
pub struct Server {
    pub id: ServerId,
    #[serde(skip)]
    pub owner: Context,
    pub name: String,
    pub image_id: String,
    /// Numeric flavor id or flavor link
    pub flavor_ref: String,
    pub old_flavor_ref: Option<String>,
    pub host: String,
    pub old_host: Option<String>,
    pub status: ServerStatus,
    /// Attached volumes, in mapping order
    pub volumes: Vec<VolumeId>,
    /// Device name -> encoded mapping
    pub block_device_mapping: BTreeMap<String, String>,
    /// Creation order, unique per backend
    pub local_id: u64,
    pub fault: ServerFault,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Server {
    /// Owning tenant
    pub fn tenant(&self) -> &str {
        &self.owner.tenant
    }

    pub fn tenant_id(&self) -> &str {
        &self.owner.tenant
    }

    pub fn addresses(&self) -> BTreeMap<String, Vec<Address>> {
        BTreeMap::from([(
            "private".to_string(),
            vec![Address {
                addr: SERVER_PRIVATE_ADDRESS.to_string(),
            }],
        )])
    }

    pub fn links(&self) -> Vec<Link> {
        self_links(&format!("{}/{}", SERVER_LINK_BASE, self.id))
    }

    /// Compact reference to the current flavor
    pub fn flavor(&self, catalog: &FlavorCatalog) -> Result<FlavorRef> {
        Ok(catalog.resolve(&self.flavor_ref)?.to_ref())
    }

    fn set_status(&mut self, status: ServerStatus) {
        debug!(server_id = %self.id, from = %self.status, to = %status, "server status");
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Inline volume to create alongside a server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRequest {
    pub size: u64,
    pub name: Option<String>,
    pub description: Option<String>,
}

impl VolumeRequest {
    pub fn new(size: u64) -> Self {
        Self {
            size,
            name: None,
            description: None,
        }
    }

    /// Set display name and description
    pub fn with_display(mut self, name: impl Into<String>, description: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.description = Some(description.into());
        self
    }
}

/// Server create request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateServer {
    pub name: String,
    pub image_id: String,
    pub flavor_ref: String,
    pub block_device_mapping: Option<BTreeMap<String, String>>,
    pub volume: Option<VolumeRequest>,
    /// Overrides the mode derived from the name
    pub fault: Option<ServerFault>,
}

impl CreateServer {
    pub fn new(
        name: impl Into<String>,
        image_id: impl Into<String>,
        flavor_ref: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            image_id: image_id.into(),
            flavor_ref: flavor_ref.into(),
            block_device_mapping: None,
            volume: None,
            fault: None,
        }
    }

    /// Create and attach a new volume
    pub fn with_volume(mut self, volume: VolumeRequest) -> Self {
        self.volume = Some(volume);
        self
    }

    /// Attach existing volumes
    pub fn with_block_device_mapping(mut self, mapping: BTreeMap<String, String>) -> Self {
        self.block_device_mapping = Some(mapping);
        self
    }

    /// Pick a failure mode explicitly
    pub fn with_fault(mut self, fault: ServerFault) -> Self {
        self.fault = Some(fault);
        self
    }
}

/// Scheduled server transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Set the status
    Status {
        server_id: ServerId,
        status: ServerStatus,
    },
    /// Reboot done: ACTIVE, then notify
    RebootFinished { server_id: ServerId },
    /// Apply a resize (`Some` flavor) or start a migration (`None`)
    ResizeApplied {
        server_id: ServerId,
        flavor_id: Option<String>,
    },
    /// Move a migrating server to another host
    HostChanged { server_id: ServerId },
    /// Resize done on the provider side: VERIFY_RESIZE
    AwaitingConfirm { server_id: ServerId },
    /// Tell the instance-status collaborator the server runs
    Running { server_id: ServerId },
    /// Remove a deleted server from the registry
    Removed { server_id: ServerId },
}

// =============================================================================
// Server Registry
// =============================================================================

/// Tenant-scoped view of the server registry
#[derive(Debug, Clone, Copy)]
pub struct Servers<'a> {
    backend: &'a Backend,
    context: &'a Context,
}

impl<'a> Servers<'a> {
    pub fn new(backend: &'a Backend, context: &'a Context) -> Self {
        Self { backend, context }
    }

    fn volumes(&self) -> Volumes<'a> {
        Volumes::new(self.backend, self.context)
    }

    fn visible_mut<'d>(
        &self,
        db: &'d mut HashMap<ServerId, Server>,
        id: &ServerId,
    ) -> Result<&'d mut Server> {
        db.get_mut(id)
            .filter(|s| self.context.can_see(&s.owner))
            .ok_or_else(|| CloudError::not_found(ResourceKind::Server, id.as_str()))
    }

    /// Create a server.
    ///
    /// With an inline volume request this waits for the volume to leave
    /// BUILD, then records its mapping info on the volume as well, so
    /// `get_server_volumes` reports inline volumes like mapped ones. A
    /// `CreateError` server is stored before the error is returned.
    pub async fn create(&self, request: CreateServer) -> Result<Server> {
        let id = ServerId::generate();
        let fault = request
            .fault
            .unwrap_or_else(|| ServerFault::from_name(&request.name));

        let (block_device_mapping, volumes) = match request.volume {
            Some(volume) => self.create_inline_volume(&id, volume).await?,
            None => {
                let mapping = request.block_device_mapping.unwrap_or_default();
                let volumes = self.attach_mapped_volumes(&id, &mapping).await?;
                (mapping, volumes)
            }
        };

        let config = self.backend.config();
        let now = Utc::now();
        let server = Server {
            id: id.clone(),
            owner: self.context.clone(),
            name: request.name,
            image_id: request.image_id,
            flavor_ref: request.flavor_ref,
            old_flavor_ref: None,
            host: config.hosts[0].clone(),
            old_host: None,
            status: ServerStatus::Build,
            volumes,
            block_device_mapping,
            local_id: self.backend.next_local_id(),
            fault,
            created_at: now,
            updated_at: now,
        };
        self.backend
            .servers_db()
            .write()
            .await
            .insert(id.clone(), server.clone());

        if fault == ServerFault::CreateError {
            warn!(server_id = %id, name = %server.name, "simulating server create error");
            return Err(CloudError::client("fake server create error"));
        }

        self.backend.schedule(
            config.server_active_delay_ms,
            ServerEvent::Status {
                server_id: id.clone(),
                status: ServerStatus::Active,
            },
        );
        info!(server_id = %id, name = %server.name, tenant = %self.context.tenant, "server created");
        Ok(server)
    }

    async fn create_inline_volume(
        &self,
        server_id: &ServerId,
        request: VolumeRequest,
    ) -> Result<(BTreeMap<String, String>, Vec<VolumeId>)> {
        let volumes = self.volumes();
        let volume = volumes
            .create(
                request.size,
                request.name.as_deref(),
                request.description.as_deref(),
            )
            .await?;
        let volume = self.wait_for_volume(&volume.id).await?;
        if volume.status != VolumeStatus::Available {
            info!(volume_id = %volume.id, status = %volume.status, "volume did not become available");
            return Err(CloudError::client("Volume was bad!"));
        }

        let encoded = BlockDeviceMapping::encode(&volume.id, volume.size);
        let mapping = BlockDeviceMapping::parse(VOLUME_DEVICE, &encoded)?;
        volumes.attach_mapped(mapping, server_id).await?;
        Ok((
            BTreeMap::from([(VOLUME_DEVICE.to_string(), encoded)]),
            vec![volume.id],
        ))
    }

    /// Poll until the volume leaves BUILD, bounded by the poll timeout.
    async fn wait_for_volume(&self, id: &VolumeId) -> Result<Volume> {
        let config = self.backend.config();
        let interval = config.volume_poll_interval();
        let timeout = config.volume_poll_timeout();
        let mut waited = Duration::ZERO;
        loop {
            let volume = self.volumes().get(id).await?;
            if volume.status != VolumeStatus::Build {
                return Ok(volume);
            }
            if waited >= timeout {
                return Err(CloudError::timeout(format!(
                    "volume {} still in BUILD after {:?}",
                    id, waited
                )));
            }
            self.backend.advance(interval).await;
            waited += interval;
        }
    }

    async fn attach_mapped_volumes(
        &self,
        server_id: &ServerId,
        mapping: &BTreeMap<String, String>,
    ) -> Result<Vec<VolumeId>> {
        let parsed = mapping
            .iter()
            .map(|(device, encoded)| BlockDeviceMapping::parse(device, encoded))
            .collect::<Result<Vec<_>>>()?;

        // Resolve everything first so a bad entry attaches nothing.
        let volumes = self.volumes();
        for entry in &parsed {
            volumes.get(&entry.volume_id).await?;
        }

        let mut attached = Vec::with_capacity(parsed.len());
        for entry in parsed {
            attached.push(volumes.attach_mapped(entry, server_id).await?.id);
        }
        Ok(attached)
    }

    /// Get a server the caller can see
    pub async fn get(&self, id: &ServerId) -> Result<Server> {
        self.backend
            .servers_db()
            .read()
            .await
            .get(id)
            .filter(|s| self.context.can_see(&s.owner))
            .cloned()
            .ok_or_else(|| CloudError::not_found(ResourceKind::Server, id.as_str()))
    }

    /// All servers the caller can see, in creation order
    pub async fn list(&self) -> Vec<Server> {
        let mut servers: Vec<Server> = self
            .backend
            .servers_db()
            .read()
            .await
            .values()
            .filter(|s| self.context.can_see(&s.owner))
            .cloned()
            .collect();
        servers.sort_by_key(|s| s.local_id);
        servers
    }

    /// Mapping info of every attached volume that has one
    pub async fn get_server_volumes(&self, id: &ServerId) -> Result<Vec<BlockDeviceMapping>> {
        let server = self.get(id).await?;
        let db = self.backend.volumes_db().read().await;
        Ok(server
            .volumes
            .iter()
            .filter_map(|volume_id| db.get(volume_id))
            .filter_map(|volume| volume.mapping.clone())
            .collect())
    }

    /// REBOOT now, ACTIVE after a delay
    pub async fn reboot(&self, id: &ServerId) -> Result<()> {
        {
            let mut db = self.backend.servers_db().write().await;
            self.visible_mut(&mut db, id)?.set_status(ServerStatus::Reboot);
        }
        debug!(server_id = %id, "rebooting server");
        self.backend.schedule(
            self.backend.config().server_reboot_delay_ms,
            ServerEvent::RebootFinished {
                server_id: id.clone(),
            },
        );
        Ok(())
    }

    /// Resize to `flavor_id`, or migrate when `None`.
    ///
    /// A `ResizeTimeout` server fails right here; its status is left at
    /// RESIZE and nothing is scheduled.
    pub async fn resize(&self, id: &ServerId, flavor_id: Option<&str>) -> Result<()> {
        {
            let mut db = self.backend.servers_db().write().await;
            let server = self.visible_mut(&mut db, id)?;
            server.set_status(ServerStatus::Resize);
            if server.fault == ServerFault::ResizeTimeout {
                warn!(server_id = %id, "simulating resize timeout");
                return Err(CloudError::timeout(format!("resize of {} timed out", id)));
            }
        }
        self.backend.schedule(
            self.backend.config().server_resize_apply_delay_ms,
            ServerEvent::ResizeApplied {
                server_id: id.clone(),
                flavor_id: flavor_id.map(str::to_string),
            },
        );
        Ok(())
    }

    /// Move to another host. A migration is a resize without a flavor.
    pub async fn migrate(&self, id: &ServerId) -> Result<()> {
        self.resize(id, None).await
    }

    /// Accept a finished resize or migration
    pub async fn confirm_resize(&self, id: &ServerId) -> Result<()> {
        let mut db = self.backend.servers_db().write().await;
        let server = self.visible_mut(&mut db, id)?;
        require_verify_resize(server)?;
        server.old_flavor_ref = None;
        server.old_host = None;
        server.set_status(ServerStatus::Active);
        Ok(())
    }

    /// Roll back a finished resize or migration
    pub async fn revert_resize(&self, id: &ServerId) -> Result<()> {
        let mut db = self.backend.servers_db().write().await;
        let server = self.visible_mut(&mut db, id)?;
        require_verify_resize(server)?;
        if let Some(host) = server.old_host.take() {
            server.host = host;
        }
        if let Some(flavor_ref) = server.old_flavor_ref.take() {
            server.flavor_ref = flavor_ref;
        }
        server.set_status(ServerStatus::Active);
        Ok(())
    }

    /// SHUTDOWN now, removed after a delay.
    ///
    /// A `DeleteErrorOnce` server only reaches SHUTDOWN on the first call.
    /// The fault is used up there, so the next call deletes it normally
    /// even if a queued transition moved it out of SHUTDOWN meanwhile.
    pub async fn delete(&self, id: &ServerId) -> Result<()> {
        {
            let mut db = self.backend.servers_db().write().await;
            let server = self.visible_mut(&mut db, id)?;
            server.set_status(ServerStatus::Shutdown);
            if server.fault == ServerFault::DeleteErrorOnce {
                server.fault = ServerFault::None;
                warn!(server_id = %id, "simulating failed delete");
                return Ok(());
            }
        }
        self.backend.schedule(
            self.backend.config().server_delete_delay_ms,
            ServerEvent::Removed {
                server_id: id.clone(),
            },
        );
        Ok(())
    }

    /// Make a new status take effect after `delay`
    pub async fn schedule_status(
        &self,
        id: &ServerId,
        status: ServerStatus,
        delay: Duration,
    ) -> Result<()> {
        self.get(id).await?;
        self.backend.schedule(
            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            ServerEvent::Status {
                server_id: id.clone(),
                status,
            },
        );
        Ok(())
    }
}

fn require_verify_resize(server: &Server) -> Result<()> {
    if server.status == ServerStatus::VerifyResize {
        Ok(())
    } else {
        Err(CloudError::IllegalState {
            id: server.id.to_string(),
            status: server.status.to_string(),
            expected: ServerStatus::VerifyResize.to_string(),
        })
    }
}

/// First pool host that differs from `current`
fn other_host(hosts: &[String], current: &str) -> String {
    hosts
        .iter()
        .find(|host| host.as_str() != current)
        .cloned()
        .unwrap_or_else(|| current.to_string())
}

// =============================================================================
// Transitions
// =============================================================================

/// Apply a scheduled server transition
pub(crate) async fn apply(backend: &Backend, event: ServerEvent) -> Result<()> {
    let config = backend.config();
    match event {
        ServerEvent::Status { server_id, status } => {
            update(backend, &server_id, |server| server.set_status(status)).await
        }
        ServerEvent::RebootFinished { server_id } => {
            update(backend, &server_id, |server| {
                server.set_status(ServerStatus::Active)
            })
            .await?;
            backend.schedule(
                config.server_running_notify_delay_ms,
                ServerEvent::Running { server_id },
            );
            Ok(())
        }
        ServerEvent::ResizeApplied {
            server_id,
            flavor_id,
        } => {
            {
                let mut db = backend.servers_db().write().await;
                let server = lookup(&mut db, &server_id)?;
                if server.fault == ServerFault::ResizeError {
                    warn!(%server_id, "simulating failed resize");
                    server.set_status(ServerStatus::Active);
                    return Ok(());
                }
                match &flavor_id {
                    None => {
                        debug!(%server_id, "migrating server");
                        backend.schedule(
                            config.server_migrate_host_delay_ms,
                            ServerEvent::HostChanged {
                                server_id: server_id.clone(),
                            },
                        );
                    }
                    Some(flavor_id) => {
                        let href = backend.flavors().get(flavor_id)?.href();
                        debug!(%server_id, flavor = %flavor_id, "resizing server");
                        server.old_flavor_ref =
                            Some(std::mem::replace(&mut server.flavor_ref, href));
                        server.updated_at = Utc::now();
                    }
                }
            }
            backend.schedule(
                config.server_verify_resize_delay_ms,
                ServerEvent::AwaitingConfirm { server_id },
            );
            Ok(())
        }
        ServerEvent::HostChanged { server_id } => {
            update(backend, &server_id, |server| {
                let next = other_host(&config.hosts, &server.host);
                debug!(server_id = %server.id, from = %server.host, to = %next, "server host");
                server.old_host = Some(std::mem::replace(&mut server.host, next));
                server.updated_at = Utc::now();
            })
            .await
        }
        ServerEvent::AwaitingConfirm { server_id } => {
            update(backend, &server_id, |server| {
                server.set_status(ServerStatus::VerifyResize)
            })
            .await?;
            backend.schedule(
                config
                    .server_resize_running_delay_ms
                    .saturating_add(config.server_running_notify_delay_ms),
                ServerEvent::Running { server_id },
            );
            Ok(())
        }
        ServerEvent::Running { server_id } => {
            debug!(%server_id, "simulating running server");
            backend.instance_status().mark_running(&server_id).await
        }
        ServerEvent::Removed { server_id } => {
            backend
                .servers_db()
                .write()
                .await
                .remove(&server_id)
                .ok_or_else(|| CloudError::not_found(ResourceKind::Server, server_id.as_str()))?;
            info!(%server_id, "simulated delete finished, server removed");
            Ok(())
        }
    }
}

fn lookup<'d>(db: &'d mut HashMap<ServerId, Server>, id: &ServerId) -> Result<&'d mut Server> {
    db.get_mut(id)
        .ok_or_else(|| CloudError::not_found(ResourceKind::Server, id.as_str()))
}

async fn update<F>(backend: &Backend, id: &ServerId, f: F) -> Result<()>
where
    F: FnOnce(&mut Server),
{
    let mut db = backend.servers_db().write().await;
    f(lookup(&mut db, id)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SimConfig;

    fn backend() -> Backend {
        Backend::new(SimConfig::simulated()).unwrap()
    }

    async fn active_server(backend: &Backend, ctx: &Context, name: &str) -> Server {
        let servers = Servers::new(backend, ctx);
        let server = servers
            .create(CreateServer::new(name, "image_1", "2"))
            .await
            .unwrap();
        backend.advance_ms(1_000).await;
        servers.get(&server.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_create_build_then_active() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);

        let server = servers
            .create(CreateServer::new("web", "image_1", "2"))
            .await
            .unwrap();
        assert_eq!(server.status, ServerStatus::Build);
        assert_eq!(server.host, "fake_host_1");
        assert!(server.id.as_str().starts_with(SERVER_ID_PREFIX));

        backend.advance_ms(999).await;
        assert_eq!(servers.get(&server.id).await.unwrap().status, "BUILD");
        backend.advance_ms(1).await;
        assert_eq!(servers.get(&server.id).await.unwrap().status, "ACTIVE");
    }

    #[tokio::test]
    async fn test_create_error_keeps_server() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);

        let result = servers
            .create(CreateServer::new("db_SERVER_ERROR", "image_1", "2"))
            .await;

        assert!(matches!(result, Err(CloudError::Client(_))));
        let stored = servers.list().await;
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].status, ServerStatus::Build);
        assert_eq!(backend.pending_events(), 0);
    }

    #[tokio::test]
    async fn test_explicit_fault_overrides_name() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);

        let result = servers
            .create(
                CreateServer::new("plain", "image_1", "2").with_fault(ServerFault::CreateError),
            )
            .await;
        assert!(result.is_err());

        let quiet = servers
            .create(
                CreateServer::new("x_SERVER_ERROR", "image_1", "2").with_fault(ServerFault::None),
            )
            .await
            .unwrap();
        assert_eq!(quiet.fault, ServerFault::None);
    }

    #[tokio::test]
    async fn test_local_ids_increase() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);

        let first = servers.create(CreateServer::new("a", "i", "1")).await.unwrap();
        let second = servers.create(CreateServer::new("b", "i", "1")).await.unwrap();

        assert!(second.local_id > first.local_id);
        let listed: Vec<_> = servers.list().await.into_iter().map(|s| s.name).collect();
        assert_eq!(listed, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_reboot_returns_to_active() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "web").await;
        let servers = Servers::new(&backend, &ctx);

        servers.reboot(&server.id).await.unwrap();
        assert_eq!(servers.get(&server.id).await.unwrap().status, "REBOOT");

        backend.advance_ms(1_000).await;
        assert_eq!(servers.get(&server.id).await.unwrap().status, "ACTIVE");
    }

    #[tokio::test]
    async fn test_resize_confirm() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "web").await;
        let servers = Servers::new(&backend, &ctx);

        servers.resize(&server.id, Some("3")).await.unwrap();
        assert_eq!(servers.get(&server.id).await.unwrap().status, "RESIZE");

        backend.advance_ms(1_800).await;
        let resized = servers.get(&server.id).await.unwrap();
        assert_eq!(resized.status, ServerStatus::VerifyResize);
        assert!(resized.flavor_ref.ends_with("flavors/3"));
        assert_eq!(resized.old_flavor_ref.as_deref(), Some("2"));

        servers.confirm_resize(&server.id).await.unwrap();
        let confirmed = servers.get(&server.id).await.unwrap();
        assert_eq!(confirmed.status, ServerStatus::Active);
        assert_eq!(confirmed.flavor_ref, resized.flavor_ref);
        assert_eq!(confirmed.host, resized.host);
        assert!(confirmed.old_flavor_ref.is_none());
    }

    #[tokio::test]
    async fn test_resize_revert_restores_flavor_and_host() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "web").await;
        let servers = Servers::new(&backend, &ctx);

        servers.resize(&server.id, Some("4")).await.unwrap();
        backend.advance_ms(1_800).await;
        servers.revert_resize(&server.id).await.unwrap();

        let reverted = servers.get(&server.id).await.unwrap();
        assert_eq!(reverted.status, ServerStatus::Active);
        assert_eq!(reverted.flavor_ref, "2");
        assert_eq!(reverted.host, server.host);
        assert!(reverted.old_flavor_ref.is_none());
        assert!(reverted.old_host.is_none());
    }

    #[tokio::test]
    async fn test_confirm_outside_verify_resize() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "web").await;
        let servers = Servers::new(&backend, &ctx);

        assert!(matches!(
            servers.confirm_resize(&server.id).await,
            Err(CloudError::IllegalState { .. })
        ));
        assert!(matches!(
            servers.revert_resize(&server.id).await,
            Err(CloudError::IllegalState { .. })
        ));
    }

    #[tokio::test]
    async fn test_migrate_changes_host_only() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "web").await;
        let servers = Servers::new(&backend, &ctx);

        servers.migrate(&server.id).await.unwrap();
        backend.advance_ms(800 + 750).await;
        let moved = servers.get(&server.id).await.unwrap();
        assert_eq!(moved.host, "fake_host_2");
        assert_eq!(moved.status, ServerStatus::Resize);

        backend.advance_ms(250).await;
        let verify = servers.get(&server.id).await.unwrap();
        assert_eq!(verify.status, ServerStatus::VerifyResize);
        assert_eq!(verify.flavor_ref, server.flavor_ref);

        servers.revert_resize(&server.id).await.unwrap();
        let reverted = servers.get(&server.id).await.unwrap();
        assert_eq!(reverted.host, "fake_host_1");
        assert_eq!(reverted.flavor_ref, "2");
    }

    #[tokio::test]
    async fn test_resize_timeout_is_synchronous() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "slow_RESIZE_TIMEOUT").await;
        let servers = Servers::new(&backend, &ctx);

        let result = servers.resize(&server.id, Some("3")).await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
        assert_eq!(backend.pending_events(), 0);
        let timed_out = servers.get(&server.id).await.unwrap();
        assert_eq!(timed_out.status, ServerStatus::Resize);
        assert_eq!(timed_out.flavor_ref, "2");
    }

    #[tokio::test]
    async fn test_resize_error_self_heals() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "bad_RESIZE_ERROR").await;
        let servers = Servers::new(&backend, &ctx);

        servers.resize(&server.id, Some("3")).await.unwrap();
        backend.advance_ms(800).await;

        let healed = servers.get(&server.id).await.unwrap();
        assert_eq!(healed.status, ServerStatus::Active);
        assert_eq!(healed.flavor_ref, "2");
        assert_eq!(backend.pending_events(), 0);
    }

    #[tokio::test]
    async fn test_resize_to_unknown_flavor_stays_resizing() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "web").await;
        let servers = Servers::new(&backend, &ctx);

        servers.resize(&server.id, Some("99")).await.unwrap();
        backend.run_until_idle().await;

        let stuck = servers.get(&server.id).await.unwrap();
        assert_eq!(stuck.status, ServerStatus::Resize);
        assert_eq!(stuck.flavor_ref, "2");
    }

    #[tokio::test]
    async fn test_delete_error_fires_once() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let server = active_server(&backend, &ctx, "foo_DELETE_ERROR").await;
        let servers = Servers::new(&backend, &ctx);

        servers.delete(&server.id).await.unwrap();
        backend.run_until_idle().await;
        assert_eq!(servers.get(&server.id).await.unwrap().status, "SHUTDOWN");

        servers.delete(&server.id).await.unwrap();
        backend.advance_ms(1_499).await;
        assert!(servers.get(&server.id).await.is_ok());
        backend.advance_ms(1).await;
        assert!(servers.get(&server.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_error_used_up_while_building() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);
        let server = servers
            .create(CreateServer::new("foo_DELETE_ERROR", "image_1", "2"))
            .await
            .unwrap();

        // The queued ACTIVE transition lands after the failed delete.
        servers.delete(&server.id).await.unwrap();
        backend.advance_ms(1_000).await;
        assert_eq!(servers.get(&server.id).await.unwrap().status, "ACTIVE");

        servers.delete(&server.id).await.unwrap();
        backend.run_until_idle().await;
        assert!(servers.get(&server.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_events_for_removed_server_are_harmless() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);
        let server = servers.create(CreateServer::new("web", "i", "1")).await.unwrap();

        servers.delete(&server.id).await.unwrap();
        servers.reboot(&server.id).await.unwrap();
        backend.run_until_idle().await;

        assert!(servers.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_visibility() {
        let backend = backend();
        let owner = Context::new("tenant_a");
        let server = active_server(&backend, &owner, "web").await;

        let other = Context::new("tenant_b");
        let hidden = Servers::new(&backend, &other);
        assert!(hidden.get(&server.id).await.unwrap_err().is_not_found());
        assert!(hidden.list().await.is_empty());
        assert!(hidden.delete(&server.id).await.unwrap_err().is_not_found());

        let admin = Context::admin("ops");
        assert_eq!(Servers::new(&backend, &admin).list().await.len(), 1);
    }

    #[tokio::test]
    async fn test_inline_volume_attached() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);

        let server = servers
            .create(
                CreateServer::new("db", "image_1", "2")
                    .with_volume(VolumeRequest::new(2).with_display("data", "db data")),
            )
            .await
            .unwrap();

        assert_eq!(server.volumes.len(), 1);
        let encoded = &server.block_device_mapping[VOLUME_DEVICE];
        assert!(encoded.ends_with("::2:1"));

        let volume = Volumes::new(&backend, &ctx).get(&server.volumes[0]).await.unwrap();
        assert_eq!(volume.status, VolumeStatus::Available);
        assert_eq!(volume.attachments.len(), 1);
        assert_eq!(volume.attachments[0].server_id, server.id);

        let mappings = servers.get_server_volumes(&server.id).await.unwrap();
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].volume_id, volume.id);
    }

    #[tokio::test]
    async fn test_inline_bad_volume_fails_create() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);

        let result = servers
            .create(CreateServer::new("db", "image_1", "2").with_volume(VolumeRequest::new(9)))
            .await;

        assert!(matches!(result, Err(CloudError::Client(_))));
        assert!(servers.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_inline_volume_poll_bound() {
        let config = SimConfig {
            volume_status_delay_ms: 5_000,
            volume_poll_timeout_ms: 1_000,
            ..SimConfig::simulated()
        };
        let backend = Backend::new(config).unwrap();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);

        let result = servers
            .create(CreateServer::new("db", "image_1", "2").with_volume(VolumeRequest::new(1)))
            .await;

        assert!(matches!(result, Err(CloudError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_block_device_mapping_attaches_existing_volume() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let volumes = Volumes::new(&backend, &ctx);
        let volume = volumes.create(3, None, None).await.unwrap();
        let servers = Servers::new(&backend, &ctx);

        let mapping = BTreeMap::from([(
            "vdb".to_string(),
            format!("{}:ebs:3:0", volume.id),
        )]);
        let server = servers
            .create(CreateServer::new("app", "i", "1").with_block_device_mapping(mapping))
            .await
            .unwrap();

        let attached = volumes.get(&volume.id).await.unwrap();
        assert_eq!(attached.attachments[0].server_id, server.id);
        assert_eq!(attached.mapping.unwrap().volume_type, "ebs");
    }

    #[tokio::test]
    async fn test_block_device_mapping_unknown_volume() {
        let backend = backend();
        let ctx = Context::new("tenant_a");
        let servers = Servers::new(&backend, &ctx);
        let mapping = BTreeMap::from([("vdb".to_string(), "FAKE_VOL_nope::1:1".to_string())]);

        let result = servers
            .create(CreateServer::new("app", "i", "1").with_block_device_mapping(mapping))
            .await;

        assert!(result.unwrap_err().is_not_found());
        assert!(servers.list().await.is_empty());
    }

    #[test]
    fn test_other_host() {
        let hosts = vec!["a".to_string(), "b".to_string()];
        assert_eq!(other_host(&hosts, "a"), "b");
        assert_eq!(other_host(&hosts, "b"), "a");
        assert_eq!(other_host(&hosts, "elsewhere"), "a");
    }
}
