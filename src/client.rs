//! Cloud Client Facade
//!
//! TigerStyle: The shape orchestration code already expects from a real
//! cloud client.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────┐
//! │ SimCloud: per-context cache of client pairs    │
//! ├───────────────────────┬────────────────────────┤
//! │ compute CloudClient   │ volume CloudClient     │
//! ├───────────────────────┴────────────────────────┤
//! │ Backend: flavors, servers, volumes, scheduler  │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! In production the compute and volume endpoints are separate services.
//! Here both clients of a pair reach the same backend, so either one's
//! `servers()` or `volumes()` sees the same resources.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use once_cell::sync::OnceCell;
use tracing::{debug, info};

use crate::accounts::Accounts;
use crate::backend::Backend;
use crate::config::SimConfig;
use crate::context::Context;
use crate::error::Result;
use crate::flavors::FlavorCatalog;
use crate::hosts::{Hosts, Storage};
use crate::managed::ManagedServers;
use crate::servers::{ServerId, Servers};
use crate::volumes::{BlockDeviceMapping, VolumeId, Volumes};

// =============================================================================
// Client
// =============================================================================

/// Which endpoint a client stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Compute,
    Volume,
}

/// A client bound to one context
#[derive(Debug, Clone)]
pub struct CloudClient {
    kind: ClientKind,
    context: Context,
    backend: Backend,
}

impl CloudClient {
    pub fn new(kind: ClientKind, context: Context, backend: Backend) -> Self {
        Self {
            kind,
            context,
            backend,
        }
    }

    pub fn kind(&self) -> ClientKind {
        self.kind
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn flavors(&self) -> &FlavorCatalog {
        self.backend.flavors()
    }

    pub fn servers(&self) -> Servers<'_> {
        Servers::new(&self.backend, &self.context)
    }

    pub fn volumes(&self) -> Volumes<'_> {
        Volumes::new(&self.backend, &self.context)
    }

    pub fn hosts(&self) -> Hosts<'_> {
        Hosts::new(&self.backend, &self.context)
    }

    pub fn accounts(&self) -> Accounts<'_> {
        Accounts::new(&self.backend, &self.context)
    }

    pub fn managed_servers(&self) -> ManagedServers<'_> {
        ManagedServers::new(&self.backend, &self.context)
    }

    pub fn storage(&self) -> Storage {
        Storage
    }

    /// Mapping info of the volumes attached to a server
    pub async fn get_server_volumes(&self, server_id: &ServerId) -> Result<Vec<BlockDeviceMapping>> {
        self.servers().get_server_volumes(server_id).await
    }

    /// Ask the guest to rescan a volume. Only logged.
    pub async fn rescan_server_volume(&self, server_id: &ServerId, volume_id: &VolumeId) -> Result<()> {
        self.servers().get(server_id).await?;
        info!(%server_id, %volume_id, "rescanning server volume");
        Ok(())
    }
}

/// Compute and volume clients for one context
#[derive(Debug, Clone)]
pub struct ClientPair {
    pub compute: Arc<CloudClient>,
    pub volume: Arc<CloudClient>,
}

// =============================================================================
// Client Cache
// =============================================================================

/// Global simulated cloud (shared across every caller in the process)
static SIM_CLOUD: OnceCell<SimCloud> = OnceCell::new();

/// A backend plus the per-context client cache
#[derive(Debug)]
pub struct SimCloud {
    backend: Backend,
    clients: Mutex<HashMap<Context, ClientPair>>,
}

impl SimCloud {
    /// Create a simulated cloud with its own backend
    pub fn new(config: SimConfig) -> Result<Self> {
        Ok(Self::from_backend(Backend::new(config)?))
    }

    pub fn from_backend(backend: Backend) -> Self {
        Self {
            backend,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The process-wide simulated cloud, created on first use with the
    /// default configuration
    pub fn global() -> &'static SimCloud {
        SIM_CLOUD.get_or_init(|| Self::from_backend(Backend::default()))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// The client pair for `context`, created on first use
    pub fn client_pair(&self, context: &Context) -> ClientPair {
        self.lock()
            .entry(context.clone())
            .or_insert_with(|| {
                debug!(tenant = %context.tenant, admin = context.is_admin, "creating client pair");
                ClientPair {
                    compute: Arc::new(CloudClient::new(
                        ClientKind::Compute,
                        context.clone(),
                        self.backend.clone(),
                    )),
                    volume: Arc::new(CloudClient::new(
                        ClientKind::Volume,
                        context.clone(),
                        self.backend.clone(),
                    )),
                }
            })
            .clone()
    }

    pub fn compute_client(&self, context: &Context) -> Arc<CloudClient> {
        self.client_pair(context).compute
    }

    pub fn volume_client(&self, context: &Context) -> Arc<CloudClient> {
        self.client_pair(context).volume
    }

    /// Forget every client and clear the backend
    pub async fn reset(&self) {
        self.lock().clear();
        self.backend.reset().await;
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Context, ClientPair>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
