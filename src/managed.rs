//! Managed Server View
//!
//! Extends a server with the fields the management API adds: a deletion
//! flag and the local sequence number. Read-through; nothing is stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::Backend;
use crate::context::Context;
use crate::error::Result;
use crate::servers::{Server, ServerId, ServerStatus, Servers};

/// A server plus management fields
#[derive(Debug, Clone, Serialize)]
pub struct ManagedServer {
    pub server: Server,
    pub deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub local_id: u64,
}

impl ManagedServer {
    fn wrap(server: Server) -> Self {
        Self {
            local_id: server.local_id,
            server,
            deleted: false,
            deleted_at: None,
        }
    }

    pub fn id(&self) -> &ServerId {
        &self.server.id
    }

    pub fn name(&self) -> &str {
        &self.server.name
    }

    pub fn status(&self) -> ServerStatus {
        self.server.status
    }

    pub fn host(&self) -> &str {
        &self.server.host
    }

    pub fn tenant(&self) -> &str {
        self.server.tenant()
    }

    pub fn flavor_ref(&self) -> &str {
        &self.server.flavor_ref
    }
}

/// Tenant-scoped managed server view
#[derive(Debug, Clone, Copy)]
pub struct ManagedServers<'a> {
    servers: Servers<'a>,
}

impl<'a> ManagedServers<'a> {
    pub fn new(backend: &'a Backend, context: &'a Context) -> Self {
        Self {
            servers: Servers::new(backend, context),
        }
    }

    pub async fn get(&self, id: &ServerId) -> Result<ManagedServer> {
        Ok(ManagedServer::wrap(self.servers.get(id).await?))
    }

    pub async fn list(&self) -> Vec<ManagedServer> {
        self.servers
            .list()
            .await
            .into_iter()
            .map(ManagedServer::wrap)
            .collect()
    }
}
