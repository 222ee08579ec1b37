//! Host and Storage Views
//!
//! TigerStyle: Derived, read-only, recomputed on every call.
//!
//! A host report sums the RAM of every visible server placed on it. Each
//! server's flavor ref is resolved as an integer id first and as a link
//! otherwise.

use serde::Serialize;

use crate::backend::Backend;
use crate::context::Context;
use crate::error::{CloudError, ResourceKind, Result};
use crate::servers::{ServerId, ServerStatus, Servers};

// =============================================================================
// Hosts
// =============================================================================

/// A server as listed on a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostInstance {
    pub uuid: ServerId,
    pub name: String,
    pub status: ServerStatus,
}

/// Utilization report for one host
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Host {
    pub name: String,
    pub instances: Vec<HostInstance>,
    #[serde(rename = "totalRAM")]
    pub total_ram: u64,
    #[serde(rename = "usedRAM")]
    pub used_ram: u64,
    pub percent_used: u64,
}

impl Host {
    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

/// Tenant-scoped host view
#[derive(Debug, Clone, Copy)]
pub struct Hosts<'a> {
    backend: &'a Backend,
    context: &'a Context,
}

impl<'a> Hosts<'a> {
    pub fn new(backend: &'a Backend, context: &'a Context) -> Self {
        Self { backend, context }
    }

    /// Recompute the report for one host
    pub async fn get(&self, name: &str) -> Result<Host> {
        if !self.backend.config().hosts.iter().any(|h| h == name) {
            return Err(CloudError::not_found(ResourceKind::Host, name));
        }
        self.recalc(name).await
    }

    /// Recompute every host, in pool order
    pub async fn list(&self) -> Result<Vec<Host>> {
        let mut hosts = Vec::with_capacity(self.backend.config().hosts.len());
        for name in &self.backend.config().hosts {
            hosts.push(self.recalc(name).await?);
        }
        Ok(hosts)
    }

    async fn recalc(&self, name: &str) -> Result<Host> {
        let total_ram = self.backend.config().host_total_ram_mb;
        let flavors = self.backend.flavors();
        let mut instances = Vec::new();
        let mut used_ram = 0;

        for server in Servers::new(self.backend, self.context).list().await {
            if server.host != name {
                continue;
            }
            used_ram += flavors.resolve(&server.flavor_ref)?.ram;
            instances.push(HostInstance {
                uuid: server.id,
                name: server.name,
                status: server.status,
            });
        }

        Ok(Host {
            name: name.to_string(),
            instances,
            total_ram,
            used_ram,
            percent_used: used_ram * 100 / total_ram,
        })
    }
}

// =============================================================================
// Storage
// =============================================================================

/// Total / available pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Capacity {
    pub total: u64,
    pub available: u64,
}

/// Provisioning figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provision {
    pub total: u64,
    pub available: u64,
    pub percent: u64,
}

/// Storage backend report; fixed figures
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StorageDevice {
    pub name: String,
    #[serde(rename = "type")]
    pub storage_type: String,
    pub used: u64,
    pub capacity: Capacity,
    pub provision: Provision,
}

/// Storage view
#[derive(Debug, Clone, Copy, Default)]
pub struct Storage;

impl Storage {
    pub fn list(&self) -> Vec<StorageDevice> {
        vec![StorageDevice {
            name: "fake_storage".to_string(),
            storage_type: "test_type".to_string(),
            used: 10,
            capacity: Capacity {
                total: 100,
                available: 90,
            },
            provision: Provision {
                total: 50,
                available: 40,
                percent: 10,
            },
        }]
    }
}
