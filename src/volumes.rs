//! Volume Registry and State Machine
//!
//! TigerStyle: Block-storage volumes with delayed status transitions.
//!
//! ```text
//! create ──► BUILD ──(2s)──► available
//!              │
//!              └──(2s, size 9)──► error
//!
//! resize ──(1s)──► in-use, size = new size
//! ```
//!
//! Size 13 is rejected before anything is stored. Volumes are never
//! deleted.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::backend::Backend;
use crate::context::Context;
use crate::error::{CloudError, ResourceKind, Result};
use crate::fault::VolumeFault;
use crate::servers::ServerId;

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Volume ID prefix
pub const VOLUME_ID_PREFIX: &str = "FAKE_VOL_";

/// Device name every volume reports when attached
pub const VOLUME_DEVICE: &str = "vdb";

/// Availability zone reported for every volume
pub const VOLUME_AVAILABILITY_ZONE: &str = "fake-availability-zone";

/// Number of colon-separated fields in an encoded block-device mapping
pub const MAPPING_FIELDS_COUNT: usize = 4;

// =============================================================================
// Types
// =============================================================================

/// Volume identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeId(String);

impl VolumeId {
    /// Generate a fresh, never reused id
    pub fn generate() -> Self {
        Self(format!("{}{}", VOLUME_ID_PREFIX, Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VolumeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for VolumeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Volume status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolumeStatus {
    #[serde(rename = "BUILD")]
    Build,
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "error")]
    Error,
    /// Also the status a completed resize leaves behind
    #[serde(rename = "in-use")]
    InUse,
}

impl VolumeStatus {
    /// Get string representation, as the provider reports it
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Build => "BUILD",
            Self::Available => "available",
            Self::Error => "error",
            Self::InUse => "in-use",
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq<&str> for VolumeStatus {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

/// A volume attached to a server
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub server_id: ServerId,
    pub device: String,
}

/// Block-device mapping info recorded on a volume.
///
/// Encoded as `volume_id:type:size:delete_on_terminate`; the fields other
/// than the id are carried as given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockDeviceMapping {
    pub volume_id: VolumeId,
    pub device: String,
    pub volume_type: String,
    pub size: String,
    pub delete_on_terminate: String,
}

impl BlockDeviceMapping {
    /// Parse one mapping entry
    pub fn parse(device: &str, encoded: &str) -> Result<Self> {
        let fields: Vec<&str> = encoded.split(':').collect();
        if fields.len() != MAPPING_FIELDS_COUNT {
            return Err(CloudError::client(format!(
                "block device mapping for {} has {} fields, expected {}: {:?}",
                device,
                fields.len(),
                MAPPING_FIELDS_COUNT,
                encoded
            )));
        }
        if fields[0].is_empty() {
            return Err(CloudError::client(format!(
                "block device mapping for {} has no volume id",
                device
            )));
        }
        Ok(Self {
            volume_id: VolumeId::from(fields[0]),
            device: device.to_string(),
            volume_type: fields[1].to_string(),
            size: fields[2].to_string(),
            delete_on_terminate: fields[3].to_string(),
        })
    }

    /// Encode a mapping for a volume that should be removed with its server
    pub fn encode(volume_id: &VolumeId, size: u64) -> String {
        format!("{}::{}:1", volume_id, size)
    }
}

/// A block-storage volume
#[derive(Debug, Clone, Serialize)]
pub struct Volume {
    pub id: VolumeId,
    #[serde(skip)]
    pub owner: Context,
    pub size: u64,
    pub display_name: Option<String>,
    pub display_description: Option<String>,
    pub status: VolumeStatus,
    pub attachments: Vec<Attachment>,
    pub mapping: Option<BlockDeviceMapping>,
    pub device: String,
    pub fault: VolumeFault,
    /// Creation order, unique per backend
    pub local_id: u64,
    pub created_at: DateTime<Utc>,
}

impl Volume {
    fn new(
        owner: Context,
        local_id: u64,
        size: u64,
        display_name: Option<String>,
        display_description: Option<String>,
    ) -> Self {
        Self {
            id: VolumeId::generate(),
            owner,
            size,
            display_name,
            display_description,
            status: VolumeStatus::Build,
            attachments: Vec::new(),
            mapping: None,
            device: VOLUME_DEVICE.to_string(),
            fault: VolumeFault::from_size(size),
            local_id,
            created_at: Utc::now(),
        }
    }

    pub fn availability_zone(&self) -> &'static str {
        VOLUME_AVAILABILITY_ZONE
    }

    /// Record an attachment to `server_id`. Idempotent.
    pub fn set_attachment(&mut self, server_id: &ServerId) {
        if self.attachments.iter().any(|a| &a.server_id == server_id) {
            return;
        }
        self.attachments.push(Attachment {
            server_id: server_id.clone(),
            device: self.device.clone(),
        });
    }
}

/// Scheduled volume transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeEvent {
    /// Set the status
    Status {
        volume_id: VolumeId,
        status: VolumeStatus,
    },
    /// Finish a resize
    Resized { volume_id: VolumeId, size: u64 },
}

// =============================================================================
// Volume Registry
// =============================================================================

/// Tenant-scoped view of the volume registry
#[derive(Debug, Clone, Copy)]
pub struct Volumes<'a> {
    backend: &'a Backend,
    context: &'a Context,
}

impl<'a> Volumes<'a> {
    pub fn new(backend: &'a Backend, context: &'a Context) -> Self {
        Self { backend, context }
    }

    /// Create a volume in BUILD and schedule its outcome
    pub async fn create(
        &self,
        size: u64,
        display_name: Option<&str>,
        display_description: Option<&str>,
    ) -> Result<Volume> {
        let fault = VolumeFault::from_size(size);
        if fault == VolumeFault::CreateError {
            return Err(CloudError::client(format!(
                "no volume for you (size {})",
                size
            )));
        }

        let volume = Volume::new(
            self.context.clone(),
            self.backend.next_volume_seq(),
            size,
            display_name.map(str::to_string),
            display_description.map(str::to_string),
        );
        let outcome = match fault {
            VolumeFault::ErrorAfterBuild => VolumeStatus::Error,
            _ => VolumeStatus::Available,
        };

        self.backend
            .volumes_db()
            .write()
            .await
            .insert(volume.id.clone(), volume.clone());
        self.backend.schedule(
            self.backend.config().volume_status_delay_ms,
            VolumeEvent::Status {
                volume_id: volume.id.clone(),
                status: outcome,
            },
        );

        info!(volume_id = %volume.id, size, tenant = %self.context.tenant, "volume created");
        Ok(volume)
    }

    /// Get a volume the caller can see
    pub async fn get(&self, id: &VolumeId) -> Result<Volume> {
        self.backend
            .volumes_db()
            .read()
            .await
            .get(id)
            .filter(|v| self.context.can_see(&v.owner))
            .cloned()
            .ok_or_else(|| CloudError::not_found(ResourceKind::Volume, id.as_str()))
    }

    /// All volumes the caller can see, oldest first
    pub async fn list(&self) -> Vec<Volume> {
        let mut volumes: Vec<Volume> = self
            .backend
            .volumes_db()
            .read()
            .await
            .values()
            .filter(|v| self.context.can_see(&v.owner))
            .cloned()
            .collect();
        volumes.sort_by_key(|v| v.local_id);
        volumes
    }

    /// Resize a volume. The new size shows up after a delay, together with
    /// status `in-use`.
    pub async fn resize(&self, id: &VolumeId, new_size: u64) -> Result<()> {
        self.get(id).await?;
        debug!(volume_id = %id, new_size, "resizing volume");
        self.backend.schedule(
            self.backend.config().volume_resize_delay_ms,
            VolumeEvent::Resized {
                volume_id: id.clone(),
                size: new_size,
            },
        );
        Ok(())
    }

    /// Attach a volume to a server. Idempotent.
    pub async fn set_attachment(&self, id: &VolumeId, server_id: &ServerId) -> Result<()> {
        let mut db = self.backend.volumes_db().write().await;
        let volume = db
            .get_mut(id)
            .filter(|v| self.context.can_see(&v.owner))
            .ok_or_else(|| CloudError::not_found(ResourceKind::Volume, id.as_str()))?;
        volume.set_attachment(server_id);
        Ok(())
    }

    /// Make a new status take effect after `delay`
    pub async fn schedule_status(
        &self,
        id: &VolumeId,
        status: VolumeStatus,
        delay: Duration,
    ) -> Result<()> {
        self.get(id).await?;
        self.backend.schedule(
            u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            VolumeEvent::Status {
                volume_id: id.clone(),
                status,
            },
        );
        Ok(())
    }

    /// Record mapping info on a volume and attach it to a server
    pub(crate) async fn attach_mapped(
        &self,
        mapping: BlockDeviceMapping,
        server_id: &ServerId,
    ) -> Result<Volume> {
        let mut db = self.backend.volumes_db().write().await;
        let volume = db
            .get_mut(&mapping.volume_id)
            .filter(|v| self.context.can_see(&v.owner))
            .ok_or_else(|| {
                CloudError::not_found(ResourceKind::Volume, mapping.volume_id.as_str())
            })?;
        volume.mapping = Some(mapping);
        volume.set_attachment(server_id);
        Ok(volume.clone())
    }
}

/// Apply a scheduled volume transition
pub(crate) async fn apply(backend: &Backend, event: VolumeEvent) -> Result<()> {
    let mut db = backend.volumes_db().write().await;
    match event {
        VolumeEvent::Status { volume_id, status } => {
            let volume = db
                .get_mut(&volume_id)
                .ok_or_else(|| CloudError::not_found(ResourceKind::Volume, volume_id.as_str()))?;
            debug!(%volume_id, from = %volume.status, to = %status, "volume status");
            volume.status = status;
        }
        VolumeEvent::Resized { volume_id, size } => {
            let volume = db
                .get_mut(&volume_id)
                .ok_or_else(|| CloudError::not_found(ResourceKind::Volume, volume_id.as_str()))?;
            debug!(%volume_id, from = volume.size, to = size, "volume resized");
            volume.status = VolumeStatus::InUse;
            volume.size = size;
        }
    }
    Ok(())
}
