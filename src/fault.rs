//! Fault Injection
//!
//! TigerStyle: Simulated failure modes are explicit values on the resource.
//!
//! Test harnesses pick a failure mode per resource. For servers the mode
//! defaults to one derived from the name suffix, so suites that already
//! rely on the naming convention keep working:
//!
//! | suffix            | mode              |
//! |-------------------|-------------------|
//! | `_SERVER_ERROR`   | `CreateError`     |
//! | `_DELETE_ERROR`   | `DeleteErrorOnce` |
//! | `_RESIZE_TIMEOUT` | `ResizeTimeout`   |
//! | `_RESIZE_ERROR`   | `ResizeError`     |
//!
//! Volumes use size sentinels: 9 fails after BUILD, 13 fails on create.

use serde::{Deserialize, Serialize};

// =============================================================================
// TigerStyle Constants
// =============================================================================

pub const SERVER_CREATE_ERROR_SUFFIX: &str = "_SERVER_ERROR";
pub const SERVER_DELETE_ERROR_SUFFIX: &str = "_DELETE_ERROR";
pub const SERVER_RESIZE_TIMEOUT_SUFFIX: &str = "_RESIZE_TIMEOUT";
pub const SERVER_RESIZE_ERROR_SUFFIX: &str = "_RESIZE_ERROR";

/// Volume size that ends in `error` instead of `available`
pub const VOLUME_SIZE_ERROR_AFTER_BUILD: u64 = 9;

/// Volume size that is rejected outright
pub const VOLUME_SIZE_CREATE_ERROR: u64 = 13;

// =============================================================================
// Types
// =============================================================================

/// Simulated failure mode for a server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerFault {
    #[default]
    None,
    /// Accepted and stored, but the create call reports a client error
    CreateError,
    /// The first delete only moves the server to SHUTDOWN
    DeleteErrorOnce,
    /// Resize fails synchronously with a timeout
    ResizeTimeout,
    /// Resize quietly falls back to ACTIVE
    ResizeError,
}

impl ServerFault {
    /// Derive the failure mode from a server name suffix
    pub fn from_name(name: &str) -> Self {
        if name.ends_with(SERVER_CREATE_ERROR_SUFFIX) {
            Self::CreateError
        } else if name.ends_with(SERVER_DELETE_ERROR_SUFFIX) {
            Self::DeleteErrorOnce
        } else if name.ends_with(SERVER_RESIZE_TIMEOUT_SUFFIX) {
            Self::ResizeTimeout
        } else if name.ends_with(SERVER_RESIZE_ERROR_SUFFIX) {
            Self::ResizeError
        } else {
            Self::None
        }
    }
}

/// Simulated failure mode for a volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeFault {
    #[default]
    None,
    /// Leaves BUILD for `error`
    ErrorAfterBuild,
    /// Rejected before anything is stored
    CreateError,
}

impl VolumeFault {
    /// Derive the failure mode from the requested size
    pub fn from_size(size: u64) -> Self {
        match size {
            VOLUME_SIZE_ERROR_AFTER_BUILD => Self::ErrorAfterBuild,
            VOLUME_SIZE_CREATE_ERROR => Self::CreateError,
            _ => Self::None,
        }
    }
}
