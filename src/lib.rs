//! simcloud - In-Process Simulated Cloud Provider
//!
//! A stand-in for a compute and block-storage provider that orchestration
//! code can drive in tests. Operations return right away; state
//! transitions (BUILD to ACTIVE, resize confirmation, deletion) complete
//! later on a scheduled clock.
//!
//! Features:
//! - Flavor catalog, servers, volumes, hosts, storage and account views
//! - Failure injection by server name suffix or volume size
//! - Simulated clock for deterministic tests, or real tokio timers
//! - Per-tenant visibility with admin override

pub mod accounts;
pub mod backend;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod fault;
pub mod flavors;
pub mod hosts;
pub mod managed;
pub mod scheduler;
pub mod servers;
pub mod status;
pub mod volumes;

pub use backend::{Backend, SimEvent};
pub use client::{ClientKind, ClientPair, CloudClient, SimCloud};
pub use config::{ClockMode, SimConfig};
pub use context::Context;
pub use error::{CloudError, ResourceKind, Result};
pub use fault::{ServerFault, VolumeFault};
pub use flavors::{Flavor, FlavorCatalog};
pub use servers::{CreateServer, Server, ServerId, ServerStatus, VolumeRequest};
pub use status::{InMemoryInstanceStatuses, InstanceStatusTracker, ServiceStatus};
pub use volumes::{BlockDeviceMapping, Volume, VolumeId, VolumeStatus};

/// Application name
pub const APP_NAME: &str = "simcloud";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
