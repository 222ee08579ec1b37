//! Simulation Configuration
//!
//! TigerStyle: Every delay is a named constant with an explicit unit.
//!
//! Defaults reproduce the timings of the provider being faked. A
//! `SimConfig` can be loaded from JSON; missing fields take the defaults.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CloudError, Result};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Server BUILD -> ACTIVE after create
pub const SERVER_ACTIVE_DELAY_MS_DEFAULT: u64 = 1_000;

/// Server REBOOT -> ACTIVE
pub const SERVER_REBOOT_DELAY_MS_DEFAULT: u64 = 1_000;

/// Delay before the instance-status collaborator is told a server runs
pub const SERVER_RUNNING_NOTIFY_DELAY_MS_DEFAULT: u64 = 1_500;

/// Resize accepted -> flavor applied (or migration started)
pub const SERVER_RESIZE_APPLY_DELAY_MS_DEFAULT: u64 = 800;

/// Migration started -> host changed
pub const SERVER_MIGRATE_HOST_DELAY_MS_DEFAULT: u64 = 750;

/// Flavor applied -> VERIFY_RESIZE
pub const SERVER_VERIFY_RESIZE_DELAY_MS_DEFAULT: u64 = 1_000;

/// VERIFY_RESIZE -> running notification is scheduled
pub const SERVER_RESIZE_RUNNING_DELAY_MS_DEFAULT: u64 = 1_000;

/// SHUTDOWN -> removed from the registry
pub const SERVER_DELETE_DELAY_MS_DEFAULT: u64 = 1_500;

/// Volume BUILD -> available / error
pub const VOLUME_STATUS_DELAY_MS_DEFAULT: u64 = 2_000;

/// Volume resize requested -> in-use with the new size
pub const VOLUME_RESIZE_DELAY_MS_DEFAULT: u64 = 1_000;

/// Interval between volume readiness polls during server create
pub const VOLUME_POLL_INTERVAL_MS_DEFAULT: u64 = 100;

/// Upper bound on the volume readiness poll
pub const VOLUME_POLL_TIMEOUT_MS_DEFAULT: u64 = 60_000;

/// Total RAM reported for every simulated host
pub const HOST_TOTAL_RAM_MB_DEFAULT: u64 = 2_004;

/// Fixed host pool
pub const HOSTS_DEFAULT: [&str; 2] = ["fake_host_1", "fake_host_2"];

/// Minimum host pool size (migration needs a different host)
pub const HOSTS_COUNT_MIN: usize = 2;

// =============================================================================
// Types
// =============================================================================

/// Which clock drives scheduled transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Manual clock, advanced explicitly by the caller
    Simulated,
    /// Real tokio timers on the current runtime
    Tokio,
}

/// Simulation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    pub clock: ClockMode,
    pub server_active_delay_ms: u64,
    pub server_reboot_delay_ms: u64,
    pub server_running_notify_delay_ms: u64,
    pub server_resize_apply_delay_ms: u64,
    pub server_migrate_host_delay_ms: u64,
    pub server_verify_resize_delay_ms: u64,
    pub server_resize_running_delay_ms: u64,
    pub server_delete_delay_ms: u64,
    pub volume_status_delay_ms: u64,
    pub volume_resize_delay_ms: u64,
    pub volume_poll_interval_ms: u64,
    pub volume_poll_timeout_ms: u64,
    pub host_total_ram_mb: u64,
    pub hosts: Vec<String>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            clock: ClockMode::Simulated,
            server_active_delay_ms: SERVER_ACTIVE_DELAY_MS_DEFAULT,
            server_reboot_delay_ms: SERVER_REBOOT_DELAY_MS_DEFAULT,
            server_running_notify_delay_ms: SERVER_RUNNING_NOTIFY_DELAY_MS_DEFAULT,
            server_resize_apply_delay_ms: SERVER_RESIZE_APPLY_DELAY_MS_DEFAULT,
            server_migrate_host_delay_ms: SERVER_MIGRATE_HOST_DELAY_MS_DEFAULT,
            server_verify_resize_delay_ms: SERVER_VERIFY_RESIZE_DELAY_MS_DEFAULT,
            server_resize_running_delay_ms: SERVER_RESIZE_RUNNING_DELAY_MS_DEFAULT,
            server_delete_delay_ms: SERVER_DELETE_DELAY_MS_DEFAULT,
            volume_status_delay_ms: VOLUME_STATUS_DELAY_MS_DEFAULT,
            volume_resize_delay_ms: VOLUME_RESIZE_DELAY_MS_DEFAULT,
            volume_poll_interval_ms: VOLUME_POLL_INTERVAL_MS_DEFAULT,
            volume_poll_timeout_ms: VOLUME_POLL_TIMEOUT_MS_DEFAULT,
            host_total_ram_mb: HOST_TOTAL_RAM_MB_DEFAULT,
            hosts: HOSTS_DEFAULT.iter().map(|h| h.to_string()).collect(),
        }
    }
}

impl SimConfig {
    /// Default configuration on a simulated clock
    pub fn simulated() -> Self {
        Self::default()
    }

    /// Default configuration on real tokio timers
    pub fn tokio() -> Self {
        Self {
            clock: ClockMode::Tokio,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file and validate it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the state machines rely on
    pub fn validate(&self) -> Result<()> {
        if self.hosts.len() < HOSTS_COUNT_MIN {
            return Err(CloudError::config(format!(
                "need at least {} hosts, got {}",
                HOSTS_COUNT_MIN,
                self.hosts.len()
            )));
        }
        if self.volume_poll_interval_ms == 0 {
            return Err(CloudError::config("volume_poll_interval_ms must be > 0"));
        }
        if self.host_total_ram_mb == 0 {
            return Err(CloudError::config("host_total_ram_mb must be > 0"));
        }
        Ok(())
    }

    /// Volume readiness poll interval
    pub fn volume_poll_interval(&self) -> Duration {
        Duration::from_millis(self.volume_poll_interval_ms)
    }

    /// Volume readiness poll bound
    pub fn volume_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.volume_poll_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SimConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.clock, ClockMode::Simulated);
        assert_eq!(config.hosts, vec!["fake_host_1", "fake_host_2"]);
    }

    #[test]
    fn test_single_host_rejected() {
        let config = SimConfig {
            hosts: vec!["only".to_string()],
            ..SimConfig::default()
        };
        assert!(matches!(config.validate(), Err(CloudError::Config(_))));
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"clock": "tokio", "server_active_delay_ms": 5, "host_total_ram_mb": 4096}}"#
        )
        .unwrap();

        let config = SimConfig::from_file(file.path()).unwrap();

        assert_eq!(config.clock, ClockMode::Tokio);
        assert_eq!(config.server_active_delay_ms, 5);
        assert_eq!(config.host_total_ram_mb, 4096);
        assert_eq!(
            config.server_delete_delay_ms,
            SERVER_DELETE_DELAY_MS_DEFAULT
        );
    }

    #[test]
    fn test_from_file_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();

        assert!(matches!(
            SimConfig::from_file(file.path()),
            Err(CloudError::Json(_))
        ));
    }
}
