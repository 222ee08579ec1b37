//! simcloud - In-Process Simulated Cloud Provider
//!
//! Command line entry point: prints the flavor catalog, or drives a small
//! provisioning scenario against a fresh simulated cloud and prints what
//! the provider reports.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Serialize;

use simcloud::hosts::Host;
use simcloud::{Context, CreateServer, ServerStatus, SimCloud, SimConfig, APP_NAME, APP_VERSION};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Default tenant for scenarios
const SCENARIO_TENANT_DEFAULT: &str = "demo_tenant";

/// Default server count for scenarios
const SCENARIO_SERVERS_COUNT_DEFAULT: u32 = 2;

/// Maximum server count for scenarios
const SCENARIO_SERVERS_COUNT_MAX: u32 = 64;

/// Default flavor for scenarios
const SCENARIO_FLAVOR_DEFAULT: &str = "1";

/// Slack added to each wait so real timers have fired
const SCENARIO_SETTLE_MS: u64 = 50;

// =============================================================================
// CLI
// =============================================================================

/// simcloud - In-process simulated cloud provider
#[derive(Parser, Debug)]
#[command(name = APP_NAME)]
#[command(about = "Simulated compute and block-storage provider")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the flavor catalog
    Flavors,

    /// Create servers, let them come up, resize the first and report
    Scenario {
        /// Tenant that owns the servers
        #[arg(long, default_value = SCENARIO_TENANT_DEFAULT)]
        tenant: String,

        /// Number of servers to create
        #[arg(long, default_value_t = SCENARIO_SERVERS_COUNT_DEFAULT)]
        servers: u32,

        /// Flavor id for every server
        #[arg(long, default_value = SCENARIO_FLAVOR_DEFAULT)]
        flavor: String,

        /// JSON configuration file (simulated clock defaults otherwise)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct ServerSummary {
    id: String,
    name: String,
    status: ServerStatus,
    host: String,
    flavor: String,
}

#[derive(Debug, Serialize)]
struct ScenarioReport {
    tenant: String,
    elapsed_ms: u64,
    servers: Vec<ServerSummary>,
    hosts: Vec<Host>,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("simcloud v{}", APP_VERSION);

    match cli.command {
        Command::Flavors => {
            let catalog = simcloud::FlavorCatalog::seeded();
            println!("{}", serde_json::to_string_pretty(&catalog.list())?);
        }
        Command::Scenario {
            tenant,
            servers,
            flavor,
            config,
        } => {
            if servers == 0 || servers > SCENARIO_SERVERS_COUNT_MAX {
                anyhow::bail!(
                    "--servers must be between 1 and {}",
                    SCENARIO_SERVERS_COUNT_MAX
                );
            }
            let config = match config {
                Some(path) => SimConfig::from_file(&path)?,
                None => SimConfig::simulated(),
            };
            let report = run_scenario(config, &tenant, servers, &flavor).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

async fn run_scenario(
    config: SimConfig,
    tenant: &str,
    count: u32,
    flavor: &str,
) -> anyhow::Result<ScenarioReport> {
    let active_delay = Duration::from_millis(config.server_active_delay_ms + SCENARIO_SETTLE_MS);
    let resize_delay = Duration::from_millis(
        config.server_resize_apply_delay_ms
            + config.server_verify_resize_delay_ms
            + SCENARIO_SETTLE_MS,
    );
    let cloud = SimCloud::new(config)?;
    let context = Context::new(tenant);
    let compute = cloud.compute_client(&context);
    let servers = compute.servers();

    let mut ids = Vec::with_capacity(count as usize);
    for index in 0..count {
        let name = format!("{}-{}", tenant, index);
        let server = servers.create(CreateServer::new(name, "image_1", flavor)).await?;
        ids.push(server.id);
    }
    cloud.backend().advance(active_delay).await;

    if let Some(first) = ids.first() {
        let target = compute
            .flavors()
            .list()
            .into_iter()
            .map(|f| f.id.to_string())
            .find(|id| id != flavor)
            .unwrap_or_else(|| flavor.to_string());
        servers.resize(first, Some(target.as_str())).await?;
        cloud.backend().advance(resize_delay).await;
        servers.confirm_resize(first).await?;
    }

    let admin = cloud.compute_client(&Context::admin(tenant));
    let hosts = admin.hosts().list().await?;
    let summaries = servers
        .list()
        .await
        .into_iter()
        .map(|server| ServerSummary {
            id: server.id.to_string(),
            name: server.name,
            status: server.status,
            host: server.host,
            flavor: server.flavor_ref,
        })
        .collect();

    Ok(ScenarioReport {
        tenant: tenant.to_string(),
        elapsed_ms: cloud.backend().now_ms(),
        servers: summaries,
        hosts,
    })
}
