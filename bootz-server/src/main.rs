//! Bootz Server - secure bootstrap for network device control cards
//!
//! Serves signed bootstrap data over gRPC/TLS to devices listed in an
//! inventory file.

use std::path::PathBuf;

use bootz_server::config::DEFAULT_ADDRESS;
use bootz_server::server::prepare;
use bootz_server::{BootzServer, RateLimitConfig, ServerConfig};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tracing_subscriber::EnvFilter;

// ============================================================================
// CLI Definition
// ============================================================================

/// Bootz Server - secure zero-touch bootstrap
#[derive(Parser)]
#[command(name = "bootz-server", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    opts: ServeOpts,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bootstrap server (default if no command given)
    Serve,

    /// Load artifacts and inventory, print a summary and exit
    Check,
}

#[derive(Args)]
struct ServeOpts {
    /// Address to listen on, as [ip:]port
    #[arg(long, global = true, env = "BOOTZ_ADDRESS", default_value = DEFAULT_ADDRESS)]
    address: String,

    /// Directory holding the OC, PDC and vendor CA key pairs and vouchers
    #[arg(long, global = true, env = "BOOTZ_ARTIFACT_DIR")]
    artifact_dir: Option<PathBuf>,

    /// Inventory file (TOML)
    #[arg(long, global = true, env = "BOOTZ_INVENTORY")]
    inventory: Option<PathBuf>,

    /// Interface the DHCP service runs on; enables address assignments
    #[arg(long, global = true, env = "BOOTZ_DHCP_INTF")]
    dhcp_intf: Option<String>,

    /// Sustained bootstrap requests per second
    #[arg(long, global = true, env = "BOOTZ_RATE_LIMIT_PER_SECOND", default_value_t = 20)]
    rate_limit_per_second: u32,

    /// Bootstrap request burst size
    #[arg(long, global = true, env = "BOOTZ_RATE_LIMIT_BURST", default_value_t = 50)]
    rate_limit_burst: u32,
}

impl From<ServeOpts> for ServerConfig {
    fn from(opts: ServeOpts) -> Self {
        Self {
            address: opts.address,
            artifact_dir: opts.artifact_dir,
            inventory: opts.inventory,
            dhcp_intf: opts.dhcp_intf.filter(|i| !i.is_empty()),
            rate_limit: RateLimitConfig {
                per_second: opts.rate_limit_per_second,
                burst: opts.rate_limit_burst,
            },
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ServerConfig::from(cli.opts);
    match cli.command {
        Some(Commands::Check) => cmd_check(config),
        Some(Commands::Serve) | None => cmd_serve(config).await,
    }
}

/// Validate configuration without binding a socket.
fn cmd_check(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let prepared = prepare(&config)?;
    let artifacts = &prepared.artifacts;

    println!("Security artifacts");
    println!("==================");
    println!("TLS fingerprint: {}", artifacts.tls.fingerprint);
    let mut vouchers: Vec<_> = artifacts.ovs.keys().collect();
    vouchers.sort();
    println!("Vouchers:        {}", vouchers.len());
    for serial in vouchers {
        println!("  {}", serial);
    }
    println!();

    println!("Inventory");
    println!("=========");
    for (lookup, chassis) in prepared.entity_manager.get_all().iter() {
        let cards: Vec<_> = chassis
            .controller_cards
            .iter()
            .map(|c| c.serial_number.as_str())
            .collect();
        println!(
            "{:<24} {:<12} cards: {}",
            lookup.to_string(),
            format!("{:?}", chassis.boot_mode),
            cards.join(", ")
        );
    }

    let assignments = prepared.entity_manager.address_assignments();
    if !assignments.is_empty() {
        println!();
        println!("Address assignments");
        println!("===================");
        for (key, assignment) in assignments {
            println!(
                "{:<20} {:<18} via {}",
                key, assignment.ip_address, assignment.gateway
            );
        }
    }

    Ok(())
}

/// Run the server until SIGINT or SIGTERM.
async fn cmd_serve(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mut server = BootzServer::new();
    let addr = server.start(config).await?;
    tracing::info!(address = %addr, "Bootz server listening");

    wait_for_shutdown().await?;

    server.stop().await?;
    tracing::info!("Bootz server shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                tracing::info!("Received SIGINT (Ctrl+C), initiating shutdown");
            }
            _ = terminate.recv() => {
                tracing::info!("Received SIGTERM, initiating shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        tracing::info!("Received Ctrl+C, initiating shutdown");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_args(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(args)
    }

    #[test]
    fn test_rate_limit_flags() {
        let cli = parse_args(&[
            "bootz-server",
            "serve",
            "--rate-limit-per-second",
            "5",
            "--rate-limit-burst",
            "7",
        ])
        .unwrap();

        assert!(matches!(cli.command, Some(Commands::Serve)));
        let config = ServerConfig::from(cli.opts);
        assert_eq!(config.rate_limit.per_second, 5);
        assert_eq!(config.rate_limit.burst, 7);
    }

    #[test]
    fn test_rate_limit_from_env() {
        // Only this test touches these variables
        std::env::set_var("BOOTZ_RATE_LIMIT_PER_SECOND", "3");
        std::env::set_var("BOOTZ_RATE_LIMIT_BURST", "4");
        let cli = parse_args(&["bootz-server", "check"]);
        std::env::remove_var("BOOTZ_RATE_LIMIT_PER_SECOND");
        std::env::remove_var("BOOTZ_RATE_LIMIT_BURST");

        let config = ServerConfig::from(cli.unwrap().opts);
        assert_eq!(config.rate_limit.per_second, 3);
        assert_eq!(config.rate_limit.burst, 4);
    }

    #[test]
    fn test_empty_dhcp_intf_is_unset() {
        let cli = parse_args(&["bootz-server", "--dhcp-intf", ""]).unwrap();
        assert!(cli.command.is_none());
        assert!(ServerConfig::from(cli.opts).dhcp_intf.is_none());
    }
}
