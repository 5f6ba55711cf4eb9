//! Viewguard CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use viewguard::config::GatewayConfig;
use viewguard::gateway::Gateway;
use viewguard::logging;
use viewguard::server;

#[derive(Parser, Debug)]
#[command(
    name = "viewguard",
    version,
    about = "Response-validating authorization gateway for a query engine"
)]
struct Cli {
    /// Config file (default: $VIEWGUARD_CONFIG_PATH or ./viewguard.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Serve the gateway.
    Start,
    /// Validate configuration and print the effective policy.
    Check {
        /// Show the grant a specific role would receive.
        #[arg(long)]
        role: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = GatewayConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Start => start(config).await,
        Commands::Check { role } => check(&config, role.as_deref()),
    }
}

async fn start(config: GatewayConfig) -> Result<()> {
    let _guard = match config.server.logs_dir.as_deref() {
        Some(dir) => Some(logging::init_production(dir, &config.server.log_level)?),
        None => {
            logging::init_cli(&config.server.log_level);
            None
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "viewguard starting");

    let gateway = Arc::new(Gateway::from_config(&config).context("failed to build gateway")?);
    info!(
        fallback_role = gateway.policy().fallback_role(),
        disclaim_mode = ?config.policy.disclaim_mode,
        engine_configured = gateway.engine_configured(),
        "policy loaded"
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.server.bind))?;

    server::serve(listener, gateway, shutdown_signal()).await?;
    info!("viewguard stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

fn check(config: &GatewayConfig, role: Option<&str>) -> Result<()> {
    logging::init_cli("warn");
    config.validate().context("configuration is invalid")?;
    let policy = config.policy_registry()?;

    println!("configuration OK");
    println!("disclaim mode: {:?}", config.policy.disclaim_mode);
    println!("fallback role: {}", policy.fallback_role());
    println!(
        "engine: {}",
        match config.engine_target() {
            Some((url, _)) => format!("configured ({url})"),
            None => "not configured".to_owned(),
        }
    );
    for (name, views) in policy.summary() {
        let views: Vec<&str> = views.into_iter().collect();
        println!("  {name}: [{}]", views.join(", "));
    }

    if let Some(role) = role {
        let grant = policy.grant(role);
        println!(
            "role {role:?} -> {}{} ({} views)",
            grant.effective_role,
            if grant.fell_back { " (fallback)" } else { "" },
            grant.allowed.len()
        );
    }
    Ok(())
}
