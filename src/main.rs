use std::collections::HashSet;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use lb_port_manager::config::cli::{print_default_config, CliArgs};
use lb_port_manager::config::AppConfig;
use lb_port_manager::error::PortManagerError;
use lb_port_manager::provider::InMemoryProvider;
use lb_port_manager::{AppError, L3PortManager, ManagedPortManager};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let cli = CliArgs::parse();

    if cli.print_default_config {
        print_default_config();
        return Ok(());
    }

    let config = AppConfig::load(&cli)?;

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(config.log_level.as_str())
        .init();

    if cli.validate_config {
        info!("Configuration is valid");
        return Ok(());
    }

    info!("Starting LB Port Manager against the simulated network provider");

    let provider = Arc::new(InMemoryProvider::simulated(
        &config.networking,
        &config.simulation,
    ));
    let manager = ManagedPortManager::new(provider, config.networking.clone()).await?;

    for _ in 0..config.pool_size {
        match manager.provision_port().await {
            Ok(report) => {
                if let Err(e) = log_addresses(&manager, &report.value).await {
                    error!("Failed to resolve addresses of port {}: {}", report.value, e);
                }
            }
            Err(failure) => error!("Failed to provision port: {}", failure),
        }
    }

    let available = manager.get_available_ports().await?;
    info!(
        "LB Port Manager started successfully with {} managed ports",
        available.len()
    );

    tokio::signal::ctrl_c().await?;

    info!("Releasing managed ports");
    match manager.clean_unused_ports(&HashSet::new()).await {
        Ok(report) => info!(
            "Released {} ports and {} floating IPs",
            report.value.deleted_ports.len(),
            report.value.deleted_floating_ips.len()
        ),
        Err(failure) => error!("Failed to release managed ports: {}", failure),
    }

    info!("Shutting down LB Port Manager");
    Ok(())
}

async fn log_addresses(
    manager: &impl L3PortManager,
    port_id: &str,
) -> Result<(), PortManagerError> {
    let internal = manager.get_internal_address(port_id).await?;
    let external = manager.get_external_address(port_id).await?;
    info!(
        "Port {} ready: internal {}, external {}",
        port_id, internal, external.address
    );
    Ok(())
}
