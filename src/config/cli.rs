//! Command-line argument parsing

use crate::config::{parse_cidr, AppConfig};
use crate::error::ConfigError;
use clap::Parser;
use std::time::Duration;

/// Command-line arguments structure
#[derive(Parser, Debug)]
#[command(name = "lb-port-manager")]
#[command(about = "Lifecycle controller for load-balancer managed ports and floating IPs")]
#[command(version)]
pub struct CliArgs {
    /// Configuration file path
    #[arg(short, long, help = "Path to TOML configuration file")]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, help = "Set the logging level")]
    pub log_level: Option<String>,

    /// Subnet new ports are created in
    #[arg(long, help = "ID of the subnet managed ports are created in")]
    pub subnet_id: Option<String>,

    /// External network floating IPs are allocated from
    #[arg(long, help = "ID of the network floating IPs are allocated from")]
    pub floating_ip_network_id: Option<String>,

    /// Whether ports get a floating IP
    #[arg(
        long,
        value_name = "BOOL",
        help = "Attach a floating IP to every managed port (true/false)"
    )]
    pub use_floating_ips: Option<bool>,

    /// Cache refresh interval in seconds
    #[arg(long, help = "Seconds a listing of managed resources is reused")]
    pub cache_ttl_secs: Option<u64>,

    /// Ownership tag
    #[arg(long, help = "Tag marking resources owned by this controller")]
    pub ownership_tag: Option<String>,

    /// Number of ports to provision
    #[arg(long, help = "Number of ports to provision in the simulated run")]
    pub pool_size: Option<usize>,

    /// Simulated subnet CIDR
    #[arg(long, help = "CIDR of the simulated subnet")]
    pub subnet_cidr: Option<String>,

    /// Validate configuration and exit
    #[arg(
        long,
        help = "Validate configuration and exit without starting the service"
    )]
    pub validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    pub print_default_config: bool,
}

impl CliArgs {
    /// Apply CLI arguments over base configuration
    pub fn apply_to_config(&self, mut base_config: AppConfig) -> Result<AppConfig, ConfigError> {
        if let Some(ref subnet_id) = self.subnet_id {
            base_config.networking.subnet_id = subnet_id.clone();
        }

        if let Some(ref network_id) = self.floating_ip_network_id {
            base_config.networking.floating_ip_network_id = Some(network_id.clone());
        }

        if let Some(enabled) = self.use_floating_ips {
            base_config.networking.use_floating_ips = enabled;
        }

        if let Some(secs) = self.cache_ttl_secs {
            base_config.networking.cache_ttl = Duration::from_secs(secs);
        }

        if let Some(ref tag) = self.ownership_tag {
            base_config.networking.ownership_tag = tag.clone();
        }

        if let Some(ref level) = self.log_level {
            base_config.log_level = level.clone();
        }

        if let Some(pool_size) = self.pool_size {
            base_config.pool_size = pool_size;
        }

        if let Some(ref cidr) = self.subnet_cidr {
            base_config.simulation.subnet_cidr = parse_cidr(cidr)?;
        }

        Ok(base_config)
    }
}

/// Print default configuration in TOML format
pub fn print_default_config() {
    let default_config = AppConfig::default();
    let networking = &default_config.networking;

    println!("# LB Port Manager Configuration");
    println!("# This is the default configuration with all available options");
    println!();
    println!("# Number of ports provisioned by the simulated run");
    println!("pool_size = {}", default_config.pool_size);
    println!();
    println!("[networking]");
    println!("# Subnet managed ports are created in (required)");
    println!("subnet_id = \"{}\"", networking.subnet_id);
    println!("# Network floating IPs are allocated from (required with floating IPs)");
    println!("# floating_ip_network_id = \"public\"");
    println!("use_floating_ips = {}", networking.use_floating_ips);
    println!("# Seconds a listing of managed resources is reused");
    println!("cache_ttl_secs = {}", networking.cache_ttl.as_secs());
    println!("# Tag marking resources owned by this controller");
    println!("ownership_tag = \"{}\"", networking.ownership_tag);
    println!("description = \"{}\"", networking.description);
    println!();
    println!("[logging]");
    println!("# Log level: trace, debug, info, warn, error");
    println!("level = \"{}\"", default_config.log_level);
    println!();
    println!("[simulation]");
    println!("# Address ranges of the in-memory network provider");
    println!("network_id = \"{}\"", default_config.simulation.network_id);
    println!("subnet_cidr = \"{}\"", default_config.simulation.subnet_cidr);
    println!(
        "floating_network_cidr = \"{}\"",
        default_config.simulation.floating_network_cidr
    );
}
