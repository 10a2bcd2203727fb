//! Configuration management module
//!
//! Handles loading configuration from multiple sources with proper precedence:
//! CLI arguments > environment variables > TOML files > defaults

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnetwork::{IpNetwork, Ipv4Network};

use crate::cache::DEFAULT_TTL;
use crate::error::ConfigError;

pub mod cli;
pub mod env;
pub mod toml;

/// Tag marking ports and floating IPs owned by this controller
pub const DEFAULT_OWNERSHIP_TAG: &str = "lb-port-manager.managed";

/// Description set on every created resource
pub const DEFAULT_DESCRIPTION: &str = "Managed by lb-port-manager";

/// Main configuration structure
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub networking: NetworkingConfig,
    pub simulation: SimulationConfig,
    pub log_level: String,
    pub pool_size: usize,
}

/// Networking settings consumed by the port manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkingConfig {
    pub subnet_id: String,
    pub floating_ip_network_id: Option<String>,
    pub use_floating_ips: bool,
    pub cache_ttl: Duration,
    pub ownership_tag: String,
    pub description: String,
}

/// Address ranges of the in-memory provider used by the binary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationConfig {
    pub network_id: String,
    pub subnet_cidr: IpNetwork,
    pub floating_network_cidr: IpNetwork,
}

impl Default for NetworkingConfig {
    fn default() -> Self {
        Self {
            subnet_id: String::new(),
            floating_ip_network_id: None,
            use_floating_ips: false,
            cache_ttl: DEFAULT_TTL,
            ownership_tag: DEFAULT_OWNERSHIP_TAG.to_string(),
            description: DEFAULT_DESCRIPTION.to_string(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            network_id: "lb-network".to_string(),
            subnet_cidr: ipv4_network(Ipv4Addr::new(10, 0, 0, 0), 24),
            floating_network_cidr: ipv4_network(Ipv4Addr::new(203, 0, 113, 0), 24),
        }
    }
}

/// IPv4 network for a literal address; an out-of-range prefix yields a host route
fn ipv4_network(addr: Ipv4Addr, prefix: u8) -> IpNetwork {
    IpNetwork::V4(Ipv4Network::new(addr, prefix).unwrap_or_else(|_| Ipv4Network::from(addr)))
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            networking: NetworkingConfig::default(),
            simulation: SimulationConfig::default(),
            log_level: "info".to_string(),
            pool_size: 2,
        }
    }
}

impl NetworkingConfig {
    /// Check the settings the port manager depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.subnet_id.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "subnet_id".to_string(),
            });
        }

        if self.use_floating_ips
            && self
                .floating_ip_network_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            return Err(ConfigError::MissingRequired {
                field: "floating_ip_network_id".to_string(),
            });
        }

        if self.cache_ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "cache TTL must be greater than zero".to_string(),
            ));
        }

        if self.ownership_tag.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "ownership tag must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from all sources and validate it
    pub fn load(cli: &cli::CliArgs) -> Result<Self, ConfigError> {
        let mut config = AppConfig::default();

        if let Some(ref path) = cli.config {
            let file = toml::load_toml_config(path)?;
            config = toml::apply_toml_config(config, file)?;
        }

        let config = env::apply_env_config(config)?;
        let config = cli.apply_to_config(config)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.networking.validate()?;

        if self.simulation.subnet_cidr.is_ipv4() != self.simulation.floating_network_cidr.is_ipv4()
        {
            return Err(ConfigError::ValidationError(
                "simulated subnet and floating network must use the same IP version".to_string(),
            ));
        }

        Ok(())
    }
}

/// Parse a CIDR string such as `10.0.0.0/24`
pub fn parse_cidr(value: &str) -> Result<IpNetwork, ConfigError> {
    value
        .trim()
        .parse::<IpNetwork>()
        .map_err(|e| ConfigError::InvalidFormat(format!("Invalid CIDR '{}': {}", value, e)))
}
