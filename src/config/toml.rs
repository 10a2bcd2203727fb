//! TOML configuration file parsing

use std::time::Duration;

use serde::Deserialize;

use crate::config::{parse_cidr, AppConfig};
use crate::error::ConfigError;

/// TOML configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct TomlConfig {
    pub pool_size: Option<usize>,
    pub networking: Option<TomlNetworkingConfig>,
    pub logging: Option<LoggingConfig>,
    pub simulation: Option<TomlSimulationConfig>,
}

/// Networking section
#[derive(Debug, Default, Deserialize)]
pub struct TomlNetworkingConfig {
    pub subnet_id: Option<String>,
    pub floating_ip_network_id: Option<String>,
    pub use_floating_ips: Option<bool>,
    pub cache_ttl_secs: Option<u64>,
    pub ownership_tag: Option<String>,
    pub description: Option<String>,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// In-memory provider address ranges
#[derive(Debug, Deserialize)]
pub struct TomlSimulationConfig {
    pub network_id: Option<String>,
    pub subnet_cidr: Option<String>,
    pub floating_network_cidr: Option<String>,
}

/// Load configuration from TOML file
pub fn load_toml_config(path: &str) -> Result<TomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|_| ConfigError::FileNotFound { path: path.to_string() })?;

    parse_toml_config(&content)
}

/// Parse configuration from TOML text
pub fn parse_toml_config(content: &str) -> Result<TomlConfig, ConfigError> {
    toml::from_str(content).map_err(|e| ConfigError::InvalidFormat(e.to_string()))
}

/// Apply the values present in a TOML file over base configuration
pub fn apply_toml_config(
    mut base_config: AppConfig,
    file: TomlConfig,
) -> Result<AppConfig, ConfigError> {
    if let Some(pool_size) = file.pool_size {
        base_config.pool_size = pool_size;
    }

    if let Some(networking) = file.networking {
        let target = &mut base_config.networking;
        if let Some(subnet_id) = networking.subnet_id {
            target.subnet_id = subnet_id;
        }
        if let Some(network_id) = networking.floating_ip_network_id {
            target.floating_ip_network_id = Some(network_id);
        }
        if let Some(enabled) = networking.use_floating_ips {
            target.use_floating_ips = enabled;
        }
        if let Some(secs) = networking.cache_ttl_secs {
            target.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(tag) = networking.ownership_tag {
            target.ownership_tag = tag;
        }
        if let Some(description) = networking.description {
            target.description = description;
        }
    }

    if let Some(level) = file.logging.and_then(|l| l.level) {
        base_config.log_level = level;
    }

    if let Some(simulation) = file.simulation {
        if let Some(network_id) = simulation.network_id {
            base_config.simulation.network_id = network_id;
        }
        if let Some(ref cidr) = simulation.subnet_cidr {
            base_config.simulation.subnet_cidr = parse_cidr(cidr)?;
        }
        if let Some(ref cidr) = simulation.floating_network_cidr {
            base_config.simulation.floating_network_cidr = parse_cidr(cidr)?;
        }
    }

    Ok(base_config)
}
