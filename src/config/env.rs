//! Environment variable configuration handling

use crate::config::{parse_cidr, AppConfig};
use crate::error::ConfigError;
use std::env;
use std::time::Duration;

/// Environment variable prefix
const ENV_PREFIX: &str = "LB_PORT_MANAGER_";

fn var(name: &str) -> Option<String> {
    env::var(format!("{}{}", ENV_PREFIX, name)).ok()
}

/// Apply environment variable configuration over base configuration
pub fn apply_env_config(mut base_config: AppConfig) -> Result<AppConfig, ConfigError> {
    if let Some(subnet_id) = var("SUBNET_ID") {
        base_config.networking.subnet_id = subnet_id;
    }

    if let Some(network_id) = var("FLOATING_IP_NETWORK_ID") {
        base_config.networking.floating_ip_network_id = Some(network_id);
    }

    if let Some(value) = var("USE_FLOATING_IPS") {
        base_config.networking.use_floating_ips = parse_bool(&value)?;
    }

    if let Some(value) = var("CACHE_TTL_SECS") {
        base_config.networking.cache_ttl = parse_secs(&value)?;
    }

    if let Some(tag) = var("OWNERSHIP_TAG") {
        base_config.networking.ownership_tag = tag;
    }

    if let Some(level) = var("LOG_LEVEL") {
        base_config.log_level = level;
    }

    if let Some(value) = var("POOL_SIZE") {
        base_config.pool_size = value.trim().parse::<usize>().map_err(|_| {
            ConfigError::InvalidFormat(format!("Invalid pool size: '{}'", value))
        })?;
    }

    if let Some(value) = var("SUBNET_CIDR") {
        base_config.simulation.subnet_cidr = parse_cidr(&value)?;
    }

    if let Some(value) = var("FLOATING_NETWORK_CIDR") {
        base_config.simulation.floating_network_cidr = parse_cidr(&value)?;
    }

    Ok(base_config)
}

/// Parse a boolean flag
/// Accepts: true/false, yes/no, on/off, 1/0 (case-insensitive)
pub fn parse_bool(value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(ConfigError::InvalidFormat(format!(
            "Invalid boolean: '{}'. Expected true or false",
            value
        ))),
    }
}

/// Parse a whole number of seconds
pub fn parse_secs(value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|_| ConfigError::InvalidFormat(format!("Invalid number of seconds: '{}'", value)))
}
