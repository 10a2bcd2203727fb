//! Address resolution for managed ports

use std::net::IpAddr;

use crate::cache::CachedPort;
use crate::error::PortManagerError;
use crate::ports::ManagedPortManager;

/// Externally reachable address of a port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalAddress {
    pub address: IpAddr,
    /// Provider supplied hostname for the address, if any
    pub metadata: Option<String>,
}

impl ManagedPortManager {
    pub(crate) async fn available_port_ids(&self) -> Result<Vec<String>, PortManagerError> {
        let ports = self.cache.get_ports().await?;
        Ok(ports.into_iter().map(|p| p.id).collect())
    }

    pub(crate) async fn external_address(
        &self,
        port_id: &str,
    ) -> Result<ExternalAddress, PortManagerError> {
        let cached = self.lookup(port_id).await?;

        let address = if self.config.use_floating_ips {
            // Provisioning never hands out a port without its floating IP
            cached
                .floating_ip
                .map(|f| f.floating_ip_address)
                .ok_or_else(|| PortManagerError::FloatingIpMissing {
                    port_id: port_id.to_string(),
                })?
        } else {
            first_fixed_ip(&cached)?
        };

        Ok(ExternalAddress {
            address,
            metadata: None,
        })
    }

    pub(crate) async fn internal_address(&self, port_id: &str) -> Result<IpAddr, PortManagerError> {
        let cached = self.lookup(port_id).await?;
        first_fixed_ip(&cached)
    }

    async fn lookup(&self, port_id: &str) -> Result<CachedPort, PortManagerError> {
        self.cache
            .get_port_by_id(port_id)
            .await?
            .ok_or_else(|| PortManagerError::PortIsNil {
                port_id: port_id.to_string(),
            })
    }
}

fn first_fixed_ip(cached: &CachedPort) -> Result<IpAddr, PortManagerError> {
    cached
        .port
        .fixed_ips
        .first()
        .map(|ip| ip.ip_address)
        .ok_or_else(|| PortManagerError::FixedIpMissing {
            port_id: cached.port.id.clone(),
        })
}
