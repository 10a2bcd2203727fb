//! Managed port lifecycle
//!
//! The port manager hands out ports (and optional floating IPs) for the
//! load balancer data plane, resolves their addresses and reclaims the
//! ones that are no longer referenced. Every managed resource carries the
//! ownership tag; nothing else is ever read or deleted.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::cache::TaggedResourceCache;
use crate::config::NetworkingConfig;
use crate::error::PortManagerError;
use crate::provider::NetworkProvider;

pub mod address;
pub mod outcome;
pub mod provision;
pub mod reconcile;

pub use address::ExternalAddress;
pub use outcome::{Failure, Outcome, Report, Warning};
pub use reconcile::CleanupSummary;

/// Operations the load balancer controller uses to manage its ports
#[async_trait]
pub trait L3PortManager: Send + Sync {
    /// Create a tagged port, with a floating IP if configured. Returns the port ID.
    async fn provision_port(&self) -> Outcome<String>;

    /// Delete every managed port not in `used_ports`, then sweep orphaned floating IPs
    async fn clean_unused_ports(&self, used_ports: &HashSet<String>) -> Outcome<CleanupSummary>;

    /// IDs of all managed ports
    async fn get_available_ports(&self) -> Result<Vec<String>, PortManagerError>;

    /// Externally reachable address of a managed port
    async fn get_external_address(&self, port_id: &str)
        -> Result<ExternalAddress, PortManagerError>;

    /// Address of a managed port on the internal network
    async fn get_internal_address(&self, port_id: &str) -> Result<IpAddr, PortManagerError>;
}

/// Port manager backed by a network provider and a tagged resource cache
pub struct ManagedPortManager {
    provider: Arc<dyn NetworkProvider>,
    config: NetworkingConfig,
    network_id: String,
    cache: TaggedResourceCache,
}

impl ManagedPortManager {
    /// Create a port manager for the configured subnet.
    ///
    /// Looks up the subnet to find the network ports are created on.
    pub async fn new(
        provider: Arc<dyn NetworkProvider>,
        config: NetworkingConfig,
    ) -> Result<Self, PortManagerError> {
        if config.use_floating_ips && config.floating_ip_network_id.is_none() {
            return Err(PortManagerError::FloatingNetworkMissing);
        }

        let subnet = provider.get_subnet(&config.subnet_id).await?;
        info!(
            "Managing ports on network {} (subnet {}, {}), floating IPs {}",
            subnet.network_id,
            subnet.id,
            subnet.cidr,
            if config.use_floating_ips { "enabled" } else { "disabled" }
        );

        let cache = TaggedResourceCache::new(
            Arc::clone(&provider),
            config.cache_ttl,
            config.ownership_tag.clone(),
            config.use_floating_ips,
        );

        Ok(Self {
            provider,
            config,
            network_id: subnet.network_id,
            cache,
        })
    }

    pub fn network_id(&self) -> &str {
        &self.network_id
    }

    pub fn cache(&self) -> &TaggedResourceCache {
        &self.cache
    }
}

#[async_trait]
impl L3PortManager for ManagedPortManager {
    async fn provision_port(&self) -> Outcome<String> {
        self.provision().await
    }

    async fn clean_unused_ports(&self, used_ports: &HashSet<String>) -> Outcome<CleanupSummary> {
        self.clean_unused(used_ports).await
    }

    async fn get_available_ports(&self) -> Result<Vec<String>, PortManagerError> {
        self.available_port_ids().await
    }

    async fn get_external_address(
        &self,
        port_id: &str,
    ) -> Result<ExternalAddress, PortManagerError> {
        self.external_address(port_id).await
    }

    async fn get_internal_address(&self, port_id: &str) -> Result<IpAddr, PortManagerError> {
        self.internal_address(port_id).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::error::ProviderError;
    use crate::provider::memory::ProviderOp;

    #[tokio::test]
    async fn test_new_resolves_network_from_subnet() {
        let (_, manager) = manager(true).await;

        assert_eq!(manager.network_id(), NETWORK_ID);
        assert_eq!(manager.cache().tag(), "test.managed");
    }

    #[tokio::test]
    async fn test_new_requires_floating_network() {
        let mut config = networking(true);
        config.floating_ip_network_id = None;

        let result = ManagedPortManager::new(provider(), config).await;

        assert!(matches!(
            result,
            Err(PortManagerError::FloatingNetworkMissing)
        ));
    }

    #[tokio::test]
    async fn test_new_propagates_subnet_lookup_failure() {
        let provider = provider();
        provider.fail_next(ProviderOp::GetSubnet);

        let result = ManagedPortManager::new(provider, networking(false)).await;

        assert!(matches!(
            result,
            Err(PortManagerError::Provider(ProviderError::CallFailed { .. }))
        ));
    }

    #[tokio::test]
    async fn test_usable_as_trait_object() {
        let (_, manager) = manager(true).await;
        let manager: Arc<dyn L3PortManager> = Arc::new(manager);

        let port_id = manager.provision_port().await.unwrap().into_value();

        assert_eq!(manager.get_available_ports().await.unwrap(), vec![port_id]);
    }
}
