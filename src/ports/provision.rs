//! Port provisioning with compensation
//!
//! A port is only handed out once it is tagged and, when floating IPs are
//! enabled, has a tagged floating IP attached. Anything created before a
//! failing step is deleted again before the error is returned.
//!
//! Tags can only be applied after a resource exists. If the process dies
//! between creating a resource and tagging it, the resource is left behind
//! untagged and the cache will never see it.

use tracing::info;

use crate::error::{PortManagerError, ProviderError};
use crate::ports::outcome::{Failure, Outcome, Report, Warning};
use crate::ports::ManagedPortManager;
use crate::provider::{FloatingIp, FloatingIpCreateRequest, PortCreateRequest, ResourceKind};

impl ManagedPortManager {
    pub(crate) async fn provision(&self) -> Outcome<String> {
        let port = self
            .provider
            .create_port(PortCreateRequest {
                network_id: self.network_id.clone(),
                subnet_id: self.config.subnet_id.clone(),
                description: self.config.description.clone(),
                // The load balancer data plane filters its own traffic
                port_security_enabled: false,
            })
            .await?;

        if let Err(e) = self.tag(ResourceKind::Port, &port.id).await {
            let warnings = self.compensate(ResourceKind::Port, &port.id).await;
            return Err(Failure::new(e, warnings));
        }

        if self.config.use_floating_ips {
            if let Err(mut failure) = self.provision_floating_ip(&port.id).await {
                failure
                    .warnings
                    .extend(self.compensate(ResourceKind::Port, &port.id).await);
                return Err(failure);
            }
        }

        info!("Provisioned managed port {}", port.id);
        self.cache.invalidate();
        Ok(Report::new(port.id, Vec::new()))
    }

    /// Create and tag a floating IP bound to `port_id`
    async fn provision_floating_ip(&self, port_id: &str) -> Result<FloatingIp, Failure> {
        let floating_network_id = self
            .config
            .floating_ip_network_id
            .clone()
            .ok_or(PortManagerError::FloatingNetworkMissing)?;

        let floating_ip = self
            .provider
            .create_floating_ip(FloatingIpCreateRequest {
                floating_network_id,
                port_id: port_id.to_string(),
                description: self.config.description.clone(),
            })
            .await?;

        // An untagged floating IP would never be swept, so drop it here
        if let Err(e) = self.tag(ResourceKind::FloatingIp, &floating_ip.id).await {
            let warnings = self
                .compensate(ResourceKind::FloatingIp, &floating_ip.id)
                .await;
            return Err(Failure::new(e, warnings));
        }

        info!(
            "Attached floating IP {} ({}) to port {}",
            floating_ip.id, floating_ip.floating_ip_address, port_id
        );
        Ok(floating_ip)
    }

    async fn tag(&self, kind: ResourceKind, id: &str) -> Result<(), PortManagerError> {
        self.provider
            .replace_all_tags(kind, id, vec![self.config.ownership_tag.clone()])
            .await
            .map(|_| ())
            .map_err(|source| PortManagerError::Tagging {
                kind,
                id: id.to_string(),
                source,
            })
    }

    /// Delete a resource created earlier in a failed provisioning attempt
    async fn compensate(&self, kind: ResourceKind, id: &str) -> Vec<Warning> {
        let result: Result<(), ProviderError> = match kind {
            ResourceKind::Port => self.provider.delete_port(id).await,
            ResourceKind::FloatingIp => self.provider.delete_floating_ip(id).await,
        };

        match result {
            Ok(()) => {
                info!("Rolled back {} {}", kind, id);
                Vec::new()
            }
            Err(e) => vec![Warning::resource_leak(kind, id, e)],
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{PortManagerError, ProviderError};
    use crate::ports::test_support::*;
    use crate::ports::{L3PortManager, Warning};
    use crate::provider::memory::ProviderOp;
    use crate::provider::ResourceKind;

    #[tokio::test]
    async fn test_provision_with_floating_ip() {
        let (provider, manager) = manager(true).await;

        let report = manager.provision_port().await.unwrap();
        assert!(report.warnings.is_empty());

        let port = provider.port(&report.value).unwrap();
        assert_eq!(port.tags, vec!["test.managed".to_string()]);
        assert_eq!(port.network_id, NETWORK_ID);
        assert_eq!(port.fixed_ips[0].subnet_id, SUBNET_ID);
        assert!(!port.port_security_enabled);

        let cached = manager
            .cache()
            .get_port_by_id(&report.value)
            .await
            .unwrap()
            .unwrap();
        let floating_ip = cached.floating_ip.unwrap();
        assert_eq!(floating_ip.port_id.as_deref(), Some(report.value.as_str()));
        assert_eq!(floating_ip.tags, vec!["test.managed".to_string()]);
        assert_eq!(floating_ip.floating_network_id, FLOATING_NETWORK_ID);
    }

    #[tokio::test]
    async fn test_provision_without_floating_ip() {
        let (provider, manager) = manager(false).await;

        let port_id = manager.provision_port().await.unwrap().into_value();

        assert!(provider.port(&port_id).is_some());
        assert!(provider.floating_ips().is_empty());
        assert_eq!(provider.calls(ProviderOp::CreateFloatingIp), 0);
    }

    #[tokio::test]
    async fn test_provision_invalidates_cache() {
        let (_, manager) = manager(true).await;
        assert!(manager.get_available_ports().await.unwrap().is_empty());

        let port_id = manager.provision_port().await.unwrap().into_value();

        assert_eq!(manager.get_available_ports().await.unwrap(), vec![port_id]);
    }

    #[tokio::test]
    async fn test_create_port_failure_is_returned() {
        let (provider, manager) = manager(true).await;
        provider.fail_next(ProviderOp::CreatePort);

        let failure = manager.provision_port().await.unwrap_err();

        assert!(matches!(failure.error, PortManagerError::Provider(_)));
        assert!(failure.warnings.is_empty());
        assert!(provider.port_ids().is_empty());
    }

    #[tokio::test]
    async fn test_port_tagging_failure_rolls_back_port() {
        let (provider, manager) = manager(true).await;
        provider.fail_next(ProviderOp::ReplaceTags(ResourceKind::Port));

        let failure = manager.provision_port().await.unwrap_err();

        assert!(matches!(
            failure.error,
            PortManagerError::Tagging {
                kind: ResourceKind::Port,
                ..
            }
        ));
        assert!(failure.warnings.is_empty());
        assert!(provider.port_ids().is_empty());
        assert_eq!(provider.calls(ProviderOp::CreateFloatingIp), 0);
    }

    #[tokio::test]
    async fn test_floating_ip_creation_failure_rolls_back_port() {
        let (provider, manager) = manager(true).await;
        provider.fail_next(ProviderOp::CreateFloatingIp);

        let failure = manager.provision_port().await.unwrap_err();

        assert_eq!(
            failure.error,
            PortManagerError::Provider(ProviderError::call_failed(
                "create floating IP",
                "injected failure"
            ))
        );
        assert!(provider.port_ids().is_empty());
        assert!(provider.floating_ips().is_empty());
    }

    #[tokio::test]
    async fn test_floating_ip_tagging_failure_rolls_back_both() {
        let (provider, manager) = manager(true).await;
        provider.fail_next(ProviderOp::ReplaceTags(ResourceKind::FloatingIp));

        let failure = manager.provision_port().await.unwrap_err();

        assert!(matches!(
            failure.error,
            PortManagerError::Tagging {
                kind: ResourceKind::FloatingIp,
                ..
            }
        ));
        assert!(failure.warnings.is_empty());
        assert!(provider.port_ids().is_empty());
        assert!(provider.floating_ips().is_empty());
    }

    #[tokio::test]
    async fn test_failed_rollback_is_a_warning() {
        let (provider, manager) = manager(true).await;
        provider.fail_next(ProviderOp::CreateFloatingIp);
        provider.fail_next(ProviderOp::DeletePort);

        let failure = manager.provision_port().await.unwrap_err();

        // The floating IP stage error is kept, the leak is reported beside it
        assert!(matches!(failure.error, PortManagerError::Provider(_)));
        assert_eq!(failure.warnings.len(), 1);
        let leaked = provider.port_ids();
        assert_eq!(leaked.len(), 1);
        assert!(matches!(
            &failure.warnings[0],
            Warning::ResourceLeak { kind: ResourceKind::Port, id, .. } if *id == leaked[0]
        ));
    }

    #[tokio::test]
    async fn test_failed_floating_ip_rollback_is_a_warning() {
        let (provider, manager) = manager(true).await;
        provider.fail_next(ProviderOp::ReplaceTags(ResourceKind::FloatingIp));
        provider.fail_next(ProviderOp::DeleteFloatingIp);

        let failure = manager.provision_port().await.unwrap_err();

        assert!(matches!(failure.error, PortManagerError::Tagging { .. }));
        assert_eq!(failure.warnings.len(), 1);
        assert!(matches!(
            &failure.warnings[0],
            Warning::ResourceLeak {
                kind: ResourceKind::FloatingIp,
                ..
            }
        ));
        // The port rollback still ran; deleting it left the floating IP unattached
        assert!(provider.port_ids().is_empty());
        assert_eq!(provider.floating_ips()[0].port_id, None);
    }

    #[tokio::test]
    async fn test_concurrent_provisioning_creates_distinct_ports() {
        let (_, manager) = manager(true).await;

        let (a, b) = tokio::join!(manager.provision_port(), manager.provision_port());
        let (a, b) = (a.unwrap().into_value(), b.unwrap().into_value());

        assert_ne!(a, b);
        let mut ports = manager.get_available_ports().await.unwrap();
        ports.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(ports, expected);
    }
}
