//! Tagged resource cache
//!
//! Time-bounded, in-memory join of every port and floating IP carrying the
//! ownership tag. Reads are served from an immutable snapshot; a stale or
//! invalidated snapshot is replaced on the next read.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::provider::{collect_pages, FloatingIp, NetworkProvider, Port};

/// Default time a snapshot is served before it is refreshed
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// A managed port joined with its floating IP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedPort {
    pub port: Port,
    pub floating_ip: Option<FloatingIp>,
}

/// Point-in-time view of the managed resources
#[derive(Debug)]
pub struct CacheSnapshot {
    ports: BTreeMap<String, CachedPort>,
    refreshed_at: Instant,
    generation: u64,
}

impl CacheSnapshot {
    pub fn ports(&self) -> impl Iterator<Item = &CachedPort> {
        self.ports.values()
    }

    pub fn get(&self, port_id: &str) -> Option<&CachedPort> {
        self.ports.get(port_id)
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

/// Read-through cache over the tagged ports and floating IPs of a provider
pub struct TaggedResourceCache {
    provider: Arc<dyn NetworkProvider>,
    tag: String,
    ttl: Duration,
    use_floating_ips: bool,
    current: ArcSwapOption<CacheSnapshot>,
    /// Bumped by `invalidate`; snapshots from an older generation are stale
    generation: AtomicU64,
    refresh_lock: Mutex<()>,
}

impl TaggedResourceCache {
    pub fn new(
        provider: Arc<dyn NetworkProvider>,
        ttl: Duration,
        tag: impl Into<String>,
        use_floating_ips: bool,
    ) -> Self {
        Self {
            provider,
            tag: tag.into(),
            ttl,
            use_floating_ips,
            current: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Mark the current snapshot stale. The next read refreshes.
    pub fn invalidate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!("Invalidated resource cache (generation {})", generation);
    }

    /// Fetch the tagged resources and replace the snapshot.
    ///
    /// On failure the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<Arc<CacheSnapshot>, ProviderError> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    /// All managed ports, refreshing first if the snapshot is stale
    pub async fn get_ports(&self) -> Result<Vec<Port>, ProviderError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.ports().map(|c| c.port.clone()).collect())
    }

    /// Look up a managed port and its floating IP.
    ///
    /// Returns `None` when the port is not managed.
    pub async fn get_port_by_id(&self, port_id: &str) -> Result<Option<CachedPort>, ProviderError> {
        let snapshot = self.snapshot().await?;
        Ok(snapshot.get(port_id).cloned())
    }

    /// Current snapshot if fresh, otherwise a newly refreshed one
    pub async fn snapshot(&self) -> Result<Arc<CacheSnapshot>, ProviderError> {
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(snapshot) = self.fresh_snapshot() {
            return Ok(snapshot);
        }
        self.refresh_locked().await
    }

    fn fresh_snapshot(&self) -> Option<Arc<CacheSnapshot>> {
        let snapshot = self.current.load_full()?;
        let generation = self.generation.load(Ordering::Acquire);

        if snapshot.generation == generation && snapshot.refreshed_at.elapsed() < self.ttl {
            debug!("Resource cache hit ({} ports)", snapshot.len());
            Some(snapshot)
        } else {
            None
        }
    }

    async fn refresh_locked(&self) -> Result<Arc<CacheSnapshot>, ProviderError> {
        // Read the generation before listing so an invalidation racing with
        // this refresh leaves the result stale
        let generation = self.generation.load(Ordering::Acquire);

        let ports = collect_pages(self.provider.list_ports(&self.tag))
            .await
            .into_result()?;
        let floating_ips = if self.use_floating_ips {
            collect_pages(self.provider.list_floating_ips(&self.tag))
                .await
                .into_result()?
        } else {
            Vec::new()
        };

        let snapshot = Arc::new(self.build_snapshot(ports, floating_ips, generation));
        debug!(
            "Refreshed resource cache: {} managed ports (generation {})",
            snapshot.len(),
            generation
        );
        self.current.store(Some(Arc::clone(&snapshot)));
        Ok(snapshot)
    }

    fn build_snapshot(
        &self,
        ports: Vec<Port>,
        floating_ips: Vec<FloatingIp>,
        generation: u64,
    ) -> CacheSnapshot {
        let is_managed = |tags: &[String]| tags.iter().any(|t| *t == self.tag);

        let mut joined: BTreeMap<String, CachedPort> = ports
            .into_iter()
            .filter(|p| is_managed(p.tags.as_slice()))
            .map(|port| {
                (
                    port.id.clone(),
                    CachedPort {
                        port,
                        floating_ip: None,
                    },
                )
            })
            .collect();

        for floating_ip in floating_ips {
            if !is_managed(floating_ip.tags.as_slice()) {
                continue;
            }
            let Some(port_id) = floating_ip.port_id.clone() else {
                continue;
            };
            let Some(entry) = joined.get_mut(&port_id) else {
                continue;
            };

            match entry.floating_ip {
                Some(ref existing) => warn!(
                    "Port {} has multiple floating IPs; ignoring {} in favor of {}",
                    port_id, floating_ip.id, existing.id
                ),
                None => entry.floating_ip = Some(floating_ip),
            }
        }

        CacheSnapshot {
            ports: joined,
            refreshed_at: Instant::now(),
            generation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::memory::ProviderOp;
    use crate::provider::{FixedIp, InMemoryProvider, ResourceKind};

    const TAG: &str = "test.managed";

    fn port(id: &str, ip: &str, tags: &[&str]) -> Port {
        Port {
            id: id.to_string(),
            network_id: "net-a".to_string(),
            description: String::new(),
            fixed_ips: vec![FixedIp {
                subnet_id: "subnet-a".to_string(),
                ip_address: ip.parse().unwrap(),
            }],
            port_security_enabled: false,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn floating_ip(id: &str, ip: &str, port_id: Option<&str>, tags: &[&str]) -> FloatingIp {
        FloatingIp {
            id: id.to_string(),
            floating_network_id: "public".to_string(),
            floating_ip_address: ip.parse().unwrap(),
            port_id: port_id.map(str::to_string),
            description: String::new(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn setup(use_floating_ips: bool) -> (Arc<InMemoryProvider>, TaggedResourceCache) {
        let provider = Arc::new(InMemoryProvider::new().with_page_size(2));
        let cache = TaggedResourceCache::new(
            provider.clone(),
            DEFAULT_TTL,
            TAG,
            use_floating_ips,
        );
        (provider, cache)
    }

    #[tokio::test]
    async fn test_join_by_associated_port() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        provider.insert_port(port("port-b", "10.0.0.6", &[TAG]));
        provider.insert_floating_ip(floating_ip("fip-1", "203.0.113.9", Some("port-a"), &[TAG]));
        provider.insert_floating_ip(floating_ip("fip-2", "203.0.113.10", None, &[TAG]));

        let a = cache.get_port_by_id("port-a").await.unwrap().unwrap();
        let b = cache.get_port_by_id("port-b").await.unwrap().unwrap();

        assert_eq!(a.floating_ip.unwrap().id, "fip-1");
        assert!(b.floating_ip.is_none());
        assert!(cache.get_port_by_id("port-c").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_foreign_resources_never_listed() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        provider.insert_port(port("port-foreign", "10.0.0.7", &["someone.else"]));
        provider.insert_port(port("port-untagged", "10.0.0.8", &[]));
        provider.insert_floating_ip(floating_ip("fip-foreign", "203.0.113.9", Some("port-a"), &[]));

        let ports = cache.get_ports().await.unwrap();

        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].id, "port-a");
        let cached = cache.get_port_by_id("port-a").await.unwrap().unwrap();
        assert!(cached.floating_ip.is_none());
    }

    #[tokio::test]
    async fn test_floating_ips_disabled_skips_listing() {
        let (provider, cache) = setup(false);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        provider.insert_floating_ip(floating_ip("fip-1", "203.0.113.9", Some("port-a"), &[TAG]));

        let cached = cache.get_port_by_id("port-a").await.unwrap().unwrap();

        assert!(cached.floating_ip.is_none());
        assert_eq!(provider.calls(ProviderOp::ListFloatingIps), 0);
    }

    #[tokio::test]
    async fn test_reads_served_from_snapshot_within_ttl() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));

        cache.get_ports().await.unwrap();
        provider.insert_port(port("port-b", "10.0.0.6", &[TAG]));
        let ports = cache.get_ports().await.unwrap();

        assert_eq!(ports.len(), 1);
        assert_eq!(provider.calls(ProviderOp::ListPorts), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_after_ttl() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        cache.get_ports().await.unwrap();

        provider.insert_port(port("port-b", "10.0.0.6", &[TAG]));
        tokio::time::advance(DEFAULT_TTL + Duration::from_millis(1)).await;
        let ports = cache.get_ports().await.unwrap();

        assert_eq!(ports.len(), 2);
        assert_eq!(provider.calls(ProviderOp::ListPorts), 2);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        cache.get_ports().await.unwrap();

        provider.insert_port(port("port-b", "10.0.0.6", &[TAG]));
        cache.invalidate();
        // Invalidation alone performs no I/O
        assert_eq!(provider.calls(ProviderOp::ListPorts), 1);

        let ports = cache.get_ports().await.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(provider.calls(ProviderOp::ListPorts), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_snapshot() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        let before = cache.refresh().await.unwrap();

        provider.insert_port(port("port-b", "10.0.0.6", &[TAG]));
        provider.fail_next(ProviderOp::ListFloatingIps);
        cache.invalidate();
        assert!(cache.get_ports().await.is_err());

        let current = cache.current.load_full().unwrap();
        assert!(Arc::ptr_eq(&before, &current));

        // The next read retries the refresh
        assert_eq!(cache.get_ports().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_snapshot() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-foreign", "10.0.0.7", &["someone.else"]));

        let snapshot = cache.snapshot().await.unwrap();

        assert!(snapshot.is_empty());
        assert_eq!(snapshot.len(), 0);
    }

    #[tokio::test]
    async fn test_partial_listing_fails_refresh() {
        let (provider, cache) = setup(true);
        for (id, ip) in [("port-a", "10.0.0.5"), ("port-b", "10.0.0.6"), ("port-c", "10.0.0.7")] {
            provider.insert_port(port(id, ip, &[TAG]));
        }
        provider.fail_listing_at_page(ResourceKind::Port, 1);

        assert!(cache.get_ports().await.is_err());
        assert!(cache.current.load().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_reads_share_one_refresh() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        let hold = provider.hold_next_listing(ResourceKind::Port);
        let cache = Arc::new(cache);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_ports().await })
            })
            .collect();

        // One reader is listing; the others queue behind the refresh lock
        hold.entered().await;
        tokio::task::yield_now().await;
        assert_eq!(provider.calls(ProviderOp::ListPorts), 1);
        hold.release();

        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().len(), 1);
        }
        assert_eq!(provider.calls(ProviderOp::ListPorts), 1);
    }

    #[tokio::test]
    async fn test_invalidate_during_refresh_leaves_cache_stale() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        let hold = provider.hold_next_listing(ResourceKind::Port);
        let cache = Arc::new(cache);

        let reader = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_ports().await })
        };

        // The held listing was taken before port-b existed
        hold.entered().await;
        provider.insert_port(port("port-b", "10.0.0.6", &[TAG]));
        cache.invalidate();
        hold.release();

        assert_eq!(reader.await.unwrap().unwrap().len(), 1);

        let ports = cache.get_ports().await.unwrap();
        assert_eq!(ports.len(), 2);
        assert_eq!(provider.calls(ProviderOp::ListPorts), 2);
    }

    #[tokio::test]
    async fn test_first_floating_ip_wins() {
        let (provider, cache) = setup(true);
        provider.insert_port(port("port-a", "10.0.0.5", &[TAG]));
        provider.insert_floating_ip(floating_ip("fip-1", "203.0.113.9", Some("port-a"), &[TAG]));
        provider.insert_floating_ip(floating_ip("fip-2", "203.0.113.10", Some("port-a"), &[TAG]));

        let cached = cache.get_port_by_id("port-a").await.unwrap().unwrap();

        assert_eq!(cached.floating_ip.unwrap().id, "fip-1");
    }
}
