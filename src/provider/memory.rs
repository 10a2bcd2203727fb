//! In-process network provider
//!
//! Keeps ports, floating IPs and tags in memory and allocates addresses from
//! registered CIDRs. Behaves like the real network API where it matters to the
//! port manager: deleting a port leaves its floating IP unattached, list calls
//! filter by tag and return pages. Failures can be injected per operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use ipnetwork::IpNetwork;
use tokio::sync::Notify;
use tracing::debug;

use crate::config::{NetworkingConfig, SimulationConfig};
use crate::error::ProviderError;
use crate::provider::{
    FixedIp, FloatingIp, FloatingIpCreateRequest, NetworkProvider, Pages, Port,
    PortCreateRequest, ResourceKind, Subnet,
};

const DEFAULT_PAGE_SIZE: usize = 50;

/// Provider operations that can be counted and failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    GetSubnet,
    CreatePort,
    GetPort,
    DeletePort,
    ListPorts,
    CreateFloatingIp,
    DeleteFloatingIp,
    ListFloatingIps,
    ReplaceTags(ResourceKind),
}

impl ProviderOp {
    fn name(&self) -> String {
        match self {
            ProviderOp::GetSubnet => "get subnet".to_string(),
            ProviderOp::CreatePort => "create port".to_string(),
            ProviderOp::GetPort => "get port".to_string(),
            ProviderOp::DeletePort => "delete port".to_string(),
            ProviderOp::ListPorts => "list ports".to_string(),
            ProviderOp::CreateFloatingIp => "create floating IP".to_string(),
            ProviderOp::DeleteFloatingIp => "delete floating IP".to_string(),
            ProviderOp::ListFloatingIps => "list floating IPs".to_string(),
            ProviderOp::ReplaceTags(kind) => format!("replace tags on {}", kind.collection()),
        }
    }
}

/// Holds a listing open until released.
///
/// The listing is captured when the call is made; its pages are only
/// returned once `release` is called.
#[derive(Debug, Default)]
pub struct ListingHold {
    entered: Notify,
    released: Notify,
}

impl ListingHold {
    /// Wait until a held listing has been requested
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held listing return its pages
    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// Addresses handed out from one CIDR
#[derive(Debug)]
struct AddressPool {
    cidr: IpNetwork,
    allocated: HashSet<IpAddr>,
}

impl AddressPool {
    fn new(cidr: IpNetwork) -> Self {
        Self {
            cidr,
            allocated: HashSet::new(),
        }
    }

    /// Next free host address, skipping the network, gateway and broadcast addresses
    fn allocate(&mut self) -> Option<IpAddr> {
        let broadcast = match self.cidr {
            IpNetwork::V4(net) => Some(IpAddr::V4(net.broadcast())),
            IpNetwork::V6(_) => None,
        };

        let ip = self
            .cidr
            .iter()
            .skip(2)
            .find(|ip| Some(*ip) != broadcast && !self.allocated.contains(ip))?;
        self.allocated.insert(ip);
        Some(ip)
    }

    fn release(&mut self, ip: &IpAddr) {
        self.allocated.remove(ip);
    }
}

#[derive(Debug, Default)]
struct State {
    subnets: HashMap<String, Subnet>,
    /// Fixed IP pools keyed by subnet ID
    subnet_pools: HashMap<String, AddressPool>,
    /// Floating IP pools keyed by floating network ID
    floating_pools: HashMap<String, AddressPool>,
    ports: BTreeMap<String, Port>,
    floating_ips: BTreeMap<String, FloatingIp>,
    faults: HashMap<ProviderOp, u32>,
    page_faults: HashMap<ResourceKind, usize>,
    holds: HashMap<ResourceKind, Arc<ListingHold>>,
    ignore_tag_filter: bool,
    calls: HashMap<ProviderOp, usize>,
    next_id: u64,
}

impl State {
    /// Record a call and consume a pending injected failure, if any
    fn begin(&mut self, op: ProviderOp) -> Result<(), ProviderError> {
        *self.calls.entry(op).or_default() += 1;

        match self.faults.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(ProviderError::call_failed(op.name(), "injected failure"))
            }
            _ => Ok(()),
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    fn release_port_addresses(&mut self, port: &Port) {
        for fixed_ip in &port.fixed_ips {
            if let Some(pool) = self.subnet_pools.get_mut(&fixed_ip.subnet_id) {
                pool.release(&fixed_ip.ip_address);
            }
        }
    }
}

/// Network provider backed by process memory
#[derive(Debug)]
pub struct InMemoryProvider {
    state: Mutex<State>,
    page_size: usize,
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Build a provider with the configured subnet and floating network registered
    pub fn simulated(networking: &NetworkingConfig, simulation: &SimulationConfig) -> Self {
        let provider = Self::new();
        provider.add_subnet(
            &networking.subnet_id,
            &simulation.network_id,
            simulation.subnet_cidr,
        );
        if let Some(ref floating_network_id) = networking.floating_ip_network_id {
            provider.add_floating_network(floating_network_id, simulation.floating_network_cidr);
        }
        provider
    }

    /// Set the number of items per listing page
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subnet of `network_id`
    pub fn add_subnet(&self, subnet_id: &str, network_id: &str, cidr: IpNetwork) {
        let mut state = self.state();
        state.subnets.insert(
            subnet_id.to_string(),
            Subnet {
                id: subnet_id.to_string(),
                network_id: network_id.to_string(),
                cidr,
            },
        );
        state
            .subnet_pools
            .insert(subnet_id.to_string(), AddressPool::new(cidr));
    }

    /// Register an external network floating IPs are allocated from
    pub fn add_floating_network(&self, network_id: &str, cidr: IpNetwork) {
        self.state()
            .floating_pools
            .insert(network_id.to_string(), AddressPool::new(cidr));
    }

    /// Insert a port as-is, bypassing allocation
    pub fn insert_port(&self, port: Port) {
        self.state().ports.insert(port.id.clone(), port);
    }

    /// Insert a floating IP as-is, bypassing allocation
    pub fn insert_floating_ip(&self, floating_ip: FloatingIp) {
        self.state()
            .floating_ips
            .insert(floating_ip.id.clone(), floating_ip);
    }

    pub fn port(&self, port_id: &str) -> Option<Port> {
        self.state().ports.get(port_id).cloned()
    }

    pub fn port_ids(&self) -> Vec<String> {
        self.state().ports.keys().cloned().collect()
    }

    pub fn floating_ip(&self, floating_ip_id: &str) -> Option<FloatingIp> {
        self.state().floating_ips.get(floating_ip_id).cloned()
    }

    pub fn floating_ips(&self) -> Vec<FloatingIp> {
        self.state().floating_ips.values().cloned().collect()
    }

    /// Fail the next call of `op`
    pub fn fail_next(&self, op: ProviderOp) {
        self.fail_times(op, 1);
    }

    /// Fail the next `times` calls of `op`
    pub fn fail_times(&self, op: ProviderOp, times: u32) {
        self.state().faults.insert(op, times);
    }

    /// Fail the next listing of `kind` once `page` pages have been returned
    pub fn fail_listing_at_page(&self, kind: ResourceKind, page: usize) {
        self.state().page_faults.insert(kind, page);
    }

    /// Hold the next listing of `kind` open until the returned hold is released
    pub fn hold_next_listing(&self, kind: ResourceKind) -> Arc<ListingHold> {
        let hold = Arc::new(ListingHold::default());
        self.state().holds.insert(kind, Arc::clone(&hold));
        hold
    }

    /// Return every resource from listings, whatever tag was asked for
    pub fn ignore_tag_filter(&self) {
        self.state().ignore_tag_filter = true;
    }

    /// Number of calls made to `op`, including failed ones
    pub fn calls(&self, op: ProviderOp) -> usize {
        self.state().calls.get(&op).copied().unwrap_or(0)
    }

    fn paginate<T: Send + 'static>(
        &self,
        kind: ResourceKind,
        items: Vec<T>,
        fail_at: Option<usize>,
        hold: Option<Arc<ListingHold>>,
    ) -> Pages<'static, T> {
        let mut pages: Vec<Result<Vec<T>, ProviderError>> = Vec::new();
        let mut items = items.into_iter().peekable();

        while items.peek().is_some() {
            pages.push(Ok(items.by_ref().take(self.page_size).collect()));
        }

        if let Some(page) = fail_at {
            pages.truncate(page);
            pages.push(Err(ProviderError::call_failed(
                format!("list {}", kind.collection()),
                format!("pagination failed at page {}", page),
            )));
        }

        let pages = stream::iter(pages);
        match hold {
            Some(hold) => stream::once(async move {
                hold.entered.notify_one();
                hold.released.notified().await;
                pages
            })
            .flatten()
            .boxed(),
            None => pages.boxed(),
        }
    }
}

impl State {
    fn matches_tag(&self, tags: &[String], tag: &str) -> bool {
        self.ignore_tag_filter || tags.iter().any(|t| t == tag)
    }
}

#[async_trait]
impl NetworkProvider for InMemoryProvider {
    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, ProviderError> {
        let mut state = self.state();
        state.begin(ProviderOp::GetSubnet)?;
        state
            .subnets
            .get(subnet_id)
            .cloned()
            .ok_or_else(|| {
                ProviderError::call_failed("get subnet", format!("subnet {} not found", subnet_id))
            })
    }

    async fn create_port(&self, request: PortCreateRequest) -> Result<Port, ProviderError> {
        let mut state = self.state();
        state.begin(ProviderOp::CreatePort)?;

        let subnet = state.subnets.get(&request.subnet_id).cloned().ok_or_else(|| {
            ProviderError::call_failed(
                "create port",
                format!("subnet {} not found", request.subnet_id),
            )
        })?;
        if subnet.network_id != request.network_id {
            return Err(ProviderError::call_failed(
                "create port",
                format!(
                    "subnet {} does not belong to network {}",
                    subnet.id, request.network_id
                ),
            ));
        }

        let ip_address = state
            .subnet_pools
            .get_mut(&subnet.id)
            .and_then(AddressPool::allocate)
            .ok_or_else(|| ProviderError::Exhausted {
                network_id: request.network_id.clone(),
            })?;

        let port = Port {
            id: state.next_id("port"),
            network_id: request.network_id,
            description: request.description,
            fixed_ips: vec![FixedIp {
                subnet_id: subnet.id,
                ip_address,
            }],
            port_security_enabled: request.port_security_enabled,
            tags: Vec::new(),
        };
        debug!("Created port {} with address {}", port.id, ip_address);
        state.ports.insert(port.id.clone(), port.clone());
        Ok(port)
    }

    async fn get_port(&self, port_id: &str) -> Result<Port, ProviderError> {
        let mut state = self.state();
        state.begin(ProviderOp::GetPort)?;
        state
            .ports
            .get(port_id)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                kind: ResourceKind::Port,
                id: port_id.to_string(),
            })
    }

    async fn delete_port(&self, port_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.begin(ProviderOp::DeletePort)?;

        let port = state
            .ports
            .remove(port_id)
            .ok_or_else(|| ProviderError::NotFound {
                kind: ResourceKind::Port,
                id: port_id.to_string(),
            })?;
        state.release_port_addresses(&port);

        // Floating IPs outlive their port and become unattached
        for floating_ip in state.floating_ips.values_mut() {
            if floating_ip.port_id.as_deref() == Some(port_id) {
                floating_ip.port_id = None;
            }
        }

        debug!("Deleted port {}", port_id);
        Ok(())
    }

    fn list_ports(&self, tag: &str) -> Pages<'_, Port> {
        let mut state = self.state();
        if let Err(e) = state.begin(ProviderOp::ListPorts) {
            return stream::iter(vec![Err(e)]).boxed();
        }

        let ports: Vec<Port> = state
            .ports
            .values()
            .filter(|p| state.matches_tag(&p.tags, tag))
            .cloned()
            .collect();
        let fail_at = state.page_faults.remove(&ResourceKind::Port);
        let hold = state.holds.remove(&ResourceKind::Port);
        drop(state);

        self.paginate(ResourceKind::Port, ports, fail_at, hold)
    }

    async fn create_floating_ip(
        &self,
        request: FloatingIpCreateRequest,
    ) -> Result<FloatingIp, ProviderError> {
        let mut state = self.state();
        state.begin(ProviderOp::CreateFloatingIp)?;

        if !state.ports.contains_key(&request.port_id) {
            return Err(ProviderError::NotFound {
                kind: ResourceKind::Port,
                id: request.port_id,
            });
        }

        let pool = state
            .floating_pools
            .get_mut(&request.floating_network_id)
            .ok_or_else(|| {
                ProviderError::call_failed(
                    "create floating IP",
                    format!("network {} not found", request.floating_network_id),
                )
            })?;
        let floating_ip_address = pool.allocate().ok_or_else(|| ProviderError::Exhausted {
            network_id: request.floating_network_id.clone(),
        })?;

        let floating_ip = FloatingIp {
            id: state.next_id("fip"),
            floating_network_id: request.floating_network_id,
            floating_ip_address,
            port_id: Some(request.port_id),
            description: request.description,
            tags: Vec::new(),
        };
        debug!(
            "Created floating IP {} ({})",
            floating_ip.id, floating_ip_address
        );
        state
            .floating_ips
            .insert(floating_ip.id.clone(), floating_ip.clone());
        Ok(floating_ip)
    }

    async fn delete_floating_ip(&self, floating_ip_id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.begin(ProviderOp::DeleteFloatingIp)?;

        let floating_ip = state
            .floating_ips
            .remove(floating_ip_id)
            .ok_or_else(|| ProviderError::NotFound {
                kind: ResourceKind::FloatingIp,
                id: floating_ip_id.to_string(),
            })?;
        if let Some(pool) = state.floating_pools.get_mut(&floating_ip.floating_network_id) {
            pool.release(&floating_ip.floating_ip_address);
        }

        debug!("Deleted floating IP {}", floating_ip_id);
        Ok(())
    }

    fn list_floating_ips(&self, tag: &str) -> Pages<'_, FloatingIp> {
        let mut state = self.state();
        if let Err(e) = state.begin(ProviderOp::ListFloatingIps) {
            return stream::iter(vec![Err(e)]).boxed();
        }

        let floating_ips: Vec<FloatingIp> = state
            .floating_ips
            .values()
            .filter(|f| state.matches_tag(&f.tags, tag))
            .cloned()
            .collect();
        let fail_at = state.page_faults.remove(&ResourceKind::FloatingIp);
        let hold = state.holds.remove(&ResourceKind::FloatingIp);
        drop(state);

        self.paginate(ResourceKind::FloatingIp, floating_ips, fail_at, hold)
    }

    async fn replace_all_tags(
        &self,
        kind: ResourceKind,
        id: &str,
        tags: Vec<String>,
    ) -> Result<Vec<String>, ProviderError> {
        let mut state = self.state();
        state.begin(ProviderOp::ReplaceTags(kind))?;

        let not_found = || ProviderError::NotFound {
            kind,
            id: id.to_string(),
        };
        let current = match kind {
            ResourceKind::Port => &mut state.ports.get_mut(id).ok_or_else(not_found)?.tags,
            ResourceKind::FloatingIp => {
                &mut state.floating_ips.get_mut(id).ok_or_else(not_found)?.tags
            }
        };
        *current = tags.clone();
        Ok(tags)
    }
}
