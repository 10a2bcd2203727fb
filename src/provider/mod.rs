//! Network resource provider abstraction
//!
//! Describes the port, floating IP and tagging calls the port manager needs
//! from the cloud network API. Listing calls are paged: they yield a stream
//! of pages and may fail part way through.

use std::fmt;
use std::net::IpAddr;

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use ipnetwork::IpNetwork;

use crate::error::ProviderError;

pub mod memory;

pub use memory::InMemoryProvider;

/// A stream of result pages returned by list calls
pub type Pages<'a, T> = BoxStream<'a, Result<Vec<T>, ProviderError>>;

/// Resource types understood by the tagging API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Port,
    FloatingIp,
}

impl ResourceKind {
    /// Collection name used by the tagging API
    pub fn collection(&self) -> &'static str {
        match self {
            ResourceKind::Port => "ports",
            ResourceKind::FloatingIp => "floatingips",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Port => f.write_str("port"),
            ResourceKind::FloatingIp => f.write_str("floating IP"),
        }
    }
}

/// Fixed IP assigned to a port from a subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: IpAddr,
}

/// Virtual port as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub id: String,
    pub network_id: String,
    pub description: String,
    pub fixed_ips: Vec<FixedIp>,
    pub port_security_enabled: bool,
    pub tags: Vec<String>,
}

/// Floating IP as reported by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FloatingIp {
    pub id: String,
    pub floating_network_id: String,
    pub floating_ip_address: IpAddr,
    /// Port the address is associated with; `None` when unattached
    pub port_id: Option<String>,
    pub description: String,
    pub tags: Vec<String>,
}

/// Subnet lookup result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    pub id: String,
    pub network_id: String,
    pub cidr: IpNetwork,
}

/// Parameters for creating a port
#[derive(Debug, Clone)]
pub struct PortCreateRequest {
    pub network_id: String,
    pub subnet_id: String,
    pub description: String,
    pub port_security_enabled: bool,
}

/// Parameters for creating a floating IP
#[derive(Debug, Clone)]
pub struct FloatingIpCreateRequest {
    pub floating_network_id: String,
    pub port_id: String,
    pub description: String,
}

/// Cloud network API used by the port manager.
///
/// Calls may fail at any point and none of them is assumed idempotent,
/// except `replace_all_tags`.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    async fn get_subnet(&self, subnet_id: &str) -> Result<Subnet, ProviderError>;

    async fn create_port(&self, request: PortCreateRequest) -> Result<Port, ProviderError>;

    async fn get_port(&self, port_id: &str) -> Result<Port, ProviderError>;

    async fn delete_port(&self, port_id: &str) -> Result<(), ProviderError>;

    /// List ports carrying `tag`
    fn list_ports(&self, tag: &str) -> Pages<'_, Port>;

    async fn create_floating_ip(
        &self,
        request: FloatingIpCreateRequest,
    ) -> Result<FloatingIp, ProviderError>;

    async fn delete_floating_ip(&self, floating_ip_id: &str) -> Result<(), ProviderError>;

    /// List floating IPs carrying `tag`
    fn list_floating_ips(&self, tag: &str) -> Pages<'_, FloatingIp>;

    /// Replace all tags of a resource
    async fn replace_all_tags(
        &self,
        kind: ResourceKind,
        id: &str,
        tags: Vec<String>,
    ) -> Result<Vec<String>, ProviderError>;
}

/// Items gathered from a paged listing
#[derive(Debug)]
pub struct Listing<T> {
    pub items: Vec<T>,
    /// First error hit while paging; `items` holds everything seen before it
    pub error: Option<ProviderError>,
}

impl<T> Listing<T> {
    /// Convert into a plain result, discarding partial items on error
    pub fn into_result(self) -> Result<Vec<T>, ProviderError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.items),
        }
    }
}

/// Drain a paged listing, stopping at the first failing page
pub async fn collect_pages<T>(mut pages: Pages<'_, T>) -> Listing<T> {
    let mut items = Vec::new();

    while let Some(page) = pages.next().await {
        match page {
            Ok(mut page) => items.append(&mut page),
            Err(e) => {
                return Listing {
                    items,
                    error: Some(e),
                }
            }
        }
    }

    Listing { items, error: None }
}
