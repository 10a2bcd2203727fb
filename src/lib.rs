//! LB Port Manager - lifecycle controller for load balancer network endpoints
//!
//! This library provisions, tracks and reclaims the ports and floating IPs that
//! back a load balancer's data plane, using an ownership tag to tell managed
//! resources apart from everything else on the network.

pub mod cache;
pub mod config;
pub mod error;
pub mod ports;
pub mod provider;

pub use error::AppError;
pub use ports::{L3PortManager, ManagedPortManager};
