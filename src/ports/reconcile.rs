//! Garbage collection of unused ports and orphaned floating IPs

use std::collections::HashSet;

use tracing::{debug, info};

use crate::ports::outcome::{Failure, Outcome, Report, Warning};
use crate::ports::ManagedPortManager;
use crate::provider::{collect_pages, ResourceKind};

/// What a cleanup pass removed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupSummary {
    pub deleted_ports: Vec<String>,
    pub deleted_floating_ips: Vec<String>,
}

impl ManagedPortManager {
    pub(crate) async fn clean_unused(
        &self,
        used_ports: &HashSet<String>,
    ) -> Outcome<CleanupSummary> {
        let ports = self.cache.get_ports().await?;
        debug!(
            "Cleaning unused ports: {} managed, {} in use",
            ports.len(),
            used_ports.len()
        );

        let mut summary = CleanupSummary::default();
        let mut warnings = Vec::new();
        let mut attempted = false;

        for port in ports.iter().filter(|p| !used_ports.contains(&p.id)) {
            attempted = true;
            match self.provider.delete_port(&port.id).await {
                Ok(()) => {
                    info!("Deleted unused port {}", port.id);
                    summary.deleted_ports.push(port.id.clone());
                }
                Err(e) => warnings.push(Warning::delete_failed(ResourceKind::Port, &port.id, e)),
            }
        }

        if !attempted {
            return Ok(Report::new(summary, warnings));
        }

        self.cache.invalidate();

        match self.delete_unused_floating_ips().await {
            Ok(report) => {
                summary.deleted_floating_ips = report.value;
                warnings.extend(report.warnings);
                Ok(Report::new(summary, warnings))
            }
            Err(mut failure) => {
                warnings.append(&mut failure.warnings);
                failure.warnings = warnings;
                Err(failure)
            }
        }
    }

    /// Delete tagged floating IPs that are not attached to any port.
    ///
    /// Deletes what was gathered even if the listing failed part way, then
    /// returns the listing error.
    pub(crate) async fn delete_unused_floating_ips(&self) -> Outcome<Vec<String>> {
        let tag = &self.config.ownership_tag;
        let listing = collect_pages(self.provider.list_floating_ips(tag)).await;

        let orphans: Vec<String> = listing
            .items
            .into_iter()
            .filter(|f| f.tags.iter().any(|t| t == tag))
            .filter(|f| f.port_id.as_deref().map_or(true, str::is_empty))
            .map(|f| f.id)
            .collect();

        let mut deleted = Vec::new();
        let mut warnings = Vec::new();
        for floating_ip_id in orphans {
            match self.provider.delete_floating_ip(&floating_ip_id).await {
                Ok(()) => {
                    info!("Deleted orphaned floating IP {}", floating_ip_id);
                    deleted.push(floating_ip_id);
                }
                Err(e) => warnings.push(Warning::delete_failed(
                    ResourceKind::FloatingIp,
                    &floating_ip_id,
                    e,
                )),
            }
        }

        match listing.error {
            Some(e) => Err(Failure::new(e, warnings)),
            None => Ok(Report::new(deleted, warnings)),
        }
    }
}
