//! IP address lifecycle, public and private.
//!
//! Addresses are immutable once issued: any change to a governed field is a
//! replacement that yields a new identifier. Public and private addresses
//! share reads and deletes; only creation differs.

use tracing::{info, warn};

use crate::config::{IpConfig, PrivateIpConfig};
use crate::error::{ReconcileError, Result};
use crate::hosting::{Hosting, IpAddress, ResourceFilter};

use super::outcome::{CreateReport, Observation};
use super::probe::ExistenceProber;
use super::resolve::Resolver;

/// Lifecycle operations for IP addresses.
#[derive(Clone, Copy)]
pub struct IpReconciler<'a> {
    hosting: &'a dyn Hosting,
}

impl<'a> IpReconciler<'a> {
    /// Creates an IP reconciler.
    #[must_use]
    pub const fn new(hosting: &'a dyn Hosting) -> Self {
        Self { hosting }
    }

    /// Allocates a public address.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown region, or the remote error.
    pub async fn create(&self, config: &IpConfig, resolver: &Resolver<'_>) -> Result<CreateReport> {
        let region_id = resolver.region_id(&config.region).await?;
        let ip = self.hosting.create_ip(&region_id, config.version).await?;
        info!("Allocated ipv{} {} ({}) for '{}'", ip.version, ip.ip, ip.id, config.name);
        Ok(report(ip))
    }

    /// Allocates a fixed private address on a VLAN.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown VLAN, or the remote error.
    pub async fn create_private(
        &self,
        config: &PrivateIpConfig,
        resolver: &Resolver<'_>,
    ) -> Result<CreateReport> {
        let vlan_id = resolver
            .vlan_id(&config.vlan)
            .await?
            .ok_or_else(|| ReconcileError::not_found("vlan", &config.vlan))?;
        let ip = self.hosting.create_private_ip(&vlan_id, &config.ip).await?;
        info!("Allocated private {} ({}) on vlan {vlan_id}", ip.ip, ip.id);
        Ok(report(ip))
    }

    /// Reads an address. An address that no longer exists is `None`.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the query fails.
    pub async fn read(&self, id: &str) -> Result<Option<IpAddress>> {
        let ip = self
            .hosting
            .list_ips(&ResourceFilter::by_id(id))
            .await?
            .into_iter()
            .next();
        if ip.is_none() {
            info!("IP {id} not found, marking absent");
        }
        Ok(ip)
    }

    /// Releases an address. Absent addresses are a no-op.
    ///
    /// # Errors
    ///
    /// Returns the remote error, for instance if the address is attached.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !ExistenceProber::new(self.hosting).ip_exists(id).await? {
            info!("IP {id} already absent, nothing to delete");
            return Ok(());
        }
        self.hosting.delete_ip(id).await?;
        info!("Released ip {id}");
        Ok(())
    }

    /// Detaches an address from its VM, then releases it. Used when the
    /// address is being replaced.
    ///
    /// # Errors
    ///
    /// Returns the remote error of the detach or of the delete.
    pub async fn release(&self, id: &str) -> Result<()> {
        let Some(ip) = self.read(id).await? else {
            return Ok(());
        };
        if let Some(vm_id) = &ip.vm_id {
            warn!("Detaching ip {} from vm {vm_id} before replacing it", ip.ip);
            self.hosting.detach_ip(vm_id, id).await?;
        }
        self.delete(id).await
    }
}

fn report(ip: IpAddress) -> CreateReport {
    CreateReport {
        id: ip.id.clone(),
        observed: Observation::Ip(ip),
        warnings: Vec::new(),
    }
}
