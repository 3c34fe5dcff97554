//! Existence prober.
//!
//! A resource exists if and only if a filtered list query returns at least
//! one record and the query itself succeeds. Deletes consult the prober
//! first so that deleting an absent resource is a no-op.

use tracing::debug;

use crate::config::ResourceKind;
use crate::error::Result;
use crate::hosting::{Hosting, ResourceFilter};

/// Checks whether remote resources still exist.
#[derive(Clone, Copy)]
pub struct ExistenceProber<'a> {
    hosting: &'a dyn Hosting,
}

impl<'a> ExistenceProber<'a> {
    /// Creates a prober over a hosting backend.
    #[must_use]
    pub const fn new(hosting: &'a dyn Hosting) -> Self {
        Self { hosting }
    }

    /// Returns true if a VM with this ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the list query fails.
    pub async fn vm_exists(&self, id: &str) -> Result<bool> {
        let vms = self.hosting.describe_vm(&ResourceFilter::by_id(id)).await?;
        Ok(!vms.is_empty())
    }

    /// Returns true if a disk with this ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the list query fails.
    pub async fn disk_exists(&self, id: &str) -> Result<bool> {
        let disks = self.hosting.list_disks(&ResourceFilter::by_id(id)).await?;
        Ok(!disks.is_empty())
    }

    /// Returns true if an IP address (public or private) with this ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the list query fails.
    pub async fn ip_exists(&self, id: &str) -> Result<bool> {
        let ips = self.hosting.list_ips(&ResourceFilter::by_id(id)).await?;
        Ok(!ips.is_empty())
    }

    /// Returns true if a VLAN with this ID exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the list query fails.
    pub async fn vlan_exists(&self, id: &str) -> Result<bool> {
        let vlans = self.hosting.list_vlans(&ResourceFilter::by_id(id)).await?;
        Ok(!vlans.is_empty())
    }

    /// Returns true if the key registered under `name` is the one with `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the lookup fails.
    pub async fn key_exists(&self, name: &str, id: &str) -> Result<bool> {
        let key = self.hosting.key_from_name(name).await?;
        Ok(key.is_some_and(|k| k.id == id))
    }

    /// Returns true if the resource of `kind` with `id` exists. `name` is only
    /// used for SSH keys, which are looked up by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying query fails.
    pub async fn exists(&self, kind: ResourceKind, id: &str, name: &str) -> Result<bool> {
        let exists = match kind {
            ResourceKind::Vm => self.vm_exists(id).await?,
            ResourceKind::Disk => self.disk_exists(id).await?,
            ResourceKind::Ip | ResourceKind::PrivateIp => self.ip_exists(id).await?,
            ResourceKind::Vlan => self.vlan_exists(id).await?,
            ResourceKind::SshKey => self.key_exists(name, id).await?,
        };
        debug!("{kind} {id} exists: {exists}");
        Ok(exists)
    }
}
