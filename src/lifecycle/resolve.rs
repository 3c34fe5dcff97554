//! Reference resolution.
//!
//! The desired configuration refers to other resources by name. A name is
//! first looked up among the resources this configuration manages (their
//! recorded identifiers), then on the hosting service: disks and SSH keys
//! by name, addresses and VLANs by identifier.

use std::collections::HashMap;
use tracing::warn;

use crate::config::{ResourceAddress, ResourceKind, VmConfig};
use crate::error::{ReconcileError, Result};
use crate::hosting::{Hosting, ResourceFilter};

use super::lookup::DataSources;

/// Source of identifiers for resources managed by this configuration.
pub trait IdLookup: Send + Sync {
    /// Returns the remote identifier recorded for `address`.
    fn id_of(&self, address: &ResourceAddress) -> Option<String>;
}

impl IdLookup for HashMap<ResourceAddress, String> {
    fn id_of(&self, address: &ResourceAddress) -> Option<String> {
        self.get(address).cloned()
    }
}

/// Identifiers a VM configuration resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedVm {
    /// Region identifier.
    pub region_id: String,
    /// Boot disk identifier.
    pub boot_disk_id: String,
    /// Non-boot disk identifiers, in declared order. Unresolvable disks are
    /// left out.
    pub disk_ids: Vec<String>,
    /// Address identifiers, in declared order. Unresolvable addresses are
    /// left out; never empty.
    pub ip_ids: Vec<String>,
    /// SSH key identifiers.
    pub ssh_key_ids: Vec<String>,
}

/// Resolves names to remote identifiers.
#[derive(Clone, Copy)]
pub struct Resolver<'a> {
    hosting: &'a dyn Hosting,
    known: &'a dyn IdLookup,
}

impl<'a> Resolver<'a> {
    /// Creates a resolver over a hosting backend and the managed identifiers.
    #[must_use]
    pub const fn new(hosting: &'a dyn Hosting, known: &'a dyn IdLookup) -> Self {
        Self { hosting, known }
    }

    /// Resolves a region code.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the region does not exist.
    pub async fn region_id(&self, code: &str) -> Result<String> {
        Ok(DataSources::new(self.hosting).region(code).await?.id)
    }

    /// Resolves a disk by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote lookup fails.
    pub async fn disk_id(&self, name: &str) -> Result<Option<String>> {
        if let Some(id) = self
            .known
            .id_of(&ResourceAddress::new(ResourceKind::Disk, name))
        {
            return Ok(Some(id));
        }
        Ok(self.hosting.disk_from_name(name).await?.map(|d| d.id))
    }

    /// Resolves an address label (public or private) or a remote address ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote lookup fails.
    pub async fn ip_id(&self, name: &str) -> Result<Option<String>> {
        for kind in [ResourceKind::Ip, ResourceKind::PrivateIp] {
            if let Some(id) = self.known.id_of(&ResourceAddress::new(kind, name)) {
                return Ok(Some(id));
            }
        }
        let ips = self.hosting.list_ips(&ResourceFilter::by_id(name)).await?;
        Ok(ips.into_iter().next().map(|ip| ip.id))
    }

    /// Resolves an SSH key by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote lookup fails.
    pub async fn key_id(&self, name: &str) -> Result<Option<String>> {
        if let Some(id) = self
            .known
            .id_of(&ResourceAddress::new(ResourceKind::SshKey, name))
        {
            return Ok(Some(id));
        }
        Ok(self.hosting.key_from_name(name).await?.map(|k| k.id))
    }

    /// Resolves a VLAN by name or remote ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote lookup fails.
    pub async fn vlan_id(&self, name: &str) -> Result<Option<String>> {
        if let Some(id) = self
            .known
            .id_of(&ResourceAddress::new(ResourceKind::Vlan, name))
        {
            return Ok(Some(id));
        }
        let vlans = self.hosting.list_vlans(&ResourceFilter::by_id(name)).await?;
        Ok(vlans.into_iter().next().map(|v| v.id))
    }

    /// Resolves the non-boot disks of a VM, skipping names that resolve to
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if a remote lookup fails.
    pub async fn data_disk_ids(&self, config: &VmConfig) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(config.disks.len());
        for name in &config.disks {
            match self.disk_id(name).await? {
                Some(id) => ids.push(id),
                None => warn!("Disk '{name}' of vm '{}' not found, skipping", config.name),
            }
        }
        Ok(ids)
    }

    /// Resolves the addresses of a VM, skipping names that resolve to nothing.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if none of the addresses resolve, or the remote
    /// error.
    pub async fn ip_ids(&self, config: &VmConfig) -> Result<Vec<String>> {
        let mut ids = Vec::with_capacity(config.ips.len());
        for name in &config.ips {
            match self.ip_id(name).await? {
                Some(id) => ids.push(id),
                None => warn!("IP '{name}' of vm '{}' not found, skipping", config.name),
            }
        }
        if ids.is_empty() {
            return Err(ReconcileError::not_found("ip", config.ips.join(", ")).into());
        }
        Ok(ids)
    }

    /// Resolves the boot disk of a VM.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the disk does not exist.
    pub async fn boot_disk_id(&self, config: &VmConfig) -> Result<String> {
        self.disk_id(&config.boot_disk)
            .await?
            .ok_or_else(|| ReconcileError::not_found("disk", &config.boot_disk).into())
    }

    /// Resolves every reference of a VM.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown region, boot disk or SSH key, or if
    /// none of the addresses resolve.
    pub async fn resolve_vm(&self, config: &VmConfig) -> Result<ResolvedVm> {
        let region_id = self.region_id(&config.region).await?;
        let boot_disk_id = self.boot_disk_id(config).await?;
        let disk_ids = self.data_disk_ids(config).await?;
        let ip_ids = self.ip_ids(config).await?;

        let mut ssh_key_ids = Vec::with_capacity(config.ssh_keys.len());
        for name in &config.ssh_keys {
            let id = self
                .key_id(name)
                .await?
                .ok_or_else(|| ReconcileError::not_found("ssh_key", name))?;
            ssh_key_ids.push(id);
        }

        Ok(ResolvedVm {
            region_id,
            boot_disk_id,
            disk_ids,
            ip_ids,
            ssh_key_ids,
        })
    }
}
