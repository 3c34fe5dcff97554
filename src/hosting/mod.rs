//! Hosting service integration module.
//!
//! The reconciliation core never talks to the network directly. It consumes
//! the [`Hosting`] capability, which is implemented over JSON-RPC by
//! [`HttpHosting`] and in memory by [`SandboxHosting`].

mod client;
mod sandbox;
mod types;

use async_trait::async_trait;

use crate::error::Result;

pub use client::{HttpHosting, HttpHostingOptions};
pub use sandbox::SandboxHosting;
pub use types::{
    Disk, DiskSpec, Image, IpAddress, IpVersion, Login, Region, ResourceFilter, SshKey, Vlan,
    VlanSpec, Vm, VmSpec, VmState,
};

/// The hosting service capability surface.
///
/// Every call is a single round trip; errors are propagated as-is.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Hosting: Send + Sync {
    // --- Disks ---

    /// Creates a blank disk.
    async fn create_disk(&self, spec: &DiskSpec) -> Result<Disk>;

    /// Creates a disk cloned from another disk (an image's backing disk or
    /// a user disk).
    async fn create_disk_from(&self, spec: &DiskSpec, source_disk_id: &str) -> Result<Disk>;

    /// Lists disks matching a filter.
    async fn list_disks(&self, filter: &ResourceFilter) -> Result<Vec<Disk>>;

    /// Renames a disk.
    async fn rename_disk(&self, disk_id: &str, name: &str) -> Result<Disk>;

    /// Grows a disk by `delta_gb`.
    async fn extend_disk(&self, disk_id: &str, delta_gb: u64) -> Result<Disk>;

    /// Deletes a disk.
    async fn delete_disk(&self, disk_id: &str) -> Result<()>;

    /// Finds a disk by name.
    async fn disk_from_name(&self, name: &str) -> Result<Option<Disk>>;

    // --- IP addresses ---

    /// Allocates a public IP address.
    async fn create_ip(&self, region_id: &str, version: IpVersion) -> Result<IpAddress>;

    /// Lists IP addresses matching a filter. `name` matches the literal.
    async fn list_ips(&self, filter: &ResourceFilter) -> Result<Vec<IpAddress>>;

    /// Releases an IP address.
    async fn delete_ip(&self, ip_id: &str) -> Result<()>;

    /// Allocates a fixed private address on a VLAN.
    async fn create_private_ip(&self, vlan_id: &str, ip: &str) -> Result<IpAddress>;

    // --- VMs ---

    /// Creates a VM booting from an existing disk with an existing IP.
    async fn create_vm_with_existing_disk_and_ip(
        &self,
        spec: &VmSpec,
        ip_id: &str,
        boot_disk_id: &str,
    ) -> Result<(Vm, IpAddress, Disk)>;

    /// Lists VMs matching a filter.
    async fn describe_vm(&self, filter: &ResourceFilter) -> Result<Vec<Vm>>;

    /// Attaches an IP address to a VM.
    async fn attach_ip(&self, vm_id: &str, ip_id: &str) -> Result<(Vm, IpAddress)>;

    /// Detaches an IP address from a VM.
    async fn detach_ip(&self, vm_id: &str, ip_id: &str) -> Result<(Vm, IpAddress)>;

    /// Attaches a disk after the VM's last disk.
    async fn attach_disk(&self, vm_id: &str, disk_id: &str) -> Result<(Vm, Disk)>;

    /// Attaches a disk at a given position. Position 0 is the boot slot.
    async fn attach_disk_at_position(
        &self,
        vm_id: &str,
        disk_id: &str,
        position: usize,
    ) -> Result<(Vm, Disk)>;

    /// Detaches a disk from a VM.
    async fn detach_disk(&self, vm_id: &str, disk_id: &str) -> Result<(Vm, Disk)>;

    /// Sets the VM memory in MB.
    async fn update_vm_memory(&self, vm_id: &str, memory_mb: u64) -> Result<Vm>;

    /// Sets the VM core count.
    async fn update_vm_cores(&self, vm_id: &str, cores: u32) -> Result<Vm>;

    /// Renames the VM.
    async fn rename_vm(&self, vm_id: &str, hostname: &str) -> Result<Vm>;

    /// Powers the VM on.
    async fn start_vm(&self, vm_id: &str) -> Result<()>;

    /// Powers the VM off.
    async fn stop_vm(&self, vm_id: &str) -> Result<()>;

    /// Deletes the VM record. Attached resources are expected to be detached.
    async fn delete_vm(&self, vm_id: &str) -> Result<()>;

    // --- VLANs ---

    /// Creates a VLAN.
    async fn create_vlan(&self, spec: &VlanSpec) -> Result<Vlan>;

    /// Lists VLANs matching a filter.
    async fn list_vlans(&self, filter: &ResourceFilter) -> Result<Vec<Vlan>>;

    /// Renames a VLAN.
    async fn rename_vlan(&self, vlan_id: &str, name: &str) -> Result<Vlan>;

    /// Changes a VLAN's gateway.
    async fn update_vlan_gateway(&self, vlan_id: &str, gateway: &str) -> Result<Vlan>;

    /// Deletes a VLAN.
    async fn delete_vlan(&self, vlan_id: &str) -> Result<()>;

    /// Finds a VLAN by name.
    async fn vlan_from_name(&self, name: &str) -> Result<Option<Vlan>>;

    // --- SSH keys ---

    /// Registers an SSH public key.
    async fn create_key(&self, name: &str, value: &str) -> Result<SshKey>;

    /// Finds an SSH key by name.
    async fn key_from_name(&self, name: &str) -> Result<Option<SshKey>>;

    /// Deletes an SSH key.
    async fn delete_key(&self, key_id: &str) -> Result<()>;

    // --- Lookups ---

    /// Finds a region by its code.
    async fn region_by_code(&self, code: &str) -> Result<Option<Region>>;

    /// Finds an image by label within a region.
    async fn image_by_name(&self, name: &str, region_id: &str) -> Result<Option<Image>>;
}
