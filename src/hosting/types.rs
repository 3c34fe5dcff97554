//! Hosting API types and data structures.
//!
//! Records returned by the hosting service, the creation specs sent to it,
//! and the filters used by list queries. Every record is read fresh from the
//! service; nothing here is cached between calls.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ReconcileError;

/// A hosting region (datacenter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// Region identifier.
    pub id: String,
    /// Short region code (e.g. `FR-SD5`).
    pub code: String,
    /// Country the region is located in.
    #[serde(default)]
    pub country: String,
}

/// A bootable image published in a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image identifier.
    pub id: String,
    /// Image label.
    pub name: String,
    /// Identifier of the disk backing this image.
    pub disk_id: String,
    /// Size of the backing disk in GB.
    pub size_gb: u64,
    /// Region the image lives in.
    pub region_id: String,
}

/// IP protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "u8", into = "u8")]
pub enum IpVersion {
    /// IPv4.
    V4,
    /// IPv6.
    #[default]
    V6,
}

impl TryFrom<u8> for IpVersion {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(Self::V4),
            6 => Ok(Self::V6),
            other => Err(format!("IP version must be 4 or 6, got {other}")),
        }
    }
}

impl From<IpVersion> for u8 {
    fn from(version: IpVersion) -> Self {
        match version {
            IpVersion::V4 => 4,
            IpVersion::V6 => 6,
        }
    }
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

/// An IP address, public or private.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    /// IP identifier.
    pub id: String,
    /// The address literal.
    pub ip: String,
    /// Protocol version.
    pub version: IpVersion,
    /// Region the address belongs to.
    pub region_id: String,
    /// VM the address is attached to, if any.
    #[serde(default)]
    pub vm_id: Option<String>,
    /// VLAN the address belongs to, for private addresses.
    #[serde(default)]
    pub vlan_id: Option<String>,
    /// Remote state label.
    #[serde(default)]
    pub state: String,
}

/// A disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    /// Disk identifier.
    pub id: String,
    /// Disk name.
    pub name: String,
    /// Size in GB.
    pub size_gb: u64,
    /// Disk type label (`data`, `system`).
    #[serde(default)]
    pub disk_type: String,
    /// Remote state label.
    #[serde(default)]
    pub state: String,
    /// Region the disk lives in.
    pub region_id: String,
    /// VMs this disk is attached to.
    #[serde(default)]
    pub vm_ids: Vec<String>,
}

/// Power state of a VM as declared by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    /// The VM is powered on.
    #[default]
    Running,
    /// The VM is powered off.
    Halted,
    /// The VM is deleted.
    Deleted,
}

impl VmState {
    /// Returns the state label used by the hosting service.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Halted => "halted",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VmState {
    type Err = ReconcileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "halted" => Ok(Self::Halted),
            "deleted" => Ok(Self::Deleted),
            other => Err(ReconcileError::InvalidStateTransition {
                value: other.to_string(),
            }),
        }
    }
}

/// A virtual machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vm {
    /// VM identifier.
    pub id: String,
    /// Hostname.
    pub hostname: String,
    /// Region the VM runs in.
    pub region_id: String,
    /// Hosting farm label.
    #[serde(default)]
    pub farm: Option<String>,
    /// Memory in MB.
    pub memory_mb: u64,
    /// Number of cores.
    pub cores: u32,
    /// Remote state label (`running`, `halted`, `being_created`, ...).
    pub state: String,
    /// Attached disks, in position order. Position 0 is the boot disk.
    #[serde(default)]
    pub disks: Vec<Disk>,
    /// Attached IP addresses.
    #[serde(default)]
    pub ips: Vec<IpAddress>,
    /// SSH keys installed at creation.
    #[serde(default)]
    pub ssh_key_ids: Vec<String>,
}

impl Vm {
    /// Returns the disk at position 0.
    #[must_use]
    pub fn boot_disk(&self) -> Option<&Disk> {
        self.disks.first()
    }

    /// Returns every disk after the boot disk.
    #[must_use]
    pub fn data_disks(&self) -> &[Disk] {
        self.disks.get(1..).unwrap_or_default()
    }

    /// Parses the remote state label, if it is one the reconciler can drive.
    #[must_use]
    pub fn power_state(&self) -> Option<VmState> {
        self.state.parse().ok()
    }
}

/// A private VLAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    /// VLAN identifier.
    pub id: String,
    /// VLAN name.
    pub name: String,
    /// Region the VLAN lives in.
    pub region_id: String,
    /// Subnet in CIDR notation.
    #[serde(default)]
    pub subnet: String,
    /// Gateway address.
    #[serde(default)]
    pub gateway: Option<String>,
}

/// An SSH public key registered with the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshKey {
    /// Key identifier.
    pub id: String,
    /// Key name.
    pub name: String,
    /// Public key material.
    pub value: String,
    /// Key fingerprint.
    #[serde(default)]
    pub fingerprint: String,
}

/// Parameters for creating a disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskSpec {
    /// Region to create the disk in.
    pub region_id: String,
    /// Disk name.
    pub name: String,
    /// Size in GB. Defaults to the source size when cloning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_gb: Option<u64>,
    /// Disk type label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_type: Option<String>,
}

/// Login credentials installed on a VM at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Login {
    /// User name.
    pub login: String,
    /// Password.
    pub password: String,
}

/// Parameters for creating a VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmSpec {
    /// Region to create the VM in.
    pub region_id: String,
    /// Hostname.
    pub hostname: String,
    /// Memory in MB.
    pub memory_mb: u64,
    /// Number of cores.
    pub cores: u32,
    /// Hosting farm label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub farm: Option<String>,
    /// SSH keys to install.
    #[serde(default)]
    pub ssh_key_ids: Vec<String>,
    /// Login credentials to create.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub login: Option<Login>,
}

/// Parameters for creating a VLAN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VlanSpec {
    /// Region to create the VLAN in.
    pub region_id: String,
    /// VLAN name.
    pub name: String,
    /// Subnet in CIDR notation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
}

/// Filter for list queries.
///
/// Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFilter {
    /// Match a single identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Match a name (or an IP literal for address queries).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Match a region.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,
    /// Match objects attached to a VM.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_id: Option<String>,
}

impl ResourceFilter {
    /// Creates a filter matching a single identifier.
    #[must_use]
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Creates a filter matching a name.
    #[must_use]
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Restricts the filter to a region.
    #[must_use]
    pub fn with_region(mut self, region_id: impl Into<String>) -> Self {
        self.region_id = Some(region_id.into());
        self
    }

    /// Checks a candidate's fields against the filter.
    #[must_use]
    pub fn matches(&self, id: &str, name: &str, region_id: &str) -> bool {
        self.id.as_deref().is_none_or(|want| want == id)
            && self.name.as_deref().is_none_or(|want| want == name)
            && self.region_id.as_deref().is_none_or(|want| want == region_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_state_parse() {
        assert_eq!("halted".parse::<VmState>().expect("halted"), VmState::Halted);
        assert_eq!("running".parse::<VmState>().expect("running"), VmState::Running);
        assert!("paused".parse::<VmState>().is_err());
    }

    #[test]
    fn test_ip_version_serde() {
        let version: IpVersion = serde_json::from_str("4").expect("valid version");
        assert_eq!(version, IpVersion::V4);
        assert!(serde_json::from_str::<IpVersion>("5").is_err());
        assert_eq!(serde_json::to_string(&IpVersion::V6).expect("serialize"), "6");
    }

    #[test]
    fn test_boot_disk_split() {
        let disk = |id: &str| Disk {
            id: id.to_string(),
            name: format!("disk{id}"),
            size_gb: 10,
            disk_type: "data".to_string(),
            state: "created".to_string(),
            region_id: "1".to_string(),
            vm_ids: Vec::new(),
        };
        let mut vm = Vm {
            id: "vm".to_string(),
            hostname: "web".to_string(),
            region_id: "1".to_string(),
            farm: None,
            memory_mb: 512,
            cores: 1,
            state: "running".to_string(),
            disks: vec![disk("a"), disk("b"), disk("c")],
            ips: Vec::new(),
            ssh_key_ids: Vec::new(),
        };

        assert_eq!(vm.boot_disk().map(|d| d.id.as_str()), Some("a"));
        assert_eq!(vm.data_disks().len(), 2);

        vm.disks.clear();
        assert!(vm.boot_disk().is_none());
        assert!(vm.data_disks().is_empty());
    }

    #[test]
    fn test_filter_matches() {
        let filter = ResourceFilter::by_name("data").with_region("7");
        assert!(filter.matches("1", "data", "7"));
        assert!(!filter.matches("1", "data", "8"));
        assert!(ResourceFilter::default().matches("x", "y", "z"));
    }
}
