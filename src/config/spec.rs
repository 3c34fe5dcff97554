//! Configuration specification types for the reconciliation system.
//!
//! This module defines all the structs that map to the `hostwright.yaml` file.
//! They are the only place the desired state exists in a loosely structured
//! form; everything downstream consumes the typed resource configs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::hosting::{IpVersion, Login, VmState};

/// The root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DesiredConfig {
    /// Hosting API connection settings.
    #[serde(default)]
    pub provider: ProviderConfig,
    /// State storage settings.
    #[serde(default)]
    pub state: StateConfig,
    /// Reconciliation policy knobs.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// SSH keys to register.
    #[serde(default)]
    pub ssh_keys: Vec<SshKeyConfig>,
    /// Private VLANs.
    #[serde(default)]
    pub vlans: Vec<VlanConfig>,
    /// Public IP addresses.
    #[serde(default)]
    pub ips: Vec<IpConfig>,
    /// Private addresses on VLANs.
    #[serde(default)]
    pub private_ips: Vec<PrivateIpConfig>,
    /// Disks.
    #[serde(default)]
    pub disks: Vec<DiskConfig>,
    /// Virtual machines.
    #[serde(default)]
    pub vms: Vec<VmConfig>,
}

/// Hosting API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProviderConfig {
    /// Endpoint URL. Defaults to the public API.
    #[serde(default)]
    pub url: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Retries for network failures. Remote faults are never retried.
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: default_timeout_secs(),
            max_retries: 0,
        }
    }
}

/// State storage settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Local state file path.
    #[serde(default)]
    pub path: Option<String>,
}

/// Reconciliation policy knobs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyConfig {
    /// What to do when a disk's declared size decreases.
    #[serde(default)]
    pub disk_shrink: ShrinkPolicy,
    /// Ordering used when an IP must be replaced.
    #[serde(default)]
    pub ip_replacement: IpReplacement,
    /// Behavior when one attribute group of an update fails.
    #[serde(default)]
    pub update_strategy: UpdateStrategy,
}

/// Handling of a requested disk shrink.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShrinkPolicy {
    /// Reject the change before any remote call.
    #[default]
    Reject,
    /// Destroy and recreate the disk at the new size.
    Replace,
}

/// Ordering of the two halves of an IP replacement.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IpReplacement {
    /// Allocate the new address, then release the old one.
    #[default]
    CreateBeforeDelete,
    /// Release the old address, then allocate the new one.
    DeleteBeforeCreate,
}

/// Update behavior across attribute groups.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStrategy {
    /// Attempt every group and report the failed ones.
    #[default]
    Continue,
    /// Stop at the first failed group.
    Abort,
}

/// An SSH public key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SshKeyConfig {
    /// Key name, unique per account.
    pub name: String,
    /// Public key material (`ssh-ed25519 AAAA... comment`).
    pub value: String,
}

/// A private VLAN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VlanConfig {
    /// Local name.
    pub name: String,
    /// Name on the hosting service. Defaults to `name`.
    #[serde(default)]
    pub label: Option<String>,
    /// Region code.
    pub region: String,
    /// Subnet in CIDR notation.
    #[serde(default)]
    pub subnet: Option<String>,
    /// Gateway address.
    #[serde(default)]
    pub gateway: Option<String>,
}

/// A public IP address.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct IpConfig {
    /// Local label, used by VMs to reference the address.
    pub name: String,
    /// Region code.
    pub region: String,
    /// Protocol version, 4 or 6.
    pub version: IpVersion,
}

/// A fixed private address on a VLAN.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PrivateIpConfig {
    /// Local label, used by VMs to reference the address.
    pub name: String,
    /// Region code.
    pub region: String,
    /// Name of the VLAN.
    pub vlan: String,
    /// Address literal.
    pub ip: String,
}

/// A disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DiskConfig {
    /// Local name, used by VMs to reference the disk.
    pub name: String,
    /// Name on the hosting service. Defaults to `name`.
    #[serde(default)]
    pub label: Option<String>,
    /// Region code.
    pub region: String,
    /// Size in GB. Defaults to the source size, or the service default for
    /// blank disks.
    #[serde(default)]
    pub size_gb: Option<u64>,
    /// Image label to clone from.
    #[serde(default)]
    pub image: Option<String>,
    /// Name of a disk to clone from.
    #[serde(default)]
    pub source_disk: Option<String>,
}

/// A virtual machine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VmConfig {
    /// Local name.
    pub name: String,
    /// Hostname. Defaults to `name`.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Region code.
    pub region: String,
    /// Memory in MB.
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    /// Number of cores.
    #[serde(default = "default_cores")]
    pub cores: u32,
    /// Power state.
    #[serde(default)]
    pub state: VmState,
    /// Hosting farm label.
    #[serde(default)]
    pub farm: Option<String>,
    /// Disk to boot from (position 0).
    pub boot_disk: String,
    /// Additional disks, in position order after the boot disk.
    #[serde(default)]
    pub disks: Vec<String>,
    /// Addresses to attach. The first one is used at creation.
    pub ips: Vec<String>,
    /// SSH keys to install at creation.
    #[serde(default)]
    pub ssh_keys: Vec<String>,
    /// Login to create at creation.
    #[serde(default)]
    pub login: Option<Login>,
}

impl VlanConfig {
    /// Returns the name used on the hosting service.
    #[must_use]
    pub fn remote_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

impl DiskConfig {
    /// Returns the name used on the hosting service.
    #[must_use]
    pub fn remote_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

impl VmConfig {
    /// Returns the hostname, falling back to the local name.
    #[must_use]
    pub fn hostname(&self) -> &str {
        self.hostname.as_deref().unwrap_or(&self.name)
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_memory_mb() -> u64 {
    512
}

fn default_cores() -> u32 {
    1
}

/// Kinds of managed resources, in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// SSH key.
    SshKey,
    /// VLAN.
    Vlan,
    /// Disk.
    Disk,
    /// Public IP address.
    Ip,
    /// Private IP address.
    PrivateIp,
    /// Virtual machine.
    Vm,
}

impl ResourceKind {
    /// All kinds, in dependency order.
    pub const ALL: [Self; 6] = [
        Self::SshKey,
        Self::Vlan,
        Self::Disk,
        Self::Ip,
        Self::PrivateIp,
        Self::Vm,
    ];

    /// Returns the configuration label of this kind.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SshKey => "ssh_key",
            Self::Vlan => "vlan",
            Self::Disk => "disk",
            Self::Ip => "ip",
            Self::PrivateIp => "private_ip",
            Self::Vm => "vm",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind: {s}"))
    }
}

/// Address of a managed resource: its kind and local name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceAddress {
    /// Resource kind.
    pub kind: ResourceKind,
    /// Local name.
    pub name: String,
}

impl ResourceAddress {
    /// Creates an address.
    #[must_use]
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, name) = s
            .split_once('.')
            .ok_or_else(|| format!("expected <kind>.<name>, got {s}"))?;
        Ok(Self::new(kind.parse()?, name))
    }
}

/// The desired configuration of one resource, of any kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceConfig {
    /// SSH key.
    SshKey(SshKeyConfig),
    /// VLAN.
    Vlan(VlanConfig),
    /// Disk.
    Disk(DiskConfig),
    /// Public IP address.
    Ip(IpConfig),
    /// Private IP address.
    PrivateIp(PrivateIpConfig),
    /// Virtual machine.
    Vm(VmConfig),
}

impl ResourceConfig {
    /// Returns the kind of this resource.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::SshKey(_) => ResourceKind::SshKey,
            Self::Vlan(_) => ResourceKind::Vlan,
            Self::Disk(_) => ResourceKind::Disk,
            Self::Ip(_) => ResourceKind::Ip,
            Self::PrivateIp(_) => ResourceKind::PrivateIp,
            Self::Vm(_) => ResourceKind::Vm,
        }
    }

    /// Returns the local name of this resource.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::SshKey(c) => &c.name,
            Self::Vlan(c) => &c.name,
            Self::Disk(c) => &c.name,
            Self::Ip(c) => &c.name,
            Self::PrivateIp(c) => &c.name,
            Self::Vm(c) => &c.name,
        }
    }

    /// Returns the address of this resource.
    #[must_use]
    pub fn address(&self) -> ResourceAddress {
        ResourceAddress::new(self.kind(), self.name())
    }
}

impl DesiredConfig {
    /// Returns every declared resource, in dependency order.
    #[must_use]
    pub fn resources(&self) -> Vec<ResourceConfig> {
        let mut resources = Vec::new();
        resources.extend(self.ssh_keys.iter().cloned().map(ResourceConfig::SshKey));
        resources.extend(self.vlans.iter().cloned().map(ResourceConfig::Vlan));
        resources.extend(self.disks.iter().cloned().map(ResourceConfig::Disk));
        resources.extend(self.ips.iter().cloned().map(ResourceConfig::Ip));
        resources.extend(self.private_ips.iter().cloned().map(ResourceConfig::PrivateIp));
        resources.extend(self.vms.iter().cloned().map(ResourceConfig::Vm));
        resources
    }

    /// Returns the address a VM's IP reference points to, if the name is
    /// declared in this configuration.
    #[must_use]
    pub fn ip_address_of(&self, name: &str) -> Option<ResourceAddress> {
        if self.ips.iter().any(|i| i.name == name) {
            Some(ResourceAddress::new(ResourceKind::Ip, name))
        } else if self.private_ips.iter().any(|i| i.name == name) {
            Some(ResourceAddress::new(ResourceKind::PrivateIp, name))
        } else {
            None
        }
    }

    /// Returns the declared resources `resource` refers to.
    ///
    /// References to names not declared here point at remote resources the
    /// configuration does not manage and produce no dependency.
    #[must_use]
    pub fn dependencies(&self, resource: &ResourceConfig) -> Vec<ResourceAddress> {
        let declared = |kind: ResourceKind, name: &str| -> Option<ResourceAddress> {
            let found = match kind {
                ResourceKind::SshKey => self.ssh_keys.iter().any(|c| c.name == name),
                ResourceKind::Vlan => self.vlans.iter().any(|c| c.name == name),
                ResourceKind::Disk => self.disks.iter().any(|c| c.name == name),
                ResourceKind::Ip => self.ips.iter().any(|c| c.name == name),
                ResourceKind::PrivateIp => self.private_ips.iter().any(|c| c.name == name),
                ResourceKind::Vm => self.vms.iter().any(|c| c.name == name),
            };
            found.then(|| ResourceAddress::new(kind, name))
        };

        match resource {
            ResourceConfig::SshKey(_) | ResourceConfig::Vlan(_) | ResourceConfig::Ip(_) => {
                Vec::new()
            }
            ResourceConfig::PrivateIp(c) => {
                declared(ResourceKind::Vlan, &c.vlan).into_iter().collect()
            }
            ResourceConfig::Disk(c) => c
                .source_disk
                .as_deref()
                .and_then(|source| declared(ResourceKind::Disk, source))
                .into_iter()
                .collect(),
            ResourceConfig::Vm(c) => std::iter::once(c.boot_disk.as_str())
                .chain(c.disks.iter().map(String::as_str))
                .filter_map(|d| declared(ResourceKind::Disk, d))
                .chain(c.ips.iter().filter_map(|i| self.ip_address_of(i)))
                .chain(
                    c.ssh_keys
                        .iter()
                        .filter_map(|k| declared(ResourceKind::SshKey, k)),
                )
                .collect(),
        }
    }

    /// Finds a declared resource by address.
    #[must_use]
    pub fn find(&self, address: &ResourceAddress) -> Option<ResourceConfig> {
        self.resources()
            .into_iter()
            .find(|r| r.kind() == address.kind && r.name() == address.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DesiredConfig {
        serde_yaml::from_str(
            r"
ssh_keys:
  - name: ops
    value: ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 ops@example
disks:
  - name: web-sys
    region: FR-SD5
    image: Debian 9 64 bits (HVM)
ips:
  - name: web-v4
    region: FR-SD5
    version: 4
vms:
  - name: web
    region: FR-SD5
    boot_disk: web-sys
    ips: [web-v4, 203.0.113.9]
    ssh_keys: [ops]
",
        )
        .expect("sample config should parse")
    }

    #[test]
    fn test_defaults() {
        let config = sample();
        let vm = &config.vms[0];
        assert_eq!(vm.memory_mb, 512);
        assert_eq!(vm.cores, 1);
        assert_eq!(vm.state, VmState::Running);
        assert_eq!(vm.hostname(), "web");
        assert_eq!(config.policy.disk_shrink, ShrinkPolicy::Reject);
        assert_eq!(config.policy.ip_replacement, IpReplacement::CreateBeforeDelete);
    }

    #[test]
    fn test_resources_in_dependency_order() {
        let kinds: Vec<_> = sample().resources().iter().map(ResourceConfig::kind).collect();
        assert_eq!(
            kinds,
            vec![ResourceKind::SshKey, ResourceKind::Disk, ResourceKind::Ip, ResourceKind::Vm]
        );
    }

    #[test]
    fn test_dependencies_skip_undeclared_names() {
        let config = sample();
        let vm = ResourceConfig::Vm(config.vms[0].clone());
        let deps: Vec<String> = config
            .dependencies(&vm)
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(deps, vec!["disk.web-sys", "ip.web-v4", "ssh_key.ops"]);
    }

    #[test]
    fn test_address_parse() {
        let address: ResourceAddress = "private_ip.db-lan".parse().expect("valid address");
        assert_eq!(address.kind, ResourceKind::PrivateIp);
        assert_eq!(address.name, "db-lan");
        assert!("vm".parse::<ResourceAddress>().is_err());
        assert!("volume.x".parse::<ResourceAddress>().is_err());
    }

    #[test]
    fn test_unknown_vm_state_is_rejected() {
        let result: Result<VmConfig, _> = serde_yaml::from_str(
            "name: a\nregion: FR-SD5\nboot_disk: a\nips: [x]\nstate: paused\n",
        );
        assert!(result.is_err());
    }
}
