//! Forced-replacement policy.
//!
//! Every mutable attribute of a managed resource is classified as updatable
//! in place, fixed at creation (a change forces destroy and recreate), or
//! monotonic (it may only grow). [`ReplacementPolicy::decide`] turns the
//! field-level differences between two revisions of a resource into a single
//! [`ChangeDecision`], without talking to the hosting service.

use serde::Serialize;
use std::fmt;

use crate::config::{
    DiskConfig, IpConfig, PrivateIpConfig, ResourceAddress, ResourceConfig, ShrinkPolicy,
    SshKeyConfig, VlanConfig, VmConfig,
};
use crate::error::ReconcileError;

/// How a change to a field may be realized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldPolicy {
    /// Applied to the live resource.
    InPlace,
    /// Fixed at creation; only destroy and recreate can change it.
    ForceReplace,
    /// Applied in place if the value grows, otherwise rejected or replaced.
    MonotonicOnly,
}

/// VM attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VmField {
    /// Region.
    Region,
    /// Hosting farm.
    Farm,
    /// SSH keys and login.
    Auth,
    /// Memory.
    Memory,
    /// Core count.
    Cores,
    /// Hostname.
    Hostname,
    /// Power state.
    State,
    /// Disk at position 0.
    BootDisk,
    /// Non-boot disk set.
    Disks,
    /// Attached addresses.
    Ips,
}

/// Disk attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskField {
    /// Region.
    Region,
    /// Source image or source disk.
    Source,
    /// Remote name.
    Name,
    /// Size.
    Size,
}

/// Public IP attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IpField {
    /// Region.
    Region,
    /// Protocol version.
    Version,
}

/// Private IP attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateIpField {
    /// Region.
    Region,
    /// VLAN the address lives on.
    Vlan,
    /// Address literal.
    Address,
}

/// VLAN attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VlanField {
    /// Region.
    Region,
    /// Subnet.
    Subnet,
    /// Remote name.
    Name,
    /// Gateway.
    Gateway,
}

/// SSH key attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SshKeyField {
    /// Key name.
    Name,
    /// Public key material.
    Value,
}

/// A governed attribute of any resource kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    /// VM attribute.
    Vm(VmField),
    /// Disk attribute.
    Disk(DiskField),
    /// Public IP attribute.
    Ip(IpField),
    /// Private IP attribute.
    PrivateIp(PrivateIpField),
    /// VLAN attribute.
    Vlan(VlanField),
    /// SSH key attribute.
    SshKey(SshKeyField),
}

impl Field {
    /// Returns the policy governing changes to this field.
    #[must_use]
    pub const fn policy(self) -> FieldPolicy {
        match self {
            Self::Vm(VmField::Region | VmField::Farm | VmField::Auth)
            | Self::Disk(DiskField::Region | DiskField::Source)
            | Self::Ip(_)
            | Self::PrivateIp(_)
            | Self::Vlan(VlanField::Region | VlanField::Subnet)
            | Self::SshKey(_) => FieldPolicy::ForceReplace,
            Self::Disk(DiskField::Size) => FieldPolicy::MonotonicOnly,
            Self::Vm(_) | Self::Disk(DiskField::Name) | Self::Vlan(_) => FieldPolicy::InPlace,
        }
    }

    /// Returns the configuration key of this field.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vm(VmField::Region)
            | Self::Disk(DiskField::Region)
            | Self::Ip(IpField::Region)
            | Self::PrivateIp(PrivateIpField::Region)
            | Self::Vlan(VlanField::Region) => "region",
            Self::Vm(VmField::Farm) => "farm",
            Self::Vm(VmField::Auth) => "ssh_keys/login",
            Self::Vm(VmField::Memory) => "memory_mb",
            Self::Vm(VmField::Cores) => "cores",
            Self::Vm(VmField::Hostname) => "hostname",
            Self::Vm(VmField::State) => "state",
            Self::Vm(VmField::BootDisk) => "boot_disk",
            Self::Vm(VmField::Disks) => "disks",
            Self::Vm(VmField::Ips) => "ips",
            Self::Disk(DiskField::Source) => "image/source_disk",
            Self::Disk(DiskField::Name) | Self::Vlan(VlanField::Name) | Self::SshKey(SshKeyField::Name) => {
                "name"
            }
            Self::Disk(DiskField::Size) => "size_gb",
            Self::Ip(IpField::Version) => "version",
            Self::PrivateIp(PrivateIpField::Vlan) => "vlan",
            Self::PrivateIp(PrivateIpField::Address) => "ip",
            Self::Vlan(VlanField::Subnet) => "subnet",
            Self::Vlan(VlanField::Gateway) => "gateway",
            Self::SshKey(SshKeyField::Value) => "value",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the policy governing changes to `field`.
#[must_use]
pub const fn classify(field: Field) -> FieldPolicy {
    field.policy()
}

/// A changed field with its previous and new values, for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldChange {
    /// The field.
    pub field: Field,
    /// Previous value.
    pub old: String,
    /// New value.
    pub new: String,
}

impl FieldChange {
    fn new(field: Field, old: impl fmt::Display, new: impl fmt::Display) -> Self {
        Self {
            field,
            old: old.to_string(),
            new: new.to_string(),
        }
    }
}

/// What a change between two revisions of a resource requires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", content = "changes", rename_all = "snake_case")]
pub enum ChangeDecision {
    /// Nothing governed changed.
    NoChange,
    /// Every change can be applied to the live resource.
    InPlace(Vec<FieldChange>),
    /// At least one change requires destroy and recreate.
    Replace(Vec<FieldChange>),
}

impl ChangeDecision {
    /// Returns the changed fields.
    #[must_use]
    pub fn changes(&self) -> &[FieldChange] {
        match self {
            Self::NoChange => &[],
            Self::InPlace(changes) | Self::Replace(changes) => changes,
        }
    }

    /// Returns true if the decision is a replacement.
    #[must_use]
    pub const fn is_replace(&self) -> bool {
        matches!(self, Self::Replace(_))
    }
}

fn optional(value: Option<&str>) -> &str {
    value.unwrap_or("-")
}

fn sorted(values: &[String]) -> Vec<&str> {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    values
}

fn vm_changes(old: &VmConfig, new: &VmConfig) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.region != new.region {
        changes.push(FieldChange::new(Field::Vm(VmField::Region), &old.region, &new.region));
    }
    if old.farm != new.farm {
        changes.push(FieldChange::new(
            Field::Vm(VmField::Farm),
            optional(old.farm.as_deref()),
            optional(new.farm.as_deref()),
        ));
    }
    if sorted(&old.ssh_keys) != sorted(&new.ssh_keys) || old.login != new.login {
        let describe = |vm: &VmConfig| {
            let login = vm.login.as_ref().map_or("-", |l| l.login.as_str());
            format!("keys [{}], login {login}", vm.ssh_keys.join(", "))
        };
        changes.push(FieldChange::new(Field::Vm(VmField::Auth), describe(old), describe(new)));
    }
    if old.memory_mb != new.memory_mb {
        changes.push(FieldChange::new(Field::Vm(VmField::Memory), old.memory_mb, new.memory_mb));
    }
    if old.cores != new.cores {
        changes.push(FieldChange::new(Field::Vm(VmField::Cores), old.cores, new.cores));
    }
    if old.state != new.state {
        changes.push(FieldChange::new(Field::Vm(VmField::State), old.state, new.state));
    }
    if old.hostname() != new.hostname() {
        changes.push(FieldChange::new(
            Field::Vm(VmField::Hostname),
            old.hostname(),
            new.hostname(),
        ));
    }
    if old.boot_disk != new.boot_disk {
        changes.push(FieldChange::new(
            Field::Vm(VmField::BootDisk),
            &old.boot_disk,
            &new.boot_disk,
        ));
    }
    if old.disks != new.disks {
        changes.push(FieldChange::new(
            Field::Vm(VmField::Disks),
            format!("[{}]", old.disks.join(", ")),
            format!("[{}]", new.disks.join(", ")),
        ));
    }
    if sorted(&old.ips) != sorted(&new.ips) {
        changes.push(FieldChange::new(
            Field::Vm(VmField::Ips),
            format!("[{}]", old.ips.join(", ")),
            format!("[{}]", new.ips.join(", ")),
        ));
    }
    changes
}

fn disk_changes(old: &DiskConfig, new: &DiskConfig) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.region != new.region {
        changes.push(FieldChange::new(Field::Disk(DiskField::Region), &old.region, &new.region));
    }
    if old.image != new.image || old.source_disk != new.source_disk {
        let describe = |d: &DiskConfig| match (&d.image, &d.source_disk) {
            (Some(image), _) => format!("image {image}"),
            (None, Some(source)) => format!("disk {source}"),
            (None, None) => String::from("blank"),
        };
        changes.push(FieldChange::new(Field::Disk(DiskField::Source), describe(old), describe(new)));
    }
    if old.remote_name() != new.remote_name() {
        changes.push(FieldChange::new(
            Field::Disk(DiskField::Name),
            old.remote_name(),
            new.remote_name(),
        ));
    }
    // An unset size keeps whatever the disk has.
    if let Some(new_size) = new.size_gb
        && old.size_gb != Some(new_size)
    {
        let old_size = old.size_gb.map_or_else(|| String::from("-"), |s| s.to_string());
        changes.push(FieldChange::new(Field::Disk(DiskField::Size), old_size, new_size));
    }
    changes
}

fn ip_changes(old: &IpConfig, new: &IpConfig) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.region != new.region {
        changes.push(FieldChange::new(Field::Ip(IpField::Region), &old.region, &new.region));
    }
    if old.version != new.version {
        changes.push(FieldChange::new(Field::Ip(IpField::Version), old.version, new.version));
    }
    changes
}

fn private_ip_changes(old: &PrivateIpConfig, new: &PrivateIpConfig) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.region != new.region {
        changes.push(FieldChange::new(
            Field::PrivateIp(PrivateIpField::Region),
            &old.region,
            &new.region,
        ));
    }
    if old.vlan != new.vlan {
        changes.push(FieldChange::new(
            Field::PrivateIp(PrivateIpField::Vlan),
            &old.vlan,
            &new.vlan,
        ));
    }
    if old.ip != new.ip {
        changes.push(FieldChange::new(
            Field::PrivateIp(PrivateIpField::Address),
            &old.ip,
            &new.ip,
        ));
    }
    changes
}

fn vlan_changes(old: &VlanConfig, new: &VlanConfig) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.region != new.region {
        changes.push(FieldChange::new(Field::Vlan(VlanField::Region), &old.region, &new.region));
    }
    if old.subnet != new.subnet {
        changes.push(FieldChange::new(
            Field::Vlan(VlanField::Subnet),
            optional(old.subnet.as_deref()),
            optional(new.subnet.as_deref()),
        ));
    }
    if old.remote_name() != new.remote_name() {
        changes.push(FieldChange::new(
            Field::Vlan(VlanField::Name),
            old.remote_name(),
            new.remote_name(),
        ));
    }
    if old.gateway != new.gateway {
        changes.push(FieldChange::new(
            Field::Vlan(VlanField::Gateway),
            optional(old.gateway.as_deref()),
            optional(new.gateway.as_deref()),
        ));
    }
    changes
}

fn ssh_key_changes(old: &SshKeyConfig, new: &SshKeyConfig) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    if old.name != new.name {
        changes.push(FieldChange::new(Field::SshKey(SshKeyField::Name), &old.name, &new.name));
    }
    if old.value != new.value {
        changes.push(FieldChange::new(
            Field::SshKey(SshKeyField::Value),
            "(previous key)",
            "(new key)",
        ));
    }
    changes
}

/// Lists the governed fields that differ between two revisions of the same
/// resource. Revisions of different kinds yield `None`.
#[must_use]
pub fn changed_fields(old: &ResourceConfig, new: &ResourceConfig) -> Option<Vec<FieldChange>> {
    let changes = match (old, new) {
        (ResourceConfig::Vm(o), ResourceConfig::Vm(n)) => vm_changes(o, n),
        (ResourceConfig::Disk(o), ResourceConfig::Disk(n)) => disk_changes(o, n),
        (ResourceConfig::Ip(o), ResourceConfig::Ip(n)) => ip_changes(o, n),
        (ResourceConfig::PrivateIp(o), ResourceConfig::PrivateIp(n)) => private_ip_changes(o, n),
        (ResourceConfig::Vlan(o), ResourceConfig::Vlan(n)) => vlan_changes(o, n),
        (ResourceConfig::SshKey(o), ResourceConfig::SshKey(n)) => ssh_key_changes(o, n),
        _ => return None,
    };
    Some(changes)
}

/// Fails with a monotonic violation if `new` is smaller than `old`.
///
/// # Errors
///
/// Returns [`ReconcileError::MonotonicViolation`] when the value shrinks.
pub fn ensure_growth(
    address: &ResourceAddress,
    field: Field,
    old: u64,
    new: u64,
) -> Result<(), ReconcileError> {
    if new < old {
        return Err(ReconcileError::MonotonicViolation {
            address: address.to_string(),
            field: field.to_string(),
            old,
            new,
        });
    }
    Ok(())
}

/// Decides how a resource moves from one revision to the next.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReplacementPolicy {
    shrink: ShrinkPolicy,
}

impl ReplacementPolicy {
    /// Creates a policy with the given handling of shrinking disks.
    #[must_use]
    pub const fn new(shrink: ShrinkPolicy) -> Self {
        Self { shrink }
    }

    /// Classifies the change from `old` to `new`.
    ///
    /// Monotonic fields are checked first: a shrink is rejected (or turned
    /// into a replacement, depending on the shrink policy) regardless of
    /// what else changed.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MonotonicViolation`] if a monotonic field
    /// shrinks and the shrink policy is `reject`.
    pub fn decide(
        &self,
        address: &ResourceAddress,
        old: &ResourceConfig,
        new: &ResourceConfig,
    ) -> Result<ChangeDecision, ReconcileError> {
        let Some(changes) = changed_fields(old, new) else {
            return Ok(ChangeDecision::Replace(Vec::new()));
        };

        let mut shrinks = false;
        if let (ResourceConfig::Disk(o), ResourceConfig::Disk(n)) = (old, new)
            && let (Some(old_size), Some(new_size)) = (o.size_gb, n.size_gb)
        {
            let checked = ensure_growth(address, Field::Disk(DiskField::Size), old_size, new_size);
            if let Err(violation) = checked {
                match self.shrink {
                    ShrinkPolicy::Reject => return Err(violation),
                    ShrinkPolicy::Replace => shrinks = true,
                }
            }
        }

        if changes.is_empty() {
            return Ok(ChangeDecision::NoChange);
        }
        if shrinks
            || changes
                .iter()
                .any(|c| c.field.policy() == FieldPolicy::ForceReplace)
        {
            Ok(ChangeDecision::Replace(changes))
        } else {
            Ok(ChangeDecision::InPlace(changes))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;
    use crate::hosting::{IpVersion, VmState};

    fn disk(size_gb: Option<u64>) -> DiskConfig {
        DiskConfig {
            name: String::from("data"),
            label: None,
            region: String::from("FR-SD2"),
            size_gb,
            image: None,
            source_disk: None,
        }
    }

    fn vm() -> VmConfig {
        VmConfig {
            name: String::from("web"),
            hostname: None,
            region: String::from("FR-SD2"),
            memory_mb: 512,
            cores: 1,
            state: VmState::Running,
            farm: None,
            boot_disk: String::from("web-sys"),
            disks: vec![],
            ips: vec![String::from("web-v4")],
            ssh_keys: vec![String::from("ops")],
            login: None,
        }
    }

    fn disk_address() -> ResourceAddress {
        ResourceAddress::new(ResourceKind::Disk, "data")
    }

    fn vm_address() -> ResourceAddress {
        ResourceAddress::new(ResourceKind::Vm, "web")
    }

    #[test]
    fn test_classification_table() {
        assert_eq!(classify(Field::Vm(VmField::Region)), FieldPolicy::ForceReplace);
        assert_eq!(classify(Field::Vm(VmField::Auth)), FieldPolicy::ForceReplace);
        assert_eq!(classify(Field::Vm(VmField::Memory)), FieldPolicy::InPlace);
        assert_eq!(classify(Field::Vm(VmField::BootDisk)), FieldPolicy::InPlace);
        assert_eq!(classify(Field::Vm(VmField::Ips)), FieldPolicy::InPlace);
        assert_eq!(classify(Field::Disk(DiskField::Source)), FieldPolicy::ForceReplace);
        assert_eq!(classify(Field::Disk(DiskField::Name)), FieldPolicy::InPlace);
        assert_eq!(classify(Field::Disk(DiskField::Size)), FieldPolicy::MonotonicOnly);
        assert_eq!(classify(Field::Ip(IpField::Version)), FieldPolicy::ForceReplace);
        assert_eq!(classify(Field::Vlan(VlanField::Gateway)), FieldPolicy::InPlace);
        assert_eq!(classify(Field::Vlan(VlanField::Subnet)), FieldPolicy::ForceReplace);
        assert_eq!(classify(Field::SshKey(SshKeyField::Value)), FieldPolicy::ForceReplace);
    }

    #[test]
    fn test_disk_shrink_is_rejected() {
        let policy = ReplacementPolicy::default();
        let result = policy.decide(
            &disk_address(),
            &ResourceConfig::Disk(disk(Some(10))),
            &ResourceConfig::Disk(disk(Some(5))),
        );

        match result {
            Err(ReconcileError::MonotonicViolation { old, new, field, .. }) => {
                assert_eq!((old, new), (10, 5));
                assert_eq!(field, "size_gb");
            }
            other => panic!("expected a monotonic violation, got {other:?}"),
        }
    }

    #[test]
    fn test_shrink_rejected_even_with_other_changes() {
        let policy = ReplacementPolicy::default();
        let mut renamed = disk(Some(5));
        renamed.label = Some(String::from("renamed"));
        let result = policy.decide(
            &disk_address(),
            &ResourceConfig::Disk(disk(Some(10))),
            &ResourceConfig::Disk(renamed),
        );
        assert!(matches!(result, Err(ReconcileError::MonotonicViolation { .. })));
    }

    #[test]
    fn test_disk_shrink_can_force_replacement() {
        let policy = ReplacementPolicy::new(ShrinkPolicy::Replace);
        let decision = policy
            .decide(
                &disk_address(),
                &ResourceConfig::Disk(disk(Some(10))),
                &ResourceConfig::Disk(disk(Some(5))),
            )
            .expect("shrink should be converted");
        assert!(decision.is_replace());
    }

    #[test]
    fn test_disk_growth_and_rename_are_in_place() {
        let policy = ReplacementPolicy::default();
        let mut grown = disk(Some(20));
        grown.label = Some(String::from("bigger"));
        let decision = policy
            .decide(
                &disk_address(),
                &ResourceConfig::Disk(disk(Some(10))),
                &ResourceConfig::Disk(grown),
            )
            .expect("growth is allowed");

        let fields: Vec<Field> = decision.changes().iter().map(|c| c.field).collect();
        assert!(matches!(decision, ChangeDecision::InPlace(_)));
        assert_eq!(fields, vec![Field::Disk(DiskField::Name), Field::Disk(DiskField::Size)]);
    }

    #[test]
    fn test_unsetting_disk_size_is_no_change() {
        let policy = ReplacementPolicy::default();
        let decision = policy
            .decide(
                &disk_address(),
                &ResourceConfig::Disk(disk(Some(10))),
                &ResourceConfig::Disk(disk(None)),
            )
            .expect("decision");
        assert_eq!(decision, ChangeDecision::NoChange);
    }

    #[test]
    fn test_changing_disk_source_forces_replacement() {
        let policy = ReplacementPolicy::default();
        let mut cloned = disk(Some(10));
        cloned.image = Some(String::from("Debian 9 64 bits (HVM)"));
        let decision = policy
            .decide(
                &disk_address(),
                &ResourceConfig::Disk(disk(Some(10))),
                &ResourceConfig::Disk(cloned),
            )
            .expect("decision");
        assert!(decision.is_replace());
    }

    #[test]
    fn test_vm_auth_change_forces_replacement() {
        let policy = ReplacementPolicy::default();
        let mut rekeyed = vm();
        rekeyed.ssh_keys = vec![String::from("ci")];
        rekeyed.memory_mb = 1024;
        let decision = policy
            .decide(&vm_address(), &ResourceConfig::Vm(vm()), &ResourceConfig::Vm(rekeyed))
            .expect("decision");

        assert!(decision.is_replace());
        assert_eq!(decision.changes().len(), 2);
    }

    #[test]
    fn test_vm_sizing_and_attachments_are_in_place() {
        let policy = ReplacementPolicy::default();
        let mut resized = vm();
        resized.memory_mb = 2048;
        resized.cores = 4;
        resized.state = VmState::Halted;
        resized.disks = vec![String::from("web-data")];
        resized.ips = vec![String::from("web-v4"), String::from("web-v6")];
        let decision = policy
            .decide(&vm_address(), &ResourceConfig::Vm(vm()), &ResourceConfig::Vm(resized))
            .expect("decision");

        assert!(matches!(decision, ChangeDecision::InPlace(ref c) if c.len() == 5));
    }

    #[test]
    fn test_ip_order_is_not_a_change() {
        let policy = ReplacementPolicy::default();
        let mut old = vm();
        old.ips = vec![String::from("a"), String::from("b")];
        let mut new = old.clone();
        new.ips.reverse();
        let decision = policy
            .decide(&vm_address(), &ResourceConfig::Vm(old), &ResourceConfig::Vm(new))
            .expect("decision");
        assert_eq!(decision, ChangeDecision::NoChange);
    }

    #[test]
    fn test_ip_version_change_forces_replacement() {
        let policy = ReplacementPolicy::default();
        let old = IpConfig {
            name: String::from("web-v4"),
            region: String::from("FR-SD2"),
            version: IpVersion::V4,
        };
        let mut new = old.clone();
        new.version = IpVersion::V6;
        let decision = policy
            .decide(
                &ResourceAddress::new(ResourceKind::Ip, "web-v4"),
                &ResourceConfig::Ip(old),
                &ResourceConfig::Ip(new),
            )
            .expect("decision");
        assert!(decision.is_replace());
    }
}
