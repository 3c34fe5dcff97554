//! Results reported by lifecycle operations.
//!
//! Updates are split into attribute groups that succeed or fail on their
//! own. The report carries one outcome per group so the caller knows
//! exactly what committed; nothing is rolled back.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{HostwrightError, ReconcileError, Result};
use crate::hosting::{Disk, IpAddress, SshKey, Vlan, Vm};

/// The last remote record read for a managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "record", rename_all = "snake_case")]
pub enum Observation {
    /// A VM.
    Vm(Vm),
    /// A disk.
    Disk(Disk),
    /// A public or private IP address.
    Ip(IpAddress),
    /// A VLAN.
    Vlan(Vlan),
    /// An SSH key.
    SshKey(SshKey),
}

impl Observation {
    /// Returns the remote identifier of the observed record.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Vm(vm) => &vm.id,
            Self::Disk(disk) => &disk.id,
            Self::Ip(ip) => &ip.id,
            Self::Vlan(vlan) => &vlan.id,
            Self::SshKey(key) => &key.id,
        }
    }

    /// Returns a short human-readable summary.
    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::Vm(vm) => format!(
                "{} {} MB/{} cores, {} disks, {} ips",
                vm.state,
                vm.memory_mb,
                vm.cores,
                vm.disks.len(),
                vm.ips.len()
            ),
            Self::Disk(disk) => {
                let attached = if disk.vm_ids.is_empty() {
                    String::from("detached")
                } else {
                    format!("attached to {}", disk.vm_ids.join(","))
                };
                format!("{} GB, {attached}", disk.size_gb)
            }
            Self::Ip(ip) => match &ip.vm_id {
                Some(vm) => format!("{} on vm {vm}", ip.ip),
                None => ip.ip.clone(),
            },
            Self::Vlan(vlan) => format!("{} {}", vlan.name, vlan.subnet),
            Self::SshKey(key) => key.fingerprint.clone(),
        }
    }

    /// Returns true if the attributes this tool manages differ between two
    /// observations. Attachment bookkeeping on disks and addresses belongs
    /// to their VMs and is ignored.
    #[must_use]
    pub fn differs_from(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Vm(a), Self::Vm(b)) => {
                a.hostname != b.hostname
                    || a.memory_mb != b.memory_mb
                    || a.cores != b.cores
                    || a.state != b.state
                    || disk_ids(a) != disk_ids(b)
                    || ip_ids(a) != ip_ids(b)
            }
            (Self::Disk(a), Self::Disk(b)) => a.name != b.name || a.size_gb != b.size_gb,
            (Self::Ip(a), Self::Ip(b)) => a.ip != b.ip || a.version != b.version,
            (Self::Vlan(a), Self::Vlan(b)) => {
                a.name != b.name || a.subnet != b.subnet || a.gateway != b.gateway
            }
            (Self::SshKey(a), Self::SshKey(b)) => a.fingerprint != b.fingerprint,
            _ => true,
        }
    }
}

fn disk_ids(vm: &Vm) -> Vec<&str> {
    vm.disks.iter().map(|d| d.id.as_str()).collect()
}

fn ip_ids(vm: &Vm) -> Vec<&str> {
    let mut ids: Vec<&str> = vm.ips.iter().map(|i| i.id.as_str()).collect();
    ids.sort_unstable();
    ids
}

/// Attribute groups applied independently during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateGroup {
    /// VM memory.
    Memory,
    /// VM core count.
    Cores,
    /// VM power state.
    State,
    /// Hostname or remote name.
    Name,
    /// VM boot disk.
    BootDisk,
    /// VM non-boot disks.
    Disks,
    /// VM addresses.
    Ips,
    /// Disk size.
    Size,
    /// VLAN gateway.
    Gateway,
}

impl UpdateGroup {
    /// VM groups, in application order.
    pub const VM: [Self; 7] = [
        Self::Memory,
        Self::Cores,
        Self::State,
        Self::Name,
        Self::BootDisk,
        Self::Disks,
        Self::Ips,
    ];

    /// Returns the group label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Cores => "cores",
            Self::State => "state",
            Self::Name => "name",
            Self::BootDisk => "boot_disk",
            Self::Disks => "disks",
            Self::Ips => "ips",
            Self::Size => "size",
            Self::Gateway => "gateway",
        }
    }
}

impl fmt::Display for UpdateGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one attribute group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "message", rename_all = "snake_case")]
pub enum GroupOutcome {
    /// The remote value already matched.
    Unchanged,
    /// The change was applied.
    Applied,
    /// The remote call failed.
    Failed(String),
    /// Not attempted.
    Skipped,
}

impl GroupOutcome {
    /// Turns the result of applying a group into an outcome.
    #[must_use]
    pub fn from_result(result: Result<bool>) -> Self {
        match result {
            Ok(true) => Self::Applied,
            Ok(false) => Self::Unchanged,
            Err(e) => Self::Failed(e.to_string()),
        }
    }

    /// Returns true if the remote resource reflects the desired value.
    #[must_use]
    pub const fn is_committed(&self) -> bool {
        matches!(self, Self::Unchanged | Self::Applied)
    }
}

/// Outcome of one attribute group, labelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupResult {
    /// The group.
    pub group: UpdateGroup,
    /// What happened to it.
    pub outcome: GroupOutcome,
}

/// Report of an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReport {
    /// Per-group outcomes, in application order.
    pub groups: Vec<GroupResult>,
    /// The resource no longer exists (a VM driven to `deleted`).
    pub removed: bool,
    /// Remote record read back after the update.
    pub observed: Option<Observation>,
}

impl UpdateReport {
    /// Creates an empty report.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            groups: Vec::new(),
            removed: false,
            observed: None,
        }
    }

    /// Records the outcome of a group.
    pub fn record(&mut self, group: UpdateGroup, outcome: GroupOutcome) {
        self.groups.push(GroupResult { group, outcome });
    }

    /// Returns the outcome recorded for a group.
    #[must_use]
    pub fn outcome(&self, group: UpdateGroup) -> Option<&GroupOutcome> {
        self.groups
            .iter()
            .find(|g| g.group == group)
            .map(|g| &g.outcome)
    }

    /// Returns true if the group was recorded as committed.
    #[must_use]
    pub fn committed(&self, group: UpdateGroup) -> bool {
        self.outcome(group).is_some_and(GroupOutcome::is_committed)
    }

    /// Returns the groups that failed.
    #[must_use]
    pub fn failed(&self) -> Vec<UpdateGroup> {
        self.groups
            .iter()
            .filter(|g| matches!(g.outcome, GroupOutcome::Failed(_)))
            .map(|g| g.group)
            .collect()
    }

    /// Returns true if no group failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    /// Converts a report with failed groups into a partial-update error.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::PartialUpdate`] if any group failed.
    pub fn ensure_success(&self, address: &str) -> Result<()> {
        let first_failure = self.groups.iter().find_map(|g| match &g.outcome {
            GroupOutcome::Failed(message) => Some(message.clone()),
            _ => None,
        });
        let Some(message) = first_failure else {
            return Ok(());
        };

        let failed_groups = self
            .failed()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Err(HostwrightError::Reconcile(ReconcileError::PartialUpdate {
            address: address.to_string(),
            failed_groups,
            message,
        }))
    }
}

/// Report of a successful creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReport {
    /// Remote identifier of the new resource.
    pub id: String,
    /// Remote record read back after creation.
    pub observed: Observation,
    /// Best-effort steps that failed without aborting the creation.
    pub warnings: Vec<String>,
}

/// Report of a destroy-and-recreate.
#[derive(Debug, Default)]
pub struct ReplaceReport {
    /// The previous instance is gone.
    pub released: bool,
    /// The new instance, if creation succeeded.
    pub created: Option<CreateReport>,
    /// Failure that stopped the replacement.
    pub error: Option<HostwrightError>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}
