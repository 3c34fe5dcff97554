//! Resource lifecycle module.
//!
//! Each resource kind has a reconciler exposing create, read, update and
//! delete over an explicit [`Hosting`] backend. [`Lifecycle`] dispatches a
//! typed [`ResourceConfig`] to the right one and implements replacement as
//! release followed by create.

mod builder;
mod disk;
mod ip;
mod lookup;
mod outcome;
mod probe;
mod resolve;
mod ssh_key;
mod vlan;
mod vm;

use tracing::{info, warn};

use crate::config::{
    IpReplacement, PolicyConfig, ResourceAddress, ResourceConfig, ResourceKind, VmConfig,
};
use crate::error::{HostwrightError, ReconcileError, Result};
use crate::hosting::{Hosting, VmState};

pub use builder::SpecBuilder;
pub use disk::DiskReconciler;
pub use ip::IpReconciler;
pub use lookup::DataSources;
pub use outcome::{
    CreateReport, GroupOutcome, GroupResult, Observation, ReplaceReport, UpdateGroup,
    UpdateReport,
};
pub use probe::ExistenceProber;
pub use resolve::{IdLookup, ResolvedVm, Resolver};
pub use ssh_key::SshKeyReconciler;
pub use vlan::VlanReconciler;
pub use vm::VmReconciler;

/// Dispatches lifecycle verbs to the reconciler of each resource kind.
#[derive(Clone, Copy)]
pub struct Lifecycle<'a> {
    hosting: &'a dyn Hosting,
    policy: PolicyConfig,
}

impl<'a> Lifecycle<'a> {
    /// Creates a dispatcher over a hosting backend.
    #[must_use]
    pub const fn new(hosting: &'a dyn Hosting, policy: PolicyConfig) -> Self {
        Self { hosting, policy }
    }

    /// Returns the hosting backend.
    #[must_use]
    pub fn hosting(&self) -> &'a dyn Hosting {
        self.hosting
    }

    /// Creates a resource.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying reconciler. A VM declared
    /// `deleted` cannot be created.
    pub async fn create(
        &self,
        config: &ResourceConfig,
        resolver: &Resolver<'_>,
    ) -> Result<CreateReport> {
        match config {
            ResourceConfig::SshKey(c) => SshKeyReconciler::new(self.hosting).create(c).await,
            ResourceConfig::Vlan(c) => VlanReconciler::new(self.hosting).create(c, resolver).await,
            ResourceConfig::Disk(c) => DiskReconciler::new(self.hosting).create(c, resolver).await,
            ResourceConfig::Ip(c) => IpReconciler::new(self.hosting).create(c, resolver).await,
            ResourceConfig::PrivateIp(c) => {
                IpReconciler::new(self.hosting).create_private(c, resolver).await
            }
            ResourceConfig::Vm(c) if c.state == VmState::Deleted => {
                Err(ReconcileError::InvalidStateTransition {
                    value: String::from("deleted"),
                }
                .into())
            }
            ResourceConfig::Vm(c) => self.vm().create(c, resolver).await,
        }
    }

    /// Reads a resource. `None` means it no longer exists remotely.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the query fails.
    pub async fn read(&self, address: &ResourceAddress, id: &str) -> Result<Option<Observation>> {
        let observed = match address.kind {
            ResourceKind::SshKey => SshKeyReconciler::new(self.hosting)
                .read(&address.name, id)
                .await?
                .map(Observation::SshKey),
            ResourceKind::Vlan => VlanReconciler::new(self.hosting)
                .read(id)
                .await?
                .map(Observation::Vlan),
            ResourceKind::Disk => DiskReconciler::new(self.hosting)
                .read(id)
                .await?
                .map(Observation::Disk),
            ResourceKind::Ip | ResourceKind::PrivateIp => IpReconciler::new(self.hosting)
                .read(id)
                .await?
                .map(Observation::Ip),
            ResourceKind::Vm => self.vm().read(id).await?.map(Observation::Vm),
        };
        Ok(observed)
    }

    /// Updates a resource in place.
    ///
    /// Addresses and SSH keys have no in-place attributes; their update is a
    /// read-back.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the resource vanished, `MonotonicViolation` for
    /// a disk shrink, or an internal error if the two configs are of
    /// different kinds.
    pub async fn update(
        &self,
        address: &ResourceAddress,
        id: &str,
        applied: &ResourceConfig,
        desired: &ResourceConfig,
        resolver: &Resolver<'_>,
    ) -> Result<UpdateReport> {
        let strategy = self.policy.update_strategy;
        match (applied, desired) {
            (ResourceConfig::Vm(_), ResourceConfig::Vm(new)) => {
                self.vm().update(id, new, resolver).await
            }
            (ResourceConfig::Disk(old), ResourceConfig::Disk(new)) => {
                DiskReconciler::new(self.hosting)
                    .with_strategy(strategy)
                    .update(address, id, old, new)
                    .await
            }
            (ResourceConfig::Vlan(_), ResourceConfig::Vlan(new)) => {
                VlanReconciler::new(self.hosting)
                    .with_strategy(strategy)
                    .update(id, new)
                    .await
            }
            (ResourceConfig::Ip(_), ResourceConfig::Ip(_))
            | (ResourceConfig::PrivateIp(_), ResourceConfig::PrivateIp(_))
            | (ResourceConfig::SshKey(_), ResourceConfig::SshKey(_)) => {
                let Some(observed) = self.read(address, id).await? else {
                    return Err(ReconcileError::not_found(address.kind.as_str(), id).into());
                };
                let mut report = UpdateReport::new();
                report.observed = Some(observed);
                Ok(report)
            }
            _ => Err(HostwrightError::internal(format!(
                "cannot update {address} from {} to {}",
                applied.kind(),
                desired.kind()
            ))),
        }
    }

    /// Destroys a resource and creates it again from `desired`.
    ///
    /// Addresses follow the configured replacement ordering. With
    /// create-before-delete a failed release of the old address is only a
    /// warning; with delete-before-create a failed release is a warning and
    /// creation still proceeds. For every other kind the release must
    /// succeed before anything is created.
    pub async fn replace(
        &self,
        address: &ResourceAddress,
        id: &str,
        desired: &ResourceConfig,
        resolver: &Resolver<'_>,
    ) -> ReplaceReport {
        let mut report = ReplaceReport::default();
        let ips = IpReconciler::new(self.hosting);

        match desired {
            ResourceConfig::Ip(_)
                if self.policy.ip_replacement == IpReplacement::CreateBeforeDelete =>
            {
                match self.create(desired, resolver).await {
                    Ok(created) => report.created = Some(created),
                    Err(e) => {
                        report.error = Some(e);
                        return report;
                    }
                }
                match ips.release(id).await {
                    Ok(()) => report.released = true,
                    Err(e) => report.warn(format!("Could not release old {address} ({id}): {e}")),
                }
            }
            ResourceConfig::Ip(_) | ResourceConfig::PrivateIp(_) => {
                match ips.release(id).await {
                    Ok(()) => report.released = true,
                    Err(e) => report.warn(format!("Could not release old {address} ({id}): {e}")),
                }
                match self.create(desired, resolver).await {
                    Ok(created) => report.created = Some(created),
                    Err(e) => report.error = Some(e),
                }
            }
            _ => {
                if let Err(e) = self.release(address, id).await {
                    report.error = Some(e);
                    return report;
                }
                report.released = true;
                match self.create(desired, resolver).await {
                    Ok(created) => report.created = Some(created),
                    Err(e) => report.error = Some(e),
                }
            }
        }

        if let Some(created) = &report.created {
            info!("Replaced {address}: {id} -> {}", created.id);
        }
        report
    }

    /// Frees a resource ahead of its replacement. Disks are detached from
    /// their VMs first; the VMs receive the new disk in a later update.
    async fn release(&self, address: &ResourceAddress, id: &str) -> Result<()> {
        match address.kind {
            ResourceKind::Disk => DiskReconciler::new(self.hosting).release(id).await,
            _ => self.delete(address, id).await,
        }
    }

    /// Deletes a resource. Absent resources are a no-op.
    ///
    /// # Errors
    ///
    /// Returns the error of the underlying reconciler.
    pub async fn delete(&self, address: &ResourceAddress, id: &str) -> Result<()> {
        match address.kind {
            ResourceKind::SshKey => {
                SshKeyReconciler::new(self.hosting).delete(&address.name, id).await
            }
            ResourceKind::Vlan => VlanReconciler::new(self.hosting).delete(id).await,
            ResourceKind::Disk => DiskReconciler::new(self.hosting).delete(id).await,
            ResourceKind::Ip | ResourceKind::PrivateIp => {
                IpReconciler::new(self.hosting).delete(id).await
            }
            ResourceKind::Vm => self.vm().delete(id).await,
        }
    }

    /// Returns true if the resource still exists remotely.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the probe fails.
    pub async fn exists(&self, address: &ResourceAddress, id: &str) -> Result<bool> {
        ExistenceProber::new(self.hosting)
            .exists(address.kind, id, &address.name)
            .await
    }

    fn vm(&self) -> VmReconciler<'a> {
        VmReconciler::new(self.hosting).with_strategy(self.policy.update_strategy)
    }
}

impl ReplaceReport {
    fn warn(&mut self, message: String) {
        warn!("{message}");
        self.warnings.push(message);
    }
}

/// Returns the configuration that is actually in effect after an update.
///
/// Fields of groups that did not commit keep their previously applied
/// value, so the recorded config never claims more than the remote has.
#[must_use]
pub fn committed_config(
    applied: &ResourceConfig,
    desired: &ResourceConfig,
    report: &UpdateReport,
) -> ResourceConfig {
    let kept = |group: UpdateGroup| !report.committed(group);
    match (applied, desired) {
        (ResourceConfig::Vm(old), ResourceConfig::Vm(new)) => {
            ResourceConfig::Vm(committed_vm(old, new, kept))
        }
        (ResourceConfig::Disk(old), ResourceConfig::Disk(new)) => {
            let mut merged = new.clone();
            if kept(UpdateGroup::Name) {
                merged.label.clone_from(&old.label);
            }
            if kept(UpdateGroup::Size) {
                merged.size_gb = old.size_gb;
            }
            ResourceConfig::Disk(merged)
        }
        (ResourceConfig::Vlan(old), ResourceConfig::Vlan(new)) => {
            let mut merged = new.clone();
            if kept(UpdateGroup::Name) {
                merged.label.clone_from(&old.label);
            }
            if kept(UpdateGroup::Gateway) {
                merged.gateway.clone_from(&old.gateway);
            }
            ResourceConfig::Vlan(merged)
        }
        _ => desired.clone(),
    }
}

fn committed_vm(old: &VmConfig, new: &VmConfig, kept: impl Fn(UpdateGroup) -> bool) -> VmConfig {
    let mut merged = new.clone();
    for group in UpdateGroup::VM {
        if !kept(group) {
            continue;
        }
        match group {
            UpdateGroup::Memory => merged.memory_mb = old.memory_mb,
            UpdateGroup::Cores => merged.cores = old.cores,
            UpdateGroup::State => merged.state = old.state,
            UpdateGroup::Name => merged.hostname.clone_from(&old.hostname),
            UpdateGroup::BootDisk => merged.boot_disk.clone_from(&old.boot_disk),
            UpdateGroup::Disks => merged.disks.clone_from(&old.disks),
            UpdateGroup::Ips => merged.ips.clone_from(&old.ips),
            UpdateGroup::Size | UpdateGroup::Gateway => {}
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DiskConfig, IpConfig, SshKeyConfig};
    use crate::hosting::{IpVersion, SandboxHosting};
    use std::collections::HashMap;

    fn vm(memory_mb: u64, ips: &[&str]) -> VmConfig {
        VmConfig {
            name: String::from("web"),
            hostname: None,
            region: String::from("FR-SD2"),
            memory_mb,
            cores: 1,
            state: VmState::Running,
            farm: None,
            boot_disk: String::from("web-sys"),
            disks: Vec::new(),
            ips: ips.iter().map(ToString::to_string).collect(),
            ssh_keys: vec![String::from("ops")],
            login: None,
        }
    }

    fn v4() -> ResourceConfig {
        ResourceConfig::Ip(IpConfig {
            name: String::from("web-v4"),
            region: String::from("FR-SD2"),
            version: IpVersion::V4,
        })
    }

    #[test]
    fn test_committed_config_keeps_failed_groups() {
        let old = ResourceConfig::Vm(vm(512, &["a"]));
        let new = ResourceConfig::Vm(vm(1024, &["a", "b"]));
        let mut report = UpdateReport::new();
        report.record(UpdateGroup::Memory, GroupOutcome::Failed(String::from("quota")));
        report.record(UpdateGroup::Ips, GroupOutcome::Applied);

        let ResourceConfig::Vm(merged) = committed_config(&old, &new, &report) else {
            panic!("expected a vm config");
        };
        assert_eq!(merged.memory_mb, 512);
        assert_eq!(merged.ips, vec!["a", "b"]);
    }

    #[test]
    fn test_committed_disk_keeps_size_on_failure() {
        let disk = |size_gb| DiskConfig {
            name: String::from("data"),
            label: None,
            region: String::from("FR-SD2"),
            size_gb: Some(size_gb),
            image: None,
            source_disk: None,
        };
        let mut report = UpdateReport::new();
        report.record(UpdateGroup::Name, GroupOutcome::Unchanged);
        report.record(UpdateGroup::Size, GroupOutcome::Failed(String::from("busy")));

        let merged = committed_config(
            &ResourceConfig::Disk(disk(10)),
            &ResourceConfig::Disk(disk(20)),
            &report,
        );
        assert_eq!(merged, ResourceConfig::Disk(disk(10)));
    }

    #[tokio::test]
    async fn test_create_refuses_deleted_vm() {
        let sandbox = SandboxHosting::new();
        let known: HashMap<ResourceAddress, String> = HashMap::new();
        let mut config = vm(512, &["a"]);
        config.state = VmState::Deleted;

        let result = Lifecycle::new(&sandbox, PolicyConfig::default())
            .create(&ResourceConfig::Vm(config), &Resolver::new(&sandbox, &known))
            .await;
        assert!(matches!(
            result,
            Err(HostwrightError::Reconcile(ReconcileError::InvalidStateTransition { .. }))
        ));
        assert!(sandbox.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ip_replacement_creates_before_releasing() {
        let sandbox = SandboxHosting::new();
        let old = sandbox.create_ip("1", IpVersion::V6).await.expect("ip");
        sandbox.clear_calls();
        let known: HashMap<ResourceAddress, String> = HashMap::new();
        let address = ResourceAddress::new(ResourceKind::Ip, "web-v4");

        let report = Lifecycle::new(&sandbox, PolicyConfig::default())
            .replace(&address, &old.id, &v4(), &Resolver::new(&sandbox, &known))
            .await;

        assert!(report.error.is_none());
        assert!(report.released);
        let calls = sandbox.calls();
        let create = calls.iter().position(|c| c.starts_with("create_ip"));
        let delete = calls.iter().position(|c| c.starts_with("delete_ip"));
        assert!(create < delete, "unexpected order: {calls:?}");
    }

    #[tokio::test]
    async fn test_ip_replacement_delete_first_when_configured() {
        let sandbox = SandboxHosting::new();
        let old = sandbox.create_ip("1", IpVersion::V6).await.expect("ip");
        sandbox.clear_calls();
        let known: HashMap<ResourceAddress, String> = HashMap::new();
        let policy = PolicyConfig {
            ip_replacement: IpReplacement::DeleteBeforeCreate,
            ..PolicyConfig::default()
        };
        sandbox.fail_on("create_ip");

        let report = Lifecycle::new(&sandbox, policy)
            .replace(
                &ResourceAddress::new(ResourceKind::Ip, "web-v4"),
                &old.id,
                &v4(),
                &Resolver::new(&sandbox, &known),
            )
            .await;

        // The old address is gone and nothing replaced it.
        assert!(report.released);
        assert!(report.created.is_none());
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn test_key_replacement_yields_new_id() {
        let sandbox = SandboxHosting::new();
        let key = sandbox.create_key("ops", "ssh-ed25519 AAAA old").await.expect("key");
        let known: HashMap<ResourceAddress, String> = HashMap::new();
        let desired = ResourceConfig::SshKey(SshKeyConfig {
            name: String::from("ops"),
            value: String::from("ssh-ed25519 AAAA new"),
        });
        let address = desired.address();
        let lifecycle = Lifecycle::new(&sandbox, PolicyConfig::default());

        let report = lifecycle
            .replace(&address, &key.id, &desired, &Resolver::new(&sandbox, &known))
            .await;

        let created = report.created.expect("new key");
        assert_ne!(created.id, key.id);
        assert!(!lifecycle.exists(&address, &key.id).await.expect("probe"));
        assert!(lifecycle.exists(&address, &created.id).await.expect("probe"));
    }
}
