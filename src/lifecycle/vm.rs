//! VM lifecycle.
//!
//! A VM owns an ordered disk list (position 0 boots) and a set of
//! addresses, both of which are managed as independent resources. Creation
//! uses the first address and the boot disk, then attaches the rest one at a
//! time. Updates run attribute groups in a fixed order against a fresh read
//! of the VM. Deletion detaches everything explicitly so that deleting the VM
//! never takes user-managed disks or addresses with it.

use tracing::{debug, error, info, warn};

use crate::config::{UpdateStrategy, VmConfig};
use crate::error::{HostwrightError, ReconcileError, Result};
use crate::hosting::{Hosting, ResourceFilter, Vm, VmState};
use crate::planner::diff;

use super::builder::SpecBuilder;
use super::outcome::{CreateReport, GroupOutcome, Observation, UpdateGroup, UpdateReport};
use super::resolve::Resolver;

/// Lifecycle operations for VMs.
#[derive(Clone, Copy)]
pub struct VmReconciler<'a> {
    hosting: &'a dyn Hosting,
    strategy: UpdateStrategy,
}

impl<'a> VmReconciler<'a> {
    /// Creates a reconciler that attempts every update group.
    #[must_use]
    pub const fn new(hosting: &'a dyn Hosting) -> Self {
        Self {
            hosting,
            strategy: UpdateStrategy::Continue,
        }
    }

    /// Sets the behavior after a failed update group.
    #[must_use]
    pub const fn with_strategy(mut self, strategy: UpdateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Creates a VM.
    ///
    /// The combined create call is fatal on failure and nothing is left to
    /// record. Attaching the remaining addresses and disks afterwards is best
    /// effort: failures are logged and returned as warnings.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unresolvable required references, or the
    /// remote error of the create call.
    pub async fn create(&self, config: &VmConfig, resolver: &Resolver<'_>) -> Result<CreateReport> {
        let resolved = resolver.resolve_vm(config).await?;
        let spec = SpecBuilder::vm(config, &resolved);
        let Some((first_ip, extra_ips)) = resolved.ip_ids.split_first() else {
            return Err(ReconcileError::not_found("ip", config.ips.join(", ")).into());
        };

        info!(
            "Creating vm '{}' in region {} with disk {} and ip {first_ip}",
            spec.hostname, spec.region_id, resolved.boot_disk_id
        );
        let (vm, _, _) = self
            .hosting
            .create_vm_with_existing_disk_and_ip(&spec, first_ip, &resolved.boot_disk_id)
            .await
            .inspect_err(|e| error!("Failed to create vm '{}': {e}", spec.hostname))?;

        let mut warnings = Vec::new();
        for ip_id in extra_ips {
            if let Err(e) = self.hosting.attach_ip(&vm.id, ip_id).await {
                let message = format!("Could not attach ip {ip_id} to vm {}: {e}", vm.id);
                warn!("{message}");
                warnings.push(message);
            }
        }
        for disk_id in &resolved.disk_ids {
            if let Err(e) = self.hosting.attach_disk(&vm.id, disk_id).await {
                let message = format!("Could not attach disk {disk_id} to vm {}: {e}", vm.id);
                warn!("{message}");
                warnings.push(message);
            }
        }
        if config.state == VmState::Halted
            && let Err(e) = self.hosting.stop_vm(&vm.id).await
        {
            let message = format!("Could not stop vm {}: {e}", vm.id);
            warn!("{message}");
            warnings.push(message);
        }

        let observed = match self.read(&vm.id).await {
            Ok(Some(fresh)) => fresh,
            Ok(None) => vm,
            Err(e) => {
                warn!("Could not read back vm {}: {e}", vm.id);
                vm
            }
        };
        info!("Created vm '{}' ({})", observed.hostname, observed.id);
        Ok(CreateReport {
            id: observed.id.clone(),
            observed: Observation::Vm(observed),
            warnings,
        })
    }

    /// Reads a VM. A VM that no longer exists is `None`, not an error.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the query fails.
    pub async fn read(&self, id: &str) -> Result<Option<Vm>> {
        let vm = self
            .hosting
            .describe_vm(&ResourceFilter::by_id(id))
            .await?
            .into_iter()
            .next();
        if vm.is_none() {
            info!("VM {id} not found, marking absent");
        }
        Ok(vm)
    }

    /// Brings a VM in line with `desired`.
    ///
    /// Groups run in the order memory, cores, state, name, boot disk, disks,
    /// addresses. Each group compares against the live VM, so an update also
    /// repairs drift. With the `continue` strategy a failed group does not
    /// prevent the others; with `abort` the remaining groups are skipped.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the VM no longer exists. Group failures are
    /// reported in the returned [`UpdateReport`].
    pub async fn update(
        &self,
        id: &str,
        desired: &VmConfig,
        resolver: &Resolver<'_>,
    ) -> Result<UpdateReport> {
        let Some(mut current) = self.read(id).await? else {
            return Err(ReconcileError::not_found("vm", id).into());
        };

        let mut report = UpdateReport::new();
        let mut stopped = false;
        for group in UpdateGroup::VM {
            if stopped {
                report.record(group, GroupOutcome::Skipped);
                continue;
            }

            if group == UpdateGroup::State && desired.state == VmState::Deleted {
                let outcome = GroupOutcome::from_result(self.delete(id).await.map(|()| true));
                if outcome.is_committed() {
                    report.removed = true;
                    stopped = true;
                } else if self.strategy == UpdateStrategy::Abort {
                    stopped = true;
                }
                report.record(group, outcome);
                continue;
            }

            let result = match group {
                UpdateGroup::Memory => self.apply_memory(&mut current, desired.memory_mb).await,
                UpdateGroup::Cores => self.apply_cores(&mut current, desired.cores).await,
                UpdateGroup::State => self.apply_state(&mut current, desired.state).await,
                UpdateGroup::Name => self.apply_name(&mut current, desired.hostname()).await,
                UpdateGroup::BootDisk => self.apply_boot_disk(&mut current, desired, resolver).await,
                UpdateGroup::Disks => self.apply_disks(&mut current, desired, resolver).await,
                UpdateGroup::Ips => self.apply_ips(&mut current, desired, resolver).await,
                UpdateGroup::Size | UpdateGroup::Gateway => Ok(false),
            };
            let outcome = GroupOutcome::from_result(result);
            if let GroupOutcome::Failed(message) = &outcome {
                warn!("Updating {group} of vm {id} failed: {message}");
                if self.strategy == UpdateStrategy::Abort {
                    stopped = true;
                }
            }
            report.record(group, outcome);
        }

        if !report.removed {
            match self.read(id).await {
                Ok(vm) => report.observed = vm.map(Observation::Vm),
                Err(e) => warn!("Could not read back vm {id}: {e}"),
            }
        }
        Ok(report)
    }

    async fn apply_memory(&self, current: &mut Vm, memory_mb: u64) -> Result<bool> {
        if current.memory_mb == memory_mb {
            return Ok(false);
        }
        *current = self.hosting.update_vm_memory(&current.id, memory_mb).await?;
        info!("Memory of vm {} set to {memory_mb} MB", current.id);
        Ok(true)
    }

    async fn apply_cores(&self, current: &mut Vm, cores: u32) -> Result<bool> {
        if current.cores == cores {
            return Ok(false);
        }
        *current = self.hosting.update_vm_cores(&current.id, cores).await?;
        info!("Cores of vm {} set to {cores}", current.id);
        Ok(true)
    }

    async fn apply_state(&self, current: &mut Vm, state: VmState) -> Result<bool> {
        if current.power_state() == Some(state) {
            return Ok(false);
        }
        match state {
            VmState::Running => self.hosting.start_vm(&current.id).await?,
            VmState::Halted => self.hosting.stop_vm(&current.id).await?,
            VmState::Deleted => {
                return Err(HostwrightError::internal("deletion is not a power transition"));
            }
        }
        info!("VM {} is now {state}", current.id);
        current.state = state.as_str().to_string();
        Ok(true)
    }

    async fn apply_name(&self, current: &mut Vm, hostname: &str) -> Result<bool> {
        if current.hostname == hostname {
            return Ok(false);
        }
        let previous = current.hostname.clone();
        *current = self.hosting.rename_vm(&current.id, hostname).await?;
        info!("VM '{previous}' renamed to '{hostname}'");
        Ok(true)
    }

    /// Puts the desired disk at position 0, then detaches the previous boot
    /// disk unless it is still wanted as a data disk. Attaching at position 0
    /// leaves the old disk attached behind it.
    async fn apply_boot_disk(
        &self,
        current: &mut Vm,
        desired: &VmConfig,
        resolver: &Resolver<'_>,
    ) -> Result<bool> {
        let boot_id = resolver.boot_disk_id(desired).await?;
        let previous = current.boot_disk().map(|d| d.id.clone());
        if previous.as_deref() == Some(boot_id.as_str()) {
            return Ok(false);
        }

        if current.disks.iter().any(|d| d.id == boot_id) {
            debug!("Disk {boot_id} is attached to vm {} at another position", current.id);
            (*current, _) = self.hosting.detach_disk(&current.id, &boot_id).await?;
        }
        (*current, _) = self
            .hosting
            .attach_disk_at_position(&current.id, &boot_id, 0)
            .await?;
        if let Some(previous) = previous {
            let kept = resolver.data_disk_ids(desired).await?;
            if kept.contains(&previous) {
                debug!("Disk {previous} stays on vm {} as a data disk", current.id);
            } else {
                (*current, _) = self.hosting.detach_disk(&current.id, &previous).await?;
            }
        }
        info!("Boot disk of vm {} is now {boot_id}", current.id);
        Ok(true)
    }

    async fn apply_disks(
        &self,
        current: &mut Vm,
        desired: &VmConfig,
        resolver: &Resolver<'_>,
    ) -> Result<bool> {
        let wanted = resolver.data_disk_ids(desired).await?;
        let attached: Vec<String> = current.data_disks().iter().map(|d| d.id.clone()).collect();
        let changes = diff(attached, wanted);
        if changes.is_empty() {
            return Ok(false);
        }

        for disk_id in &changes.to_detach {
            (*current, _) = self.hosting.detach_disk(&current.id, disk_id).await?;
            debug!("Detached disk {disk_id} from vm {}", current.id);
        }
        for disk_id in &changes.to_attach {
            (*current, _) = self.hosting.attach_disk(&current.id, disk_id).await?;
            debug!("Attached disk {disk_id} to vm {}", current.id);
        }
        info!(
            "Disks of vm {}: {} detached, {} attached",
            current.id,
            changes.to_detach.len(),
            changes.to_attach.len()
        );
        Ok(true)
    }

    async fn apply_ips(
        &self,
        current: &mut Vm,
        desired: &VmConfig,
        resolver: &Resolver<'_>,
    ) -> Result<bool> {
        let wanted = resolver.ip_ids(desired).await?;
        let attached: Vec<String> = current.ips.iter().map(|i| i.id.clone()).collect();
        let changes = diff(attached, wanted);
        if changes.is_empty() {
            return Ok(false);
        }

        for ip_id in &changes.to_detach {
            (*current, _) = self.hosting.detach_ip(&current.id, ip_id).await?;
            debug!("Detached ip {ip_id} from vm {}", current.id);
        }
        for ip_id in &changes.to_attach {
            (*current, _) = self.hosting.attach_ip(&current.id, ip_id).await?;
            debug!("Attached ip {ip_id} to vm {}", current.id);
        }
        info!(
            "IPs of vm {}: {} detached, {} attached",
            current.id,
            changes.to_detach.len(),
            changes.to_attach.len()
        );
        Ok(true)
    }

    /// Deletes a VM without deleting what is attached to it.
    ///
    /// Absent VMs are a no-op. Otherwise the VM is stopped, every disk and
    /// then every address is detached, and only then is the VM deleted. The
    /// first detach failure aborts the deletion.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::DetachFailed`] if a detach fails, or the
    /// remote error of the stop or delete call.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let Some(vm) = self.read(id).await? else {
            info!("VM {id} already absent, nothing to delete");
            return Ok(());
        };

        if vm.power_state() != Some(VmState::Halted) {
            info!("Stopping vm {id}");
            self.hosting.stop_vm(id).await?;
        }

        for disk in &vm.disks {
            self.hosting
                .detach_disk(id, &disk.id)
                .await
                .map_err(|e| detach_failed(id, format!("disk {}", disk.id), &e))?;
            debug!("Detached disk {} from vm {id}", disk.id);
        }
        for ip in &vm.ips {
            self.hosting
                .detach_ip(id, &ip.id)
                .await
                .map_err(|e| detach_failed(id, format!("ip {}", ip.id), &e))?;
            debug!("Detached ip {} from vm {id}", ip.id);
        }

        self.hosting.delete_vm(id).await?;
        info!("Deleted vm {id}");
        Ok(())
    }
}

fn detach_failed(vm: &str, attachment: String, cause: &HostwrightError) -> HostwrightError {
    error!("Could not detach {attachment} from vm {vm}: {cause}");
    ReconcileError::DetachFailed {
        vm: vm.to_string(),
        attachment,
        reason: cause.to_string(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResourceAddress, ResourceKind};
    use crate::hosting::{DiskSpec, IpVersion, SandboxHosting};
    use std::collections::HashMap;

    struct Fixture {
        sandbox: SandboxHosting,
        known: HashMap<ResourceAddress, String>,
    }

    impl Fixture {
        async fn new() -> Self {
            let sandbox = SandboxHosting::new();
            let mut known = HashMap::new();
            for name in ["web-sys", "web-alt", "web-data", "web-logs"] {
                let disk = sandbox
                    .create_disk(&DiskSpec {
                        region_id: String::from("1"),
                        name: name.to_string(),
                        size_gb: Some(10),
                        disk_type: None,
                    })
                    .await
                    .expect("disk");
                known.insert(ResourceAddress::new(ResourceKind::Disk, name), disk.id);
            }
            for (name, version) in [("web-v4", IpVersion::V4), ("web-v6", IpVersion::V6)] {
                let ip = sandbox.create_ip("1", version).await.expect("ip");
                known.insert(ResourceAddress::new(ResourceKind::Ip, name), ip.id);
            }
            sandbox
                .create_key("ops", "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 ops")
                .await
                .expect("key");
            sandbox.clear_calls();
            Self { sandbox, known }
        }

        fn id(&self, kind: ResourceKind, name: &str) -> String {
            self.known
                .get(&ResourceAddress::new(kind, name))
                .cloned()
                .expect("fixture id")
        }

        fn resolver(&self) -> Resolver<'_> {
            Resolver::new(&self.sandbox, &self.known)
        }

        fn reconciler(&self) -> VmReconciler<'_> {
            VmReconciler::new(&self.sandbox)
        }

        async fn create(&self, config: &VmConfig) -> String {
            let report = self
                .reconciler()
                .create(config, &self.resolver())
                .await
                .expect("create vm");
            self.sandbox.clear_calls();
            report.id
        }

        /// Calls issued, without read-only queries.
        fn mutations(&self) -> Vec<String> {
            self.sandbox
                .calls()
                .into_iter()
                .filter(|c| !c.starts_with("describe_vm") && !c.starts_with("list_"))
                .collect()
        }
    }

    fn web() -> VmConfig {
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

    #[tokio::test]
    async fn test_create_attaches_secondary_resources() {
        let fx = Fixture::new().await;
        let mut config = web();
        config.ips.push(String::from("web-v6"));
        config.disks = vec![String::from("web-data"), String::from("web-logs")];

        let report = fx
            .reconciler()
            .create(&config, &fx.resolver())
            .await
            .expect("create");

        let Observation::Vm(vm) = report.observed else {
            panic!("expected a vm observation");
        };
        let disks: Vec<&str> = vm.disks.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(
            disks,
            vec![
                fx.id(ResourceKind::Disk, "web-sys"),
                fx.id(ResourceKind::Disk, "web-data"),
                fx.id(ResourceKind::Disk, "web-logs"),
            ]
        );
        assert_eq!(vm.ips.len(), 2);
        assert!(report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_secondary_attach_failure_is_not_fatal() {
        let fx = Fixture::new().await;
        let mut config = web();
        config.ips.push(String::from("web-v6"));
        fx.sandbox.fail_on("attach_ip");

        let report = fx
            .reconciler()
            .create(&config, &fx.resolver())
            .await
            .expect("create should survive a secondary attach failure");

        assert_eq!(report.warnings.len(), 1);
        assert!(fx.reconciler().read(&report.id).await.expect("read").is_some());
    }

    #[tokio::test]
    async fn test_failed_combined_create_is_fatal() {
        let fx = Fixture::new().await;
        fx.sandbox.fail_on("create_vm");

        let result = fx.reconciler().create(&web(), &fx.resolver()).await;

        assert!(matches!(result, Err(HostwrightError::Hosting(_))));
        let vms = fx
            .sandbox
            .describe_vm(&ResourceFilter::default())
            .await
            .expect("list");
        assert!(vms.is_empty());
        assert!(!fx.sandbox.calls().iter().any(|c| c.starts_with("attach_")));
    }

    #[tokio::test]
    async fn test_read_of_vanished_vm_is_none() {
        let fx = Fixture::new().await;
        let vm = fx.reconciler().read("4242").await.expect("read");
        assert!(vm.is_none());
    }

    #[tokio::test]
    async fn test_delete_order_stop_detach_disk_detach_ip_delete() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;
        let disk = fx.id(ResourceKind::Disk, "web-sys");
        let ip = fx.id(ResourceKind::Ip, "web-v4");

        fx.reconciler().delete(&id).await.expect("delete");

        assert_eq!(
            fx.mutations(),
            vec![
                format!("stop_vm({id})"),
                format!("detach_disk({id}, {disk})"),
                format!("detach_ip({id}, {ip})"),
                format!("delete_vm({id})"),
            ]
        );
        let survivors = fx
            .sandbox
            .list_disks(&ResourceFilter::by_id(&disk))
            .await
            .expect("list");
        assert_eq!(survivors.len(), 1, "the boot disk must outlive the vm");
    }

    #[tokio::test]
    async fn test_delete_aborts_when_detach_fails() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;
        fx.sandbox.fail_on("detach_disk");

        let result = fx.reconciler().delete(&id).await;

        assert!(matches!(
            result,
            Err(HostwrightError::Reconcile(ReconcileError::DetachFailed { .. }))
        ));
        assert!(!fx.mutations().iter().any(|c| c.starts_with("delete_vm")));
        assert!(fx.reconciler().read(&id).await.expect("read").is_some());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;

        fx.reconciler().delete(&id).await.expect("first delete");
        fx.sandbox.clear_calls();
        fx.reconciler().delete(&id).await.expect("second delete");

        assert!(fx.mutations().is_empty());
        let lookups = fx
            .sandbox
            .calls()
            .iter()
            .filter(|c| c.starts_with("describe_vm"))
            .count();
        assert_eq!(lookups, 1);
    }

    #[tokio::test]
    async fn test_update_applies_groups_in_order() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;
        let mut desired = web();
        desired.memory_mb = 1024;
        desired.cores = 2;
        desired.state = VmState::Halted;
        desired.hostname = Some(String::from("web01"));

        let report = fx
            .reconciler()
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");

        assert!(report.is_success());
        let methods: Vec<String> = fx
            .mutations()
            .iter()
            .filter_map(|c| c.split('(').next().map(String::from))
            .filter(|m| m != "disk_from_name" && m != "region_by_code")
            .collect();
        assert_eq!(
            methods,
            vec!["update_vm_memory", "update_vm_cores", "stop_vm", "rename_vm"]
        );
        let Some(Observation::Vm(vm)) = report.observed else {
            panic!("expected a vm observation");
        };
        assert_eq!(vm.hostname, "web01");
        assert_eq!(vm.state, "halted");
    }

    #[tokio::test]
    async fn test_failed_group_does_not_block_the_others() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;
        fx.sandbox.fail_on("update_vm_cores");
        let mut desired = web();
        desired.memory_mb = 1024;
        desired.cores = 4;
        desired.hostname = Some(String::from("web01"));

        let report = fx
            .reconciler()
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");

        assert_eq!(report.outcome(UpdateGroup::Memory), Some(&GroupOutcome::Applied));
        assert!(matches!(
            report.outcome(UpdateGroup::Cores),
            Some(GroupOutcome::Failed(_))
        ));
        assert_eq!(report.outcome(UpdateGroup::Name), Some(&GroupOutcome::Applied));
        assert!(matches!(
            report.ensure_success("vm.web"),
            Err(HostwrightError::Reconcile(ReconcileError::PartialUpdate { ref failed_groups, .. }))
                if failed_groups == "cores"
        ));
    }

    #[tokio::test]
    async fn test_abort_strategy_skips_remaining_groups() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;
        fx.sandbox.fail_on("update_vm_memory");
        let mut desired = web();
        desired.memory_mb = 1024;
        desired.hostname = Some(String::from("web01"));

        let report = fx
            .reconciler()
            .with_strategy(UpdateStrategy::Abort)
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");

        assert_eq!(report.outcome(UpdateGroup::Name), Some(&GroupOutcome::Skipped));
        assert!(!fx.mutations().iter().any(|c| c.starts_with("rename_vm")));
    }

    #[tokio::test]
    async fn test_boot_disk_swap_keeps_position_zero() {
        let fx = Fixture::new().await;
        let mut config = web();
        config.disks = vec![String::from("web-data")];
        let id = fx.create(&config).await;
        let mut desired = config.clone();
        desired.boot_disk = String::from("web-alt");

        let report = fx
            .reconciler()
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");
        assert!(report.is_success());

        let vm = fx.reconciler().read(&id).await.expect("read").expect("vm");
        assert_eq!(
            vm.boot_disk().map(|d| d.id.clone()),
            Some(fx.id(ResourceKind::Disk, "web-alt"))
        );
        let data: Vec<&str> = vm.data_disks().iter().map(|d| d.id.as_str()).collect();
        assert_eq!(data, vec![fx.id(ResourceKind::Disk, "web-data")]);
    }

    #[tokio::test]
    async fn test_boot_disk_change_after_release_keeps_data_disks() {
        let fx = Fixture::new().await;
        let mut config = web();
        config.disks = vec![String::from("web-data")];
        let id = fx.create(&config).await;
        let old_boot = fx.id(ResourceKind::Disk, "web-sys");
        let data = fx.id(ResourceKind::Disk, "web-data");
        let new_boot = fx.id(ResourceKind::Disk, "web-alt");
        // Releasing a replaced boot disk leaves the data disk at position 0.
        fx.sandbox.detach_disk(&id, &old_boot).await.expect("release");
        fx.sandbox.clear_calls();
        let mut desired = config.clone();
        desired.boot_disk = String::from("web-alt");

        let report = fx
            .reconciler()
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");

        assert!(report.is_success());
        assert!(!fx.mutations().iter().any(|c| c.starts_with("detach_disk")));
        assert!(fx.mutations().contains(&format!("attach_disk_at_position({id}, {new_boot}, 0)")));
        let vm = fx.reconciler().read(&id).await.expect("read").expect("vm");
        let disks: Vec<&str> = vm.disks.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(disks, vec![new_boot.as_str(), data.as_str()]);
    }

    #[tokio::test]
    async fn test_old_boot_disk_kept_as_data_disk_is_not_detached() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;
        let old_boot = fx.id(ResourceKind::Disk, "web-sys");
        let new_boot = fx.id(ResourceKind::Disk, "web-alt");
        let mut desired = web();
        desired.boot_disk = String::from("web-alt");
        desired.disks = vec![String::from("web-sys")];

        let report = fx
            .reconciler()
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");

        assert!(report.is_success());
        assert!(!fx.mutations().contains(&format!("detach_disk({id}, {old_boot})")));
        let vm = fx.reconciler().read(&id).await.expect("read").expect("vm");
        let disks: Vec<&str> = vm.disks.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(disks, vec![new_boot.as_str(), old_boot.as_str()]);
    }

    #[tokio::test]
    async fn test_attachment_sets_follow_the_diff() {
        let fx = Fixture::new().await;
        let mut config = web();
        config.disks = vec![String::from("web-data")];
        let id = fx.create(&config).await;
        let mut desired = config.clone();
        desired.disks = vec![String::from("web-logs")];
        desired.ips = vec![String::from("web-v6")];

        fx.reconciler()
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");

        let data = fx.id(ResourceKind::Disk, "web-data");
        let logs = fx.id(ResourceKind::Disk, "web-logs");
        let v4 = fx.id(ResourceKind::Ip, "web-v4");
        let v6 = fx.id(ResourceKind::Ip, "web-v6");
        let attachments: Vec<String> = fx
            .mutations()
            .into_iter()
            .filter(|c| c.starts_with("attach_") || c.starts_with("detach_"))
            .collect();
        assert_eq!(
            attachments,
            vec![
                format!("detach_disk({id}, {data})"),
                format!("attach_disk({id}, {logs})"),
                format!("detach_ip({id}, {v4})"),
                format!("attach_ip({id}, {v6})"),
            ]
        );
    }

    #[tokio::test]
    async fn test_deleted_state_removes_vm_and_skips_later_groups() {
        let fx = Fixture::new().await;
        let id = fx.create(&web()).await;
        let mut desired = web();
        desired.state = VmState::Deleted;
        desired.hostname = Some(String::from("ignored"));

        let report = fx
            .reconciler()
            .update(&id, &desired, &fx.resolver())
            .await
            .expect("update");

        assert!(report.removed);
        assert_eq!(report.outcome(UpdateGroup::Name), Some(&GroupOutcome::Skipped));
        assert!(fx.reconciler().read(&id).await.expect("read").is_none());
    }

    #[tokio::test]
    async fn test_update_of_vanished_vm_is_not_found() {
        let fx = Fixture::new().await;
        let result = fx.reconciler().update("4242", &web(), &fx.resolver()).await;
        assert!(result.as_ref().is_err_and(HostwrightError::is_not_found));
    }
}
