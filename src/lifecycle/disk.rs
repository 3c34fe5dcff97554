//! Disk lifecycle.
//!
//! Disks are created blank, cloned from another disk, or cloned from an
//! image's backing disk. The name can change in place and the size can only
//! grow; a shrink is refused before anything is sent to the service.

use tracing::{debug, info, warn};

use crate::config::{DiskConfig, ResourceAddress, UpdateStrategy};
use crate::error::{ReconcileError, Result};
use crate::hosting::{Disk, Hosting, ResourceFilter};
use crate::planner::{DiskField, Field, ensure_growth};

use super::builder::SpecBuilder;
use super::outcome::{CreateReport, GroupOutcome, Observation, UpdateGroup, UpdateReport};
use super::probe::ExistenceProber;
use super::resolve::Resolver;

const SIZE: Field = Field::Disk(DiskField::Size);

/// Lifecycle operations for disks.
#[derive(Clone, Copy)]
pub struct DiskReconciler<'a> {
    hosting: &'a dyn Hosting,
    strategy: UpdateStrategy,
}

impl<'a> DiskReconciler<'a> {
    /// Creates a disk reconciler.
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

    /// Creates a disk.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the region, image or source disk does not
    /// exist, or the remote error.
    pub async fn create(&self, config: &DiskConfig, resolver: &Resolver<'_>) -> Result<CreateReport> {
        let region_id = resolver.region_id(&config.region).await?;
        let spec = SpecBuilder::disk(config, &region_id);

        let disk = match (&config.image, &config.source_disk) {
            (Some(image), _) => {
                let image = self
                    .hosting
                    .image_by_name(image, &region_id)
                    .await?
                    .ok_or_else(|| ReconcileError::not_found("image", image))?;
                info!("Creating disk '{}' from image '{}'", spec.name, image.name);
                self.hosting.create_disk_from(&spec, &image.disk_id).await?
            }
            (None, Some(source)) => {
                let source_id = resolver
                    .disk_id(source)
                    .await?
                    .ok_or_else(|| ReconcileError::not_found("disk", source))?;
                info!("Creating disk '{}' from disk {source_id}", spec.name);
                self.hosting.create_disk_from(&spec, &source_id).await?
            }
            (None, None) => {
                info!("Creating blank disk '{}'", spec.name);
                self.hosting.create_disk(&spec).await?
            }
        };

        info!("Created disk '{}' ({}, {} GB)", disk.name, disk.id, disk.size_gb);
        Ok(CreateReport {
            id: disk.id.clone(),
            observed: Observation::Disk(disk),
            warnings: Vec::new(),
        })
    }

    /// Reads a disk. A disk that no longer exists is `None`.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the query fails.
    pub async fn read(&self, id: &str) -> Result<Option<Disk>> {
        let disk = self
            .hosting
            .list_disks(&ResourceFilter::by_id(id))
            .await?
            .into_iter()
            .next();
        if disk.is_none() {
            info!("Disk {id} not found, marking absent");
        }
        Ok(disk)
    }

    /// Renames and grows a disk.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError::MonotonicViolation`] if `desired` is smaller
    /// than `applied` or than the live disk, before any change is sent, and
    /// `NotFound` if the disk no longer exists.
    pub async fn update(
        &self,
        address: &ResourceAddress,
        id: &str,
        applied: &DiskConfig,
        desired: &DiskConfig,
    ) -> Result<UpdateReport> {
        if let (Some(old), Some(new)) = (applied.size_gb, desired.size_gb) {
            ensure_growth(address, SIZE, old, new)?;
        }
        let Some(mut current) = self.read(id).await? else {
            return Err(ReconcileError::not_found("disk", id).into());
        };
        if let Some(new) = desired.size_gb {
            ensure_growth(address, SIZE, current.size_gb, new)?;
        }

        let mut report = UpdateReport::new();
        let name = self.apply_name(&mut current, desired.remote_name()).await;
        let name = GroupOutcome::from_result(name);
        let abort = !name.is_committed() && self.strategy == UpdateStrategy::Abort;
        report.record(UpdateGroup::Name, name);

        if abort {
            report.record(UpdateGroup::Size, GroupOutcome::Skipped);
        } else {
            let size = self.apply_size(&mut current, desired.size_gb).await;
            report.record(UpdateGroup::Size, GroupOutcome::from_result(size));
        }

        report.observed = Some(Observation::Disk(current));
        Ok(report)
    }

    async fn apply_name(&self, current: &mut Disk, name: &str) -> Result<bool> {
        if current.name == name {
            return Ok(false);
        }
        let previous = current.name.clone();
        *current = self.hosting.rename_disk(&current.id, name).await?;
        info!("Disk '{previous}' renamed to '{name}'");
        Ok(true)
    }

    async fn apply_size(&self, current: &mut Disk, size_gb: Option<u64>) -> Result<bool> {
        let Some(size_gb) = size_gb else {
            return Ok(false);
        };
        let delta = size_gb.saturating_sub(current.size_gb);
        if delta == 0 {
            return Ok(false);
        }
        *current = self.hosting.extend_disk(&current.id, delta).await?;
        info!("Disk {} extended by {delta} GB to {} GB", current.id, current.size_gb);
        Ok(true)
    }

    /// Deletes a disk. Absent disks are a no-op.
    ///
    /// # Errors
    ///
    /// Returns the remote error, for instance if the disk is still attached.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !ExistenceProber::new(self.hosting).disk_exists(id).await? {
            info!("Disk {id} already absent, nothing to delete");
            return Ok(());
        }
        self.hosting.delete_disk(id).await?;
        info!("Deleted disk {id}");
        Ok(())
    }

    /// Detaches a disk from every VM, then deletes it. Used when the disk
    /// is being replaced and its VMs will receive the new one.
    ///
    /// # Errors
    ///
    /// Returns the remote error of a detach or of the delete.
    pub async fn release(&self, id: &str) -> Result<()> {
        let Some(disk) = self.read(id).await? else {
            return Ok(());
        };
        for vm_id in &disk.vm_ids {
            warn!("Detaching disk {id} from vm {vm_id} before replacing it");
            self.hosting.detach_disk(vm_id, id).await?;
        }
        debug!("Disk {id} released");
        self.delete(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceKind;
    use crate::error::HostwrightError;
    use crate::hosting::{MockHosting, SandboxHosting};
    use std::collections::HashMap;

    fn data(size_gb: Option<u64>) -> DiskConfig {
        DiskConfig {
            name: String::from("data"),
            label: None,
            region: String::from("FR-SD2"),
            size_gb,
            image: None,
            source_disk: None,
        }
    }

    fn address() -> ResourceAddress {
        ResourceAddress::new(ResourceKind::Disk, "data")
    }

    #[tokio::test]
    async fn test_shrink_is_rejected_before_any_remote_call() {
        // No expectations: any call on the mock panics.
        let mock = MockHosting::new();
        let reconciler = DiskReconciler::new(&mock);

        let result = reconciler
            .update(&address(), "101", &data(Some(10)), &data(Some(5)))
            .await;

        assert!(matches!(
            result,
            Err(HostwrightError::Reconcile(ReconcileError::MonotonicViolation { old: 10, new: 5, .. }))
        ));
    }

    #[tokio::test]
    async fn test_create_from_image_and_grow() {
        let sandbox = SandboxHosting::new();
        let known: HashMap<ResourceAddress, String> = HashMap::new();
        let resolver = Resolver::new(&sandbox, &known);
        let reconciler = DiskReconciler::new(&sandbox);
        let mut config = data(Some(5));
        config.image = Some(String::from("Debian 9 64 bits (HVM)"));

        let created = reconciler.create(&config, &resolver).await.expect("create");
        assert!(sandbox.calls().contains(&String::from("create_disk_from(data, src-debian9-1)")));

        let mut grown = config.clone();
        grown.size_gb = Some(20);
        let report = reconciler
            .update(&address(), &created.id, &config, &grown)
            .await
            .expect("update");

        assert_eq!(report.outcome(UpdateGroup::Size), Some(&GroupOutcome::Applied));
        assert_eq!(report.outcome(UpdateGroup::Name), Some(&GroupOutcome::Unchanged));
        assert!(sandbox.calls().contains(&format!("extend_disk({}, 15)", created.id)));
        let disk = reconciler.read(&created.id).await.expect("read").expect("disk");
        assert_eq!(disk.size_gb, 20);
    }

    #[tokio::test]
    async fn test_clone_from_managed_disk() {
        let sandbox = SandboxHosting::new();
        let source = sandbox
            .create_disk(&SpecBuilder::disk(&data(Some(8)), "1"))
            .await
            .expect("source");
        let mut known = HashMap::new();
        known.insert(address(), source.id.clone());
        let resolver = Resolver::new(&sandbox, &known);
        let mut config = data(None);
        config.name = String::from("copy");
        config.source_disk = Some(String::from("data"));

        let created = DiskReconciler::new(&sandbox)
            .create(&config, &resolver)
            .await
            .expect("clone");

        let Observation::Disk(disk) = created.observed else {
            panic!("expected a disk observation");
        };
        assert_eq!(disk.size_gb, 8);
        assert_eq!(disk.name, "copy");
    }

    #[tokio::test]
    async fn test_remote_larger_than_desired_is_refused_before_rename() {
        let sandbox = SandboxHosting::new();
        let disk = sandbox
            .create_disk(&SpecBuilder::disk(&data(Some(30)), "1"))
            .await
            .expect("disk");
        let mut renamed = data(Some(20));
        renamed.label = Some(String::from("renamed"));

        sandbox.clear_calls();

        let result = DiskReconciler::new(&sandbox)
            .update(&address(), &disk.id, &data(None), &renamed)
            .await;

        assert!(matches!(
            result,
            Err(HostwrightError::Reconcile(ReconcileError::MonotonicViolation { .. }))
        ));
        assert!(!sandbox.calls().iter().any(|c| c.starts_with("rename_disk")));
        assert!(!sandbox.calls().iter().any(|c| c.starts_with("extend_disk")));
        let live = DiskReconciler::new(&sandbox)
            .read(&disk.id)
            .await
            .expect("read")
            .expect("disk");
        assert_eq!(live.name, disk.name);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let sandbox = SandboxHosting::new();
        let disk = sandbox
            .create_disk(&SpecBuilder::disk(&data(None), "1"))
            .await
            .expect("disk");
        let reconciler = DiskReconciler::new(&sandbox);

        reconciler.delete(&disk.id).await.expect("first delete");
        reconciler.delete(&disk.id).await.expect("second delete");

        let deletes = sandbox
            .calls()
            .iter()
            .filter(|c| c.starts_with("delete_disk"))
            .count();
        assert_eq!(deletes, 1);
    }
}
