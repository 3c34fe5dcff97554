//! VLAN lifecycle.

use tracing::{info, warn};

use crate::config::{UpdateStrategy, VlanConfig};
use crate::error::{ReconcileError, Result};
use crate::hosting::{Hosting, ResourceFilter, Vlan};

use super::builder::SpecBuilder;
use super::outcome::{CreateReport, GroupOutcome, Observation, UpdateGroup, UpdateReport};
use super::probe::ExistenceProber;
use super::resolve::Resolver;

/// Lifecycle operations for VLANs.
#[derive(Clone, Copy)]
pub struct VlanReconciler<'a> {
    hosting: &'a dyn Hosting,
    strategy: UpdateStrategy,
}

impl<'a> VlanReconciler<'a> {
    /// Creates a VLAN reconciler.
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

    /// Creates a VLAN. Setting the gateway afterwards is best effort.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown region, or the remote error of the
    /// create call.
    pub async fn create(&self, config: &VlanConfig, resolver: &Resolver<'_>) -> Result<CreateReport> {
        let region_id = resolver.region_id(&config.region).await?;
        let mut vlan = self
            .hosting
            .create_vlan(&SpecBuilder::vlan(config, &region_id))
            .await?;
        info!("Created vlan '{}' ({})", vlan.name, vlan.id);

        let mut warnings = Vec::new();
        if let Some(gateway) = &config.gateway {
            match self.hosting.update_vlan_gateway(&vlan.id, gateway).await {
                Ok(updated) => vlan = updated,
                Err(e) => {
                    let message = format!("Could not set gateway of vlan {}: {e}", vlan.id);
                    warn!("{message}");
                    warnings.push(message);
                }
            }
        }

        Ok(CreateReport {
            id: vlan.id.clone(),
            observed: Observation::Vlan(vlan),
            warnings,
        })
    }

    /// Reads a VLAN. A VLAN that no longer exists is `None`.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the query fails.
    pub async fn read(&self, id: &str) -> Result<Option<Vlan>> {
        let vlan = self
            .hosting
            .list_vlans(&ResourceFilter::by_id(id))
            .await?
            .into_iter()
            .next();
        if vlan.is_none() {
            info!("VLAN {id} not found, marking absent");
        }
        Ok(vlan)
    }

    /// Renames a VLAN and changes its gateway.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the VLAN no longer exists.
    pub async fn update(&self, id: &str, desired: &VlanConfig) -> Result<UpdateReport> {
        let Some(mut current) = self.read(id).await? else {
            return Err(ReconcileError::not_found("vlan", id).into());
        };

        let mut report = UpdateReport::new();
        let name = GroupOutcome::from_result(self.apply_name(&mut current, desired).await);
        let abort = !name.is_committed() && self.strategy == UpdateStrategy::Abort;
        report.record(UpdateGroup::Name, name);

        if abort {
            report.record(UpdateGroup::Gateway, GroupOutcome::Skipped);
        } else {
            let gateway = self.apply_gateway(&mut current, desired).await;
            report.record(UpdateGroup::Gateway, GroupOutcome::from_result(gateway));
        }

        report.observed = Some(Observation::Vlan(current));
        Ok(report)
    }

    async fn apply_name(&self, current: &mut Vlan, desired: &VlanConfig) -> Result<bool> {
        let name = desired.remote_name();
        if current.name == name {
            return Ok(false);
        }
        *current = self.hosting.rename_vlan(&current.id, name).await?;
        info!("VLAN {} renamed to '{name}'", current.id);
        Ok(true)
    }

    async fn apply_gateway(&self, current: &mut Vlan, desired: &VlanConfig) -> Result<bool> {
        // An unset gateway leaves the remote one alone.
        let Some(gateway) = &desired.gateway else {
            return Ok(false);
        };
        if current.gateway.as_ref() == Some(gateway) {
            return Ok(false);
        }
        *current = self.hosting.update_vlan_gateway(&current.id, gateway).await?;
        info!("VLAN {} gateway set to {gateway}", current.id);
        Ok(true)
    }

    /// Deletes a VLAN. Absent VLANs are a no-op.
    ///
    /// # Errors
    ///
    /// Returns the remote error, for instance if addresses remain on it.
    pub async fn delete(&self, id: &str) -> Result<()> {
        if !ExistenceProber::new(self.hosting).vlan_exists(id).await? {
            info!("VLAN {id} already absent, nothing to delete");
            return Ok(());
        }
        self.hosting.delete_vlan(id).await?;
        info!("Deleted vlan {id}");
        Ok(())
    }
}
