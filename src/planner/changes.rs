//! Resource-level change detection.
//!
//! Compares the declared configuration against the recorded state without
//! any remote call. A resource whose recorded hash matches and that has not
//! drifted is left alone; otherwise the replacement policy decides between
//! an in-place update and a replacement.

use std::collections::HashSet;
use std::fmt;
use tracing::debug;

use crate::config::{
    ConfigHasher, DesiredConfig, PolicyConfig, ResourceAddress, ResourceConfig, ResourceKind,
};
use crate::error::Result;
use crate::hosting::VmState;
use crate::state::{ManagedResource, ManagedState};

use super::policy::{ChangeDecision, FieldChange, ReplacementPolicy};

/// What has to happen to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChangeKind {
    /// Declared but not recorded.
    Create,
    /// Recorded and changed in place.
    Update,
    /// Recorded and changed in a field that requires a new resource.
    Replace,
    /// Recorded but no longer declared.
    Delete,
    /// Nothing to do.
    NoChange,
}

/// The change computed for one resource.
#[derive(Debug, Clone)]
pub struct ResourceChange {
    /// Resource address.
    pub address: ResourceAddress,
    /// What has to happen.
    pub kind: ChangeKind,
    /// Recorded remote identifier.
    pub id: Option<String>,
    /// Recorded configuration.
    pub applied: Option<ResourceConfig>,
    /// Declared configuration.
    pub desired: Option<ResourceConfig>,
    /// Hash of the declared configuration.
    pub new_hash: Option<String>,
    /// Governed fields that changed.
    pub fields: Vec<FieldChange>,
    /// Why this change is needed.
    pub reason: String,
}

/// Every change between configuration and state.
#[derive(Debug, Default)]
pub struct ChangeSet {
    /// One entry per declared or recorded resource.
    pub changes: Vec<ResourceChange>,
}

/// Computes changes between the declared configuration and the state.
#[derive(Debug, Default)]
pub struct Planner {
    hasher: ConfigHasher,
    policy: ReplacementPolicy,
}

impl Planner {
    /// Creates a planner using the policy section of the configuration.
    #[must_use]
    pub const fn new(policy: &PolicyConfig) -> Self {
        Self {
            hasher: ConfigHasher::new(),
            policy: ReplacementPolicy::new(policy.disk_shrink),
        }
    }

    /// Computes the change for every declared and every recorded resource.
    ///
    /// Declared resources come first, in dependency order, followed by the
    /// deletions. A resource depending on a replaced one is updated so it
    /// picks up the new identifier; private addresses on a replaced VLAN are
    /// replaced with it.
    ///
    /// # Errors
    ///
    /// Returns `MonotonicViolation` if a disk shrinks under the `reject`
    /// shrink policy. Nothing is planned in that case.
    pub fn compute(&self, config: &DesiredConfig, state: &ManagedState) -> Result<ChangeSet> {
        let mut changes = Vec::new();
        let mut replaced: HashSet<ResourceAddress> = HashSet::new();

        for resource in config.resources() {
            let mut change = self.resource_change(&resource, state.get(&resource.address()))?;

            if change.kind == ChangeKind::NoChange || change.kind == ChangeKind::Update {
                if let Some(dependency) = config
                    .dependencies(&resource)
                    .into_iter()
                    .find(|d| replaced.contains(d))
                {
                    let follows = resource.kind() == ResourceKind::PrivateIp
                        && dependency.kind == ResourceKind::Vlan;
                    if follows {
                        change.kind = ChangeKind::Replace;
                    } else if resource.kind() == ResourceKind::Vm {
                        change.kind = ChangeKind::Update;
                    }
                    if change.kind != ChangeKind::NoChange {
                        change.reason = format!("{dependency} is replaced");
                    }
                }
            }

            if change.kind == ChangeKind::Replace {
                replaced.insert(change.address.clone());
            }
            debug!("{}: {:?} ({})", change.address, change.kind, change.reason);
            changes.push(change);
        }

        for record in state.resources.values() {
            if config.find(&record.address).is_none() {
                debug!("{} is no longer declared", record.address);
                changes.push(ResourceChange {
                    address: record.address.clone(),
                    kind: ChangeKind::Delete,
                    id: Some(record.id.clone()),
                    applied: Some(record.applied.clone()),
                    desired: None,
                    new_hash: None,
                    fields: Vec::new(),
                    reason: String::from("removed from configuration"),
                });
            }
        }

        Ok(ChangeSet { changes })
    }

    fn resource_change(
        &self,
        resource: &ResourceConfig,
        record: Option<&ManagedResource>,
    ) -> Result<ResourceChange> {
        let address = resource.address();
        let new_hash = self.hasher.hash_resource(resource);
        let declared_deleted = matches!(resource, ResourceConfig::Vm(vm) if vm.state == VmState::Deleted);

        let mut change = ResourceChange {
            address,
            kind: ChangeKind::NoChange,
            id: record.map(|r| r.id.clone()),
            applied: record.map(|r| r.applied.clone()),
            desired: Some(resource.clone()),
            new_hash: Some(new_hash.clone()),
            fields: Vec::new(),
            reason: String::new(),
        };

        let Some(record) = record else {
            if declared_deleted {
                change.reason = String::from("declared deleted and absent");
            } else {
                change.kind = ChangeKind::Create;
                change.reason = String::from("declared in configuration");
            }
            return Ok(change);
        };

        if declared_deleted {
            change.kind = ChangeKind::Delete;
            change.reason = String::from("declared deleted");
            return Ok(change);
        }

        if record.config_hash == new_hash && !record.drifted {
            change.reason = String::from("up to date");
            return Ok(change);
        }

        match self.policy.decide(&change.address, &record.applied, resource)? {
            ChangeDecision::NoChange if record.drifted => {
                change.kind = ChangeKind::Update;
                change.reason = String::from("remote drift");
            }
            ChangeDecision::NoChange => {
                change.reason = String::from("up to date");
            }
            ChangeDecision::InPlace(fields) => {
                change.kind = ChangeKind::Update;
                change.reason = describe(&fields);
                change.fields = fields;
            }
            ChangeDecision::Replace(fields) => {
                change.kind = ChangeKind::Replace;
                change.reason = format!("{} forces replacement", describe(&fields));
                change.fields = fields;
            }
        }
        Ok(change)
    }
}

fn describe(fields: &[FieldChange]) -> String {
    if fields.is_empty() {
        return String::from("configuration changed");
    }
    fields
        .iter()
        .map(|f| f.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ChangeSet {
    /// Returns the number of changes of a kind.
    #[must_use]
    pub fn count(&self, kind: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.kind == kind).count()
    }

    /// Returns true if anything has to happen.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.changes.iter().any(|c| c.kind != ChangeKind::NoChange)
    }

    /// Returns the changes that require action.
    #[must_use]
    pub fn actionable(&self) -> Vec<&ResourceChange> {
        self.changes
            .iter()
            .filter(|c| c.kind != ChangeKind::NoChange)
            .collect()
    }

    /// Returns the change for an address.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&ResourceChange> {
        self.changes.iter().find(|c| c.address == *address)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for ResourceChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.address, self.kind)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}
