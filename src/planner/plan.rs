//! Execution plan types and construction.
//!
//! A plan orders the actionable changes so that every action runs after
//! what it depends on: VM deletions first because they release disks and
//! addresses, then creates, updates and replacements tier by tier, then the
//! remaining deletions in reverse tier order.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::{DesiredConfig, ResourceAddress, ResourceConfig, ResourceKind};

use super::changes::{ChangeKind, ChangeSet, ResourceChange};

/// An ordered list of actions.
#[derive(Debug)]
pub struct ExecutionPlan {
    /// When the plan was computed.
    pub created_at: DateTime<Utc>,
    /// Hash of the configuration the plan converges to.
    pub config_hash: String,
    /// Actions in execution order.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// What to do.
    pub action_type: ActionType,
    /// Resource address.
    pub address: ResourceAddress,
    /// Recorded remote identifier.
    pub id: Option<String>,
    /// Recorded configuration.
    pub applied: Option<ResourceConfig>,
    /// Declared configuration.
    pub desired: Option<ResourceConfig>,
    /// Hash of the declared configuration.
    pub new_hash: Option<String>,
    /// Why the action is needed.
    pub reason: String,
    /// Indices of actions that must succeed first.
    pub dependencies: Vec<usize>,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Create a resource.
    Create,
    /// Update a resource in place.
    Update,
    /// Destroy a resource and create it again.
    Replace,
    /// Delete a resource.
    Delete,
}

impl ExecutionPlan {
    /// Orders the actionable changes of a change set.
    #[must_use]
    pub fn from_changes(changes: &ChangeSet, config: &DesiredConfig, config_hash: &str) -> Self {
        let mut ordered: Vec<&ResourceChange> = Vec::new();

        ordered.extend(
            changes
                .changes
                .iter()
                .filter(|c| c.kind == ChangeKind::Delete && c.address.kind == ResourceKind::Vm),
        );
        let mut converging: Vec<&ResourceChange> = changes
            .changes
            .iter()
            .filter(|c| matches!(c.kind, ChangeKind::Create | ChangeKind::Update | ChangeKind::Replace))
            .collect();
        converging.sort_by_key(|c| c.address.kind);
        ordered.extend(converging);

        let mut deletes: Vec<&ResourceChange> = changes
            .changes
            .iter()
            .filter(|c| c.kind == ChangeKind::Delete && c.address.kind != ResourceKind::Vm)
            .collect();
        deletes.sort_by_key(|c| std::cmp::Reverse(c.address.kind));
        ordered.extend(deletes);

        let mut actions: Vec<PlannedAction> = ordered.into_iter().map(PlannedAction::from_change).collect();
        for i in 0..actions.len() {
            let dependencies = Self::dependencies_of(&actions, i, config);
            actions[i].dependencies = dependencies;
        }

        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
        }
    }

    /// Indices of earlier actions that action `index` must wait for.
    ///
    /// A converging action waits for the declared resources it refers to.
    /// A deletion waits for the deletions of whatever still refers to it.
    fn dependencies_of(actions: &[PlannedAction], index: usize, config: &DesiredConfig) -> Vec<usize> {
        let action = &actions[index];
        let earlier = actions.iter().enumerate().take(index);

        if action.action_type == ActionType::Delete {
            return earlier
                .filter(|(_, a)| a.action_type == ActionType::Delete)
                .filter(|(_, a)| a.applied.as_ref().is_some_and(|c| refers_to(c, &action.address)))
                .map(|(i, _)| i)
                .collect();
        }

        let Some(desired) = &action.desired else {
            return Vec::new();
        };
        let wanted = config.dependencies(desired);
        earlier
            .filter(|(_, a)| a.action_type != ActionType::Delete && wanted.contains(&a.address))
            .map(|(i, _)| i)
            .collect()
    }

    /// Creates an empty plan.
    #[must_use]
    pub fn empty(config_hash: &str) -> Self {
        Self {
            created_at: Utc::now(),
            config_hash: config_hash.to_string(),
            actions: Vec::new(),
        }
    }

    /// Returns true if the plan has no actions.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of a type.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }
}

/// Returns true if `config` names `target` among its references.
fn refers_to(config: &ResourceConfig, target: &ResourceAddress) -> bool {
    let name = target.name.as_str();
    match (config, target.kind) {
        (ResourceConfig::Vm(vm), ResourceKind::Disk) => {
            vm.boot_disk == name || vm.disks.iter().any(|d| d == name)
        }
        (ResourceConfig::Vm(vm), ResourceKind::Ip | ResourceKind::PrivateIp) => {
            vm.ips.iter().any(|i| i == name)
        }
        (ResourceConfig::Vm(vm), ResourceKind::SshKey) => vm.ssh_keys.iter().any(|k| k == name),
        (ResourceConfig::PrivateIp(ip), ResourceKind::Vlan) => ip.vlan == name,
        _ => false,
    }
}

impl PlannedAction {
    fn from_change(change: &ResourceChange) -> Self {
        let action_type = match change.kind {
            ChangeKind::Create => ActionType::Create,
            ChangeKind::Update | ChangeKind::NoChange => ActionType::Update,
            ChangeKind::Replace => ActionType::Replace,
            ChangeKind::Delete => ActionType::Delete,
        };
        Self {
            action_type,
            address: change.address.clone(),
            id: change.id.clone(),
            applied: change.applied.clone(),
            desired: change.desired.clone(),
            new_hash: change.new_hash.clone(),
            reason: change.reason.clone(),
            dependencies: Vec::new(),
        }
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        match self.action_type {
            ActionType::Create => format!("Create {}", self.address),
            ActionType::Update => format!("Update {}", self.address),
            ActionType::Replace => format!("Replace {}", self.address),
            ActionType::Delete => format!("Delete {}", self.address),
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action_type, self.address)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl fmt::Display for ExecutionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }
        writeln!(f, "Execution plan ({} actions):", self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigHasher;
    use crate::planner::Planner;
    use crate::state::{ManagedResource, ManagedState};

    fn config(yaml: &str) -> DesiredConfig {
        serde_yaml::from_str(yaml).expect("config should parse")
    }

    const STACK: &str = r"
ssh_keys:
  - name: ops
    value: ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 ops@example
vlans:
  - name: backend
    region: FR-SD2
    subnet: 10.0.0.0/24
disks:
  - name: web-sys
    region: FR-SD2
ips:
  - name: web-v4
    region: FR-SD2
    version: 4
private_ips:
  - name: web-lan
    region: FR-SD2
    vlan: backend
    ip: 10.0.0.10
vms:
  - name: web
    region: FR-SD2
    boot_disk: web-sys
    ips: [web-v4, web-lan]
    ssh_keys: [ops]
";

    fn plan(desired: &DesiredConfig, state: &ManagedState) -> ExecutionPlan {
        let changes = Planner::default().compute(desired, state).expect("plan");
        ExecutionPlan::from_changes(&changes, desired, "hash")
    }

    fn addresses(plan: &ExecutionPlan) -> Vec<String> {
        plan.actions.iter().map(|a| a.address.to_string()).collect()
    }

    #[test]
    fn test_creates_follow_tiers() {
        let desired = config(STACK);
        let plan = plan(&desired, &ManagedState::new());

        assert_eq!(
            addresses(&plan),
            vec![
                "ssh_key.ops",
                "vlan.backend",
                "disk.web-sys",
                "ip.web-v4",
                "private_ip.web-lan",
                "vm.web"
            ]
        );
        let vm = plan.actions.last().expect("vm action");
        assert_eq!(vm.dependencies, vec![0, 2, 3, 4]);
        assert_eq!(plan.actions[4].dependencies, vec![1]);
    }

    #[test]
    fn test_teardown_deletes_vm_first_then_reverse_tiers() {
        let declared = config(STACK);
        let hasher = ConfigHasher::new();
        let mut state = ManagedState::new();
        for (i, resource) in declared.resources().into_iter().enumerate() {
            let hash = hasher.hash_resource(&resource);
            state.set(ManagedResource::new(i.to_string(), resource, hash, None));
        }

        let plan = plan(&DesiredConfig::default(), &state);

        assert_eq!(
            addresses(&plan),
            vec![
                "vm.web",
                "private_ip.web-lan",
                "ip.web-v4",
                "disk.web-sys",
                "vlan.backend",
                "ssh_key.ops"
            ]
        );
        assert!(plan.actions.iter().all(|a| a.action_type == ActionType::Delete));
        assert_eq!(plan.actions[1].dependencies, vec![0]);
        assert_eq!(plan.actions[4].dependencies, vec![1]);
        assert_eq!(plan.count(ActionType::Delete), 6);
    }

    #[test]
    fn test_empty_plan_display() {
        let plan = ExecutionPlan::empty("hash");
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "No changes required");
    }
}
