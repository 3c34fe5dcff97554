//! Plan executor.
//!
//! Runs the actions of a plan in order through the lifecycle reconcilers
//! and records their effect in the managed state as it goes, so a failure
//! half way leaves the state describing exactly what exists.

use std::collections::HashSet;
use std::fmt;
use tracing::{error, info, warn};

use crate::config::{ConfigHasher, ResourceConfig};
use crate::error::{HostwrightError, Result};
use crate::lifecycle::{Lifecycle, Resolver, committed_config};
use crate::state::{HistoryEntry, ManagedResource, ManagedState, Operation};

use super::plan::{ActionType, ExecutionPlan, PlannedAction};

/// Executor for execution plans.
pub struct PlanExecutor<'a> {
    lifecycle: Lifecycle<'a>,
    hasher: ConfigHasher,
    continue_on_error: bool,
    operation: Operation,
}

/// Result of executing a single action.
#[derive(Debug)]
pub struct ActionResult {
    /// Action index.
    pub index: usize,
    /// Action that was executed.
    pub action: PlannedAction,
    /// Whether the action succeeded.
    pub success: bool,
    /// Not attempted because a dependency failed.
    pub skipped: bool,
    /// Remote identifier after the action.
    pub id: Option<String>,
    /// Error message, if failed.
    pub error: Option<String>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
}

/// Result of executing the entire plan.
#[derive(Debug, Default)]
pub struct ExecutionResult {
    /// Individual action results.
    pub results: Vec<ActionResult>,
    /// Number of successful actions.
    pub successful: usize,
    /// Number of failed actions.
    pub failed: usize,
    /// Number of actions skipped after a dependency failed.
    pub skipped: usize,
}

impl<'a> PlanExecutor<'a> {
    /// Creates an executor that keeps going after a failed action.
    #[must_use]
    pub const fn new(lifecycle: Lifecycle<'a>) -> Self {
        Self {
            lifecycle,
            hasher: ConfigHasher::new(),
            continue_on_error: true,
            operation: Operation::Apply,
        }
    }

    /// Sets the operation recorded in the state history.
    #[must_use]
    pub const fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    /// Sets whether independent actions still run after a failure.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Executes a plan, updating `state` after every action.
    ///
    /// Action failures are reported in the result, not as an error.
    pub async fn execute(&self, plan: &ExecutionPlan, state: &mut ManagedState) -> ExecutionResult {
        info!("Executing plan with {} actions", plan.actions.len());
        let mut results = Vec::new();
        let mut failed: HashSet<usize> = HashSet::new();
        let mut halted = false;

        for (index, action) in plan.actions.iter().enumerate() {
            if halted || action.dependencies.iter().any(|d| failed.contains(d)) {
                warn!("Skipping {}: a previous action failed", action.address);
                failed.insert(index);
                results.push(ActionResult::skipped(index, action));
                continue;
            }

            let result = self.execute_action(index, action, state).await;
            if !result.success {
                failed.insert(index);
                halted = !self.continue_on_error;
            }
            results.push(result);
        }

        let result = ExecutionResult::from_results(results);
        let error = (!result.is_success()).then(|| {
            format!("{} actions failed, {} skipped", result.failed, result.skipped)
        });
        if error.is_none() {
            state.config_hash.clone_from(&plan.config_hash);
        }
        state.add_history(HistoryEntry::new(
            self.operation,
            &plan.config_hash,
            plan.actions.iter().map(|a| a.address.to_string()).collect(),
            error,
        ));
        result
    }

    async fn execute_action(
        &self,
        index: usize,
        action: &PlannedAction,
        state: &mut ManagedState,
    ) -> ActionResult {
        info!("Executing action {index}: {}", action.description());
        let mut result = ActionResult::started(index, action);

        let outcome = match action.action_type {
            ActionType::Create => self.create(action, state, &mut result).await,
            ActionType::Update => self.update(action, state, &mut result).await,
            ActionType::Replace => self.replace(action, state, &mut result).await,
            ActionType::Delete => self.delete(action, state, &mut result).await,
        };

        match outcome {
            Ok(()) => result.success = true,
            Err(e) => {
                error!("Failed to {} {}: {e}", action.action_type, action.address);
                result.error = Some(e.to_string());
            }
        }
        result
    }

    async fn create(
        &self,
        action: &PlannedAction,
        state: &mut ManagedState,
        result: &mut ActionResult,
    ) -> Result<()> {
        let desired = desired_of(action)?;
        let created = {
            let resolver = Resolver::new(self.lifecycle.hosting(), &*state);
            self.lifecycle.create(desired, &resolver).await?
        };

        info!("Created {} ({})", action.address, created.id);
        let hash = self.hasher.hash_resource(desired);
        state.set(ManagedResource::new(
            created.id.clone(),
            desired.clone(),
            hash,
            Some(created.observed),
        ));
        result.id = Some(created.id);
        result.warnings = created.warnings;
        Ok(())
    }

    async fn update(
        &self,
        action: &PlannedAction,
        state: &mut ManagedState,
        result: &mut ActionResult,
    ) -> Result<()> {
        let desired = desired_of(action)?;
        let Some(record) = state.get(&action.address).cloned() else {
            return Err(HostwrightError::internal(format!("{} is not recorded", action.address)));
        };

        let outcome = {
            let resolver = Resolver::new(self.lifecycle.hosting(), &*state);
            self.lifecycle
                .update(&action.address, &record.id, &record.applied, desired, &resolver)
                .await
        };
        let report = match outcome {
            Ok(report) => report,
            Err(e) if e.is_not_found() => {
                warn!("{} vanished, it will be created on the next apply", action.address);
                state.remove(&action.address);
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        result.id = Some(record.id.clone());
        if report.removed {
            state.remove(&action.address);
            return Ok(());
        }

        let committed = committed_config(&record.applied, desired, &report);
        let hash = self.hasher.hash_resource(&committed);
        if let Some(entry) = state.get_mut(&action.address) {
            entry.apply(committed, hash);
            if let Some(observed) = report.observed.clone() {
                entry.observed = Some(observed);
            }
        }
        report.ensure_success(&action.address.to_string())
    }

    async fn replace(
        &self,
        action: &PlannedAction,
        state: &mut ManagedState,
        result: &mut ActionResult,
    ) -> Result<()> {
        let desired = desired_of(action)?;
        let Some(id) = state.get(&action.address).map(|r| r.id.clone()) else {
            return Err(HostwrightError::internal(format!("{} is not recorded", action.address)));
        };

        let report = {
            let resolver = Resolver::new(self.lifecycle.hosting(), &*state);
            self.lifecycle
                .replace(&action.address, &id, desired, &resolver)
                .await
        };
        result.warnings.clone_from(&report.warnings);

        if let Some(created) = report.created {
            let hash = self.hasher.hash_resource(desired);
            state.set(ManagedResource::new(
                created.id.clone(),
                desired.clone(),
                hash,
                Some(created.observed),
            ));
            result.id = Some(created.id);
            result.warnings.extend(created.warnings);
        } else if report.released {
            state.remove(&action.address);
        }

        match report.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn delete(
        &self,
        action: &PlannedAction,
        state: &mut ManagedState,
        result: &mut ActionResult,
    ) -> Result<()> {
        let id = action
            .id
            .clone()
            .or_else(|| state.get(&action.address).map(|r| r.id.clone()));
        let Some(id) = id else {
            state.remove(&action.address);
            return Ok(());
        };

        self.lifecycle.delete(&action.address, &id).await?;
        state.remove(&action.address);
        info!("Deleted {} ({id})", action.address);
        result.id = Some(id);
        Ok(())
    }
}

fn desired_of(action: &PlannedAction) -> Result<&ResourceConfig> {
    action
        .desired
        .as_ref()
        .ok_or_else(|| HostwrightError::internal(format!("{} has no declared configuration", action.address)))
}

impl ActionResult {
    fn started(index: usize, action: &PlannedAction) -> Self {
        Self {
            index,
            action: action.clone(),
            success: false,
            skipped: false,
            id: action.id.clone(),
            error: None,
            warnings: Vec::new(),
        }
    }

    fn skipped(index: usize, action: &PlannedAction) -> Self {
        Self {
            skipped: true,
            error: Some(String::from("Skipped due to dependency failure")),
            ..Self::started(index, action)
        }
    }
}

impl ExecutionResult {
    fn from_results(results: Vec<ActionResult>) -> Self {
        let successful = results.iter().filter(|r| r.success).count();
        let skipped = results.iter().filter(|r| r.skipped).count();
        let failed = results.len() - successful - skipped;
        Self {
            results,
            successful,
            failed,
            skipped,
        }
    }

    /// Returns true if every action succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Returns every warning raised by successful actions.
    #[must_use]
    pub fn warnings(&self) -> Vec<&str> {
        self.results
            .iter()
            .flat_map(|r| r.warnings.iter().map(String::as_str))
            .collect()
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed, {} skipped",
            self.results.len(),
            self.successful,
            self.failed,
            self.skipped
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DesiredConfig, PolicyConfig, ResourceAddress, ResourceKind};
    use crate::hosting::SandboxHosting;
    use crate::lifecycle::Observation;
    use crate::planner::Planner;

    const STACK: &str = r"
ssh_keys:
  - name: ops
    value: ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 ops@example
disks:
  - name: web-sys
    region: FR-SD2
    image: Debian 9 64 bits (HVM)
  - name: web-data
    region: FR-SD2
    size_gb: 20
ips:
  - name: web-v4
    region: FR-SD2
    version: 4
vms:
  - name: web
    region: FR-SD2
    memory_mb: 1024
    boot_disk: web-sys
    disks: [web-data]
    ips: [web-v4]
    ssh_keys: [ops]
";

    fn config(yaml: &str) -> DesiredConfig {
        serde_yaml::from_str(yaml).expect("config should parse")
    }

    async fn apply(
        sandbox: &SandboxHosting,
        desired: &DesiredConfig,
        state: &mut ManagedState,
    ) -> ExecutionResult {
        let changes = Planner::default().compute(desired, state).expect("plan");
        let plan = ExecutionPlan::from_changes(&changes, desired, "hash");
        PlanExecutor::new(Lifecycle::new(sandbox, PolicyConfig::default()))
            .execute(&plan, state)
            .await
    }

    fn vm_address() -> ResourceAddress {
        ResourceAddress::new(ResourceKind::Vm, "web")
    }

    #[tokio::test]
    async fn test_apply_converges() {
        let sandbox = SandboxHosting::new();
        let desired = config(STACK);
        let mut state = ManagedState::new();

        let result = apply(&sandbox, &desired, &mut state).await;
        assert!(result.is_success(), "{result}");
        assert_eq!(state.len(), 5);
        assert_eq!(state.config_hash, "hash");

        let Some(Observation::Vm(vm)) = state.get(&vm_address()).and_then(|r| r.observed.clone()) else {
            panic!("expected a vm observation");
        };
        assert_eq!(vm.disks.len(), 2);
        assert_eq!(vm.memory_mb, 1024);

        let again = apply(&sandbox, &desired, &mut state).await;
        assert!(again.results.is_empty());
    }

    #[tokio::test]
    async fn test_failed_create_records_nothing_and_skips_dependents() {
        let sandbox = SandboxHosting::new();
        sandbox.fail_on("create_ip");
        let mut state = ManagedState::new();

        let result = apply(&sandbox, &config(STACK), &mut state).await;

        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 1);
        assert!(state.get(&ResourceAddress::new(ResourceKind::Ip, "web-v4")).is_none());
        assert!(state.get(&vm_address()).is_none());
        assert_eq!(state.len(), 3);
        assert!(state.config_hash.is_empty());
        assert_eq!(state.history.last().map(|h| h.success), Some(false));
    }

    #[tokio::test]
    async fn test_partial_update_records_committed_groups_only() {
        let sandbox = SandboxHosting::new();
        let mut desired = config(STACK);
        let mut state = ManagedState::new();
        assert!(apply(&sandbox, &desired, &mut state).await.is_success());

        desired.vms[0].memory_mb = 2048;
        desired.vms[0].cores = 2;
        sandbox.fail_on("update_vm_memory");
        let result = apply(&sandbox, &desired, &mut state).await;

        assert_eq!(result.failed, 1);
        let error = result.results[0].error.clone().unwrap_or_default();
        assert!(error.contains("memory"), "{error}");
        let Some(ResourceConfig::Vm(recorded)) = state.get(&vm_address()).map(|r| r.applied.clone()) else {
            panic!("expected a vm record");
        };
        assert_eq!(recorded.memory_mb, 1024);
        assert_eq!(recorded.cores, 2);

        sandbox.clear_failures();
        let retried = apply(&sandbox, &desired, &mut state).await;
        assert!(retried.is_success(), "{retried}");
        assert_eq!(retried.results.len(), 1);
    }

    #[tokio::test]
    async fn test_removing_everything_tears_down() {
        let sandbox = SandboxHosting::new();
        let mut state = ManagedState::new();
        assert!(apply(&sandbox, &config(STACK), &mut state).await.is_success());

        let result = apply(&sandbox, &DesiredConfig::default(), &mut state).await;

        assert!(result.is_success(), "{result}");
        assert!(state.is_empty());
        let calls = sandbox.calls();
        let delete_vm = calls.iter().position(|c| c.starts_with("delete_vm"));
        let delete_disk = calls.iter().position(|c| c.starts_with("delete_disk"));
        assert!(delete_vm.is_some() && delete_vm < delete_disk);
    }
}
