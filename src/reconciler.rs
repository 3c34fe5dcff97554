//! Reconciler for maintaining desired state.
//!
//! This module drives a whole run: it takes the state lock, re-reads every
//! managed resource, plans the changes between the configuration and the
//! recorded state, executes the plan and saves the state again.

use serde::Serialize;
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{ConfigHasher, DesiredConfig, ResourceAddress};
use crate::error::Result;
use crate::hosting::Hosting;
use crate::lifecycle::Lifecycle;
use crate::planner::{
    ActionType, ChangeKind, ChangeSet, ExecutionPlan, ExecutionResult, PlanExecutor, Planner,
};
use crate::state::{
    HistoryEntry, LockInfo, ManagedState, Operation, StateStore, generate_holder_id,
};

/// Reconciler for maintaining desired state.
pub struct Reconciler<'a, S: StateStore> {
    /// Configuration.
    config: &'a DesiredConfig,
    /// State store.
    state_store: &'a S,
    /// Hosting backend.
    hosting: &'a dyn Hosting,
    /// Configuration hasher.
    hasher: ConfigHasher,
    /// Keep running independent actions after a failure.
    continue_on_error: bool,
    /// Re-read managed resources before planning.
    refresh: bool,
}

/// A computed plan together with the changes it was built from.
#[derive(Debug)]
pub struct PlanPreview {
    /// Every change, including the ones with nothing to do.
    pub changes: ChangeSet,
    /// Ordered actions.
    pub plan: ExecutionPlan,
    /// What the refresh found, if one ran.
    pub refresh: Option<RefreshReport>,
}

/// Result of a reconciliation run.
#[derive(Debug, Serialize)]
pub struct ReconciliationResult {
    /// Whether every action succeeded.
    pub success: bool,
    /// Number of resources created.
    pub created: usize,
    /// Number of resources updated in place.
    pub updated: usize,
    /// Number of resources replaced.
    pub replaced: usize,
    /// Number of resources deleted.
    pub deleted: usize,
    /// Number of resources left alone.
    pub unchanged: usize,
    /// Number of actions skipped after a dependency failed.
    pub skipped: usize,
    /// Errors encountered, one per failed action.
    pub errors: Vec<String>,
    /// Non-fatal problems.
    pub warnings: Vec<String>,
    /// Final state after reconciliation.
    #[serde(skip)]
    pub final_state: Option<ManagedState>,
}

/// What a refresh found.
#[derive(Debug, Default, Serialize)]
pub struct RefreshReport {
    /// Number of records read back.
    pub checked: usize,
    /// Records whose remote resource changed outside of this tool.
    pub drifted: Vec<String>,
    /// Records whose remote resource no longer exists.
    pub vanished: Vec<String>,
}

/// Report of drift detection.
#[derive(Debug, Serialize)]
pub struct DriftReport {
    /// Whether drift was detected.
    pub has_drift: bool,
    /// Resources changed remotely.
    pub drifted_resources: Vec<String>,
    /// Resources that vanished remotely.
    pub vanished_resources: Vec<String>,
    /// Changes an apply would make.
    pub pending_changes: Vec<String>,
    /// Number of declared resources.
    pub total_resources: usize,
    /// Number of recorded resources.
    pub managed_count: usize,
}

impl<'a, S: StateStore> Reconciler<'a, S> {
    /// Creates a new reconciler.
    #[must_use]
    pub const fn new(config: &'a DesiredConfig, state_store: &'a S, hosting: &'a dyn Hosting) -> Self {
        Self {
            config,
            state_store,
            hosting,
            hasher: ConfigHasher::new(),
            continue_on_error: true,
            refresh: true,
        }
    }

    /// Sets whether independent actions still run after a failure.
    #[must_use]
    pub const fn with_continue_on_error(mut self, continue_on_error: bool) -> Self {
        self.continue_on_error = continue_on_error;
        self
    }

    /// Sets whether managed resources are re-read before planning.
    #[must_use]
    pub const fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }

    fn lifecycle(&self) -> Lifecycle<'a> {
        Lifecycle::new(self.hosting, self.config.policy)
    }

    /// Loads the recorded state, or an empty one if nothing was saved yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub async fn load_state(&self) -> Result<ManagedState> {
        Ok(self.state_store.load().await?.unwrap_or_default())
    }

    /// Computes the plan without changing anything.
    ///
    /// The recorded state is refreshed in memory only.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read, a resource cannot be
    /// read back, or planning is refused.
    pub async fn plan(&self) -> Result<PlanPreview> {
        let mut state = self.load_state().await?;
        let refresh = if self.refresh {
            Some(self.refresh_state(&mut state).await?)
        } else {
            None
        };

        let changes = Planner::new(&self.config.policy).compute(self.config, &state)?;
        let config_hash = self.hasher.hash_config(self.config);
        let plan = ExecutionPlan::from_changes(&changes, self.config, &config_hash);
        Ok(PlanPreview {
            changes,
            plan,
            refresh,
        })
    }

    /// Converges the remote resources onto the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held, the state cannot be read or
    /// saved, or planning is refused. Failed actions are reported in the
    /// result instead.
    pub async fn apply(&self) -> Result<ReconciliationResult> {
        info!("Starting apply ({} declared resources)", self.config.resources().len());
        let lock = self.lock("apply").await?;
        let result = self.run(self.config, Operation::Apply).await;
        self.unlock(&lock).await;
        result
    }

    /// Deletes every managed resource.
    ///
    /// VMs go first, then the rest in reverse dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held or the state cannot be read or
    /// saved.
    pub async fn destroy(&self) -> Result<ReconciliationResult> {
        info!("Starting destroy");
        let nothing = DesiredConfig {
            policy: self.config.policy,
            ..DesiredConfig::default()
        };
        let lock = self.lock("destroy").await?;
        let result = self.run(&nothing, Operation::Destroy).await;
        self.unlock(&lock).await;
        result
    }

    /// Re-reads every managed resource and saves what was found.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is held, a read fails, or the state
    /// cannot be saved.
    pub async fn refresh(&self) -> Result<RefreshReport> {
        let lock = self.lock("refresh").await?;
        let result = self.refresh_and_save().await;
        self.unlock(&lock).await;
        result
    }

    async fn refresh_and_save(&self) -> Result<RefreshReport> {
        let mut state = self.load_state().await?;
        let report = self.refresh_state(&mut state).await?;
        let touched = report.drifted.iter().chain(&report.vanished).cloned().collect();
        let hash = state.config_hash.clone();
        state.add_history(HistoryEntry::new(Operation::Refresh, &hash, touched, None));
        self.state_store.save(&state).await?;
        Ok(report)
    }

    /// Checks for drift without applying changes or saving state.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read, a resource cannot be
    /// read back, or planning is refused.
    pub async fn check_drift(&self) -> Result<DriftReport> {
        info!("Checking for drift");
        let mut state = self.load_state().await?;
        let refresh = self.refresh_state(&mut state).await?;
        let changes = Planner::new(&self.config.policy).compute(self.config, &state)?;

        let pending_changes: Vec<String> = changes
            .actionable()
            .into_iter()
            .map(ToString::to_string)
            .collect();

        Ok(DriftReport {
            has_drift: !refresh.drifted.is_empty()
                || !refresh.vanished.is_empty()
                || !pending_changes.is_empty(),
            drifted_resources: refresh.drifted,
            vanished_resources: refresh.vanished,
            pending_changes,
            total_resources: self.config.resources().len(),
            managed_count: state.len(),
        })
    }

    /// Re-reads every record in `state`.
    ///
    /// A record whose resource is gone is dropped so the next plan creates
    /// it again. A record whose resource changed is flagged as drifted.
    async fn refresh_state(&self, state: &mut ManagedState) -> Result<RefreshReport> {
        let lifecycle = self.lifecycle();
        let records: Vec<(ResourceAddress, String)> = state
            .resources
            .values()
            .map(|r| (r.address.clone(), r.id.clone()))
            .collect();
        let mut report = RefreshReport::default();

        for (address, id) in records {
            report.checked += 1;
            match lifecycle.read(&address, &id).await? {
                Some(observation) => {
                    if let Some(record) = state.get_mut(&address) {
                        record.observe(observation);
                        if record.drifted {
                            debug!("{address} drifted");
                            report.drifted.push(address.to_string());
                        }
                    }
                }
                None => {
                    warn!("{address} ({id}) no longer exists, dropping it from state");
                    state.remove(&address);
                    report.vanished.push(address.to_string());
                }
            }
        }

        info!(
            "Refreshed {} resources: {} drifted, {} vanished",
            report.checked,
            report.drifted.len(),
            report.vanished.len()
        );
        Ok(report)
    }

    async fn run(&self, config: &DesiredConfig, operation: Operation) -> Result<ReconciliationResult> {
        let mut state = self.load_state().await?;
        if self.refresh {
            self.refresh_state(&mut state).await?;
        }

        let changes = Planner::new(&config.policy).compute(config, &state)?;
        let config_hash = self.hasher.hash_config(config);
        let plan = ExecutionPlan::from_changes(&changes, config, &config_hash);
        info!("Plan has {} actions", plan.action_count());

        let execution = PlanExecutor::new(self.lifecycle())
            .with_continue_on_error(self.continue_on_error)
            .with_operation(operation)
            .execute(&plan, &mut state)
            .await;

        self.state_store.save(&state).await?;
        Ok(ReconciliationResult::from_execution(&changes, &execution, state))
    }

    async fn lock(&self, operation: &str) -> Result<LockInfo> {
        let holder = generate_holder_id();
        let lock = self.state_store.acquire_lock(&holder, operation).await?;
        debug!("Holding state lock {} for {operation}", lock.lock_id);
        Ok(lock)
    }

    async fn unlock(&self, lock: &LockInfo) {
        if let Err(e) = self.state_store.release_lock(&lock.lock_id).await {
            warn!("Failed to release state lock {}: {e}", lock.lock_id);
        }
    }
}

impl ReconciliationResult {
    fn from_execution(changes: &ChangeSet, execution: &ExecutionResult, state: ManagedState) -> Self {
        let done = |action_type: ActionType| {
            execution
                .results
                .iter()
                .filter(|r| r.success && r.action.action_type == action_type)
                .count()
        };

        Self {
            success: execution.is_success(),
            created: done(ActionType::Create),
            updated: done(ActionType::Update),
            replaced: done(ActionType::Replace),
            deleted: done(ActionType::Delete),
            unchanged: changes.count(ChangeKind::NoChange),
            skipped: execution.skipped,
            errors: execution
                .results
                .iter()
                .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.action.address)))
                .collect(),
            warnings: execution.warnings().into_iter().map(String::from).collect(),
            final_state: Some(state),
        }
    }
}

impl DriftReport {
    /// Returns true if the state is converged (no drift).
    #[must_use]
    pub const fn is_converged(&self) -> bool {
        !self.has_drift
    }
}

impl fmt::Display for DriftReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.has_drift {
            return write!(f, "No drift detected - state is converged");
        }
        writeln!(f, "Drift detected:")?;
        for resource in &self.drifted_resources {
            writeln!(f, "  ~ {resource} changed remotely")?;
        }
        for resource in &self.vanished_resources {
            writeln!(f, "  - {resource} no longer exists")?;
        }
        for change in &self.pending_changes {
            writeln!(f, "  * {change}")?;
        }
        Ok(())
    }
}

impl fmt::Display for RefreshReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Refreshed {} resources: {} drifted, {} vanished",
            self.checked,
            self.drifted.len(),
            self.vanished.len()
        )
    }
}

impl fmt::Display for ReconciliationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.success { "successful" } else { "failed" };
        writeln!(f, "Reconciliation {status}:")?;
        writeln!(f, "  Created: {}", self.created)?;
        writeln!(f, "  Updated: {}", self.updated)?;
        writeln!(f, "  Replaced: {}", self.replaced)?;
        writeln!(f, "  Deleted: {}", self.deleted)?;
        writeln!(f, "  Unchanged: {}", self.unchanged)?;
        if self.skipped > 0 {
            writeln!(f, "  Skipped: {}", self.skipped)?;
        }

        if !self.warnings.is_empty() {
            writeln!(f, "  Warnings:")?;
            for warning in &self.warnings {
                writeln!(f, "    - {warning}")?;
            }
        }
        if !self.errors.is_empty() {
            writeln!(f, "  Errors:")?;
            for error in &self.errors {
                writeln!(f, "    - {error}")?;
            }
        }

        Ok(())
    }
}
