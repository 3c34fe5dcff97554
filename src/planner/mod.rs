//! Planning module.
//!
//! Holds the attachment set diff, the field replacement policy, and the
//! resource-level planner that turns configuration and recorded state into
//! an ordered execution plan.

mod changes;
mod executor;
mod plan;
mod policy;
mod set_diff;

pub use changes::{ChangeKind, ChangeSet, Planner, ResourceChange};
pub use executor::{ActionResult, ExecutionResult, PlanExecutor};
pub use plan::{ActionType, ExecutionPlan, PlannedAction};
pub use policy::{
    ChangeDecision, DiskField, Field, FieldChange, FieldPolicy, IpField, PrivateIpField,
    ReplacementPolicy, SshKeyField, VlanField, VmField, changed_fields, classify, ensure_growth,
};
pub use set_diff::{Identified, SetDiff, diff};
