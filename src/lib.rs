// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(missing_docs, clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Hostwright
//!
//! Declarative, idempotent reconciliation of virtual machines, disks, IP
//! addresses, VLANs and SSH keys against a cloud hosting API.
//!
//! ## Overview
//!
//! You describe the resources you want in `hostwright.yaml`. Hostwright
//! records what it created in a local state file and, on every run, brings
//! the remote resources back in line with the file:
//!
//! - Attachments (disks and addresses on a VM) are diffed as sets and only
//!   the difference is attached or detached
//! - Fields that cannot change in place force a replacement; disks only grow
//! - Multi-step updates report exactly which groups committed
//! - Deletes probe for existence first, so deleting twice is harmless
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `hostwright.yaml`
//! 2. **Recorded State**: Remote identifiers and last applied settings
//! 3. **Reconciler**: Refreshes, plans, executes and saves
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing, validation and hashing
//! - [`hosting`]: Hosting API trait, HTTP client and sandbox
//! - [`lifecycle`]: Per-kind create, read, update and delete
//! - [`planner`]: Set diff, replacement policy, planning and execution
//! - [`state`]: Recorded state and its local store
//! - [`reconciler`]: Top-level apply, refresh, drift and destroy
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! ssh_keys:
//!   - name: ops
//!     value: ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 ops@example
//!
//! disks:
//!   - name: web-sys
//!     region: FR-SD5
//!     image: Debian 12 Bookworm
//!
//! ips:
//!   - name: web-v4
//!     region: FR-SD5
//!     version: 4
//!
//! vms:
//!   - name: web
//!     region: FR-SD5
//!     memory_mb: 1024
//!     boot_disk: web-sys
//!     ips: [web-v4]
//!     ssh_keys: [ops]
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod error;
pub mod hosting;
pub mod lifecycle;
pub mod planner;
pub mod reconciler;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, DesiredConfig};
pub use error::{HostwrightError, Result};
pub use hosting::{Hosting, HttpHosting, SandboxHosting};
pub use lifecycle::{ExistenceProber, Lifecycle};
pub use planner::{ExecutionPlan, PlanExecutor, Planner, SetDiff, diff};
pub use reconciler::{DriftReport, PlanPreview, ReconciliationResult, Reconciler, RefreshReport};
pub use state::{LocalStateStore, ManagedState, StateStore};
