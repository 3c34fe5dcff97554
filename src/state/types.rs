//! Recorded state of managed resources.
//!
//! The state file maps each resource address to its remote identifier and
//! the configuration that was last applied to it. It is the only memory the
//! reconciler has between runs; everything else is re-read from the hosting
//! service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::{ResourceAddress, ResourceConfig, ResourceKind};
use crate::lifecycle::{IdLookup, Observation};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// Number of history entries kept.
const MAX_HISTORY: usize = 50;

/// Everything recorded about the managed resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedState {
    /// State format version.
    pub version: String,
    /// Hash of the last applied configuration.
    #[serde(default)]
    pub config_hash: String,
    /// Managed resources, keyed by address (`kind.name`).
    #[serde(default)]
    pub resources: BTreeMap<String, ManagedResource>,
    /// When the state was last modified.
    pub last_updated: DateTime<Utc>,
    /// Recent operations, oldest first.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// One managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedResource {
    /// Local address.
    pub address: ResourceAddress,
    /// Remote identifier.
    pub id: String,
    /// Configuration the remote resource is known to reflect.
    pub applied: ResourceConfig,
    /// Hash of `applied`.
    pub config_hash: String,
    /// Last remote record read.
    #[serde(default)]
    pub observed: Option<Observation>,
    /// The remote record changed outside of this tool since the last apply.
    #[serde(default)]
    pub drifted: bool,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the record was last changed.
    pub updated_at: DateTime<Utc>,
}

/// A recorded operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Kind of operation.
    pub operation: Operation,
    /// Configuration hash at the time.
    pub config_hash: String,
    /// Addresses touched.
    pub resources: Vec<String>,
    /// Whether every action succeeded.
    pub success: bool,
    /// Summary of failures.
    #[serde(default)]
    pub error: Option<String>,
}

/// Kinds of recorded operations.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Plan execution.
    Apply,
    /// Re-read of every managed resource.
    Refresh,
    /// Deletion of every managed resource.
    Destroy,
    /// Manual removal of a record.
    Forget,
}

impl ManagedState {
    /// Creates an empty state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            config_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Returns the record for an address.
    #[must_use]
    pub fn get(&self, address: &ResourceAddress) -> Option<&ManagedResource> {
        self.resources.get(&address.to_string())
    }

    /// Returns a mutable record for an address.
    pub fn get_mut(&mut self, address: &ResourceAddress) -> Option<&mut ManagedResource> {
        self.resources.get_mut(&address.to_string())
    }

    /// Inserts or replaces a record.
    pub fn set(&mut self, resource: ManagedResource) {
        self.resources.insert(resource.address.to_string(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a record.
    pub fn remove(&mut self, address: &ResourceAddress) -> Option<ManagedResource> {
        let removed = self.resources.remove(&address.to_string());
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Returns the records of one kind.
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &ManagedResource> {
        self.resources.values().filter(move |r| r.address.kind == kind)
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Returns true if nothing is managed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Returns the records flagged as drifted.
    #[must_use]
    pub fn drifted(&self) -> Vec<&ManagedResource> {
        self.resources.values().filter(|r| r.drifted).collect()
    }

    /// Appends a history entry, dropping the oldest past the limit.
    pub fn add_history(&mut self, entry: HistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }
}

impl Default for ManagedState {
    fn default() -> Self {
        Self::new()
    }
}

impl IdLookup for ManagedState {
    fn id_of(&self, address: &ResourceAddress) -> Option<String> {
        self.get(address).map(|r| r.id.clone())
    }
}

impl ManagedResource {
    /// Creates a record for a freshly created resource.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        applied: ResourceConfig,
        config_hash: impl Into<String>,
        observed: Option<Observation>,
    ) -> Self {
        let now = Utc::now();
        Self {
            address: applied.address(),
            id: id.into(),
            applied,
            config_hash: config_hash.into(),
            observed,
            drifted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Records a new applied configuration.
    pub fn apply(&mut self, applied: ResourceConfig, config_hash: String) {
        self.applied = applied;
        self.config_hash = config_hash;
        self.drifted = false;
        self.updated_at = Utc::now();
    }

    /// Records a fresh observation, flagging drift if the record changed.
    pub fn observe(&mut self, observed: Observation) {
        if self.observed.as_ref().is_some_and(|o| o.differs_from(&observed)) {
            self.drifted = true;
        }
        self.observed = Some(observed);
        self.updated_at = Utc::now();
    }
}

impl HistoryEntry {
    /// Creates a history entry.
    #[must_use]
    pub fn new(
        operation: Operation,
        config_hash: &str,
        resources: Vec<String>,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            operation,
            config_hash: config_hash.to_string(),
            resources,
            success: error.is_none(),
            error,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Apply => "apply",
            Self::Refresh => "refresh",
            Self::Destroy => "destroy",
            Self::Forget => "forget",
        };
        write!(f, "{op}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SshKeyConfig;
    use crate::hosting::SshKey;

    fn key_record() -> ManagedResource {
        let config = ResourceConfig::SshKey(SshKeyConfig {
            name: String::from("ops"),
            value: String::from("ssh-ed25519 AAAA ops"),
        });
        let observed = Observation::SshKey(SshKey {
            id: String::from("100"),
            name: String::from("ops"),
            value: String::from("ssh-ed25519 AAAA ops"),
            fingerprint: String::from("aa:bb"),
        });
        ManagedResource::new("100", config, "abc", Some(observed))
    }

    #[test]
    fn test_records_are_keyed_by_address() {
        let mut state = ManagedState::new();
        state.set(key_record());
        let address = ResourceAddress::new(ResourceKind::SshKey, "ops");

        assert_eq!(state.id_of(&address).as_deref(), Some("100"));
        assert_eq!(state.of_kind(ResourceKind::SshKey).count(), 1);
        assert_eq!(state.of_kind(ResourceKind::Vm).count(), 0);
        assert!(state.remove(&address).is_some());
        assert!(state.is_empty());
    }

    #[test]
    fn test_changed_observation_flags_drift() {
        let mut record = key_record();
        let Some(Observation::SshKey(mut key)) = record.observed.clone() else {
            panic!("expected a key observation");
        };
        record.observe(Observation::SshKey(key.clone()));
        assert!(!record.drifted);

        key.fingerprint = String::from("cc:dd");
        record.observe(Observation::SshKey(key));
        assert!(record.drifted);
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = ManagedState::new();
        for _ in 0..60 {
            state.add_history(HistoryEntry::new(Operation::Refresh, "h", Vec::new(), None));
        }
        assert_eq!(state.history.len(), 50);
    }
}
