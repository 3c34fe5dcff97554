//! SSH key lifecycle.
//!
//! Keys are looked up by name. A key whose name now resolves to another
//! identifier has been replaced out of band and is treated as absent.

use tracing::info;

use crate::config::SshKeyConfig;
use crate::error::Result;
use crate::hosting::{Hosting, SshKey};

use super::outcome::{CreateReport, Observation};
use super::probe::ExistenceProber;

/// Lifecycle operations for SSH keys.
#[derive(Clone, Copy)]
pub struct SshKeyReconciler<'a> {
    hosting: &'a dyn Hosting,
}

impl<'a> SshKeyReconciler<'a> {
    /// Creates an SSH key reconciler.
    #[must_use]
    pub const fn new(hosting: &'a dyn Hosting) -> Self {
        Self { hosting }
    }

    /// Registers a key.
    ///
    /// # Errors
    ///
    /// Returns the remote error, for instance if the name is taken.
    pub async fn create(&self, config: &SshKeyConfig) -> Result<CreateReport> {
        let key = self.hosting.create_key(&config.name, &config.value).await?;
        info!("Registered ssh key '{}' ({})", key.name, key.fingerprint);
        Ok(CreateReport {
            id: key.id.clone(),
            observed: Observation::SshKey(key),
            warnings: Vec::new(),
        })
    }

    /// Reads the key registered under `name` if it is still the one with `id`.
    ///
    /// # Errors
    ///
    /// Returns the remote error if the lookup fails.
    pub async fn read(&self, name: &str, id: &str) -> Result<Option<SshKey>> {
        let key = self
            .hosting
            .key_from_name(name)
            .await?
            .filter(|k| k.id == id);
        if key.is_none() {
            info!("SSH key '{name}' ({id}) not found, marking absent");
        }
        Ok(key)
    }

    /// Deletes a key. Absent keys are a no-op.
    ///
    /// # Errors
    ///
    /// Returns the remote error.
    pub async fn delete(&self, name: &str, id: &str) -> Result<()> {
        if !ExistenceProber::new(self.hosting).key_exists(name, id).await? {
            info!("SSH key '{name}' already absent, nothing to delete");
            return Ok(());
        }
        self.hosting.delete_key(id).await?;
        info!("Deleted ssh key '{name}'");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::SandboxHosting;

    fn ops() -> SshKeyConfig {
        SshKeyConfig {
            name: String::from("ops"),
            value: String::from("ssh-ed25519 AAAAC3NzaC1lZDI1NTE5 ops@example"),
        }
    }

    #[tokio::test]
    async fn test_create_read_delete() {
        let sandbox = SandboxHosting::new();
        let reconciler = SshKeyReconciler::new(&sandbox);

        let created = reconciler.create(&ops()).await.expect("create");
        assert!(reconciler.read("ops", &created.id).await.expect("read").is_some());

        reconciler.delete("ops", &created.id).await.expect("delete");
        assert!(reconciler.read("ops", &created.id).await.expect("read").is_none());
        reconciler.delete("ops", &created.id).await.expect("repeat delete");
    }

    #[tokio::test]
    async fn test_key_recreated_out_of_band_reads_as_absent() {
        let sandbox = SandboxHosting::new();
        let reconciler = SshKeyReconciler::new(&sandbox);
        let created = reconciler.create(&ops()).await.expect("create");
        sandbox.delete_key(&created.id).await.expect("external delete");
        sandbox.create_key("ops", "ssh-ed25519 AAAA other").await.expect("external create");

        assert!(reconciler.read("ops", &created.id).await.expect("read").is_none());
    }
}
