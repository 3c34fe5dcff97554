//! Resource spec builder.
//!
//! Turns a validated resource configuration plus its resolved references
//! into the creation spec sent to the hosting service. Specs are built fresh
//! for every creation.

use crate::config::{DiskConfig, VlanConfig, VmConfig};
use crate::hosting::{DiskSpec, VlanSpec, VmSpec};

use super::resolve::ResolvedVm;

/// Builds creation specs.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpecBuilder;

impl SpecBuilder {
    /// Builds a VM spec.
    #[must_use]
    pub fn vm(config: &VmConfig, resolved: &ResolvedVm) -> VmSpec {
        VmSpec {
            region_id: resolved.region_id.clone(),
            hostname: config.hostname().to_string(),
            memory_mb: config.memory_mb,
            cores: config.cores,
            farm: config.farm.clone(),
            ssh_key_ids: resolved.ssh_key_ids.clone(),
            login: config.login.clone(),
        }
    }

    /// Builds a disk spec.
    #[must_use]
    pub fn disk(config: &DiskConfig, region_id: &str) -> DiskSpec {
        DiskSpec {
            region_id: region_id.to_string(),
            name: config.remote_name().to_string(),
            size_gb: config.size_gb,
            disk_type: None,
        }
    }

    /// Builds a VLAN spec.
    #[must_use]
    pub fn vlan(config: &VlanConfig, region_id: &str) -> VlanSpec {
        VlanSpec {
            region_id: region_id.to_string(),
            name: config.remote_name().to_string(),
            subnet: config.subnet.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosting::{Login, VmState};

    #[test]
    fn test_vm_spec_uses_hostname_and_resolved_keys() {
        let config = VmConfig {
            name: String::from("web"),
            hostname: Some(String::from("web01")),
            region: String::from("FR-SD2"),
            memory_mb: 1024,
            cores: 2,
            state: VmState::Running,
            farm: Some(String::from("prod")),
            boot_disk: String::from("web-sys"),
            disks: vec![],
            ips: vec![String::from("web-v4")],
            ssh_keys: vec![String::from("ops")],
            login: Some(Login {
                login: String::from("admin"),
                password: String::from("s3cret-pass"),
            }),
        };
        let resolved = ResolvedVm {
            region_id: String::from("1"),
            boot_disk_id: String::from("101"),
            disk_ids: vec![],
            ip_ids: vec![String::from("102")],
            ssh_key_ids: vec![String::from("100")],
        };

        let spec = SpecBuilder::vm(&config, &resolved);
        assert_eq!(spec.hostname, "web01");
        assert_eq!(spec.region_id, "1");
        assert_eq!(spec.ssh_key_ids, vec!["100"]);
        assert_eq!(spec.farm.as_deref(), Some("prod"));
        assert!(spec.login.is_some());
    }

    #[test]
    fn test_disk_spec_uses_remote_name() {
        let config = DiskConfig {
            name: String::from("data"),
            label: Some(String::from("data-01")),
            region: String::from("FR-SD2"),
            size_gb: Some(50),
            image: None,
            source_disk: None,
        };
        let spec = SpecBuilder::disk(&config, "1");
        assert_eq!(spec.name, "data-01");
        assert_eq!(spec.size_gb, Some(50));
    }
}
