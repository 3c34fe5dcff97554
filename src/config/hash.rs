//! Configuration hashing for change detection.
//!
//! Each declared resource is hashed on its own so the planner can tell
//! unchanged resources from changed ones without any remote call. Fields
//! with set semantics (attached IPs, SSH keys) are sorted first; the disk
//! list is positional and hashed in order.

use sha2::{Digest, Sha256};

use super::spec::{DesiredConfig, ResourceConfig};

/// Field separator, so adjacent fields cannot run into each other.
const SEP: &[u8] = &[0x1f];

/// Hasher for computing configuration hashes.
#[derive(Debug, Default)]
pub struct ConfigHasher;

fn field(hasher: &mut Sha256, value: impl AsRef<[u8]>) {
    hasher.update(value.as_ref());
    hasher.update(SEP);
}

fn optional(hasher: &mut Sha256, value: Option<&str>) {
    match value {
        Some(v) => {
            hasher.update([1u8]);
            field(hasher, v);
        }
        None => field(hasher, [0u8]),
    }
}

fn sorted(hasher: &mut Sha256, values: &[String]) {
    let mut values: Vec<&str> = values.iter().map(String::as_str).collect();
    values.sort_unstable();
    field(hasher, values.len().to_be_bytes());
    for v in values {
        field(hasher, v);
    }
}

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the whole configuration.
    #[must_use]
    pub fn hash_config(&self, config: &DesiredConfig) -> String {
        let mut hasher = Sha256::new();
        for resource in config.resources() {
            field(&mut hasher, resource.address().to_string());
            field(&mut hasher, self.hash_resource(&resource));
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceConfig) -> String {
        let mut hasher = Sha256::new();
        field(&mut hasher, resource.kind().as_str());

        match resource {
            ResourceConfig::SshKey(key) => {
                field(&mut hasher, &key.name);
                field(&mut hasher, &key.value);
            }
            ResourceConfig::Vlan(vlan) => {
                field(&mut hasher, &vlan.name);
                field(&mut hasher, vlan.remote_name());
                field(&mut hasher, &vlan.region);
                optional(&mut hasher, vlan.subnet.as_deref());
                optional(&mut hasher, vlan.gateway.as_deref());
            }
            ResourceConfig::Ip(ip) => {
                field(&mut hasher, &ip.name);
                field(&mut hasher, &ip.region);
                field(&mut hasher, [u8::from(ip.version)]);
            }
            ResourceConfig::PrivateIp(ip) => {
                field(&mut hasher, &ip.name);
                field(&mut hasher, &ip.region);
                field(&mut hasher, &ip.vlan);
                field(&mut hasher, &ip.ip);
            }
            ResourceConfig::Disk(disk) => {
                field(&mut hasher, &disk.name);
                field(&mut hasher, disk.remote_name());
                field(&mut hasher, &disk.region);
                optional(&mut hasher, disk.size_gb.map(|s| s.to_string()).as_deref());
                optional(&mut hasher, disk.image.as_deref());
                optional(&mut hasher, disk.source_disk.as_deref());
            }
            ResourceConfig::Vm(vm) => {
                field(&mut hasher, &vm.name);
                field(&mut hasher, vm.hostname());
                field(&mut hasher, &vm.region);
                field(&mut hasher, vm.memory_mb.to_be_bytes());
                field(&mut hasher, vm.cores.to_be_bytes());
                field(&mut hasher, vm.state.as_str());
                optional(&mut hasher, vm.farm.as_deref());
                field(&mut hasher, &vm.boot_disk);
                field(&mut hasher, vm.disks.len().to_be_bytes());
                for disk in &vm.disks {
                    field(&mut hasher, disk);
                }
                sorted(&mut hasher, &vm.ips);
                sorted(&mut hasher, &vm.ssh_keys);
                optional(&mut hasher, vm.login.as_ref().map(|l| l.login.as_str()));
                optional(&mut hasher, vm.login.as_ref().map(|l| l.password.as_str()));
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        // Use constant-time comparison to avoid timing attacks
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{DiskConfig, VmConfig};
    use crate::hosting::VmState;

    fn create_test_vm(name: &str) -> VmConfig {
        VmConfig {
            name: name.to_string(),
            hostname: None,
            region: String::from("FR-SD5"),
            memory_mb: 512,
            cores: 1,
            state: VmState::Running,
            farm: None,
            boot_disk: String::from("sys"),
            disks: vec![String::from("data-a"), String::from("data-b")],
            ips: vec![String::from("v4"), String::from("v6")],
            ssh_keys: vec![String::from("ops"), String::from("ci")],
            login: None,
        }
    }

    #[test]
    fn test_vm_hash_deterministic() {
        let hasher = ConfigHasher::new();
        let vm = ResourceConfig::Vm(create_test_vm("web"));

        assert_eq!(hasher.hash_resource(&vm), hasher.hash_resource(&vm));
    }

    #[test]
    fn test_different_vms_different_hash() {
        let hasher = ConfigHasher::new();
        let vm1 = ResourceConfig::Vm(create_test_vm("web-1"));
        let vm2 = ResourceConfig::Vm(create_test_vm("web-2"));

        assert_ne!(hasher.hash_resource(&vm1), hasher.hash_resource(&vm2));
    }

    #[test]
    fn test_ip_and_key_order_is_ignored() {
        let hasher = ConfigHasher::new();
        let vm = create_test_vm("web");
        let mut shuffled = vm.clone();
        shuffled.ips.reverse();
        shuffled.ssh_keys.reverse();

        assert_eq!(
            hasher.hash_resource(&ResourceConfig::Vm(vm)),
            hasher.hash_resource(&ResourceConfig::Vm(shuffled))
        );
    }

    #[test]
    fn test_disk_order_matters() {
        let hasher = ConfigHasher::new();
        let vm = create_test_vm("web");
        let mut reordered = vm.clone();
        reordered.disks.reverse();

        assert_ne!(
            hasher.hash_resource(&ResourceConfig::Vm(vm)),
            hasher.hash_resource(&ResourceConfig::Vm(reordered))
        );
    }

    #[test]
    fn test_unset_and_empty_differ() {
        let hasher = ConfigHasher::new();
        let disk = DiskConfig {
            name: String::from("data"),
            label: None,
            region: String::from("FR-SD5"),
            size_gb: None,
            image: None,
            source_disk: None,
        };
        let mut sized = disk.clone();
        sized.size_gb = Some(10);

        assert_ne!(
            hasher.hash_resource(&ResourceConfig::Disk(disk)),
            hasher.hash_resource(&ResourceConfig::Disk(sized))
        );
    }

    #[test]
    fn test_short_hash() {
        let hasher = ConfigHasher::new();
        let short = hasher.short_hash("abcdef1234567890abcdef1234567890");

        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(ConfigHasher::hashes_match("abc123", "abc123"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc124"));
        assert!(!ConfigHasher::hashes_match("abc123", "abc12"));
    }
}
