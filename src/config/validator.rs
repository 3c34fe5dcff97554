//! Configuration validation for desired-state files.
//!
//! Every schema constraint is checked here, before any remote call is made:
//! name patterns, SSH key format, memory granularity, disk sources, VM
//! authentication and attachment lists.

use regex::Regex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::LazyLock;
use tracing::debug;

use crate::error::{ConfigError, HostwrightError, Result};

use super::spec::{DesiredConfig, DiskConfig, PrivateIpConfig, VlanConfig, VmConfig};

/// Memory must be allocated in multiples of this many MB.
pub const MEMORY_GRANULARITY_MB: u64 = 64;

static DISK_NAME_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[-_0-9a-z]{1,15}$"));

static SSH_KEY_PATTERN: LazyLock<std::result::Result<Regex, regex::Error>> =
    LazyLock::new(|| {
        Regex::new(r"^(?:ssh-(?:rsa|dss|ed25519)|ecdsa-\S+) [A-Za-z0-9/+=]+(?: (\S+))?$")
    });

fn pattern_matches(
    pattern: &LazyLock<std::result::Result<Regex, regex::Error>>,
    value: &str,
) -> bool {
    (**pattern).as_ref().is_ok_and(|re| re.is_match(value))
}

/// Validator for desired-state configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a desired-state configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any constraint is violated.
    pub fn validate(&self, config: &DesiredConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(HostwrightError::Config(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }));
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &DesiredConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_unique_names(config, &mut result);

        for (i, key) in config.ssh_keys.iter().enumerate() {
            if key.name.trim().is_empty() {
                result.error(format!("ssh_keys[{i}].name"), "SSH key name cannot be empty");
            }
            if !pattern_matches(&SSH_KEY_PATTERN, &key.value) {
                result.error(
                    format!("ssh_keys[{i}].value"),
                    format!("SSH key '{}' is not a valid public key", key.name),
                );
            }
        }

        for (i, vlan) in config.vlans.iter().enumerate() {
            Self::validate_vlan(i, vlan, &mut result);
        }

        for (i, ip) in config.ips.iter().enumerate() {
            if !is_valid_name(&ip.name) {
                result.error(format!("ips[{i}].name"), invalid_name_message(&ip.name));
            }
            require_region(&format!("ips[{i}]"), &ip.region, &mut result);
        }

        for (i, private_ip) in config.private_ips.iter().enumerate() {
            Self::validate_private_ip(config, i, private_ip, &mut result);
        }

        for (i, disk) in config.disks.iter().enumerate() {
            Self::validate_disk(config, i, disk, &mut result);
        }

        for (i, vm) in config.vms.iter().enumerate() {
            Self::validate_vm(config, i, vm, &mut result);
        }

        result
    }

    /// Names must be unique per kind; IP labels share one namespace since
    /// VMs reference public and private addresses alike.
    fn validate_unique_names(config: &DesiredConfig, result: &mut ValidationResult) {
        fn check<'a>(
            kind: &str,
            names: impl Iterator<Item = &'a str>,
            result: &mut ValidationResult,
        ) {
            let mut seen = HashSet::new();
            for name in names {
                if !seen.insert(name) {
                    let err = ConfigError::DuplicateName {
                        resource_type: kind.to_string(),
                        name: name.to_string(),
                    };
                    result.error(kind, err.to_string());
                }
            }
        }

        check("ssh_key", config.ssh_keys.iter().map(|c| c.name.as_str()), result);
        check("vlan", config.vlans.iter().map(|c| c.name.as_str()), result);
        check(
            "ip",
            config
                .ips
                .iter()
                .map(|c| c.name.as_str())
                .chain(config.private_ips.iter().map(|c| c.name.as_str())),
            result,
        );
        check("disk", config.disks.iter().map(|c| c.name.as_str()), result);
        check("vm", config.vms.iter().map(|c| c.name.as_str()), result);
    }

    fn validate_vlan(i: usize, vlan: &VlanConfig, result: &mut ValidationResult) {
        let path = format!("vlans[{i}]");
        if !is_valid_name(&vlan.name) {
            result.error(format!("{path}.name"), invalid_name_message(&vlan.name));
        }
        require_region(&path, &vlan.region, result);

        if let Some(subnet) = &vlan.subnet {
            let valid = subnet
                .split_once('/')
                .is_some_and(|(net, len)| net.parse::<IpAddr>().is_ok() && len.parse::<u8>().is_ok());
            if !valid {
                result.error(
                    format!("{path}.subnet"),
                    format!("Subnet '{subnet}' must be in CIDR notation"),
                );
            }
        }
        if let Some(gateway) = &vlan.gateway {
            if gateway.parse::<IpAddr>().is_err() {
                result.error(
                    format!("{path}.gateway"),
                    format!("Gateway '{gateway}' is not an IP address"),
                );
            }
        }
    }

    fn validate_private_ip(
        config: &DesiredConfig,
        i: usize,
        private_ip: &PrivateIpConfig,
        result: &mut ValidationResult,
    ) {
        let path = format!("private_ips[{i}]");
        if !is_valid_name(&private_ip.name) {
            result.error(format!("{path}.name"), invalid_name_message(&private_ip.name));
        }
        require_region(&path, &private_ip.region, result);
        if private_ip.ip.parse::<IpAddr>().is_err() {
            result.error(
                format!("{path}.ip"),
                format!("'{}' is not an IP address", private_ip.ip),
            );
        }
        if private_ip.vlan.is_empty() {
            result.error(format!("{path}.vlan"), "A VLAN is required");
        } else if !config.vlans.iter().any(|v| v.name == private_ip.vlan) {
            result.warnings.push(format!(
                "{path}.vlan: '{}' is not declared here and must already exist",
                private_ip.vlan
            ));
        }
    }

    fn validate_disk(
        config: &DesiredConfig,
        i: usize,
        disk: &DiskConfig,
        result: &mut ValidationResult,
    ) {
        let path = format!("disks[{i}]");
        if !pattern_matches(&DISK_NAME_PATTERN, disk.remote_name()) {
            result.error(
                format!("{path}.name"),
                format!(
                    "Disk name '{}' is invalid. Must be 1 to 15 characters of a-z, 0-9, '-' or '_'.",
                    disk.remote_name()
                ),
            );
        }
        require_region(&path, &disk.region, result);

        if disk.size_gb == Some(0) {
            result.error(format!("{path}.size_gb"), "Disk size must be at least 1 GB");
        }

        match (&disk.image, &disk.source_disk) {
            (Some(_), Some(_)) => result.error(
                format!("{path}.source_disk"),
                format!("Disk '{}' sets both image and source_disk", disk.name),
            ),
            (None, Some(source)) if source == &disk.name => result.error(
                format!("{path}.source_disk"),
                format!("Disk '{}' cannot be cloned from itself", disk.name),
            ),
            (None, Some(source)) if !config.disks.iter().any(|d| &d.name == source) => {
                result.warnings.push(format!(
                    "{path}.source_disk: '{source}' is not declared here and must already exist"
                ));
            }
            _ => {}
        }
    }

    fn validate_vm(config: &DesiredConfig, i: usize, vm: &VmConfig, result: &mut ValidationResult) {
        let path = format!("vms[{i}]");
        if !is_valid_name(&vm.name) {
            result.error(format!("{path}.name"), invalid_name_message(&vm.name));
        }
        if vm.hostname().is_empty() || vm.hostname().len() > 63 {
            result.error(
                format!("{path}.hostname"),
                "Hostname must be between 1 and 63 characters",
            );
        }
        require_region(&path, &vm.region, result);

        if vm.memory_mb == 0 || vm.memory_mb % MEMORY_GRANULARITY_MB != 0 {
            result.error(
                format!("{path}.memory_mb"),
                format!(
                    "Memory must be a positive multiple of {MEMORY_GRANULARITY_MB} MB, got {}",
                    vm.memory_mb
                ),
            );
        }
        if vm.cores == 0 {
            result.error(format!("{path}.cores"), "A VM needs at least one core");
        }

        if vm.ssh_keys.is_empty() && vm.login.is_none() {
            result.error(
                format!("{path}.ssh_keys"),
                format!("VM '{}' needs SSH keys or a login", vm.name),
            );
        }
        if let Some(login) = &vm.login {
            if login.login.is_empty() || login.password.is_empty() {
                result.error(
                    format!("{path}.login"),
                    "Login and password must both be set",
                );
            }
        }

        if vm.boot_disk.is_empty() {
            result.error(format!("{path}.boot_disk"), "A boot disk is required");
        }
        if vm.ips.is_empty() {
            result.error(format!("{path}.ips"), "A VM needs at least one IP address");
        }

        let mut disks = HashSet::new();
        for disk in std::iter::once(&vm.boot_disk).chain(&vm.disks) {
            if !disks.insert(disk) {
                result.error(
                    format!("{path}.disks"),
                    format!("Disk '{disk}' is attached more than once"),
                );
            }
            if !config.disks.iter().any(|d| &d.name == disk) {
                result
                    .warnings
                    .push(format!("{path}: disk '{disk}' is not declared here and must already exist"));
            }
        }

        let mut ips = HashSet::new();
        for ip in &vm.ips {
            if !ips.insert(ip) {
                result.error(
                    format!("{path}.ips"),
                    format!("IP '{ip}' is attached more than once"),
                );
            }
            if config.ip_address_of(ip).is_none() {
                result
                    .warnings
                    .push(format!("{path}: IP '{ip}' is not declared here and is used as an ID"));
            }
        }

        for key in &vm.ssh_keys {
            if !config.ssh_keys.iter().any(|k| &k.name == key) {
                result
                    .warnings
                    .push(format!("{path}: SSH key '{key}' is not declared here and must already exist"));
            }
        }
    }
}

fn require_region(path: &str, region: &str, result: &mut ValidationResult) {
    if region.trim().is_empty() {
        result.error(format!("{path}.region"), "Region cannot be empty");
    }
}

fn invalid_name_message(name: &str) -> String {
    format!("Name '{name}' is invalid. Must be lowercase alphanumeric with hyphens.")
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();

    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }

    if !chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-') {
        return false;
    }

    !name.ends_with('-') && !name.contains("--")
}

/// Checks an SSH public key against the accepted formats.
#[must_use]
pub fn is_valid_ssh_key(value: &str) -> bool {
    pattern_matches(&SSH_KEY_PATTERN, value)
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::{IpConfig, SshKeyConfig};
    use crate::hosting::{IpVersion, Login, VmState};

    fn vm(name: &str) -> VmConfig {
        VmConfig {
            name: name.to_string(),
            hostname: None,
            region: "FR-SD5".to_string(),
            memory_mb: 1024,
            cores: 2,
            state: VmState::Running,
            farm: None,
            boot_disk: "sys".to_string(),
            disks: Vec::new(),
            ips: vec!["v4".to_string()],
            ssh_keys: vec!["ops".to_string()],
            login: None,
        }
    }

    fn disk(name: &str) -> DiskConfig {
        DiskConfig {
            name: name.to_string(),
            label: None,
            region: "FR-SD5".to_string(),
            size_gb: Some(10),
            image: None,
            source_disk: None,
        }
    }

    fn valid_config() -> DesiredConfig {
        DesiredConfig {
            ssh_keys: vec![SshKeyConfig {
                name: "ops".to_string(),
                value: "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIB ops@example".to_string(),
            }],
            ips: vec![IpConfig {
                name: "v4".to_string(),
                region: "FR-SD5".to_string(),
                version: IpVersion::V4,
            }],
            disks: vec![disk("sys")],
            vms: vec![vm("web")],
            ..DesiredConfig::default()
        }
    }

    fn error_fields(config: &DesiredConfig) -> Vec<String> {
        ConfigValidator::new()
            .check(config)
            .errors
            .into_iter()
            .map(|e| e.field)
            .collect()
    }

    #[test]
    fn test_valid_config_passes() {
        let result = ConfigValidator::new()
            .validate(&valid_config())
            .expect("config should be valid");
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web-1"));
        assert!(is_valid_name("a"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Web"));
        assert!(!is_valid_name("1web"));
        assert!(!is_valid_name("web-"));
        assert!(!is_valid_name("web--1"));
    }

    #[test]
    fn test_disk_name_pattern() {
        let mut config = valid_config();
        config.disks[0].name = "sys_disk-01".to_string();
        config.vms[0].boot_disk = "sys_disk-01".to_string();
        assert!(error_fields(&config).is_empty());

        config.disks[0].name = "this-name-is-too-long".to_string();
        assert_eq!(error_fields(&config), vec!["disks[0].name"]);

        config.disks[0].name = "Upper".to_string();
        assert_eq!(error_fields(&config), vec!["disks[0].name"]);
    }

    #[test]
    fn test_ssh_key_format() {
        assert!(is_valid_ssh_key("ssh-rsa AAAAB3NzaC1yc2E= user@host"));
        assert!(is_valid_ssh_key("ecdsa-sha2-nistp256 AAAAE2VjZHNh"));
        assert!(!is_valid_ssh_key("ssh-foo AAAA"));
        assert!(!is_valid_ssh_key("AAAAB3NzaC1yc2E"));

        let mut config = valid_config();
        config.ssh_keys[0].value = "not a key".to_string();
        assert_eq!(error_fields(&config), vec!["ssh_keys[0].value"]);
    }

    #[test]
    fn test_memory_granularity() {
        let mut config = valid_config();
        config.vms[0].memory_mb = 1000;
        assert_eq!(error_fields(&config), vec!["vms[0].memory_mb"]);

        config.vms[0].memory_mb = 0;
        assert_eq!(error_fields(&config), vec!["vms[0].memory_mb"]);

        config.vms[0].memory_mb = 256;
        assert!(error_fields(&config).is_empty());
    }

    #[test]
    fn test_disk_source_conflict() {
        let mut config = valid_config();
        config.disks[0].image = Some("Debian 9".to_string());
        config.disks[0].source_disk = Some("base".to_string());
        assert_eq!(error_fields(&config), vec!["disks[0].source_disk"]);
    }

    #[test]
    fn test_vm_auth_required() {
        let mut config = valid_config();
        config.vms[0].ssh_keys.clear();
        assert_eq!(error_fields(&config), vec!["vms[0].ssh_keys"]);

        config.vms[0].login = Some(Login {
            login: "admin".to_string(),
            password: "correct horse".to_string(),
        });
        assert!(error_fields(&config).is_empty());
    }

    #[test]
    fn test_vm_needs_an_ip() {
        let mut config = valid_config();
        config.vms[0].ips.clear();
        assert_eq!(error_fields(&config), vec!["vms[0].ips"]);
    }

    #[test]
    fn test_boot_disk_listed_twice() {
        let mut config = valid_config();
        config.vms[0].disks.push("sys".to_string());
        assert_eq!(error_fields(&config), vec!["vms[0].disks"]);
    }

    #[test]
    fn test_duplicate_names() {
        let mut config = valid_config();
        config.vms.push(vm("web"));
        let result = ConfigValidator::new().validate(&config);
        assert!(matches!(
            result,
            Err(HostwrightError::Config(ConfigError::ValidationError { .. }))
        ));
    }

    #[test]
    fn test_undeclared_references_warn() {
        let mut config = valid_config();
        config.vms[0].ips.push("203.0.113.7".to_string());
        config.vms[0].disks.push("legacy".to_string());

        let result = ConfigValidator::new()
            .validate(&config)
            .expect("references to remote resources are allowed");
        assert_eq!(result.warning_count(), 2);
    }
}
