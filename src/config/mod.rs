//! Configuration module for the Hostwright reconciliation system.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `hostwright.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{
    API_KEY_VAR, API_URL_VAR, ConfigParser, DEFAULT_CONFIG_FILES, LEGACY_API_KEY_VAR,
    find_config_file,
};
pub use spec::{
    DesiredConfig, DiskConfig, IpConfig, IpReplacement, PolicyConfig, PrivateIpConfig,
    ProviderConfig, ResourceAddress, ResourceConfig, ResourceKind, ShrinkPolicy, SshKeyConfig,
    StateConfig, UpdateStrategy, VlanConfig, VmConfig,
};
pub use validator::{
    ConfigValidator, MEMORY_GRANULARITY_MB, ValidationError, ValidationResult, is_valid_ssh_key,
};
