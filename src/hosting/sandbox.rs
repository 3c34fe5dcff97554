//! In-memory hosting backend.
//!
//! `SandboxHosting` behaves like the remote service closely enough to
//! rehearse a configuration without an account: it allocates identifiers,
//! tracks attachments, refuses to delete attached resources, and cascades
//! VM deletion onto whatever is still attached. Every call is recorded and
//! individual calls can be made to fail.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tokio::fs;
use tracing::{debug, info};

use crate::error::{HostingError, HostwrightError, Result, StateError};

use super::Hosting;
use super::types::{
    Disk, DiskSpec, Image, IpAddress, IpVersion, Region, ResourceFilter, SshKey, Vlan, VlanSpec,
    Vm, VmSpec,
};

/// Size given to blank disks created without an explicit size.
const DEFAULT_DISK_SIZE_GB: u64 = 10;

/// First identifier handed out by a fresh sandbox.
const FIRST_ID: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VmRecord {
    id: String,
    hostname: String,
    region_id: String,
    farm: Option<String>,
    memory_mb: u64,
    cores: u32,
    state: String,
    disk_ids: Vec<String>,
    ip_ids: Vec<String>,
    ssh_key_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct World {
    next_id: u64,
    regions: Vec<Region>,
    images: Vec<Image>,
    disks: Vec<Disk>,
    ips: Vec<IpAddress>,
    vms: Vec<VmRecord>,
    vlans: Vec<Vlan>,
    keys: Vec<SshKey>,
}

impl World {
    fn seeded() -> Self {
        let regions = vec![
            region("1", "FR-SD2", "France"),
            region("2", "LU-BI1", "Luxembourg"),
            region("3", "FR-SD3", "France"),
        ];
        let images = regions
            .iter()
            .flat_map(|r| {
                [
                    image(&r.id, "Debian 9 64 bits (HVM)", "debian9", 3),
                    image(&r.id, "Ubuntu 18.04 64 bits LTS (HVM)", "ubuntu1804", 3),
                ]
            })
            .collect();

        Self {
            next_id: FIRST_ID,
            regions,
            images,
            disks: Vec::new(),
            ips: Vec::new(),
            vms: Vec::new(),
            vlans: Vec::new(),
            keys: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> String {
        let id = self.next_id;
        self.next_id += 1;
        id.to_string()
    }

    fn require_region(&self, region_id: &str) -> Result<()> {
        if self.regions.iter().any(|r| r.id == region_id) {
            Ok(())
        } else {
            Err(HostingError::unknown("region", region_id).into())
        }
    }

    fn disk_mut(&mut self, disk_id: &str) -> Result<&mut Disk> {
        self.disks
            .iter_mut()
            .find(|d| d.id == disk_id)
            .ok_or_else(|| HostingError::unknown("disk", disk_id).into())
    }

    fn ip_mut(&mut self, ip_id: &str) -> Result<&mut IpAddress> {
        self.ips
            .iter_mut()
            .find(|i| i.id == ip_id)
            .ok_or_else(|| HostingError::unknown("ip", ip_id).into())
    }

    fn vm_mut(&mut self, vm_id: &str) -> Result<&mut VmRecord> {
        self.vms
            .iter_mut()
            .find(|v| v.id == vm_id)
            .ok_or_else(|| HostingError::unknown("vm", vm_id).into())
    }

    fn vlan_mut(&mut self, vlan_id: &str) -> Result<&mut Vlan> {
        self.vlans
            .iter_mut()
            .find(|v| v.id == vlan_id)
            .ok_or_else(|| HostingError::unknown("vlan", vlan_id).into())
    }

    fn disk(&self, disk_id: &str) -> Result<Disk> {
        self.disks
            .iter()
            .find(|d| d.id == disk_id)
            .cloned()
            .ok_or_else(|| HostingError::unknown("disk", disk_id).into())
    }

    fn ip(&self, ip_id: &str) -> Result<IpAddress> {
        self.ips
            .iter()
            .find(|i| i.id == ip_id)
            .cloned()
            .ok_or_else(|| HostingError::unknown("ip", ip_id).into())
    }

    /// Builds the client-facing view of a VM with its current attachments.
    fn materialize(&self, record: &VmRecord) -> Vm {
        Vm {
            id: record.id.clone(),
            hostname: record.hostname.clone(),
            region_id: record.region_id.clone(),
            farm: record.farm.clone(),
            memory_mb: record.memory_mb,
            cores: record.cores,
            state: record.state.clone(),
            disks: record
                .disk_ids
                .iter()
                .filter_map(|id| self.disks.iter().find(|d| &d.id == id).cloned())
                .collect(),
            ips: record
                .ip_ids
                .iter()
                .filter_map(|id| self.ips.iter().find(|i| &i.id == id).cloned())
                .collect(),
            ssh_key_ids: record.ssh_key_ids.clone(),
        }
    }

    fn vm(&self, vm_id: &str) -> Result<Vm> {
        self.vms
            .iter()
            .find(|v| v.id == vm_id)
            .map(|record| self.materialize(record))
            .ok_or_else(|| HostingError::unknown("vm", vm_id).into())
    }

    /// Inserts a disk into a VM's ordered disk list.
    fn plug_disk(&mut self, vm_id: &str, disk_id: &str, position: Option<usize>) -> Result<()> {
        let disk = self.disk(disk_id)?;
        if !disk.vm_ids.is_empty() {
            return Err(fault(
                "attach_disk",
                format!("disk {disk_id} is already attached"),
            ));
        }
        let vm = self.vm_mut(vm_id)?;
        if vm.region_id != disk.region_id {
            return Err(fault("attach_disk", "disk and VM are in different regions"));
        }
        let slot = position.map_or(vm.disk_ids.len(), |p| p.min(vm.disk_ids.len()));
        vm.disk_ids.insert(slot, disk_id.to_string());
        self.disk_mut(disk_id)?.vm_ids.push(vm_id.to_string());
        Ok(())
    }

    fn plug_ip(&mut self, vm_id: &str, ip_id: &str) -> Result<()> {
        let ip = self.ip(ip_id)?;
        if ip.vm_id.is_some() {
            return Err(fault("attach_ip", format!("ip {ip_id} is already attached")));
        }
        let vm = self.vm_mut(vm_id)?;
        if vm.region_id != ip.region_id {
            return Err(fault("attach_ip", "ip and VM are in different regions"));
        }
        vm.ip_ids.push(ip_id.to_string());
        self.ip_mut(ip_id)?.vm_id = Some(vm_id.to_string());
        Ok(())
    }
}

fn region(id: &str, code: &str, country: &str) -> Region {
    Region {
        id: id.to_string(),
        code: code.to_string(),
        country: country.to_string(),
    }
}

fn image(region_id: &str, name: &str, slug: &str, size_gb: u64) -> Image {
    Image {
        id: format!("img-{slug}-{region_id}"),
        name: name.to_string(),
        disk_id: format!("src-{slug}-{region_id}"),
        size_gb,
        region_id: region_id.to_string(),
    }
}

fn fault(method: &str, message: impl Into<String>) -> HostwrightError {
    HostingError::Fault {
        method: method.to_string(),
        code: 500_100,
        message: message.into(),
    }
    .into()
}

/// In-memory implementation of [`Hosting`].
#[derive(Debug)]
pub struct SandboxHosting {
    /// Simulated remote objects.
    world: Mutex<World>,
    /// Every call issued, in order.
    calls: Mutex<Vec<String>>,
    /// Calls (full label or method name) that must fail.
    failures: Mutex<HashSet<String>>,
    /// File the world is persisted to, if any.
    path: Option<PathBuf>,
}

impl Default for SandboxHosting {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxHosting {
    /// Creates a sandbox seeded with regions and images.
    #[must_use]
    pub fn new() -> Self {
        Self::from_world(World::seeded(), None)
    }

    fn from_world(world: World, path: Option<PathBuf>) -> Self {
        Self {
            world: Mutex::new(world),
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            path,
        }
    }

    /// Opens a sandbox persisted at `path`, seeding a fresh one if the file
    /// does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("Starting a fresh sandbox at {}", path.display());
            return Ok(Self::from_world(World::seeded(), Some(path.to_path_buf())));
        }

        let content = fs::read_to_string(path).await?;
        let world: World = serde_json::from_str(&content).map_err(|e| {
            HostwrightError::State(StateError::Corrupted {
                message: format!("Failed to parse sandbox file {}: {e}", path.display()),
            })
        })?;
        debug!("Loaded sandbox from {}", path.display());
        Ok(Self::from_world(world, Some(path.to_path_buf())))
    }

    /// Writes the simulated objects back to the file given to [`Self::open`].
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = {
            let world = self.world()?;
            serde_json::to_string_pretty(&*world)
                .map_err(|e| StateError::serialization(format!("Failed to serialize sandbox: {e}")))?
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, content).await?;
        debug!("Persisted sandbox to {}", path.display());
        Ok(())
    }

    /// Makes every matching call fail with a remote fault.
    ///
    /// `call` is either a method name (`detach_disk`) or a full call label
    /// as returned by [`Self::calls`] (`detach_disk(101, 102)`).
    pub fn fail_on(&self, call: impl Into<String>) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(call.into());
        }
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.clear();
        }
    }

    /// Returns the labels of every call issued so far.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    fn world(&self) -> Result<MutexGuard<'_, World>> {
        self.world
            .lock()
            .map_err(|_| HostwrightError::internal("sandbox state poisoned"))
    }

    /// Records a call and applies failure injection.
    fn record(&self, method: &str, args: &[&str]) -> Result<()> {
        let label = format!("{method}({})", args.join(", "));
        debug!("sandbox call: {label}");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(label.clone());
        }
        let should_fail = self
            .failures
            .lock()
            .map(|f| f.contains(method) || f.contains(&label))
            .unwrap_or(false);
        if should_fail {
            return Err(fault(method, format!("injected failure for {label}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Hosting for SandboxHosting {
    async fn create_disk(&self, spec: &DiskSpec) -> Result<Disk> {
        self.record("create_disk", &[&spec.name])?;
        let mut world = self.world()?;
        world.require_region(&spec.region_id)?;
        let disk = Disk {
            id: world.allocate_id(),
            name: spec.name.clone(),
            size_gb: spec.size_gb.unwrap_or(DEFAULT_DISK_SIZE_GB),
            disk_type: spec.disk_type.clone().unwrap_or_else(|| "data".to_string()),
            state: "created".to_string(),
            region_id: spec.region_id.clone(),
            vm_ids: Vec::new(),
        };
        world.disks.push(disk.clone());
        Ok(disk)
    }

    async fn create_disk_from(&self, spec: &DiskSpec, source_disk_id: &str) -> Result<Disk> {
        self.record("create_disk_from", &[&spec.name, source_disk_id])?;
        let mut world = self.world()?;
        world.require_region(&spec.region_id)?;
        let source_size = world
            .images
            .iter()
            .find(|i| i.disk_id == source_disk_id)
            .map(|i| i.size_gb)
            .or_else(|| {
                world
                    .disks
                    .iter()
                    .find(|d| d.id == source_disk_id)
                    .map(|d| d.size_gb)
            })
            .ok_or_else(|| HostingError::unknown("disk", source_disk_id))?;
        let size_gb = spec.size_gb.unwrap_or(source_size);
        if size_gb < source_size {
            return Err(fault(
                "create_disk_from",
                format!("size {size_gb} GB is smaller than source ({source_size} GB)"),
            ));
        }
        let disk = Disk {
            id: world.allocate_id(),
            name: spec.name.clone(),
            size_gb,
            disk_type: spec.disk_type.clone().unwrap_or_else(|| "data".to_string()),
            state: "created".to_string(),
            region_id: spec.region_id.clone(),
            vm_ids: Vec::new(),
        };
        world.disks.push(disk.clone());
        Ok(disk)
    }

    async fn list_disks(&self, filter: &ResourceFilter) -> Result<Vec<Disk>> {
        self.record("list_disks", &[])?;
        let world = self.world()?;
        Ok(world
            .disks
            .iter()
            .filter(|d| filter.matches(&d.id, &d.name, &d.region_id))
            .filter(|d| filter.vm_id.as_ref().is_none_or(|vm| d.vm_ids.contains(vm)))
            .cloned()
            .collect())
    }

    async fn rename_disk(&self, disk_id: &str, name: &str) -> Result<Disk> {
        self.record("rename_disk", &[disk_id, name])?;
        let mut world = self.world()?;
        let disk = world.disk_mut(disk_id)?;
        disk.name = name.to_string();
        Ok(disk.clone())
    }

    async fn extend_disk(&self, disk_id: &str, delta_gb: u64) -> Result<Disk> {
        self.record("extend_disk", &[disk_id, &delta_gb.to_string()])?;
        let mut world = self.world()?;
        let disk = world.disk_mut(disk_id)?;
        disk.size_gb += delta_gb;
        Ok(disk.clone())
    }

    async fn delete_disk(&self, disk_id: &str) -> Result<()> {
        self.record("delete_disk", &[disk_id])?;
        let mut world = self.world()?;
        let disk = world.disk(disk_id)?;
        if !disk.vm_ids.is_empty() {
            return Err(fault("delete_disk", format!("disk {disk_id} is attached")));
        }
        world.disks.retain(|d| d.id != disk_id);
        Ok(())
    }

    async fn disk_from_name(&self, name: &str) -> Result<Option<Disk>> {
        self.record("disk_from_name", &[name])?;
        let world = self.world()?;
        Ok(world.disks.iter().find(|d| d.name == name).cloned())
    }

    async fn create_ip(&self, region_id: &str, version: IpVersion) -> Result<IpAddress> {
        self.record("create_ip", &[region_id, &version.to_string()])?;
        let mut world = self.world()?;
        world.require_region(region_id)?;
        let id = world.allocate_id();
        let serial = world.next_id;
        let literal = match version {
            IpVersion::V4 => format!("192.0.{}.{}", serial / 256 % 256, serial % 256),
            IpVersion::V6 => format!("2001:db8::{serial:x}"),
        };
        let ip = IpAddress {
            id,
            ip: literal,
            version,
            region_id: region_id.to_string(),
            vm_id: None,
            vlan_id: None,
            state: "created".to_string(),
        };
        world.ips.push(ip.clone());
        Ok(ip)
    }

    async fn list_ips(&self, filter: &ResourceFilter) -> Result<Vec<IpAddress>> {
        self.record("list_ips", &[])?;
        let world = self.world()?;
        Ok(world
            .ips
            .iter()
            .filter(|i| filter.matches(&i.id, &i.ip, &i.region_id))
            .filter(|i| filter.vm_id.is_none() || i.vm_id == filter.vm_id)
            .cloned()
            .collect())
    }

    async fn delete_ip(&self, ip_id: &str) -> Result<()> {
        self.record("delete_ip", &[ip_id])?;
        let mut world = self.world()?;
        let ip = world.ip(ip_id)?;
        if ip.vm_id.is_some() {
            return Err(fault("delete_ip", format!("ip {ip_id} is attached")));
        }
        world.ips.retain(|i| i.id != ip_id);
        Ok(())
    }

    async fn create_private_ip(&self, vlan_id: &str, ip: &str) -> Result<IpAddress> {
        self.record("create_private_ip", &[vlan_id, ip])?;
        let mut world = self.world()?;
        let region_id = world.vlan_mut(vlan_id)?.region_id.clone();
        if world.ips.iter().any(|i| i.ip == ip && i.vlan_id.as_deref() == Some(vlan_id)) {
            return Err(fault("create_private_ip", format!("{ip} is already in use")));
        }
        let address = IpAddress {
            id: world.allocate_id(),
            ip: ip.to_string(),
            version: if ip.contains(':') { IpVersion::V6 } else { IpVersion::V4 },
            region_id,
            vm_id: None,
            vlan_id: Some(vlan_id.to_string()),
            state: "created".to_string(),
        };
        world.ips.push(address.clone());
        Ok(address)
    }

    async fn create_vm_with_existing_disk_and_ip(
        &self,
        spec: &VmSpec,
        ip_id: &str,
        boot_disk_id: &str,
    ) -> Result<(Vm, IpAddress, Disk)> {
        self.record("create_vm", &[&spec.hostname, ip_id, boot_disk_id])?;
        let mut world = self.world()?;
        world.require_region(&spec.region_id)?;
        let disk = world.disk(boot_disk_id)?;
        let ip = world.ip(ip_id)?;
        if !disk.vm_ids.is_empty() || ip.vm_id.is_some() {
            return Err(fault("create_vm", "boot disk or ip already in use"));
        }
        let id = world.allocate_id();
        world.vms.push(VmRecord {
            id: id.clone(),
            hostname: spec.hostname.clone(),
            region_id: spec.region_id.clone(),
            farm: spec.farm.clone(),
            memory_mb: spec.memory_mb,
            cores: spec.cores,
            state: "running".to_string(),
            disk_ids: Vec::new(),
            ip_ids: Vec::new(),
            ssh_key_ids: spec.ssh_key_ids.clone(),
        });
        world.plug_disk(&id, boot_disk_id, Some(0))?;
        world.plug_ip(&id, ip_id)?;
        Ok((world.vm(&id)?, world.ip(ip_id)?, world.disk(boot_disk_id)?))
    }

    async fn describe_vm(&self, filter: &ResourceFilter) -> Result<Vec<Vm>> {
        self.record("describe_vm", &[filter.id.as_deref().unwrap_or("*")])?;
        let world = self.world()?;
        Ok(world
            .vms
            .iter()
            .filter(|v| filter.matches(&v.id, &v.hostname, &v.region_id))
            .map(|v| world.materialize(v))
            .collect())
    }

    async fn attach_ip(&self, vm_id: &str, ip_id: &str) -> Result<(Vm, IpAddress)> {
        self.record("attach_ip", &[vm_id, ip_id])?;
        let mut world = self.world()?;
        world.plug_ip(vm_id, ip_id)?;
        Ok((world.vm(vm_id)?, world.ip(ip_id)?))
    }

    async fn detach_ip(&self, vm_id: &str, ip_id: &str) -> Result<(Vm, IpAddress)> {
        self.record("detach_ip", &[vm_id, ip_id])?;
        let mut world = self.world()?;
        let vm = world.vm_mut(vm_id)?;
        if !vm.ip_ids.iter().any(|i| i == ip_id) {
            return Err(fault("detach_ip", format!("ip {ip_id} is not attached to {vm_id}")));
        }
        vm.ip_ids.retain(|i| i != ip_id);
        world.ip_mut(ip_id)?.vm_id = None;
        Ok((world.vm(vm_id)?, world.ip(ip_id)?))
    }

    async fn attach_disk(&self, vm_id: &str, disk_id: &str) -> Result<(Vm, Disk)> {
        self.record("attach_disk", &[vm_id, disk_id])?;
        let mut world = self.world()?;
        world.plug_disk(vm_id, disk_id, None)?;
        Ok((world.vm(vm_id)?, world.disk(disk_id)?))
    }

    async fn attach_disk_at_position(
        &self,
        vm_id: &str,
        disk_id: &str,
        position: usize,
    ) -> Result<(Vm, Disk)> {
        self.record(
            "attach_disk_at_position",
            &[vm_id, disk_id, &position.to_string()],
        )?;
        let mut world = self.world()?;
        world.plug_disk(vm_id, disk_id, Some(position))?;
        Ok((world.vm(vm_id)?, world.disk(disk_id)?))
    }

    async fn detach_disk(&self, vm_id: &str, disk_id: &str) -> Result<(Vm, Disk)> {
        self.record("detach_disk", &[vm_id, disk_id])?;
        let mut world = self.world()?;
        let vm = world.vm_mut(vm_id)?;
        if !vm.disk_ids.iter().any(|d| d == disk_id) {
            return Err(fault(
                "detach_disk",
                format!("disk {disk_id} is not attached to {vm_id}"),
            ));
        }
        vm.disk_ids.retain(|d| d != disk_id);
        world.disk_mut(disk_id)?.vm_ids.retain(|v| v != vm_id);
        Ok((world.vm(vm_id)?, world.disk(disk_id)?))
    }

    async fn update_vm_memory(&self, vm_id: &str, memory_mb: u64) -> Result<Vm> {
        self.record("update_vm_memory", &[vm_id, &memory_mb.to_string()])?;
        let mut world = self.world()?;
        world.vm_mut(vm_id)?.memory_mb = memory_mb;
        world.vm(vm_id)
    }

    async fn update_vm_cores(&self, vm_id: &str, cores: u32) -> Result<Vm> {
        self.record("update_vm_cores", &[vm_id, &cores.to_string()])?;
        let mut world = self.world()?;
        world.vm_mut(vm_id)?.cores = cores;
        world.vm(vm_id)
    }

    async fn rename_vm(&self, vm_id: &str, hostname: &str) -> Result<Vm> {
        self.record("rename_vm", &[vm_id, hostname])?;
        let mut world = self.world()?;
        world.vm_mut(vm_id)?.hostname = hostname.to_string();
        world.vm(vm_id)
    }

    async fn start_vm(&self, vm_id: &str) -> Result<()> {
        self.record("start_vm", &[vm_id])?;
        let mut world = self.world()?;
        world.vm_mut(vm_id)?.state = "running".to_string();
        Ok(())
    }

    async fn stop_vm(&self, vm_id: &str) -> Result<()> {
        self.record("stop_vm", &[vm_id])?;
        let mut world = self.world()?;
        world.vm_mut(vm_id)?.state = "halted".to_string();
        Ok(())
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<()> {
        self.record("delete_vm", &[vm_id])?;
        let mut world = self.world()?;
        let vm = world.vm_mut(vm_id)?.clone();
        if vm.state == "running" {
            return Err(fault("delete_vm", format!("vm {vm_id} must be halted")));
        }
        // The service deletes whatever is still attached along with the VM.
        world.disks.retain(|d| !vm.disk_ids.contains(&d.id));
        world.ips.retain(|i| !vm.ip_ids.contains(&i.id));
        world.vms.retain(|v| v.id != vm_id);
        Ok(())
    }

    async fn create_vlan(&self, spec: &VlanSpec) -> Result<Vlan> {
        self.record("create_vlan", &[&spec.name])?;
        let mut world = self.world()?;
        world.require_region(&spec.region_id)?;
        let vlan = Vlan {
            id: world.allocate_id(),
            name: spec.name.clone(),
            region_id: spec.region_id.clone(),
            subnet: spec
                .subnet
                .clone()
                .unwrap_or_else(|| "192.168.0.0/24".to_string()),
            gateway: None,
        };
        world.vlans.push(vlan.clone());
        Ok(vlan)
    }

    async fn list_vlans(&self, filter: &ResourceFilter) -> Result<Vec<Vlan>> {
        self.record("list_vlans", &[])?;
        let world = self.world()?;
        Ok(world
            .vlans
            .iter()
            .filter(|v| filter.matches(&v.id, &v.name, &v.region_id))
            .cloned()
            .collect())
    }

    async fn rename_vlan(&self, vlan_id: &str, name: &str) -> Result<Vlan> {
        self.record("rename_vlan", &[vlan_id, name])?;
        let mut world = self.world()?;
        let vlan = world.vlan_mut(vlan_id)?;
        vlan.name = name.to_string();
        Ok(vlan.clone())
    }

    async fn update_vlan_gateway(&self, vlan_id: &str, gateway: &str) -> Result<Vlan> {
        self.record("update_vlan_gateway", &[vlan_id, gateway])?;
        let mut world = self.world()?;
        let vlan = world.vlan_mut(vlan_id)?;
        vlan.gateway = Some(gateway.to_string());
        Ok(vlan.clone())
    }

    async fn delete_vlan(&self, vlan_id: &str) -> Result<()> {
        self.record("delete_vlan", &[vlan_id])?;
        let mut world = self.world()?;
        world.vlan_mut(vlan_id)?;
        if world.ips.iter().any(|i| i.vlan_id.as_deref() == Some(vlan_id)) {
            return Err(fault("delete_vlan", format!("vlan {vlan_id} still has addresses")));
        }
        world.vlans.retain(|v| v.id != vlan_id);
        Ok(())
    }

    async fn vlan_from_name(&self, name: &str) -> Result<Option<Vlan>> {
        self.record("vlan_from_name", &[name])?;
        let world = self.world()?;
        Ok(world.vlans.iter().find(|v| v.name == name).cloned())
    }

    async fn create_key(&self, name: &str, value: &str) -> Result<SshKey> {
        self.record("create_key", &[name])?;
        let mut world = self.world()?;
        if world.keys.iter().any(|k| k.name == name) {
            return Err(fault("create_key", format!("key name {name} already exists")));
        }
        let id = world.allocate_id();
        let key = SshKey {
            fingerprint: format!("sandbox:{id}"),
            id,
            name: name.to_string(),
            value: value.to_string(),
        };
        world.keys.push(key.clone());
        Ok(key)
    }

    async fn key_from_name(&self, name: &str) -> Result<Option<SshKey>> {
        self.record("key_from_name", &[name])?;
        let world = self.world()?;
        Ok(world.keys.iter().find(|k| k.name == name).cloned())
    }

    async fn delete_key(&self, key_id: &str) -> Result<()> {
        self.record("delete_key", &[key_id])?;
        let mut world = self.world()?;
        if !world.keys.iter().any(|k| k.id == key_id) {
            return Err(HostingError::unknown("key", key_id).into());
        }
        world.keys.retain(|k| k.id != key_id);
        Ok(())
    }

    async fn region_by_code(&self, code: &str) -> Result<Option<Region>> {
        self.record("region_by_code", &[code])?;
        let world = self.world()?;
        Ok(world.regions.iter().find(|r| r.code == code).cloned())
    }

    async fn image_by_name(&self, name: &str, region_id: &str) -> Result<Option<Image>> {
        self.record("image_by_name", &[name, region_id])?;
        let world = self.world()?;
        Ok(world
            .images
            .iter()
            .find(|i| i.name == name && i.region_id == region_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn disk_spec(name: &str) -> DiskSpec {
        DiskSpec {
            region_id: "1".to_string(),
            name: name.to_string(),
            size_gb: Some(20),
            disk_type: None,
        }
    }

    #[tokio::test]
    async fn test_vm_create_attaches_boot_disk_and_ip() {
        let sandbox = SandboxHosting::new();
        let disk = sandbox.create_disk(&disk_spec("sys")).await.expect("disk");
        let ip = sandbox.create_ip("1", IpVersion::V4).await.expect("ip");
        let spec = VmSpec {
            region_id: "1".to_string(),
            hostname: "web".to_string(),
            memory_mb: 512,
            cores: 1,
            ..VmSpec::default()
        };

        let (vm, ip, disk) = sandbox
            .create_vm_with_existing_disk_and_ip(&spec, &ip.id, &disk.id)
            .await
            .expect("vm");

        assert_eq!(vm.boot_disk().map(|d| d.id.clone()), Some(disk.id.clone()));
        assert_eq!(ip.vm_id.as_deref(), Some(vm.id.as_str()));
        assert_eq!(disk.vm_ids, vec![vm.id.clone()]);
    }

    #[tokio::test]
    async fn test_attached_disk_cannot_be_deleted() {
        let sandbox = SandboxHosting::new();
        let boot = sandbox.create_disk(&disk_spec("sys")).await.expect("disk");
        let ip = sandbox.create_ip("1", IpVersion::V6).await.expect("ip");
        let spec = VmSpec {
            region_id: "1".to_string(),
            hostname: "db".to_string(),
            memory_mb: 1024,
            cores: 2,
            ..VmSpec::default()
        };
        sandbox
            .create_vm_with_existing_disk_and_ip(&spec, &ip.id, &boot.id)
            .await
            .expect("vm");

        assert!(sandbox.delete_disk(&boot.id).await.is_err());
        assert!(sandbox.delete_ip(&ip.id).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_injection_and_call_log() {
        let sandbox = SandboxHosting::new();
        sandbox.fail_on("create_disk");

        let result = sandbox.create_disk(&disk_spec("data")).await;
        assert!(result.is_err());
        assert_eq!(sandbox.calls(), vec!["create_disk(data)".to_string()]);

        sandbox.clear_failures();
        assert!(sandbox.create_disk(&disk_spec("data")).await.is_ok());
    }

    #[tokio::test]
    async fn test_clone_from_image_respects_source_size() {
        let sandbox = SandboxHosting::new();
        let image = sandbox
            .image_by_name("Debian 9 64 bits (HVM)", "1")
            .await
            .expect("lookup")
            .expect("seeded image");

        let mut spec = disk_spec("root");
        spec.size_gb = Some(1);
        assert!(sandbox.create_disk_from(&spec, &image.disk_id).await.is_err());

        spec.size_gb = None;
        let disk = sandbox
            .create_disk_from(&spec, &image.disk_id)
            .await
            .expect("clone");
        assert_eq!(disk.size_gb, image.size_gb);
    }

    #[tokio::test]
    async fn test_persist_and_reopen() {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let path = temp.path().join("sandbox.json");

        let sandbox = SandboxHosting::open(&path).await.expect("open");
        sandbox.create_key("ops", "ssh-ed25519 AAAA ops").await.expect("key");
        sandbox.persist().await.expect("persist");

        let reopened = SandboxHosting::open(&path).await.expect("reopen");
        let key = reopened.key_from_name("ops").await.expect("lookup");
        assert!(key.is_some());
    }
}
