//! Hosting API client implementation.
//!
//! This module provides the HTTP client for the hosting service's JSON-RPC
//! endpoint. The API key travels as the first positional parameter of every
//! call.

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{HostingError, HostwrightError, Result};

use super::Hosting;
use super::types::{
    Disk, DiskSpec, Image, IpAddress, IpVersion, Region, ResourceFilter, SshKey, Vlan, VlanSpec,
    Vm, VmSpec,
};

/// Default hosting API endpoint.
pub const DEFAULT_API_URL: &str = "https://rpc.gandi.net/jsonrpc/";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Delay between retries in milliseconds.
const RETRY_DELAY_MS: u64 = 1000;

/// Connection options for [`HttpHosting`].
#[derive(Debug, Clone)]
pub struct HttpHostingOptions {
    /// Endpoint URL.
    pub url: String,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for network failures. Zero disables retrying.
    pub max_retries: u32,
}

impl Default for HttpHostingOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_API_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_retries: 0,
        }
    }
}

/// JSON-RPC client for the hosting service.
#[derive(Debug)]
pub struct HttpHosting {
    /// HTTP client.
    client: Client,
    /// API key.
    api_key: String,
    /// Connection options.
    options: HttpHostingOptions,
    /// Request id counter.
    next_id: AtomicU64,
}

/// JSON-RPC request envelope.
#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

/// JSON-RPC response envelope.
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Value,
    error: Option<RpcFault>,
}

/// JSON-RPC fault.
#[derive(Debug, Deserialize)]
struct RpcFault {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct VmCreated {
    vm: Vm,
    ip: IpAddress,
    disk: Disk,
}

#[derive(Debug, Deserialize)]
struct IpAttachment {
    vm: Vm,
    ip: IpAddress,
}

#[derive(Debug, Deserialize)]
struct DiskAttachment {
    vm: Vm,
    disk: Disk,
}

fn to_param<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        HostwrightError::Hosting(HostingError::InvalidResponse {
            message: format!("Failed to encode request: {e}"),
        })
    })
}

impl HttpHosting {
    /// Creates a client against the default endpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_options(api_key, HttpHostingOptions::default())
    }

    /// Creates a client with custom connection options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_options(api_key: &str, options: HttpHostingOptions) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_secs))
            .build()
            .map_err(|e| HostingError::network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            options,
            next_id: AtomicU64::new(1),
        })
    }

    /// Returns the endpoint this client talks to.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.options.url
    }

    /// Calls a remote method. Network failures are retried up to
    /// `max_retries` times; everything else is returned immediately.
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let mut attempt = 0;
        loop {
            match self.call_once(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.options.max_retries => {
                    attempt += 1;
                    debug!("Retry attempt {attempt} of {} for {method}", self.options.max_retries);
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS * u64::from(attempt)))
                        .await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Executes a single JSON-RPC request.
    async fn call_once<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> Result<T> {
        let mut full_params = Vec::with_capacity(params.len() + 1);
        full_params.push(Value::String(self.api_key.clone()));
        full_params.extend(params);

        let request = RpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params: full_params,
        };
        trace!("Calling {method} (request {})", request.id);

        let response = self
            .client
            .post(&self.options.url)
            .header(header::CONTENT_TYPE, "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| HostingError::network(format!("Request failed: {e}")))?;

        let status = response.status();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(HostingError::AuthenticationFailed {
                message: String::from("Invalid API key"),
            }
            .into());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HostingError::api_error(status.as_u16(), body).into());
        }

        let rpc: RpcResponse = response.json().await.map_err(|e| HostingError::InvalidResponse {
            message: format!("Failed to parse response to {method}: {e}"),
        })?;

        if let Some(fault) = rpc.error {
            return Err(HostingError::Fault {
                method: method.to_string(),
                code: fault.code,
                message: fault.message,
            }
            .into());
        }

        serde_json::from_value(rpc.result).map_err(|e| {
            HostingError::InvalidResponse {
                message: format!("Unexpected result from {method}: {e}"),
            }
            .into()
        })
    }
}

#[async_trait]
impl Hosting for HttpHosting {
    async fn create_disk(&self, spec: &DiskSpec) -> Result<Disk> {
        debug!("Creating disk {}", spec.name);
        self.call("hosting.disk.create", vec![to_param(spec)?]).await
    }

    async fn create_disk_from(&self, spec: &DiskSpec, source_disk_id: &str) -> Result<Disk> {
        debug!("Creating disk {} from {source_disk_id}", spec.name);
        self.call(
            "hosting.disk.create_from",
            vec![to_param(spec)?, json!(source_disk_id)],
        )
        .await
    }

    async fn list_disks(&self, filter: &ResourceFilter) -> Result<Vec<Disk>> {
        self.call("hosting.disk.list", vec![to_param(filter)?]).await
    }

    async fn rename_disk(&self, disk_id: &str, name: &str) -> Result<Disk> {
        self.call(
            "hosting.disk.update",
            vec![json!(disk_id), json!({ "name": name })],
        )
        .await
    }

    async fn extend_disk(&self, disk_id: &str, delta_gb: u64) -> Result<Disk> {
        self.call(
            "hosting.disk.extend",
            vec![json!(disk_id), json!({ "size": delta_gb })],
        )
        .await
    }

    async fn delete_disk(&self, disk_id: &str) -> Result<()> {
        let _: Value = self.call("hosting.disk.delete", vec![json!(disk_id)]).await?;
        Ok(())
    }

    async fn disk_from_name(&self, name: &str) -> Result<Option<Disk>> {
        let disks = self.list_disks(&ResourceFilter::by_name(name)).await?;
        Ok(disks.into_iter().next())
    }

    async fn create_ip(&self, region_id: &str, version: IpVersion) -> Result<IpAddress> {
        self.call(
            "hosting.ip.create",
            vec![json!({ "region_id": region_id, "version": version })],
        )
        .await
    }

    async fn list_ips(&self, filter: &ResourceFilter) -> Result<Vec<IpAddress>> {
        self.call("hosting.ip.list", vec![to_param(filter)?]).await
    }

    async fn delete_ip(&self, ip_id: &str) -> Result<()> {
        let _: Value = self.call("hosting.ip.delete", vec![json!(ip_id)]).await?;
        Ok(())
    }

    async fn create_private_ip(&self, vlan_id: &str, ip: &str) -> Result<IpAddress> {
        self.call(
            "hosting.ip.create_private",
            vec![json!({ "vlan_id": vlan_id, "ip": ip })],
        )
        .await
    }

    async fn create_vm_with_existing_disk_and_ip(
        &self,
        spec: &VmSpec,
        ip_id: &str,
        boot_disk_id: &str,
    ) -> Result<(Vm, IpAddress, Disk)> {
        debug!("Creating VM {} on disk {boot_disk_id}", spec.hostname);
        let created: VmCreated = self
            .call(
                "hosting.vm.create_from",
                vec![to_param(spec)?, json!(ip_id), json!(boot_disk_id)],
            )
            .await?;
        Ok((created.vm, created.ip, created.disk))
    }

    async fn describe_vm(&self, filter: &ResourceFilter) -> Result<Vec<Vm>> {
        self.call("hosting.vm.list", vec![to_param(filter)?]).await
    }

    async fn attach_ip(&self, vm_id: &str, ip_id: &str) -> Result<(Vm, IpAddress)> {
        let attached: IpAttachment = self
            .call("hosting.vm.ip_attach", vec![json!(vm_id), json!(ip_id)])
            .await?;
        Ok((attached.vm, attached.ip))
    }

    async fn detach_ip(&self, vm_id: &str, ip_id: &str) -> Result<(Vm, IpAddress)> {
        let detached: IpAttachment = self
            .call("hosting.vm.ip_detach", vec![json!(vm_id), json!(ip_id)])
            .await?;
        Ok((detached.vm, detached.ip))
    }

    async fn attach_disk(&self, vm_id: &str, disk_id: &str) -> Result<(Vm, Disk)> {
        let attached: DiskAttachment = self
            .call("hosting.vm.disk_attach", vec![json!(vm_id), json!(disk_id)])
            .await?;
        Ok((attached.vm, attached.disk))
    }

    async fn attach_disk_at_position(
        &self,
        vm_id: &str,
        disk_id: &str,
        position: usize,
    ) -> Result<(Vm, Disk)> {
        let attached: DiskAttachment = self
            .call(
                "hosting.vm.disk_attach",
                vec![json!(vm_id), json!(disk_id), json!({ "position": position })],
            )
            .await?;
        Ok((attached.vm, attached.disk))
    }

    async fn detach_disk(&self, vm_id: &str, disk_id: &str) -> Result<(Vm, Disk)> {
        let detached: DiskAttachment = self
            .call("hosting.vm.disk_detach", vec![json!(vm_id), json!(disk_id)])
            .await?;
        Ok((detached.vm, detached.disk))
    }

    async fn update_vm_memory(&self, vm_id: &str, memory_mb: u64) -> Result<Vm> {
        self.call(
            "hosting.vm.update",
            vec![json!(vm_id), json!({ "memory": memory_mb })],
        )
        .await
    }

    async fn update_vm_cores(&self, vm_id: &str, cores: u32) -> Result<Vm> {
        self.call("hosting.vm.update", vec![json!(vm_id), json!({ "cores": cores })])
            .await
    }

    async fn rename_vm(&self, vm_id: &str, hostname: &str) -> Result<Vm> {
        self.call(
            "hosting.vm.update",
            vec![json!(vm_id), json!({ "hostname": hostname })],
        )
        .await
    }

    async fn start_vm(&self, vm_id: &str) -> Result<()> {
        let _: Value = self.call("hosting.vm.start", vec![json!(vm_id)]).await?;
        Ok(())
    }

    async fn stop_vm(&self, vm_id: &str) -> Result<()> {
        let _: Value = self.call("hosting.vm.stop", vec![json!(vm_id)]).await?;
        Ok(())
    }

    async fn delete_vm(&self, vm_id: &str) -> Result<()> {
        let _: Value = self.call("hosting.vm.delete", vec![json!(vm_id)]).await?;
        Ok(())
    }

    async fn create_vlan(&self, spec: &VlanSpec) -> Result<Vlan> {
        self.call("hosting.vlan.create", vec![to_param(spec)?]).await
    }

    async fn list_vlans(&self, filter: &ResourceFilter) -> Result<Vec<Vlan>> {
        self.call("hosting.vlan.list", vec![to_param(filter)?]).await
    }

    async fn rename_vlan(&self, vlan_id: &str, name: &str) -> Result<Vlan> {
        self.call(
            "hosting.vlan.update",
            vec![json!(vlan_id), json!({ "name": name })],
        )
        .await
    }

    async fn update_vlan_gateway(&self, vlan_id: &str, gateway: &str) -> Result<Vlan> {
        self.call(
            "hosting.vlan.update",
            vec![json!(vlan_id), json!({ "gateway": gateway })],
        )
        .await
    }

    async fn delete_vlan(&self, vlan_id: &str) -> Result<()> {
        let _: Value = self.call("hosting.vlan.delete", vec![json!(vlan_id)]).await?;
        Ok(())
    }

    async fn vlan_from_name(&self, name: &str) -> Result<Option<Vlan>> {
        let vlans = self.list_vlans(&ResourceFilter::by_name(name)).await?;
        Ok(vlans.into_iter().next())
    }

    async fn create_key(&self, name: &str, value: &str) -> Result<SshKey> {
        self.call(
            "hosting.ssh.create",
            vec![json!({ "name": name, "value": value })],
        )
        .await
    }

    async fn key_from_name(&self, name: &str) -> Result<Option<SshKey>> {
        let keys: Vec<SshKey> = self
            .call("hosting.ssh.list", vec![to_param(&ResourceFilter::by_name(name))?])
            .await?;
        Ok(keys.into_iter().next())
    }

    async fn delete_key(&self, key_id: &str) -> Result<()> {
        let _: Value = self.call("hosting.ssh.delete", vec![json!(key_id)]).await?;
        Ok(())
    }

    async fn region_by_code(&self, code: &str) -> Result<Option<Region>> {
        let regions: Vec<Region> = self
            .call("hosting.region.list", vec![json!({ "code": code })])
            .await?;
        Ok(regions.into_iter().next())
    }

    async fn image_by_name(&self, name: &str, region_id: &str) -> Result<Option<Image>> {
        let images: Vec<Image> = self
            .call(
                "hosting.image.list",
                vec![json!({ "name": name, "region_id": region_id })],
            )
            .await?;
        Ok(images.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, max_retries: u32) -> HttpHosting {
        HttpHosting::with_options(
            "secret",
            HttpHostingOptions {
                url: server.uri(),
                timeout_secs: 5,
                max_retries,
            },
        )
        .expect("Failed to build client")
    }

    #[tokio::test]
    async fn test_api_key_is_first_param() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "hosting.disk.list",
                "params": ["secret", { "name": "data" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": [{
                    "id": "12",
                    "name": "data",
                    "size_gb": 20,
                    "region_id": "1"
                }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        let disk = client
            .disk_from_name("data")
            .await
            .expect("call should succeed")
            .expect("disk should be found");

        assert_eq!(disk.id, "12");
        assert_eq!(disk.size_gb, 20);
    }

    #[tokio::test]
    async fn test_fault_is_propagated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "error": { "code": 510_042, "message": "disk is attached" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, 3);
        let err = client.delete_disk("12").await.expect_err("fault expected");

        assert!(matches!(
            err,
            HostwrightError::Hosting(HostingError::Fault { code: 510_042, .. })
        ));
    }

    #[tokio::test]
    async fn test_authentication_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        let err = client.stop_vm("7").await.expect_err("auth error expected");

        assert!(matches!(
            err,
            HostwrightError::Hosting(HostingError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_empty_lookup_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "result": []
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, 0);
        let key = client.key_from_name("missing").await.expect("call should succeed");
        assert!(key.is_none());
    }
}
