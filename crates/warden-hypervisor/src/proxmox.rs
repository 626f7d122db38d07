//! Proxmox VE control-plane client
//!
//! Thin typed wrapper over the cluster HTTP API. Owns no state beyond the
//! HTTP client and endpoint coordinates; every operation is a single
//! authenticated request scoped to the configured node.

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use warden_config::HypervisorSettings;
use warden_util::RemoteVmId;

use crate::{
    ConsoleTicket, HvResult, Hypervisor, HypervisorEndpoint, HypervisorError, RuntimeStatus,
    TaskHandle, TaskStatus,
};

/// Guest NIC naming conventions the agent scan accepts. Anything else
/// (docker bridges, tunnels, ...) is not the address players should reach.
const GUEST_NIC_NAMES: &[&str] = &["eth0", "ens18", "ens19", "ens3"];

/// Proxmox API client
pub struct ProxmoxClient {
    http: Client,
    endpoint: HypervisorEndpoint,
    auth_header: String,
}

impl ProxmoxClient {
    pub fn new(settings: &HypervisorSettings) -> HvResult<Self> {
        let http = Client::builder()
            .timeout(settings.request_timeout)
            .danger_accept_invalid_certs(!settings.verify_tls)
            .build()?;

        Ok(Self {
            http,
            endpoint: HypervisorEndpoint {
                host: settings.host.clone(),
                node: settings.node.clone(),
            },
            auth_header: format!(
                "PVEAPIToken={}!{}={}",
                settings.user, settings.token_name, settings.token_value
            ),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("https://{}:8006/api2/json{}", self.endpoint.host, path);
        self.http
            .request(method, url)
            .header("Authorization", &self.auth_header)
    }

    fn qemu_path(&self, vmid: RemoteVmId, suffix: &str) -> String {
        format!("/nodes/{}/qemu/{}{}", self.endpoint.node, vmid, suffix)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> HvResult<T> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message = message.trim().to_string();

            // A destroyed VM answers 404 or a 5xx complaining that its
            // configuration file no longer exists; both mean "already gone".
            if status == StatusCode::NOT_FOUND
                || (status.is_server_error() && message.contains("does not exist"))
            {
                return Err(HypervisorError::NotFound(message));
            }

            return Err(HypervisorError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| HypervisorError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }

    /// Issue a request whose response payload we do not care about
    async fn send_unit(&self, request: RequestBuilder) -> HvResult<()> {
        let _: Option<serde_json::Value> = self.send(request).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl Hypervisor for ProxmoxClient {
    async fn next_vmid(&self) -> HvResult<RemoteVmId> {
        // The cluster returns the free identity as a JSON string
        let id: NumOrStr = self.send(self.request(Method::GET, "/cluster/nextid")).await?;
        Ok(RemoteVmId::new(id.as_u64()? as u32))
    }

    async fn clone_template(
        &self,
        template: RemoteVmId,
        newid: RemoteVmId,
        name: &str,
        description: &str,
    ) -> HvResult<TaskHandle> {
        let path = self.qemu_path(template, "/clone");
        let upid: String = self
            .send(self.request(Method::POST, &path).form(&[
                ("newid", newid.to_string()),
                ("name", name.to_string()),
                ("full", "0".to_string()),
                ("description", description.to_string()),
            ]))
            .await?;

        debug!(template = %template, newid = %newid, upid = %upid, "Clone started");
        Ok(TaskHandle::new(upid))
    }

    async fn task_status(&self, task: &TaskHandle) -> HvResult<TaskStatus> {
        let path = format!("/nodes/{}/tasks/{}/status", self.endpoint.node, task);
        let payload: TaskStatusPayload = self.send(self.request(Method::GET, &path)).await?;
        Ok(payload.into_status())
    }

    async fn start(&self, vmid: RemoteVmId) -> HvResult<()> {
        self.send_unit(self.request(Method::POST, &self.qemu_path(vmid, "/status/start")))
            .await
    }

    async fn shutdown(&self, vmid: RemoteVmId) -> HvResult<()> {
        self.send_unit(self.request(Method::POST, &self.qemu_path(vmid, "/status/shutdown")))
            .await
    }

    async fn reboot(&self, vmid: RemoteVmId) -> HvResult<()> {
        self.send_unit(self.request(Method::POST, &self.qemu_path(vmid, "/status/reboot")))
            .await
    }

    async fn delete(&self, vmid: RemoteVmId) -> HvResult<()> {
        self.send_unit(self.request(Method::DELETE, &self.qemu_path(vmid, "")))
            .await
    }

    async fn current_status(&self, vmid: RemoteVmId) -> HvResult<RuntimeStatus> {
        let payload: CurrentStatusPayload = self
            .send(self.request(Method::GET, &self.qemu_path(vmid, "/status/current")))
            .await?;

        Ok(RuntimeStatus {
            status: payload.status,
            uptime_secs: payload.uptime.unwrap_or(0),
        })
    }

    async fn guest_ipv4(&self, vmid: RemoteVmId) -> HvResult<Option<String>> {
        let path = self.qemu_path(vmid, "/agent/network-get-interfaces");
        let interfaces: Result<AgentInterfaces, _> =
            self.send(self.request(Method::GET, &path)).await;

        match interfaces {
            Ok(payload) => Ok(first_guest_ipv4(&payload.result)),
            // The agent not answering yet is the expected state for a
            // freshly booted guest, not a failure.
            Err(HypervisorError::Api { status, message }) => {
                debug!(vmid = %vmid, status, message, "Guest agent not ready");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn console_ticket(&self, vmid: RemoteVmId) -> HvResult<ConsoleTicket> {
        let payload: VncProxyPayload = self
            .send(self.request(Method::POST, &self.qemu_path(vmid, "/vncproxy")))
            .await?;

        Ok(ConsoleTicket {
            port: payload.port.as_u64()? as u16,
            ticket: payload.ticket,
        })
    }

    fn endpoint(&self) -> &HypervisorEndpoint {
        &self.endpoint
    }
}

/// Every Proxmox response wraps its payload in `{"data": ...}`
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Proxmox serializes several numeric fields as JSON strings
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NumOrStr {
    Num(u64),
    Str(String),
}

impl NumOrStr {
    fn as_u64(&self) -> HvResult<u64> {
        match self {
            Self::Num(n) => Ok(*n),
            Self::Str(s) => s
                .parse()
                .map_err(|_| HypervisorError::Decode(format!("expected a number, got {s:?}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TaskStatusPayload {
    status: String,
    exitstatus: Option<String>,
}

impl TaskStatusPayload {
    fn into_status(self) -> TaskStatus {
        if self.status == "stopped" {
            TaskStatus::Stopped {
                exit_status: self.exitstatus.unwrap_or_default(),
            }
        } else {
            TaskStatus::Running
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentStatusPayload {
    status: String,
    uptime: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AgentInterfaces {
    result: Vec<AgentInterface>,
}

#[derive(Debug, Deserialize)]
struct AgentInterface {
    name: String,
    #[serde(rename = "ip-addresses", default)]
    ip_addresses: Vec<AgentIpAddress>,
}

#[derive(Debug, Deserialize)]
struct AgentIpAddress {
    #[serde(rename = "ip-address")]
    ip_address: String,
    #[serde(rename = "ip-address-type")]
    ip_address_type: String,
}

#[derive(Debug, Deserialize)]
struct VncProxyPayload {
    port: NumOrStr,
    ticket: String,
}

/// Pick the first usable guest IPv4: known NIC names only, IPv4 only,
/// loopback skipped.
fn first_guest_ipv4(interfaces: &[AgentInterface]) -> Option<String> {
    for iface in interfaces {
        if !GUEST_NIC_NAMES.contains(&iface.name.as_str()) {
            continue;
        }
        for addr in &iface.ip_addresses {
            if addr.ip_address_type == "ipv4" && !addr.ip_address.starts_with("127.") {
                return Some(addr.ip_address.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(name: &str, addrs: &[(&str, &str)]) -> AgentInterface {
        AgentInterface {
            name: name.into(),
            ip_addresses: addrs
                .iter()
                .map(|(kind, ip)| AgentIpAddress {
                    ip_address: (*ip).into(),
                    ip_address_type: (*kind).into(),
                })
                .collect(),
        }
    }

    #[test]
    fn guest_ip_scan_prefers_known_nics() {
        let interfaces = vec![
            iface("lo", &[("ipv4", "127.0.0.1")]),
            iface("docker0", &[("ipv4", "172.17.0.1")]),
            iface("ens18", &[("ipv6", "fe80::1"), ("ipv4", "10.0.0.5")]),
        ];
        assert_eq!(first_guest_ipv4(&interfaces).as_deref(), Some("10.0.0.5"));
    }

    #[test]
    fn guest_ip_scan_skips_loopback_on_known_nic() {
        let interfaces = vec![iface("eth0", &[("ipv4", "127.0.0.1")])];
        assert_eq!(first_guest_ipv4(&interfaces), None);
    }

    #[test]
    fn guest_ip_scan_handles_no_report() {
        assert_eq!(first_guest_ipv4(&[]), None);
        let interfaces = vec![iface("ens18", &[])];
        assert_eq!(first_guest_ipv4(&interfaces), None);
    }

    #[test]
    fn numeric_fields_arrive_as_strings_or_numbers() {
        let as_str: NumOrStr = serde_json::from_str("\"501\"").unwrap();
        assert_eq!(as_str.as_u64().unwrap(), 501);

        let as_num: NumOrStr = serde_json::from_str("5901").unwrap();
        assert_eq!(as_num.as_u64().unwrap(), 5901);

        let bad: NumOrStr = serde_json::from_str("\"soon\"").unwrap();
        assert!(bad.as_u64().is_err());
    }

    #[test]
    fn task_payload_maps_to_status() {
        let running = TaskStatusPayload {
            status: "running".into(),
            exitstatus: None,
        };
        assert_eq!(running.into_status(), TaskStatus::Running);

        let ok = TaskStatusPayload {
            status: "stopped".into(),
            exitstatus: Some("OK".into()),
        };
        assert_eq!(
            ok.into_status(),
            TaskStatus::Stopped {
                exit_status: "OK".into()
            }
        );

        let failed = TaskStatusPayload {
            status: "stopped".into(),
            exitstatus: Some("unable to create image".into()),
        };
        assert!(matches!(
            failed.into_status(),
            TaskStatus::Stopped { exit_status } if exit_status.contains("unable")
        ));
    }

    #[test]
    fn envelope_unwraps_data() {
        let envelope: Envelope<String> =
            serde_json::from_str(r#"{"data": "UPID:pve:0001:clone:"}"#).unwrap();
        assert_eq!(envelope.data, "UPID:pve:0001:clone:");
    }
}
