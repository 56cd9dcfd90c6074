//! Serde models for the slice of the Docker Engine API the operator reads.
//!
//! Only the fields the observer consumes are declared; everything else in
//! the Engine's responses is ignored.

use serde::Deserialize;
use std::net::Ipv4Addr;

/// A swarm service.
#[derive(Debug, Clone, Deserialize)]
pub struct Service {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Spec", default)]
    pub spec: ServiceSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceSpec {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Mode", default)]
    pub mode: ServiceMode,
}

/// Scheduling mode of a service. Global services run one task per
/// schedulable node; replicated services run a declared count.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceMode {
    #[serde(rename = "Replicated")]
    pub replicated: Option<ReplicatedMode>,
    #[serde(rename = "Global")]
    pub global: Option<serde_json::Value>,
}

impl ServiceMode {
    pub fn is_global(&self) -> bool {
        self.global.is_some()
    }

    pub fn replicas(&self) -> Option<u64> {
        self.replicated.as_ref().and_then(|r| r.replicas)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReplicatedMode {
    #[serde(rename = "Replicas")]
    pub replicas: Option<u64>,
}

/// One task (container instance) of a service.
#[derive(Debug, Clone, Deserialize)]
pub struct Task {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "NodeID", default)]
    pub node_id: String,
    #[serde(rename = "DesiredState", default)]
    pub desired_state: String,
    #[serde(rename = "Status", default)]
    pub status: TaskStatus,
    #[serde(rename = "NetworksAttachments", default)]
    pub networks_attachments: Vec<NetworkAttachment>,
}

impl Task {
    /// True when the scheduler wants this task running and it actually is.
    pub fn is_running(&self) -> bool {
        self.desired_state == "running" && self.status.state == "running"
    }

    /// The task's address on the named overlay network, if attached.
    /// Addresses arrive in CIDR form (`10.0.1.5/24`); the prefix is dropped.
    pub fn ip_on_network(&self, network_name: &str) -> Option<Ipv4Addr> {
        self.networks_attachments
            .iter()
            .find(|a| a.network.spec.name == network_name)
            .and_then(|a| a.addresses.first())
            .and_then(|addr| addr.split('/').next())
            .and_then(|ip| ip.parse().ok())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskStatus {
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "ContainerStatus", default)]
    pub container_status: Option<ContainerStatus>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContainerStatus {
    #[serde(rename = "ContainerID", default)]
    pub container_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkAttachment {
    #[serde(rename = "Network")]
    pub network: AttachedNetwork,
    #[serde(rename = "Addresses", default)]
    pub addresses: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttachedNetwork {
    #[serde(rename = "Spec", default)]
    pub spec: AttachedNetworkSpec,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttachedNetworkSpec {
    #[serde(rename = "Name", default)]
    pub name: String,
}

/// A swarm node.
#[derive(Debug, Clone, Deserialize)]
pub struct Node {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Spec", default)]
    pub spec: NodeSpec,
    #[serde(rename = "Status", default)]
    pub status: NodeStatus,
}

impl Node {
    /// Schedulable: availability `active` and state `ready`.
    pub fn is_schedulable(&self) -> bool {
        self.spec.availability == "active" && self.status.state == "ready"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "Availability", default)]
    pub availability: String,
    #[serde(rename = "Role", default)]
    pub role: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeStatus {
    #[serde(rename = "State", default)]
    pub state: String,
}

/// An overlay network, inspected for IPAM/subnet information.
#[derive(Debug, Clone, Deserialize)]
pub struct Network {
    #[serde(rename = "Id", default)]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "IPAM", default)]
    pub ipam: Option<Ipam>,
}

impl Network {
    pub fn subnets(&self) -> Vec<String> {
        self.ipam
            .as_ref()
            .map(|ipam| {
                ipam.config
                    .iter()
                    .filter_map(|c| c.subnet.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Ipam {
    #[serde(rename = "Config", default)]
    pub config: Vec<IpamConfig>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IpamConfig {
    #[serde(rename = "Subnet", default)]
    pub subnet: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_deserialization() {
        let raw = r#"{
            "ID": "abc123",
            "NodeID": "node-1",
            "DesiredState": "running",
            "Status": {
                "State": "running",
                "ContainerStatus": {"ContainerID": "deadbeef"}
            },
            "NetworksAttachments": [{
                "Network": {"Spec": {"Name": "backend"}},
                "Addresses": ["10.0.1.5/24"]
            }],
            "UnknownField": {"ignored": true}
        }"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert!(task.is_running());
        assert_eq!(
            task.ip_on_network("backend"),
            Some(Ipv4Addr::new(10, 0, 1, 5))
        );
        assert_eq!(task.ip_on_network("frontend"), None);
    }

    #[test]
    fn test_task_not_running_states() {
        let raw = r#"{
            "ID": "t",
            "DesiredState": "running",
            "Status": {"State": "preparing"}
        }"#;
        let task: Task = serde_json::from_str(raw).unwrap();
        assert!(!task.is_running());
    }

    #[test]
    fn test_service_modes() {
        let global: Service =
            serde_json::from_str(r#"{"ID": "s1", "Spec": {"Name": "mongo", "Mode": {"Global": {}}}}"#)
                .unwrap();
        assert!(global.spec.mode.is_global());
        assert_eq!(global.spec.mode.replicas(), None);

        let replicated: Service = serde_json::from_str(
            r#"{"ID": "s2", "Spec": {"Name": "mongo", "Mode": {"Replicated": {"Replicas": 3}}}}"#,
        )
        .unwrap();
        assert!(!replicated.spec.mode.is_global());
        assert_eq!(replicated.spec.mode.replicas(), Some(3));
    }

    #[test]
    fn test_node_schedulable() {
        let node: Node = serde_json::from_str(
            r#"{"ID": "n1", "Spec": {"Availability": "active"}, "Status": {"State": "ready"}}"#,
        )
        .unwrap();
        assert!(node.is_schedulable());

        let drained: Node = serde_json::from_str(
            r#"{"ID": "n2", "Spec": {"Availability": "drain"}, "Status": {"State": "ready"}}"#,
        )
        .unwrap();
        assert!(!drained.is_schedulable());
    }

    #[test]
    fn test_network_subnets() {
        let network: Network = serde_json::from_str(
            r#"{"Id": "net1", "Name": "backend", "IPAM": {"Config": [{"Subnet": "10.0.1.0/24"}]}}"#,
        )
        .unwrap();
        assert_eq!(network.subnets(), vec!["10.0.1.0/24".to_string()]);
    }
}
