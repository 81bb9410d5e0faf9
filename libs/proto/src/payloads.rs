//! Typed payloads for every command and event kind.
//!
//! Each payload type is bound to exactly one [`MessageKind`] through the
//! [`Payload`] trait, so a frame can never be built with a mismatched tag.

use cpat_id::{AgentUuid, InstanceId, NodeId, TenantId, TraceLabel, WorkloadId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::kinds::{CommandKind, EventKind, MessageKind, Role};

/// A command or event body with a fixed kind tag.
pub trait Payload: Serialize + DeserializeOwned {
    const KIND: MessageKind;
}

macro_rules! bind_kind {
    ($ty:ty, Command::$kind:ident) => {
        impl Payload for $ty {
            const KIND: MessageKind = MessageKind::Command(CommandKind::$kind);
        }
    };
    ($ty:ty, Event::$kind:ident) => {
        impl Payload for $ty {
            const KIND: MessageKind = MessageKind::Event(EventKind::$kind);
        }
    };
}

// =============================================================================
// Commands
// =============================================================================

/// Launch an instance on the receiving node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartPayload {
    pub instance_uuid: InstanceId,
    pub tenant_uuid: TenantId,
    pub workload_id: WorkloadId,
    pub vcpus: u32,
    pub mem_mb: u64,
    pub disk_mb: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_label: Option<TraceLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopPayload {
    pub instance_uuid: InstanceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPayload {
    pub instance_uuid: InstanceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePayload {
    pub instance_uuid: InstanceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvacuatePayload {
    pub node_uuid: NodeId,
}

/// Lifecycle state of an instance as seen by its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Pending,
    Running,
    Exited,
    Paused,
}

impl InstanceState {
    /// Returns the state as the service spells it in REST bodies.
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
            InstanceState::Exited => "exited",
            InstanceState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readiness of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Ready,
    Full,
    Offline,
    Maintenance,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Ready => "ready",
            NodeStatus::Full => "full",
            NodeStatus::Offline => "offline",
            NodeStatus::Maintenance => "maintenance",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-instance entry in a node status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceStat {
    pub instance_uuid: InstanceId,
    pub state: InstanceState,
    #[serde(default)]
    pub ssh_ip: String,
    #[serde(default)]
    pub ssh_port: u16,
    #[serde(default)]
    pub vcpu_usage: u32,
    #[serde(default)]
    pub memory_usage_mb: u64,
    #[serde(default)]
    pub disk_usage_mb: u64,
}

/// Full node status report ("report status").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsPayload {
    pub node_uuid: NodeId,
    pub hostname: String,
    pub status: NodeStatus,
    pub mem_total_mb: u64,
    pub mem_available_mb: u64,
    pub disk_total_mb: u64,
    pub disk_available_mb: u64,
    pub load: u32,
    pub online_cpus: u32,
    #[serde(default)]
    pub instances: Vec<InstanceStat>,
}

bind_kind!(StartPayload, Command::Start);
bind_kind!(StopPayload, Command::Stop);
bind_kind!(RestartPayload, Command::Restart);
bind_kind!(DeletePayload, Command::Delete);
bind_kind!(StatsPayload, Command::Stats);
bind_kind!(EvacuatePayload, Command::Evacuate);

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStoppedPayload {
    pub instance_uuid: InstanceId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDeletedPayload {
    pub instance_uuid: InstanceId,
}

/// Timing for one traced instance launch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceFrame {
    pub label: TraceLabel,
    pub instance_uuid: InstanceId,
    pub node_uuid: NodeId,
    pub controller_elapsed_ms: f64,
    pub scheduler_elapsed_ms: f64,
    pub launcher_elapsed_ms: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceReportPayload {
    pub frames: Vec<TraceFrame>,
}

/// A tenant's concentrator instance came up on a network node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentratorInstanceAddedPayload {
    pub instance_uuid: InstanceId,
    pub tenant_uuid: TenantId,
    pub concentrator_ip: String,
    pub concentrator_mac: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConnectedPayload {
    pub node_uuid: AgentUuid,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDisconnectedPayload {
    pub node_uuid: AgentUuid,
    pub role: Role,
}

bind_kind!(InstanceStoppedPayload, Event::InstanceStopped);
bind_kind!(InstanceDeletedPayload, Event::InstanceDeleted);
bind_kind!(TraceReportPayload, Event::TraceReport);
bind_kind!(
    ConcentratorInstanceAddedPayload,
    Event::ConcentratorInstanceAdded
);
bind_kind!(NodeConnectedPayload, Event::NodeConnected);
bind_kind!(NodeDisconnectedPayload, Event::NodeDisconnected);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_payload_omits_missing_trace_label() {
        let payload = StartPayload {
            instance_uuid: "inst-1".parse().unwrap(),
            tenant_uuid: "tenant-1".parse().unwrap(),
            workload_id: "wl-1".parse().unwrap(),
            vcpus: 2,
            mem_mb: 256,
            disk_mb: 1024,
            trace_label: None,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("trace_label").is_none());
        assert_eq!(json["vcpus"], 2);
    }

    #[test]
    fn test_stats_payload_defaults_instances() {
        let json = serde_json::json!({
            "node_uuid": "node-1",
            "hostname": "agent-1",
            "status": "ready",
            "mem_total_mb": 3896,
            "mem_available_mb": 3896,
            "disk_total_mb": 500000,
            "disk_available_mb": 256000,
            "load": 0,
            "online_cpus": 4
        });
        let payload: StatsPayload = serde_json::from_value(json).unwrap();
        assert!(payload.instances.is_empty());
        assert_eq!(payload.status, NodeStatus::Ready);
    }

    #[test]
    fn test_invalid_reference_in_payload_is_rejected() {
        let json = serde_json::json!({ "instance_uuid": "a/b" });
        assert!(serde_json::from_value::<StopPayload>(json).is_err());
    }

    #[test]
    fn test_kind_bindings() {
        assert_eq!(
            StatsPayload::KIND,
            MessageKind::Command(CommandKind::Stats)
        );
        assert_eq!(
            TraceReportPayload::KIND,
            MessageKind::Event(EventKind::TraceReport)
        );
    }
}
