//! REST request and response bodies of the compute API.
//!
//! These double as comparison snapshots: the harness decodes the actual one
//! from a response and builds the expected one from its own bookkeeping or
//! the datastore handle.

use chrono::{DateTime, Utc};
use cpat_id::{InstanceId, NodeId, TenantId, TraceLabel, WorkloadId};
use cpat_proto::{InstanceState, NodeStatus};
use serde::{Deserialize, Serialize};

// =============================================================================
// Instances
// =============================================================================

/// Body of `POST /{tenant}/instances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServerRequest {
    pub server: CreateServer,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateServer {
    pub name: String,
    pub workload_id: WorkloadId,
    #[serde(default = "one")]
    pub min_count: u32,
    #[serde(default = "one")]
    pub max_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_label: Option<TraceLabel>,
}

fn one() -> u32 {
    1
}

impl CreateServerRequest {
    pub fn new(name: impl Into<String>, workload_id: WorkloadId, count: u32) -> Self {
        Self {
            server: CreateServer {
                name: name.into(),
                workload_id,
                min_count: count,
                max_count: count,
                trace_label: None,
            },
        }
    }

    pub fn with_trace_label(mut self, label: TraceLabel) -> Self {
        self.server.trace_label = Some(label);
        self
    }
}

/// An instance as the API reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerDetails {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    pub workload_id: WorkloadId,
    /// Node the instance is bound to; the API spells "none" as `""`.
    #[serde(default, with = "empty_as_none")]
    pub node_id: Option<NodeId>,
    pub status: InstanceState,
    #[serde(default)]
    pub ssh_ip: String,
    #[serde(default)]
    pub ssh_port: u16,
    pub created: DateTime<Utc>,
}

/// A list of instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Servers {
    pub total_servers: usize,
    pub servers: Vec<ServerDetails>,
}

/// Body of `GET /{tenant}/instances/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub server: ServerDetails,
}

/// Body of `POST /v2.1/{tenant}/servers/action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersAction {
    pub action: String,
    #[serde(default)]
    pub server_ids: Vec<InstanceId>,
}

// =============================================================================
// Tenant
// =============================================================================

/// One usage sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub vcpu: u64,
    pub memory_mb: u64,
    pub disk_mb: u64,
    pub timestamp: DateTime<Utc>,
}

/// Body of `GET /v2.1/{tenant}/resources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageHistory {
    pub usages: Vec<Usage>,
}

/// One quota line. A limit of `-1` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub name: String,
    pub limit: i64,
    pub usage: i64,
}

/// Body of `GET /v2.1/{tenant}/quotas`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantResources {
    pub id: TenantId,
    pub timestamp: DateTime<Utc>,
    pub quotas: Vec<Quota>,
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    /// Cluster-wide events belong to no tenant.
    #[serde(default, with = "empty_as_none")]
    pub tenant_id: Option<TenantId>,
    pub event_type: String,
    pub message: String,
}

/// Body of the event log endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Events {
    pub events: Vec<Event>,
}

// =============================================================================
// Cluster
// =============================================================================

/// One compute node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub hostname: String,
    pub status: NodeStatus,
    pub updated: DateTime<Utc>,
    pub mem_total_mb: u64,
    pub mem_available_mb: u64,
    pub disk_total_mb: u64,
    pub disk_available_mb: u64,
    pub load: u32,
    pub online_cpus: u32,
    pub total_instances: usize,
    pub total_running_instances: usize,
    pub total_pending_instances: usize,
    pub total_paused_instances: usize,
}

/// Body of `GET /v2.1/nodes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Nodes {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub total_nodes_ready: usize,
    pub total_nodes_full: usize,
    pub total_nodes_offline: usize,
    pub total_nodes_maintenance: usize,
}

/// Body of `GET /v2.1/nodes/summary`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterStatus {
    pub status: ClusterSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeServer {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    pub status: InstanceState,
    #[serde(default)]
    pub ssh_ip: String,
}

/// Body of `GET /v2.1/nodes/{node}/servers/detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeServers {
    pub total_servers: usize,
    pub servers: Vec<NodeServer>,
}

/// A tenant network concentrator instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cnci {
    pub id: InstanceId,
    pub tenant_id: TenantId,
    pub ipv4: String,
    pub mac: String,
    #[serde(default)]
    pub subnets: Vec<String>,
}

/// Body of `GET /v2.1/cncis`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cncis {
    pub cncis: Vec<Cnci>,
}

/// Body of `GET /v2.1/cncis/{id}/detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CnciDetails {
    pub cnci: Cnci,
}

// =============================================================================
// Traces
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub label: TraceLabel,
    pub instances: usize,
}

/// Body of `GET /v2.1/traces`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracesSummary {
    pub summaries: Vec<TraceSummary>,
}

/// Aggregated timings for one trace label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFrameStats {
    pub num_instances: usize,
    pub average_controller_elapsed_ms: f64,
    pub average_scheduler_elapsed_ms: f64,
    pub average_launcher_elapsed_ms: f64,
    pub variance_controller_ms: f64,
    pub variance_scheduler_ms: f64,
    pub variance_launcher_ms: f64,
}

/// Body of `GET /v2.1/traces/{label}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceData {
    pub label: TraceLabel,
    pub summary: BatchFrameStats,
}

/// `Option<T>` that travels as `""` when absent.
pub mod empty_as_none {
    use std::str::FromStr;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<T, S>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: std::fmt::Display,
        S: Serializer,
    {
        match value {
            Some(v) => serializer.collect_str(v),
            None => serializer.serialize_str(""),
        }
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?.unwrap_or_default();
        if raw.is_empty() {
            return Ok(None);
        }
        raw.parse().map(Some).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details(node: Option<&str>) -> ServerDetails {
        ServerDetails {
            id: "inst-1".parse().unwrap(),
            tenant_id: "tenant-1".parse().unwrap(),
            workload_id: "wl-1".parse().unwrap(),
            node_id: node.map(|n| n.parse().unwrap()),
            status: InstanceState::Pending,
            ssh_ip: String::new(),
            ssh_port: 0,
            created: Utc::now(),
        }
    }

    #[test]
    fn test_unassigned_node_travels_as_empty_string() {
        let json = serde_json::to_value(details(None)).unwrap();
        assert_eq!(json["node_id"], "");

        let back: ServerDetails = serde_json::from_value(json).unwrap();
        assert!(back.node_id.is_none());
    }

    #[test]
    fn test_assigned_node_travels_as_reference() {
        let json = serde_json::to_value(details(Some("node-7"))).unwrap();
        assert_eq!(json["node_id"], "node-7");
    }

    #[test]
    fn test_missing_or_null_node_is_none() {
        let mut json = serde_json::to_value(details(None)).unwrap();
        json["node_id"] = serde_json::Value::Null;
        let back: ServerDetails = serde_json::from_value(json.clone()).unwrap();
        assert!(back.node_id.is_none());

        json.as_object_mut().unwrap().remove("node_id");
        let back: ServerDetails = serde_json::from_value(json).unwrap();
        assert!(back.node_id.is_none());
    }

    #[test]
    fn test_create_request_defaults_counts() {
        let req: CreateServerRequest =
            serde_json::from_str(r#"{"server":{"name":"x","workload_id":"wl"}}"#).unwrap();
        assert_eq!(req.server.min_count, 1);
        assert_eq!(req.server.max_count, 1);
    }
}
