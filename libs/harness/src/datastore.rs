//! Read access to the service's own records.
//!
//! Scenarios use it to compute the state a REST listing should show. A live
//! deployment supplies an implementation backed by its database; the
//! reference controller implements it over its in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cpat_id::{InstanceId, NodeId, TenantId, TraceLabel, WorkloadId};

use crate::api::{
    ClusterStatus, CnciDetails, Cncis, Events, NodeServers, Nodes, Servers, TenantResources,
    TraceData, TracesSummary, UsageHistory,
};
use crate::error::Result;

#[async_trait]
pub trait Datastore: Send + Sync {
    /// Tenant owned by `user`.
    async fn tenant(&self, user: &str) -> Result<TenantId>;

    /// Workloads a tenant may launch.
    async fn workloads(&self, tenant: &TenantId) -> Result<Vec<WorkloadId>>;

    /// Every instance of a tenant.
    async fn instances(&self, tenant: &TenantId) -> Result<Servers>;

    /// Usage samples between `start` and `end`, inclusive.
    async fn tenant_usage(
        &self,
        tenant: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageHistory>;

    async fn quotas(&self, tenant: &TenantId) -> Result<TenantResources>;

    /// Event log, optionally restricted to one tenant.
    async fn event_log(&self, tenant: Option<&TenantId>) -> Result<Events>;

    /// Last statistics reported by every node.
    async fn node_last_stats(&self) -> Result<Nodes>;

    async fn node_summary(&self) -> Result<ClusterStatus>;

    async fn instances_by_node(&self, node: &NodeId) -> Result<NodeServers>;

    async fn cnci_summary(&self) -> Result<Cncis>;

    async fn cnci(&self, id: &InstanceId) -> Result<CnciDetails>;

    async fn batch_frame_summary(&self) -> Result<TracesSummary>;

    async fn batch_frame_statistics(&self, label: &TraceLabel) -> Result<TraceData>;
}
