//! The store seen through the harness's datastore interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cpat_harness::api::{
    ClusterStatus, CnciDetails, Cncis, Events, NodeServers, Nodes, Servers, TenantResources,
    TraceData, TracesSummary, UsageHistory,
};
use cpat_harness::{Datastore, HarnessError, Result};
use cpat_id::{InstanceId, NodeId, TenantId, TraceLabel, WorkloadId};

use crate::store::{Store, StoreError};

impl From<StoreError> for HarnessError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownUser(_) | StoreError::TenantNotFound(_) => {
                HarnessError::precondition(err.to_string())
            }
            _ => HarnessError::assertion(err.to_string()),
        }
    }
}

#[async_trait]
impl Datastore for Store {
    async fn tenant(&self, user: &str) -> Result<TenantId> {
        Ok(self.tenant_for_user(user)?)
    }

    async fn workloads(&self, tenant: &TenantId) -> Result<Vec<WorkloadId>> {
        Ok(Store::workloads(self, tenant)?
            .into_iter()
            .map(|w| w.id)
            .collect())
    }

    async fn instances(&self, tenant: &TenantId) -> Result<Servers> {
        Ok(self.servers(tenant)?)
    }

    async fn tenant_usage(
        &self,
        tenant: &TenantId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<UsageHistory> {
        Ok(self.usage(tenant, start, end)?)
    }

    async fn quotas(&self, tenant: &TenantId) -> Result<TenantResources> {
        Ok(Store::quotas(self, tenant)?)
    }

    async fn event_log(&self, tenant: Option<&TenantId>) -> Result<Events> {
        Ok(self.events(tenant))
    }

    async fn node_last_stats(&self) -> Result<Nodes> {
        Ok(self.nodes())
    }

    async fn node_summary(&self) -> Result<ClusterStatus> {
        Ok(Store::node_summary(self))
    }

    async fn instances_by_node(&self, node: &NodeId) -> Result<NodeServers> {
        Ok(self.node_servers(node)?)
    }

    async fn cnci_summary(&self) -> Result<Cncis> {
        Ok(self.cncis())
    }

    async fn cnci(&self, id: &InstanceId) -> Result<CnciDetails> {
        Ok(Store::cnci(self, id)?)
    }

    async fn batch_frame_summary(&self) -> Result<TracesSummary> {
        Ok(self.traces())
    }

    async fn batch_frame_statistics(&self, label: &TraceLabel) -> Result<TraceData> {
        Ok(self.trace_data(label)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cpat_harness::FailureClass;

    #[tokio::test]
    async fn test_datastore_view_matches_store() {
        let store = Store::seeded("demo");
        let ds: &dyn Datastore = &store;

        let tenant = ds.tenant("demo").await.unwrap();
        let workloads = ds.workloads(&tenant).await.unwrap();
        store
            .create_instances(&tenant, &workloads[0], 2, None)
            .unwrap();

        assert_eq!(ds.instances(&tenant).await.unwrap().total_servers, 2);
        assert_eq!(ds.event_log(Some(&tenant)).await.unwrap().events.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_user_is_a_precondition() {
        let store = Store::seeded("demo");
        let err = Datastore::tenant(&store, "mallory").await.unwrap_err();
        assert_eq!(err.class(), FailureClass::Precondition);
    }

    #[tokio::test]
    async fn test_missing_cnci_is_an_assertion() {
        let store = Store::seeded("demo");
        let err = Datastore::cnci(&store, &InstanceId::generate())
            .await
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::Assertion);
    }
}
