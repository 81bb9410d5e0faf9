//! Cluster-wide reads: nodes, node servers, network concentrators.

use futures_util::future::BoxFuture;
use reqwest::{Method, StatusCode};

use cpat_id::InstanceId;
use cpat_proto::{ConcentratorInstanceAddedPayload, Role};

use crate::api::{ClusterStatus, CnciDetails, Cncis, NodeServers, Nodes};
use crate::compare::assert_snapshot;
use crate::context::{Fixture, TestContext};
use crate::driver;
use crate::ensure;
use crate::error::{HarnessError, Result};
use crate::http::decode;

async fn get<T: serde::de::DeserializeOwned>(ctx: &TestContext, what: &str, path: &str) -> Result<T> {
    let body = ctx
        .admin()
        .execute(Method::GET, &ctx.v21_url(path), None, StatusCode::OK)
        .await?;
    decode(what, &body)
}

pub fn list_node_servers(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            let ids = driver::create_on_agent(ctx, &agent, &fixture, 2, None).await?;
            let node = agent.uuid().node_id();

            let actual: NodeServers =
                get(ctx, "node servers", &format!("/nodes/{}/servers/detail", node)).await?;
            for id in &ids {
                ensure!(
                    actual.servers.iter().any(|s| &s.id == id),
                    "node {} does not list {}",
                    node,
                    id
                );
            }

            let expected = ctx.datastore()?.instances_by_node(&node).await?;
            assert_snapshot(&expected, &actual)
        })
        .await
    })
}

pub fn list_nodes(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            driver::create_on_agent(ctx, &agent, &fixture, 1, None).await?;
            let node = agent.uuid().node_id();

            let actual: Nodes = get(ctx, "nodes", "/nodes").await?;
            ensure!(
                actual.nodes.iter().any(|n| n.id == node),
                "node {} missing from the node list",
                node
            );

            let expected = ctx.datastore()?.node_last_stats().await?;
            assert_snapshot(&expected, &actual)
        })
        .await
    })
}

pub fn node_summary(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            driver::create_on_agent(ctx, &agent, &fixture, 1, None).await?;

            let actual: ClusterStatus = get(ctx, "cluster status", "/nodes/summary").await?;
            ensure!(
                actual.status.total_nodes_ready >= 1,
                "no ready node after a status report"
            );

            let expected = ctx.datastore()?.node_summary().await?;
            assert_snapshot(&expected, &actual)
        })
        .await
    })
}

/// Announce a concentrator for the tenant from a network node agent and wait
/// until the datastore records it.
async fn add_concentrator(ctx: &TestContext, fixture: &Fixture) -> Result<InstanceId> {
    driver::with_agent(ctx, Role::CnciAgent, |agent| async move {
        let instance: InstanceId = uuid::Uuid::new_v4()
            .to_string()
            .parse()
            .map_err(|e| HarnessError::precondition(format!("cnci id: {}", e)))?;

        agent
            .send(&ConcentratorInstanceAddedPayload {
                instance_uuid: instance.clone(),
                tenant_uuid: fixture.tenant.clone(),
                concentrator_ip: "192.168.0.1".to_string(),
                concentrator_mac: "02:00:c0:a8:00:01".to_string(),
            })
            .await?;

        let datastore = ctx.datastore()?;
        let watched = instance.clone();
        driver::poll_until(ctx, "concentrator recorded", move || {
            let watched = watched.clone();
            async move {
                let cncis = datastore.cnci_summary().await?;
                Ok(cncis.cncis.iter().any(|c| c.id == watched))
            }
        })
        .await?;
        Ok(instance)
    })
    .await
}

pub fn list_cncis(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let cnci = add_concentrator(ctx, &fixture).await?;

        let actual: Cncis = get(ctx, "cncis", "/cncis").await?;
        ensure!(
            actual.cncis.iter().any(|c| c.id == cnci),
            "cnci {} missing from listing",
            cnci
        );

        let expected = ctx.datastore()?.cnci_summary().await?;
        assert_snapshot(&expected, &actual)
    })
}

pub fn list_cnci_details(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        add_concentrator(ctx, &fixture).await?;

        let listing: Cncis = get(ctx, "cncis", "/cncis").await?;
        for cnci in &listing.cncis {
            let actual: CnciDetails =
                get(ctx, "cnci details", &format!("/cncis/{}/detail", cnci.id)).await?;
            let expected = ctx.datastore()?.cnci(&cnci.id).await?;
            assert_snapshot(&expected, &actual)?;
        }
        Ok(())
    })
}
