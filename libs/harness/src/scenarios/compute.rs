//! Instance lifecycle and action scenarios.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use reqwest::{Method, StatusCode};
use tracing::info;

use cpat_proto::{CommandKind, DeletePayload, InstanceState, RestartPayload, Role, StopPayload};

use crate::api::{Server, Servers};
use crate::compare::assert_snapshot;
use crate::context::TestContext;
use crate::driver::{self, OS_START, OS_STOP};
use crate::ensure;
use crate::error::{HarnessError, Result};
use crate::session::receive;

// =============================================================================
// Instances
// =============================================================================

pub fn create_single_server(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let created = driver::create_servers(ctx, &fixture, 1, None).await?;
        let id = &created.servers[0].id;

        let listed = driver::list_servers(ctx, &fixture.tenant).await?;
        ensure!(
            listed.servers.iter().any(|s| &s.id == id),
            "created server {} missing from tenant listing",
            id
        );
        Ok(())
    })
}

pub fn list_server_details_tenant(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let created = driver::create_servers(ctx, &fixture, 3, None).await?;

        let actual = driver::list_servers(ctx, &fixture.tenant).await?;
        let matching = driver::only(&actual, &driver::ids(&created));
        ensure!(
            matching.len() >= 3,
            "listing holds {} of the 3 created servers",
            matching.len()
        );

        let expected = ctx.datastore()?.instances(&fixture.tenant).await?;
        assert_snapshot(&expected, &actual)
    })
}

pub fn show_server_details(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let created = driver::create_servers(ctx, &fixture, 1, None).await?;
        let id = &created.servers[0].id;

        let actual = driver::show_server(ctx, &fixture.tenant, id).await?;
        let expected = ctx
            .datastore()?
            .instances(&fixture.tenant)
            .await?
            .servers
            .into_iter()
            .find(|s| &s.id == id)
            .map(|server| Server { server })
            .ok_or_else(|| {
                HarnessError::assertion(format!("datastore has no record of {}", id))
            })?;
        assert_snapshot(&expected, &actual)
    })
}

pub fn show_server_details_unauthorized(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let created = driver::create_servers(ctx, &fixture, 1, None).await?;
        let url = ctx.tenant_url(
            &fixture.tenant,
            &format!("/instances/{}", created.servers[0].id),
        );
        ctx.anonymous()
            .execute(Method::GET, &url, None, StatusCode::UNAUTHORIZED)
            .await?;
        Ok(())
    })
}

/// Create ten instances on an agent, then walk the tenant's whole listing:
/// bound instances delete with no content, unbound ones are refused.
pub fn delete_server(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            let created = driver::create_on_agent(ctx, &agent, &fixture, 10, None).await?;
            let listed = driver::list_servers(ctx, &fixture.tenant).await?;
            ensure!(
                driver::only(&listed, &created).len() == created.len(),
                "listing shows {} of {} created instances",
                driver::only(&listed, &created).len(),
                created.len()
            );

            let node = agent.uuid().node_id();
            let (mut deleted, mut refused) = (0usize, 0usize);
            for server in &listed.servers {
                let Some(bound) = &server.node_id else {
                    driver::delete_server(ctx, &fixture.tenant, &server.id, StatusCode::FORBIDDEN)
                        .await?;
                    refused += 1;
                    continue;
                };

                let waiter = if bound == &node {
                    Some(agent.register(CommandKind::Delete)?)
                } else {
                    None
                };
                driver::delete_server(ctx, &fixture.tenant, &server.id, StatusCode::NO_CONTENT)
                    .await?;
                if let Some(waiter) = waiter {
                    let delete: DeletePayload = receive(waiter, ctx.config.await_timeout).await?;
                    ensure!(
                        delete.instance_uuid == server.id,
                        "delete command named {} instead of {}",
                        delete.instance_uuid,
                        server.id
                    );
                }
                driver::expect_gone(ctx, &fixture.tenant, &server.id).await?;
                deleted += 1;
            }
            info!(deleted, refused, "Walked tenant instances");

            let held: Vec<_> = created.iter().filter(|id| agent.state().holds(id)).collect();
            ensure!(held.is_empty(), "agent still holds deleted {:?}", held);
            Ok(())
        })
        .await
    })
}

pub fn delete_unscheduled_server(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let created = driver::create_servers(ctx, &fixture, 1, None).await?;
        driver::delete_server(
            ctx,
            &fixture.tenant,
            &created.servers[0].id,
            StatusCode::FORBIDDEN,
        )
        .await
    })
}

// =============================================================================
// Actions
// =============================================================================

pub fn servers_action_start(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            let ids = driver::create_on_agent(ctx, &agent, &fixture, 1, None).await?;
            let id = &ids[0];
            driver::stop_and_confirm(ctx, &agent, &fixture.tenant, id).await?;

            let waiter = agent.register(CommandKind::Restart)?;
            driver::servers_action(ctx, &fixture.tenant, OS_START, &ids, StatusCode::ACCEPTED)
                .await?;
            let restart: RestartPayload = receive(waiter, ctx.config.await_timeout).await?;
            ensure!(
                &restart.instance_uuid == id,
                "restart command named {} instead of {}",
                restart.instance_uuid,
                id
            );
            Ok(())
        })
        .await
    })
}

pub fn servers_action_stop(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            let ids = driver::create_on_agent(ctx, &agent, &fixture, 2, None).await?;
            driver::servers_action(ctx, &fixture.tenant, OS_STOP, &ids, StatusCode::ACCEPTED)
                .await?;

            let watched = Arc::clone(&agent);
            let stop_ids = ids.clone();
            driver::poll_until(ctx, "stop commands for every server", move || {
                let state = watched.state();
                let done = stop_ids.iter().all(|id| state.stops(id) >= 1);
                async move { Ok(done) }
            })
            .await?;

            let state = agent.state();
            for id in &ids {
                ensure!(
                    state.stops(id) == 1,
                    "expected exactly one stop for {}, agent saw {}",
                    id,
                    state.stops(id)
                );
            }
            Ok(())
        })
        .await
    })
}

pub fn servers_action_wrong_action(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let created = driver::create_servers(ctx, &fixture, 1, None).await?;
        driver::servers_action(
            ctx,
            &fixture.tenant,
            "os-no-such-action",
            &driver::ids(&created),
            StatusCode::SERVICE_UNAVAILABLE,
        )
        .await
    })
}

pub fn server_action_stop(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            let ids = driver::create_on_agent(ctx, &agent, &fixture, 1, None).await?;
            let id = &ids[0];

            let waiter = agent.register(CommandKind::Stop)?;
            driver::server_action(ctx, &fixture.tenant, id, OS_STOP, StatusCode::ACCEPTED).await?;
            let stop: StopPayload = receive(waiter, ctx.config.await_timeout).await?;
            ensure!(
                &stop.instance_uuid == id,
                "stop command named {} instead of {}",
                stop.instance_uuid,
                id
            );
            ensure!(
                agent.state().stops(id) == 1,
                "expected exactly one stop for {}",
                id
            );
            info!(instance_id = %id, "Stop correlated");
            Ok(())
        })
        .await
    })
}

pub fn server_action_start(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        driver::with_agent(ctx, Role::Agent, |agent| async move {
            let ids = driver::create_on_agent(ctx, &agent, &fixture, 1, None).await?;
            let id = &ids[0];
            driver::stop_and_confirm(ctx, &agent, &fixture.tenant, id).await?;

            let waiter = agent.register(CommandKind::Restart)?;
            driver::server_action(ctx, &fixture.tenant, id, OS_START, StatusCode::ACCEPTED)
                .await?;
            let restart: RestartPayload = receive(waiter, ctx.config.await_timeout).await?;
            ensure!(
                &restart.instance_uuid == id,
                "restart command named {} instead of {}",
                restart.instance_uuid,
                id
            );

            driver::report_and_converge(ctx, &agent, &fixture.tenant, &ids).await?;
            driver::await_status(ctx, &fixture.tenant, id, InstanceState::Running).await
        })
        .await
    })
}

pub fn stop_unscheduled_server(ctx: &TestContext) -> BoxFuture<'_, Result<()>> {
    Box::pin(async move {
        let fixture = ctx.fixture().await?;
        let created: Servers = driver::create_servers(ctx, &fixture, 1, None).await?;
        driver::server_action(
            ctx,
            &fixture.tenant,
            &created.servers[0].id,
            OS_STOP,
            StatusCode::FORBIDDEN,
        )
        .await
    })
}
