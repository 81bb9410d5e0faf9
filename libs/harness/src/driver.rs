//! Building blocks the scenarios are sequenced from.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cpat_id::{InstanceId, TenantId, TraceLabel};
use cpat_proto::{CommandKind, InstanceState, Role, StopPayload};
use reqwest::{Method, StatusCode};
use tracing::{debug, info};

use crate::api::{CreateServerRequest, Server, ServerDetails, Servers, ServersAction};
use crate::context::{Fixture, TestContext};
use crate::error::{HarnessError, Result};
use crate::http::{decode, json_body};
use crate::session::{receive, AgentSession};
use crate::ensure;

pub const OS_START: &str = "os-start";
pub const OS_STOP: &str = "os-stop";

// =============================================================================
// Instances
// =============================================================================

/// Create `count` instances and check the service reports exactly that many.
pub async fn create_servers(
    ctx: &TestContext,
    fixture: &Fixture,
    count: u32,
    trace_label: Option<TraceLabel>,
) -> Result<Servers> {
    let mut request = CreateServerRequest::new(
        format!("cpat-{}", uuid::Uuid::new_v4().simple()),
        fixture.workload.clone(),
        count,
    );
    if let Some(label) = trace_label {
        request = request.with_trace_label(label);
    }

    let body = ctx
        .user()
        .execute(
            Method::POST,
            &ctx.tenant_url(&fixture.tenant, "/instances"),
            Some(json_body(&request)?),
            StatusCode::ACCEPTED,
        )
        .await?;
    let servers: Servers = decode("servers", &body)?;

    ensure!(
        servers.total_servers == count as usize && servers.servers.len() == count as usize,
        "requested {} servers, service reported {} ({} listed)",
        count,
        servers.total_servers,
        servers.servers.len()
    );
    info!(tenant = %fixture.tenant, count, "Created servers");
    Ok(servers)
}

pub async fn list_servers(ctx: &TestContext, tenant: &TenantId) -> Result<Servers> {
    let body = ctx
        .user()
        .execute(
            Method::GET,
            &ctx.tenant_url(tenant, "/instances/detail"),
            None,
            StatusCode::OK,
        )
        .await?;
    decode("servers", &body)
}

pub async fn show_server(ctx: &TestContext, tenant: &TenantId, id: &InstanceId) -> Result<Server> {
    let body = ctx
        .user()
        .execute(
            Method::GET,
            &ctx.tenant_url(tenant, &format!("/instances/{}", id)),
            None,
            StatusCode::OK,
        )
        .await?;
    decode("server", &body)
}

pub async fn expect_gone(ctx: &TestContext, tenant: &TenantId, id: &InstanceId) -> Result<()> {
    ctx.user()
        .execute(
            Method::GET,
            &ctx.tenant_url(tenant, &format!("/instances/{}", id)),
            None,
            StatusCode::NOT_FOUND,
        )
        .await?;
    Ok(())
}

pub async fn delete_server(
    ctx: &TestContext,
    tenant: &TenantId,
    id: &InstanceId,
    expected: StatusCode,
) -> Result<()> {
    ctx.user()
        .execute(
            Method::DELETE,
            &ctx.tenant_url(tenant, &format!("/instances/{}", id)),
            None,
            expected,
        )
        .await?;
    Ok(())
}

/// Per-instance action with a raw `os-start`/`os-stop` body.
pub async fn server_action(
    ctx: &TestContext,
    tenant: &TenantId,
    id: &InstanceId,
    action: &str,
    expected: StatusCode,
) -> Result<()> {
    ctx.user()
        .execute(
            Method::POST,
            &ctx.tenant_url(tenant, &format!("/instances/{}/action", id)),
            Some(action.as_bytes().to_vec()),
            expected,
        )
        .await?;
    Ok(())
}

/// Bulk action on a list of instances.
pub async fn servers_action(
    ctx: &TestContext,
    tenant: &TenantId,
    action: &str,
    ids: &[InstanceId],
    expected: StatusCode,
) -> Result<()> {
    let body = ServersAction {
        action: action.to_string(),
        server_ids: ids.to_vec(),
    };
    ctx.user()
        .execute(
            Method::POST,
            &ctx.v21_tenant_url(tenant, "/servers/action"),
            Some(json_body(&body)?),
            expected,
        )
        .await?;
    Ok(())
}

/// Entries of `servers` whose IDs are in `ids`.
pub fn only<'a>(servers: &'a Servers, ids: &[InstanceId]) -> Vec<&'a ServerDetails> {
    servers
        .servers
        .iter()
        .filter(|s| ids.contains(&s.id))
        .collect()
}

pub fn ids(servers: &Servers) -> Vec<InstanceId> {
    servers.servers.iter().map(|s| s.id.clone()).collect()
}

// =============================================================================
// Agents
// =============================================================================

/// Run `body` with a connected agent, closing the session afterwards
/// whether `body` passed or failed.
pub async fn with_agent<F, Fut, T>(ctx: &TestContext, role: Role, body: F) -> Result<T>
where
    F: FnOnce(Arc<AgentSession>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let session = Arc::new(ctx.connect_agent(role).await?);
    let result = body(Arc::clone(&session)).await;
    session.close().await;
    result
}

/// Poll `condition` until it holds or `ctx.config.settle_timeout` elapses.
pub async fn poll_until<F, Fut>(ctx: &TestContext, what: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    poll_within(
        ctx.config.settle_timeout,
        ctx.config.poll_interval,
        what,
        &mut condition,
    )
    .await
}

/// Poll `condition` every `interval` until it holds or `timeout` elapses.
pub async fn poll_within<F, Fut>(
    timeout: Duration,
    interval: Duration,
    what: &str,
    condition: &mut F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if condition().await? {
            debug!(what, attempts, "Condition reached");
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(HarnessError::assertion(format!(
                "{} not reached within {:?} ({} attempts)",
                what, timeout, attempts
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

/// Wait until the agent holds every instance in `ids`.
pub async fn await_held(ctx: &TestContext, agent: &AgentSession, ids: &[InstanceId]) -> Result<()> {
    poll_until(ctx, "agent holding created instances", move || {
        let state = agent.state();
        let held = ids.iter().all(|id| state.holds(id));
        async move { Ok(held) }
    })
    .await
}

/// Send a status report and wait until the REST listing shows every
/// instance in `ids` bound to the agent with the reported status.
pub async fn report_and_converge(
    ctx: &TestContext,
    agent: &AgentSession,
    tenant: &TenantId,
    ids: &[InstanceId],
) -> Result<()> {
    let stats = agent.report_stats().await?;
    let node = agent.uuid().node_id();

    let stats = &stats;
    let node = &node;
    poll_until(ctx, "instances bound to the reporting node", move || {
        async move {
            let servers = list_servers(ctx, tenant).await?;
            let listed = only(&servers, ids);
            Ok(listed.len() == ids.len()
                && listed.iter().all(|s| {
                    s.node_id.as_ref() == Some(node)
                        && stats
                            .instances
                            .iter()
                            .any(|i| i.instance_uuid == s.id && i.state == s.status)
                }))
        }
    })
    .await
}

/// Create `count` instances with an agent connected and wait until they are
/// placed on it and visible as such through REST.
pub async fn create_on_agent(
    ctx: &TestContext,
    agent: &AgentSession,
    fixture: &Fixture,
    count: u32,
    trace_label: Option<TraceLabel>,
) -> Result<Vec<InstanceId>> {
    let servers = create_servers(ctx, fixture, count, trace_label).await?;
    let created = ids(&servers);
    await_held(ctx, agent, &created).await?;
    report_and_converge(ctx, agent, &fixture.tenant, &created).await?;
    Ok(created)
}

/// Wait until REST shows `id` in `state`.
pub async fn await_status(
    ctx: &TestContext,
    tenant: &TenantId,
    id: &InstanceId,
    state: InstanceState,
) -> Result<()> {
    poll_until(ctx, &format!("instance {} {}", id, state), move || async move {
        Ok(show_server(ctx, tenant, id).await?.server.status == state)
    })
    .await
}

/// Stop an instance administratively and confirm it end to end: exactly one
/// `stop` reaches the agent, the agent reports the stop, and REST shows the
/// instance exited.
pub async fn stop_and_confirm(
    ctx: &TestContext,
    agent: &AgentSession,
    tenant: &TenantId,
    id: &InstanceId,
) -> Result<()> {
    let waiter = agent.register(CommandKind::Stop)?;
    server_action(ctx, tenant, id, OS_STOP, StatusCode::ACCEPTED).await?;
    let stop: StopPayload = receive(waiter, ctx.config.await_timeout).await?;

    ensure!(
        &stop.instance_uuid == id,
        "stop command named {} instead of {}",
        stop.instance_uuid,
        id
    );
    ensure!(
        agent.state().stops(id) == 1,
        "expected exactly one stop for {}, agent saw {}",
        id,
        agent.state().stops(id)
    );

    agent.report_stopped(id).await?;
    await_status(ctx, tenant, id, InstanceState::Exited).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_poll_within_returns_once_condition_holds() {
        let calls = AtomicU32::new(0);
        let mut condition = || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n >= 2) }
        };
        poll_within(
            Duration::from_secs(2),
            Duration::from_millis(1),
            "third call",
            &mut condition,
        )
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_within_times_out_as_assertion() {
        let mut condition = || async { Ok(false) };
        let err = poll_within(
            Duration::from_millis(20),
            Duration::from_millis(5),
            "never",
            &mut condition,
        )
        .await
        .unwrap_err();
        assert_eq!(err.class(), crate::FailureClass::Assertion);
        assert!(err.to_string().contains("never"));
    }

    #[tokio::test]
    async fn test_poll_within_propagates_errors() {
        let mut condition = || async { Err::<bool, _>(HarnessError::precondition("gone")) };
        let err = poll_within(
            Duration::from_secs(1),
            Duration::from_millis(5),
            "x",
            &mut condition,
        )
        .await
        .unwrap_err();
        assert_eq!(err.class(), crate::FailureClass::Precondition);
    }
}
