//! Behavioural properties of the controller as seen through the harness.

mod common;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use rustls::ClientConfig;

use cpat_harness::driver::{self, OS_START, OS_STOP};
use cpat_harness::session::receive;
use cpat_harness::{tls, AgentSession, FailureClass};
use cpat_id::AgentUuid;
use cpat_mock_controller::MockController;
use cpat_proto::{CommandKind, EventKind, RestartPayload, Role, StopPayload};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test(flavor = "multi_thread")]
async fn test_placed_instances_are_listed_and_deletable() {
    let (mock, ctx) = common::start().await;
    let fixture = ctx.fixture().await.unwrap();

    driver::with_agent(&ctx, Role::Agent, |agent| {
        let (ctx, fixture) = (&ctx, &fixture);
        async move {
            let created = driver::create_on_agent(ctx, &agent, fixture, 10, None).await?;
            let listed = driver::list_servers(ctx, &fixture.tenant).await?;
            assert!(listed.total_servers >= 10);
            assert_eq!(driver::only(&listed, &created).len(), 10);

            for id in &created {
                driver::delete_server(ctx, &fixture.tenant, id, StatusCode::NO_CONTENT).await?;
                driver::expect_gone(ctx, &fixture.tenant, id).await?;
            }
            Ok(())
        }
    })
    .await
    .unwrap();

    mock.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreported_instances_cannot_be_deleted_or_stopped() {
    let (mock, ctx) = common::start().await;
    let fixture = ctx.fixture().await.unwrap();

    driver::with_agent(&ctx, Role::Agent, |agent| {
        let (ctx, fixture) = (&ctx, &fixture);
        async move {
            // The agent receives the start but never reports, so nothing binds.
            let servers = driver::create_servers(ctx, fixture, 1, None).await?;
            let ids = driver::ids(&servers);
            driver::await_held(ctx, &agent, &ids).await?;

            let id = &ids[0];
            assert!(driver::show_server(ctx, &fixture.tenant, id)
                .await?
                .server
                .node_id
                .is_none());
            driver::delete_server(ctx, &fixture.tenant, id, StatusCode::FORBIDDEN).await?;
            driver::server_action(ctx, &fixture.tenant, id, OS_STOP, StatusCode::FORBIDDEN)
                .await?;
            assert_eq!(agent.state().stops(id), 0);
            Ok(())
        }
    })
    .await
    .unwrap();

    mock.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_stop_reaches_agent_once_and_is_observed() {
    let (mock, ctx) = common::start().await;
    let fixture = ctx.fixture().await.unwrap();
    let observed = mock.observed();

    driver::with_agent(&ctx, Role::Agent, |agent| {
        let (ctx, fixture) = (&ctx, &fixture);
        async move {
            let created = driver::create_on_agent(ctx, &agent, fixture, 1, None).await?;
            let id = &created[0];

            let stopped = observed.expect(EventKind::InstanceStopped.into())?;
            driver::stop_and_confirm(ctx, &agent, &fixture.tenant, id).await?;
            stopped.wait(WAIT).await.unwrap();
            assert_eq!(agent.state().stops(id), 1);

            driver::delete_server(ctx, &fixture.tenant, id, StatusCode::NO_CONTENT).await?;
            driver::expect_gone(ctx, &fixture.tenant, id).await
        }
    })
    .await
    .unwrap();

    mock.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_actions_are_refused() {
    let (mock, ctx) = common::start().await;
    let fixture = ctx.fixture().await.unwrap();

    driver::with_agent(&ctx, Role::Agent, |agent| {
        let (ctx, fixture) = (&ctx, &fixture);
        async move {
            let created = driver::create_on_agent(ctx, &agent, fixture, 2, None).await?;
            for action in ["reboot", "os-pause", "", "OS-STOP"] {
                driver::server_action(
                    ctx,
                    &fixture.tenant,
                    &created[0],
                    action,
                    StatusCode::SERVICE_UNAVAILABLE,
                )
                .await?;
                driver::servers_action(
                    ctx,
                    &fixture.tenant,
                    action,
                    &created,
                    StatusCode::SERVICE_UNAVAILABLE,
                )
                .await?;
            }
            assert!(created.iter().all(|id| agent.state().stops(id) == 0));

            // A start of a running instance is accepted and changes nothing.
            driver::server_action(ctx, &fixture.tenant, &created[0], OS_START, StatusCode::ACCEPTED)
                .await?;
            assert_eq!(agent.state().stops(&created[0]), 0);
            Ok(())
        }
    })
    .await
    .unwrap();

    mock.shutdown().await;
}

/// Close `agent` and wait until the controller has dropped its link.
async fn close_and_forget(mock: &MockController, agent: &AgentSession) {
    let gone = mock
        .observed()
        .expect(EventKind::NodeDisconnected.into())
        .unwrap();
    agent.close().await;
    gone.wait(WAIT).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bulk_stop_with_an_unreachable_node_stops_nothing() {
    let (mock, ctx) = common::start().await;
    let fixture = ctx.fixture().await.unwrap();

    // New instances go to the newest agent, so each agent gets one.
    let live = ctx.connect_agent(Role::Agent).await.unwrap();
    let kept = driver::create_on_agent(&ctx, &live, &fixture, 1, None)
        .await
        .unwrap()
        .remove(0);
    let closing = ctx.connect_agent(Role::Agent).await.unwrap();
    let lost = driver::create_on_agent(&ctx, &closing, &fixture, 1, None)
        .await
        .unwrap()
        .remove(0);
    close_and_forget(&mock, &closing).await;

    driver::servers_action(
        &ctx,
        &fixture.tenant,
        OS_STOP,
        &[kept.clone(), lost.clone()],
        StatusCode::SERVICE_UNAVAILABLE,
    )
    .await
    .unwrap();

    // Frames on one link arrive in order: if the refused request had sent
    // anything, it would be seen before this stop.
    let waiter = live.register(CommandKind::Stop).unwrap();
    driver::servers_action(&ctx, &fixture.tenant, OS_STOP, &[kept.clone()], StatusCode::ACCEPTED)
        .await
        .unwrap();
    let stop: StopPayload = receive(waiter, WAIT).await.unwrap();
    assert_eq!(stop.instance_uuid, kept);
    assert_eq!(live.state().stops(&kept), 1);

    live.close().await;
    mock.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_start_refused_for_unreachable_node_can_be_retried() {
    let (mock, ctx) = common::start().await;
    let fixture = ctx.fixture().await.unwrap();

    let agent = ctx.connect_agent(Role::Agent).await.unwrap();
    let id = driver::create_on_agent(&ctx, &agent, &fixture, 1, None)
        .await
        .unwrap()
        .remove(0);
    driver::stop_and_confirm(&ctx, &agent, &fixture.tenant, &id)
        .await
        .unwrap();
    let uuid = agent.uuid();
    close_and_forget(&mock, &agent).await;

    driver::server_action(&ctx, &fixture.tenant, &id, OS_START, StatusCode::SERVICE_UNAVAILABLE)
        .await
        .unwrap();
    let shown = driver::show_server(&ctx, &fixture.tenant, &id).await.unwrap();
    assert_eq!(shown.server.status, cpat_proto::InstanceState::Exited);

    // The same node comes back and the start goes through this time.
    let config = tls::client_config(&mock.pki().agent_cert_file, &mock.pki().ca_file).unwrap();
    let returned = AgentSession::connect(&mock.control_addr(), config, Role::Agent, uuid, WAIT)
        .await
        .unwrap();
    let waiter = returned.register(CommandKind::Restart).unwrap();
    driver::server_action(&ctx, &fixture.tenant, &id, OS_START, StatusCode::ACCEPTED)
        .await
        .unwrap();
    let restart: RestartPayload = receive(waiter, WAIT).await.unwrap();
    assert_eq!(restart.instance_uuid, id);

    returned.close().await;
    mock.shutdown().await;
}

#[tokio::test]
async fn test_handshake_without_client_certificate_is_refused() {
    let (mock, _ctx) = common::start().await;
    let ca_pem = std::fs::read(&mock.pki().ca_file).unwrap();
    let config = ClientConfig::builder_with_provider(tls::provider())
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(tls::root_store(&ca_pem).unwrap())
        .with_no_client_auth();

    let err = AgentSession::connect(
        &mock.control_addr(),
        Arc::new(config),
        Role::Agent,
        AgentUuid::new(),
        WAIT,
    )
    .await
    .err()
    .expect("anonymous agent is refused");
    assert_eq!(err.class(), FailureClass::Precondition);

    mock.shutdown().await;
}

#[tokio::test]
async fn test_non_agent_roles_are_refused() {
    let (mock, ctx) = common::start().await;

    for role in [Role::Controller, Role::Scheduler] {
        let err = ctx
            .connect_agent(role)
            .await
            .err()
            .expect("non-agent role is refused");
        assert_eq!(err.class(), FailureClass::Precondition);
    }
    mock.shutdown().await;
}
