//! The controller over real sockets and TLS.

use std::time::Duration;

use cpat_harness::http::SecureClient;
use cpat_harness::{tls, AgentSession};
use cpat_id::AgentUuid;
use cpat_mock_controller::{config::MockConfig, MockController};
use cpat_proto::{EventKind, Role};
use reqwest::{Method, StatusCode};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("cpat_mock_controller=debug")
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn test_rest_requires_a_client_certificate() {
    init_tracing();
    let mock = MockController::start(&MockConfig::default()).await.unwrap();
    let url = format!("{}/v2.1/nodes", mock.rest_url());

    let anonymous = SecureClient::anonymous(Some(mock.pki().ca_file.as_path())).unwrap();
    anonymous
        .execute(Method::GET, &url, None, StatusCode::UNAUTHORIZED)
        .await
        .unwrap();

    let admin =
        SecureClient::new(&mock.pki().admin_cert_file, Some(mock.pki().ca_file.as_path()))
            .unwrap();
    admin
        .execute(Method::GET, &url, None, StatusCode::OK)
        .await
        .unwrap();

    mock.shutdown().await;
}

#[tokio::test]
async fn test_agent_certificate_cannot_use_rest() {
    init_tracing();
    let mock = MockController::start(&MockConfig::default()).await.unwrap();

    let agent =
        SecureClient::new(&mock.pki().agent_cert_file, Some(mock.pki().ca_file.as_path()))
            .unwrap();
    agent
        .execute(
            Method::GET,
            &format!("{}/v2.1/nodes", mock.rest_url()),
            None,
            StatusCode::FORBIDDEN,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_agent_session_connects_over_tls() {
    init_tracing();
    let mock = MockController::start(&MockConfig::default()).await.unwrap();
    let config = tls::client_config(&mock.pki().agent_cert_file, &mock.pki().ca_file).unwrap();

    let connected = mock
        .observed()
        .expect(EventKind::NodeConnected.into())
        .unwrap();
    let session = AgentSession::connect(
        &mock.control_addr(),
        config,
        Role::Agent,
        AgentUuid::new(),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    connected.wait(Duration::from_secs(5)).await.unwrap();

    let disconnected = mock
        .observed()
        .expect(EventKind::NodeDisconnected.into())
        .unwrap();
    session.close().await;
    disconnected.wait(Duration::from_secs(5)).await.unwrap();
}
