//! Shared setup: a fresh reference controller and a context wired to it.

#![allow(dead_code)]

use cpat_harness::TestContext;
use cpat_mock_controller::{config::MockConfig, MockController};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cpat_harness=info,cpat_mock_controller=info".into()),
        )
        .with_test_writer()
        .try_init();
}

/// Start a controller and build a context with every collaborator attached.
pub async fn start() -> (MockController, TestContext) {
    init_tracing();
    let mock = MockController::start(&MockConfig::default())
        .await
        .expect("controller starts");
    let ctx = TestContext::new(mock.harness_config())
        .expect("context builds")
        .with_datastore(mock.datastore())
        .with_admin_command(mock.admin_command());
    (mock, ctx)
}
