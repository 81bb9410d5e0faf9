//! cpat mock controller
//!
//! Runs the in-memory controller standalone so the harness, or a person with
//! curl, can be pointed at it. Prints the settings the harness needs.

use anyhow::Result;
use cpat_mock_controller::{config::MockConfig, MockController};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = MockConfig::from_env()?;

    // Prefer RUST_LOG, fall back to MOCK_CONTROLLER_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting cpat mock controller");
    let mock = MockController::start(&config).await?;

    let pki = mock.pki();
    info!(
        CPAT_COMPUTE_URL = %mock.rest_url(),
        CPAT_CONTROL_ADDR = %mock.control_addr(),
        CPAT_CA_CERT_FILE = %pki.ca_file.display(),
        CPAT_ADMIN_CLIENT_CERT_FILE = %pki.admin_cert_file.display(),
        CPAT_CLIENT_CERT_FILE = %pki.user_cert_file.display(),
        CPAT_AGENT_CERT_FILE = %pki.agent_cert_file.display(),
        "Harness settings"
    );

    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal");
    mock.shutdown().await;
    Ok(())
}
