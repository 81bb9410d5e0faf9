//! # cpat-mock-controller
//!
//! A small in-memory controller that speaks both faces the harness drives:
//! the compute REST API over mutually authenticated HTTPS, and the control
//! protocol agents connect to. It exists so the harness can be run and
//! tested end to end without a real cluster.
//!
//! ## Example
//!
//! ```ignore
//! let mock = MockController::start(&MockConfig::default()).await?;
//! let ctx = TestContext::new(mock.harness_config())?
//!     .with_datastore(mock.datastore())
//!     .with_admin_command(mock.admin_command());
//! ```

pub mod api;
pub mod config;
pub mod control;
mod datastore;
pub mod images;
pub mod pki;
pub mod serve;
pub mod state;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cpat_harness::{AdminCommand, Datastore, HarnessConfig};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::MockConfig;
use crate::control::{ControlHub, ObservedRegistry};
use crate::images::MockAdminCli;
use crate::pki::TestPki;
use crate::state::AppState;
use crate::store::Store;

/// A running controller. Both listeners stop when this is shut down or
/// dropped.
pub struct MockController {
    rest_addr: SocketAddr,
    control_addr: SocketAddr,
    pki: Arc<TestPki>,
    store: Arc<Store>,
    hub: Arc<ControlHub>,
    tenant_user: String,
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl MockController {
    /// Generate a PKI, bind both listeners, and start serving.
    pub async fn start(config: &MockConfig) -> Result<Self> {
        let pki = Arc::new(TestPki::generate(
            config.pki_dir.as_deref(),
            &config.tenant_user,
        )?);
        let store = Arc::new(Store::seeded(&config.tenant_user));
        let hub = Arc::new(ControlHub::new(Arc::clone(&store)));

        let rest_listener = TcpListener::bind(config.rest_addr)
            .await
            .with_context(|| format!("binding REST listener on {}", config.rest_addr))?;
        let control_listener = TcpListener::bind(config.control_addr)
            .await
            .with_context(|| format!("binding control listener on {}", config.control_addr))?;
        let rest_addr = rest_listener.local_addr()?;
        let control_addr = control_listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let app = api::create_router(AppState::new(Arc::clone(&store), Arc::clone(&hub)));

        let rest_task = tokio::spawn({
            let pki = Arc::clone(&pki);
            let shutdown_rx = shutdown_rx.clone();
            async move {
                if let Err(e) = serve::serve_rest(rest_listener, pki, app, shutdown_rx).await {
                    error!(error = %e, "REST listener failed");
                }
            }
        });
        let control_task = tokio::spawn({
            let pki = Arc::clone(&pki);
            let hub = Arc::clone(&hub);
            async move {
                if let Err(e) = control::serve(control_listener, pki, hub, shutdown_rx).await {
                    error!(error = %e, "Control listener failed");
                }
            }
        });

        info!(%rest_addr, %control_addr, "Mock controller listening");
        Ok(Self {
            rest_addr,
            control_addr,
            pki,
            store,
            hub,
            tenant_user: config.tenant_user.clone(),
            shutdown_tx,
            tasks: vec![rest_task, control_task],
        })
    }

    /// Base URL of the compute API.
    pub fn rest_url(&self) -> String {
        format!("https://localhost:{}", self.rest_addr.port())
    }

    /// `host:port` of the control listener, with a host name the server
    /// certificate covers.
    pub fn control_addr(&self) -> String {
        format!("localhost:{}", self.control_addr.port())
    }

    pub fn pki(&self) -> &TestPki {
        &self.pki
    }

    pub fn datastore(&self) -> Arc<dyn Datastore> {
        Arc::clone(&self.store) as Arc<dyn Datastore>
    }

    pub fn admin_command(&self) -> Arc<dyn AdminCommand> {
        Arc::new(MockAdminCli::new(Arc::clone(&self.store)))
    }

    /// What the controller received from agents.
    pub fn observed(&self) -> Arc<ObservedRegistry> {
        self.hub.observed()
    }

    /// Harness configuration pointing at this controller, with waits sized
    /// for a local process.
    pub fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            compute_url: Some(self.rest_url()),
            control_addr: Some(self.control_addr()),
            ca_cert_file: Some(self.pki.ca_file.clone()),
            admin_client_cert_file: Some(self.pki.admin_cert_file.clone()),
            client_cert_file: Some(self.pki.user_cert_file.clone()),
            agent_cert_file: Some(self.pki.agent_cert_file.clone()),
            tenant_user: self.tenant_user.clone(),
            await_timeout: Duration::from_secs(5),
            settle_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(20),
            ..HarnessConfig::default()
        }
    }

    /// Stop both listeners and wait for them to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("Mock controller stopped");
    }
}

impl Drop for MockController {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for task in &self.tasks {
            task.abort();
        }
    }
}
