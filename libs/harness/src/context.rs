//! Everything a scenario needs, threaded explicitly.

use std::sync::Arc;

use cpat_id::{AgentUuid, TenantId, WorkloadId};
use cpat_proto::Role;
use rustls::ClientConfig;

use crate::admin::{AdminCommand, Invocation};
use crate::config::HarnessConfig;
use crate::datastore::Datastore;
use crate::error::{HarnessError, Result};
use crate::http::SecureClient;
use crate::session::AgentSession;

/// Where and how simulated agents connect.
#[derive(Clone)]
pub struct ControlEndpoint {
    pub addr: String,
    pub tls: Arc<ClientConfig>,
}

/// Tenant and workload the scenarios act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fixture {
    pub tenant: TenantId,
    pub workload: WorkloadId,
}

/// Endpoints, credentials, collaborators, and timeouts for one run.
pub struct TestContext {
    pub config: HarnessConfig,
    compute_url: String,
    admin: SecureClient,
    user: SecureClient,
    anonymous: SecureClient,
    control: Option<ControlEndpoint>,
    datastore: Option<Arc<dyn Datastore>>,
    admin_command: Option<Arc<dyn AdminCommand>>,
}

impl TestContext {
    /// Build clients from the configuration.
    ///
    /// The admin certificate is required. Tenant calls fall back to it when
    /// no user certificate is configured. Agent sessions are available only
    /// when a control address, an agent certificate, and a CA are all set.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        let compute_url = config
            .compute_url
            .clone()
            .ok_or_else(|| HarnessError::precondition("CPAT_COMPUTE_URL is not set"))?;
        let admin_cert = config
            .admin_client_cert_file
            .clone()
            .ok_or_else(|| HarnessError::precondition("CPAT_ADMIN_CLIENT_CERT_FILE is not set"))?;
        let ca = config.ca_cert_file.as_deref();

        let admin = SecureClient::new(&admin_cert, ca)?;
        let user = match &config.client_cert_file {
            Some(cert) => SecureClient::new(cert, ca)?,
            None => admin.clone(),
        };
        let anonymous = SecureClient::anonymous(ca)?;

        let control = match (&config.control_addr, &config.agent_cert_file, ca) {
            (Some(addr), Some(cert), Some(ca)) => Some(ControlEndpoint {
                addr: addr.clone(),
                tls: crate::tls::client_config(cert, ca)?,
            }),
            _ => None,
        };

        Ok(Self {
            config,
            compute_url,
            admin,
            user,
            anonymous,
            control,
            datastore: None,
            admin_command: None,
        })
    }

    pub fn with_datastore(mut self, datastore: Arc<dyn Datastore>) -> Self {
        self.datastore = Some(datastore);
        self
    }

    pub fn with_admin_command(mut self, command: Arc<dyn AdminCommand>) -> Self {
        self.admin_command = Some(command);
        self
    }

    pub fn admin(&self) -> &SecureClient {
        &self.admin
    }

    pub fn user(&self) -> &SecureClient {
        &self.user
    }

    pub fn anonymous(&self) -> &SecureClient {
        &self.anonymous
    }

    pub fn has_datastore(&self) -> bool {
        self.datastore.is_some()
    }

    pub fn has_control(&self) -> bool {
        self.control.is_some()
    }

    pub fn has_admin_command(&self) -> bool {
        self.admin_command.is_some()
    }

    pub fn datastore(&self) -> Result<&dyn Datastore> {
        self.datastore
            .as_deref()
            .ok_or_else(|| HarnessError::precondition("no datastore handle configured"))
    }

    pub fn admin_command(&self) -> Result<&dyn AdminCommand> {
        self.admin_command
            .as_deref()
            .ok_or_else(|| HarnessError::precondition("no admin command configured"))
    }

    /// Open a simulated agent session.
    pub async fn connect_agent(&self, role: Role) -> Result<AgentSession> {
        let control = self
            .control
            .as_ref()
            .ok_or_else(|| HarnessError::precondition("no control endpoint configured"))?;
        let uuid = match (role, self.config.agent_uuid) {
            (Role::Agent, Some(uuid)) => uuid,
            _ => AgentUuid::new(),
        };
        AgentSession::connect(
            &control.addr,
            Arc::clone(&control.tls),
            role,
            uuid,
            self.config.await_timeout,
        )
        .await
    }

    /// Resolve the tenant and a workload to launch.
    pub async fn fixture(&self) -> Result<Fixture> {
        let datastore = self.datastore()?;
        let tenant = datastore.tenant(&self.config.tenant_user).await?;
        let workload = datastore
            .workloads(&tenant)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                HarnessError::precondition(format!("tenant {} has no workloads", tenant))
            })?;
        Ok(Fixture { tenant, workload })
    }

    /// Who image commands run as.
    pub fn invocation(&self, tenant: &TenantId, as_admin: bool) -> Invocation {
        Invocation {
            tenant: tenant.clone(),
            as_admin,
        }
    }

    // =========================================================================
    // URLs
    // =========================================================================

    /// `{base}{path}`; `path` starts with `/`.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.compute_url, path)
    }

    /// `{base}/{tenant}{suffix}`.
    pub fn tenant_url(&self, tenant: &TenantId, suffix: &str) -> String {
        format!("{}/{}{}", self.compute_url, tenant, suffix)
    }

    /// `{base}/v2.1{suffix}`.
    pub fn v21_url(&self, suffix: &str) -> String {
        format!("{}/v2.1{}", self.compute_url, suffix)
    }

    /// `{base}/v2.1/{tenant}{suffix}`.
    pub fn v21_tenant_url(&self, tenant: &TenantId, suffix: &str) -> String {
        format!("{}/v2.1/{}{}", self.compute_url, tenant, suffix)
    }
}
