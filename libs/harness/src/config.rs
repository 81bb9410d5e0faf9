//! Configuration for a harness run.

use std::path::PathBuf;
use std::time::Duration;

use cpat_id::AgentUuid;

use crate::error::{HarnessError, Result};

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Base URL of the compute REST API. `None` means no live service.
    pub compute_url: Option<String>,

    /// `host:port` of the control protocol listener.
    pub control_addr: Option<String>,

    /// CA bundle used to verify the service.
    pub ca_cert_file: Option<PathBuf>,

    /// Combined certificate and key PEM for administrative REST calls.
    pub admin_client_cert_file: Option<PathBuf>,

    /// Combined certificate and key PEM for tenant REST calls.
    pub client_cert_file: Option<PathBuf>,

    /// Combined certificate and key PEM for simulated agents.
    pub agent_cert_file: Option<PathBuf>,

    /// Fixed identity for the simulated agent; random per session when unset.
    pub agent_uuid: Option<AgentUuid>,

    /// User whose tenant the scenarios operate on.
    pub tenant_user: String,

    /// Bound on every registry wait.
    pub await_timeout: Duration,

    /// Bound on every polling-until-condition loop.
    pub settle_timeout: Duration,

    /// Interval between polls.
    pub poll_interval: Duration,

    /// Administrative CLI binary for image scenarios.
    pub admin_cli: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            compute_url: None,
            control_addr: None,
            ca_cert_file: None,
            admin_client_cert_file: None,
            client_cert_file: None,
            agent_cert_file: None,
            agent_uuid: None,
            tenant_user: "demo".to_string(),
            await_timeout: Duration::from_millis(5000),
            settle_timeout: Duration::from_millis(10000),
            poll_interval: Duration::from_millis(100),
            admin_cli: None,
            log_level: "info".to_string(),
        }
    }
}

impl HarnessConfig {
    /// Load configuration from `CPAT_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let path = |key: &str| var(key).map(PathBuf::from);

        let agent_uuid = match var("CPAT_AGENT_UUID") {
            Some(raw) => Some(AgentUuid::parse(&raw).map_err(|e| {
                HarnessError::precondition(format!("CPAT_AGENT_UUID: {}", e))
            })?),
            None => None,
        };

        Ok(Self {
            compute_url: var("CPAT_COMPUTE_URL").map(|u| u.trim_end_matches('/').to_string()),
            control_addr: var("CPAT_CONTROL_ADDR"),
            ca_cert_file: path("CPAT_CA_CERT_FILE"),
            admin_client_cert_file: path("CPAT_ADMIN_CLIENT_CERT_FILE"),
            client_cert_file: path("CPAT_CLIENT_CERT_FILE"),
            agent_cert_file: path("CPAT_AGENT_CERT_FILE"),
            agent_uuid,
            tenant_user: var("CPAT_TENANT_USER").unwrap_or(defaults.tenant_user),
            await_timeout: millis(&var, "CPAT_AWAIT_TIMEOUT_MS")?
                .unwrap_or(defaults.await_timeout),
            settle_timeout: millis(&var, "CPAT_SETTLE_TIMEOUT_MS")?
                .unwrap_or(defaults.settle_timeout),
            poll_interval: millis(&var, "CPAT_POLL_INTERVAL_MS")?
                .unwrap_or(defaults.poll_interval),
            admin_cli: path("CPAT_ADMIN_CLI"),
            log_level: var("CPAT_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn millis<F>(var: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|_| {
                HarnessError::precondition(format!(
                    "{} must be a number of milliseconds, got {:?}",
                    key, raw
                ))
            }),
        None => Ok(None),
    }
}
