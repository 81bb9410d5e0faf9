//! Configuration for the reference controller.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// REST listener; port 0 picks a free port.
    pub rest_addr: SocketAddr,

    /// Control protocol listener; port 0 picks a free port.
    pub control_addr: SocketAddr,

    /// Where the generated PKI is written. A temporary directory when unset.
    pub pki_dir: Option<PathBuf>,

    /// User owning the seeded tenant.
    pub tenant_user: String,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            rest_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            control_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            pki_dir: None,
            tenant_user: "demo".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl MockConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let rest_addr = match std::env::var("MOCK_CONTROLLER_REST_ADDR") {
            Ok(addr) => addr
                .parse()
                .with_context(|| format!("MOCK_CONTROLLER_REST_ADDR: invalid address {addr:?}"))?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], 8774)),
        };

        let control_addr = match std::env::var("MOCK_CONTROLLER_CONTROL_ADDR") {
            Ok(addr) => addr.parse().with_context(|| {
                format!("MOCK_CONTROLLER_CONTROL_ADDR: invalid address {addr:?}")
            })?,
            Err(_) => SocketAddr::from(([127, 0, 0, 1], 8888)),
        };

        let pki_dir = std::env::var("MOCK_CONTROLLER_PKI_DIR").ok().map(PathBuf::from);

        let tenant_user =
            std::env::var("MOCK_CONTROLLER_TENANT_USER").unwrap_or(defaults.tenant_user);

        let log_level =
            std::env::var("MOCK_CONTROLLER_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            rest_addr,
            control_addr,
            pki_dir,
            tenant_user,
            log_level,
        })
    }
}
