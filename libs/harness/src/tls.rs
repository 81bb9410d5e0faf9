//! rustls configuration for the control protocol transport.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};

use crate::error::{HarnessError, Result};

/// The crypto provider every config in the workspace is built with.
pub fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Parse every certificate in a PEM blob.
pub fn parse_certificates(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut BufReader::new(pem))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| HarnessError::precondition(format!("failed to parse certificates: {}", e)))?;
    if certs.is_empty() {
        return Err(HarnessError::precondition("no certificates found"));
    }
    Ok(certs)
}

/// Parse the first private key in a PEM blob.
pub fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut BufReader::new(pem))
        .map_err(|e| HarnessError::precondition(format!("failed to parse private key: {}", e)))?
        .ok_or_else(|| HarnessError::precondition("no private key found"))
}

/// Build a root store from a CA bundle.
pub fn root_store(ca_pem: &[u8]) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    for cert in parse_certificates(ca_pem)? {
        roots.add(cert).map_err(|e| {
            HarnessError::precondition(format!("failed to add CA certificate: {}", e))
        })?;
    }
    Ok(roots)
}

/// Client config presenting the combined certificate/key PEM in `cert_file`
/// and trusting the CA bundle in `ca_file`.
pub fn client_config(cert_file: &Path, ca_file: &Path) -> Result<Arc<ClientConfig>> {
    let identity = read(cert_file, "client certificate")?;
    let ca = read(ca_file, "CA bundle")?;

    let config = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HarnessError::precondition(format!("TLS config error: {}", e)))?
        .with_root_certificates(root_store(&ca)?)
        .with_client_auth_cert(parse_certificates(&identity)?, parse_private_key(&identity)?)
        .map_err(|e| HarnessError::precondition(format!("client config error: {}", e)))?;

    Ok(Arc::new(config))
}

/// Server name to verify for a `host:port` address.
pub fn server_name(addr: &str) -> Result<ServerName<'static>> {
    let host = match addr.rsplit_once(':') {
        Some((host, _port)) => host.trim_start_matches('[').trim_end_matches(']'),
        None => addr,
    };
    ServerName::try_from(host.to_string())
        .map_err(|e| HarnessError::precondition(format!("invalid server name {:?}: {}", host, e)))
}

fn read(path: &Path, what: &str) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        HarnessError::precondition(format!("unable to read {} {}: {}", what, path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn self_signed() -> (String, String) {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        (cert.cert.pem(), cert.key_pair.serialize_pem())
    }

    #[test]
    fn test_combined_pem_yields_cert_and_key() {
        let (cert, key) = self_signed();
        let combined = format!("{}{}", cert, key);
        assert_eq!(parse_certificates(combined.as_bytes()).unwrap().len(), 1);
        assert!(parse_private_key(combined.as_bytes()).is_ok());
    }

    #[test]
    fn test_empty_pem_is_rejected() {
        assert!(parse_certificates(b"").is_err());
        assert!(parse_private_key(b"").is_err());
    }

    #[test]
    fn test_client_config_from_files() {
        let (cert, key) = self_signed();
        let dir = tempfile::tempdir().unwrap();
        let identity = dir.path().join("agent.pem");
        let ca = dir.path().join("ca.pem");
        std::fs::write(&identity, format!("{}{}", cert, key)).unwrap();
        std::fs::write(&ca, &cert).unwrap();

        assert!(client_config(&identity, &ca).is_ok());
        assert!(client_config(&dir.path().join("missing.pem"), &ca).is_err());
    }

    #[test]
    fn test_server_name_strips_port() {
        assert!(matches!(
            server_name("127.0.0.1:8888").unwrap(),
            ServerName::IpAddress(_)
        ));
        assert!(matches!(
            server_name("localhost:8888").unwrap(),
            ServerName::DnsName(_)
        ));
        assert!(matches!(
            server_name("[::1]:8888").unwrap(),
            ServerName::IpAddress(_)
        ));
    }
}
