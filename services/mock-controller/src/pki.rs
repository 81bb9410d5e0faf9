//! Throwaway PKI for running the controller and the harness over TLS.
//!
//! Every leaf is written as one PEM holding certificate then key, which is
//! the format the harness loads client identities from.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use rcgen::{
    BasicConstraints, CertificateParams, DnType, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose,
};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::ServerConfig;
use tempfile::TempDir;

use cpat_harness::tls;

/// Who a client certificate belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerIdentity {
    Admin,
    User(String),
    /// Signed by the CA but not issued for REST use.
    Agent,
}

/// Generated CA, server identity, and client identities.
pub struct TestPki {
    _dir: Option<TempDir>,
    pub ca_file: PathBuf,
    pub admin_cert_file: PathBuf,
    pub user_cert_file: PathBuf,
    pub agent_cert_file: PathBuf,
    ca_pem: String,
    server_chain: Vec<CertificateDer<'static>>,
    server_key: Vec<u8>,
    admin_der: CertificateDer<'static>,
    user_der: CertificateDer<'static>,
    user_name: String,
}

struct Leaf {
    pem: String,
    der: CertificateDer<'static>,
    key_der: Vec<u8>,
}

impl TestPki {
    /// Generate a fresh PKI in `dir`, or in a temporary directory that lives
    /// as long as the returned value.
    pub fn generate(dir: Option<&Path>, user_name: &str) -> Result<Self> {
        let (temp, dir) = match dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating PKI directory {}", dir.display()))?;
                (None, dir.to_path_buf())
            }
            None => {
                let temp = tempfile::Builder::new().prefix("cpat-pki-").tempdir()?;
                let path = temp.path().to_path_buf();
                (Some(temp), path)
            }
        };

        let ca_key = KeyPair::generate()?;
        let mut ca_params = CertificateParams::new(Vec::<String>::new())?;
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params
            .distinguished_name
            .push(DnType::CommonName, "cpat test CA");
        ca_params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        let ca_cert = ca_params.self_signed(&ca_key)?;

        let issue = |name: &str, sans: Vec<String>, usage: ExtendedKeyUsagePurpose| -> Result<Leaf> {
            let key = KeyPair::generate()?;
            let mut params = CertificateParams::new(sans)?;
            params.distinguished_name.push(DnType::CommonName, name);
            params.extended_key_usages = vec![usage];
            let cert = params.signed_by(&key, &ca_cert, &ca_key)?;
            Ok(Leaf {
                pem: format!("{}{}", cert.pem(), key.serialize_pem()),
                der: cert.der().clone(),
                key_der: key.serialize_der(),
            })
        };

        let server = issue(
            "cpat controller",
            vec!["localhost".to_string(), "127.0.0.1".to_string()],
            ExtendedKeyUsagePurpose::ServerAuth,
        )?;
        let admin = issue("admin", Vec::new(), ExtendedKeyUsagePurpose::ClientAuth)?;
        let user = issue(user_name, Vec::new(), ExtendedKeyUsagePurpose::ClientAuth)?;
        let agent = issue("agent", Vec::new(), ExtendedKeyUsagePurpose::ClientAuth)?;

        let ca_pem = ca_cert.pem();
        let write = |file: &str, contents: &str| -> Result<PathBuf> {
            let path = dir.join(file);
            std::fs::write(&path, contents)
                .with_context(|| format!("writing {}", path.display()))?;
            Ok(path)
        };

        let ca_file = write("ca.pem", &ca_pem)?;
        write("server.pem", &server.pem)?;
        let admin_cert_file = write("auth-admin.pem", &admin.pem)?;
        let user_cert_file = write(&format!("auth-{}.pem", user_name), &user.pem)?;
        let agent_cert_file = write("agent.pem", &agent.pem)?;

        Ok(Self {
            _dir: temp,
            ca_file,
            admin_cert_file,
            user_cert_file,
            agent_cert_file,
            ca_pem,
            server_chain: vec![server.der],
            server_key: server.key_der,
            admin_der: admin.der,
            user_der: user.der,
            user_name: user_name.to_string(),
        })
    }

    /// Server config that asks for, but does not require, a client
    /// certificate; callers decide what an anonymous peer may do.
    pub fn server_config(&self) -> Result<Arc<ServerConfig>> {
        let roots = tls::root_store(self.ca_pem.as_bytes())?;
        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), tls::provider())
            .allow_unauthenticated()
            .build()
            .context("building client verifier")?;

        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(self.server_key.clone()));
        let config = ServerConfig::builder_with_provider(tls::provider())
            .with_safe_default_protocol_versions()?
            .with_client_cert_verifier(verifier)
            .with_single_cert(self.server_chain.clone(), key)
            .context("building server config")?;

        Ok(Arc::new(config))
    }

    /// Map a verified peer certificate chain to an identity.
    pub fn identify(&self, chain: Option<&[CertificateDer<'_>]>) -> Option<PeerIdentity> {
        let leaf = chain?.first()?;
        if leaf.as_ref() == self.admin_der.as_ref() {
            Some(PeerIdentity::Admin)
        } else if leaf.as_ref() == self.user_der.as_ref() {
            Some(PeerIdentity::User(self.user_name.clone()))
        } else {
            Some(PeerIdentity::Agent)
        }
    }
}
