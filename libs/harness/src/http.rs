//! Mutually authenticated REST client.

use std::path::Path;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// REST client presenting a client certificate.
///
/// Requests are never retried. The response body is always drained, so the
/// connection goes back to the pool whether or not the status matched.
#[derive(Clone)]
pub struct SecureClient {
    client: reqwest::Client,
}

impl SecureClient {
    /// Create a client from a combined certificate and key PEM file.
    ///
    /// Fails fast when the certificate or CA bundle cannot be loaded.
    pub fn new(cert_file: &Path, ca_file: Option<&Path>) -> Result<Self> {
        let pem = std::fs::read(cert_file).map_err(|e| {
            HarnessError::precondition(format!(
                "unable to read client certificate {}: {}",
                cert_file.display(),
                e
            ))
        })?;
        let identity = reqwest::Identity::from_pem(&pem).map_err(|e| {
            HarnessError::precondition(format!(
                "unable to load client certificate {}: {}",
                cert_file.display(),
                e
            ))
        })?;

        let builder = Self::builder(ca_file)?.identity(identity);
        Self::finish(builder)
    }

    /// Create a client that presents no certificate.
    ///
    /// Only useful for checking that the service refuses it.
    pub fn anonymous(ca_file: Option<&Path>) -> Result<Self> {
        Self::finish(Self::builder(ca_file)?)
    }

    fn builder(ca_file: Option<&Path>) -> Result<reqwest::ClientBuilder> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(30));

        if let Some(ca_file) = ca_file {
            let pem = std::fs::read(ca_file).map_err(|e| {
                HarnessError::precondition(format!(
                    "unable to read CA bundle {}: {}",
                    ca_file.display(),
                    e
                ))
            })?;
            let certs = reqwest::Certificate::from_pem_bundle(&pem).map_err(|e| {
                HarnessError::precondition(format!(
                    "unable to parse CA bundle {}: {}",
                    ca_file.display(),
                    e
                ))
            })?;
            for cert in certs {
                builder = builder.add_root_certificate(cert);
            }
        }

        Ok(builder)
    }

    fn finish(builder: reqwest::ClientBuilder) -> Result<Self> {
        let client = builder
            .build()
            .map_err(|e| HarnessError::precondition(format!("unable to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Send one request and enforce the expected status.
    ///
    /// Returns the full body on success. On a status mismatch the body text
    /// is carried in the error.
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        expected: StatusCode,
    ) -> Result<Bytes> {
        debug!(method = %method, url = %url, expected = expected.as_u16(), "Sending request");

        let mut request = self
            .client
            .request(method.clone(), url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            HarnessError::precondition(format!("{} {} unreachable: {}", method, url, e))
        })?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            HarnessError::Protocol(format!("{} {}: failed to read body: {}", method, url, e))
        })?;

        if status != expected {
            let body = String::from_utf8_lossy(&body).into_owned();
            warn!(
                method = %method,
                url = %url,
                expected = expected.as_u16(),
                actual = status.as_u16(),
                "Unexpected status"
            );
            return Err(HarnessError::StatusMismatch {
                method: method.to_string(),
                url: url.to_string(),
                expected: expected.as_u16(),
                actual: status.as_u16(),
                body,
            });
        }

        Ok(body)
    }
}

/// Serialize a request body.
pub fn json_body<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| HarnessError::decode("request body", e))
}

/// Decode a response body into a snapshot type.
pub fn decode<T: serde::de::DeserializeOwned>(what: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| HarnessError::decode(what, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_execute_returns_body_on_expected_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/demo/instances/detail"))
            .and(header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"servers":[]}"#))
            .mount(&server)
            .await;

        let client = SecureClient::anonymous(None).unwrap();
        let body = client
            .execute(
                Method::GET,
                &format!("{}/demo/instances/detail", server.uri()),
                None,
                StatusCode::OK,
            )
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"servers":[]}"#);
    }

    #[tokio::test]
    async fn test_status_mismatch_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(403).set_body_string("instance has no node"))
            .mount(&server)
            .await;

        let client = SecureClient::anonymous(None).unwrap();
        let url = format!("{}/demo/instances/abc", server.uri());
        let err = client
            .execute(Method::DELETE, &url, None, StatusCode::NO_CONTENT)
            .await
            .unwrap_err();

        match err {
            HarnessError::StatusMismatch {
                method,
                url: err_url,
                expected,
                actual,
                body,
            } => {
                assert_eq!(method, "DELETE");
                assert_eq!(err_url, url);
                assert_eq!(expected, 204);
                assert_eq!(actual, 403);
                assert_eq!(body, "instance has no node");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_raw_body_is_sent_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string("os-stop"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let client = SecureClient::anonymous(None).unwrap();
        client
            .execute(
                Method::POST,
                &format!("{}/demo/instances/abc/action", server.uri()),
                Some(b"os-stop".to_vec()),
                StatusCode::ACCEPTED,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_service_is_a_precondition_failure() {
        let client = SecureClient::anonymous(None).unwrap();
        let err = client
            .execute(
                Method::GET,
                "http://127.0.0.1:1/v2.1/nodes",
                None,
                StatusCode::OK,
            )
            .await
            .unwrap_err();
        assert_eq!(err.class(), crate::FailureClass::Precondition);
    }

    #[test]
    fn test_missing_certificate_fails_fast() {
        let err = SecureClient::new(Path::new("/nonexistent/auth-admin.pem"), None)
            .err()
            .unwrap();
        assert_eq!(err.class(), crate::FailureClass::Precondition);
    }

    #[test]
    fn test_garbage_certificate_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("bad.pem");
        std::fs::write(&file, "not a pem").unwrap();
        assert!(SecureClient::new(&file, None).is_err());
    }
}
