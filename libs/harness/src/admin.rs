//! The administrative CLI collaborator and the image helpers built on it.
//!
//! Some operations are driven through the operator's command-line client
//! rather than REST, which exercises a little more of the deployment. The
//! client is reached only through [`AdminCommand`], so tests can inject a
//! double.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use cpat_id::TenantId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Template asking the client to print one object as JSON.
pub const JSON_TEMPLATE: &str = "{{tojson .}}";

/// Template asking the client to print the number of listed objects.
pub const COUNT_TEMPLATE: &str = "{{len .}}";

/// Template rendering a list as a JSON object keyed by image ID.
pub const IMAGE_MAP_TEMPLATE: &str = r#"
{
{{- range $i, $val := .}}
  {{- if $i }},{{end}}
  "{{$val.ID | js }}" : {{tojson $val}}
{{- end }}
}
"#;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("unable to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("admin command exited with {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("unable to decode admin output as {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected admin output: {0}")]
    InvalidOutput(String),

    #[error("admin fixture error: {0}")]
    Fixture(#[from] std::io::Error),
}

/// Who the command runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub tenant: TenantId,
    pub as_admin: bool,
}

/// Runs the administrative client.
#[async_trait]
pub trait AdminCommand: Send + Sync {
    /// Run with `args`, returning standard output.
    ///
    /// A non-zero exit is [`AdminError::Failed`].
    async fn run(&self, invocation: &Invocation, args: &[String]) -> Result<Vec<u8>, AdminError>;
}

/// [`AdminCommand`] that executes a binary.
#[derive(Debug, Clone)]
pub struct CliAdminCommand {
    pub program: PathBuf,
    pub compute_url: Option<String>,
    pub ca_cert_file: Option<PathBuf>,
    pub admin_cert_file: Option<PathBuf>,
    pub user_cert_file: Option<PathBuf>,
}

#[async_trait]
impl AdminCommand for CliAdminCommand {
    async fn run(&self, invocation: &Invocation, args: &[String]) -> Result<Vec<u8>, AdminError> {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .env("CPAT_TENANT_ID", invocation.tenant.as_str())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(url) = &self.compute_url {
            command.env("CPAT_COMPUTE_URL", url);
        }
        if let Some(ca) = &self.ca_cert_file {
            command.env("CPAT_CA_CERT_FILE", ca);
        }
        let cert = if invocation.as_admin {
            &self.admin_cert_file
        } else {
            &self.user_cert_file
        };
        if let Some(cert) = cert {
            command.env("CPAT_CLIENT_CERT_FILE", cert);
        }

        debug!(program = %self.program.display(), args = ?args, admin = invocation.as_admin, "Running admin command");

        let output = command.output().await.map_err(|source| AdminError::Spawn {
            program: self.program.display().to_string(),
            source,
        })?;

        if !output.status.success() {
            return Err(AdminError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

// =============================================================================
// Images
// =============================================================================

/// Caller-supplied image metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageOptions {
    pub id: Option<String>,
    pub name: Option<String>,
    pub visibility: Option<String>,
}

impl ImageOptions {
    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(id) = &self.id {
            args.extend(["-id".to_string(), id.clone()]);
        }
        if let Some(name) = &self.name {
            args.extend(["-name".to_string(), name.clone()]);
        }
        if let Some(visibility) = &self.visibility {
            args.extend(["-visibility".to_string(), visibility.clone()]);
        }
        args
    }
}

/// Image metadata as the image service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Visibility", default)]
    pub visibility: String,
    #[serde(rename = "size", default)]
    pub size_bytes: u64,
    #[serde(rename = "state", default)]
    pub status: String,
    #[serde(rename = "create_time", default)]
    pub created_date: String,
}

fn args<const N: usize>(fixed: [&str; N]) -> Vec<String> {
    fixed.iter().map(|s| s.to_string()).collect()
}

fn decode<T: serde::de::DeserializeOwned>(what: &'static str, out: &[u8]) -> Result<T, AdminError> {
    serde_json::from_slice(out).map_err(|source| AdminError::Decode { what, source })
}

/// Upload the file at `path` as a new image.
pub async fn add_image(
    admin: &dyn AdminCommand,
    invocation: &Invocation,
    path: &Path,
    options: &ImageOptions,
) -> Result<Image, AdminError> {
    let mut argv = args(["image", "add", "-f", JSON_TEMPLATE, "-file"]);
    argv.push(path.display().to_string());
    argv.extend(options.args());
    decode("image", &admin.run(invocation, &argv).await?)
}

/// Upload `size_mib` MiB of generated data as a new image.
pub async fn add_generated_image(
    admin: &dyn AdminCommand,
    invocation: &Invocation,
    size_mib: usize,
    options: &ImageOptions,
) -> Result<Image, AdminError> {
    let file = tempfile::Builder::new().prefix("cpat-image-").tempfile()?;
    let chunk: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();
    for _ in 0..size_mib {
        std::io::Write::write_all(&mut file.as_file(), &chunk)?;
    }
    // The temp file is removed when `file` drops.
    add_image(admin, invocation, file.path(), options).await
}

pub async fn get_image(
    admin: &dyn AdminCommand,
    invocation: &Invocation,
    id: &str,
) -> Result<Image, AdminError> {
    let mut argv = args(["image", "show", "-image"]);
    argv.extend([id.to_string(), "-f".to_string(), JSON_TEMPLATE.to_string()]);
    decode("image", &admin.run(invocation, &argv).await?)
}

/// Every image, keyed by ID.
pub async fn list_images(
    admin: &dyn AdminCommand,
    invocation: &Invocation,
) -> Result<HashMap<String, Image>, AdminError> {
    let argv = args(["image", "list", "-f", IMAGE_MAP_TEMPLATE]);
    decode("image map", &admin.run(invocation, &argv).await?)
}

pub async fn delete_image(
    admin: &dyn AdminCommand,
    invocation: &Invocation,
    id: &str,
) -> Result<(), AdminError> {
    let mut argv = args(["image", "delete", "-image"]);
    argv.push(id.to_string());
    admin.run(invocation, &argv).await?;
    Ok(())
}

pub async fn image_count(
    admin: &dyn AdminCommand,
    invocation: &Invocation,
) -> Result<usize, AdminError> {
    let argv = args(["image", "list", "-f", COUNT_TEMPLATE]);
    let out = admin.run(invocation, &argv).await?;
    let text = String::from_utf8_lossy(&out);
    text.trim()
        .parse()
        .map_err(|_| AdminError::InvalidOutput(format!("expected an image count, got {:?}", text)))
}
