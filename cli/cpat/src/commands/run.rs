//! `cpat run`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use cpat_harness::{runner, CliAdminCommand, HarnessConfig, TestContext};
use cpat_mock_controller::{config::MockConfig, MockController};
use tracing::info;

use crate::error::CliError;
use crate::output::{print_reports, OutputFormat, Tally};

#[derive(Debug, Args)]
pub struct RunCommand {
    /// Run only the named scenario; repeatable. Runs everything when absent.
    #[arg(long = "only", value_name = "NAME")]
    pub only: Vec<String>,

    /// Base URL of the compute API. Without one, scenarios run against the
    /// built-in reference controller.
    #[arg(long, env = "CPAT_COMPUTE_URL")]
    compute_url: Option<String>,

    /// `host:port` of the control protocol listener.
    #[arg(long, env = "CPAT_CONTROL_ADDR")]
    control_addr: Option<String>,

    /// Administrative CLI binary for image scenarios.
    #[arg(long, env = "CPAT_ADMIN_CLI")]
    admin_cli: Option<PathBuf>,
}

impl RunCommand {
    pub async fn run(self, format: OutputFormat) -> Result<()> {
        let selected = runner::select(&self.only).map_err(CliError::from)?;

        let mut config = HarnessConfig::from_env().map_err(CliError::from)?;
        if let Some(url) = self.compute_url {
            config.compute_url = Some(url.trim_end_matches('/').to_string());
        }
        if self.control_addr.is_some() {
            config.control_addr = self.control_addr;
        }
        if self.admin_cli.is_some() {
            config.admin_cli = self.admin_cli;
        }

        // Keeps the built-in controller alive for the whole run.
        let mut local = None;
        let ctx = if config.compute_url.is_some() {
            deployment_context(config)?
        } else {
            let mock = MockController::start(&MockConfig::default())
                .await
                .context("starting the built-in controller")?;
            info!(url = %mock.rest_url(), "Running against the built-in controller");
            let ctx = TestContext::new(mock.harness_config())
                .map_err(CliError::from)?
                .with_datastore(mock.datastore())
                .with_admin_command(mock.admin_command());
            local = Some(mock);
            ctx
        };

        let reports = runner::run_all(&ctx, &selected).await;
        print_reports(&reports, format);

        if let Some(mock) = local {
            mock.shutdown().await;
        }

        let tally = Tally::of(&reports);
        if tally.failed > 0 {
            return Err(CliError::ScenariosFailed {
                failed: tally.failed,
                total: reports.len(),
            }
            .into());
        }
        Ok(())
    }
}

/// Context for a live deployment. Scenarios that need the datastore handle
/// are skipped, since a deployment's database is not reachable from here.
fn deployment_context(config: HarnessConfig) -> Result<TestContext> {
    let admin_command = config.admin_cli.clone().map(|program| CliAdminCommand {
        program,
        compute_url: config.compute_url.clone(),
        ca_cert_file: config.ca_cert_file.clone(),
        admin_cert_file: config.admin_client_cert_file.clone(),
        user_cert_file: config.client_cert_file.clone(),
    });

    let mut ctx = TestContext::new(config).map_err(CliError::from)?;
    if let Some(command) = admin_command {
        ctx = ctx.with_admin_command(Arc::new(command));
    }
    Ok(ctx)
}
