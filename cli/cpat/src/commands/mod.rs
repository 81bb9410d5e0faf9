//! CLI commands.

mod list;
mod run;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::output::OutputFormat;

/// cpat - acceptance tests for an event-driven cluster control plane.
#[derive(Debug, Parser)]
#[command(name = "cpat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format.
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    /// Log level when RUST_LOG is unset.
    #[arg(long, global = true, env = "CPAT_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List the scenario catalogue.
    List,

    /// Run scenarios and report each outcome.
    Run(run::RunCommand),
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        init_tracing(&self.log_level, self.log_json);

        match self.command {
            Commands::List => list::run(self.format),
            Commands::Run(cmd) => cmd.run(self.format).await,
        }
    }
}

/// Logs go to stderr so stdout stays parseable.
fn init_tracing(level: &str, json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .boxed()
    };
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_parses_repeated_only() {
        let cli = Cli::try_parse_from([
            "cpat",
            "run",
            "--only",
            "list-nodes",
            "--only",
            "node-summary",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        match cli.command {
            Commands::Run(cmd) => assert_eq!(cmd.only, vec!["list-nodes", "node-summary"]),
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_unknown_format_is_rejected() {
        assert!(Cli::try_parse_from(["cpat", "list", "--format", "yaml"]).is_err());
    }
}
