//! cpat - control-plane acceptance tests
//!
//! Lists and runs the scenario catalogue against a deployment, or against
//! the in-process reference controller when no deployment is configured.

use anyhow::Result;
use clap::Parser;

mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }

    Ok(())
}
