//! Error handling and display for the CLI.

use colored::Colorize;
use cpat_harness::{FailureClass, HarnessError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{failed} of {total} scenarios failed")]
    ScenariosFailed { failed: usize, total: usize },

    #[error(transparent)]
    Harness(#[from] HarnessError),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(CliError::Harness(harness)) = err.downcast_ref::<CliError>() {
        if harness.class() == FailureClass::Precondition {
            eprintln!(
                "\n{}",
                "Hint: check the CPAT_* settings, or unset CPAT_COMPUTE_URL to run against the built-in controller."
                    .yellow()
            );
        }
    }
}
