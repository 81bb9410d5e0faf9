//! Output formatting for CLI commands.

use colored::Colorize;
use cpat_harness::{Outcome, ScenarioReport};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

/// Print rows in the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", format_json(data)),
    }
}

fn format_json<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
}

#[derive(Debug, Tabled)]
struct ReportRow {
    #[tabled(rename = "Scenario")]
    name: &'static str,
    #[tabled(rename = "Group")]
    group: &'static str,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Time")]
    elapsed: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

fn outcome_cell(outcome: &Outcome) -> (String, String) {
    match outcome {
        Outcome::Passed => ("passed".to_string(), String::new()),
        Outcome::Failed { class, message } => (format!("failed ({})", class), first_line(message)),
        Outcome::Skipped { reason } => ("skipped".to_string(), reason.clone()),
    }
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

/// Print scenario reports, then a one-line tally.
pub fn print_reports(reports: &[ScenarioReport], format: OutputFormat) {
    if format == OutputFormat::Json {
        println!("{}", format_json(reports));
        return;
    }

    let rows: Vec<ReportRow> = reports
        .iter()
        .map(|report| {
            let (outcome, detail) = outcome_cell(&report.outcome);
            ReportRow {
                name: report.name,
                group: report.group,
                outcome,
                elapsed: format!("{}ms", report.elapsed.as_millis()),
                detail,
            }
        })
        .collect();
    println!("{}", Table::new(rows));

    let tally = Tally::of(reports);
    let line = format!(
        "{} passed, {} failed, {} skipped",
        tally.passed, tally.failed, tally.skipped
    );
    if tally.failed > 0 {
        println!("{}", line.red().bold());
    } else {
        println!("{}", line.green().bold());
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Tally {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Tally {
    pub fn of(reports: &[ScenarioReport]) -> Self {
        let mut tally = Self::default();
        for report in reports {
            match report.outcome {
                Outcome::Passed => tally.passed += 1,
                Outcome::Failed { .. } => tally.failed += 1,
                Outcome::Skipped { .. } => tally.skipped += 1,
            }
        }
        tally
    }
}
