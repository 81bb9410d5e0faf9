//! `cpat list`.

use anyhow::Result;
use cpat_harness::CATALOGUE;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_output, OutputFormat};

#[derive(Debug, Serialize, Tabled)]
struct ScenarioRow {
    #[tabled(rename = "Scenario")]
    name: &'static str,
    #[tabled(rename = "Group")]
    group: &'static str,
    #[tabled(rename = "Needs")]
    needs: String,
}

fn needs(scenario: &cpat_harness::Scenario) -> String {
    let mut needs = Vec::new();
    if scenario.requires.datastore {
        needs.push("datastore");
    }
    if scenario.requires.control {
        needs.push("agent");
    }
    if scenario.requires.admin_command {
        needs.push("admin-cli");
    }
    needs.join(", ")
}

pub fn run(format: OutputFormat) -> Result<()> {
    let rows: Vec<ScenarioRow> = CATALOGUE
        .iter()
        .map(|scenario| ScenarioRow {
            name: scenario.name,
            group: scenario.group,
            needs: needs(scenario),
        })
        .collect();
    print_output(&rows, format);
    Ok(())
}
