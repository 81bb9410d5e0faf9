//! Sequential scenario execution and reporting.

use std::time::{Duration, Instant};

use serde::{Serialize, Serializer};
use tracing::{error, info, warn};

use crate::context::TestContext;
use crate::error::{FailureClass, HarnessError, Result};
use crate::scenarios::{self, Scenario, CATALOGUE};

/// How one scenario ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { class: FailureClass, message: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub name: &'static str,
    pub group: &'static str,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(rename = "elapsed_ms", serialize_with = "as_millis")]
    pub elapsed: Duration,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        matches!(self.outcome, Outcome::Passed)
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

fn as_millis<S: Serializer>(elapsed: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_u64(elapsed.as_millis() as u64)
}

/// Resolve scenario names; an empty list selects the whole catalogue.
pub fn select(names: &[String]) -> Result<Vec<&'static Scenario>> {
    if names.is_empty() {
        return Ok(CATALOGUE.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            scenarios::find(name)
                .ok_or_else(|| HarnessError::precondition(format!("unknown scenario {:?}", name)))
        })
        .collect()
}

/// Run one scenario, never propagating its failure.
pub async fn run_scenario(ctx: &TestContext, scenario: &Scenario) -> ScenarioReport {
    let started = Instant::now();

    let outcome = if let Some(reason) = scenario.requires.missing(ctx) {
        warn!(scenario = scenario.name, reason, "Skipping scenario");
        Outcome::Skipped {
            reason: reason.to_string(),
        }
    } else {
        info!(scenario = scenario.name, "Running scenario");
        match (scenario.run)(ctx).await {
            Ok(()) => Outcome::Passed,
            Err(e) => {
                error!(scenario = scenario.name, class = %e.class(), error = %e, "Scenario failed");
                Outcome::Failed {
                    class: e.class(),
                    message: e.to_string(),
                }
            }
        }
    };

    let report = ScenarioReport {
        name: scenario.name,
        group: scenario.group,
        outcome,
        elapsed: started.elapsed(),
    };
    if report.passed() {
        info!(scenario = scenario.name, elapsed_ms = report.elapsed.as_millis() as u64, "Scenario passed");
    }
    report
}

/// Run scenarios one after another. A failure never stops the rest.
pub async fn run_all(ctx: &TestContext, selected: &[&Scenario]) -> Vec<ScenarioReport> {
    let mut reports = Vec::with_capacity(selected.len());
    for scenario in selected {
        reports.push(run_scenario(ctx, scenario).await);
    }
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_all_by_default() {
        assert_eq!(select(&[]).unwrap().len(), CATALOGUE.len());
    }

    #[test]
    fn test_select_preserves_requested_order() {
        let picked = select(&["clear-events".to_string(), "list-nodes".to_string()]).unwrap();
        assert_eq!(picked[0].name, "clear-events");
        assert_eq!(picked[1].name, "list-nodes");
    }

    #[test]
    fn test_select_rejects_unknown_names() {
        assert!(select(&["bogus".to_string()]).is_err());
    }

    #[test]
    fn test_report_serializes_flat() {
        let report = ScenarioReport {
            name: "delete-server",
            group: "instances",
            outcome: Outcome::Failed {
                class: FailureClass::Protocol,
                message: "no command:delete received".to_string(),
            },
            elapsed: Duration::from_millis(1500),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "failed");
        assert_eq!(json["class"], "protocol");
        assert_eq!(json["elapsed_ms"], 1500);
        assert!(report.failed());
    }
}
