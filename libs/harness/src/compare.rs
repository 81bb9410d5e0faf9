//! Snapshot normalization and structural comparison.
//!
//! Every snapshot type says how to normalize itself: unordered collections
//! are sorted by a stable key and volatile timestamps are zeroed. The
//! normalized pair is then compared as JSON so a mismatch can name the exact
//! field paths that differ.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::api::{
    ClusterStatus, CnciDetails, Cncis, Events, NodeServers, Nodes, Server, Servers,
    TenantResources, TraceData, TracesSummary, UsageHistory,
};
use crate::error::{HarnessError, Result};

/// A value that can be compared after normalization.
pub trait Snapshot: Clone + Serialize {
    /// Name used in mismatch reports.
    const NAME: &'static str;

    /// Put the value into canonical form. Must be idempotent.
    fn normalize(&mut self);

    fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.normalize();
        copy
    }
}

/// Outcome of a comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub equal: bool,
    /// One line per mismatched field path; empty when equal.
    pub diff: String,
}

impl Verdict {
    /// Turn a mismatch into an assertion failure.
    pub fn into_result(self, what: &str) -> Result<()> {
        if self.equal {
            Ok(())
        } else {
            Err(HarnessError::Mismatch {
                what: what.to_string(),
                diff: self.diff,
            })
        }
    }
}

/// Normalize both snapshots and compare them structurally.
pub fn compare<T: Snapshot>(expected: &T, actual: &T) -> Verdict {
    let expected = to_value(&expected.normalized());
    let actual = to_value(&actual.normalized());

    let mut lines = Vec::new();
    diff_values(&expected, &actual, "$", &mut lines);

    Verdict {
        equal: lines.is_empty(),
        diff: lines.join("\n"),
    }
}

/// Compare and fail with the snapshot's name on mismatch.
pub fn assert_snapshot<T: Snapshot>(expected: &T, actual: &T) -> Result<()> {
    compare(expected, actual).into_result(T::NAME)
}

fn to_value<T: Serialize>(value: &T) -> Value {
    // Snapshot types are plain data; a failure here would be reported as a diff.
    serde_json::to_value(value).unwrap_or_else(|e| Value::String(format!("<unserializable: {e}>")))
}

fn diff_values(expected: &Value, actual: &Value, path: &str, out: &mut Vec<String>) {
    match (expected, actual) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, a_val) in a {
                let field = format!("{path}.{key}");
                match b.get(key) {
                    Some(b_val) => diff_values(a_val, b_val, &field, out),
                    None => out.push(format!("{field}: missing from actual")),
                }
            }
            for key in b.keys().filter(|k| !a.contains_key(*k)) {
                out.push(format!("{path}.{key}: unexpected field"));
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            if a.len() != b.len() {
                out.push(format!(
                    "{path}: expected {} elements, got {}",
                    a.len(),
                    b.len()
                ));
            }
            for (i, (a_elem, b_elem)) in a.iter().zip(b.iter()).enumerate() {
                diff_values(a_elem, b_elem, &format!("{path}[{i}]"), out);
            }
        }
        (a, b) if a == b => {}
        (a, b) => out.push(format!("{path}: expected {a}, got {b}")),
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

// =============================================================================
// Normalization rules
// =============================================================================

impl Snapshot for Servers {
    const NAME: &'static str = "servers";

    fn normalize(&mut self) {
        self.servers.sort_by(|a, b| a.id.cmp(&b.id));
        for server in &mut self.servers {
            server.created = epoch();
        }
    }
}

impl Snapshot for Server {
    const NAME: &'static str = "server";

    fn normalize(&mut self) {
        self.server.created = epoch();
    }
}

impl Snapshot for UsageHistory {
    const NAME: &'static str = "usage history";

    fn normalize(&mut self) {
        self.usages.sort_by(|a, b| {
            (a.timestamp, a.vcpu, a.memory_mb, a.disk_mb).cmp(&(
                b.timestamp,
                b.vcpu,
                b.memory_mb,
                b.disk_mb,
            ))
        });
    }
}

impl Snapshot for TenantResources {
    const NAME: &'static str = "tenant resources";

    fn normalize(&mut self) {
        self.timestamp = epoch();
        self.quotas.sort_by(|a, b| a.name.cmp(&b.name));
    }
}

impl Snapshot for Events {
    const NAME: &'static str = "events";

    // Timestamps are part of the record; only the order is free.
    fn normalize(&mut self) {
        self.events.sort_by(|a, b| {
            (a.timestamp, &a.tenant_id, &a.event_type, &a.message).cmp(&(
                b.timestamp,
                &b.tenant_id,
                &b.event_type,
                &b.message,
            ))
        });
    }
}

impl Snapshot for Nodes {
    const NAME: &'static str = "nodes";

    fn normalize(&mut self) {
        self.nodes.sort_by(|a, b| a.id.cmp(&b.id));
        for node in &mut self.nodes {
            node.updated = epoch();
        }
    }
}

impl Snapshot for ClusterStatus {
    const NAME: &'static str = "cluster status";

    fn normalize(&mut self) {}
}

impl Snapshot for NodeServers {
    const NAME: &'static str = "node servers";

    fn normalize(&mut self) {
        self.servers.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

impl Snapshot for Cncis {
    const NAME: &'static str = "cncis";

    fn normalize(&mut self) {
        self.cncis.sort_by(|a, b| a.id.cmp(&b.id));
        for cnci in &mut self.cncis {
            cnci.subnets.sort();
        }
    }
}

impl Snapshot for CnciDetails {
    const NAME: &'static str = "cnci details";

    fn normalize(&mut self) {
        self.cnci.subnets.sort();
    }
}

impl Snapshot for TracesSummary {
    const NAME: &'static str = "traces summary";

    fn normalize(&mut self) {
        self.summaries.sort_by(|a, b| a.label.cmp(&b.label));
    }
}

impl Snapshot for TraceData {
    const NAME: &'static str = "trace data";

    fn normalize(&mut self) {}
}
