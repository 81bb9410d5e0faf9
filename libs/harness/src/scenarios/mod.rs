//! The acceptance scenario catalogue.
//!
//! Each scenario is one sequential flow against the service. Scenarios only
//! assert on resources they created themselves, or on state read through the
//! datastore handle at the same moment, since the service is shared.

use futures_util::future::BoxFuture;

use crate::context::TestContext;
use crate::error::Result;

mod cluster;
mod compute;
mod images;
mod telemetry;
mod tenant;

/// What a scenario needs beyond the REST endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Requirements {
    pub datastore: bool,
    pub control: bool,
    pub admin_command: bool,
}

impl Requirements {
    const REST: Self = Self {
        datastore: true,
        control: false,
        admin_command: false,
    };

    const AGENT: Self = Self {
        datastore: true,
        control: true,
        admin_command: false,
    };

    const ADMIN: Self = Self {
        datastore: true,
        control: false,
        admin_command: true,
    };

    /// Why `ctx` cannot run a scenario with these requirements, if it cannot.
    pub fn missing(&self, ctx: &TestContext) -> Option<&'static str> {
        if self.datastore && !ctx.has_datastore() {
            return Some("no datastore handle");
        }
        if self.control && !ctx.has_control() {
            return Some("no control endpoint");
        }
        if self.admin_command && !ctx.has_admin_command() {
            return Some("no admin command");
        }
        None
    }
}

pub type ScenarioFn = fn(&TestContext) -> BoxFuture<'_, Result<()>>;

/// A named, independently reportable scenario.
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub group: &'static str,
    pub requires: Requirements,
    pub run: ScenarioFn,
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("group", &self.group)
            .field("requires", &self.requires)
            .finish()
    }
}

macro_rules! scenario {
    ($name:literal, $group:literal, $requires:expr, $run:path) => {
        Scenario {
            name: $name,
            group: $group,
            requires: $requires,
            run: $run,
        }
    };
}

/// Every scenario, in run order.
pub static CATALOGUE: &[Scenario] = &[
    // Instances
    scenario!("create-single-server", "instances", Requirements::REST, compute::create_single_server),
    scenario!("list-server-details-tenant", "instances", Requirements::REST, compute::list_server_details_tenant),
    scenario!("show-server-details", "instances", Requirements::REST, compute::show_server_details),
    scenario!("show-server-details-unauthorized", "instances", Requirements::REST, compute::show_server_details_unauthorized),
    scenario!("delete-server", "instances", Requirements::AGENT, compute::delete_server),
    scenario!("delete-unscheduled-server", "instances", Requirements::REST, compute::delete_unscheduled_server),
    // Actions
    scenario!("servers-action-start", "actions", Requirements::AGENT, compute::servers_action_start),
    scenario!("servers-action-stop", "actions", Requirements::AGENT, compute::servers_action_stop),
    scenario!("servers-action-wrong-action", "actions", Requirements::REST, compute::servers_action_wrong_action),
    scenario!("server-action-stop", "actions", Requirements::AGENT, compute::server_action_stop),
    scenario!("server-action-start", "actions", Requirements::AGENT, compute::server_action_start),
    scenario!("stop-unscheduled-server", "actions", Requirements::REST, compute::stop_unscheduled_server),
    // Tenant
    scenario!("list-tenant-resources", "tenant", Requirements::AGENT, tenant::list_tenant_resources),
    scenario!("list-tenant-quotas", "tenant", Requirements::REST, tenant::list_tenant_quotas),
    scenario!("list-events-tenant", "tenant", Requirements::REST, tenant::list_events_tenant),
    // Cluster
    scenario!("list-node-servers", "cluster", Requirements::AGENT, cluster::list_node_servers),
    scenario!("list-nodes", "cluster", Requirements::AGENT, cluster::list_nodes),
    scenario!("node-summary", "cluster", Requirements::AGENT, cluster::node_summary),
    scenario!("list-cncis", "cluster", Requirements::AGENT, cluster::list_cncis),
    scenario!("list-cnci-details", "cluster", Requirements::AGENT, cluster::list_cnci_details),
    // Traces and events
    scenario!("list-traces", "telemetry", Requirements::AGENT, telemetry::list_traces),
    scenario!("trace-data", "telemetry", Requirements::AGENT, telemetry::trace_data),
    scenario!("list-events", "telemetry", Requirements::REST, telemetry::list_events),
    scenario!("clear-events", "telemetry", Requirements::REST, telemetry::clear_events),
    // Administrative client
    scenario!("image-lifecycle", "admin", Requirements::ADMIN, images::image_lifecycle),
];

/// Look a scenario up by name.
pub fn find(name: &str) -> Option<&'static Scenario> {
    CATALOGUE.iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = CATALOGUE.iter().map(|s| s.name).collect();
        assert_eq!(names.len(), CATALOGUE.len());
    }

    #[test]
    fn test_find() {
        assert_eq!(find("clear-events").map(|s| s.group), Some("telemetry"));
        assert!(find("no-such-scenario").is_none());
    }

    #[test]
    fn test_catalogue_is_complete() {
        assert_eq!(CATALOGUE.len(), 25);
    }
}
