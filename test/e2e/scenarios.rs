//! Every catalogued scenario against the reference controller, over real
//! TLS sockets.
//!
//! ## Running
//!
//! ```bash
//! cargo test -p cpat-e2e --test scenarios
//! ```

mod common;

use cpat_harness::{driver, runner, scenarios, Outcome};

async fn run_named(name: &str) {
    let (mock, ctx) = common::start().await;
    let scenario = scenarios::find(name).unwrap_or_else(|| panic!("no scenario {name}"));
    let report = runner::run_scenario(&ctx, scenario).await;
    mock.shutdown().await;
    assert_eq!(report.outcome, Outcome::Passed, "{name}");
}

macro_rules! scenario_tests {
    ($($test:ident => $name:literal),+ $(,)?) => {
        $(
            #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
            async fn $test() {
                run_named($name).await;
            }
        )+
    };
}

scenario_tests! {
    create_single_server => "create-single-server",
    list_server_details_tenant => "list-server-details-tenant",
    show_server_details => "show-server-details",
    show_server_details_unauthorized => "show-server-details-unauthorized",
    delete_server => "delete-server",
    delete_unscheduled_server => "delete-unscheduled-server",
    servers_action_start => "servers-action-start",
    servers_action_stop => "servers-action-stop",
    servers_action_wrong_action => "servers-action-wrong-action",
    server_action_stop => "server-action-stop",
    server_action_start => "server-action-start",
    stop_unscheduled_server => "stop-unscheduled-server",
    list_tenant_resources => "list-tenant-resources",
    list_tenant_quotas => "list-tenant-quotas",
    list_events_tenant => "list-events-tenant",
    list_node_servers => "list-node-servers",
    list_nodes => "list-nodes",
    node_summary => "node-summary",
    list_cncis => "list-cncis",
    list_cnci_details => "list-cnci-details",
    list_traces => "list-traces",
    trace_data => "trace-data",
    list_events => "list-events",
    clear_events => "clear-events",
    image_lifecycle => "image-lifecycle",
}

/// The whole catalogue in one run against one controller: state left behind
/// by earlier scenarios must not break later ones.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_catalogue_shares_one_controller() {
    let (mock, ctx) = common::start().await;
    let selected = runner::select(&[]).unwrap();
    let reports = runner::run_all(&ctx, &selected).await;
    mock.shutdown().await;

    assert_eq!(reports.len(), scenarios::CATALOGUE.len());
    let unhappy: Vec<_> = reports.iter().filter(|r| !r.passed()).collect();
    assert!(unhappy.is_empty(), "not passed: {unhappy:#?}");
}

/// Without a datastore handle the scenarios are skipped, not failed.
#[tokio::test]
async fn missing_datastore_skips() {
    let (mock, _) = common::start().await;
    let ctx = cpat_harness::TestContext::new(mock.harness_config()).unwrap();
    let scenario = scenarios::find("list-nodes").unwrap();
    let report = runner::run_scenario(&ctx, scenario).await;
    mock.shutdown().await;
    assert!(matches!(report.outcome, Outcome::Skipped { .. }));
}

/// Unbound instances left in the listing are refused, not deleted, while the
/// scenario's own bound instances go away.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn delete_server_refuses_unbound_leftovers() {
    let (mock, ctx) = common::start().await;
    let fixture = ctx.fixture().await.unwrap();
    let leftovers = driver::ids(&driver::create_servers(&ctx, &fixture, 2, None).await.unwrap());

    let scenario = scenarios::find("delete-server").unwrap();
    let report = runner::run_scenario(&ctx, scenario).await;
    let remaining = driver::list_servers(&ctx, &fixture.tenant).await.unwrap();
    mock.shutdown().await;

    assert_eq!(report.outcome, Outcome::Passed);
    assert_eq!(remaining.total_servers, leftovers.len());
    let unbound = driver::only(&remaining, &leftovers);
    assert_eq!(unbound.len(), leftovers.len());
    assert!(unbound.iter().all(|s| s.node_id.is_none()));
}
